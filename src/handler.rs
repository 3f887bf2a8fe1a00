//! Fluent status checks and body extraction.
//!
//! A [`ResponseHandler`] wraps one [`Response`]. Callers chain status checks,
//! each of which either fails with the [`ErrorKind`] registered for that code
//! or hands the handler back, and finish with an extraction:
//!
//! ```
//! use cdr_gateway::{Error, ErrorKind, Resource, Response, ResponseHandler};
//! use http::{HeaderMap, StatusCode};
//! use std::time::Duration;
//!
//! let response = Response::new(StatusCode::NOT_FOUND, HeaderMap::new(), String::new(), Duration::ZERO);
//!
//! let result = ResponseHandler::considering(response)
//!     .on_status(400, ErrorKind::BadRequest)
//!     .and_then(|h| h.on_status(404, ErrorKind::NotFound(Resource::Patient)))
//!     .and_then(|h| h.to_json());
//!
//! assert!(matches!(
//!     result,
//!     Err(Error::Service { kind: ErrorKind::NotFound(Resource::Patient), .. })
//! ));
//! ```
//!
//! Only the first matching check fails; the rest are inert.

use crate::{Error, ErrorKind, Response, Result};
use http::header::CONTENT_TYPE;
use http::StatusCode;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Display;

const DEFAULT_CONTENT_TYPE: &str = "text/plain";
const MIN_STATUS_CHECK: u16 = 100;
const MAX_STATUS_CHECK: u16 = 505;

/// The raw body together with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAndType {
    pub data: String,
    pub content_type: String,
}

/// Status-code dispatch over a single response.
#[derive(Debug, Clone)]
pub struct ResponseHandler {
    response: Response,
    non_two_hundred: Option<ErrorKind>,
}

impl ResponseHandler {
    /// Binds a handler to `response`.
    pub fn considering(response: Response) -> Self {
        Self {
            response,
            non_two_hundred: None,
        }
    }

    /// The response being checked.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// The raw body.
    pub fn as_str(&self) -> &str {
        &self.response.body
    }

    /// The `Content-Type` header, or `text/plain` when absent.
    pub fn content_type(&self) -> &str {
        self.response
            .header(CONTENT_TYPE.as_str())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Compares the status code against `code` as text, so `404` and `"404"`
    /// are equivalent.
    pub fn code_is(&self, code: impl Display) -> bool {
        self.response.status.as_str() == code.to_string()
    }

    /// The negation of [`code_is`](Self::code_is).
    pub fn code_is_not(&self, code: impl Display) -> bool {
        !self.code_is(code)
    }

    /// Registers `kind` to be raised by [`to_json`](Self::to_json) and
    /// [`data_and_type`](Self::data_and_type) when the status is outside
    /// 200..=299.
    ///
    /// The check is deferred to extraction; status predicates and
    /// [`as_str`](Self::as_str) are unaffected.
    pub fn if_non_two_hundred_raise(mut self, kind: ErrorKind) -> Self {
        self.non_two_hundred = Some(kind);
        self
    }

    /// Fails with `kind` if the status equals `code`, otherwise returns the
    /// handler unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedStatusCode`] if `code` is outside
    /// 100..=505, and [`Error::Service`] if the status matches.
    pub fn on_status(self, code: u16, kind: ErrorKind) -> Result<Self> {
        if !(MIN_STATUS_CHECK..=MAX_STATUS_CHECK).contains(&code) {
            return Err(Error::UnsupportedStatusCode(code));
        }
        if self.code_is(code) {
            return Err(self.service_error(kind));
        }
        Ok(self)
    }

    /// Runs a status check named in the `if_<code>_raise` form.
    ///
    /// The name must be `if_`, exactly three digits, then `_raise`, with the
    /// code no greater than 505.
    ///
    /// ```
    /// use cdr_gateway::{Error, ErrorKind, Response};
    /// use http::{HeaderMap, StatusCode};
    /// use std::time::Duration;
    ///
    /// let handler = Response::new(StatusCode::OK, HeaderMap::new(), String::new(), Duration::ZERO)
    ///     .handler();
    ///
    /// let handler = handler.dispatch("if_404_raise", ErrorKind::Forbidden).unwrap();
    /// assert!(matches!(
    ///     handler.dispatch("if_600_raise", ErrorKind::Forbidden),
    ///     Err(Error::NoSuchOperation(_))
    /// ));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchOperation`] for any other name, otherwise
    /// behaves like [`on_status`](Self::on_status).
    pub fn dispatch(self, name: &str, kind: ErrorKind) -> Result<Self> {
        match parse_status_operation(name) {
            Some(code) => self.on_status(code, kind),
            None => Err(Error::NoSuchOperation(name.to_string())),
        }
    }

    /// Fails with `kind` when the status equals `code` and the body's JSON
    /// `error` field matches `message`.
    ///
    /// A body that is not JSON, or has no string `error`, never matches.
    pub fn with_general_exception_check(
        self,
        code: impl Display,
        message: &Regex,
        kind: ErrorKind,
    ) -> Result<Self> {
        if !self.code_is(code) {
            return Ok(self);
        }
        let matched = serde_json::from_str::<Value>(&self.response.body)
            .ok()
            .and_then(|body| body.get("error").and_then(Value::as_str).map(|e| message.is_match(e)))
            .unwrap_or(false);
        if matched {
            return Err(self.service_error(kind));
        }
        Ok(self)
    }

    /// Fails with [`ErrorKind::PatientIdentitySetInError`] on a 403.
    pub fn with_patient_identity_set_in_error_check(self) -> Result<Self> {
        self.on_status(403, ErrorKind::PatientIdentitySetInError)
    }

    /// Parses the body as JSON.
    ///
    /// A body whose content type is present but not JSON is passed through
    /// as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the registered non-2xx error first, then
    /// [`Error::BodyParse`] if a JSON body is malformed.
    pub fn to_json(&self) -> Result<Value> {
        self.check_non_two_hundred()?;
        if !self.declares_json() {
            return Ok(Value::String(self.response.body.clone()));
        }
        serde_json::from_str(&self.response.body).map_err(|e| self.parse_error(e))
    }

    /// Deserializes the body into `T`, with the same checks as
    /// [`to_json`](Self::to_json).
    pub fn to_json_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.to_json()?;
        serde_json::from_value(value).map_err(|e| self.parse_error(e))
    }

    /// The raw body and its content type.
    ///
    /// # Errors
    ///
    /// Returns the registered non-2xx error, if any.
    pub fn data_and_type(&self) -> Result<DataAndType> {
        self.check_non_two_hundred()?;
        Ok(DataAndType {
            data: self.response.body.clone(),
            content_type: self.content_type().to_string(),
        })
    }

    /// Releases the response without any further checks.
    pub fn into_response(self) -> Response {
        self.response
    }

    fn declares_json(&self) -> bool {
        match self.response.header(CONTENT_TYPE.as_str()) {
            Some(content_type) => content_type.contains("json"),
            None => true,
        }
    }

    fn check_non_two_hundred(&self) -> Result<()> {
        match &self.non_two_hundred {
            Some(kind) if !self.response.status.is_success() => {
                Err(self.service_error(kind.clone()))
            }
            _ => Ok(()),
        }
    }

    fn service_error(&self, kind: ErrorKind) -> Error {
        Error::Service {
            kind,
            status: self.response.status,
            body: self.response.body.clone(),
        }
    }

    fn parse_error(&self, err: serde_json::Error) -> Error {
        Error::BodyParse {
            raw_body: self.response.body.clone(),
            serde_error: err.to_string(),
            status: self.response.status,
        }
    }
}

impl std::fmt::Display for ResponseHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.response.body)
    }
}

fn parse_status_operation(name: &str) -> Option<u16> {
    let digits = name.strip_prefix("if_")?.strip_suffix("_raise")?;
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u16>().ok().filter(|code| *code <= MAX_STATUS_CHECK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resource;
    use http::{HeaderMap, HeaderValue};
    use serde::Deserialize;
    use std::time::Duration;

    fn handler(status: u16, content_type: Option<&'static str>, body: &str) -> ResponseHandler {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        Response::new(
            StatusCode::from_u16(status).unwrap(),
            headers,
            body.to_string(),
            Duration::ZERO,
        )
        .handler()
    }

    #[test]
    fn test_matching_status_raises_registered_kind() {
        let result = handler(404, None, "").on_status(404, ErrorKind::NotFound(Resource::Provider));
        match result {
            Err(Error::Service { kind, status, .. }) => {
                assert_eq!(kind, ErrorKind::NotFound(Resource::Provider));
                assert_eq!(status.as_u16(), 404);
            }
            other => panic!("Expected Service error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_matching_status_is_chainable() {
        let h = handler(200, Some("application/json"), "{\"ok\":true}")
            .on_status(404, ErrorKind::NotFound(Resource::Patient))
            .and_then(|h| h.on_status(403, ErrorKind::Forbidden))
            .and_then(|h| h.on_status(500, ErrorKind::InternalServerError))
            .unwrap();
        assert_eq!(h.to_json().unwrap()["ok"], true);
    }

    #[test]
    fn test_first_matching_check_wins() {
        let result = handler(409, None, "")
            .on_status(404, ErrorKind::NotFound(Resource::Patient))
            .and_then(|h| h.on_status(409, ErrorKind::Conflict))
            .and_then(|h| h.on_status(409, ErrorKind::Other("second".to_string())));
        assert_eq!(result.unwrap_err().kind(), Some(&ErrorKind::Conflict));
    }

    #[test]
    fn test_status_codes_outside_range_are_rejected() {
        assert!(matches!(
            handler(200, None, "").on_status(506, ErrorKind::BadRequest),
            Err(Error::UnsupportedStatusCode(506))
        ));
        assert!(matches!(
            handler(200, None, "").on_status(99, ErrorKind::BadRequest),
            Err(Error::UnsupportedStatusCode(99))
        ));
        assert!(handler(200, None, "").on_status(505, ErrorKind::BadRequest).is_ok());
    }

    #[test]
    fn test_dispatch_pattern_is_closed() {
        for name in [
            "if_506_raise",
            "if_999_raise",
            "if_40_raise",
            "if_4040_raise",
            "if_abc_raise",
            "if_404_raise_now",
            "unless_404_raise",
            "if_+40_raise",
        ] {
            assert!(
                matches!(
                    handler(404, None, "").dispatch(name, ErrorKind::BadRequest),
                    Err(Error::NoSuchOperation(ref n)) if n == name
                ),
                "{} should not dispatch",
                name
            );
        }

        assert!(matches!(
            handler(404, None, "").dispatch("if_404_raise", ErrorKind::BadRequest),
            Err(Error::Service { kind: ErrorKind::BadRequest, .. })
        ));
        assert!(handler(200, None, "")
            .dispatch("if_505_raise", ErrorKind::BadRequest)
            .is_ok());
        // 3 digits but below the checkable range
        assert!(matches!(
            handler(200, None, "").dispatch("if_099_raise", ErrorKind::BadRequest),
            Err(Error::UnsupportedStatusCode(99))
        ));
    }

    #[test]
    fn test_code_is_accepts_numbers_and_strings() {
        let h = handler(502, None, "");
        assert!(h.code_is(502));
        assert!(h.code_is("502"));
        assert!(h.code_is_not(200));
        assert!(h.code_is_not("50"));
    }

    #[test]
    fn test_service_running_style_check_on_bad_gateway() {
        let running = handler(502, None, "")
            .on_status(404, ErrorKind::NotFound(Resource::Other("service".to_string())))
            .map(|h| h.code_is_not(502))
            .unwrap();
        assert!(!running);
    }

    #[test]
    fn test_status_alone_does_not_fail_extraction() {
        let h = handler(400, Some("application/json"), "{\"error\":\"bad\"}");
        assert_eq!(h.to_json().unwrap()["error"], "bad");
    }

    #[test]
    fn test_non_two_hundred_raises_lazily() {
        let h = handler(400, Some("application/json"), "{\"error\":\"bad\"}")
            .if_non_two_hundred_raise(ErrorKind::NonTwoHundred);

        // Predicates and the raw body are unaffected.
        assert!(h.code_is(400));
        assert_eq!(h.as_str(), "{\"error\":\"bad\"}");

        let err = h.to_json().unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::NonTwoHundred));
        assert_eq!(err.to_string(), "non-200 response: 400 {\"error\":\"bad\"}");
        assert!(h.data_and_type().is_err());

        let ok = handler(201, Some("application/json"), "{}")
            .if_non_two_hundred_raise(ErrorKind::NonTwoHundred);
        assert!(ok.to_json().is_ok());
    }

    #[test]
    fn test_non_json_content_type_passes_through() {
        let h = handler(200, Some("text/xml"), "<doc/>");
        assert_eq!(h.to_json().unwrap(), Value::String("<doc/>".to_string()));
        assert_eq!(h.to_json_as::<String>().unwrap(), "<doc/>");
    }

    #[test]
    fn test_malformed_json_carries_body() {
        let h = handler(200, Some("application/json; charset=utf-8"), "not json");
        match h.to_json() {
            Err(Error::BodyParse { raw_body, status, .. }) => {
                assert_eq!(raw_body, "not json");
                assert_eq!(status, StatusCode::OK);
            }
            other => panic!("Expected BodyParse, got {:?}", other),
        }

        // No content type is treated as JSON.
        assert!(handler(200, None, "not json").to_json().is_err());
    }

    #[test]
    fn test_typed_extraction() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Demographics {
            name: String,
        }
        let h = handler(200, Some("application/json"), "{\"name\":\"Ada\"}");
        assert_eq!(
            h.to_json_as::<Demographics>().unwrap(),
            Demographics {
                name: "Ada".to_string()
            }
        );
        assert!(matches!(
            h.to_json_as::<Vec<u8>>(),
            Err(Error::BodyParse { .. })
        ));
    }

    #[test]
    fn test_data_and_type() {
        assert_eq!(
            handler(200, None, "raw").data_and_type().unwrap(),
            DataAndType {
                data: "raw".to_string(),
                content_type: "text/plain".to_string(),
            }
        );
        assert_eq!(
            handler(200, Some("application/pdf"), "%PDF").content_type(),
            "application/pdf"
        );
    }

    #[test]
    fn test_general_exception_check() {
        let has_documents = Regex::new("has documents").unwrap();
        let conflict = || ErrorKind::Other("patient identity has documents".to_string());

        let result = handler(409, Some("application/json"), "{\"error\": \"Patient Identity has documents\"}")
            .with_general_exception_check("409", &has_documents, conflict());
        assert_eq!(result.unwrap_err().kind(), Some(&conflict()));

        // A non-matching message falls through to the next check.
        let result = handler(409, Some("application/json"), "{\"error\": \"something else\"}")
            .with_general_exception_check(409, &has_documents, conflict())
            .and_then(|h| h.on_status(409, ErrorKind::Conflict));
        assert_eq!(result.unwrap_err().kind(), Some(&ErrorKind::Conflict));

        // Unparseable bodies and other codes never match.
        assert!(handler(409, None, "<html>")
            .with_general_exception_check(409, &has_documents, conflict())
            .is_ok());
        assert!(handler(403, None, "{\"error\": \"has documents\"}")
            .with_general_exception_check(409, &has_documents, conflict())
            .is_ok());
    }

    #[test]
    fn test_patient_identity_set_in_error_check() {
        assert_eq!(
            handler(403, None, "")
                .with_patient_identity_set_in_error_check()
                .unwrap_err()
                .kind(),
            Some(&ErrorKind::PatientIdentitySetInError)
        );
        assert!(handler(200, None, "")
            .with_patient_identity_set_in_error_check()
            .is_ok());
    }
}
