//! Request metadata and body types.

use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;

/// The HTTP verbs the service understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
    Delete,
    /// A POST whose body is a `multipart/form-data` upload.
    PostMultipart,
}

impl RequestMethod {
    /// The verb sent on the wire.
    pub fn as_http(&self) -> http::Method {
        match self {
            RequestMethod::Get => http::Method::GET,
            RequestMethod::Post | RequestMethod::PostMultipart => http::Method::POST,
            RequestMethod::Delete => http::Method::DELETE,
        }
    }
}

impl RequestMethod {
    /// Reads a verb from an options-map `method` entry.
    ///
    /// A missing or null entry yields `None`; anything but a string naming a
    /// known verb is an error.
    pub(crate) fn from_option(value: Option<Value>) -> Result<Option<Self>> {
        match value {
            Some(Value::String(verb)) => verb.parse().map(Some),
            Some(Value::Null) | None => Ok(None),
            Some(other) => Err(Error::Configuration(format!(
                "Unknown request method: {}",
                other
            ))),
        }
    }
}

impl FromStr for RequestMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(RequestMethod::Get),
            "post" => Ok(RequestMethod::Post),
            "delete" => Ok(RequestMethod::Delete),
            "post_multipart" => Ok(RequestMethod::PostMultipart),
            other => Err(Error::Configuration(format!(
                "Unknown request method: {}",
                other
            ))),
        }
    }
}

/// The body of an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(Value),
    /// Sent as a buffered `multipart/form-data` payload.
    Multipart(Multipart),
}

/// A `multipart/form-data` payload assembled in memory.
///
/// The whole payload is rendered into one buffer before the request is
/// signed, so the bytes hashed for `Content-MD5` are exactly the bytes sent.
///
/// # Examples
///
/// ```
/// use cdr_gateway::Multipart;
///
/// let form = Multipart::new()
///     .text("document_type", "clinical_note")
///     .file("file", "note.xml", "application/xml", b"<note/>".to_vec());
///
/// let body = String::from_utf8(form.to_bytes()).unwrap();
/// assert!(body.contains("filename=\"note.xml\""));
/// assert!(form.content_type().starts_with("multipart/form-data; boundary="));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Multipart {
    boundary: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

impl Multipart {
    /// Creates an empty form with a random boundary.
    pub fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("----cdr-gateway-{}", suffix))
    }

    /// Creates an empty form with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Adds a plain text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: value.into().into_bytes(),
        });
        self
    }

    /// Adds a file field.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data,
        });
        self
    }

    /// The boundary separating parts.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` header value, boundary included.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Renders the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for part in &self.parts {
            buf.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match &part.filename {
                Some(filename) => buf.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        escape_disposition(&part.name),
                        escape_disposition(filename)
                    )
                    .as_bytes(),
                ),
                None => buf.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n",
                        escape_disposition(&part.name)
                    )
                    .as_bytes(),
                ),
            }
            if let Some(content_type) = &part.content_type {
                buf.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
            }
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(&part.data);
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf
    }
}

/// Percent-encodes the characters that would break a quoted
/// `Content-Disposition` parameter, as browsers do for form uploads.
fn escape_disposition(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata for an individual gateway request.
///
/// Everything besides the path: verb, query parameters, body, whether to use
/// basic auth instead of HMAC signing, and an optional read-timeout override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestMetadata {
    /// The HTTP verb.
    pub method: RequestMethod,

    /// Query parameters. Nested objects are encoded with bracket notation.
    pub params: Map<String, Value>,

    /// Additional headers for this request.
    ///
    /// Headers the client declares as signed are read from here.
    pub headers: HeaderMap,

    /// Optional request body.
    pub body: Option<RequestBody>,

    /// Use HTTP Basic credentials instead of HMAC signing.
    pub basic_auth: bool,

    /// Overrides the client's read timeout for this request.
    pub timeout: Option<Duration>,
}

impl RequestMetadata {
    /// Creates metadata for the given verb.
    pub fn new(method: RequestMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Builds metadata from an options map in which a `method` entry selects
    /// the verb and every other entry is a query parameter.
    ///
    /// ```
    /// use cdr_gateway::{RequestMetadata, RequestMethod};
    /// use serde_json::json;
    ///
    /// let options = json!({"method": "delete", "tid": "9"});
    /// let metadata = RequestMetadata::from_options(options.as_object().unwrap().clone()).unwrap();
    /// assert_eq!(metadata.method, RequestMethod::Delete);
    /// assert!(metadata.params.get("method").is_none());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if `method` names an unknown verb.
    pub fn from_options(mut options: Map<String, Value>) -> Result<Self> {
        let method =
            RequestMethod::from_option(options.remove("method"))?.unwrap_or_default();
        Ok(Self {
            method,
            params: options,
            ..Self::default()
        })
    }

    /// Adds a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Adds a header to the request, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets a JSON body and switches the method to `Post`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        let json =
            serde_json::to_value(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        self.method = RequestMethod::Post;
        self.body = Some(RequestBody::Json(json));
        Ok(self)
    }

    /// Sets a multipart body and switches the method to `PostMultipart`.
    pub fn with_multipart(mut self, form: Multipart) -> Self {
        self.method = RequestMethod::PostMultipart;
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    /// Sends this request with basic-auth credentials instead of HMAC.
    pub fn with_basic_auth(mut self) -> Self {
        self.basic_auth = true;
        self
    }

    /// Overrides the client's timeout for this request only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing() {
        assert_eq!("GET".parse::<RequestMethod>().unwrap(), RequestMethod::Get);
        assert_eq!(
            "post_multipart".parse::<RequestMethod>().unwrap(),
            RequestMethod::PostMultipart
        );
        assert!(matches!(
            "patch".parse::<RequestMethod>(),
            Err(Error::Configuration(_))
        ));
        assert_eq!(RequestMethod::PostMultipart.as_http(), http::Method::POST);
    }

    #[test]
    fn test_from_options_strips_method() {
        let options = json!({"method": "post", "limit": 5});
        let metadata = RequestMetadata::from_options(options.as_object().unwrap().clone()).unwrap();
        assert_eq!(metadata.method, RequestMethod::Post);
        assert_eq!(metadata.params, *json!({"limit": 5}).as_object().unwrap());

        let options = json!({"limit": 5});
        let metadata = RequestMetadata::from_options(options.as_object().unwrap().clone()).unwrap();
        assert_eq!(metadata.method, RequestMethod::Get);

        let options = json!({"method": 3});
        assert!(RequestMetadata::from_options(options.as_object().unwrap().clone()).is_err());
    }

    #[test]
    fn test_multipart_layout() {
        let form = Multipart::with_boundary("XYZ")
            .text("kind", "note")
            .file("file", "a.txt", "text/plain", b"hello".to_vec());

        let expected = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"kind\"\r\n\
            \r\n\
            note\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            hello\r\n\
            --XYZ--\r\n";
        assert_eq!(String::from_utf8(form.to_bytes()).unwrap(), expected);
        assert_eq!(form.content_type(), "multipart/form-data; boundary=XYZ");
    }

    #[test]
    fn test_disposition_parameters_are_escaped() {
        let form = Multipart::with_boundary("XYZ")
            .text("a\"b", "v")
            .file("file", "evil\"\r\nX-Injected: 1.txt", "text/plain", b"x".to_vec());
        let body = String::from_utf8(form.to_bytes()).unwrap();

        assert!(body.contains("name=\"a%22b\""));
        assert!(body.contains("filename=\"evil%22%0D%0AX-Injected: 1.txt\""));
        assert!(!body.contains("\r\nX-Injected"));
    }

    #[test]
    fn test_with_header() {
        let metadata = RequestMetadata::default()
            .with_header("X-Request-Id", "abc")
            .unwrap()
            .with_header("x-request-id", "def")
            .unwrap();
        assert_eq!(metadata.headers.len(), 1);
        assert_eq!(metadata.headers["x-request-id"], "def");

        assert!(matches!(
            RequestMetadata::default().with_header("bad header", "v"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            RequestMetadata::default().with_header("x-ok", "line\nbreak"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_method_from_option() {
        assert_eq!(RequestMethod::from_option(None).unwrap(), None);
        assert_eq!(RequestMethod::from_option(Some(Value::Null)).unwrap(), None);
        assert_eq!(
            RequestMethod::from_option(Some(json!("delete"))).unwrap(),
            Some(RequestMethod::Delete)
        );
        assert!(RequestMethod::from_option(Some(json!(3))).is_err());
        assert!(RequestMethod::from_option(Some(json!("patch"))).is_err());
    }

    #[test]
    fn test_random_boundaries_differ() {
        assert_ne!(Multipart::new().boundary(), Multipart::new().boundary());
    }

    #[test]
    fn test_builders_set_method() {
        let metadata = RequestMetadata::default()
            .with_json(&json!({"a": 1}))
            .unwrap();
        assert_eq!(metadata.method, RequestMethod::Post);

        let metadata = RequestMetadata::default().with_multipart(Multipart::with_boundary("b"));
        assert_eq!(metadata.method, RequestMethod::PostMultipart);
        assert!(RequestMetadata::default().with_basic_auth().basic_auth);
    }
}
