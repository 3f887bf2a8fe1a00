//! Raw responses as returned by the client.
//!
//! A [`Response`] keeps the status, headers and body exactly as received.
//! Interpreting it is left to a [`ResponseHandler`], obtained with
//! [`Response::handler`].

use crate::handler::ResponseHandler;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A response from the service, body fully read.
///
/// # Examples
///
/// ```
/// use cdr_gateway::Response;
/// use http::{HeaderMap, HeaderValue, StatusCode};
/// use std::time::Duration;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("content-type", HeaderValue::from_static("application/json"));
///
/// let response = Response::new(
///     StatusCode::OK,
///     headers,
///     "{\"id\": 1}".to_string(),
///     Duration::from_millis(12),
/// );
///
/// assert_eq!(response.header("content-type"), Some("application/json"));
/// assert_eq!(response.handler().to_json().unwrap()["id"], 1);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The raw response body.
    pub body: String,

    /// Time from sending the request until the body was read.
    pub latency: Duration,
}

impl Response {
    /// Wraps an already-read response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: String, latency: Duration) -> Self {
        Self {
            status,
            headers,
            body,
            latency,
        }
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Binds a [`ResponseHandler`] to this response.
    pub fn handler(self) -> ResponseHandler {
        ResponseHandler::considering(self)
    }
}
