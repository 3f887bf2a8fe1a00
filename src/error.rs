//! Error types for gateway calls.
//!
//! Transport failures, malformed bodies and status codes the caller registered
//! on a [`ResponseHandler`](crate::ResponseHandler) all surface as [`Error`].
//! Status-driven errors carry an [`ErrorKind`] chosen by the caller, so a
//! single 404 can mean "patient not found" in one place and "provider not
//! found" in another.

use http::StatusCode;
use std::fmt;

/// The resource a status-driven error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Patient,
    PatientDocument,
    PatientIdentity,
    Provider,
    Tenant,
    MapType,
    NamedQuery,
    Clu,
    Nlp,
    Subsection,
    Document,
    /// Any resource not covered above.
    Other(String),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Patient => "patient",
            Resource::PatientDocument => "patient document",
            Resource::PatientIdentity => "patient identity",
            Resource::Provider => "provider",
            Resource::Tenant => "tenant",
            Resource::MapType => "map type",
            Resource::NamedQuery => "named query",
            Resource::Clu => "CLU",
            Resource::Nlp => "NLP",
            Resource::Subsection => "subsection",
            Resource::Document => "document",
            Resource::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// The kind of error a caller registers against a status code.
///
/// # Examples
///
/// ```
/// use cdr_gateway::{ErrorKind, Resource};
///
/// let kind = ErrorKind::NotFound(Resource::Patient);
/// assert_eq!(kind.to_string(), "patient not found");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request failed validation (usually 400).
    BadRequest,
    /// The caller is not allowed to perform the operation (usually 403).
    Forbidden,
    /// The configured tenant may not access the resource.
    TenantNotAuthorized,
    /// The patient identity was set in error and may not be used.
    PatientIdentitySetInError,
    /// The named resource does not exist (usually 404).
    NotFound(Resource),
    /// The operation conflicts with existing state, e.g. deleting a referenced entity.
    Conflict,
    /// The service failed internally (usually 500).
    InternalServerError,
    /// Catch-all for any status outside 200..=299.
    NonTwoHundred,
    /// A caller-defined kind.
    Other(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::BadRequest => f.write_str("bad request"),
            ErrorKind::Forbidden => f.write_str("forbidden"),
            ErrorKind::TenantNotAuthorized => f.write_str("tenant not authorized"),
            ErrorKind::PatientIdentitySetInError => f.write_str("patient identity set in error"),
            ErrorKind::NotFound(resource) => write!(f, "{} not found", resource),
            ErrorKind::Conflict => f.write_str("conflict"),
            ErrorKind::InternalServerError => f.write_str("internal server error"),
            ErrorKind::NonTwoHundred => f.write_str("non-200 response"),
            ErrorKind::Other(name) => f.write_str(name),
        }
    }
}

/// The main error type for gateway calls.
///
/// # Examples
///
/// ```no_run
/// use cdr_gateway::{Client, Config, Error, ErrorKind, RequestMetadata, Resource};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::new(Config::from_pairs([("host", "cdr.local"), ("port", "3000")]))?;
/// let response = client
///     .perform_request("/api/v1/patient/srcsys/1234/demographics", &RequestMetadata::default())
///     .await?;
///
/// match response.handler().on_status(404, ErrorKind::NotFound(Resource::Patient)) {
///     Ok(handler) => println!("{}", handler.to_json()?),
///     Err(Error::Service { kind, status, .. }) => eprintln!("{} ({})", kind, status),
///     Err(e) => return Err(e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The service could not be reached: the connection was refused or the
    /// TLS handshake failed. Never retried.
    #[error("Connection refused: {0}")]
    ConnectionRefused(#[source] reqwest::Error),

    /// Any other transport-level failure, propagated unmodified.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The read timeout elapsed before the service answered.
    #[error("Request timed out")]
    Timeout,

    /// A body declared as JSON could not be parsed.
    ///
    /// # Fields
    ///
    /// * `raw_body` - The body that failed to parse
    /// * `serde_error` - The error message from serde
    /// * `status` - The HTTP status code of the response
    #[error("Failed to parse response body (status {status}): {serde_error}")]
    BodyParse {
        /// The raw response body that failed to parse
        raw_body: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The response matched a status check registered by the caller.
    #[error("{kind}: {} {body}", .status.as_u16())]
    Service {
        /// The kind the caller registered for this status
        kind: ErrorKind,
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        body: String,
    },

    /// A status check was registered for a code outside 100..=505.
    #[error("Unsupported status code: {0}")]
    UnsupportedStatusCode(u16),

    /// A dispatch name did not follow the `if_<code>_raise` pattern.
    #[error("No such operation: {0}")]
    NoSuchOperation(String),

    /// Configuration was missing or invalid when a request was attempted.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),
}

impl Error {
    /// Maps a transport error onto the gateway taxonomy.
    ///
    /// Connect failures (refused connections, failed TLS handshakes) collapse
    /// into [`Error::ConnectionRefused`].
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_connect() {
            Error::ConnectionRefused(err)
        } else {
            Error::Network(err)
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Service { status, .. } => Some(*status),
            Error::BodyParse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Error::Service { body, .. } => Some(body),
            Error::BodyParse { raw_body, .. } => Some(raw_body),
            _ => None,
        }
    }

    /// Returns the registered kind for status-driven errors.
    ///
    /// ```
    /// use cdr_gateway::{Error, ErrorKind};
    /// use http::StatusCode;
    ///
    /// let err = Error::Service {
    ///     kind: ErrorKind::Conflict,
    ///     status: StatusCode::CONFLICT,
    ///     body: String::new(),
    /// };
    /// assert_eq!(err.kind(), Some(&ErrorKind::Conflict));
    /// assert_eq!(Error::Timeout.kind(), None);
    /// ```
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Error::Service { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// A specialized `Result` type for gateway calls.
pub type Result<T> = std::result::Result<T, Error>;
