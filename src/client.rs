//! Signed HTTP client for the document repository service.
//!
//! The [`Client`] type turns a path plus [`RequestMetadata`] into a signed
//! request, sends it, and returns the raw [`Response`]. Use [`ClientBuilder`]
//! to configure and create clients.

use crate::{
    config::Config,
    metadata::{Multipart, RequestBody, RequestMetadata, RequestMethod},
    query::encode_query,
    signer::{derive_signing_key, DigestAlgorithm, Signer},
    Error, Response, Result,
};
use http::header::CONTENT_TYPE;
use http::HeaderName;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const JSON_CONTENT_TYPE: &str = "application/json";

/// How a built request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// HTTP Basic with the configured `auth_user`/`auth_pass`.
    Basic,
    /// HMAC signature with the configured `hmac_id`.
    Hmac,
    /// No credentials configured.
    Unsigned,
}

/// A request ready to send, with the decisions made while building it.
#[derive(Debug)]
pub struct BuiltRequest {
    /// The request as it will go on the wire.
    pub request: reqwest::Request,
    /// How the request authenticates.
    pub auth: AuthMode,
    /// The HMAC secret used, if the request was signed.
    pub signing_key: Option<String>,
    /// Whether `tid` was injected from the configured tenant.
    pub tenant_from_config: bool,
}

/// A client for the document repository REST API.
///
/// Every request carries the configured user identity as `user[root]` and
/// `user[extension]` query parameters, plus `tid` when a tenant is
/// configured. Requests are signed with HMAC when credentials are present.
/// Each call is exactly one round trip; nothing is retried.
///
/// The configuration is read-only once the client is built. Hosts configure
/// a client at startup and share clones of it.
///
/// # Examples
///
/// ```no_run
/// use cdr_gateway::{Client, Config, ErrorKind, RequestMetadata, Resource};
///
/// # async fn example() -> Result<(), cdr_gateway::Error> {
/// let client = Client::new(Config::from_pairs([
///     ("protocol", "http"),
///     ("host", "testhost"),
///     ("port", "4242"),
///     ("user_root", "foobar"),
///     ("user_extension", "spameggs"),
///     ("hmac_id", "1234"),
///     ("hmac_key", "4321"),
/// ]))?;
///
/// let path = client.api_path("/patient/srcsys/1234/demographics");
/// let demographics = client
///     .perform_request(&path, &RequestMetadata::default())
///     .await?
///     .handler()
///     .on_status(404, ErrorKind::NotFound(Resource::Patient))?
///     .to_json()?;
/// println!("{}", demographics);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Clone)]
struct ClientInner {
    http_client: reqwest::Client,
    config: Config,
    timeout: Duration,
    digest: DigestAlgorithm,
    headers_to_sign: Vec<HeaderName>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client with default settings for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    /// The configuration itself is not validated.
    pub fn new(config: Config) -> Result<Self> {
        ClientBuilder::new().config(config).build()
    }

    /// The configuration requests are built from.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Replaces the configuration wholesale.
    ///
    /// Clones of this client made earlier keep the old configuration.
    pub fn set_config(&mut self, config: Config) {
        let mut inner = (*self.inner).clone();
        inner.config = config;
        self.inner = Arc::new(inner);
    }

    /// Prefixes `suffix` with the versioned API root, e.g. `/api/v1`.
    pub fn api_path(&self, suffix: &str) -> String {
        format!("/api/v{}{}", self.inner.config.api_version(), suffix)
    }

    /// Builds the request for `path` without sending it.
    ///
    /// The verb comes from `metadata.method`, or from a `method` entry in
    /// `metadata.params`, which is removed before the parameters are encoded.
    /// Headers from `metadata.headers` are set before signing, so any the
    /// client declared with [`ClientBuilder::header_to_sign`] are covered.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or port is missing or invalid, the
    /// `method` parameter is not a known verb, the body does not fit the
    /// verb, or the request cannot be signed.
    pub fn build_request(&self, path: &str, metadata: &RequestMetadata) -> Result<BuiltRequest> {
        let config = &self.inner.config;

        let mut params = metadata.params.clone();
        let method =
            RequestMethod::from_option(params.remove("method"))?.unwrap_or(metadata.method);

        let tenant_from_config = match config.tenant() {
            Some((tenant_id, _)) if !params.contains_key("tid") => {
                params.insert("tid".to_string(), Value::from(tenant_id));
                true
            }
            _ => false,
        };

        params.insert(
            "user".to_string(),
            json!({
                "root": config.user_root(),
                "extension": config.user_extension(),
            }),
        );
        let query = encode_query(&Value::Object(params), None);

        let separator = if path.starts_with('/') { "" } else { "/" };
        let url = Url::parse(&format!(
            "{}{}{}?{}",
            config.base_url()?,
            separator,
            path,
            query
        ))?;

        let mut builder = self
            .inner
            .http_client
            .request(method.as_http(), url)
            .timeout(metadata.timeout.unwrap_or(self.inner.timeout))
            .headers(metadata.headers.clone());

        match (method, &metadata.body) {
            (RequestMethod::Post, Some(RequestBody::Json(body))) => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| Error::SerializationFailed(e.to_string()))?;
                builder = builder.header(CONTENT_TYPE, JSON_CONTENT_TYPE).body(bytes);
            }
            (RequestMethod::Post, None) => {
                builder = builder.header(CONTENT_TYPE, JSON_CONTENT_TYPE);
            }
            (RequestMethod::PostMultipart, Some(RequestBody::Multipart(form))) => {
                builder = builder
                    .header(CONTENT_TYPE, form.content_type())
                    .body(form.to_bytes());
            }
            (RequestMethod::Post, Some(RequestBody::Multipart(_)))
            | (RequestMethod::PostMultipart, _) => {
                return Err(Error::Configuration(format!(
                    "{:?} request needs a matching body",
                    method
                )));
            }
            // GET and DELETE carry no body.
            (RequestMethod::Get | RequestMethod::Delete, _) => {}
        }

        if metadata.basic_auth {
            let (user, pass) = config.basic_auth();
            builder = builder.basic_auth(user, pass);
        }

        let mut request = builder.build()?;

        if metadata.basic_auth {
            return Ok(BuiltRequest {
                request,
                auth: AuthMode::Basic,
                signing_key: None,
                tenant_from_config,
            });
        }

        let Some((hmac_id, hmac_key)) = config.hmac_credentials() else {
            return Ok(BuiltRequest {
                request,
                auth: AuthMode::Unsigned,
                signing_key: None,
                tenant_from_config,
            });
        };

        let tenant_key = config.tenant().map(|(_, key)| key);
        let signing_key = derive_signing_key(hmac_key, tenant_key, tenant_from_config);
        Signer::new(hmac_id, signing_key.clone())
            .with_digest(self.inner.digest)
            .with_headers_to_sign(self.inner.headers_to_sign.clone())
            .sign(&mut request)?;

        Ok(BuiltRequest {
            request,
            auth: AuthMode::Hmac,
            signing_key: Some(signing_key),
            tenant_from_config,
        })
    }

    /// Builds, signs and sends a request, returning the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] if the service cannot be reached
    /// or the TLS handshake fails, [`Error::Timeout`] if the read timeout
    /// elapses, and any error from [`build_request`](Self::build_request).
    pub async fn perform_request(&self, path: &str, metadata: &RequestMetadata) -> Result<Response> {
        let built = self.build_request(path, metadata)?;

        tracing::debug!(
            method = %built.request.method(),
            url = %built.request.url(),
            auth = ?built.auth,
            tenant_from_config = built.tenant_from_config,
            "Executing gateway request"
        );

        let start_time = Instant::now();
        let response = self
            .inner
            .http_client
            .execute(built.request)
            .await
            .map_err(Error::from_transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(Error::from_transport)?;
        let latency = start_time.elapsed();

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            "Received gateway response"
        );

        Ok(Response::new(status, headers, body, latency))
    }

    /// Makes a GET request to the specified path.
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.perform_request(path, &RequestMetadata::new(RequestMethod::Get))
            .await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.perform_request(path, &RequestMetadata::new(RequestMethod::Delete))
            .await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let metadata = RequestMetadata::default().with_json(body)?;
        self.perform_request(path, &metadata).await
    }

    /// Uploads a multipart form.
    pub async fn post_multipart(&self, path: &str, form: Multipart) -> Result<Response> {
        let metadata = RequestMetadata::default().with_multipart(form);
        self.perform_request(path, &metadata).await
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```
/// use cdr_gateway::{signer::DigestAlgorithm, ClientBuilder, Config};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), cdr_gateway::Error> {
/// let client = ClientBuilder::new()
///     .config(Config::from_pairs([("host", "cdr.local"), ("port", "3000")]))
///     .timeout(Duration::from_secs(30))
///     .digest(DigestAlgorithm::Sha1)
///     .header_to_sign("x-request-id")?
///     .build()?;
/// assert_eq!(client.api_path("/info"), "/api/v1/info");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct ClientBuilder {
    config: Config,
    timeout: Duration,
    digest: DigestAlgorithm,
    headers_to_sign: Vec<HeaderName>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with an empty configuration and a
    /// 60 second timeout.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            timeout: DEFAULT_TIMEOUT,
            digest: DigestAlgorithm::default(),
            headers_to_sign: Vec::new(),
        }
    }

    /// Sets the configuration the client starts with.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the default per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Selects the HMAC digest. Defaults to SHA-1.
    pub fn digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Appends a header whose value is included in HMAC signatures.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name is invalid.
    pub fn header_to_sign(mut self, name: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        self.headers_to_sign.push(name);
        Ok(self)
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn build(self) -> Result<Client> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                config: self.config,
                timeout: self.timeout,
                digest: self.digest,
                headers_to_sign: self.headers_to_sign,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
