//! HMAC request signing.
//!
//! A request is signed over a canonical string built from its content type,
//! the base64 MD5 of its body, its URI without scheme or host, and its `Date`
//! header, optionally followed by further declared header values:
//!
//! ```text
//! content-type,content-md5,/path?query,timestamp[,extra...]
//! ```
//!
//! The signature travels in `Authorization: APIAuth <access id>:<signature>`.
//! Stripping the host makes signatures survive proxies that rewrite it.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use http::header::{AUTHORIZATION, CONTENT_TYPE, DATE};
use http::{HeaderName, HeaderValue};
use md5::Md5;
use regex::Regex;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::sync::OnceLock;
use std::time::SystemTime;

/// Header carrying the base64 MD5 of the request body.
pub const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

const AUTH_SCHEME: &str = "APIAuth";

/// The hash function behind the HMAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// HMAC-SHA1, the scheme the service expects by default.
    #[default]
    Sha1,
    /// HMAC-SHA256, announced as `APIAuth-HMAC-SHA256`.
    Sha256,
}

impl DigestAlgorithm {
    fn scheme(&self) -> String {
        match self {
            DigestAlgorithm::Sha1 => AUTH_SCHEME.to_string(),
            DigestAlgorithm::Sha256 => format!("{}-HMAC-SHA256", AUTH_SCHEME),
        }
    }
}

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://[^:,?/]*").expect("host pattern is valid"))
}

/// Removes a leading `http(s)://host` from a request URI.
pub fn strip_scheme_and_host(uri: &str) -> &str {
    match host_pattern().find(uri) {
        Some(m) => &uri[m.end()..],
        None => uri,
    }
}

/// Joins the signed fields into the canonical string.
///
/// Blank extra header values are omitted.
///
/// # Examples
///
/// ```
/// use cdr_gateway::signer::canonical_string;
///
/// let canonical = canonical_string(
///     "application/json",
///     "1B2M2Y8AsgTpgAmY7PhCfg==",
///     "http://testhost/api/v1/patient?tid=1",
///     "Thu, 01 Jan 2026 00:00:00 GMT",
///     &["", "abc"],
/// );
/// assert_eq!(
///     canonical,
///     "application/json,1B2M2Y8AsgTpgAmY7PhCfg==,/api/v1/patient?tid=1,Thu, 01 Jan 2026 00:00:00 GMT,abc"
/// );
/// ```
pub fn canonical_string(
    content_type: &str,
    content_md5: &str,
    request_uri: &str,
    timestamp: &str,
    extra_header_values: &[&str],
) -> String {
    let mut fields = vec![
        content_type,
        content_md5,
        strip_scheme_and_host(request_uri),
        timestamp,
    ];
    fields.extend(extra_header_values.iter().copied().filter(|v| !v.trim().is_empty()));
    fields.join(",")
}

/// Chooses the HMAC secret for a request.
///
/// When the tenant id sent with the request came from configuration, the
/// secret is the hex SHA-512 of `hmac_key` followed by `tenant_key`. A caller
/// that supplies its own `tid` signs with the application key unchanged.
///
/// ```
/// use cdr_gateway::signer::derive_signing_key;
///
/// assert_eq!(derive_signing_key("4321", Some("tk"), false), "4321");
/// assert_eq!(derive_signing_key("4321", None, true), "4321");
/// assert_eq!(derive_signing_key("4321", Some("tk"), true).len(), 128);
/// ```
pub fn derive_signing_key(hmac_key: &str, tenant_key: Option<&str>, tenant_from_config: bool) -> String {
    match tenant_key {
        Some(tenant_key) if tenant_from_config => {
            let mut hasher = Sha512::new();
            hasher.update(hmac_key.as_bytes());
            hasher.update(tenant_key.as_bytes());
            hex::encode(hasher.finalize())
        }
        _ => hmac_key.to_string(),
    }
}

/// Base64 MD5 of a body, as carried in `Content-MD5`.
pub fn content_md5(body: &[u8]) -> String {
    STANDARD.encode(Md5::digest(body))
}

/// Signs requests with an access id and secret.
///
/// # Examples
///
/// ```
/// use cdr_gateway::Signer;
///
/// let signer = Signer::new("1234", "4321");
/// let mut request = reqwest::Request::new(
///     reqwest::Method::GET,
///     "http://testhost:4242/api/v1/patient".parse().unwrap(),
/// );
/// signer.sign(&mut request).unwrap();
///
/// let auth = request.headers()["authorization"].to_str().unwrap();
/// assert!(auth.starts_with("APIAuth 1234:"));
/// assert!(signer.authentic(&request));
/// ```
#[derive(Debug, Clone)]
pub struct Signer {
    access_id: String,
    secret: String,
    digest: DigestAlgorithm,
    headers_to_sign: Vec<HeaderName>,
}

impl Signer {
    /// Creates a SHA-1 signer that covers no extra headers.
    pub fn new(access_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            secret: secret.into(),
            digest: DigestAlgorithm::default(),
            headers_to_sign: Vec::new(),
        }
    }

    /// Selects the HMAC digest.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Appends the values of these headers, in order, to the canonical string.
    pub fn with_headers_to_sign(mut self, headers: Vec<HeaderName>) -> Self {
        self.headers_to_sign = headers;
        self
    }

    /// The id placed before the signature in `Authorization`.
    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    /// Signs `request` in place.
    ///
    /// Adds a `Date` header if missing and a `Content-MD5` header for buffered
    /// bodies, then sets `Authorization`. Streaming bodies cannot be hashed and
    /// are signed with an empty MD5.
    ///
    /// # Errors
    ///
    /// Returns an error if the access id cannot be carried in a header.
    pub fn sign(&self, request: &mut reqwest::Request) -> Result<()> {
        if !request.headers().contains_key(DATE) {
            let now = httpdate::fmt_http_date(SystemTime::now());
            request.headers_mut().insert(DATE, header_value(&now)?);
        }

        let body_md5 = request
            .body()
            .and_then(|body| body.as_bytes())
            .map(content_md5);
        if let Some(md5) = body_md5 {
            if !request.headers().contains_key(CONTENT_MD5) {
                request.headers_mut().insert(CONTENT_MD5, header_value(&md5)?);
            }
        }

        let canonical = self.canonical_for(request);
        let signature = STANDARD.encode(self.mac(&canonical)?);
        let authorization = format!("{} {}:{}", self.digest.scheme(), self.access_id, signature);
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(())
    }

    /// Returns `true` if `request` carries a valid signature from this signer.
    ///
    /// The access id must match, any `Content-MD5` must match the buffered
    /// body, and the signature is compared in constant time.
    pub fn authentic(&self, request: &reqwest::Request) -> bool {
        let Some(authorization) = header_str(request, &AUTHORIZATION) else {
            return false;
        };
        let Some(credentials) = authorization
            .strip_prefix(&self.digest.scheme())
            .and_then(|rest| rest.strip_prefix(' '))
        else {
            return false;
        };
        let Some((access_id, signature)) = credentials.rsplit_once(':') else {
            return false;
        };
        if access_id != self.access_id {
            return false;
        }

        if let Some(bytes) = request.body().and_then(|body| body.as_bytes()) {
            if header_str(request, &CONTENT_MD5) != Some(content_md5(bytes).as_str()) {
                return false;
            }
        }

        let Ok(tag) = STANDARD.decode(signature) else {
            return false;
        };
        self.verify(&self.canonical_for(request), &tag)
    }

    fn canonical_for(&self, request: &reqwest::Request) -> String {
        let url = request.url();
        let request_uri = &url[url::Position::BeforePath..url::Position::AfterQuery];
        let extra: Vec<&str> = self
            .headers_to_sign
            .iter()
            .map(|name| header_str(request, name).unwrap_or_default())
            .collect();
        canonical_string(
            header_str(request, &CONTENT_TYPE).unwrap_or_default(),
            header_str(request, &CONTENT_MD5).unwrap_or_default(),
            request_uri,
            header_str(request, &DATE).unwrap_or_default(),
            &extra,
        )
    }

    fn mac(&self, canonical: &str) -> Result<Vec<u8>> {
        let key = self.secret.as_bytes();
        let invalid = |e: hmac::digest::InvalidLength| {
            Error::Configuration(format!("Invalid HMAC key: {}", e))
        };
        let tag = match self.digest {
            DigestAlgorithm::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(invalid)?;
                mac.update(canonical.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            DigestAlgorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?;
                mac.update(canonical.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(tag)
    }

    fn verify(&self, canonical: &str, tag: &[u8]) -> bool {
        let key = self.secret.as_bytes();
        match self.digest {
            DigestAlgorithm::Sha1 => Hmac::<Sha1>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(canonical.as_bytes());
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
            DigestAlgorithm::Sha256 => Hmac::<Sha256>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(canonical.as_bytes());
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

fn header_str<'a>(request: &'a reqwest::Request, name: &HeaderName) -> Option<&'a str> {
    request.headers().get(name)?.to_str().ok()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::try_from(value)
        .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: reqwest::Method, url: &str) -> reqwest::Request {
        reqwest::Request::new(method, url.parse().unwrap())
    }

    fn sha1_base64(key: &str, data: &str) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(data.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_strip_scheme_and_host() {
        assert_eq!(strip_scheme_and_host("https://cdr.example.org/api?x=1"), "/api?x=1");
        assert_eq!(strip_scheme_and_host("http://testhost,/a"), ",/a");
        assert_eq!(strip_scheme_and_host("/api/v1"), "/api/v1");
        assert_eq!(strip_scheme_and_host("ftp://host/a"), "ftp://host/a");
    }

    #[test]
    fn test_tenant_key_derivation() {
        let derived = derive_signing_key("4321", Some("tenantkey"), true);
        let expected = hex::encode(Sha512::digest(b"4321tenantkey"));
        assert_eq!(derived, expected);

        assert_eq!(derive_signing_key("4321", Some("tenantkey"), false), "4321");
    }

    #[test]
    fn test_get_is_signed_over_canonical_string() {
        let mut req = request(
            reqwest::Method::GET,
            "http://testhost:4242/api/v1/patient?user%5Broot%5D=foobar",
        );
        req.headers_mut().insert(
            DATE,
            HeaderValue::from_static("Thu, 15 Oct 2026 12:00:00 GMT"),
        );

        Signer::new("1234", "4321").sign(&mut req).unwrap();

        let expected = sha1_base64(
            "4321",
            ",,/api/v1/patient?user%5Broot%5D=foobar,Thu, 15 Oct 2026 12:00:00 GMT",
        );
        assert_eq!(
            req.headers()[AUTHORIZATION].to_str().unwrap(),
            format!("APIAuth 1234:{}", expected)
        );
        assert!(!req.headers().contains_key(CONTENT_MD5));
    }

    #[test]
    fn test_body_gets_content_md5() {
        let mut req = request(reqwest::Method::POST, "http://testhost/api/v1/doc");
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(reqwest::Body::from("{\"a\":1}"));

        let signer = Signer::new("1234", "4321");
        signer.sign(&mut req).unwrap();

        assert_eq!(
            req.headers()[CONTENT_MD5].to_str().unwrap(),
            content_md5(b"{\"a\":1}")
        );
        assert!(req.headers().contains_key(DATE));
        assert!(signer.authentic(&req));

        // Tampering with the body breaks authenticity.
        *req.body_mut() = Some(reqwest::Body::from("{\"a\":2}"));
        assert!(!signer.authentic(&req));
    }

    #[test]
    fn test_extra_headers_are_signed_in_order() {
        let mut req = request(reqwest::Method::GET, "http://testhost/api");
        req.headers_mut()
            .insert(DATE, HeaderValue::from_static("Thu, 15 Oct 2026 12:00:00 GMT"));
        req.headers_mut()
            .insert("x-b", HeaderValue::from_static("bee"));
        req.headers_mut()
            .insert("x-a", HeaderValue::from_static("ay"));

        let signer = Signer::new("id", "secret").with_headers_to_sign(vec![
            HeaderName::from_static("x-b"),
            HeaderName::from_static("x-missing"),
            HeaderName::from_static("x-a"),
        ]);
        signer.sign(&mut req).unwrap();

        let expected = sha1_base64("secret", ",,/api,Thu, 15 Oct 2026 12:00:00 GMT,bee,ay");
        assert_eq!(
            req.headers()[AUTHORIZATION].to_str().unwrap(),
            format!("APIAuth id:{}", expected)
        );
    }

    #[test]
    fn test_sha256_scheme() {
        let mut req = request(reqwest::Method::DELETE, "http://testhost/api/v1/x");
        let signer = Signer::new("id", "secret").with_digest(DigestAlgorithm::Sha256);
        signer.sign(&mut req).unwrap();

        let auth = req.headers()[AUTHORIZATION].to_str().unwrap();
        assert!(auth.starts_with("APIAuth-HMAC-SHA256 id:"));
        assert!(signer.authentic(&req));
        assert!(!Signer::new("id", "secret").authentic(&req));
    }

    #[test]
    fn test_wrong_secret_or_id_is_not_authentic() {
        let mut req = request(reqwest::Method::GET, "http://testhost/api");
        Signer::new("id", "secret").sign(&mut req).unwrap();

        assert!(!Signer::new("id", "other").authentic(&req));
        assert!(!Signer::new("other", "secret").authentic(&req));
        assert!(!Signer::new("id", "secret").authentic(&request(reqwest::Method::GET, "http://testhost/api")));
    }
}
