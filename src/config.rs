//! Connection and credential configuration.
//!
//! A [`Config`] is assembled once by the host application and handed to a
//! [`Client`](crate::Client). Nothing is validated when it is built: a missing
//! host or a malformed port only surfaces when a request is attempted.

use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_API_VERSION: &str = "1";
const DEFAULT_PROTOCOL: &str = "http";

/// Everything the client needs to reach and authenticate against the service.
///
/// # Examples
///
/// ```
/// use cdr_gateway::Config;
///
/// let config = Config::from_pairs([
///     ("Protocol", "https"),
///     ("HOST", "cdr.example.org"),
///     ("port", "443"),
///     ("hmac-id", "1234"),
///     ("hmac_key", "4321"),
/// ]);
///
/// assert_eq!(config.base_url().unwrap(), "https://cdr.example.org:443");
/// assert_eq!(config.hmac_credentials(), Some(("1234", "4321")));
/// assert_eq!(config.api_version(), "1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub user_root: Option<String>,
    pub user_extension: Option<String>,
    pub api_version: Option<String>,
    pub auth_user: Option<String>,
    pub auth_pass: Option<String>,
    pub hmac_id: Option<String>,
    pub hmac_key: Option<String>,
    pub tenant_id: Option<String>,
    pub tenant_key: Option<String>,
}

impl Config {
    /// Builds a configuration from loosely-keyed pairs.
    ///
    /// Keys are matched case-insensitively, with `-` and spaces treated as
    /// `_`. Unknown keys are ignored.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Config::default();
        for (key, value) in pairs {
            config.set(key.as_ref(), value.into());
        }
        config
    }

    /// Builds a configuration from a JSON object, e.g. one loaded from a
    /// host application's settings file.
    ///
    /// Scalar values are stringified (`"port": 4242` becomes `"4242"`); nulls,
    /// arrays and nested objects are skipped. Anything but an object yields an
    /// empty configuration.
    pub fn from_value(value: &Value) -> Self {
        let mut config = Config::default();
        let Some(map) = value.as_object() else {
            return config;
        };
        for (key, value) in map {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            config.set(key, value);
        }
        config
    }

    fn set(&mut self, key: &str, value: String) {
        let slot = match normalize_key(key).as_str() {
            "protocol" => &mut self.protocol,
            "host" => &mut self.host,
            "port" => &mut self.port,
            "user_root" => &mut self.user_root,
            "user_extension" => &mut self.user_extension,
            "api_version" => &mut self.api_version,
            "auth_user" => &mut self.auth_user,
            "auth_pass" => &mut self.auth_pass,
            "hmac_id" => &mut self.hmac_id,
            "hmac_key" => &mut self.hmac_key,
            "tenant_id" => &mut self.tenant_id,
            "tenant_key" => &mut self.tenant_key,
            other => {
                tracing::trace!(key = other, "Ignoring unknown configuration key");
                return;
            }
        };
        *slot = Some(value);
    }

    /// The URL scheme, `http` unless configured.
    pub fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL)
    }

    /// The service API version, `"1"` unless configured.
    pub fn api_version(&self) -> &str {
        self.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION)
    }

    pub fn user_root(&self) -> &str {
        self.user_root.as_deref().unwrap_or_default()
    }

    pub fn user_extension(&self) -> &str {
        self.user_extension.as_deref().unwrap_or_default()
    }

    /// Basic-auth credentials; a missing half is sent as empty.
    pub fn basic_auth(&self) -> (&str, Option<&str>) {
        (
            self.auth_user.as_deref().unwrap_or_default(),
            self.auth_pass.as_deref(),
        )
    }

    /// The HMAC access id and secret, if both are configured.
    pub fn hmac_credentials(&self) -> Option<(&str, &str)> {
        Some((self.hmac_id.as_deref()?, self.hmac_key.as_deref()?))
    }

    /// The tenant id and key, if both are configured.
    pub fn tenant(&self) -> Option<(&str, &str)> {
        Some((self.tenant_id.as_deref()?, self.tenant_key.as_deref()?))
    }

    /// `protocol://host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the host is missing or the port is
    /// not a number.
    pub fn base_url(&self) -> Result<String> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Configuration("host is not configured".to_string()))?;
        let port = match self.port.as_deref() {
            Some(port) => port
                .parse::<u16>()
                .map_err(|e| Error::Configuration(format!("Invalid port {:?}: {}", port, e)))?,
            None => return Ok(format!("{}://{}", self.protocol(), host)),
        };
        Ok(format!("{}://{}:{}", self.protocol(), host, port))
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
