//! API credentials and HMAC-SHA256 request signing.
//!
//! Canonical string: `timestamp + api_key + recv_window + payload`, where
//! payload is the raw query string for GET and the JSON body for POST.
//! The signature is the lowercase hex HMAC-SHA256 of that string keyed by
//! the API secret.

use std::path::PathBuf;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "X-BAPI-API-KEY";
pub const HEADER_TIMESTAMP: &str = "X-BAPI-TIMESTAMP";
pub const HEADER_SIGN: &str = "X-BAPI-SIGN";
pub const HEADER_RECV_WINDOW: &str = "X-BAPI-RECV-WINDOW";

/// Where the API key pair comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySource {
    /// Key and secret in two environment variables.
    EnvVar { key_var: String, secret_var: String },
    /// File with the key on the first line and the secret on the second
    /// (recommend 0600 permissions).
    File { path: PathBuf },
}

impl Default for KeySource {
    fn default() -> Self {
        Self::EnvVar {
            key_var: "BYBIT_API_KEY".to_string(),
            secret_var: "BYBIT_API_SECRET".to_string(),
        }
    }
}

/// API key pair. The secret is wiped from memory on drop.
pub struct ApiCredentials {
    api_key: String,
    api_secret: Zeroizing<String>,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    /// Load credentials from the given source.
    ///
    /// # Errors
    /// `Credentials` if a variable is unset, the file is unreadable or
    /// either value is empty.
    pub fn load(source: &KeySource) -> ExchangeResult<Self> {
        let (key, secret) = match source {
            KeySource::EnvVar {
                key_var,
                secret_var,
            } => {
                let key = std::env::var(key_var)
                    .map_err(|_| ExchangeError::Credentials(format!("{key_var} not set")))?;
                let secret = Zeroizing::new(
                    std::env::var(secret_var)
                        .map_err(|_| ExchangeError::Credentials(format!("{secret_var} not set")))?,
                );
                (key, secret)
            }
            KeySource::File { path } => {
                let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
                    ExchangeError::Credentials(format!("{}: {e}", path.display()))
                })?);
                let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
                let key = lines.next().unwrap_or_default().to_string();
                let secret = Zeroizing::new(lines.next().unwrap_or_default().to_string());
                (key, secret)
            }
        };

        let key = key.trim().to_string();
        if key.is_empty() || secret.trim().is_empty() {
            return Err(ExchangeError::Credentials("empty API key or secret".into()));
        }
        Ok(Self {
            api_key: key,
            api_secret: Zeroizing::new(secret.trim().to_string()),
        })
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Signs requests with a credential pair.
#[derive(Debug)]
pub struct RequestSigner {
    credentials: ApiCredentials,
    recv_window_ms: u64,
}

impl RequestSigner {
    pub fn new(credentials: ApiCredentials, recv_window_ms: u64) -> Self {
        Self {
            credentials,
            recv_window_ms,
        }
    }

    /// Hex HMAC-SHA256 of the canonical string.
    pub fn sign(&self, timestamp_ms: u64, payload: &str) -> String {
        let canonical = format!(
            "{}{}{}{}",
            timestamp_ms,
            self.credentials.api_key(),
            self.recv_window_ms,
            payload
        );
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Authentication headers for a request.
    pub fn headers(&self, timestamp_ms: u64, payload: &str) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_API_KEY, self.credentials.api_key().to_string()),
            (HEADER_TIMESTAMP, timestamp_ms.to_string()),
            (HEADER_SIGN, self.sign(timestamp_ms, payload)),
            (HEADER_RECV_WINDOW, self.recv_window_ms.to_string()),
        ]
    }
}
