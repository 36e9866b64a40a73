//! External collaborators consumed by the connection manager.
//!
//! [`Discovery`] resolves the base HTTP(S) URL of a named service and
//! [`Identity`] supplies the bearer credential sent in the `authenticate`
//! frame. Both are traits so the surrounding application can plug in its
//! own service registry and session store.

use crate::error::ConnectError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Resolves service names to base URLs (`http://` or `https://`)
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    async fn base_url(&self, service_name: &str) -> Result<String>;
}

/// Bearer credential for the current user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    /// The token, if present and non-empty
    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Supplies credentials; an absent token skips authentication
#[async_trait]
pub trait Identity: Send + Sync + 'static {
    async fn credentials(&self) -> Result<Credentials>;
}

/// Discovery that always answers with one fixed URL
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    base_url: String,
}

impl StaticDiscovery {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn base_url(&self, _service_name: &str) -> Result<String> {
        Ok(self.base_url.clone())
    }
}

/// Identity with a fixed token (or none)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    credentials: Credentials,
}

impl StaticIdentity {
    pub fn new(token: Option<String>) -> Self {
        Self {
            credentials: Credentials { token },
        }
    }

    /// Identity that never authenticates
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Identity reading the token from an environment variable on every lookup,
/// so a rotated token is picked up by the next reconnect.
#[derive(Debug, Clone)]
pub struct EnvIdentity {
    var: String,
}

impl EnvIdentity {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl Identity for EnvIdentity {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            token: std::env::var(&self.var).ok(),
        })
    }
}

/// Rewrite an HTTP(S) base URL to its streaming equivalent.
///
/// `http` → `ws`, `https` → `wss`; `ws`/`wss` pass through unchanged.
pub fn stream_url(base_url: &str) -> Result<String, ConnectError> {
    let (scheme, rest) = base_url
        .split_once("://")
        .ok_or_else(|| ConnectError::UnsupportedScheme(base_url.to_string()))?;

    let streaming = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(ConnectError::UnsupportedScheme(base_url.to_string())),
    };

    Ok(format!("{}://{}", streaming, rest))
}
