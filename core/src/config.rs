//! Facade configuration.
//!
//! # Design
//! `RestConfig` is the declarative surface (serde, loadable from TOML).
//! `Settings` is the live subset the facade and its engine share at runtime:
//! base URI, proxy and timeout may change after construction, and engines
//! read them each time they build or send a request.
//!
//! ```toml
//! base_uri = "https://api.example.com/v1"
//! engine = "client"
//! timeout_secs = 30
//!
//! [proxy]
//! host = "proxy.internal"
//! port = 3128
//!
//! [auth]
//! scheme = "digest"
//! username = "svc"
//! password = "secret"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::EngineKind;
use crate::error::Result;

/// HTTP proxy to route requests through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    Basic,
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub scheme: AuthScheme,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub base_uri: Option<String>,
    pub proxy: Option<ProxyConfig>,
    /// Overrides the process-wide default engine for this facade.
    pub engine: Option<EngineKind>,
    pub auth: Option<AuthConfig>,
    /// Passed through to the HTTP library as its overall request timeout.
    pub timeout_secs: Option<u64>,
}

impl RestConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            base_uri: self.base_uri.clone(),
            proxy: self.proxy.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Runtime settings shared between a facade and its engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub base_uri: Option<String>,
    pub proxy: Option<ProxyConfig>,
    pub timeout: Option<Duration>,
}

pub type SharedSettings = Arc<RwLock<Settings>>;
