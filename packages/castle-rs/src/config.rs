//! Client configuration.

use std::env;
use std::fmt;

use secrecy::{ExposeSecret, SecretBox};

use crate::error::{CastleError, Result};

pub const DEFAULT_FILTER_ENDPOINT: &str = "https://api.castle.io/v1/filter";
pub const DEFAULT_RISK_ENDPOINT: &str = "https://api.castle.io/v1/risk";

/// Castle API secret. Redacted from debug and display output.
pub struct ApiSecret(SecretBox<str>);

impl ApiSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call this when building the request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for ApiSecret {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Settings for a [`CastleClient`](crate::CastleClient).
#[derive(Debug, Clone)]
pub struct CastleConfig {
    pub api_secret: ApiSecret,
    pub filter_endpoint: String,
    pub risk_endpoint: String,
    /// Record `castle_requests_total` per call
    pub metrics_enabled: bool,
}

impl CastleConfig {
    /// Production endpoints, metrics on.
    pub fn new(api_secret: impl Into<String>) -> Self {
        Self {
            api_secret: ApiSecret::new(api_secret),
            filter_endpoint: DEFAULT_FILTER_ENDPOINT.to_string(),
            risk_endpoint: DEFAULT_RISK_ENDPOINT.to_string(),
            metrics_enabled: true,
        }
    }

    /// Load from environment variables.
    ///
    /// - `CASTLE_API_SECRET` (required)
    /// - `CASTLE_FILTER_ENDPOINT`, `CASTLE_RISK_ENDPOINT` (optional overrides)
    /// - `CASTLE_METRICS_ENABLED` (`true`/`false`, default `true`)
    pub fn from_env() -> Result<Self> {
        let api_secret = env::var("CASTLE_API_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CastleError::Config("CASTLE_API_SECRET not set".into()))?;

        let mut config = Self::new(api_secret);
        if let Ok(url) = env::var("CASTLE_FILTER_ENDPOINT") {
            config.filter_endpoint = url;
        }
        if let Ok(url) = env::var("CASTLE_RISK_ENDPOINT") {
            config.risk_endpoint = url;
        }
        if let Ok(flag) = env::var("CASTLE_METRICS_ENABLED") {
            config.metrics_enabled = parse_flag(&flag).ok_or_else(|| {
                CastleError::Config(format!(
                    "CASTLE_METRICS_ENABLED must be true or false, got {flag:?}"
                ))
            })?;
        }
        Ok(config)
    }

    /// Point both endpoints at `base_url` (`{base_url}/v1/filter`, `{base_url}/v1/risk`).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.filter_endpoint = format!("{base}/v1/filter");
        self.risk_endpoint = format!("{base}/v1/risk");
        self
    }

    pub fn with_filter_endpoint(mut self, url: impl Into<String>) -> Self {
        self.filter_endpoint = url.into();
        self
    }

    pub fn with_risk_endpoint(mut self, url: impl Into<String>) -> Self {
        self.risk_endpoint = url.into();
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
