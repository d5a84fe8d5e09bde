//! Castle Filter and Risk API client.
//!
//! Reports user events (logins, registrations, password resets, ...) to
//! Castle and maps the matched policy to a [`RecommendedAction`].
//!
//! # Example
//!
//! ```rust,ignore
//! use castle::{CastleClient, Event, EventStatus, EventType, Request, User};
//!
//! let client = CastleClient::from_env()?;
//!
//! let request = Request::new(
//!     Event::new(EventType::Login, EventStatus::Succeeded),
//!     User::new("user-id").email("user@example.com"),
//! )
//! .context(castle::context::from_request(&http_request));
//!
//! match client.risk(&request).await {
//!     Ok(RecommendedAction::Deny) => { /* block */ }
//!     Ok(RecommendedAction::Challenge) => { /* step up */ }
//!     Ok(_) => { /* continue */ }
//!     Err(e) => tracing::warn!(error = %e, "no recommendation"),
//! }
//! ```
//!
//! # Middleware
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{middleware, Router};
//! use castle::middleware::{castle_middleware, CastleMiddleware};
//!
//! let config = Arc::new(CastleMiddleware::new());
//! let app = Router::new()
//!     .route("/login", post(login))
//!     .layer(middleware::from_fn(move |req, next| {
//!         castle_middleware(config.clone(), req, next)
//!     }));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod ip;
pub mod metrics;
pub mod middleware;
pub mod types;

pub use config::{ApiSecret, CastleConfig};
pub use error::{CastleError, Result};
pub use middleware::{CastleContext, CastleMiddleware};
pub use types::*;

use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use crate::metrics::Endpoint;
use crate::types::EventPayload;

/// Castle API client.
///
/// Holds no per-call state; share one instance (or clones) across tasks.
#[derive(Debug, Clone)]
pub struct CastleClient {
    http_client: Client,
    config: CastleConfig,
}

impl CastleClient {
    /// Create a client for the production endpoints.
    pub fn new(api_secret: impl Into<String>) -> Self {
        Self::from_config(CastleConfig::new(api_secret))
    }

    pub fn from_config(config: CastleConfig) -> Self {
        Self {
            http_client: Client::new(),
            config,
        }
    }

    /// Create from environment variables; see [`CastleConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_config(CastleConfig::from_env()?))
    }

    /// Use a caller-configured HTTP client (timeouts, proxies, pooling).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Point both endpoints at a different host (proxies, tests).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.config = self.config.with_base_url(url);
        self
    }

    pub fn with_filter_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.with_filter_endpoint(url);
        self
    }

    pub fn with_risk_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.with_risk_endpoint(url);
        self
    }

    /// Enable or disable the `castle_requests_total` counter.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.config = self.config.with_metrics(enabled);
        self
    }

    pub fn config(&self) -> &CastleConfig {
        &self.config
    }

    /// Filter an event before the user is authenticated.
    ///
    /// Sends `params` (email, username) instead of the full user.
    /// See <https://reference.castle.io/#operation/filter>.
    pub async fn filter(&self, request: &Request) -> Result<RecommendedAction> {
        self.filter_response(request).await.map(|r| r.action())
    }

    /// Like [`filter`](Self::filter), returning the whole decoded response.
    pub async fn filter_response(&self, request: &Request) -> Result<PolicyResponse> {
        let context = request.context.as_ref().ok_or(CastleError::MissingContext)?;
        let payload = EventPayload::filter(request, context, Utc::now());
        self.send(Endpoint::Filter, &payload).await
    }

    /// Score an event for a known user.
    ///
    /// See <https://reference.castle.io/#operation/risk>.
    pub async fn risk(&self, request: &Request) -> Result<RecommendedAction> {
        self.risk_response(request).await.map(|r| r.action())
    }

    /// Like [`risk`](Self::risk), returning the whole decoded response.
    pub async fn risk_response(&self, request: &Request) -> Result<PolicyResponse> {
        let context = request.context.as_ref().ok_or(CastleError::MissingContext)?;
        let payload = EventPayload::risk(request, context, Utc::now());
        self.send(Endpoint::Risk, &payload).await
    }

    async fn send(&self, endpoint: Endpoint, payload: &EventPayload<'_>) -> Result<PolicyResponse> {
        let result = self.post(endpoint, payload).await;
        if self.config.metrics_enabled {
            crate::metrics::record_request(endpoint, result.is_ok());
        }
        result
    }

    async fn post(&self, endpoint: Endpoint, payload: &EventPayload<'_>) -> Result<PolicyResponse> {
        let start = std::time::Instant::now();
        let url = match endpoint {
            Endpoint::Filter => &self.config.filter_endpoint,
            Endpoint::Risk => &self.config.risk_endpoint,
        };

        let response = self
            .http_client
            .post(url)
            .basic_auth("", Some(self.config.api_secret.expose()))
            .header(header::CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                warn!(endpoint = endpoint.as_str(), error = %e, "Castle request failed");
                CastleError::Transport(e)
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let message = response.text().await.unwrap_or_default();
            warn!(
                endpoint = endpoint.as_str(),
                status = %status,
                error = %message,
                "Castle API error"
            );
            return Err(CastleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let decoded: PolicyResponse = serde_json::from_slice(&body).map_err(|e| {
            warn!(endpoint = endpoint.as_str(), error = %e, "Failed to decode Castle response");
            CastleError::Decode(e)
        })?;

        if let Some((kind, message)) = decoded.remote_error() {
            warn!(endpoint = endpoint.as_str(), kind = %kind, error = %message, "Castle rejected event");
            return Err(CastleError::Remote { kind, message });
        }

        debug!(
            endpoint = endpoint.as_str(),
            event_type = payload.event_type.as_str(),
            user_agent = payload.context.user_agent().unwrap_or_default(),
            action = %decoded.action(),
            duration_ms = start.elapsed().as_millis(),
            "Castle call"
        );

        Ok(decoded)
    }
}
