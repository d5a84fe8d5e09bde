//! Login endpoint protected by Castle.
//!
//! ```sh
//! CASTLE_API_SECRET=... cargo run -p castle --example login_server
//! curl -X POST localhost:3000/login \
//!     -H 'X-Castle-Request-Token: <token from castle.js>' \
//!     -d 'email=jane@example.com'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{extract::State, http::StatusCode, middleware, routing::post, Extension, Form, Router};
use castle::middleware::{castle_middleware, CastleContext, CastleMiddleware};
use castle::{CastleClient, Event, EventStatus, EventType, RecommendedAction, User};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Deserialize)]
struct LoginForm {
    email: String,
}

async fn login(
    State(client): State<Arc<CastleClient>>,
    ctx: Option<Extension<CastleContext>>,
    Form(form): Form<LoginForm>,
) -> (StatusCode, &'static str) {
    let Some(Extension(CastleContext(ctx))) = ctx else {
        return (StatusCode::BAD_REQUEST, "missing castle request token");
    };

    let request = castle::Request::new(
        Event::new(EventType::Login, EventStatus::Attempted),
        User::new(form.email.clone()).email(form.email),
    )
    .context(ctx);

    match client.filter(&request).await {
        Ok(RecommendedAction::Deny) => (StatusCode::FORBIDDEN, "denied"),
        Ok(RecommendedAction::Challenge) => (StatusCode::UNAUTHORIZED, "challenge required"),
        Ok(_) => (StatusCode::OK, "welcome"),
        Err(e) => {
            // No recommendation; fail open.
            tracing::warn!(error = %e, "Castle filter unavailable");
            (StatusCode::OK, "welcome")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,castle=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = Arc::new(CastleClient::from_env().context("Failed to load Castle configuration")?);
    let config = Arc::new(CastleMiddleware::new().path_prefix("/login"));

    let app = Router::new()
        .route("/login", post(login))
        .layer(middleware::from_fn(move |req, next| {
            castle_middleware(config.clone(), req, next)
        }))
        .with_state(client);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
