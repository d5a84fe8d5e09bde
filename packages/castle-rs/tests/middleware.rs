use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    routing::post,
    Extension, Router,
};
use castle::middleware::{castle_middleware, CastleContext, CastleMiddleware};
use castle::{CastleClient, Event, EventStatus, EventType, User};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn login(
    State(client): State<Arc<CastleClient>>,
    ctx: Option<Extension<CastleContext>>,
) -> (StatusCode, String) {
    let Some(Extension(CastleContext(ctx))) = ctx else {
        return (StatusCode::BAD_REQUEST, "missing castle context".into());
    };

    let request = castle::Request::new(
        Event::new(EventType::Login, EventStatus::Attempted),
        User::new("user-id").email("user@test.com"),
    )
    .context(ctx);

    match client.risk(&request).await {
        Ok(action) => (StatusCode::OK, action.to_string()),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

fn app(client: CastleClient) -> Router {
    let config = Arc::new(CastleMiddleware::new().path_prefix("/login"));
    Router::new()
        .route("/login", post(login))
        .layer(middleware::from_fn(move |req, next| {
            castle_middleware(config.clone(), req, next)
        }))
        .with_state(Arc::new(client))
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn context_flows_from_inbound_request_to_risk_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/risk"))
        .and(body_partial_json(json!({
            "request_token": "form-token",
            "context": {"ip": "109.14.23.2", "request_token": "form-token"}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"policy": {"action": "deny"}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = CastleClient::new("secret").with_base_url(&server.uri());
    let mut request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-forwarded-for", "127.0.0.1, 109.14.23.2")
        .header("cookie", "session=abc")
        .header("authorization", "Bearer secret")
        .body(Body::from("email=user%40test.com&castle_request_token=form-token"))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("10.0.0.5:40000".parse::<SocketAddr>().unwrap()));

    let response = app(client).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "deny");

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    let headers = body["context"]["headers"].as_object().unwrap();
    assert!(!headers.contains_key("cookie"));
    assert!(!headers.contains_key("authorization"));
    assert_eq!(headers["content-type"], "application/x-www-form-urlencoded");
}

#[tokio::test]
async fn request_without_token_gets_no_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = CastleClient::new("secret").with_base_url(&server.uri());
    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .body(Body::from("{}"))
        .unwrap();

    let response = app(client).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "missing castle context");
}
