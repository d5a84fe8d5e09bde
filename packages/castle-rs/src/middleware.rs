use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{Extensions, Method},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::context;
use crate::types::Context;

/// Largest form body buffered while looking for a request token.
pub const DEFAULT_MAX_FORM_BYTES: usize = 10 << 20;

/// Extension key for the Castle context of the current request
#[derive(Clone, Debug)]
pub struct CastleContext(pub Context);

/// Castle context attached by [`castle_middleware`], if any.
pub fn context_from_extensions(extensions: &Extensions) -> Option<&Context> {
    extensions.get::<CastleContext>().map(|CastleContext(ctx)| ctx)
}

/// Which requests get a Castle context attached.
///
/// Defaults: POST only, every path, skip requests without a token.
#[derive(Clone, Debug)]
pub struct CastleMiddleware {
    /// `None` matches every method
    methods: Option<Vec<Method>>,
    /// Empty matches every path
    path_prefixes: Vec<String>,
    ignore_empty: bool,
    max_form_bytes: usize,
}

impl Default for CastleMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CastleMiddleware {
    pub fn new() -> Self {
        Self {
            methods: Some(vec![Method::POST]),
            path_prefixes: Vec::new(),
            ignore_empty: true,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }

    /// Only act on these methods.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Act on every method.
    pub fn any_method(mut self) -> Self {
        self.methods = None;
        self
    }

    /// Only act on paths starting with `prefix`. May be called repeatedly.
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefixes.push(prefix.into());
        self
    }

    /// Skip attaching a context when no request token was found.
    pub fn ignore_empty(mut self, ignore_empty: bool) -> Self {
        self.ignore_empty = ignore_empty;
        self
    }

    pub fn max_form_bytes(mut self, limit: usize) -> Self {
        self.max_form_bytes = limit;
        self
    }

    pub fn applies_to(&self, method: &Method, path: &str) -> bool {
        let method_ok = self
            .methods
            .as_ref()
            .map_or(true, |methods| methods.contains(method));
        let path_ok = self.path_prefixes.is_empty()
            || self
                .path_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()));
        method_ok && path_ok
    }
}

/// Middleware to attach a [`CastleContext`] to matching requests
///
/// Does not block requests. Handlers read the context with
/// `Option<Extension<CastleContext>>` or [`context_from_extensions`].
pub async fn castle_middleware(
    config: Arc<CastleMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    if !config.applies_to(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let (castle_ctx, mut request) = extract(&config, request).await;

    if config.ignore_empty && castle_ctx.request_token.is_empty() {
        debug!(path = %request.uri().path(), "No Castle request token");
        return next.run(request).await;
    }

    request.extensions_mut().insert(CastleContext(castle_ctx));
    next.run(request).await
}

/// Extract the context, buffering a form body only when the token can't come
/// from headers and the body is known to fit under the limit. The buffered
/// body is handed back to the request; any other body passes through unread.
async fn extract(config: &CastleMiddleware, request: Request) -> (Context, Request) {
    let needs_body = context::token_from_headers(request.headers()).is_none()
        && context::is_form_post(request.method(), request.headers());
    if !needs_body {
        return (context::from_request(&request), request);
    }

    let (parts, body) = request.into_parts();
    let fits = body
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= config.max_form_bytes as u64);
    if !fits {
        debug!("Form body unbounded or over limit, Castle token taken from query only");
        let request = Request::from_parts(parts, body);
        return (context::from_request(&request), request);
    }

    match axum::body::to_bytes(body, config.max_form_bytes).await {
        Ok(bytes) => {
            let castle_ctx = context::from_parts(&parts, Some(&bytes));
            (castle_ctx, Request::from_parts(parts, Body::from(bytes)))
        }
        Err(e) => {
            warn!(error = %e, "Failed to read form body, Castle token taken from query only");
            let request = Request::from_parts(parts, Body::empty());
            (context::from_request(&request), request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, Extension, Router};
    use tower::ServiceExt;

    async fn echo(ctx: Option<Extension<CastleContext>>, body: String) -> String {
        let token = match ctx {
            Some(Extension(CastleContext(ctx))) => format!("token={}", ctx.request_token),
            None => "none".to_string(),
        };
        format!("{token};body={body}")
    }

    fn app(config: CastleMiddleware) -> Router {
        let config = Arc::new(config);
        Router::new()
            .fallback(echo)
            .layer(middleware::from_fn(move |req, next| {
                castle_middleware(config.clone(), req, next)
            }))
    }

    async fn call(app: Router, request: Request) -> String {
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn post(uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder().method(Method::POST).uri(uri)
    }

    #[tokio::test]
    async fn ctx_is_set() {
        let app = app(CastleMiddleware::new().any_method().ignore_empty(false));
        let req = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(call(app, req).await, "token=;body=");
    }

    #[tokio::test]
    async fn ctx_is_not_set_without_token() {
        let app = app(CastleMiddleware::new());
        let req = post("/login").body(Body::empty()).unwrap();
        assert_eq!(call(app, req).await, "none;body=");
    }

    #[tokio::test]
    async fn ctx_from_header_token() {
        let app = app(CastleMiddleware::new());
        let req = post("/login")
            .header("X-Castle-Request-Token", "tkn")
            .body(Body::from("payload"))
            .unwrap();
        assert_eq!(call(app, req).await, "token=tkn;body=payload");
    }

    #[tokio::test]
    async fn non_matching_method_passes_through() {
        let app = app(CastleMiddleware::new().ignore_empty(false));
        let req = axum::http::Request::builder()
            .method(Method::GET)
            .uri("/login")
            .header("Castle-Token", "tkn")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(app, req).await, "none;body=");
    }

    #[tokio::test]
    async fn non_matching_path_passes_through() {
        let app = app(CastleMiddleware::new().path_prefix("/auth"));
        let req = post("/graphql")
            .header("Castle-Token", "tkn")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(app.clone(), req).await, "none;body=");

        let req = post("/auth/login")
            .header("Castle-Token", "tkn")
            .body(Body::empty())
            .unwrap();
        assert_eq!(call(app, req).await, "token=tkn;body=");
    }

    #[tokio::test]
    async fn form_token_found_and_body_preserved() {
        let app = app(CastleMiddleware::new());
        let form = "user=jane&castle_request_token=form-tkn";
        let req = post("/login")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap();
        assert_eq!(call(app, req).await, format!("token=form-tkn;body={form}"));
    }

    #[tokio::test]
    async fn oversized_form_falls_back_to_query() {
        let app = app(CastleMiddleware::new().max_form_bytes(8));
        let req = post("/login?castle-request-token=q-tkn")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("castle_request_token=body-tkn"))
            .unwrap();
        assert_eq!(
            call(app, req).await,
            "token=q-tkn;body=castle_request_token=body-tkn"
        );
    }

    #[tokio::test]
    async fn streamed_form_over_limit_still_reaches_handler() {
        let app = app(CastleMiddleware::new().max_form_bytes(8));
        let chunks = futures::stream::iter([
            Ok::<_, std::io::Error>("castle_request_token="),
            Ok("tkn-over-limit"),
        ]);
        let req = post("/login?castle_request_token=q-tkn")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from_stream(chunks))
            .unwrap();
        assert_eq!(
            call(app, req).await,
            "token=q-tkn;body=castle_request_token=tkn-over-limit"
        );
    }

    #[tokio::test]
    async fn streamed_form_without_query_token_passes_through() {
        let app = app(CastleMiddleware::new());
        let chunks = futures::stream::iter([
            Ok::<_, std::io::Error>("castle_request_token="),
            Ok("tkn-streamed"),
        ]);
        let req = post("/login")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from_stream(chunks))
            .unwrap();
        assert_eq!(
            call(app, req).await,
            "none;body=castle_request_token=tkn-streamed"
        );
    }

    #[test]
    fn absent_context_is_none() {
        let extensions = Extensions::new();
        assert!(context_from_extensions(&extensions).is_none());

        let mut extensions = Extensions::new();
        extensions.insert(CastleContext(Context {
            request_token: "t".into(),
            ..Default::default()
        }));
        assert_eq!(context_from_extensions(&extensions).unwrap().request_token, "t");
    }

    #[test]
    fn applies_to_defaults() {
        let config = CastleMiddleware::default();
        assert!(config.applies_to(&Method::POST, "/anything"));
        assert!(!config.applies_to(&Method::GET, "/anything"));

        let config = CastleMiddleware::new().methods([Method::PUT, Method::PATCH]);
        assert!(config.applies_to(&Method::PATCH, "/"));
        assert!(!config.applies_to(&Method::POST, "/"));
    }
}
