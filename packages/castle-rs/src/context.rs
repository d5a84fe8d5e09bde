//! Build a [`Context`] from an inbound HTTP request.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts, HeaderMap, Method, Request, Uri};

use crate::ip::{client_ip, PrivateRanges};
use crate::types::Context;

/// `X-Castle-Request-Token` is the recommended header; `Castle-Token` is what
/// the frontends send.
const TOKEN_HEADER_NAMES: [&str; 2] = ["x-castle-request-token", "castle-token"];
const TOKEN_FORM_NAMES: [&str; 2] = ["castle_request_token", "castle-request-token"];

/// Never forwarded to Castle.
const DISALLOWED_HEADERS: [&str; 2] = ["cookie", "authorization"];

/// Build a context from request parts and an already-buffered body.
///
/// `form_body` is only consulted for form posts
/// (see [`is_form_post`]) and only when no token header is present.
pub fn from_parts(parts: &Parts, form_body: Option<&[u8]>) -> Context {
    let body = form_body.filter(|_| is_form_post(&parts.method, &parts.headers));
    build(
        &parts.headers,
        &parts.uri,
        body,
        &remote_addr(&parts.extensions),
    )
}

/// Build a context from headers, query string and peer address; the body is
/// not read.
pub fn from_request<B>(request: &Request<B>) -> Context {
    build(
        request.headers(),
        request.uri(),
        None,
        &remote_addr(request.extensions()),
    )
}

fn build(headers: &HeaderMap, uri: &Uri, body: Option<&[u8]>, remote_addr: &str) -> Context {
    let request_token = token_from_headers(headers)
        .or_else(|| token_from_form(uri.query(), body))
        .unwrap_or_default();

    Context {
        ip: client_ip(headers, remote_addr, PrivateRanges::shared()),
        headers: filter_headers(headers),
        request_token,
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`, if any.
fn remote_addr(extensions: &axum::http::Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default()
}

/// First non-empty token header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    TOKEN_HEADER_NAMES.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// First non-empty token form field. Body fields take precedence over the
/// query string for the same name.
pub fn token_from_form(query: Option<&str>, body: Option<&[u8]>) -> Option<String> {
    let mut fields: Vec<(String, String)> = Vec::new();
    if let Some(body) = body {
        fields.extend(url::form_urlencoded::parse(body).into_owned());
    }
    if let Some(query) = query {
        fields.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());
    }

    TOKEN_FORM_NAMES.iter().find_map(|name| {
        fields
            .iter()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.clone())
    })
}

/// Copy all headers except `cookie` and `authorization`, joining repeated
/// values with `", "`.
pub fn filter_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .keys()
        .filter(|name| {
            !DISALLOWED_HEADERS
                .iter()
                .any(|disallowed| name.as_str().eq_ignore_ascii_case(disallowed))
        })
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), joined)
        })
        .collect()
}

/// Whether a request body should be parsed as a form.
pub fn is_form_post(method: &Method, headers: &HeaderMap) -> bool {
    let body_method = matches!(*method, Method::POST | Method::PUT | Method::PATCH);
    let form_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    body_method && form_type
}
