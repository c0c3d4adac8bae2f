use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, uri::Uri, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::security::limits::MAX_BODY_BYTES;

lazy_static! {
    // Blacklist of SQL/XSS tokens. Pattern matching, not parsing: it can
    // mangle legitimate text and miss obfuscated payloads, and the stored
    // format inherits whatever it lets through.
    static ref DANGEROUS_TOKENS: Regex = Regex::new(
        r"(?i)xp_|sp_|execute|exec|union|select|insert|update|delete|drop|create|alter|script|javascript|onload|onerror|onclick|onmouseover"
    )
    .unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Strips SQL delimiters, comment markers, blacklisted keywords and HTML tags.
pub(crate) fn strip_dangerous(input: &str) -> String {
    let stripped = input
        .replace(['\'', '"', ';'], "")
        .replace("--", "")
        .replace("/*", "")
        .replace("*/", "");
    let stripped = DANGEROUS_TOKENS.replace_all(&stripped, "");
    let stripped = HTML_TAG.replace_all(&stripped, "");
    stripped.trim().to_string()
}

/// HTML-entity escape applied to body strings after the blacklist pass.
pub(crate) fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .replace('/', "&#x2F;")
}

/// Recursively rewrites every string in the JSON value: blacklist strip,
/// then XSS escape.
pub(crate) fn sanitize_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = escape_html(&strip_dangerous(s)),
        Value::Array(items) => items.iter_mut().for_each(sanitize_value),
        Value::Object(map) => map.values_mut().for_each(sanitize_value),
        _ => {}
    }
}

/// Buffers JSON request bodies and rewrites their strings in place. Non-JSON
/// requests pass through untouched; malformed JSON is left for the extractor
/// to reject.
pub async fn sanitize_body(req: Request, next: Next) -> Response {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::PayloadTooLarge.into_response(),
    };

    let body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut value) => {
            sanitize_value(&mut value);
            match serde_json::to_vec(&value) {
                Ok(buf) => {
                    if let Ok(len) = HeaderValue::from_str(&buf.len().to_string()) {
                        parts.headers.insert(header::CONTENT_LENGTH, len);
                    }
                    Body::from(buf)
                }
                Err(_) => Body::from(bytes),
            }
        }
        Err(e) => {
            debug!(error = %e, "body is not valid JSON, passing through");
            Body::from(bytes)
        }
    };

    next.run(Request::from_parts(parts, body)).await
}

/// Collapses duplicate query parameters (last value wins) and strips
/// blacklisted tokens from query values.
pub async fn sanitize_query(mut req: Request, next: Next) -> Response {
    if let Some(query) = req.uri().query() {
        let rewritten = collapse_query(query);
        if rewritten != query {
            let path = req.uri().path().to_string();
            let target = if rewritten.is_empty() {
                path
            } else {
                format!("{}?{}", path, rewritten)
            };
            if let Ok(uri) = target.parse::<Uri>() {
                *req.uri_mut() = uri;
            }
        }
    }
    next.run(req).await
}

fn collapse_query(query: &str) -> String {
    let mut pairs: Vec<(String, Option<String>)> = Vec::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match part.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(strip_dangerous(v))),
            None => (part.to_string(), None),
        };
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => pairs.push((key, value)),
        }
    }
    pairs
        .into_iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}={}", k, v),
            None => k,
        })
        .collect::<Vec<_>>()
        .join("&")
}
