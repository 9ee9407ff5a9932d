//! Control HTTP surface for the companion UI.

pub mod api;
pub mod models;

use axum::http::{header, HeaderName, HeaderValue};

/// Headers every response carries so the browser UI can call us from
/// anywhere: permissive CORS plus the content type it expects.
pub fn control_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET"),
        ),
        (header::CONTENT_TYPE, HeaderValue::from_static("text/json")),
    ]
}
