//! Common HTTP types used throughout the pipeline.

use bytes::Bytes;
use http_body_util::Full;

/// The HTTP request type accepted by the pipeline.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type produced by handlers and terminal stages.
///
/// Status code, header collection and an opaque body: the shape the
/// transport layer consumes.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building simple responses.
pub trait ResponseExt {
    /// Creates a plain-text response with the given status code.
    fn text(status: http::StatusCode, body: impl Into<String>) -> Response;

    /// Creates a JSON error envelope response.
    fn json_error(status: http::StatusCode, code: &str, message: &str) -> Response;
}

impl ResponseExt for Response {
    fn text(status: http::StatusCode, body: impl Into<String>) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.into())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn json_error(status: http::StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });

        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_text_response() {
        let response = Response::text(StatusCode::CREATED, "made");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_json_error_response() {
        let response = Response::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "MIDDLEWARE_FAILURE",
            "stage failed",
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
