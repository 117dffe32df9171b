//! Request context types.
//!
//! The [`RequestContext`] owns everything one request's processing may
//! touch: the inbound request, the response header collection that stages
//! and the handler write to, and the request-scoped [`Locals`].

use crate::locals::Locals;
use crate::types::Request;
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
///
/// # Example
///
/// ```
/// use portico_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request context handed to every stage and to the route handler.
///
/// The request itself is read-only. `response_headers` and `locals` are
/// mutable scratch space for the duration of the request; both start empty
/// and are dropped together with the context once the final response has
/// been produced.
///
/// A context is never shared between requests. Stages receive it by
/// `&mut` for the length of one invocation and cannot retain it.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http_body_util::Full;
/// use portico_core::RequestContext;
///
/// let request = http::Request::builder()
///     .uri("/posts/1")
///     .body(Full::new(Bytes::new()))
///     .unwrap();
///
/// let mut ctx = RequestContext::new(request);
/// ctx.locals_mut().insert("x", 1_i32);
///
/// assert_eq!(ctx.path(), "/posts/1");
/// assert_eq!(ctx.locals().get::<i32>("x"), Some(&1));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// The inbound request.
    request: Request,

    /// Headers that will be sent with the final response.
    response_headers: HeaderMap,

    /// Status produced by the route handler, once it has run.
    response_status: Option<StatusCode>,

    /// Request-scoped scratch space.
    locals: Locals,

    /// When the request started processing.
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for `request` with a fresh request ID.
    #[must_use]
    pub fn new(request: Request) -> Self {
        Self::with_request_id(request, RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request: Request, request_id: RequestId) -> Self {
        Self {
            request_id,
            request,
            response_headers: HeaderMap::new(),
            response_status: None,
            locals: Locals::new(),
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Replaces the request ID.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the inbound request.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Returns the request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// Returns the request headers.
    #[must_use]
    pub fn request_headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// Returns the response headers accumulated so far.
    #[must_use]
    pub const fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Returns the response headers for mutation.
    ///
    /// `insert` replaces every existing value for the name; `append` adds
    /// another value alongside the existing ones.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Returns the status the route handler responded with.
    ///
    /// `None` until the handler has run.
    #[must_use]
    pub const fn response_status(&self) -> Option<StatusCode> {
        self.response_status
    }

    /// Records the handler's response status.
    pub fn set_response_status(&mut self, status: StatusCode) {
        self.response_status = Some(status);
    }

    /// Returns the request-scoped locals.
    #[must_use]
    pub const fn locals(&self) -> &Locals {
        &self.locals
    }

    /// Returns the request-scoped locals for mutation.
    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }

    /// Returns when the request started processing.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Takes the accumulated response headers, leaving an empty map.
    pub fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request(method: &str, uri: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .header("Cookie", "theme=dark")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_id_serialization() {
        let uuid = Uuid::parse_str("01234567-89ab-7def-8123-456789abcdef").unwrap();
        let id = RequestId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"01234567-89ab-7def-8123-456789abcdef\"");
        assert_eq!(id.to_string(), "01234567-89ab-7def-8123-456789abcdef");
    }

    #[test]
    fn test_new_context_starts_empty() {
        let ctx = RequestContext::new(request("GET", "/posts?page=2"));
        assert!(ctx.locals().is_empty());
        assert!(ctx.response_headers().is_empty());
        assert!(ctx.response_status().is_none());
        assert_eq!(ctx.method(), Method::GET);
        assert_eq!(ctx.path(), "/posts");
        assert_eq!(ctx.uri().query(), Some("page=2"));
    }

    #[test]
    fn test_request_headers_case_insensitive() {
        let ctx = RequestContext::new(request("GET", "/"));
        assert_eq!(ctx.request_headers().get("cookie").unwrap(), "theme=dark");
        assert_eq!(ctx.request_headers().get("COOKIE").unwrap(), "theme=dark");
    }

    #[test]
    fn test_response_headers_insert_and_append() {
        let mut ctx = RequestContext::new(request("GET", "/"));
        let headers = ctx.response_headers_mut();
        headers.insert("x-one", "a".parse().unwrap());
        headers.insert("X-One", "b".parse().unwrap());
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());

        assert_eq!(ctx.response_headers().get("x-one").unwrap(), "b");
        assert_eq!(ctx.response_headers().get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_take_response_headers() {
        let mut ctx = RequestContext::new(request("POST", "/"));
        ctx.response_headers_mut()
            .insert("x-a", "1".parse().unwrap());
        let taken = ctx.take_response_headers();
        assert_eq!(taken.len(), 1);
        assert!(ctx.response_headers().is_empty());
    }

    #[test]
    fn test_with_request_id() {
        let id = RequestId::new();
        let mut ctx = RequestContext::with_request_id(request("GET", "/"), id);
        assert_eq!(ctx.request_id(), id);

        let other = RequestId::new();
        ctx.set_request_id(other);
        assert_eq!(ctx.request_id(), other);
    }

    #[test]
    fn test_elapsed_time() {
        let ctx = RequestContext::new(request("GET", "/"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.elapsed() >= Duration::from_millis(5));
    }
}
