//! Request-context capture for HTTP handlers
//!
//! [`audit_middleware`] turns successful state-changing requests into audit
//! records. It runs after the handler, so the response is never held up by
//! the audit pipeline: the record is handed to [`AuditRecorder::log`] and
//! staged in the background.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::builder::AuditBuilder;
use super::record::AuditAction;
use super::recorder::AuditRecorder;

/// Authenticated user id
///
/// Installed as a request extension by the authentication layer. Handlers
/// and the push endpoint extract it; requests without one get `401`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Actor(pub i64);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Actor>()
            .copied()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Caller details relevant to an audit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated user, if any
    pub actor: Option<i64>,
    /// Client address, empty when unknown
    pub origin: String,
    /// User agent, empty when absent
    pub client: String,
    /// Request method
    pub method: Method,
    /// Request path without query
    pub path: String,
}

impl RequestContext {
    /// Extract the context from request parts
    ///
    /// The origin prefers the first `x-forwarded-for` hop, then
    /// `x-real-ip`, then the socket peer address.
    pub fn from_parts(parts: &Parts) -> Self {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let origin = header("x-forwarded-for")
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .or_else(|| header("x-real-ip").map(String::from))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();

        Self {
            actor: parts.extensions.get::<Actor>().map(|a| a.0),
            origin,
            client: header("user-agent").map(String::from).unwrap_or_default(),
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
        }
    }

    /// Action this request represents, if it changes state
    ///
    /// Only state-changing methods count; a `GET /login` that renders the
    /// form is not a login.
    pub fn action(&self) -> Option<AuditAction> {
        let action = AuditAction::from_method(&self.method)?;
        match self.path.trim_end_matches('/').rsplit('/').next() {
            Some("login") => Some(AuditAction::Login),
            Some("logout") => Some(AuditAction::Logout),
            _ => Some(action),
        }
    }

    /// Resource name and id derived from the path
    ///
    /// `/api/v1/students/42/grades` gives `("students", "42")`. API and
    /// version prefixes are skipped.
    pub fn resource(&self) -> (String, String) {
        let mut segments = self
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip_while(|s| *s == "api" || is_version_segment(s));

        let resource = segments.next().unwrap_or("root").to_string();
        let resource_id = segments.next().unwrap_or_default().to_string();
        (resource, resource_id)
    }
}

fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// State for [`audit_middleware`]
#[derive(Clone)]
pub struct AuditLayerState {
    recorder: AuditRecorder,
    excluded_routes: Arc<[String]>,
}

impl AuditLayerState {
    /// Create middleware state
    pub fn new(recorder: AuditRecorder, excluded_routes: Vec<String>) -> Self {
        Self {
            recorder,
            excluded_routes: excluded_routes.into(),
        }
    }
}

/// Audit middleware
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/api/v1/students", post(create_student))
///     .layer(axum::middleware::from_fn_with_state(state, audit_middleware));
/// ```
pub async fn audit_middleware(
    State(state): State<AuditLayerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let context = RequestContext::from_parts(&parts);
    let request = Request::from_parts(parts, body);

    if path_matches_patterns(&context.path, &state.excluded_routes) {
        return next.run(request).await;
    }
    let Some(action) = context.action() else {
        return next.run(request).await;
    };

    let start = Instant::now();
    let response = next.run(request).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let status = response.status();
    if !status.is_success() {
        return response;
    }

    let (resource, resource_id) = match action {
        AuditAction::Login | AuditAction::Logout => ("session".to_string(), String::new()),
        _ => context.resource(),
    };
    let record = AuditBuilder::build(
        context.actor,
        action,
        resource,
        resource_id,
        json!({
            "method": context.method.as_str(),
            "path": context.path,
            "status": status.as_u16(),
            "duration_ms": duration_ms,
        }),
        context.origin,
        context.client,
    );
    state.recorder.log(record);

    response
}

/// Check if a path matches any of the given glob patterns
///
/// Supports simple wildcard matching:
/// - `*` matches within a single pattern position
/// - `**` or trailing `/*` matches any remaining segments
pub fn path_matches_patterns(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| path_matches_glob(path, pattern))
}

fn path_matches_glob(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path == prefix || segment_rest(path, prefix).is_some();
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return segment_rest(path, prefix).is_some_and(|rest| !rest.is_empty());
    }

    if let Some((head, tail)) = pattern.split_once('*') {
        if !tail.contains('*') {
            return path.len() >= head.len() + tail.len()
                && path.starts_with(head)
                && path.ends_with(tail);
        }
    }

    false
}

/// Remainder of `path` after `prefix`, only if `prefix` ends on a segment boundary
fn segment_rest<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_prefix('/')
}
