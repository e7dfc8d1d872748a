//! HTTP interceptor: encrypts inbound JSON bodies before handlers see them and
//! decrypts outbound JSON bodies before they leave.
//!
//! Which entity a request belongs to is decided by the configured
//! [`RouteMap`] (path prefix → entity type), never by the payload.
//!
//! Request handling on a routed path:
//!
//! | verb      | body                          | action                          |
//! |-----------|-------------------------------|---------------------------------|
//! | read-only | any                           | forwarded                       |
//! | mutating  | empty                         | forwarded                       |
//! | mutating  | JSON, parses                  | encoded, then forwarded         |
//! | mutating  | JSON, does not parse          | forwarded (handler rejects it)  |
//! | mutating  | compressed or not JSON        | `415`                           |
//! | mutating  | over `max_body_bytes`         | `413`                           |
//!
//! Every JSON response on a routed path is decoded. When fields cannot be
//! decrypted, the response carries [`UNDECRYPTABLE_HEADER`] with their count.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use common::ServiceError;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{CodecError, ObjectCodec};
use crate::policy::{Boundary, FieldClassifier, PolicyDocument};
use crate::server::error::ApiError;

/// Response header listing how many fields were replaced by undecryptable
/// markers.
pub const UNDECRYPTABLE_HEADER: &str = "x-undecryptable-fields";

/// Route configuration that would leave an entity encrypted twice or not at
/// all.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A route points at an entity owned by the persistence hook.
    #[error(transparent)]
    Conflict(#[from] CodecError),

    /// An entity owned by the HTTP boundary has no route.
    #[error("entity {0} is encrypted at the http boundary but no route maps to it")]
    Unrouted(String),
}

/// Request extension set by [`intercept`] on every routed request.
///
/// Its presence is the only evidence that a body was encoded for `entity`;
/// [`EncryptedStore`](super::EncryptedStore) refuses HTTP-owned writes without
/// a matching one. It cannot be built outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intercepted {
    entity: String,
}

impl Intercepted {
    pub(crate) fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }
}

/// Path-prefix → entity-type mapping, matched longest prefix first on path
/// segment boundaries.
#[derive(Debug, Clone, Default)]
pub struct RouteMap {
    routes: Vec<(String, String)>,
}

impl RouteMap {
    pub fn new<I, P, E>(routes: I) -> Self
    where
        I: IntoIterator<Item = (P, E)>,
        P: Into<String>,
        E: Into<String>,
    {
        let mut routes: Vec<(String, String)> = routes
            .into_iter()
            .map(|(p, e)| (normalise_prefix(p.into()), e.into()))
            .collect();
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { routes }
    }

    /// Build the route map from a policy document's `routes` section.
    pub fn from_document(doc: &PolicyDocument) -> Self {
        Self::new(doc.routes.iter().map(|(p, e)| (p.clone(), e.clone())))
    }

    /// Entity type for a request path, if any route matches.
    pub fn entity_for(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, entity)| entity.as_str())
    }

    /// Check that routes and ownership agree in both directions: every routed
    /// entity is owned by the HTTP boundary, and every entity the policy
    /// assigns to the HTTP boundary has a route.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Conflict`] for a route whose entity is encrypted by
    /// the persistence hook, and [`RouteError::Unrouted`] for an HTTP-owned
    /// entity no route reaches (neither adapter would encrypt it).
    pub fn ensure_http_owned(&self, classifier: &FieldClassifier) -> Result<(), RouteError> {
        for (prefix, entity) in &self.routes {
            let owner = classifier.owner(entity);
            if owner != Boundary::Http {
                return Err(CodecError::BoundaryConflict {
                    entity: entity.clone(),
                    owner,
                    caller: Boundary::Http,
                }
                .into());
            }
            if !classifier.has_explicit_policy(entity) {
                warn!(prefix = %prefix, entity = %entity, "routed entity has no explicit policy; field-name heuristics apply");
            }
        }
        for entity in classifier.explicit_entities_owned_by(Boundary::Http) {
            if !self.routes.iter().any(|(_, routed)| routed == entity) {
                return Err(RouteError::Unrouted(entity.to_owned()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn normalise_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Middleware state: the codec plus the route map it applies to.
#[derive(Clone, Debug)]
pub struct HttpInterceptor {
    codec: ObjectCodec,
    routes: Arc<RouteMap>,
    max_body_bytes: usize,
}

impl HttpInterceptor {
    /// Build the interceptor, refusing route maps that disagree with entity
    /// ownership (see [`RouteMap::ensure_http_owned`]).
    pub fn new(codec: ObjectCodec, routes: RouteMap, max_body_bytes: usize) -> Result<Self, RouteError> {
        routes.ensure_http_owned(codec.classifier())?;
        Ok(Self {
            codec,
            routes: Arc::new(routes),
            max_body_bytes,
        })
    }

    pub fn routes(&self) -> &RouteMap {
        &self.routes
    }
}

/// Axum middleware entry point; install with
/// `axum::middleware::from_fn_with_state(interceptor, intercept)`.
pub async fn intercept(State(ic): State<HttpInterceptor>, mut req: Request, next: Next) -> Response {
    let Some(entity) = ic.routes.entity_for(req.uri().path()).map(str::to_owned) else {
        return next.run(req).await;
    };
    req.extensions_mut().insert(Intercepted::new(entity.as_str()));

    let req = if is_mutating(req.method()) {
        match encode_request(&ic, &entity, req).await {
            Ok(r) => r,
            Err(e) => return e.into_response(),
        }
    } else {
        req
    };

    let response = next.run(req).await;
    match decode_response(&ic, &entity, response).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn encode_request(ic: &HttpInterceptor, entity: &str, req: Request) -> Result<Request, ApiError> {
    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, ic.max_body_bytes).await.map_err(|_| {
        ServiceError::PayloadTooLarge(format!(
            "request body exceeds {} bytes or could not be read",
            ic.max_body_bytes
        ))
    })?;
    if bytes.is_empty() {
        return Ok(Request::from_parts(parts, Body::from(bytes)));
    }
    if is_encoded(&parts.headers) || !is_json(&parts.headers) {
        return Err(ServiceError::UnsupportedMediaType(
            "bodies on encrypted routes must be uncompressed application/json".into(),
        )
        .into());
    }

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => {
            debug!(entity = %entity, "request body is not valid JSON; forwarding untouched");
            return Ok(Request::from_parts(parts, Body::from(bytes)));
        }
    };

    let codec = ic.codec.clone();
    let owned_entity = entity.to_owned();
    let encoded = tokio::task::spawn_blocking(move || codec.encode_for_storage(&owned_entity, &value))
        .await
        .map_err(|e| ServiceError::Internal(format!("encryption task failed: {e}")))?
        .map_err(|e| {
            warn!(entity = %entity, error = %e, "request encryption failed; rejecting write");
            ApiError::from(e)
        })?;

    let body = serialise(&encoded)?;
    set_content_length(&mut parts.headers, body.len());
    Ok(Request::from_parts(parts, Body::from(body)))
}

async fn decode_response(ic: &HttpInterceptor, entity: &str, response: Response) -> Result<Response, ApiError> {
    if !is_json(response.headers()) || is_encoded(response.headers()) {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, ic.max_body_bytes).await.map_err(|_| {
        warn!(entity = %entity, limit = ic.max_body_bytes, "response body too large to decrypt");
        ServiceError::Internal("response body exceeds the decryption limit".into())
    })?;

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => return Ok(Response::from_parts(parts, Body::from(bytes))),
    };

    let codec = ic.codec.clone();
    let owned_entity = entity.to_owned();
    let decoded = tokio::task::spawn_blocking(move || codec.decode_from_storage(&owned_entity, &value))
        .await
        .map_err(|e| ServiceError::Internal(format!("decryption task failed: {e}")))?;

    if !decoded.is_clean() {
        let paths: Vec<&str> = decoded.failures.iter().map(|f| f.path.as_str()).collect();
        warn!(entity = %entity, count = paths.len(), fields = ?paths, "response contains undecryptable fields");
        parts
            .headers
            .insert(UNDECRYPTABLE_HEADER, HeaderValue::from(decoded.failures.len()));
    }

    let body = serialise(&decoded.value)?;
    set_content_length(&mut parts.headers, body.len());
    Ok(Response::from_parts(parts, Body::from(body)))
}

fn serialise(value: &Value) -> Result<Bytes, ApiError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| ServiceError::Internal(format!("failed to serialise body: {e}")).into())
}

fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

fn is_mutating(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().eq_ignore_ascii_case("identity"))
        .unwrap_or(false)
}
