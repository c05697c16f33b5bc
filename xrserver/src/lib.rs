//! Wires C2 (response cache), C7 (backend table), and the upstream client into the axum
//! `Router` that C5/C6 handle requests through, plus the ambient cross-cutting concerns the
//! spec's URL surface implies but doesn't assign to a single component: the optional
//! bearer-key gate, CORS/OPTIONS (spec.md 4.6), and turning an unmatched path or verb into a
//! Problem-Details body instead of axum's bare-status default.

pub mod cache;
pub mod error;
pub mod flags;
pub mod routes;
pub mod util;

use std::sync::Arc;

use axum::extract::State;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

use cache::ResponseCache;
use error::{Error, HandlerError};
use xrmodel::BackendTable;

/// Per-process shared state every handler in `routes` reads through `State<Arc<Ctx>>`.
pub struct Ctx {
    pub backends: BackendTable,
    pub client: ocidist::Client,
    pub cache: ResponseCache,
    pub started_at: String,
    pub dev: bool,
    pub max_enrich_fetches: usize,
    pub bearer_key: Option<String>,
}

/// Assembles the xRegistry URL tree (spec.md 4.5) fixed to this core's single groups/resource
/// type pair (`containerregistries`/`images` -- spec.md's "where for this core" note), wrapped
/// in the `$details`-stripping middleware and the gate/CORS/method-not-allowed layer below.
pub fn build_router(ctx: Arc<Ctx>) -> Router {
    Router::new()
        .route("/", get(routes::get_registry))
        .route("/capabilities", get(routes::get_capabilities))
        .route("/model", get(routes::get_model))
        .route("/containerregistries", get(routes::get_groups))
        .route("/containerregistries/{group}", get(routes::get_group))
        .route(
            "/containerregistries/{group}/images",
            get(routes::get_resources),
        )
        .route(
            "/containerregistries/{group}/images/{id}",
            get(routes::get_resource),
        )
        .route(
            "/containerregistries/{group}/images/{id}/meta",
            get(routes::get_meta),
        )
        .route(
            "/containerregistries/{group}/images/{id}/doc",
            get(routes::get_doc),
        )
        .route(
            "/containerregistries/{group}/images/{id}/versions",
            get(routes::get_versions),
        )
        .route(
            "/containerregistries/{group}/images/{id}/versions/{vid}",
            get(routes::get_version),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(routes::strip_details))
        .layer(middleware::from_fn_with_state(ctx.clone(), gate))
        .with_state(ctx)
}

/// Anything not matching one of the routes above is `api_not_found` (spec.md 4.6), not axum's
/// bare 404.
async fn not_found(State(ctx): State<Arc<Ctx>>, uri: Uri) -> impl IntoResponse {
    let path = uri.path().to_string();
    HandlerError {
        err: Error::ApiNotFound(path.clone()),
        instance: path,
        dev: ctx.dev,
    }
}

/// Single combined layer for three cross-cutting concerns that all apply uniformly to every
/// route, none of which belongs inside an individual handler:
///
/// - `OPTIONS` short-circuits to `204` with CORS headers, never reaching a handler.
/// - the optional bearer-key gate (spec.md 1's "authentication of the façade's own clients
///   beyond an optional bearer-key gate" non-goal) rejects everything else when configured.
/// - a `405` from axum's own method routing (GET-only routes hit with POST/PUT/DELETE/...) is
///   rewritten into a Problem-Details body (spec.md 8.7's read-only law).
///
/// CORS headers (`*` origin, exposed `Link`/`ETag`/`X-Registry-*`) are applied to every
/// response on the way back out, matching spec.md 4.6.
async fn gate(State(ctx): State<Arc<Ctx>>, req: axum::extract::Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    if req.method() == Method::OPTIONS {
        return options_response();
    }

    if let Some(key) = &ctx.bearer_key {
        let authorized = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|v| v == format!("Bearer {key}"))
            .unwrap_or(false);
        if !authorized {
            let mut response = HandlerError {
                err: Error::Unauthorized,
                instance: path,
                dev: ctx.dev,
            }
            .into_response();
            apply_cors(response.headers_mut());
            return response;
        }
    }

    let mut response = next.run(req).await;
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        response = HandlerError {
            err: Error::MethodNotAllowed,
            instance: path,
            dev: ctx.dev,
        }
        .into_response();
    }
    apply_cors(response.headers_mut());
    response
}

fn options_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    apply_cors(&mut headers);
    (StatusCode::NO_CONTENT, headers).into_response()
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        HeaderName::from_static("access-control-expose-headers"),
        HeaderValue::from_static(
            "Link, ETag, X-Registry-Spec-Version, X-Registry-Schema, X-Registry-Epoch, X-Registry-Details",
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::util::ServiceExt;

    fn test_ctx_with_bearer(bearer_key: Option<String>) -> Arc<Ctx> {
        Arc::new(Ctx {
            backends: BackendTable::new(xrmodel::default_backends()),
            client: ocidist::Client::new().unwrap(),
            cache: ResponseCache::new(std::env::temp_dir().join("xrserver-test-cache")),
            started_at: xrmodel::time::to_rfc3339(xrmodel::time::now()),
            dev: true,
            max_enrich_fetches: 20,
            bearer_key,
        })
    }

    fn test_ctx() -> Arc<Ctx> {
        test_ctx_with_bearer(None)
    }

    #[tokio::test]
    async fn root_returns_registry_document() {
        let app = build_router(test_ctx());
        let req = axum::http::Request::builder().uri("/").body(axum::body::Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unmatched_path_is_api_not_found() {
        let app = build_router(test_ctx());
        let req = axum::http::Request::builder()
            .uri("/nope")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_to_registry_root_is_405() {
        let app = build_router(test_ctx());
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn options_short_circuits_with_204() {
        let app = build_router(test_ctx());
        let req = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn bearer_gate_rejects_missing_credential() {
        let app = build_router(test_ctx_with_bearer(Some("secret".to_string())));
        let req = axum::http::Request::builder().uri("/").body(axum::body::Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
