//! C5: the xRegistry URL tree (spec.md 4.5). Handlers assemble documents from `xrmodel::entity`,
//! run them through the C4 flag pipeline, and let C6 turn failures into Problem-Details.

use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::response::IntoResponse;
use futures::stream::{self, StreamExt};
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use log::warn;
use serde_json::{Map, Value};

use xrmodel::{codec, entity};

use crate::error::{Error, HandlerError};
use crate::flags::{Flags, Page};
use crate::Ctx;

/// Upper bound on in-flight upstream fetches issued concurrently within one request (spec.md
/// 5's "fan-out within a request ... MAY be issued concurrently"). Independent of
/// `ctx.max_enrich_fetches`, which bounds the *count* of attribute-filter enrichment fetches
/// rather than how many run at once.
const DEFAULT_VERSION_CONCURRENCY: usize = 16;

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

fn parse_flags(raw: Option<&str>) -> Result<Flags, Error> {
    Flags::parse(raw).map_err(Error::from)
}

/// Sets the standard xRegistry/Problem-Details-adjacent headers every entity response carries
/// (spec.md 4.6), plus an `ETag` computed from the canonical body bytes.
fn entity_headers(body: &[u8]) -> HeaderMap {
    let etag = format!("\"{:x}\"", md5::compute(body));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(
        HeaderName::from_static("x-registry-spec-version"),
        HeaderValue::from_static(entity::SPEC_VERSION),
    );
    headers.insert(HeaderName::from_static("x-registry-epoch"), HeaderValue::from_static("1"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers
}

fn ok_json(value: &Value) -> impl IntoResponse {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let headers = entity_headers(&body);
    (StatusCode::OK, headers, body)
}

fn handler_err(err: impl Into<Error>, headers: &HeaderMap, dev: bool) -> HandlerError {
    HandlerError {
        err: err.into(),
        instance: headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string(),
        dev,
    }
}

/// Checks `?epoch=N` against the document's own `epoch` (always `1` in this read-only
/// projection -- spec.md 3's "epoch is fixed at 1").
fn check_epoch(flags: &Flags, doc: &Map<String, Value>) -> Result<(), Error> {
    if let Some(expected) = flags.epoch {
        let actual = doc.get("epoch").and_then(Value::as_u64).unwrap_or(1);
        if actual != expected {
            return Err(Error::EpochMismatch { expected, actual });
        }
    }
    Ok(())
}

/// Cursory shape check for `schema=true` (spec.md 4.4): every entity must carry the common
/// attributes. Not a full JSON-Schema validator -- there is no declared schema document to
/// validate against, just the invariant from spec.md 8.1.
fn check_schema(flags: &Flags, doc: &Map<String, Value>) -> Result<(), Error> {
    if !flags.schema {
        return Ok(());
    }
    for required in ["xid", "self", "epoch", "createdat", "modifiedat"] {
        if !doc.contains_key(required) {
            return Err(Error::InvalidRequest(format!("missing required attribute {required}")));
        }
    }
    Ok(())
}

pub async fn get_registry(
    State(ctx): State<Arc<Ctx>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let mut doc = entity::registry_document(&base, ctx.backends.len(), &ctx.started_at);
    check_schema(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    check_epoch(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    flags.strip_and_annotate(&mut doc);
    Ok(ok_json(&Value::Object(doc)))
}

pub async fn get_capabilities() -> impl IntoResponse {
    ok_json(&entity::capabilities_document())
}

pub async fn get_model() -> impl IntoResponse {
    ok_json(&entity::model_document())
}

pub async fn get_groups(
    State(ctx): State<Arc<Ctx>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let names = ctx.backends.names();
    let mut docs: Vec<(String, Value)> = Vec::new();
    for (name, groups) in flags.filter.index_candidates(&names) {
        let Some(backend) = ctx.backends.get(&name) else { continue };
        let mut doc = entity::group_document(&base, &backend, &ctx.started_at);
        if !flags.filter.matches_enriched(&groups, &Value::Object(doc.clone())) {
            continue;
        }
        flags.strip_and_annotate(&mut doc);
        docs.push((name, Value::Object(doc)));
    }
    if let Some(sort) = &flags.sort {
        sort.apply(&mut docs, |(_, v)| v);
    }
    Ok(paginate_response(&base, "/containerregistries", docs, &flags))
}

pub async fn get_group(
    State(ctx): State<Arc<Ctx>>,
    Path(group): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let backend = ctx
        .backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    let mut doc = entity::group_document(&base, &backend, &ctx.started_at);
    check_schema(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    check_epoch(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    flags.strip_and_annotate(&mut doc);
    Ok(ok_json(&Value::Object(doc)))
}

/// Walks the upstream catalog to completion (spec.md 4.5 step 1), bounded the same way a
/// manifest-list walk is: sequential pages, no unbounded recursion. `catalogPath=="disabled"`
/// (`Backend::catalog_path() == None`) is treated as an empty catalog.
async fn full_catalog(ctx: &Ctx, backend: &xrmodel::Backend) -> Result<Vec<String>, Error> {
    let Some(catalog_path) = backend.catalog_path() else {
        return Ok(Vec::new());
    };
    let auth = backend.auth();
    let mut names = Vec::new();
    let mut last: Option<String> = None;
    loop {
        let page = ctx
            .client
            .get_catalog(&backend.registry_url, catalog_path, 1000, last.as_deref(), &auth)
            .await;
        let (repos, next) = match page {
            Ok(v) => v,
            Err(ocidist::Error::StatusNotOk(s))
                if s == StatusCode::UNAUTHORIZED || s == StatusCode::FORBIDDEN =>
            {
                warn!("catalog listing for {} denied, returning empty", backend.name);
                (Vec::new(), None)
            }
            Err(e) => return Err(e.into()),
        };
        names.extend(repos);
        match next {
            Some(cursor) => last = Some(cursor),
            None => break,
        }
    }
    Ok(names)
}

async fn default_version(ctx: &Ctx, backend: &xrmodel::Backend, image: &str) -> Result<String, Error> {
    Ok(default_version_and_count(ctx, backend, image).await?.0)
}

/// Resolves the default-version state machine (spec.md 4.5: `"latest"` if present among tags,
/// else the first tag in upstream order) and also hands back the tag count, since both the
/// Resource projection's `versionid`/`isdefault` and its `versionscount` (spec.md 1) come from
/// the same tag list and there is no reason to fetch it twice.
async fn default_version_and_count(
    ctx: &Ctx,
    backend: &xrmodel::Backend,
    image: &str,
) -> Result<(String, usize), Error> {
    let tags = ctx
        .client
        .get_tags_list(&backend.registry_url, image, &backend.auth())
        .await?;
    let count = tags.len();
    if tags.iter().any(|t| t == "latest") {
        Ok(("latest".to_string(), count))
    } else {
        let default = tags.into_iter().next().ok_or_else(|| Error::NotFound(image.to_string()))?;
        Ok((default, count))
    }
}

pub async fn get_resources(
    State(ctx): State<Arc<Ctx>>,
    Path(group): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let backend = ctx
        .backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    let repo_names = full_catalog(&ctx, &backend)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let image_ids: Vec<String> = repo_names.iter().map(|r| codec::encode_image_name(r)).collect();

    // Two-phase filtering (spec.md 4.4/9): phase 1 already ran inside `index_candidates` over
    // the cheap name index. What's left is phase 2 -- candidates whose surviving clauses need a
    // projected document to evaluate. Those are the only ones charged against the bounded
    // enrichment budget; candidates matched on `name` alone still need a default-version lookup
    // (isdefault/versionid are mandatory, spec.md 3) but that's not "enrichment" for budget
    // purposes. Every candidate still fetches through one shared, order-preserving, bounded
    // concurrency pool so a large catalog page doesn't serialize one upstream round trip at a
    // time.
    let mut enrich_used = 0usize;
    let max_enrich = ctx.max_enrich_fetches;
    let tasks: Vec<_> = flags
        .filter
        .index_candidates(&image_ids)
        .into_iter()
        .map(|(image_id, groups)| {
            let needs_enrichment = groups.iter().any(|g| g.clauses.iter().any(|c| c.attr != "name"));
            let allowed = if needs_enrichment {
                if enrich_used < max_enrich {
                    enrich_used += 1;
                    true
                } else {
                    false
                }
            } else {
                true
            };
            (image_id, groups, needs_enrichment, allowed)
        })
        .collect();

    let dropped = tasks.iter().filter(|(_, _, needs, allowed)| *needs && !*allowed).count();
    if dropped > 0 {
        warn!(
            "dropped {dropped} attribute-filtered candidate(s) in {} over the enrichment fetch cap ({max_enrich})",
            backend.name
        );
    }

    let mut docs: Vec<(String, Value)> = stream::iter(tasks.into_iter().map(
        |(image_id, groups, needs_enrichment, allowed)| {
            let ctx = &ctx;
            let backend = &backend;
            let base = &base;
            let flags = &flags;
            async move {
                if !allowed {
                    return None;
                }
                let repo = codec::decode_image_name(&image_id);
                let (version, versionscount) = default_version_and_count(ctx, backend, &repo).await.ok()?;
                let mut doc =
                    entity::resource_document(base, &backend.name, &image_id, &version, versionscount);
                if needs_enrichment
                    && !flags.filter.matches_enriched(&groups, &Value::Object(doc.clone()))
                {
                    return None;
                }
                flags.strip_and_annotate(&mut doc);
                Some((image_id, Value::Object(doc)))
            }
        },
    ))
    .buffered(DEFAULT_VERSION_CONCURRENCY)
    .filter_map(|x| async move { x })
    .collect()
    .await;
    if let Some(sort) = &flags.sort {
        sort.apply(&mut docs, |(_, v)| v);
    }
    let path = format!("/containerregistries/{group}/images");
    Ok(paginate_response(&base, &path, docs, &flags))
}

pub async fn get_resource(
    State(ctx): State<Arc<Ctx>>,
    Path((group, image_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let backend = ctx
        .backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    let repo = codec::decode_image_name(&image_id);
    let (version, versionscount) = default_version_and_count(&ctx, &backend, &repo)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let mut doc = entity::resource_document(&base, &backend.name, &image_id, &version, versionscount);
    check_schema(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    check_epoch(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    if flags.inline.wants("versions") {
        let versions = build_versions_map(&ctx, &base, &backend, &image_id, &repo, &version)
            .await
            .map_err(|e| handler_err(e, &headers, ctx.dev))?;
        doc.insert("versions".to_string(), Value::Object(versions));
    }
    flags.strip_and_annotate(&mut doc);
    Ok(ok_json(&Value::Object(doc)))
}

pub async fn get_meta(
    State(ctx): State<Arc<Ctx>>,
    Path((group, image_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let backend = ctx
        .backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    let repo = codec::decode_image_name(&image_id);
    let version = default_version(&ctx, &backend, &repo)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let mut doc = entity::meta_document(&base, &backend.name, &image_id, &version);
    check_epoch(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    flags.strip_and_annotate(&mut doc);
    Ok(ok_json(&Value::Object(doc)))
}

pub async fn get_doc(
    State(ctx): State<Arc<Ctx>>,
    Path((group, image_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    ctx.backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    Ok(ok_json(&entity::doc_stub(&base, &group, &image_id)))
}

async fn build_versions_map(
    ctx: &Ctx,
    base: &str,
    backend: &xrmodel::Backend,
    image_id: &str,
    repo: &str,
    default_version_id: &str,
) -> Result<Map<String, Value>, Error> {
    let tags = ctx.client.get_tags_list(&backend.registry_url, repo, &backend.auth()).await?;
    let entries: Vec<(String, Map<String, Value>)> = stream::iter(tags.into_iter().map(|tag| {
        let is_default = tag == default_version_id;
        async move {
            let doc = projected_version_document(ctx, base, backend, image_id, repo, &tag, is_default).await?;
            Ok::<_, Error>((tag, doc))
        }
    }))
    .buffered(DEFAULT_VERSION_CONCURRENCY)
    .collect::<Vec<_>>()
    .await
    .into_iter()
    .collect::<Result<Vec<_>, Error>>()?;

    let mut map = Map::new();
    for (tag, doc) in entries {
        map.insert(tag, Value::Object(doc));
    }
    Ok(map)
}

pub async fn get_versions(
    State(ctx): State<Arc<Ctx>>,
    Path((group, image_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let backend = ctx
        .backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    let repo = codec::decode_image_name(&image_id);
    let default = default_version(&ctx, &backend, &repo)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let versions = build_versions_map(&ctx, &base, &backend, &image_id, &repo, &default)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let mut docs: Vec<(String, Value)> = versions.into_iter().collect();
    if let Some(sort) = &flags.sort {
        sort.apply(&mut docs, |(_, v)| v);
    }
    let path = format!("/containerregistries/{group}/images/{image_id}/versions");
    Ok(paginate_response(&base, &path, docs, &flags))
}

async fn projected_version_document(
    ctx: &Ctx,
    base: &str,
    backend: &xrmodel::Backend,
    image_id: &str,
    repo: &str,
    tag: &str,
    is_default: bool,
) -> Result<Map<String, Value>, Error> {
    if let Some(cached) = ctx.cache.read(&backend.name, repo, tag) {
        if let Value::Object(map) = cached {
            return Ok(map);
        }
    }
    let version = xrmodel::project_version(&ctx.client, &backend.registry_url, repo, tag, &backend.auth()).await?;
    let doc = entity::version_document(
        base,
        &backend.name,
        image_id,
        &backend.registry_url,
        repo,
        &version,
        is_default,
    );
    ctx.cache.write(&backend.name, repo, tag, &Value::Object(doc.clone()));
    Ok(doc)
}

pub async fn get_version(
    State(ctx): State<Arc<Ctx>>,
    Path((group, image_id, vid)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let base = base_url(&headers);
    let flags = parse_flags(query.as_deref()).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let backend = ctx
        .backends
        .get(&group)
        .ok_or_else(|| handler_err(Error::UnknownBackend(group.clone()), &headers, ctx.dev))?;
    let repo = codec::decode_image_name(&image_id);
    let default = default_version(&ctx, &backend, &repo)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    let mut doc = projected_version_document(&ctx, &base, &backend, &image_id, &repo, &vid, vid == default)
        .await
        .map_err(|e| handler_err(e, &headers, ctx.dev))?;
    check_schema(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    check_epoch(&flags, &doc).map_err(|e| handler_err(e, &headers, ctx.dev))?;
    flags.strip_and_annotate(&mut doc);
    Ok(ok_json(&Value::Object(doc)))
}

/// Slices an already filtered+sorted list by `limit`/`offset` and wraps it in the RFC 5988
/// `Link` header (spec.md 4.5 step 4 / 8.4).
fn paginate_response(base: &str, path: &str, docs: Vec<(String, Value)>, flags: &Flags) -> impl IntoResponse {
    let page = Page::compute(docs.len(), flags.limit, flags.offset);
    let slice = &docs[page.items_start..page.items_end];
    let mut map = Map::new();
    for (id, doc) in slice {
        map.insert(id.clone(), doc.clone());
    }
    let body = serde_json::to_vec(&Value::Object(map)).unwrap_or_else(|_| b"{}".to_vec());
    let link = page.link_header(&format!("{base}{path}"));
    let mut headers = entity_headers(&body);
    headers.remove(header::ETAG);
    if let Ok(value) = HeaderValue::from_str(&link) {
        headers.insert(header::LINK, value);
    }
    (StatusCode::OK, headers, body)
}

/// Axum middleware stripping a trailing `$details` path segment and tagging the response with
/// `X-Registry-Details: true` (spec.md 4.5).
pub async fn strip_details(
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let is_details = req.uri().path().ends_with("$details");
    if is_details {
        let stripped = req.uri().path().trim_end_matches("$details").trim_end_matches('/').to_string();
        let stripped = if stripped.is_empty() { "/".to_string() } else { stripped };
        let mut parts = req.uri().clone().into_parts();
        let path_and_query = match req.uri().query() {
            Some(q) => format!("{stripped}?{q}"),
            None => stripped,
        };
        parts.path_and_query = path_and_query.parse().ok();
        if let Ok(uri) = http::Uri::from_parts(parts) {
            *req.uri_mut() = uri;
        }
    }
    let mut response = next.run(req).await;
    if is_details {
        response
            .headers_mut()
            .insert("x-registry-details", HeaderValue::from_static("true"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_falls_back_to_http_and_localhost() {
        let headers = HeaderMap::new();
        assert_eq!(base_url(&headers), "http://localhost");
    }

    #[test]
    fn check_epoch_rejects_mismatch() {
        let flags = Flags { epoch: Some(2), ..Flags::default() };
        let mut doc = Map::new();
        doc.insert("epoch".to_string(), serde_json::json!(1));
        assert!(check_epoch(&flags, &doc).is_err());
    }

    #[test]
    fn check_schema_requires_common_attributes() {
        let flags = Flags { schema: true, ..Flags::default() };
        let doc = Map::new();
        assert!(check_schema(&flags, &doc).is_err());
    }
}
