//! The xRegistry document model (spec.md 3): flat JSON objects carrying the common attributes
//! (`xid`, `self`, `epoch`, `createdat`, `modifiedat`, `readonly`) plus entity-specific fields.
//!
//! Documents are built as `serde_json::Map` rather than typed structs because the flag
//! pipeline (C4) operates on them generically -- stripping `noreadonly`/`specversion`,
//! injecting `docs`, inlining nested collections -- and a dense matrix of `Option` fields
//! would fight that rather than help it.

use serde_json::{Map, Value, json};

use crate::backend::Backend;
use crate::projector::VersionDoc;
use crate::time;

pub const GROUPS_TYPE: &str = "containerregistries";
pub const RESOURCE_TYPE: &str = "images";
pub const SPEC_VERSION: &str = "1.0";

fn obj(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Attributes every entity carries (spec.md 3, "xRegistry common attributes").
fn common_attrs(xid: &str, base_url: &str, createdat: &str, modifiedat: &str) -> Map<String, Value> {
    obj([
        ("xid", json!(xid)),
        ("self", json!(format!("{base_url}{xid}"))),
        ("epoch", json!(1u64)),
        ("createdat", json!(createdat)),
        ("modifiedat", json!(modifiedat)),
        ("readonly", json!(true)),
    ])
}

pub fn registry_document(base_url: &str, backend_count: usize, started_at: &str) -> Map<String, Value> {
    let mut doc = common_attrs("/", base_url, started_at, started_at);
    doc.insert("specversion".to_string(), json!(SPEC_VERSION));
    doc.insert("registryid".to_string(), json!("oci-wrapper"));
    doc.insert(
        format!("{GROUPS_TYPE}count"),
        json!(backend_count),
    );
    doc.insert(
        format!("{GROUPS_TYPE}url"),
        json!(format!("{base_url}/{GROUPS_TYPE}")),
    );
    doc.insert("capabilities".to_string(), json!(capabilities_document()));
    doc
}

pub fn capabilities_document() -> Value {
    json!({
        "apis": ["/capabilities", "/model", format!("/{GROUPS_TYPE}")],
        "flags": [
            "filter", "sort", "inline", "doc", "collections", "epoch",
            "schema", "noreadonly", "specversion", "limit", "offset",
        ],
        "mutable": [],
        "pagination": true,
    })
}

pub fn model_document() -> Value {
    json!({
        "groups": {
            GROUPS_TYPE: {
                "plural": GROUPS_TYPE,
                "singular": "containerregistry",
                "resources": {
                    RESOURCE_TYPE: {
                        "plural": RESOURCE_TYPE,
                        "singular": "image",
                        "versions": true,
                    }
                }
            }
        }
    })
}

/// `Group` (spec.md 3): represents one configured `Backend`.
pub fn group_document(base_url: &str, backend: &Backend, started_at: &str) -> Map<String, Value> {
    let xid = format!("/{GROUPS_TYPE}/{}", backend.name);
    let mut doc = common_attrs(&xid, base_url, started_at, started_at);
    doc.insert(
        format!("{GROUPS_TYPE}id"),
        json!(backend.name),
    );
    doc.insert(
        format!("{RESOURCE_TYPE}url"),
        json!(format!("{base_url}{xid}/{RESOURCE_TYPE}")),
    );
    doc
}

/// `Resource` (spec.md 3): one repository within one backend.
///
/// `default_version`/`is_multi_tag_default` selection follows spec.md 4.5's state machine:
/// `"latest"` if present among tags, else the first tag in upstream catalog order.
pub fn resource_document(
    base_url: &str,
    backend_name: &str,
    image_id: &str,
    default_version: &str,
    versionscount: usize,
) -> Map<String, Value> {
    let xid = format!("/{GROUPS_TYPE}/{backend_name}/{RESOURCE_TYPE}/{image_id}");
    let now = time::to_rfc3339(time::now());
    let mut doc = common_attrs(&xid, base_url, &now, &now);
    doc.insert("imageid".to_string(), json!(image_id));
    doc.insert("versionid".to_string(), json!(default_version));
    doc.insert("isdefault".to_string(), json!(true));
    doc.insert("versionscount".to_string(), json!(versionscount));
    doc.insert(
        "versionsurl".to_string(),
        json!(format!("{base_url}{xid}/versions")),
    );
    doc.insert("metaurl".to_string(), json!(format!("{base_url}{xid}/meta")));
    doc
}

/// `Meta` (spec.md 3): sibling of a Resource carrying registry-level metadata.
pub fn meta_document(
    base_url: &str,
    backend_name: &str,
    image_id: &str,
    default_version: &str,
) -> Map<String, Value> {
    let resource_xid = format!("/{GROUPS_TYPE}/{backend_name}/{RESOURCE_TYPE}/{image_id}");
    let xid = format!("{resource_xid}/meta");
    let now = time::to_rfc3339(time::now());
    let mut doc = common_attrs(&xid, base_url, &now, &now);
    doc.insert("defaultversionid".to_string(), json!(default_version));
    doc.insert(
        "defaultversionurl".to_string(),
        json!(format!(
            "{base_url}{resource_xid}/versions/{default_version}"
        )),
    );
    // re-evaluated per request (spec.md 4.5): the "default version" is never sticky, since it
    // is recomputed from the tag list on every call rather than pinned once.
    doc.insert("defaultversionsticky".to_string(), json!(false));
    doc
}

/// `Version` (spec.md 3 + the C3 projector output).
pub fn version_document(
    base_url: &str,
    backend_name: &str,
    image_id: &str,
    registry_url: &str,
    repo: &str,
    version: &VersionDoc,
    is_default: bool,
) -> Map<String, Value> {
    let resource_xid = format!("/{GROUPS_TYPE}/{backend_name}/{RESOURCE_TYPE}/{image_id}");
    let xid = format!("{resource_xid}/versions/{}", version.versionid);
    let mut doc = common_attrs(&xid, base_url, &version.createdat, &version.modifiedat);
    doc.insert("versionid".to_string(), json!(version.versionid));
    doc.insert("isdefault".to_string(), json!(is_default));
    doc.insert("metadata".to_string(), json!(version.metadata));
    doc.insert("layers".to_string(), json!(version.layers));
    if let Some(history) = &version.build_history {
        doc.insert("build_history".to_string(), json!(history));
    }
    doc.insert(
        "urls".to_string(),
        json!({
            // a usable OCI reference -- the registry host and slash-form repo, not the
            // facade's backend alias or the tilde-encoded xRegistry id.
            "pull": format!("{registry_url}/{repo}:{}", version.versionid),
            "manifest": format!("{base_url}{resource_xid}/versions/{}", version.versionid),
        }),
    );
    doc
}

pub fn doc_stub(base_url: &str, backend_name: &str, image_id: &str) -> Value {
    json!({
        "title": format!("{image_id} (via {backend_name})"),
        "self": format!("{base_url}/{GROUPS_TYPE}/{backend_name}/{RESOURCE_TYPE}/{image_id}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_document_carries_required_attributes() {
        let doc = resource_document("https://x", "dockerhub", "nginx", "latest", 3);
        assert_eq!(doc["xid"], json!("/containerregistries/dockerhub/images/nginx"));
        assert_eq!(doc["versionid"], json!("latest"));
        assert_eq!(doc["isdefault"], json!(true));
        assert_eq!(doc["versionscount"], json!(3));
        assert_eq!(doc["epoch"], json!(1));
    }

    #[test]
    fn meta_document_is_never_sticky() {
        let doc = meta_document("https://x", "dockerhub", "nginx", "latest");
        assert_eq!(doc["defaultversionsticky"], json!(false));
        assert_eq!(doc["defaultversionid"], json!("latest"));
    }

    #[test]
    fn registry_document_counts_backends() {
        let doc = registry_document("https://x", 2, "2024-01-01T00:00:00.000Z");
        assert_eq!(doc["registryid"], json!("oci-wrapper"));
        assert_eq!(doc["containerregistriescount"], json!(2));
    }
}
