//! C3: turns an OCI manifest plus its config blob into the flat `Version` document the
//! router serves. Handles schema-1 (legacy Docker), Docker v2 / OCI manifests, and
//! multi-platform indexes/manifest-lists (picking linux/amd64, else the first entry --
//! spec.md 4.3's tie-break, generalized here rather than in the upstream client since the
//! client has no notion of a caller-preferred platform).

use oci_spec::image::{Descriptor, ImageConfiguration, ImageManifest};
use ocidist::{Auth, Client, Manifest, RawManifest};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::time;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Ocidist(#[from] ocidist::Error),
    #[error(transparent)]
    OciSpec(#[from] oci_spec::OciSpecError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("manifest not found")]
    NotFound,
}

/// `description` is probed in this priority order (spec.md 4.3 step 3); the first label
/// present wins, then the image title, then a generic default.
const DESCRIPTION_LABEL_KEYS: &[&str] = &[
    "org.opencontainers.image.description",
    "io.metadata.description",
    "description",
    "DESCRIPTION",
    "org.label-schema.description",
    "maintainer.description",
];

/// The nine (ten, counting `created`) well-known `org.opencontainers.image.*` keys carried
/// verbatim into `metadata.oci_labels` (spec.md 3).
const OCI_LABEL_KEYS: &[&str] = &[
    "version",
    "revision",
    "source",
    "documentation",
    "licenses",
    "vendor",
    "authors",
    "url",
    "title",
    "created",
];

/// The projected document for one resolved tag/digest, ready for `entity::version_document`.
pub struct VersionDoc {
    pub versionid: String,
    pub createdat: String,
    pub modifiedat: String,
    pub metadata: Value,
    pub layers: Value,
    pub build_history: Option<Value>,
}

fn first_label<'a>(labels: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| labels.get(*k)).and_then(Value::as_str)
}

fn descriptor_platform_json(d: &Descriptor) -> Value {
    let platform = d.platform().as_ref();
    json!({
        "architecture": platform.map(|p| p.architecture().to_string()),
        "os": platform.map(|p| p.os().to_string()),
        "variant": platform.and_then(|p| p.variant().clone()),
        "digest": d.digest().to_string(),
        "size": d.size(),
        "mediaType": d.media_type().to_string(),
    })
}

/// Resolves `tag_or_digest` against `registry/repo`, following a manifest-list/index down to
/// a single-platform manifest, fetching its config blob, and projecting the result.
pub async fn project_version(
    client: &Client,
    registry: &str,
    repo: &str,
    tag_or_digest: &str,
    auth: &Auth,
) -> Result<VersionDoc, Error> {
    let raw = client
        .get_manifest(registry, repo, tag_or_digest, auth)
        .await?
        .ok_or(Error::NotFound)?;

    match raw.classify()? {
        Manifest::Index(index) => {
            let descriptor = pick_platform_descriptor(&index)?;
            let available_platforms: Vec<Value> =
                index.manifests().iter().map(descriptor_platform_json).collect();
            let digest = descriptor.digest().to_string();
            let raw = client
                .get_manifest(registry, repo, &digest, auth)
                .await?
                .ok_or(Error::NotFound)?;
            let mut doc = project_image_manifest(
                client,
                registry,
                repo,
                &raw,
                tag_or_digest,
                auth,
                descriptor.platform().as_ref(),
            )
            .await?;
            set_multi_platform(&mut doc, &descriptor, available_platforms);
            Ok(doc)
        }
        Manifest::Image(_) => {
            project_image_manifest(client, registry, repo, &raw, tag_or_digest, auth, None).await
        }
        Manifest::Schema1(doc) => Ok(project_schema1(&doc, tag_or_digest)),
    }
}

fn pick_platform_descriptor(index: &oci_spec::image::ImageIndex) -> Result<Descriptor, Error> {
    let manifests = index.manifests();
    let preferred = manifests.iter().find(|d| {
        d.platform()
            .as_ref()
            .map(|p| p.os().to_string() == "linux" && p.architecture().to_string() == "amd64")
            .unwrap_or(false)
    });
    preferred
        .or_else(|| manifests.first())
        .cloned()
        .ok_or(Error::NotFound)
}

/// Stamps the multi-platform fields onto an already-projected sub-manifest document. The
/// sub-manifest's own platform (from its descriptor in the index) was already passed into
/// `project_image_manifest` as a fallback -- the config blob overrides it when fetched, so
/// this only adds the list-level facts.
fn set_multi_platform(doc: &mut VersionDoc, _picked: &Descriptor, available_platforms: Vec<Value>) {
    if let Value::Object(metadata) = &mut doc.metadata {
        metadata.insert("is_multi_platform".to_string(), json!(true));
        metadata.insert("available_platforms".to_string(), json!(available_platforms));
    }
}

async fn project_image_manifest(
    client: &Client,
    registry: &str,
    repo: &str,
    raw: &RawManifest,
    tag_or_digest: &str,
    auth: &Auth,
    fallback_platform: Option<&oci_spec::image::Platform>,
) -> Result<VersionDoc, Error> {
    let manifest: ImageManifest = ImageManifest::from_reader(std::io::Cursor::new(&raw.data))?;
    let config_descriptor = manifest.config();

    let mut metadata = Map::new();
    metadata.insert(
        "digest".to_string(),
        json!(raw.digest.as_ref().map(|d| d.to_string())),
    );
    metadata.insert(
        "manifest_mediatype".to_string(),
        json!(manifest.media_type().as_ref().map(|m| m.to_string())),
    );
    metadata.insert("schema_version".to_string(), json!(manifest.schema_version()));
    metadata.insert("is_multi_platform".to_string(), json!(false));

    let layers: Vec<Value> = manifest
        .layers()
        .iter()
        .map(|l| {
            json!({
                "digest": l.digest().to_string(),
                "size": l.size(),
                "mediaType": l.media_type().to_string(),
            })
        })
        .collect();
    metadata.insert("layers_count".to_string(), json!(layers.len()));

    // step 2/3 fallback (spec.md 4.3/4.7): a config blob fetch that comes back 401/403 is not
    // fatal -- the manifest-level facts already gathered above are still returned.
    let config_fetch = client.get_blob(registry, repo, config_descriptor.digest(), auth).await;
    let config_bytes = match config_fetch {
        Ok(bytes) => bytes,
        Err(ocidist::Error::StatusNotOk(s))
            if s == StatusCode::UNAUTHORIZED || s == StatusCode::FORBIDDEN =>
        {
            None
        }
        Err(e) => return Err(e.into()),
    };

    let config: Option<ImageConfiguration> = config_bytes
        .as_ref()
        .map(|bytes| serde_json::from_slice(bytes))
        .transpose()?;

    let created = match &config {
        Some(config) => {
            apply_config(&mut metadata, config, tag_or_digest);
            config.created().as_deref().and_then(time::parse_and_normalize)
        }
        None => {
            // spec.md 4.3: architecture/os are taken from the index descriptor's platform when
            // the config blob can't be fetched; only a non-indexed single manifest has neither.
            metadata.insert(
                "architecture".to_string(),
                json!(fallback_platform.map(|p| p.architecture().to_string()).unwrap_or_else(|| "unknown".to_string())),
            );
            metadata.insert(
                "os".to_string(),
                json!(fallback_platform.map(|p| p.os().to_string()).unwrap_or_else(|| "unknown".to_string())),
            );
            metadata.insert(
                "description".to_string(),
                json!(format!("Container image tag {tag_or_digest}")),
            );
            None
        }
    }
    .unwrap_or_else(|| time::to_rfc3339(time::now()));

    metadata.insert(
        "size_bytes".to_string(),
        json!(compute_size_bytes(config_descriptor, manifest.layers())),
    );

    let build_history = config.as_ref().and_then(|c| c.history().clone()).map(|history| {
        json!(
            history
                .iter()
                .filter(|h| h.created_by().is_some())
                .enumerate()
                .map(|(i, h)| {
                    json!({
                        "step": i + 1,
                        "created": h.created().as_deref().and_then(time::parse_and_normalize),
                        "created_by": h.created_by(),
                        "empty_layer": h.empty_layer().unwrap_or(false),
                    })
                })
                .collect::<Vec<_>>()
        )
    });

    Ok(VersionDoc {
        versionid: tag_or_digest.to_string(),
        createdat: created.clone(),
        modifiedat: created,
        metadata: Value::Object(metadata),
        layers: json!(layers),
        build_history,
    })
}

/// Folds the config blob's `architecture`/`os`/`Config.Labels`/runtime fields into `metadata`
/// (spec.md 4.3 step 3). Config values are authoritative over the index descriptor's platform.
fn apply_config(metadata: &mut Map<String, Value>, config: &ImageConfiguration, tag_or_digest: &str) {
    metadata.insert("architecture".to_string(), json!(config.architecture().to_string()));
    metadata.insert("os".to_string(), json!(config.os().to_string()));

    let default_description = format!("Container image tag {tag_or_digest}");
    let Some(cfg) = config.config().as_ref() else {
        metadata.insert("description".to_string(), json!(default_description));
        return;
    };

    let labels: Map<String, Value> = cfg
        .labels()
        .clone()
        .map(|m| m.into_iter().map(|(k, v)| (k, json!(v))).collect())
        .unwrap_or_default();

    let description = first_label(&labels, DESCRIPTION_LABEL_KEYS)
        .or_else(|| labels.get("org.opencontainers.image.title").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or(default_description);
    metadata.insert("description".to_string(), json!(description));

    let mut oci_labels = Map::new();
    for key in OCI_LABEL_KEYS {
        let full_key = format!("org.opencontainers.image.{key}");
        if let Some(v) = labels.get(&full_key) {
            oci_labels.insert((*key).to_string(), v.clone());
        }
    }
    if !oci_labels.is_empty() {
        metadata.insert("oci_labels".to_string(), Value::Object(oci_labels));
    }

    if let Some(env) = cfg.env().clone() {
        metadata.insert("environment".to_string(), json!(env));
    }
    if let Some(entrypoint) = cfg.entrypoint().clone() {
        metadata.insert("entrypoint".to_string(), json!(entrypoint));
    }
    if let Some(cmd) = cfg.cmd().clone() {
        metadata.insert("cmd".to_string(), json!(cmd));
    }
    if let Some(user) = cfg.user().clone() {
        metadata.insert("user".to_string(), json!(user));
    }
    if let Some(working_dir) = cfg.working_dir().clone() {
        metadata.insert("working_dir".to_string(), json!(working_dir));
    }
    if let Some(exposed_ports) = cfg.exposed_ports().clone() {
        metadata.insert("exposed_ports".to_string(), json!(exposed_ports));
    }
    if let Some(volumes) = cfg.volumes().clone() {
        metadata.insert("volumes".to_string(), json!(volumes));
    }
}

/// `config.size` (the manifest's config descriptor) when present, else the sum of layer sizes
/// when every layer reports one, else omitted entirely (spec.md 4.3 step 4).
fn compute_size_bytes(config_descriptor: &Descriptor, layers: &[Descriptor]) -> Option<u64> {
    let config_size = config_descriptor.size();
    if config_size > 0 {
        return Some(config_size);
    }
    let mut total = 0u64;
    for l in layers {
        let size = l.size();
        if size == 0 {
            return None;
        }
        total += size;
    }
    Some(total)
}

#[derive(Deserialize)]
struct Schema1Compat {
    architecture: Option<String>,
    created: Option<String>,
    os: Option<String>,
}

/// Schema-1 manifests carry no config digest at all; the "config" facts come from
/// `history[0].v1Compatibility` instead, and layers come from `fsLayers[*].blobSum` with no
/// declared size (spec.md 4.3's "legacy Docker" branch).
fn project_schema1(doc: &Value, tag_or_digest: &str) -> VersionDoc {
    let compat: Option<Schema1Compat> = doc
        .get("history")
        .and_then(|h| h.as_array())
        .and_then(|h| h.first())
        .and_then(|h0| h0.get("v1Compatibility"))
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str(s).ok());

    let architecture = compat
        .as_ref()
        .and_then(|c| c.architecture.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let os = compat.as_ref().and_then(|c| c.os.clone()).unwrap_or_else(|| "unknown".to_string());
    let created = compat
        .as_ref()
        .and_then(|c| c.created.as_deref())
        .and_then(time::parse_and_normalize)
        .unwrap_or_else(|| time::to_rfc3339(time::now()));

    let layers: Vec<Value> = doc
        .get("fsLayers")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l.get("blobSum").and_then(Value::as_str))
                .map(|blob_sum| {
                    json!({
                        "digest": blob_sum,
                        "size": Value::Null,
                        "mediaType": "application/vnd.docker.container.image.rootfs.diff+x-tar",
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let metadata = json!({
        "digest": Value::Null,
        "manifest_mediatype": "application/vnd.docker.distribution.manifest.v1+json",
        "schema_version": 1,
        "architecture": architecture,
        "os": os,
        "layers_count": layers.len(),
        "is_multi_platform": false,
        "description": format!("Container image tag {tag_or_digest}"),
    });

    VersionDoc {
        versionid: tag_or_digest.to_string(),
        createdat: created.clone(),
        modifiedat: created,
        metadata,
        layers: json!(layers),
        build_history: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_label_respects_priority_order() {
        let mut labels = Map::new();
        labels.insert(
            "org.label-schema.description".to_string(),
            json!("fallback"),
        );
        labels.insert(
            "org.opencontainers.image.description".to_string(),
            json!("preferred"),
        );
        assert_eq!(
            first_label(&labels, DESCRIPTION_LABEL_KEYS),
            Some("preferred")
        );
    }

    #[test]
    fn first_label_falls_back_when_preferred_absent() {
        let mut labels = Map::new();
        labels.insert("description".to_string(), json!("plain"));
        assert_eq!(first_label(&labels, DESCRIPTION_LABEL_KEYS), Some("plain"));
    }

    #[test]
    fn schema1_projection_has_no_build_history_and_unknown_sizes() {
        let doc = json!({
            "fsLayers": [{"blobSum": "sha256:abc"}],
            "history": [{"v1Compatibility": "{\"architecture\":\"amd64\",\"os\":\"linux\",\"created\":\"2021-01-01T00:00:00Z\"}"}],
        });
        let v = project_schema1(&doc, "latest");
        assert_eq!(v.versionid, "latest");
        assert!(v.build_history.is_none());
        assert_eq!(v.metadata["architecture"], json!("amd64"));
        assert_eq!(v.layers[0]["size"], Value::Null);
    }

    #[test]
    fn compute_size_bytes_sums_layers_when_config_size_unknown() {
        use oci_spec::image::{DescriptorBuilder, MediaType, Sha256Digest};
        use std::str::FromStr;

        let zero_digest: oci_spec::image::Digest =
            Sha256Digest::from_str(&"0".repeat(64)).unwrap().into();
        let one_digest: oci_spec::image::Digest =
            Sha256Digest::from_str(&"1".repeat(64)).unwrap().into();

        let config = DescriptorBuilder::default()
            .media_type(MediaType::ImageConfig)
            .digest(zero_digest)
            .size(0u64)
            .build()
            .unwrap();
        let layer = |size: u64| {
            DescriptorBuilder::default()
                .media_type(MediaType::ImageLayerGzip)
                .digest(one_digest.clone())
                .size(size)
                .build()
                .unwrap()
        };
        let layers = vec![layer(10), layer(20)];
        assert_eq!(compute_size_bytes(&config, &layers), Some(30));
    }
}
