//! C2: a filesystem-backed cache of the exact JSON document that would have been served for a
//! given `(backend, image, version)` triple (spec.md 4.2/6). This is a *projection* cache, not
//! an upstream-truth cache -- corrupt or missing files are treated as a cache miss, never as an
//! error, matching the "cache corruption" design note in spec.md 9.

use std::path::PathBuf;

use log::warn;
use serde_json::Value;

const ALL_VERSIONS: &str = "_all_versions_";

#[derive(Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: PathBuf) -> Self {
        ResponseCache { root }
    }

    fn path_for(&self, backend: &str, image: &str, version: &str) -> PathBuf {
        let version = if version.is_empty() { ALL_VERSIONS } else { version };
        self.root
            .join(sanitize(backend))
            .join(sanitize(image))
            .join(format!("{}.json", sanitize(version)))
    }

    /// Missing file or parse error both read back as `None`; no exceptions escape (spec.md 4.2).
    pub fn read(&self, backend: &str, image: &str, version: &str) -> Option<Value> {
        let path = self.path_for(backend, image, version);
        let data = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("cache entry at {path:?} failed to parse, treating as absent: {e}");
                None
            }
        }
    }

    /// Best-effort: directories are created on demand, and any failure is logged rather than
    /// surfaced to the caller (spec.md 4.2's "write is best-effort").
    pub fn write(&self, backend: &str, image: &str, version: &str, document: &Value) {
        let path = self.path_for(backend, image, version);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("cache write: could not create {parent:?}: {e}");
                return;
            }
        }
        let bytes = match serde_json::to_vec(document) {
            Ok(b) => b,
            Err(e) => {
                warn!("cache write: could not serialize document for {path:?}: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, bytes) {
            warn!("cache write: could not write {path:?}: {e}");
        }
    }
}

/// Filesystem-safe component: `/` is replaced (upstream image names commonly nest, e.g.
/// `library/nginx`) and any other path-hostile byte is collapsed to `_`.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_slashes() {
        assert_eq!(sanitize("library/nginx"), "library_nginx");
        assert_eq!(sanitize("dockerhub"), "dockerhub");
    }

    #[test]
    fn missing_entry_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf());
        assert!(cache.read("dockerhub", "library/nginx", "latest").is_none());
    }

    #[test]
    fn corrupt_entry_reads_as_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf());
        let path = cache.path_for("dockerhub", "nginx", "latest");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();
        assert!(cache.read("dockerhub", "nginx", "latest").is_none());
    }

    #[test]
    fn round_trips_a_written_document() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf());
        let doc = serde_json::json!({"versionid": "latest"});
        cache.write("dockerhub", "nginx", "latest", &doc);
        assert_eq!(cache.read("dockerhub", "nginx", "latest"), Some(doc));
    }

    #[test]
    fn empty_version_uses_all_versions_marker() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf());
        let path = cache.path_for("dockerhub", "nginx", "");
        assert!(path.ends_with("_all_versions_.json"));
    }
}
