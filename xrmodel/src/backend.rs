//! C7: the in-memory table of configured upstream registries. Read-only after process start;
//! modeled as a process-wide immutable table behind an `ArcSwap`, the same idiom the upstream
//! client uses for its own auth store -- any future live-reload becomes an atomic swap of the
//! whole table rather than a mutation of individual entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;

/// A backend's password. Never logged, never serialized, never placed in the response cache.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(s)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

const DEFAULT_CATALOG_PATH: &str = "/v2/_catalog";
const CATALOG_DISABLED: &str = "disabled";

#[derive(Clone, Debug)]
pub struct Backend {
    pub name: String,
    pub registry_url: String,
    pub username: Option<String>,
    pub password: Option<Secret>,
    catalog_path: Option<String>,
}

impl Backend {
    /// `None` means catalog listing is disabled for this backend (spec.md 4.7).
    pub fn catalog_path(&self) -> Option<&str> {
        self.catalog_path.as_deref()
    }

    pub fn auth(&self) -> ocidist::Auth {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                ocidist::Auth::UserPass(user.clone(), pass.expose().to_string())
            }
            _ => ocidist::Auth::Anonymous,
        }
    }
}

#[derive(Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(rename = "registryUrl")]
    pub registry_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "catalogPath")]
    pub catalog_path: Option<String>,
}

impl From<BackendConfig> for Backend {
    fn from(c: BackendConfig) -> Self {
        let catalog_path = match c.catalog_path.as_deref() {
            Some(CATALOG_DISABLED) => None,
            Some(path) => Some(path.to_string()),
            None => Some(DEFAULT_CATALOG_PATH.to_string()),
        };
        Backend {
            name: c.name,
            registry_url: c.registry_url,
            username: c.username,
            password: c.password.map(Secret::from),
            catalog_path,
        }
    }
}

/// Loading precedence (spec.md 4.7): compiled-in defaults -> config-file list if present ->
/// full replacement by an environment-provided JSON list if set.
pub fn default_backends() -> Vec<Backend> {
    vec![
        BackendConfig {
            name: "dockerhub".to_string(),
            registry_url: "registry-1.docker.io".to_string(),
            username: None,
            password: None,
            catalog_path: Some(CATALOG_DISABLED.to_string()),
        }
        .into(),
        BackendConfig {
            name: "ghcr".to_string(),
            registry_url: "ghcr.io".to_string(),
            username: None,
            password: None,
            catalog_path: Some(CATALOG_DISABLED.to_string()),
        }
        .into(),
    ]
}

pub fn load_backends_from_json(data: &str) -> Result<Vec<Backend>, serde_json::Error> {
    let configs: Vec<BackendConfig> = serde_json::from_str(data)?;
    Ok(configs.into_iter().map(Backend::from).collect())
}

/// O(1) lookup by name; read-only after `new`.
#[derive(Clone)]
pub struct BackendTable {
    inner: Arc<ArcSwap<BTreeMap<String, Backend>>>,
}

impl BackendTable {
    pub fn new(backends: Vec<Backend>) -> Self {
        let map: BTreeMap<String, Backend> =
            backends.into_iter().map(|b| (b.name.clone(), b)).collect();
        BackendTable {
            inner: Arc::new(ArcSwap::from_pointee(map)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Backend> {
        self.inner.load().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.load().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_path_defaults() {
        let b: Backend = BackendConfig {
            name: "x".into(),
            registry_url: "r".into(),
            username: None,
            password: None,
            catalog_path: None,
        }
        .into();
        assert_eq!(b.catalog_path(), Some("/v2/_catalog"));
    }

    #[test]
    fn catalog_path_disabled() {
        let b: Backend = BackendConfig {
            name: "x".into(),
            registry_url: "r".into(),
            username: None,
            password: None,
            catalog_path: Some("disabled".into()),
        }
        .into();
        assert_eq!(b.catalog_path(), None);
    }

    #[test]
    fn table_lookup() {
        let table = BackendTable::new(default_backends());
        assert!(table.get("dockerhub").is_some());
        assert!(table.get("nonexistent").is_none());
    }
}
