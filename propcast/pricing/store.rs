use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bundle::ModelBundle;

const FORMAT: &str = "propcast-model-bundle";
const FORMAT_VERSION: u32 = 1;

/// Errors raised by bundle persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing has been persisted yet.
    #[error("no persisted bundle at {0}")]
    NotFound(PathBuf),
    /// The persisted bundle cannot be used.
    #[error("persisted bundle is corrupt: {0}")]
    Corrupt(String),
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Persistence seam for model bundles.
pub trait ModelStore: Send + Sync {
    /// Loads the persisted bundle.
    fn load(&self) -> Result<ModelBundle, StoreError>;

    /// Persists a bundle, replacing any previous one.
    fn save(&self, bundle: &ModelBundle) -> Result<(), StoreError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<B> {
    format: String,
    format_version: u32,
    bundle: B,
}

/// Stores the bundle as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    path: PathBuf,
}

impl JsonModelStore {
    /// Creates a store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Bundle path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "bundle.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ModelStore for JsonModelStore {
    fn load(&self) -> Result<ModelBundle, StoreError> {
        let contents = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        let envelope: Envelope<ModelBundle> = serde_json::from_slice(&contents)
            .map_err(|err| StoreError::Corrupt(format!("{}: {err}", self.path.display())))?;
        if envelope.format != FORMAT {
            return Err(StoreError::Corrupt(format!(
                "unexpected format '{}'",
                envelope.format
            )));
        }
        if envelope.format_version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported format version {}",
                envelope.format_version
            )));
        }
        envelope
            .bundle
            .validate()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        Ok(envelope.bundle)
    }

    fn save(&self, bundle: &ModelBundle) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let envelope = Envelope {
            format: FORMAT.to_string(),
            format_version: FORMAT_VERSION,
            bundle,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(io::Error::from)?;
        let temp = self.temp_path();
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::constant_bundle;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_restores_bundle() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("models/bundle.json"));
        let bundle = constant_bundle(11_000.0, Some(0.06));
        store.save(&bundle).unwrap();
        assert!(!store.temp_path().exists());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.id(), bundle.id());
        assert_eq!(loaded.encoder().columns(), bundle.encoder().columns());
        assert!(loaded.growth_model().is_some());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load(), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn garbage_and_foreign_formats_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        fs::write(&path, b"not json at all").unwrap();
        let store = JsonModelStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));

        let bundle = constant_bundle(11_000.0, None);
        let foreign = serde_json::json!({
            "format": "pickle",
            "formatVersion": 1,
            "bundle": bundle,
        });
        fs::write(&path, serde_json::to_vec(&foreign).unwrap()).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn inconsistent_bundle_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("bundle.json"));
        store.save(&constant_bundle(9_000.0, None)).unwrap();
        let mut raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        raw["bundle"]["priceModel"]["n_features"] = serde_json::json!(999);
        fs::write(store.path(), serde_json::to_vec(&raw).unwrap()).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }
}
