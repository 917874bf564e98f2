//! Named persistence of trained classifiers, on disk or on a remote server.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::classification::TrainedClassifier;
use crate::error::{BoundaryError, Result};

/// Save, load and probe classifiers by name.
///
/// Saving under an existing name overwrites it, so repeated saves of the
/// same model leave the store in the same state.
pub trait ClassifierStore {
    fn save(&self, model: &TrainedClassifier, name: &str) -> Result<String>;
    fn load(&self, name: &str) -> Result<TrainedClassifier>;
    fn exists(&self, name: &str) -> Result<bool>;
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == "..";
    if bad {
        return Err(BoundaryError::Classifier(format!(
            "invalid classifier name '{}'",
            name
        )));
    }
    Ok(())
}

/// JSON files in a directory, one per classifier name.
#[derive(Debug, Clone)]
pub struct LocalClassifierStore {
    directory: PathBuf,
}

impl LocalClassifierStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        LocalClassifierStore {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

impl ClassifierStore for LocalClassifierStore {
    fn save(&self, model: &TrainedClassifier, name: &str) -> Result<String> {
        check_name(name)?;
        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(name);
        let tmp = path.with_extension("part");
        std::fs::write(&tmp, serde_json::to_vec(model)?)?;
        std::fs::rename(&tmp, &path)?;
        info!("Classifier saved to {:?}", path);
        Ok(name.to_string())
    }

    fn load(&self, name: &str) -> Result<TrainedClassifier> {
        check_name(name)?;
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(BoundaryError::ClassifierNotFound(name.to_string()));
        }
        let content = std::fs::read(&path)?;
        let model: TrainedClassifier = serde_json::from_slice(&content).map_err(|e| {
            BoundaryError::Classifier(format!("unable to read classifier {:?}: {}", path, e))
        })?;
        model.check_features()?;
        debug!("Classifier loaded from {:?}", path);
        Ok(model)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        check_name(name)?;
        Ok(self.path_for(name).is_file())
    }
}

/// Classifiers kept on an HTTP server under `<base>/classifiers/<name>`.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone)]
pub struct RemoteClassifierStore {
    base_url: url::Url,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "reqwest")]
impl RemoteClassifierStore {
    pub fn new(server_url: &str) -> Result<Self> {
        let mut base_url = url::Url::parse(server_url)
            .map_err(|e| BoundaryError::Config(format!("invalid classifier server url: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(RemoteClassifierStore { base_url, client })
    }

    pub fn url_for(&self, name: &str) -> Result<url::Url> {
        check_name(name)?;
        self.base_url
            .join("classifiers/")
            .and_then(|u| u.join(name))
            .map_err(|e| BoundaryError::Config(format!("invalid classifier url: {}", e)))
    }
}

#[cfg(feature = "reqwest")]
impl ClassifierStore for RemoteClassifierStore {
    fn save(&self, model: &TrainedClassifier, name: &str) -> Result<String> {
        let url = self.url_for(name)?;
        let response = self.client.put(url.clone()).json(model).send()?;
        if !response.status().is_success() {
            return Err(BoundaryError::Classifier(format!(
                "server returned {} when saving {}",
                response.status(),
                url
            )));
        }
        info!("Classifier saved to {}", url);
        Ok(name.to_string())
    }

    fn load(&self, name: &str) -> Result<TrainedClassifier> {
        let url = self.url_for(name)?;
        let response = self.client.get(url.clone()).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BoundaryError::ClassifierNotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(BoundaryError::Classifier(format!(
                "server returned {} when loading {}",
                response.status(),
                url
            )));
        }
        let model: TrainedClassifier = response.json()?;
        model.check_features()?;
        debug!("Classifier loaded from {}", url);
        Ok(model)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let url = self.url_for(name)?;
        let response = self.client.head(url).send()?;
        Ok(response.status().is_success())
    }
}

/// Local store plus an optional remote one.
///
/// Saves go to the remote store when one is configured, otherwise to disk.
/// Loads look on disk first, then remotely.
pub struct ClassifierRepository {
    local: LocalClassifierStore,
    remote: Option<Box<dyn ClassifierStore>>,
}

impl ClassifierRepository {
    pub fn new(local: LocalClassifierStore, remote: Option<Box<dyn ClassifierStore>>) -> Self {
        ClassifierRepository { local, remote }
    }

    /// Local store in `directory`, remote store at `server_url` if given.
    pub fn from_config(directory: &Path, server_url: Option<&str>) -> Result<Self> {
        let local = LocalClassifierStore::new(directory);
        let remote: Option<Box<dyn ClassifierStore>> = match server_url {
            #[cfg(feature = "reqwest")]
            Some(url) => Some(Box::new(RemoteClassifierStore::new(url)?)),
            #[cfg(not(feature = "reqwest"))]
            Some(url) => {
                warn!(
                    "Classifier server {} ignored: built without the `reqwest` feature",
                    url
                );
                None
            }
            None => None,
        };
        Ok(ClassifierRepository::new(local, remote))
    }

    pub fn local(&self) -> &LocalClassifierStore {
        &self.local
    }
}

impl ClassifierStore for ClassifierRepository {
    fn save(&self, model: &TrainedClassifier, name: &str) -> Result<String> {
        match &self.remote {
            Some(remote) => remote.save(model, name),
            None => self.local.save(model, name),
        }
    }

    fn load(&self, name: &str) -> Result<TrainedClassifier> {
        match self.local.load(name) {
            Err(BoundaryError::ClassifierNotFound(_)) => {}
            other => return other,
        }
        if let Some(remote) = &self.remote {
            match remote.load(name) {
                Err(BoundaryError::ClassifierNotFound(_)) => {}
                Err(e) if e.kind() != crate::error::ErrorKind::Classifier => {
                    warn!("Remote classifier store unavailable: {}", e);
                }
                other => return other,
            }
        }
        Err(BoundaryError::ClassifierNotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        if self.local.exists(name)? {
            return Ok(true);
        }
        match &self.remote {
            Some(remote) => remote.exists(name),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classification::FEATURE_ATTRIBUTES;
    use crate::classify::forest::{ForestParams, RandomForest};
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn feature_names() -> Vec<String> {
        FEATURE_ATTRIBUTES.iter().map(|a| a.name().to_string()).collect()
    }

    fn model() -> TrainedClassifier {
        let rows: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64; 8]).collect();
        let labels = vec![false, false, true, true];
        let params = ForestParams {
            n_trees: 2,
            ..ForestParams::default()
        };
        TrainedClassifier::new(
            feature_names(),
            RandomForest::fit(&rows, &labels, &params).unwrap(),
            4,
        )
    }

    /// In-memory stand-in for a remote store.
    #[derive(Default)]
    struct MemoryStore {
        models: RefCell<HashMap<String, String>>,
    }

    impl ClassifierStore for MemoryStore {
        fn save(&self, model: &TrainedClassifier, name: &str) -> Result<String> {
            self.models
                .borrow_mut()
                .insert(name.to_string(), serde_json::to_string(model)?);
            Ok(name.to_string())
        }

        fn load(&self, name: &str) -> Result<TrainedClassifier> {
            match self.models.borrow().get(name) {
                Some(json) => Ok(serde_json::from_str(json)?),
                None => Err(BoundaryError::ClassifierNotFound(name.to_string())),
            }
        }

        fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.models.borrow().contains_key(name))
        }
    }

    #[test]
    fn test_local_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalClassifierStore::new(dir.path().join("models"));
        assert!(!store.exists("rf.json").unwrap());
        assert_eq!(store.save(&model(), "rf.json").unwrap(), "rf.json");
        assert!(store.exists("rf.json").unwrap());
        let loaded = store.load("rf.json").unwrap();
        assert_eq!(loaded.features, feature_names());
    }

    #[test]
    fn test_local_load_rejects_corrupt_forest() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalClassifierStore::new(dir.path());
        let mut document = serde_json::to_value(model()).unwrap();
        document["forest"]["trees"] = serde_json::json!([{"nodes": []}]);
        std::fs::write(store.path_for("rf.json"), document.to_string()).unwrap();

        let err = store.load("rf.json").unwrap_err();
        assert!(matches!(err, BoundaryError::Classifier(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Classifier);
    }

    #[test]
    fn test_local_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalClassifierStore::new(dir.path());
        store.save(&model(), "rf.json").unwrap();
        let first = std::fs::read(store.path_for("rf.json")).unwrap();
        store.save(&model(), "rf.json").unwrap();
        let second = std::fs::read(store.path_for("rf.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ClassifierRepository::new(
            LocalClassifierStore::new(dir.path()),
            Some(Box::new(MemoryStore::default())),
        );
        let err = repo.load("missing-model").unwrap_err();
        assert!(matches!(err, BoundaryError::ClassifierNotFound(ref name) if name == "missing-model"));
        assert!(!repo.exists("missing-model").unwrap());
    }

    #[test]
    fn test_repository_prefers_remote_for_save() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ClassifierRepository::new(
            LocalClassifierStore::new(dir.path()),
            Some(Box::new(MemoryStore::default())),
        );
        repo.save(&model(), "rf.json").unwrap();
        assert!(!repo.local().exists("rf.json").unwrap());
        assert!(repo.exists("rf.json").unwrap());
        assert!(repo.load("rf.json").is_ok());
    }

    #[test]
    fn test_repository_without_remote_saves_locally() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ClassifierRepository::from_config(dir.path(), None).unwrap();
        repo.save(&model(), "rf.json").unwrap();
        assert!(repo.local().exists("rf.json").unwrap());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalClassifierStore::new(dir.path());
        assert!(store.save(&model(), "../rf.json").is_err());
        assert!(store.exists("").is_err());
    }

    #[cfg(feature = "reqwest")]
    #[test]
    fn test_remote_url_for() {
        let store = RemoteClassifierStore::new("http://localhost:8080/api").unwrap();
        assert_eq!(
            store.url_for("rf.json").unwrap().as_str(),
            "http://localhost:8080/api/classifiers/rf.json"
        );
    }
}
