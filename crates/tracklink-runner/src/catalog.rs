use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracklink_core::Project;
use tracklink_store::{
    checkpoint_index, document_stem, list_documents, load_json, project_key, ObjectStore,
    StoreError,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("project not found: {0}")]
    NotFound(String),

    #[error("loading project {key}: {message}")]
    Load { key: String, message: String },
}

/// Where project documents come from.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn load(&self, key: &str) -> Result<Project, CatalogError>;
}

/// Reads `<KEY>.json` documents from an object store.
pub struct StoreProjectSource {
    store: Arc<dyn ObjectStore>,
}

impl StoreProjectSource {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProjectSource for StoreProjectSource {
    async fn load(&self, key: &str) -> Result<Project, CatalogError> {
        load_json(self.store.as_ref(), &project_key(key))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => CatalogError::NotFound(key.to_string()),
                other => CatalogError::Load {
                    key: key.to_string(),
                    message: other.to_string(),
                },
            })
    }
}

type Cell = Arc<OnceCell<Arc<Project>>>;

/// The set of known project keys plus a load-once cache of their documents.
///
/// Concurrent first requests for one key share a single load. A failed load
/// leaves the entry empty, so a later request tries again.
pub struct Catalog {
    keys: Vec<String>,
    source: Arc<dyn ProjectSource>,
    cells: Mutex<HashMap<String, Cell>>,
    loads: AtomicU64,
}

impl Catalog {
    pub fn new(keys: Vec<String>, source: Arc<dyn ProjectSource>) -> Self {
        Self {
            keys,
            source,
            cells: Mutex::new(HashMap::new()),
            loads: AtomicU64::new(0),
        }
    }

    /// Catalog over every top-level project document in `store`. Commit
    /// gathering checkpoints (`KEY_<n>.json`) are not projects.
    pub async fn from_store(store: Arc<dyn ObjectStore>) -> Result<Self, StoreError> {
        let keys = list_documents(store.as_ref())
            .await?
            .iter()
            .filter(|doc| !is_checkpoint(doc))
            .filter_map(|doc| document_stem(doc))
            .map(str::to_string)
            .collect();
        Ok(Self::new(keys, Arc::new(StoreProjectSource::new(store))))
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// The project for `key`. Keys outside the catalog are reported as not
    /// found without touching the source.
    pub async fn project(&self, key: &str) -> Result<Arc<Project>, CatalogError> {
        if !self.contains(key) {
            return Err(CatalogError::NotFound(key.to_string()));
        }
        let cell = self
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.source.load(key).await.map(Arc::new)
        })
        .await
        .cloned()
    }

    /// Number of loads that reached the source.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }
}

fn is_checkpoint(document: &str) -> bool {
    document_stem(document)
        .and_then(|stem| stem.rsplit_once('_'))
        .is_some_and(|(project, _)| checkpoint_index(document, project).is_some())
}
