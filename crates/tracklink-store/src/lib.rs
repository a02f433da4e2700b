mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid document {key}: {message}")]
    Document { key: String, message: String },

    #[error("store error: {0}")]
    Internal(String),
}

/// A store for opaque blobs keyed by string paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (create or overwrite) an object. Readers never observe a
    /// partially written object.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Read an object. Returns `StoreError::NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Read an object, returning `None` if it does not exist.
    async fn get_opt(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match self.get(key).await {
            Ok(data) => Ok(Some(data)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an object. No-op if absent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// -- Key helpers --

const DOCUMENT_SUFFIX: &str = ".json";

pub fn project_key(project_key: &str) -> String {
    format!("{project_key}{DOCUMENT_SUFFIX}")
}

/// Repositories are stored under their short name, not `owner/name`.
pub fn repository_key(name: &str) -> String {
    format!("{name}{DOCUMENT_SUFFIX}")
}

pub fn checkpoint_key(project_key: &str, index: usize) -> String {
    format!("{project_key}_{index}{DOCUMENT_SUFFIX}")
}

/// Directory holding the payloads of one commit: `owner/name/[pr/]sha`.
pub fn commit_dir_key(repo: &str, pullrequest: Option<u64>, sha: &str) -> String {
    match pullrequest {
        Some(pr) => format!("{repo}/{pr}/{sha}"),
        None => format!("{repo}/{sha}"),
    }
}

pub fn commit_file_key(repo: &str, pullrequest: Option<u64>, sha: &str, flat_name: &str) -> String {
    format!("{}/{flat_name}", commit_dir_key(repo, pullrequest, sha))
}

/// Document name without its suffix (`FLINK.json` -> `FLINK`).
pub fn document_stem(key: &str) -> Option<&str> {
    key.strip_suffix(DOCUMENT_SUFFIX)
}

/// Checkpoint index of a `KEY_<index>.json` document belonging to `project_key`.
pub fn checkpoint_index(key: &str, project_key: &str) -> Option<usize> {
    document_stem(key)?
        .strip_prefix(project_key)?
        .strip_prefix('_')?
        .parse()
        .ok()
}

// -- JSON documents --

/// Top-level `.json` documents of a store, sorted.
pub async fn list_documents(store: &dyn ObjectStore) -> Result<Vec<String>, StoreError> {
    let keys = store.list("").await?;
    Ok(keys
        .into_iter()
        .filter(|k| !k.contains('/') && k.ends_with(DOCUMENT_SUFFIX))
        .collect())
}

pub async fn load_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<T, StoreError> {
    let data = store.get(key).await?;
    serde_json::from_slice(&data).map_err(|e| StoreError::Document {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Serialize `value` with a four-space indent and write it in one piece.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser).map_err(|e| StoreError::Document {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.put(key, Bytes::from(buf)).await?;
    debug!("saved {key}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers_produce_expected_paths() {
        assert_eq!(project_key("FLINK"), "FLINK.json");
        assert_eq!(repository_key("flink"), "flink.json");
        assert_eq!(checkpoint_key("FLINK", 2000), "FLINK_2000.json");
        assert_eq!(
            commit_dir_key("apache/flink", Some(12), "abc"),
            "apache/flink/12/abc"
        );
        assert_eq!(commit_dir_key("apache/flink", None, "abc"), "apache/flink/abc");
        assert_eq!(
            commit_file_key("apache/flink", None, "abc", "src_Main.java"),
            "apache/flink/abc/src_Main.java"
        );
    }

    #[test]
    fn document_names_parse_back() {
        assert_eq!(document_stem("FLINK.json"), Some("FLINK"));
        assert_eq!(document_stem("FLINK.txt"), None);
        assert_eq!(checkpoint_index("FLINK_1000.json", "FLINK"), Some(1000));
        assert_eq!(checkpoint_index("FLINK.json", "FLINK"), None);
        assert_eq!(checkpoint_index("FLINKX_10.json", "FLINK"), None);
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Doc {
        key: String,
        items: Vec<u32>,
    }

    #[tokio::test]
    async fn json_documents_use_four_space_indent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        let doc = Doc {
            key: "FLINK".into(),
            items: vec![1],
        };

        save_json(&store, "FLINK.json", &doc).await.unwrap();
        let raw = std::fs::read_to_string(tmp.path().join("FLINK.json")).unwrap();
        assert!(raw.contains("\n    \"key\": \"FLINK\""), "got: {raw}");

        let loaded: Doc = load_json(&store, "FLINK.json").await.unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn load_json_reports_bad_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put("bad.json", Bytes::from("{")).await.unwrap();

        let err = load_json::<Doc>(&store, "bad.json").await.unwrap_err();
        assert!(matches!(err, StoreError::Document { ref key, .. } if key == "bad.json"));

        let err = load_json::<Doc>(&store, "missing.json").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_documents_skips_nested_and_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put("b.json", Bytes::from("{}")).await.unwrap();
        store.put("a.json", Bytes::from("{}")).await.unwrap();
        store.put("notes.txt", Bytes::from("x")).await.unwrap();
        store.put("apache/flink/abc/X.json", Bytes::from("{}")).await.unwrap();

        let docs = list_documents(&store).await.unwrap();
        assert_eq!(docs, vec!["a.json".to_string(), "b.json".to_string()]);
    }
}
