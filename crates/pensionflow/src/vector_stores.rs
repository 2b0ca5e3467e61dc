//! Persistent, in-process vector store.
//!
//! The gateway owns a root directory and an embedding model. Collections are
//! created or opened by name, cached process-wide, and persisted as one JSON
//! file per collection so the store survives restarts. Queries are exact
//! nearest-neighbor over cosine distance: smaller distance means more
//! similar, and callers convert a distance to a similarity in [0, 1] via
//! [`similarity_from_distance`].
//!
//! The orchestration core only reads collections; writing is the ingestion
//! pipeline's job (and test setup's).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::embeddings::Embeddings;
use crate::error::{Error, Result};

/// Converts a cosine distance to a similarity score clamped to [0, 1].
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    text: String,
    metadata: Value,
    vector: Vec<f32>,
}

/// Result of a nearest-neighbor query. The three lists are parallel and
/// each at most `n_results` long, ordered by ascending distance.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub documents: Vec<String>,
    pub metadatas: Vec<Value>,
    pub distances: Vec<f32>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A named collection of embedded chunks.
pub struct Collection {
    name: String,
    path: PathBuf,
    embeddings: Arc<dyn Embeddings>,
    entries: RwLock<Vec<StoredEntry>>,
}

impl Collection {
    fn open(name: &str, path: PathBuf, embeddings: Arc<dyn Embeddings>) -> Result<Self> {
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };
        Ok(Self {
            name: name.to_string(),
            path,
            embeddings,
            entries: RwLock::new(entries),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Batch insert. `texts`, `ids`, and `metadatas` must be parallel; ids
    /// must be unique within the batch. Re-adding an id that already exists
    /// appends a new entry - deduplication is the writer's responsibility.
    pub async fn add(&self, texts: &[String], ids: &[String], metadatas: &[Value]) -> Result<()> {
        if texts.len() != ids.len() || texts.len() != metadatas.len() {
            return Err(Error::config(format!(
                "batch length mismatch: {} texts, {} ids, {} metadatas",
                texts.len(),
                ids.len(),
                metadatas.len()
            )));
        }
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(Error::invalid_input(format!(
                    "duplicate id '{id}' within batch"
                )));
            }
        }

        let vectors = self.embeddings.embed_documents(texts).await?;
        {
            let mut entries = self.entries.write();
            for ((text, id), (metadata, vector)) in texts
                .iter()
                .zip(ids)
                .zip(metadatas.iter().zip(vectors))
            {
                entries.push(StoredEntry {
                    id: id.clone(),
                    text: text.clone(),
                    metadata: metadata.clone(),
                    vector,
                });
            }
        }
        self.persist()?;
        debug!(collection = %self.name, added = texts.len(), "added chunks");
        Ok(())
    }

    /// Nearest-neighbor query over an embedding of `query_text`.
    ///
    /// `where_filter` restricts candidates to entries whose metadata fields
    /// equal every key in the map.
    pub async fn query(
        &self,
        query_text: &str,
        n_results: usize,
        where_filter: Option<&Map<String, Value>>,
    ) -> Result<QueryResult> {
        let query_vector = self.embeddings.embed_query(query_text).await?;

        let mut scored: Vec<(f32, String, Value)> = self
            .entries
            .read()
            .iter()
            .filter(|entry| matches_filter(&entry.metadata, where_filter))
            .map(|entry| {
                (
                    cosine_distance(&query_vector, &entry.vector),
                    entry.text.clone(),
                    entry.metadata.clone(),
                )
            })
            .collect();

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n_results);

        let mut result = QueryResult::default();
        for (distance, text, metadata) in scored {
            result.documents.push(text);
            result.metadatas.push(metadata);
            result.distances.push(distance);
        }
        Ok(result)
    }

    fn persist(&self) -> Result<()> {
        let entries = self.entries.read();
        let raw = serde_json::to_string(&*entries)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

fn matches_filter(metadata: &Value, filter: Option<&Map<String, Value>>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Create-or-open gateway over a directory of persisted collections.
pub struct VectorStoreGateway {
    root: PathBuf,
    embeddings: Arc<dyn Embeddings>,
    collections: DashMap<String, Arc<Collection>>,
}

impl VectorStoreGateway {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>, embeddings: Arc<dyn Embeddings>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            embeddings,
            collections: DashMap::new(),
        })
    }

    /// Idempotent create-or-open of a named collection.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(existing) = self.collections.get(name) {
            return Ok(Arc::clone(&existing));
        }
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::invalid_input(format!(
                "invalid collection name '{name}'"
            )));
        }
        let path = self.root.join(format!("{name}.json"));
        let collection = Arc::new(Collection::open(name, path, Arc::clone(&self.embeddings))?);
        self.collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddings;
    use serde_json::json;

    fn gateway(dir: &Path) -> VectorStoreGateway {
        VectorStoreGateway::new(dir, Arc::new(MockEmbeddings::new(128))).unwrap()
    }

    #[tokio::test]
    async fn add_and_query_returns_parallel_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let collection = store.collection("pension_knowledge").unwrap();

        collection
            .add(
                &[
                    "contribution limits are reviewed annually".to_string(),
                    "fraud monitoring covers all transactions".to_string(),
                    "retirement age options and contribution rules".to_string(),
                ],
                &["c1".to_string(), "c2".to_string(), "c3".to_string()],
                &[
                    json!({"source": "handbook.pdf", "chunk_index": 0}),
                    json!({"source": "handbook.pdf", "chunk_index": 1}),
                    json!({"source": "plan.pdf", "chunk_index": 0}),
                ],
            )
            .await
            .unwrap();

        let result = collection
            .query("contribution rules", 2, None)
            .await
            .unwrap();
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.metadatas.len(), 2);
        assert_eq!(result.distances.len(), 2);
        // Ordered by ascending distance.
        assert!(result.distances[0] <= result.distances[1]);
    }

    #[tokio::test]
    async fn query_respects_n_results_and_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let collection = store.collection("user_5_docs").unwrap();

        let result = collection.query("anything", 3, None).await.unwrap();
        assert!(result.is_empty());

        collection
            .add(
                &["only one chunk".to_string()],
                &["a".to_string()],
                &[json!({})],
            )
            .await
            .unwrap();
        let result = collection.query("chunk", 5, None).await.unwrap();
        assert_eq!(result.documents.len(), 1);
    }

    #[tokio::test]
    async fn metadata_filter_restricts_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let collection = store.collection("shared").unwrap();

        collection
            .add(
                &["alpha".to_string(), "beta".to_string()],
                &["1".to_string(), "2".to_string()],
                &[json!({"user_id": 5}), json!({"user_id": 9})],
            )
            .await
            .unwrap();

        let mut filter = Map::new();
        filter.insert("user_id".to_string(), json!(9));
        let result = collection.query("beta", 10, Some(&filter)).await.unwrap();
        assert_eq!(result.documents, vec!["beta"]);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = gateway(dir.path());
            let collection = store.collection("user_9_docs").unwrap();
            collection
                .add(
                    &["persisted chunk".to_string()],
                    &["p1".to_string()],
                    &[json!({"source": "a.pdf"})],
                )
                .await
                .unwrap();
        }

        let store = gateway(dir.path());
        let collection = store.collection("user_9_docs").unwrap();
        assert_eq!(collection.len(), 1);
        let result = collection.query("persisted", 1, None).await.unwrap();
        assert_eq!(result.documents, vec!["persisted chunk"]);
    }

    #[tokio::test]
    async fn reingesting_same_ids_doubles_the_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let collection = store.collection("user_2_docs").unwrap();

        let texts = vec!["chunk".to_string()];
        let ids = vec!["same-id".to_string()];
        let metas = vec![json!({})];
        collection.add(&texts, &ids, &metas).await.unwrap();
        collection.add(&texts, &ids, &metas).await.unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_within_batch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let collection = store.collection("dups").unwrap();

        let err = collection
            .add(
                &["a".to_string(), "b".to_string()],
                &["x".to_string(), "x".to_string()],
                &[json!({}), json!({})],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn mismatched_batch_lengths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let collection = store.collection("bad").unwrap();

        let err = collection
            .add(&["a".to_string()], &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn collection_handle_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        let a = store.collection("kb").unwrap();
        let b = store.collection("kb").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn invalid_collection_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = gateway(dir.path());
        assert!(store.collection("").is_err());
        assert!(store.collection("../escape").is_err());
    }

    #[test]
    fn similarity_is_clamped() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(1.0), 0.0);
        assert_eq!(similarity_from_distance(1.7), 0.0);
        assert_eq!(similarity_from_distance(-0.2), 1.0);
    }
}
