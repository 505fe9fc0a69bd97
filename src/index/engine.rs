//! Query engine over the persisted index.
//!
//! The persist directory's existence is the whole protocol: present means
//! load, absent means read the corpus, chunk, embed, and persist. A store
//! that exists but lacks its build marker is malformed and surfaced as an
//! error rather than silently rebuilt. Source documents changing after the
//! build never trigger a rebuild.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::chunk::{split_into_chunks, ChunkerConfig, DocumentChunk};
use super::reader::load_documents;
use super::sqlite::SqliteVectorStore;
use super::store::{IndexedChunk, VectorStore};
use crate::core::config::service::RetrievalSettings;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_BUILT_AT: &str = "built_at";
const META_DOCUMENT_COUNT: &str = "document_count";
const META_CHUNK_COUNT: &str = "chunk_count";

const EMBED_BATCH_SIZE: usize = 32;

/// One passage returned by similarity search, ranked from 1.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievedPassage {
    pub rank: usize,
    pub text: String,
    pub source: String,
    pub score: f32,
}

/// Aggregate of one retrieval call. Not persisted anywhere.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub passages: Vec<RetrievedPassage>,
    pub synthesized: Option<String>,
}

/// Whether `retrieve` also assembles a compact synthesized string from the
/// ranked passages, or returns the raw passages only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Passages,
    Compact,
}

/// Anything that can answer a question with ranked passages. The concrete
/// implementation is `IndexAccessor`; tests substitute their own.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<QueryResult, ApiError>;
}

/// A ready-to-query handle over the persisted index.
pub struct QueryEngine {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn LlmProvider>,
    embedding_model: String,
    top_k: usize,
    mode: ResponseMode,
    synthesis_budget: usize,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("embedding_model", &self.embedding_model)
            .field("top_k", &self.top_k)
            .field("mode", &self.mode)
            .field("synthesis_budget", &self.synthesis_budget)
            .finish()
    }
}

impl QueryEngine {
    pub async fn retrieve(&self, question: &str) -> Result<QueryResult, ApiError> {
        let embeddings = self
            .provider
            .embed(&[question.to_string()], &self.embedding_model)
            .await?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Retrieval("empty embedding response".to_string()))?;

        let results = self.store.search(&query_embedding, self.top_k).await?;

        let passages: Vec<RetrievedPassage> = results
            .into_iter()
            .enumerate()
            .map(|(i, result)| RetrievedPassage {
                rank: i + 1,
                text: result.chunk.content,
                source: result.chunk.source,
                score: result.score,
            })
            .collect();

        let synthesized = match self.mode {
            ResponseMode::Compact => Some(compact_answer(&passages, self.synthesis_budget)),
            ResponseMode::Passages => None,
        };

        Ok(QueryResult {
            passages,
            synthesized,
        })
    }

    pub async fn chunk_count(&self) -> Result<usize, ApiError> {
        self.store.count().await
    }
}

/// Assembles the ranked passages into one readable string under a
/// character budget. Empty when nothing was retrieved.
fn compact_answer(passages: &[RetrievedPassage], budget: usize) -> String {
    let mut out = String::new();

    for passage in passages {
        let entry = format!(
            "[{}] (Source: {})\n{}\n\n",
            passage.rank, passage.source, passage.text
        );
        if out.len() + entry.len() > budget {
            break;
        }
        out.push_str(&entry);
    }

    out.trim_end().to_string()
}

/// Builds a fresh index from the corpus or loads the persisted one,
/// depending on whether `index_dir` already exists.
pub async fn build_or_load(
    docs_dir: &Path,
    index_dir: &Path,
    settings: &RetrievalSettings,
    embedding_model: &str,
    mode: ResponseMode,
    provider: Arc<dyn LlmProvider>,
) -> Result<QueryEngine, ApiError> {
    let store: Arc<dyn VectorStore> = if index_dir.exists() {
        let store = SqliteVectorStore::open(index_dir).await?;

        let marker = store.get_meta(META_EMBEDDING_MODEL).await?;
        match marker {
            Some(model) => {
                if model != embedding_model {
                    tracing::warn!(
                        "Persisted index was built with embedding model '{}', configured model is '{}'",
                        model,
                        embedding_model
                    );
                }
                tracing::info!(
                    "Loaded persisted index from {} ({} chunks)",
                    index_dir.display(),
                    store.count().await?
                );
            }
            None => {
                return Err(ApiError::Retrieval(format!(
                    "persisted index at {} is malformed: missing build marker",
                    index_dir.display()
                )));
            }
        }

        Arc::new(store)
    } else {
        let documents = load_documents(docs_dir)?;
        tracing::info!(
            "Building index from {} documents under {}",
            documents.len(),
            docs_dir.display()
        );

        std::fs::create_dir_all(index_dir).map_err(|e| {
            ApiError::Retrieval(format!("failed to create {}: {}", index_dir.display(), e))
        })?;

        let store = SqliteVectorStore::open(index_dir).await?;

        let chunker = ChunkerConfig {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        };
        let chunks: Vec<DocumentChunk> = documents
            .iter()
            .flat_map(|doc| split_into_chunks(&doc.text, &doc.name, chunker))
            .collect();

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = provider.embed(&texts, embedding_model).await?;

            let items: Vec<(IndexedChunk, Vec<f32>)> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    (
                        IndexedChunk {
                            chunk_id: uuid::Uuid::new_v4().to_string(),
                            content: chunk.text.clone(),
                            source: chunk.source.clone(),
                            start_offset: chunk.start_offset,
                        },
                        embedding,
                    )
                })
                .collect();

            store.insert_batch(items).await?;
        }

        store.set_meta(META_EMBEDDING_MODEL, embedding_model).await?;
        store
            .set_meta(META_BUILT_AT, &chrono::Utc::now().to_rfc3339())
            .await?;
        store
            .set_meta(META_DOCUMENT_COUNT, &documents.len().to_string())
            .await?;
        store
            .set_meta(META_CHUNK_COUNT, &chunks.len().to_string())
            .await?;

        tracing::info!(
            "Persisted index with {} chunks to {}",
            chunks.len(),
            index_dir.display()
        );

        Arc::new(store)
    };

    Ok(QueryEngine {
        store,
        provider,
        embedding_model: embedding_model.to_string(),
        top_k: settings.top_k,
        mode,
        synthesis_budget: settings.synthesis_budget,
    })
}

/// Lock-guarded build-once cell. The expensive init runs at most once per
/// process; `invalidate` is the explicit hook for dropping the handle so a
/// later call rebuilds.
pub struct LazyHandle<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> LazyHandle<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }

        let value = Arc::new(init().await?);
        *slot = Some(value.clone());
        Ok(value)
    }

    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        *slot = None;
    }
}

impl<T> Default for LazyHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide Index Accessor: owns the configuration needed to
/// build or load, and memoizes the resulting engine.
pub struct IndexAccessor {
    docs_dir: PathBuf,
    index_dir: PathBuf,
    settings: RetrievalSettings,
    embedding_model: String,
    mode: ResponseMode,
    provider: Arc<dyn LlmProvider>,
    handle: LazyHandle<QueryEngine>,
}

impl IndexAccessor {
    pub fn new(
        docs_dir: PathBuf,
        index_dir: PathBuf,
        settings: RetrievalSettings,
        embedding_model: String,
        mode: ResponseMode,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            docs_dir,
            index_dir,
            settings,
            embedding_model,
            mode,
            provider,
            handle: LazyHandle::new(),
        }
    }

    /// Returns the memoized engine, building or loading it on first use.
    pub async fn engine(&self) -> Result<Arc<QueryEngine>, ApiError> {
        self.handle
            .get_or_try_init(|| {
                build_or_load(
                    &self.docs_dir,
                    &self.index_dir,
                    &self.settings,
                    &self.embedding_model,
                    self.mode,
                    self.provider.clone(),
                )
            })
            .await
    }

    /// Drops the memoized engine. Nothing calls this in-process today; it
    /// exists so a rebuild path can be wired without changing callers.
    #[allow(dead_code)]
    pub async fn invalidate(&self) {
        self.handle.invalidate().await;
    }
}

#[async_trait]
impl Retriever for IndexAccessor {
    async fn retrieve(&self, question: &str) -> Result<QueryResult, ApiError> {
        self.engine().await?.retrieve(question).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::llm::types::ChatRequest;

    /// Embeds each text onto a fixed 3-axis vocabulary so similarity is
    /// deterministic without a network.
    struct StubProvider {
        embed_calls: AtomicUsize,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                embed_calls: AtomicUsize::new(0),
            }
        }

        fn embed_one(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            vec![
                if lower.contains("ventilation") { 1.0 } else { 0.0 },
                if lower.contains("blasting") { 1.0 } else { 0.0 },
                0.1,
            ]
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            Ok(String::new())
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|t| Self::embed_one(t)).collect())
        }
    }

    fn test_settings() -> RetrievalSettings {
        RetrievalSettings {
            docs_dir: "docs".to_string(),
            index_dir: "storage".to_string(),
            top_k: 3,
            chunk_size: 200,
            chunk_overlap: 20,
            synthesis_budget: 2000,
        }
    }

    #[tokio::test]
    async fn lazy_handle_initializes_exactly_once() {
        let handle: LazyHandle<usize> = LazyHandle::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = handle
                .get_or_try_init(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(*value, 42);
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lazy_handle_rebuilds_after_invalidate() {
        let handle: LazyHandle<usize> = LazyHandle::new();
        let builds = AtomicUsize::new(0);

        let init = || async {
            Ok(builds.fetch_add(1, Ordering::SeqCst))
        };

        let first = handle.get_or_try_init(init).await.unwrap();
        handle.invalidate().await;
        let second = handle.get_or_try_init(init).await.unwrap();

        assert_eq!(*first, 0);
        assert_eq!(*second, 1);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cold_build_then_reload_embeds_only_once() {
        let tmp = tempfile::tempdir().unwrap();
        let docs_dir = tmp.path().join("docs");
        let index_dir = tmp.path().join("storage");
        std::fs::create_dir(&docs_dir).unwrap();
        std::fs::write(docs_dir.join("vent.txt"), "Mine ventilation moves fresh air.").unwrap();
        std::fs::write(docs_dir.join("blast.txt"), "Blasting patterns control fragmentation.")
            .unwrap();

        let provider = Arc::new(StubProvider::new());
        let settings = test_settings();

        let engine = build_or_load(
            &docs_dir,
            &index_dir,
            &settings,
            "embed-v1",
            ResponseMode::Passages,
            provider.clone(),
        )
        .await
        .unwrap();
        assert_eq!(engine.chunk_count().await.unwrap(), 2);
        let builds_embed_calls = provider.embed_calls.load(Ordering::SeqCst);
        assert!(builds_embed_calls >= 1);

        // Second process start: directory exists, so this must load.
        let reloaded = build_or_load(
            &docs_dir,
            &index_dir,
            &settings,
            "embed-v1",
            ResponseMode::Passages,
            provider.clone(),
        )
        .await
        .unwrap();
        assert_eq!(reloaded.chunk_count().await.unwrap(), 2);
        assert_eq!(provider.embed_calls.load(Ordering::SeqCst), builds_embed_calls);
    }

    #[tokio::test]
    async fn existing_dir_without_marker_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let docs_dir = tmp.path().join("docs");
        let index_dir = tmp.path().join("storage");
        std::fs::create_dir(&docs_dir).unwrap();
        std::fs::create_dir(&index_dir).unwrap();

        let provider = Arc::new(StubProvider::new());
        let err = build_or_load(
            &docs_dir,
            &index_dir,
            &test_settings(),
            "embed-v1",
            ResponseMode::Passages,
            provider,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Retrieval(_)));
        assert!(err.to_string().contains("malformed"));
    }

    #[tokio::test]
    async fn retrieve_ranks_passages_and_synthesizes_in_compact_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let docs_dir = tmp.path().join("docs");
        let index_dir = tmp.path().join("storage");
        std::fs::create_dir(&docs_dir).unwrap();
        std::fs::write(docs_dir.join("vent.txt"), "Mine ventilation moves fresh air.").unwrap();
        std::fs::write(docs_dir.join("blast.txt"), "Blasting patterns control fragmentation.")
            .unwrap();

        let provider = Arc::new(StubProvider::new());
        let engine = build_or_load(
            &docs_dir,
            &index_dir,
            &test_settings(),
            "embed-v1",
            ResponseMode::Compact,
            provider,
        )
        .await
        .unwrap();

        let result = engine.retrieve("how does ventilation work").await.unwrap();

        assert_eq!(result.passages.len(), 2);
        assert_eq!(result.passages[0].rank, 1);
        assert!(result.passages[0].text.contains("ventilation"));
        assert!(result.passages[0].score > result.passages[1].score);

        let synthesized = result.synthesized.unwrap();
        assert!(synthesized.starts_with("[1] (Source: vent.txt)"));
    }

    #[tokio::test]
    async fn accessor_memoizes_the_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let docs_dir = tmp.path().join("docs");
        let index_dir = tmp.path().join("storage");
        std::fs::create_dir(&docs_dir).unwrap();
        std::fs::write(docs_dir.join("a.txt"), "Roof support basics.").unwrap();

        let provider = Arc::new(StubProvider::new());
        let accessor = IndexAccessor::new(
            docs_dir,
            index_dir,
            test_settings(),
            "embed-v1".to_string(),
            ResponseMode::Passages,
            provider,
        );

        let first = accessor.engine().await.unwrap();
        let second = accessor.engine().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn compact_answer_respects_budget() {
        let passages = vec![
            RetrievedPassage {
                rank: 1,
                text: "short".to_string(),
                source: "a.txt".to_string(),
                score: 0.9,
            },
            RetrievedPassage {
                rank: 2,
                text: "x".repeat(500),
                source: "b.txt".to_string(),
                score: 0.5,
            },
        ];

        let out = compact_answer(&passages, 100);
        assert!(out.contains("[1]"));
        assert!(!out.contains("[2]"));

        assert_eq!(compact_answer(&[], 100), "");
    }
}
