//! Semantic retrieval over the persisted corpus.
//!
//! Loads the corpus artifact lazily and caches it for the life of the
//! process; a forced reload invalidates the cache. Concurrent callers
//! share a single in-flight load. Each query is embedded, ranked by
//! cosine similarity against every candidate chunk, filtered by section
//! or tag, floored at a minimum score, and truncated to top-K.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::corpus::{Corpus, EmbeddedChunk, SectionIndex};
use crate::embedder::{Embedder, EmbedderError};

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("failed to load corpus from {path}: {reason}")]
    CorpusLoad { path: String, reason: String },

    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    #[error("query embedding has {query} dimensions, corpus has {corpus}")]
    DimensionMismatch { query: usize, corpus: usize },
}

/// One ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: EmbeddedChunk,
    pub section: SectionIndex,
    pub score: f32,
}

/// A deduplicated source reference for citation display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionCitation {
    pub section_id: String,
    pub title: String,
}

#[derive(Debug, Default, Clone)]
pub struct RetrievalOptions {
    pub top_k: Option<usize>,
    pub section_ids: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub min_score: Option<f32>,
}

/// Cosine similarity between two vectors.
///
/// Zero-norm or mismatched-length inputs score 0 rather than NaN.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

pub struct Retriever {
    corpus_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    default_top_k: usize,
    default_min_score: f32,
    corpus: Mutex<Option<Arc<Corpus>>>,
}

impl Retriever {
    #[must_use]
    pub fn new(
        corpus_path: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        default_top_k: usize,
        default_min_score: f32,
    ) -> Self {
        Self {
            corpus_path: corpus_path.into(),
            embedder,
            default_top_k,
            default_min_score,
            corpus: Mutex::new(None),
        }
    }

    /// Load the corpus, reusing the cached instance unless `force` is set.
    ///
    /// The cache lock is held across the read so concurrent callers wait
    /// on the same load instead of duplicating it.
    pub async fn load_corpus(&self, force: bool) -> Result<Arc<Corpus>, RetrieverError> {
        let mut guard = self.corpus.lock().await;

        if !force {
            if let Some(corpus) = guard.as_ref() {
                return Ok(Arc::clone(corpus));
            }
        }

        let path = self.corpus_path.display().to_string();
        let data =
            tokio::fs::read_to_string(&self.corpus_path)
                .await
                .map_err(|e| RetrieverError::CorpusLoad {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

        let corpus: Corpus =
            serde_json::from_str(&data).map_err(|e| RetrieverError::CorpusLoad {
                path,
                reason: e.to_string(),
            })?;

        info!(
            chunks = corpus.chunks.len(),
            sections = corpus.index.len(),
            model = %corpus.model,
            "corpus loaded"
        );

        let corpus = Arc::new(corpus);
        *guard = Some(Arc::clone(&corpus));
        Ok(corpus)
    }

    /// Retrieve the top-K most relevant chunks for a query.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>, RetrieverError> {
        let top_k = options.top_k.unwrap_or(self.default_top_k);
        let min_score = options.min_score.unwrap_or(self.default_min_score);

        let corpus = self.load_corpus(false).await?;
        let query_embedding = self.embedder.embed(query).await?;

        if let Some(first) = corpus.chunks.first() {
            if first.embedding.len() != query_embedding.len() {
                return Err(RetrieverError::DimensionMismatch {
                    query: query_embedding.len(),
                    corpus: first.embedding.len(),
                });
            }
        }

        let mut scored: Vec<RetrievalResult> = corpus
            .chunks
            .iter()
            .filter(|chunk| match &options.section_ids {
                Some(ids) => ids.iter().any(|id| *id == chunk.chunk.section_id),
                None => true,
            })
            .filter_map(|chunk| {
                let section = corpus.section(&chunk.chunk.section_id)?;
                if let Some(tags) = &options.tags {
                    if !tags.iter().any(|t| section.tags.contains(t)) {
                        return None;
                    }
                }
                let score = cosine_similarity(&query_embedding, &chunk.embedding);
                Some(RetrievalResult {
                    chunk: chunk.clone(),
                    section: section.clone(),
                    score,
                })
            })
            .filter(|result| result.score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);

        debug!(hits = scored.len(), top_k, min_score, "retrieval complete");
        Ok(scored)
    }

    /// Format retrieval results into a prompt-ready context block.
    #[must_use]
    pub fn format_context(results: &[RetrievalResult]) -> String {
        if results.is_empty() {
            return "No relevant context found.".to_string();
        }

        results
            .iter()
            .map(|r| {
                format!(
                    "[{}] {}\n{}\n(relevance: {:.1}%)",
                    r.section.section_id,
                    r.section.title,
                    r.chunk.chunk.text,
                    r.score * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    /// Deduplicated citations in first-seen order.
    #[must_use]
    pub fn citations(results: &[RetrievalResult]) -> Vec<SectionCitation> {
        let mut seen = std::collections::HashSet::new();
        let mut citations = Vec::new();

        for result in results {
            if seen.insert(result.section.section_id.clone()) {
                citations.push(SectionCitation {
                    section_id: result.section.section_id.clone(),
                    title: result.section.title.clone(),
                });
            }
        }

        citations
    }
}
