//! Offline batch corpus construction: chunk a knowledge document, embed
//! every chunk, and persist the corpus artifact plus sibling metadata.
//!
//! This is a build-time process, not part of the interactive request
//! path: any embedding-provider error aborts the whole build so a
//! partial corpus is never persisted.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::corpus::chunker::process_corpus;
use crate::corpus::{Chunk, Corpus, CorpusMetadata, EmbeddedChunk, SectionIndex};
use crate::embedder::Embedder;

pub const CORPUS_VERSION: &str = "v2";

pub struct CorpusBuilder<'a, E: Embedder + ?Sized> {
    embedder: &'a E,
    target_tokens: usize,
    overlap_tokens: usize,
    batch_size: usize,
    batch_delay_ms: u64,
}

impl<'a, E: Embedder + ?Sized> CorpusBuilder<'a, E> {
    #[must_use]
    pub fn new(
        embedder: &'a E,
        target_tokens: usize,
        overlap_tokens: usize,
        batch_size: usize,
        batch_delay_ms: u64,
    ) -> Self {
        Self {
            embedder,
            target_tokens,
            overlap_tokens,
            batch_size,
            batch_delay_ms,
        }
    }

    /// Chunk the document and embed every chunk, producing the complete
    /// corpus. Fails fast on the first embedding error.
    pub async fn build(&self, markdown: &str, index: Vec<SectionIndex>) -> Result<Corpus> {
        let chunks = process_corpus(markdown, &index, self.target_tokens, self.overlap_tokens);
        anyhow::ensure!(!chunks.is_empty(), "no chunks produced from source document");

        info!(
            chunks = chunks.len(),
            sections = index.len(),
            "chunked corpus, embedding with {}",
            self.embedder.model()
        );

        let embedded = self.embed_all(&chunks).await?;

        Ok(Corpus {
            version: CORPUS_VERSION.to_string(),
            created: Utc::now().to_rfc3339(),
            model: self.embedder.model().to_string(),
            chunks: embedded,
            index,
        })
    }

    /// Embed chunks in rate-limited batches.
    async fn embed_all(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddedChunk>> {
        let mut embedded = Vec::with_capacity(chunks.len());
        let batch_count = chunks.len().div_ceil(self.batch_size);

        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            info!(
                batch = batch_no + 1,
                of = batch_count,
                size = batch.len(),
                "embedding batch"
            );

            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .with_context(|| format!("embedding batch {} failed", batch_no + 1))?;

            for (chunk, embedding) in batch.iter().zip(vectors) {
                embedded.push(EmbeddedChunk {
                    chunk: chunk.clone(),
                    embedding,
                });
            }

            if batch_no + 1 < batch_count && self.batch_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.batch_delay_ms)).await;
            }
        }

        Ok(embedded)
    }
}

/// Write the corpus artifact and its sibling `metadata.json` to `dir`.
/// Returns the metadata summary.
pub fn persist_corpus(corpus: &Corpus, dir: &Path, filename: &str) -> Result<CorpusMetadata> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create corpus dir {}", dir.display()))?;

    let corpus_path = dir.join(filename);
    let data = serde_json::to_string_pretty(corpus).context("failed to serialize corpus")?;
    std::fs::write(&corpus_path, data)
        .with_context(|| format!("failed to write {}", corpus_path.display()))?;

    let metadata = corpus.metadata();
    let meta_path = dir.join("metadata.json");
    let meta_data =
        serde_json::to_string_pretty(&metadata).context("failed to serialize metadata")?;
    std::fs::write(&meta_path, meta_data)
        .with_context(|| format!("failed to write {}", meta_path.display()))?;

    info!(
        chunks = metadata.chunk_count,
        sections = metadata.section_count,
        tokens = metadata.total_tokens,
        "corpus written to {}",
        corpus_path.display()
    );

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;

    fn index() -> Vec<SectionIndex> {
        vec![
            SectionIndex {
                section_id: "finance".to_string(),
                title: "Financial Metrics".to_string(),
                tags: vec!["finance".to_string()],
                summary: String::new(),
            },
            SectionIndex {
                section_id: "modeling".to_string(),
                title: "Modeling Frameworks".to_string(),
                tags: vec!["ml".to_string()],
                summary: String::new(),
            },
        ]
    }

    const MD: &str = "## Financial Metrics\n\nARPU is monthly revenue per subscriber. CLTV \
discounts margin over expected tenure.\n\n## Modeling Frameworks\n\nBinary classifiers rank \
churn risk. Survival models estimate time to churn.";

    #[tokio::test]
    async fn test_build_embeds_every_chunk() {
        let embedder = MockEmbedder::default();
        let builder = CorpusBuilder::new(&embedder, 700, 100, 10, 0);
        let corpus = builder.build(MD, index()).await.unwrap();

        assert_eq!(corpus.version, CORPUS_VERSION);
        assert_eq!(corpus.model, "mock-hash-embedder");
        assert_eq!(corpus.index.len(), 2);
        assert!(!corpus.chunks.is_empty());
        for chunk in &corpus.chunks {
            assert_eq!(chunk.embedding.len(), embedder.dimensions());
        }
    }

    #[tokio::test]
    async fn test_build_rejects_empty_document() {
        let embedder = MockEmbedder::default();
        let builder = CorpusBuilder::new(&embedder, 700, 100, 10, 0);
        let result = builder
            .build("## Unrelated\n\nText.", vec![index()[0].clone()])
            .await;
        // The finance section matches nothing in this document; no chunks.
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_persist_writes_artifact_and_metadata() {
        let embedder = MockEmbedder::default();
        let builder = CorpusBuilder::new(&embedder, 700, 100, 10, 0);
        let corpus = builder.build(MD, index()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let meta = persist_corpus(&corpus, dir.path(), "churn_corpus.json").unwrap();

        assert_eq!(meta.chunk_count, corpus.chunks.len());
        assert_eq!(meta.section_count, 2);
        assert!(meta.total_tokens > 0);

        let raw = std::fs::read_to_string(dir.path().join("churn_corpus.json")).unwrap();
        let loaded: Corpus = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.chunks.len(), corpus.chunks.len());

        let meta_raw = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
        let loaded_meta: CorpusMetadata = serde_json::from_str(&meta_raw).unwrap();
        assert_eq!(loaded_meta.chunk_count, meta.chunk_count);
    }
}
