//! Corpus artifact model and construction.
//!
//! A corpus is the persisted unit of knowledge for the retriever: the
//! full set of embedded passages plus a section index, built once by the
//! offline [`builder`] and read-only thereafter.

pub mod builder;
pub mod chunker;

use serde::{Deserialize, Serialize};

/// A contiguous passage of source text, bounded by a token budget.
///
/// Chunks within a section may overlap in text content to preserve
/// context across boundaries; ids are unique within a corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub section_id: String,
    pub text: String,
    pub token_count: usize,
    /// Best-effort provenance hints into the original section text,
    /// not byte-exact spans.
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A [`Chunk`] plus its embedding vector.
///
/// All embeddings in one corpus share the same dimensionality and model,
/// recorded once at the corpus level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Metadata for one logical section of the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionIndex {
    pub section_id: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// The persisted corpus artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub version: String,
    pub created: String,
    pub model: String,
    pub chunks: Vec<EmbeddedChunk>,
    pub index: Vec<SectionIndex>,
}

/// Sibling metadata record written next to the corpus artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusMetadata {
    pub version: String,
    pub created: String,
    pub model: String,
    pub chunk_count: usize,
    pub section_count: usize,
    pub total_tokens: usize,
}

impl Corpus {
    /// Summarize this corpus into its sibling metadata record.
    #[must_use]
    pub fn metadata(&self) -> CorpusMetadata {
        CorpusMetadata {
            version: self.version.clone(),
            created: self.created.clone(),
            model: self.model.clone(),
            chunk_count: self.chunks.len(),
            section_count: self.index.len(),
            total_tokens: self.chunks.iter().map(|c| c.chunk.token_count).sum(),
        }
    }

    /// Look up a section by id.
    #[must_use]
    pub fn section(&self, section_id: &str) -> Option<&SectionIndex> {
        self.index.iter().find(|s| s.section_id == section_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_corpus() -> Corpus {
        Corpus {
            version: "v2".to_string(),
            created: "2025-11-03T10:00:00Z".to_string(),
            model: "text-embedding-3-large".to_string(),
            chunks: vec![
                EmbeddedChunk {
                    chunk: Chunk {
                        id: "finance_chunk_0".to_string(),
                        section_id: "finance".to_string(),
                        text: "ARPU is average revenue per user.".to_string(),
                        token_count: 9,
                        start_offset: 0,
                        end_offset: 33,
                    },
                    embedding: vec![0.1, 0.2, 0.3],
                },
                EmbeddedChunk {
                    chunk: Chunk {
                        id: "finance_chunk_1".to_string(),
                        section_id: "finance".to_string(),
                        text: "CLTV discounts margin over tenure.".to_string(),
                        token_count: 7,
                        start_offset: 30,
                        end_offset: 64,
                    },
                    embedding: vec![0.3, 0.2, 0.1],
                },
            ],
            index: vec![SectionIndex {
                section_id: "finance".to_string(),
                title: "Financial Metrics".to_string(),
                tags: vec!["finance".to_string()],
                summary: "Unit economics".to_string(),
            }],
        }
    }

    #[test]
    fn test_metadata_counts() {
        let meta = sample_corpus().metadata();
        assert_eq!(meta.chunk_count, 2);
        assert_eq!(meta.section_count, 1);
        assert_eq!(meta.total_tokens, 16);
        assert_eq!(meta.model, "text-embedding-3-large");
    }

    #[test]
    fn test_section_lookup() {
        let corpus = sample_corpus();
        assert!(corpus.section("finance").is_some());
        assert!(corpus.section("missing").is_none());
    }

    #[test]
    fn test_embedded_chunk_json_shape() {
        // The artifact flattens chunk fields next to the embedding, matching
        // the on-disk format the retriever consumes.
        let corpus = sample_corpus();
        let json = serde_json::to_value(&corpus.chunks[0]).unwrap();
        assert_eq!(json["id"], "finance_chunk_0");
        assert_eq!(json["section_id"], "finance");
        assert!(json["embedding"].is_array());

        let back: EmbeddedChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back.chunk.id, "finance_chunk_0");
        assert_eq!(back.embedding.len(), 3);
    }
}
