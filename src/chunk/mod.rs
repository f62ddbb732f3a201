// src/chunk/mod.rs
// Chunker (§2, §4 glossary "Chunk"): text -> bounded overlapping chunks with
// stable metadata.

use serde_json::{json, Value};

use crate::config::llm::ChunkConfig;

#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub text: String,
    pub notebook_id: String,
    pub source_id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_hash: String,
    pub byte_size: i64,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub metadata: Value,
}

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(config: &ChunkConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1).max(1)),
        }
    }

    /// Splits `input.text` into bounded, overlapping chunks on character
    /// boundaries, attaching the provenance metadata every chunk must carry
    /// (§3: notebook_id, source_id, user_id, file_name, file_hash, byte-size,
    /// upload timestamp).
    pub fn chunk(&self, input: &ChunkInput) -> Vec<TextChunk> {
        let chars: Vec<char> = input.text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let text: String = chars[start..end].iter().collect();
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    text: trimmed.to_string(),
                    metadata: json!({
                        "notebook_id": input.notebook_id,
                        "source_id": input.source_id,
                        "user_id": input.user_id,
                        "file_name": input.file_name,
                        "file_hash": input.file_hash,
                        "byte_size": input.byte_size,
                        "uploaded_at": input.uploaded_at.to_rfc3339(),
                        "chunk_index": index,
                    }),
                });
                index += 1;
            }

            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input(text: &str) -> ChunkInput {
        ChunkInput {
            text: text.to_string(),
            notebook_id: "nb1".to_string(),
            source_id: "doc1".to_string(),
            user_id: "u1".to_string(),
            file_name: "doc.txt".to_string(),
            file_hash: "abc123".to_string(),
            byte_size: text.len() as i64,
            uploaded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn short_text_produces_single_chunk() {
        let config = ChunkConfig { chunk_size: 1000, chunk_overlap: 200 };
        let chunker = Chunker::new(&config);
        let chunks = chunker.chunk(&sample_input("hello world"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].metadata["notebook_id"], "nb1");
    }

    #[test]
    fn long_text_overlaps_and_covers_all_characters() {
        let config = ChunkConfig { chunk_size: 10, chunk_overlap: 3 };
        let chunker = Chunker::new(&config);
        let text = "a".repeat(50);
        let chunks = chunker.chunk(&sample_input(&text));
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata["chunk_index"], i);
        }
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let config = ChunkConfig { chunk_size: 100, chunk_overlap: 10 };
        let chunker = Chunker::new(&config);
        let chunks = chunker.chunk(&sample_input(""));
        assert!(chunks.is_empty());
    }
}
