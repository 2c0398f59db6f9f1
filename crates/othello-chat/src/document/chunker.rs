use anyhow::{Context, Result};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
}

/// Character-bounded splitter with overlap between neighbouring chunks.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!("Chunking text: {} chars", text.chars().count());

        let config = ChunkConfig::new(self.chunk_size)
            .with_overlap(self.chunk_overlap)
            .context("Invalid chunk configuration")?;
        let splitter = TextSplitter::new(config);

        let chunks: Vec<Chunk> = splitter
            .chunks(text)
            .enumerate()
            .map(|(index, content)| Chunk {
                index,
                content: content.to_string(),
            })
            .collect();

        debug!("Created {} chunks", chunks.len());

        Ok(chunks)
    }
}
