pub mod chunker;

pub use chunker::{Chunk, TextChunker};
