//! Codebase scanning, chunking, embedding and vector storage for codesage.
//!
//! This crate provides:
//! - Depth-bounded directory scanning with glob filters and binary rejection
//! - Overlapping line-window chunking with regex structural hints
//! - Embedding generation over two HTTP dialects (legacy and OpenAI-compatible)
//! - Vector storage in Qdrant, with an in-memory backend for tests
//! - The chunk store: idempotent upsert, thresholded search, scroll-based
//!   deletes and statistics

pub mod chunker;
pub mod embeddings;
pub mod language;
pub mod memory;
pub mod model;
pub mod qdrant;
pub mod scanner;
pub mod store;
pub mod structure;
pub mod vector;

// Re-exports
pub use chunker::{line_windows, ChunkOptions, ChunkerError, CodeChunk, CodeChunker};
pub use embeddings::{
    EmbeddingDialect, EmbeddingError, EmbeddingProvider, HttpEmbeddings, MockEmbeddings,
};
pub use memory::MemoryIndex;
pub use model::{
    AnalysisResult, AnalysisType, ChunkId, ChunkPayload, Entity, PayloadFilter, SearchHit,
    StoredChunkRecord,
};
pub use qdrant::{QdrantConfig, QdrantIndex};
pub use scanner::{FileRecord, ScanError, ScanOptions, ScanResult, ScanWarning, Scanner};
pub use store::{ChunkStore, IndexStats, InitReport, SearchOptions, StoreError, StoreSettings};
pub use structure::{
    DetectorRegistry, RegexStructureDetector, Structure, StructureDetector, StructureKind,
};
pub use vector::{CollectionInfo, ScrollPage, ScrolledPoint, VectorIndex};

/// Default collection name
pub const DEFAULT_COLLECTION: &str = "codesage-chunks";

/// Default named vector inside each point
pub const DEFAULT_VECTOR_NAME: &str = "code";
