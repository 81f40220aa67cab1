//! Backend seam for vector storage.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{ChunkId, ChunkPayload, PayloadFilter, SearchHit, StoredChunkRecord};

/// State of an existing collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Size of the stored vector, when the backend reports one
    pub dimension: Option<usize>,
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrolledPoint {
    pub id: ChunkId,
    pub payload: ChunkPayload,
}

/// One page of a filtered scroll. `next_offset` is the first id of the next page.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<ScrolledPoint>,
    pub next_offset: Option<ChunkId>,
}

/// Storage operations the chunk store needs from a vector database.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// `None` when the collection does not exist yet.
    async fn collection_info(&self) -> Result<Option<CollectionInfo>>;

    async fn create_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or replace by id.
    async fn upsert(&self, records: Vec<StoredChunkRecord>) -> Result<()>;

    /// Cosine search. Implementations may apply `score_threshold` natively.
    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<&PayloadFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>>;

    async fn scroll(
        &self,
        filter: Option<&PayloadFilter>,
        offset: Option<ChunkId>,
        limit: usize,
    ) -> Result<ScrollPage>;

    /// The subset of `ids` that exist.
    async fn existing(&self, ids: &[ChunkId]) -> Result<Vec<ChunkId>>;

    async fn delete(&self, ids: &[ChunkId]) -> Result<()>;

    async fn count(&self, filter: Option<&PayloadFilter>) -> Result<usize>;

    fn name(&self) -> &str;
}
