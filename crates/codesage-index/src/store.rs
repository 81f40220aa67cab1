//! The chunk store: persistence and similarity search over analyzed chunks.
//!
//! Wraps a [`VectorIndex`] backend with lazy, retried collection setup,
//! batched writes, threshold enforcement and scroll-based bulk operations.
//! Initialization happens at most once; concurrent callers wait on the same
//! attempt. A failed initialization is not cached, so the next operation
//! tries again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use codesage_config::QdrantSettings;
use codesage_providers::{retry, RetryPolicy};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::model::{ChunkId, PayloadFilter, SearchHit, StoredChunkRecord};
use crate::vector::VectorIndex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector storage unavailable: {0}")]
    Unavailable(String),

    #[error("record {id} has a {actual}-dimensional vector, collection expects {expected}")]
    InvalidVector {
        id: ChunkId,
        expected: usize,
        actual: usize,
    },

    #[error("vector storage operation failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub dimension: usize,
    pub upsert_batch_size: usize,
    pub scroll_page_size: usize,
    pub init_policy: RetryPolicy,
}

impl From<&QdrantSettings> for StoreSettings {
    fn from(settings: &QdrantSettings) -> Self {
        Self {
            dimension: settings.dimension,
            upsert_batch_size: settings.upsert_batch_size.max(1),
            scroll_page_size: settings.scroll_page_size.max(1),
            init_policy: RetryPolicy::new(
                settings.init_retries,
                Duration::from_millis(settings.init_backoff_ms),
                true,
            ),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&QdrantSettings::default())
    }
}

/// Outcome of the one-time collection setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub created: bool,
    /// Dimension of a pre-existing collection that differs from the configured one
    pub existing_dimension_mismatch: Option<usize>,
}

impl InitReport {
    pub fn warning(&self, expected: usize) -> Option<String> {
        self.existing_dimension_mismatch.map(|actual| {
            format!(
                "existing collection has {}-dimensional vectors but {} are configured",
                actual, expected
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub score_threshold: f32,
    pub filter: Option<PayloadFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            score_threshold: 0.5,
            filter: None,
        }
    }
}

/// Aggregate figures over stored chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_chunks: usize,
    pub unique_files: usize,
    pub languages: BTreeMap<String, usize>,
}

pub struct ChunkStore {
    backend: Arc<dyn VectorIndex>,
    settings: StoreSettings,
    init: OnceCell<InitReport>,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn VectorIndex>, settings: StoreSettings) -> Self {
        Self {
            backend,
            settings,
            init: OnceCell::new(),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn dimension(&self) -> usize {
        self.settings.dimension
    }

    /// Ensure the collection exists. Idempotent; retried with backoff.
    pub async fn initialize(&self) -> Result<&InitReport, StoreError> {
        self.init
            .get_or_try_init(|| async {
                retry(&self.settings.init_policy, "vector storage initialization", || {
                    self.setup_collection()
                })
                .await
                .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
            })
            .await
    }

    async fn setup_collection(&self) -> anyhow::Result<InitReport> {
        match self.backend.collection_info().await? {
            None => {
                self.backend.create_collection(self.settings.dimension).await?;
                info!(
                    "Created {} collection with {} dimensions",
                    self.backend.name(),
                    self.settings.dimension
                );
                Ok(InitReport {
                    created: true,
                    existing_dimension_mismatch: None,
                })
            }
            Some(info) => {
                let mismatch = info.dimension.filter(|d| *d != self.settings.dimension);
                if let Some(actual) = mismatch {
                    warn!(
                        "Existing collection has {}-dimensional vectors, configured dimension is {}; continuing",
                        actual, self.settings.dimension
                    );
                } else {
                    debug!("Collection already exists with {} points", info.points);
                }
                Ok(InitReport {
                    created: false,
                    existing_dimension_mismatch: mismatch,
                })
            }
        }
    }

    /// Insert or replace records in batches. Returns the number written.
    pub async fn upsert(&self, records: Vec<StoredChunkRecord>) -> Result<usize, StoreError> {
        self.initialize().await?;

        for record in &records {
            if let Some(vector) = &record.vector {
                if vector.len() != self.settings.dimension {
                    return Err(StoreError::InvalidVector {
                        id: record.id.clone(),
                        expected: self.settings.dimension,
                        actual: vector.len(),
                    });
                }
            }
        }

        let total = records.len();
        let mut batch = Vec::with_capacity(self.settings.upsert_batch_size);
        for record in records {
            batch.push(record);
            if batch.len() == self.settings.upsert_batch_size {
                self.backend.upsert(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            self.backend.upsert(batch).await?;
        }

        debug!("Stored {} chunk records", total);
        Ok(total)
    }

    /// Nearest chunks with score >= threshold, best first.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.initialize().await?;

        let mut hits = self
            .backend
            .search(
                vector,
                options.limit,
                options.filter.as_ref(),
                Some(options.score_threshold),
            )
            .await?;

        hits.retain(|h| h.score >= options.score_threshold);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(options.limit);
        Ok(hits)
    }

    pub async fn delete_by_id(&self, id: &ChunkId) -> Result<(), StoreError> {
        self.initialize().await?;
        self.backend.delete(std::slice::from_ref(id)).await?;
        Ok(())
    }

    /// Remove every chunk of one file. Returns the number removed.
    pub async fn delete_by_path(&self, file_path: &str) -> Result<usize, StoreError> {
        self.delete_matching(&PayloadFilter::new().with_file_path(file_path))
            .await
    }

    /// Remove every chunk of one analyzed codebase.
    pub async fn delete_codebase(&self, source_path: &str) -> Result<usize, StoreError> {
        let deleted = self
            .delete_matching(&PayloadFilter::new().with_source_path(source_path))
            .await?;
        info!("Removed {} chunks of {}", deleted, source_path);
        Ok(deleted)
    }

    async fn delete_matching(&self, filter: &PayloadFilter) -> Result<usize, StoreError> {
        self.initialize().await?;

        let mut deleted = 0;
        let mut offset = None;
        loop {
            let page = self
                .backend
                .scroll(Some(filter), offset, self.settings.scroll_page_size)
                .await?;
            let ids: Vec<ChunkId> = page.points.into_iter().map(|p| p.id).collect();
            if !ids.is_empty() {
                self.backend.delete(&ids).await?;
                deleted += ids.len();
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(deleted)
    }

    /// Totals, unique files and language histogram, optionally for one codebase.
    pub async fn stats(&self, source_path: Option<&str>) -> Result<IndexStats, StoreError> {
        self.initialize().await?;

        let filter = source_path.map(|s| PayloadFilter::new().with_source_path(s));
        let mut stats = IndexStats::default();
        let mut files = HashSet::new();
        let mut offset = None;
        loop {
            let page = self
                .backend
                .scroll(filter.as_ref(), offset, self.settings.scroll_page_size)
                .await?;
            for point in page.points {
                stats.total_chunks += 1;
                *stats.languages.entry(point.payload.language).or_insert(0) += 1;
                files.insert(point.payload.file_path);
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        stats.unique_files = files.len();
        Ok(stats)
    }

    /// True when any chunk of the codebase is stored.
    pub async fn is_analyzed(&self, source_path: &str) -> Result<bool, StoreError> {
        self.initialize().await?;
        let page = self
            .backend
            .scroll(
                Some(&PayloadFilter::new().with_source_path(source_path)),
                None,
                1,
            )
            .await?;
        Ok(!page.points.is_empty())
    }

    /// Which of `ids` are already stored.
    pub async fn existing_ids(&self, ids: &[ChunkId]) -> Result<HashSet<ChunkId>, StoreError> {
        self.initialize().await?;
        let mut found = HashSet::new();
        for batch in ids.chunks(self.settings.scroll_page_size) {
            found.extend(self.backend.existing(batch).await?);
        }
        Ok(found)
    }

    pub async fn count(&self, source_path: Option<&str>) -> Result<usize, StoreError> {
        self.initialize().await?;
        let filter = source_path.map(|s| PayloadFilter::new().with_source_path(s));
        Ok(self.backend.count(filter.as_ref()).await?)
    }
}
