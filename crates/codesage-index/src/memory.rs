//! In-memory [`VectorIndex`] for tests and offline runs.
//!
//! Points live in a `BTreeMap` behind `std::sync::RwLock`, so scrolling is
//! ordered by id. Search is brute-force cosine similarity.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::model::{ChunkId, PayloadFilter, SearchHit, StoredChunkRecord};
use crate::vector::{CollectionInfo, ScrollPage, ScrolledPoint, VectorIndex};

pub struct MemoryIndex {
    dimension: RwLock<Option<usize>>,
    points: RwLock<BTreeMap<ChunkId, StoredChunkRecord>>,
    available: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            dimension: RwLock::new(None),
            points: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of every stored record, ordered by id.
    pub fn records(&self) -> Vec<StoredChunkRecord> {
        self.points
            .read()
            .map(|points| points.values().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            bail!("memory index is unavailable")
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        self.ensure_available()?;
        let dimension = *self.dimension.read().map_err(poisoned)?;
        let points = self.points.read().map_err(poisoned)?.len();
        Ok(dimension.map(|d| CollectionInfo {
            dimension: Some(d),
            points,
        }))
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        self.ensure_available()?;
        *self.dimension.write().map_err(poisoned)? = Some(dimension);
        Ok(())
    }

    async fn upsert(&self, records: Vec<StoredChunkRecord>) -> Result<()> {
        self.ensure_available()?;
        let mut points = self.points.write().map_err(poisoned)?;
        for record in records {
            points.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<&PayloadFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_available()?;
        let points = self.points.read().map_err(poisoned)?;
        let mut hits: Vec<SearchHit> = points
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)))
            .filter_map(|r| {
                let stored = r.vector.as_ref()?;
                let score = cosine_sim(&vector, stored);
                if score_threshold.map_or(false, |t| score < t) {
                    return None;
                }
                Some(SearchHit {
                    id: r.id.clone(),
                    score,
                    payload: r.payload.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        filter: Option<&PayloadFilter>,
        offset: Option<ChunkId>,
        limit: usize,
    ) -> Result<ScrollPage> {
        self.ensure_available()?;
        let points = self.points.read().map_err(poisoned)?;
        let mut matching = points
            .values()
            .filter(|r| offset.as_ref().map_or(true, |o| &r.id >= o))
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)));

        let page: Vec<ScrolledPoint> = matching
            .by_ref()
            .take(limit.max(1))
            .map(|r| ScrolledPoint {
                id: r.id.clone(),
                payload: r.payload.clone(),
            })
            .collect();
        let next_offset = matching.next().map(|r| r.id.clone());

        Ok(ScrollPage {
            points: page,
            next_offset,
        })
    }

    async fn existing(&self, ids: &[ChunkId]) -> Result<Vec<ChunkId>> {
        self.ensure_available()?;
        let points = self.points.read().map_err(poisoned)?;
        Ok(ids.iter().filter(|id| points.contains_key(*id)).cloned().collect())
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<()> {
        self.ensure_available()?;
        let mut points = self.points.write().map_err(poisoned)?;
        for id in ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn count(&self, filter: Option<&PayloadFilter>) -> Result<usize> {
        self.ensure_available()?;
        let points = self.points.read().map_err(poisoned)?;
        Ok(points
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.payload)))
            .count())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisResult, AnalysisType, ChunkPayload};
    use chrono::Utc;

    fn record(file: &str, start: usize, vector: Option<Vec<f32>>) -> StoredChunkRecord {
        StoredChunkRecord {
            id: ChunkId::new(file, start, start + 9),
            vector,
            payload: ChunkPayload {
                source_path: "/repo".to_string(),
                file_path: format!("/repo/{}", file),
                relative_path: file.to_string(),
                language: "rust".to_string(),
                start_line: start,
                end_line: start + 9,
                code_snippet: String::new(),
                analysis: AnalysisResult::empty(AnalysisType::Semantic, "rust"),
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn test_cosine_sim() {
        assert!((cosine_sim(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_sim(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_sim(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_orders_filters_and_skips_vectorless() {
        let index = MemoryIndex::new();
        index.create_collection(2).await.unwrap();
        index
            .upsert(vec![
                record("a.rs", 0, Some(vec![1.0, 0.0])),
                record("b.rs", 0, Some(vec![0.7, 0.7])),
                record("c.rs", 0, None),
            ])
            .await
            .unwrap();

        let hits = index.search(vec![1.0, 0.0], 10, None, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.relative_path, "a.rs");
        assert!(hits[0].score >= hits[1].score);

        let filtered = index
            .search(
                vec![1.0, 0.0],
                10,
                Some(&PayloadFilter::new().with_file_path("/repo/b.rs")),
                None,
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let thresholded = index.search(vec![1.0, 0.0], 10, None, Some(0.9)).await.unwrap();
        assert_eq!(thresholded.len(), 1);
    }

    #[tokio::test]
    async fn test_scroll_pages_cover_everything() {
        let index = MemoryIndex::new();
        index
            .upsert((0..5).map(|i| record("a.rs", i * 10, None)).collect())
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut offset = None;
        loop {
            let page = index.scroll(None, offset, 2).await.unwrap();
            seen.extend(page.points.into_iter().map(|p| p.id));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let index = MemoryIndex::new();
        index.set_available(false);
        assert!(index.collection_info().await.is_err());
        index.set_available(true);
        assert!(index.collection_info().await.unwrap().is_none());
    }
}
