//! Qdrant backend for the chunk store.
//!
//! Points carry one named vector so that records stored without an
//! embedding (degraded mode) remain valid points with payload only.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use codesage_config::QdrantSettings;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, GetPointsBuilder, ListValue, PointId,
    PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, Struct,
    UpsertPointsBuilder, Value, VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};

use crate::model::{ChunkId, ChunkPayload, PayloadFilter, SearchHit, StoredChunkRecord};
use crate::vector::{CollectionInfo, ScrollPage, ScrolledPoint, VectorIndex};

/// Payload fields indexed as keywords for filtered scroll and delete.
const INDEXED_FIELDS: &[&str] = &["sourcePath", "filePath", "language"];

/// Configuration for connecting to Qdrant.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Qdrant server URL
    pub url: String,

    /// API key (optional)
    pub api_key: Option<String>,

    /// Collection name
    pub collection_name: String,

    /// Name of the vector inside each point
    pub vector_name: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self::from(&QdrantSettings::default())
    }
}

impl From<&QdrantSettings> for QdrantConfig {
    fn from(settings: &QdrantSettings) -> Self {
        Self {
            url: settings.url.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            collection_name: settings.collection.clone(),
            vector_name: settings.vector_name.clone(),
        }
    }
}

pub struct QdrantIndex {
    client: Qdrant,
    collection_name: String,
    vector_name: String,
}

impl QdrantIndex {
    /// Build a client. No request is made until the first operation.
    pub fn from_config(config: &QdrantConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url).skip_compatibility_check();

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder.build().context("Failed to build Qdrant client")?;

        debug!("Qdrant client configured for {}", config.url);

        Ok(Self {
            client,
            collection_name: config.collection_name.clone(),
            vector_name: config.vector_name.clone(),
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn point_struct(&self, record: StoredChunkRecord) -> Result<PointStruct> {
        let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();
        if let Some(vector) = record.vector {
            vectors.insert(self.vector_name.clone(), vector);
        }
        let payload = payload_to_qdrant_map(&record.payload)?;
        Ok(PointStruct::new(record.id.as_str().to_string(), vectors, payload))
    }
}

fn build_filter(filter: Option<&PayloadFilter>) -> Option<Filter> {
    let filter = filter.filter(|f| !f.is_empty())?;
    let conditions: Vec<Condition> = filter
        .conditions()
        .into_iter()
        .map(|(field, value)| Condition::matches(field, value.to_string()))
        .collect();
    Some(Filter::must(conditions))
}

fn point_id_string(id: Option<PointId>) -> String {
    id.and_then(|id| id.point_id_options)
        .map(|options| match options {
            PointIdOptions::Uuid(u) => u,
            PointIdOptions::Num(n) => n.to_string(),
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .context("Failed to check collection")?;
        if !exists {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(&self.collection_name)
            .await
            .context("Failed to get collection info")?
            .result;

        let points = info
            .as_ref()
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize;

        let dimension = info
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|config| match config {
                VectorsConfigKind::Params(params) => Some(params.size as usize),
                VectorsConfigKind::ParamsMap(map) => {
                    map.map.get(&self.vector_name).map(|p| p.size as usize)
                }
            });

        Ok(Some(CollectionInfo { dimension, points }))
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        info!(
            "Creating collection: {} with {} dimensions",
            self.collection_name, dimension
        );

        let mut vectors_config = VectorsConfigBuilder::default();
        vectors_config.add_named_vector_params(
            self.vector_name.clone(),
            VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(vectors_config),
            )
            .await
            .context("Failed to create collection")?;

        for field in INDEXED_FIELDS {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection_name,
                    *field,
                    FieldType::Keyword,
                ))
                .await
                .with_context(|| format!("Failed to index payload field {}", field))?;
        }

        info!("Collection {} created successfully", self.collection_name);
        Ok(())
    }

    async fn upsert(&self, records: Vec<StoredChunkRecord>) -> Result<()> {
        if records.is_empty() {
            debug!("No points to upsert");
            return Ok(());
        }

        debug!("Upserting {} points", records.len());

        let points = records
            .into_iter()
            .map(|r| self.point_struct(r))
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await
            .context("Failed to upsert points")?;

        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<&PayloadFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        debug!("Searching for {} similar vectors", limit);

        let mut search_builder =
            SearchPointsBuilder::new(&self.collection_name, vector, limit as u64)
                .vector_name(self.vector_name.clone())
                .with_payload(true);

        if let Some(threshold) = score_threshold {
            search_builder = search_builder.score_threshold(threshold);
        }
        if let Some(filter) = build_filter(filter) {
            search_builder = search_builder.filter(filter);
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .context("Failed to search points")?;

        let hits = results
            .result
            .into_iter()
            .map(|p| {
                Ok(SearchHit {
                    id: ChunkId::from_raw(point_id_string(p.id)),
                    score: p.score,
                    payload: qdrant_map_to_payload(p.payload)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Found {} search hits", hits.len());
        Ok(hits)
    }

    async fn scroll(
        &self,
        filter: Option<&PayloadFilter>,
        offset: Option<ChunkId>,
        limit: usize,
    ) -> Result<ScrollPage> {
        let mut builder = ScrollPointsBuilder::new(&self.collection_name)
            .limit(limit.max(1) as u32)
            .with_payload(true)
            .with_vectors(false);

        if let Some(filter) = build_filter(filter) {
            builder = builder.filter(filter);
        }
        if let Some(offset) = offset {
            builder = builder.offset(PointId::from(offset.as_str().to_string()));
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .context("Failed to scroll points")?;

        let points = response
            .result
            .into_iter()
            .map(|p| {
                Ok(ScrolledPoint {
                    id: ChunkId::from_raw(point_id_string(p.id)),
                    payload: qdrant_map_to_payload(p.payload)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ScrollPage {
            points,
            next_offset: response
                .next_page_offset
                .map(|id| ChunkId::from_raw(point_id_string(Some(id)))),
        })
    }

    async fn existing(&self, ids: &[ChunkId]) -> Result<Vec<ChunkId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let point_ids: Vec<PointId> = ids
            .iter()
            .map(|id| PointId::from(id.as_str().to_string()))
            .collect();

        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection_name, point_ids)
                    .with_payload(false)
                    .with_vectors(false),
            )
            .await
            .context("Failed to retrieve points")?;

        Ok(response
            .result
            .into_iter()
            .map(|p| ChunkId::from_raw(point_id_string(p.id)))
            .collect())
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<()> {
        if ids.is_empty() {
            debug!("No points to delete");
            return Ok(());
        }

        debug!("Deleting {} points", ids.len());

        let point_ids: Vec<PointId> = ids
            .iter()
            .map(|id| PointId::from(id.as_str().to_string()))
            .collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .context("Failed to delete points")?;

        Ok(())
    }

    async fn count(&self, filter: Option<&PayloadFilter>) -> Result<usize> {
        let mut builder = CountPointsBuilder::new(&self.collection_name).exact(true);
        if let Some(filter) = build_filter(filter) {
            builder = builder.filter(filter);
        }

        let response = self
            .client
            .count(builder)
            .await
            .context("Failed to count points")?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

/// Convert a payload to Qdrant's `HashMap<String, Value>`.
fn payload_to_qdrant_map(payload: &ChunkPayload) -> Result<HashMap<String, Value>> {
    match serde_json::to_value(payload).context("Failed to serialize payload")? {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, json_to_qdrant(v)))
            .collect()),
        other => anyhow::bail!("payload serialized to a non-object: {}", other),
    }
}

/// Convert Qdrant's `HashMap<String, Value>` back to a payload.
fn qdrant_map_to_payload(map: HashMap<String, Value>) -> Result<ChunkPayload> {
    let object: serde_json::Map<String, serde_json::Value> = map
        .into_iter()
        .map(|(k, v)| (k, qdrant_to_json(v)))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .context("Stored payload does not match the chunk schema")
}

fn json_to_qdrant(value: serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map.into_iter().map(|(k, v)| (k, json_to_qdrant(v))).collect(),
        }),
    };
    Value { kind: Some(kind) }
}

fn qdrant_to_json(value: Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisResult, AnalysisType, Entity};
    use chrono::Utc;

    fn payload() -> ChunkPayload {
        let mut analysis = AnalysisResult::empty(AnalysisType::Comprehensive, "rust");
        analysis.summary = "Entry point".to_string();
        analysis.complexity = Some(3.5);
        analysis.entities = vec![Entity {
            name: "main".to_string(),
            kind: "function".to_string(),
            description: "starts the app".to_string(),
        }];
        ChunkPayload {
            source_path: "/repo".to_string(),
            file_path: "/repo/src/main.rs".to_string(),
            relative_path: "src/main.rs".to_string(),
            language: "rust".to_string(),
            start_line: 0,
            end_line: 41,
            code_snippet: "fn main() {}".to_string(),
            analysis,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_qdrant_config_from_settings() {
        let config = QdrantConfig::default();
        assert_eq!(config.url, "http://localhost:6334");
        assert!(config.api_key.is_none());
        assert_eq!(config.collection_name, crate::DEFAULT_COLLECTION);
        assert_eq!(config.vector_name, crate::DEFAULT_VECTOR_NAME);
    }

    #[test]
    fn test_payload_map_uses_typed_values() {
        let map = payload_to_qdrant_map(&payload()).unwrap();

        assert!(matches!(
            map.get("filePath").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue(ref s)) if s == "/repo/src/main.rs"
        ));
        assert!(matches!(
            map.get("endLine").and_then(|v| v.kind.clone()),
            Some(Kind::IntegerValue(41))
        ));
        assert!(matches!(
            map.get("analysis").and_then(|v| v.kind.clone()),
            Some(Kind::StructValue(_))
        ));
    }

    #[test]
    fn test_payload_survives_qdrant_values() {
        let original = payload();
        let restored = qdrant_map_to_payload(payload_to_qdrant_map(&original).unwrap()).unwrap();

        assert_eq!(restored.file_path, original.file_path);
        assert_eq!(restored.end_line, 41);
        assert_eq!(restored.analysis.entities, original.analysis.entities);
        assert_eq!(restored.analysis.complexity, Some(3.5));
    }

    #[test]
    fn test_incomplete_payload_is_rejected() {
        let mut map = HashMap::new();
        map.insert(
            "filePath".to_string(),
            Value {
                kind: Some(Kind::StringValue("x".to_string())),
            },
        );
        assert!(qdrant_map_to_payload(map).is_err());
    }

    #[test]
    fn test_build_filter() {
        assert!(build_filter(None).is_none());
        assert!(build_filter(Some(&PayloadFilter::new())).is_none());

        let filter = build_filter(Some(
            &PayloadFilter::new()
                .with_source_path("/repo")
                .with_language("rust"),
        ))
        .unwrap();
        assert_eq!(filter.must.len(), 2);
    }

    #[test]
    fn test_point_id_string() {
        assert_eq!(point_id_string(Some(PointId::from(7u64))), "7");
        assert_eq!(point_id_string(None), "");
    }
}
