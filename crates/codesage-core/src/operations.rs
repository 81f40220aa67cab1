//! In-process registry of background analyses.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::enhancer::AnalyzeReport;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed { report: Box<AnalyzeReport> },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub source_path: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: OperationStatus,
}

/// Cheap to clone; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: Arc<RwLock<HashMap<String, Operation>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running operation and return its id.
    pub async fn start(&self, source_path: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let operation = Operation {
            id: id.clone(),
            source_path: source_path.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: OperationStatus::Running,
        };
        self.operations.write().await.insert(id.clone(), operation);
        id
    }

    pub async fn complete(&self, id: &str, report: AnalyzeReport) {
        self.finish(id, OperationStatus::Completed {
            report: Box::new(report),
        })
        .await;
    }

    pub async fn fail(&self, id: &str, error: impl Into<String>) {
        self.finish(id, OperationStatus::Failed { error: error.into() })
            .await;
    }

    async fn finish(&self, id: &str, status: OperationStatus) {
        if let Some(operation) = self.operations.write().await.get_mut(id) {
            operation.status = status;
            operation.finished_at = Some(Utc::now());
        }
    }

    pub async fn get(&self, id: &str) -> Option<Operation> {
        self.operations.read().await.get(id).cloned()
    }

    pub async fn running(&self) -> usize {
        self.operations
            .read()
            .await
            .values()
            .filter(|op| matches!(op.status, OperationStatus::Running))
            .count()
    }
}
