//! The progressive enhancer: top-level coordinator of the analyze and query
//! paths.
//!
//! Runs with the minimum set of services and switches richer behaviour on
//! when it is available: embeddings, git history, an external packer. The
//! settings snapshot is never mutated; [`ProgressiveEnhancer::probe`] reports
//! what is usable instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use codesage_config::Settings;
use codesage_index::{
    AnalysisResult, AnalysisType, ChunkId, ChunkOptions, ChunkPayload, ChunkStore, ChunkerError,
    CodeChunk, CodeChunker, EmbeddingProvider, HttpEmbeddings, IndexStats, MockEmbeddings,
    QdrantConfig, QdrantIndex, ScanOptions, ScanResult, Scanner, StoreSettings,
    StoredChunkRecord, VectorIndex,
};
use codesage_providers::{resolve_provider, LlmBackend, ResolvedProvider, RetryPolicy};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analyzer::Analyzer;
use crate::error::{CodesageError, ItemError, Stage};
use crate::git::{GitHistory, GitSummary};
use crate::operations::{Operation, OperationRegistry};
use crate::preprocess::{Preprocessor, Representation};
use crate::query::{ExtractRequest, ExtractResponse, QueryEngine, QueryRequest, QueryResponse};

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub analysis_type: AnalysisType,
    pub include_git: bool,
    /// Drop stored chunks of the codebase and rebuild the cached representation
    pub force: bool,
    /// Re-analyze chunks that are already stored
    pub update_existing: bool,
    /// Run in the foreground regardless of codebase size
    pub wait: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            analysis_type: AnalysisType::Semantic,
            include_git: false,
            force: false,
            update_existing: false,
            wait: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeReport {
    pub success: bool,
    pub source_path: String,
    pub analysis_type: AnalysisType,
    pub files_scanned: usize,
    pub files_analyzed: usize,
    pub chunks_analyzed: usize,
    pub chunks_skipped: usize,
    pub chunks_degraded: usize,
    pub chunks_without_vectors: usize,
    pub errors: Vec<ItemError>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representation: Option<Representation>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub enum AnalyzeOutcome {
    Completed(AnalyzeReport),
    /// Continuing in the background; poll with [`ProgressiveEnhancer::status`]
    Started {
        operation_id: String,
        source_path: String,
        files: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub llm_backend: &'static str,
    pub llm_model: String,
    pub llm_healthy: bool,
    pub embeddings: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub git: bool,
    pub index_backend: String,
    pub index_reachable: bool,
    pub warnings: Vec<String>,
}

/// Collaborators normally built from settings; tests inject their own.
pub struct Components {
    pub provider: ResolvedProvider,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Components {
    /// Resolves the LLM backend, health-checking each candidate.
    pub async fn from_settings(settings: &Settings) -> Result<Self, CodesageError> {
        let index = QdrantIndex::from_config(&QdrantConfig::from(&settings.qdrant)).map_err(|e| {
            CodesageError::Configuration(format!("cannot create Qdrant client: {:#}", e))
        })?;
        Ok(Self {
            provider: resolve_provider(&settings.llm).await,
            index: Arc::new(index),
            embedder: select_embedder(settings)?,
        })
    }
}

/// Mock mode embeds offline; otherwise the HTTP endpoint when enabled.
pub fn select_embedder(
    settings: &Settings,
) -> Result<Option<Arc<dyn EmbeddingProvider>>, CodesageError> {
    let dimension = settings.qdrant.dimension;
    if settings.llm.mock {
        return Ok(Some(Arc::new(MockEmbeddings::new(dimension))));
    }
    if !settings.features.local_embeddings {
        info!("Embeddings disabled; chunks will be stored without vectors");
        return Ok(None);
    }
    let client = HttpEmbeddings::new(&settings.embeddings, dimension)
        .map_err(|e| CodesageError::Configuration(e.to_string()))?;
    Ok(Some(Arc::new(client)))
}

#[derive(Clone)]
pub struct ProgressiveEnhancer {
    settings: Arc<Settings>,
    backend: LlmBackend,
    provider_warnings: Arc<Vec<String>>,
    analyzer: Arc<Analyzer>,
    store: Arc<ChunkStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    query_engine: Arc<QueryEngine>,
    scanner: Arc<Scanner>,
    chunker: Arc<CodeChunker>,
    preprocessor: Arc<Preprocessor>,
    operations: OperationRegistry,
}

impl ProgressiveEnhancer {
    pub async fn new(settings: Settings) -> Result<Self, CodesageError> {
        settings.validate()?;
        let components = Components::from_settings(&settings).await?;
        Self::with_components(settings, components)
    }

    pub fn with_components(settings: Settings, components: Components) -> Result<Self, CodesageError> {
        settings.validate()?;
        let Components {
            provider,
            index,
            embedder,
        } = components;

        let analyzer = Arc::new(Analyzer::new(
            provider.provider.clone(),
            RetryPolicy::from_llm(&settings.llm),
            settings.pipeline.concurrency,
        ));
        let store = Arc::new(ChunkStore::new(index, StoreSettings::from(&settings.qdrant)));
        let query_engine = Arc::new(QueryEngine::new(
            store.clone(),
            embedder.clone(),
            analyzer.clone(),
            settings.pipeline.query_limit,
            settings.pipeline.score_threshold,
        ));
        let scanner = Scanner::new(ScanOptions::from(&settings.scan))?;
        let chunker = CodeChunker::new(ChunkOptions::from(&settings.chunking))?;
        let external = settings
            .features
            .advanced_preprocessing
            .then(|| settings.features.preprocessor_command.clone());
        let preprocessor = Preprocessor::new(settings.cache_dir(), external);

        info!(
            "Progressive enhancer ready: llm={} ({}), embeddings={}, index={}",
            provider.backend.kind(),
            provider.provider.model(),
            embedder.as_ref().map_or("disabled", |e| e.model_name()),
            store.backend_name()
        );

        Ok(Self {
            settings: Arc::new(settings),
            backend: provider.backend,
            provider_warnings: Arc::new(provider.warnings),
            analyzer,
            store,
            embedder,
            query_engine,
            scanner: Arc::new(scanner),
            chunker: Arc::new(chunker),
            preprocessor: Arc::new(preprocessor),
            operations: OperationRegistry::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Report which optional services are usable right now.
    pub async fn probe(&self) -> Capabilities {
        let mut warnings: Vec<String> = self.provider_warnings.iter().cloned().collect();

        let provider = self.analyzer.provider();
        let llm_healthy = match provider.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("LLM health check failed: {}", e));
                false
            }
        };

        let index_reachable = match self.store.initialize().await {
            Ok(report) => {
                if let Some(w) = report.warning(self.store.dimension()) {
                    warnings.push(w);
                }
                true
            }
            Err(e) => {
                warnings.push(e.to_string());
                false
            }
        };

        Capabilities {
            llm_backend: self.backend.kind(),
            llm_model: provider.model().to_string(),
            llm_healthy,
            embeddings: self.embedder.is_some(),
            embedding_model: self.embedder.as_ref().map(|e| e.model_name().to_string()),
            git: self.settings.features.git_analysis && git_installed().await,
            index_backend: self.store.backend_name().to_string(),
            index_reachable,
            warnings,
        }
    }

    /// Analyze a codebase, in the foreground when it is small (or `wait` is
    /// set) and in the background otherwise.
    pub async fn analyze(
        &self,
        path: &str,
        options: AnalyzeOptions,
    ) -> Result<AnalyzeOutcome, CodesageError> {
        let root = resolve_codebase_path(path)?;
        let scan = self.scanner.scan(&root)?;
        let source_path = root.to_string_lossy().into_owned();

        let pipeline = &self.settings.pipeline;
        let small = scan.files.len() <= pipeline.sync_file_threshold
            && scan.total_size() <= pipeline.sync_size_threshold;

        if options.wait || small {
            let report = self.run_analysis(&root, scan, &options).await?;
            return Ok(AnalyzeOutcome::Completed(report));
        }

        let files = scan.files.len();
        let operation_id = self.operations.start(&source_path).await;
        info!(
            "Analyzing {} ({} files) in the background as operation {}",
            source_path, files, operation_id
        );

        let this = self.clone();
        let id = operation_id.clone();
        tokio::spawn(async move {
            match this.run_analysis(&root, scan, &options).await {
                Ok(report) => this.operations.complete(&id, report).await,
                Err(e) => {
                    error!("Background analysis {} failed: {}", id, e);
                    this.operations.fail(&id, e.to_string()).await;
                }
            }
        });

        Ok(AnalyzeOutcome::Started {
            operation_id,
            source_path,
            files,
        })
    }

    async fn run_analysis(
        &self,
        root: &Path,
        mut scan: ScanResult,
        options: &AnalyzeOptions,
    ) -> Result<AnalyzeReport, CodesageError> {
        let started = Instant::now();
        let source_path = root.to_string_lossy().into_owned();
        info!(
            "Starting {} analysis of {} ({} files)",
            options.analysis_type,
            source_path,
            scan.files.len()
        );

        let mut report = AnalyzeReport {
            success: true,
            source_path: source_path.clone(),
            analysis_type: options.analysis_type,
            files_scanned: scan.files.len(),
            files_analyzed: 0,
            chunks_analyzed: 0,
            chunks_skipped: 0,
            chunks_degraded: 0,
            chunks_without_vectors: 0,
            errors: Vec::new(),
            warnings: self.provider_warnings.iter().cloned().collect(),
            git: None,
            overview: None,
            representation: None,
            duration_ms: 0,
        };
        report.warnings.extend(scan.warnings.iter().map(|w| match &w.path {
            Some(path) => format!("{}: {}", path.display(), w.message),
            None => w.message.clone(),
        }));

        let init = self.store.initialize().await?;
        if let Some(warning) = init.warning(self.store.dimension()) {
            warn!("{}", warning);
            report.warnings.push(warning);
        }

        if options.force {
            self.store.delete_codebase(&source_path).await?;
        }

        match self.preprocessor.prepare(root, &mut scan, options.force).await {
            Ok(representation) => {
                if let Some(reason) = &representation.fallback_reason {
                    report
                        .warnings
                        .push(format!("external pre-processor failed, used internal representation: {}", reason));
                }
                report.representation = Some(representation);
            }
            Err(e) => {
                warn!("Could not prepare codebase representation: {:#}", e);
                report
                    .warnings
                    .push(format!("codebase representation unavailable: {:#}", e));
            }
        }

        if self.settings.features.advanced_preprocessing {
            report.overview = self.overview(&source_path, &report, options).await;
        }

        let mut embedding = self.embedder.clone();
        for file in scan.files.iter_mut() {
            let chunks = match self.chunker.chunk_file(file) {
                Ok(chunks) => chunks,
                Err(e) => {
                    let stage = match e {
                        ChunkerError::Read { .. } => Stage::Read,
                        _ => Stage::Chunk,
                    };
                    warn!("Skipping {}: {}", file.relative_path, e);
                    report
                        .errors
                        .push(ItemError::file(&file.relative_path, stage, e.to_string()));
                    continue;
                }
            };
            // Release the content once chunked
            file.content = None;
            if options.update_existing && !options.force {
                // Line ranges that no longer exist would otherwise linger
                let file_path = file.path.to_string_lossy();
                let removed = self.store.delete_by_path(&file_path).await?;
                debug!("Removed {} stored chunks of {} before re-analysis", removed, file.relative_path);
            }
            if chunks.is_empty() {
                continue;
            }

            let (pending, skipped) = self.pending_chunks(chunks, options).await?;
            report.chunks_skipped += skipped;

            let records = self
                .analyze_chunks(&source_path, pending, options, &mut embedding, &mut report)
                .await;
            let stored = self.store.upsert(records).await?;
            report.chunks_analyzed += stored;
            if stored > 0 || skipped > 0 {
                report.files_analyzed += 1;
            }
        }

        if options.include_git {
            report.git = Some(if self.settings.features.git_analysis {
                GitHistory::new(root).summarize().await
            } else {
                GitSummary::unavailable("Git analysis is disabled")
            });
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Finished analysis of {}: {} files, {} chunks analyzed, {} skipped, {} errors in {} ms",
            source_path,
            report.files_analyzed,
            report.chunks_analyzed,
            report.chunks_skipped,
            report.errors.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Chunks still to analyze, and how many were skipped as already stored.
    async fn pending_chunks(
        &self,
        chunks: Vec<CodeChunk>,
        options: &AnalyzeOptions,
    ) -> Result<(Vec<CodeChunk>, usize), CodesageError> {
        if options.force || options.update_existing {
            return Ok((chunks, 0));
        }
        let ids: Vec<ChunkId> = chunks.iter().map(CodeChunk::id).collect();
        let existing = self.store.existing_ids(&ids).await?;
        if existing.is_empty() {
            return Ok((chunks, 0));
        }
        let total = chunks.len();
        let pending: Vec<CodeChunk> = chunks
            .into_iter()
            .filter(|c| !existing.contains(&c.id()))
            .collect();
        let skipped = total - pending.len();
        debug!("Skipping {} already stored chunks", skipped);
        Ok((pending, skipped))
    }

    /// Analyze and embed one file's chunks. Failures are recorded in the
    /// report; the first embedding failure switches embedding off for the
    /// rest of the run.
    async fn analyze_chunks(
        &self,
        source_path: &str,
        chunks: Vec<CodeChunk>,
        options: &AnalyzeOptions,
        embedding: &mut Option<Arc<dyn EmbeddingProvider>>,
        report: &mut AnalyzeReport,
    ) -> Vec<StoredChunkRecord> {
        let results = self
            .analyzer
            .analyze_batch(&chunks, options.analysis_type)
            .await;

        let mut analyzed = Vec::with_capacity(chunks.len());
        for (chunk, result) in chunks.into_iter().zip(results) {
            match result {
                Ok(analysis) => {
                    if analysis.is_degraded() {
                        report.chunks_degraded += 1;
                    }
                    analyzed.push((chunk, analysis));
                }
                Err(e) => {
                    warn!("Analysis of {}:{} failed: {}", chunk.relative_path, chunk.start_line, e);
                    report.errors.push(ItemError::chunk(
                        &chunk.relative_path,
                        chunk.start_line,
                        Stage::Analyze,
                        e.to_string(),
                    ));
                }
            }
        }

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; analyzed.len()];
        if let Some(embedder) = embedding.clone() {
            let texts: Vec<String> = analyzed
                .iter()
                .map(|(chunk, analysis)| embedding_document(&chunk.text, analysis))
                .collect();
            match embedder.embed_batch(&texts).await {
                Ok(batch) => vectors = batch.into_iter().map(Some).collect(),
                Err(e) => {
                    warn!("Embedding service failed, storing chunks without vectors: {}", e);
                    report
                        .warnings
                        .push(format!("embeddings unavailable, chunks stored without vectors: {}", e));
                    *embedding = None;
                }
            }
        }

        let now = Utc::now();
        analyzed
            .into_iter()
            .zip(vectors)
            .map(|((chunk, analysis), vector)| {
                if vector.is_none() {
                    report.chunks_without_vectors += 1;
                }
                StoredChunkRecord {
                    id: chunk.id(),
                    vector,
                    payload: ChunkPayload {
                        source_path: source_path.to_string(),
                        file_path: chunk.file_path.to_string_lossy().into_owned(),
                        relative_path: chunk.relative_path,
                        language: chunk.language,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        code_snippet: chunk.text,
                        analysis,
                        timestamp: now,
                    },
                }
            })
            .collect()
    }

    async fn overview(
        &self,
        source_path: &str,
        report: &AnalyzeReport,
        options: &AnalyzeOptions,
    ) -> Option<AnalysisResult> {
        let representation = report.representation.as_ref()?;
        let packed = match representation.read().await {
            Ok(packed) => packed,
            Err(e) => {
                warn!("Cannot read representation for overview: {:#}", e);
                return None;
            }
        };
        match self
            .analyzer
            .analyze_codebase(source_path, &packed, options.analysis_type)
            .await
        {
            Ok(overview) => Some(overview),
            Err(e) => {
                warn!("Codebase overview failed: {}", e);
                None
            }
        }
    }

    /// Similarity search plus an optional synthesized answer.
    pub async fn query(&self, mut request: QueryRequest) -> Result<QueryResponse, CodesageError> {
        if let Some(path) = request.codebase_path.take() {
            request.codebase_path = Some(normalize_scope(&path));
        }
        self.query_engine.query(&request).await
    }

    /// Extract one code element. A scoped codebase that has not been
    /// analyzed yet is analyzed first, in the foreground.
    pub async fn extract(&self, mut request: ExtractRequest) -> Result<ExtractResponse, CodesageError> {
        if let Some(path) = request.codebase_path.take() {
            let root = resolve_codebase_path(&path)?;
            let source_path = root.to_string_lossy().into_owned();
            if !self.store.is_analyzed(&source_path).await? {
                info!("{} has not been analyzed yet; analyzing before extraction", source_path);
                let options = AnalyzeOptions {
                    wait: true,
                    ..Default::default()
                };
                self.analyze(&source_path, options).await?;
            }
            request.codebase_path = Some(source_path);
        }
        self.query_engine.extract(&request).await
    }

    pub async fn status(&self, operation_id: &str) -> Result<Operation, CodesageError> {
        self.operations
            .get(operation_id)
            .await
            .ok_or_else(|| CodesageError::NotFound(format!("operation {}", operation_id)))
    }

    pub async fn is_analyzed(&self, path: &str) -> Result<bool, CodesageError> {
        Ok(self.store.is_analyzed(&normalize_scope(path)).await?)
    }

    pub async fn stats(&self, path: Option<&str>) -> Result<IndexStats, CodesageError> {
        let scope = path.map(normalize_scope);
        Ok(self.store.stats(scope.as_deref()).await?)
    }

    /// Remove every stored chunk of a codebase.
    pub async fn forget(&self, path: &str) -> Result<usize, CodesageError> {
        Ok(self.store.delete_codebase(&normalize_scope(path)).await?)
    }
}

/// Text embedded for a chunk: the analysis description ahead of the code.
/// Degraded analyses contribute nothing.
pub fn embedding_document(code: &str, analysis: &AnalysisResult) -> String {
    let mut document = String::new();
    for line in [&analysis.summary, &analysis.purpose] {
        let line = line.trim();
        if !line.is_empty() {
            document.push_str(line);
            document.push('\n');
        }
    }
    if !document.is_empty() {
        document.push('\n');
    }
    document.push_str(code);
    document
}

/// Expand `~`, require existence and canonicalize.
pub fn resolve_codebase_path(path: &str) -> Result<PathBuf, CodesageError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(CodesageError::Validation("codebasePath must not be empty".to_string()));
    }
    let expanded = PathBuf::from(shellexpand::tilde(trimmed).into_owned());
    if !expanded.exists() {
        return Err(CodesageError::Validation(format!(
            "path does not exist: {}",
            expanded.display()
        )));
    }
    std::fs::canonicalize(&expanded).map_err(|e| {
        CodesageError::Validation(format!("cannot resolve {}: {}", expanded.display(), e))
    })
}

/// Like [`resolve_codebase_path`] but tolerant of paths that no longer exist,
/// so stored codebases can still be addressed after deletion from disk.
fn normalize_scope(path: &str) -> String {
    resolve_codebase_path(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path.trim()).into_owned())
}

async fn git_installed() -> bool {
    tokio::process::Command::new("git")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesage_index::MemoryIndex;
    use codesage_providers::MockProvider;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn enhancer(cache: &TempDir) -> ProgressiveEnhancer {
        let mut settings = Settings::default();
        settings.llm.mock = true;
        settings.qdrant.dimension = 64;
        settings.features.cache_dir = Some(cache.path().to_string_lossy().into_owned());
        let components = Components {
            provider: ResolvedProvider {
                backend: LlmBackend::Mock,
                provider: Arc::new(MockProvider::new()),
                warnings: Vec::new(),
            },
            index: Arc::new(MemoryIndex::new()),
            embedder: Some(Arc::new(MockEmbeddings::new(64))),
        };
        ProgressiveEnhancer::with_components(settings, components).unwrap()
    }

    #[test]
    fn test_embedding_document_leads_with_description() {
        let mut analysis = AnalysisResult::empty(AnalysisType::Semantic, "javascript");
        analysis.summary = "Formats and logs application errors".to_string();
        analysis.purpose = "Central error handler".to_string();
        let document = embedding_document("function handleError(err) {}", &analysis);
        assert_eq!(
            document,
            "Formats and logs application errors\nCentral error handler\n\nfunction handleError(err) {}"
        );

        let degraded = AnalysisResult::degraded(AnalysisType::Semantic, "javascript", "not JSON");
        assert_eq!(embedding_document("let x = 1;", &degraded), "let x = 1;");
    }

    #[tokio::test]
    async fn test_missing_path_is_validation_error() {
        let cache = tempdir().unwrap();
        let err = enhancer(&cache)
            .analyze("/definitely/not/here", AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_small_codebase_completes_in_foreground() {
        let cache = tempdir().unwrap();
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.js"), "function a() {\n  return 1;\n}\n").unwrap();

        let outcome = enhancer(&cache)
            .analyze(&src.path().to_string_lossy(), AnalyzeOptions::default())
            .await
            .unwrap();
        let AnalyzeOutcome::Completed(report) = outcome else {
            panic!("expected a foreground run");
        };
        assert!(report.success);
        assert_eq!(report.files_analyzed, 1);
        assert_eq!(report.chunks_analyzed, 1);
        assert_eq!(report.chunks_without_vectors, 0);
        assert!(report.representation.is_some());
    }

    #[tokio::test]
    async fn test_large_codebase_runs_in_background() {
        let cache = tempdir().unwrap();
        let src = tempdir().unwrap();
        for i in 0..3 {
            fs::write(src.path().join(format!("f{}.js", i)), "let x = 1;\n").unwrap();
        }
        let mut settings = Settings::default();
        settings.llm.mock = true;
        settings.qdrant.dimension = 64;
        settings.pipeline.sync_file_threshold = 1;
        settings.features.cache_dir = Some(cache.path().to_string_lossy().into_owned());
        let enhancer = ProgressiveEnhancer::with_components(
            settings,
            Components {
                provider: ResolvedProvider {
                    backend: LlmBackend::Mock,
                    provider: Arc::new(MockProvider::new()),
                    warnings: Vec::new(),
                },
                index: Arc::new(MemoryIndex::new()),
                embedder: Some(Arc::new(MockEmbeddings::new(64))),
            },
        )
        .unwrap();

        let outcome = enhancer
            .analyze(&src.path().to_string_lossy(), AnalyzeOptions::default())
            .await
            .unwrap();
        let AnalyzeOutcome::Started { operation_id, files, .. } = outcome else {
            panic!("expected a background run");
        };
        assert_eq!(files, 3);

        let mut finished = None;
        for _ in 0..200 {
            let op = enhancer.status(&operation_id).await.unwrap();
            if !matches!(op.status, crate::operations::OperationStatus::Running) {
                finished = Some(op);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let json = serde_json::to_value(finished.expect("operation finished")).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["report"]["filesAnalyzed"], 3);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_not_found() {
        let cache = tempdir().unwrap();
        let err = enhancer(&cache).status("missing").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_probe_reports_mock_capabilities() {
        let cache = tempdir().unwrap();
        let caps = enhancer(&cache).probe().await;
        assert_eq!(caps.llm_backend, "mock");
        assert!(caps.llm_healthy);
        assert!(caps.embeddings);
        assert_eq!(caps.index_backend, "memory");
        assert!(caps.index_reachable);
    }

    #[tokio::test]
    async fn test_unreachable_local_llm_falls_back_at_startup() {
        let server = wiremock::MockServer::start().await;
        let url = server.uri();
        drop(server);

        let cache = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.llm.local_url = Some(url);
        settings.features.local_embeddings = false;
        settings.features.cache_dir = Some(cache.path().to_string_lossy().into_owned());

        let mut components = Components::from_settings(&settings).await.unwrap();
        assert_eq!(components.provider.backend, LlmBackend::Mock);
        components.index = Arc::new(MemoryIndex::new());

        let caps = ProgressiveEnhancer::with_components(settings, components)
            .unwrap()
            .probe()
            .await;
        assert_eq!(caps.llm_backend, "mock");
        assert!(caps.llm_healthy);
        assert!(caps.warnings.iter().any(|w| w.starts_with("local backend")));
    }
}
