//! Analysis, retrieval and orchestration for codesage.
//!
//! The [`ProgressiveEnhancer`] ties the pieces together: scanning, chunking
//! and storage from `codesage-index`, LLM analysis through
//! `codesage-providers`, plus git history, codebase pre-processing and
//! background operation tracking. [`tools`] exposes it as a validated,
//! envelope-returning tool surface.

pub mod analyzer;
pub mod enhancer;
pub mod error;
pub mod git;
pub mod operations;
pub mod preprocess;
pub mod prompts;
pub mod query;
pub mod tools;

pub use analyzer::{aggregate, parse_analysis, Analyzer};
pub use enhancer::{
    resolve_codebase_path, select_embedder, AnalyzeOptions, AnalyzeOutcome, AnalyzeReport,
    Capabilities, Components, ProgressiveEnhancer,
};
pub use error::{CodesageError, ItemError, Stage};
pub use git::{CommitInfo, Contributor, GitHistory, GitSummary};
pub use operations::{Operation, OperationRegistry, OperationStatus};
pub use preprocess::{Preprocessor, Representation, RepresentationKind};
pub use query::{
    ExtractRequest, ExtractResponse, Location, OutputFormat, QueryEngine, QueryRequest,
    QueryResponse, QueryResult,
};
pub use tools::{dispatch_tool, ToolCall};
