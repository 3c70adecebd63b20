//! Financial filing analysis pipeline
//!
//! Turns a natural-language query such as "Analyze Tesla's Q3 2025
//! performance" into a structured research report built from the company's
//! latest regulatory filing. The pipeline:
//!
//! - Resolves the company named in the query
//! - Gathers the filing (cache first, then the provider) and outside context
//!   concurrently
//! - Normalizes raw statement tables into typed line items
//! - Validates completeness and the balance sheet identity
//! - Computes a fixed set of financial ratios
//! - Dispatches independent analysis tasks to a collaborator concurrently,
//!   each under its own timeout and output schema
//! - Synthesizes the sections, reviews the report and records every stage
//!   as a session artifact
//!
//! # Example
//!
//! ```rust,ignore
//! use filing_analysis::{LlmCollaborator, Pipeline, PipelineConfig, SecEdgarProvider};
//! use filing_llm::providers::OpenAIProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default().with_env()?;
//!     let llm = Arc::new(OpenAIProvider::from_env()?);
//!
//!     let pipeline = Pipeline::builder(config.clone())
//!         .provider(Arc::new(SecEdgarProvider::new(&config.sec_user_agent)))
//!         .collaborator(Arc::new(LlmCollaborator::new(llm, &config.model)))
//!         .build()?;
//!
//!     let report = pipeline.run("Analyze Tesla's Q3 2025 performance").await?;
//!     println!("{}", report.to_markdown());
//!     Ok(())
//! }
//! ```

pub mod branch;
pub mod cache;
pub mod collaborator;
pub mod concepts;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod label;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod ratios;
pub mod report;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod tasks;
pub mod validation;

// Re-export main types for convenience
pub use cache::FilingCache;
pub use collaborator::{AnalysisCollaborator, LlmCollaborator, PromptContext};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use context::{ContextSnippet, ContextSource, NullContextSource, StaticContextSource};
pub use dispatcher::{AnalysisTaskResult, Dispatcher, PlannedTask, TaskStatus};
pub use error::{FilingError, Result};
pub use model::{CompanyFilingSnapshot, FilingType, LineItem, StatementKind, StatementSet};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use provider::{FilingProvider, RawFiling, RawStatementTable, SecEdgarProvider};
pub use ratios::{RatioEngine, RatioResult};
pub use report::{FinalReport, ReportSection, Synthesis, SynthesisSource};
pub use resolver::{CompanyResolver, ResolvedCompany};
pub use session::{PipelineSession, ProgressEvent, SessionHandle, Stage, StageStatus};
pub use tasks::{AnalysisTask, TaskInput};
pub use validation::{ValidationEngine, ValidationStatus, VerificationReport};
