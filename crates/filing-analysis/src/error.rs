//! Error types for the filing analysis pipeline
//!
//! Only [`FilingError`] ends a pipeline run. Every other error kind is
//! stage-local: it is logged, recorded in the session and carried into the
//! final report as a degraded section.

use crate::model::{StatementKind, StatementSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline-fatal errors
#[derive(Debug, Error)]
pub enum FilingError {
    /// No company could be identified from the query
    #[error("could not resolve a company from query '{query}'")]
    CompanyUnresolved { query: String },

    /// Neither the cache nor the provider yielded filing data
    #[error("data gathering failed for {company_id}: {reason}")]
    DataGatheringFailed { company_id: String, reason: String },

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Cache maintenance failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, FilingError>;

/// Errors raised by a [`FilingProvider`](crate::provider::FilingProvider)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider could not be reached or answered with an error
    #[error("filing provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider has no filing of the requested type for the company
    #[error("no {filing_type} filing found for {company_id}")]
    NotFound {
        company_id: String,
        filing_type: String,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::ProviderUnavailable(err.to_string())
    }
}

/// Errors raised while normalizing a raw provider table
#[derive(Debug, Clone, Error)]
pub enum NormalizeError {
    /// The table is empty or has fewer rows than the configured minimum.
    ///
    /// `partial` holds what could be normalized so callers can continue.
    #[error("{kind} is incomplete: {row_count} rows, at least {minimum} required")]
    IncompleteStatement {
        kind: StatementKind,
        row_count: usize,
        minimum: usize,
        partial: Option<Box<StatementSet>>,
    },
}

impl NormalizeError {
    /// Take the partially normalized statement out of the error
    pub fn into_partial(self) -> Option<StatementSet> {
        match self {
            NormalizeError::IncompleteStatement { partial, .. } => partial.map(|boxed| *boxed),
        }
    }
}

/// Errors raised by the on-disk filing cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The entry could not be serialized
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors raised by an [`AnalysisCollaborator`](crate::collaborator::AnalysisCollaborator)
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The collaborator could not produce an answer
    #[error("collaborator request failed: {0}")]
    Upstream(String),

    /// The collaborator answered with something that is not a JSON object
    #[error("collaborator returned malformed output: {0}")]
    Malformed(String),
}

impl From<filing_llm::LLMError> for CollaboratorError {
    fn from(err: filing_llm::LLMError) -> Self {
        CollaboratorError::Upstream(err.to_string())
    }
}

/// Errors raised by a [`ContextSource`](crate::context::ContextSource)
#[derive(Debug, Clone, Error)]
#[error("context search failed: {0}")]
pub struct ContextError(pub String);

/// Why an analysis task did not produce output.
///
/// Recorded in [`AnalysisTaskResult`](crate::dispatcher::AnalysisTaskResult)
/// and written to session artifacts, so it is serializable.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The task did not finish within its timeout
    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// The collaborator output did not match the declared schema
    #[error("output violates schema: {}", violations.join("; "))]
    TaskSchemaViolation { violations: Vec<String> },

    /// The collaborator failed
    #[error("upstream error: {message}")]
    Upstream { message: String },

    /// The collaborator output was not a JSON object
    #[error("malformed output: {message}")]
    MalformedOutput { message: String },

    /// A required input was missing
    #[error("missing input: {message}")]
    MissingInput { message: String },

    /// The prompt template failed to render
    #[error("prompt rendering failed: {message}")]
    PromptRender { message: String },
}

impl From<CollaboratorError> for TaskErrorKind {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Upstream(message) => TaskErrorKind::Upstream { message },
            CollaboratorError::Malformed(message) => TaskErrorKind::MalformedOutput { message },
        }
    }
}

impl From<minijinja::Error> for TaskErrorKind {
    fn from(err: minijinja::Error) -> Self {
        TaskErrorKind::PromptRender {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FilingError::CompanyUnresolved {
            query: "how are things?".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "could not resolve a company from query 'how are things?'"
        );

        let err = ProviderError::NotFound {
            company_id: "Tesla".to_string(),
            filing_type: "10-Q".to_string(),
        };
        assert_eq!(err.to_string(), "no 10-Q filing found for Tesla");
    }

    #[test]
    fn test_incomplete_statement_display() {
        let err = NormalizeError::IncompleteStatement {
            kind: StatementKind::BalanceSheet,
            row_count: 6,
            minimum: 15,
            partial: None,
        };
        assert_eq!(
            err.to_string(),
            "balance sheet is incomplete: 6 rows, at least 15 required"
        );
        assert!(err.into_partial().is_none());
    }

    #[test]
    fn test_task_error_serialization() {
        let err = TaskErrorKind::TaskSchemaViolation {
            violations: vec!["rating: missing".to_string()],
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "task_schema_violation");
        assert_eq!(err.to_string(), "output violates schema: rating: missing");
    }

    #[test]
    fn test_collaborator_error_conversion() {
        let kind: TaskErrorKind = CollaboratorError::Malformed("not json".to_string()).into();
        assert_eq!(
            kind,
            TaskErrorKind::MalformedOutput {
                message: "not json".to_string()
            }
        );
    }
}
