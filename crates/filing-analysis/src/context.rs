//! Independent web/context search used alongside filing data

use crate::error::ContextError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One piece of external context about a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// Headline or page title
    pub title: String,
    /// Where the snippet came from (site name or URL)
    pub source: String,
    /// Short text summary
    pub summary: String,
    /// Publication date, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<NaiveDate>,
}

impl ContextSnippet {
    pub fn new(title: impl Into<String>, source: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            summary: summary.into(),
            published: None,
        }
    }

    pub fn published(mut self, date: NaiveDate) -> Self {
        self.published = Some(date);
        self
    }
}

/// Source of company context (news, web search, knowledge base)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Search for context about a company
    async fn search(&self, company_id: &str) -> Result<Vec<ContextSnippet>, ContextError>;
}

/// Context source that never finds anything, for offline runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContextSource;

#[async_trait]
impl ContextSource for NullContextSource {
    async fn search(&self, _company_id: &str) -> Result<Vec<ContextSnippet>, ContextError> {
        Ok(Vec::new())
    }
}

/// Context source backed by a fixed list of snippets
#[derive(Debug, Clone, Default)]
pub struct StaticContextSource {
    snippets: Vec<ContextSnippet>,
}

impl StaticContextSource {
    pub fn new(snippets: Vec<ContextSnippet>) -> Self {
        Self { snippets }
    }
}

#[async_trait]
impl ContextSource for StaticContextSource {
    async fn search(&self, company_id: &str) -> Result<Vec<ContextSnippet>, ContextError> {
        let needle = company_id.to_lowercase();
        Ok(self
            .snippets
            .iter()
            .filter(|s| s.title.to_lowercase().contains(&needle) || s.summary.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}
