//! Filing data providers
//!
//! A provider hands out one raw, row-oriented table per statement. Rows are
//! loose JSON objects; the [`Normalizer`](crate::normalizer::Normalizer)
//! turns them into typed statements.

pub mod sec_edgar;

pub use sec_edgar::SecEdgarProvider;

use crate::error::ProviderError;
use crate::model::{CalculationRelation, FilingType, StatementKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw statement table as delivered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatementTable {
    /// Which statement the table holds
    pub kind: StatementKind,
    /// Table-level metadata, e.g. period end dates
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Rows in presentation order
    pub rows: Vec<Map<String, Value>>,
}

impl RawStatementTable {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            metadata: Map::new(),
            rows: Vec::new(),
        }
    }
}

/// Raw statements of one filing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFiling {
    pub company_id: String,
    pub filing_type: FilingType,
    pub filing_date: NaiveDate,
    pub accession_id: String,
    pub tables: Vec<RawStatementTable>,
    #[serde(default)]
    pub calculations: Vec<CalculationRelation>,
}

impl RawFiling {
    pub fn table(&self, kind: StatementKind) -> Option<&RawStatementTable> {
        self.tables.iter().find(|table| table.kind == kind)
    }
}

/// Filing metadata returned by [`FilingProvider::recent_filings`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingRef {
    /// Accession number (unique filing identifier)
    pub accession_id: String,
    /// Form type (10-K, 10-Q, 8-K, ...)
    pub form_type: String,
    pub filing_date: String,
    /// Period covered
    pub report_date: Option<String>,
    pub primary_document: String,
    pub description: Option<String>,
}

/// Read-only source of regulatory filings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FilingProvider: Send + Sync {
    /// Fetch the raw statement tables of the latest filing of `filing_type`
    async fn fetch_statements(
        &self,
        company_id: &str,
        filing_type: FilingType,
    ) -> Result<RawFiling, ProviderError>;

    /// List the most recent filings of any form, newest first
    async fn recent_filings(
        &self,
        company_id: &str,
        limit: usize,
    ) -> Result<Vec<FilingRef>, ProviderError>;
}
