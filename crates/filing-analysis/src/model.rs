//! Core data model: line items, statements and filing snapshots

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regulatory filing form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilingType {
    /// Annual report
    #[serde(rename = "10-K")]
    Form10K,
    /// Quarterly report
    #[serde(rename = "10-Q")]
    Form10Q,
}

impl FilingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingType::Form10K => "10-K",
            FilingType::Form10Q => "10-Q",
        }
    }
}

impl fmt::Display for FilingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(' ', "").as_str() {
            "10-K" | "10K" => Ok(FilingType::Form10K),
            "10-Q" | "10Q" => Ok(FilingType::Form10Q),
            other => Err(format!("unsupported filing type '{other}'")),
        }
    }
}

/// The three primary financial statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl StatementKind {
    /// All statements in presentation order
    pub const ALL: [StatementKind; 3] = [
        StatementKind::BalanceSheet,
        StatementKind::IncomeStatement,
        StatementKind::CashFlow,
    ];

    /// Machine name, used in artifact and task names
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "balance_sheet",
            StatementKind::IncomeStatement => "income_statement",
            StatementKind::CashFlow => "cash_flow",
        }
    }

    /// Title for reports
    pub fn title(&self) -> &'static str {
        match self {
            StatementKind::BalanceSheet => "Balance Sheet",
            StatementKind::IncomeStatement => "Income Statement",
            StatementKind::CashFlow => "Cash Flow Statement",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::BalanceSheet => f.write_str("balance sheet"),
            StatementKind::IncomeStatement => f.write_str("income statement"),
            StatementKind::CashFlow => f.write_str("cash flow statement"),
        }
    }
}

/// End of a reporting period.
///
/// Serialized as the ISO date, or as "Current" / "Prior" when the provider
/// gave no usable date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PeriodEnd {
    Date(NaiveDate),
    Current,
    Prior,
}

impl PeriodEnd {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            PeriodEnd::Date(date) => Some(*date),
            PeriodEnd::Current | PeriodEnd::Prior => None,
        }
    }
}

impl fmt::Display for PeriodEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodEnd::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            PeriodEnd::Current => f.write_str("Current"),
            PeriodEnd::Prior => f.write_str("Prior"),
        }
    }
}

impl From<PeriodEnd> for String {
    fn from(period: PeriodEnd) -> Self {
        period.to_string()
    }
}

impl TryFrom<String> for PeriodEnd {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "Current" => Ok(PeriodEnd::Current),
            "Prior" => Ok(PeriodEnd::Prior),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map(PeriodEnd::Date)
                .map_err(|e| format!("invalid period end '{other}': {e}")),
        }
    }
}

/// One normalized row of a financial statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    label: String,
    concept_id: Option<String>,
    raw_label: String,
    level: u8,
    current_value: Option<f64>,
    prior_value: Option<f64>,
    order: usize,
}

impl LineItem {
    /// Create a line item whose raw label equals its display label
    pub fn new(
        order: usize,
        label: impl Into<String>,
        concept_id: Option<String>,
        current_value: Option<f64>,
        prior_value: Option<f64>,
    ) -> Self {
        let label = label.into();
        Self {
            raw_label: label.clone(),
            label,
            concept_id,
            level: 0,
            current_value,
            prior_value,
            order,
        }
    }

    /// Set the provider's untouched label
    pub fn with_raw_label(mut self, raw_label: impl Into<String>) -> Self {
        self.raw_label = raw_label.into();
        self
    }

    /// Set the provider nesting level
    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn concept_id(&self) -> Option<&str> {
        self.concept_id.as_deref()
    }

    pub fn raw_label(&self) -> &str {
        &self.raw_label
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn current_value(&self) -> Option<f64> {
        self.current_value
    }

    pub fn prior_value(&self) -> Option<f64> {
        self.prior_value
    }

    /// Position in the source presentation
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of periods with a value (0, 1 or 2)
    pub fn populated_periods(&self) -> usize {
        usize::from(self.current_value.is_some()) + usize::from(self.prior_value.is_some())
    }

    pub fn has_both_periods(&self) -> bool {
        self.populated_periods() == 2
    }

    /// Whether the concept id names `concept`, ignoring any taxonomy prefix
    pub fn matches_concept(&self, concept: &str) -> bool {
        self.concept_id
            .as_deref()
            .is_some_and(|id| concept_local_name(id).eq_ignore_ascii_case(concept_local_name(concept)))
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order;
    }
}

/// Strip a taxonomy prefix such as `us-gaap:` or `us-gaap_` from a concept id
pub fn concept_local_name(concept_id: &str) -> &str {
    let after_colon = concept_id.rsplit(':').next().unwrap_or(concept_id);
    match after_colon.split_once('_') {
        Some((prefix, rest)) if !rest.is_empty() && is_taxonomy_prefix(prefix) => rest,
        _ => after_colon,
    }
}

fn is_taxonomy_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// One normalized financial statement covering two periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSet {
    kind: StatementKind,
    current_period: PeriodEnd,
    prior_period: PeriodEnd,
    items: Vec<LineItem>,
}

impl StatementSet {
    /// Build a statement; item orders are reassigned to their positions
    pub fn new(
        kind: StatementKind,
        current_period: PeriodEnd,
        prior_period: PeriodEnd,
        mut items: Vec<LineItem>,
    ) -> Self {
        for (position, item) in items.iter_mut().enumerate() {
            item.set_order(position);
        }
        Self {
            kind,
            current_period,
            prior_period,
            items,
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn current_period(&self) -> PeriodEnd {
        self.current_period
    }

    pub fn prior_period(&self) -> PeriodEnd {
        self.prior_period
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item whose concept matches any candidate, in candidate order
    pub fn find_concept(&self, candidates: &[&str]) -> Option<&LineItem> {
        candidates
            .iter()
            .find_map(|concept| self.items.iter().find(|item| item.matches_concept(concept)))
    }

    /// First item whose display label equals any candidate (case-insensitive)
    pub fn find_label(&self, candidates: &[&str]) -> Option<&LineItem> {
        candidates.iter().find_map(|wanted| {
            self.items
                .iter()
                .find(|item| item.label().eq_ignore_ascii_case(wanted))
        })
    }
}

/// The three statements of a filing, any of which may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statements {
    pub balance_sheet: Option<StatementSet>,
    pub income_statement: Option<StatementSet>,
    pub cash_flow: Option<StatementSet>,
}

impl Statements {
    pub fn get(&self, kind: StatementKind) -> Option<&StatementSet> {
        match kind {
            StatementKind::BalanceSheet => self.balance_sheet.as_ref(),
            StatementKind::IncomeStatement => self.income_statement.as_ref(),
            StatementKind::CashFlow => self.cash_flow.as_ref(),
        }
    }

    pub fn set(&mut self, statement: StatementSet) {
        match statement.kind() {
            StatementKind::BalanceSheet => self.balance_sheet = Some(statement),
            StatementKind::IncomeStatement => self.income_statement = Some(statement),
            StatementKind::CashFlow => self.cash_flow = Some(statement),
        }
    }

    /// Present statements in presentation order
    pub fn iter(&self) -> impl Iterator<Item = &StatementSet> {
        StatementKind::ALL.into_iter().filter_map(|kind| self.get(kind))
    }
}

/// A weighted child of a calculation relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedConcept {
    pub concept: String,
    pub weight: f64,
}

/// Calculation-linkbase relation: `parent = Σ weight × child`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRelation {
    pub statement: StatementKind,
    pub parent: String,
    pub children: Vec<WeightedConcept>,
}

impl CalculationRelation {
    pub fn new(statement: StatementKind, parent: impl Into<String>) -> Self {
        Self {
            statement,
            parent: parent.into(),
            children: Vec::new(),
        }
    }

    pub fn child(mut self, concept: impl Into<String>, weight: f64) -> Self {
        self.children.push(WeightedConcept {
            concept: concept.into(),
            weight,
        });
        self
    }
}

/// Normalized statements of one filing.
///
/// Built once by the pipeline and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyFilingSnapshot {
    pub company_id: String,
    pub filing_type: FilingType,
    pub filing_date: NaiveDate,
    pub accession_id: String,
    pub statements: Statements,
    #[serde(default)]
    pub calculations: Vec<CalculationRelation>,
}

impl CompanyFilingSnapshot {
    /// Line items across all present statements
    pub fn total_line_items(&self) -> usize {
        self.statements.iter().map(StatementSet::len).sum()
    }

    /// All line items in statement then presentation order
    pub fn line_items(&self) -> impl Iterator<Item = &LineItem> {
        self.statements.iter().flat_map(|statement| statement.items().iter())
    }
}
