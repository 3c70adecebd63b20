//! Statement normalizer: raw provider tables to [`StatementSet`]s
//!
//! Provider rows are loosely shaped JSON objects. Keys are matched after
//! canonicalization (lowercase, ASCII alphanumerics only), so `Concept ID`,
//! `concept_id` and `conceptId` all name the same column. Row order is the
//! presentation order and is never changed.

use crate::error::NormalizeError;
use crate::label;
use crate::model::{LineItem, PeriodEnd, StatementSet, concept_local_name};
use crate::provider::RawStatementTable;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

const LABEL_KEYS: &[&str] = &["label", "linelabel", "lineitem", "caption", "description", "name", "item"];
const CONCEPT_KEYS: &[&str] = &["concept", "conceptid", "xbrlconcept", "xbrlconceptid", "xbrl", "tag", "element"];
const LEVEL_KEYS: &[&str] = &["level", "depth", "indent", "nestinglevel"];
const CURRENT_VALUE_KEYS: &[&str] = &["current", "currentvalue", "currentperiod", "value", "thisperiod"];
const PRIOR_VALUE_KEYS: &[&str] = &["prior", "priorvalue", "priorperiod", "previous", "previousperiod", "comparative"];

const CURRENT_PERIOD_KEYS: &[&str] = &["currentperiodend", "currentperiod", "periodend", "currentdate", "current"];
const PRIOR_PERIOD_KEYS: &[&str] = &["priorperiodend", "priorperiod", "previousperiodend", "priordate", "prior"];
const PERIOD_LIST_KEYS: &[&str] = &["periodends", "periods", "columns"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%b %d, %Y", "%B %d, %Y", "%d %b %Y"];

/// Converts raw provider tables into normalized statements
#[derive(Debug, Clone)]
pub struct Normalizer {
    min_rows: usize,
}

impl Normalizer {
    /// Create a normalizer requiring at least `min_rows` provider rows
    pub fn new(min_rows: usize) -> Self {
        Self { min_rows }
    }

    pub fn min_rows(&self) -> usize {
        self.min_rows
    }

    /// Normalize one raw table.
    ///
    /// Fails with [`NormalizeError::IncompleteStatement`] when the table has
    /// fewer rows than the minimum; the error carries whatever was normalized.
    #[instrument(skip(self, table), fields(kind = %table.kind, rows = table.rows.len()))]
    pub fn normalize(&self, table: &RawStatementTable) -> Result<StatementSet, NormalizeError> {
        let periods = resolve_periods(table);

        let mut items: Vec<LineItem> = Vec::with_capacity(table.rows.len());
        let mut by_concept: HashMap<String, usize> = HashMap::new();

        for (index, row) in table.rows.iter().enumerate() {
            let Some(item) = normalize_row(index, row, &periods) else {
                debug!(index, "Skipping row without label or concept");
                continue;
            };

            let concept_key = item
                .concept_id()
                .map(|id| concept_local_name(id).to_ascii_lowercase());

            let Some(key) = concept_key else {
                items.push(item);
                continue;
            };

            if let Some(&position) = by_concept.get(&key) {
                debug!(concept = ?item.concept_id(), "Merging duplicate concept");
                let existing = items[position].clone();
                items[position] = merge_duplicates(existing, item);
            } else {
                by_concept.insert(key, items.len());
                items.push(item);
            }
        }

        let statement = StatementSet::new(table.kind, periods.current, periods.prior, items);

        let row_count = table.rows.len();
        if row_count == 0 || row_count < self.min_rows {
            warn!(
                kind = %table.kind,
                row_count,
                minimum = self.min_rows,
                "Statement has too few rows"
            );
            let partial = (!statement.is_empty()).then(|| Box::new(statement));
            return Err(NormalizeError::IncompleteStatement {
                kind: table.kind,
                row_count,
                minimum: self.min_rows,
                partial,
            });
        }

        Ok(statement)
    }
}

/// Resolved period ends plus the dates used to recognise date-keyed columns
struct Periods {
    current: PeriodEnd,
    prior: PeriodEnd,
}

impl Periods {
    fn classify_date_key(&self, key: &str) -> Option<Side> {
        let date = parse_date(key)?;
        if self.current.date() == Some(date) {
            Some(Side::Current)
        } else if self.prior.date() == Some(date) {
            Some(Side::Prior)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Current,
    Prior,
}

fn resolve_periods(table: &RawStatementTable) -> Periods {
    let metadata = &table.metadata;

    let mut current = field(metadata, CURRENT_PERIOD_KEYS).and_then(value_as_date);
    let mut prior = field(metadata, PRIOR_PERIOD_KEYS).and_then(value_as_date);

    if current.is_none() || prior.is_none() {
        if let Some(Value::Array(list)) = field(metadata, PERIOD_LIST_KEYS) {
            let mut dates: Vec<NaiveDate> = list.iter().filter_map(value_as_date).collect();
            dates.sort_unstable_by(|a, b| b.cmp(a));
            current = current.or_else(|| dates.first().copied());
            prior = prior.or_else(|| dates.iter().copied().find(|d| Some(*d) != current));
        }
    }

    // Fall back to date-shaped column headers, newest first.
    if current.is_none() {
        let mut dates: Vec<NaiveDate> = table
            .rows
            .iter()
            .flat_map(|row| row.keys())
            .filter_map(|key| parse_date(key))
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.dedup();
        current = dates.first().copied();
        prior = prior.or_else(|| dates.get(1).copied());
    }

    Periods {
        current: current.map_or(PeriodEnd::Current, PeriodEnd::Date),
        prior: prior.map_or(PeriodEnd::Prior, PeriodEnd::Date),
    }
}

fn normalize_row(index: usize, row: &Map<String, Value>, periods: &Periods) -> Option<LineItem> {
    let concept_id = field(row, CONCEPT_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let raw_label = field(row, LABEL_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| concept_id.as_deref().map(|id| concept_local_name(id).to_string()))?;

    let level = field(row, LEVEL_KEYS).and_then(value_as_level).unwrap_or(0);

    let mut current = field(row, CURRENT_VALUE_KEYS).and_then(parse_value);
    let mut prior = field(row, PRIOR_VALUE_KEYS).and_then(parse_value);

    for (key, value) in row {
        match periods.classify_date_key(key) {
            Some(Side::Current) if current.is_none() => current = parse_value(value),
            Some(Side::Prior) if prior.is_none() => prior = parse_value(value),
            _ => {}
        }
    }

    Some(
        LineItem::new(index, label::humanize(&raw_label), concept_id, current, prior)
            .with_raw_label(raw_label)
            .with_level(level),
    )
}

/// Merge two rows carrying the same concept.
///
/// The deeper row wins, then the one with more populated periods, then the
/// earlier one. Missing sides are filled from the other row.
fn merge_duplicates(first: LineItem, second: LineItem) -> LineItem {
    let second_wins = second.level() > first.level()
        || (second.level() == first.level() && second.populated_periods() > first.populated_periods());
    let (primary, secondary) = if second_wins { (second, first) } else { (first, second) };

    LineItem::new(
        secondary.order().min(primary.order()),
        primary.label(),
        primary.concept_id().map(str::to_string),
        primary.current_value().or(secondary.current_value()),
        primary.prior_value().or(secondary.prior_value()),
    )
    .with_raw_label(primary.raw_label())
    .with_level(primary.level())
}

fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Look up the first key whose canonical form is one of `names`
fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        map.iter()
            .find(|(key, value)| !value.is_null() && canonical_key(key) == *name)
            .map(|(_, value)| value)
    })
}

fn value_as_level(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().map(|level| level.min(u64::from(u8::MAX)) as u8),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_date(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// Parse a provider value: a JSON number or a formatted amount string
pub(crate) fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

/// Parse amounts such as `1,234`, `$ 12.5`, `(1,234)` or `-56`.
///
/// Only a leading sign, a dollar sign, thousands separators and surrounding
/// parentheses are accepted around the number; anything else is rejected.
fn parse_amount(text: &str) -> Option<f64> {
    let text = text.trim();
    if matches!(
        text.to_ascii_lowercase().as_str(),
        "" | "-" | "n/a" | "na" | "nm" | "none" | "null" | "—" | "–"
    ) {
        return None;
    }

    let mut negations = 0;
    let (signed, rest) = strip_sign(text);
    negations += usize::from(signed);
    let mut rest = strip_dollar(rest);

    if let Some(inner) = rest.strip_prefix('(').and_then(|inner| inner.strip_suffix(')')) {
        negations += 1;
        rest = strip_dollar(inner);
    }
    let (signed, rest) = strip_sign(rest);
    negations += usize::from(signed);

    let number: String = rest.chars().filter(|c| *c != ',').collect();
    let starts_numeric = number.starts_with(|c: char| c.is_ascii_digit() || c == '.');
    let well_formed = number
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !starts_numeric || !well_formed {
        return None;
    }

    let amount = number.parse::<f64>().ok()?;
    Some(if negations % 2 == 1 { -amount } else { amount })
}

fn strip_sign(text: &str) -> (bool, &str) {
    match text.strip_prefix('-').or_else(|| text.strip_prefix('−')) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text),
    }
}

fn strip_dollar(text: &str) -> &str {
    text.trim().strip_prefix('$').unwrap_or(text.trim()).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatementKind;
    use serde_json::json;

    fn table(rows: Value, metadata: Value) -> RawStatementTable {
        RawStatementTable {
            kind: StatementKind::BalanceSheet,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            rows: rows
                .as_array()
                .unwrap()
                .iter()
                .map(|row| row.as_object().unwrap().clone())
                .collect(),
        }
    }

    fn sample_rows(count: usize) -> Value {
        Value::Array(
            (0..count)
                .map(|i| {
                    json!({
                        "Label": format!("line_item_{i}"),
                        "Concept ID": format!("us-gaap:Concept{i}"),
                        "current": i as f64 * 10.0,
                        "prior": i as f64,
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn test_preserves_provider_order() {
        let rows = json!([
            {"label": "Total assets", "concept": "us-gaap:Assets", "current": 300, "prior": 250},
            {"label": "Cash", "concept": "us-gaap:Cash", "current": 100, "prior": 90},
            {"label": "Accounts receivable", "concept": "us-gaap:AccountsReceivableNetCurrent", "current": 200, "prior": 160},
        ]);
        let statement = Normalizer::new(1).normalize(&table(rows, json!({}))).unwrap();

        let labels: Vec<&str> = statement.items().iter().map(LineItem::label).collect();
        assert_eq!(labels, vec!["Total Assets", "Cash", "Accounts Receivable"]);
        let orders: Vec<usize> = statement.items().iter().map(LineItem::order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_normalization_is_stable() {
        let raw = table(sample_rows(20), json!({}));
        let normalizer = Normalizer::new(15);
        let first = normalizer.normalize(&raw).unwrap();
        let second = normalizer.normalize(&raw).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_arbitrary_key_casing() {
        let rows = json!([
            {"LINE LABEL": "NetIncomeLoss", "xbrl_concept": "us-gaap_NetIncomeLoss", "Current Value": "1,234", "Prior-Value": "(56)", "Level": 2}
        ]);
        let statement = Normalizer::new(1).normalize(&table(rows, json!({}))).unwrap();
        let item = &statement.items()[0];

        assert_eq!(item.label(), "Net Income Loss");
        assert_eq!(item.raw_label(), "NetIncomeLoss");
        assert_eq!(item.concept_id(), Some("us-gaap_NetIncomeLoss"));
        assert_eq!(item.current_value(), Some(1234.0));
        assert_eq!(item.prior_value(), Some(-56.0));
        assert_eq!(item.level(), 2);
    }

    #[test]
    fn test_missing_side_is_none() {
        let rows = json!([{"label": "Goodwill", "current": 5.0}]);
        let statement = Normalizer::new(1).normalize(&table(rows, json!({}))).unwrap();
        assert_eq!(statement.items()[0].prior_value(), None);
        assert_eq!(statement.items()[0].current_value(), Some(5.0));
    }

    #[test]
    fn test_period_ends_from_metadata() {
        let raw = table(
            sample_rows(2),
            json!({"currentPeriodEnd": "2025-09-30", "prior_period_end": "2024-12-31"}),
        );
        let statement = Normalizer::new(1).normalize(&raw).unwrap();
        assert_eq!(statement.current_period().to_string(), "2025-09-30");
        assert_eq!(statement.prior_period().to_string(), "2024-12-31");
    }

    #[test]
    fn test_period_ends_from_date_columns() {
        let rows = json!([
            {"label": "Cash", "Sep 30, 2025": "16,139", "Dec 31, 2024": "16,139"},
            {"label": "Inventory", "Sep 30, 2025": "12,276", "Dec 31, 2024": "12,017"},
        ]);
        let statement = Normalizer::new(1).normalize(&table(rows, json!({}))).unwrap();
        assert_eq!(statement.current_period().to_string(), "2025-09-30");
        assert_eq!(statement.prior_period().to_string(), "2024-12-31");
        assert_eq!(statement.items()[1].current_value(), Some(12_276.0));
        assert_eq!(statement.items()[1].prior_value(), Some(12_017.0));
    }

    #[test]
    fn test_period_fallback_labels() {
        let statement = Normalizer::new(1).normalize(&table(sample_rows(1), json!({}))).unwrap();
        assert_eq!(statement.current_period(), PeriodEnd::Current);
        assert_eq!(statement.prior_period(), PeriodEnd::Prior);
    }

    #[test]
    fn test_duplicate_concepts_merge_to_most_specific() {
        let rows = json!([
            {"label": "Revenue", "concept": "us-gaap:Revenues", "level": 0, "current": 100},
            {"label": "Cost of revenue", "concept": "us-gaap:CostOfRevenue", "current": 60, "prior": 50},
            {"label": "Total revenues", "concept": "us-gaap:Revenues", "level": 1, "prior": 90},
        ]);
        let statement = Normalizer::new(1).normalize(&table(rows, json!({}))).unwrap();

        assert_eq!(statement.len(), 2);
        let revenue = &statement.items()[0];
        assert_eq!(revenue.label(), "Total Revenues");
        assert_eq!(revenue.level(), 1);
        assert_eq!(revenue.current_value(), Some(100.0));
        assert_eq!(revenue.prior_value(), Some(90.0));
        assert_eq!(revenue.order(), 0);
    }

    #[test]
    fn test_rows_without_concept_are_not_merged() {
        let rows = json!([
            {"label": "Other", "current": 1},
            {"label": "Other", "current": 2},
        ]);
        let statement = Normalizer::new(1).normalize(&table(rows, json!({}))).unwrap();
        assert_eq!(statement.len(), 2);
    }

    #[test]
    fn test_incomplete_statement_carries_partial() {
        let err = Normalizer::new(15)
            .normalize(&table(sample_rows(6), json!({})))
            .unwrap_err();
        let NormalizeError::IncompleteStatement { row_count, minimum, ref partial, .. } = err;
        assert_eq!(row_count, 6);
        assert_eq!(minimum, 15);
        assert_eq!(partial.as_ref().map(|p| p.len()), Some(6));
    }

    #[test]
    fn test_empty_table_is_incomplete() {
        let err = Normalizer::new(15).normalize(&table(json!([]), json!({}))).unwrap_err();
        let NormalizeError::IncompleteStatement { row_count, partial, .. } = err;
        assert_eq!(row_count, 0);
        assert!(partial.is_none());
    }

    #[test]
    fn test_parse_amounts() {
        assert_eq!(parse_amount("1,234"), Some(1234.0));
        assert_eq!(parse_amount("$ 12.5"), Some(12.5));
        assert_eq!(parse_amount("(1,234)"), Some(-1234.0));
        assert_eq!(parse_amount("-56"), Some(-56.0));
        assert_eq!(parse_amount("—"), None);
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("see note 4"), None);
        assert_eq!(parse_amount("$(1,234.5)"), Some(-1234.5));
        assert_eq!(parse_amount("-$56"), Some(-56.0));
        assert_eq!(parse_amount("1.5e3"), Some(1500.0));
    }

    #[test]
    fn test_parse_amount_rejects_embedded_signs() {
        assert_eq!(parse_amount("12-31"), None);
        assert_eq!(parse_amount("1-2"), None);
        assert_eq!(parse_amount("(12"), None);
        assert_eq!(parse_amount("1 234"), None);
        assert_eq!(parse_amount("inf"), None);
        assert_eq!(parse_value(&json!(null)), None);
        assert_eq!(parse_value(&json!(7)), Some(7.0));
    }
}
