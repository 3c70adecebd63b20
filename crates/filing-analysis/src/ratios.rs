//! Ratio engine: a fixed set of 17 financial ratios
//!
//! Ratios use current-period values as reported; quarterly flows are not
//! annualized. A missing operand or a zero denominator yields a
//! [`RatioResult`] with no value, [`Interpretation::NotApplicable`] and a
//! reason. Computation never fails.
//!
//! | Ratio | Formula | Healthy | Moderate |
//! |---|---|---|---|
//! | Current Ratio | current assets / current liabilities | ≥ 1.0 | ≥ 0.8 |
//! | Quick Ratio | (current assets − inventory) / current liabilities | ≥ 1.0 | ≥ 0.7 |
//! | Cash Ratio | cash / current liabilities | ≥ 0.5 | ≥ 0.2 |
//! | Operating Cash Flow Ratio | operating cash flow / current liabilities | ≥ 1.0 | ≥ 0.5 |
//! | Debt-to-Equity | total liabilities / equity | ≤ 1.0 | ≤ 2.0 |
//! | Debt Ratio | total liabilities / total assets | ≤ 0.5 | ≤ 0.7 |
//! | Equity Multiplier | total assets / equity | ≤ 2.0 | ≤ 3.0 |
//! | Interest Coverage | operating income / interest expense | ≥ 5.0 | ≥ 2.0 |
//! | Gross Margin | gross profit / revenue | ≥ 0.40 | ≥ 0.20 |
//! | Operating Margin | operating income / revenue | ≥ 0.15 | ≥ 0.05 |
//! | Net Profit Margin | net income / revenue | ≥ 0.10 | ≥ 0.03 |
//! | Return on Assets | net income / total assets | ≥ 0.05 | ≥ 0.02 |
//! | Return on Equity | net income / equity | ≥ 0.15 | ≥ 0.08 |
//! | Asset Turnover | revenue / total assets | ≥ 1.0 | ≥ 0.5 |
//! | Inventory Turnover | cost of revenue / inventory | ≥ 6.0 | ≥ 3.0 |
//! | Receivables Turnover | revenue / accounts receivable | ≥ 8.0 | ≥ 4.0 |
//! | Free Cash Flow Margin | (operating cash flow − capex) / revenue | ≥ 0.10 | ≥ 0.02 |
//!
//! Anything below "moderate" is weak. For lower-is-better ratios a negative
//! value (negative equity) is weak.

use crate::concepts::{
    CAPITAL_EXPENDITURES, CASH, COST_OF_REVENUE, CURRENT_ASSETS, CURRENT_LIABILITIES, ConceptRef,
    GROSS_PROFIT, INTEREST_EXPENSE, INVENTORY, NET_INCOME, OPERATING_CASH_FLOW, OPERATING_INCOME,
    RECEIVABLES, REVENUE, STOCKHOLDERS_EQUITY, TOTAL_ASSETS, TOTAL_LIABILITIES,
};
use crate::model::CompanyFilingSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument};

/// Number of ratios the engine always returns
pub const RATIO_COUNT: usize = 17;

/// Ratio family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioCategory {
    Liquidity,
    Solvency,
    Profitability,
    Efficiency,
}

impl fmt::Display for RatioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RatioCategory::Liquidity => "Liquidity",
            RatioCategory::Solvency => "Solvency",
            RatioCategory::Profitability => "Profitability",
            RatioCategory::Efficiency => "Efficiency",
        };
        f.write_str(name)
    }
}

/// Qualitative reading of a ratio value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    Healthy,
    Moderate,
    Weak,
    NotApplicable,
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interpretation::Healthy => "Healthy",
            Interpretation::Moderate => "Moderate",
            Interpretation::Weak => "Weak",
            Interpretation::NotApplicable => "N/A",
        };
        f.write_str(name)
    }
}

/// One computed ratio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioResult {
    pub name: String,
    pub category: RatioCategory,
    pub value: Option<f64>,
    pub interpretation: Interpretation,
    pub reason: Option<String>,
    pub formula: String,
}

impl RatioResult {
    pub fn is_applicable(&self) -> bool {
        self.value.is_some()
    }
}

/// Fixed interpretation bands
#[derive(Debug, Clone, Copy)]
enum Thresholds {
    HigherIsBetter { healthy: f64, moderate: f64 },
    LowerIsBetter { healthy: f64, moderate: f64 },
}

impl Thresholds {
    fn interpret(self, value: f64) -> Interpretation {
        match self {
            Thresholds::HigherIsBetter { healthy, moderate } => {
                if value >= healthy {
                    Interpretation::Healthy
                } else if value >= moderate {
                    Interpretation::Moderate
                } else {
                    Interpretation::Weak
                }
            }
            Thresholds::LowerIsBetter { healthy, moderate } => {
                if value < 0.0 {
                    Interpretation::Weak
                } else if value <= healthy {
                    Interpretation::Healthy
                } else if value <= moderate {
                    Interpretation::Moderate
                } else {
                    Interpretation::Weak
                }
            }
        }
    }
}

/// A signed numerator term; optional terms count as zero when absent
#[derive(Debug, Clone, Copy)]
struct Term {
    concept: ConceptRef,
    sign: f64,
    optional: bool,
}

const fn plus(concept: ConceptRef) -> Term {
    Term {
        concept,
        sign: 1.0,
        optional: false,
    }
}

const fn minus_optional(concept: ConceptRef) -> Term {
    Term {
        concept,
        sign: -1.0,
        optional: true,
    }
}

/// Declaration of one ratio
#[derive(Debug, Clone, Copy)]
struct RatioDef {
    name: &'static str,
    category: RatioCategory,
    formula: &'static str,
    numerator: &'static [Term],
    denominator: ConceptRef,
    thresholds: Thresholds,
    /// Reason used when the denominator is not reported at all
    absent_reason: Option<&'static str>,
}

const fn higher(healthy: f64, moderate: f64) -> Thresholds {
    Thresholds::HigherIsBetter { healthy, moderate }
}

const fn lower(healthy: f64, moderate: f64) -> Thresholds {
    Thresholds::LowerIsBetter { healthy, moderate }
}

static RATIOS: [RatioDef; RATIO_COUNT] = [
    RatioDef {
        name: "Current Ratio",
        category: RatioCategory::Liquidity,
        formula: "current assets / current liabilities",
        numerator: &[plus(CURRENT_ASSETS)],
        denominator: CURRENT_LIABILITIES,
        thresholds: higher(1.0, 0.8),
        absent_reason: None,
    },
    RatioDef {
        name: "Quick Ratio",
        category: RatioCategory::Liquidity,
        formula: "(current assets - inventory) / current liabilities",
        numerator: &[plus(CURRENT_ASSETS), minus_optional(INVENTORY)],
        denominator: CURRENT_LIABILITIES,
        thresholds: higher(1.0, 0.7),
        absent_reason: None,
    },
    RatioDef {
        name: "Cash Ratio",
        category: RatioCategory::Liquidity,
        formula: "cash and cash equivalents / current liabilities",
        numerator: &[plus(CASH)],
        denominator: CURRENT_LIABILITIES,
        thresholds: higher(0.5, 0.2),
        absent_reason: None,
    },
    RatioDef {
        name: "Operating Cash Flow Ratio",
        category: RatioCategory::Liquidity,
        formula: "operating cash flow / current liabilities",
        numerator: &[plus(OPERATING_CASH_FLOW)],
        denominator: CURRENT_LIABILITIES,
        thresholds: higher(1.0, 0.5),
        absent_reason: None,
    },
    RatioDef {
        name: "Debt-to-Equity",
        category: RatioCategory::Solvency,
        formula: "total liabilities / stockholders' equity",
        numerator: &[plus(TOTAL_LIABILITIES)],
        denominator: STOCKHOLDERS_EQUITY,
        thresholds: lower(1.0, 2.0),
        absent_reason: None,
    },
    RatioDef {
        name: "Debt Ratio",
        category: RatioCategory::Solvency,
        formula: "total liabilities / total assets",
        numerator: &[plus(TOTAL_LIABILITIES)],
        denominator: TOTAL_ASSETS,
        thresholds: lower(0.5, 0.7),
        absent_reason: None,
    },
    RatioDef {
        name: "Equity Multiplier",
        category: RatioCategory::Solvency,
        formula: "total assets / stockholders' equity",
        numerator: &[plus(TOTAL_ASSETS)],
        denominator: STOCKHOLDERS_EQUITY,
        thresholds: lower(2.0, 3.0),
        absent_reason: None,
    },
    RatioDef {
        name: "Interest Coverage",
        category: RatioCategory::Solvency,
        formula: "operating income / interest expense",
        numerator: &[plus(OPERATING_INCOME)],
        denominator: INTEREST_EXPENSE,
        thresholds: higher(5.0, 2.0),
        absent_reason: Some("no interest expense reported"),
    },
    RatioDef {
        name: "Gross Margin",
        category: RatioCategory::Profitability,
        formula: "gross profit / revenue",
        numerator: &[plus(GROSS_PROFIT)],
        denominator: REVENUE,
        thresholds: higher(0.40, 0.20),
        absent_reason: None,
    },
    RatioDef {
        name: "Operating Margin",
        category: RatioCategory::Profitability,
        formula: "operating income / revenue",
        numerator: &[plus(OPERATING_INCOME)],
        denominator: REVENUE,
        thresholds: higher(0.15, 0.05),
        absent_reason: None,
    },
    RatioDef {
        name: "Net Profit Margin",
        category: RatioCategory::Profitability,
        formula: "net income / revenue",
        numerator: &[plus(NET_INCOME)],
        denominator: REVENUE,
        thresholds: higher(0.10, 0.03),
        absent_reason: None,
    },
    RatioDef {
        name: "Return on Assets",
        category: RatioCategory::Profitability,
        formula: "net income / total assets",
        numerator: &[plus(NET_INCOME)],
        denominator: TOTAL_ASSETS,
        thresholds: higher(0.05, 0.02),
        absent_reason: None,
    },
    RatioDef {
        name: "Return on Equity",
        category: RatioCategory::Profitability,
        formula: "net income / stockholders' equity",
        numerator: &[plus(NET_INCOME)],
        denominator: STOCKHOLDERS_EQUITY,
        thresholds: higher(0.15, 0.08),
        absent_reason: None,
    },
    RatioDef {
        name: "Asset Turnover",
        category: RatioCategory::Efficiency,
        formula: "revenue / total assets",
        numerator: &[plus(REVENUE)],
        denominator: TOTAL_ASSETS,
        thresholds: higher(1.0, 0.5),
        absent_reason: None,
    },
    RatioDef {
        name: "Inventory Turnover",
        category: RatioCategory::Efficiency,
        formula: "cost of revenue / inventory",
        numerator: &[plus(COST_OF_REVENUE)],
        denominator: INVENTORY,
        thresholds: higher(6.0, 3.0),
        absent_reason: Some("no inventory reported (service company)"),
    },
    RatioDef {
        name: "Receivables Turnover",
        category: RatioCategory::Efficiency,
        formula: "revenue / accounts receivable",
        numerator: &[plus(REVENUE)],
        denominator: RECEIVABLES,
        thresholds: higher(8.0, 4.0),
        absent_reason: None,
    },
    RatioDef {
        name: "Free Cash Flow Margin",
        category: RatioCategory::Efficiency,
        formula: "(operating cash flow - capital expenditures) / revenue",
        numerator: &[plus(OPERATING_CASH_FLOW), minus_optional(CAPITAL_EXPENDITURES)],
        denominator: REVENUE,
        thresholds: higher(0.10, 0.02),
        absent_reason: None,
    },
];

/// Computes the fixed ratio set
#[derive(Debug, Clone, Copy, Default)]
pub struct RatioEngine;

impl RatioEngine {
    pub fn new() -> Self {
        Self
    }

    /// Names of all ratios in computation order
    pub fn ratio_names() -> impl Iterator<Item = &'static str> {
        RATIOS.iter().map(|def| def.name)
    }

    /// Compute all ratios; always returns [`RATIO_COUNT`] results
    #[instrument(skip_all, fields(company = %snapshot.company_id))]
    pub fn compute(&self, snapshot: &CompanyFilingSnapshot) -> Vec<RatioResult> {
        let results: Vec<RatioResult> = RATIOS.iter().map(|def| compute_one(def, snapshot)).collect();
        debug!(
            applicable = results.iter().filter(|r| r.is_applicable()).count(),
            "Computed ratios"
        );
        results
    }
}

fn compute_one(def: &RatioDef, snapshot: &CompanyFilingSnapshot) -> RatioResult {
    let not_applicable = |reason: String| RatioResult {
        name: def.name.to_string(),
        category: def.category,
        value: None,
        interpretation: Interpretation::NotApplicable,
        reason: Some(reason),
        formula: def.formula.to_string(),
    };

    let mut numerator = 0.0;
    for term in def.numerator {
        match term.concept.current_value(snapshot) {
            Some(value) => numerator += term.sign * value,
            None if term.optional => {}
            None => return not_applicable(format!("missing {}", term.concept.name.to_lowercase())),
        }
    }

    let Some(denominator) = def.denominator.current_value(snapshot) else {
        let reason = def
            .absent_reason
            .map_or_else(|| format!("missing {}", def.denominator.name.to_lowercase()), str::to_string);
        return not_applicable(reason);
    };
    if denominator == 0.0 {
        return not_applicable(format!("{} is zero", def.denominator.name.to_lowercase()));
    }

    let value = numerator / denominator;
    if !value.is_finite() {
        return not_applicable("result is not a finite number".to_string());
    }

    RatioResult {
        name: def.name.to_string(),
        category: def.category,
        value: Some(value),
        interpretation: def.thresholds.interpret(value),
        reason: None,
        formula: def.formula.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilingType, LineItem, PeriodEnd, StatementKind, StatementSet, Statements};
    use chrono::NaiveDate;

    fn item(concept: &str, current: f64) -> LineItem {
        LineItem::new(0, concept, Some(format!("us-gaap:{concept}")), Some(current), None)
    }

    fn snapshot(balance: Vec<LineItem>, income: Vec<LineItem>, cash: Vec<LineItem>) -> CompanyFilingSnapshot {
        let mut statements = Statements::default();
        for (kind, items) in [
            (StatementKind::BalanceSheet, balance),
            (StatementKind::IncomeStatement, income),
            (StatementKind::CashFlow, cash),
        ] {
            statements.set(StatementSet::new(kind, PeriodEnd::Current, PeriodEnd::Prior, items));
        }
        CompanyFilingSnapshot {
            company_id: "Acme".to_string(),
            filing_type: FilingType::Form10Q,
            filing_date: NaiveDate::from_ymd_opt(2025, 10, 23).unwrap(),
            accession_id: "0000000000-25-000001".to_string(),
            statements,
            calculations: Vec::new(),
        }
    }

    fn full_snapshot() -> CompanyFilingSnapshot {
        snapshot(
            vec![
                item("CashAndCashEquivalentsAtCarryingValue", 50.0),
                item("AccountsReceivableNetCurrent", 25.0),
                item("InventoryNet", 40.0),
                item("AssetsCurrent", 150.0),
                item("Assets", 400.0),
                item("LiabilitiesCurrent", 100.0),
                item("Liabilities", 200.0),
                item("StockholdersEquity", 200.0),
            ],
            vec![
                item("Revenues", 300.0),
                item("CostOfRevenue", 180.0),
                item("GrossProfit", 120.0),
                item("OperatingIncomeLoss", 45.0),
                item("InterestExpense", 5.0),
                item("NetIncomeLoss", 30.0),
            ],
            vec![
                item("NetCashProvidedByUsedInOperatingActivities", 60.0),
                item("PaymentsToAcquirePropertyPlantAndEquipment", 20.0),
            ],
        )
    }

    fn find<'a>(results: &'a [RatioResult], name: &str) -> &'a RatioResult {
        results.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_always_returns_every_ratio() {
        let results = RatioEngine::new().compute(&full_snapshot());
        assert_eq!(results.len(), RATIO_COUNT);
        assert!(results.iter().all(RatioResult::is_applicable));

        let empty = RatioEngine::new().compute(&snapshot(vec![], vec![], vec![]));
        assert_eq!(empty.len(), RATIO_COUNT);
        assert!(empty.iter().all(|r| r.interpretation == Interpretation::NotApplicable));
        assert!(empty.iter().all(|r| r.reason.is_some()));
    }

    #[test]
    fn test_values_and_interpretations() {
        let results = RatioEngine::new().compute(&full_snapshot());

        let current = find(&results, "Current Ratio");
        assert_eq!(current.value, Some(1.5));
        assert_eq!(current.interpretation, Interpretation::Healthy);

        let quick = find(&results, "Quick Ratio");
        assert_eq!(quick.value, Some(1.1));

        assert_eq!(find(&results, "Debt-to-Equity").value, Some(1.0));
        assert_eq!(find(&results, "Debt-to-Equity").interpretation, Interpretation::Healthy);
        assert_eq!(find(&results, "Gross Margin").value, Some(0.4));
        assert_eq!(find(&results, "Interest Coverage").value, Some(9.0));
        assert_eq!(find(&results, "Free Cash Flow Margin").value, Some(40.0 / 300.0));
        assert_eq!(find(&results, "Asset Turnover").interpretation, Interpretation::Moderate);
        assert_eq!(find(&results, "Inventory Turnover").interpretation, Interpretation::Moderate);
    }

    #[test]
    fn test_zero_denominator_is_not_applicable() {
        let mut snap = full_snapshot();
        let mut balance = snap.statements.balance_sheet.take().unwrap().items().to_vec();
        balance[5] = item("LiabilitiesCurrent", 0.0);
        snap.statements
            .set(StatementSet::new(StatementKind::BalanceSheet, PeriodEnd::Current, PeriodEnd::Prior, balance));

        let results = RatioEngine::new().compute(&snap);
        let current = find(&results, "Current Ratio");
        assert_eq!(current.value, None);
        assert_eq!(current.interpretation, Interpretation::NotApplicable);
        assert_eq!(current.reason.as_deref(), Some("current liabilities is zero"));
    }

    #[test]
    fn test_service_company_without_inventory() {
        let mut snap = full_snapshot();
        let balance: Vec<LineItem> = snap
            .statements
            .balance_sheet
            .take()
            .unwrap()
            .items()
            .iter()
            .filter(|item| !item.matches_concept("InventoryNet"))
            .cloned()
            .collect();
        snap.statements
            .set(StatementSet::new(StatementKind::BalanceSheet, PeriodEnd::Current, PeriodEnd::Prior, balance));

        let results = RatioEngine::new().compute(&snap);
        let turnover = find(&results, "Inventory Turnover");
        assert_eq!(turnover.reason.as_deref(), Some("no inventory reported (service company)"));
        // Inventory is optional for the quick ratio.
        assert_eq!(find(&results, "Quick Ratio").value, Some(1.5));
    }

    #[test]
    fn test_negative_equity_is_weak() {
        let snap = snapshot(
            vec![item("Liabilities", 500.0), item("StockholdersEquity", -50.0)],
            vec![],
            vec![],
        );
        let results = RatioEngine::new().compute(&snap);
        assert_eq!(find(&results, "Debt-to-Equity").interpretation, Interpretation::Weak);
    }

    #[test]
    fn test_missing_operand_reason() {
        let snap = snapshot(vec![item("LiabilitiesCurrent", 10.0)], vec![], vec![]);
        let results = RatioEngine::new().compute(&snap);
        assert_eq!(
            find(&results, "Cash Ratio").reason.as_deref(),
            Some("missing cash and cash equivalents")
        );
    }

    #[test]
    fn test_ratio_names_are_unique() {
        let mut names: Vec<&str> = RatioEngine::ratio_names().collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RATIO_COUNT);
    }
}
