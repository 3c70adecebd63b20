//! Validation engine: arithmetic and completeness checks on a snapshot
//!
//! All four checks always run and never abort the pipeline:
//!
//! 1. completeness: all three statements present with enough line items
//! 2. period coverage: enough items carry both current and prior values
//! 3. balance identity: assets equal liabilities plus equity components
//! 4. calculation linkbase: weighted children sum to their parent
//!
//! Failures surface as warnings; the resulting status is either
//! [`ValidationStatus::Valid`] or [`ValidationStatus::ValidWithWarnings`].

use crate::concepts::{
    EQUITY_INCLUDING_NONCONTROLLING, LIABILITIES_AND_EQUITY, MINORITY_INTEREST,
    REDEEMABLE_NONCONTROLLING, STOCKHOLDERS_EQUITY, TOTAL_ASSETS, TOTAL_LIABILITIES,
};
use crate::model::{CalculationRelation, CompanyFilingSnapshot, StatementKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument, warn};

/// Thresholds used by the validation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum line items per statement
    pub min_line_items: usize,
    /// Share of items that must carry both period values
    pub period_coverage_threshold: f64,
    /// Relative tolerance of the balance identity
    pub balance_tolerance: f64,
    /// Relative tolerance of calculation-linkbase sums
    pub linkbase_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_line_items: 15,
            period_coverage_threshold: 0.8,
            balance_tolerance: 0.005,
            linkbase_tolerance: 0.005,
        }
    }
}

/// Overall validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    ValidWithWarnings,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Valid => f.write_str("valid"),
            ValidationStatus::ValidWithWarnings => f.write_str("valid with warnings"),
        }
    }
}

/// The individual checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Completeness,
    PeriodCoverage,
    BalanceIdentity,
    CalculationLinkbase,
}

/// Result of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckKind,
    pub passed: bool,
    pub detail: String,
}

/// How the right-hand side of the balance identity was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityBasis {
    /// Liabilities + equity + minority + redeemable
    Components,
    /// The reported "liabilities and stockholders' equity" total
    CombinedTotal,
}

/// Exact figures of the balance identity check (current period)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceIdentity {
    pub basis: IdentityBasis,
    pub reported_assets: f64,
    pub liabilities: Option<f64>,
    pub equity: Option<f64>,
    pub minority_interest: f64,
    pub redeemable_noncontrolling_interest: f64,
    pub computed_total: f64,
    pub difference: f64,
    pub relative_difference: f64,
    pub tolerance: f64,
    pub passed: bool,
}

/// A calculation relation whose children do not sum to the parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkbaseMismatch {
    pub statement: StatementKind,
    pub parent: String,
    pub reported: f64,
    pub computed: f64,
    pub difference: f64,
}

/// Non-fatal validation findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    MissingStatement {
        statement: StatementKind,
    },
    IncompleteStatement {
        statement: StatementKind,
        line_items: usize,
        minimum: usize,
    },
    LowPeriodCoverage {
        coverage: f64,
        threshold: f64,
    },
    BalanceIdentityMismatch {
        reported: f64,
        computed: f64,
        relative_difference: f64,
    },
    BalanceIdentityUnavailable {
        missing: Vec<String>,
    },
    LinkbaseMismatch {
        parent: String,
        reported: f64,
        computed: f64,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStatement { statement } => write!(f, "{statement} is missing"),
            Self::IncompleteStatement {
                statement,
                line_items,
                minimum,
            } => write!(
                f,
                "{statement} is incomplete: {line_items} line items, at least {minimum} expected"
            ),
            Self::LowPeriodCoverage { coverage, threshold } => write!(
                f,
                "only {:.1}% of line items have both periods (threshold {:.1}%)",
                coverage * 100.0,
                threshold * 100.0
            ),
            Self::BalanceIdentityMismatch {
                reported,
                computed,
                relative_difference,
            } => write!(
                f,
                "balance identity mismatch: assets {reported:.0} vs liabilities and equity {computed:.0} ({:.3}%)",
                relative_difference * 100.0
            ),
            Self::BalanceIdentityUnavailable { missing } => {
                write!(f, "balance identity not checked, missing {}", missing.join(", "))
            }
            Self::LinkbaseMismatch {
                parent,
                reported,
                computed,
            } => write!(
                f,
                "calculation mismatch for {parent}: reported {reported:.0}, children sum to {computed:.0}"
            ),
        }
    }
}

/// Output of the validation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: ValidationStatus,
    pub checks: Vec<CheckResult>,
    pub balance_identity: Option<BalanceIdentity>,
    pub linkbase_mismatches: Vec<LinkbaseMismatch>,
    /// Share of line items with both period values
    pub period_coverage: f64,
    pub total_line_items: usize,
    pub warnings: Vec<ValidationWarning>,
}

impl VerificationReport {
    pub fn check(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|check| check.check == kind)
    }

    pub fn passed(&self, kind: CheckKind) -> bool {
        self.check(kind).is_some_and(|check| check.passed)
    }

    /// Whether any statement is missing or short
    pub fn is_incomplete(&self) -> bool {
        !self.passed(CheckKind::Completeness)
    }
}

/// Runs the validation checks
#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run every check against `snapshot`
    #[instrument(skip_all, fields(company = %snapshot.company_id))]
    pub fn verify(&self, snapshot: &CompanyFilingSnapshot) -> VerificationReport {
        let mut warnings = Vec::new();
        let mut checks = Vec::with_capacity(4);

        checks.push(self.check_completeness(snapshot, &mut warnings));

        let (coverage_check, period_coverage) = self.check_period_coverage(snapshot, &mut warnings);
        checks.push(coverage_check);

        let (identity_check, balance_identity) = self.check_balance_identity(snapshot, &mut warnings);
        checks.push(identity_check);

        let (linkbase_check, linkbase_mismatches) = self.check_linkbase(snapshot, &mut warnings);
        checks.push(linkbase_check);

        let status = if warnings.is_empty() {
            ValidationStatus::Valid
        } else {
            ValidationStatus::ValidWithWarnings
        };

        for warning in &warnings {
            warn!(company = %snapshot.company_id, "{warning}");
        }

        VerificationReport {
            status,
            checks,
            balance_identity,
            linkbase_mismatches,
            period_coverage,
            total_line_items: snapshot.total_line_items(),
            warnings,
        }
    }

    fn check_completeness(
        &self,
        snapshot: &CompanyFilingSnapshot,
        warnings: &mut Vec<ValidationWarning>,
    ) -> CheckResult {
        let minimum = self.config.min_line_items;
        let mut details = Vec::with_capacity(StatementKind::ALL.len());
        let mut passed = true;

        for kind in StatementKind::ALL {
            match snapshot.statements.get(kind) {
                None => {
                    passed = false;
                    details.push(format!("{kind}: missing"));
                    warnings.push(ValidationWarning::MissingStatement { statement: kind });
                }
                Some(statement) => {
                    details.push(format!("{kind}: {} items", statement.len()));
                    if statement.len() < minimum {
                        passed = false;
                        warnings.push(ValidationWarning::IncompleteStatement {
                            statement: kind,
                            line_items: statement.len(),
                            minimum,
                        });
                    }
                }
            }
        }

        CheckResult {
            check: CheckKind::Completeness,
            passed,
            detail: format!("{} (minimum {minimum})", details.join("; ")),
        }
    }

    fn check_period_coverage(
        &self,
        snapshot: &CompanyFilingSnapshot,
        warnings: &mut Vec<ValidationWarning>,
    ) -> (CheckResult, f64) {
        let total = snapshot.total_line_items();
        let both = snapshot.line_items().filter(|item| item.has_both_periods()).count();
        let coverage = if total == 0 { 0.0 } else { both as f64 / total as f64 };
        let threshold = self.config.period_coverage_threshold;
        let passed = total > 0 && coverage >= threshold;

        if !passed {
            warnings.push(ValidationWarning::LowPeriodCoverage { coverage, threshold });
        }

        let check = CheckResult {
            check: CheckKind::PeriodCoverage,
            passed,
            detail: format!(
                "{both} of {total} line items have both periods ({:.1}%, threshold {:.1}%)",
                coverage * 100.0,
                threshold * 100.0
            ),
        };
        (check, coverage)
    }

    fn check_balance_identity(
        &self,
        snapshot: &CompanyFilingSnapshot,
        warnings: &mut Vec<ValidationWarning>,
    ) -> (CheckResult, Option<BalanceIdentity>) {
        match self.compute_balance_identity(snapshot) {
            Ok(identity) => {
                if !identity.passed {
                    warnings.push(ValidationWarning::BalanceIdentityMismatch {
                        reported: identity.reported_assets,
                        computed: identity.computed_total,
                        relative_difference: identity.relative_difference,
                    });
                }
                let check = CheckResult {
                    check: CheckKind::BalanceIdentity,
                    passed: identity.passed,
                    detail: format!(
                        "assets {:.0} vs computed {:.0}, difference {:.0} ({:.4}%, tolerance {:.2}%)",
                        identity.reported_assets,
                        identity.computed_total,
                        identity.difference,
                        identity.relative_difference * 100.0,
                        identity.tolerance * 100.0
                    ),
                };
                (check, Some(identity))
            }
            Err(missing) => {
                let check = CheckResult {
                    check: CheckKind::BalanceIdentity,
                    passed: false,
                    detail: format!("not computable, missing {}", missing.join(", ")),
                };
                warnings.push(ValidationWarning::BalanceIdentityUnavailable { missing });
                (check, None)
            }
        }
    }

    /// Compute the identity from current-period values, or name what is missing
    fn compute_balance_identity(&self, snapshot: &CompanyFilingSnapshot) -> Result<BalanceIdentity, Vec<String>> {
        let assets = TOTAL_ASSETS.current_value(snapshot);
        let liabilities = TOTAL_LIABILITIES.current_value(snapshot);
        let parent_equity = STOCKHOLDERS_EQUITY.current_value(snapshot);
        let total_equity = EQUITY_INCLUDING_NONCONTROLLING.current_value(snapshot);
        let redeemable = REDEEMABLE_NONCONTROLLING.current_value(snapshot).unwrap_or(0.0);

        // Equity reported only including noncontrolling interest already holds minority.
        let (equity, minority) = match (parent_equity, total_equity) {
            (Some(equity), _) => (Some(equity), MINORITY_INTEREST.current_value(snapshot).unwrap_or(0.0)),
            (None, Some(total)) => (Some(total), 0.0),
            (None, None) => (None, 0.0),
        };

        let Some(assets) = assets else {
            return Err(vec![TOTAL_ASSETS.name.to_string()]);
        };

        let (basis, computed_total) = match (liabilities, equity) {
            (Some(liabilities), Some(equity)) => (
                IdentityBasis::Components,
                liabilities + equity + minority + redeemable,
            ),
            _ => match LIABILITIES_AND_EQUITY.current_value(snapshot) {
                Some(combined) => (IdentityBasis::CombinedTotal, combined),
                None => {
                    let mut missing = Vec::new();
                    if liabilities.is_none() {
                        missing.push(TOTAL_LIABILITIES.name.to_string());
                    }
                    if equity.is_none() {
                        missing.push(STOCKHOLDERS_EQUITY.name.to_string());
                    }
                    return Err(missing);
                }
            },
        };

        let difference = assets - computed_total;
        let relative_difference = relative(difference, assets);
        let tolerance = self.config.balance_tolerance;
        let passed = relative_difference <= tolerance;
        debug!(assets, computed_total, relative_difference, passed, "Balance identity");

        Ok(BalanceIdentity {
            basis,
            reported_assets: assets,
            liabilities,
            equity,
            minority_interest: minority,
            redeemable_noncontrolling_interest: redeemable,
            computed_total,
            difference,
            relative_difference,
            tolerance,
            passed,
        })
    }

    fn check_linkbase(
        &self,
        snapshot: &CompanyFilingSnapshot,
        warnings: &mut Vec<ValidationWarning>,
    ) -> (CheckResult, Vec<LinkbaseMismatch>) {
        let mut evaluated = 0usize;
        let mut mismatches = Vec::new();

        for relation in &snapshot.calculations {
            let Some((reported, computed)) = evaluate_relation(snapshot, relation) else {
                debug!(parent = %relation.parent, "Skipping calculation with missing members");
                continue;
            };
            evaluated += 1;

            let difference = reported - computed;
            if difference.abs() > self.config.linkbase_tolerance * reported.abs().max(1.0) {
                warnings.push(ValidationWarning::LinkbaseMismatch {
                    parent: relation.parent.clone(),
                    reported,
                    computed,
                });
                mismatches.push(LinkbaseMismatch {
                    statement: relation.statement,
                    parent: relation.parent.clone(),
                    reported,
                    computed,
                    difference,
                });
            }
        }

        let detail = if snapshot.calculations.is_empty() {
            "no calculation relations provided".to_string()
        } else {
            format!(
                "{evaluated} of {} relations evaluated, {} mismatched",
                snapshot.calculations.len(),
                mismatches.len()
            )
        };

        let check = CheckResult {
            check: CheckKind::CalculationLinkbase,
            passed: mismatches.is_empty(),
            detail,
        };
        (check, mismatches)
    }
}

/// Reported parent value and weighted children sum, if all members have values
fn evaluate_relation(snapshot: &CompanyFilingSnapshot, relation: &CalculationRelation) -> Option<(f64, f64)> {
    let statement = snapshot.statements.get(relation.statement)?;
    let reported = statement.find_concept(&[relation.parent.as_str()])?.current_value()?;

    let mut computed = 0.0;
    for child in &relation.children {
        let value = statement.find_concept(&[child.concept.as_str()])?.current_value()?;
        computed += child.weight * value;
    }
    Some((reported, computed))
}

fn relative(difference: f64, base: f64) -> f64 {
    if base.abs() > f64::EPSILON {
        (difference / base).abs()
    } else if difference.abs() <= f64::EPSILON {
        0.0
    } else {
        f64::INFINITY
    }
}
