//! Final report assembly, deterministic review and markdown rendering

use crate::dispatcher::{AnalysisTaskResult, TaskStatus};
use crate::model::{CompanyFilingSnapshot, FilingType};
use crate::ratios::{Interpretation, RATIO_COUNT, RatioResult};
use crate::schema::AnalysisOutput;
use crate::session::SessionWarning;
use crate::validation::VerificationReport;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use uuid::Uuid;

/// Identifies the filing a report is based on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingSummary {
    pub company_id: String,
    pub filing_type: FilingType,
    pub filing_date: NaiveDate,
    pub accession_id: String,
    /// Line items per present statement, in presentation order
    pub line_items: Vec<(String, usize)>,
    pub total_line_items: usize,
    /// Whether the snapshot came from the local cache
    pub from_cache: bool,
}

impl FilingSummary {
    pub fn from_snapshot(snapshot: &CompanyFilingSnapshot, from_cache: bool) -> Self {
        Self {
            company_id: snapshot.company_id.clone(),
            filing_type: snapshot.filing_type,
            filing_date: snapshot.filing_date,
            accession_id: snapshot.accession_id.clone(),
            line_items: snapshot
                .statements
                .iter()
                .map(|statement| (statement.kind().as_str().to_string(), statement.len()))
                .collect(),
            total_line_items: snapshot.total_line_items(),
            from_cache,
        }
    }
}

/// One analysis section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub task_name: String,
    pub title: String,
    pub status: TaskStatus,
    pub output: Option<Map<String, Value>>,
    /// Why the section is missing, for failed or skipped tasks
    pub note: Option<String>,
}

impl ReportSection {
    pub fn from_result(result: &AnalysisTaskResult, title: &str) -> Self {
        let note = match (result.status(), result.error()) {
            (TaskStatus::Ok, _) => None,
            (TaskStatus::Failed, Some(error)) => Some(format!("Unavailable: task failed ({error})")),
            (TaskStatus::Skipped, Some(error)) => Some(format!("Unavailable: task skipped ({error})")),
            (status, None) => Some(format!("Unavailable: task {status:?}")),
        };
        Self {
            task_name: result.task_name().to_string(),
            title: title.to_string(),
            status: result.status(),
            output: result.structured_output().cloned(),
            note,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok && self.output.is_some()
    }

    fn analysis(&self) -> Option<AnalysisOutput> {
        self.output.as_ref().and_then(AnalysisOutput::from_checked)
    }
}

/// Who produced the synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisSource {
    Collaborator,
    /// Built from the successful sections because the synthesis task failed
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesis {
    pub source: SynthesisSource,
    pub output: AnalysisOutput,
}

/// Rating implied by the ratio interpretations
pub fn rating_from_ratios(ratios: &[RatioResult]) -> &'static str {
    let applicable: Vec<_> = ratios.iter().filter(|r| r.is_applicable()).collect();
    if applicable.is_empty() {
        return "Weak";
    }
    let score: f64 = applicable
        .iter()
        .map(|r| match r.interpretation {
            Interpretation::Healthy => 1.0,
            Interpretation::Moderate => 0.5,
            Interpretation::Weak | Interpretation::NotApplicable => 0.0,
        })
        .sum::<f64>()
        / applicable.len() as f64;

    match score {
        s if s >= 0.75 => "Strong",
        s if s >= 0.5 => "Moderate",
        s if s >= 0.25 => "Weak",
        _ => "Critical",
    }
}

/// Deterministic synthesis from the sections that succeeded
pub fn fallback_synthesis(
    company_id: &str,
    sections: &[ReportSection],
    ratios: &[RatioResult],
    validation: &VerificationReport,
) -> AnalysisOutput {
    let succeeded: Vec<(&ReportSection, AnalysisOutput)> = sections
        .iter()
        .filter_map(|section| section.analysis().map(|output| (section, output)))
        .collect();
    let missing: Vec<&str> = sections
        .iter()
        .filter(|section| !section.is_ok())
        .map(|section| section.title.as_str())
        .collect();

    let count = |interpretation: Interpretation| ratios.iter().filter(|r| r.interpretation == interpretation).count();
    let applicable = ratios.iter().filter(|r| r.is_applicable()).count();

    let executive_summary = format!(
        "{company_id}: {} of {} analysis sections completed; filing data is {}. \
         {applicable} of {} ratios computed ({} healthy, {} moderate, {} weak).",
        succeeded.len(),
        sections.len(),
        validation.status,
        ratios.len(),
        count(Interpretation::Healthy),
        count(Interpretation::Moderate),
        count(Interpretation::Weak),
    );

    let mut detailed_analysis = succeeded
        .iter()
        .map(|(section, output)| format!("{}: {}", section.title, output.executive_summary))
        .collect::<Vec<_>>()
        .join("\n\n");
    if !missing.is_empty() {
        if !detailed_analysis.is_empty() {
            detailed_analysis.push_str("\n\n");
        }
        let _ = write!(detailed_analysis, "Not covered: {}.", missing.join(", "));
    }

    let mut top_findings: Vec<String> = succeeded
        .iter()
        .filter_map(|(_, output)| output.top_findings.first().cloned())
        .collect();
    top_findings.extend(validation.warnings.iter().take(3).map(ToString::to_string));
    if !missing.is_empty() {
        top_findings.push(format!("Unavailable sections: {}", missing.join(", ")));
    }

    AnalysisOutput {
        executive_summary,
        detailed_analysis,
        top_findings,
        rating: rating_from_ratios(ratios).to_string(),
    }
}

/// One deterministic review check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Outcome of the deterministic report review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportReview {
    pub passed: bool,
    pub checks: Vec<ReviewCheck>,
}

impl ReportReview {
    pub fn failures(&self) -> impl Iterator<Item = &ReviewCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }
}

/// The assembled research report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub session_id: Uuid,
    pub query: String,
    pub company_id: String,
    pub filing: FilingSummary,
    pub validation: VerificationReport,
    pub ratios: Vec<RatioResult>,
    pub sections: Vec<ReportSection>,
    pub synthesis: Synthesis,
    /// Human-readable notes on everything that is missing or degraded
    pub degraded: Vec<String>,
    pub warnings: Vec<SessionWarning>,
    pub review: Option<ReportReview>,
    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    /// Deterministic review of the assembled report.
    ///
    /// `recomputed_ratios` and `recomputed_validation` must be derived from
    /// the filing snapshot independently of the values copied into the report.
    pub fn review(
        &self,
        recomputed_ratios: &[RatioResult],
        recomputed_validation: &VerificationReport,
    ) -> ReportReview {
        let mut checks = Vec::new();
        let mut check = |name: &str, passed: bool, detail: String| {
            checks.push(ReviewCheck {
                name: name.to_string(),
                passed,
                detail,
            });
        };

        let unannotated: Vec<&str> = self
            .sections
            .iter()
            .filter(|s| !s.is_ok() && s.note.is_none())
            .map(|s| s.task_name.as_str())
            .collect();
        check(
            "missing_sections_annotated",
            unannotated.is_empty(),
            if unannotated.is_empty() {
                "every failed or skipped section carries a note".to_string()
            } else {
                format!("no note on {}", unannotated.join(", "))
            },
        );

        let unexplained: Vec<&str> = self
            .ratios
            .iter()
            .filter(|r| !r.value.is_some_and(f64::is_finite) && r.reason.is_none())
            .map(|r| r.name.as_str())
            .collect();
        check(
            "ratio_set_complete",
            self.ratios.len() == RATIO_COUNT && unexplained.is_empty(),
            if unexplained.is_empty() {
                format!("{} of {RATIO_COUNT} ratios reported", self.ratios.len())
            } else {
                format!("no value or reason for {}", unexplained.join(", "))
            },
        );

        check(
            "ratios_match_filing",
            self.ratios.as_slice() == recomputed_ratios,
            format!(
                "{} ratios in report, {} recomputed from the filing",
                self.ratios.len(),
                recomputed_ratios.len()
            ),
        );

        check(
            "validation_status_matches_filing",
            self.validation.status == recomputed_validation.status,
            format!(
                "report says {}, filing gives {}",
                self.validation.status, recomputed_validation.status
            ),
        );

        let succeeded = self.sections.iter().filter(|s| s.is_ok()).count();
        check(
            "analysis_section_succeeded",
            succeeded > 0,
            format!("{succeeded} of {} sections succeeded", self.sections.len()),
        );

        ReportReview {
            passed: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    /// Render as markdown
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# {} financial analysis\n", self.company_id);
        let _ = writeln!(md, "_Query: {}_\n", self.query);
        let _ = writeln!(
            md,
            "Filing: {} filed {} (accession {}), {} line items{}.\n",
            self.filing.filing_type,
            self.filing.filing_date,
            self.filing.accession_id,
            self.filing.total_line_items,
            if self.filing.from_cache { ", from cache" } else { "" }
        );

        let _ = writeln!(md, "## Summary\n");
        let _ = writeln!(md, "**Rating: {}**\n", self.synthesis.output.rating);
        let _ = writeln!(md, "{}\n", self.synthesis.output.executive_summary);
        if self.synthesis.source == SynthesisSource::Fallback {
            let _ = writeln!(md, "_Summary assembled without the synthesis step._\n");
        }
        for finding in &self.synthesis.output.top_findings {
            let _ = writeln!(md, "- {finding}");
        }
        md.push('\n');

        let _ = writeln!(md, "## Validation\n");
        let _ = writeln!(md, "Status: {}\n", self.validation.status);
        if let Some(identity) = &self.validation.balance_identity {
            let _ = writeln!(
                md,
                "Balance identity: assets {:.0} vs computed {:.0} (difference {:.0}, {}).\n",
                identity.reported_assets,
                identity.computed_total,
                identity.difference,
                if identity.passed { "passed" } else { "failed" }
            );
        }
        for warning in &self.validation.warnings {
            let _ = writeln!(md, "- {warning}");
        }
        md.push('\n');

        let _ = writeln!(md, "## Ratios\n");
        let _ = writeln!(md, "| Ratio | Category | Value | Reading |");
        let _ = writeln!(md, "|---|---|---|---|");
        for ratio in &self.ratios {
            let value = ratio
                .value
                .map_or_else(|| ratio.reason.clone().unwrap_or_default(), |v| format!("{v:.2}"));
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} |",
                ratio.name, ratio.category, value, ratio.interpretation
            );
        }
        md.push('\n');

        for section in &self.sections {
            let _ = writeln!(md, "## {}\n", section.title);
            match (section.analysis(), &section.note) {
                (Some(output), _) => {
                    let _ = writeln!(md, "**Rating: {}**\n", output.rating);
                    let _ = writeln!(md, "{}\n", output.executive_summary);
                    let _ = writeln!(md, "{}\n", output.detailed_analysis);
                    for finding in &output.top_findings {
                        let _ = writeln!(md, "- {finding}");
                    }
                    md.push('\n');
                }
                (None, Some(note)) => {
                    let _ = writeln!(md, "_{note}_\n");
                }
                (None, None) => {
                    let _ = writeln!(md, "_Unavailable._\n");
                }
            }
        }

        if !self.degraded.is_empty() {
            let _ = writeln!(md, "## Gaps\n");
            for note in &self.degraded {
                let _ = writeln!(md, "- {note}");
            }
        }

        md.trim_end().to_string() + "\n"
    }
}
