//! Built-in analysis tasks
//!
//! Each task turns the pipeline's inputs into a [`PromptContext`] for the
//! collaborator and declares the schema its output must satisfy. Tasks never
//! call the collaborator themselves; the dispatcher does.

use crate::branch::{BranchOutcome, join_branches};
use crate::collaborator::PromptContext;
use crate::context::{ContextSnippet, ContextSource};
use crate::dispatcher::{AnalysisTaskResult, TaskStatus};
use crate::error::TaskErrorKind;
use crate::model::{CompanyFilingSnapshot, StatementKind, StatementSet};
use crate::prompts;
use crate::provider::{FilingProvider, FilingRef};
use crate::ratios::RatioResult;
use crate::schema::{AnalysisOutput, FieldKind, FieldSpec, OutputSchema};
use crate::validation::{ValidationWarning, VerificationReport};
use crate::{concepts, label, ratios};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Number of recent filings the company profile looks at
const PROFILE_FILING_COUNT: usize = 8;

/// What a task needs before it can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDependency {
    /// Needs normalized statements
    NeedsSnapshot,
    /// Needs only the resolved company
    CompanyOnly,
}

/// Everything a task may draw on
#[derive(Debug, Clone, Copy)]
pub struct TaskInput<'a> {
    pub company_id: &'a str,
    pub query: &'a str,
    pub snapshot: Option<&'a CompanyFilingSnapshot>,
    pub ratios: &'a [RatioResult],
    pub validation: Option<&'a VerificationReport>,
    pub context: &'a [ContextSnippet],
    /// Results of earlier tasks; only the synthesis step reads these
    pub sections: &'a [AnalysisTaskResult],
}

impl<'a> TaskInput<'a> {
    /// Input with only the company known
    pub fn for_company(company_id: &'a str, query: &'a str) -> Self {
        Self {
            company_id,
            query,
            snapshot: None,
            ratios: &[],
            validation: None,
            context: &[],
            sections: &[],
        }
    }

    fn require_snapshot(&self) -> Result<&'a CompanyFilingSnapshot, TaskErrorKind> {
        self.snapshot.ok_or_else(|| TaskErrorKind::MissingInput {
            message: "no filing snapshot available".to_string(),
        })
    }

    fn warning_texts(&self) -> Vec<String> {
        self.validation
            .map(|report| report.warnings.iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }
}

/// One unit of analysis handed to a collaborator
#[async_trait]
pub trait AnalysisTask: Send + Sync {
    /// Stable task identifier, also the collaborator task name
    fn name(&self) -> &str;

    /// Report section heading
    fn title(&self) -> &str;

    fn dependency(&self) -> TaskDependency;

    /// Declared structure of the collaborator's output
    fn schema(&self) -> OutputSchema {
        OutputSchema::analysis()
    }

    /// Build the prompt context for this task
    async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind>;
}

fn prompt_context(
    task: &dyn AnalysisTask,
    template: &str,
    template_data: &Value,
    data: Value,
) -> Result<PromptContext, TaskErrorKind> {
    Ok(PromptContext {
        task_name: task.name().to_string(),
        instructions: prompts::render(template, template_data)?,
        data,
        output_schema: task.schema().describe(),
    })
}

fn statement_rows(statement: &StatementSet) -> Value {
    statement
        .items()
        .iter()
        .map(|item| {
            json!({
                "label": item.label(),
                "concept": item.concept_id(),
                "level": item.level(),
                "current": item.current_value(),
                "prior": item.prior_value(),
            })
        })
        .collect()
}

/// Analysis of one financial statement
#[derive(Debug, Clone, Copy)]
pub struct StatementTask {
    kind: StatementKind,
}

impl StatementTask {
    pub fn new(kind: StatementKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl AnalysisTask for StatementTask {
    fn name(&self) -> &str {
        match self.kind {
            StatementKind::BalanceSheet => "balance_sheet_analysis",
            StatementKind::IncomeStatement => "income_statement_analysis",
            StatementKind::CashFlow => "cash_flow_analysis",
        }
    }

    fn title(&self) -> &str {
        self.kind.title()
    }

    fn dependency(&self) -> TaskDependency {
        TaskDependency::NeedsSnapshot
    }

    async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind> {
        let snapshot = input.require_snapshot()?;
        let statement = snapshot
            .statements
            .get(self.kind)
            .ok_or_else(|| TaskErrorKind::MissingInput {
                message: format!("the filing has no {}", self.kind),
            })?;

        let incomplete = input.validation.is_some_and(|report| {
            report.warnings.iter().any(|warning| {
                matches!(warning, ValidationWarning::IncompleteStatement { statement, .. } if *statement == self.kind)
            })
        });

        let template_data = json!({
            "statement_title": self.kind.title(),
            "company": snapshot.company_id,
            "filing_type": snapshot.filing_type.as_str(),
            "filing_date": snapshot.filing_date.to_string(),
            "line_items": statement.len(),
            "current_period": statement.current_period().to_string(),
            "prior_period": statement.prior_period().to_string(),
            "incomplete": incomplete,
            "warnings": input.warning_texts(),
        });
        let data = json!({
            "statement": self.kind.as_str(),
            "currentPeriod": statement.current_period(),
            "priorPeriod": statement.prior_period(),
            "lineItems": statement_rows(statement),
        });

        prompt_context(self, prompts::STATEMENT_ANALYSIS, &template_data, data)
    }
}

/// Commentary on the computed ratio set
#[derive(Debug, Clone, Copy, Default)]
pub struct RatioCommentaryTask;

#[async_trait]
impl AnalysisTask for RatioCommentaryTask {
    fn name(&self) -> &str {
        "ratio_commentary"
    }

    fn title(&self) -> &str {
        "Financial Ratios"
    }

    fn dependency(&self) -> TaskDependency {
        TaskDependency::NeedsSnapshot
    }

    async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind> {
        let snapshot = input.require_snapshot()?;
        if input.ratios.is_empty() {
            return Err(TaskErrorKind::MissingInput {
                message: "no ratios computed".to_string(),
            });
        }

        let template_data = json!({
            "company": snapshot.company_id,
            "applicable": input.ratios.iter().filter(|r| r.is_applicable()).count(),
            "total": ratios::RATIO_COUNT,
            "ratios": input.ratios,
        });
        let data = json!({ "ratios": input.ratios });

        prompt_context(self, prompts::RATIO_COMMENTARY, &template_data, data)
    }
}

/// Company profile built from two concurrent sub-fetches: web context and
/// recent regulatory filings
pub struct CompanyProfileTask {
    provider: Arc<dyn FilingProvider>,
    context_source: Arc<dyn ContextSource>,
    sub_fetch_timeout: Duration,
}

impl CompanyProfileTask {
    pub fn new(
        provider: Arc<dyn FilingProvider>,
        context_source: Arc<dyn ContextSource>,
        sub_fetch_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            context_source,
            sub_fetch_timeout,
        }
    }
}

impl std::fmt::Debug for CompanyProfileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompanyProfileTask")
            .field("sub_fetch_timeout", &self.sub_fetch_timeout)
            .finish_non_exhaustive()
    }
}

fn outcome_label<T, E: std::fmt::Display>(outcome: &BranchOutcome<T, E>) -> String {
    match outcome {
        BranchOutcome::Completed(_) => "completed".to_string(),
        BranchOutcome::Failed(err) => format!("failed: {err}"),
        BranchOutcome::TimedOut => "timed out".to_string(),
    }
}

#[async_trait]
impl AnalysisTask for CompanyProfileTask {
    fn name(&self) -> &str {
        "company_profile"
    }

    fn title(&self) -> &str {
        "Company Profile"
    }

    fn dependency(&self) -> TaskDependency {
        TaskDependency::CompanyOnly
    }

    fn schema(&self) -> OutputSchema {
        OutputSchema::analysis().with_field(FieldSpec::optional(
            "segments",
            FieldKind::StringList,
            "Business segments",
        ))
    }

    async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind> {
        let (snippets, filings) = join_branches(
            self.context_source.search(input.company_id),
            self.provider.recent_filings(input.company_id, PROFILE_FILING_COUNT),
            self.sub_fetch_timeout,
        )
        .await;

        let sources = json!({
            "context": outcome_label(&snippets),
            "filings": outcome_label(&filings),
        });
        if !snippets.is_completed() || !filings.is_completed() {
            warn!(company = input.company_id, %sources, "Company profile sub-fetch degraded");
        }

        let snippets: Vec<ContextSnippet> = snippets.ok().unwrap_or_default();
        let filings: Vec<FilingRef> = filings.ok().unwrap_or_default();
        debug!(
            snippets = snippets.len(),
            filings = filings.len(),
            "Company profile sub-fetches joined"
        );

        let template_data = json!({
            "company": input.company_id,
            "filings": filings,
            "snippets": snippets,
        });
        let data = json!({
            "company": input.company_id,
            "recentFilings": filings,
            "context": snippets,
            "sources": sources,
        });

        prompt_context(self, prompts::COMPANY_PROFILE, &template_data, data)
    }
}

/// Principal risks, from the context gathered alongside the filing
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskFactorsTask;

#[async_trait]
impl AnalysisTask for RiskFactorsTask {
    fn name(&self) -> &str {
        "risk_factors"
    }

    fn title(&self) -> &str {
        "Risk Factors"
    }

    fn dependency(&self) -> TaskDependency {
        TaskDependency::CompanyOnly
    }

    async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind> {
        let template_data = json!({
            "company": input.company_id,
            "snippets": input.context,
        });
        let data = json!({
            "company": input.company_id,
            "context": input.context,
            "validationWarnings": input.warning_texts(),
        });

        prompt_context(self, prompts::RISK_FACTORS, &template_data, data)
    }
}

/// Final synthesis over the sections that succeeded
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisTask;

impl SynthesisTask {
    pub const NAME: &'static str = "synthesis";
}

#[async_trait]
impl AnalysisTask for SynthesisTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn title(&self) -> &str {
        "Summary"
    }

    fn dependency(&self) -> TaskDependency {
        TaskDependency::CompanyOnly
    }

    async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind> {
        let mut sections = Vec::new();
        let mut missing = Vec::new();
        for result in input.sections {
            match (result.status(), result.structured_output().and_then(AnalysisOutput::from_checked)) {
                (TaskStatus::Ok, Some(output)) => sections.push(json!({
                    "task": result.task_name(),
                    "title": label::humanize(result.task_name()),
                    "summary": output.executive_summary,
                    "findings": output.top_findings,
                    "rating": output.rating,
                })),
                _ => missing.push(result.task_name().to_string()),
            }
        }
        if sections.is_empty() {
            return Err(TaskErrorKind::MissingInput {
                message: "no analysis section succeeded".to_string(),
            });
        }

        let value_of = |concept: concepts::ConceptRef| input.snapshot.and_then(|s| concept.current_value(s));
        let validation_status = input
            .validation
            .map_or(Value::Null, |report| json!(report.status));

        let template_data = json!({
            "company": input.company_id,
            "query": input.query,
            "total_assets": value_of(concepts::TOTAL_ASSETS),
            "revenue": value_of(concepts::REVENUE),
            "net_income": value_of(concepts::NET_INCOME),
            "validation_status": validation_status,
            "sections": sections,
            "missing": missing,
        });
        let data = json!({
            "company": input.company_id,
            "sections": sections,
            "missingSections": missing,
            "ratios": input.ratios,
            "validationStatus": validation_status,
        });

        prompt_context(self, prompts::SYNTHESIS, &template_data, data)
    }
}

/// The standard task roster, in report order
pub fn default_tasks(
    provider: Arc<dyn FilingProvider>,
    context_source: Arc<dyn ContextSource>,
    sub_fetch_timeout: Duration,
) -> Vec<Arc<dyn AnalysisTask>> {
    vec![
        Arc::new(StatementTask::new(StatementKind::BalanceSheet)),
        Arc::new(StatementTask::new(StatementKind::IncomeStatement)),
        Arc::new(StatementTask::new(StatementKind::CashFlow)),
        Arc::new(RatioCommentaryTask),
        Arc::new(CompanyProfileTask::new(provider, context_source, sub_fetch_timeout)),
        Arc::new(RiskFactorsTask),
    ]
}
