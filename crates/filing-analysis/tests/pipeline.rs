//! End-to-end pipeline runs against in-memory providers

use async_trait::async_trait;
use chrono::NaiveDate;
use filing_analysis::collaborator::{AnalysisCollaborator, PromptContext};
use filing_analysis::error::{CollaboratorError, ProviderError};
use filing_analysis::provider::{FilingProvider, FilingRef, RawFiling, RawStatementTable};
use filing_analysis::session::WarningKind;
use filing_analysis::validation::CheckKind;
use filing_analysis::{
    FilingError, FilingType, Pipeline, PipelineConfig, PipelineSession, Stage, StageStatus, StatementKind,
    SynthesisSource, TaskStatus,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::mpsc;

const BALANCE_KEY_ROWS: &[(&str, &str, f64, f64)] = &[
    ("Cash and cash equivalents", "CashAndCashEquivalentsAtCarryingValue", 18_111e6, 16_139e6),
    ("Accounts receivable, net", "AccountsReceivableNetCurrent", 3_703e6, 4_418e6),
    ("Inventory", "InventoryNet", 12_276e6, 12_017e6),
    ("Total current assets", "AssetsCurrent", 64_653e6, 58_360e6),
    ("Total assets", "Assets", 133_735e6, 122_070e6),
    ("Total current liabilities", "LiabilitiesCurrent", 32_653e6, 28_821e6),
    ("Total liabilities", "Liabilities", 53_019e6, 48_390e6),
    (
        "Redeemable noncontrolling interests in subsidiaries",
        "RedeemableNoncontrollingInterestEquityCarryingAmount",
        59e6,
        63e6,
    ),
    ("Total stockholders' equity", "StockholdersEquity", 79_970e6, 72_913e6),
    ("Noncontrolling interests in subsidiaries", "MinorityInterest", 687e6, 704e6),
];

const INCOME_KEY_ROWS: &[(&str, &str, f64, f64)] = &[
    ("Total revenues", "Revenues", 25_182e6, 23_350e6),
    ("Total cost of revenues", "CostOfRevenue", 20_185e6, 18_698e6),
    ("Gross profit", "GrossProfit", 4_997e6, 4_652e6),
    ("Income from operations", "OperatingIncomeLoss", 2_717e6, 2_064e6),
    ("Interest expense", "InterestExpense", 92e6, 156e6),
    ("Net income attributable to common stockholders", "NetIncomeLoss", 2_167e6, 1_853e6),
];

const CASH_FLOW_KEY_ROWS: &[(&str, &str, f64, f64)] = &[
    (
        "Net cash provided by operating activities",
        "NetCashProvidedByUsedInOperatingActivities",
        6_255e6,
        4_308e6,
    ),
    (
        "Purchases of property and equipment excluding finance leases, net of sales",
        "PaymentsToAcquirePropertyPlantAndEquipment",
        2_790e6,
        2_460e6,
    ),
];

fn row(label: &str, concept: &str, current: f64, prior: f64) -> Map<String, Value> {
    let value = json!({
        "label": label,
        "concept": format!("us-gaap:{concept}"),
        "current": current,
        "prior": prior,
    });
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// A statement table with the key rows padded by filler rows up to `total`
fn table(kind: StatementKind, key_rows: &[(&str, &str, f64, f64)], total: usize) -> RawStatementTable {
    let mut table = RawStatementTable::new(kind);
    table.metadata.insert("current_period_end".to_string(), json!("2025-09-30"));
    table.metadata.insert("prior_period_end".to_string(), json!("2024-12-31"));

    let fillers = total.saturating_sub(key_rows.len());
    for i in 0..fillers {
        table.rows.push(row(
            &format!("Other {} item {i}", kind.as_str()),
            &format!("OtherItem{}{i}", kind.as_str().replace(' ', "")),
            1_000_000.0 + i as f64,
            900_000.0 + i as f64,
        ));
    }
    for (label, concept, current, prior) in key_rows {
        table.rows.push(row(label, concept, *current, *prior));
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Complete,
    ShortBalanceSheet,
    Unavailable,
}

struct StubProvider {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FilingProvider for StubProvider {
    async fn fetch_statements(&self, company_id: &str, filing_type: FilingType) -> Result<RawFiling, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let balance_sheet = match self.behavior {
            Behavior::Complete => table(StatementKind::BalanceSheet, BALANCE_KEY_ROWS, 49),
            // Totals only: enough for the balance identity, too short to be complete
            Behavior::ShortBalanceSheet => table(StatementKind::BalanceSheet, &BALANCE_KEY_ROWS[4..], 6),
            Behavior::Unavailable => {
                return Err(ProviderError::ProviderUnavailable("connection refused".to_string()));
            }
        };

        Ok(RawFiling {
            company_id: company_id.to_string(),
            filing_type,
            filing_date: NaiveDate::from_ymd_opt(2025, 10, 23).unwrap(),
            accession_id: "0001628280-25-045968".to_string(),
            tables: vec![
                balance_sheet,
                table(StatementKind::IncomeStatement, INCOME_KEY_ROWS, 20),
                table(StatementKind::CashFlow, CASH_FLOW_KEY_ROWS, 20),
            ],
            calculations: Vec::new(),
        })
    }

    async fn recent_filings(&self, _company_id: &str, _limit: usize) -> Result<Vec<FilingRef>, ProviderError> {
        Ok(vec![FilingRef {
            accession_id: "0001628280-25-045968".to_string(),
            form_type: "10-Q".to_string(),
            filing_date: "2025-10-23".to_string(),
            report_date: Some("2025-09-30".to_string()),
            primary_document: "tsla-20250930.htm".to_string(),
            description: None,
        }])
    }
}

/// Answers every task with a valid analysis, except the ones told to fail
struct StubCollaborator {
    failing: Vec<&'static str>,
    submitted: AtomicUsize,
}

impl StubCollaborator {
    fn new() -> Arc<Self> {
        Self::failing(&[])
    }

    fn failing(tasks: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            failing: tasks.to_vec(),
            submitted: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AnalysisCollaborator for StubCollaborator {
    async fn submit(&self, task_name: &str, ctx: &PromptContext) -> Result<Value, CollaboratorError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ctx.task_name, task_name);
        if self.failing.iter().any(|name| *name == task_name) {
            return Err(CollaboratorError::Upstream("model overloaded".to_string()));
        }
        Ok(json!({
            "executiveSummary": format!("{task_name} summary"),
            "detailedAnalysis": format!("{task_name} details"),
            "topFindings": ["first finding", "second finding"],
            "rating": "moderate",
        }))
    }
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::builder()
        .cache_dir(dir.path().join("cache"))
        .session_root(dir.path().join("sessions"))
        .build()
        .unwrap()
}

fn pipeline(dir: &TempDir, provider: Arc<StubProvider>, collaborator: Arc<StubCollaborator>) -> Pipeline {
    Pipeline::builder(config(dir))
        .provider(provider)
        .collaborator(collaborator)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_tesla_end_to_end() {
    let dir = TempDir::new().unwrap();
    let provider = StubProvider::new(Behavior::Complete);
    let pipeline = pipeline(&dir, Arc::clone(&provider), StubCollaborator::new());

    let report = pipeline.run("Analyze Tesla's Q3 2025 performance").await.unwrap();

    assert_eq!(report.company_id, "Tesla");
    assert_eq!(provider.calls(), 1);
    assert!(!report.filing.from_cache);
    assert_eq!(
        report.filing.line_items,
        vec![
            ("balance_sheet".to_string(), 49),
            ("income_statement".to_string(), 20),
            ("cash_flow".to_string(), 20),
        ]
    );

    assert!(report.validation.passed(CheckKind::BalanceIdentity));
    let identity = report.validation.balance_identity.as_ref().unwrap();
    assert_eq!(identity.reported_assets, 133_735e6);
    assert_eq!(identity.computed_total, 133_735e6);

    assert_eq!(report.ratios.len(), 17);
    assert!(report.ratios.iter().all(|ratio| ratio.is_applicable()));

    assert_eq!(report.sections.len(), 6);
    assert!(report.sections.iter().all(|section| section.status == TaskStatus::Ok));
    assert_eq!(report.synthesis.source, SynthesisSource::Collaborator);
    assert_eq!(report.synthesis.output.rating, "Moderate");
    assert!(report.review.as_ref().unwrap().passed);
    assert!(report.degraded.is_empty());
}

#[tokio::test]
async fn test_progress_and_artifacts() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, StubProvider::new(Behavior::Complete), StubCollaborator::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = pipeline.new_session("Analyze Tesla's Q3 2025 performance").with_progress(tx);
    let handle = session.handle();

    pipeline.execute(&mut session).await.unwrap();

    let mut percents = Vec::new();
    while let Ok(event) = rx.try_recv() {
        percents.push(event.percent);
    }
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(handle.percent(), 100);
    assert_eq!(handle.stage_status(Stage::Done), StageStatus::Done);

    let names: Vec<String> = handle.artifacts().into_iter().map(|a| a.name).collect();
    assert_eq!(&names[..2], ["query", "company"]);
    let plan_at = names.iter().position(|name| name == "plan").unwrap();
    let first_analysis = names.iter().position(|name| name.starts_with("analysis_")).unwrap();
    assert!(plan_at < first_analysis, "{names:?}");

    let query = handle.artifact("query").unwrap();
    assert_eq!(query["query"], "Analyze Tesla's Q3 2025 performance");
    assert_eq!(query["session_id"], session.session_id().to_string());

    let plan = handle.artifact("plan").unwrap();
    let plan = plan.as_array().unwrap();
    assert_eq!(plan.len(), 6);
    assert!(plan.iter().all(|task| task["timeout_ms"].as_u64().unwrap() > 0));
    let needs_snapshot = |name: &str| {
        plan.iter()
            .find(|task| task["name"] == name)
            .map(|task| task["needs_snapshot"].as_bool().unwrap())
    };
    assert_eq!(needs_snapshot("balance_sheet_analysis"), Some(true));
    assert_eq!(needs_snapshot("risk_factors"), Some(false));

    assert_eq!(handle.artifact("company").unwrap()["company_id"], "Tesla");
    assert_eq!(handle.artifact("ratios").unwrap().as_array().unwrap().len(), 17);
    assert!(handle.artifact("analysis_risk_factors").is_some());
    assert!(handle.artifact("synthesis").is_some());

    let session_dir = session.dir().unwrap();
    assert!(session_dir.starts_with(dir.path().join("sessions")));
    assert!(session_dir.join("01_query.json").exists());
    assert!(session_dir.join("02_company.json").exists());
    let markdown = std::fs::read_to_string(session_dir.join("report.md")).unwrap();
    assert!(markdown.contains("Tesla"));
}

#[tokio::test]
async fn test_second_run_uses_cache() {
    let dir = TempDir::new().unwrap();
    let provider = StubProvider::new(Behavior::Complete);
    let pipeline = pipeline(&dir, Arc::clone(&provider), StubCollaborator::new());

    let first = pipeline.run("Analyze Tesla's Q3 2025 performance").await.unwrap();
    let second = pipeline.run("How is Tesla doing?").await.unwrap();

    assert_eq!(provider.calls(), 1);
    assert!(!first.filing.from_cache);
    assert!(second.filing.from_cache);
    assert_eq!(first.ratios, second.ratios);
    assert_ne!(first.session_id, second.session_id);
}

#[tokio::test]
async fn test_incomplete_statement_degrades_but_completes() {
    let dir = TempDir::new().unwrap();
    let provider = StubProvider::new(Behavior::ShortBalanceSheet);
    let pipeline = pipeline(&dir, Arc::clone(&provider), StubCollaborator::new());

    let report = pipeline.run("Analyze Tesla's Q3 2025 performance").await.unwrap();

    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::IncompleteStatement)
    );
    assert!(report.validation.is_incomplete());
    assert!(report.validation.passed(CheckKind::BalanceIdentity));
    assert_eq!(report.ratios.len(), 17);
    assert!(!report.degraded.is_empty());

    // Incomplete snapshots are never cached.
    assert!(pipeline.cache().get("Tesla", "10-Q").await.unwrap().is_none());
    pipeline.run("Analyze Tesla's Q3 2025 performance").await.unwrap();
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_unresolvable_query_never_calls_provider() {
    let dir = TempDir::new().unwrap();
    let provider = StubProvider::new(Behavior::Complete);
    let pipeline = pipeline(&dir, Arc::clone(&provider), StubCollaborator::new());
    let mut session = pipeline.new_session("how are things?");
    let handle = session.handle();

    let err = pipeline.execute(&mut session).await.unwrap_err();

    assert!(matches!(err, FilingError::CompanyUnresolved { .. }));
    assert_eq!(provider.calls(), 0);
    assert_eq!(handle.stage_status(Stage::CompanyResolved), StageStatus::Failed);
    assert!(handle.failure().is_some());
}

#[tokio::test]
async fn test_provider_failure_fails_gathering() {
    let dir = TempDir::new().unwrap();
    let collaborator = StubCollaborator::new();
    let pipeline = pipeline(&dir, StubProvider::new(Behavior::Unavailable), Arc::clone(&collaborator));
    let mut session: PipelineSession = pipeline.new_session("Analyze Tesla's Q3 2025 performance");
    let handle = session.handle();

    let err = pipeline.execute(&mut session).await.unwrap_err();

    match err {
        FilingError::DataGatheringFailed { company_id, reason } => {
            assert_eq!(company_id, "Tesla");
            assert!(reason.contains("connection refused"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(handle.stage_status(Stage::DataGathered), StageStatus::Failed);
    assert_eq!(collaborator.submitted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_task_is_annotated() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(
        &dir,
        StubProvider::new(Behavior::Complete),
        StubCollaborator::failing(&["risk_factors"]),
    );

    let report = pipeline.run("Analyze Tesla's Q3 2025 performance").await.unwrap();

    let risk = report
        .sections
        .iter()
        .find(|section| section.task_name == "risk_factors")
        .unwrap();
    assert_eq!(risk.status, TaskStatus::Failed);
    assert!(risk.note.as_deref().unwrap().starts_with("Unavailable: task failed"));
    assert_eq!(report.sections.iter().filter(|section| section.is_ok()).count(), 5);
    assert!(report.review.as_ref().unwrap().passed);
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::TaskFailed && warning.message.starts_with("risk_factors"))
    );
}

#[tokio::test]
async fn test_failed_synthesis_falls_back() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(
        &dir,
        StubProvider::new(Behavior::Complete),
        StubCollaborator::failing(&["synthesis"]),
    );

    let report = pipeline.run("Analyze Tesla's Q3 2025 performance").await.unwrap();

    assert_eq!(report.synthesis.source, SynthesisSource::Fallback);
    assert!(!report.synthesis.output.executive_summary.is_empty());
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::SynthesisDegraded)
    );
}
