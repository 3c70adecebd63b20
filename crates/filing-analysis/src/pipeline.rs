//! Pipeline orchestrator
//!
//! Drives a [`PipelineSession`] through
//! `Init → CompanyResolved → DataGathered → Validated → RatiosComputed →
//! AnalysesDispatched → Synthesized → Verified → Done`.
//!
//! Only two conditions end a run early: no company can be resolved from the
//! query, or no filing data can be obtained. Everything else degrades the
//! report and is recorded in the session.

use crate::branch::{BranchOutcome, join_branches};
use crate::cache::FilingCache;
use crate::collaborator::AnalysisCollaborator;
use crate::config::PipelineConfig;
use crate::context::{ContextSnippet, ContextSource, NullContextSource};
use crate::dispatcher::{AnalysisTaskResult, Dispatcher, TaskStatus};
use crate::error::{FilingError, ProviderError, Result};
use crate::model::{CompanyFilingSnapshot, StatementKind, Statements};
use crate::normalizer::Normalizer;
use crate::provider::{FilingProvider, RawFiling};
use crate::ratios::{RATIO_COUNT, RatioEngine};
use crate::report::{FilingSummary, FinalReport, ReportSection, Synthesis, SynthesisSource, fallback_synthesis};
use crate::resolver::CompanyResolver;
use crate::schema::AnalysisOutput;
use crate::session::{PipelineSession, Stage, WarningKind};
use crate::tasks::{AnalysisTask, SynthesisTask, TaskInput, default_tasks};
use crate::validation::ValidationEngine;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

/// Filing data obtained by the gather stage
#[derive(Debug)]
struct Gathered {
    snapshot: CompanyFilingSnapshot,
    /// Raw provider data; absent on a cache hit
    raw: Option<RawFiling>,
    from_cache: bool,
    incomplete: Vec<String>,
    cache_notes: Vec<String>,
}

/// The filing analysis pipeline
pub struct Pipeline {
    config: PipelineConfig,
    provider: Arc<dyn FilingProvider>,
    context_source: Arc<dyn ContextSource>,
    cache: FilingCache,
    resolver: CompanyResolver,
    normalizer: Normalizer,
    validator: ValidationEngine,
    ratio_engine: RatioEngine,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    provider: Option<Arc<dyn FilingProvider>>,
    context_source: Option<Arc<dyn ContextSource>>,
    collaborator: Option<Arc<dyn AnalysisCollaborator>>,
    cache: Option<FilingCache>,
    resolver: Option<CompanyResolver>,
    tasks: Option<Vec<Arc<dyn AnalysisTask>>>,
}

impl PipelineBuilder {
    pub fn provider(mut self, provider: Arc<dyn FilingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn context_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context_source = Some(source);
        self
    }

    pub fn collaborator(mut self, collaborator: Arc<dyn AnalysisCollaborator>) -> Self {
        self.collaborator = Some(collaborator);
        self
    }

    /// Use a specific cache instead of one built from the config
    pub fn cache(mut self, cache: FilingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn resolver(mut self, resolver: CompanyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the default task roster
    pub fn tasks(mut self, tasks: Vec<Arc<dyn AnalysisTask>>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let provider = self
            .provider
            .ok_or_else(|| FilingError::Config("a filing provider is required".to_string()))?;
        let collaborator = self
            .collaborator
            .ok_or_else(|| FilingError::Config("an analysis collaborator is required".to_string()))?;
        let context_source = self
            .context_source
            .unwrap_or_else(|| Arc::new(NullContextSource));

        let tasks = self.tasks.unwrap_or_else(|| {
            default_tasks(
                Arc::clone(&provider),
                Arc::clone(&context_source),
                self.config.sub_fetch_timeout,
            )
        });
        let cache = self
            .cache
            .unwrap_or_else(|| FilingCache::new(&self.config.cache_dir, self.config.cache_ttl));

        Ok(Pipeline {
            normalizer: Normalizer::new(self.config.min_line_items),
            validator: ValidationEngine::new(self.config.validation()),
            ratio_engine: RatioEngine::new(),
            dispatcher: Dispatcher::new(collaborator, self.config.task_timeout).with_tasks(tasks),
            resolver: self.resolver.unwrap_or_else(CompanyResolver::with_defaults),
            config: self.config,
            provider,
            context_source,
            cache,
        })
    }
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            provider: None,
            context_source: None,
            collaborator: None,
            cache: None,
            resolver: None,
            tasks: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &FilingCache {
        &self.cache
    }

    /// A session whose artifacts go under the configured session root
    pub fn new_session(&self, query: impl Into<String>) -> PipelineSession {
        PipelineSession::new(query).with_artifact_root(&self.config.session_root)
    }

    /// Run a query in a fresh session
    pub async fn run(&self, query: &str) -> Result<FinalReport> {
        let mut session = self.new_session(query);
        self.execute(&mut session).await
    }

    /// Run the session's query to completion
    #[instrument(skip_all, fields(session = %session.session_id(), query = session.query()))]
    pub async fn execute(&self, session: &mut PipelineSession) -> Result<FinalReport> {
        let query = session.query().to_string();
        session
            .record_artifact(
                "query",
                Stage::Init,
                &json!({
                    "session_id": session.session_id().to_string(),
                    "query": query,
                    "filing_type": self.config.filing_type.as_str(),
                }),
            )
            .await;
        session.advance(Stage::Init, format!("Analyzing '{query}'"));

        // Resolve the company before any concurrent work starts.
        session.begin(Stage::CompanyResolved);
        let Some(resolved) = self.resolver.resolve(&query) else {
            session.fail(Stage::CompanyResolved, format!("could not resolve a company from '{query}'"));
            return Err(FilingError::CompanyUnresolved { query });
        };
        let company_id = resolved.company_id.clone();
        session.record_artifact("company", Stage::CompanyResolved, &resolved).await;
        session.advance(Stage::CompanyResolved, format!("Resolved company {company_id}"));

        // Filing data and context are gathered concurrently.
        session.begin(Stage::DataGathered);
        let (filing, context) = join_branches(
            self.gather_filing(&company_id),
            self.context_source.search(&company_id),
            self.config.gather_timeout,
        )
        .await;

        let gathered = match filing {
            BranchOutcome::Completed(gathered) => gathered,
            BranchOutcome::Failed(err) => {
                return Err(self.gather_failed(session, &company_id, err.to_string()));
            }
            BranchOutcome::TimedOut => {
                let reason = format!("timed out after {} s", self.config.gather_timeout.as_secs());
                return Err(self.gather_failed(session, &company_id, reason));
            }
        };
        let context: Vec<ContextSnippet> = match context {
            BranchOutcome::Completed(snippets) => snippets,
            BranchOutcome::Failed(err) => {
                session.warn(Stage::DataGathered, WarningKind::ContextUnavailable, err.to_string());
                Vec::new()
            }
            BranchOutcome::TimedOut => {
                session.warn(
                    Stage::DataGathered,
                    WarningKind::ContextUnavailable,
                    "context search timed out",
                );
                Vec::new()
            }
        };

        for note in &gathered.incomplete {
            session.warn(Stage::DataGathered, WarningKind::IncompleteStatement, note.clone());
        }
        for note in &gathered.cache_notes {
            session.warn(Stage::DataGathered, WarningKind::CacheUnavailable, note.clone());
        }
        if let Some(raw) = &gathered.raw {
            session.record_artifact("raw_filing", Stage::DataGathered, raw).await;
        }
        session.record_artifact("statements", Stage::DataGathered, &gathered.snapshot).await;
        session.record_artifact("context", Stage::DataGathered, &context).await;

        let from_cache = gathered.from_cache;
        let snapshot = Arc::new(gathered.snapshot);
        session.advance(
            Stage::DataGathered,
            format!(
                "Gathered {} line items from {} {} filed {}{}",
                snapshot.total_line_items(),
                company_id,
                snapshot.filing_type,
                snapshot.filing_date,
                if from_cache { " (cached)" } else { "" }
            ),
        );

        session.begin(Stage::Validated);
        let validation = self.validator.verify(&snapshot);
        for warning in &validation.warnings {
            session.warn(Stage::Validated, WarningKind::Validation, warning.to_string());
        }
        session.record_artifact("validation", Stage::Validated, &validation).await;
        session.advance(Stage::Validated, format!("Validation: {}", validation.status));

        session.begin(Stage::RatiosComputed);
        let ratios = self.ratio_engine.compute(&snapshot);
        session.record_artifact("ratios", Stage::RatiosComputed, &ratios).await;
        let applicable = ratios.iter().filter(|r| r.is_applicable()).count();
        session.advance(
            Stage::RatiosComputed,
            format!("{applicable} of {RATIO_COUNT} ratios computed"),
        );

        session.begin(Stage::AnalysesDispatched);
        session
            .record_artifact("plan", Stage::AnalysesDispatched, &self.dispatcher.plan())
            .await;
        let input = TaskInput {
            company_id: &company_id,
            query: &query,
            snapshot: Some(snapshot.as_ref()),
            ratios: &ratios,
            validation: Some(&validation),
            context: &context,
            sections: &[],
        };
        let results = self.dispatcher.dispatch(&input).await;
        for result in &results {
            if let Some(error) = result.error() {
                session.warn(
                    Stage::AnalysesDispatched,
                    WarningKind::TaskFailed,
                    format!("{}: {error}", result.task_name()),
                );
            }
            let name = format!("analysis_{}", result.task_name());
            session.record_artifact(&name, Stage::AnalysesDispatched, result).await;
        }
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        session.advance(
            Stage::AnalysesDispatched,
            format!("{succeeded} of {} analyses completed", results.len()),
        );

        session.begin(Stage::Synthesized);
        let sections: Vec<ReportSection> = results
            .iter()
            .map(|result| {
                let title = self.dispatcher.task_title(result.task_name()).unwrap_or(result.task_name());
                ReportSection::from_result(result, title)
            })
            .collect();
        let synthesis = self
            .synthesize(session, &TaskInput { sections: &results, ..input }, &sections, &validation)
            .await;
        session.record_artifact("synthesis", Stage::Synthesized, &synthesis).await;
        session.advance(Stage::Synthesized, "Synthesis complete");

        session.begin(Stage::Verified);
        let mut report = FinalReport {
            session_id: session.session_id(),
            query: query.clone(),
            company_id: company_id.clone(),
            filing: FilingSummary::from_snapshot(&snapshot, from_cache),
            validation,
            ratios,
            sections,
            synthesis,
            degraded: Vec::new(),
            warnings: Vec::new(),
            review: None,
            generated_at: Utc::now(),
        };
        let review = report.review(
            &self.ratio_engine.compute(&snapshot),
            &self.validator.verify(&snapshot),
        );
        for failure in review.failures() {
            session.warn(
                Stage::Verified,
                WarningKind::ReviewFinding,
                format!("{}: {}", failure.name, failure.detail),
            );
        }
        session.record_artifact("review", Stage::Verified, &review).await;
        let review_passed = review.passed;
        report.review = Some(review);
        report.warnings = session.warnings();
        report.degraded = degraded_notes(&report);
        session.advance(
            Stage::Verified,
            if review_passed { "Report verified" } else { "Report verified with findings" },
        );

        session.record_artifact("report", Stage::Done, &report).await;
        session
            .record_text_artifact("report_markdown", Stage::Done, "report.md", &report.to_markdown())
            .await;
        session.advance(Stage::Done, format!("Report ready for {company_id}"));

        info!(company = %company_id, sections_ok = succeeded, "Pipeline finished");
        Ok(report)
    }

    fn gather_failed(&self, session: &mut PipelineSession, company_id: &str, reason: String) -> FilingError {
        session.fail(Stage::DataGathered, format!("data gathering failed: {reason}"));
        FilingError::DataGatheringFailed {
            company_id: company_id.to_string(),
            reason,
        }
    }

    /// Cache-then-fetch, then normalize. Only complete snapshots are cached.
    #[instrument(skip(self))]
    async fn gather_filing(&self, company_id: &str) -> std::result::Result<Gathered, ProviderError> {
        let data_kind = self.config.filing_type.as_str();
        let mut cache_notes = Vec::new();

        match self.cache.get(company_id, data_kind).await {
            Ok(Some(snapshot)) => {
                return Ok(Gathered {
                    snapshot,
                    raw: None,
                    from_cache: true,
                    incomplete: Vec::new(),
                    cache_notes,
                });
            }
            Ok(None) => {}
            Err(e) => cache_notes.push(format!("cache read failed: {e}")),
        }

        let raw = self
            .provider
            .fetch_statements(company_id, self.config.filing_type)
            .await?;

        let mut statements = Statements::default();
        let mut incomplete = Vec::new();
        for kind in StatementKind::ALL {
            let Some(table) = raw.table(kind) else {
                continue;
            };
            match self.normalizer.normalize(table) {
                Ok(statement) => statements.set(statement),
                Err(err) => {
                    incomplete.push(err.to_string());
                    if let Some(partial) = err.into_partial() {
                        statements.set(partial);
                    }
                }
            }
        }

        if statements.iter().next().is_none() {
            return Err(ProviderError::NotFound {
                company_id: company_id.to_string(),
                filing_type: self.config.filing_type.to_string(),
            });
        }

        let snapshot = CompanyFilingSnapshot {
            company_id: company_id.to_string(),
            filing_type: raw.filing_type,
            filing_date: raw.filing_date,
            accession_id: raw.accession_id.clone(),
            statements,
            calculations: raw.calculations.clone(),
        };

        let complete = incomplete.is_empty() && snapshot.statements.iter().count() == StatementKind::ALL.len();
        if complete {
            if let Err(e) = self.cache.put(company_id, data_kind, &snapshot).await {
                cache_notes.push(format!("cache write failed: {e}"));
            }
        }

        Ok(Gathered {
            snapshot,
            raw: Some(raw),
            from_cache: false,
            incomplete,
            cache_notes,
        })
    }

    async fn synthesize(
        &self,
        session: &mut PipelineSession,
        input: &TaskInput<'_>,
        sections: &[ReportSection],
        validation: &crate::validation::VerificationReport,
    ) -> Synthesis {
        let result: AnalysisTaskResult = self.dispatcher.run_one(&SynthesisTask, input).await;
        let output = match result.status() {
            TaskStatus::Ok => result.structured_output().and_then(AnalysisOutput::from_checked),
            TaskStatus::Failed | TaskStatus::Skipped => None,
        };

        if let Some(output) = output {
            return Synthesis {
                source: SynthesisSource::Collaborator,
                output,
            };
        }

        let reason = result
            .error()
            .map_or_else(|| "unreadable output".to_string(), ToString::to_string);
        session.warn(
            Stage::Synthesized,
            WarningKind::SynthesisDegraded,
            format!("synthesis built from completed sections: {reason}"),
        );
        Synthesis {
            source: SynthesisSource::Fallback,
            output: fallback_synthesis(input.company_id, sections, input.ratios, validation),
        }
    }
}

/// Notes on missing or degraded parts of a report
fn degraded_notes(report: &FinalReport) -> Vec<String> {
    let mut notes: Vec<String> = report
        .sections
        .iter()
        .filter_map(|section| section.note.as_ref().map(|note| format!("{}: {note}", section.title)))
        .collect();

    notes.extend(
        report
            .warnings
            .iter()
            .filter(|warning| {
                matches!(
                    warning.kind,
                    WarningKind::IncompleteStatement
                        | WarningKind::ContextUnavailable
                        | WarningKind::CacheUnavailable
                        | WarningKind::SynthesisDegraded
                        | WarningKind::ReviewFinding
                )
            })
            .map(|warning| warning.message.clone()),
    );
    notes
}
