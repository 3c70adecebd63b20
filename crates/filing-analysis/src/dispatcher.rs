//! Concurrent analysis task dispatch
//!
//! All tasks of a dispatch run concurrently, each under its own timeout. A
//! task that times out, breaks its schema or hits an upstream error is
//! recorded as failed; its siblings keep running. Results come back in task
//! declaration order regardless of completion order.

use crate::collaborator::AnalysisCollaborator;
use crate::error::TaskErrorKind;
use crate::tasks::{AnalysisTask, TaskDependency, TaskInput};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Final state of a dispatched task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    Failed,
    Skipped,
}

/// Outcome of one analysis task; created once, never modified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTaskResult {
    task_name: String,
    status: TaskStatus,
    structured_output: Option<Map<String, Value>>,
    error: Option<TaskErrorKind>,
    elapsed_ms: u64,
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl AnalysisTaskResult {
    pub fn ok(task_name: impl Into<String>, output: Map<String, Value>, elapsed: Duration) -> Self {
        Self {
            task_name: task_name.into(),
            status: TaskStatus::Ok,
            structured_output: Some(output),
            error: None,
            elapsed_ms: millis(elapsed),
        }
    }

    pub fn failed(task_name: impl Into<String>, error: TaskErrorKind, elapsed: Duration) -> Self {
        Self {
            task_name: task_name.into(),
            status: TaskStatus::Failed,
            structured_output: None,
            error: Some(error),
            elapsed_ms: millis(elapsed),
        }
    }

    pub fn skipped(task_name: impl Into<String>, reason: TaskErrorKind) -> Self {
        Self {
            task_name: task_name.into(),
            status: TaskStatus::Skipped,
            structured_output: None,
            error: Some(reason),
            elapsed_ms: 0,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn structured_output(&self) -> Option<&Map<String, Value>> {
        self.structured_output.as_ref()
    }

    pub fn error(&self) -> Option<&TaskErrorKind> {
        self.error.as_ref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok
    }
}

/// One entry of the dispatch roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    pub name: String,
    pub title: String,
    pub needs_snapshot: bool,
    pub timeout_ms: u64,
}

/// Runs analysis tasks against a collaborator
pub struct Dispatcher {
    collaborator: Arc<dyn AnalysisCollaborator>,
    tasks: Vec<Arc<dyn AnalysisTask>>,
    task_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tasks", &self.task_names())
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(collaborator: Arc<dyn AnalysisCollaborator>, task_timeout: Duration) -> Self {
        Self {
            collaborator,
            tasks: Vec::new(),
            task_timeout,
        }
    }

    /// Append a task; tasks are reported in the order they are added
    pub fn with_task(mut self, task: Arc<dyn AnalysisTask>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = Arc<dyn AnalysisTask>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.name()).collect()
    }

    /// The tasks a dispatch will run, in declaration order
    pub fn plan(&self) -> Vec<PlannedTask> {
        self.tasks
            .iter()
            .map(|task| PlannedTask {
                name: task.name().to_string(),
                title: task.title().to_string(),
                needs_snapshot: task.dependency() == TaskDependency::NeedsSnapshot,
                timeout_ms: millis(self.task_timeout),
            })
            .collect()
    }

    /// Section title of a registered task
    pub fn task_title(&self, task_name: &str) -> Option<&str> {
        self.tasks
            .iter()
            .find(|task| task.name() == task_name)
            .map(|task| task.title())
    }

    /// Run every task concurrently; one result per task, in declaration order
    #[instrument(skip_all, fields(company = input.company_id, tasks = self.tasks.len()))]
    pub async fn dispatch(&self, input: &TaskInput<'_>) -> Vec<AnalysisTaskResult> {
        let started = Instant::now();
        let results = join_all(self.tasks.iter().map(|task| self.run_one(task.as_ref(), input))).await;

        info!(
            ok = results.iter().filter(|r| r.is_ok()).count(),
            total = results.len(),
            elapsed_ms = millis(started.elapsed()),
            "Analysis tasks finished"
        );
        results
    }

    /// Run one task: prepare, submit, validate, all under the task timeout
    pub async fn run_one(&self, task: &dyn AnalysisTask, input: &TaskInput<'_>) -> AnalysisTaskResult {
        let name = task.name();
        if task.dependency() == TaskDependency::NeedsSnapshot && input.snapshot.is_none() {
            warn!(task = name, "Skipping task, no filing snapshot");
            return AnalysisTaskResult::skipped(
                name,
                TaskErrorKind::MissingInput {
                    message: "no filing snapshot available".to_string(),
                },
            );
        }

        let started = Instant::now();
        let work = async {
            let ctx = task.prepare(input).await?;
            let raw = self.collaborator.submit(name, &ctx).await?;
            task.schema()
                .validate(&raw)
                .map_err(|violations| TaskErrorKind::TaskSchemaViolation {
                    violations: violations.iter().map(ToString::to_string).collect(),
                })
        };

        let result = match tokio::time::timeout(self.task_timeout, work).await {
            Ok(Ok(output)) => AnalysisTaskResult::ok(name, output, started.elapsed()),
            Ok(Err(error)) => AnalysisTaskResult::failed(name, error, started.elapsed()),
            Err(_) => AnalysisTaskResult::failed(
                name,
                TaskErrorKind::Timeout {
                    after_ms: millis(self.task_timeout),
                },
                started.elapsed(),
            ),
        };

        match result.error() {
            None => info!(task = name, elapsed_ms = result.elapsed_ms(), "Task completed"),
            Some(error) => warn!(task = name, %error, "Task failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::PromptContext;
    use crate::error::CollaboratorError;
    use crate::schema::OutputSchema;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedTask {
        name: &'static str,
        dependency: TaskDependency,
    }

    #[async_trait]
    impl AnalysisTask for NamedTask {
        fn name(&self) -> &str {
            self.name
        }

        fn title(&self) -> &str {
            self.name
        }

        fn dependency(&self) -> TaskDependency {
            self.dependency
        }

        async fn prepare(&self, input: &TaskInput<'_>) -> Result<PromptContext, TaskErrorKind> {
            Ok(PromptContext {
                task_name: self.name.to_string(),
                instructions: format!("Analyze {}", input.company_id),
                data: json!({}),
                output_schema: OutputSchema::analysis().describe(),
            })
        }
    }

    fn task(name: &'static str) -> Arc<dyn AnalysisTask> {
        Arc::new(NamedTask {
            name,
            dependency: TaskDependency::CompanyOnly,
        })
    }

    enum Reply {
        Good(u64),
        MissingRating,
        Upstream,
    }

    struct ScriptedCollaborator {
        replies: HashMap<&'static str, Reply>,
        calls: AtomicUsize,
    }

    impl ScriptedCollaborator {
        fn new(replies: Vec<(&'static str, Reply)>) -> Arc<Self> {
            Arc::new(Self {
                replies: replies.into_iter().collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    fn good_output() -> Value {
        json!({
            "executiveSummary": "Fine.",
            "detailedAnalysis": "Details.",
            "topFindings": ["One"],
            "rating": "Moderate",
        })
    }

    #[async_trait]
    impl AnalysisCollaborator for ScriptedCollaborator {
        async fn submit(&self, task_name: &str, _ctx: &PromptContext) -> Result<Value, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(task_name) {
                Some(Reply::Good(delay_ms)) => {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                    Ok(good_output())
                }
                Some(Reply::MissingRating) => {
                    let mut output = good_output();
                    output.as_object_mut().unwrap().remove("rating");
                    Ok(output)
                }
                Some(Reply::Upstream) | None => Err(CollaboratorError::Upstream("model overloaded".to_string())),
            }
        }
    }

    #[test]
    fn test_plan_lists_tasks_in_order() {
        let dispatcher = Dispatcher::new(ScriptedCollaborator::new(Vec::new()), Duration::from_secs(30)).with_tasks([
            Arc::new(NamedTask {
                name: "balance_sheet_analysis",
                dependency: TaskDependency::NeedsSnapshot,
            }) as Arc<dyn AnalysisTask>,
            task("risk_factors"),
        ]);

        let plan = dispatcher.plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "balance_sheet_analysis");
        assert!(plan[0].needs_snapshot);
        assert_eq!(plan[1].name, "risk_factors");
        assert!(!plan[1].needs_snapshot);
        assert!(plan.iter().all(|task| task.timeout_ms == 30_000));
    }

    #[tokio::test]
    async fn test_wall_clock_tracks_slowest_task() {
        let collaborator = ScriptedCollaborator::new(vec![
            ("a", Reply::Good(200)),
            ("b", Reply::Good(200)),
            ("c", Reply::Good(300)),
        ]);
        let dispatcher = Dispatcher::new(collaborator, Duration::from_secs(5)).with_tasks([task("a"), task("b"), task("c")]);

        let started = Instant::now();
        let results = dispatcher.dispatch(&TaskInput::for_company("Tesla", "q")).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(AnalysisTaskResult::is_ok));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(650), "tasks ran sequentially: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_ordered() {
        let collaborator = ScriptedCollaborator::new(vec![
            ("slow", Reply::Good(5_000)),
            ("bad_schema", Reply::MissingRating),
            ("upstream", Reply::Upstream),
            ("good", Reply::Good(10)),
        ]);
        let dispatcher = Dispatcher::new(collaborator.clone(), Duration::from_millis(200)).with_tasks([
            task("slow"),
            task("bad_schema"),
            task("upstream"),
            task("good"),
        ]);

        let results = dispatcher.dispatch(&TaskInput::for_company("Tesla", "q")).await;
        let names: Vec<_> = results.iter().map(AnalysisTaskResult::task_name).collect();
        assert_eq!(names, vec!["slow", "bad_schema", "upstream", "good"]);

        assert_eq!(results[0].error(), Some(&TaskErrorKind::Timeout { after_ms: 200 }));
        assert_eq!(
            results[1].error(),
            Some(&TaskErrorKind::TaskSchemaViolation {
                violations: vec!["rating: missing".to_string()]
            })
        );
        assert!(matches!(results[2].error(), Some(TaskErrorKind::Upstream { .. })));
        assert_eq!(results[3].status(), TaskStatus::Ok);
        assert_eq!(results[3].structured_output().unwrap()["rating"], "Moderate");
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_snapshot_tasks_skipped_without_snapshot() {
        let collaborator = ScriptedCollaborator::new(vec![("profile", Reply::Good(1))]);
        let dispatcher = Dispatcher::new(collaborator.clone(), Duration::from_secs(1))
            .with_task(Arc::new(NamedTask {
                name: "balance",
                dependency: TaskDependency::NeedsSnapshot,
            }))
            .with_task(task("profile"));

        let results = dispatcher.dispatch(&TaskInput::for_company("Tesla", "q")).await;
        assert_eq!(results[0].status(), TaskStatus::Skipped);
        assert_eq!(results[0].elapsed_ms(), 0);
        assert_eq!(results[1].status(), TaskStatus::Ok);
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.task_title("profile"), Some("profile"));
    }

    #[test]
    fn test_result_serialization() {
        let result = AnalysisTaskResult::failed("risk_factors", TaskErrorKind::Timeout { after_ms: 100 }, Duration::from_millis(101));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "timeout");
        assert_eq!(json["elapsed_ms"], 101);

        let back: AnalysisTaskResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
