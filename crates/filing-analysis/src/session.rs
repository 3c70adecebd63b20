//! Pipeline session state
//!
//! A [`PipelineSession`] belongs to the orchestrator, which is its only
//! writer: every mutation goes through a `&mut self` transition method.
//! Observers hold a [`SessionHandle`] and read progress and the artifacts
//! completed so far while the run continues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    CompanyResolved,
    DataGathered,
    Validated,
    RatiosComputed,
    AnalysesDispatched,
    Synthesized,
    Verified,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Init,
        Stage::CompanyResolved,
        Stage::DataGathered,
        Stage::Validated,
        Stage::RatiosComputed,
        Stage::AnalysesDispatched,
        Stage::Synthesized,
        Stage::Verified,
        Stage::Done,
    ];

    /// Progress reached once the stage completes
    pub fn percent(self) -> u8 {
        match self {
            Stage::Init => 0,
            Stage::CompanyResolved => 10,
            Stage::DataGathered => 30,
            Stage::Validated => 45,
            Stage::RatiosComputed => 55,
            Stage::AnalysesDispatched => 80,
            Stage::Synthesized => 90,
            Stage::Verified => 95,
            Stage::Done => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::CompanyResolved => "company resolved",
            Stage::DataGathered => "data gathered",
            Stage::Validated => "validated",
            Stage::RatiosComputed => "ratios computed",
            Stage::AnalysesDispatched => "analyses dispatched",
            Stage::Synthesized => "synthesized",
            Stage::Verified => "verified",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// Emitted on every stage transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// 0-100, never decreasing within a session
    pub percent: u8,
    pub message: String,
    pub stage: Stage,
    pub status: StageStatus,
}

/// Category of a non-fatal problem recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    IncompleteStatement,
    Validation,
    ContextUnavailable,
    CacheUnavailable,
    TaskFailed,
    SynthesisDegraded,
    ReviewFinding,
    ArtifactWriteFailed,
}

/// A non-fatal problem, kept for the final report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWarning {
    pub stage: Stage,
    pub kind: WarningKind,
    pub message: String,
}

/// Output of a completed stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub stage: Stage,
    pub content: Value,
    /// Where the artifact was written, if the session has a directory
    pub path: Option<PathBuf>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SharedState {
    stage_status: BTreeMap<Stage, StageStatus>,
    percent: u8,
    artifacts: Vec<Artifact>,
    warnings: Vec<SessionWarning>,
    failure: Option<String>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            stage_status: Stage::ALL.iter().map(|stage| (*stage, StageStatus::Pending)).collect(),
            percent: 0,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }
}

fn read(state: &RwLock<SharedState>) -> RwLockReadGuard<'_, SharedState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(state: &RwLock<SharedState>) -> RwLockWriteGuard<'_, SharedState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

/// State of one pipeline run
#[derive(Debug)]
pub struct PipelineSession {
    session_id: Uuid,
    query: String,
    dir: Option<PathBuf>,
    progress: Option<UnboundedSender<ProgressEvent>>,
    state: Arc<RwLock<SharedState>>,
    current: Stage,
}

impl PipelineSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            query: query.into(),
            dir: None,
            progress: None,
            state: Arc::new(RwLock::new(SharedState::new())),
            current: Stage::Init,
        }
    }

    /// Write artifacts under `root/<session id>/`
    pub fn with_artifact_root(mut self, root: &Path) -> Self {
        self.dir = Some(root.join(self.session_id.to_string()));
        self
    }

    /// Send progress events to `sender`
    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Session artifact directory, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Last stage that completed
    pub fn current_stage(&self) -> Stage {
        self.current
    }

    pub fn warnings(&self) -> Vec<SessionWarning> {
        read(&self.state).warnings.clone()
    }

    /// Read-only view for observers
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.session_id,
            state: Arc::clone(&self.state),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = sender.send(event);
        }
    }

    /// Mark a stage as running
    pub fn begin(&mut self, stage: Stage) {
        write(&self.state).stage_status.insert(stage, StageStatus::Running);
        debug!(session = %self.session_id, %stage, "Stage started");
    }

    /// Mark a stage as done and emit a progress event
    pub fn advance(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        let percent = {
            let mut state = write(&self.state);
            state.stage_status.insert(stage, StageStatus::Done);
            state.percent = state.percent.max(stage.percent());
            state.percent
        };
        self.current = stage;
        info!(session = %self.session_id, %stage, percent, "{message}");
        self.emit(ProgressEvent {
            percent,
            message,
            stage,
            status: StageStatus::Done,
        });
    }

    /// Mark a stage as failed; the session ends here
    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        let percent = {
            let mut state = write(&self.state);
            state.stage_status.insert(stage, StageStatus::Failed);
            state.failure = Some(message.clone());
            state.percent
        };
        warn!(session = %self.session_id, %stage, "Session failed: {message}");
        self.emit(ProgressEvent {
            percent,
            message,
            stage,
            status: StageStatus::Failed,
        });
    }

    /// Record a non-fatal problem
    pub fn warn(&mut self, stage: Stage, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        warn!(session = %self.session_id, %stage, ?kind, "{message}");
        write(&self.state).warnings.push(SessionWarning { stage, kind, message });
    }

    /// Expose a stage's output and write it to the session directory.
    ///
    /// Write failures are recorded as warnings; the artifact stays readable
    /// through the handle.
    pub async fn record_artifact<T: Serialize + ?Sized>(&mut self, name: &str, stage: Stage, content: &T) {
        let content = match serde_json::to_value(content) {
            Ok(value) => value,
            Err(e) => {
                self.warn(stage, WarningKind::ArtifactWriteFailed, format!("{name}: {e}"));
                return;
            }
        };
        let bytes = serde_json::to_vec_pretty(&content);
        let file_name = self.next_file_name(name, "json");
        let path = match bytes {
            Ok(bytes) => self.write_file(stage, &file_name, &bytes).await,
            Err(e) => {
                self.warn(stage, WarningKind::ArtifactWriteFailed, format!("{name}: {e}"));
                None
            }
        };
        self.push_artifact(name, stage, content, path);
    }

    /// Expose a text artifact (e.g. rendered markdown) under a fixed file name
    pub async fn record_text_artifact(&mut self, name: &str, stage: Stage, file_name: &str, text: &str) {
        let path = self.write_file(stage, file_name, text.as_bytes()).await;
        self.push_artifact(name, stage, Value::String(text.to_string()), path);
    }

    fn next_file_name(&self, name: &str, extension: &str) -> String {
        let seq = read(&self.state).artifacts.len() + 1;
        format!("{seq:02}_{name}.{extension}")
    }

    fn push_artifact(&mut self, name: &str, stage: Stage, content: Value, path: Option<PathBuf>) {
        write(&self.state).artifacts.push(Artifact {
            name: name.to_string(),
            stage,
            content,
            path,
            recorded_at: Utc::now(),
        });
    }

    async fn write_file(&mut self, stage: Stage, file_name: &str, bytes: &[u8]) -> Option<PathBuf> {
        let dir = self.dir.clone()?;
        let path = dir.join(file_name);
        let temp = dir.join(format!(".{file_name}.tmp"));

        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&temp, bytes).await?;
            tokio::fs::rename(&temp, &path).await
        }
        .await;

        match result {
            Ok(()) => Some(path),
            Err(e) => {
                self.warn(
                    stage,
                    WarningKind::ArtifactWriteFailed,
                    format!("could not write {}: {e}", path.display()),
                );
                None
            }
        }
    }
}

/// Read-only, cloneable view of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    state: Arc<RwLock<SharedState>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Artifacts completed so far, in completion order
    pub fn artifacts(&self) -> Vec<Artifact> {
        read(&self.state).artifacts.clone()
    }

    /// Latest artifact with the given name
    pub fn artifact(&self, name: &str) -> Option<Value> {
        read(&self.state)
            .artifacts
            .iter()
            .rev()
            .find(|artifact| artifact.name == name)
            .map(|artifact| artifact.content.clone())
    }

    pub fn percent(&self) -> u8 {
        read(&self.state).percent
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        read(&self.state)
            .stage_status
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn warnings(&self) -> Vec<SessionWarning> {
        read(&self.state).warnings.clone()
    }

    /// Failure message, if the session failed
    pub fn failure(&self) -> Option<String> {
        read(&self.state).failure.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_stage_percent_is_increasing() {
        let percents: Vec<u8> = Stage::ALL.iter().map(|s| s.percent()).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_transitions_emit_monotonic_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = PipelineSession::new("Analyze Tesla").with_progress(tx);
        let handle = session.handle();

        session.advance(Stage::Init, "started");
        session.begin(Stage::CompanyResolved);
        assert_eq!(handle.stage_status(Stage::CompanyResolved), StageStatus::Running);
        session.advance(Stage::CompanyResolved, "Tesla");
        session.advance(Stage::DataGathered, "gathered");
        // Going back never lowers the percentage.
        session.advance(Stage::CompanyResolved, "again");
        drop(session);

        let mut percents = Vec::new();
        while let Some(event) = rx.recv().await {
            percents.push(event.percent);
        }
        assert_eq!(percents, vec![0, 10, 30, 30]);
        assert_eq!(handle.percent(), 30);
    }

    #[tokio::test]
    async fn test_fail_keeps_percent_and_records_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = PipelineSession::new("q").with_progress(tx);
        session.advance(Stage::CompanyResolved, "ok");
        session.fail(Stage::DataGathered, "data gathering failed");

        let handle = session.handle();
        assert_eq!(handle.stage_status(Stage::DataGathered), StageStatus::Failed);
        assert_eq!(handle.failure().as_deref(), Some("data gathering failed"));

        rx.recv().await.unwrap();
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.percent, 10);
        assert_eq!(failed.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_artifacts_visible_and_written() {
        let root = tempfile::tempdir().unwrap();
        let mut session = PipelineSession::new("q").with_artifact_root(root.path());
        let handle = session.handle();

        session
            .record_artifact("statements", Stage::DataGathered, &json!({"items": 49}))
            .await;
        assert_eq!(handle.artifact("statements").unwrap()["items"], 49);

        session
            .record_text_artifact("report_markdown", Stage::Done, "report.md", "# Tesla")
            .await;

        let dir = session.dir().unwrap().to_path_buf();
        assert!(dir.join("01_statements.json").exists());
        assert_eq!(std::fs::read_to_string(dir.join("report.md")).unwrap(), "# Tesla");

        let names: Vec<_> = handle.artifacts().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["statements", "report_markdown"]);
        assert!(handle.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_artifacts_without_directory() {
        let mut session = PipelineSession::new("q");
        session.record_artifact("ratios", Stage::RatiosComputed, &vec![1, 2, 3]).await;

        let artifacts = session.handle().artifacts();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].path.is_none());
    }

    #[test]
    fn test_warnings_are_recorded() {
        let mut session = PipelineSession::new("q");
        session.warn(Stage::DataGathered, WarningKind::ContextUnavailable, "search timed out");
        let warnings = session.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::ContextUnavailable);
    }
}
