use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::console::Console;
use crate::error::{Error, Result};
use crate::runner::CommandRunner;
use crate::store::RunStore;
use crate::template::Variables;
use crate::types::{AtomKind, RunStatus};
use crate::workflow::Workflow;

use super::plan::{self, PlannedAtom, RunRequest};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    RunningPreChecks,
    RunningActions,
    RunningSteps,
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// The atom that stopped a run and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: AtomKind,
    /// 1-based position within its phase.
    pub index: usize,
    pub reason: String,
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        Error::Execution {
            phase: f.kind.to_string(),
            index: f.index,
            reason: f.reason,
        }
    }
}

/// Terminal outcome of a run. Actions count as steps when they were requested.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub workflow_id: String,
    pub status: RunStatus,
    pub pre_checks_passed: usize,
    pub pre_checks_failed: usize,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub elapsed: Duration,
    pub failure: Option<Failure>,
}

impl RunSummary {
    /// `Err(Error::Execution)` for a failed run, the summary otherwise.
    pub fn into_result(self) -> Result<RunSummary> {
        match self.failure.clone() {
            Some(f) => Err(f.into()),
            None => Ok(self),
        }
    }

    /// One-line record stored with the run.
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "pre-checks: {} passed, {} failed; steps: {}/{} completed; elapsed: {:?}",
            self.pre_checks_passed,
            self.pre_checks_failed,
            self.steps_completed,
            self.steps_total,
            self.elapsed
        );
        if let Some(f) = &self.failure {
            line.push_str(&format!("; {} {} failed: {}", f.kind, f.index, f.reason));
        }
        line
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

type PrivilegeProbe = Box<dyn Fn() -> bool + Send + Sync>;

/// Runs one workflow with an already resolved variable set.
pub struct Orchestrator {
    workflow: Workflow,
    variables: Variables,
    runner: Arc<dyn CommandRunner>,
    console: Arc<Console>,
    history: Option<RunStore>,
    is_elevated: PrivilegeProbe,
}

impl Orchestrator {
    pub fn new(workflow: Workflow, variables: Variables, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            workflow,
            variables,
            runner,
            console: Arc::new(Console::stdout()),
            history: None,
            is_elevated: Box::new(|| nix::unistd::geteuid().is_root()),
        }
    }

    pub fn with_console(mut self, console: Arc<Console>) -> Self {
        self.console = console;
        self
    }

    /// Append a run record for every execution.
    pub fn with_history(mut self, runs: RunStore) -> Self {
        self.history = Some(runs);
        self
    }

    /// Replace the effective-uid check used for `uses_sudo` workflows.
    pub fn with_privilege_probe(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.is_elevated = Box::new(probe);
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Pre-checks alone.
    pub async fn run_pre_checks(&self) -> Result<RunSummary> {
        self.execute(&RunRequest::PreChecksOnly).await?.into_result()
    }

    /// Pre-checks, then every step in declared order.
    pub async fn run_steps(&self) -> Result<RunSummary> {
        self.execute(&RunRequest::Steps).await?.into_result()
    }

    /// Pre-checks, then the named actions in the order given.
    pub async fn run_actions(&self, names: &[String]) -> Result<RunSummary> {
        self.execute(&RunRequest::actions(names.iter().cloned()))
            .await?
            .into_result()
    }

    /// Drive the full state machine.
    ///
    /// Returns `Err` only when the run could not start (privileges, unknown
    /// actions, missing variables); no command has run in that case. A run
    /// that starts always yields a summary, with `failure` set if an atom failed.
    pub async fn execute(&self, request: &RunRequest) -> Result<RunSummary> {
        let started = Instant::now();
        let wf = &self.workflow;
        let mut phase = Phase::Idle;

        if wf.metadata.uses_sudo && !(self.is_elevated)() {
            let err = Error::Privilege(wf.id.clone());
            self.console.error(&err.to_string());
            return Err(err);
        }

        let plan = match plan::build(wf, request, &self.variables) {
            Ok(plan) => plan,
            Err(e) => {
                self.console.error(&e.to_string());
                return Err(e);
            }
        };

        self.console.header(&wf.name, &request.label());
        let run_id = self.record_start().await;

        let mut summary = RunSummary {
            workflow_id: wf.id.clone(),
            status: RunStatus::Running,
            pre_checks_passed: 0,
            pre_checks_failed: 0,
            steps_completed: 0,
            steps_total: plan.main.len(),
            elapsed: Duration::ZERO,
            failure: None,
        };

        transition(&mut phase, Phase::RunningPreChecks);
        if !plan.pre_checks.is_empty() {
            self.console.section("prechecks");
        }
        for atom in &plan.pre_checks {
            let t = Instant::now();
            let result = self.run_atom(atom).await;
            self.console.pre_check(&atom.label, result.is_ok(), t.elapsed());
            match result {
                Ok(()) => summary.pre_checks_passed += 1,
                Err(e) => {
                    summary.pre_checks_failed += 1;
                    summary.failure = Some(failure(atom, e));
                    break;
                }
            }
        }

        if summary.failure.is_none() {
            match request {
                RunRequest::PreChecksOnly => self.console.info("pre-checks only: steps skipped"),
                _ if plan.main.is_empty() => self
                    .console
                    .warning(&format!("workflow '{}' has no steps to run", wf.name)),
                _ => {}
            }
        }

        if summary.failure.is_none() && !plan.main.is_empty() {
            match plan.main_kind() {
                Some(AtomKind::Action) => {
                    transition(&mut phase, Phase::RunningActions);
                    self.console.section("actions");
                }
                _ => {
                    transition(&mut phase, Phase::RunningSteps);
                    self.console.section("scripts");
                }
            }
            let total = plan.main.len();
            for atom in &plan.main {
                let t = Instant::now();
                let result = self.run_atom(atom).await;
                self.console.progress(atom.index, total, &atom.label, t.elapsed());
                match result {
                    Ok(()) => summary.steps_completed += 1,
                    Err(e) => {
                        summary.failure = Some(failure(atom, e));
                        break;
                    }
                }
            }
        }

        summary.elapsed = started.elapsed();
        match &summary.failure {
            Some(f) => {
                transition(&mut phase, Phase::Failed);
                summary.status = RunStatus::Failed;
                self.console
                    .error(&format!("{} {} failed: {}", f.kind, f.index, f.reason));
            }
            None => {
                transition(&mut phase, Phase::Completed);
                summary.status = RunStatus::Success;
                self.console.success(&format!("workflow '{}' completed", wf.name));
            }
        }
        self.console.summary(&summary);
        self.record_complete(run_id, &summary).await;
        Ok(summary)
    }

    /// Runs are blocking, so they leave the async runtime's worker threads.
    async fn run_atom(&self, atom: &PlannedAtom) -> Result<()> {
        debug!(kind = %atom.kind, index = atom.index, "running atom");
        let runner = Arc::clone(&self.runner);
        let command = atom.command.clone();
        tokio::task::spawn_blocking(move || runner.run(&command))
            .await
            .map_err(|e| Error::Command(format!("runner task failed: {e}")))?
    }

    async fn record_start(&self) -> Option<u64> {
        let runs = self.history.as_ref()?;
        match runs.start(&self.workflow.id).await {
            Ok(run) => Some(run.id),
            Err(e) => {
                warn!(workflow = %self.workflow.id, error = %e, "failed to record run start");
                None
            }
        }
    }

    async fn record_complete(&self, run_id: Option<u64>, summary: &RunSummary) {
        let (Some(runs), Some(id)) = (self.history.as_ref(), run_id) else {
            return;
        };
        if let Err(e) = runs
            .complete(id, summary.status, Some(summary.log_line()))
            .await
        {
            warn!(workflow = %self.workflow.id, run = id, error = %e, "failed to record run result");
        }
    }
}

fn transition(phase: &mut Phase, next: Phase) {
    debug!(from = ?phase, to = ?next, "phase");
    *phase = next;
}

fn failure(atom: &PlannedAtom, err: Error) -> Failure {
    Failure {
        kind: atom.kind,
        index: atom.index,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use crate::store::{StoreGateway, StoreOptions};
    use crate::workflow::Atom;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn orchestrator(wf: Workflow, vars: Variables, runner: &Arc<RecordingRunner>) -> Orchestrator {
        let runner: Arc<dyn CommandRunner> = runner.clone();
        Orchestrator::new(wf, vars, runner)
            .with_console(Arc::new(Console::sink()))
            .with_privilege_probe(|| false)
    }

    #[tokio::test]
    async fn substituted_step_runs_once() {
        let mut wf = Workflow::new("greet", "Greet");
        wf.metadata.steps.push(Atom::new("echo {{NAME}}"));
        let runner = Arc::new(RecordingRunner::new());

        let summary = orchestrator(wf, vars(&[("NAME", "world")]), &runner)
            .run_steps()
            .await
            .unwrap();
        assert_eq!(runner.commands(), vec!["echo world"]);
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!((summary.steps_completed, summary.steps_total), (1, 1));
    }

    #[tokio::test]
    async fn failing_pre_check_blocks_steps() {
        let mut wf = Workflow::new("check", "Check");
        wf.metadata
            .pre_checks
            .push(Atom::new("test -f missing.txt"));
        wf.metadata.steps.push(Atom::new("echo never"));
        let runner = Arc::new(RecordingRunner::new().failing_on("missing.txt"));

        let summary = orchestrator(wf, Variables::new(), &runner)
            .execute(&RunRequest::Steps)
            .await
            .unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.pre_checks_passed, 0);
        assert_eq!(summary.pre_checks_failed, 1);
        assert_eq!(summary.steps_completed, 0);
        assert_eq!(runner.commands(), vec!["test -f missing.txt"]);
    }

    #[tokio::test]
    async fn second_of_three_pre_checks_failing_stops_everything() {
        let mut wf = Workflow::new("gate", "Gate");
        for cmd in ["check one", "check two", "check three"] {
            wf.metadata.pre_checks.push(Atom::new(cmd));
        }
        wf.metadata.steps.push(Atom::new("step"));
        wf.metadata.actions.insert("act".into(), Atom::new("action"));
        let runner = Arc::new(RecordingRunner::new().failing_on("two"));
        let orch = orchestrator(wf, Variables::new(), &runner);

        let summary = orch.execute(&RunRequest::Steps).await.unwrap();
        assert_eq!((summary.pre_checks_passed, summary.pre_checks_failed), (1, 1));
        assert_eq!(runner.commands(), vec!["check one", "check two"]);

        let err = orch.run_actions(&["act".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Execution { ref phase, index: 2, .. } if phase == "pre-check"
        ));
        assert!(!runner.commands().contains(&"action".to_string()));
    }

    #[tokio::test]
    async fn actions_run_in_caller_order_instead_of_steps() {
        let mut wf = Workflow::new("ops", "Ops");
        wf.metadata.steps.push(Atom::new("full pipeline"));
        wf.metadata.actions.insert("a".into(), Atom::new("do a"));
        wf.metadata.actions.insert("b".into(), Atom::new("do b"));
        let runner = Arc::new(RecordingRunner::new());

        let summary = orchestrator(wf, Variables::new(), &runner)
            .run_actions(&["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(runner.commands(), vec!["do b", "do a"]);
        assert_eq!((summary.steps_completed, summary.steps_total), (2, 2));
    }

    #[tokio::test]
    async fn failing_step_reports_phase_and_index() {
        let mut wf = Workflow::new("build", "Build");
        wf.metadata.steps.push(Atom::new("compile"));
        wf.metadata.steps.push(Atom::new("link"));
        wf.metadata.steps.push(Atom::new("ship"));
        let runner = Arc::new(RecordingRunner::new().failing_on("link"));

        let err = orchestrator(wf, Variables::new(), &runner)
            .run_steps()
            .await
            .unwrap_err();
        match err {
            Error::Execution { phase, index, .. } => {
                assert_eq!(phase, "step");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.commands(), vec!["compile", "link"]);
    }

    #[tokio::test]
    async fn unknown_action_runs_nothing() {
        let mut wf = Workflow::new("ops", "Ops");
        wf.metadata.pre_checks.push(Atom::new("check"));
        wf.metadata.actions.insert("a".into(), Atom::new("do a"));
        let runner = Arc::new(RecordingRunner::new());

        let err = orchestrator(wf, Variables::new(), &runner)
            .run_actions(&["a".to_string(), "nope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn missing_variable_spawns_nothing() {
        let mut wf = Workflow::new("clean", "Clean");
        wf.metadata.steps.push(Atom::new("rm {{TARGET}}"));
        let runner = Arc::new(RecordingRunner::new());

        let err = orchestrator(wf, Variables::new(), &runner)
            .run_steps()
            .await
            .unwrap_err();
        match err {
            Error::MissingVariables(names) => assert_eq!(names, vec!["TARGET"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn elevated_workflow_requires_privileges() {
        let mut wf = Workflow::new("root-only", "Root only");
        wf.metadata.uses_sudo = true;
        wf.metadata.steps.push(Atom::new("apt-get update"));
        let runner = Arc::new(RecordingRunner::new());

        let err = orchestrator(wf.clone(), Variables::new(), &runner)
            .run_steps()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Privilege(_)));
        assert!(runner.commands().is_empty());

        orchestrator(wf, Variables::new(), &runner)
            .with_privilege_probe(|| true)
            .run_steps()
            .await
            .unwrap();
        assert_eq!(runner.commands(), vec!["apt-get update"]);
    }

    #[tokio::test]
    async fn pre_checks_only_skips_steps() {
        let mut wf = Workflow::new("check", "Check");
        wf.metadata.pre_checks.push(Atom::new("check"));
        wf.metadata.steps.push(Atom::new("step"));
        let runner = Arc::new(RecordingRunner::new());

        let summary = orchestrator(wf, Variables::new(), &runner)
            .run_pre_checks()
            .await
            .unwrap();
        assert_eq!(runner.commands(), vec!["check"]);
        assert_eq!(summary.steps_total, 0);
        assert_eq!(summary.pre_checks_passed, 1);
    }

    #[tokio::test]
    async fn runs_are_recorded_in_history() {
        let dir = TempDir::new().unwrap();
        let runs = StoreGateway::new(dir.path().join("h.redb"), StoreOptions::default()).runs();
        let mut wf = Workflow::new("hist", "History");
        wf.metadata.steps.push(Atom::new("ok"));
        wf.metadata.steps.push(Atom::new("bad"));
        let runner = Arc::new(RecordingRunner::new().failing_on("bad"));

        let summary = orchestrator(wf, Variables::new(), &runner)
            .with_history(runs.clone())
            .execute(&RunRequest::Steps)
            .await
            .unwrap();
        assert_eq!(summary.status, RunStatus::Failed);

        let recent = runs.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].workflow_id, "hist");
        assert_eq!(recent[0].status, RunStatus::Failed);
        assert!(recent[0].completed_at.is_some());
        assert!(recent[0]
            .logs
            .as_deref()
            .is_some_and(|l| l.contains("steps: 1/2")));
    }

    /// Shared buffer standing in for the terminal.
    #[derive(Clone, Default)]
    struct Screen(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Screen {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Screen {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[tokio::test]
    async fn skipped_and_empty_main_phases_are_announced() {
        let screen = Screen::default();
        let console = Arc::new(Console::new(Box::new(screen.clone())));

        let mut wf = Workflow::new("check", "Check");
        wf.metadata.pre_checks.push(Atom::new("check"));
        wf.metadata.steps.push(Atom::new("step"));
        let runner = Arc::new(RecordingRunner::new());
        orchestrator(wf, Variables::new(), &runner)
            .with_console(Arc::clone(&console))
            .run_pre_checks()
            .await
            .unwrap();
        assert!(screen.text().contains("pre-checks only: steps skipped"));

        let empty = Workflow::new("empty", "Empty");
        orchestrator(empty, Variables::new(), &runner)
            .with_console(console)
            .run_steps()
            .await
            .unwrap();
        assert!(screen.text().contains("workflow 'Empty' has no steps to run"));
        assert_eq!(runner.commands(), vec!["check"]);
    }
}
