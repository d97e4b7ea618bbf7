//! Batch orchestration: one run at a time, one job per prompt, strictly in
//! prompt order.
//!
//! `start()` installs a fresh `RunState` and spawns two tasks: the worker
//! that walks the prompts, and a supervisor that awaits the worker and
//! stamps the terminal status (marking the run `Failed` if the worker
//! panicked). The orchestrator keeps the supervisor's `JoinHandle` and a
//! `CancellationToken`, so hosts can cancel and await a run
//! deterministically.
//!
//! Per-job failures are recorded on the job and the loop moves on. Run-level
//! faults (the remote service rejecting the session, or the session being
//! superseded by a newer upload) abort the remaining jobs and fail the run.
//! Cancellation is honoured between jobs, never mid-request.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::client::GenerationClient;
use super::credentials::VerifiedSession;
use super::models::{JobRecord, JobState, RunState, RunStatus, RunStatusSnapshot};
use super::prompts::PromptSet;
use super::settings::Settings;
use super::status::{RunSlot, StatusReporter, lock_slot};
use super::storage::{AssetSink, asset_filename};
use super::ws::{WsMessage, broadcast_message};
use crate::errors::{ErrorKind, GenerationError, OrchestratorError};

/// Handle to a started run, returned by `BatchOrchestrator::start`.
#[derive(Clone)]
pub struct RunHandle {
    run_id: Uuid,
    total: usize,
    cancel: CancellationToken,
    reporter: StatusReporter,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Request cancellation; takes effect before the next job starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        self.reporter.snapshot()
    }
}

struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Owns the single in-process run and its supervised task.
pub struct BatchOrchestrator {
    client: Arc<dyn GenerationClient>,
    sink: Arc<dyn AssetSink>,
    slot: RunSlot,
    active: Mutex<Option<ActiveRun>>,
    reporter: StatusReporter,
    events: Option<broadcast::Sender<String>>,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, sink: Arc<dyn AssetSink>, recent_records: usize) -> Self {
        let slot: RunSlot = Arc::new(Mutex::new(None));
        Self {
            client,
            sink,
            reporter: StatusReporter::new(Arc::clone(&slot), recent_records),
            slot,
            active: Mutex::new(None),
            events: None,
        }
    }

    /// Publish run events as JSON on `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<String>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn reporter(&self) -> StatusReporter {
        self.reporter.clone()
    }

    pub fn status(&self) -> RunStatusSnapshot {
        self.reporter.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.reporter.status() == RunStatus::Running
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a run over `prompts`, which is never empty. Returns immediately; the run proceeds on
    /// a background task. Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        session: VerifiedSession,
        prompts: &PromptSet,
        settings: Settings,
    ) -> Result<RunHandle, OrchestratorError> {
        if !session.is_valid() {
            return Err(OrchestratorError::SessionInvalid);
        }

        let mut active = self.lock_active();
        let run = {
            let mut slot = lock_slot(&self.slot);
            if slot.as_ref().is_some_and(|run| run.status == RunStatus::Running) {
                return Err(OrchestratorError::AlreadyRunning);
            }
            let run = RunState::start(prompts.iter());
            *slot = Some(run.clone());
            run
        };

        let run_id = run.run_id;
        let cancel = CancellationToken::new();
        info!(
            %run_id,
            total = prompts.len(),
            aspect_ratio = %settings.aspect_ratio(),
            duration = settings.duration(),
            resolution = %settings.resolution(),
            "starting generation run"
        );
        if let Some(tx) = &self.events {
            broadcast_message(
                tx,
                &WsMessage::RunStarted {
                    snapshot: self.reporter.snapshot(),
                },
            );
        }

        let worker = RunWorker {
            run_id,
            slot: Arc::clone(&self.slot),
            client: Arc::clone(&self.client),
            sink: Arc::clone(&self.sink),
            session,
            prompts: prompts.as_slice().to_vec(),
            settings,
            cancel: cancel.clone(),
            events: self.events.clone(),
        };
        let task = spawn_supervised(worker, self.reporter.clone());

        *active = Some(ActiveRun {
            run_id,
            cancel: cancel.clone(),
            task: Some(task),
        });

        Ok(RunHandle {
            run_id,
            total: prompts.len(),
            cancel,
            reporter: self.reporter.clone(),
        })
    }

    /// Request cancellation of the active run. Returns false when no run is
    /// in progress.
    pub fn cancel(&self) -> bool {
        let active = self.lock_active();
        match active.as_ref() {
            Some(run) if self.is_running() => {
                info!(run_id = %run.run_id, "cancellation requested");
                run.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for the current run's supervised task to finish.
    pub async fn wait(&self) {
        let task = self.lock_active().as_mut().and_then(|run| run.task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "run supervisor task failed");
            }
        }
    }

    /// Cancel any active run and wait for it to wind down.
    pub async fn shutdown(&self) {
        self.cancel();
        self.wait().await;
    }
}

/// Spawn the worker plus a supervisor that finalizes the run whatever the
/// worker's fate.
fn spawn_supervised(worker: RunWorker, reporter: StatusReporter) -> JoinHandle<()> {
    let run_id = worker.run_id;
    let slot = Arc::clone(&worker.slot);
    let events = worker.events.clone();

    tokio::spawn(async move {
        let status = match tokio::spawn(worker.run()).await {
            Ok(status) => status,
            Err(e) => {
                error!(%run_id, error = %e, "run worker crashed");
                if let Some(run) = lock_slot(&slot).as_mut().filter(|run| run.run_id == run_id) {
                    run.abort_from(0, "run aborted by an unexpected fault");
                }
                RunStatus::Failed
            }
        };

        let finished = lock_slot(&slot)
            .as_mut()
            .filter(|run| run.run_id == run_id)
            .map(|run| run.finish(status))
            .unwrap_or(false);

        if finished {
            let snapshot = reporter.snapshot();
            info!(
                %run_id,
                status = status.as_str(),
                completed = snapshot.completed,
                failed = snapshot.failed,
                total = snapshot.total,
                "generation run finished"
            );
            if let Some(tx) = &events {
                broadcast_message(tx, &WsMessage::RunFinished { snapshot });
            }
        }
    })
}

/// Everything the sequential run loop needs, moved onto its task.
struct RunWorker {
    run_id: Uuid,
    slot: RunSlot,
    client: Arc<dyn GenerationClient>,
    sink: Arc<dyn AssetSink>,
    session: VerifiedSession,
    prompts: Vec<String>,
    settings: Settings,
    cancel: CancellationToken,
    events: Option<broadcast::Sender<String>>,
}

impl RunWorker {
    /// Walk the prompts in order; returns the run's terminal status.
    async fn run(self) -> RunStatus {
        let total = self.prompts.len();

        for (index, prompt) in self.prompts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let aborted = self.abort_from(index, "run cancelled");
                info!(run_id = %self.run_id, index, aborted, "run cancelled between jobs");
                return RunStatus::Cancelled;
            }
            if !self.session.is_valid() {
                let aborted = self.abort_from(index, "session superseded by a newer cookie upload");
                warn!(run_id = %self.run_id, index, aborted, "session revoked mid-run");
                return RunStatus::Failed;
            }

            info!(run_id = %self.run_id, job = index + 1, total, %prompt, "generating video");
            self.update(index, |r| {
                r.advance(JobState::Generating);
            });

            let asset = match self.client.submit(&self.session, prompt, &self.settings).await {
                Ok(asset) => asset,
                Err(e) if e.is_run_level() => return self.fail_run(index, &e),
                Err(e) => {
                    warn!(run_id = %self.run_id, job = index + 1, error = %e, "generation failed");
                    self.update(index, |r| {
                        r.fail(e.kind(), e.to_string());
                    });
                    continue;
                }
            };

            self.update(index, |r| {
                r.asset_url = Some(asset.asset_url.clone());
                r.advance(JobState::Downloading);
            });

            let bytes = match self.client.fetch(&self.session, &asset.asset_url).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_run_level() => return self.fail_run(index, &e),
                Err(e) => {
                    warn!(run_id = %self.run_id, job = index + 1, error = %e, "download failed");
                    self.update(index, |r| {
                        r.fail(ErrorKind::DownloadFailed, e.to_string());
                    });
                    continue;
                }
            };

            let filename = asset_filename(index, Local::now());
            match self.sink.persist(&filename, &bytes).await {
                Ok(path) => {
                    info!(run_id = %self.run_id, job = index + 1, path = %path.display(), "video downloaded");
                    self.update(index, |r| {
                        r.asset_path = Some(path);
                        r.advance(JobState::Completed);
                    });
                }
                Err(e) => {
                    warn!(run_id = %self.run_id, job = index + 1, error = %e, "failed to store video");
                    self.update(index, |r| {
                        r.fail(ErrorKind::DownloadFailed, format!("failed to store {}: {}", filename, e));
                    });
                }
            }
        }

        RunStatus::Completed
    }

    /// Apply `f` to record `index` of this run and broadcast the result.
    fn update<F>(&self, index: usize, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        let record = {
            let mut slot = lock_slot(&self.slot);
            let Some(run) = slot.as_mut().filter(|run| run.run_id == self.run_id) else {
                return;
            };
            let Some(record) = run.records.get_mut(index) else {
                return;
            };
            f(record);
            record.clone()
        };
        if let Some(tx) = &self.events {
            broadcast_message(
                tx,
                &WsMessage::JobUpdated {
                    run_id: self.run_id,
                    record,
                },
            );
        }
    }

    fn abort_from(&self, index: usize, message: &str) -> usize {
        let aborted: Vec<JobRecord> = {
            let mut slot = lock_slot(&self.slot);
            let Some(run) = slot.as_mut().filter(|run| run.run_id == self.run_id) else {
                return 0;
            };
            run.abort_from(index, message);
            run.records.iter().skip(index).cloned().collect()
        };
        if let Some(tx) = &self.events {
            for record in &aborted {
                broadcast_message(
                    tx,
                    &WsMessage::JobUpdated {
                        run_id: self.run_id,
                        record: record.clone(),
                    },
                );
            }
        }
        aborted.len()
    }

    /// The remote service rejected the session: fail this job as `Invalid`
    /// and abort the rest.
    fn fail_run(&self, index: usize, e: &GenerationError) -> RunStatus {
        error!(run_id = %self.run_id, job = index + 1, error = %e, "session rejected; aborting run");
        self.update(index, |r| {
            r.fail(ErrorKind::Invalid, e.to_string());
        });
        self.abort_from(index + 1, "run aborted: session rejected by remote service");
        RunStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::client::GeneratedAsset;
    use crate::studio::storage::DirectorySink;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Fake service whose behaviour is keyed on the prompt text.
    ///
    /// - `fail-gen …`   submit fails with `GenerationFailed`
    /// - `timeout …`    submit fails with `Timeout`
    /// - `fail-fetch …` submit succeeds, fetch fails
    /// - `slow-fetch …` submit succeeds, fetch times out
    /// - `expire …`     submit reports the session as expired
    /// - `panic …`      submit panics
    ///
    /// When `gate` is set every submit first takes one permit from it, which
    /// lets tests step the run one job at a time.
    #[derive(Default)]
    struct ScriptedClient {
        gate: Option<Arc<Semaphore>>,
        submitted: Mutex<Vec<String>>,
        fetched: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn submit(
            &self,
            _session: &VerifiedSession,
            prompt: &str,
            settings: &Settings,
        ) -> Result<GeneratedAsset, GenerationError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.submitted.lock().unwrap().push(prompt.to_string());
            if prompt.starts_with("fail-gen") {
                return Err(GenerationError::Generation("content policy".into()));
            }
            if prompt.starts_with("timeout") {
                return Err(GenerationError::Timeout(Duration::from_secs(300)));
            }
            if prompt.starts_with("expire") {
                return Err(GenerationError::SessionExpired);
            }
            if prompt.starts_with("panic") {
                panic!("generation client blew up");
            }
            Ok(GeneratedAsset {
                asset_url: format!("https://cdn.test/{}.mp4", prompt.replace(' ', "_")),
                video_id: None,
                duration: settings.duration(),
                resolution: settings.resolution().to_string(),
            })
        }

        async fn fetch(&self, _session: &VerifiedSession, url: &str) -> Result<Vec<u8>, GenerationError> {
            self.fetched.lock().unwrap().push(url.to_string());
            if url.contains("fail-fetch") {
                return Err(GenerationError::Download("HTTP 500".into()));
            }
            if url.contains("slow-fetch") {
                return Err(GenerationError::Timeout(Duration::from_secs(120)));
            }
            Ok(format!("video bytes for {}", url).into_bytes())
        }
    }

    fn session() -> VerifiedSession {
        VerifiedSession::assume_verified([("SID", "abc")].into_iter().collect())
    }

    fn settings() -> Settings {
        Settings::try_from(crate::studio::settings::SettingsRequest {
            aspect_ratio: Some("16:9".into()),
            duration: Some(serde_json::json!(5)),
            resolution: Some("1080p".into()),
        })
        .unwrap()
    }

    fn setup(client: Arc<ScriptedClient>) -> (BatchOrchestrator, TempDir) {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(DirectorySink::new(dir.path().join("downloads")));
        (BatchOrchestrator::new(client, sink, 5), dir)
    }

    async fn wait_for<F: Fn(&RunStatusSnapshot) -> bool>(orch: &BatchOrchestrator, cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if cond(&orch.status()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn state_of(orch: &BatchOrchestrator, index: usize) -> JobState {
        orch.reporter().record(index).unwrap().state
    }

    #[tokio::test]
    async fn test_two_prompts_both_succeed() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["a cat on a beach", "a dog in snow"]).unwrap();

        let handle = orch.start(session(), &prompts, settings()).unwrap();
        assert_eq!(handle.total(), 2);
        orch.wait().await;

        let snap = orch.status();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.total, 2);
        assert_eq!(snap.completed, 2);
        assert!(snap.finished_at.is_some());

        let records = orch.reporter().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prompt, "a cat on a beach");
        assert_eq!(records[1].prompt, "a dog in snow");
        let paths: Vec<_> = records
            .iter()
            .map(|r| {
                assert_eq!(r.state, JobState::Completed);
                r.asset_path.clone().unwrap()
            })
            .collect();
        assert_ne!(paths[0], paths[1]);
        for path in &paths {
            assert!(path.starts_with(dir.path().join("downloads")));
            assert!(path.exists());
        }
        assert!(records[0].filename().unwrap().starts_with("video_1_"));
        assert!(records[1].filename().unwrap().starts_with("video_2_"));
    }

    #[tokio::test]
    async fn test_second_submit_timeout_keeps_batch_completed() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["a cat on a beach", "timeout a dog in snow"]).unwrap();

        orch.start(session(), &prompts, settings()).unwrap();
        orch.wait().await;

        let snap = orch.status();
        assert_eq!(snap.status, RunStatus::Completed);
        let records = orch.reporter().records();
        assert_eq!(records[0].state, JobState::Completed);
        assert_eq!(records[1].state, JobState::Failed);
        assert_eq!(records[1].error, Some(ErrorKind::Timeout));
        assert_eq!(snap.failed, 1);
    }

    #[tokio::test]
    async fn test_failed_submit_skips_fetch() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["fail-gen x", "ok"]).unwrap();

        orch.start(session(), &prompts, settings()).unwrap();
        orch.wait().await;

        let records = orch.reporter().records();
        assert_eq!(records[0].state, JobState::Failed);
        assert_eq!(records[0].error, Some(ErrorKind::GenerationFailed));
        assert!(records[0].asset_url.is_none());
        assert_eq!(client.fetched(), vec!["https://cdn.test/ok.mp4".to_string()]);
        assert_eq!(records[1].state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_download_failed_without_file() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["fail-fetch clip"]).unwrap();

        orch.start(session(), &prompts, settings()).unwrap();
        orch.wait().await;

        let record = orch.reporter().record(0).unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error, Some(ErrorKind::DownloadFailed));
        assert!(record.asset_path.is_none());
        let downloads = dir.path().join("downloads");
        let files = std::fs::read_dir(&downloads).map(|d| d.count()).unwrap_or(0);
        assert_eq!(files, 0);
        assert_eq!(orch.status().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_download_failed() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["slow-fetch clip", "ok"]).unwrap();

        orch.start(session(), &prompts, settings()).unwrap();
        orch.wait().await;

        let record = orch.reporter().record(0).unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.error, Some(ErrorKind::DownloadFailed));
        assert!(record.message.as_deref().unwrap().contains("timed out"));
        assert!(record.asset_path.is_none());
        assert_eq!(state_of(&orch, 1), JobState::Completed);
        assert_eq!(orch.status().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected_without_mutation() {
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(ScriptedClient::gated(Arc::clone(&gate)));
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["a", "b"]).unwrap();

        let first = orch.start(session(), &prompts, settings()).unwrap();
        wait_for(&orch, |s| s.current == Some(0)).await;
        let before = orch.reporter().records();

        let other = PromptSet::from_prompts(["x", "y", "z"]).unwrap();
        let err = orch.start(session(), &other, settings()).err().unwrap();
        assert!(matches!(err, OrchestratorError::AlreadyRunning));
        assert_eq!(orch.reporter().records(), before);
        assert_eq!(orch.status().run_id, Some(first.run_id()));

        gate.add_permits(2);
        orch.wait().await;
        assert_eq!(orch.status().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_new_run_supersedes_finished_run() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, _dir) = setup(Arc::clone(&client));

        let first = orch
            .start(session(), &PromptSet::from_prompts(["a"]).unwrap(), settings())
            .unwrap();
        orch.wait().await;
        let second = orch
            .start(session(), &PromptSet::from_prompts(["b", "c"]).unwrap(), settings())
            .unwrap();
        orch.wait().await;

        assert_ne!(first.run_id(), second.run_id());
        let snap = orch.status();
        assert_eq!(snap.run_id, Some(second.run_id()));
        assert_eq!(snap.total, 2);
        assert_eq!(snap.completed, 2);
    }

    #[tokio::test]
    async fn test_cancel_after_job_aborts_remaining() {
        let gate = Arc::new(Semaphore::new(1));
        let client = Arc::new(ScriptedClient::gated(Arc::clone(&gate)));
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["a", "b", "c", "d"]).unwrap();

        let handle = orch.start(session(), &prompts, settings()).unwrap();
        // Job 0 passes the gate; job 1 blocks inside submit.
        wait_for(&orch, |s| s.current == Some(1)).await;
        assert!(orch.cancel());
        assert!(handle.is_cancel_requested());
        gate.add_permits(10);
        orch.wait().await;

        let snap = orch.status();
        assert_eq!(snap.status, RunStatus::Cancelled);
        assert_eq!(state_of(&orch, 0), JobState::Completed);
        assert_eq!(state_of(&orch, 1), JobState::Completed);
        for i in 2..4 {
            let record = orch.reporter().record(i).unwrap();
            assert_eq!(record.state, JobState::Failed);
            assert_eq!(record.error, Some(ErrorKind::Aborted));
        }
        assert_eq!(client.submitted(), vec!["a".to_string(), "b".to_string()]);
        assert!(!orch.cancel());
    }

    #[tokio::test]
    async fn test_cancel_without_run_returns_false() {
        let (orch, _dir) = setup(Arc::new(ScriptedClient::default()));
        assert!(!orch.cancel());
        assert_eq!(orch.status().status, RunStatus::Idle);
        orch.wait().await;
    }

    #[tokio::test]
    async fn test_session_rejected_mid_run_aborts_remaining() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["ok", "expire now", "never"]).unwrap();

        orch.start(session(), &prompts, settings()).unwrap();
        orch.wait().await;

        let records = orch.reporter().records();
        assert_eq!(orch.status().status, RunStatus::Failed);
        assert_eq!(records[0].state, JobState::Completed);
        assert_eq!(records[1].error, Some(ErrorKind::Invalid));
        assert_eq!(records[2].error, Some(ErrorKind::Aborted));
        assert_eq!(client.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_revoked_session_aborts_before_next_job() {
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(ScriptedClient::gated(Arc::clone(&gate)));
        let (orch, _dir) = setup(Arc::clone(&client));
        let session = session();
        let prompts = PromptSet::from_prompts(["a", "b", "c"]).unwrap();

        orch.start(session.clone(), &prompts, settings()).unwrap();
        wait_for(&orch, |s| s.current == Some(0)).await;
        session.revoke();
        gate.add_permits(10);
        orch.wait().await;

        assert_eq!(orch.status().status, RunStatus::Failed);
        assert_eq!(state_of(&orch, 0), JobState::Completed);
        assert_eq!(orch.reporter().record(1).unwrap().error, Some(ErrorKind::Aborted));
        assert_eq!(orch.reporter().record(2).unwrap().error, Some(ErrorKind::Aborted));
    }

    #[tokio::test]
    async fn test_revoked_session_rejected_at_start() {
        let (orch, _dir) = setup(Arc::new(ScriptedClient::default()));
        let session = session();
        session.revoke();
        let err = orch
            .start(session, &PromptSet::from_prompts(["a"]).unwrap(), settings())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Invalid);
        assert_eq!(orch.status().status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_worker_panic_fails_run() {
        let client = Arc::new(ScriptedClient::default());
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["ok", "panic here", "after"]).unwrap();

        orch.start(session(), &prompts, settings()).unwrap();
        orch.wait().await;

        let snap = orch.status();
        assert_eq!(snap.status, RunStatus::Failed);
        assert!(snap.finished_at.is_some());
        assert_eq!(state_of(&orch, 0), JobState::Completed);
        assert_eq!(orch.reporter().record(1).unwrap().error, Some(ErrorKind::Unexpected));
        assert_eq!(orch.reporter().record(2).unwrap().error, Some(ErrorKind::Aborted));
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn test_records_never_move_backwards() {
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(ScriptedClient::gated(Arc::clone(&gate)));
        let (orch, _dir) = setup(Arc::clone(&client));
        let prompts = PromptSet::from_prompts(["a", "fail-gen b", "c"]).unwrap();
        orch.start(session(), &prompts, settings()).unwrap();

        let rank = |s: JobState| match s {
            JobState::Pending => 0,
            JobState::Generating => 1,
            JobState::Downloading => 2,
            JobState::Completed | JobState::Failed => 3,
        };
        let mut last = vec![0; 3];
        for _ in 0..3 {
            gate.add_permits(1);
            for _ in 0..50 {
                for record in orch.reporter().records() {
                    let r = rank(record.state);
                    assert!(r >= last[record.index]);
                    last[record.index] = r;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        orch.wait().await;
        assert_eq!(orch.status().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (tx, mut rx) = broadcast::channel::<String>(64);
        let dir = TempDir::new().unwrap();
        let orch = BatchOrchestrator::new(
            Arc::new(ScriptedClient::default()),
            Arc::new(DirectorySink::new(dir.path())),
            5,
        )
        .with_events(tx);

        orch.start(session(), &PromptSet::from_prompts(["a"]).unwrap(), settings())
            .unwrap();
        orch.wait().await;

        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("RunStarted"));
        assert_eq!(kinds.last().map(String::as_str), Some("RunFinished"));
        assert_eq!(kinds.iter().filter(|k| *k == "JobUpdated").count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_run() {
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(ScriptedClient::gated(Arc::clone(&gate)));
        let (orch, _dir) = setup(Arc::clone(&client));
        orch.start(session(), &PromptSet::from_prompts(["a", "b"]).unwrap(), settings())
            .unwrap();
        wait_for(&orch, |s| s.current == Some(0)).await;
        gate.add_permits(10);
        orch.shutdown().await;
        let snap = orch.status();
        assert!(snap.status.is_terminal());
        assert_eq!(snap.completed + snap.failed, 2);
    }
}
