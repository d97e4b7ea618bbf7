use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ErrorKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Generating,
    Downloading,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

/// Validate that a job state transition only moves forward.
pub fn is_valid_transition(from: JobState, to: JobState) -> bool {
    matches!(
        (from, to),
        (JobState::Pending, JobState::Generating)
            | (JobState::Pending, JobState::Failed)
            | (JobState::Generating, JobState::Downloading)
            | (JobState::Generating, JobState::Failed)
            | (JobState::Downloading, JobState::Completed)
            | (JobState::Downloading, JobState::Failed)
    )
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Outcome of one prompt within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub index: usize,
    pub prompt: String,
    pub state: JobState,
    pub asset_url: Option<String>,
    pub asset_path: Option<PathBuf>,
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(index: usize, prompt: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            state: JobState::Pending,
            asset_url: None,
            asset_path: None,
            error: None,
            message: None,
            updated_at: Utc::now(),
        }
    }

    /// File name of the downloaded asset, if any.
    pub fn filename(&self) -> Option<String> {
        self.asset_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }

    /// Move to `to`, returning false (and leaving the record untouched) if
    /// the transition would go backwards or leave a terminal state.
    pub fn advance(&mut self, to: JobState) -> bool {
        if !is_valid_transition(self.state, to) {
            return false;
        }
        self.state = to;
        self.updated_at = Utc::now();
        true
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> bool {
        if !self.advance(JobState::Failed) {
            return false;
        }
        self.error = Some(kind);
        self.message = Some(message.into());
        true
    }
}

/// State of a single run. Owned by the orchestrator; readers only ever see
/// copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub records: Vec<JobRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// A fresh run with one pending record per prompt, already `Running`.
    pub fn start<'a, I>(prompts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Running,
            records: prompts
                .into_iter()
                .enumerate()
                .map(|(i, p)| JobRecord::pending(i, p))
                .collect(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Set the terminal status and stamp `finished_at`. Only the first call
    /// has an effect.
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if self.finished_at.is_some() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Fail every record from `from` on that has not reached a terminal state.
    pub fn abort_from(&mut self, from: usize, message: &str) -> usize {
        let mut aborted = 0;
        for record in self.records.iter_mut().skip(from) {
            if !record.state.is_terminal() {
                let kind = if record.state == JobState::Pending {
                    ErrorKind::Aborted
                } else {
                    ErrorKind::Unexpected
                };
                if record.fail(kind, message) {
                    aborted += 1;
                }
            }
        }
        aborted
    }

    pub fn count(&self, state: JobState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    /// Index of the record currently generating or downloading.
    pub fn current(&self) -> Option<usize> {
        self.records
            .iter()
            .find(|r| matches!(r.state, JobState::Generating | JobState::Downloading))
            .map(|r| r.index)
    }

    pub fn snapshot(&self, recent: usize) -> RunStatusSnapshot {
        let started: Vec<&JobRecord> = self
            .records
            .iter()
            .filter(|r| r.state != JobState::Pending)
            .collect();
        let skip = started.len().saturating_sub(recent);
        RunStatusSnapshot {
            run_id: Some(self.run_id),
            status: self.status,
            total: self.records.len(),
            completed: self.count(JobState::Completed),
            failed: self.count(JobState::Failed),
            pending: self.count(JobState::Pending),
            current: self.current(),
            started_at: Some(self.started_at),
            finished_at: self.finished_at,
            recent: started.into_iter().skip(skip).cloned().collect(),
        }
    }
}

/// Immutable point-in-time view of a run, safe to hand to pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatusSnapshot {
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub current: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub recent: Vec<JobRecord>,
}

impl RunStatusSnapshot {
    pub fn idle() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            total: 0,
            completed: 0,
            failed: 0,
            pending: 0,
            current: None,
            started_at: None,
            finished_at: None,
            recent: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(is_valid_transition(JobState::Pending, JobState::Generating));
        assert!(is_valid_transition(JobState::Generating, JobState::Downloading));
        assert!(is_valid_transition(JobState::Generating, JobState::Failed));
        assert!(is_valid_transition(JobState::Downloading, JobState::Completed));
        assert!(is_valid_transition(JobState::Downloading, JobState::Failed));
        assert!(is_valid_transition(JobState::Pending, JobState::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!is_valid_transition(JobState::Completed, JobState::Failed));
        assert!(!is_valid_transition(JobState::Failed, JobState::Generating));
        assert!(!is_valid_transition(JobState::Downloading, JobState::Generating));
        assert!(!is_valid_transition(JobState::Pending, JobState::Completed));
        assert!(!is_valid_transition(JobState::Pending, JobState::Downloading));
        assert!(!is_valid_transition(JobState::Completed, JobState::Completed));
    }

    #[test]
    fn test_record_advance_rejects_backward_moves() {
        let mut record = JobRecord::pending(0, "a cat");
        assert!(record.advance(JobState::Generating));
        assert!(record.advance(JobState::Downloading));
        assert!(!record.advance(JobState::Generating));
        assert_eq!(record.state, JobState::Downloading);
        assert!(record.advance(JobState::Completed));
        assert!(!record.fail(ErrorKind::Aborted, "late"));
        assert_eq!(record.state, JobState::Completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_job_state_round_trip_str() {
        for state in [
            JobState::Pending,
            JobState::Generating,
            JobState::Downloading,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("done".parse::<JobState>().is_err());
    }

    #[test]
    fn test_run_state_start_allocates_pending_records_in_order() {
        let run = RunState::start(["a", "b", "c"]);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.records.len(), 3);
        for (i, record) in run.records.iter().enumerate() {
            assert_eq!(record.index, i);
            assert_eq!(record.state, JobState::Pending);
        }
        assert_eq!(run.records[2].prompt, "c");
    }

    #[test]
    fn test_finish_stamps_once() {
        let mut run = RunState::start(["a"]);
        assert!(!run.finish(RunStatus::Running));
        assert!(run.finish(RunStatus::Completed));
        let first = run.finished_at;
        assert!(!run.finish(RunStatus::Failed));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.finished_at, first);
    }

    #[test]
    fn test_abort_from_marks_only_unfinished_records() {
        let mut run = RunState::start(["a", "b", "c", "d"]);
        run.records[0].advance(JobState::Generating);
        run.records[0].advance(JobState::Downloading);
        run.records[0].advance(JobState::Completed);
        run.records[1].advance(JobState::Generating);
        assert_eq!(run.abort_from(0, "cancelled"), 3);
        assert_eq!(run.records[0].state, JobState::Completed);
        assert_eq!(run.records[1].error, Some(ErrorKind::Unexpected));
        assert_eq!(run.records[2].error, Some(ErrorKind::Aborted));
        assert_eq!(run.records[3].error, Some(ErrorKind::Aborted));
    }

    #[test]
    fn test_snapshot_counts_and_recent_window() {
        let mut run = RunState::start(["a", "b", "c", "d"]);
        for i in 0..3 {
            run.records[i].advance(JobState::Generating);
        }
        run.records[0].advance(JobState::Downloading);
        run.records[0].advance(JobState::Completed);
        run.records[1].fail(ErrorKind::Timeout, "timed out");

        let snap = run.snapshot(2);
        assert_eq!(snap.total, 4);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.pending, 1);
        assert_eq!(snap.current, Some(2));
        let indices: Vec<usize> = snap.recent.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_idle_snapshot() {
        let snap = RunStatusSnapshot::idle();
        assert_eq!(snap.status, RunStatus::Idle);
        assert!(snap.run_id.is_none());
        assert!(snap.recent.is_empty());
    }

    #[test]
    fn test_record_filename() {
        let mut record = JobRecord::pending(0, "a");
        assert!(record.filename().is_none());
        record.asset_path = Some(PathBuf::from("/tmp/downloads/video_1_x.mp4"));
        assert_eq!(record.filename().as_deref(), Some("video_1_x.mp4"));
    }
}
