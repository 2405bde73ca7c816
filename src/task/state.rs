//! Task state machine and the tracked task record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::TaskError;
use crate::service::{InputFile, OutputFormat, SecurityLevel};

/// State of the tracked task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Files may be selected and submitted.
    #[default]
    Idle,
    /// Submission request in flight.
    Uploading,
    /// Accepted by the service, being polled.
    Processing,
    /// Service confirmed success.
    Complete,
    /// Submission or processing failed.
    Error,
}

impl TaskState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Idle, Uploading) |
            (Uploading, Processing) | (Uploading, Error) |
            (Processing, Complete) | (Processing, Error)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Upload or processing in progress; new selections are refused.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading | Self::Processing)
    }

    /// Label of the primary action button in this state.
    pub fn action_label(&self) -> &'static str {
        match self {
            Self::Idle => "INITIATE CLOAKING",
            Self::Uploading => "UPLOADING...",
            Self::Processing => "CLOAKING...",
            Self::Complete => "DOWNLOAD ARTIFACTS",
            Self::Error => "SYSTEM FAILURE",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// The one task tracked by the controller.
///
/// A new `Task` (with a new `key`) replaces the old one on every file
/// selection; `key` is what stale timers and late responses are checked against.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub key: Uuid,
    pub id: Option<String>,
    pub inputs: Arc<Vec<InputFile>>,
    pub security_level: SecurityLevel,
    pub output_format: OutputFormat,
    pub state: TaskState,
    pub started_at: Option<Instant>,
    pub progress_percent: f64,
    pub elapsed_seconds: u64,
}

impl Task {
    pub fn new(inputs: Vec<InputFile>) -> Self {
        Self {
            key: Uuid::new_v4(),
            id: None,
            inputs: Arc::new(inputs),
            security_level: SecurityLevel::default(),
            output_format: OutputFormat::default(),
            state: TaskState::Idle,
            started_at: None,
            progress_percent: 0.0,
            elapsed_seconds: 0,
        }
    }

    pub fn transition_to(&mut self, target: TaskState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }

    /// Record the remote job id. Only the first assignment sticks.
    pub fn assign_id(&mut self, id: String) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    /// Raise progress to `percent`; lower values are ignored.
    pub fn raise_progress(&mut self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.progress_percent {
            self.progress_percent = percent;
        }
    }

    pub fn reset_progress(&mut self) {
        self.progress_percent = 0.0;
    }

    /// Recompute elapsed whole seconds from `started_at`.
    pub fn tick_elapsed(&mut self, now: Instant) {
        if let Some(started) = self.started_at {
            self.elapsed_seconds = now.saturating_duration_since(started).as_secs();
        }
    }

    /// Final elapsed value: the service's figure (rounded) when it sent one,
    /// otherwise the local clock.
    pub fn freeze_elapsed(&mut self, reported: Option<f64>, now: Instant) {
        match reported {
            Some(secs) => self.elapsed_seconds = secs.round() as u64,
            None => self.tick_elapsed(now),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            key: self.key,
            job_id: self.id.clone(),
            state: self.state,
            file_count: self.inputs.len(),
            security_level: self.security_level,
            output_format: self.output_format,
            progress_percent: self.progress_percent,
            elapsed_seconds: self.elapsed_seconds,
        }
    }
}

/// Read-only view of the tracked task for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub key: Uuid,
    pub job_id: Option<String>,
    pub state: TaskState,
    pub file_count: usize,
    pub security_level: SecurityLevel,
    pub output_format: OutputFormat,
    pub progress_percent: f64,
    pub elapsed_seconds: u64,
}

impl TaskSnapshot {
    /// Files are selected and nothing is in flight.
    pub fn can_submit(&self) -> bool {
        self.file_count > 0 && self.state == TaskState::Idle
    }

    pub fn action_label(&self) -> &'static str {
        self.state.action_label()
    }

    /// Progress as shown to the operator.
    pub fn display_percent(&self) -> u8 {
        self.progress_percent.round().clamp(0.0, 100.0) as u8
    }

    pub fn elapsed_label(&self) -> String {
        if self.state == TaskState::Complete {
            format!("TOTAL TIME: {}s", self.elapsed_seconds)
        } else {
            format!("ELAPSED: {}s", self.elapsed_seconds)
        }
    }
}
