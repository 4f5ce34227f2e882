use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Processing,
    Ready,
    Fail,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Ready => "ready",
            TaskState::Fail => "fail",
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Fail)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "fail" => Ok(Self::Fail),
            other => Err(format!("invalid task state: {other}")),
        }
    }
}

/// Immutable challenge parameters captured at task creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub url: String,
    pub site_key: String,
    pub action: Option<String>,
    pub cdata: Option<String>,
}

/// Short machine-readable failure tags surfaced through `/result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The engine gave up before the timeout.
    CaptchaFail,
    /// The solve attempt exceeded the configured bound.
    SolveTimeout,
    /// The owning browser session became unusable mid-attempt.
    SessionError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CaptchaFail => "CAPTCHA_FAIL",
            ErrorCode::SolveTimeout => "SOLVE_TIMEOUT",
            ErrorCode::SessionError => "SESSION_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal payload written exactly once by the owning worker.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Solved { token: String, elapsed: Duration },
    Failed { code: ErrorCode, elapsed: Duration },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub request: TaskRequest,
    pub result: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    elapsed_seconds: Option<f64>,
}

impl Task {
    pub(crate) fn new(request: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TaskState::Queued,
            request,
            result: None,
            error_code: None,
            created_at: Utc::now(),
            completed_at: None,
            elapsed_seconds: None,
        }
    }

    /// Seconds spent solving, recorded once at the terminal transition and
    /// stable across every subsequent read.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.elapsed_seconds
    }

    pub(crate) fn apply_outcome(&mut self, outcome: TaskOutcome) {
        let (state, result, error_code, elapsed) = match outcome {
            TaskOutcome::Solved { token, elapsed } => {
                (TaskState::Ready, Some(token), None, elapsed)
            }
            TaskOutcome::Failed { code, elapsed } => (TaskState::Fail, None, Some(code), elapsed),
        };
        self.state = state;
        self.result = result;
        self.error_code = error_code;
        self.completed_at = Some(Utc::now());
        self.elapsed_seconds = Some(round_seconds(elapsed));
    }
}

fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
