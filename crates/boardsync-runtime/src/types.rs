//! Runtime types.

use boardsync_core::{Error, Result, RunRecord, RunStatus};
use serde::Serialize;

/// Position of an invocation in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Started,
    Authenticated,
    Fetched,
    Ingested,
    Failed,
    /// Terminal, reached on success and failure alike.
    Logged,
}

/// Pipeline stage that can fail a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Authenticate,
    PullData,
    Ingest,
}

impl Stage {
    /// Stage that runs next from a non-terminal state.
    pub fn after(state: RunState) -> Option<Stage> {
        match state {
            RunState::Started => Some(Stage::Authenticate),
            RunState::Authenticated => Some(Stage::PullData),
            RunState::Fetched => Some(Stage::Ingest),
            RunState::Ingested | RunState::Failed | RunState::Logged => None,
        }
    }
}

/// Error that moved a run to FAILED, with the stage it came from.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: Error,
}

impl StageFailure {
    pub fn new(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }
}

/// Everything one invocation produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub record: RunRecord,
    /// States visited, in order; always ends with `Logged`.
    pub states: Vec<RunState>,
    pub failure: Option<StageFailure>,
    /// Key the run log was written under.
    pub log_key: String,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.record.status() == RunStatus::Success
    }

    /// Re-raise the stage failure, if any, now that the run is logged.
    pub fn into_result(self) -> Result<RunRecord> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_stage_after_state() {
        assert_eq!(Stage::after(RunState::Started), Some(Stage::Authenticate));
        assert_eq!(Stage::after(RunState::Authenticated), Some(Stage::PullData));
        assert_eq!(Stage::after(RunState::Fetched), Some(Stage::Ingest));
        assert_eq!(Stage::after(RunState::Logged), None);
    }

    #[test]
    fn test_into_result_reraises_failure() {
        let now = Utc::now();
        let outcome = RunOutcome {
            record: RunRecord::failed(now, now, 0, None, "Authentication error: denied"),
            states: vec![RunState::Started, RunState::Failed, RunState::Logged],
            failure: Some(StageFailure::new(
                Stage::Authenticate,
                Error::Auth("denied".into()),
            )),
            log_key: "api-observability-logs/log_20240101_000000.json".into(),
        };
        assert!(!outcome.succeeded());
        assert!(matches!(outcome.into_result(), Err(Error::Auth(_))));
    }

    #[test]
    fn test_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&RunState::Authenticated).unwrap(), "\"AUTHENTICATED\"");
        assert_eq!(serde_json::to_string(&Stage::PullData).unwrap(), "\"pull_data\"");
    }
}
