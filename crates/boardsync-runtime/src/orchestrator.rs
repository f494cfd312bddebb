//! Orchestrator: one invocation from authentication to the run log.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use boardsync_api::ApiSession;
use boardsync_blob::BlobSink;
use boardsync_core::{records_in, Error, Result, RunRecord};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info};

use crate::types::*;

/// Drives the authenticate → pull → ingest → log pipeline.
///
/// Stages run strictly in sequence with a single attempt each. The run log is
/// written after the stages whatever their outcome, including a panic.
pub struct Orchestrator {
    api: ApiSession,
    sink: BlobSink,
}

/// What the stages produced before finishing or failing.
#[derive(Default)]
struct Progress {
    states: Vec<RunState>,
    payload: Option<Value>,
    file_name: Option<String>,
}

impl Progress {
    fn enter(&mut self, state: RunState) {
        self.states.push(state);
    }

    fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Started)
    }
}

impl Orchestrator {
    pub fn new(api: ApiSession, sink: BlobSink) -> Self {
        Self { api, sink }
    }

    /// Run one invocation.
    ///
    /// Returns `Err` only when the run log itself could not be written. A
    /// failed stage is reported in the outcome; see [`RunOutcome::into_result`].
    pub async fn run(&self) -> Result<RunOutcome> {
        let start_time = Utc::now();
        let mut progress = Progress::default();
        progress.enter(RunState::Started);
        info!("Scheduler started");

        let stages = AssertUnwindSafe(self.run_stages(&mut progress))
            .catch_unwind()
            .await;
        let failure = match stages {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(panic) => {
                let stage = Stage::after(progress.current()).unwrap_or(Stage::Ingest);
                Some(StageFailure::new(
                    stage,
                    Error::Internal(format!("{:?} stage panicked: {}", stage, panic_message(panic.as_ref()))),
                ))
            }
        };

        self.finalize(start_time, progress, failure).await
    }

    async fn run_stages(&self, progress: &mut Progress) -> std::result::Result<(), StageFailure> {
        let session = self
            .api
            .authenticate()
            .await
            .map_err(|e| StageFailure::new(Stage::Authenticate, e))?;
        progress.enter(RunState::Authenticated);

        let payload = self
            .api
            .pull_data(&session)
            .await
            .map_err(|e| StageFailure::new(Stage::PullData, e))?;
        progress.enter(RunState::Fetched);

        let payload = progress.payload.insert(payload);
        let key = self
            .sink
            .ingest(Some(&*payload))
            .await
            .map_err(|e| StageFailure::new(Stage::Ingest, e))?;
        progress.file_name = Some(key);
        progress.enter(RunState::Ingested);

        Ok(())
    }

    /// Build the run-record and write it. Reached on every path out of the stages.
    async fn finalize(
        &self,
        start_time: chrono::DateTime<Utc>,
        mut progress: Progress,
        failure: Option<StageFailure>,
    ) -> Result<RunOutcome> {
        let end_time = Utc::now();
        let records_pulled = progress.payload.as_ref().map_or(0, records_in);

        let record = match &failure {
            None => RunRecord::succeeded(start_time, end_time, records_pulled, progress.file_name.take()),
            Some(failure) => {
                error!(
                    stage = ?failure.stage,
                    kind = failure.error.kind(),
                    "Error during process: {}",
                    failure.error
                );
                progress.enter(RunState::Failed);
                RunRecord::failed(
                    start_time,
                    end_time,
                    records_pulled,
                    progress.file_name.take(),
                    failure.error.to_string(),
                )
            }
        };

        info!("Process completed in {:.3}s", record.duration_seconds());
        let log_key = self.sink.write_logs(&record).await?;
        progress.enter(RunState::Logged);

        Ok(RunOutcome {
            record,
            states: progress.states,
            failure,
            log_key,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("stage blew up");
        assert_eq!(panic_message(boxed.as_ref()), "stage blew up");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_progress_tracks_current_state() {
        let mut progress = Progress::default();
        assert_eq!(progress.current(), RunState::Started);
        progress.enter(RunState::Started);
        progress.enter(RunState::Authenticated);
        assert_eq!(progress.current(), RunState::Authenticated);
        assert_eq!(Stage::after(progress.current()), Some(Stage::PullData));
    }
}
