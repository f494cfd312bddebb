//! boardsync: pull the incident board display and persist it to blob storage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use boardsync_api::ApiSession;
use boardsync_blob::{store_from_descriptor, BlobSink};
use boardsync_core::JobConfig;
use boardsync_runtime::Orchestrator;
use boardsync_secrets::{identity_from_env, CredentialCache, KeyVaultClient, SecretProvider};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn build_orchestrator(config: &JobConfig) -> anyhow::Result<Orchestrator> {
    let credentials = Arc::new(CredentialCache::new(identity_from_env()));
    let vault = Arc::new(KeyVaultClient::new(config.keyvault_url.clone()));
    let secrets = SecretProvider::new(credentials, vault);
    let api = ApiSession::new(secrets, config.environment.clone())?;

    let store = store_from_descriptor(&config.storage)
        .map_err(|e| anyhow::anyhow!("Failed to open storage: {}", e))?;
    let sink = BlobSink::new(store, config.container.clone(), config.timezone);

    Ok(Orchestrator::new(api, sink))
}

/// One invocation. Returns whether the run succeeded and its log was written.
async fn run_once(orchestrator: &Orchestrator) -> bool {
    match orchestrator.run().await {
        Ok(outcome) => match outcome.into_result() {
            Ok(record) => {
                info!("Run succeeded, {} records pulled", record.records_pulled());
                true
            }
            Err(e) => {
                error!(kind = e.kind(), "Run failed: {}", e);
                false
            }
        },
        Err(e) => {
            error!(kind = e.kind(), "Run log could not be written: {}", e);
            false
        }
    }
}

/// A tick observed later than this after its deadline is reported.
const PAST_DUE_SLACK: Duration = Duration::from_secs(1);

/// Trigger `run` on a fixed period, one at a time, starting immediately.
///
/// `shutdown` is watched during runs as well as between them; a run already
/// in flight is allowed to finish so its run log is written.
async fn schedule<F, Fut>(period: Duration, shutdown: impl Future<Output = ()>, mut run: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Scheduling runs every {}s", period.as_secs());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            tick = ticker.tick() => {
                if tick.elapsed() > PAST_DUE_SLACK {
                    warn!("The timer is past due!");
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down scheduler");
                return;
            }
        }

        let current = run();
        tokio::pin!(current);
        tokio::select! {
            _ = &mut current => {}
            _ = &mut shutdown => {
                info!("Shutdown requested, finishing the current run");
                current.await;
                info!("Shutting down scheduler");
                return;
            }
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    match command {
        "--help" | "-h" | "help" => {
            println!("boardsync: export the incident board display to blob storage");
            println!();
            println!("Usage: boardsync [command]");
            println!();
            println!("Commands:");
            println!("  run (default)   Run the job once");
            println!("  schedule        Run the job every BOARDSYNC_SCHEDULE_SECS seconds");
            println!("  help            Show this help message");
            return Ok(());
        }
        "run" | "schedule" => {}
        other => {
            eprintln!("Unknown command: {}. Use 'boardsync help' for usage.", other);
            std::process::exit(1);
        }
    }

    let config = JobConfig::from_env()?;
    info!(
        "Environment: {}, container: {}",
        config.environment.as_str(),
        config.container
    );
    let orchestrator = build_orchestrator(&config)?;

    if command == "schedule" {
        schedule(config.schedule_interval, ctrl_c(), || run_once(&orchestrator)).await;
        return Ok(());
    }

    if !run_once(&orchestrator).await {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shutdown_during_run_lets_it_finish() {
        let started = AtomicUsize::new(0);
        let finished = AtomicUsize::new(0);
        let (signal, shutdown) = oneshot::channel::<()>();
        let mut signal = Some(signal);

        let scheduled = schedule(
            Duration::from_secs(3600),
            async move {
                let _ = shutdown.await;
            },
            || {
                started.fetch_add(1, Ordering::SeqCst);
                if let Some(signal) = signal.take() {
                    let _ = signal.send(());
                }
                let finished = &finished;
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    true
                }
            },
        );
        tokio::time::timeout(Duration::from_secs(5), scheduled)
            .await
            .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_between_runs() {
        let runs = AtomicUsize::new(0);

        let scheduled = schedule(Duration::from_secs(3600), async {}, || {
            runs.fetch_add(1, Ordering::SeqCst);
            async { true }
        });
        tokio::time::timeout(Duration::from_secs(5), scheduled)
            .await
            .unwrap();

        assert!(runs.load(Ordering::SeqCst) <= 1);
    }
}
