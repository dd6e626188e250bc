use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardlog::config::EngineConfig;
use shardlog::engine::{SyncEngine, scheduler};
use shardlog::git::GitRepository;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardlog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let repo = GitRepository::new(config.backup_dir.clone(), config.repo_url.clone())
        .with_token_var(config.token_var.clone());
    let engine = Arc::new(SyncEngine::new(config.backup_dir.clone(), repo));

    let shutdown = CancellationToken::new();
    let handle = scheduler::start(Arc::clone(&engine), config.backup_interval, shutdown.clone());

    // Records arrive as one JSON object per stdin line; EOF stops intake.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(line) {
            Ok(object) => {
                engine.add_log(&object);
            }
            Err(e) => tracing::warn!(error = %e, "ignoring unparsable record"),
        }
    }

    // Drain what is still buffered, then stop the timers.
    tracing::info!("input closed, running final backup");
    let final_engine = Arc::clone(&engine);
    if tokio::task::spawn_blocking(move || final_engine.backup())
        .await
        .is_err()
    {
        tracing::error!("final backup task failed");
    }

    shutdown.cancel();
    let _ = handle.synchronize.await;
    let _ = handle.backup.await;
}
