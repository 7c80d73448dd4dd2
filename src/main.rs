use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

use respec::db::prelude::{MemoryStore, PgStore, ReputationStore, Scope, StoreErr};
use respec::engine::worker::Dispatcher;
use respec::engine::{Engine, EngineErr, Event};
use respec::rank::sync::TierSynchronizer;
use respec::rate::effects::CooldownGate;
use respec::roles::TracingRoleGateway;
use respec::util::env::{self, EnvErr};
use respec::util::telemetry::Telemetry;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] StoreErr),

    #[error(transparent)]
    Engine(#[from] EngineErr),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

/// Replays JSON-lines events from stdin through the engine, then prints each touched server's
/// standings.
#[tokio::main]
async fn main() -> Result<()> {
    let settings = env::settings().await?;
    let telemetry = Telemetry::new(settings)?.register();

    let store: Arc<dyn ReputationStore> = match settings.database_url() {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, scores will not outlive this process");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Engine::new(
        store.clone(),
        CooldownGate::from_secs(settings.cooldown_secs),
        settings.leaderboard_size,
    );
    let sync = TierSynchronizer::new(
        store,
        Arc::new(TracingRoleGateway),
        settings.role_names(),
    );
    let dispatcher = Dispatcher::spawn(engine.clone(), sync, settings.worker_count, None);

    let mut servers = BTreeSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                servers.insert(event.server_id().clone());
                dispatcher.submit(event).await?;
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping malformed event"),
        }
    }

    dispatcher.shutdown().await;

    for server in servers {
        let standings = engine.standings(&Scope::Guild(server.clone())).await?;
        println!("{server}\n{}\n", standings.render());
    }

    telemetry.shutdown();
    Ok(())
}
