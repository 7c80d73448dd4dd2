use std::collections::BTreeSet;

use async_channel::{Receiver, Sender};
use futures::future::join_all;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

use crate::db::models::channel::ServerId;
use crate::engine::{Engine, EngineErr, EngineResult, Event};
use crate::rank::sync::TierSynchronizer;
use crate::rate::random::WyRandom;

/// Fixed pool of event workers sharing one queue, plus a single task that keeps tiers in sync.
///
/// Workers report the servers they mutated to the sync task. The sync task drains everything
/// that's pending before running, so a burst of events on one server costs one sync.
#[derive(Debug)]
pub struct Dispatcher {
    pub id: Uuid,
    queue: Sender<Event>,
    workers: Vec<JoinHandle<()>>,
    syncer: JoinHandle<()>,
}

impl Dispatcher {
    /// `seed` makes every worker's random source reproducible; `None` seeds from the clock.
    pub fn spawn(
        engine: Engine,
        sync: TierSynchronizer,
        workers: usize,
        seed: Option<u64>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (queue, events) = async_channel::unbounded::<Event>();
        let (sync_tx, sync_rx) = mpsc::unbounded_channel::<ServerId>();

        let syncer = tokio::spawn(run_sync(sync, sync_rx));
        let workers = (0..workers.max(1))
            .map(|n| {
                let rng = match seed {
                    Some(seed) => WyRandom::seeded(seed.wrapping_add(n as u64)),
                    None => WyRandom::from_clock(),
                };

                tokio::spawn(run_worker(
                    n,
                    engine.clone(),
                    events.clone(),
                    sync_tx.clone(),
                    rng,
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(%id, workers = workers.len(), "dispatcher started");

        Self {
            id,
            queue,
            workers,
            syncer,
        }
    }

    pub async fn submit(&self, event: Event) -> EngineResult<()> {
        self.queue
            .send(event)
            .await
            .map_err(|_| EngineErr::QueueClosed)
    }

    /// Stops accepting events, waits for the queue to drain, then for the final tier sync.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn shutdown(self) {
        self.queue.close();

        for res in join_all(self.workers).await {
            if let Err(e) = res {
                tracing::error!(error = ?e, "worker task failed");
            }
        }

        if let Err(e) = self.syncer.await {
            tracing::error!(error = ?e, "sync task failed");
        }

        tracing::info!("dispatcher stopped");
    }
}

#[instrument(skip(engine, events, sync_tx, rng))]
async fn run_worker(
    worker: usize,
    engine: Engine,
    events: Receiver<Event>,
    sync_tx: UnboundedSender<ServerId>,
    mut rng: WyRandom,
) {
    while let Ok(event) = events.recv().await {
        let outcome = match engine.handle(&event, &mut rng).await {
            Ok(outcome) => outcome,
            Err(EngineErr::Partial { outcome, source }) => {
                tracing::error!(
                    kind = event.kind(),
                    committed = outcome.changes.len(),
                    error = %source,
                    "event partially applied"
                );
                outcome
            }
            Err(e) => {
                tracing::error!(kind = event.kind(), error = %e, "event dropped");
                continue;
            }
        };

        if let Some(server) = outcome.sync {
            // only fails once the sync task is gone, at which point there's nobody to tell
            _ = sync_tx.send(server);
        }
    }

    tracing::debug!("worker drained");
}

async fn run_sync(sync: TierSynchronizer, mut pending: UnboundedReceiver<ServerId>) {
    while let Some(first) = pending.recv().await {
        let mut batch = BTreeSet::from([first]);
        while let Ok(next) = pending.try_recv() {
            batch.insert(next);
        }

        for server in batch {
            if let Err(e) = sync.sync(&server).await {
                tracing::error!(%server, error = %e, "tier sync failed");
            }
        }
    }
}
