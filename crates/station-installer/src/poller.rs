use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::{watch, Mutex},
    task::AbortHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::api::StationApi;
use crate::events::{EventSender, InstallerEvent, NotificationLevel};
use crate::model::{PollHealth, TaskStatus};
use crate::store::{PollOutcome, TaskStore};

struct PollerHandle {
    generation: u64,
    stop_tx: watch::Sender<bool>,
    abort: AbortHandle,
}

impl PollerHandle {
    fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.abort.abort();
    }
}

/// Running pollers keyed by task id; at most one per task.
#[derive(Clone, Default)]
pub(crate) struct PollerRegistry {
    handles: Arc<StdMutex<HashMap<String, PollerHandle>>>,
    generations: Arc<AtomicU64>,
}

impl PollerRegistry {
    pub(crate) fn is_running(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    pub(crate) fn running(&self) -> usize {
        self.lock().len()
    }

    /// Stops the poller for `task_id`. Returns false when none was running,
    /// so each poller is stopped at most once.
    pub(crate) fn stop(&self, task_id: &str) -> bool {
        let handle = self.lock().remove(task_id);
        match handle {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub(crate) fn stop_all(&self) {
        let handles: Vec<_> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            handle.stop();
        }
    }

    /// Called by a poller that ended on its own.
    fn release(&self, task_id: &str, generation: u64) {
        let mut handles = self.lock();
        if handles
            .get(task_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            handles.remove(task_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PollerHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub(crate) struct PollContext {
    pub(crate) api: StationApi,
    pub(crate) store: Arc<Mutex<TaskStore>>,
    pub(crate) events: EventSender,
    pub(crate) pollers: PollerRegistry,
    pub(crate) interval: Duration,
}

/// Starts polling `task_id` unless a poller for it is already running.
pub(crate) fn start_poller(ctx: &PollContext, task_id: &str) -> bool {
    let mut handles = ctx.pollers.lock();
    if handles.contains_key(task_id) {
        return false;
    }
    let generation = ctx.pollers.generations.fetch_add(1, Ordering::Relaxed) + 1;
    let (stop_tx, stop_rx) = watch::channel(false);
    let join = tokio::spawn(run_poller(
        ctx.clone(),
        task_id.to_string(),
        generation,
        stop_rx,
    ));
    handles.insert(
        task_id.to_string(),
        PollerHandle {
            generation,
            stop_tx,
            abort: join.abort_handle(),
        },
    );
    true
}

async fn run_poller(
    ctx: PollContext,
    task_id: String,
    generation: u64,
    mut stop_rx: watch::Receiver<bool>,
) {
    ctx.store
        .lock()
        .await
        .set_poll_health(&task_id, PollHealth::Polling);

    let mut ticker = interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }
        if *stop_rx.borrow() {
            break;
        }

        let Some(seq) = ctx.store.lock().await.begin_poll(&task_id) else {
            break;
        };
        let report = match ctx.api.status(&task_id).await {
            Ok(report) => report,
            Err(err) => {
                warn!("Polling stopped for {task_id}: {err}");
                ctx.store
                    .lock()
                    .await
                    .set_poll_health(&task_id, PollHealth::Stalled);
                break;
            }
        };

        let (outcome, task) = {
            let mut store = ctx.store.lock().await;
            let outcome = store.apply_status(&task_id, seq, &report, Utc::now());
            (outcome, store.get(&task_id).cloned())
        };

        match outcome {
            PollOutcome::Updated { status, terminal } => {
                let progress = task.as_ref().map(|task| task.progress).unwrap_or_default();
                debug!("{task_id}: {status} {progress:.1}%");
                ctx.events.send(InstallerEvent::TaskUpdated {
                    task_id: task_id.clone(),
                    status: status.clone(),
                    progress,
                });
                if terminal {
                    let name = report
                        .resource_name()
                        .map(str::to_string)
                        .or_else(|| task.as_ref().map(|task| task.resource.name.clone()))
                        .filter(|name| !name.trim().is_empty())
                        .unwrap_or_else(|| "Resource".to_string());
                    let error = task.and_then(|task| task.error);
                    info!("{task_id} finished with status {status}");
                    ctx.events
                        .send(outcome_notification(&task_id, &status, &name, error));
                    break;
                }
            }
            PollOutcome::Stale => {}
            PollOutcome::Frozen | PollOutcome::Missing => break,
        }
    }

    ctx.pollers.release(&task_id, generation);
}

pub(crate) fn outcome_notification(
    task_id: &str,
    status: &TaskStatus,
    name: &str,
    error: Option<String>,
) -> InstallerEvent {
    let (level, message) = match status {
        TaskStatus::Completed => (
            NotificationLevel::Success,
            format!("{name} installed successfully"),
        ),
        TaskStatus::Failed => (
            NotificationLevel::Error,
            match error {
                Some(error) => format!("{name} failed to install: {error}"),
                None => format!("{name} failed to install"),
            },
        ),
        _ => (
            NotificationLevel::Warning,
            format!("{name} installation cancelled"),
        ),
    };
    InstallerEvent::notification(Some(task_id), level, message)
}
