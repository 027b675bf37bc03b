use chrono::Utc;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::retry::RetryPolicy;
use crate::application::scheduler::{Plan, Scheduler};
use crate::application::services::alert_dispatcher::{AlertDispatcher, DeliveryOutcome};
use crate::domain::entities::{HostEvent, HostState, HostStatus, TaskStatus, UiMessage};
use crate::domain::repositories::{StoreError, TaskRepository};
use crate::domain::value_objects::DeliveryGuarantee;
use crate::infrastructure::platform::{InstanceLock, Liveness};

const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum HostError {
    #[error("another execution host is already running (lock held on {0})")]
    AlreadyRunning(PathBuf),

    #[error("execution host must restart: {0}")]
    RestartRequired(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("host I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub lock_path: PathBuf,
    pub liveness_path: PathBuf,
    /// Longest single sleep; the store is re-read at least this often.
    pub max_sleep: Duration,
    pub heartbeat_interval: Duration,
    /// Age after which terminal tasks are purged. `None` keeps history forever.
    pub history_retention: Option<chrono::Duration>,
    /// Consecutive non-transient failures of one task before it is taken out of scheduling.
    pub max_delivery_failures: u32,
}

/// Long-lived owner of the scheduler/dispatcher loop.
///
/// Everything the loop knows is re-read from the store on every pass, so a
/// restart (after a crash, a kill or a reboot) resumes exactly where the
/// store says it should.
pub struct ExecutionHost {
    scheduler: Scheduler,
    dispatcher: Arc<AlertDispatcher>,
    store: Arc<dyn TaskRepository>,
    liveness: Liveness,
    settings: HostSettings,
    state: watch::Sender<HostState>,
    events: broadcast::Sender<HostEvent>,
}

impl ExecutionHost {
    pub fn new(
        store: Arc<dyn TaskRepository>,
        dispatcher: Arc<AlertDispatcher>,
        events: broadcast::Sender<HostEvent>,
        settings: HostSettings,
    ) -> Self {
        let (state, _) = watch::channel(HostState::Stopped);
        Self {
            scheduler: Scheduler::new(store.clone()),
            dispatcher,
            store,
            liveness: Liveness::new(settings.liveness_path.clone()),
            settings,
            state,
            events,
        }
    }

    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: HostState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!("Unexpected host transition {} -> {}", current, next);
            }
            debug!("Host {} -> {}", current, next);
            *current = next;
            true
        });
    }

    fn publish_status(&self, status: HostStatus) {
        let _ = self.events.send(HostEvent::HostStatus { status });
    }

    /// One lifetime of the host: `Starting`, the loop, and back to `Stopped`.
    ///
    /// Returns `Ok` on a clean shutdown. `RestartRequired` and store errors ask the
    /// supervisor to start over.
    pub async fn run(
        &self,
        wake: &mut mpsc::UnboundedReceiver<UiMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), HostError> {
        self.set_state(HostState::Starting);

        let lock = match InstanceLock::try_acquire(&self.settings.lock_path) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                self.set_state(HostState::Stopped);
                return Err(HostError::AlreadyRunning(self.settings.lock_path.clone()));
            }
            Err(e) => {
                self.set_state(HostState::Stopped);
                return Err(HostError::Io(e));
            }
        };
        debug!("Instance lock acquired on {}", lock.path().display());

        let heartbeat = CancellationToken::new();
        let result = match self.start(&heartbeat).await {
            Ok(()) => {
                self.set_state(HostState::Running);
                self.publish_status(HostStatus::Running);
                info!("🚀 Execution host running");
                self.event_loop(wake, &shutdown).await
            }
            Err(e) => Err(e),
        };

        heartbeat.cancel();
        if let Err(e) = self.liveness.clear().await {
            warn!("Failed to clear liveness flag: {}", e);
        }
        self.dispatcher.stop_alarm().await;
        self.set_state(HostState::Stopped);
        self.publish_status(HostStatus::Stopped);
        drop(lock);

        match &result {
            Ok(()) => info!("Execution host stopped"),
            Err(e) => error!("Execution host stopped: {}", e),
        }
        result
    }

    /// Liveness registration, history purge and crash reconciliation.
    async fn start(&self, heartbeat: &CancellationToken) -> Result<(), HostError> {
        self.liveness.beat(Utc::now()).await?;
        self.spawn_heartbeat(heartbeat.clone());

        self.purge_history().await?;
        self.quarantine_unreadable().await?;

        if self.dispatcher.guarantee() == DeliveryGuarantee::AtMostOnce {
            let reconciled = self.dispatcher.reconcile_intents().await?;
            if reconciled > 0 {
                info!("Reconciled {} interrupted deliveries", reconciled);
            }
        }

        let pending = self.store.list(Some(TaskStatus::Pending)).await?;
        info!("Loaded {} pending tasks", pending.len());
        Ok(())
    }

    /// Cancels every pending row that no longer decodes, so none of them can block the queue.
    async fn quarantine_unreadable(&self) -> Result<(), HostError> {
        loop {
            match self.store.list(Some(TaskStatus::Pending)).await {
                Ok(_) => return Ok(()),
                Err(StoreError::CorruptTask { id, reason }) => {
                    self.quarantine(id, &reason).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Takes one task out of scheduling. Failing to do so is fatal for this lifetime.
    async fn quarantine(&self, id: u64, reason: &str) -> Result<(), HostError> {
        match self.store.quarantine(id).await {
            Ok(true) => {
                error!("Task {} quarantined (cancelled): {}", id, reason);
                Ok(())
            }
            Ok(false) => Err(HostError::RestartRequired(format!(
                "task {} keeps failing ({}) but is no longer pending",
                id, reason
            ))),
            Err(e) => Err(HostError::RestartRequired(format!(
                "task {} could not be quarantined: {}",
                id, e
            ))),
        }
    }

    fn spawn_heartbeat(&self, token: CancellationToken) {
        let liveness = self.liveness.clone();
        let period = self.settings.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = liveness.beat(Utc::now()).await {
                            warn!("Heartbeat write failed: {}", e);
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    async fn purge_history(&self) -> Result<(), HostError> {
        let Some(retention) = self.settings.history_retention else {
            return Ok(());
        };
        // A retention longer than the calendar keeps everything.
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Ok(());
        };
        let removed = self.store.purge_history(cutoff).await?;
        if removed > 0 {
            info!("Purged {} old tasks from history", removed);
        }
        Ok(())
    }

    async fn event_loop(
        &self,
        wake: &mut mpsc::UnboundedReceiver<UiMessage>,
        shutdown: &CancellationToken,
    ) -> Result<(), HostError> {
        let mut wake_open = true;
        let mut next_purge = Instant::now() + PURGE_INTERVAL;
        let mut failing: Option<(u64, u32)> = None;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            if Instant::now() >= next_purge {
                if let Err(e) = self.purge_history().await {
                    warn!("History purge failed: {}", e);
                }
                next_purge = Instant::now() + PURGE_INTERVAL;
            }

            let now = Utc::now();
            let pause = match self.scheduler.plan(now).await {
                Ok(Plan::Dispatch(task)) => match self.dispatcher.deliver(&task, now).await {
                    Ok(report) => {
                        failing = None;
                        if let DeliveryOutcome::Delivered { successor: Some(next) } = report.outcome {
                            debug!("Task {} re-armed as task {}", report.task_id, next);
                        }
                        // More tasks may be due; re-evaluate right away.
                        continue;
                    }
                    Err(e) => {
                        let attempts = match failing {
                            Some((id, n)) if id == task.id => n + 1,
                            _ => 1,
                        };
                        failing = Some((task.id, attempts));
                        if !e.is_transient() && attempts >= self.settings.max_delivery_failures {
                            let reason = format!("not committed after {} attempts: {}", attempts, e);
                            self.quarantine(task.id, &reason).await?;
                            failing = None;
                            continue;
                        }
                        let delay = RetryPolicy::store().backoff_with_jitter(attempts);
                        warn!("Delivery of task {} failed ({}); retrying in {:?}", task.id, e, delay);
                        delay
                    }
                },
                Ok(Plan::Wait { task, wait }) => {
                    let pause = wait.min(self.settings.max_sleep);
                    debug!("Next task {} due at {}; sleeping {:?}", task.id, task.due_at(), pause);
                    pause
                }
                Ok(Plan::Idle) => {
                    debug!("No pending tasks; sleeping {:?}", self.settings.max_sleep);
                    self.settings.max_sleep
                }
                Err(e) if e.is_transient() => {
                    let delay = RetryPolicy::store().backoff_with_jitter(2);
                    warn!("Task store busy ({}); retrying in {:?}", e, delay);
                    delay
                }
                Err(StoreError::CorruptTask { id, reason }) => {
                    self.quarantine(id, &reason).await?;
                    continue;
                }
                Err(e) => {
                    return Err(HostError::RestartRequired(format!(
                        "cannot read the task store: {}",
                        e
                    )));
                }
            };

            self.set_state(HostState::Suspended);
            tokio::select! {
                _ = sleep(pause) => {}
                message = wake.recv(), if wake_open => {
                    match message {
                        Some(message) => {
                            self.handle_hint(message).await;
                            // Coalesce a burst of hints into one re-evaluation.
                            while let Ok(message) = wake.try_recv() {
                                self.handle_hint(message).await;
                            }
                        }
                        None => {
                            debug!("Wake channel closed; relying on timed re-evaluation");
                            wake_open = false;
                        }
                    }
                }
                _ = shutdown.cancelled() => return Ok(()),
            }
            self.set_state(HostState::Running);
        }
    }

    async fn handle_hint(&self, message: UiMessage) {
        match message.task_id() {
            Some(id) => debug!("Woken by {:?} for task {}", message, id),
            // Only StopAlarm is not about a task.
            None => self.dispatcher.stop_alarm().await,
        }
    }
}
