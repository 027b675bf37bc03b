use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::application::retry::{RetryPolicy, with_store_retry};
use crate::domain::entities::task::{Task, TaskStatus};
use crate::domain::entities::HostEvent;
use crate::domain::outputs::{Alert, AudioCue, Notifier, OutputError, SideEffectRunner};
use crate::domain::repositories::{StoreError, StoreResult, TaskRepository};
use crate::domain::value_objects::DeliveryGuarantee;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub guarantee: DeliveryGuarantee,
    /// Bound on the notification and on launching the audio cue.
    pub output_timeout: Duration,
    pub side_effect_timeout: Duration,
    pub timezone: Tz,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            guarantee: DeliveryGuarantee::AtLeastOnce,
            output_timeout: Duration::from_secs(10),
            side_effect_timeout: Duration::from_secs(30),
            timezone: chrono_tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Alerted and committed; `successor` is the id of the next occurrence.
    Delivered { successor: Option<u64> },
    /// The task reached a terminal status before dispatch started.
    Skipped { status: TaskStatus },
    /// Edited or snoozed into the future after it was picked.
    Rescheduled,
    /// Deleted from the store before dispatch started.
    Missing,
    /// Cancelled while the alert was being produced. The alert was shown; nothing was committed.
    LostRace,
}

#[derive(Debug)]
pub struct DeliveryReport {
    pub task_id: u64,
    pub outcome: DeliveryOutcome,
    /// Output failures. None of them prevent the delivery from being committed.
    pub failures: Vec<OutputError>,
}

/// Turns a due task into an alert and a committed `delivered` transition.
pub struct AlertDispatcher {
    store: Arc<dyn TaskRepository>,
    notifier: Arc<dyn Notifier>,
    audio: Arc<dyn AudioCue>,
    side_effects: Arc<dyn SideEffectRunner>,
    events: broadcast::Sender<HostEvent>,
    settings: DispatchSettings,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn TaskRepository>,
        notifier: Arc<dyn Notifier>,
        audio: Arc<dyn AudioCue>,
        side_effects: Arc<dyn SideEffectRunner>,
        events: broadcast::Sender<HostEvent>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            audio,
            side_effects,
            events,
            settings,
        }
    }

    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.settings.guarantee
    }

    /// Delivers `task` if it is still pending and due.
    ///
    /// At-least-once: a crash after the alert but before the commit alerts once more
    /// after restart. At-most-once: a crash after the intent is written never re-alerts.
    pub async fn deliver(&self, task: &Task, now: DateTime<Utc>) -> StoreResult<DeliveryReport> {
        let id = task.id;
        let current = with_store_retry(RetryPolicy::store(), "reading due task", || {
            self.store.get(id)
        })
        .await?;

        let Some(current) = current else {
            debug!("Task {} vanished before dispatch", id);
            return Ok(self.report(id, DeliveryOutcome::Missing, Vec::new()));
        };
        if current.status.is_terminal() {
            debug!("Task {} is already {}; skipping", id, current.status);
            return Ok(self.report(
                id,
                DeliveryOutcome::Skipped {
                    status: current.status,
                },
                Vec::new(),
            ));
        }
        if !current.is_due(now) {
            debug!("Task {} moved to {}; not due yet", id, current.due_at());
            return Ok(self.report(id, DeliveryOutcome::Rescheduled, Vec::new()));
        }

        if self.settings.guarantee == DeliveryGuarantee::AtMostOnce {
            let intent = with_store_retry(RetryPolicy::store(), "recording dispatch intent", || {
                self.store.record_dispatch_intent(id, now)
            })
            .await;
            match intent {
                Ok(()) => {}
                Err(StoreError::InvalidTransition { from, .. }) => {
                    return Ok(self.report(id, DeliveryOutcome::Skipped { status: from }, Vec::new()));
                }
                Err(StoreError::NotFound(_)) => {
                    return Ok(self.report(id, DeliveryOutcome::Missing, Vec::new()));
                }
                Err(e) => return Err(e),
            }
        }

        let failures = self.produce_outputs(&current).await;

        let committed = with_store_retry(RetryPolicy::store(), "committing delivery", || {
            self.store.mark_delivered(id, now)
        })
        .await;

        match committed {
            Ok(delivery) => {
                let successor = delivery.successor.as_ref().map(|t| t.id);
                info!("✅ Task {} delivered: {}", id, current.message);
                // No receivers just means no UI is connected.
                let _ = self.events.send(HostEvent::TaskDelivered { id });
                Ok(self.report(id, DeliveryOutcome::Delivered { successor }, failures))
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!("Task {} became {} while alerting", id, from);
                Ok(self.report(id, DeliveryOutcome::LostRace, failures))
            }
            Err(StoreError::NotFound(_)) => Ok(self.report(id, DeliveryOutcome::LostRace, failures)),
            Err(e) => Err(e),
        }
    }

    /// Notification and audio are awaited (bounded); the side effect runs detached.
    async fn produce_outputs(&self, task: &Task) -> Vec<OutputError> {
        let mut failures = Vec::new();
        let alert = Alert::for_task(task, &self.settings.timezone);
        let limit = self.settings.output_timeout;

        match tokio::time::timeout(limit, self.notifier.notify(&alert)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e),
            Err(_) => failures.push(OutputError::Notification(format!(
                "timed out after {:?}",
                limit
            ))),
        }

        match tokio::time::timeout(limit, self.audio.start(task)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e),
            Err(_) => failures.push(OutputError::Audio(format!("timed out after {:?}", limit))),
        }

        if let Some(effect) = task.alert.side_effect.clone() {
            let runner = self.side_effects.clone();
            let limit = self.settings.side_effect_timeout;
            let id = task.id;
            tokio::spawn(async move {
                match tokio::time::timeout(limit, runner.run(&effect)).await {
                    Ok(Ok(())) => debug!("Side effect of task {} done", id),
                    Ok(Err(e)) => warn!("Side effect of task {} failed: {}", id, e),
                    Err(_) => warn!("Side effect of task {} timed out after {:?}", id, limit),
                }
            });
        }

        for failure in &failures {
            error!("Output for task {} failed: {}", task.id, failure);
        }
        failures
    }

    /// Commits, without alerting, every pending task whose dispatch intent survived a crash.
    pub async fn reconcile_intents(&self) -> StoreResult<usize> {
        let pending = self.store.list(Some(TaskStatus::Pending)).await?;
        let mut reconciled = 0;

        for task in pending {
            let Some(started_at) = task.dispatch_started_at else {
                continue;
            };
            match self.store.mark_delivered(task.id, started_at).await {
                Ok(_) => {
                    warn!(
                        "Task {} was interrupted mid-dispatch at {}; marked delivered without re-alerting",
                        task.id, started_at
                    );
                    reconciled += 1;
                }
                Err(StoreError::InvalidTransition { .. }) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reconciled)
    }

    pub async fn stop_alarm(&self) {
        self.audio.stop().await;
    }

    fn report(&self, task_id: u64, outcome: DeliveryOutcome, failures: Vec<OutputError>) -> DeliveryReport {
        DeliveryReport {
            task_id,
            outcome,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::task::{NewTask, SideEffect};
    use crate::domain::value_objects::RepeatRule;
    use crate::infrastructure::repositories::MemoryTaskRepository;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        alerts: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, alert: &Alert) -> Result<(), OutputError> {
            self.alerts.lock().unwrap().push(alert.task_id);
            if self.fail {
                Err(OutputError::Notification("display unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Silent;

    #[async_trait]
    impl AudioCue for Silent {
        async fn start(&self, _task: &Task) -> Result<(), OutputError> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    #[async_trait]
    impl SideEffectRunner for Silent {
        async fn run(&self, _effect: &SideEffect) -> Result<(), OutputError> {
            Ok(())
        }
    }

    /// Cancels the task it is alerting for, like a user acting on the popup before the commit.
    struct CancelWhileAlerting {
        store: Arc<MemoryTaskRepository>,
    }

    #[async_trait]
    impl Notifier for CancelWhileAlerting {
        async fn notify(&self, alert: &Alert) -> Result<(), OutputError> {
            self.store
                .cancel(alert.task_id)
                .await
                .map_err(|e| OutputError::Notification(e.to_string()))?;
            Ok(())
        }
    }

    fn dispatcher(
        store: Arc<MemoryTaskRepository>,
        notifier: Arc<dyn Notifier>,
        guarantee: DeliveryGuarantee,
    ) -> (AlertDispatcher, broadcast::Receiver<HostEvent>) {
        let (events, rx) = broadcast::channel(16);
        let settings = DispatchSettings {
            guarantee,
            ..DispatchSettings::default()
        };
        let dispatcher = AlertDispatcher::new(
            store,
            notifier,
            Arc::new(Silent),
            Arc::new(Silent),
            events,
            settings,
        );
        (dispatcher, rx)
    }

    fn nine_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn delivers_once_and_announces_it() {
        let store = Arc::new(MemoryTaskRepository::new());
        let notifier = Arc::new(Recorder::default());
        let (dispatcher, mut events) =
            dispatcher(store.clone(), notifier.clone(), DeliveryGuarantee::AtLeastOnce);

        let task = store
            .create(NewTask::new(nine_am(), "Call mom").with_repeat(Some(RepeatRule::Daily)))
            .await
            .unwrap();

        let report = dispatcher.deliver(&task, nine_am()).await.unwrap();
        let DeliveryOutcome::Delivered { successor: Some(next_id) } = report.outcome else {
            panic!("unexpected outcome {:?}", report.outcome);
        };
        assert_eq!(events.recv().await.unwrap(), HostEvent::TaskDelivered { id: task.id });

        let next = store.get(next_id).await.unwrap().unwrap();
        assert_eq!(next.fire_at, nine_am() + ChronoDuration::days(1));

        let again = dispatcher.deliver(&task, nine_am()).await.unwrap();
        assert_eq!(
            again.outcome,
            DeliveryOutcome::Skipped {
                status: TaskStatus::Delivered
            }
        );
        assert_eq!(*notifier.alerts.lock().unwrap(), vec![task.id]);
    }

    #[tokio::test]
    async fn output_failure_still_commits() {
        let store = Arc::new(MemoryTaskRepository::new());
        let notifier = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let (dispatcher, _events) =
            dispatcher(store.clone(), notifier, DeliveryGuarantee::AtLeastOnce);

        let task = store.create(NewTask::new(nine_am(), "x")).await.unwrap();
        let report = dispatcher.deliver(&task, nine_am()).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.outcome, DeliveryOutcome::Delivered { successor: None });
        assert_eq!(
            store.get(task.id).await.unwrap().unwrap().status,
            TaskStatus::Delivered
        );
    }

    #[tokio::test]
    async fn snoozed_after_pick_is_not_delivered() {
        let store = Arc::new(MemoryTaskRepository::new());
        let (dispatcher, _events) = dispatcher(
            store.clone(),
            Arc::new(Recorder::default()),
            DeliveryGuarantee::AtLeastOnce,
        );

        let task = store.create(NewTask::new(nine_am(), "x")).await.unwrap();
        store.snooze(task.id, 60).await.unwrap();

        let report = dispatcher.deliver(&task, nine_am()).await.unwrap();
        assert_eq!(report.outcome, DeliveryOutcome::Rescheduled);
    }

    #[tokio::test]
    async fn interrupted_at_most_once_dispatch_is_reconciled_silently() {
        let store = Arc::new(MemoryTaskRepository::new());
        let notifier = Arc::new(Recorder::default());
        let (dispatcher, _events) =
            dispatcher(store.clone(), notifier.clone(), DeliveryGuarantee::AtMostOnce);

        let task = store.create(NewTask::new(nine_am(), "x")).await.unwrap();
        // Crash between intent and commit.
        store.record_dispatch_intent(task.id, nine_am()).await.unwrap();

        assert_eq!(dispatcher.reconcile_intents().await.unwrap(), 1);
        let stored = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Delivered);
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_the_alert_wins_over_the_commit() {
        let store = Arc::new(MemoryTaskRepository::new());
        let notifier = Arc::new(CancelWhileAlerting {
            store: store.clone(),
        });
        let (dispatcher, mut events) =
            dispatcher(store.clone(), notifier, DeliveryGuarantee::AtLeastOnce);

        let task = store
            .create(NewTask::new(nine_am(), "x").with_repeat(Some(RepeatRule::Daily)))
            .await
            .unwrap();
        let report = dispatcher.deliver(&task, nine_am()).await.unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::LostRace);
        assert!(report.failures.is_empty());
        assert_eq!(
            store.get(task.id).await.unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
        // No successor for a cancelled series, and nothing announced.
        assert!(store.list(Some(TaskStatus::Pending)).await.unwrap().is_empty());
        assert!(events.try_recv().is_err());
    }
}
