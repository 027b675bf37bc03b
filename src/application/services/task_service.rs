use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::retry::{RetryPolicy, with_store_retry};
use crate::domain::entities::task::{AlertOptions, NewTask, Task, TaskEdit, TaskStatus};
use crate::domain::entities::{HintSender, UiMessage};
use crate::domain::repositories::{StoreError, TaskRepository};
use crate::domain::value_objects::RepeatRule;

/// Snoozes that would land this close to another pending task are pushed further back.
const SNOOZE_COLLISION_WINDOW_SECS: i64 = 1;
const SNOOZE_COLLISION_STEP_SECS: i64 = 10;

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TaskServiceResult<T> = Result<T, TaskServiceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeLength {
    Short,
    Long,
    Seconds(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnoozeResult {
    /// The pending task was pushed back.
    Postponed(Task),
    /// The task had already fired; a one-shot follow-up was created.
    FollowUp(Task),
}

#[derive(Debug, Clone)]
pub struct TaskServiceSettings {
    pub short_snooze_secs: i64,
    pub long_snooze_secs: i64,
    /// How far in the past a new task's time may lie before it is rejected.
    pub past_grace: Duration,
}

impl Default for TaskServiceSettings {
    fn default() -> Self {
        Self {
            short_snooze_secs: 60,
            long_snooze_secs: 3600,
            past_grace: Duration::seconds(60),
        }
    }
}

/// UI-facing API. Every mutation goes through the store first, then wakes the host.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskRepository>,
    hints: Arc<dyn HintSender>,
    settings: TaskServiceSettings,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskRepository>,
        hints: Arc<dyn HintSender>,
        settings: TaskServiceSettings,
    ) -> Self {
        Self {
            store,
            hints,
            settings,
        }
    }

    // === QUERIES ===

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> TaskServiceResult<Vec<Task>> {
        Ok(with_store_retry(RetryPolicy::store(), "listing tasks", || self.store.list(status)).await?)
    }

    pub async fn get_task(&self, id: u64) -> TaskServiceResult<Task> {
        with_store_retry(RetryPolicy::store(), "reading task", || self.store.get(id))
            .await?
            .ok_or(TaskServiceError::Store(StoreError::NotFound(id)))
    }

    // === MUTATIONS ===

    pub async fn create_task(
        &self,
        fire_at: DateTime<Utc>,
        message: &str,
        repeat_rule: Option<RepeatRule>,
        alert: Option<AlertOptions>,
    ) -> TaskServiceResult<Task> {
        let message = validate_message(message)?;
        if fire_at < Utc::now() - self.settings.past_grace {
            return Err(TaskServiceError::InvalidInput(
                "Cannot create a task in the past".to_string(),
            ));
        }
        if let Some(rule) = &repeat_rule {
            rule.validate().map_err(TaskServiceError::InvalidInput)?;
        }

        let new = NewTask::new(fire_at, message)
            .with_repeat(repeat_rule)
            .with_alert(alert.unwrap_or_default());
        let task = with_store_retry(RetryPolicy::store(), "creating task", || {
            self.store.create(new.clone())
        })
        .await?;

        info!("Task {} created for {}", task.id, task.fire_at);
        self.hint(UiMessage::TaskCreated { id: task.id }).await;
        Ok(task)
    }

    pub async fn cancel_task(&self, id: u64) -> TaskServiceResult<Task> {
        let task = with_store_retry(RetryPolicy::store(), "cancelling task", || self.store.cancel(id))
            .await?;

        info!("Task {} cancelled", id);
        self.hint(UiMessage::TaskCancelled { id }).await;
        Ok(task)
    }

    pub async fn edit_task(&self, id: u64, edit: TaskEdit) -> TaskServiceResult<Task> {
        if edit.is_empty() {
            return Err(TaskServiceError::InvalidInput("Nothing to change".to_string()));
        }
        let mut edit = edit;
        if let Some(message) = &edit.message {
            edit.message = Some(validate_message(message)?);
        }
        if let Some(Some(rule)) = &edit.repeat_rule {
            rule.validate().map_err(TaskServiceError::InvalidInput)?;
        }

        let task = with_store_retry(RetryPolicy::store(), "editing task", || {
            self.store.edit(id, edit.clone())
        })
        .await?;

        info!("Task {} edited; due at {}", id, task.due_at());
        self.hint(UiMessage::TaskEdited { id }).await;
        Ok(task)
    }

    /// Postpones a pending task, or schedules a one-shot follow-up for one that already fired.
    pub async fn snooze_task(&self, id: u64, length: SnoozeLength) -> TaskServiceResult<SnoozeResult> {
        let secs = match length {
            SnoozeLength::Short => self.settings.short_snooze_secs,
            SnoozeLength::Long => self.settings.long_snooze_secs,
            SnoozeLength::Seconds(secs) => secs,
        };
        if secs <= 0 {
            return Err(TaskServiceError::InvalidInput(
                "Snooze length must be positive".to_string(),
            ));
        }

        let task = self.get_task(id).await?;
        match task.status {
            TaskStatus::Pending => {
                let target = later(task.due_at(), secs)?;
                let extra = self.collision_offset(id, target).await?;
                let total = secs
                    .checked_add(extra)
                    .filter(|total| task.snooze_offset_after(*total).is_some())
                    .ok_or_else(|| out_of_range(secs))?;
                let snoozed = with_store_retry(RetryPolicy::store(), "snoozing task", || {
                    self.store.snooze(id, total)
                })
                .await?;

                info!("Task {} snoozed until {}", id, snoozed.due_at());
                self.hint(UiMessage::TaskEdited { id }).await;
                Ok(SnoozeResult::Postponed(snoozed))
            }
            TaskStatus::Delivered => {
                let target = later(Utc::now(), secs)?;
                let extra = self.collision_offset(id, target).await?;
                let new = NewTask::new(later(target, extra)?, task.message.clone())
                    .with_alert(task.alert.clone());
                let follow_up = with_store_retry(RetryPolicy::store(), "creating follow-up", || {
                    self.store.create(new.clone())
                })
                .await?;

                info!("Task {} snoozed as follow-up {} at {}", id, follow_up.id, follow_up.fire_at);
                self.hint(UiMessage::TaskCreated { id: follow_up.id }).await;
                Ok(SnoozeResult::FollowUp(follow_up))
            }
            TaskStatus::Cancelled => Err(StoreError::InvalidTransition {
                id,
                from: task.status,
                action: "snooze",
            }
            .into()),
        }
    }

    /// Silences a looping alarm on the host.
    pub async fn stop_alarm(&self) -> bool {
        self.hints.send_hint(UiMessage::StopAlarm).await
    }

    /// Extra seconds that keep `target` clear of every other pending task's due time.
    async fn collision_offset(&self, id: u64, target: DateTime<Utc>) -> TaskServiceResult<i64> {
        let others: Vec<DateTime<Utc>> = self
            .list_tasks(Some(TaskStatus::Pending))
            .await?
            .into_iter()
            .filter(|t| t.id != id)
            .map(|t| t.due_at())
            .collect();

        let mut extra = 0;
        loop {
            let candidate = later(target, extra)?;
            let collides = others.iter().any(|due| {
                (*due - candidate).num_seconds().abs() <= SNOOZE_COLLISION_WINDOW_SECS
            });
            if !collides {
                return Ok(extra);
            }
            extra += SNOOZE_COLLISION_STEP_SECS;
        }
    }

    async fn hint(&self, message: UiMessage) {
        if !self.hints.send_hint(message.clone()).await {
            debug!("Hint {:?} not delivered; the host will pick the change up on its next pass", message);
        }
    }
}

/// `at` pushed back by `secs`, or `InvalidInput` when that leaves the calendar.
fn later(at: DateTime<Utc>, secs: i64) -> TaskServiceResult<DateTime<Utc>> {
    Duration::try_seconds(secs)
        .and_then(|offset| at.checked_add_signed(offset))
        .ok_or_else(|| out_of_range(secs))
}

fn out_of_range(secs: i64) -> TaskServiceError {
    TaskServiceError::InvalidInput(format!("Snoozing by {}s is out of range", secs))
}

fn validate_message(message: &str) -> TaskServiceResult<String> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(TaskServiceError::InvalidInput(
            "Task message cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::MemoryTaskRepository;
    use tokio::sync::mpsc;

    fn service() -> (TaskService, Arc<MemoryTaskRepository>, mpsc::UnboundedReceiver<UiMessage>) {
        let store = Arc::new(MemoryTaskRepository::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let service = TaskService::new(store.clone(), Arc::new(tx), TaskServiceSettings::default());
        (service, store, rx)
    }

    #[tokio::test]
    async fn create_validates_and_hints() {
        let (service, _store, mut hints) = service();
        let soon = Utc::now() + Duration::minutes(5);

        assert!(matches!(
            service.create_task(soon, "   ", None, None).await,
            Err(TaskServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            service
                .create_task(Utc::now() - Duration::hours(1), "late", None, None)
                .await,
            Err(TaskServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            service
                .create_task(soon, "x", Some(RepeatRule::EveryXDays { interval: 0 }), None)
                .await,
            Err(TaskServiceError::InvalidInput(_))
        ));

        let task = service.create_task(soon, "  Stretch ", None, None).await.unwrap();
        assert_eq!(task.message, "Stretch");
        assert_eq!(hints.try_recv().unwrap(), UiMessage::TaskCreated { id: task.id });
    }

    #[tokio::test]
    async fn snooze_steps_around_other_tasks() {
        let (service, store, _hints) = service();
        let base = Utc::now() + Duration::minutes(10);
        let a = store.create(NewTask::new(base, "A")).await.unwrap();
        store
            .create(NewTask::new(a.fire_at + Duration::seconds(60), "B"))
            .await
            .unwrap();

        let SnoozeResult::Postponed(snoozed) =
            service.snooze_task(a.id, SnoozeLength::Short).await.unwrap()
        else {
            panic!("pending task should be postponed");
        };
        assert_eq!(snoozed.snooze_secs, 70);
    }

    #[tokio::test]
    async fn snoozing_a_fired_task_creates_a_follow_up() {
        let (service, store, mut hints) = service();
        let task = store.create(NewTask::new(Utc::now(), "Tea")).await.unwrap();
        store.mark_delivered(task.id, Utc::now()).await.unwrap();

        let SnoozeResult::FollowUp(follow_up) =
            service.snooze_task(task.id, SnoozeLength::Long).await.unwrap()
        else {
            panic!("delivered task should get a follow-up");
        };
        assert_eq!(follow_up.message, "Tea");
        assert_eq!(follow_up.repeat_rule, None);
        assert!(follow_up.fire_at > Utc::now() + Duration::minutes(59));
        assert_eq!(
            hints.try_recv().unwrap(),
            UiMessage::TaskCreated { id: follow_up.id }
        );
    }

    #[tokio::test]
    async fn cancelled_tasks_cannot_be_snoozed_or_edited() {
        let (service, store, _hints) = service();
        let task = store
            .create(NewTask::new(Utc::now() + Duration::hours(1), "x"))
            .await
            .unwrap();
        service.cancel_task(task.id).await.unwrap();

        assert!(matches!(
            service.snooze_task(task.id, SnoozeLength::Short).await,
            Err(TaskServiceError::Store(StoreError::InvalidTransition { .. }))
        ));
        let edit = TaskEdit {
            message: Some("y".into()),
            ..TaskEdit::default()
        };
        assert!(matches!(
            service.edit_task(task.id, edit).await,
            Err(TaskServiceError::Store(StoreError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn hints_are_best_effort() {
        let store = Arc::new(MemoryTaskRepository::new());
        let (tx, rx) = mpsc::unbounded_channel::<UiMessage>();
        drop(rx);
        let service = TaskService::new(store, Arc::new(tx), TaskServiceSettings::default());

        let task = service
            .create_task(Utc::now() + Duration::hours(1), "still stored", None, None)
            .await
            .unwrap();
        assert_eq!(service.get_task(task.id).await.unwrap().message, "still stored");
        assert!(!service.stop_alarm().await);
    }

    #[tokio::test]
    async fn absurd_snooze_lengths_are_invalid_input() {
        let (service, store, _hints) = service();
        let task = store
            .create(NewTask::new(Utc::now() + Duration::hours(1), "x"))
            .await
            .unwrap();

        for secs in [10_000_000_000_000, i64::MAX] {
            assert!(matches!(
                service.snooze_task(task.id, SnoozeLength::Seconds(secs)).await,
                Err(TaskServiceError::InvalidInput(_))
            ));
        }
        assert_eq!(store.get(task.id).await.unwrap().unwrap().snooze_secs, 0);

        store.mark_delivered(task.id, Utc::now()).await.unwrap();
        assert!(matches!(
            service.snooze_task(task.id, SnoozeLength::Seconds(i64::MAX)).await,
            Err(TaskServiceError::InvalidInput(_))
        ));
    }
}
