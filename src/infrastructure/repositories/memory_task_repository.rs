use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::domain::entities::task::{NewTask, Task, TaskEdit, TaskStatus, truncate_to_second};
use crate::domain::repositories::{Delivery, StoreError, StoreResult, TaskRepository};

#[derive(Debug, Default)]
struct Inner {
    tasks: BTreeMap<u64, Task>,
    last_id: u64,
}

impl Inner {
    fn insert(&mut self, new: NewTask, created_at: DateTime<Utc>) -> Task {
        self.last_id += 1;
        let task = Task::from_new(self.last_id, new, created_at);
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn pending_mut(&mut self, id: u64, action: &'static str) -> StoreResult<&mut Task> {
        let task = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.ensure_pending(action)?;
        Ok(task)
    }
}

/// In-memory implementation of TaskRepository with the same transition rules as the SQLite store.
#[derive(Debug, Default)]
pub struct MemoryTaskRepository {
    inner: Mutex<Inner>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: NewTask) -> StoreResult<Task> {
        let mut inner = self.inner.lock().await;
        Ok(inner.insert(task, Utc::now()))
    }

    async fn put(&self, task: Task) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.tasks.get(&task.id) {
            if existing.status.is_terminal() || existing.status != task.status {
                return Err(StoreError::InvalidTransition {
                    id: task.id,
                    from: existing.status,
                    action: "overwrite",
                });
            }
        }
        inner.last_id = inner.last_id.max(task.id);
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: u64) -> StoreResult<Option<Task>> {
        Ok(self.inner.lock().await.tasks.get(&id).cloned())
    }

    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(Task::schedule_key);
        Ok(tasks)
    }

    async fn next_pending(&self) -> StoreResult<Option<Task>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| t.schedule_key())
            .cloned())
    }

    async fn mark_delivered(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Delivery> {
        let mut inner = self.inner.lock().await;
        let task = inner.pending_mut(id, "deliver")?;
        task.status = TaskStatus::Delivered;
        task.closed_at = Some(truncate_to_second(at));
        let delivered = task.clone();

        let successor = delivered.successor().map(|next| inner.insert(next, at));
        Ok(Delivery {
            delivered,
            successor,
        })
    }

    async fn cancel(&self, id: u64) -> StoreResult<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.pending_mut(id, "cancel")?;
        task.status = TaskStatus::Cancelled;
        task.closed_at = Some(truncate_to_second(Utc::now()));
        Ok(task.clone())
    }

    async fn edit(&self, id: u64, edit: TaskEdit) -> StoreResult<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.pending_mut(id, "edit")?;
        task.apply_edit(edit);
        Ok(task.clone())
    }

    async fn snooze(&self, id: u64, secs: i64) -> StoreResult<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.pending_mut(id, "snooze")?;
        task.snooze_secs = task.snooze_offset_after(secs).ok_or_else(|| {
            StoreError::InvalidData(format!("snoozing task {} by {}s overflows its due time", id, secs))
        })?;
        Ok(task.clone())
    }

    async fn record_dispatch_intent(&self, id: u64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let task = inner.pending_mut(id, "dispatch")?;
        task.dispatch_started_at = Some(truncate_to_second(at));
        Ok(())
    }

    async fn quarantine(&self, id: u64) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.closed_at = Some(truncate_to_second(Utc::now()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_history(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.tasks.len();
        inner.tasks.retain(|_, t| {
            !t.status.is_terminal() || t.closed_at.unwrap_or(t.created_at) >= older_than
        });
        Ok(before - inner.tasks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::RepeatRule;
    use chrono::{Duration, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn delivering_a_repeating_task_creates_its_successor() {
        let repo = MemoryTaskRepository::new();
        let task = repo
            .create(NewTask::new(at(1, 9), "Pills").with_repeat(Some(RepeatRule::EveryXDays { interval: 2 })))
            .await
            .unwrap();

        let delivery = repo.mark_delivered(task.id, at(1, 9)).await.unwrap();
        let successor = delivery.successor.unwrap();

        assert_eq!(successor.fire_at, at(3, 9));
        assert_eq!(successor.status, TaskStatus::Pending);
        assert_ne!(successor.id, task.id);
        assert_eq!(repo.list(Some(TaskStatus::Pending)).await.unwrap(), vec![successor]);
    }

    #[tokio::test]
    async fn purge_keeps_pending_and_recent_history() {
        let repo = MemoryTaskRepository::new();
        let old = repo.create(NewTask::new(at(1, 9), "old")).await.unwrap();
        let pending = repo.create(NewTask::new(at(1, 9), "pending")).await.unwrap();
        repo.mark_delivered(old.id, at(1, 9)).await.unwrap();

        let removed = repo.purge_history(at(1, 9) + Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(old.id).await.unwrap().is_none());
        assert!(repo.get(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_never_rewrites_a_closed_task() {
        let repo = MemoryTaskRepository::new();
        let task = repo.create(NewTask::new(at(1, 9), "once")).await.unwrap();
        let stale = task.clone();
        repo.mark_delivered(task.id, at(1, 9)).await.unwrap();

        assert!(matches!(
            repo.put(stale).await,
            Err(StoreError::InvalidTransition { from: TaskStatus::Delivered, .. })
        ));
        assert_eq!(repo.get(task.id).await.unwrap().unwrap().status, TaskStatus::Delivered);
    }

    #[tokio::test]
    async fn quarantine_only_touches_pending_tasks() {
        let repo = MemoryTaskRepository::new();
        let task = repo.create(NewTask::new(at(1, 9), "stuck")).await.unwrap();

        assert!(repo.quarantine(task.id).await.unwrap());
        assert!(!repo.quarantine(task.id).await.unwrap());
        assert!(!repo.quarantine(404).await.unwrap());
        assert_eq!(repo.get(task.id).await.unwrap().unwrap().status, TaskStatus::Cancelled);
    }
}
