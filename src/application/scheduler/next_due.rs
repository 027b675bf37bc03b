use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::task::Task;
use crate::domain::repositories::{StoreResult, TaskRepository};

/// What the execution loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Nothing pending.
    Idle,
    /// The task is due now (or overdue).
    Dispatch(Task),
    /// Sleep until the task is due.
    Wait { task: Task, wait: Duration },
}

/// Stateless: every answer is derived from the store, so a restarted host
/// computes exactly what the previous one would have.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TaskRepository>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskRepository>) -> Self {
        Self { store }
    }

    /// Pending task with the earliest effective due time, ties broken by lowest id.
    pub async fn next_due(&self) -> StoreResult<Option<Task>> {
        self.store.next_pending().await
    }

    /// `max(0, due - now)`; overdue tasks are due immediately.
    pub fn wait_until(task: &Task, now: DateTime<Utc>) -> Duration {
        (task.due_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub async fn plan(&self, now: DateTime<Utc>) -> StoreResult<Plan> {
        Ok(match self.next_due().await? {
            None => Plan::Idle,
            Some(task) => {
                let wait = Self::wait_until(&task, now);
                if wait.is_zero() {
                    Plan::Dispatch(task)
                } else {
                    Plan::Wait { task, wait }
                }
            }
        })
    }
}
