use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::entities::task::{NewTask, Task, TaskEdit, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(u64),

    #[error("cannot {action} task {id}: it is already {from}")]
    InvalidTransition {
        id: u64,
        from: TaskStatus,
        action: &'static str,
    },

    /// Busy, locked or I/O failure. Safe to retry.
    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid task data: {0}")]
    InvalidData(String),

    /// A stored row that no longer decodes into a task.
    #[error("task {id} is unreadable: {reason}")]
    CorruptTask { id: u64, reason: String },

    #[error("task store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::StoreUnavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a committed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivered: Task,
    /// Next occurrence of a repeating task, inserted in the same transaction.
    pub successor: Option<Task>,
}

/// Durable task storage, the single source of truth shared by the host and the UI.
///
/// Every mutation is committed before the call returns. Status transitions are
/// conditional on the task still being pending, so racing writers resolve to
/// exactly one winner and the loser gets `InvalidTransition`.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new pending task and return it with its assigned id.
    async fn create(&self, task: NewTask) -> StoreResult<Task>;

    /// Insert a full record, or rewrite an existing one by id.
    ///
    /// Never changes the status of an existing task: rewriting a terminal task, or
    /// a pending one with a different status, fails with `InvalidTransition`.
    async fn put(&self, task: Task) -> StoreResult<()>;

    async fn get(&self, id: u64) -> StoreResult<Option<Task>>;

    /// Tasks ordered by effective due time, then id. `None` lists every status.
    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>>;

    /// Pending task with the earliest effective due time, ties by lowest id.
    async fn next_pending(&self) -> StoreResult<Option<Task>>;

    /// `pending → delivered`, inserting the repeat successor atomically.
    async fn mark_delivered(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Delivery>;

    /// `pending → cancelled`.
    async fn cancel(&self, id: u64) -> StoreResult<Task>;

    async fn edit(&self, id: u64, edit: TaskEdit) -> StoreResult<Task>;

    /// Push the effective due time of a pending task back by `secs`.
    async fn snooze(&self, id: u64, secs: i64) -> StoreResult<Task>;

    /// Durable "about to alert" marker used by at-most-once delivery.
    async fn record_dispatch_intent(&self, id: u64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Cancels a pending task without decoding it, taking an unreadable or undeliverable
    /// row out of scheduling. Returns whether the row was still pending.
    async fn quarantine(&self, id: u64) -> StoreResult<bool>;

    /// Delete delivered and cancelled tasks closed before `older_than`. Returns how many went.
    async fn purge_history(&self, older_than: DateTime<Utc>) -> StoreResult<usize>;
}
