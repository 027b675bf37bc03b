#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use bgtask::application::host::{ExecutionHost, HostSettings};
use bgtask::application::services::{AlertDispatcher, DispatchSettings};
use bgtask::domain::outputs::{Alert, AudioCue, Notifier, OutputError, SideEffectRunner};
use bgtask::domain::{
    Delivery, HostEvent, NewTask, SideEffect, StoreError, StoreResult, Task, TaskEdit, TaskRepository,
    TaskStatus,
};
use bgtask::domain::value_objects::DeliveryGuarantee;
use bgtask::infrastructure::repositories::SqliteTaskRepository;

pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
}

pub async fn open_store(dir: &Path) -> Arc<SqliteTaskRepository> {
    Arc::new(SqliteTaskRepository::open(dir.join("tasks.db")).await.unwrap())
}

/// Notifier that remembers which tasks it alerted for.
#[derive(Default)]
pub struct RecordingNotifier {
    alerted: Mutex<Vec<u64>>,
}

impl RecordingNotifier {
    pub fn alerted(&self) -> Vec<u64> {
        self.alerted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), OutputError> {
        self.alerted.lock().unwrap().push(alert.task_id);
        Ok(())
    }
}

pub struct Quiet;

#[async_trait]
impl AudioCue for Quiet {
    async fn start(&self, _task: &Task) -> Result<(), OutputError> {
        Ok(())
    }

    async fn stop(&self) {}
}

#[async_trait]
impl SideEffectRunner for Quiet {
    async fn run(&self, _effect: &SideEffect) -> Result<(), OutputError> {
        Ok(())
    }
}

pub fn host_settings(dir: &Path) -> HostSettings {
    HostSettings {
        lock_path: dir.join("host.lock"),
        liveness_path: dir.join("host.alive"),
        max_sleep: Duration::from_secs(300),
        heartbeat_interval: Duration::from_secs(60),
        history_retention: None,
        max_delivery_failures: 3,
    }
}

pub struct TestHost {
    pub host: ExecutionHost,
    pub notifier: Arc<RecordingNotifier>,
    pub events: broadcast::Receiver<HostEvent>,
}

pub fn build_host(
    store: Arc<dyn TaskRepository>,
    dir: &Path,
    guarantee: DeliveryGuarantee,
) -> TestHost {
    let (events_tx, events) = broadcast::channel(64);
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = Arc::new(AlertDispatcher::new(
        store.clone(),
        notifier.clone(),
        Arc::new(Quiet),
        Arc::new(Quiet),
        events_tx.clone(),
        DispatchSettings {
            guarantee,
            ..DispatchSettings::default()
        },
    ));
    let host = ExecutionHost::new(store, dispatcher, events_tx, host_settings(dir));

    TestHost {
        host,
        notifier,
        events,
    }
}

/// Waits for the next `TaskDelivered` event, ignoring status events.
pub async fn next_delivery(events: &mut broadcast::Receiver<HostEvent>, limit: Duration) -> Option<u64> {
    tokio::time::timeout(limit, async {
        loop {
            match events.recv().await {
                Ok(HostEvent::TaskDelivered { id }) => return Some(id),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Store whose first `next_pending` fails with a non-transient error; everything else
/// goes straight to the wrapped store.
pub struct FlakyStore {
    inner: Arc<dyn TaskRepository>,
    failed: AtomicBool,
    pending_lists: AtomicUsize,
    lists_at_failure: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn TaskRepository>) -> Self {
        Self {
            inner,
            failed: AtomicBool::new(false),
            pending_lists: AtomicUsize::new(0),
            lists_at_failure: AtomicUsize::new(0),
        }
    }

    /// Whether a host lifetime started (and listed pending tasks) after the failure.
    pub fn restarted_after_failure(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
            && self.pending_lists.load(Ordering::SeqCst) > self.lists_at_failure.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRepository for FlakyStore {
    async fn create(&self, task: NewTask) -> StoreResult<Task> {
        self.inner.create(task).await
    }

    async fn put(&self, task: Task) -> StoreResult<()> {
        self.inner.put(task).await
    }

    async fn get(&self, id: u64) -> StoreResult<Option<Task>> {
        self.inner.get(id).await
    }

    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        if status == Some(TaskStatus::Pending) {
            self.pending_lists.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.list(status).await
    }

    async fn next_pending(&self) -> StoreResult<Option<Task>> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            self.lists_at_failure
                .store(self.pending_lists.load(Ordering::SeqCst), Ordering::SeqCst);
            return Err(StoreError::Backend("disk I/O error".into()));
        }
        self.inner.next_pending().await
    }

    async fn mark_delivered(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Delivery> {
        self.inner.mark_delivered(id, at).await
    }

    async fn cancel(&self, id: u64) -> StoreResult<Task> {
        self.inner.cancel(id).await
    }

    async fn edit(&self, id: u64, edit: TaskEdit) -> StoreResult<Task> {
        self.inner.edit(id, edit).await
    }

    async fn snooze(&self, id: u64, secs: i64) -> StoreResult<Task> {
        self.inner.snooze(id, secs).await
    }

    async fn record_dispatch_intent(&self, id: u64, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.record_dispatch_intent(id, at).await
    }

    async fn quarantine(&self, id: u64) -> StoreResult<bool> {
        self.inner.quarantine(id).await
    }

    async fn purge_history(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        self.inner.purge_history(older_than).await
    }
}
