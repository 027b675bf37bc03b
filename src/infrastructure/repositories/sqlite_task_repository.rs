use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info, warn};

use crate::domain::entities::task::{AlertOptions, NewTask, Task, TaskEdit, TaskStatus};
use crate::domain::repositories::{Delivery, StoreError, StoreResult, TaskRepository};
use crate::domain::value_objects::RepeatRule;
use crate::infrastructure::database::DatabaseManager;

const TASK_COLUMNS: &str = "id, fire_at, message, status, repeat_type, repeat_data, snooze_secs, \
                            alert_data, created_at, closed_at, dispatch_started_at";

/// Effective due time first, then id; matches `Task::schedule_key`.
const DUE_ORDER: &str = "ORDER BY fire_at + snooze_secs ASC, id ASC";

pub struct SqliteTaskRepository {
    db: DatabaseManager,
}

impl SqliteTaskRepository {
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }

    /// Opens (or creates) the store at `path` and makes sure the schema exists.
    pub async fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let db = DatabaseManager::new(path)?;
        db.initialize_database().await?;
        Ok(Self::new(db))
    }
}

/// Raw column values; kept synchronous because it is read inside spawn_blocking.
struct TaskRow {
    id: i64,
    fire_at: i64,
    message: String,
    status: String,
    repeat_type: Option<String>,
    repeat_data: Option<String>,
    snooze_secs: i64,
    alert_data: String,
    created_at: i64,
    closed_at: Option<i64>,
    dispatch_started_at: Option<i64>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            fire_at: row.get("fire_at")?,
            message: row.get("message")?,
            status: row.get("status")?,
            repeat_type: row.get("repeat_type")?,
            repeat_data: row.get("repeat_data")?,
            snooze_secs: row.get("snooze_secs")?,
            alert_data: row.get("alert_data")?,
            created_at: row.get("created_at")?,
            closed_at: row.get("closed_at")?,
            dispatch_started_at: row.get("dispatch_started_at")?,
        })
    }

    fn into_task(self) -> StoreResult<Task> {
        let id = self.id as u64;
        self.decode()
            .map_err(|reason| StoreError::CorruptTask { id, reason })
    }

    fn decode(self) -> Result<Task, String> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| format!("unknown status '{}'", self.status))?;

        let repeat_rule = match (self.repeat_type.as_deref(), self.repeat_data) {
            (None, _) => None,
            (Some(tag), Some(json)) => {
                let rule: RepeatRule =
                    serde_json::from_str(&json).map_err(|e| format!("repeat rule: {}", e))?;
                if rule.type_tag() != tag {
                    return Err(format!("repeat type '{}' does not match its data", tag));
                }
                Some(rule)
            }
            (Some(tag), None) => return Err(format!("repeat type '{}' without data", tag)),
        };

        let alert: AlertOptions =
            serde_json::from_str(&self.alert_data).map_err(|e| format!("alert options: {}", e))?;

        Ok(Task {
            id: self.id as u64,
            fire_at: from_unix(self.fire_at)?,
            message: self.message,
            status,
            repeat_rule,
            snooze_secs: self.snooze_secs,
            alert,
            created_at: from_unix(self.created_at)?,
            closed_at: self.closed_at.map(from_unix).transpose()?,
            dispatch_started_at: self.dispatch_started_at.map(from_unix).transpose()?,
        })
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| format!("timestamp {} out of range", secs))
}

fn encode_repeat(rule: &Option<RepeatRule>) -> StoreResult<(Option<&'static str>, Option<String>)> {
    match rule {
        Some(rule) => {
            let json = serde_json::to_string(rule)
                .map_err(|e| StoreError::InvalidData(format!("repeat rule: {}", e)))?;
            Ok((Some(rule.type_tag()), Some(json)))
        }
        None => Ok((None, None)),
    }
}

fn encode_alert(alert: &AlertOptions) -> StoreResult<String> {
    serde_json::to_string(alert).map_err(|e| StoreError::InvalidData(format!("alert options: {}", e)))
}

fn load(conn: &Connection, id: u64) -> StoreResult<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    conn.query_row(&sql, params![id as i64], TaskRow::from_row)
        .optional()?
        .map(TaskRow::into_task)
        .transpose()
}

fn load_pending(conn: &Connection, id: u64, action: &'static str) -> StoreResult<Task> {
    let task = load(conn, id)?.ok_or(StoreError::NotFound(id))?;
    task.ensure_pending(action)?;
    Ok(task)
}

fn insert(conn: &Connection, new: NewTask, created_at: DateTime<Utc>) -> StoreResult<Task> {
    let (repeat_type, repeat_data) = encode_repeat(&new.repeat_rule)?;
    let alert_data = encode_alert(&new.alert)?;

    conn.execute(
        "INSERT INTO tasks (fire_at, message, status, repeat_type, repeat_data, snooze_secs, alert_data, created_at)
         VALUES (?1, ?2, 'pending', ?3, ?4, 0, ?5, ?6)",
        params![
            new.fire_at.timestamp(),
            new.message,
            repeat_type,
            repeat_data,
            alert_data,
            created_at.timestamp(),
        ],
    )?;
    let id = conn.last_insert_rowid() as u64;

    Ok(Task::from_new(id, new, created_at))
}

/// Inserts a complete record under its own id.
fn insert_full(conn: &Connection, task: &Task) -> StoreResult<()> {
    let (repeat_type, repeat_data) = encode_repeat(&task.repeat_rule)?;
    let alert_data = encode_alert(&task.alert)?;

    conn.execute(
        "INSERT INTO tasks (id, fire_at, message, status, repeat_type, repeat_data,
                            snooze_secs, alert_data, created_at, closed_at, dispatch_started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            task.id as i64,
            task.fire_at.timestamp(),
            task.message,
            task.status.as_str(),
            repeat_type,
            repeat_data,
            task.snooze_secs,
            alert_data,
            task.created_at.timestamp(),
            task.closed_at.map(|t| t.timestamp()),
            task.dispatch_started_at.map(|t| t.timestamp()),
        ],
    )?;
    Ok(())
}

/// Rewrites every mutable column of an existing row.
fn update(conn: &Connection, task: &Task) -> StoreResult<()> {
    let (repeat_type, repeat_data) = encode_repeat(&task.repeat_rule)?;
    let alert_data = encode_alert(&task.alert)?;

    conn.execute(
        "UPDATE tasks SET fire_at = ?2, message = ?3, repeat_type = ?4, repeat_data = ?5,
                snooze_secs = ?6, alert_data = ?7
         WHERE id = ?1 AND status = 'pending'",
        params![
            task.id as i64,
            task.fire_at.timestamp(),
            task.message,
            repeat_type,
            repeat_data,
            task.snooze_secs,
            alert_data,
        ],
    )?;
    Ok(())
}

fn query_tasks(conn: &Connection, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
    let rows = match status {
        Some(status) => {
            let sql = format!("SELECT {} FROM tasks WHERE status = ?1 {}", TASK_COLUMNS, DUE_ORDER);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![status.as_str()], TaskRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let sql = format!("SELECT {} FROM tasks {}", TASK_COLUMNS, DUE_ORDER);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([], TaskRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };

    rows.into_iter().map(TaskRow::into_task).collect()
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: NewTask) -> StoreResult<Task> {
        let created = self
            .db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let created = insert(&tx, task, Utc::now())?;
                tx.commit()?;
                Ok(created)
            })
            .await?;

        debug!("Stored task {} due at {}", created.id, created.fire_at);
        Ok(created)
    }

    async fn put(&self, task: Task) -> StoreResult<()> {
        self.db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                match load(&tx, task.id)? {
                    None => insert_full(&tx, &task)?,
                    Some(existing) => {
                        if existing.status.is_terminal() || existing.status != task.status {
                            return Err(StoreError::InvalidTransition {
                                id: task.id,
                                from: existing.status,
                                action: "overwrite",
                            });
                        }
                        update(&tx, &task)?;
                        tx.execute(
                            "UPDATE tasks SET dispatch_started_at = ?2 WHERE id = ?1",
                            params![task.id as i64, task.dispatch_started_at.map(|t| t.timestamp())],
                        )?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn get(&self, id: u64) -> StoreResult<Option<Task>> {
        self.db.execute_blocking(move |conn| load(conn, id)).await
    }

    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        self.db
            .execute_blocking(move |conn| query_tasks(conn, status))
            .await
    }

    async fn next_pending(&self) -> StoreResult<Option<Task>> {
        self.db
            .execute_blocking(|conn| {
                let sql = format!(
                    "SELECT {} FROM tasks WHERE status = 'pending' {} LIMIT 1",
                    TASK_COLUMNS, DUE_ORDER
                );
                conn.query_row(&sql, [], TaskRow::from_row)
                    .optional()?
                    .map(TaskRow::into_task)
                    .transpose()
            })
            .await
    }

    async fn mark_delivered(&self, id: u64, at: DateTime<Utc>) -> StoreResult<Delivery> {
        let delivery = self
            .db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut task = load_pending(&tx, id, "deliver")?;

                let changed = tx.execute(
                    "UPDATE tasks SET status = 'delivered', closed_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![id as i64, at.timestamp()],
                )?;
                if changed == 0 {
                    return Err(StoreError::Backend(format!(
                        "task {} changed while being delivered",
                        id
                    )));
                }
                task.status = TaskStatus::Delivered;
                task.closed_at = Some(at);

                let successor = match task.successor() {
                    Some(next) => Some(insert(&tx, next, at)?),
                    None => {
                        if let Some(rule) = &task.repeat_rule {
                            warn!("Task {} ({}) has no next occurrence; the series ends here", id, rule);
                        }
                        None
                    }
                };

                tx.commit()?;
                Ok(Delivery {
                    delivered: task,
                    successor,
                })
            })
            .await?;

        if let Some(next) = &delivery.successor {
            info!(
                "Task {} delivered; next occurrence is task {} at {}",
                id, next.id, next.fire_at
            );
        } else {
            debug!("Task {} delivered", id);
        }
        Ok(delivery)
    }

    async fn cancel(&self, id: u64) -> StoreResult<Task> {
        self.db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut task = load_pending(&tx, id, "cancel")?;
                let now = Utc::now();

                tx.execute(
                    "UPDATE tasks SET status = 'cancelled', closed_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![id as i64, now.timestamp()],
                )?;
                tx.commit()?;

                task.status = TaskStatus::Cancelled;
                task.closed_at = Some(crate::domain::entities::task::truncate_to_second(now));
                Ok(task)
            })
            .await
    }

    async fn edit(&self, id: u64, edit: TaskEdit) -> StoreResult<Task> {
        self.db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut task = load_pending(&tx, id, "edit")?;
                task.apply_edit(edit);
                update(&tx, &task)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    async fn snooze(&self, id: u64, secs: i64) -> StoreResult<Task> {
        self.db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut task = load_pending(&tx, id, "snooze")?;
                task.snooze_secs = task.snooze_offset_after(secs).ok_or_else(|| {
                    StoreError::InvalidData(format!("snoozing task {} by {}s overflows its due time", id, secs))
                })?;
                update(&tx, &task)?;
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    async fn record_dispatch_intent(&self, id: u64, at: DateTime<Utc>) -> StoreResult<()> {
        self.db
            .execute_blocking(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                load_pending(&tx, id, "dispatch")?;
                tx.execute(
                    "UPDATE tasks SET dispatch_started_at = ?2 WHERE id = ?1",
                    params![id as i64, at.timestamp()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn quarantine(&self, id: u64) -> StoreResult<bool> {
        self.db
            .execute_blocking(move |conn| {
                let changed = conn.execute(
                    "UPDATE tasks SET status = 'cancelled', closed_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![id as i64, Utc::now().timestamp()],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn purge_history(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        self.db
            .execute_blocking(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM tasks
                     WHERE status != 'pending' AND COALESCE(closed_at, created_at) < ?1",
                    params![older_than.timestamp()],
                )?;
                Ok(removed)
            })
            .await
    }
}
