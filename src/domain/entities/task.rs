use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::domain::repositories::task_repository::{StoreError, StoreResult};
use crate::domain::value_objects::repeat_rule::RepeatRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Delivered,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Delivered => "delivered",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "delivered" => Some(TaskStatus::Delivered),
            "cancelled" | "canceled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Delivered and cancelled tasks never change status again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra action performed when a task fires, next to the notification and audio cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    /// Set the desktop background to the given image.
    Wallpaper { image: PathBuf },
    /// Run an arbitrary program.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertOptions {
    /// Audio file played when the task fires; the configured default is used when empty.
    #[serde(default)]
    pub sound: Option<PathBuf>,
    /// Loop the audio until the alarm is stopped (or the configured cap is reached).
    #[serde(default)]
    pub keep_alarming: bool,
    #[serde(default)]
    pub side_effect: Option<SideEffect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub fire_at: DateTime<Utc>,
    pub message: String,
    pub status: TaskStatus,
    pub repeat_rule: Option<RepeatRule>,
    /// Postponement applied on top of `fire_at`; repeats are still derived from `fire_at`.
    pub snooze_secs: i64,
    pub alert: AlertOptions,
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    pub closed_at: Option<DateTime<Utc>>,
    /// Durable dispatch intent, only written in at-most-once mode.
    pub dispatch_started_at: Option<DateTime<Utc>>,
}

/// Caller-supplied fields of a task that does not exist yet; the store assigns id and status.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub fire_at: DateTime<Utc>,
    pub message: String,
    pub repeat_rule: Option<RepeatRule>,
    pub alert: AlertOptions,
}

impl NewTask {
    pub fn new(fire_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            fire_at: truncate_to_second(fire_at),
            message: message.into(),
            repeat_rule: None,
            alert: AlertOptions::default(),
        }
    }

    pub fn with_repeat(mut self, rule: Option<RepeatRule>) -> Self {
        self.repeat_rule = rule;
        self
    }

    pub fn with_alert(mut self, alert: AlertOptions) -> Self {
        self.alert = alert;
        self
    }
}

/// Partial update of a pending task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskEdit {
    pub fire_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    /// `Some(None)` removes the repeat rule.
    pub repeat_rule: Option<Option<RepeatRule>>,
    pub alert: Option<AlertOptions>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        self.fire_at.is_none()
            && self.message.is_none()
            && self.repeat_rule.is_none()
            && self.alert.is_none()
    }
}

impl Task {
    pub fn from_new(id: u64, new: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            fire_at: truncate_to_second(new.fire_at),
            message: new.message,
            status: TaskStatus::Pending,
            repeat_rule: new.repeat_rule,
            snooze_secs: 0,
            alert: new.alert,
            created_at: truncate_to_second(created_at),
            closed_at: None,
            dispatch_started_at: None,
        }
    }

    /// Effective due time: `fire_at` shifted by any snooze.
    /// Saturates at the end of the calendar, so an absurd snooze means "never due".
    pub fn due_at(&self) -> DateTime<Utc> {
        Duration::try_seconds(self.snooze_secs)
            .and_then(|offset| self.fire_at.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Snooze offset after postponing by `secs` more. `None` when the due time would overflow.
    pub fn snooze_offset_after(&self, secs: i64) -> Option<i64> {
        let total = self.snooze_secs.checked_add(secs)?;
        self.fire_at.checked_add_signed(Duration::try_seconds(total)?)?;
        Some(total)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.due_at() <= now
    }

    /// Fails with `InvalidTransition` unless the task is still pending.
    pub fn ensure_pending(&self, action: &'static str) -> StoreResult<()> {
        if self.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                action,
            });
        }
        Ok(())
    }

    /// The next occurrence of a repeating task, derived from `fire_at` (not the snoozed time).
    pub fn successor(&self) -> Option<NewTask> {
        let rule = self.repeat_rule.as_ref()?;
        let next = rule.next_after(self.fire_at)?;

        Some(NewTask {
            fire_at: next,
            message: self.message.clone(),
            repeat_rule: Some(rule.clone()),
            alert: self.alert.clone(),
        })
    }

    /// Applies an edit in place. Moving `fire_at` clears the snooze offset.
    pub fn apply_edit(&mut self, edit: TaskEdit) {
        if let Some(fire_at) = edit.fire_at {
            self.fire_at = truncate_to_second(fire_at);
            self.snooze_secs = 0;
        }
        if let Some(message) = edit.message {
            self.message = message;
        }
        if let Some(rule) = edit.repeat_rule {
            self.repeat_rule = rule;
        }
        if let Some(alert) = edit.alert {
            self.alert = alert;
        }
    }

    /// Ordering used by the scheduler: earliest effective due time, then lowest id.
    pub fn schedule_key(&self) -> (DateTime<Utc>, u64) {
        (self.due_at(), self.id)
    }
}

/// Timestamps are persisted with whole-second precision.
pub fn truncate_to_second(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn daily_successor_keeps_message_and_time_of_day() {
        let new = NewTask::new(at(2024, 1, 1, 9, 0), "Stretch").with_repeat(Some(RepeatRule::Daily));
        let task = Task::from_new(7, new, at(2023, 12, 31, 0, 0));

        let successor = task.successor().expect("daily task repeats");
        assert_eq!(successor.fire_at, at(2024, 1, 2, 9, 0));
        assert_eq!(successor.message, "Stretch");
        assert_eq!(successor.repeat_rule, Some(RepeatRule::Daily));
    }

    #[test]
    fn snooze_moves_due_time_but_not_the_series() {
        let new = NewTask::new(at(2024, 1, 1, 9, 0), "Stand up").with_repeat(Some(RepeatRule::Daily));
        let mut task = Task::from_new(1, new, at(2024, 1, 1, 0, 0));
        task.snooze_secs = 600;

        assert_eq!(task.due_at(), at(2024, 1, 1, 9, 10));
        assert_eq!(task.successor().unwrap().fire_at, at(2024, 1, 2, 9, 0));
    }

    #[test]
    fn oversized_snoozes_are_refused_instead_of_overflowing() {
        let mut task = Task::from_new(2, NewTask::new(at(2024, 1, 1, 9, 0), "nap"), at(2024, 1, 1, 0, 0));
        assert_eq!(task.snooze_offset_after(60), Some(60));
        assert_eq!(task.snooze_offset_after(i64::MAX), None);
        assert_eq!(task.snooze_offset_after(10_000_000_000_000), None);

        task.snooze_secs = i64::MAX;
        assert_eq!(task.due_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn terminal_tasks_reject_transitions() {
        let mut task = Task::from_new(3, NewTask::new(at(2024, 1, 1, 9, 0), "x"), at(2024, 1, 1, 0, 0));
        assert!(task.ensure_pending("cancel").is_ok());

        task.status = TaskStatus::Delivered;
        match task.ensure_pending("cancel") {
            Err(StoreError::InvalidTransition { id, from, .. }) => {
                assert_eq!(id, 3);
                assert_eq!(from, TaskStatus::Delivered);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn editing_fire_at_resets_snooze() {
        let mut task = Task::from_new(1, NewTask::new(at(2024, 1, 1, 9, 0), "x"), at(2024, 1, 1, 0, 0));
        task.snooze_secs = 120;
        task.apply_edit(TaskEdit {
            fire_at: Some(at(2024, 1, 3, 8, 0)),
            ..TaskEdit::default()
        });

        assert_eq!(task.snooze_secs, 0);
        assert_eq!(task.due_at(), at(2024, 1, 3, 8, 0));
    }
}
