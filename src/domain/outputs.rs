use async_trait::async_trait;
use chrono_tz::Tz;
use thiserror::Error;

use crate::domain::entities::task::{SideEffect, Task};

/// A single alert output failed. Logged by the dispatcher, never fatal to delivery.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("notification failed: {0}")]
    Notification(String),

    #[error("audio cue failed: {0}")]
    Audio(String),

    #[error("side effect failed: {0}")]
    SideEffect(String),
}

/// What the user sees when a task fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub task_id: u64,
    pub title: String,
    pub body: String,
}

impl Alert {
    pub fn for_task(task: &Task, tz: &Tz) -> Self {
        let kind = match &task.repeat_rule {
            Some(rule) => format!("Recurring ({})", rule),
            None => "One-time".to_string(),
        };
        let when = task
            .fire_at
            .with_timezone(tz)
            .format("%A, %d - %B - %Y at %H:%M");

        Self {
            task_id: task.id,
            title: task.message.clone(),
            body: format!("#{} · {} · {}", task.id, kind, when),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), OutputError>;
}

/// Audio cue for a firing task. `start` returns once playback has been launched.
#[async_trait]
pub trait AudioCue: Send + Sync {
    async fn start(&self, task: &Task) -> Result<(), OutputError>;

    /// Silence whatever alarm is currently looping. No-op when idle.
    async fn stop(&self);
}

#[async_trait]
pub trait SideEffectRunner: Send + Sync {
    async fn run(&self, effect: &SideEffect) -> Result<(), OutputError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::task::NewTask;
    use crate::domain::value_objects::RepeatRule;
    use chrono::{TimeZone, Utc};

    #[test]
    fn alert_renders_in_the_display_zone() {
        let fire_at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let new = NewTask::new(fire_at, "Water plants").with_repeat(Some(RepeatRule::Daily));
        let task = Task::from_new(12, new, fire_at);

        let alert = Alert::for_task(&task, &chrono_tz::Europe::Madrid);
        assert_eq!(alert.title, "Water plants");
        assert_eq!(
            alert.body,
            "#12 · Recurring (daily) · Monday, 01 - January - 2024 at 10:00"
        );
    }
}
