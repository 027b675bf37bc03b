use anyhow::{Result, anyhow};
use chrono::Utc;

use super::context::AppContext;
use super::utils::{describe_repeat, format_local, format_time_remaining};
use crate::domain::entities::task::{Task, TaskStatus};

pub async fn run_list_tasks(ctx: &AppContext, all: bool, status: Option<String>) -> Result<()> {
    let filter = match (all, status) {
        (true, _) => None,
        (false, Some(s)) => Some(TaskStatus::parse(&s).ok_or_else(|| anyhow!("Unknown status '{}'", s))?),
        (false, None) => Some(TaskStatus::Pending),
    };

    let tasks = ctx.service.list_tasks(filter).await?;
    if tasks.is_empty() {
        println!("📭 No tasks");
        return Ok(());
    }

    let now = Utc::now();
    for task in &tasks {
        println!("{}", render_line(ctx, task, now));
    }
    Ok(())
}

fn render_line(ctx: &AppContext, task: &Task, now: chrono::DateTime<Utc>) -> String {
    let when = format_local(task.due_at(), &ctx.timezone);
    let state = match task.status {
        TaskStatus::Pending => format_time_remaining(task.due_at(), now),
        other => other.to_string(),
    };
    let repeat = task
        .repeat_rule
        .as_ref()
        .map(|rule| format!(" [{}]", describe_repeat(rule, task.fire_at, &ctx.timezone)))
        .unwrap_or_default();
    let snoozed = if task.snooze_secs > 0 { " (snoozed)" } else { "" };

    format!(
        "#{:<5} {}  {:<18} {}{}{}",
        task.id, when, state, task.message, repeat, snoozed
    )
}
