use anyhow::Result;

use super::context::AppContext;
use super::utils::format_local;
use crate::application::services::{SnoozeLength, SnoozeResult};

pub async fn run_snooze_task(ctx: &AppContext, id: u64, long: bool, secs: Option<i64>) -> Result<()> {
    let length = match (long, secs) {
        (_, Some(secs)) => SnoozeLength::Seconds(secs),
        (true, None) => SnoozeLength::Long,
        (false, None) => SnoozeLength::Short,
    };

    match ctx.service.snooze_task(id, length).await? {
        SnoozeResult::Postponed(task) => println!(
            "😴 Task #{} snoozed until {}",
            task.id,
            format_local(task.due_at(), &ctx.timezone)
        ),
        SnoozeResult::FollowUp(task) => println!(
            "😴 Task #{} already fired; follow-up #{} at {}",
            id,
            task.id,
            format_local(task.fire_at, &ctx.timezone)
        ),
    }
    Ok(())
}

pub async fn run_stop_alarm(ctx: &AppContext) -> Result<()> {
    if ctx.service.stop_alarm().await {
        println!("🔕 Alarm stopped");
    } else {
        println!("Host is not running; nothing to stop");
    }
    Ok(())
}
