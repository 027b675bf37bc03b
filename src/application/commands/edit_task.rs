use anyhow::{Result, anyhow};
use chrono::Utc;

use super::context::{AppContext, alert_options};
use super::utils::repeat_parser::weekly_in_utc;
use super::utils::{format_local, parse_repeat, parse_when};
use super::EditArgs;
use crate::domain::entities::task::TaskEdit;

pub async fn run_edit_task(ctx: &AppContext, args: EditArgs) -> Result<()> {
    let current = ctx.service.get_task(args.id).await?;

    let fire_at = args
        .when
        .as_deref()
        .map(|when| parse_when(when, &ctx.timezone, Utc::now()))
        .transpose()
        .map_err(|e| anyhow!(e))?;
    let anchor = fire_at.unwrap_or(current.fire_at);

    let repeat_rule = if args.no_repeat {
        Some(None)
    } else {
        args.repeat
            .as_deref()
            .map(parse_repeat)
            .transpose()
            .map_err(|e| anyhow!(e))?
            .map(|rule| Some(weekly_in_utc(rule, anchor, &ctx.timezone)))
    };

    let edit = TaskEdit {
        fire_at,
        message: args.message,
        repeat_rule,
        alert: args.alert.is_set().then(|| alert_options(&args.alert)),
    };

    let task = ctx.service.edit_task(args.id, edit).await?;
    println!(
        "✏️ Task #{} now fires {}: {}",
        task.id,
        format_local(task.due_at(), &ctx.timezone),
        task.message
    );
    Ok(())
}
