use anyhow::{Result, anyhow};
use chrono::Utc;

use super::context::{AppContext, alert_options};
use super::utils::repeat_parser::weekly_in_utc;
use super::utils::{describe_repeat, format_local, format_time_remaining, parse_repeat, parse_when};
use super::AddArgs;

pub async fn run_add_task(ctx: &AppContext, args: AddArgs) -> Result<()> {
    let now = Utc::now();
    let fire_at = parse_when(&args.when, &ctx.timezone, now).map_err(|e| anyhow!(e))?;
    let repeat = args
        .repeat
        .as_deref()
        .map(parse_repeat)
        .transpose()
        .map_err(|e| anyhow!(e))?
        .map(|rule| weekly_in_utc(rule, fire_at, &ctx.timezone));
    let alert = args.alert.is_set().then(|| alert_options(&args.alert));

    let task = ctx
        .service
        .create_task(fire_at, &args.message.join(" "), repeat, alert)
        .await?;

    println!(
        "✅ Task #{} scheduled for {} ({})",
        task.id,
        format_local(task.fire_at, &ctx.timezone),
        format_time_remaining(task.due_at(), now)
    );
    if let Some(rule) = &task.repeat_rule {
        println!("   repeats {}", describe_repeat(rule, task.fire_at, &ctx.timezone));
    }
    Ok(())
}
