use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use super::context::AppContext;
use super::utils::{format_local, format_time_remaining};
use crate::application::scheduler::Scheduler;
use crate::domain::entities::{HostEvent, HostStatus, TaskStatus};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::coordination::CoordinationClient;
use crate::infrastructure::platform::Liveness;

pub async fn run_status(ctx: &AppContext) -> Result<()> {
    let now = Utc::now();
    let liveness = Liveness::new(ctx.config.liveness_path());

    if liveness.is_alive(now, ctx.config.liveness_grace()).await {
        println!("🟢 Host is running");
    } else {
        match liveness.last_beat().await? {
            Some(last) => println!(
                "🔴 Host is not running (last seen {})",
                format_local(last, &ctx.timezone)
            ),
            None => println!("🔴 Host is not running"),
        }
    }

    let pending = ctx.store.list(Some(TaskStatus::Pending)).await?;
    println!("   {} pending task(s)", pending.len());

    if let Some(next) = Scheduler::new(ctx.store.clone()).next_due().await? {
        println!(
            "   next: #{} {} at {} ({})",
            next.id,
            next.message,
            format_local(next.due_at(), &ctx.timezone),
            format_time_remaining(next.due_at(), now)
        );
    }
    Ok(())
}

/// Prints host events until the host goes away or the user hits Ctrl-C.
pub async fn run_watch(config: &AppConfig) -> Result<()> {
    let client = CoordinationClient::new(config.coordination_addr());
    let mut events = client
        .subscribe()
        .await
        .context("Cannot reach the execution host; is it running?")?;

    loop {
        tokio::select! {
            event = events.next() => match event? {
                Some(HostEvent::TaskDelivered { id }) => println!("🔔 task #{} delivered", id),
                Some(HostEvent::HostStatus { status }) => match status {
                    HostStatus::Running => println!("🟢 host running"),
                    HostStatus::Stopped => println!("🔴 host stopped"),
                },
                None => {
                    println!("Host closed the connection");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                return Ok(());
            }
        }
    }
}
