use anyhow::Result;

use super::context::AppContext;

pub async fn run_cancel_task(ctx: &AppContext, id: u64) -> Result<()> {
    let task = ctx.service.cancel_task(id).await?;
    println!("🗑️ Task #{} cancelled: {}", task.id, task.message);
    Ok(())
}
