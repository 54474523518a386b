//! connect command - bind to a controller and report the session

use anyhow::Result;

use super::CommandContext;

pub async fn execute(ctx: &CommandContext, target: &str) -> Result<()> {
    let session = ctx.connect(Some(target)).await?;

    let established = session
        .established_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();
    println!(
        "Connected to {} as {} at {established}",
        session.target_controller.as_deref().unwrap_or(target),
        session.bound_identity.as_deref().unwrap_or_default(),
    );

    ctx.finish(Ok(())).await
}
