//! search command - list users matching a query

use anyhow::Result;

use super::CommandContext;

pub async fn execute(ctx: &CommandContext, query: &str, target: Option<&str>) -> Result<()> {
    ctx.connect(target).await?;
    let outcome = run(ctx, query).await;
    ctx.finish(outcome).await
}

async fn run(ctx: &CommandContext, query: &str) -> Result<()> {
    let mut found = 0;
    for user in ctx.engine.search_user(query).await? {
        println!("{}\t{}", user.display_name(), user.distinguished_name());
        found += 1;
    }

    if found == 0 {
        println!("No users found for `{query}`");
    }
    Ok(())
}
