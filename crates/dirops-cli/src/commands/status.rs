//! status command - show configuration and session state

use anyhow::Result;

use super::CommandContext;

pub async fn execute(ctx: &CommandContext, check: bool, target: Option<&str>) -> Result<()> {
    let config = ctx.engine.config();

    println!("Domain controllers:");
    for controller in &config.domain_controllers {
        println!("  {controller}");
    }
    println!("Base DN:         {}", config.base_dn);
    println!("Target group:    {}", config.target_group_dn);

    let protected = ctx.engine.protected_groups().snapshot();
    if protected.is_empty() {
        println!("Protected groups: (none)");
    } else {
        println!(
            "Protected groups: {}",
            protected.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    if check {
        let outcome = ctx.connect(target).await.map(|_| ());
        let session = ctx.engine.current();
        println!("Session:         {}", session.state);
        if let Some(failure) = &session.failure {
            println!("Last failure:    {failure}");
        }
        return ctx.finish(outcome).await;
    }

    println!("Session:         {}", ctx.engine.current().state);
    Ok(())
}
