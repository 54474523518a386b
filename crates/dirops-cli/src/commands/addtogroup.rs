//! addtogroup command - add one user to a group, confirming protected groups

use anyhow::{bail, Context, Result};

use dirops_engine::{MutationRequest, MutationResult, OperationStatus};
use dirops_ldap::{exact_dn_filter, DistinguishedName, GroupTarget, UserRecord};

use super::CommandContext;
use crate::utils::confirm;

pub struct AddToGroupOptions<'a> {
    pub user: &'a str,
    pub group: Option<&'a str>,
    pub target: Option<&'a str>,
    pub yes: bool,
}

pub async fn execute(ctx: &CommandContext, opts: AddToGroupOptions<'_>) -> Result<()> {
    // Resolve the group before touching the directory.
    let group = match opts.group {
        Some(group) => GroupTarget::parse(group)
            .with_context(|| format!("Invalid group `{group}`"))?,
        None => ctx
            .engine
            .target_group()
            .context("Configured target group is not usable")?,
    };

    ctx.connect(opts.target).await?;
    let outcome = run(ctx, &opts, group).await;
    ctx.finish(outcome).await
}

async fn run(ctx: &CommandContext, opts: &AddToGroupOptions<'_>, group: GroupTarget) -> Result<()> {
    let user = resolve_user(ctx, opts.user).await?;
    let mut request = MutationRequest::new(user, group);
    if opts.yes {
        request = request.confirmed();
    }

    let mut result = ctx.engine.add_to_group(request.clone()).await?;

    if result.status == OperationStatus::Cancelled && !request.confirmed {
        let prompt = format!(
            "{} is a protected group. Add {} to it?",
            request.group,
            request.user.display_name()
        );
        if !confirm(&prompt).context("Failed to read confirmation")? {
            println!("Operation cancelled");
            return Ok(());
        }
        result = ctx.engine.add_to_group(request.confirmed()).await?;
    }

    report(&result)
}

/// Finds exactly one user: a DN is looked up exactly, anything else is a search query.
async fn resolve_user(ctx: &CommandContext, user: &str) -> Result<UserRecord> {
    let query = match DistinguishedName::parse(user) {
        Ok(dn) => exact_dn_filter(&dn),
        Err(_) => user.to_string(),
    };

    let mut matches: Vec<UserRecord> = ctx.engine.search_user(&query).await?.collect();
    match matches.len() {
        0 => bail!("No user matches `{user}`"),
        1 => Ok(matches.remove(0)),
        count => {
            let candidates = matches
                .iter()
                .map(|record| format!("  {}\t{}", record.display_name(), record.distinguished_name()))
                .collect::<Vec<_>>()
                .join("\n");
            bail!("{count} users match `{user}`; pass a distinguished name:\n{candidates}")
        }
    }
}

fn report(result: &MutationResult) -> Result<()> {
    match result.status {
        OperationStatus::Success => {
            println!("{}: {} -> {}", result.message, result.user_dn, result.group_dn);
            Ok(())
        }
        OperationStatus::Cancelled => {
            println!("{}", result.message);
            Ok(())
        }
        OperationStatus::Failure => bail!(
            "Failed to add {} to {}: {}",
            result.user_dn,
            result.group_dn,
            result.message
        ),
    }
}
