//! dirops - audited Active Directory group operations
//!
//! Searches users and adds them to groups over LDAP. Every action is appended to a JSON
//! lines activity log; protected groups require confirmation.

mod commands;
mod sink;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dirops_core::config::{load_protected_groups, AppConfig};
use dirops_engine::DirectoryEngine;
use dirops_ldap::LdapAdapter;

use commands::addtogroup::AddToGroupOptions;
use commands::CommandContext;
use sink::JsonLinesSink;

#[derive(Parser)]
#[command(name = "dirops")]
#[command(version)]
#[command(about = "Audited Active Directory group operations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DIROPS_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Protected groups file path
    #[arg(long, global = true, env = "DIROPS_PROTECTED_GROUPS", default_value = "sensitive_groups.json")]
    protected_groups: PathBuf,

    /// Activity log path (overrides the configured one)
    #[arg(long, global = true, env = "DIROPS_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DIROPS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Bind identity (DN, UPN or DOMAIN\user)
    #[arg(long, global = true, env = "LDAP_USER")]
    bind_user: Option<String>,

    /// Bind password
    #[arg(long, global = true, env = "LDAP_PASSWORD", hide_env_values = true)]
    bind_password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a domain controller and report the session
    Connect {
        /// Domain controller host or URL
        #[arg(short, long)]
        target: String,
    },

    /// Search users by name, or by raw LDAP filter when the query starts with `(`
    Search {
        /// Search text or filter
        query: String,

        /// Domain controller (defaults to the first configured one)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Add a user to a group
    #[command(name = "addtogroup")]
    AddToGroup {
        /// User distinguished name or search query matching exactly one user
        #[arg(short, long)]
        user: String,

        /// Group distinguished name (defaults to the configured target group)
        #[arg(short, long)]
        group: Option<String>,

        /// Domain controller (defaults to the first configured one)
        #[arg(short, long)]
        target: Option<String>,

        /// Confirm protected groups without prompting
        #[arg(short, long)]
        yes: bool,
    },

    /// Show configuration and session state
    Status {
        /// Also try to connect
        #[arg(long)]
        check: bool,

        /// Domain controller for --check
        #[arg(short, long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let app = AppConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    // Initialize logging
    let level = cli.log_level.as_deref().unwrap_or(&app.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut settings = app.ad_settings;
    let protected = load_protected_groups(&cli.protected_groups)
        .with_context(|| format!("Failed to load {}", cli.protected_groups.display()))?;
    settings.protected_group_names.extend(protected);

    let audit_log = cli.audit_log.unwrap_or(app.logging.file);
    let sink = JsonLinesSink::open(&audit_log)?;
    info!(path = %sink.path().display(), "Writing activity log");

    let adapter = LdapAdapter::new(settings.connection.clone())?;
    let engine = DirectoryEngine::new(
        settings,
        Arc::new(adapter),
        Arc::new(sink),
        utils::operator_identity(),
    )?;

    let ctx = CommandContext {
        engine,
        bind_user: cli.bind_user,
        bind_password: cli.bind_password,
    };

    match cli.command {
        Commands::Connect { target } => commands::connect::execute(&ctx, &target).await,
        Commands::Search { query, target } => {
            commands::search::execute(&ctx, &query, target.as_deref()).await
        }
        Commands::AddToGroup {
            user,
            group,
            target,
            yes,
        } => {
            let opts = AddToGroupOptions {
                user: &user,
                group: group.as_deref(),
                target: target.as_deref(),
                yes,
            };
            commands::addtogroup::execute(&ctx, opts).await
        }
        Commands::Status { check, target } => {
            commands::status::execute(&ctx, check, target.as_deref()).await
        }
    }
}
