//! CLI command implementations

pub mod addtogroup;
pub mod connect;
pub mod search;
pub mod status;

use anyhow::{Context, Result};

use dirops_core::credential::BindCredential;
use dirops_engine::{DirectoryEngine, Session};

/// Context passed to all commands
pub struct CommandContext {
    pub engine: DirectoryEngine,
    pub bind_user: Option<String>,
    pub bind_password: Option<String>,
}

impl CommandContext {
    fn credential(&self) -> Result<BindCredential> {
        let identity = self
            .bind_user
            .as_deref()
            .filter(|user| !user.trim().is_empty())
            .context("Bind user missing: set LDAP_USER or pass --bind-user")?;
        let password = self
            .bind_password
            .as_deref()
            .filter(|password| !password.is_empty())
            .context("Bind password missing: set LDAP_PASSWORD or pass --bind-password")?;
        Ok(BindCredential::from_password(identity, password))
    }

    /// Connect to `target`, or to the first configured controller.
    pub async fn connect(&self, target: Option<&str>) -> Result<Session> {
        let credential = self.credential()?;
        let session = match target {
            Some(controller) => self.engine.connect(controller, &credential).await,
            None => self.engine.connect_default(&credential).await,
        };
        session.context("Connection failed")
    }

    /// Disconnect, then hand back the command outcome.
    pub async fn finish<T>(&self, outcome: Result<T>) -> Result<T> {
        self.engine.disconnect().await;
        outcome
    }
}
