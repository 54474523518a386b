//! Front-end facing engine.

use std::sync::Arc;
use tracing::info;
use validator::Validate;

use dirops_core::config::DirectoryConfig;
use dirops_core::credential::BindCredential;
use dirops_core::Error;
use dirops_ldap::{DirectoryAdapter, GroupTarget};

use crate::audit::{settle, AuditAction, AuditEmitter, AuditSink, OperationStatus};
use crate::coordinator::{GroupMutationCoordinator, MutationRequest, MutationResult, UserSearch};
use crate::policy::ProtectedGroups;
use crate::session::{Session, SessionManager};
use crate::Result;

/// Wires session management, policy, mutation and audit behind one surface.
pub struct DirectoryEngine {
    config: Arc<DirectoryConfig>,
    sessions: Arc<SessionManager>,
    coordinator: GroupMutationCoordinator,
    audit: Arc<AuditEmitter>,
    protected: ProtectedGroups,
}

impl DirectoryEngine {
    /// Builds an engine in the `Disconnected` state.
    ///
    /// `actor` is the operator identity stamped on every audit event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the configuration does not validate.
    pub fn new(
        config: DirectoryConfig,
        adapter: Arc<dyn DirectoryAdapter>,
        sink: Arc<dyn AuditSink>,
        actor: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let sessions = Arc::new(SessionManager::new(adapter));
        let audit = Arc::new(AuditEmitter::new(actor, sink));
        let protected = ProtectedGroups::new(&config.protected_group_names);
        let coordinator = GroupMutationCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&sessions),
            protected.clone(),
            Arc::clone(&audit),
        );

        Ok(Self {
            config,
            sessions,
            coordinator,
            audit,
            protected,
        })
    }

    /// Connects to `controller` and records a CONNECT event.
    ///
    /// # Errors
    ///
    /// - Any error from [`SessionManager::connect`].
    /// - [`Error::SinkUnavailable`] if the event could not be delivered. A successful
    ///   session stays connected; a failed connect reports its own error inside the message.
    pub async fn connect(&self, controller: &str, credential: &BindCredential) -> Result<Session> {
        let outcome = self.sessions.connect(controller, credential).await;
        let (status, message) = match &outcome {
            Ok(_) => (
                OperationStatus::Success,
                format!("connected as {}", credential.identity()),
            ),
            Err(err) => (OperationStatus::Failure, err.to_string()),
        };

        let delivered = self
            .audit
            .emit(self.audit.event(AuditAction::Connect, controller, status, message));

        settle(outcome, delivered)
    }

    /// Connects to the first configured domain controller.
    ///
    /// # Errors
    ///
    /// As [`DirectoryEngine::connect`].
    pub async fn connect_default(&self, credential: &BindCredential) -> Result<Session> {
        let controller = self
            .config
            .default_controller()
            .ok_or_else(|| Error::ConfigError("no domain controller configured".to_string()))?
            .to_string();
        self.connect(&controller, credential).await
    }

    /// Closes the session. Idempotent.
    pub async fn disconnect(&self) {
        self.sessions.disconnect().await;
        info!("Disconnected");
    }

    /// Current session snapshot.
    #[must_use]
    pub fn current(&self) -> Session {
        self.sessions.current()
    }

    /// See [`GroupMutationCoordinator::search_user`].
    ///
    /// # Errors
    ///
    /// As [`GroupMutationCoordinator::search_user`].
    pub async fn search_user(&self, query: &str) -> Result<UserSearch> {
        self.coordinator.search_user(query).await
    }

    /// See [`GroupMutationCoordinator::add_to_group`].
    ///
    /// # Errors
    ///
    /// As [`GroupMutationCoordinator::add_to_group`].
    pub async fn add_to_group(&self, request: MutationRequest) -> Result<MutationResult> {
        self.coordinator.add_to_group(request).await
    }

    /// The configured default target group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] or [`Error::AmbiguousGroupName`] if the configured DN
    /// cannot name a group.
    pub fn target_group(&self) -> Result<GroupTarget> {
        GroupTarget::parse(&self.config.target_group_dn)
    }

    /// Live protected-group set; replacing it affects the next mutation.
    #[must_use]
    pub fn protected_groups(&self) -> &ProtectedGroups {
        &self.protected
    }

    /// Audit emitter, for inspecting and redelivering queued events.
    #[must_use]
    pub fn audit(&self) -> &AuditEmitter {
        &self.audit
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }
}
