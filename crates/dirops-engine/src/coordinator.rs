//! Search-then-modify workflows.

use serde::Serialize;
use std::collections::HashSet;
use std::iter::FusedIterator;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use dirops_core::config::DirectoryConfig;
use dirops_core::{Error, ModifyFailure};
use dirops_ldap::{
    DirectoryEntry, DistinguishedName, GroupTarget, UserQuery, UserRecord, USER_ATTRIBUTES,
};

use crate::audit::{settle, AuditAction, AuditEmitter, OperationStatus};
use crate::policy::{GroupClass, ProtectedGroups};
use crate::session::SessionManager;
use crate::Result;

/// Message used for the idempotent case.
pub const ALREADY_MEMBER: &str = "already a member";

/// A request to add a user to a group.
#[derive(Debug, Clone)]
pub struct MutationRequest {
    /// User snapshot from a search.
    pub user: UserRecord,
    /// Group to add the user to.
    pub group: GroupTarget,
    /// Operator confirmation for protected groups.
    pub confirmed: bool,
}

impl MutationRequest {
    /// Unconfirmed request.
    #[must_use]
    pub fn new(user: UserRecord, group: GroupTarget) -> Self {
        Self {
            user,
            group,
            confirmed: false,
        }
    }

    /// Same request with confirmation given.
    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

/// Outcome of [`GroupMutationCoordinator::add_to_group`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationResult {
    /// Final status.
    pub status: OperationStatus,
    /// Human-readable detail.
    pub message: String,
    /// User that was (or would have been) added.
    pub user_dn: DistinguishedName,
    /// Group that was (or would have been) modified.
    pub group_dn: DistinguishedName,
    /// Structured reason for a failure.
    #[serde(skip)]
    pub error: Option<Error>,
}

impl MutationResult {
    fn new(request: &MutationRequest, status: OperationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            user_dn: request.user.distinguished_name().clone(),
            group_dn: request.group.distinguished_name().clone(),
            error: None,
        }
    }

    fn failure(request: &MutationRequest, error: Error) -> Self {
        Self {
            error: Some(error.clone()),
            ..Self::new(request, OperationStatus::Failure, error.to_string())
        }
    }

    /// Returns true for `SUCCESS`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// Lazily validated search results.
///
/// Raw entries are converted to [`UserRecord`]s as the iterator advances; entries that fail
/// validation are skipped. Once exhausted it stays exhausted; run a new search to restart.
#[derive(Debug)]
pub struct UserSearch {
    entries: std::vec::IntoIter<DirectoryEntry>,
}

impl UserSearch {
    fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for UserSearch {
    type Item = UserRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            match UserRecord::from_entry(&entry) {
                Ok(record) => return Some(record),
                Err(err) => warn!(dn = %entry.dn, "Skipping invalid search entry: {err}"),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entries.len()))
    }
}

impl FusedIterator for UserSearch {}

#[derive(Default)]
struct AppliedLedger {
    generation: u64,
    memberships: HashSet<(DistinguishedName, DistinguishedName)>,
}

impl AppliedLedger {
    fn contains(&self, generation: u64, user: &DistinguishedName, group: &DistinguishedName) -> bool {
        self.generation == generation && self.memberships.contains(&(user.clone(), group.clone()))
    }

    fn record(&mut self, generation: u64, user: &DistinguishedName, group: &DistinguishedName) {
        if self.generation != generation {
            self.generation = generation;
            self.memberships.clear();
        }
        self.memberships.insert((user.clone(), group.clone()));
    }
}

/// Runs searches and membership changes against the current session.
///
/// Emits one SEARCH event per search and exactly one ADD_TO_GROUP event per mutation
/// attempt, whatever the outcome.
pub struct GroupMutationCoordinator {
    config: Arc<DirectoryConfig>,
    sessions: Arc<SessionManager>,
    protected: ProtectedGroups,
    audit: Arc<AuditEmitter>,
    applied: Mutex<AppliedLedger>,
}

impl GroupMutationCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        config: Arc<DirectoryConfig>,
        sessions: Arc<SessionManager>,
        protected: ProtectedGroups,
        audit: Arc<AuditEmitter>,
    ) -> Self {
        Self {
            config,
            sessions,
            protected,
            audit,
            applied: Mutex::new(AppliedLedger::default()),
        }
    }

    /// Searches for users below the configured base DN.
    ///
    /// Plain text is escaped into the user filter template; input starting with `(` is sent
    /// as a raw filter after a syntax check.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session is not connected.
    /// - [`Error::Query`] for malformed input.
    /// - The adapter's error if the search itself fails.
    /// - [`Error::SinkUnavailable`] if the SEARCH event could not be delivered, even when the
    ///   search succeeded.
    pub async fn search_user(&self, query: &str) -> Result<UserSearch> {
        let outcome = self.run_search(query).await;
        let (status, message) = match &outcome {
            Ok(entries) => (
                OperationStatus::Success,
                format!("{} raw entries returned", entries.len()),
            ),
            Err(err) => (OperationStatus::Failure, err.to_string()),
        };

        let delivered = self
            .audit
            .emit(self.audit.event(AuditAction::Search, query.trim(), status, message));

        settle(outcome, delivered).map(UserSearch::new)
    }

    async fn run_search(&self, query: &str) -> Result<Vec<DirectoryEntry>> {
        let lease = self.sessions.lease()?;
        let query = UserQuery::parse(query)?;
        let filter = query.to_filter(&self.config.user_filter_template);
        lease
            .search(&self.config.base_dn, &filter, USER_ATTRIBUTES)
            .await
    }

    /// Adds the request's user to its group.
    ///
    /// Protected groups need `confirmed`; unconfirmed requests come back `CANCELLED` without
    /// touching the directory. A membership already present in the user snapshot, or already
    /// applied during this session, is reported as `SUCCESS` without a protocol call. Other
    /// directory refusals are `FAILURE` results and are never retried.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session is not connected (a FAILURE event is still
    ///   recorded; if that event cannot be delivered the error is [`Error::SinkUnavailable`]).
    /// - [`Error::SinkUnavailable`] if the audit event could not be delivered; the directory
    ///   change, if any, has already happened.
    pub async fn add_to_group(&self, request: MutationRequest) -> Result<MutationResult> {
        let group_dn = request.group.distinguished_name().to_string();

        let lease = match self.sessions.lease() {
            Ok(lease) => lease,
            Err(err) => return self.reject(&group_dn, &request, err),
        };

        let result = if self.protected.classify(&request.group) == GroupClass::Protected
            && !request.confirmed
        {
            info!(group = %group_dn, "Protected group requires confirmation");
            MutationResult::new(
                &request,
                OperationStatus::Cancelled,
                format!("{} is a protected group and requires confirmation", request.group),
            )
        } else if request.user.is_member_of(request.group.distinguished_name())
            || self.ledger_contains(lease.generation(), &request)
        {
            MutationResult::new(&request, OperationStatus::Success, ALREADY_MEMBER)
        } else {
            let user_dn = request.user.distinguished_name().as_str();
            match lease.modify_add_member(&group_dn, user_dn).await {
                Ok(()) => {
                    info!(user = user_dn, group = %group_dn, "User added to group");
                    self.record_applied(lease.generation(), &request);
                    MutationResult::new(
                        &request,
                        OperationStatus::Success,
                        format!("added {} to {}", request.user.display_name(), request.group),
                    )
                }
                Err(Error::Modify {
                    reason: ModifyFailure::AlreadyMember,
                    ..
                }) => {
                    self.record_applied(lease.generation(), &request);
                    MutationResult::new(&request, OperationStatus::Success, ALREADY_MEMBER)
                }
                Err(err @ Error::NotConnected(_)) => {
                    return self.reject(&group_dn, &request, err);
                }
                Err(err) => {
                    warn!(user = user_dn, group = %group_dn, "Add to group failed: {err}");
                    MutationResult::failure(&request, err)
                }
            }
        };

        self.audit.emit(self.audit.event(
            AuditAction::AddToGroup,
            group_dn,
            result.status,
            audit_message(&request, &result),
        ))?;
        Ok(result)
    }

    fn reject(
        &self,
        group_dn: &str,
        request: &MutationRequest,
        err: Error,
    ) -> Result<MutationResult> {
        let message = format!(
            "cannot add {} to {}: {err}",
            request.user.distinguished_name(),
            request.group
        );
        let delivered = self.audit.emit(self.audit.event(
            AuditAction::AddToGroup,
            group_dn,
            OperationStatus::Failure,
            message,
        ));
        settle(Err(err), delivered)
    }

    fn ledger_contains(&self, generation: u64, request: &MutationRequest) -> bool {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(
                generation,
                request.user.distinguished_name(),
                request.group.distinguished_name(),
            )
    }

    fn record_applied(&self, generation: u64, request: &MutationRequest) {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(
                generation,
                request.user.distinguished_name(),
                request.group.distinguished_name(),
            );
    }
}

fn audit_message(request: &MutationRequest, result: &MutationResult) -> String {
    match result.status {
        OperationStatus::Success if result.message == ALREADY_MEMBER => format!(
            "{} is already a member of {}",
            request.user.distinguished_name(),
            request.group
        ),
        _ => result.message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(value: &str) -> DistinguishedName {
        DistinguishedName::parse(value).unwrap()
    }

    #[test]
    fn search_skips_invalid_entries() {
        let search = UserSearch::new(vec![
            DirectoryEntry::new("CN=One,DC=example").with_attribute("sAMAccountName", ["one"]),
            DirectoryEntry::new("garbage"),
            DirectoryEntry::new("CN=Two,DC=example"),
        ]);
        assert_eq!(search.size_hint(), (0, Some(3)));

        let names: Vec<String> = search.map(|user| user.display_name().to_string()).collect();
        assert_eq!(names, ["one", "Two"]);
    }

    #[test]
    fn ledger_is_scoped_to_a_session() {
        let user = dn("CN=User,DC=example");
        let group = dn("CN=Group,DC=example");
        let mut ledger = AppliedLedger::default();

        ledger.record(1, &user, &group);
        assert!(ledger.contains(1, &dn("cn=user,dc=example"), &group));
        assert!(!ledger.contains(2, &user, &group));

        ledger.record(2, &dn("CN=Other,DC=example"), &group);
        assert!(!ledger.contains(2, &user, &group));
    }

    #[test]
    fn failure_result_keeps_error() {
        let request = MutationRequest::new(
            UserRecord::builder(dn("CN=User,DC=example")).build(),
            GroupTarget::parse("CN=Group,DC=example").unwrap(),
        );
        let err = Error::modify(ModifyFailure::PermissionDenied, "result code 50");
        let result = MutationResult::failure(&request, err.clone());

        assert_eq!(result.status, OperationStatus::Failure);
        assert_eq!(result.message, err.to_string());
        assert_eq!(result.error, Some(err));
        assert!(!result.is_success());
        assert!(request.confirmed().confirmed);
    }
}
