//! Capability interface between the engine and a directory protocol client.
//!
//! The traits carry no business logic: they bind, search, add a member and close. The engine
//! owns every decision about when these are called.

use async_trait::async_trait;
use dirops_core::credential::BindCredential;

use crate::entry::DirectoryEntry;
use crate::Result;

/// Group attribute holding member DNs.
pub const MEMBER_ATTRIBUTE: &str = "member";

/// Establishes authenticated sessions against a directory controller.
#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    /// Connects to `controller` and binds with `credential`.
    ///
    /// Implementations release any partially opened connection before returning an error.
    ///
    /// # Errors
    ///
    /// Returns [`dirops_core::Error::Connection`] when the controller is unreachable, the
    /// credential is rejected or the bind times out.
    async fn bind(
        &self,
        controller: &str,
        credential: &BindCredential,
    ) -> Result<Box<dyn DirectoryHandle>>;
}

/// An open, bound protocol session.
#[async_trait]
pub trait DirectoryHandle: Send {
    /// Subtree search below `base_dn`.
    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>>;

    /// Adds `user_dn` to the `member` attribute of `group_dn`.
    async fn modify_add_member(&mut self, group_dn: &str, user_dn: &str) -> Result<()>;

    /// Unbinds and closes the connection.
    async fn close(&mut self) -> Result<()>;
}
