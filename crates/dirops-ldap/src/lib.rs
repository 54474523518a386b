//! Directory client adapter for Active Directory over LDAP.
//!
//! This crate provides the capability interface the engine consumes ([`DirectoryAdapter`] and
//! [`DirectoryHandle`]), an `ldap3`-backed implementation ([`LdapAdapter`]), and the
//! strongly-typed records validated at the adapter boundary.

#![deny(missing_docs)]

mod adapter;
mod connector;
mod dn;
mod entry;
mod filter;
mod group;
mod user;

pub use adapter::{DirectoryAdapter, DirectoryHandle, MEMBER_ATTRIBUTE};
pub use connector::{controller_url, LdapAdapter};
pub use dn::{AttributeValue, DistinguishedName, DnError, Rdn};
pub use entry::DirectoryEntry;
pub use filter::{escape_filter_value, exact_dn_filter, UserQuery};
pub use group::GroupTarget;
pub use user::{UserRecord, UserRecordBuilder, USER_ATTRIBUTES};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirops_core::Result<T>;
