//! User records returned by directory searches.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::dn::DistinguishedName;
use crate::entry::DirectoryEntry;
use crate::Result;

/// Attributes requested for user searches.
pub const USER_ATTRIBUTES: &[&str] = &[
    "sAMAccountName",
    "cn",
    "displayName",
    "distinguishedName",
    "userPrincipalName",
    "mail",
    "memberOf",
];

const MEMBER_OF: &str = "memberOf";

/// Immutable snapshot of a user entry.
///
/// A record never changes after a search returns it; issue a fresh search to observe the
/// effect of a membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    distinguished_name: DistinguishedName,
    display_name: String,
    attributes: BTreeMap<String, String>,
    current_group_memberships: BTreeSet<DistinguishedName>,
}

impl UserRecord {
    /// Creates a builder with the required distinguished name.
    #[must_use]
    pub fn builder(distinguished_name: DistinguishedName) -> UserRecordBuilder {
        UserRecordBuilder {
            distinguished_name,
            display_name: None,
            attributes: BTreeMap::new(),
            memberships: BTreeSet::new(),
        }
    }

    /// Validates a raw search entry into a record.
    ///
    /// The display name prefers `sAMAccountName`, then `displayName`, then `cn`, then the
    /// value of the leaf RDN. `memberOf` values that are not valid DNs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`dirops_core::Error::InvalidDn`] if the entry's own DN is malformed.
    pub fn from_entry(entry: &DirectoryEntry) -> Result<Self> {
        let dn = DistinguishedName::parse(&entry.dn)?;

        let mut builder = Self::builder(dn);
        if let Some(name) = ["sAMAccountName", "displayName", "cn"]
            .iter()
            .find_map(|attribute| entry.first(attribute))
        {
            builder = builder.display_name(name);
        }

        for attribute in USER_ATTRIBUTES
            .iter()
            .filter(|attribute| !attribute.eq_ignore_ascii_case(MEMBER_OF))
        {
            if let Some(value) = entry.first(attribute) {
                builder = builder.attribute(*attribute, value);
            }
        }

        if let Some(groups) = entry.values(MEMBER_OF) {
            let memberships = groups.iter().filter_map(|value| {
                DistinguishedName::parse(value)
                    .map_err(|err| warn!(user = %entry.dn, group = %value, "Skipping malformed memberOf value: {err}"))
                    .ok()
            });
            builder = builder.memberships(memberships);
        }

        Ok(builder.build())
    }

    /// Unique identifier of the user within the directory.
    #[must_use]
    pub fn distinguished_name(&self) -> &DistinguishedName {
        &self.distinguished_name
    }

    /// Name shown to the operator.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Single-valued attributes captured at search time.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Attribute lookup by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Groups the user belonged to when the snapshot was taken.
    #[must_use]
    pub fn current_group_memberships(&self) -> &BTreeSet<DistinguishedName> {
        &self.current_group_memberships
    }

    /// Returns true if the snapshot lists `group` among the user's groups.
    #[must_use]
    pub fn is_member_of(&self, group: &DistinguishedName) -> bool {
        self.current_group_memberships.contains(group)
    }
}

/// Builder for [`UserRecord`].
#[derive(Debug)]
pub struct UserRecordBuilder {
    distinguished_name: DistinguishedName,
    display_name: Option<String>,
    attributes: BTreeMap<String, String>,
    memberships: BTreeSet<DistinguishedName>,
}

impl UserRecordBuilder {
    /// Sets the display name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Records a single-valued attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds one group membership.
    #[must_use]
    pub fn member_of(mut self, group: DistinguishedName) -> Self {
        self.memberships.insert(group);
        self
    }

    /// Adds several group memberships.
    #[must_use]
    pub fn memberships<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = DistinguishedName>,
    {
        self.memberships.extend(groups);
        self
    }

    /// Finalises the record; the display name defaults to the leaf RDN value.
    #[must_use]
    pub fn build(self) -> UserRecord {
        let display_name = self.display_name.unwrap_or_else(|| {
            self.distinguished_name
                .leading_rdn()
                .values()
                .first()
                .map(|pair| pair.value().to_string())
                .unwrap_or_else(|| self.distinguished_name.to_string())
        });

        UserRecord {
            distinguished_name: self.distinguished_name,
            display_name,
            attributes: self.attributes,
            current_group_memberships: self.memberships,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirops_core::Error;

    fn dn(value: &str) -> DistinguishedName {
        DistinguishedName::parse(value).unwrap()
    }

    #[test]
    fn from_entry_maps_attributes_and_groups() {
        let entry = DirectoryEntry::new("CN=User One,OU=People,DC=example,DC=com")
            .with_attribute("sAMAccountName", ["user1"])
            .with_attribute("cn", ["User One"])
            .with_attribute("mail", ["user1@example.com"])
            .with_attribute(
                "memberOf",
                [
                    "CN=Staff,OU=Groups,DC=example,DC=com",
                    "CN=KRR-LG-InetUsers,OU=Groups,DC=example,DC=com",
                    "not a dn",
                ],
            );

        let user = UserRecord::from_entry(&entry).unwrap();
        assert_eq!(user.display_name(), "user1");
        assert_eq!(user.attribute("mail"), Some("user1@example.com"));
        assert_eq!(user.attribute("cn"), Some("User One"));
        assert!(user.attribute("memberOf").is_none());
        assert_eq!(user.current_group_memberships().len(), 2);
        assert!(user.is_member_of(&dn("cn=krr-lg-inetusers,ou=groups,dc=example,dc=com")));
        assert!(!user.is_member_of(&dn("CN=Domain Admins,CN=Users,DC=example,DC=com")));
    }

    #[test]
    fn from_entry_rejects_malformed_dn() {
        let entry = DirectoryEntry::new("User One").with_attribute("cn", ["User One"]);
        assert!(matches!(
            UserRecord::from_entry(&entry),
            Err(Error::InvalidDn(_))
        ));
    }

    #[test]
    fn display_name_falls_back_to_rdn() {
        let user = UserRecord::builder(dn("CN=Jane Roe,OU=People,DC=example")).build();
        assert_eq!(user.display_name(), "Jane Roe");

        let entry = DirectoryEntry::new("CN=jroe,DC=example").with_attribute("displayName", ["Jane Roe"]);
        assert_eq!(UserRecord::from_entry(&entry).unwrap().display_name(), "Jane Roe");
    }

    #[test]
    fn memberships_are_deduplicated_case_insensitively() {
        let user = UserRecord::builder(dn("CN=x,DC=example"))
            .member_of(dn("CN=Staff,DC=example"))
            .member_of(dn("cn=staff,dc=example"))
            .build();
        assert_eq!(user.current_group_memberships().len(), 1);
    }
}
