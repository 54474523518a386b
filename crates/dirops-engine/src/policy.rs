//! Protected-group classification.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use dirops_core::config::load_protected_groups;
use dirops_ldap::GroupTarget;

use crate::Result;

/// Sensitivity of a mutation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupClass {
    /// Membership may change without confirmation.
    Ordinary,
    /// Membership changes require explicit operator confirmation.
    Protected,
}

/// Classifies `group` against a set of protected simple names.
///
/// Names compare after trimming and Unicode lower-casing.
#[must_use]
pub fn classify(group: &GroupTarget, protected_names: &BTreeSet<String>) -> GroupClass {
    let key = normalize(group.simple_name());
    if protected_names.iter().any(|name| normalize(name) == key) {
        GroupClass::Protected
    } else {
        GroupClass::Ordinary
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Shared, replaceable set of protected group names.
///
/// Clones share the same set; [`ProtectedGroups::replace`] takes effect on the next
/// classification.
#[derive(Debug, Clone, Default)]
pub struct ProtectedGroups {
    names: Arc<RwLock<BTreeSet<String>>>,
}

impl ProtectedGroups {
    /// Creates a set from names; blank names are dropped.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: Arc::new(RwLock::new(collect(names))),
        }
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the contents.
    pub fn replace<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = collect(names);
        info!(count = names.len(), "Protected group list replaced");
        *self.names.write().unwrap_or_else(PoisonError::into_inner) = names;
    }

    /// Replaces the contents from a `sensitive_groups.json` style file.
    ///
    /// # Errors
    ///
    /// Returns [`dirops_core::Error::ConfigError`] if the file exists but is malformed; the
    /// current contents are kept in that case.
    pub fn reload_from(&self, path: impl AsRef<Path>) -> Result<()> {
        let names = load_protected_groups(path)?;
        self.replace(names);
        Ok(())
    }

    /// Classifies `group` against the current contents.
    #[must_use]
    pub fn classify(&self, group: &GroupTarget) -> GroupClass {
        classify(
            group,
            &self.names.read().unwrap_or_else(PoisonError::into_inner),
        )
    }
}

fn collect<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn group(dn: &str) -> GroupTarget {
        GroupTarget::parse(dn).unwrap()
    }

    #[test]
    fn classification_ignores_case_and_whitespace() {
        let protected: BTreeSet<String> = ["  domain admins ".to_string()].into();
        assert_eq!(
            classify(&group("CN=Domain Admins,CN=Users,DC=example"), &protected),
            GroupClass::Protected
        );
        assert_eq!(
            classify(&group("CN=KRR-LG-InetUsers,OU=Groups,DC=example"), &protected),
            GroupClass::Ordinary
        );
        assert_eq!(
            classify(&group("CN=Domain Admins,DC=example"), &BTreeSet::new()),
            GroupClass::Ordinary
        );
    }

    #[test]
    fn unicode_names_are_lowercased() {
        let protected: BTreeSet<String> = ["АДМИНИСТРАТОРЫ".to_string()].into();
        assert_eq!(
            classify(&group("CN=Администраторы,DC=example"), &protected),
            GroupClass::Protected
        );
    }

    #[test]
    fn replacement_applies_to_existing_clones() {
        let groups = ProtectedGroups::new(["Domain Admins", " "]);
        let shared = groups.clone();
        assert_eq!(groups.snapshot().len(), 1);

        let target = group("CN=Schema Admins,CN=Users,DC=example");
        assert_eq!(shared.classify(&target), GroupClass::Ordinary);

        groups.replace(["Schema Admins"]);
        assert_eq!(shared.classify(&target), GroupClass::Protected);
    }

    #[test]
    fn reload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"protected_groups": ["Enterprise Admins"]}}"#).unwrap();

        let groups = ProtectedGroups::default();
        groups.reload_from(file.path()).unwrap();
        assert!(groups.snapshot().contains("Enterprise Admins"));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "not json").unwrap();
        assert!(groups.reload_from(broken.path()).is_err());
        assert!(groups.snapshot().contains("Enterprise Admins"));
    }
}
