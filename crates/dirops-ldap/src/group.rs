//! Group mutation targets.

use serde::{Deserialize, Serialize};
use std::fmt;

use dirops_core::Error;

use crate::dn::DistinguishedName;
use crate::Result;

/// A group whose membership is about to change.
///
/// `distinguished_name` is what the directory modifies; `simple_name` is the key used for
/// protected-group classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTarget {
    distinguished_name: DistinguishedName,
    simple_name: String,
}

impl GroupTarget {
    /// Derives the simple name from the leaf `CN` of the DN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousGroupName`] when the leaf RDN is not a single `CN` value;
    /// supply the name explicitly with [`GroupTarget::with_simple_name`] in that case.
    pub fn from_dn(distinguished_name: DistinguishedName) -> Result<Self> {
        let simple_name = match distinguished_name.leading_rdn().single() {
            Some(pair) if pair.matches_attribute("cn") => pair.value().trim().to_string(),
            Some(pair) => {
                return Err(Error::AmbiguousGroupName(format!(
                    "leaf RDN of `{distinguished_name}` is `{}`, not `CN`",
                    pair.attribute()
                )))
            }
            None => {
                return Err(Error::AmbiguousGroupName(format!(
                    "leaf RDN of `{distinguished_name}` is multi-valued"
                )))
            }
        };

        Ok(Self {
            distinguished_name,
            simple_name,
        })
    }

    /// Parses a DN string and derives the simple name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed DN (a bare group name is not a mutation
    /// target) or [`Error::AmbiguousGroupName`] as in [`GroupTarget::from_dn`].
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_dn(DistinguishedName::parse(input)?)
    }

    /// Uses a caller-supplied simple name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousGroupName`] if the name is blank.
    pub fn with_simple_name(
        distinguished_name: DistinguishedName,
        simple_name: impl Into<String>,
    ) -> Result<Self> {
        let simple_name = simple_name.into().trim().to_string();
        if simple_name.is_empty() {
            return Err(Error::AmbiguousGroupName(format!(
                "blank simple name supplied for `{distinguished_name}`"
            )));
        }
        Ok(Self {
            distinguished_name,
            simple_name,
        })
    }

    /// Protocol-level mutation target.
    #[must_use]
    pub fn distinguished_name(&self) -> &DistinguishedName {
        &self.distinguished_name
    }

    /// Classification key.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }
}

impl fmt::Display for GroupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.simple_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_name_from_leaf_cn() {
        let group = GroupTarget::parse("CN=Domain Admins,CN=Users,DC=example,DC=com").unwrap();
        assert_eq!(group.simple_name(), "Domain Admins");
        assert_eq!(
            group.distinguished_name().as_str(),
            "CN=Domain Admins,CN=Users,DC=example,DC=com"
        );
        assert_eq!(group.to_string(), "Domain Admins");
    }

    #[test]
    fn non_cn_leaf_is_ambiguous() {
        let err = GroupTarget::parse("OU=Groups,DC=example,DC=com").unwrap_err();
        assert!(matches!(err, Error::AmbiguousGroupName(_)));

        let err = GroupTarget::parse("CN=Admins+CN=Operators,DC=example").unwrap_err();
        assert!(matches!(err, Error::AmbiguousGroupName(_)));
    }

    #[test]
    fn bare_name_is_not_a_target() {
        let err = GroupTarget::parse("Domain Admins").unwrap_err();
        assert!(matches!(err, Error::InvalidDn(_)));
    }

    #[test]
    fn explicit_simple_name() {
        let dn = DistinguishedName::parse("OU=Admins,DC=example").unwrap();
        let group = GroupTarget::with_simple_name(dn.clone(), " Admins ").unwrap();
        assert_eq!(group.simple_name(), "Admins");

        assert!(GroupTarget::with_simple_name(dn, "   ").is_err());
    }
}
