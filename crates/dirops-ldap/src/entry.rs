//! Raw directory entries as returned by a search.

use std::collections::HashMap;

/// Directory entry before boundary validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry, as sent by the server.
    pub dn: String,
    /// Attribute map (values preserve server order).
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds values for an attribute, builder style.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(attribute.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Returns all values for the attribute.
    ///
    /// Attribute names are matched case-insensitively; AD echoes the schema spelling
    /// (`memberOf`) regardless of how the attribute was requested.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .get(attribute)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
                    .map(|(_, values)| values)
            })
            .map(Vec::as_slice)
    }

    /// Returns the first non-blank value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.iter().map(String::as_str).find(|v| !v.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_lookup_ignores_case() {
        let entry = DirectoryEntry::new("CN=User One,DC=example,DC=com")
            .with_attribute("memberOf", ["CN=A,DC=example,DC=com", "CN=B,DC=example,DC=com"])
            .with_attribute("sAMAccountName", ["user1"]);

        assert_eq!(entry.first("samaccountname"), Some("user1"));
        assert_eq!(entry.values("MEMBEROF").map(<[String]>::len), Some(2));
        assert!(entry.values("mail").is_none());
    }

    #[test]
    fn first_skips_blank_values() {
        let entry = DirectoryEntry::new("CN=x").with_attribute("displayName", ["", "Shown"]);
        assert_eq!(entry.first("displayName"), Some("Shown"));
    }
}
