//! Search query handling and LDAP filter construction.

use dirops_core::config::QUERY_PLACEHOLDER;
use dirops_core::Error;

use crate::dn::DistinguishedName;
use crate::Result;

/// A validated user search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    /// Free text, escaped and substituted into the configured filter template.
    Text(String),
    /// A raw LDAP filter supplied by the operator (input starting with `(`).
    Filter(String),
}

impl UserQuery {
    /// Validates operator input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] for empty input, input containing NUL, or a raw filter that
    /// is not well formed.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::Query("search query cannot be empty".to_string()));
        }
        if trimmed.contains('\0') {
            return Err(Error::Query(
                "search query contains a NUL character".to_string(),
            ));
        }

        if trimmed.starts_with('(') {
            validate_filter(trimmed)?;
            Ok(Self::Filter(trimmed.to_string()))
        } else {
            Ok(Self::Text(trimmed.to_string()))
        }
    }

    /// The query as entered (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) | Self::Filter(text) => text,
        }
    }

    /// Builds the LDAP filter sent to the directory.
    #[must_use]
    pub fn to_filter(&self, template: &str) -> String {
        match self {
            Self::Text(text) => template.replace(QUERY_PLACEHOLDER, &escape_filter_value(text)),
            Self::Filter(filter) => filter.clone(),
        }
    }
}

/// Filter matching exactly one entry by its distinguished name.
#[must_use]
pub fn exact_dn_filter(dn: &DistinguishedName) -> String {
    format!("(distinguishedName={})", escape_filter_value(dn.as_str()))
}

/// Escapes a value for use inside an LDAP filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn validate_filter(filter: &str) -> Result<()> {
    let chars: Vec<char> = filter.chars().collect();
    let end = parse_filter(&chars, 0)?;
    if end != chars.len() {
        return Err(Error::Query(format!(
            "unexpected characters after position {end} in filter `{filter}`"
        )));
    }
    Ok(())
}

fn parse_filter(chars: &[char], start: usize) -> Result<usize> {
    if chars.get(start) != Some(&'(') {
        return Err(Error::Query(format!("expected `(` at position {start}")));
    }

    let mut pos = start + 1;
    match chars.get(pos).copied() {
        Some('&' | '|') => {
            pos += 1;
            let mut operands = 0;
            while chars.get(pos) == Some(&'(') {
                pos = parse_filter(chars, pos)?;
                operands += 1;
            }
            if operands == 0 {
                return Err(Error::Query(format!(
                    "empty filter set at position {start}"
                )));
            }
        }
        Some('!') => pos = parse_filter(chars, pos + 1)?,
        Some(_) => pos = parse_item(chars, pos)?,
        None => return Err(Error::Query("unbalanced parentheses".to_string())),
    }

    if chars.get(pos) != Some(&')') {
        return Err(Error::Query(format!(
            "unbalanced parentheses at position {pos}"
        )));
    }
    Ok(pos + 1)
}

fn parse_item(chars: &[char], start: usize) -> Result<usize> {
    let mut pos = start;
    let mut has_operator = false;

    while let Some(&ch) = chars.get(pos) {
        match ch {
            ')' => break,
            '(' => {
                return Err(Error::Query(format!(
                    "unescaped `(` at position {pos}"
                )))
            }
            '\\' => {
                let valid = chars
                    .get(pos + 1..pos + 3)
                    .is_some_and(|pair| pair.iter().all(char::is_ascii_hexdigit));
                if !valid {
                    return Err(Error::Query(format!(
                        "invalid escape sequence at position {pos}"
                    )));
                }
                pos += 3;
                continue;
            }
            '=' if !has_operator => {
                if pos == start {
                    return Err(Error::Query(format!(
                        "missing attribute before `=` at position {pos}"
                    )));
                }
                has_operator = true;
            }
            _ => {}
        }
        pos += 1;
    }

    if !has_operator {
        return Err(Error::Query(format!(
            "filter item at position {start} has no `=`"
        )));
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirops_core::config::DEFAULT_USER_FILTER_TEMPLATE;

    #[test]
    fn text_query_is_escaped_into_template() {
        let query = UserQuery::parse("  j*smith ").unwrap();
        assert_eq!(query, UserQuery::Text("j*smith".to_string()));
        assert_eq!(
            query.to_filter("(sAMAccountName={query})"),
            "(sAMAccountName=j\\2asmith)"
        );

        let filter = UserQuery::parse("doe").unwrap().to_filter(DEFAULT_USER_FILTER_TEMPLATE);
        assert!(filter.contains("(sAMAccountName=*doe*)"));
        assert!(filter.contains("(cn=*doe*)"));
    }

    #[test]
    fn raw_filters_are_accepted_when_well_formed() {
        for filter in [
            "(sAMAccountName=jdoe)",
            "(&(objectClass=user)(|(cn=John*)(mail=*@example.com)))",
            "(!(userAccountControl:1.2.840.113556.1.4.803:=2))",
            "(cn=Smith\\2c John)",
        ] {
            let query = UserQuery::parse(filter).unwrap();
            assert_eq!(query.to_filter(DEFAULT_USER_FILTER_TEMPLATE), filter);
        }
    }

    #[test]
    fn malformed_queries_are_rejected() {
        for input in [
            "",
            "   ",
            "(cn=John",
            "(cn=John))",
            "(&)",
            "(cn)",
            "(=John)",
            "(cn=a(b)",
            "(cn=bad\\zz)",
            "john\0",
        ] {
            assert!(
                matches!(UserQuery::parse(input), Err(Error::Query(_))),
                "expected query error for {input:?}"
            );
        }
    }

    #[test]
    fn exact_dn_filter_escapes_parentheses() {
        let dn = DistinguishedName::parse("CN=Doe (Contractor),OU=People,DC=example").unwrap();
        assert_eq!(
            exact_dn_filter(&dn),
            "(distinguishedName=CN=Doe \\28Contractor\\29,OU=People,DC=example)"
        );
    }

    #[test]
    fn escape_filter_value_handles_specials() {
        assert_eq!(escape_filter_value("a*(b)\\c"), "a\\2a\\28b\\29\\5cc");
        assert_eq!(escape_filter_value("plain"), "plain");
    }
}
