//! Distinguished Name parsing and comparison.
//!
//! Directory DNs compare case-insensitively (`CN=Users,DC=Example` and `cn=users,dc=example`
//! name the same entry), so equality, ordering and hashing of [`DistinguishedName`] use a
//! normalized form while [`DistinguishedName::as_str`] keeps the caller's spelling.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::Peekable;
use std::str::{Chars, FromStr};
use thiserror::Error;

use dirops_core::error::Error as CoreError;

/// Errors that can occur when parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component was not of the form `attribute=value`.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component had nothing to the left of `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component had nothing to the right of `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The input ended in the middle of an escape sequence.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DnError> for CoreError {
    fn from(err: DnError) -> Self {
        CoreError::InvalidDn(err.to_string())
    }
}

/// One `attribute=value` assertion inside an RDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    attribute: String,
    value: String,
}

impl AttributeValue {
    /// Create a new attribute/value pair.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute type (e.g. `CN`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the attribute type matches (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Relative distinguished name: one or more `+`-joined attribute/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    values: Vec<AttributeValue>,
}

impl Rdn {
    /// All attribute/value pairs of the RDN.
    #[must_use]
    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    /// The only pair of a single-valued RDN, `None` for multi-valued RDNs.
    #[must_use]
    pub fn single(&self) -> Option<&AttributeValue> {
        match self.values.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Strongly-typed distinguished name.
#[derive(Debug, Clone)]
pub struct DistinguishedName {
    raw: String,
    normalized: String,
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parses a distinguished name (RFC 4514 string form).
    ///
    /// Both character escapes (`\,`) and hex escapes (`\2C`) are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] if the input is empty or syntactically invalid.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DnError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DnError::Empty);
        }

        let mut rdns = Vec::new();
        let mut values = Vec::new();
        let mut component = ComponentParser::default();
        let mut chars = raw.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '\\' => component.push_escaped(read_escape(&mut chars)?, raw)?,
                '=' if component.in_attribute() => component.end_attribute(raw)?,
                '+' => values.push(component.finish(raw)?),
                ',' => {
                    values.push(component.finish(raw)?);
                    rdns.push(Rdn {
                        values: std::mem::take(&mut values),
                    });
                }
                _ => component.push(ch),
            }
        }

        values.push(component.finish(raw)?);
        rdns.push(Rdn { values });

        Ok(Self::from_rdns(rdns))
    }

    fn from_rdns(rdns: Vec<Rdn>) -> Self {
        let raw = render(&rdns, false);
        let normalized = render(&rdns, true);
        Self {
            raw,
            normalized,
            rdns,
        }
    }

    /// Borrows the canonical string form (input letter case preserved).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lower-cased form used for comparisons.
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// RDNs from the leaf towards the root.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The leaf RDN (e.g. `CN=Domain Admins` of `CN=Domain Admins,CN=Users,DC=example`).
    #[must_use]
    pub fn leading_rdn(&self) -> &Rdn {
        // parse() never produces an empty RDN list
        &self.rdns[0]
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for DistinguishedName {}

impl Hash for DistinguishedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for DistinguishedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistinguishedName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DnError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Serialize for DistinguishedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for DistinguishedName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

enum Escaped {
    Byte(u8),
    Char(char),
}

fn read_escape(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<Escaped, DnError> {
    let first = chars.next().ok_or(DnError::UnterminatedEscape)?;
    if let (Some(high), Some(low)) = (
        first.to_digit(16),
        chars.peek().and_then(|next| next.to_digit(16)),
    ) {
        chars.next();
        let byte = u8::try_from(high * 16 + low).map_err(|_| DnError::UnterminatedEscape)?;
        return Ok(Escaped::Byte(byte));
    }
    Ok(Escaped::Char(first))
}

/// Accumulates one `attribute=value` pair. Values are collected as bytes so multi-byte hex
/// escapes (`\C3\A9`) decode correctly; unescaped trailing spaces are dropped.
#[derive(Default)]
struct ComponentParser {
    attribute: Option<String>,
    buffer: Vec<u8>,
    pending_spaces: usize,
}

impl ComponentParser {
    fn in_attribute(&self) -> bool {
        self.attribute.is_none()
    }

    fn push(&mut self, ch: char) {
        if self.attribute.is_some() && ch == ' ' {
            if !self.buffer.is_empty() {
                self.pending_spaces += 1;
            }
            return;
        }
        self.flush_spaces();
        let mut utf8 = [0u8; 4];
        self.buffer
            .extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
    }

    fn push_escaped(&mut self, escaped: Escaped, raw: &str) -> std::result::Result<(), DnError> {
        if self.attribute.is_none() {
            return Err(DnError::InvalidComponent(raw.to_string()));
        }
        self.flush_spaces();
        match escaped {
            Escaped::Byte(byte) => self.buffer.push(byte),
            Escaped::Char(ch) => {
                let mut utf8 = [0u8; 4];
                self.buffer
                    .extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
        }
        Ok(())
    }

    fn flush_spaces(&mut self) {
        self.buffer
            .extend(std::iter::repeat(b' ').take(self.pending_spaces));
        self.pending_spaces = 0;
    }

    fn end_attribute(&mut self, raw: &str) -> std::result::Result<(), DnError> {
        let name = String::from_utf8(std::mem::take(&mut self.buffer))
            .map_err(|_| DnError::InvalidComponent(raw.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DnError::MissingAttribute(raw.to_string()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DnError::InvalidComponent(name.to_string()));
        }
        self.attribute = Some(name.to_string());
        Ok(())
    }

    fn finish(&mut self, raw: &str) -> std::result::Result<AttributeValue, DnError> {
        let bytes = std::mem::take(&mut self.buffer);
        self.pending_spaces = 0;

        let Some(attribute) = self.attribute.take() else {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            let detail = if text.is_empty() { raw.to_string() } else { text };
            return Err(DnError::InvalidComponent(detail));
        };

        if bytes.is_empty() {
            return Err(DnError::MissingValue(attribute));
        }

        let value =
            String::from_utf8(bytes).map_err(|_| DnError::InvalidComponent(raw.to_string()))?;
        Ok(AttributeValue::new(attribute, value))
    }
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in value.chars().enumerate() {
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (idx == 0 && (ch == ' ' || ch == '#'))
            || (idx == last && ch == ' ');

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

fn render(rdns: &[Rdn], normalize: bool) -> String {
    rdns.iter()
        .map(|rdn| {
            rdn.values
                .iter()
                .map(|pair| {
                    if normalize {
                        format!(
                            "{}={}",
                            pair.attribute.to_ascii_lowercase(),
                            escape_value(&pair.value.to_lowercase())
                        )
                    } else {
                        format!("{}={}", pair.attribute, escape_value(&pair.value))
                    }
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}
