//! Strongly-typed identifiers.
//!
//! Sessions and audit events both carry UUIDs; distinct wrapper types keep them from being
//! mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $doc:expr) => {
        $(#[$meta])*
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier (v4).
            #[must_use]
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the inner [`Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parses an identifier from a string.
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not a valid UUID.
            pub fn parse_str(input: &str) -> Result<Self> {
                Ok(Self(Uuid::parse_str(input)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse_str(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(SessionId, "Identifier of one connect attempt and the session it establishes.");
id_type!(AuditEventId, "Identifier of a single audit record.");

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_new_v4_is_random() {
        assert_ne!(SessionId::new_v4(), SessionId::new_v4());
        assert_eq!(AuditEventId::new_v4().as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_parse_and_display() {
        let id: AuditEventId = VALID_UUID.parse().unwrap();
        assert_eq!(id.to_string(), VALID_UUID);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(SessionId::parse_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let id = SessionId::parse_str(VALID_UUID).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{VALID_UUID}\""));
    }
}
