//! ACME resource identifiers.
//!
//! Each resource gets its own newtype so an order ID can never be passed where
//! an authorization ID is expected. IDs are 32 lowercase hex characters and
//! serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Wrap an ID read back from storage or a request path.
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

resource_id!(
    /// Unique identifier for an ACME account
    AccountId
);

resource_id!(
    /// Unique identifier for an ACME order
    OrderId
);

resource_id!(
    /// Unique identifier for an ACME authorization
    AuthorizationId
);

resource_id!(
    /// Unique identifier for an ACME challenge
    ChallengeId
);

resource_id!(
    /// Unique identifier for a certificate issued through ACME
    CertificateId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct_hex() {
        let id = AccountId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, AccountId::new());
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id: ChallengeId = "abc123".parse().unwrap();
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("abc123"));
    }
}
