//! Typed identifiers
//!
//! Facts, gaps and findings carry human-readable, domain-scoped sequential
//! IDs (`F-<DOMAIN>-001`) so an auditor can eyeball a citation list. Runs,
//! events and corrections use opaque UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error parsing a domain-scoped ID from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed id `{input}`: expected {expected}")]
pub struct ParseIdError {
    /// The offending input
    pub input: String,
    /// Expected shape, e.g. `F-<DOMAIN>-<SEQ>`
    pub expected: &'static str,
}

macro_rules! scoped_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Build from a domain name and sequence number.
            #[must_use]
            pub fn new(domain: &str, seq: u32) -> Self {
                Self(format!(
                    concat!($prefix, "-{}-{:03}"),
                    domain.to_ascii_uppercase(),
                    seq
                ))
            }

            /// The domain segment of the ID.
            #[must_use]
            pub fn domain(&self) -> &str {
                self.0.split('-').nth(1).unwrap_or_default()
            }

            /// The sequence segment of the ID.
            #[must_use]
            pub fn seq(&self) -> u32 {
                self.0
                    .rsplit('-')
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0)
            }

            /// Full textual form.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut parts = s.split('-');
                let ok = parts.next() == Some($prefix)
                    && parts.next().is_some_and(|d| !d.is_empty())
                    && parts.next().is_some_and(|n| n.parse::<u32>().is_ok())
                    && parts.next().is_none();
                if ok {
                    Ok(Self(s.to_string()))
                } else {
                    Err(ParseIdError {
                        input: s.to_string(),
                        expected: concat!($prefix, "-<DOMAIN>-<SEQ>"),
                    })
                }
            }
        }
    };
}

scoped_id!(
    /// Fact identifier, e.g. `F-NETWORK-001`
    FactId,
    "F"
);

scoped_id!(
    /// Gap identifier, e.g. `G-NETWORK-001`
    GapId,
    "G"
);

scoped_id!(
    /// Finding identifier, e.g. `R-SECURITY-002`
    FindingId,
    "R"
);

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random ID.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
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
    };
}

uuid_id!(
    /// Analysis run identifier
    RunId
);

uuid_id!(
    /// Audit event identifier
    EventId
);

uuid_id!(
    /// Correction identifier
    CorrectionId
);
