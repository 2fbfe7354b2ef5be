//! Newtype wrappers for digest-valued identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain `algorithm:hex` strings.

use crate::digest::Digest;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! digest_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string without validation.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Parse and validate an `algorithm:hex` string.
            pub fn parse(s: &str) -> Result<Self, SchemaError> {
                Digest::parse(s).map(|d| Self(d.to_string()))
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// The hex portion after the algorithm prefix.
            pub fn encoded(&self) -> &str {
                self.0.split_once(':').map_or(self.0.as_str(), |(_, hex)| hex)
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl From<Digest> for $name {
            fn from(d: Digest) -> Self {
                Self(d.to_string())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

digest_newtype!(
    /// Digest of one layer's uncompressed changeset.
    DiffId
);

digest_newtype!(
    /// Identity of a layer stack prefix, derived from its ordered DiffIDs.
    ChainId
);

digest_newtype!(
    /// Digest of an image's serialized configuration.
    ImageId
);

/// Truncate an identifier for display: drops the algorithm prefix and keeps 12 characters.
///
/// Legacy identifiers come straight from archive directory names, so the cut
/// is made on a character boundary.
pub fn short_id(id: &str) -> &str {
    let hex = id.split_once(':').map_or(id, |(_, hex)| hex);
    hex.char_indices().nth(12).map_or(hex, |(i, _)| &hex[..i])
}
