//! Identity types for ZoneOpt entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Run identifier using UUIDv7 for timestamp-sortable IDs.
pub type RunId = Uuid;

/// Generate a new UUIDv7 RunId (timestamp-sortable).
pub fn new_run_id() -> RunId {
    Uuid::now_v7()
}

/// Defines an opaque string identifier owned by an upstream collaborator.
///
/// Project, user and polygon records are created outside this subsystem, so
/// their identifiers are carried verbatim rather than re-minted.
macro_rules! define_external_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the identifier is empty or whitespace-only.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_external_id!(
    /// Identifier of the project that owns an optimization run (upsert key).
    ProjectId
);
define_external_id!(
    /// Identifier of the user who requested the run.
    UserId
);
define_external_id!(
    /// Identifier of the source boundary polygon, when the run came from one.
    PolygonId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_serializes_transparently() {
        let id = ProjectId::new("64f1c0ffee");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"64f1c0ffee\"");
        let back: ProjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_blank_detection() {
        assert!(ProjectId::new("  ").is_blank());
        assert!(!UserId::from("u-1").is_blank());
    }

    #[test]
    fn test_run_ids_are_time_ordered() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a <= b);
    }
}
