//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example, a
//! [`CallerId`] with a [`ContextId`] even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// or whitespace only.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for UUID-wrapped newtypes (internally generated).
// Generates: struct (Copy), new_random(), from_uuid(), as_uuid(), Display.
// ---------------------------------------------------------------------------
macro_rules! uuid_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates the identifier from an existing UUID (e.g. deserialised from state).
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying [`Uuid`].
            pub fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed
// ---------------------------------------------------------------------------

uuid_id! {
    /// Identifies a single pipeline invocation (one call to `generate`).
    ///
    /// Generated fresh for every invocation; propagated through spans so all
    /// activity from a single run can be correlated.
    PipelineRunId
}

uuid_id! {
    /// Identifies one generated unit (one message in a sequence).
    UnitId
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies the caller (user or session) on whose behalf a pipeline runs.
    ///
    /// Rate-limit counters, checkpoints, and credentials are all scoped by this
    /// identifier.
    CallerId
}

string_id! {
    /// Identifies the business/offer context a generation is produced for.
    ///
    /// At most one generation may be in flight per (caller, context) pair.
    ContextId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_reject_blank_values() {
        assert!(CallerId::new("").is_none());
        assert!(CallerId::new("   ").is_none());
        assert_eq!(CallerId::new("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn uuid_ids_round_trip_through_uuid() {
        let run = PipelineRunId::new_random();
        assert_eq!(PipelineRunId::from_uuid(run.as_uuid()), run);
    }

    #[test]
    fn display_uses_inner_value() {
        let ctx = ContextId::new("offer-42").unwrap();
        assert_eq!(ctx.to_string(), "offer-42");
    }
}
