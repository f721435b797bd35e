//! Opaque identifiers for tasks, activities and pipelines

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random (v4) identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Derive a stable identifier from a name (v5 over the OID namespace).
            pub fn from_name(name: &str) -> Self {
                Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// Identifier of a [`TaskSpec`](crate::task::TaskSpec); the node key in the DAG.
    TaskId
);
define_id!(
    /// Identifier of a single [`Activity`](crate::activity::Activity) instance.
    ActivityId
);
define_id!(
    /// Identifier of a [`Pipeline`](crate::pipeline::Pipeline).
    PipelineId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
        assert_ne!(ActivityId::new(), ActivityId::new());
    }

    #[test]
    fn test_from_name_is_stable() {
        assert_eq!(TaskId::from_name("extract"), TaskId::from_name("extract"));
        assert_ne!(TaskId::from_name("extract"), TaskId::from_name("load"));
    }

    #[test]
    fn test_id_serde_roundtrip() {
        let id = ActivityId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ActivityId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
