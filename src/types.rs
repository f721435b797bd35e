//! Declared value types used by the compatibility checker
//!
//! Adjacent tasks are checked by comparing the declared output type of the
//! upstream task against the declared input types of the downstream task.
//! Comparison is by identity: `Named("Tuple<int,int>")` does not satisfy
//! `Named("int")`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a task parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    /// The universal/top type. A task returning `Any` defeats checking and
    /// is rejected when it appears upstream of a validated activity.
    Any,
    /// The null/unit type. An upstream returning nothing is always accepted;
    /// it contributes no input value.
    Unit,
    /// A concrete named type, compared by identity.
    Named(String),
}

impl TypeTag {
    /// Shorthand for [`TypeTag::Named`].
    pub fn named(name: impl Into<String>) -> Self {
        TypeTag::Named(name.into())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TypeTag::Any)
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, TypeTag::Unit)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Any => write!(f, "Any"),
            TypeTag::Unit => write!(f, "Unit"),
            TypeTag::Named(name) => write!(f, "{}", name),
        }
    }
}
