//! Change operation codes.

use serde::{Deserialize, Serialize};

/// Property token that marks a change as a record deletion.
///
/// A delete travels as an ordinary change whose `Property` contains this
/// token instead of a field name.
pub const DELETE_MARKER: &str = "__delete__";

/// Returns true if `property` carries the delete marker.
pub fn is_delete_marker(property: &str) -> bool {
    property.contains(DELETE_MARKER)
}

/// What a change did to its record.
///
/// Serialized as the integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum Operation {
    /// A new record was created.
    Create,
    /// One field was set.
    #[default]
    Set,
    /// The record was removed.
    Delete,
    /// Numeric increment. Reserved; applied as a set.
    Increment,
    /// Numeric decrement. Reserved; applied as a set.
    Decrement,
}

impl Operation {
    /// Converts to the wire code.
    pub fn to_code(self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Set => 2,
            Operation::Delete => 3,
            Operation::Increment => 4,
            Operation::Decrement => 5,
        }
    }

    /// Converts from a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Create),
            2 => Some(Operation::Set),
            3 => Some(Operation::Delete),
            4 => Some(Operation::Increment),
            5 => Some(Operation::Decrement),
            _ => None,
        }
    }
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> Self {
        op.to_code()
    }
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Operation::from_code(code).ok_or_else(|| format!("unknown operation code {code}"))
    }
}
