//! Opaque group cursor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// How far a device has consumed one sync group's change stream.
///
/// The coordinator issues tidemarks; devices only store and echo them.
/// Older coordinators send integers, newer ones strings, so both decode.
///
/// # Comparison
///
/// Tidemarks carry no general order. Only when both sides are decimal
/// integers can one be [behind](Tidemark::is_behind) the other; any other
/// token from the coordinator simply replaces the stored one. Equality
/// ignores leading zeros on decimal tidemarks.
#[derive(Clone)]
pub struct Tidemark(String);

impl Tidemark {
    /// Wraps a coordinator-issued token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the token is a decimal integer.
    pub fn is_numeric(&self) -> bool {
        self.digits().is_some()
    }

    /// True if both tidemarks are decimal integers and `self` is the
    /// smaller one.
    ///
    /// ```rust
    /// use tidesync_protocol::Tidemark;
    ///
    /// assert!(Tidemark::from(9_u64).is_behind(&Tidemark::from(10_u64)));
    /// assert!(!Tidemark::new("1b4e28ba").is_behind(&Tidemark::new("f47ac10b")));
    /// ```
    pub fn is_behind(&self, other: &Tidemark) -> bool {
        match (self.digits(), other.digits()) {
            (Some(a), Some(b)) => (a.len(), a) < (b.len(), b),
            _ => false,
        }
    }

    /// Decimal digits without leading zeros, or `None` for other tokens.
    fn digits(&self) -> Option<&str> {
        let raw = self.0.as_str();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = raw.trim_start_matches('0');
        Some(if trimmed.is_empty() { "0" } else { trimmed })
    }

    fn canonical(&self) -> &str {
        self.digits().unwrap_or(&self.0)
    }
}

impl PartialEq for Tidemark {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Tidemark {}

impl Hash for Tidemark {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Debug for Tidemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tidemark({})", self.0)
    }
}

impl fmt::Display for Tidemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tidemark {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for Tidemark {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for Tidemark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Tidemark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Tidemark(s),
            Raw::Unsigned(n) => Tidemark(n.to_string()),
            Raw::Signed(n) => Tidemark(n.to_string()),
        })
    }
}
