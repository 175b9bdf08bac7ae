//! Request and response payloads for one sync exchange.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use crate::tidemark::Tidemark;
use serde::{Deserialize, Deserializer, Serialize};

/// One field-level change as it travels on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireChange {
    /// Encoded visibility group the record belongs to.
    #[serde(default)]
    pub group: String,
    /// Entity (record type) name.
    pub entity: String,
    /// Record primary key.
    pub record_id: String,
    /// Field name, or a property containing the delete marker.
    pub property: String,
    /// Opaque (encrypted) value.
    #[serde(default)]
    pub value: String,
    /// Age of the change when it was sent, in milliseconds.
    #[serde(default)]
    pub seconds_ago: i64,
    /// Operation code.
    #[serde(default)]
    pub operation: Operation,
    /// Commit timestamp, milliseconds since the Unix epoch as text.
    #[serde(default)]
    pub modified: String,
}

/// A group the device asks the coordinator about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupPoll {
    /// Encoded group name.
    pub group: String,
    /// Last tidemark consumed, absent for a group never polled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tidemark: Option<Tidemark>,
}

/// Outbound payload: identity, local changes, and the groups to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Application identity.
    pub app_id: String,
    /// Device identity.
    pub device_id: String,
    /// Application API access key.
    pub app_api_access_key: String,
    /// Oldest-first batch of local changes.
    #[serde(default)]
    pub changes: Vec<WireChange>,
    /// Oldest-polled-first batch of groups.
    #[serde(default)]
    pub groups: Vec<GroupPoll>,
}

impl SyncRequest {
    /// Creates a request with no changes and no groups.
    pub fn new(
        app_id: impl Into<String>,
        device_id: impl Into<String>,
        app_api_access_key: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            device_id: device_id.into(),
            app_api_access_key: app_api_access_key.into(),
            changes: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Changes the coordinator returns for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupChanges {
    /// Encoded group name.
    pub group: String,
    /// New tidemark to store once the changes are applied.
    #[serde(default)]
    pub tidemark: Option<Tidemark>,
    /// Changes in the order they must be applied.
    #[serde(default)]
    pub changes: Vec<WireChange>,
}

impl GroupChanges {
    /// Creates a group entry.
    pub fn new(group: impl Into<String>, tidemark: impl Into<Tidemark>) -> Self {
        Self {
            group: group.into(),
            tidemark: Some(tidemark.into()),
            changes: Vec::new(),
        }
    }

    /// Appends a change.
    pub fn with_change(mut self, change: WireChange) -> Self {
        self.changes.push(change);
        self
    }
}

/// Inbound payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncResponse {
    /// Whether the coordinator accepted the exchange.
    pub success: bool,
    /// Error strings reported by the coordinator.
    #[serde(default, deserialize_with = "one_or_many")]
    pub errors: Vec<String>,
    /// Per-group inbound changes.
    #[serde(default)]
    pub groups: Vec<GroupChanges>,
}

impl SyncResponse {
    /// Creates an accepted response.
    pub fn success(groups: Vec<GroupChanges>) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            groups,
        }
    }

    /// Creates a rejected response.
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            groups: Vec::new(),
        }
    }

    /// Total number of inbound changes across groups.
    pub fn change_count(&self) -> usize {
        self.groups.iter().map(|g| g.changes.len()).sum()
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    ///
    /// Rejects group entries with an empty group name.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let response: Self = serde_json::from_slice(bytes)?;
        if let Some(idx) = response.groups.iter().position(|g| g.group.is_empty()) {
            return Err(ProtocolError::invalid_structure(format!(
                "group entry {idx} has no group name"
            )));
        }
        Ok(response)
    }
}

/// Older coordinators send `Errors` as one string.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(s) if s.is_empty() => Vec::new(),
        Raw::One(s) => vec![s],
        Raw::Many(v) => v,
        Raw::Null(()) => Vec::new(),
    })
}
