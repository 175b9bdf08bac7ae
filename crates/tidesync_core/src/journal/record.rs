//! Journal record types and envelope encoding.

use crate::change_log::Change;
use crate::deferred::{DeferredChange, DeferredKey};
use crate::error::{CoreError, CoreResult};
use crate::groups::GroupCursor;
use crate::journal::{CRC_SIZE, HEADER_SIZE};
use crate::types::{ChangeId, TransactionId};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"TSJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Type byte of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// Start of a change transaction.
    Begin = 1,
    /// Change staged in a transaction.
    ChangeAppended = 2,
    /// Transaction committed.
    Commit = 3,
    /// Transaction abandoned.
    Abort = 4,
    /// Acknowledged changes removed from the log.
    ChangesRemoved = 5,
    /// Record id tombstoned.
    TombstoneAdded = 6,
    /// Inbound change parked in the deferred cache.
    DeferredStored = 7,
    /// Deferred entry cleared.
    DeferredCleared = 8,
    /// Group cursor written.
    GroupUpserted = 9,
    /// Compaction marker.
    Snapshot = 10,
}

impl JournalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::ChangeAppended),
            3 => Some(Self::Commit),
            4 => Some(Self::Abort),
            5 => Some(Self::ChangesRemoved),
            6 => Some(Self::TombstoneAdded),
            7 => Some(Self::DeferredStored),
            8 => Some(Self::DeferredCleared),
            9 => Some(Self::GroupUpserted),
            10 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A durable state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Start of a change transaction.
    Begin {
        /// Transaction id.
        txid: TransactionId,
    },
    /// Change staged in a transaction; visible only after `Commit`.
    ChangeAppended {
        /// Transaction id.
        txid: TransactionId,
        /// The change.
        change: Change,
    },
    /// Transaction committed.
    Commit {
        /// Transaction id.
        txid: TransactionId,
    },
    /// Transaction abandoned; its changes are dropped even after `Commit`.
    Abort {
        /// Transaction id.
        txid: TransactionId,
    },
    /// Changes acknowledged by the coordinator.
    ChangesRemoved {
        /// Removed change ids.
        ids: Vec<ChangeId>,
    },
    /// Record id tombstoned.
    TombstoneAdded {
        /// Record primary key.
        record_id: String,
    },
    /// Deferred entry stored (replacing any entry with the same key).
    DeferredStored {
        /// The deferred change.
        change: DeferredChange,
    },
    /// Deferred entry cleared.
    DeferredCleared {
        /// Key of the cleared entry.
        key: DeferredKey,
    },
    /// Group cursor written.
    GroupUpserted {
        /// Full cursor state.
        group: GroupCursor,
    },
    /// Start of a compacted journal.
    Snapshot {
        /// Next change id to hand out.
        next_change_id: u64,
        /// Next transaction id to hand out.
        next_txid: u64,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        match self {
            Self::Begin { .. } => JournalRecordType::Begin,
            Self::ChangeAppended { .. } => JournalRecordType::ChangeAppended,
            Self::Commit { .. } => JournalRecordType::Commit,
            Self::Abort { .. } => JournalRecordType::Abort,
            Self::ChangesRemoved { .. } => JournalRecordType::ChangesRemoved,
            Self::TombstoneAdded { .. } => JournalRecordType::TombstoneAdded,
            Self::DeferredStored { .. } => JournalRecordType::DeferredStored,
            Self::DeferredCleared { .. } => JournalRecordType::DeferredCleared,
            Self::GroupUpserted { .. } => JournalRecordType::GroupUpserted,
            Self::Snapshot { .. } => JournalRecordType::Snapshot,
        }
    }

    /// Returns the transaction id if the record belongs to one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::ChangeAppended { txid, .. }
            | Self::Commit { txid }
            | Self::Abort { txid } => Some(*txid),
            _ => None,
        }
    }

    /// Encodes the full envelope.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload).map_err(|e| CoreError::codec(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Decodes a payload and checks it matches the envelope's type byte.
    pub fn decode_payload(
        record_type: JournalRecordType,
        payload: &[u8],
        offset: u64,
    ) -> CoreResult<Self> {
        let record: Self = ciborium::from_reader(payload)
            .map_err(|e| CoreError::journal_corruption(offset, format!("bad payload: {e}")))?;
        if record.record_type() != record_type {
            return Err(CoreError::journal_corruption(
                offset,
                format!(
                    "type byte {:?} does not match payload {:?}",
                    record_type,
                    record.record_type()
                ),
            ));
        }
        Ok(record)
    }
}

/// CRC-32 (IEEE) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn type_bytes_round_trip() {
        for b in 1..=10 {
            let ty = JournalRecordType::from_byte(b).unwrap();
            assert_eq!(ty.as_byte(), b);
        }
        assert!(JournalRecordType::from_byte(0).is_none());
        assert!(JournalRecordType::from_byte(11).is_none());
    }

    #[test]
    fn envelope_layout() {
        let record = JournalRecord::TombstoneAdded {
            record_id: "P2".into(),
        };
        let data = record.encode().unwrap();
        assert_eq!(&data[..4], b"TSJR");
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), JOURNAL_VERSION);
        assert_eq!(data[6], JournalRecordType::TombstoneAdded.as_byte());
        let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
        assert_eq!(data.len(), HEADER_SIZE + len + CRC_SIZE);

        let crc_at = data.len() - CRC_SIZE;
        let stored = u32::from_le_bytes(data[crc_at..].try_into().unwrap());
        assert_eq!(stored, compute_crc32(&data[..crc_at]));
    }

    #[test]
    fn mismatched_type_byte_is_corruption() {
        let record = JournalRecord::Commit {
            txid: TransactionId::new(1),
        };
        let data = record.encode().unwrap();
        let payload = &data[HEADER_SIZE..data.len() - CRC_SIZE];
        let err = JournalRecord::decode_payload(JournalRecordType::Abort, payload, 0).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn txid_accessor() {
        let txid = TransactionId::new(4);
        assert_eq!(JournalRecord::Begin { txid }.txid(), Some(txid));
        assert_eq!(
            JournalRecord::TombstoneAdded {
                record_id: "x".into()
            }
            .txid(),
            None
        );
    }
}
