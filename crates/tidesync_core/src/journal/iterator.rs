//! Record iterator over journal bytes.

use crate::error::{CoreError, CoreResult};
use crate::journal::record::{
    compute_crc32, JournalRecord, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION,
};
use crate::journal::{CRC_SIZE, HEADER_SIZE};

/// How a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every byte belonged to a complete record.
    Clean,
    /// The tail held an incomplete record starting at `offset`.
    TornTail {
        /// Offset of the incomplete record; the valid journal ends here.
        offset: u64,
        /// Number of trailing bytes that belong to it.
        bytes: u64,
    },
}

/// Iterates `(offset, record)` pairs.
///
/// - a record that runs past the end of the data stops iteration and is
///   reported through [`end`](Self::end)
/// - bad magic, unknown version, unknown type and checksum mismatches are
///   yielded as errors, after which iteration stops
pub struct JournalIterator {
    data: Vec<u8>,
    pos: usize,
    end: Option<ScanEnd>,
    failed: bool,
}

impl JournalIterator {
    /// Creates an iterator over a full journal image.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            end: None,
            failed: false,
        }
    }

    /// How the scan ended. `None` until the iterator is exhausted without error.
    #[must_use]
    pub fn end(&self) -> Option<ScanEnd> {
        self.end
    }

    fn torn(&mut self) -> Option<CoreResult<(u64, JournalRecord)>> {
        self.end = Some(ScanEnd::TornTail {
            offset: self.pos as u64,
            bytes: (self.data.len() - self.pos) as u64,
        });
        None
    }

    fn fail(&mut self, err: CoreError) -> Option<CoreResult<(u64, JournalRecord)>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl Iterator for JournalIterator {
    type Item = CoreResult<(u64, JournalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.end.is_some() {
            return None;
        }

        let offset = self.pos as u64;
        let remaining = &self.data[self.pos..];
        if remaining.is_empty() {
            self.end = Some(ScanEnd::Clean);
            return None;
        }
        if remaining.len() < HEADER_SIZE {
            return self.torn();
        }

        if remaining[..4] != JOURNAL_MAGIC {
            return self.fail(CoreError::journal_corruption(offset, "bad magic"));
        }
        let version = u16::from_le_bytes([remaining[4], remaining[5]]);
        if version != JOURNAL_VERSION {
            return self.fail(CoreError::journal_corruption(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let type_byte = remaining[6];
        let Some(record_type) = JournalRecordType::from_byte(type_byte) else {
            return self.fail(CoreError::journal_corruption(
                offset,
                format!("unknown record type {type_byte}"),
            ));
        };
        let len = u32::from_le_bytes([remaining[7], remaining[8], remaining[9], remaining[10]])
            as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if remaining.len() < total {
            return self.torn();
        }

        let crc_at = HEADER_SIZE + len;
        let expected = u32::from_le_bytes([
            remaining[crc_at],
            remaining[crc_at + 1],
            remaining[crc_at + 2],
            remaining[crc_at + 3],
        ]);
        let actual = compute_crc32(&remaining[..crc_at]);
        if expected != actual {
            return self.fail(CoreError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let record = match JournalRecord::decode_payload(
            record_type,
            &remaining[HEADER_SIZE..crc_at],
            offset,
        ) {
            Ok(record) => record,
            Err(e) => return self.fail(e),
        };

        self.pos += total;
        Some(Ok((offset, record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    fn encoded(records: &[JournalRecord]) -> Vec<u8> {
        records.iter().flat_map(|r| r.encode().unwrap()).collect()
    }

    fn sample() -> Vec<JournalRecord> {
        vec![
            JournalRecord::Begin {
                txid: TransactionId::new(1),
            },
            JournalRecord::Commit {
                txid: TransactionId::new(1),
            },
            JournalRecord::TombstoneAdded {
                record_id: "P2".into(),
            },
        ]
    }

    #[test]
    fn reads_every_record() {
        let mut iter = JournalIterator::new(encoded(&sample()));
        let records: Vec<JournalRecord> = iter.by_ref().map(|r| r.unwrap().1).collect();
        assert_eq!(records, sample());
        assert_eq!(iter.end(), Some(ScanEnd::Clean));
    }

    #[test]
    fn empty_journal_is_clean() {
        let mut iter = JournalIterator::new(Vec::new());
        assert!(iter.next().is_none());
        assert_eq!(iter.end(), Some(ScanEnd::Clean));
    }

    #[test]
    fn torn_tail_ends_cleanly() {
        let mut data = encoded(&sample());
        let full = data.len();
        data.truncate(full - 3);

        let mut iter = JournalIterator::new(data);
        let count = iter.by_ref().map(|r| r.unwrap()).count();
        assert_eq!(count, 2);
        match iter.end() {
            Some(ScanEnd::TornTail { bytes, .. }) => assert!(bytes > 0),
            other => panic!("expected torn tail, got {other:?}"),
        }
    }

    #[test]
    fn partial_header_is_torn() {
        let mut data = encoded(&sample()[..1]);
        let valid = data.len() as u64;
        data.extend_from_slice(b"TSJ");
        let mut iter = JournalIterator::new(data);
        assert_eq!(iter.by_ref().count(), 1);
        assert_eq!(
            iter.end(),
            Some(ScanEnd::TornTail {
                offset: valid,
                bytes: 3
            })
        );
    }

    #[test]
    fn flipped_payload_byte_is_checksum_error() {
        let mut data = encoded(&sample());
        data[HEADER_SIZE] ^= 0xFF;
        let first = JournalIterator::new(data).next().unwrap();
        assert!(matches!(first, Err(CoreError::ChecksumMismatch { offset: 0, .. })));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut data = encoded(&sample());
        data[0] = b'X';
        let mut iter = JournalIterator::new(data);
        assert!(iter.next().unwrap().unwrap_err().is_corruption());
        assert!(iter.next().is_none());
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut data = encoded(&sample());
        data[6] = 0xEE;
        let err = JournalIterator::new(data).next().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { .. }));
    }
}
