//! The durable sync store.
//!
//! [`SyncStore`] owns the change log, tombstones, deferred cache and group
//! cursors. Every mutation is written to the journal before it becomes
//! visible in memory, and the in-memory tables are rebuilt from the journal
//! on open.
//!
//! ## Tracked commits
//!
//! An entity commit and the change rows describing it form one journal
//! transaction:
//!
//! ```text
//! Begin(tx) → ChangeAppended(tx, …)* → Commit(tx) → [object store commit] → Abort(tx)?
//! ```
//!
//! The transaction is durable before the object store sees the write, so
//! an entity write never lands without its change rows. If the object
//! store refuses the write, `Abort(tx)` retracts the rows; replay drops
//! the changes of an aborted transaction even after its `Commit`. A crash
//! between `Commit` and the object store commit can upload a change whose
//! write never landed, which the at-least-once contract tolerates.
//! Commits from different threads interleave freely; only compaction
//! excludes them.

use crate::change_log::{Change, ChangeLog};
use crate::config::StoreConfig;
use crate::crypto::ValueCipher;
use crate::deferred::{DeferredChange, DeferredChangeCache, DeferredKey};
use crate::error::{CoreError, CoreResult};
use crate::groups::{encode_group_name, CursorAdvance, GroupCursor, GroupCursorTable, FALLBACK_GROUP};
use crate::journal::{Journal, JournalRecord};
use crate::object_store::ObjectStore;
use crate::record::Record;
use crate::tombstones::TombstoneStore;
use crate::types::{now_millis, ChangeId, TransactionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tidesync_protocol::{Operation, Tidemark};
use tidesync_storage::{InMemoryBackend, StorageBackend};

#[cfg(feature = "std")]
use crate::dir::StoreDir;
#[cfg(feature = "std")]
use std::path::Path;
#[cfg(feature = "std")]
use tidesync_storage::FileBackend;

#[derive(Debug, Default)]
struct StoreState {
    changes: ChangeLog,
    tombstones: TombstoneStore,
    deferred: DeferredChangeCache,
    groups: GroupCursorTable,
}

/// Counts of the durable tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Changes awaiting upload.
    pub pending_changes: usize,
    /// Tombstoned record ids.
    pub tombstones: usize,
    /// Deferred inbound changes.
    pub deferred: usize,
    /// Known sync groups.
    pub groups: usize,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

/// Outcome of a journal compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Journal size before.
    pub before_bytes: u64,
    /// Journal size after.
    pub after_bytes: u64,
    /// Records in the rewritten journal.
    pub records: usize,
}

/// Durable sync state for one device.
pub struct SyncStore {
    journal: Journal,
    state: RwLock<StoreState>,
    /// Held shared by tracked commits, exclusively by compaction.
    commit_gate: RwLock<()>,
    next_change_id: AtomicU64,
    next_txid: AtomicU64,
    default_group: RwLock<Option<String>>,
    config: StoreConfig,
    #[cfg(feature = "std")]
    _dir: Option<StoreDir>,
}

impl SyncStore {
    /// Opens (or creates) a store in a directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another process or the journal
    /// is corrupt.
    #[cfg(feature = "std")]
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::with_backend(Box::new(backend), config)?;
        store._dir = Some(dir);
        tracing::info!(path = %path.display(), "opened sync store");
        Ok(store)
    }

    /// Creates a store that lives only in memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a store over an arbitrary backend, replaying its journal.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        let journal = Journal::new(backend, config.sync_on_write);
        let records = journal.recover()?;
        let replayed = records.len();
        let (state, next_change_id, next_txid) = replay(records);

        tracing::debug!(
            records = replayed,
            pending = state.changes.len(),
            tombstones = state.tombstones.len(),
            deferred = state.deferred.len(),
            groups = state.groups.len(),
            "replayed sync journal"
        );

        Ok(Self {
            journal,
            state: RwLock::new(state),
            commit_gate: RwLock::new(()),
            next_change_id: AtomicU64::new(next_change_id),
            next_txid: AtomicU64::new(next_txid),
            default_group: RwLock::new(None),
            config,
            #[cfg(feature = "std")]
            _dir: None,
        })
    }

    /// The configuration this store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn allocate_change_id(&self) -> ChangeId {
        ChangeId::new(self.next_change_id.fetch_add(1, Ordering::SeqCst))
    }

    fn allocate_txid(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }

    // ------------------------------------------------------------------
    // Change log
    // ------------------------------------------------------------------

    /// Logs one field mutation as its own committed transaction.
    pub fn record_mutation(
        &self,
        entity: &str,
        record_id: &str,
        property: &str,
        value: impl Into<String>,
        group: &str,
    ) -> CoreResult<ChangeId> {
        let _gate = self.commit_gate.read();
        let change = Change {
            id: self.allocate_change_id(),
            group: group.to_string(),
            entity: entity.to_string(),
            record_id: record_id.to_string(),
            property: property.to_string(),
            value: value.into(),
            operation: Operation::Set,
            timestamp: now_millis(),
        };
        let id = change.id;
        self.log_committed(vec![change])?;
        Ok(id)
    }

    fn log_committed(&self, changes: Vec<Change>) -> CoreResult<()> {
        let txid = self.allocate_txid();
        let mut records = Vec::with_capacity(changes.len() + 2);
        records.push(JournalRecord::Begin { txid });
        records.extend(changes.iter().cloned().map(|change| JournalRecord::ChangeAppended { txid, change }));
        records.push(JournalRecord::Commit { txid });
        self.journal.append_all(&records)?;

        let mut state = self.state.write();
        for change in changes {
            state.changes.insert(change);
        }
        Ok(())
    }

    /// Commits a record through the object store and logs one change per
    /// dirty field, as a single journal transaction.
    ///
    /// A record without a visibility group is assigned the effective
    /// default group first. Returns the ids of the logged changes.
    ///
    /// # Errors
    ///
    /// [`CoreError::CommitRefused`] if the object store rejects the commit;
    /// the transaction is aborted and no change stays pending. A journal
    /// failure is returned before the object store is called.
    pub fn commit_tracked(
        &self,
        objects: &dyn ObjectStore,
        record: &mut Record,
        cipher: &dyn ValueCipher,
    ) -> CoreResult<Vec<ChangeId>> {
        let _gate = self.commit_gate.read();

        if record.group().is_none() {
            let encoded = self.ensure_default_group()?;
            objects.set_visibility_group(record, &encoded);
        }
        let group = record.group().unwrap_or_default().to_string();

        let operation = if objects
            .find_by_primary_key(record.entity(), record.id())
            .is_some()
        {
            Operation::Set
        } else {
            Operation::Create
        };

        let timestamp = now_millis();
        let mut changes = Vec::new();
        for (property, value) in record.dirty_fields() {
            changes.push(Change {
                id: self.allocate_change_id(),
                group: group.clone(),
                entity: record.entity().to_string(),
                record_id: record.id().to_string(),
                property: property.to_string(),
                value: cipher.encrypt(value)?,
                operation,
                timestamp,
            });
        }

        if changes.is_empty() {
            return if objects.commit(record) {
                Ok(Vec::new())
            } else {
                Err(CoreError::commit_refused(record.entity(), record.id()))
            };
        }

        let txid = self.allocate_txid();
        let mut staged = Vec::with_capacity(changes.len() + 2);
        staged.push(JournalRecord::Begin { txid });
        staged.extend(changes.iter().cloned().map(|change| JournalRecord::ChangeAppended { txid, change }));
        staged.push(JournalRecord::Commit { txid });
        self.journal.append_all(&staged)?;

        if !objects.commit(record) {
            tracing::debug!(entity = record.entity(), id = record.id(), %txid, "tracked commit refused");
            if let Err(err) = self.journal.append(&JournalRecord::Abort { txid }) {
                tracing::warn!(%txid, error = %err, "could not retract refused commit; its changes reappear on reopen");
            }
            return Err(CoreError::commit_refused(record.entity(), record.id()));
        }

        let ids: Vec<ChangeId> = changes.iter().map(|c| c.id).collect();
        let mut state = self.state.write();
        for change in changes {
            state.changes.insert(change);
        }
        drop(state);

        tracing::debug!(entity = record.entity(), id = record.id(), changes = ids.len(), %txid, "tracked commit");
        Ok(ids)
    }

    /// Deletes a record through the object store, logs a delete-marker
    /// change and tombstones the id.
    pub fn delete_tracked(&self, objects: &dyn ObjectStore, record: &Record) -> CoreResult<ChangeId> {
        let _gate = self.commit_gate.read();
        let group = match record.group() {
            Some(group) => group.to_string(),
            None => self.ensure_default_group()?,
        };

        if !objects.delete(record) {
            tracing::debug!(entity = record.entity(), id = record.id(), "delete of absent record");
        }

        let change = Change::delete_marker(
            self.allocate_change_id(),
            group,
            record.entity(),
            record.id(),
            now_millis(),
        );
        let id = change.id;
        self.log_committed(vec![change])?;
        self.add_tombstone(record.id())?;
        Ok(id)
    }

    /// Up to `limit` oldest pending changes. Nothing is removed.
    #[must_use]
    pub fn drain_oldest(&self, limit: usize) -> Vec<Change> {
        self.state.read().changes.drain_oldest(limit)
    }

    /// Removes acknowledged changes. Returns how many were pending.
    pub fn remove_changes(&self, ids: &[ChangeId]) -> CoreResult<usize> {
        let mut state = self.state.write();
        let present: Vec<ChangeId> = ids.iter().copied().filter(|id| state.changes.contains(*id)).collect();
        if present.is_empty() {
            return Ok(0);
        }
        self.journal.append(&JournalRecord::ChangesRemoved { ids: present.clone() })?;
        Ok(state.changes.remove(&present))
    }

    /// Number of changes awaiting upload.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.state.read().changes.len()
    }

    // ------------------------------------------------------------------
    // Tombstones
    // ------------------------------------------------------------------

    /// Tombstones a record id. Returns false if it already was.
    pub fn add_tombstone(&self, record_id: &str) -> CoreResult<bool> {
        let mut state = self.state.write();
        if state.tombstones.contains(record_id) {
            return Ok(false);
        }
        self.journal.append(&JournalRecord::TombstoneAdded {
            record_id: record_id.to_string(),
        })?;
        Ok(state.tombstones.insert(record_id))
    }

    /// Returns true if `record_id` is tombstoned.
    #[must_use]
    pub fn is_tombstoned(&self, record_id: &str) -> bool {
        self.state.read().tombstones.contains(record_id)
    }

    /// All tombstoned ids, sorted.
    #[must_use]
    pub fn tombstones(&self) -> Vec<String> {
        self.state.read().tombstones.iter().map(str::to_string).collect()
    }

    // ------------------------------------------------------------------
    // Deferred cache
    // ------------------------------------------------------------------

    /// Parks an inbound change. Returns the entry it replaced.
    pub fn store_deferred(&self, change: DeferredChange) -> CoreResult<Option<DeferredChange>> {
        let mut state = self.state.write();
        self.journal.append(&JournalRecord::DeferredStored {
            change: change.clone(),
        })?;
        Ok(state.deferred.store(change))
    }

    /// Clears a deferred entry.
    pub fn clear_deferred(&self, key: &DeferredKey) -> CoreResult<Option<DeferredChange>> {
        let mut state = self.state.write();
        if state.deferred.get(key).is_none() {
            return Ok(None);
        }
        self.journal
            .append(&JournalRecord::DeferredCleared { key: key.clone() })?;
        Ok(state.deferred.remove(key))
    }

    /// Looks up a deferred entry.
    #[must_use]
    pub fn deferred(&self, key: &DeferredKey) -> Option<DeferredChange> {
        self.state.read().deferred.get(key).cloned()
    }

    /// All deferred entries in key order.
    #[must_use]
    pub fn deferred_changes(&self) -> Vec<DeferredChange> {
        self.state.read().deferred.iter().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Group cursors
    // ------------------------------------------------------------------

    /// Up to `n` groups, least recently polled first.
    #[must_use]
    pub fn poll_groups(&self, n: usize) -> Vec<GroupCursor> {
        self.state.read().groups.poll(n)
    }

    /// Stores a group's new tidemark and poll time.
    ///
    /// A regressing tidemark is ignored; the poll time still moves.
    pub fn advance_group(
        &self,
        encoded: &str,
        tidemark: Option<Tidemark>,
        now: u64,
    ) -> CoreResult<CursorAdvance> {
        let mut state = self.state.write();
        let (cursor, outcome) = state.groups.advance(encoded, tidemark, now);
        let cursor = cursor.clone();
        self.journal.append(&JournalRecord::GroupUpserted { group: cursor })?;
        Ok(outcome)
    }

    /// Looks up a group cursor, creating it for a never-seen encoded name.
    pub fn resolve_group(&self, encoded: &str) -> CoreResult<GroupCursor> {
        let mut state = self.state.write();
        let (cursor, created) = state.groups.resolve(encoded);
        let cursor = cursor.clone();
        if created {
            tracing::debug!(group = encoded, "new sync group");
            self.journal.append(&JournalRecord::GroupUpserted {
                group: cursor.clone(),
            })?;
        }
        Ok(cursor)
    }

    /// Subscribes to a readable group name.
    pub fn subscribe_group(&self, name: &str) -> CoreResult<GroupCursor> {
        let mut state = self.state.write();
        let before = state.groups.get(&encode_group_name(name)).cloned();
        let cursor = state.groups.subscribe(name).clone();
        if before.as_ref() != Some(&cursor) {
            self.journal.append(&JournalRecord::GroupUpserted {
                group: cursor.clone(),
            })?;
        }
        Ok(cursor)
    }

    /// Looks up a group cursor.
    #[must_use]
    pub fn group(&self, encoded: &str) -> Option<GroupCursor> {
        self.state.read().groups.get(encoded).cloned()
    }

    /// All group cursors, least recently polled first.
    #[must_use]
    pub fn groups(&self) -> Vec<GroupCursor> {
        let state = self.state.read();
        state.groups.poll(state.groups.len())
    }

    /// Sets the group assigned to records committed without one.
    pub fn set_default_group(&self, name: &str) -> CoreResult<()> {
        self.subscribe_group(name)?;
        *self.default_group.write() = Some(name.to_string());
        Ok(())
    }

    /// Reverts to the device-wide fallback group.
    pub fn clear_default_group(&self) {
        *self.default_group.write() = None;
    }

    /// Readable name of the group new records are assigned to.
    #[must_use]
    pub fn default_group(&self) -> String {
        self.default_group
            .read()
            .clone()
            .unwrap_or_else(|| FALLBACK_GROUP.to_string())
    }

    fn ensure_default_group(&self) -> CoreResult<String> {
        let name = self.default_group();
        let encoded = encode_group_name(&name);
        let known = self
            .state
            .read()
            .groups
            .get(&encoded)
            .is_some_and(|g| g.name.is_some());
        if !known {
            self.subscribe_group(&name)?;
        }
        Ok(encoded)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Counts of every durable table.
    pub fn summary(&self) -> CoreResult<StoreSummary> {
        let state = self.state.read();
        Ok(StoreSummary {
            pending_changes: state.changes.len(),
            tombstones: state.tombstones.len(),
            deferred: state.deferred.len(),
            groups: state.groups.len(),
            journal_bytes: self.journal.size()?,
        })
    }

    /// Journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.journal.size()
    }

    /// Rewrites the journal to hold only live state.
    ///
    /// Blocks tracked commits for the duration.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        let _gate = self.commit_gate.write();
        let state = self.state.read();
        let before_bytes = self.journal.size()?;

        let records = self.snapshot_records(&state);
        let after_bytes = self.journal.rewrite(&records)?;

        tracing::info!(before_bytes, after_bytes, records = records.len(), "compacted sync journal");
        Ok(CompactionReport {
            before_bytes,
            after_bytes,
            records: records.len(),
        })
    }

    /// Compacts if the journal has grown past the configured threshold.
    pub fn maybe_compact(&self) -> CoreResult<Option<CompactionReport>> {
        let threshold = self.config.compact_threshold_bytes;
        if threshold == 0 || self.journal.size()? <= threshold {
            return Ok(None);
        }
        self.compact().map(Some)
    }

    /// Records a compaction would write, without writing them.
    #[must_use]
    pub fn compaction_preview(&self) -> usize {
        let _gate = self.commit_gate.read();
        let state = self.state.read();
        self.snapshot_records(&state).len()
    }

    fn snapshot_records(&self, state: &StoreState) -> Vec<JournalRecord> {
        let mut records = Vec::new();
        let txid = self.allocate_txid();
        records.push(JournalRecord::Snapshot {
            next_change_id: self.next_change_id.load(Ordering::SeqCst),
            next_txid: self.next_txid.load(Ordering::SeqCst),
        });

        if !state.changes.is_empty() {
            records.push(JournalRecord::Begin { txid });
            records.extend(state.changes.iter().map(|change| JournalRecord::ChangeAppended {
                txid,
                change: change.clone(),
            }));
            records.push(JournalRecord::Commit { txid });
        }
        records.extend(state.tombstones.iter().map(|id| JournalRecord::TombstoneAdded {
            record_id: id.to_string(),
        }));
        records.extend(
            state
                .deferred
                .iter()
                .map(|change| JournalRecord::DeferredStored {
                    change: change.clone(),
                }),
        );
        records.extend(
            state
                .groups
                .iter()
                .map(|group| JournalRecord::GroupUpserted {
                    group: group.clone(),
                }),
        );
        records
    }
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SyncStore")
            .field("pending_changes", &state.changes.len())
            .field("tombstones", &state.tombstones.len())
            .field("deferred", &state.deferred.len())
            .field("groups", &state.groups.len())
            .finish_non_exhaustive()
    }
}

/// Rebuilds the tables from journal records.
///
/// Returns the state and the next change id and transaction id to use.
fn replay(records: Vec<JournalRecord>) -> (StoreState, u64, u64) {
    let mut state = StoreState::default();
    let mut open: HashMap<TransactionId, Vec<Change>> = HashMap::new();
    let mut committed: HashMap<TransactionId, Vec<ChangeId>> = HashMap::new();
    let mut next_change_id = 1;
    let mut next_txid = 1;

    for record in records {
        if let Some(txid) = record.txid() {
            next_txid = next_txid.max(txid.as_u64() + 1);
        }
        match record {
            JournalRecord::Begin { txid } => {
                open.entry(txid).or_default();
            }
            JournalRecord::ChangeAppended { txid, change } => {
                next_change_id = next_change_id.max(change.id.as_u64() + 1);
                open.entry(txid).or_default().push(change);
            }
            JournalRecord::Commit { txid } => {
                let changes = open.remove(&txid).unwrap_or_default();
                committed.insert(txid, changes.iter().map(|c| c.id).collect());
                for change in changes {
                    state.changes.insert(change);
                }
            }
            JournalRecord::Abort { txid } => {
                open.remove(&txid);
                if let Some(ids) = committed.remove(&txid) {
                    state.changes.remove(&ids);
                }
            }
            JournalRecord::ChangesRemoved { ids } => {
                state.changes.remove(&ids);
            }
            JournalRecord::TombstoneAdded { record_id } => {
                state.tombstones.insert(record_id);
            }
            JournalRecord::DeferredStored { change } => {
                state.deferred.store(change);
            }
            JournalRecord::DeferredCleared { key } => {
                state.deferred.remove(&key);
            }
            JournalRecord::GroupUpserted { group } => {
                state.groups.upsert(group);
            }
            JournalRecord::Snapshot {
                next_change_id: snap_change,
                next_txid: snap_tx,
            } => {
                next_change_id = next_change_id.max(snap_change);
                next_txid = next_txid.max(snap_tx);
            }
        }
    }

    if !open.is_empty() {
        tracing::warn!(transactions = open.len(), "discarding uncommitted journal transactions");
    }
    (state, next_change_id, next_txid)
}
