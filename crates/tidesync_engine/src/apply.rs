//! Applies inbound changes to the object store.

use crate::config::TidemarkPolicy;
use crate::error::SyncResult;
use tidesync_core::{DeferredChange, DeferredKey, ObjectStore, SyncStore, ValueCipher};
use tidesync_protocol::{is_delete_marker, WireChange};

/// What happened to one inbound change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The field was written and committed.
    Applied,
    /// The record was deleted (or was already gone) and is tombstoned.
    Deleted,
    /// The record is tombstoned; the change was dropped.
    Discarded,
    /// The entity or property is unknown locally; the change was parked.
    Deferred,
    /// The change could not be applied.
    Failed(String),
}

impl ApplyOutcome {
    /// True for every outcome except [`ApplyOutcome::Failed`].
    pub fn is_settled(&self) -> bool {
        !matches!(self, ApplyOutcome::Failed(_))
    }
}

/// Per-change apply rules over the sync store and the object store.
pub struct ApplyEngine<'a> {
    store: &'a SyncStore,
    objects: &'a dyn ObjectStore,
    cipher: &'a dyn ValueCipher,
    policy: TidemarkPolicy,
}

impl<'a> ApplyEngine<'a> {
    /// Creates an apply engine.
    pub fn new(
        store: &'a SyncStore,
        objects: &'a dyn ObjectStore,
        cipher: &'a dyn ValueCipher,
        policy: TidemarkPolicy,
    ) -> Self {
        Self {
            store,
            objects,
            cipher,
            policy,
        }
    }

    /// Applies one change arriving in `group`.
    ///
    /// `Err` is reserved for sync store failures; everything the object
    /// store or cipher rejects comes back as an outcome.
    pub fn apply(&self, group: &str, change: &WireChange) -> SyncResult<ApplyOutcome> {
        if is_delete_marker(&change.property) {
            return self.apply_delete(change);
        }

        let existing = self
            .objects
            .find_by_primary_key(&change.entity, &change.record_id);
        if existing.is_none() && self.store.is_tombstoned(&change.record_id) {
            tracing::trace!(record = %change.record_id, "dropping write to tombstoned record");
            return Ok(ApplyOutcome::Discarded);
        }

        if !self
            .objects
            .field_names(&change.entity)
            .contains(&change.property)
        {
            self.defer(group, change)?;
            return Ok(ApplyOutcome::Deferred);
        }

        let mut record = match existing {
            Some(record) => record,
            None => match self.objects.create(&change.entity, &change.record_id) {
                Some(record) => record,
                None => {
                    self.defer(group, change)?;
                    return Ok(ApplyOutcome::Deferred);
                }
            },
        };

        let value = match self.cipher.decrypt(&change.value) {
            Ok(value) => value,
            Err(e) => return self.fail(group, change, e.to_string()),
        };

        self.objects.set_field(&mut record, &change.property, value);
        self.objects.set_visibility_group(&mut record, group);
        if !self.objects.commit(&mut record) {
            let reason = format!("object store refused {}/{}", change.entity, change.record_id);
            return self.fail(group, change, reason);
        }

        // A parked value for the same field is now stale.
        let key = DeferredKey::new(&change.record_id, &change.entity, &change.property);
        if self.store.deferred(&key).is_some() {
            self.store.clear_deferred(&key)?;
        }
        Ok(ApplyOutcome::Applied)
    }

    fn apply_delete(&self, change: &WireChange) -> SyncResult<ApplyOutcome> {
        if let Some(record) = self
            .objects
            .find_by_primary_key(&change.entity, &change.record_id)
        {
            if !self.objects.delete(&record) {
                tracing::debug!(record = %change.record_id, "record vanished before delete");
            }
        }
        self.store.add_tombstone(&change.record_id)?;
        Ok(ApplyOutcome::Deleted)
    }

    /// Under [`TidemarkPolicy::Unconditional`] the cursor moves past a
    /// failed change, so it is parked for [`SyncEngine::replay_deferred`].
    ///
    /// [`SyncEngine::replay_deferred`]: crate::SyncEngine::replay_deferred
    fn fail(&self, group: &str, change: &WireChange, reason: String) -> SyncResult<ApplyOutcome> {
        if self.policy == TidemarkPolicy::Unconditional {
            self.defer(group, change)?;
        }
        Ok(ApplyOutcome::Failed(reason))
    }

    fn defer(&self, group: &str, change: &WireChange) -> SyncResult<()> {
        tracing::debug!(
            entity = %change.entity,
            property = %change.property,
            record = %change.record_id,
            "parking change for replay"
        );
        self.store.store_deferred(DeferredChange {
            record_id: change.record_id.clone(),
            entity: change.entity.clone(),
            property: change.property.clone(),
            raw_value: change.value.clone(),
            group: group.to_string(),
        })?;
        Ok(())
    }
}
