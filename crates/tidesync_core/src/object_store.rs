//! The object store contract consumed by the apply engine.

use crate::record::Record;
use crate::schema::SchemaRegistry;
use crate::value::FieldValue;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Narrow interface to the application's object store.
///
/// The sync engine never inspects store internals; everything it needs
/// goes through these calls.
pub trait ObjectStore: Send + Sync {
    /// Synced field names of `entity`. Empty if the entity is unknown.
    fn field_names(&self, entity: &str) -> HashSet<String>;

    /// Loads a record by primary key.
    fn find_by_primary_key(&self, entity: &str, id: &str) -> Option<Record>;

    /// Creates a new, uncommitted record. `None` if the entity is unknown.
    fn create(&self, entity: &str, id: &str) -> Option<Record>;

    /// Sets a field on a record.
    fn set_field(&self, record: &mut Record, name: &str, value: FieldValue) {
        record.set(name, value);
    }

    /// Assigns the visibility group. No-op if the record already has one.
    fn set_visibility_group(&self, record: &mut Record, group: &str) {
        record.set_group_if_unset(group);
    }

    /// Persists a record. Returns false if the store refused it.
    fn commit(&self, record: &mut Record) -> bool;

    /// Deletes a record. Returns false if nothing was deleted.
    fn delete(&self, record: &Record) -> bool;
}

/// Schema-checked object store kept in memory.
///
/// Used by tests and by applications that only need the sync state
/// machinery without a real database underneath.
#[derive(Debug)]
pub struct MemoryObjectStore {
    schema: Arc<SchemaRegistry>,
    records: RwLock<HashMap<(String, String), Record>>,
    refuse_commits: AtomicBool,
}

impl MemoryObjectStore {
    /// Creates an empty store over `schema`.
    #[must_use]
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self {
            schema,
            records: RwLock::new(HashMap::new()),
            refuse_commits: AtomicBool::new(false),
        }
    }

    /// The schema this store validates against.
    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Makes every subsequent commit fail (or succeed again).
    pub fn refuse_commits(&self, refuse: bool) {
        self.refuse_commits.store(refuse, Ordering::SeqCst);
    }

    /// Reads a committed record.
    #[must_use]
    pub fn get(&self, entity: &str, id: &str) -> Option<Record> {
        self.records
            .read()
            .get(&(entity.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn field_names(&self, entity: &str) -> HashSet<String> {
        self.schema.field_names(entity)
    }

    fn find_by_primary_key(&self, entity: &str, id: &str) -> Option<Record> {
        self.get(entity, id)
    }

    fn create(&self, entity: &str, id: &str) -> Option<Record> {
        self.schema
            .contains(entity)
            .then(|| Record::new(entity, id))
    }

    fn commit(&self, record: &mut Record) -> bool {
        if self.refuse_commits.load(Ordering::SeqCst) {
            return false;
        }
        let Some(schema) = self.schema.get(record.entity()) else {
            return false;
        };
        if record.fields().any(|(name, _)| !schema.has_field(name)) {
            return false;
        }
        record.clear_dirty();
        self.records.write().insert(
            (record.entity().to_string(), record.id().to_string()),
            record.clone(),
        );
        true
    }

    fn delete(&self, record: &Record) -> bool {
        self.records
            .write()
            .remove(&(record.entity().to_string(), record.id().to_string()))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, FieldType};

    fn store() -> MemoryObjectStore {
        let schema = Arc::new(SchemaRegistry::new());
        schema.register(
            EntitySchema::builder("Person")
                .field("name", FieldType::Text)
                .build(),
        );
        MemoryObjectStore::new(schema)
    }

    #[test]
    fn create_commit_find_delete() {
        let store = store();
        let mut record = store.create("Person", "P1").unwrap();
        store.set_field(&mut record, "name", FieldValue::from("Bob"));
        store.set_visibility_group(&mut record, "g1");
        assert!(store.commit(&mut record));
        assert!(!record.is_dirty());

        let found = store.find_by_primary_key("Person", "P1").unwrap();
        assert_eq!(found.get("name"), Some(&FieldValue::from("Bob")));
        assert_eq!(found.group(), Some("g1"));

        assert!(store.delete(&found));
        assert!(!store.delete(&found));
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_entity_cannot_be_created() {
        assert!(store().create("Ghost", "X").is_none());
    }

    #[test]
    fn unknown_field_is_refused() {
        let store = store();
        let mut record = Record::new("Person", "P1").with_field("shoe_size", 44_i64);
        assert!(!store.commit(&mut record));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn refused_commits() {
        let store = store();
        store.refuse_commits(true);
        let mut record = Record::new("Person", "P1").with_field("name", "Bob");
        assert!(!store.commit(&mut record));
        store.refuse_commits(false);
        assert!(store.commit(&mut record));
    }
}
