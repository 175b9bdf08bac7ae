//! Statically registered entity schemas.
//!
//! Each syncable entity type registers its field set once, at startup or
//! when an app update introduces new fields. The apply engine asks the
//! registry which properties exist before touching a record, so changes
//! for fields this build does not know yet can be parked instead of lost.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Storage type of a registered field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Bytes,
}

/// Field layout of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    primary_key: String,
    fields: BTreeMap<String, FieldType>,
    ignored: BTreeSet<String>,
}

impl EntitySchema {
    /// Starts building a schema for `name` with primary key `"id"`.
    pub fn builder(name: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                name: name.into(),
                primary_key: "id".to_string(),
                fields: BTreeMap::new(),
                ignored: BTreeSet::new(),
            },
        }
    }

    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary key field name.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Type of a field, if it is a synced field.
    #[must_use]
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        if self.is_synced(field) {
            self.fields.get(field).copied()
        } else {
            None
        }
    }

    /// Names of the fields that travel through sync.
    ///
    /// The primary key and ignored properties are excluded.
    #[must_use]
    pub fn field_names(&self) -> HashSet<String> {
        self.fields
            .keys()
            .filter(|f| self.is_synced(f))
            .cloned()
            .collect()
    }

    /// Returns true if `field` is a synced field.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field) && self.is_synced(field)
    }

    fn is_synced(&self, field: &str) -> bool {
        field != self.primary_key && !self.ignored.contains(field)
    }
}

/// Builder for [`EntitySchema`].
#[derive(Debug)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    /// Sets the primary key field name.
    #[must_use]
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.schema.primary_key = field.into();
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.schema.fields.insert(name.into(), ty);
        self
    }

    /// Marks a property as local-only.
    #[must_use]
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.schema.ignored.insert(name.into());
        self
    }

    /// Finishes the schema.
    #[must_use]
    pub fn build(self) -> EntitySchema {
        self.schema
    }
}

/// Thread-safe registry of entity schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: RwLock<HashMap<String, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity, replacing any earlier version of it.
    pub fn register(&self, schema: EntitySchema) {
        tracing::debug!(entity = schema.name(), fields = schema.fields.len(), "registered entity schema");
        self.entities
            .write()
            .insert(schema.name.clone(), Arc::new(schema));
    }

    /// Looks up an entity schema.
    #[must_use]
    pub fn get(&self, entity: &str) -> Option<Arc<EntitySchema>> {
        self.entities.read().get(entity).cloned()
    }

    /// Synced field names of `entity`; empty for an unknown entity.
    #[must_use]
    pub fn field_names(&self, entity: &str) -> HashSet<String> {
        self.get(entity)
            .map(|s| s.field_names())
            .unwrap_or_default()
    }

    /// Returns true if `entity` has the synced field `field`.
    #[must_use]
    pub fn has_field(&self, entity: &str, field: &str) -> bool {
        self.entities
            .read()
            .get(entity)
            .is_some_and(|s| s.has_field(field))
    }

    /// Returns true if `entity` is registered.
    #[must_use]
    pub fn contains(&self, entity: &str) -> bool {
        self.entities.read().contains_key(entity)
    }

    /// Registered entity names, sorted.
    #[must_use]
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }
}
