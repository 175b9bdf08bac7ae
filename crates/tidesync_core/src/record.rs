//! In-memory view of one tracked object.

use crate::value::FieldValue;
use std::collections::{BTreeMap, BTreeSet};

/// A record of a syncable entity, as handed between the application,
/// the object store and the sync engine.
///
/// Setting a field marks it dirty; a tracked commit logs one change per
/// dirty field and then clears the set.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    id: String,
    group: Option<String>,
    fields: BTreeMap<String, FieldValue>,
    dirty: BTreeSet<String>,
}

impl Record {
    /// Creates an empty record.
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            group: None,
            fields: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Primary key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encoded visibility group, if assigned.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Overwrites the visibility group.
    pub fn set_group(&mut self, encoded_group: impl Into<String>) {
        self.group = Some(encoded_group.into());
    }

    /// Assigns the visibility group only if none is set.
    ///
    /// Returns true if the group was assigned.
    pub fn set_group_if_unset(&mut self, encoded_group: &str) -> bool {
        if self.group.is_some() {
            return false;
        }
        self.group = Some(encoded_group.to_string());
        true
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a field and marks it dirty.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        self.dirty.insert(name.clone());
        self.fields.insert(name, value.into());
    }

    /// All fields.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Dirty fields with their current values, in name order.
    pub fn dirty_fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.dirty
            .iter()
            .filter_map(|name| self.fields.get(name).map(|v| (name.as_str(), v)))
    }

    /// Returns true if any field changed since the last commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Forgets which fields changed.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_marks_dirty() {
        let mut record = Record::new("Person", "P1");
        assert!(!record.is_dirty());
        record.set("name", "Bob");
        record.set("age", 30_i64);
        let dirty: Vec<_> = record.dirty_fields().map(|(n, _)| n).collect();
        assert_eq!(dirty, vec!["age", "name"]);
        record.clear_dirty();
        assert!(!record.is_dirty());
        assert_eq!(record.get("name"), Some(&FieldValue::from("Bob")));
    }

    #[test]
    fn group_is_assigned_once() {
        let mut record = Record::new("Person", "P1");
        assert!(record.set_group_if_unset("g1"));
        assert!(!record.set_group_if_unset("g2"));
        assert_eq!(record.group(), Some("g1"));
        record.set_group("g3");
        assert_eq!(record.group(), Some("g3"));
    }
}
