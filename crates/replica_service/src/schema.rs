//! Declarative entity schemas.
//!
//! An [`EntitySchema`] lists the application fields an entity type carries,
//! their kinds and defaults, and which of them reference other entity types.
//! [`SchemaHooks`] turns a schema into [`EntityHooks`].

use crate::hooks::EntityHooks;
use replica_core::{Entity, EntityKey, FieldValue, PendingOperation};
use tracing::debug;

/// Kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Integer,
    /// Text.
    Text,
    /// Byte string.
    Bytes,
    /// Array of values.
    Array,
    /// Map of named values.
    Map,
    /// Any value.
    Any,
}

impl FieldKind {
    /// Returns true if `value` has this kind. Null never matches.
    #[must_use]
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (_, FieldValue::Null) => false,
            (FieldKind::Any, _)
            | (FieldKind::Bool, FieldValue::Bool(_))
            | (FieldKind::Integer, FieldValue::Integer(_))
            | (FieldKind::Text, FieldValue::Text(_))
            | (FieldKind::Bytes, FieldValue::Bytes(_))
            | (FieldKind::Array, FieldValue::Array(_))
            | (FieldKind::Map, FieldValue::Map(_)) => true,
            _ => false,
        }
    }
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Expected kind.
    pub kind: FieldKind,
    /// Value used when the field is missing.
    pub default: Option<FieldValue>,
    /// Entity type whose identifiers this field holds.
    pub reference: Option<String>,
}

impl FieldSpec {
    /// Creates a field without default or reference.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            reference: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Marks the field as holding identifiers of `entity_type`.
    #[must_use]
    pub fn references(mut self, entity_type: impl Into<String>) -> Self {
        self.reference = Some(entity_type.into());
        self
    }
}

/// The fields of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    /// Entity type the schema describes.
    pub entity_type: String,
    /// Declared fields.
    pub fields: Vec<FieldSpec>,
}

impl EntitySchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Returns the declared field called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fills missing fields with their defaults.
    pub fn apply_defaults(&self, entity: &mut Entity) {
        for spec in &self.fields {
            if let Some(default) = &spec.default {
                let missing = entity.field(&spec.name).map_or(true, FieldValue::is_null);
                if missing {
                    entity.fields.insert(spec.name.clone(), default.clone());
                }
            }
        }
    }

    /// Drops undeclared fields and fields of the wrong kind.
    pub fn retain_declared(&self, entity: &mut Entity) {
        entity.fields.retain(|name, value| match self.get(name) {
            Some(spec) => value.is_null() || spec.kind.accepts(value),
            None => false,
        });
    }
}

/// [`EntityHooks`] driven by an [`EntitySchema`].
///
/// - `to_storage_format` drops undeclared or mistyped fields and fills
///   defaults
/// - `map_item` fills defaults
/// - `update_linked_operations` rewrites reference fields of this type's
///   pending operations that still hold the synchronised entity's old id
#[derive(Debug, Clone)]
pub struct SchemaHooks {
    schema: EntitySchema,
}

impl SchemaHooks {
    /// Creates hooks for `schema`.
    #[must_use]
    pub fn new(schema: EntitySchema) -> Self {
        Self { schema }
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }
}

fn replace_reference(value: &mut FieldValue, old: &FieldValue, new: &FieldValue) -> bool {
    match value {
        FieldValue::Array(items) => {
            let mut changed = false;
            for item in items.iter_mut() {
                if *item == *old {
                    *item = new.clone();
                    changed = true;
                }
            }
            changed
        }
        other if *other == *old => {
            *other = new.clone();
            true
        }
        _ => false,
    }
}

impl EntityHooks for SchemaHooks {
    fn map_item(&self, mut entity: Entity) -> Entity {
        self.schema.apply_defaults(&mut entity);
        entity
    }

    fn to_storage_format(&self, mut entity: Entity) -> Entity {
        entity.resolved.clear();
        self.schema.retain_declared(&mut entity);
        self.schema.apply_defaults(&mut entity);
        entity
    }

    fn update_linked_operations(
        &self,
        synced_type: &str,
        old_id: &EntityKey,
        new_id: &EntityKey,
        mut operations: Vec<PendingOperation>,
    ) -> Vec<PendingOperation> {
        let references: Vec<&FieldSpec> = self
            .schema
            .fields
            .iter()
            .filter(|f| f.reference.as_deref() == Some(synced_type))
            .collect();
        if references.is_empty() {
            return operations;
        }

        let old = old_id.to_field_value();
        let new = new_id.to_field_value();
        for op in operations
            .iter_mut()
            .filter(|op| op.entity_type == self.schema.entity_type)
        {
            for spec in &references {
                if let Some(value) = op.snapshot.fields.get_mut(&spec.name) {
                    if replace_reference(value, &old, &new) {
                        debug!(
                            entity_type = %op.entity_type,
                            sequence = op.sequence,
                            field = %spec.name,
                            "rewrote linked identifier"
                        );
                    }
                }
            }
        }
        operations
    }
}
