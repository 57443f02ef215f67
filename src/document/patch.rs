//! Flattened field patches
//!
//! A `FieldPatch` maps dotted field paths (`"attributes.hp.value"`) to a
//! change: set the value or remove the field. Removals are explicit so a
//! patch can restore a field set exactly, including deletions. Arrays are
//! leaves and are always replaced whole.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::Fields;

/// A single change at a field path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldChange {
    Set(Value),
    Remove,
}

/// Ordered set of path-level changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPatch(BTreeMap<String, FieldChange>);

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a (possibly nested) object into leaf `Set` changes.
    /// Empty objects are kept as leaves.
    pub fn from_object(object: &Fields) -> Self {
        let mut patch = Self::new();
        flatten_into(object, "", &mut patch);
        patch
    }

    /// Builder: set `path` to `value`.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(path.into(), FieldChange::Set(value.into()));
        self
    }

    /// Builder: remove the field at `path`.
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.0.insert(path.into(), FieldChange::Remove);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, change: FieldChange) {
        self.0.insert(path.into(), change);
    }

    pub fn take(&mut self, path: &str) -> Option<FieldChange> {
        self.0.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&FieldChange> {
        self.0.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FieldChange> {
        self.0.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply in place. Removals run before sets so a removal of a parent
    /// path never clobbers a value set beneath it.
    pub fn apply_to(&self, fields: &mut Fields) {
        for (path, change) in &self.0 {
            if let FieldChange::Remove = change {
                remove_path(fields, path);
            }
        }
        for (path, change) in &self.0 {
            if let FieldChange::Set(value) = change {
                set_path(fields, path, value.clone());
            }
        }
    }

    /// Apply to a copy.
    pub fn applied(&self, fields: &Fields) -> Fields {
        let mut out = fields.clone();
        self.apply_to(&mut out);
        out
    }
}

fn flatten_into(object: &Fields, prefix: &str, patch: &mut FieldPatch) {
    for (key, value) in object {
        let path = join(prefix, key);
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, &path, patch),
            _ => patch.insert(path, FieldChange::Set(value.clone())),
        }
    }
}

/// True if `path` lies strictly beneath `ancestor` (`"a.b"` is beneath `"a"`).
pub fn is_beneath(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

pub(crate) fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Read the value at a dotted path.
pub fn get_path<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = fields.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Intermediate non-object values are replaced by objects.
pub(crate) fn set_path(fields: &mut Fields, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = fields;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    current.insert(last.to_string(), value);
}

pub(crate) fn remove_path(fields: &mut Fields, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = fields;
    for segment in parents {
        current = match current.get_mut(*segment).and_then(Value::as_object_mut) {
            Some(map) => map,
            None => return,
        };
    }
    current.remove(*last);
}
