use serde_json::{Map, Value};

use super::ModelData;

/// Reads a dotted path (`params.visible`) inside a property bag.
/// Walking through a non-object yields `None`.
pub fn path_get<'a>(props: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = props.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes `value` at a dotted path, creating intermediate objects and
/// replacing any non-object value found on the way.
pub fn path_set(props: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut current = props;
    for segment in parents {
        let slot = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert((*last).to_string(), value);
}

/// What changed between two versions of a document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataDiff {
    /// Property keys present on only one side.
    pub changed_keys: Vec<String>,
    /// Keys of the old property bag whose value differs in the new one
    /// (removed keys included).
    pub changed_props: Vec<String>,
    /// Top-level attributes other than `properties` that differ.
    pub changed_attrs: Vec<String>,
}

impl DataDiff {
    pub fn is_empty(&self) -> bool {
        self.changed_keys.is_empty()
            && self.changed_props.is_empty()
            && self.changed_attrs.is_empty()
    }
}

pub fn diff(old: &ModelData, new: &ModelData) -> DataDiff {
    let mut out = DataDiff::default();

    for key in old.properties.keys() {
        if !new.properties.contains_key(key) {
            out.changed_keys.push(key.clone());
        }
    }
    for key in new.properties.keys() {
        if !old.properties.contains_key(key) {
            out.changed_keys.push(key.clone());
        }
    }

    for (key, value) in &old.properties {
        if new.properties.get(key) != Some(value) {
            out.changed_props.push(key.clone());
        }
    }

    if old.id != new.id {
        out.changed_attrs.push("id".into());
    }
    if old.geom.is_some() && old.geom != new.geom {
        out.changed_attrs.push("geom".into());
    }
    for (key, value) in &old.attributes {
        if new.attributes.get(key) != Some(value) {
            out.changed_attrs.push(key.clone());
        }
    }

    out
}
