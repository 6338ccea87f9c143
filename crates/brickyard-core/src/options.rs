//! Per-entity nested key/value configuration store.
//!
//! Values are addressed by dot-separated paths into nested JSON objects.
//! Writing `a.b.c` creates intermediate objects as needed and never destroys
//! sibling keys; reading a missing path returns a caller-supplied fallback.
//! A flat lookup cache maps resolved paths to values and is invalidated in
//! full on every mutation — correctness over cache precision.
//!
//! This module is the silent storage layer only. The announced mutation path
//! (`set` / `set_batch`), which routes changes through the owning brick's
//! event bus before they become visible, lives on the brick's options
//! accessor.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};

type JsonMap = Map<String, Value>;

/// Nested, dot-path addressed configuration storage.
pub struct OptionStore {
    values: RwLock<JsonMap>,
    cache: RwLock<HashMap<String, Option<Value>>>,
}

impl OptionStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(JsonMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a path, or `None` when nothing is stored there.
    pub fn get_opt(&self, path: &str) -> Option<Value> {
        if let Some(hit) = self.cache.read().get(path) {
            return hit.clone();
        }
        let found = lookup(&self.values.read(), path).cloned();
        self.cache.write().insert(path.to_string(), found.clone());
        found
    }

    /// Resolve a path, falling back to `fallback` when nothing is stored.
    pub fn get(&self, path: &str, fallback: Value) -> Value {
        self.get_opt(path).unwrap_or(fallback)
    }

    /// Whether any value (including `null`) is stored at the path.
    pub fn has(&self, path: &str) -> bool {
        self.get_opt(path).is_some()
    }

    /// Snapshot of the whole store as one JSON object.
    pub fn all(&self) -> Value {
        Value::Object(self.values.read().clone())
    }

    /// Write a value without announcing it. The only way to seed defaults
    /// without tripping module-defined side effects.
    pub fn set_silent(&self, path: &str, value: Value) {
        write_path(&mut self.values.write(), path, value);
        self.cache.write().clear();
    }

    /// Write several paths without announcing them.
    pub fn set_silent_batch(&self, values: &JsonMap) {
        {
            let mut stored = self.values.write();
            for (path, value) in values {
                write_path(&mut stored, path, value.clone());
            }
        }
        self.cache.write().clear();
    }

    /// Replace the whole store wholesale. Used once at install time, after
    /// default/seed merging.
    pub(crate) fn replace(&self, object: JsonMap) {
        *self.values.write() = object;
        self.cache.write().clear();
    }
}

impl Default for OptionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(map: &'a JsonMap, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => map.get(path),
        Some((head, rest)) => map
            .get(head)
            .and_then(Value::as_object)
            .and_then(|child| lookup(child, rest)),
    }
}

fn write_path(map: &mut JsonMap, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(JsonMap::new()));
            if !slot.is_object() {
                *slot = Value::Object(JsonMap::new());
            }
            if let Value::Object(child) = slot {
                write_path(child, rest, value);
            }
        }
    }
}

/// Key-wise deep merge: maps merge recursively, arrays and primitives from
/// the overlay replace wholesale.
pub(crate) fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                deep_merge(
                    base_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Expand dot-path keys of a flat-or-nested options object into fully nested
/// form, so `{"grid.rows": 4}` and `{"grid": {"rows": 4}}` merge identically.
pub(crate) fn expand_paths(object: &JsonMap) -> JsonMap {
    let mut expanded = JsonMap::new();
    for (key, value) in object {
        write_path(&mut expanded, key, value.clone());
    }
    expanded
}
