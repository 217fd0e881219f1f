//! Body Mutator (spec §4.5): applies a configured list of `set(path, value)` /
//! `remove(path)` operations over a JSON body using JSON-pointer-like path syntax.
//!
//! Idempotence is structural here rather than stateful: the caller always hands this
//! mutator the *original* raw body to mutate, never a previous try's output (spec §4.3
//! step 4), so `mutate(original, onRetry=true) == mutate(original, onRetry=false)` holds
//! by construction.

use bytes::Bytes;
use serde_json::Value;

use crate::error::ProcessorError;
use crate::types::BodyMutationConfig;

pub struct BodyMutator {
    config: BodyMutationConfig,
}

impl BodyMutator {
    pub fn new(config: BodyMutationConfig) -> Self {
        BodyMutator { config }
    }

    pub fn is_empty(&self) -> bool {
        self.config.set.is_empty() && self.config.remove.is_empty()
    }

    pub fn apply(&self, original_raw: &Bytes) -> Result<Bytes, ProcessorError> {
        let mut value: Value = serde_json::from_slice(original_raw)
            .map_err(|e| ProcessorError::RequestParseError(format!("body mutator: {e}")))?;

        for path in &self.config.remove {
            remove_path(&mut value, path);
        }
        for (path, raw_value) in &self.config.set {
            set_path(&mut value, path, coerce(raw_value));
        }

        serde_json::to_vec(&value)
            .map(Bytes::from)
            .map_err(|e| ProcessorError::TranslationError(format!("body mutator re-serialize: {e}")))
    }
}

fn coerce(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

fn set_path(root: &mut Value, path: &str, new_value: Value) {
    let segments = split_path(path);
    if segments.is_empty() {
        *root = new_value;
        return;
    }
    if !root.is_object() {
        *root = Value::Object(serde_json::Map::new());
    }
    let mut current = root;
    for seg in &segments[..segments.len() - 1] {
        let map = current.as_object_mut().expect("ensured object above");
        let entry = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        current = entry;
    }
    let last = segments.last().unwrap();
    current
        .as_object_mut()
        .expect("ensured object above")
        .insert(last.to_string(), new_value);
}

fn remove_path(root: &mut Value, path: &str) {
    let segments = split_path(path);
    if segments.is_empty() {
        return;
    }
    let mut current = root;
    for seg in &segments[..segments.len() - 1] {
        match current.get_mut(*seg) {
            Some(v) => current = v,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(*segments.last().unwrap());
    }
}
