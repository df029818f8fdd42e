//! Ordered configuration trees.
//!
//! A [`ConfigNode`] is a string-keyed YAML mapping that preserves insertion
//! order. Values stay `serde_yaml::Value` so scalars, sequences and nested
//! mappings round-trip exactly as they were written.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Key marking a node as instantiable.
pub const TARGET_KEY: &str = "_target_";

/// Placeholder for a mandatory value that must be supplied before use.
pub const MISSING: &str = "???";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigNode(Mapping);

impl ConfigNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a YAML value into a node. `null` becomes an empty node; any
    /// other non-mapping value is rejected. Scalar keys are normalised to
    /// strings.
    pub fn from_value(value: Value, origin: &str) -> ConfigResult<Self> {
        match normalize_keys(value) {
            Value::Null => Ok(Self::new()),
            Value::Mapping(map) => Ok(Self(map)),
            other => Err(ConfigError::TypeMismatch {
                path: origin.to_string(),
                existing: "mapping",
                incoming: kind_of(&other),
            }),
        }
    }

    pub fn parse_yaml(text: &str) -> ConfigResult<Self> {
        let value: Value =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml { path: None, source })?;
        Self::from_value(value, "")
    }

    pub fn to_yaml_string(&self) -> ConfigResult<String> {
        serde_yaml::to_string(&self.0).map_err(|source| ConfigError::Yaml { path: None, source })
    }

    #[must_use]
    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Mapping(self.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().filter_map(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().filter_map(|(k, v)| k.as_str().map(|k| (k, v)))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(Value::String(key.into()), value)
    }

    /// Remove a key while keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.0.get(key).cloned()?;
        let map = std::mem::take(&mut self.0);
        self.0 = map.into_iter().filter(|(k, _)| k.as_str() != Some(key)).collect();
        Some(removed)
    }

    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = split_path(path).into_iter();
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = child(current, segment)?;
        }
        Some(current)
    }

    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = split_path(path).into_iter();
        let first = segments.next()?;
        let mut current = self.0.get_mut(first)?;
        for segment in segments {
            current = child_mut(current, segment)?;
        }
        Some(current)
    }

    #[must_use]
    pub fn contains_path(&self, path: &str) -> bool {
        self.get_path(path).is_some()
    }

    /// Sub-node at `path`, if that path holds a mapping.
    #[must_use]
    pub fn node_at(&self, path: &str) -> Option<Self> {
        match self.get_path(path)? {
            Value::Mapping(map) => Some(Self(map.clone())),
            _ => None,
        }
    }

    /// Deep-merge `other` into this node; `other` wins on conflicts.
    pub fn merge(&mut self, other: Self) -> ConfigResult<()> {
        merge_mappings(&mut self.0, other.0, "")
    }

    /// Deep-merge `other` after nesting it under the dotted `package` path.
    pub fn merge_at(&mut self, package: &str, other: Self) -> ConfigResult<()> {
        let mut wrapped = other.into_value();
        for segment in split_path(package).into_iter().rev() {
            let mut map = Mapping::new();
            map.insert(Value::String(segment.to_string()), wrapped);
            wrapped = Value::Mapping(map);
        }
        match wrapped {
            Value::Mapping(map) => merge_mappings(&mut self.0, map, ""),
            _ => Ok(()),
        }
    }

    /// Assign `value` at `path`.
    ///
    /// With `create` set, missing intermediate mappings are created; without
    /// it a missing leaf fails with [`ConfigError::UnknownKey`]. A mapping
    /// assigned onto a mapping is deep-merged. Returns the previous value.
    pub fn set_path(&mut self, path: &str, value: Value, create: bool) -> ConfigResult<Option<Value>> {
        let segments = split_path(path);
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(ConfigError::UnknownKey { path: path.to_string() });
        };

        let mut current = &mut self.0;
        let mut walked = String::new();
        for (depth, segment) in parents.iter().enumerate() {
            walked = join_path(&walked, segment);
            let key = Value::String((*segment).to_string());
            if !current.contains_key(&key) {
                if !create {
                    return Err(ConfigError::UnknownKey { path: path.to_string() });
                }
                current.insert(key.clone(), Value::Mapping(Mapping::new()));
            }
            let slot = current
                .get_mut(&key)
                .ok_or_else(|| ConfigError::UnknownKey { path: path.to_string() })?;
            if slot.is_null() && create {
                *slot = Value::Mapping(Mapping::new());
            }
            current = match slot {
                Value::Mapping(map) => map,
                Value::Sequence(_) => return set_in_sequence(slot, &segments[depth + 1..], value, path),
                other => {
                    return Err(ConfigError::TypeMismatch {
                        path: walked,
                        existing: kind_of(other),
                        incoming: "mapping",
                    })
                }
            };
        }

        let key = Value::String((*leaf).to_string());
        match current.get_mut(&key) {
            None if !create => Err(ConfigError::UnknownKey { path: path.to_string() }),
            None => {
                current.insert(key, value);
                Ok(None)
            }
            Some(existing) => {
                let previous = existing.clone();
                match (existing, value) {
                    (Value::Mapping(target), Value::Mapping(incoming)) => {
                        merge_mappings(target, incoming, path)?;
                    }
                    (slot, value) => *slot = value,
                }
                Ok(Some(previous))
            }
        }
    }

    /// Remove the value at `path`, failing with [`ConfigError::UnknownKey`]
    /// when it does not exist.
    pub fn remove_path(&mut self, path: &str) -> ConfigResult<Value> {
        let unknown = || ConfigError::UnknownKey { path: path.to_string() };
        let segments = split_path(path);
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(unknown());
        };
        if parents.is_empty() {
            return self.remove(leaf).ok_or_else(unknown);
        }
        let Some(Value::Mapping(map)) = self.get_path_mut(&parents.join(".")) else {
            return Err(unknown());
        };
        let mut parent = Self(std::mem::take(map));
        let removed = parent.remove(leaf);
        *map = parent.0;
        removed.ok_or_else(unknown)
    }

    /// Dotted paths of every leaf holding the `???` placeholder.
    #[must_use]
    pub fn missing_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_missing(&Value::Mapping(self.0.clone()), "", &mut out);
        out
    }
}

impl From<Mapping> for ConfigNode {
    fn from(map: Mapping) -> Self {
        Self(map)
    }
}

/// Short name of a value's YAML kind, used in error messages.
#[must_use]
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[must_use]
pub fn is_missing(value: &Value) -> bool {
    value.as_str() == Some(MISSING)
}

#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

#[must_use]
pub fn join_path(prefix: &str, key: &str) -> String {
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{prefix}.{key}"),
    }
}

/// Render a scalar for override dirnames and environment variables.
#[must_use]
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Mapping(map) => map.get(segment),
        Value::Sequence(seq) => segment.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Mapping(map) => map.get_mut(segment),
        Value::Sequence(seq) => segment.parse::<usize>().ok().and_then(move |i| seq.get_mut(i)),
        _ => None,
    }
}

fn set_in_sequence(
    slot: &mut Value,
    rest: &[&str],
    value: Value,
    path: &str,
) -> ConfigResult<Option<Value>> {
    let unknown = || ConfigError::UnknownKey { path: path.to_string() };
    let mut current = slot;
    for segment in rest {
        current = match current {
            Value::Sequence(seq) => {
                let index = segment.parse::<usize>().map_err(|_| unknown())?;
                seq.get_mut(index).ok_or_else(unknown)?
            }
            Value::Mapping(map) => map.get_mut(*segment).ok_or_else(unknown)?,
            _ => return Err(unknown()),
        };
    }
    Ok(Some(std::mem::replace(current, value)))
}

fn merge_mappings(target: &mut Mapping, incoming: Mapping, base: &str) -> ConfigResult<()> {
    for (key, value) in incoming {
        let path = join_path(base, key.as_str().unwrap_or_default());
        match target.get_mut(&key) {
            Some(existing) => merge_values(existing, value, &path)?,
            None => {
                target.insert(key, value);
            }
        }
    }
    Ok(())
}

fn merge_values(existing: &mut Value, incoming: Value, path: &str) -> ConfigResult<()> {
    if existing.is_null() || is_missing(existing) || incoming.is_null() {
        *existing = incoming;
        return Ok(());
    }
    match (existing, incoming) {
        (Value::Mapping(target), Value::Mapping(map)) => merge_mappings(target, map, path),
        (Value::Sequence(target), Value::Sequence(seq)) => {
            *target = seq;
            Ok(())
        }
        (existing, incoming) => {
            if is_container(existing) || is_container(&incoming) {
                return Err(ConfigError::TypeMismatch {
                    path: path.to_string(),
                    existing: kind_of(existing),
                    incoming: kind_of(&incoming),
                });
            }
            *existing = incoming;
            Ok(())
        }
    }
}

#[must_use]
pub fn is_container(value: &Value) -> bool {
    matches!(value, Value::Mapping(_) | Value::Sequence(_))
}

fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::String(s) => Value::String(s),
                        other => Value::String(scalar_to_string(&other)),
                    };
                    (key, normalize_keys(v))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn collect_missing(value: &Value, path: &str, out: &mut Vec<String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                collect_missing(v, &join_path(path, k.as_str().unwrap_or_default()), out);
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                collect_missing(v, &join_path(path, &i.to_string()), out);
            }
        }
        v if is_missing(v) => out.push(path.to_string()),
        _ => {}
    }
}
