//! Explicit `_target_` registry.
//!
//! Each instantiable node names a registered constructor. Constructors pull
//! their keyword arguments out of [`Arguments`]; anything they leave behind
//! is rejected as an unexpected argument.

use crate::error::{ConfigError, ConfigResult};
use crate::node::{is_missing, join_path, kind_of, ConfigNode, TARGET_KEY};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Keys that steer instantiation and are never passed to a constructor.
const RESERVED_KEYS: [&str; 4] = [TARGET_KEY, "_partial_", "_recursive_", "_convert_"];

/// An instantiated target.
pub trait Component: fmt::Debug + Send + Sync {
    /// The `_target_` this component was built from.
    fn target(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

impl dyn Component {
    /// Downcast to a concrete component type.
    #[must_use]
    pub fn downcast_ref<T: Component + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

pub type Constructor = Arc<dyn Fn(&mut Arguments<'_>) -> ConfigResult<Box<dyn Component>> + Send + Sync>;

/// Maps `_target_` names to constructors.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistry").field("targets", &self.constructors.keys()).finish()
    }
}

impl TargetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in target.
    pub fn with_builtins() -> ConfigResult<Self> {
        let mut registry = Self::new();
        crate::targets::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register a constructor.
    ///
    /// # Errors
    /// `InvalidTargetName` unless the name is a dotted path of at least two
    /// identifiers; `DuplicateTarget` if it is already registered.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> ConfigResult<()>
    where
        F: Fn(&mut Arguments<'_>) -> ConfigResult<Box<dyn Component>> + Send + Sync + 'static,
    {
        if !is_valid_target_name(name) {
            return Err(ConfigError::InvalidTargetName(name.to_string()));
        }
        if self.constructors.contains_key(name) {
            return Err(ConfigError::DuplicateTarget(name.to_string()));
        }
        self.constructors.insert(name.to_string(), Arc::new(constructor));
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiate the node at the root of `node`.
    pub fn instantiate(&self, node: &ConfigNode) -> ConfigResult<Box<dyn Component>> {
        self.instantiate_value(&Value::Mapping(node.as_mapping().clone()), "")
    }

    /// Instantiate the node at `path` inside `config`.
    pub fn instantiate_path(&self, config: &ConfigNode, path: &str) -> ConfigResult<Box<dyn Component>> {
        let value = config.get_path(path).ok_or_else(|| ConfigError::UnknownKey { path: path.to_string() })?;
        self.instantiate_value(value, path)
    }

    /// Instantiate every outermost instantiable node of `config`, returning
    /// their paths. Nested targets are instantiated by their parents.
    pub fn validate(&self, config: &ConfigNode) -> ConfigResult<Vec<String>> {
        let mut roots = Vec::new();
        collect_roots(&Value::Mapping(config.as_mapping().clone()), "", &mut roots);
        for path in &roots {
            self.instantiate_path(config, path)?;
        }
        Ok(roots)
    }

    pub(crate) fn instantiate_value(&self, value: &Value, path: &str) -> ConfigResult<Box<dyn Component>> {
        let Value::Mapping(map) = value else {
            return Err(ConfigError::TypeMismatch {
                path: path.to_string(),
                existing: "mapping",
                incoming: kind_of(value),
            });
        };
        let target = map
            .get(TARGET_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::UnknownTarget { path: path.to_string(), target: String::new() })?;
        let constructor = self
            .constructors
            .get(target)
            .ok_or_else(|| ConfigError::UnknownTarget { path: path.to_string(), target: target.to_string() })?;

        trace!(path, target, "instantiating");
        let mut args = Arguments::new(self, target, path, map);
        let component = (constructor.as_ref())(&mut args)?;
        args.finish()?;
        Ok(component)
    }
}

fn is_valid_target_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|s| {
            let mut chars = s.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn collect_roots(value: &Value, path: &str, out: &mut Vec<String>) {
    match value {
        Value::Mapping(map) if map.contains_key(TARGET_KEY) && !path.is_empty() => out.push(path.to_string()),
        Value::Mapping(map) => {
            for (k, v) in map {
                collect_roots(v, &join_path(path, k.as_str().unwrap_or_default()), out);
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                collect_roots(v, &join_path(path, &i.to_string()), out);
            }
        }
        _ => {}
    }
}

/// Keyword arguments of one instantiable node.
pub struct Arguments<'a> {
    registry: &'a TargetRegistry,
    target: &'a str,
    path: &'a str,
    values: Mapping,
}

impl<'a> Arguments<'a> {
    fn new(registry: &'a TargetRegistry, target: &'a str, path: &'a str, map: &Mapping) -> Self {
        let values = map
            .iter()
            .filter(|(k, _)| !k.as_str().is_some_and(|k| RESERVED_KEYS.contains(&k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { registry, target, path, values }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        self.target
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.path
    }

    /// An `InvalidArgument` error for this node.
    #[must_use]
    pub fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidArgument {
            path: self.path.to_string(),
            target: self.target.to_string(),
            message: message.into(),
        }
    }

    /// Take a raw argument.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn required<T: DeserializeOwned>(&mut self, name: &str) -> ConfigResult<T> {
        match self.take(name) {
            None => Err(self.invalid(format!("missing required argument '{name}'"))),
            Some(value) => self.decode(name, value),
        }
    }

    /// An argument that may be absent or `null`.
    pub fn optional<T: DeserializeOwned>(&mut self, name: &str) -> ConfigResult<Option<T>> {
        match self.take(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.decode(name, value).map(Some),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&mut self, name: &str, default: T) -> ConfigResult<T> {
        Ok(self.optional(name)?.unwrap_or(default))
    }

    /// Instantiate a nested target argument.
    pub fn component(&mut self, name: &str) -> ConfigResult<Box<dyn Component>> {
        let path = join_path(self.path, name);
        match self.take(name) {
            None => Err(self.invalid(format!("missing required argument '{name}'"))),
            Some(value) if is_missing(&value) => Err(ConfigError::MissingValue { path }),
            Some(value) => self.registry.instantiate_value(&value, &path),
        }
    }

    pub fn optional_component(&mut self, name: &str) -> ConfigResult<Option<Box<dyn Component>>> {
        match self.values.get(name) {
            None | Some(Value::Null) => {
                self.take(name);
                Ok(None)
            }
            Some(_) => self.component(name).map(Some),
        }
    }

    /// Take every remaining argument, instantiating nested targets for
    /// validation. Used by targets whose arguments are passed through.
    pub fn rest(&mut self) -> ConfigResult<Mapping> {
        let values = std::mem::take(&mut self.values);
        for (key, value) in &values {
            self.check_passthrough(value, &join_path(self.path, key.as_str().unwrap_or_default()))?;
        }
        Ok(values)
    }

    fn check_passthrough(&self, value: &Value, path: &str) -> ConfigResult<()> {
        match value {
            Value::Mapping(map) if map.contains_key(TARGET_KEY) => {
                self.registry.instantiate_value(value, path).map(|_| ())
            }
            Value::Mapping(map) => map
                .iter()
                .try_for_each(|(k, v)| self.check_passthrough(v, &join_path(path, k.as_str().unwrap_or_default()))),
            Value::Sequence(seq) => seq
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| self.check_passthrough(v, &join_path(path, &i.to_string()))),
            v if is_missing(v) => Err(ConfigError::MissingValue { path: path.to_string() }),
            _ => Ok(()),
        }
    }

    fn decode<T: DeserializeOwned>(&self, name: &str, value: Value) -> ConfigResult<T> {
        if is_missing(&value) {
            return Err(ConfigError::MissingValue { path: join_path(self.path, name) });
        }
        serde_yaml::from_value(value).map_err(|e| self.invalid(format!("argument '{name}': {e}")))
    }

    fn finish(self) -> ConfigResult<()> {
        match self.values.keys().next() {
            Some(key) => Err(self.invalid(format!(
                "unexpected keyword argument '{}'",
                key.as_str().unwrap_or_default()
            ))),
            None => Ok(()),
        }
    }
}
