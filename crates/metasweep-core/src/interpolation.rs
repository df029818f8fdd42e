//! `${...}` interpolation.
//!
//! A string that is exactly one interpolation takes the referenced value
//! (with its type). Interpolations embedded in a longer string are rendered
//! as text. `\${` is a literal `${`.
//!
//! References are absolute dotted paths (`${dataset.x_dim}`) or relative to
//! the containing node (`${.z_dim}` for a sibling, `${..z_dim}` one level up).
//! `name:args` calls a registered resolver such as `oc.env`.

use crate::error::{ConfigError, ConfigResult};
use crate::node::{is_container, join_path, kind_of, scalar_to_string, split_path, ConfigNode, MISSING};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named resolver: receives the raw argument text after `name:`.
pub type ResolverFn = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// The resolvers available to `${name:args}` expressions.
#[derive(Clone)]
pub struct Resolvers {
    resolvers: BTreeMap<String, ResolverFn>,
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.resolvers.keys()).finish()
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        let mut resolvers = Self { resolvers: BTreeMap::new() };
        resolvers.register("oc.env", |args| env_resolver(args, |name| std::env::var(name).ok()));
        resolvers
    }
}

impl Resolvers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a resolver.
    pub fn register<F>(&mut self, name: &str, resolver: F)
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.resolvers.insert(name.to_string(), Arc::new(resolver));
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.keys().map(String::as_str).collect()
    }

    /// Resolve every interpolation in `node`.
    pub fn resolve(&self, node: &ConfigNode) -> ConfigResult<ConfigNode> {
        let root = node.clone().into_value();
        let resolver = Resolver { root: &root, resolvers: self };
        let resolved = resolver.value(&root, "", &mut Vec::new())?;
        ConfigNode::from_value(resolved, "")
    }
}

/// `oc.env:NAME[,default]` over an arbitrary lookup.
pub fn env_resolver(args: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Value, String> {
    let (name, default) = match args.split_once(',') {
        Some((name, default)) => (name.trim(), Some(default.trim())),
        None => (args.trim(), None),
    };
    if name.is_empty() {
        return Err("oc.env needs a variable name".to_string());
    }
    match (lookup(name), default) {
        (Some(value), _) => Ok(Value::String(value)),
        (None, Some("null")) => Ok(Value::Null),
        (None, Some(default)) => Ok(Value::String(unquote(default).to_string())),
        (None, None) => Err(format!("environment variable '{name}' is not set")),
    }
}

fn unquote(text: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = text.strip_prefix(quote).and_then(|t| t.strip_suffix(quote)) {
            return inner;
        }
    }
    text
}

#[derive(Debug, PartialEq)]
enum Piece {
    Text(String),
    Expr(String),
}

/// Split a string into literal text and `${...}` expressions.
fn pieces(text: &str) -> Result<Vec<Piece>, String> {
    let mut out = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\${") {
            literal.push_str("${");
            rest = after;
            continue;
        }
        if let Some(after) = rest.strip_prefix("${") {
            let mut depth = 1;
            let mut end = None;
            let mut chars = after.char_indices().peekable();
            while let Some((i, c)) = chars.next() {
                match c {
                    '$' if chars.peek().map(|(_, n)| *n) == Some('{') => {
                        depth += 1;
                        chars.next();
                    }
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| format!("unterminated interpolation in '{text}'"))?;
            if !literal.is_empty() {
                out.push(Piece::Text(std::mem::take(&mut literal)));
            }
            out.push(Piece::Expr(after[..end].trim().to_string()));
            rest = &after[end + 1..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            literal.push(c);
        }
        rest = chars.as_str();
    }
    if !literal.is_empty() {
        out.push(Piece::Text(literal));
    }
    Ok(out)
}

struct Resolver<'a> {
    root: &'a Value,
    resolvers: &'a Resolvers,
}

impl Resolver<'_> {
    fn value(&self, value: &Value, path: &str, stack: &mut Vec<String>) -> ConfigResult<Value> {
        match value {
            Value::String(s) if s.contains("${") => self.string(s, path, stack),
            Value::Mapping(map) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let child = join_path(path, k.as_str().unwrap_or_default());
                    out.insert(k.clone(), self.value(v, &child, stack)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => seq
                .iter()
                .enumerate()
                .map(|(i, v)| self.value(v, &join_path(path, &i.to_string()), stack))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other.clone()),
        }
    }

    fn string(&self, text: &str, path: &str, stack: &mut Vec<String>) -> ConfigResult<Value> {
        let error = |message: String| ConfigError::Interpolation { path: path.to_string(), message };
        let pieces = pieces(text).map_err(error)?;
        if let [Piece::Expr(expr)] = pieces.as_slice() {
            return self.expr(expr, path, stack);
        }

        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(t) => out.push_str(&t),
                Piece::Expr(expr) => {
                    let value = self.expr(&expr, path, stack)?;
                    if is_container(&value) {
                        return Err(error(format!("'{expr}' is a {} and cannot be embedded in a string", kind_of(&value))));
                    }
                    if value.as_str() == Some(MISSING) {
                        return Err(ConfigError::MissingValue { path: path.to_string() });
                    }
                    out.push_str(&scalar_to_string(&value));
                }
            }
        }
        Ok(Value::String(out))
    }

    fn expr(&self, expr: &str, path: &str, stack: &mut Vec<String>) -> ConfigResult<Value> {
        let error = |message: String| ConfigError::Interpolation { path: path.to_string(), message };

        if let Some((name, args)) = expr.split_once(':') {
            let resolver = self
                .resolvers
                .resolvers
                .get(name.trim())
                .ok_or_else(|| {
                    let known = self.resolvers.names().join(", ");
                    error(format!("unknown resolver '{}' (known: {known})", name.trim()))
                })?;
            let args = if args.contains("${") {
                scalar_to_string(&self.string(args, path, stack)?)
            } else {
                args.to_string()
            };
            return (resolver.as_ref())(&args).map_err(error);
        }

        let target = absolute_path(expr, path).ok_or_else(|| error(format!("'{expr}' points above the root")))?;
        if stack.contains(&target) {
            stack.push(target);
            return Err(error(format!("interpolation cycle: {}", stack.join(" -> "))));
        }
        let found = lookup(self.root, &target).ok_or_else(|| error(format!("key '{target}' not found")))?;

        stack.push(target.clone());
        let resolved = self.value(found, &target, stack);
        stack.pop();
        resolved
    }
}

/// Turn a reference into an absolute dotted path, given the path of the
/// value that contains it.
fn absolute_path(reference: &str, from: &str) -> Option<String> {
    let dots = reference.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return Some(reference.to_string());
    }
    let mut base = split_path(from);
    // The containing value itself, then one level per extra dot.
    for _ in 0..dots {
        base.pop()?;
    }
    Some(join_path(&base.join("."), &reference[dots..]))
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in split_path(path) {
        current = match current {
            Value::Mapping(map) => map.get(segment)?,
            Value::Sequence(seq) => seq.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(yaml: &str) -> ConfigResult<ConfigNode> {
        let mut resolvers = Resolvers::new();
        resolvers.register("oc.env", |args| {
            env_resolver(args, |name| (name == "DATA_ROOT").then(|| "/data".to_string()))
        });
        resolvers.resolve(&ConfigNode::parse_yaml(yaml).unwrap())
    }

    #[test]
    fn test_whole_string_keeps_type() {
        let cfg = resolve("dataset:\n  x_dim: 3\npredictor:\n  x_dim: ${dataset.x_dim}\n").unwrap();
        assert_eq!(cfg.get_path("predictor.x_dim").and_then(Value::as_u64), Some(3));
    }

    #[test]
    fn test_embedded_renders_string() {
        let cfg = resolve("save_dir: out\nlogger:\n  save_dir: ${save_dir}/logs\n").unwrap();
        assert_eq!(cfg.get_path("logger.save_dir").and_then(Value::as_str), Some("out/logs"));
    }

    #[test]
    fn test_relative_reference() {
        let cfg = resolve("model:\n  z_dim: 8\n  head:\n    in_dim: ${..z_dim}\n  out_dim: ${.z_dim}\n").unwrap();
        assert_eq!(cfg.get_path("model.head.in_dim").and_then(Value::as_u64), Some(8));
        assert_eq!(cfg.get_path("model.out_dim").and_then(Value::as_u64), Some(8));
    }

    #[test]
    fn test_chained_references() {
        let cfg = resolve("a: 1\nb: ${a}\nc: ${b}\n").unwrap();
        assert_eq!(cfg.get("c").and_then(Value::as_u64), Some(1));
    }

    #[test]
    fn test_env_resolver_with_default() {
        let cfg = resolve("root: ${oc.env:DATA_ROOT}\nother: ${oc.env:UNSET_VAR,fallback}\n").unwrap();
        assert_eq!(cfg.get("root").and_then(Value::as_str), Some("/data"));
        assert_eq!(cfg.get("other").and_then(Value::as_str), Some("fallback"));
        assert!(resolve("x: ${oc.env:UNSET_VAR}\n").is_err());
    }

    #[test]
    fn test_unknown_resolver_lists_registered_ones() {
        let err = resolve("x: ${oc.envv:HOME}\n").unwrap_err();
        assert!(err.to_string().contains("unknown resolver 'oc.envv' (known: oc.env)"));
    }

    #[test]
    fn test_cycle_is_reported() {
        let err = resolve("a: ${b}\nb: ${a}\n").unwrap_err();
        assert!(matches!(err, ConfigError::Interpolation { ref message, .. } if message.contains("cycle")));
    }

    #[test]
    fn test_missing_reference_and_escape() {
        assert!(matches!(resolve("a: ${nope}\n"), Err(ConfigError::Interpolation { .. })));
        let cfg = resolve("a: \\${literal}\n").unwrap();
        assert_eq!(cfg.get("a").and_then(Value::as_str), Some("${literal}"));
    }

    #[test]
    fn test_missing_value_propagates_through_whole_reference() {
        let cfg = resolve("a: '???'\nb: ${a}\n").unwrap();
        assert_eq!(cfg.get("b").and_then(Value::as_str), Some(MISSING));
        assert!(matches!(resolve("a: '???'\nb: x${a}\n"), Err(ConfigError::MissingValue { .. })));
    }
}
