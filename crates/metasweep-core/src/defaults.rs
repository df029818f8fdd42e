//! Defaults lists and their expansion into an ordered merge plan.
//!
//! Expansion walks the defaults tree depth-first from the primary config and
//! emits one [`MergeItem`] per config body, in merge order. Each file's own
//! keys are emitted where `_self_` appears (or last, when it is absent).

use crate::error::{ConfigError, ConfigResult};
use crate::node::{join_path, scalar_to_string, ConfigNode};
use crate::source::{ConfigFile, ConfigSource};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

pub const SELF_MARKER: &str = "_self_";
const GLOBAL_PACKAGE: &str = "_global_";
const GROUP_PACKAGE: &str = "_group_";
const MAX_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultsEntry {
    /// `_self_`: position of the containing file's own keys.
    SelfRef,
    /// `group: option` with optional modifiers.
    Group(GroupDefault),
    /// Bare `name`: another config merged at the parent's package.
    Config { name: String, package: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDefault {
    /// Group path as written; a leading `/` makes it absolute.
    pub group: String,
    /// Selected option, `None` for an explicit `null`.
    pub option: Option<String>,
    /// Explicit `@package` suffix.
    pub package: Option<String>,
    pub optional: bool,
    pub is_override: bool,
}

impl GroupDefault {
    #[must_use]
    pub fn new(group: impl Into<String>, option: Option<String>) -> Self {
        Self { group: group.into(), option, package: None, optional: false, is_override: false }
    }

    /// Absolute group path, resolving relative groups against `parent_group`.
    #[must_use]
    pub fn absolute_group(&self, parent_group: &str) -> String {
        match self.group.strip_prefix('/') {
            Some(abs) => abs.to_string(),
            None if parent_group.is_empty() => self.group.clone(),
            None => format!("{parent_group}/{}", self.group),
        }
    }

    /// Key identifying this entry for choice overrides: `group[@package]`.
    #[must_use]
    pub fn choice_key(&self, parent_group: &str) -> String {
        let group = self.absolute_group(parent_group);
        match &self.package {
            Some(pkg) => format!("{group}@{pkg}"),
            None => group,
        }
    }
}

impl DefaultsEntry {
    /// Parse one item of a `defaults:` list.
    pub fn parse(item: &Value, config: &str) -> ConfigResult<Self> {
        let invalid = |message: String| ConfigError::InvalidDefaults { config: config.to_string(), message };
        match item {
            Value::String(s) if s == SELF_MARKER => Ok(Self::SelfRef),
            Value::String(s) => {
                let (name, package) = split_package(s.trim());
                if name.is_empty() {
                    return Err(invalid("empty config name".to_string()));
                }
                Ok(Self::Config { name: name.to_string(), package })
            }
            Value::Mapping(map) if map.len() == 1 => {
                let (key, value) = map.iter().next().ok_or_else(|| invalid("empty entry".to_string()))?;
                let key = key.as_str().ok_or_else(|| invalid("group key must be a string".to_string()))?;
                let option = match value {
                    Value::Null => None,
                    Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => {
                        return Err(invalid(format!("option for '{key}' must be a scalar or null")))
                    }
                    scalar => Some(scalar_to_string(scalar)),
                };

                let mut tokens: Vec<&str> = key.split_whitespace().collect();
                let spec = tokens.pop().ok_or_else(|| invalid("empty group key".to_string()))?;
                let mut entry = GroupDefault::new("", option);
                for modifier in tokens {
                    match modifier {
                        "optional" => entry.optional = true,
                        "override" => entry.is_override = true,
                        other => return Err(invalid(format!("unknown keyword '{other}' in '{key}'"))),
                    }
                }
                let (group, package) = split_package(spec);
                if group.trim_matches('/').is_empty() {
                    return Err(invalid(format!("empty group in '{key}'")));
                }
                entry.group = group.to_string();
                entry.package = package;
                Ok(Self::Group(entry))
            }
            other => Err(invalid(format!("unsupported entry: {}", scalar_to_string(other)))),
        }
    }
}

fn split_package(spec: &str) -> (&str, Option<String>) {
    match spec.split_once('@') {
        Some((name, pkg)) => (name, Some(pkg.to_string())),
        None => (spec, None),
    }
}

/// Group choices requested on the command line.
#[derive(Debug, Clone, Default)]
pub struct GroupChoices {
    choices: BTreeMap<String, Option<String>>,
    /// Keys whose plain form requires a matching entry.
    required: BTreeSet<String>,
    /// `++group=option`: override when declared, append otherwise.
    forced: BTreeMap<String, Option<String>>,
    appended: Vec<(String, Option<String>)>,
}

impl GroupChoices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `group=option` or `~group`.
    pub fn select(&mut self, key: &str, option: Option<String>) {
        self.choices.insert(key.to_string(), option);
        self.required.insert(key.to_string());
    }

    /// `+group=option`.
    pub fn append(&mut self, key: &str, option: Option<String>) {
        self.appended.retain(|(k, _)| k != key);
        self.appended.push((key.to_string(), option));
    }

    /// `++group=option`.
    pub fn force(&mut self, key: &str, option: Option<String>) {
        self.forced.insert(key.to_string(), option);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty() && self.forced.is_empty() && self.appended.is_empty()
    }

    /// Every group key this set mentions, in a stable order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.choices
            .keys()
            .chain(self.forced.keys())
            .map(String::as_str)
            .chain(self.appended.iter().map(|(k, _)| k.as_str()))
    }

    fn choice(&self, key: &str) -> Option<&Option<String>> {
        self.choices.get(key).or_else(|| self.forced.get(key))
    }
}

/// One config body to merge, nested under its package.
#[derive(Debug, Clone)]
pub struct MergeItem {
    pub config: String,
    pub package: String,
    pub body: ConfigNode,
}

/// Result of expanding a defaults tree.
#[derive(Debug, Clone, Default)]
pub struct DefaultsPlan {
    pub items: Vec<MergeItem>,
    /// Final choice per group key, `None` for disabled groups.
    pub choices: BTreeMap<String, Option<String>>,
}

impl DefaultsPlan {
    /// Merge all items in order into a fresh node.
    pub fn merge(&self) -> ConfigResult<ConfigNode> {
        let mut out = ConfigNode::new();
        for item in &self.items {
            trace!(config = %item.config, package = %item.package, "merging config");
            out.merge_at(&item.package, item.body.clone())?;
        }
        Ok(out)
    }
}

/// Expand the primary config's defaults tree, applying command-line group
/// choices and settling `override` entries found anywhere in the tree.
pub fn expand(source: &dyn ConfigSource, primary: &str, cli: &GroupChoices) -> ConfigResult<DefaultsPlan> {
    let primary_file = source.load(primary)?;
    let mut cli = cli.clone();
    let mut from_config: BTreeMap<String, Option<String>> = BTreeMap::new();

    for pass in 0..MAX_PASSES {
        let mut expansion = Expansion::new(source, &cli, &from_config);
        expansion.visit(&primary_file, "", true, &mut Vec::new())?;
        debug!(pass, items = expansion.items.len(), "expanded defaults tree");

        let mut next = BTreeMap::new();
        for (key, option) in &expansion.overrides {
            if cli.choice(key).is_none() {
                next.insert(key.clone(), option.clone());
            }
        }

        let unmatched_forced: Vec<(String, Option<String>)> = cli
            .forced
            .iter()
            .filter(|(k, _)| !expansion.declared.contains(*k) && !cli.appended.iter().any(|(a, _)| a == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if next == from_config && unmatched_forced.is_empty() {
            if let Some((key, _)) = expansion.overrides.iter().find(|(k, _)| !expansion.declared.contains(k)) {
                return Err(ConfigError::InvalidDefaults {
                    config: primary.to_string(),
                    message: format!("could not override '{key}': no match in the defaults list"),
                });
            }
            if let Some(key) = cli.required.iter().find(|k| !expansion.declared.contains(*k)) {
                return Err(ConfigError::InvalidOverride {
                    text: key.clone(),
                    message: format!("no '{key}' in the defaults list; use '+{key}=...' to append it"),
                });
            }
            return Ok(DefaultsPlan { items: expansion.items, choices: expansion.choices });
        }

        cli.appended.extend(unmatched_forced);
        from_config = next;
    }

    Err(ConfigError::DefaultsCycle(format!("override entries in '{primary}' did not settle")))
}

struct Expansion<'a> {
    source: &'a dyn ConfigSource,
    cli: &'a GroupChoices,
    from_config: &'a BTreeMap<String, Option<String>>,
    items: Vec<MergeItem>,
    choices: BTreeMap<String, Option<String>>,
    declared: BTreeSet<String>,
    overrides: Vec<(String, Option<String>)>,
}

impl<'a> Expansion<'a> {
    fn new(
        source: &'a dyn ConfigSource,
        cli: &'a GroupChoices,
        from_config: &'a BTreeMap<String, Option<String>>,
    ) -> Self {
        Self {
            source,
            cli,
            from_config,
            items: Vec::new(),
            choices: BTreeMap::new(),
            declared: BTreeSet::new(),
            overrides: Vec::new(),
        }
    }

    fn visit(&mut self, file: &ConfigFile, package: &str, primary: bool, stack: &mut Vec<String>) -> ConfigResult<()> {
        if stack.contains(&file.name) {
            stack.push(file.name.clone());
            return Err(ConfigError::DefaultsCycle(stack.join(" -> ")));
        }
        stack.push(file.name.clone());

        let mut entries = file.defaults.clone();
        if !entries.contains(&DefaultsEntry::SelfRef) {
            entries.push(DefaultsEntry::SelfRef);
        }
        if primary {
            for (key, option) in &self.cli.appended {
                let (group, pkg) = split_package(key);
                let mut entry = GroupDefault::new(format!("/{}", group.trim_matches('/')), option.clone());
                entry.package = pkg;
                entries.push(DefaultsEntry::Group(entry));
            }
        }

        let parent_group = file.parent_group().to_string();
        for entry in entries {
            match entry {
                DefaultsEntry::SelfRef => self.items.push(MergeItem {
                    config: file.name.clone(),
                    package: package.to_string(),
                    body: file.body.clone(),
                }),
                DefaultsEntry::Config { name, package: pkg } => {
                    let name = resolve_name(&name, &parent_group);
                    let child = self.source.load(&name)?;
                    let child_package = child_package(package, pkg.as_deref(), child.package.as_deref(), "");
                    self.visit(&child, &child_package, false, stack)?;
                }
                DefaultsEntry::Group(entry) => self.visit_group(&entry, &parent_group, package, stack)?,
            }
        }

        stack.pop();
        Ok(())
    }

    fn visit_group(
        &mut self,
        entry: &GroupDefault,
        parent_group: &str,
        package: &str,
        stack: &mut Vec<String>,
    ) -> ConfigResult<()> {
        let key = entry.choice_key(parent_group);
        if entry.is_override {
            self.overrides.retain(|(k, _)| *k != key);
            self.overrides.push((key, entry.option.clone()));
            return Ok(());
        }

        let option = self
            .cli
            .choice(&key)
            .or_else(|| self.from_config.get(&key))
            .cloned()
            .unwrap_or_else(|| entry.option.clone());
        self.declared.insert(key.clone());
        self.choices.insert(key.clone(), option.clone());

        let Some(option) = option else {
            trace!(group = %key, "group disabled");
            return Ok(());
        };

        let group = entry.absolute_group(parent_group);
        let name = format!("{group}/{option}");
        let source = self.source;
        let child = match source.load(&name) {
            Ok(child) => child,
            Err(ConfigError::ConfigNotFound { .. }) if entry.optional => return Ok(()),
            Err(ConfigError::ConfigNotFound { .. }) => {
                return Err(ConfigError::ConfigNotFound { name, options: source.options(&group) })
            }
            Err(other) => return Err(other),
        };

        let relative_group = entry.group.trim_start_matches('/').replace('/', ".");
        let child_package =
            child_package(package, entry.package.as_deref(), child.package.as_deref(), &relative_group);
        self.visit(&child, &child_package, false, stack)
    }
}

fn resolve_name(name: &str, parent_group: &str) -> String {
    match name.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None if parent_group.is_empty() => name.to_string(),
        None => format!("{parent_group}/{name}"),
    }
}

/// Final package of a child config.
///
/// Precedence: explicit `@package` on the entry, then the file's header, then
/// the group path as written. All but `_global_` are relative to the parent.
fn child_package(parent: &str, explicit: Option<&str>, header: Option<&str>, group: &str) -> String {
    let relative = explicit.or(header).unwrap_or(group);
    if relative == GLOBAL_PACKAGE {
        return String::new();
    }
    if let Some(abs) = relative.strip_prefix("_global_.") {
        return abs.replace(GROUP_PACKAGE, group);
    }
    join_path(parent, &relative.replace(GROUP_PACKAGE, group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryConfigSource;

    fn parse(yaml: &str) -> DefaultsEntry {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        DefaultsEntry::parse(&value, "test").unwrap()
    }

    #[test]
    fn test_parse_entries() {
        assert_eq!(parse("_self_"), DefaultsEntry::SelfRef);
        assert_eq!(
            parse("predictor: null"),
            DefaultsEntry::Group(GroupDefault::new("predictor", None))
        );
        let DefaultsEntry::Group(entry) = parse("override /task@task: sgd") else {
            panic!("expected group entry");
        };
        assert!(entry.is_override);
        assert_eq!(entry.group, "/task");
        assert_eq!(entry.package.as_deref(), Some("task"));
        assert_eq!(entry.option.as_deref(), Some("sgd"));
    }

    #[test]
    fn test_parse_rejects_unknown_keyword() {
        let value: Value = serde_yaml::from_str("required task: sgd").unwrap();
        assert!(DefaultsEntry::parse(&value, "test").is_err());
    }

    #[test]
    fn test_child_package_rules() {
        assert_eq!(child_package("", None, None, "dataset"), "dataset");
        assert_eq!(child_package("task", None, None, "loss_fn"), "task.loss_fn");
        assert_eq!(child_package("task", None, Some("_global_"), "loss_fn"), "");
        assert_eq!(child_package("", Some("predictor"), None, "model"), "predictor");
        assert_eq!(child_package("", None, Some("hydra.launcher"), "hydra.launcher"), "hydra.launcher");
    }

    #[test]
    fn test_cycle_detected() {
        let source = MemoryConfigSource::new()
            .with("a", "defaults:\n  - b\n")
            .with("b", "defaults:\n  - a\n");
        let err = expand(&source, "a", &GroupChoices::new()).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCycle(ref chain) if chain == "a -> b -> a"));
    }

    #[test]
    fn test_optional_missing_group_is_skipped() {
        let source = MemoryConfigSource::new()
            .with("train", "defaults:\n  - optional logger: wandb\nseed: 0\n")
            .with("logger/csv", "save_dir: logs\n");
        let plan = expand(&source, "train", &GroupChoices::new()).unwrap();
        let merged = plan.merge().unwrap();
        assert!(merged.get("logger").is_none());
    }

    #[test]
    fn test_override_entry_without_match_fails() {
        let source = MemoryConfigSource::new()
            .with("train", "defaults:\n  - override /task: sgd\n")
            .with("task/sgd", "lr: 0.1\n");
        let err = expand(&source, "train", &GroupChoices::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDefaults { .. }));
    }
}
