//! Where config fragments come from.

use crate::defaults::DefaultsEntry;
use crate::error::{ConfigError, ConfigResult};
use crate::node::ConfigNode;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// A repository of named YAML config fragments.
///
/// Names are slash-separated paths without extension (`dataset/regression/linear`).
/// Groups are the directories that contain options.
pub trait ConfigSource: Send + Sync {
    /// Raw text of the named config, or `None` when it does not exist.
    fn read(&self, name: &str) -> ConfigResult<Option<String>>;

    fn is_group(&self, group: &str) -> bool;

    /// Option names available in a group, sorted.
    fn options(&self, group: &str) -> Vec<String>;

    /// Load and parse a config file, failing with `ConfigNotFound` when missing.
    fn load(&self, name: &str) -> ConfigResult<ConfigFile> {
        let name = name.trim_matches('/');
        let Some(text) = self.read(name)? else {
            let group = name.rsplit_once('/').map_or("", |(g, _)| g);
            return Err(ConfigError::ConfigNotFound { name: name.to_string(), options: self.options(group) });
        };
        ConfigFile::parse(name, &text)
    }
}

/// Config fragments on disk under a root directory.
#[derive(Debug, Clone)]
pub struct FsConfigSource {
    root: PathBuf,
}

impl FsConfigSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
    }
}

impl ConfigSource for FsConfigSource {
    fn read(&self, name: &str) -> ConfigResult<Option<String>> {
        match self.file_path(name) {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    fn is_group(&self, group: &str) -> bool {
        !group.is_empty() && self.root.join(group.trim_matches('/')).is_dir()
    }

    fn options(&self, group: &str) -> Vec<String> {
        let dir = self.root.join(group.trim_matches('/'));
        let mut out = Vec::new();
        collect_options(&dir, "", &mut out);
        out.sort();
        out
    }
}

fn collect_options(dir: &Path, prefix: &str, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = if prefix.is_empty() { stem.to_string() } else { format!("{prefix}/{stem}") };
        if path.is_dir() {
            collect_options(&path, &name, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e))
        {
            out.push(name);
        }
    }
}

/// In-memory fragments, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    files: BTreeMap<String, String>,
}

impl MemoryConfigSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&mut self, name: &str, text: &str) {
        self.files.insert(name.trim_matches('/').to_string(), text.to_string());
    }
}

impl ConfigSource for MemoryConfigSource {
    fn read(&self, name: &str) -> ConfigResult<Option<String>> {
        Ok(self.files.get(name).cloned())
    }

    fn is_group(&self, group: &str) -> bool {
        let prefix = format!("{}/", group.trim_matches('/'));
        !group.is_empty() && self.files.keys().any(|k| k.starts_with(&prefix))
    }

    fn options(&self, group: &str) -> Vec<String> {
        let group = group.trim_matches('/');
        let prefix = if group.is_empty() { String::new() } else { format!("{group}/") };
        self.files
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect()
    }
}

/// A parsed config fragment.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub name: String,
    /// Value of the `# @package` header line, if present.
    pub package: Option<String>,
    pub defaults: Vec<DefaultsEntry>,
    /// The file's own keys, without `defaults`.
    pub body: ConfigNode,
}

impl ConfigFile {
    pub fn parse(name: &str, text: &str) -> ConfigResult<Self> {
        let package = package_header(text);
        let value: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: Some(PathBuf::from(format!("{name}.yaml"))),
            source,
        })?;
        let mut body = ConfigNode::from_value(value, name)?;

        let defaults = match body.remove("defaults") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| DefaultsEntry::parse(item, name))
                .collect::<ConfigResult<Vec<_>>>()?,
            Some(_) => {
                return Err(ConfigError::InvalidDefaults {
                    config: name.to_string(),
                    message: "'defaults' must be a list".to_string(),
                })
            }
        };

        Ok(Self { name: name.to_string(), package, defaults, body })
    }

    /// Directory part of the name; relative group references resolve against it.
    #[must_use]
    pub fn parent_group(&self) -> &str {
        self.name.rsplit_once('/').map_or("", |(g, _)| g)
    }
}

/// Extract the package from a leading `# @package <pkg>` comment.
fn package_header(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let comment = line.strip_prefix('#')?;
        if let Some(package) = comment.trim_start().strip_prefix("@package") {
            let package = package.trim();
            return (!package.is_empty()).then(|| package.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_package_header_variants() {
        assert_eq!(package_header("# @package _global_\na: 1\n").as_deref(), Some("_global_"));
        assert_eq!(package_header("#@package _global_\na: 1\n").as_deref(), Some("_global_"));
        assert_eq!(package_header("# a comment\n# @package task.loss_fn\n").as_deref(), Some("task.loss_fn"));
        assert_eq!(package_header("a: 1\n# @package _global_\n"), None);
    }

    #[test]
    fn test_parse_strips_defaults_from_body() {
        let file = ConfigFile::parse(
            "train",
            "defaults:\n  - dataset: regression/linear\n  - _self_\nseed: 0\n",
        )
        .unwrap();
        assert_eq!(file.defaults.len(), 2);
        assert!(file.body.get("defaults").is_none());
        assert_eq!(file.body.get("seed").and_then(Value::as_u64), Some(0));
    }

    #[test]
    fn test_fs_source_groups_and_options() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("dataset/regression")).unwrap();
        std::fs::write(root.join("dataset/regression/linear.yaml"), "x_dim: 1\n").unwrap();
        std::fs::write(root.join("dataset/regression/sinusoid.yml"), "x_dim: 1\n").unwrap();
        std::fs::write(root.join("train.yaml"), "seed: 0\n").unwrap();

        let source = FsConfigSource::new(root);
        assert!(source.is_group("dataset"));
        assert!(!source.is_group("train"));
        assert_eq!(source.options("dataset"), vec!["regression/linear", "regression/sinusoid"]);
        assert!(source.load("dataset/regression/sinusoid").is_ok());

        let err = source.load("dataset/regression/cubic").unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { ref options, .. } if options.len() == 2));
    }
}
