use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found: '{name}'{}", format_options(.options))]
    ConfigNotFound { name: String, options: Vec<String> },

    #[error("type mismatch at '{path}': cannot merge {incoming} into {existing}")]
    TypeMismatch { path: String, existing: &'static str, incoming: &'static str },

    #[error("key '{path}' is not in the config; use '++{path}=...' to add it")]
    UnknownKey { path: String },

    #[error("an item is already at '{path}'; use '++{path}=...' to force-set it")]
    KeyExists { path: String },

    #[error("invalid override '{text}': {message}")]
    InvalidOverride { text: String, message: String },

    #[error("invalid defaults list in '{config}': {message}")]
    InvalidDefaults { config: String, message: String },

    #[error("defaults cycle: {0}")]
    DefaultsCycle(String),

    #[error("ambiguous value for '{key}': sweep values require --multirun")]
    MultirunRequired { key: String },

    #[error("interpolation error at '{path}': {message}")]
    Interpolation { path: String, message: String },

    #[error("missing mandatory value at '{path}'")]
    MissingValue { path: String },

    #[error("unknown target '{target}' at '{path}'")]
    UnknownTarget { path: String, target: String },

    #[error("invalid argument for '{target}' at '{path}': {message}")]
    InvalidArgument { path: String, target: String, message: String },

    #[error("invalid target name '{0}'")]
    InvalidTargetName(String),

    #[error("target already registered: '{0}'")]
    DuplicateTarget(String),

    #[error("failed to parse {}: {source}", .path.as_ref().map_or_else(|| "YAML".to_string(), |p| p.display().to_string()))]
    Yaml {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// The dotted key path this error is attributable to, if any.
    pub fn key_path(&self) -> Option<&str> {
        match self {
            Self::TypeMismatch { path, .. }
            | Self::UnknownKey { path }
            | Self::KeyExists { path }
            | Self::Interpolation { path, .. }
            | Self::MissingValue { path }
            | Self::UnknownTarget { path, .. }
            | Self::InvalidArgument { path, .. } => Some(path.as_str()),
            Self::MultirunRequired { key } => Some(key.as_str()),
            _ => None,
        }
    }
}

fn format_options(options: &[String]) -> String {
    if options.is_empty() {
        String::new()
    } else {
        format!(" (available: {})", options.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_options() {
        let err = ConfigError::ConfigNotFound {
            name: "dataset/regression/cubic".to_string(),
            options: vec!["regression/linear".to_string(), "regression/sinusoid".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("dataset/regression/cubic"));
        assert!(msg.contains("regression/linear, regression/sinusoid"));
    }

    #[test]
    fn test_key_path() {
        let err = ConfigError::UnknownKey { path: "task.lr".to_string() };
        assert_eq!(err.key_path(), Some("task.lr"));
        assert_eq!(ConfigError::DefaultsCycle("a -> a".to_string()).key_path(), None);
    }
}
