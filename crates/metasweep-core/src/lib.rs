//! Metasweep Core
//!
//! Configuration composition for sweep-driven experiments:
//! - Loading YAML fragments from a config directory (`ConfigSource`)
//! - Expanding defaults lists into one merged tree (`defaults`)
//! - Parsing and applying command-line overrides (`Override`)
//! - Expanding multirun sweeps (`SweepPlan`) into resolved runs (`RunConfig`)
//! - Validating `_target_` nodes against an explicit registry (`TargetRegistry`)

pub mod compose;
pub mod defaults;
pub mod error;
pub mod interpolation;
pub mod node;
pub mod overrides;
pub mod registry;
pub mod run;
pub mod source;
pub mod sweep;
pub mod targets;

pub use compose::{ComposedSweep, Composer, RunFailure};
pub use defaults::{DefaultsEntry, DefaultsPlan, GroupChoices, GroupDefault, MergeItem};
pub use error::{ConfigError, ConfigResult};
pub use interpolation::{Resolvers, ResolverFn};
pub use node::{ConfigNode, MISSING, TARGET_KEY};
pub use overrides::{Override, OverrideAssignment, OverrideKind, OverrideValue};
pub use registry::{Arguments, Component, TargetRegistry};
pub use run::{RunConfig, HYDRA_KEY};
pub use source::{ConfigFile, ConfigSource, FsConfigSource, MemoryConfigSource};
pub use sweep::{SweepAxis, SweepPlan};
