//! Metasweep Launcher
//!
//! Materialising and submitting composed runs:
//! - Reading launcher profiles from the runtime subtree (`LauncherProfile`)
//! - Writing per-job config files and descriptors (`SweepLayout`, `JobDescriptor`)
//! - Launcher backends: local process, batch scheduler, dry run (`Launcher`)
//! - Concurrent submission with timeouts, retries and cancellation (`Submitter`)
//! - Per-job outcomes of an invocation (`SweepSummary`)

pub mod error;
pub mod job;
pub mod launch;
pub mod launcher;
pub mod layout;
pub mod profile;
pub mod progress;
pub mod submit;
pub mod summary;

pub use error::{LaunchError, LaunchResult};
pub use job::{JobDescriptor, LaunchContext, ENV_FULL_ERROR};
pub use launch::{LaunchOptions, SweepRunner};
pub use launcher::{BatchLauncher, DryRunLauncher, Launcher, LauncherSet, LocalLauncher, Submission};
pub use layout::{ManifestJob, MultirunManifest, SweepLayout};
pub use profile::{LauncherKind, LauncherProfile, Placeholders};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, SilentProgressSink, StdoutProgressSink};
pub use submit::{CancelFlag, JobResult, RetryPolicy, Submitter};
pub use summary::{JobOutcome, JobStatus, SweepSummary};
