//! Stormguard kernel build pipeline
//!
//! Validates build flags against the device capability table, drives the
//! kernel build through git and make, packages and signs a flashable zip,
//! and publishes it to object storage, an FTP mirror and a chat.

pub mod build;
pub mod config;
pub mod credentials;
pub mod lock;
pub mod mock;
pub mod package;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod runner;
pub mod signal;

pub use build::{BuildError, BuildExecutor, BuildReport, BuildState};
pub use config::{EffectiveSettings, Settings};
pub use package::{ArtifactPackager, PackageError};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use publish::{PublishError, PublishPipeline, PublishPlan};
pub use resolve::{derive_layout, resolve, BuildConfig, ConfigError, DerivedLayout, RawFlags};
pub use runner::{CommandError, CommandResult, CommandRunner, CommandSpec, OutputMode, SystemRunner};
