//! Pipeline orchestration
//!
//! resolve → layout → credentials → lock → (clean) → build → package → publish
//!
//! Each stage gets the frozen `BuildConfig` and the outputs of the stage
//! before it. The build runs on its own thread so its wall-clock time is
//! measured on its own and an interrupt can tear down its process tree
//! while the orchestrator waits.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::build::{BuildError, BuildExecutor, BuildReport};
use crate::config::Settings;
use crate::credentials::{CredentialError, CredentialNeeds, Credentials};
use crate::lock::{BuildLock, LockError};
use crate::package::{ArchiveSigner, ArtifactPackager, PackageError, PackageReport};
use crate::publish::{
    failure_message, CurlFtp, DriveClient, FtpMirror, Notifier, ObjectStore, PublishError, PublishPipeline,
    PublishPlan, PublishReport, TelegramNotifier,
};
use crate::resolve::{derive_layout, resolve, BuildConfig, CleanMode, ConfigError, DerivedLayout, RawFlags};
use crate::runner::{CommandError, CommandRunner, SystemRunner};
use crate::signal::{SignalState, EXIT_CODE_CANCELLED};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("packaging failed: {0}")]
    Package(#[from] PackageError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("failed to start build thread: {0}")]
    Worker(#[source] io::Error),

    #[error("build thread panicked")]
    WorkerPanicked,

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The external command failure behind this error, if any.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            PipelineError::Build(e) => e.command_error(),
            PipelineError::Package(e) => e.command_error(),
            PipelineError::Publish(e) => e.command_error(),
            _ => None,
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Cancelled => EXIT_CODE_CANCELLED,
            other => other.command_error().map(CommandError::exit_code).unwrap_or(1),
        }
    }

    /// Human-readable summary: the error plus command output when captured.
    pub fn report(&self) -> String {
        match self.command_error() {
            Some(cmd) => format!("{self}\n\n{}", cmd.report()),
            None => self.to_string(),
        }
    }
}

/// What a completed run did.
#[derive(Debug)]
pub struct RunReport {
    pub config: BuildConfig,
    pub layout: DerivedLayout,
    pub cleaned: bool,
    pub build: Option<BuildReport>,
    pub build_duration: Option<Duration>,
    pub package: Option<PackageReport>,
    pub publish: Option<PublishReport>,
}

impl RunReport {
    fn new(config: BuildConfig, layout: DerivedLayout) -> Self {
        Self {
            config,
            layout,
            cleaned: false,
            build: None,
            build_duration: None,
            package: None,
            publish: None,
        }
    }
}

pub struct Pipeline {
    settings: Settings,
    home: PathBuf,
    runner: Arc<dyn CommandRunner>,
    signals: Arc<SignalState>,
    store: Option<Arc<dyn ObjectStore>>,
    ftp: Option<Arc<dyn FtpMirror>>,
    notifier: Option<Arc<dyn Notifier>>,
    command_line: String,
}

impl Pipeline {
    /// Pipeline running real processes and talking to the real backends.
    pub fn new(settings: Settings, home: &Path, signals: Arc<SignalState>) -> Self {
        Self {
            runner: Arc::new(SystemRunner::new(Arc::clone(&signals))),
            settings,
            home: home.to_path_buf(),
            signals,
            store: None,
            ftp: None,
            notifier: None,
            command_line: "sg-build".to_string(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ftp(mut self, ftp: Arc<dyn FtpMirror>) -> Self {
        self.ftp = Some(ftp);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Invocation quoted in failure reports.
    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run everything the flags ask for. On failure a report goes to the
    /// chat when notification was requested.
    pub fn run(&self, raw: &RawFlags) -> Result<RunReport, PipelineError> {
        let result = resolve(raw)
            .map_err(PipelineError::from)
            .and_then(|config| self.run_config(config));

        if let Err(e) = &result {
            if raw.notify {
                self.report_failure(e);
            }
        }
        result
    }

    /// Run a validated configuration.
    pub fn run_config(&self, config: BuildConfig) -> Result<RunReport, PipelineError> {
        let layout = derive_layout(&config, &self.settings.workspace_root);
        info!(
            device = %config.device,
            variant = %config.variant,
            compiler = %config.compiler,
            archive = %layout.archive_name,
            "resolved build"
        );

        let credentials = Credentials::load(
            &self.home,
            &self.settings.credentials,
            CredentialNeeds {
                bot_token: config.flags.notify && self.notifier.is_none(),
                storage: config.flags.upload && self.store.is_none(),
                ftp: config.flags.upload && self.uses_ftp_mirror(&config) && self.ftp.is_none(),
            },
        )?;

        let _lock = BuildLock::acquire(&layout.lock_path)?;
        let mut report = RunReport::new(config.clone(), layout.clone());

        let executor = BuildExecutor::new(
            Arc::clone(&self.runner),
            config.clone(),
            layout.clone(),
            self.settings.make.clone(),
        );

        if let Some(mode) = config.clean {
            executor.clean()?;
            report.cleaned = true;
            if mode == CleanMode::Only {
                info!("clean finished");
                return Ok(report);
            }
        }

        let (build, elapsed) = self.build_in_worker(executor)?;
        info!(elapsed = ?elapsed, "build stage finished");
        report.build = Some(build);
        report.build_duration = Some(elapsed);

        let packager = ArtifactPackager::new(
            Arc::clone(&self.runner),
            ArchiveSigner {
                program: self.settings.signer.program.clone(),
                keystore: self.settings.keystore_path(),
                alias: self.settings.signer.alias.clone(),
                password: credentials.keystore_password.clone(),
            },
        )
        .with_excludes(self.settings.archive.exclude.clone());
        let package = packager.package(&config, &layout)?;
        info!(archive = %package.archive_path.display(), entries = package.entries.len(), "archive ready");
        report.package = Some(package);

        if config.flags.upload && layout.archive_path.is_file() {
            let publisher = self.publisher(&config, &credentials)?;
            report.publish = Some(publisher.publish(&config, &layout)?);
        }

        Ok(report)
    }

    /// Run the executor on its own thread and time it.
    fn build_in_worker(&self, mut executor: BuildExecutor) -> Result<(BuildReport, Duration), PipelineError> {
        let started = Instant::now();
        let handle = thread::Builder::new()
            .name("sg-build".to_string())
            .spawn(move || executor.run())
            .map_err(PipelineError::Worker)?;
        let outcome = handle.join().map_err(|_| PipelineError::WorkerPanicked)?;
        let elapsed = started.elapsed();

        if self.signals.is_cancel_requested() {
            warn!(elapsed = ?elapsed, "build cancelled");
            return Err(PipelineError::Cancelled);
        }
        Ok((outcome?, elapsed))
    }

    fn publisher(&self, config: &BuildConfig, credentials: &Credentials) -> Result<PublishPipeline, PipelineError> {
        let files = &self.settings.credentials;
        let store: Arc<dyn ObjectStore> = match &self.store {
            Some(store) => Arc::clone(store),
            None => {
                let token = credentials
                    .storage_token
                    .clone()
                    .ok_or_else(|| CredentialError::Missing(self.home.join(&files.storage_token)))?;
                Arc::new(DriveClient::new(self.settings.storage.api_base.as_str(), token))
            }
        };
        let mut publisher = PublishPipeline::new(store, self.settings.storage.folders.clone());

        if self.uses_ftp_mirror(config) {
            let ftp: Arc<dyn FtpMirror> = match &self.ftp {
                Some(ftp) => Arc::clone(ftp),
                None => {
                    let password = credentials
                        .ftp_password
                        .clone()
                        .ok_or_else(|| CredentialError::Missing(self.home.join(&files.ftp_password)))?;
                    let ftp = &self.settings.ftp;
                    Arc::new(CurlFtp::new(
                        Arc::clone(&self.runner),
                        ftp.host.as_str(),
                        ftp.user.as_str(),
                        password,
                        ftp.remote_dir.as_str(),
                    ))
                }
            };
            publisher = publisher.with_ftp(ftp);
        }

        if config.flags.notify {
            if let Some(notifier) = self.notifier(credentials.bot_token.clone()) {
                publisher = publisher.with_notifier(notifier);
            }
        }
        Ok(publisher)
    }

    /// Release builds without cpuquiet go to the FTP mirror first.
    fn uses_ftp_mirror(&self, config: &BuildConfig) -> bool {
        PublishPlan::for_config(config, &self.settings.storage.folders).is_ok_and(|plan| plan.uses_ftp())
    }

    fn notifier(&self, token: Option<String>) -> Option<Arc<dyn Notifier>> {
        if let Some(notifier) = &self.notifier {
            return Some(Arc::clone(notifier));
        }
        let token = token?;
        let notify = &self.settings.notify;
        Some(Arc::new(TelegramNotifier::new(
            notify.api_base.as_str(),
            token,
            notify.chat_id.as_str(),
        )))
    }

    /// Best effort; never changes the outcome.
    fn report_failure(&self, error: &PipelineError) {
        let token = Credentials::bot_token_only(&self.home, &self.settings.credentials);
        let Some(notifier) = self.notifier(token) else {
            warn!("cannot send failure report: no bot token");
            return;
        };
        if let Err(e) = notifier.send(&failure_message(&self.command_line, &error.report())) {
            warn!(error = %e, "failed to send failure report");
        }
    }
}
