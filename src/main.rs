//! Stormguard build CLI
//!
//! Entry point for the `sg-build` command-line tool.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use stormguard_build::resolve::CleanMode;
use stormguard_build::signal::SignalHandler;
use stormguard_build::{EffectiveSettings, Pipeline, RawFlags};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sg-build")]
#[command(about = "Stormguard kernel build pipeline", version)]
struct Cli {
    /// Settings file (default: ~/.config/stormguard/build.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, package and optionally publish a kernel
    Build(BuildArgs),

    /// Run the clean targets only
    Clean(TargetArgs),

    /// Print the effective settings as JSON
    Config(OverrideArgs),
}

#[derive(Args)]
struct TargetArgs {
    /// Build variant
    #[arg(short = 'b', long = "build", value_parser = ["miui", "custom"])]
    build: String,

    /// Device profile
    #[arg(short = 'd', long, value_parser = ["mido", "whyred"])]
    device: String,

    /// Compiler
    #[arg(long = "cc", value_parser = ["clang", "gcc"])]
    cc: String,

    /// Version label
    #[arg(short = 'v', long)]
    version: String,

    /// Stream build output instead of capturing it
    #[arg(long)]
    verbose: bool,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Args)]
struct OverrideArgs {
    /// Workspace root (default: ~/kernel)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Parallel make jobs
    #[arg(long)]
    jobs: Option<u32>,
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Enable CPUQuiet
    #[arg(short = 'c', long)]
    cpuquiet: bool,

    /// Enable overclock
    #[arg(short = 'o', long)]
    overclock: bool,

    /// Release build
    #[arg(short = 'r', long)]
    release: bool,

    /// Send chat notifications
    #[arg(short = 't', long = "telegram", alias = "notify")]
    notify: bool,

    /// Upload the build
    #[arg(short = 'u', long)]
    upload: bool,

    /// Clean before building, or clean only
    #[arg(long, value_enum)]
    clean: Option<CleanArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CleanArg {
    Only,
    Build,
}

impl From<CleanArg> for CleanMode {
    fn from(arg: CleanArg) -> Self {
        match arg {
            CleanArg::Only => CleanMode::Only,
            CleanArg::Build => CleanMode::AndBuild,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::Build(args) => args.target.verbose,
        Commands::Clean(args) => args.verbose,
        Commands::Config(_) => false,
    };
    init_tracing(verbose);

    let home = match home_dir() {
        Some(home) => home,
        None => {
            eprintln!("error: HOME is not set");
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Build(args) => {
            let overrides = overrides(&args.target.overrides);
            let raw = RawFlags {
                build: args.target.build,
                device: args.target.device,
                compiler: args.target.cc,
                version: args.target.version,
                cpuquiet: args.cpuquiet,
                overclock: args.overclock,
                release: args.release,
                notify: args.notify,
                upload: args.upload,
                verbose: args.target.verbose,
                clean: args.clean.map(CleanMode::from),
            };
            run_pipeline(&home, cli.settings.as_deref(), overrides, raw);
        }
        Commands::Clean(args) => {
            let overrides = overrides(&args.overrides);
            let raw = RawFlags {
                build: args.build,
                device: args.device,
                compiler: args.cc,
                version: args.version,
                verbose: args.verbose,
                clean: Some(CleanMode::Only),
                ..Default::default()
            };
            run_pipeline(&home, cli.settings.as_deref(), overrides, raw);
        }
        Commands::Config(args) => {
            let settings = load_settings(&home, cli.settings.as_deref(), overrides(&args));
            match settings.to_json() {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").filter(|h| !h.is_empty()).map(PathBuf::from)
}

fn overrides(args: &OverrideArgs) -> Option<Value> {
    let mut map = Map::new();
    if let Some(root) = &args.root {
        map.insert("workspace_root".to_string(), json!(root));
    }
    if let Some(jobs) = args.jobs {
        map.insert("make".to_string(), json!({ "jobs": jobs }));
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

fn load_settings(home: &Path, settings_path: Option<&Path>, overrides: Option<Value>) -> EffectiveSettings {
    let host = settings_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| EffectiveSettings::host_path(home));
    match EffectiveSettings::build(home, Some(&host), overrides) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn run_pipeline(home: &Path, settings_path: Option<&Path>, overrides: Option<Value>, raw: RawFlags) {
    let effective = load_settings(home, settings_path, overrides);

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        eprintln!("error: failed to install signal handler: {e}");
        process::exit(1);
    }

    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let pipeline = Pipeline::new(effective.settings, home, handler.state()).with_command_line(command_line);

    match pipeline.run(&raw) {
        Ok(report) => {
            if let Some(package) = &report.package {
                info!(archive = %package.archive_path.display(), "done");
            }
            if let Some(publish) = &report.publish {
                for target in &publish.targets {
                    info!(backend = ?target.kind, destination = %target.destination, link = ?target.link, "published");
                }
            }
        }
        Err(e) => {
            error!(exit_code = e.exit_code(), "run failed");
            eprintln!("\n{}", e.report());
            process::exit(e.exit_code());
        }
    }
}
