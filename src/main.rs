//! Application entry point: `voice-cover` command line.
//!
//! # Startup sequence
//!
//! 1. Parse arguments.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] (defaults on first run) and apply CLI overrides.
//! 4. Create the [`tokio`] runtime.
//! 5. Read the input files, run the pipeline, write the final mix.
//!
//! Ctrl-C cancels the run: the running tool is killed and the scratch
//! workspace removed before the process exits.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use voice_cover::{
    audio::{AudioBlob, AudioRole},
    config::{AppConfig, AppPaths},
    pipeline::{LogProgress, PipelineOrchestrator, ProgressEvent, ProgressSink},
    process::SystemRunner,
};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Produce a cover of a song sung in a reference voice.
#[derive(Parser)]
#[command(name = "voice-cover", version, long_about = None)]
struct Cli {
    /// Settings file (default: platform config dir / settings.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for one song and one reference voice
    Run(RunArgs),
    /// Write the default settings file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Song to cover
    #[arg(long, value_name = "FILE")]
    song: PathBuf,

    /// Reference recording of the target voice
    #[arg(long, value_name = "FILE")]
    voice: PathBuf,

    /// Where to write the final mix
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Root for per-run scratch directories (overrides workspace.scratch_root)
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// Train the voice model while the song is being separated
    #[arg(long)]
    parallel: bool,

    /// Write the final mix as base64 text instead of raw bytes
    #[arg(long)]
    base64: bool,

    /// Print each progress event as a JSON line on stderr
    #[arg(long)]
    progress_json: bool,
}

// ---------------------------------------------------------------------------
// Progress output
// ---------------------------------------------------------------------------

/// One JSON object per line on stderr, for wrapping UIs.
struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn emit(&self, event: ProgressEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => log::warn!("could not encode progress event: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default()
        .save_to(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

async fn read_input(role: AudioRole, path: &Path) -> Result<AudioBlob> {
    let blob = AudioBlob::read_from(role, path)
        .await
        .with_context(|| format!("reading {role} from {}", path.display()))?;
    if blob.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(blob)
}

async fn run(args: RunArgs, mut config: AppConfig) -> Result<()> {
    if let Some(dir) = args.scratch_dir {
        config.workspace.scratch_root = Some(dir);
    }
    if args.parallel {
        config.pipeline.parallel_training = true;
    }

    let song = read_input(AudioRole::Song, &args.song).await?;
    let voice = read_input(AudioRole::ReferenceVoice, &args.voice).await?;

    let orchestrator = PipelineOrchestrator::new(config, Arc::new(SystemRunner));
    log::info!("scratch root: {}", orchestrator.scratch_root().display());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let sink: &dyn ProgressSink = if args.progress_json {
        &JsonProgress
    } else {
        &LogProgress
    };

    let mix = orchestrator
        .run_with_cancel(&song, &voice, Some(sink), cancel)
        .await
        .map_err(|e| anyhow!(e.summary()))?;

    let written = if args.base64 {
        tokio::fs::write(&args.output, mix.to_base64()).await
    } else {
        tokio::fs::write(&args.output, mix.bytes()).await
    };
    written.with_context(|| format!("writing {}", args.output.display()))?;

    log::info!("final mix written to {} ({} bytes)", args.output.display(), mix.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn try_main(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .unwrap_or_else(|| AppPaths::new().settings_file);

    match cli.command {
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::Run(args) => {
            let config = AppConfig::load_from(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to create tokio runtime")?;
            rt.block_on(run(args, config))
        }
    }
}

fn main() -> ExitCode {
    // 1. Arguments
    let cli = Cli::parse();

    // 2. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
