//! dbwinlog - capture debug output around scripted runs
//!
//! ```text
//! dbwinlog run --log app1.log -- app1.exe --flag
//! dbwinlog listen --log session.log
//! dbwinlog emit "checkpoint reached"
//! dbwinlog config
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbwin::{make_session_with, BackendKind, Capture, CaptureConfig, CaptureStats, Session};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Capture OutputDebugString messages to a log file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ./dbwin.toml
    #[arg(long, global = true, env = "DBWIN_CONFIG")]
    config: Option<PathBuf>,

    /// Channel backend (auto, win32, loopback)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture while one program runs, then exit with its status
    Run {
        /// Log file; relative paths go under the configured log_dir
        #[arg(short, long)]
        log: PathBuf,

        /// Run the program without capturing
        #[arg(long)]
        disabled: bool,

        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Capture until Ctrl-C
    Listen {
        /// Log file; relative paths go under the configured log_dir
        #[arg(short, long)]
        log: PathBuf,
    },

    /// Send debug strings to whoever is listening
    Emit {
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (mut config, sources) = CaptureConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    init_tracing(&config.log_level);

    match cli.command {
        Commands::Run {
            log,
            disabled,
            command,
        } => {
            if disabled {
                config.enabled = false;
            }
            run_program(&config, &log, &command).await
        }
        Commands::Listen { log } => {
            listen(&config, &log).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Emit { text } => {
            for line in &text {
                dbwin::output_debug_string(line).context("Failed to emit debug string")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            print!("{}", config.to_toml());
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn start_session(config: &CaptureConfig, log: &Path) -> Result<Session> {
    let mut session = make_session_with(config, log).context("Failed to create capture session")?;
    session
        .start()
        .with_context(|| format!("Failed to start capture into {}", session.log_path().display()))?;
    Ok(session)
}

fn finish_session(mut session: Session) -> Result<CaptureStats> {
    let stats = session.stop().context("Failed to stop capture session")?;
    if !session.is_null() {
        info!(
            "📝 {} messages written to {}",
            stats.messages,
            session.log_path().display()
        );
    }
    if stats.decode_anomalies > 0 || stats.write_failures > 0 {
        warn!(
            "{} malformed messages, {} lost to write errors",
            stats.decode_anomalies, stats.write_failures
        );
    }
    Ok(stats)
}

async fn run_program(config: &CaptureConfig, log: &Path, command: &[String]) -> Result<ExitCode> {
    let (program, args) = command
        .split_first()
        .context("No program given to run")?;

    let session = start_session(config, log)?;

    let mut child = match tokio::process::Command::new(program).args(args).spawn() {
        Ok(child) => child,
        Err(e) => {
            finish_session(session)?;
            return Err(e).with_context(|| format!("Failed to launch {}", program));
        }
    };
    info!("🚀 Running {} (pid {:?})", program, child.id());

    let status = tokio::select! {
        status = child.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping {}", program);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program, e);
            }
            child.wait().await
        }
    };

    // Close the log before reporting the child's result
    finish_session(session)?;

    let status = status.with_context(|| format!("Failed to wait for {}", program))?;
    info!("{} exited with {}", program, status);

    // Killed by a signal has no code; report plain failure
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

async fn listen(config: &CaptureConfig, log: &Path) -> Result<()> {
    let session = start_session(config, log)?;
    info!("🎧 Listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    info!("Received Ctrl-C, stopping capture");

    finish_session(session)?;
    Ok(())
}
