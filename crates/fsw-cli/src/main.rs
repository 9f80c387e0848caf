//! CLI entry point for the fsw filesystem watcher.
//!
//! Watches one or more directory trees and prints every classified change
//! until ENTER or Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```bash
//! fsw [OPTIONS] <COMMAND>
//!
//! # Watch two trees, printing one line per change
//! fsw watch /path/to/dir1 /path/to/dir2
//!
//! # JSON lines, coalescing for 250ms, directory-level events only
//! fsw watch --format json --latency-ms 250 --dir-events ~/src
//!
//! # Show how a raw flag word is classified
//! fsw explain 0x10500
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod output;

use std::io::Write;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{WrapErr, eyre};
use fsw_core::{Config, EventFlags, OutputFormat};
use fsw_watcher::{ClassifiedEvent, EventBatchStats, NotifySource, WatcherBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Recursive filesystem watcher with classified change events.
#[derive(Parser)]
#[command(name = "fsw", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Watch paths and print changes until ENTER or Ctrl-C.
    Watch(WatchArgs),

    /// Show how a raw flag word is classified.
    Explain {
        /// Flag word, decimal or 0x-prefixed hexadecimal.
        #[arg(value_parser = parse_flags)]
        flags: EventFlags,
    },
}

/// Arguments of the `watch` subcommand.
#[derive(clap::Args)]
struct WatchArgs {
    /// Paths to watch recursively. Relative paths are resolved against the
    /// current directory.
    paths: Vec<Utf8PathBuf>,

    /// JSON configuration file; flags override its values.
    #[arg(short, long, env = "FSW_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// How long the source may coalesce changes, in milliseconds.
    #[arg(long, env = "FSW_LATENCY_MS")]
    latency_ms: Option<u64>,

    /// Report per-directory changes instead of per-item ones.
    #[arg(long)]
    dir_events: bool,

    /// Output format.
    #[arg(short, long, value_enum, env = "FSW_FORMAT")]
    format: Option<FormatArg>,

    /// Print the raw flags next to each event.
    #[arg(long)]
    show_flags: bool,
}

/// Event output format.
#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// `[ kind ] - path` lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

/// Parses a flag word given in decimal or `0x` hexadecimal.
fn parse_flags(input: &str) -> Result<EventFlags, String> {
    let trimmed = input.trim();
    let bits = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    }
    .map_err(|e| format!("invalid flag word '{input}': {e}"))?;
    Ok(EventFlags::from_bits_retain(bits))
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Logs go to stderr so that stdout carries only events.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn,notify=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the optional config file and CLI arguments.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded, a path cannot be
/// made absolute, or the resulting configuration is invalid. A `since`
/// resume point is rejected because the filesystem source cannot replay.
fn build_config(args: &WatchArgs) -> color_eyre::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .wrap_err_with(|| format!("Failed to load config from {path}"))?,
        None => Config::default(),
    };

    if !args.paths.is_empty() {
        config.watch.paths = args
            .paths
            .iter()
            .map(|path| absolutize(path))
            .collect::<color_eyre::Result<_>>()?;
    }
    if let Some(latency_ms) = args.latency_ms {
        config.watch.latency_ms = latency_ms;
    }
    if args.dir_events {
        config.watch.file_events = false;
    }
    if let Some(format) = args.format {
        config.output.format = format.into();
    }
    config.output.show_flags |= args.show_flags;

    config.watch.validate()?;
    if let Some(since) = config.watch.resume_from() {
        return Err(eyre!(
            "Cannot resume from event {since}: the notify source keeps no event history"
        ));
    }
    Ok(config)
}

/// Resolves a relative path against the current directory.
///
/// The path does not have to exist.
fn absolutize(path: &Utf8PathBuf) -> color_eyre::Result<Utf8PathBuf> {
    if path.is_absolute() {
        return Ok(path.clone());
    }
    let cwd = std::env::current_dir().wrap_err("Failed to read current directory")?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| eyre!("Current directory is not UTF-8: {}", p.display()))?;
    Ok(cwd.join(path))
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Watches the configured paths until ENTER is pressed or a stop signal arrives.
///
/// # Errors
///
/// Returns an error if the watcher cannot be started or stopped, or if
/// writing to stdout fails.
async fn run_watch(config: Config) -> color_eyre::Result<()> {
    info!(
        paths = ?config.watch.paths,
        latency_ms = config.watch.latency_ms,
        "Starting watcher"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<ClassifiedEvent>();
    let builder = WatcherBuilder::from_config(&config.watch);
    let mut watcher = tokio::task::spawn_blocking(move || builder.start(NotifySource::new(), tx))
        .await
        .wrap_err("Watcher start task failed")??;

    {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        writeln!(
            handle,
            "Watching {} path(s). Press ENTER or Ctrl-C to stop.",
            watcher.paths().len()
        )?;
    }

    let mut stats = EventBatchStats::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                print_event(&event, &config)?;
                stats.record(&event);
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    info!("Stop requested from stdin");
                    break;
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            () = &mut shutdown => break,
            else => break,
        }
    }

    let watcher = tokio::task::spawn_blocking(move || watcher.stop().map(|()| watcher))
        .await
        .wrap_err("Watcher stop task failed")??;

    // Everything still queued was delivered before stop returned.
    while let Ok(event) = rx.try_recv() {
        print_event(&event, &config)?;
        stats.record(&event);
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    writeln!(handle)?;
    writeln!(
        handle,
        "{}",
        output::render_summary(&stats, &watcher.stats(), watcher.last_event_id())
    )?;
    Ok(())
}

/// Resolves once Ctrl-C (or SIGTERM on Unix) is received.
async fn shutdown_signal() {
    // Handle SIGTERM for graceful shutdown on Unix
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, stopping"),
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl-C, stopping");
    } else {
        // No signal handling available; only ENTER can stop the watch.
        std::future::pending::<()>().await;
    }
}

/// Prints the classification of a flag word.
///
/// # Errors
///
/// Returns an error if writing to stdout fails.
fn run_explain(flags: EventFlags) -> color_eyre::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", output::render_explanation(flags))?;
    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Prints one event to stdout.
fn print_event(event: &ClassifiedEvent, config: &Config) -> color_eyre::Result<()> {
    let line = output::render_event(event, &config.output)?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{line}")?;
    if config.output.format == OutputFormat::Json {
        handle.flush()?;
    }
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Route to appropriate command
    match cli.command {
        Commands::Watch(args) => {
            let config = build_config(&args)?;
            run_watch(config).await
        }
        Commands::Explain { flags } => run_explain(flags),
    }
}
