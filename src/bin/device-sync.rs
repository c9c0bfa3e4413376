//! Command-line front end.
//!
//! `sync` reads a request as JSON, streams sync events to stdout as NDJSON
//! and ends with either a `complete` event or a single `{"error": ...}`
//! line. Logs go to stderr.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use device_sync::runtime::events::{Receiver, RecvError};
use device_sync::runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use device_sync::sync::header;
use device_sync::sync::staging::sweep_stale;
use device_sync::{
    CoreConfig, DesiredLayout, FatalError, LibraryNode, SymphoniaTranscoder, SyncEvent,
    SyncOrchestrator, SyncRequest,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

/// Device sync - mirror a music library onto a removable player
#[derive(Parser)]
#[command(name = "device-sync")]
#[command(about = "Incrementally sync a music library onto a removable device")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Private directory for staged payloads
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Artifact directory name under the device root
    #[arg(long)]
    artifact_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync and stream events as NDJSON
    Sync {
        /// Request JSON file, or `-` for stdin
        #[arg(long, default_value = "-")]
        request: String,
    },
    /// Remove staging directories left by interrupted syncs
    SweepStaging,
    /// Print the header of an artifact as JSON
    Inspect {
        /// Artifact file on the device
        artifact: PathBuf,
    },
}

/// Accepted request shapes: a flattened layout, or a raw library tree.
#[derive(Deserialize)]
#[serde(untagged)]
enum RequestInput {
    Layout(SyncRequest),
    #[serde(rename_all = "camelCase")]
    Library {
        library: Vec<LibraryNode>,
        device_root: PathBuf,
    },
}

impl RequestInput {
    fn into_request(self) -> SyncRequest {
        match self {
            RequestInput::Layout(request) => request,
            RequestInput::Library {
                library,
                device_root,
            } => SyncRequest::new(DesiredLayout::from_library(&library), device_root),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => return fatal(e).await,
    };

    let result = match cli.command {
        Commands::Sync { request } => run_sync(config, &request).await,
        Commands::SweepStaging => sweep(&config).await,
        Commands::Inspect { artifact } => inspect(&artifact).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(e).await,
    }
}

fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let level: LogLevel = cli.log_level.parse()?;
    let mut logging = LoggingConfig::default().with_level(level);
    if let Some(format) = &cli.log_format {
        logging = logging.with_format(format.parse::<LogFormat>()?);
    }
    init_logging(logging)?;
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<CoreConfig> {
    let mut builder = CoreConfig::builder();
    if let Some(dir) = &cli.staging_dir {
        builder = builder.staging_dir(dir);
    }
    if let Some(name) = &cli.artifact_dir {
        builder = builder.artifact_dir_name(name);
    }
    Ok(builder.build()?)
}

async fn run_sync(config: CoreConfig, source: &str) -> anyhow::Result<()> {
    let request = read_request(source).await?;

    match sweep_stale(&config.staging_dir).await {
        Ok(0) => {}
        Ok(n) => info!("Removed {} leftover staging directories", n),
        Err(e) => warn!("Could not sweep staging directory: {}", e),
    }

    let orchestrator = SyncOrchestrator::new(config, Arc::new(SymphoniaTranscoder::new()));
    let printer = tokio::spawn(print_events(orchestrator.subscribe()));

    let result = orchestrator.sync(request).await;

    // Closing the bus lets the printer drain and exit
    drop(orchestrator);
    printer.await.context("Event printer panicked")?;

    result?;
    Ok(())
}

async fn read_request(source: &str) -> anyhow::Result<SyncRequest> {
    let bytes = if source == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read request from stdin")?;
        buf
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read request file {}", source))?
    };

    let input: RequestInput =
        serde_json::from_slice(&bytes).context("Request is not a valid sync request")?;
    Ok(input.into_request())
}

async fn print_events(mut events: Receiver<SyncEvent>) {
    let mut stdout = tokio::io::stdout();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!("Event printer fell behind, {} events dropped", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                continue;
            }
        };

        if let Err(e) = write_line(&mut stdout, &line).await {
            warn!("Failed to write event: {}", e);
            break;
        }
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn sweep(config: &CoreConfig) -> anyhow::Result<()> {
    let removed = sweep_stale(&config.staging_dir)
        .await
        .with_context(|| format!("Failed to sweep {}", config.staging_dir.display()))?;
    println!("{}", serde_json::json!({ "removed": removed }));
    Ok(())
}

async fn inspect(artifact: &Path) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::open(artifact)
        .await
        .with_context(|| format!("Failed to open {}", artifact.display()))?;
    let size = file.metadata().await?.len();

    let mut buf = Vec::with_capacity(header::HEADER_LEN);
    (&mut file)
        .take(header::HEADER_LEN as u64)
        .read_to_end(&mut buf)
        .await?;
    let parsed = header::decode(&buf)?;

    let payload = size.saturating_sub(header::HEADER_LEN as u64);
    if u64::from(parsed.data_length) != payload {
        bail!(
            "Header declares {} bytes but payload is {} bytes",
            parsed.data_length,
            payload
        );
    }

    println!(
        "{}",
        serde_json::json!({
            "sampleRate": parsed.format.sample_rate,
            "bitDepth": parsed.format.bit_depth,
            "channels": parsed.format.channels,
            "dataLength": parsed.data_length,
        })
    );
    Ok(())
}

/// Report a fatal error as the single final line on stdout.
async fn fatal(error: anyhow::Error) -> ExitCode {
    let message = format!("{:#}", error);
    tracing::error!("{}", message);

    match FatalError::new(&message).to_json_line() {
        Ok(line) => {
            let mut stdout = tokio::io::stdout();
            if write_line(&mut stdout, &line).await.is_err() {
                eprintln!("{}", message);
            }
        }
        Err(_) => eprintln!("{}", message),
    }
    ExitCode::FAILURE
}
