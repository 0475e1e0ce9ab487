#![forbid(unsafe_code)]
//! nxprobe — inspect the checkpoint state of an APFS container.
//!
//! Reads a container image (or block device) read-only, resolves the latest
//! consistent checkpoint, and reports what a mount would start from: the
//! selected superblock, its checkpoint and ephemeral objects, the container
//! object map, and the registered volumes.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::bail;
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use nxprobe_block::{BlockDevice, FileBlockDevice, DEFAULT_BLOCK_SIZE};
use nxprobe_container::bootstrap::bootstrap;
use nxprobe_error::{NxError, Result};
use tracing_subscriber::EnvFilter;

mod render;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "NXPROBE_LOG_FORMAT";

    fn from_env() -> anyhow::Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => <Self as ValueEnum>::from_str(value.trim(), true)
                .map(Some)
                .map_err(|_| {
                    anyhow::anyhow!(
                        "invalid {key}={value:?}; expected one of: human, json",
                        key = Self::ENV_KEY
                    )
                }),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Diagnostics go to stderr; stdout carries only the report itself.
fn init_logging(format_override: Option<LogFormat>) -> anyhow::Result<()> {
    let format = match format_override {
        Some(format) => format,
        None => LogFormat::from_env()?.unwrap_or(LogFormat::Human),
    };
    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_writer(io::stderr)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(default_env_filter())
            .with_writer(io::stderr)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "nxprobe",
    about = "Inspect the checkpoint state of an APFS container",
    version
)]
struct Cli {
    /// Path to the container: a block device or a disk image.
    container: PathBuf,

    /// Emit the bootstrap report as JSON instead of the narrative text.
    #[arg(long)]
    json: bool,

    /// Provisional block size for the first read of block zero; the size the
    /// container states takes over for every later read.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Log output format (`human` or `json`).
    ///
    /// Precedence: `--log-format` > `NXPROBE_LOG_FORMAT` > `human`.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
            {
                0
            } else {
                1
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    if let Err(err) = init_logging(cli.log_format) {
        eprintln!("ABORT: {err:#}");
        return ExitCode::from(1);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ABORT: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.block_size == 0 || !cli.block_size.is_power_of_two() {
        return Err(NxError::usage(format!(
            "--block-size must be a power of two, got {}",
            cli.block_size
        )));
    }

    let dev = FileBlockDevice::open(&cli.container, cli.block_size)?;
    if dev.block_count() == 0 {
        return Err(NxError::corrupt(format!(
            "`{}` is smaller than one block",
            cli.container.display()
        )));
    }

    let report = bootstrap(dev)?;

    let stdout = io::stdout().lock();
    let mut out = io::BufWriter::new(stdout);
    if cli.json {
        serde_json::to_writer_pretty(&mut out, &report)
            .map_err(|err| NxError::Io(io::Error::other(err)))?;
        writeln!(out)?;
    } else {
        render::render_human(&mut out, &cli.container, &report)?;
    }
    out.flush()?;
    Ok(())
}
