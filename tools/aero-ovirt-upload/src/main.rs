use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use aero_ovirt_transfer::{run_precheck, BlockDevice, CloseOutcome, UploadParams, UploadSession};
use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const BLOCK_SIZE_BYTES: usize = 1024 * 1024; // 1 MiB

#[derive(Parser, Debug)]
#[command(
    name = "aero-ovirt-upload",
    about = "Upload a raw disk image to oVirt/RHV through the image transfer service."
)]
struct Cli {
    /// Tracing filter directive (e.g. "info", "aero_ovirt_transfer=debug")
    #[arg(long, global = true, env = "AERO_OVIRT_LOG", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fail if a VM with the parameters' output_name already exists
    Precheck(PrecheckArgs),
    /// Create a disk and copy a raw image into it
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
struct PrecheckArgs {
    /// Parameters JSON document
    #[arg(long, value_name = "PATH")]
    params: PathBuf,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Parameters JSON document
    #[arg(long, value_name = "PATH")]
    params: PathBuf,

    /// Raw input image
    input: PathBuf,

    /// Suppress progress output
    #[arg(long, action = clap::ArgAction::SetTrue)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Command::Precheck(args) => precheck(args),
        Command::Upload(args) => upload(args),
    }
}

fn init_tracing(directive: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(directive)
        .with_context(|| format!("invalid log filter {directive:?}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_params(path: &Path) -> anyhow::Result<UploadParams> {
    UploadParams::from_json_file(path).with_context(|| format!("load parameters {}", path.display()))
}

fn precheck(args: PrecheckArgs) -> anyhow::Result<()> {
    let params = load_params(&args.params)?;
    run_precheck(&params).context("precheck")?;
    Ok(())
}

fn upload(args: UploadArgs) -> anyhow::Result<()> {
    let params = load_params(&args.params)?;

    let mut input =
        File::open(&args.input).with_context(|| format!("open input {}", args.input.display()))?;
    let input_len = input
        .metadata()
        .with_context(|| format!("stat input {}", args.input.display()))?
        .len();
    if input_len > params.disk_size {
        bail!(
            "input {} is {input_len} bytes, larger than disk_size ({} bytes)",
            args.input.display(),
            params.disk_size
        );
    }

    if !args.quiet {
        eprintln!("input:  {} ({input_len} bytes)", args.input.display());
        eprintln!(
            "output: disk {:?} on {} ({} bytes, {}, sparse={})",
            params.disk_name,
            params.storage_domain,
            params.disk_size,
            params.disk_format.as_str(),
            params.sparse
        );
    }

    let session = UploadSession::open(params, false).context("open upload session")?;

    if let Err(err) = copy_nonzero_blocks(&mut input, &session, input_len, args.quiet) {
        if let Err(abort_err) = session.abort() {
            tracing::warn!(error = %abort_err, "cleanup after failed upload also failed");
        }
        return Err(err);
    }

    let stats = session.telemetry_snapshot();
    match session.finish().context("close upload session")? {
        CloseOutcome::Finalized { disk_id } => {
            if !args.quiet {
                eprintln!(
                    "uploaded disk {disk_id} ({} bytes written, {} requests)",
                    stats.bytes_written, stats.requests
                );
            }
            Ok(())
        }
        CloseOutcome::Removed { disk_id } => {
            bail!("upload failed; disk {disk_id} was removed")
        }
    }
}

fn copy_nonzero_blocks(
    input: &mut dyn Read,
    output: &UploadSession,
    input_len: u64,
    quiet: bool,
) -> anyhow::Result<()> {
    // A fresh disk reads as zeros; this is absorbed without any request.
    output
        .zero(0, output.size(), true)
        .context("zero destination")?;

    let mut buf = vec![0u8; BLOCK_SIZE_BYTES];
    let mut offset = 0u64;
    let mut last_report = Instant::now();

    while offset < input_len {
        let len_u64 = (BLOCK_SIZE_BYTES as u64).min(input_len - offset);
        let len: usize = len_u64
            .try_into()
            .map_err(|_| anyhow!("block length does not fit in usize"))?;

        input
            .read_exact(&mut buf[..len])
            .with_context(|| format!("read input at offset={offset}"))?;

        if !is_all_zero(&buf[..len]) {
            output
                .write_at(offset, &buf[..len])
                .with_context(|| format!("write at offset={offset}"))?;
        }

        offset += len_u64;
        maybe_report_progress(&mut last_report, offset, input_len, quiet)?;
    }

    if !quiet {
        eprintln!();
    }
    Ok(())
}

fn maybe_report_progress(
    last_report: &mut Instant,
    processed: u64,
    total: u64,
    quiet: bool,
) -> io::Result<()> {
    if quiet {
        return Ok(());
    }
    let now = Instant::now();
    if processed == total || now.duration_since(*last_report) >= Duration::from_millis(250) {
        *last_report = now;
        let pct = if total == 0 {
            100u64
        } else {
            ((processed as u128).saturating_mul(100) / total as u128) as u64
        };
        eprint!("\rprogress: {pct:3}% ({processed}/{total} bytes)");
        io::stderr().flush()?;
    }
    Ok(())
}

fn is_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}
