use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gpsort_core::{CancellationToken, CancelledError, CompanionPolicy, ProcessControl};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "gpsort",
    version,
    about = "Match Google Photos Takeout sidecars to media, sort into YYYY/MM folders, and validate the result"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy media into <output>/YYYY/MM and embed sidecar metadata
    Process(ProcessArgs),
    /// Check a processed tree against its input
    Validate(ValidateArgs),
}

#[derive(Args)]
struct Common {
    /// Takeout folder containing "Photos from YYYY" folders
    input: PathBuf,

    /// Output folder (default: <input>/processed)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Folder for reports and the log file (default: <input>)
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// IANA time zone used for dates and buckets
    #[arg(long, default_value = gpsort_core::DEFAULT_TIME_ZONE)]
    time_zone: String,

    /// Whether one still's sidecar may serve several live-photo videos: shared or one-to-one
    #[arg(long, default_value = "shared")]
    companion_policy: CompanionPolicy,

    /// Sidecar name length budget of the export, ".json" included
    #[arg(long, default_value_t = gpsort_core::DEFAULT_TRUNCATION_LIMIT)]
    truncation_limit: usize,

    /// Do not write a log file
    #[arg(long)]
    no_log_file: bool,
}

impl Common {
    fn report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(|| self.input.clone())
    }
}

#[derive(Args)]
struct ProcessArgs {
    #[command(flatten)]
    common: Common,

    /// Re-run only files listed in <DIR>/YYYY_skipped_files.txt
    #[arg(long, value_name = "DIR")]
    skipped_files: Option<PathBuf>,

    /// Copy and fix modified dates only, never run ExifTool
    #[arg(long)]
    no_embed: bool,

    /// ExifTool executable
    #[arg(long, default_value = "exiftool")]
    exiftool: PathBuf,
}

#[derive(Args)]
struct ValidateArgs {
    #[command(flatten)]
    common: Common,
}

/// Console plus (optionally) a timestamped log file in `report_dir`.
fn init_logging(report_dir: &Path, log_file: bool) -> anyhow::Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gpsort=info,gpsort_core=info"));
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if !log_file {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(None);
    }

    fs::create_dir_all(report_dir).with_context(|| format!("cannot create {}", report_dir.display()))?;
    let path = report_dir.join(format!("gpsort_{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S")));
    let file = File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false);
    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    Ok(Some(path))
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn cancel_on_ctrlc() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current file...");
        handler_token.cancel();
    })
    .context("cannot install Ctrl-C handler")?;
    Ok(token)
}

fn run_process(args: ProcessArgs, control: &ProcessControl, pb: &ProgressBar) -> anyhow::Result<ExitCode> {
    let options = gpsort_core::ProcessOptions {
        input: args.common.input.clone(),
        output: args.common.output.clone(),
        report_dir: Some(args.common.report_dir()),
        time_zone: args.common.time_zone.clone(),
        retry_skipped: args.skipped_files,
        companion_policy: args.common.companion_policy,
        truncation_limit: args.common.truncation_limit,
        embed: !args.no_embed,
        exiftool: args.exiftool,
    };

    let bar = pb.clone();
    let summary = gpsort_core::process_with_control(&options, control, &move |stage, current, total, message| {
        bar.set_length(total);
        bar.set_position((current + 1).min(total));
        bar.set_message(format!("{stage} {message}"));
    })?;
    pb.finish_and_clear();

    eprintln!(
        "Done! {} media files: {} with metadata, {} copied only, {} skipped",
        summary.media_files(),
        summary.embedded(),
        summary.copied_only(),
        summary.skipped()
    );
    for (folder, error) in &summary.failed_folders {
        eprintln!("Not processed: {} ({})", folder.display(), error);
    }
    Ok(if summary.failed_folders.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_validate(args: ValidateArgs, control: &ProcessControl, pb: &ProgressBar) -> anyhow::Result<ExitCode> {
    let options = gpsort_core::ValidateOptions {
        input: args.common.input.clone(),
        output: args.common.output.clone(),
        report_dir: Some(args.common.report_dir()),
        time_zone: args.common.time_zone.clone(),
        companion_policy: args.common.companion_policy,
        truncation_limit: args.common.truncation_limit,
    };

    let bar = pb.clone();
    let report = gpsort_core::validate_with_control(&options, control, &move |_stage, current, total, message| {
        bar.set_length(total);
        bar.set_position(current.min(total));
        bar.set_message(message.to_string());
    })?;
    pb.finish_and_clear();

    for line in report.lines() {
        println!("{line}");
    }
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let common = match &cli.command {
        Command::Process(args) => &args.common,
        Command::Validate(args) => &args.common,
    };
    if let Some(path) = init_logging(&common.report_dir(), !common.no_log_file)? {
        tracing::info!("Logging to {}", path.display());
    }

    let control = ProcessControl::new().with_cancel_token(cancel_on_ctrlc()?);
    let pb = progress_bar();
    let result = match cli.command {
        Command::Process(args) => run_process(args, &control, &pb),
        Command::Validate(args) => run_validate(args, &control, &pb),
    };
    pb.finish_and_clear();

    match result {
        Ok(code) => {
            eprintln!("({:.2}s)", t_total.elapsed().as_secs_f64());
            Ok(code)
        }
        Err(e) if e.downcast_ref::<CancelledError>().is_some() => {
            eprintln!("Cancelled. Reports for finished folders were written.");
            Ok(ExitCode::from(130))
        }
        Err(e) => Err(e),
    }
}
