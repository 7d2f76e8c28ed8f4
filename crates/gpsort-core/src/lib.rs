pub mod cancel;
pub mod embed;
pub mod error;
pub mod extras;
pub mod folder_classify;
pub mod matcher;
pub mod media;
pub mod reconcile;
pub mod report;
pub mod sidecar;
pub mod store;
pub mod timestamp;
pub mod validate;
pub mod writer;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use cancel::CancellationToken;
pub use error::{CancelledError, EmbedError, SidecarLoadError, SkipReason};
pub use matcher::{CompanionPolicy, MatchConfig, MatchOutcome, RuleChain, DEFAULT_TRUNCATION_LIMIT};
pub use reconcile::{Disposition, FolderSummary, ProcessingRecord, RunSummary};
pub use timestamp::DEFAULT_TIME_ZONE;
pub use validate::{ValidationFinding, ValidationReport};

/// Name of the output folder created inside the input when none is given.
pub const DEFAULT_OUTPUT_DIR: &str = "processed";

fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_truncation_limit() -> usize {
    DEFAULT_TRUNCATION_LIMIT
}

fn default_embed() -> bool {
    true
}

fn default_exiftool() -> PathBuf {
    PathBuf::from("exiftool")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Export root holding the "Photos from YYYY" folders
    pub input: PathBuf,
    /// Defaults to `<input>/processed`
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Defaults to `<input>`
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    /// Folder holding a previous run's `<year>_skipped_files.txt`
    #[serde(default)]
    pub retry_skipped: Option<PathBuf>,
    #[serde(default)]
    pub companion_policy: CompanionPolicy,
    #[serde(default = "default_truncation_limit")]
    pub truncation_limit: usize,
    #[serde(default = "default_embed")]
    pub embed: bool,
    #[serde(default = "default_exiftool")]
    pub exiftool: PathBuf,
}

impl ProcessOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            report_dir: None,
            time_zone: default_time_zone(),
            retry_skipped: None,
            companion_policy: CompanionPolicy::default(),
            truncation_limit: DEFAULT_TRUNCATION_LIMIT,
            embed: true,
            exiftool: default_exiftool(),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        resolve_output(&self.input, self.output.as_deref())
    }

    pub fn report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(|| self.input.clone())
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            truncation_limit: self.truncation_limit,
            companion_policy: self.companion_policy,
        }
    }
}

/// Options of a validation pass. Matching settings must equal those of the
/// processing run being checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateOptions {
    pub input: PathBuf,
    /// Defaults to `<input>/processed`
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Where reports are written and skip reports are looked up; defaults
    /// to `<input>`
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default)]
    pub companion_policy: CompanionPolicy,
    #[serde(default = "default_truncation_limit")]
    pub truncation_limit: usize,
}

impl ValidateOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            report_dir: None,
            time_zone: default_time_zone(),
            companion_policy: CompanionPolicy::default(),
            truncation_limit: DEFAULT_TRUNCATION_LIMIT,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        resolve_output(&self.input, self.output.as_deref())
    }

    pub fn report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(|| self.input.clone())
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            truncation_limit: self.truncation_limit,
            companion_policy: self.companion_policy,
        }
    }
}

fn resolve_output(input: &Path, output: Option<&Path>) -> PathBuf {
    output.map_or_else(|| input.join(DEFAULT_OUTPUT_DIR), Path::to_path_buf)
}

/// Cancellation for a run.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Type alias for progress callback: (stage, current, total, message)
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter: emits at most every 200ms, plus the final
/// update of a stage.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    const INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(inner: &'a ProgressCallback) -> Self {
        let start = Instant::now().checked_sub(Duration::from_secs(1)).unwrap_or_else(Instant::now);
        Self {
            inner,
            last_emit: std::sync::Mutex::new(start),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < Self::INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

fn check_input(input: &Path) -> anyhow::Result<()> {
    if !input.is_dir() {
        anyhow::bail!("input folder {} does not exist", input.display());
    }
    Ok(())
}

fn same_folder(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Run reconciliation over every year folder of `options.input`.
pub fn process(options: &ProcessOptions, progress_callback: &ProgressCallback) -> anyhow::Result<RunSummary> {
    process_with_control(options, &ProcessControl::default(), progress_callback)
}

pub fn process_with_control(
    options: &ProcessOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<RunSummary> {
    let tp = ThrottledProgress::new(progress_callback);
    if let Some(ref token) = control.cancel_token {
        token.check()?;
    }

    check_input(&options.input)?;
    if let Some(retry) = &options.retry_skipped {
        if same_folder(retry, &options.input) {
            anyhow::bail!("the skipped-files folder must differ from the input folder");
        }
        if !retry.is_dir() {
            anyhow::bail!("skipped-files folder {} does not exist", retry.display());
        }
    }
    let zone = timestamp::parse_zone(&options.time_zone)?;

    let embedder = if options.embed {
        let tool = embed::ExifTool::new(&options.exiftool);
        let version = tool.version().with_context(|| {
            format!(
                "{} is required to embed metadata (or disable embedding)",
                options.exiftool.display()
            )
        })?;
        tracing::info!("Using ExifTool {}", version);
        Some(tool)
    } else {
        None
    };

    let output = options.output_dir();
    let report_dir = options.report_dir();
    std::fs::create_dir_all(&output).with_context(|| format!("cannot create {}", output.display()))?;

    let folders = folder_classify::find_year_folders(&options.input)?;
    if folders.is_empty() {
        tracing::warn!("No year folders found in {}", options.input.display());
        return Ok(RunSummary::default());
    }

    let chain = RuleChain::standard();
    let mut ctx = reconcile::RunContext::new(&chain, options.match_config(), zone, &output);
    if let Some(tool) = &embedder {
        ctx = ctx.with_embedder(tool);
    }
    if let Some(token) = &control.cancel_token {
        ctx = ctx.with_cancel_token(token);
    }

    reconcile::run(&mut ctx, &folders, options.retry_skipped.as_deref(), &report_dir, &tp)
}

/// Check a processed tree against its input.
pub fn validate(options: &ValidateOptions, progress_callback: &ProgressCallback) -> anyhow::Result<ValidationReport> {
    validate_with_control(options, &ProcessControl::default(), progress_callback)
}

pub fn validate_with_control(
    options: &ValidateOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<ValidationReport> {
    let tp = ThrottledProgress::new(progress_callback);
    check_input(&options.input)?;
    let zone = timestamp::parse_zone(&options.time_zone)?;
    let output = options.output_dir();
    if !output.is_dir() {
        anyhow::bail!("output folder {} does not exist", output.display());
    }

    let folders = folder_classify::find_year_folders(&options.input)?;
    let chain = RuleChain::standard();
    let mut validator = validate::Validator::new(&chain, options.match_config(), zone, output);
    validate::run(&mut validator, &folders, &options.report_dir(), &tp, control.cancel_token.as_ref())
}
