//! Reconciliation driver: per year folder, match every media file, resolve
//! its capture time, and either write it into its bucket or record why not.
//!
//! Per-file failures become [`ProcessingRecord`]s; only folder-level I/O
//! (listing the folder, writing reports) surfaces as an error, and the run
//! loop logs those and moves on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;

use crate::cancel::CancellationToken;
use crate::embed::MetadataEmbedder;
use crate::error::{CancelledError, EmbedError, SkipReason};
use crate::folder_classify::YearFolder;
use crate::matcher::{self, ConsumptionSet, MatchConfig, MatchOutcome, RuleChain};
use crate::media::{self, MediaFile};
use crate::report::{self, ReportKind};
use crate::store::DescriptorStore;
use crate::timestamp;
use crate::writer::{self, EmbedStatus, OutputNamer};
use crate::ThrottledProgress;

/// Final state of one media file.
#[derive(Debug)]
pub enum Disposition {
    Embedded,
    /// Written with the corrected modified date but without metadata
    CopyOnly { reason: EmbedError },
    Skipped { reason: SkipReason },
}

/// Outcome of reconciling one media file. Created once, never updated.
#[derive(Debug)]
pub struct ProcessingRecord {
    pub media: PathBuf,
    pub sidecar: Option<PathBuf>,
    pub rule: Option<&'static str>,
    /// `<output>/<YYYY>/<MM>`
    pub bucket: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub embed_attempted: bool,
    pub disposition: Disposition,
}

impl ProcessingRecord {
    fn skipped(media: &MediaFile, rule: Option<&'static str>, sidecar: Option<PathBuf>, reason: SkipReason) -> Self {
        Self {
            media: media.path.clone(),
            sidecar,
            rule,
            bucket: None,
            output: None,
            embed_attempted: false,
            disposition: Disposition::Skipped { reason },
        }
    }

    pub fn embed_succeeded(&self) -> bool {
        matches!(self.disposition, Disposition::Embedded)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.disposition, Disposition::Skipped { .. })
    }
}

/// Everything one year folder produced. Immutable once returned.
#[derive(Debug)]
pub struct FolderSummary {
    pub year: String,
    pub folder: PathBuf,
    /// Media files found, dispatched or not
    pub media_files: u64,
    /// Matched in a retry run but not listed in the prior skip report
    pub not_selected: u64,
    pub sidecars: u64,
    /// Sidecars no media file claimed
    pub unclaimed_sidecars: u64,
    /// `path: reason` for each sidecar that failed to load
    pub load_failures: Vec<String>,
    /// Successful matches per rule, in chain order
    pub rule_hits: Vec<(&'static str, u64)>,
    pub records: Vec<ProcessingRecord>,
    /// Stopped early by cancellation
    pub interrupted: bool,
}

impl FolderSummary {
    pub fn embedded(&self) -> u64 {
        self.count(|d| matches!(d, Disposition::Embedded))
    }

    pub fn copied_only(&self) -> u64 {
        self.count(|d| matches!(d, Disposition::CopyOnly { .. }))
    }

    pub fn skipped(&self) -> u64 {
        self.count(|d| matches!(d, Disposition::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&Disposition) -> bool) -> u64 {
        self.records.iter().filter(|r| pred(&r.disposition)).count() as u64
    }

    pub fn skip_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| match &r.disposition {
                Disposition::Skipped { reason } => Some(report::skip_line(&r.media, &reason.to_string())),
                _ => None,
            })
            .collect()
    }

    pub fn copy_only_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| matches!(r.disposition, Disposition::CopyOnly { .. }))
            .map(|r| r.media.display().to_string())
            .collect()
    }

    pub fn lines(&self) -> Vec<String> {
        let mut rows = vec![
            ("Media files".to_string(), self.media_files),
            ("Processed with metadata".to_string(), self.embedded()),
            ("Copied only".to_string(), self.copied_only()),
            ("Skipped".to_string(), self.skipped()),
        ];
        if self.not_selected > 0 {
            rows.push(("Not in skip list".to_string(), self.not_selected));
        }
        rows.push(("Sidecars".to_string(), self.sidecars));
        rows.push(("Unreadable sidecars".to_string(), self.load_failures.len() as u64));
        rows.push(("Unclaimed sidecars".to_string(), self.unclaimed_sidecars));
        for (i, (rule, hits)) in self.rule_hits.iter().enumerate() {
            rows.push((format!("Rule {} ({})", i + 1, rule), *hits));
        }

        let mut lines = vec![format!("YEAR {} SUMMARY:", self.year)];
        if self.interrupted {
            lines.push("  (interrupted)".to_string());
        }
        lines.extend(report::aligned(&rows));
        if !self.load_failures.is_empty() {
            lines.push("Unreadable sidecars:".to_string());
            lines.extend(self.load_failures.iter().map(|f| format!("  {f}")));
        }
        lines
    }
}

/// Summary of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub folders: Vec<FolderSummary>,
    /// Year folders that could not be processed at all, with the error
    pub failed_folders: Vec<(PathBuf, String)>,
}

impl RunSummary {
    pub fn embedded(&self) -> u64 {
        self.folders.iter().map(FolderSummary::embedded).sum()
    }

    pub fn copied_only(&self) -> u64 {
        self.folders.iter().map(FolderSummary::copied_only).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.folders.iter().map(FolderSummary::skipped).sum()
    }

    pub fn media_files(&self) -> u64 {
        self.folders.iter().map(|f| f.media_files).sum()
    }
}

/// State threaded through one processing run.
pub struct RunContext<'a> {
    chain: &'a RuleChain,
    config: MatchConfig,
    zone: Tz,
    output_root: PathBuf,
    embedder: Option<&'a dyn MetadataEmbedder>,
    cancel: Option<&'a CancellationToken>,
    namer: OutputNamer,
}

impl<'a> RunContext<'a> {
    pub fn new(chain: &'a RuleChain, config: MatchConfig, zone: Tz, output_root: impl Into<PathBuf>) -> Self {
        Self {
            chain,
            config,
            zone,
            output_root: output_root.into(),
            embedder: None,
            cancel: None,
            namer: OutputNamer::new(),
        }
    }

    /// Embed metadata with `embedder`; without one every file is copy-only.
    pub fn with_embedder(mut self, embedder: &'a dyn MetadataEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_cancel_token(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    /// Reconcile one year folder. With `selection`, every media file is
    /// still matched (so consumption is the same as in a full run) but only
    /// files whose name is in the set are written or skipped.
    pub fn reconcile_folder(
        &mut self,
        folder: &YearFolder,
        selection: Option<&HashSet<String>>,
        progress: &ThrottledProgress,
    ) -> anyhow::Result<FolderSummary> {
        let scan = media::scan_folder(&folder.path)?;
        let store = DescriptorStore::from_paths(&scan.sidecars);
        tracing::info!(
            "Found {} media files and {} sidecars in {}",
            scan.media.len(),
            store.len(),
            folder.path.display()
        );

        let matched = matcher::match_folder(self.chain, &scan.media, &store, self.config, ConsumptionSet::new());

        let dispatch: Vec<(&MediaFile, &MatchOutcome)> = scan
            .media
            .iter()
            .zip(&matched.outcomes)
            .filter(|(m, _)| selection.map_or(true, |names| names.contains(m.filename())))
            .collect();
        let total = dispatch.len() as u64;
        let not_selected = (scan.media.len() - dispatch.len()) as u64;

        let mut records = Vec::with_capacity(dispatch.len());
        let mut interrupted = false;
        for (i, (media, outcome)) in dispatch.into_iter().enumerate() {
            if self.is_cancelled() {
                tracing::warn!("Cancelled in {} after {} of {} files", folder.path.display(), i, total);
                interrupted = true;
                break;
            }
            let record = self.reconcile_file(media, outcome, &store);
            log_record(&record);
            records.push(record);
            progress.report("process", i as u64, total, &format!("Photos from {}", folder.year));
        }

        let rule_hits = self
            .chain
            .rule_names()
            .into_iter()
            .map(|name| (name, matched.rule_hits.get(name).copied().unwrap_or(0)))
            .collect();

        Ok(FolderSummary {
            year: folder.year.clone(),
            folder: folder.path.clone(),
            media_files: scan.media.len() as u64,
            not_selected,
            sidecars: store.len() as u64,
            unclaimed_sidecars: (store.len() - matched.consumed.len()) as u64,
            load_failures: store.failures().iter().map(|e| e.to_string()).collect(),
            rule_hits,
            records,
            interrupted,
        })
    }

    fn reconcile_file(&mut self, media: &MediaFile, outcome: &MatchOutcome, store: &DescriptorStore) -> ProcessingRecord {
        let (id, rule) = match outcome {
            MatchOutcome::Matched { descriptor, rule, .. } => (*descriptor, *rule),
            MatchOutcome::Unmatched { tried } => {
                return ProcessingRecord::skipped(media, None, None, SkipReason::NoMatch { tried: tried.len() })
            }
            MatchOutcome::Ambiguous { rule, candidates } => {
                let reason = SkipReason::Ambiguous {
                    rule: *rule,
                    candidates: candidates.iter().map(|&c| store.get(c).file_name().to_string()).collect(),
                };
                return ProcessingRecord::skipped(media, Some(*rule), None, reason);
            }
        };

        let descriptor = store.get(id);
        let resolved = match timestamp::resolve(descriptor, self.zone) {
            Ok(ts) => ts,
            Err(reason) => return ProcessingRecord::skipped(media, Some(rule), Some(descriptor.path.clone()), reason),
        };

        let written = writer::write_media(media, descriptor, &resolved, &self.output_root, &mut self.namer, self.embedder);
        let written = match written {
            Ok(w) => w,
            Err(e) => {
                let reason = SkipReason::Io(format!("{e:#}"));
                return ProcessingRecord::skipped(media, Some(rule), Some(descriptor.path.clone()), reason);
            }
        };

        let embed_attempted = written.embed.attempted();
        let disposition = match written.embed {
            EmbedStatus::Embedded => Disposition::Embedded,
            EmbedStatus::NotAttempted(reason) | EmbedStatus::Failed(reason) => Disposition::CopyOnly { reason },
        };
        ProcessingRecord {
            media: media.path.clone(),
            sidecar: Some(descriptor.path.clone()),
            rule: Some(rule),
            bucket: Some(self.output_root.join(resolved.bucket())),
            output: Some(written.output),
            embed_attempted,
            disposition,
        }
    }
}

fn log_record(record: &ProcessingRecord) {
    let name = record.media.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let dest = record
        .output
        .as_deref()
        .and_then(Path::parent)
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    match &record.disposition {
        Disposition::Embedded => tracing::info!("Processed with metadata: {} → {}", name, dest),
        Disposition::CopyOnly { reason } if record.embed_attempted => {
            tracing::warn!("Copied only ({}): {} → {}", reason, name, dest)
        }
        Disposition::CopyOnly { reason } => tracing::info!("Copied only ({}): {} → {}", reason, name, dest),
        Disposition::Skipped { reason } => tracing::warn!("Skip {} ({})", name, reason),
    }
}

/// Write the skip, copy-only, and summary reports of a folder.
pub fn write_folder_reports(report_dir: &Path, summary: &FolderSummary) -> anyhow::Result<()> {
    report::write_lines(&ReportKind::Skipped.path(report_dir, &summary.year), &summary.skip_lines())?;
    report::write_lines(&ReportKind::CopiedOnly.path(report_dir, &summary.year), &summary.copy_only_lines())?;
    report::write_lines(&ReportKind::Summary.path(report_dir, &summary.year), &summary.lines())
}

/// Process `folders` in order. With `retry_dir`, a folder is processed only
/// if `<retry_dir>/<year>_skipped_files.txt` exists, and only the files it
/// lists are dispatched. A retry never overwrites output already on disk.
///
/// Reports of the folder in progress are written before a cancellation is
/// returned as [`CancelledError`].
pub fn run(
    ctx: &mut RunContext,
    folders: &[YearFolder],
    retry_dir: Option<&Path>,
    report_dir: &Path,
    progress: &ThrottledProgress,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();
    if retry_dir.is_some() {
        // Retried files were never written; every existing output belongs to another file.
        ctx.namer = OutputNamer::keeping_existing();
    }

    for folder in folders {
        if let Some(token) = ctx.cancel {
            token.check()?;
        }

        let selection = match retry_dir {
            Some(dir) => {
                let list = ReportKind::Skipped.path(dir, &folder.year);
                if !list.exists() {
                    tracing::info!("Skipped file list {} not found. Skipping folder {}.", list.display(), folder.path.display());
                    continue;
                }
                match report::skip_list_names(&list) {
                    Ok(names) => Some(names),
                    Err(e) => {
                        tracing::error!("{:#}", e);
                        summary.failed_folders.push((folder.path.clone(), format!("{e:#}")));
                        continue;
                    }
                }
            }
            None => None,
        };

        tracing::info!("START PROCESSING YEAR FOLDER: {}", folder.path.display());
        let folder_summary = match ctx.reconcile_folder(folder, selection.as_ref(), progress) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Cannot process {}: {:#}", folder.path.display(), e);
                summary.failed_folders.push((folder.path.clone(), format!("{e:#}")));
                continue;
            }
        };

        if let Err(e) = write_folder_reports(report_dir, &folder_summary) {
            tracing::error!("{:#}", e);
        }
        for line in folder_summary.lines() {
            tracing::info!("{}", line);
        }
        let interrupted = folder_summary.interrupted;
        summary.folders.push(folder_summary);
        if interrupted {
            return Err(CancelledError.into());
        }
    }

    tracing::info!(
        "COMPLETED PROCESSING. Processed with metadata={} Copied only={} Skipped={}",
        summary.embedded(),
        summary.copied_only(),
        summary.skipped()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    use crate::ProgressCallback;

    struct FakeEmbedder {
        fail_on: Option<&'static str>,
        calls: RefCell<Vec<PathBuf>>,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self { fail_on: None, calls: RefCell::new(Vec::new()) }
        }
    }

    impl MetadataEmbedder for FakeEmbedder {
        fn embed(&self, path: &Path, _tags: &[(String, String)]) -> Result<(), EmbedError> {
            self.calls.borrow_mut().push(path.to_path_buf());
            match self.fail_on {
                Some(name) if path.ends_with(name) => Err(EmbedError::Tool("Error: not a valid JPG".into())),
                _ => Ok(()),
            }
        }
    }

    fn year_folder(root: &Path) -> YearFolder {
        let path = root.join("Photos from 2019");
        fs::create_dir_all(&path).unwrap();
        YearFolder { path, year: "2019".into() }
    }

    fn put(folder: &YearFolder, name: &str, contents: &str) {
        let path = folder.path.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sidecar(title: &str, ts: i64) -> String {
        format!(r#"{{"title":"{title}","photoTakenTime":{{"timestamp":"{ts}"}},"url":"https://photos.google.com/photo/{title}"}}"#)
    }

    fn silent() -> Box<ProgressCallback> {
        Box::new(|_: &str, _: u64, _: u64, _: &str| {})
    }

    #[test]
    fn single_march_photo_lands_in_its_bucket() {
        let root = tempfile::tempdir().unwrap();
        let folder = year_folder(root.path());
        put(&folder, "IMG_0001.jpg", "jpeg bytes");
        put(&folder, "IMG_0001.jpg.json", &sidecar("IMG_0001.jpg", 1552348800));
        let out = root.path().join("processed");

        let chain = RuleChain::standard();
        let embedder = FakeEmbedder::new();
        let mut ctx =
            RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out).with_embedder(&embedder);
        let cb = silent();
        let summary = ctx.reconcile_folder(&folder, None, &ThrottledProgress::new(&*cb)).unwrap();

        assert_eq!(summary.records.len(), 1);
        let record = &summary.records[0];
        assert_eq!(record.bucket.as_deref(), Some(out.join("2019").join("03").as_path()));
        assert!(record.embed_succeeded());
        assert_eq!(summary.skipped(), 0);
        assert!(summary.skip_lines().is_empty());
        assert_eq!(summary.unclaimed_sidecars, 0);
        assert_eq!(summary.rule_hits[0], ("direct", 1));
        assert!(out.join("2019/03/IMG_0001.jpg").exists());
        assert_eq!(*embedder.calls.borrow(), vec![out.join("2019/03/IMG_0001.jpg")]);
    }

    #[test]
    fn every_file_ends_in_exactly_one_disposition() {
        let root = tempfile::tempdir().unwrap();
        let folder = year_folder(root.path());
        put(&folder, "a.jpg", "a");
        put(&folder, "a.jpg.json", &sidecar("a.jpg", 1552348800));
        put(&folder, "b.avi", "b");
        put(&folder, "b.avi.json", &sidecar("b.avi", 1552348800));
        put(&folder, "c.jpg", "c");
        put(&folder, "c.jpg.json", r#"{"title":"c.jpg"}"#);
        put(&folder, "d.jpg", "d");
        put(&folder, "e.png", "e");
        put(&folder, "e.png.json", &sidecar("e.png", 1552348800));
        put(&folder, "lonely.jpg.json", &sidecar("lonely.jpg", 1552348800));
        let out = root.path().join("out");

        let chain = RuleChain::standard();
        let embedder = FakeEmbedder { fail_on: Some("e.png"), calls: RefCell::new(Vec::new()) };
        let mut ctx =
            RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out).with_embedder(&embedder);
        let cb = silent();
        let summary = ctx.reconcile_folder(&folder, None, &ThrottledProgress::new(&*cb)).unwrap();

        assert_eq!(summary.media_files, 5);
        assert_eq!(summary.records.len(), 5);
        assert_eq!(summary.embedded(), 1);
        assert_eq!(summary.copied_only(), 2);
        assert_eq!(summary.skipped(), 2);
        assert_eq!(summary.unclaimed_sidecars, 1);

        let skips = summary.skip_lines();
        assert!(skips[0].contains("c.jpg\tno timestamp in c.jpg.json"));
        assert!(skips[1].contains("d.jpg\tno sidecar matched"));
        let copied = summary.copy_only_lines();
        assert!(copied[0].ends_with("b.avi"));
        assert!(copied[1].ends_with("e.png"));
        // The failed embed still produced output.
        assert!(out.join("2019/03/e.png").exists());
        assert!(!out.join("2019/03/d.jpg").exists());
    }

    #[test]
    fn ambiguous_files_are_skipped_with_candidates() {
        let root = tempfile::tempdir().unwrap();
        let folder = year_folder(root.path());
        put(&folder, "photo.jpg", "x");
        put(&folder, "photo.heic.json", &sidecar("photo-a.heic", 1552348800));
        put(&folder, "photo.png.json", &sidecar("photo-b.png", 1552348800));

        let chain = RuleChain::standard();
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::UTC, root.path().join("out"));
        let cb = silent();
        let summary = ctx.reconcile_folder(&folder, None, &ThrottledProgress::new(&*cb)).unwrap();

        let skips = summary.skip_lines();
        assert_eq!(skips.len(), 1);
        assert!(skips[0].contains("ambiguous sidecar via"));
        assert!(skips[0].contains("photo.heic.json") && skips[0].contains("photo.png.json"));
    }

    #[test]
    fn same_name_in_subfolders_does_not_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let folder = year_folder(root.path());
        put(&folder, "x/IMG_1.jpg", "first");
        put(&folder, "x/IMG_1.jpg.json", &sidecar("IMG_1.jpg", 1552348800));
        put(&folder, "y/IMG_1.jpg", "second");
        put(&folder, "y/IMG_1.jpg(1).json", &sidecar("IMG_1.jpg", 1552348800));
        let out = root.path().join("out");

        let chain = RuleChain::standard();
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out);
        let cb = silent();
        let summary = ctx.reconcile_folder(&folder, None, &ThrottledProgress::new(&*cb)).unwrap();

        assert_eq!(summary.copied_only(), 2);
        assert!(out.join("2019/03/IMG_1.jpg").exists());
        assert!(out.join("2019/03/IMG_1(1).jpg").exists());
    }

    #[test]
    fn retry_run_dispatches_only_listed_files() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("takeout");
        let folder = year_folder(&input);
        put(&folder, "a.jpg", "a");
        put(&folder, "a.jpg.json", &sidecar("a.jpg", 1552348800));
        put(&folder, "b.jpg", "b");
        put(&folder, "b.jpg.json", &sidecar("b.jpg", 1552348800));

        let retry = root.path().join("retry");
        report::write_lines(
            &ReportKind::Skipped.path(&retry, "2019"),
            &[report::skip_line(&folder.path.join("b.jpg"), "no sidecar matched (tried 8 rules)")],
        )
        .unwrap();
        let other = YearFolder {
            path: input.join("Photos from 2020"),
            year: "2020".into(),
        };
        fs::create_dir_all(&other.path).unwrap();

        let out = root.path().join("out");
        let reports = root.path().join("reports");
        let chain = RuleChain::standard();
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out);
        let cb = silent();
        let summary = run(&mut ctx, &[folder, other], Some(&retry), &reports, &ThrottledProgress::new(&*cb)).unwrap();

        assert_eq!(summary.folders.len(), 1);
        assert_eq!(summary.folders[0].records.len(), 1);
        assert_eq!(summary.folders[0].not_selected, 1);
        assert!(out.join("2019/03/b.jpg").exists());
        assert!(!out.join("2019/03/a.jpg").exists());
        assert!(ReportKind::Summary.path(&reports, "2019").exists());
        assert!(!ReportKind::Skipped.path(&reports, "2019").exists());
    }

    #[test]
    fn retry_keeps_earlier_output_with_the_same_name() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("takeout");
        let first = year_folder(&input);
        put(&first, "a.jpg", "FIRST");
        put(&first, "a.jpg.json", &sidecar("a.jpg", 1552348800));
        let second = YearFolder {
            path: input.join("Photos from 2020"),
            year: "2020".into(),
        };
        put(&second, "a.jpg", "SECOND");
        let folders = [first, second.clone()];

        let out = root.path().join("out");
        let reports = root.path().join("reports");
        let chain = RuleChain::standard();
        let cb = silent();
        let progress = ThrottledProgress::new(&*cb);
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out);
        run(&mut ctx, &folders, None, &reports, &progress).unwrap();
        assert!(ReportKind::Skipped.path(&reports, "2020").exists());

        // The missing sidecar turns up; only the 2020 file is retried.
        put(&second, "a.jpg.json", &sidecar("a.jpg", 1552348800));
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out);
        let summary = run(&mut ctx, &folders, Some(&reports), &root.path().join("retry"), &progress).unwrap();

        assert_eq!(summary.folders.len(), 1);
        let bucket = out.join("2019/03");
        assert_eq!(fs::read_to_string(bucket.join("a.jpg")).unwrap(), "FIRST");
        assert_eq!(fs::read_to_string(bucket.join("a(1).jpg")).unwrap(), "SECOND");
    }

    #[test]
    fn cancellation_writes_reports_then_errors() {
        let root = tempfile::tempdir().unwrap();
        let folder = year_folder(root.path());
        put(&folder, "a.jpg", "a");
        put(&folder, "a.jpg.json", &sidecar("a.jpg", 1552348800));

        let token = CancellationToken::new();
        token.cancel();
        let chain = RuleChain::standard();
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::UTC, root.path().join("out"))
            .with_cancel_token(&token);
        let cb = silent();
        let progress = ThrottledProgress::new(&*cb);

        let summary = ctx.reconcile_folder(&folder, None, &progress).unwrap();
        assert!(summary.interrupted);
        assert!(summary.records.is_empty());
        assert_eq!(summary.not_selected, 0);

        let reports = root.path().join("reports");
        let err = run(&mut ctx, &[folder], None, &reports, &progress).unwrap_err();
        assert!(err.downcast_ref::<CancelledError>().is_some());
    }

    #[test]
    fn summary_lists_rules_in_chain_order() {
        let root = tempfile::tempdir().unwrap();
        let folder = year_folder(root.path());
        put(&folder, "a.jpg", "a");
        put(&folder, "a.jpg.json", &sidecar("a.jpg", 1552348800));
        put(&folder, "bad.jpg.json", "{nope");

        let chain = RuleChain::standard();
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::UTC, root.path().join("out"));
        let cb = silent();
        let summary = ctx.reconcile_folder(&folder, None, &ThrottledProgress::new(&*cb)).unwrap();

        let names: Vec<&str> = summary.rule_hits.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, chain.rule_names());
        assert_eq!(summary.load_failures.len(), 1);
        let lines = summary.lines();
        assert_eq!(lines[0], "YEAR 2019 SUMMARY:");
        assert!(lines.iter().any(|l| l.contains("Rule 1 (direct):") && l.ends_with('1')));
        assert!(lines.iter().any(|l| l.contains("bad.jpg.json")));
    }
}
