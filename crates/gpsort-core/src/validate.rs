//! Post-run integrity checks of a processed tree against its input.
//!
//! Four checks per year folder: every resolvable media file has an output,
//! output sizes stay within what embedding can add or remove, modified dates
//! agree with the bucket a file sits in, and every sidecar was claimed.
//! Input files and the output tree are never modified; unclaimed sidecars
//! are copied under the report directory for manual recovery.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono_tz::Tz;

use crate::cancel::CancellationToken;
use crate::folder_classify::YearFolder;
use crate::matcher::{self, ConsumptionSet, MatchConfig, MatchOutcome, RuleChain};
use crate::media::{self, is_sidecar_path};
use crate::report::{self, ReportKind, OVERALL_VALIDATION_SUMMARY};
use crate::store::DescriptorStore;
use crate::timestamp;
use crate::writer::OutputNamer;
use crate::ThrottledProgress;

/// An output may be at most this many bytes smaller than its input.
pub const MAX_SHRINK: u64 = 32;
/// An output may be at most this many bytes larger than its input.
pub const MAX_GROWTH: u64 = 10240;

/// Directory under the report directory receiving copies of orphan
/// sidecars, one subfolder per year folder.
pub const ORPHAN_EXPORT_DIR: &str = "orphan_json";

pub fn size_within_bounds(input_size: u64, output_size: u64) -> bool {
    output_size.saturating_add(MAX_SHRINK) >= input_size && output_size <= input_size.saturating_add(MAX_GROWTH)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFinding {
    MissingOutput {
        input: PathBuf,
        expected: PathBuf,
    },
    SizeOutOfBounds {
        input: PathBuf,
        output: PathBuf,
        input_size: u64,
        output_size: u64,
    },
    ModifiedDateMismatch {
        output: PathBuf,
        bucket: (i32, u32),
        modified: (i32, u32),
    },
    OrphanDescriptor {
        sidecar: PathBuf,
        url: Option<String>,
    },
}

impl ValidationFinding {
    pub fn reason(&self) -> String {
        match self {
            ValidationFinding::MissingOutput { expected, .. } => format!("not found at {}", expected.display()),
            ValidationFinding::SizeOutOfBounds { input_size, output_size, .. } => format!(
                "size {} -> {} bytes ({:+}), allowed -{}..+{}",
                input_size,
                output_size,
                *output_size as i128 - *input_size as i128,
                MAX_SHRINK,
                MAX_GROWTH
            ),
            ValidationFinding::ModifiedDateMismatch { bucket, modified, .. } => format!(
                "modified {:04}-{:02}, bucket {:04}-{:02}",
                modified.0, modified.1, bucket.0, bucket.1
            ),
            ValidationFinding::OrphanDescriptor { url, .. } => match url {
                Some(url) => format!("no media file, source {url}"),
                None => "no media file".to_string(),
            },
        }
    }
}

/// Findings and counts for one year folder.
#[derive(Debug, Default)]
pub struct YearValidation {
    pub year: String,
    pub media_files: u64,
    /// Outputs found at their expected path
    pub found: u64,
    /// Media files that match or resolve to nothing, so have no output
    pub unresolved: u64,
    /// Unresolved files the processing run listed as skipped
    pub expected_skips: u64,
    pub findings: Vec<ValidationFinding>,
}

impl YearValidation {
    fn count(&self, pred: impl Fn(&ValidationFinding) -> bool) -> u64 {
        self.findings.iter().filter(|f| pred(f)).count() as u64
    }

    pub fn missing(&self) -> u64 {
        self.count(|f| matches!(f, ValidationFinding::MissingOutput { .. }))
    }

    pub fn size_mismatches(&self) -> u64 {
        self.count(|f| matches!(f, ValidationFinding::SizeOutOfBounds { .. }))
    }

    pub fn invalid_dates(&self) -> u64 {
        self.count(|f| matches!(f, ValidationFinding::ModifiedDateMismatch { .. }))
    }

    pub fn orphans(&self) -> u64 {
        self.count(|f| matches!(f, ValidationFinding::OrphanDescriptor { .. }))
    }

    fn rows(&self) -> Vec<(String, u64)> {
        vec![
            ("Total media files".into(), self.media_files),
            ("Unresolved media files".into(), self.unresolved),
            ("  of which in skip report".into(), self.expected_skips),
            ("Test 1: Output files not present".into(), self.missing()),
            ("Test 2: Output file size mismatch".into(), self.size_mismatches()),
            ("Test 3: Output file modified date invalid".into(), self.invalid_dates()),
            ("Test 4: Orphan JSON files".into(), self.orphans()),
        ]
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("YEAR {} SUMMARY:", self.year)];
        lines.extend(report::aligned(&self.rows()));
        lines
    }
}

/// Result of a whole validation run.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub years: Vec<YearValidation>,
    pub failed_folders: Vec<(PathBuf, String)>,
}

impl ValidationReport {
    pub fn finding_count(&self) -> usize {
        self.years.iter().map(|y| y.findings.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.finding_count() == 0 && self.failed_folders.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        let sum = |f: fn(&YearValidation) -> u64| self.years.iter().map(f).sum::<u64>();
        let rows = vec![
            ("Year folders".to_string(), self.years.len() as u64),
            ("Total media files".to_string(), sum(|y| y.media_files)),
            ("Found in output".to_string(), sum(|y| y.found)),
            ("Unresolved media files".to_string(), sum(|y| y.unresolved)),
            ("Test 1: Output files not present".to_string(), sum(YearValidation::missing)),
            ("Test 2: Output file size mismatch".to_string(), sum(YearValidation::size_mismatches)),
            ("Test 3: Output file modified date invalid".to_string(), sum(YearValidation::invalid_dates)),
            ("Test 4: Orphan JSON files".to_string(), sum(YearValidation::orphans)),
        ];
        let mut lines = vec!["VALIDATION SUMMARY:".to_string()];
        lines.extend(report::aligned(&rows));
        for (folder, error) in &self.failed_folders {
            lines.push(format!("Not validated: {} ({})", folder.display(), error));
        }
        lines
    }
}

/// Replays the matching of a processing run against its output tree.
/// Must use the same chain, config, and zone as that run.
pub struct Validator<'a> {
    chain: &'a RuleChain,
    config: MatchConfig,
    zone: Tz,
    output_root: PathBuf,
    namer: OutputNamer,
}

impl<'a> Validator<'a> {
    pub fn new(chain: &'a RuleChain, config: MatchConfig, zone: Tz, output_root: impl Into<PathBuf>) -> Self {
        Self {
            chain,
            config,
            zone,
            output_root: output_root.into(),
            namer: OutputNamer::new(),
        }
    }

    /// Validate one year folder. `skipped` holds the file names of that
    /// year's skip report, if there is one.
    pub fn validate_folder(
        &mut self,
        folder: &YearFolder,
        skipped: Option<&HashSet<String>>,
    ) -> anyhow::Result<YearValidation> {
        let scan = media::scan_folder(&folder.path)?;
        let store = DescriptorStore::from_paths(&scan.sidecars);
        let matched = matcher::match_folder(self.chain, &scan.media, &store, self.config, ConsumptionSet::new());

        let mut result = YearValidation {
            year: folder.year.clone(),
            media_files: scan.media.len() as u64,
            ..Default::default()
        };

        for (media, outcome) in scan.media.iter().zip(&matched.outcomes) {
            let resolved = match outcome {
                MatchOutcome::Matched { descriptor, .. } => timestamp::resolve(store.get(*descriptor), self.zone).ok(),
                _ => None,
            };
            let Some(resolved) = resolved else {
                result.unresolved += 1;
                if skipped.is_some_and(|names| names.contains(media.filename())) {
                    result.expected_skips += 1;
                }
                continue;
            };

            let expected = self
                .namer
                .assign(&self.output_root.join(resolved.bucket()), media.filename());
            let Ok(meta) = fs::metadata(&expected) else {
                tracing::warn!("Missing in output: {} (expected at: {})", media.filename(), expected.display());
                result.findings.push(ValidationFinding::MissingOutput {
                    input: media.path.clone(),
                    expected,
                });
                continue;
            };
            result.found += 1;

            if !size_within_bounds(media.size, meta.len()) {
                let finding = ValidationFinding::SizeOutOfBounds {
                    input: media.path.clone(),
                    output: expected,
                    input_size: media.size,
                    output_size: meta.len(),
                };
                tracing::warn!("Size mismatch: {} - {}", media.filename(), finding.reason());
                result.findings.push(finding);
            }
        }

        result.findings.extend(self.check_modified_dates(&folder.year));

        for (id, descriptor) in store.iter() {
            if !matched.consumed.is_consumed(id) {
                result.findings.push(ValidationFinding::OrphanDescriptor {
                    sidecar: descriptor.path.clone(),
                    url: descriptor.url.clone(),
                });
            }
        }
        for failure in store.failures() {
            result.findings.push(ValidationFinding::OrphanDescriptor {
                sidecar: failure.path().to_path_buf(),
                url: None,
            });
        }

        Ok(result)
    }

    /// Every file in `<output>/<year>/<MM>/` must have a modified date in
    /// that month, as seen in the configured zone.
    fn check_modified_dates(&self, year: &str) -> Vec<ValidationFinding> {
        let mut findings = Vec::new();
        let Ok(year_num) = year.parse::<i32>() else {
            return findings;
        };
        let Ok(months) = fs::read_dir(self.output_root.join(year)) else {
            return findings;
        };

        let mut month_dirs: Vec<(u32, PathBuf)> = months
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?;
                let month = (name.len() == 2 && name.bytes().all(|b| b.is_ascii_digit()))
                    .then(|| name.parse::<u32>().ok())??;
                Some((month, p))
            })
            .collect();
        month_dirs.sort();

        for (month, dir) in month_dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut files: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file() && !is_sidecar_path(p))
                .collect();
            files.sort();
            for file in files {
                let Ok(mtime) = fs::metadata(&file).and_then(|m| m.modified()) else {
                    continue;
                };
                let modified = timestamp::civil_year_month(mtime, self.zone);
                if modified != (year_num, month) {
                    findings.push(ValidationFinding::ModifiedDateMismatch {
                        output: file,
                        bucket: (year_num, month),
                        modified,
                    });
                }
            }
        }
        findings
    }
}

/// Write the per-year validation reports.
pub fn write_year_reports(report_dir: &Path, result: &YearValidation) -> anyhow::Result<()> {
    let year = result.year.as_str();
    let mut not_present = Vec::new();
    let mut size = Vec::new();
    let mut invalid_date = Vec::new();
    let mut orphans = Vec::new();
    let mut urls = Vec::new();

    for finding in &result.findings {
        match finding {
            ValidationFinding::MissingOutput { input, expected } => {
                not_present.push(format!("{}\t{}", input.display(), expected.display()))
            }
            ValidationFinding::SizeOutOfBounds { input, output, .. } => {
                size.push(format!("Input:  {}", input.display()));
                size.push(format!("Output: {}", output.display()));
                size.push(format!("Reason: {}", finding.reason()));
                size.push(String::new());
            }
            ValidationFinding::ModifiedDateMismatch { output, .. } => {
                invalid_date.push(format!("{}\t{}", output.display(), finding.reason()))
            }
            ValidationFinding::OrphanDescriptor { sidecar, url } => {
                orphans.push(sidecar.display().to_string());
                if let Some(url) = url {
                    urls.push(url.clone());
                }
            }
        }
    }

    report::write_titled(
        &ReportKind::NotPresent.path(report_dir, year),
        &format!("Missing output files for year {year}"),
        &not_present,
    )?;
    report::write_titled(
        &ReportKind::SizeMismatch.path(report_dir, year),
        &format!("Mismatched files for year {year}"),
        &size,
    )?;
    report::write_titled(
        &ReportKind::InvalidDate.path(report_dir, year),
        &format!("Files in processed/{year}/MM with invalid modified date"),
        &invalid_date,
    )?;
    report::write_titled(
        &ReportKind::OrphanJson.path(report_dir, year),
        &format!("Orphan JSON files for year {year}"),
        &orphans,
    )?;
    report::write_lines(&ReportKind::OrphanJsonUrl.path(report_dir, year), &urls)?;
    report::write_lines(&ReportKind::ValidationSummary.path(report_dir, year), &result.lines())
}

/// Copy the orphan sidecars of `folder` into
/// `<report_dir>/orphan_json/<folder name>/`, replacing an earlier export.
/// Returns how many were copied; a file that cannot be copied is logged and
/// left out.
pub fn export_orphans(report_dir: &Path, folder: &YearFolder, result: &YearValidation) -> anyhow::Result<usize> {
    let folder_name = folder
        .path
        .file_name()
        .map_or_else(|| format!("Photos from {}", folder.year), |n| n.to_string_lossy().into_owned());
    let dir = report_dir.join(ORPHAN_EXPORT_DIR).join(folder_name);
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("cannot clear {}", dir.display()))?;
    }

    let orphans: Vec<&Path> = result
        .findings
        .iter()
        .filter_map(|f| match f {
            ValidationFinding::OrphanDescriptor { sidecar, .. } => Some(sidecar.as_path()),
            _ => None,
        })
        .collect();
    if orphans.is_empty() {
        return Ok(0);
    }
    fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;

    // Sidecars from different subfolders may share a name.
    let mut namer = OutputNamer::new();
    let mut copied = 0;
    for sidecar in orphans {
        let Some(name) = sidecar.file_name() else {
            continue;
        };
        let dest = namer.assign(&dir, &name.to_string_lossy());
        match fs::copy(sidecar, &dest) {
            Ok(_) => {
                tracing::debug!("Copied orphan JSON {} to {}", sidecar.display(), dest.display());
                copied += 1;
            }
            Err(e) => tracing::warn!("Failed to copy orphan JSON {}: {}", sidecar.display(), e),
        }
    }
    tracing::info!("Copied {} orphan JSON files to {}", copied, dir.display());
    Ok(copied)
}

/// Validate every year folder, writing reports into `report_dir`. Skip
/// reports of the processing run are looked up in the same directory.
pub fn run(
    validator: &mut Validator,
    folders: &[YearFolder],
    report_dir: &Path,
    progress: &ThrottledProgress,
    cancel: Option<&CancellationToken>,
) -> anyhow::Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let total = folders.len() as u64;

    for (i, folder) in folders.iter().enumerate() {
        if let Some(token) = cancel {
            token.check()?;
        }
        progress.report("validate", i as u64, total, &format!("Validating {}", folder.path.display()));

        let skip_list = ReportKind::Skipped.path(report_dir, &folder.year);
        let skipped = if skip_list.exists() {
            match report::skip_list_names(&skip_list) {
                Ok(names) => Some(names),
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    None
                }
            }
        } else {
            None
        };

        match validator.validate_folder(folder, skipped.as_ref()) {
            Ok(result) => {
                if let Err(e) = write_year_reports(report_dir, &result) {
                    tracing::error!("{:#}", e);
                }
                if let Err(e) = export_orphans(report_dir, folder, &result) {
                    tracing::error!("{:#}", e);
                }
                for line in result.lines() {
                    tracing::info!("{}", line);
                }
                report.years.push(result);
            }
            Err(e) => {
                tracing::error!("Cannot validate {}: {:#}", folder.path.display(), e);
                report.failed_folders.push((folder.path.clone(), format!("{e:#}")));
            }
        }
    }
    progress.report("validate", total, total, "Validation complete");

    report::write_lines(&report_dir.join(OVERALL_VALIDATION_SUMMARY), &report.lines())?;
    for line in report.lines() {
        tracing::info!("{}", line);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::RunContext;
    use crate::ProgressCallback;
    use filetime::FileTime;

    #[test]
    fn size_bounds() {
        assert!(size_within_bounds(1_000_000, 1_000_000));
        assert!(size_within_bounds(1_000_000, 999_970));
        assert!(size_within_bounds(1_000_000, 999_968));
        assert!(!size_within_bounds(1_000_000, 999_967));
        assert!(!size_within_bounds(1_000_000, 999_960));
        assert!(size_within_bounds(1_000_000, 1_010_240));
        assert!(!size_within_bounds(1_000_000, 1_010_241));
        assert!(size_within_bounds(10, 0));
        assert!(!size_within_bounds(100, 0));
    }

    struct Fixture {
        _root: tempfile::TempDir,
        folder: YearFolder,
        out: PathBuf,
        reports: PathBuf,
    }

    fn silent() -> Box<ProgressCallback> {
        Box::new(|_: &str, _: u64, _: u64, _: &str| {})
    }

    /// Two matched photos, one unmatched photo, one orphan sidecar; then a
    /// processing run over them.
    fn processed() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let folder = YearFolder {
            path: root.path().join("Photos from 2019"),
            year: "2019".into(),
        };
        fs::create_dir_all(&folder.path).unwrap();
        let put = |name: &str, contents: &[u8]| fs::write(folder.path.join(name), contents).unwrap();
        put("a.jpg", &[7u8; 1000]);
        put("a.jpg.json", br#"{"title":"a.jpg","photoTakenTime":{"timestamp":"1552348800"}}"#);
        put("b.jpg", &[8u8; 1000]);
        put("b.jpg.json", br#"{"title":"b.jpg","photoTakenTime":{"timestamp":"1554094800"}}"#);
        put("nomatch.jpg", b"?");
        put(
            "gone.jpg.json",
            br#"{"title":"gone.jpg","photoTakenTime":{"timestamp":"1552348800"},"url":"https://photos.google.com/photo/AF1Qip"}"#,
        );

        let out = root.path().join("processed");
        let reports = root.path().join("reports");
        let chain = RuleChain::standard();
        let mut ctx = RunContext::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &out);
        let cb = silent();
        crate::reconcile::run(&mut ctx, &[folder.clone()], None, &reports, &ThrottledProgress::new(&*cb)).unwrap();

        Fixture { _root: root, folder, out, reports }
    }

    fn validate(fx: &Fixture) -> ValidationReport {
        let chain = RuleChain::standard();
        let mut validator = Validator::new(&chain, MatchConfig::default(), Tz::America__Los_Angeles, &fx.out);
        let cb = silent();
        run(&mut validator, &[fx.folder.clone()], &fx.reports, &ThrottledProgress::new(&*cb), None).unwrap()
    }

    #[test]
    fn clean_run_only_reports_the_orphan() {
        let fx = processed();
        let report = validate(&fx);
        let year = &report.years[0];

        assert_eq!(year.media_files, 3);
        assert_eq!(year.found, 2);
        assert_eq!(year.unresolved, 1);
        assert_eq!(year.expected_skips, 1);
        assert_eq!(
            year.findings,
            vec![ValidationFinding::OrphanDescriptor {
                sidecar: fx.folder.path.join("gone.jpg.json"),
                url: Some("https://photos.google.com/photo/AF1Qip".into()),
            }]
        );
        assert!(!report.is_clean());

        let urls = fs::read_to_string(ReportKind::OrphanJsonUrl.path(&fx.reports, "2019")).unwrap();
        assert_eq!(urls, "https://photos.google.com/photo/AF1Qip\n");
        assert!(!ReportKind::NotPresent.path(&fx.reports, "2019").exists());
        assert!(fx.reports.join(OVERALL_VALIDATION_SUMMARY).exists());
    }

    #[test]
    fn detects_missing_resized_and_misdated_outputs() {
        let fx = processed();
        let a = fx.out.join("2019/03/a.jpg");
        let b = fx.out.join("2019/03/b.jpg");
        // b.jpg was taken on the evening of March 31st, Pacific time.
        assert!(b.exists());

        fs::write(&a, [7u8; 900]).unwrap();
        filetime::set_file_mtime(&a, FileTime::from_unix_time(1552348800, 0)).unwrap();
        // Move b's modified date into April (UTC and Pacific alike).
        filetime::set_file_mtime(&b, FileTime::from_unix_time(1554220800, 0)).unwrap();

        let report = validate(&fx);
        let year = &report.years[0];
        assert_eq!(year.size_mismatches(), 1);
        assert_eq!(year.invalid_dates(), 1);
        assert!(matches!(
            &year.findings[1],
            ValidationFinding::ModifiedDateMismatch { output, bucket: (2019, 3), modified: (2019, 4) } if output == &b
        ));

        fs::remove_file(&a).unwrap();
        let report = validate(&fx);
        assert_eq!(report.years[0].missing(), 1);
        assert_eq!(report.years[0].size_mismatches(), 0);

        let sizes = fs::read_to_string(ReportKind::SizeMismatch.path(&fx.reports, "2019"));
        // Fixed since the second run: the stale report is gone.
        assert!(sizes.is_err());
        let missing = fs::read_to_string(ReportKind::NotPresent.path(&fx.reports, "2019")).unwrap();
        assert!(missing.contains("a.jpg"));
    }

    #[test]
    fn orphans_are_reported_exactly_once() {
        let fx = processed();
        let report = validate(&fx);
        let orphans: Vec<_> = report.years[0]
            .findings
            .iter()
            .filter(|f| matches!(f, ValidationFinding::OrphanDescriptor { .. }))
            .collect();
        assert_eq!(orphans.len(), 1);
        let listed = fs::read_to_string(ReportKind::OrphanJson.path(&fx.reports, "2019")).unwrap();
        assert_eq!(listed.matches("gone.jpg.json").count(), 1);
    }

    #[test]
    fn orphan_sidecars_are_copied_for_recovery() {
        let fx = processed();
        let export = fx.reports.join(ORPHAN_EXPORT_DIR).join("Photos from 2019");
        fs::create_dir_all(&export).unwrap();
        fs::write(export.join("stale.json"), b"{}").unwrap();

        validate(&fx);
        let original = fx.folder.path.join("gone.jpg.json");
        assert_eq!(fs::read(export.join("gone.jpg.json")).unwrap(), fs::read(&original).unwrap());
        assert!(!export.join("stale.json").exists());
        assert!(!export.join("a.jpg.json").exists());
        assert!(original.exists());

        // Claimed after all: the export goes away with the orphan.
        fs::write(fx.folder.path.join("gone.jpg"), b"late").unwrap();
        let report = validate(&fx);
        assert_eq!(report.years[0].orphans(), 0);
        assert!(!export.exists());
    }

    #[test]
    fn ignores_non_month_folders_and_sidecars() {
        let fx = processed();
        fs::create_dir_all(fx.out.join("2019/misc")).unwrap();
        fs::write(fx.out.join("2019/misc/x.jpg"), b"x").unwrap();
        fs::write(fx.out.join("2019/03/stray.json"), b"{}").unwrap();
        let report = validate(&fx);
        assert_eq!(report.years[0].invalid_dates(), 0);
    }
}
