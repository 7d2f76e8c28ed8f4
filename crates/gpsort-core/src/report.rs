//! Plain-text report artifacts, one per year and category.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// `<path>\t<reason>` per skipped media file; read back by retry runs
    Skipped,
    CopiedOnly,
    Summary,
    NotPresent,
    SizeMismatch,
    InvalidDate,
    OrphanJson,
    /// Source URLs of orphan sidecars, nothing else
    OrphanJsonUrl,
    ValidationSummary,
}

impl ReportKind {
    fn suffix(self) -> &'static str {
        match self {
            ReportKind::Skipped => "skipped_files",
            ReportKind::CopiedOnly => "copied_only",
            ReportKind::Summary => "summary",
            ReportKind::NotPresent => "validation_not_present",
            ReportKind::SizeMismatch => "validation_size_mismatch",
            ReportKind::InvalidDate => "validation_invalid_date",
            ReportKind::OrphanJson => "validation_orphan_json",
            ReportKind::OrphanJsonUrl => "validation_orphan_json_url",
            ReportKind::ValidationSummary => "validation_summary",
        }
    }

    pub fn file_name(self, year: &str) -> String {
        format!("{}_{}.txt", year, self.suffix())
    }

    pub fn path(self, dir: &Path, year: &str) -> PathBuf {
        dir.join(self.file_name(year))
    }
}

/// Run-wide validation summary, next to the per-year ones.
pub const OVERALL_VALIDATION_SUMMARY: &str = "validation_summary.txt";

/// Write `lines` to `path`. An empty list removes a stale report from an
/// earlier run instead, so retry runs never pick up outdated skips.
pub fn write_lines(path: &Path, lines: &[String]) -> anyhow::Result<()> {
    if lines.is_empty() {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("cannot remove stale {}", path.display()))?;
        }
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))?;
    tracing::info!("Report written to {}", path.display());
    Ok(())
}

/// Like [`write_lines`] with a title line and underline on top.
pub fn write_titled(path: &Path, title: &str, lines: &[String]) -> anyhow::Result<()> {
    if lines.is_empty() {
        return write_lines(path, lines);
    }
    let mut all = Vec::with_capacity(lines.len() + 2);
    all.push(title.to_string());
    all.push("=".repeat(50));
    all.extend(lines.iter().cloned());
    write_lines(path, &all)
}

pub fn skip_line(path: &Path, reason: &str) -> String {
    format!("{}\t{}", path.display(), reason)
}

/// Paths listed in a skip report. Accepts `path\treason` lines as well as
/// bare paths; blank lines are ignored.
pub fn read_skip_list(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text
        .lines()
        .map(|line| line.split('\t').next().unwrap_or("").trim())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// File names listed in a skip report, the key retry runs select on.
pub fn skip_list_names(path: &Path) -> anyhow::Result<HashSet<String>> {
    Ok(read_skip_list(path)?
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect())
}

/// `label: value` lines with the values right-aligned in one column.
pub fn aligned(rows: &[(String, u64)]) -> Vec<String> {
    let width = rows.iter().map(|(label, _)| label.chars().count()).max().unwrap_or(0) + 1;
    rows.iter()
        .map(|(label, value)| {
            let label = format!("{label}:");
            format!("  {label:<width$} {value:>6}", width = width)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_per_year() {
        assert_eq!(ReportKind::Skipped.file_name("2019"), "2019_skipped_files.txt");
        assert_eq!(ReportKind::CopiedOnly.file_name("2019"), "2019_copied_only.txt");
        assert_eq!(ReportKind::OrphanJsonUrl.file_name("2020"), "2020_validation_orphan_json_url.txt");
        assert_eq!(
            ReportKind::SizeMismatch.path(Path::new("r"), "2021"),
            Path::new("r").join("2021_validation_size_mismatch.txt")
        );
    }

    #[test]
    fn skip_list_round_trip_accepts_plain_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = ReportKind::Skipped.path(dir.path(), "2019");
        write_lines(
            &path,
            &[
                skip_line(Path::new("Photos from 2019/a.jpg"), "no sidecar matched (tried 8 rules)"),
                skip_line(Path::new("Photos from 2019/sub/b.mp4"), "no timestamp in b.mp4.json"),
            ],
        )
        .unwrap();
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("Photos from 2019/c.png\n\n");
        fs::write(&path, text).unwrap();

        let paths = read_skip_list(&path).unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[1], Path::new("Photos from 2019/sub/b.mp4"));

        let names = skip_list_names(&path).unwrap();
        assert!(names.contains("a.jpg") && names.contains("b.mp4") && names.contains("c.png"));
    }

    #[test]
    fn empty_report_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = ReportKind::Skipped.path(dir.path(), "2019");
        write_lines(&path, &["x\ty".to_string()]).unwrap();
        assert!(path.exists());
        write_lines(&path, &[]).unwrap();
        assert!(!path.exists());
        write_lines(&path, &[]).unwrap();
    }

    #[test]
    fn titled_report_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        write_titled(&path, "Orphan JSON files for year 2019", &["a.json".to_string()]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Orphan JSON files for year 2019");
        assert_eq!(lines[2], "a.json");
    }

    #[test]
    fn aligned_rows() {
        let lines = aligned(&[("Skipped".into(), 3), ("Copied only".into(), 12)]);
        assert_eq!(lines[0], "  Skipped:          3");
        assert_eq!(lines[1], "  Copied only:     12");
    }
}
