use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use anyhow::Context;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static COUNTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+)\((\d+)\)$").unwrap());

/// Extensions mime_guess does not know as video but cameras use for clips.
const EXTRA_VIDEO_EXTS: &[&str] = &["mts", "m2ts", "mp", "mv"];

/// Still formats (mostly camera raw) missing from mime_guess.
const EXTRA_IMAGE_EXTS: &[&str] = &["heic", "heif", "dng", "cr2", "cr3", "nef", "arw", "orf", "rw2", "raf"];

/// Case- and normalization-insensitive key used for every name comparison.
pub fn fold(s: &str) -> String {
    s.nfc().collect::<String>().to_lowercase()
}

/// Split a trailing duplicate counter: `IMG(2)` -> (`IMG`, Some(2)).
pub fn split_counter(s: &str) -> (&str, Option<u32>) {
    match COUNTER_RE.captures(s) {
        Some(caps) => {
            let head = caps.get(1).map_or(s, |m| m.as_str());
            match caps[2].parse() {
                Ok(n) => (head, Some(n)),
                Err(_) => (s, None),
            }
        }
        None => (s, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Self {
        if ext.is_empty() {
            return MediaKind::Other;
        }
        if EXTRA_VIDEO_EXTS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            return MediaKind::Video;
        }
        if EXTRA_IMAGE_EXTS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            return MediaKind::Image;
        }
        match mime_guess::from_ext(ext).first() {
            Some(m) if m.type_() == mime_guess::mime::IMAGE => MediaKind::Image,
            Some(m) if m.type_() == mime_guess::mime::VIDEO => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

/// A media file name taken apart the way the matching rules need it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaName {
    /// Full file name
    pub filename: String,
    /// Name without the final extension
    pub stem: String,
    /// Final extension without the dot, original case (empty if none)
    pub ext: String,
    /// Stem without a trailing `(n)` duplicate counter
    pub bare_stem: String,
    /// The `(n)` duplicate counter, if any
    pub counter: Option<u32>,
    pub kind: MediaKind,
}

impl MediaName {
    pub fn parse(filename: &str) -> Self {
        let (stem, ext) = match filename.rfind('.') {
            Some(pos) if pos > 0 && pos + 1 < filename.len() => (&filename[..pos], &filename[pos + 1..]),
            _ => (filename, ""),
        };
        let (bare_stem, counter) = split_counter(stem);
        Self {
            filename: filename.to_string(),
            stem: stem.to_string(),
            ext: ext.to_string(),
            bare_stem: bare_stem.to_string(),
            counter,
            kind: MediaKind::from_extension(ext),
        }
    }

    /// Same name with a different stem, keeping the extension.
    pub fn with_stem(&self, stem: &str) -> Self {
        if self.ext.is_empty() {
            Self::parse(stem)
        } else {
            Self::parse(&format!("{}.{}", stem, self.ext))
        }
    }

    /// `bare_stem.ext`, i.e. the name without its duplicate counter.
    pub fn without_counter(&self) -> String {
        if self.ext.is_empty() {
            self.bare_stem.clone()
        } else {
            format!("{}.{}", self.bare_stem, self.ext)
        }
    }
}

/// A media file discovered in a year folder. Immutable once scanned.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub name: MediaName,
    /// File size in bytes
    pub size: u64,
    /// Modified time of the input file
    pub modified: Option<SystemTime>,
}

impl MediaFile {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name: MediaName::parse(&filename),
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    pub fn filename(&self) -> &str {
        &self.name.filename
    }
}

/// Everything found under one year folder.
#[derive(Debug, Default)]
pub struct FolderScan {
    /// Media files, sorted by file name
    pub media: Vec<MediaFile>,
    /// Sidecar paths, sorted
    pub sidecars: Vec<PathBuf>,
}

pub fn is_sidecar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Recursively scan a year folder, splitting sidecars from media.
pub fn scan_folder(folder: &Path) -> anyhow::Result<FolderScan> {
    let mut files = Vec::new();
    collect_files_recursive(folder, &mut files)
        .with_context(|| format!("cannot scan {}", folder.display()))?;

    let mut scan = FolderScan::default();
    for path in files {
        if is_sidecar_path(&path) {
            scan.sidecars.push(path);
            continue;
        }
        match MediaFile::from_path(&path) {
            Ok(m) => scan.media.push(m),
            Err(e) => tracing::warn!("cannot stat {}: {}", path.display(), e),
        }
    }
    scan.sidecars.sort();
    scan.media
        .sort_by(|a, b| a.name.filename.cmp(&b.name.filename).then_with(|| a.path.cmp(&b.path)));
    Ok(scan)
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}
