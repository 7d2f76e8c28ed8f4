use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use filetime::FileTime;

use crate::embed::{self, MetadataEmbedder};
use crate::error::EmbedError;
use crate::media::MediaFile;
use crate::sidecar::SidecarDescriptor;
use crate::timestamp::ResolvedTimestamp;

/// Hands out output paths inside buckets so two files of one run never
/// land on the same name.
///
/// A plain namer overwrites files left over from earlier runs: a full rerun
/// hands every file the name it got before. [`OutputNamer::keeping_existing`]
/// also treats whatever is already on disk as taken, for runs that add files
/// to an earlier run's output.
#[derive(Debug, Default)]
pub struct OutputNamer {
    used: HashSet<PathBuf>,
    /// Last counter handed out per base path, so repeated collisions do not
    /// rescan from 1
    counters: HashMap<PathBuf, u32>,
    keep_existing: bool,
}

impl OutputNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keeping_existing() -> Self {
        Self {
            keep_existing: true,
            ..Self::default()
        }
    }

    /// Path for `filename` in `dir`: the name itself if free, else
    /// `stem(n).ext` with the first free `n`.
    pub fn assign(&mut self, dir: &Path, filename: &str) -> PathBuf {
        let base = dir.join(filename);
        if self.take(&base) {
            return base;
        }

        let (stem, ext) = match filename.rfind('.') {
            Some(pos) if pos > 0 => (&filename[..pos], &filename[pos + 1..]),
            _ => (filename, ""),
        };
        let mut counter = self.counters.get(&base).copied().unwrap_or(0);
        loop {
            counter += 1;
            let name = if ext.is_empty() {
                format!("{stem}({counter})")
            } else {
                format!("{stem}({counter}).{ext}")
            };
            let candidate = dir.join(name);
            if self.take(&candidate) {
                self.counters.insert(base, counter);
                return candidate;
            }
        }
    }

    fn take(&mut self, path: &Path) -> bool {
        if self.used.contains(path) || (self.keep_existing && path.exists()) {
            return false;
        }
        self.used.insert(path.to_path_buf());
        true
    }
}

/// What happened to the metadata of a written file.
#[derive(Debug)]
pub enum EmbedStatus {
    Embedded,
    /// Not attempted (format not writable or embedding disabled)
    NotAttempted(EmbedError),
    Failed(EmbedError),
}

impl EmbedStatus {
    pub fn attempted(&self) -> bool {
        !matches!(self, EmbedStatus::NotAttempted(_))
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, EmbedStatus::Embedded)
    }
}

#[derive(Debug)]
pub struct WriteOutcome {
    pub output: PathBuf,
    pub embed: EmbedStatus,
}

/// Copy `media` into its bucket under `output_root`, set the copy's
/// modified time to the capture instant, and embed metadata when the
/// format allows it. The input file is never touched.
///
/// Only the copy itself can fail; embedding problems are reported through
/// [`EmbedStatus`].
pub fn write_media(
    media: &MediaFile,
    descriptor: &SidecarDescriptor,
    resolved: &ResolvedTimestamp,
    output_root: &Path,
    namer: &mut OutputNamer,
    embedder: Option<&dyn MetadataEmbedder>,
) -> anyhow::Result<WriteOutcome> {
    let dir = output_root.join(resolved.bucket());
    fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;

    let dest = namer.assign(&dir, media.filename());
    let existed = dest.exists();
    if let Err(e) = fs::copy(&media.path, &dest) {
        if !existed {
            let _ = fs::remove_file(&dest);
        }
        return Err(e).with_context(|| format!("cannot copy {} to {}", media.path.display(), dest.display()));
    }
    set_capture_time(&dest, resolved);

    let embed = match embedder {
        None => EmbedStatus::NotAttempted(EmbedError::Disabled),
        Some(_) if !embed::is_writable(&media.name.ext) => {
            EmbedStatus::NotAttempted(EmbedError::Unsupported(media.name.ext.to_ascii_lowercase()))
        }
        Some(embedder) => match embedder.embed(&dest, &embed::build_tags(descriptor, resolved)) {
            Ok(()) => EmbedStatus::Embedded,
            Err(e) => EmbedStatus::Failed(e),
        },
    };
    if embed.attempted() {
        // The tool rewrites the file, which bumps its modified time.
        set_capture_time(&dest, resolved);
    }

    Ok(WriteOutcome { output: dest, embed })
}

fn set_capture_time(path: &Path, resolved: &ResolvedTimestamp) {
    let ft = FileTime::from_unix_time(resolved.epoch_seconds(), 0);
    if let Err(e) = filetime::set_file_times(path, ft, ft) {
        tracing::warn!("Failed to update modified date for {}: {}", path.display(), e);
    }
}
