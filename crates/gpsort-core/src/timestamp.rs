use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;

use crate::error::SkipReason;
use crate::sidecar::SidecarDescriptor;

/// Zone used when none is configured.
pub const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";

/// Format the embedder expects for date tags.
pub const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Which sidecar field a timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    PhotoTaken,
    Creation,
}

/// The capture instant of a media file, in UTC and as civil time in the
/// configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    pub instant: DateTime<Utc>,
    pub local: DateTime<Tz>,
    pub source: TimeSource,
}

impl ResolvedTimestamp {
    pub fn year(&self) -> i32 {
        self.local.year()
    }

    pub fn month(&self) -> u32 {
        self.local.month()
    }

    /// `YYYY/MM`, relative to the output root.
    pub fn bucket(&self) -> PathBuf {
        PathBuf::from(format!("{:04}", self.year())).join(format!("{:02}", self.month()))
    }

    pub fn exif_datetime(&self) -> String {
        self.local.format(EXIF_DATE_FORMAT).to_string()
    }

    pub fn epoch_seconds(&self) -> i64 {
        self.instant.timestamp()
    }
}

/// Pick `photoTakenTime`, else `creationTime`, and convert it to `zone`.
/// The zone's rules at that instant apply, not its current offset.
pub fn resolve(descriptor: &SidecarDescriptor, zone: Tz) -> Result<ResolvedTimestamp, SkipReason> {
    let missing = || SkipReason::MissingDate {
        sidecar: descriptor.file_name().to_string(),
    };
    let (field, source) = match (descriptor.photo_taken, descriptor.creation) {
        (Some(t), _) => (t, TimeSource::PhotoTaken),
        (None, Some(t)) => (t, TimeSource::Creation),
        (None, None) => return Err(missing()),
    };
    let instant = DateTime::from_timestamp(field.timestamp, 0).ok_or_else(missing)?;
    Ok(ResolvedTimestamp {
        instant,
        local: instant.with_timezone(&zone),
        source,
    })
}

/// Parse an IANA zone name such as `Europe/Berlin`.
pub fn parse_zone(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("unknown time zone {name:?}: {e}"))
}

/// (year, month) of a filesystem time as seen in `zone`.
pub fn civil_year_month(time: SystemTime, zone: Tz) -> (i32, u32) {
    let local = DateTime::<Utc>::from(time).with_timezone(&zone);
    (local.year(), local.month())
}
