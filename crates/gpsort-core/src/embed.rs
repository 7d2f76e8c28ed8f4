//! Metadata embedding collaborator.
//!
//! The core only builds tag/value pairs and hands them to a
//! [`MetadataEmbedder`]. The bundled implementation drives `exiftool`; tests
//! substitute their own.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::EmbedError;
use crate::sidecar::SidecarDescriptor;
use crate::timestamp::ResolvedTimestamp;

/// Extensions (lower-case, no dot) exiftool can write metadata into.
pub const WRITABLE_FORMATS: &[&str] = &[
    "360", "3g2", "3gp", "aax", "ai", "arq", "arw", "avif", "cr2", "cr3", "crm", "crw", "cs1", "dcp", "dng", "dr4",
    "dvb", "eps", "erf", "exif", "exv", "f4a", "f4v", "fff", "flif", "gif", "glv", "gpr", "hdp", "heic", "heif", "icc",
    "iiq", "ind", "insp", "jng", "jp2", "jpeg", "jpg", "jxl", "lrv", "m4a", "m4v", "mef", "mie", "mng", "mos", "mov",
    "mp4", "mpo", "mqv", "mrw", "nef", "nksc", "nrw", "orf", "ori", "pbm", "pdf", "pef", "pgm", "png", "ppm", "ps",
    "psb", "psd", "qtif", "raf", "raw", "rw2", "rwl", "sr2", "srw", "thm", "tif", "tiff", "vrd", "wdp", "webp", "x3f",
    "xmp",
];

pub fn is_writable(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    WRITABLE_FORMATS.contains(&ext.as_str())
}

/// Writes tags into a file in place. A failure must leave the file as it
/// was; callers fall back to copy-only.
pub trait MetadataEmbedder {
    fn embed(&self, path: &Path, tags: &[(String, String)]) -> Result<(), EmbedError>;
}

/// Tags for one output file: capture dates in civil time, GPS, people and
/// description when the sidecar has them.
pub fn build_tags(descriptor: &SidecarDescriptor, resolved: &ResolvedTimestamp) -> Vec<(String, String)> {
    let date = resolved.exif_datetime();
    let mut tags: Vec<(String, String)> = [
        "DateTimeOriginal",
        "CreateDate",
        "ModifyDate",
        "FileModifyDate",
        "FileCreateDate",
    ]
    .iter()
    .map(|tag| (tag.to_string(), date.clone()))
    .collect();

    // EXIF stores GPS magnitudes unsigned; the hemisphere lives in the Ref tags.
    if let Some(geo) = &descriptor.geo {
        let lat_ref = if geo.latitude < 0.0 { "S" } else { "N" };
        let lon_ref = if geo.longitude < 0.0 { "W" } else { "E" };
        tags.push(("GPSLatitude".into(), geo.latitude.abs().to_string()));
        tags.push(("GPSLatitudeRef".into(), lat_ref.into()));
        tags.push(("GPSLongitude".into(), geo.longitude.abs().to_string()));
        tags.push(("GPSLongitudeRef".into(), lon_ref.into()));
        if geo.altitude != 0.0 {
            let alt_ref = if geo.altitude < 0.0 { "1" } else { "0" };
            tags.push(("GPSAltitude".into(), geo.altitude.abs().to_string()));
            tags.push(("GPSAltitudeRef".into(), alt_ref.into()));
        }
    }

    if !descriptor.people.is_empty() {
        let names = descriptor.people.join("; ");
        tags.push(("Keywords".into(), names.clone()));
        tags.push(("Subject".into(), names));
    }

    if let Some(description) = &descriptor.description {
        tags.push(("ImageDescription".into(), description.clone()));
    }
    tags
}

/// Runs `exiftool -overwrite_original -q -m -Tag=value ... <file>`.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Version string of the installed tool; fails if it cannot be run.
    pub fn version(&self) -> Result<String, EmbedError> {
        let output = Command::new(&self.program)
            .arg("-ver")
            .output()
            .map_err(|e| EmbedError::Launch(format!("{}: {e}", self.program.display())))?;
        if !output.status.success() {
            return Err(EmbedError::Tool(output.status.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn command(&self, path: &Path, tags: &[(String, String)]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-overwrite_original", "-q", "-m"]);
        cmd.args(tags.iter().map(|(tag, value)| format!("-{tag}={value}")));
        cmd.arg(path);
        cmd
    }
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl MetadataEmbedder for ExifTool {
    fn embed(&self, path: &Path, tags: &[(String, String)]) -> Result<(), EmbedError> {
        let output = self
            .command(path, tags)
            .output()
            .map_err(|e| EmbedError::Launch(format!("{}: {e}", self.program.display())))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        Err(EmbedError::Tool(if message.is_empty() {
            output.status.to_string()
        } else {
            message.lines().collect::<Vec<_>>().join(" | ")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn resolved(json: &str) -> (SidecarDescriptor, ResolvedTimestamp) {
        let d = SidecarDescriptor::from_bytes(Path::new("IMG_1.jpg.json"), json.as_bytes()).unwrap();
        let ts = crate::timestamp::resolve(&d, Tz::America__Los_Angeles).unwrap();
        (d, ts)
    }

    #[test]
    fn writable_formats_are_case_insensitive() {
        assert!(is_writable("JPG"));
        assert!(is_writable("heic"));
        assert!(is_writable("mp4"));
        assert!(!is_writable("avi"));
        assert!(!is_writable("mts"));
        assert!(!is_writable(""));
    }

    #[test]
    fn dates_only_when_sidecar_is_sparse() {
        let (d, ts) = resolved(r#"{"photoTakenTime":{"timestamp":"1552348800"}}"#);
        let tags = build_tags(&d, &ts);
        assert_eq!(tags.len(), 5);
        assert!(tags.iter().all(|(_, v)| v == "2019:03:11 17:00:00"));
        assert_eq!(tags[0].0, "DateTimeOriginal");
    }

    #[test]
    fn gps_people_and_description() {
        let (d, ts) = resolved(
            r#"{"photoTakenTime":{"timestamp":"1552348800"},
                "geoData":{"latitude":37.5,"longitude":-122.25,"altitude":12.0},
                "people":[{"name":"Ann"},{"name":"Bo"}],
                "description":"Beach day"}"#,
        );
        let tags = build_tags(&d, &ts);
        let get = |k: &str| tags.iter().find(|(t, _)| t == k).map(|(_, v)| v.as_str());
        assert_eq!(get("GPSLatitude"), Some("37.5"));
        assert_eq!(get("GPSLatitudeRef"), Some("N"));
        assert_eq!(get("GPSLongitude"), Some("122.25"));
        assert_eq!(get("GPSLongitudeRef"), Some("W"));
        assert_eq!(get("GPSAltitude"), Some("12"));
        assert_eq!(get("GPSAltitudeRef"), Some("0"));
        assert_eq!(get("Keywords"), Some("Ann; Bo"));
        assert_eq!(get("Subject"), Some("Ann; Bo"));
        assert_eq!(get("ImageDescription"), Some("Beach day"));
    }

    #[test]
    fn southern_and_below_sea_level_positions_keep_their_sign() {
        let (d, ts) = resolved(
            r#"{"photoTakenTime":{"timestamp":"1552348800"},
                "geoData":{"latitude":-33.86,"longitude":151.21,"altitude":-28.0}}"#,
        );
        let tags = build_tags(&d, &ts);
        let get = |k: &str| tags.iter().find(|(t, _)| t == k).map(|(_, v)| v.as_str());
        assert_eq!(get("GPSLatitude"), Some("33.86"));
        assert_eq!(get("GPSLatitudeRef"), Some("S"));
        assert_eq!(get("GPSLongitude"), Some("151.21"));
        assert_eq!(get("GPSLongitudeRef"), Some("E"));
        assert_eq!(get("GPSAltitude"), Some("28"));
        assert_eq!(get("GPSAltitudeRef"), Some("1"));
    }

    #[test]
    fn exiftool_command_line() {
        let tool = ExifTool::default();
        let cmd = tool.command(Path::new("out/a.jpg"), &[("CreateDate".into(), "2019:03:11 17:00:00".into())]);
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-overwrite_original", "-q", "-m", "-CreateDate=2019:03:11 17:00:00", "out/a.jpg"]
        );
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let tool = ExifTool::new("gpsort-test-no-such-exiftool");
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(tool.embed(&file, &[]), Err(EmbedError::Launch(_))));
        assert!(matches!(tool.version(), Err(EmbedError::Launch(_))));
    }
}
