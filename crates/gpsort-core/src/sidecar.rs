use std::fs;
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};

use crate::error::SidecarLoadError;
use crate::media::{fold, split_counter, MediaName};

/// Suffix newer exports put between the media name and `.json`. The export
/// truncates it (`.supplemental-metad`, `.suppl`, ...) to fit its name budget.
pub const METADATA_SUFFIX: &str = "supplemental-metadata";

/// A sidecar file name taken apart: `IMG_1.jpg.supplemental-metadata(1).json`
/// has media name `IMG_1.jpg` and counter 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarName {
    pub file_name: String,
    /// Name without `.json`, as found on disk
    pub stem: String,
    /// Name of the media file this sidecar was written for
    pub media_name: String,
    /// Duplicate counter found after the extension or the metadata suffix
    pub counter: Option<u32>,
    /// Folded `media_name` without extension or counter
    pub base: String,
}

impl SidecarName {
    pub fn parse(file_name: &str) -> Self {
        let stem = strip_json(file_name);

        let (mut rest, mut counter) = split_counter(stem);
        if let Some(pos) = rest.rfind('.') {
            let segment = &rest[pos + 1..];
            let head = &rest[..pos];
            let is_suffix = !segment.is_empty()
                && segment.len() <= METADATA_SUFFIX.len()
                && METADATA_SUFFIX[..segment.len()].eq_ignore_ascii_case(segment);
            let full_suffix = segment.eq_ignore_ascii_case(METADATA_SUFFIX);
            if full_suffix || (is_suffix && head.contains('.')) {
                rest = head;
            }
        }
        if counter.is_none() {
            let (head, c) = split_counter(rest);
            rest = head;
            counter = c;
        }

        let media = MediaName::parse(rest);
        Self {
            file_name: file_name.to_string(),
            stem: stem.to_string(),
            media_name: rest.to_string(),
            counter,
            base: fold(&media.bare_stem),
        }
    }
}

fn strip_json(file_name: &str) -> &str {
    let n = file_name.len();
    if n >= 5 && file_name.is_char_boundary(n - 5) && file_name[n - 5..].eq_ignore_ascii_case(".json") {
        &file_name[..n - 5]
    } else {
        file_name
    }
}

/// One of the two capture-time fields of a sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeField {
    /// Epoch seconds, UTC
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoData {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
}

/// A parsed sidecar. Never mutated after load.
#[derive(Debug, Clone)]
pub struct SidecarDescriptor {
    pub path: PathBuf,
    pub name: SidecarName,
    pub title: Option<String>,
    pub photo_taken: Option<TimeField>,
    pub creation: Option<TimeField>,
    /// Human-readable forms of the two times, as exported
    pub photo_taken_formatted: Option<String>,
    pub creation_formatted: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub geo: Option<GeoData>,
    pub people: Vec<String>,
    pub raw: serde_json::Value,
}

impl SidecarDescriptor {
    pub fn file_name(&self) -> &str {
        &self.name.file_name
    }

    /// Parse sidecar bytes. `path` is only used for identity and errors.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, SidecarLoadError> {
        let text = decode_text(bytes).ok_or_else(|| SidecarLoadError::Encoding {
            path: path.to_path_buf(),
        })?;
        let raw: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| SidecarLoadError::Structure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !raw.is_object() {
            return Err(SidecarLoadError::Structure {
                path: path.to_path_buf(),
                reason: "top level is not an object".to_string(),
            });
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let people = raw
            .get("people")
            .and_then(|p| p.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|p| p.get("name")?.as_str())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let geo = raw
            .get("geoData")
            .and_then(|g| serde_json::from_value::<GeoData>(g.clone()).ok())
            .filter(|g| g.latitude != 0.0 || g.longitude != 0.0);

        Ok(Self {
            path: path.to_path_buf(),
            name: SidecarName::parse(&file_name),
            title: string_field(&raw, "title"),
            photo_taken: time_field(&raw, "photoTakenTime"),
            creation: time_field(&raw, "creationTime"),
            photo_taken_formatted: raw
                .get("photoTakenTime")
                .and_then(|t| string_field(t, "formatted")),
            creation_formatted: raw
                .get("creationTime")
                .and_then(|t| string_field(t, "formatted")),
            url: string_field(&raw, "url"),
            description: string_field(&raw, "description"),
            geo,
            people,
            raw,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SidecarLoadError> {
        let bytes = fs::read(path).map_err(|e| SidecarLoadError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(path, &bytes)
    }
}

/// Strict decode: UTF-8 unless a BOM says otherwise, no replacement
/// characters.
fn decode_text(bytes: &[u8]) -> Option<String> {
    let (encoding, bom_len): (&'static Encoding, usize) = Encoding::for_bom(bytes).unwrap_or((UTF_8, 0));
    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .map(|text| text.into_owned())
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `{"timestamp": "1552348800"}` or `{"timestamp": 1552348800}`; zero and
/// unparsable values count as absent.
fn time_field(value: &serde_json::Value, key: &str) -> Option<TimeField> {
    let ts = value.get(key)?.get("timestamp")?;
    let epoch = match ts {
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    (epoch != 0).then_some(TimeField { timestamp: epoch })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_names() {
        let n = SidecarName::parse("IMG_0001.jpg.json");
        assert_eq!(n.media_name, "IMG_0001.jpg");
        assert_eq!(n.counter, None);
        assert_eq!(n.base, "img_0001");

        let n = SidecarName::parse("IMG_0001.jpg.supplemental-metadata.json");
        assert_eq!(n.media_name, "IMG_0001.jpg");

        let n = SidecarName::parse("PXL_20230101_101010123.jpg.supplemental-met.json");
        assert_eq!(n.media_name, "PXL_20230101_101010123.jpg");
    }

    #[test]
    fn parses_counter_in_either_position() {
        let n = SidecarName::parse("IMG_0001.jpg(1).json");
        assert_eq!(n.media_name, "IMG_0001.jpg");
        assert_eq!(n.counter, Some(1));

        let n = SidecarName::parse("IMG_0001.jpg.supplemental-metadata(2).json");
        assert_eq!(n.media_name, "IMG_0001.jpg");
        assert_eq!(n.counter, Some(2));

        let n = SidecarName::parse("IMG_0001.jpg(3).supplemental-metadata.json");
        assert_eq!(n.media_name, "IMG_0001.jpg");
        assert_eq!(n.counter, Some(3));

        // Counter belonging to the media name itself stays in it.
        let n = SidecarName::parse("IMG_0001(1).jpg.json");
        assert_eq!(n.media_name, "IMG_0001(1).jpg");
        assert_eq!(n.counter, None);
        assert_eq!(n.base, "img_0001");
    }

    #[test]
    fn does_not_strip_real_extensions() {
        let n = SidecarName::parse("notes.json");
        assert_eq!(n.media_name, "notes");
        let n = SidecarName::parse("clip.mp4.json");
        assert_eq!(n.media_name, "clip.mp4");
    }

    #[test]
    fn reads_times_as_string_or_integer() {
        let path = Path::new("a.jpg.json");
        let json = br#"{"title":"a.jpg","photoTakenTime":{"timestamp":"1552348800","formatted":"Mar 12, 2019"},
            "creationTime":{"timestamp":1552350000},"url":"https://photos.google.com/photo/x"}"#;
        let d = SidecarDescriptor::from_bytes(path, json).unwrap();
        assert_eq!(d.title.as_deref(), Some("a.jpg"));
        assert_eq!(d.photo_taken, Some(TimeField { timestamp: 1552348800 }));
        assert_eq!(d.creation, Some(TimeField { timestamp: 1552350000 }));
        assert_eq!(d.photo_taken_formatted.as_deref(), Some("Mar 12, 2019"));
        assert_eq!(d.url.as_deref(), Some("https://photos.google.com/photo/x"));
    }

    #[test]
    fn zero_timestamp_is_absent() {
        let d = SidecarDescriptor::from_bytes(
            Path::new("a.jpg.json"),
            br#"{"photoTakenTime":{"timestamp":"0"},"geoData":{"latitude":0.0,"longitude":0.0}}"#,
        )
        .unwrap();
        assert_eq!(d.photo_taken, None);
        assert_eq!(d.geo, None);
    }

    #[test]
    fn rejects_bad_encoding_and_structure() {
        let path = Path::new("bad.jpg.json");
        assert!(matches!(
            SidecarDescriptor::from_bytes(path, b"{\"title\":\"\xff\xfe\"}"),
            Err(SidecarLoadError::Encoding { .. })
        ));
        assert!(matches!(
            SidecarDescriptor::from_bytes(path, b"[1,2,3]"),
            Err(SidecarLoadError::Structure { .. })
        ));
        assert!(matches!(
            SidecarDescriptor::from_bytes(path, b"{not json"),
            Err(SidecarLoadError::Structure { .. })
        ));
    }

    #[test]
    fn tolerates_utf8_bom() {
        let d = SidecarDescriptor::from_bytes(Path::new("a.jpg.json"), b"\xEF\xBB\xBF{\"title\":\"a.jpg\"}").unwrap();
        assert_eq!(d.title.as_deref(), Some("a.jpg"));
    }
}
