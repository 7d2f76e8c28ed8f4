use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

/// Localized prefixes: "<prefix>YYYY"
const YEAR_FOLDER_PREFIXES: &[&str] = &[
    "Photos from ",      // EN
    "Fotos von ",        // DE
    "Fotos aus ",        // DE (alternate)
    "Photos de ",        // FR
    "Fotos de ",         // ES, PT, CA
    "Foto's uit ",       // NL
    "Foto dal ",         // IT
    "Foto del ",         // IT (alternate)
    "Zdjęcia z ",        // PL
    "Фото за ",          // RU
    "Фотографии за ",    // RU (alternate)
    "Fotky z ",          // CS
    "Fotografii din ",   // RO
    "Foton från ",       // SV
    "Bilder fra ",       // NO
    "Billeder fra ",     // DA
    "Valokuvat ",        // FI
    "Fényképek - ",      // HU
    "Fotoğraflar ",      // TR
];

/// Localized suffixes: "YYYY<suffix>"
const YEAR_FOLDER_SUFFIXES: &[&str] = &[
    " 年の写真",   // JA
    "年のフォト",   // JA (alternate)
    "년의 사진",    // KO
    "年的照片",     // ZH-CN
    "年的相片",     // ZH-TW
];

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(20|19|18)\d{2}$").unwrap());

/// A "Photos from YYYY" folder of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearFolder {
    pub path: PathBuf,
    pub year: String,
}

/// Year of a Google Takeout year folder name, matched case-insensitively
/// on the prefix.
pub fn year_of_folder(name: &str) -> Option<&str> {
    for prefix in YEAR_FOLDER_PREFIXES {
        if name.len() > prefix.len()
            && name.is_char_boundary(prefix.len())
            && name[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            let rest = &name[prefix.len()..];
            if YEAR_RE.is_match(rest) {
                return Some(rest);
            }
        }
    }
    for suffix in YEAR_FOLDER_SUFFIXES {
        if let Some(rest) = name.strip_suffix(suffix) {
            if YEAR_RE.is_match(rest) {
                return Some(rest);
            }
        }
    }
    None
}

pub fn is_year_folder(name: &str) -> bool {
    year_of_folder(name).is_some()
}

/// Year folders directly under `root`, sorted by name.
pub fn find_year_folders(root: &Path) -> anyhow::Result<Vec<YearFolder>> {
    let mut folders = Vec::new();
    let entries = fs::read_dir(root).with_context(|| format!("cannot list {}", root.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(year) = year_of_folder(name) {
            folders.push(YearFolder {
                year: year.to_string(),
                path: path.clone(),
            });
        }
    }
    folders.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(folders)
}
