use unicode_normalization::UnicodeNormalization;

/// Localized "edited" markers (lowercase) the export appends to derivative
/// images, before the extension.
const EDITED_MARKERS: &[&str] = &[
    "-edited",      // EN
    "-effects",     // EN
    "-smile",       // EN
    "-mix",         // EN
    "-edytowane",   // PL
    "-bearbeitet",  // DE
    "-bewerkt",     // NL
    "-編集済み",     // JA
    "-modificato",  // IT
    "-modifié",     // FR
    "-ha editado",  // ES
    "-editat",      // CA
];

/// Remove the edited marker from a stem, keeping whatever follows it
/// (usually nothing, sometimes a duplicate counter like `(1)`).
/// Returns None when the stem carries no marker.
pub fn strip_edited(stem: &str) -> Option<String> {
    let normalized: String = stem.nfc().collect();
    let lower = normalized.to_lowercase();
    // Lowercasing can change byte lengths outside ASCII; only trust positions
    // when it did not.
    if lower.len() != normalized.len() {
        return None;
    }
    for marker in EDITED_MARKERS {
        if let Some(pos) = lower.rfind(marker) {
            let tail = &lower[pos + marker.len()..];
            if tail.is_empty() || is_counter(tail) {
                let mut result = normalized.clone();
                result.replace_range(pos..pos + marker.len(), "");
                return Some(result);
            }
        }
    }
    None
}

fn is_counter(s: &str) -> bool {
    s.len() > 2
        && s.starts_with('(')
        && s.ends_with(')')
        && s[1..s.len() - 1].bytes().all(|b| b.is_ascii_digit())
}
