//! The built-in matching rules, in chain order.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::{Claim, MatchConfig, MatchRule};
use crate::extras;
use crate::media::{fold, MediaKind, MediaName};
use crate::store::{DescriptorId, DescriptorStore};

/// Standard priorities. Lower runs first; custom rules pick a value in
/// between.
pub mod priority {
    pub const DIRECT: u16 = 100;
    pub const TRUNCATED: u16 = 200;
    pub const PARENTHETICAL: u16 = 300;
    pub const EDITED: u16 = 400;
    pub const LIVE_COMPANION: u16 = 500;
    pub const LIVE_DUPLICATE: u16 = 600;
    pub const TITLE: u16 = 700;
    pub const BASE_FALLBACK: u16 = 800;
}

pub const TITLE_NAME: &str = "via JSON title";

/// A counter stuck after the extension: `jpg(1)`.
static EXT_COUNTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^()]+)\((\d+)\)$").unwrap());

/// How far below the name budget a sidecar stem may end and still count
/// as cut off by the export.
const TRUNCATION_SLACK: usize = 5;

/// `<mediaFilename>.json`, with or without the metadata suffix.
pub struct Direct;

impl MatchRule for Direct {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, _: &MatchConfig) -> Vec<DescriptorId> {
        direct(media, store)
    }
}

fn direct(media: &MediaName, store: &DescriptorStore) -> Vec<DescriptorId> {
    store
        .by_media_name(&media.filename)
        .iter()
        .copied()
        .filter(|&id| store.get(id).name.counter.is_none())
        .collect()
}

/// Sidecars whose name the export cut off at its character budget.
pub struct Truncated;

impl MatchRule for Truncated {
    fn name(&self) -> &'static str {
        "truncated"
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, config: &MatchConfig) -> Vec<DescriptorId> {
        truncated(media, store, config)
    }
}

fn truncated(media: &MediaName, store: &DescriptorStore, config: &MatchConfig) -> Vec<DescriptorId> {
    let limit = config.truncation_limit;
    if media.filename.chars().count() + ".json".len() <= limit {
        return Vec::new();
    }
    let budget = limit.saturating_sub(".json".len());
    let floor = budget.saturating_sub(TRUNCATION_SLACK);
    let filename = fold(&media.filename);

    store
        .iter()
        .filter(|(_, d)| {
            let stem_len = d.name.stem.chars().count();
            let prefix = fold(&d.name.media_name);
            stem_len >= floor && stem_len <= budget && !prefix.is_empty() && filename.starts_with(&prefix)
        })
        .map(|(id, _)| id)
        .collect()
}

/// `name(1).jpg` against `name.jpg(1).json`, and `name.jpg(1)` against
/// `name(1).jpg.json`.
pub struct Parenthetical;

impl MatchRule for Parenthetical {
    fn name(&self) -> &'static str {
        "parenthetical"
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, _: &MatchConfig) -> Vec<DescriptorId> {
        parenthetical(media, store)
    }
}

fn parenthetical(media: &MediaName, store: &DescriptorStore) -> Vec<DescriptorId> {
    if let Some(n) = media.counter {
        let mut found = with_counter(store, &media.without_counter(), n);
        // `IMG(1).json`: the export dropped the extension along with the name.
        for id in with_counter(store, &media.bare_stem, n) {
            if !has_extension(&store.get(id).name.media_name) && !found.contains(&id) {
                found.push(id);
            }
        }
        return found;
    }

    let Some(caps) = EXT_COUNTER_RE.captures(&media.ext) else {
        return Vec::new();
    };
    let Ok(n) = caps[2].parse::<u32>() else {
        return Vec::new();
    };
    let ext = &caps[1];
    let moved = format!("{}({}).{}", media.stem, n, ext);
    let mut found: Vec<DescriptorId> = store
        .by_media_name(&moved)
        .iter()
        .copied()
        .filter(|&id| store.get(id).name.counter.is_none())
        .collect();
    for id in with_counter(store, &format!("{}.{}", media.stem, ext), n) {
        if !found.contains(&id) {
            found.push(id);
        }
    }
    found
}

fn has_extension(media_name: &str) -> bool {
    !MediaName::parse(media_name).ext.is_empty()
}

fn with_counter(store: &DescriptorStore, media_name: &str, n: u32) -> Vec<DescriptorId> {
    store
        .by_media_name(media_name)
        .iter()
        .copied()
        .filter(|&id| store.get(id).name.counter == Some(n))
        .collect()
}

/// `IMG-edited.jpg`: rules 1-3 on the name without the edited marker.
pub struct Edited;

impl MatchRule for Edited {
    fn name(&self) -> &'static str {
        "-edited"
    }

    fn claim(&self) -> Claim {
        Claim::Derivative
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, config: &MatchConfig) -> Vec<DescriptorId> {
        let Some(stem) = extras::strip_edited(&media.stem) else {
            return Vec::new();
        };
        let original = media.with_stem(&stem);
        let found = direct(&original, store);
        if !found.is_empty() {
            return found;
        }
        let found = truncated(&original, store, config);
        if !found.is_empty() {
            return found;
        }
        parenthetical(&original, store)
    }
}

/// A live-photo video borrowing the sidecar of its still.
pub struct LiveCompanion;

impl MatchRule for LiveCompanion {
    fn name(&self) -> &'static str {
        "live photos"
    }

    fn claim(&self) -> Claim {
        Claim::Companion
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, _: &MatchConfig) -> Vec<DescriptorId> {
        if media.kind != MediaKind::Video || media.counter.is_some() {
            return Vec::new();
        }
        still_sidecars(store, &media.bare_stem)
            .filter(|&id| store.get(id).name.counter.is_none() && still_counter(store, id).is_none())
            .collect()
    }
}

/// `IMG(1).MP4`: counter handling of rule 3 on top of rule 5.
pub struct LiveDuplicate;

impl MatchRule for LiveDuplicate {
    fn name(&self) -> &'static str {
        "live photos duplicates"
    }

    fn claim(&self) -> Claim {
        Claim::Companion
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, _: &MatchConfig) -> Vec<DescriptorId> {
        let (MediaKind::Video, Some(n)) = (media.kind, media.counter) else {
            return Vec::new();
        };
        let same_counter: Vec<DescriptorId> = still_sidecars(store, &media.bare_stem)
            .filter(|&id| store.get(id).name.counter == Some(n) || still_counter(store, id) == Some(n))
            .collect();
        if !same_counter.is_empty() {
            return same_counter;
        }
        still_sidecars(store, &media.bare_stem)
            .filter(|&id| store.get(id).name.counter.is_none() && still_counter(store, id).is_none())
            .collect()
    }
}

/// Sidecars written for an image sharing this bare stem.
fn still_sidecars<'a>(store: &'a DescriptorStore, bare_stem: &str) -> impl Iterator<Item = DescriptorId> + 'a {
    store.by_base(&fold(bare_stem)).iter().copied().filter(move |&id| {
        MediaName::parse(&store.get(id).name.media_name).kind == MediaKind::Image
    })
}

/// Counter carried inside the still's own name: `IMG(1).HEIC.json`.
fn still_counter(store: &DescriptorStore, id: DescriptorId) -> Option<u32> {
    MediaName::parse(&store.get(id).name.media_name).counter
}

/// The sidecar's `title` field names the media file exactly.
pub struct Title;

impl MatchRule for Title {
    fn name(&self) -> &'static str {
        TITLE_NAME
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, _: &MatchConfig) -> Vec<DescriptorId> {
        let same_base: Vec<DescriptorId> = store
            .by_base(&fold(&media.bare_stem))
            .iter()
            .copied()
            .filter(|&id| title_matches(store, id, &media.filename))
            .collect();
        if !same_base.is_empty() {
            return same_base;
        }
        store
            .by_title(&media.filename)
            .iter()
            .copied()
            .filter(|&id| title_matches(store, id, &media.filename))
            .collect()
    }
}

pub fn title_matches(store: &DescriptorStore, id: DescriptorId, filename: &str) -> bool {
    store
        .get(id)
        .title
        .as_deref()
        .is_some_and(|title| title.nfc().eq(filename.nfc()))
}

/// `filename.ext` against `filename*.json`: any sidecar of the same base
/// whose media name starts with the file's stem. Sidecars without an
/// extension in their media name are compared with their counter in place.
pub struct BaseFallback;

impl MatchRule for BaseFallback {
    fn name(&self) -> &'static str {
        "filename*.json"
    }

    fn candidates(&self, media: &MediaName, store: &DescriptorStore, _: &MatchConfig) -> Vec<DescriptorId> {
        if media.stem.is_empty() {
            return Vec::new();
        }
        let stem = fold(&media.stem);
        store
            .by_base(&fold(&media.bare_stem))
            .iter()
            .copied()
            .filter(|&id| {
                let name = &store.get(id).name;
                fold(&name.media_name).starts_with(&stem)
                    || (!has_extension(&name.media_name) && fold(&name.stem).starts_with(&stem))
            })
            .collect()
    }
}
