use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::SidecarLoadError;
use crate::media::{self, fold};
use crate::sidecar::SidecarDescriptor;

/// Index of a descriptor inside its folder's store. Only meaningful for the
/// store that handed it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub usize);

/// All sidecars of one year folder, indexed for matching. Built once per
/// folder and dropped when the folder is done.
#[derive(Debug, Default)]
pub struct DescriptorStore {
    descriptors: Vec<SidecarDescriptor>,
    /// folded sidecar file name -> descriptors
    by_name: HashMap<String, Vec<DescriptorId>>,
    /// folded media name (suffix and counter stripped) -> descriptors
    by_media_name: HashMap<String, Vec<DescriptorId>>,
    /// normalized base -> descriptors, in load order
    by_base: HashMap<String, Vec<DescriptorId>>,
    /// folded title -> descriptors
    by_title: HashMap<String, Vec<DescriptorId>>,
    failures: Vec<SidecarLoadError>,
}

impl DescriptorStore {
    /// Load every sidecar under `folder` (recursively).
    pub fn load(folder: &Path) -> anyhow::Result<Self> {
        let scan = media::scan_folder(folder)?;
        Ok(Self::from_paths(&scan.sidecars))
    }

    /// Load the given sidecars in order. Unreadable ones are recorded as
    /// failures and left out of every index.
    pub fn from_paths(paths: &[PathBuf]) -> Self {
        let mut store = Self::default();
        for path in paths {
            match SidecarDescriptor::load(path) {
                Ok(d) => store.insert(d),
                Err(e) => {
                    tracing::warn!("Could not parse {}: {}", path.display(), e);
                    store.failures.push(e);
                }
            }
        }
        store
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = SidecarDescriptor>) -> Self {
        let mut store = Self::default();
        for d in descriptors {
            store.insert(d);
        }
        store
    }

    fn insert(&mut self, d: SidecarDescriptor) {
        let id = DescriptorId(self.descriptors.len());
        self.by_name.entry(fold(&d.name.file_name)).or_default().push(id);
        self.by_media_name.entry(fold(&d.name.media_name)).or_default().push(id);
        self.by_base.entry(d.name.base.clone()).or_default().push(id);
        if let Some(title) = &d.title {
            self.by_title.entry(fold(title)).or_default().push(id);
        }
        self.descriptors.push(d);
    }

    pub fn get(&self, id: DescriptorId) -> &SidecarDescriptor {
        &self.descriptors[id.0]
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// All descriptors in load order.
    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &SidecarDescriptor)> {
        self.descriptors.iter().enumerate().map(|(i, d)| (DescriptorId(i), d))
    }

    /// Exact sidecar file name lookup (case-insensitive).
    pub fn by_name(&self, file_name: &str) -> &[DescriptorId] {
        self.by_name.get(&fold(file_name)).map_or(&[], Vec::as_slice)
    }

    /// Sidecars written for this media name, any suffix or counter.
    pub fn by_media_name(&self, media_name: &str) -> &[DescriptorId] {
        self.by_media_name.get(&fold(media_name)).map_or(&[], Vec::as_slice)
    }

    /// Sidecars sharing a normalized base (already folded).
    pub fn by_base(&self, base: &str) -> &[DescriptorId] {
        self.by_base.get(base).map_or(&[], Vec::as_slice)
    }

    pub fn by_title(&self, title: &str) -> &[DescriptorId] {
        self.by_title.get(&fold(title)).map_or(&[], Vec::as_slice)
    }

    pub fn failures(&self) -> &[SidecarLoadError] {
        &self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn indexes_by_name_and_base_in_load_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IMG_1.jpg.json"), br#"{"title":"IMG_1.jpg"}"#).unwrap();
        fs::write(dir.path().join("IMG_1.jpg(1).json"), br#"{"title":"IMG_1(1).jpg"}"#).unwrap();
        fs::write(dir.path().join("IMG_1.png.supplemental-metadata.json"), br#"{"title":"IMG_1.png"}"#).unwrap();
        fs::write(dir.path().join("broken.jpg.json"), b"{oops").unwrap();
        fs::write(dir.path().join("IMG_1.jpg"), b"media").unwrap();

        let store = DescriptorStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.failures().len(), 1);
        assert!(store.failures()[0].path().ends_with("broken.jpg.json"));

        assert_eq!(store.by_name("img_1.JPG.json").len(), 1);
        assert_eq!(store.by_media_name("IMG_1.jpg").len(), 2);

        let base: Vec<&str> = store
            .by_base("img_1")
            .iter()
            .map(|&id| store.get(id).file_name())
            .collect();
        // Sorted path order: '(' < '.' so the counter variant loads first.
        assert_eq!(base, vec!["IMG_1.jpg(1).json", "IMG_1.jpg.json", "IMG_1.png.supplemental-metadata.json"]);
        assert_eq!(store.by_title("IMG_1(1).jpg").len(), 1);
    }
}
