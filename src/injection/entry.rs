//! Injection sources and their kinds.

use crate::bundle::BundleLayout;
use std::path::{Path, PathBuf};

/// What an injection source is, judged by its extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// `.dylib`
    DynamicLibrary,
    /// `.framework`
    Framework,
    /// `.appex`
    PlugIn,
    /// `.bundle`, copied as an opaque resource tree.
    Bundle,
    /// `.deb`, expanded into further entries.
    ContainerPackage,
    /// Anything else, copied to the bundle root.
    Unknown,
}

impl EntryKind {
    /// Classify `path` by extension.
    pub fn of_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("dylib") => Self::DynamicLibrary,
            Some("framework") => Self::Framework,
            Some("appex") => Self::PlugIn,
            Some("bundle") => Self::Bundle,
            Some("deb") => Self::ContainerPackage,
            _ => Self::Unknown,
        }
    }

    /// Whether entries of this kind carry a binary to register after copying.
    pub fn has_binary(self) -> bool {
        matches!(self, Self::DynamicLibrary | Self::Framework | Self::PlugIn)
    }
}

/// A file or directory to inject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionEntry {
    path: PathBuf,
    kind: EntryKind,
}

impl InjectionEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = EntryKind::of_path(&path);
        Self { path, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// File name component.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Where the entry lands inside the bundle.
    pub fn destination(&self, layout: &BundleLayout) -> PathBuf {
        let name = self.name();
        match self.kind {
            EntryKind::DynamicLibrary | EntryKind::Framework => layout.frameworks_dir().join(name),
            EntryKind::PlugIn => layout.plugins_dir().join(name),
            EntryKind::Bundle | EntryKind::ContainerPackage | EntryKind::Unknown => {
                layout.bundle_dir().join(name)
            }
        }
    }
}
