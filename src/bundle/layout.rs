//! Bundle directory layout.

use crate::macho::MachOBinary;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Name of the directory holding dylibs and frameworks.
pub const FRAMEWORKS_DIRECTORY: &str = "Frameworks";
/// Name of the directory holding app extensions.
pub const PLUGINS_DIRECTORY: &str = "PlugIns";

/// Paths derived from a bundle root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    bundle: PathBuf,
    frameworks: PathBuf,
    plugins: PathBuf,
}

impl BundleLayout {
    /// Derive the layout of the bundle rooted at `bundle`.
    pub fn new(bundle: impl Into<PathBuf>) -> Self {
        let bundle = bundle.into();
        Self {
            frameworks: bundle.join(FRAMEWORKS_DIRECTORY),
            plugins: bundle.join(PLUGINS_DIRECTORY),
            bundle,
        }
    }

    /// Bundle root.
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle
    }

    /// `<bundle>/Frameworks`
    pub fn frameworks_dir(&self) -> &Path {
        &self.frameworks
    }

    /// `<bundle>/PlugIns`
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins
    }

    /// `path` relative to the bundle root, or `path` itself when outside the bundle.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.bundle).unwrap_or(path)
    }

    /// Whether `path` lives under a `Frameworks` directory anywhere in the bundle.
    ///
    /// Binaries that do are libraries; everything else is the app's or an extension's
    /// main executable.
    pub fn is_inside_frameworks(&self, path: &Path) -> bool {
        self.relative(path)
            .components()
            .any(|c| c == Component::Normal(OsStr::new(FRAMEWORKS_DIRECTORY)))
    }
}

/// What the loaded package declares about itself.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    /// `CFBundleExecutable`, resolved inside the bundle.
    pub main_binary: MachOBinary,
    /// `CFBundleIdentifier`
    pub bundle_identifier: String,
    /// Derived directories.
    pub layout: BundleLayout,
}

impl PackageInfo {
    /// Describe the bundle at `bundle` whose executable is `executable`.
    pub fn new(bundle: impl Into<PathBuf>, executable: &str, bundle_identifier: String) -> Self {
        let layout = BundleLayout::new(bundle);
        Self {
            main_binary: MachOBinary::new(layout.bundle_dir().join(executable)),
            bundle_identifier,
            layout,
        }
    }
}
