//! Run configuration.
//!
//! [`InjectParameters`] is everything one injection run needs, built by the CLI from
//! arguments, environment and (optionally) a provisioning profile.

use crate::bundle::CompressionLevel;
use crate::injection::InjectionEntry;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tempfile::TempPath;

/// Environment variable overriding the known framework catalog location.
pub const FRAMEWORKS_DIR_ENV: &str = "KODEGEN_FRAMEWORKS_DIR";

/// Identity value selecting ad hoc signing.
pub const AD_HOC_IDENTITY: &str = "-";

static APPLICATION_PACKAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\.(?:app|\w*ipa)$").ok());

/// Whether `path` names an `.app` bundle or an `.ipa` style archive (`.ipa`, `.tipa`, ...).
pub fn is_application_package(path: &Path) -> bool {
    let path = path.to_string_lossy();
    let path = path.trim_end_matches('/');
    APPLICATION_PACKAGE
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(path))
}

/// Known framework catalog: `$KODEGEN_FRAMEWORKS_DIR`, else `~/.kodegen/frameworks`.
pub fn default_frameworks_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(FRAMEWORKS_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".kodegen")
        .join("frameworks")
}

/// Where the entitlements handed to `codesign` live.
#[derive(Debug)]
pub enum EntitlementsSource {
    /// User supplied file, left alone.
    File(PathBuf),
    /// Extracted from a provisioning profile, deleted on drop.
    Transient(TempPath),
}

impl EntitlementsSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) => path,
            Self::Transient(path) => path,
        }
    }
}

/// Signing identity and replacement entitlements.
#[derive(Debug)]
pub struct SigningInfo {
    /// `codesign` identity, `-` for ad hoc.
    pub identity: String,
    pub entitlements: Option<EntitlementsSource>,
    /// Identity and entitlements came from a provisioning profile.
    pub from_profile: bool,
}

impl SigningInfo {
    pub fn is_ad_hoc(&self) -> bool {
        self.identity == AD_HOC_IDENTITY
    }

    pub fn entitlements_path(&self) -> Option<&Path> {
        self.entitlements.as_ref().map(EntitlementsSource::path)
    }

    /// How the package is signed, for the run report.
    pub fn describe(&self) -> String {
        if self.from_profile {
            format!("Signed with provisioning profile of team {}", self.identity)
        } else if self.is_ad_hoc() {
            "Signed ad hoc".to_string()
        } else {
            format!("Signed as {}", self.identity)
        }
    }
}

/// Info.plist and layout changes applied before injection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackagingInfo {
    /// Bundle-relative directories to delete, e.g. `PlugIns`, `Watch`.
    pub directories_to_remove: Vec<String>,
    pub remove_supported_devices: bool,
    pub enable_documents_support: bool,
    /// Replacement for the package's bundle identifier.
    pub custom_bundle_id: Option<String>,
}

impl PackagingInfo {
    /// Whether no modification is requested.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Everything one injection run needs.
#[derive(Debug)]
pub struct InjectParameters {
    /// Input `.app` or archive.
    pub target: PathBuf,
    /// Output `.app` or archive.
    pub output: PathBuf,
    pub overwrite: bool,
    pub compression_level: CompressionLevel,
    /// Entries to inject.
    pub items: Vec<InjectionEntry>,
    /// `None` leaves the bundle unsigned.
    pub signing: Option<SigningInfo>,
    pub packaging: Option<PackagingInfo>,
    /// Abort instead of warning when merging drops an entitlement.
    pub strict_entitlements: bool,
    /// Known framework catalog directory.
    pub frameworks_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_package_extensions() {
        assert!(is_application_package(Path::new("Demo.app")));
        assert!(is_application_package(Path::new("Demo.app/")));
        assert!(is_application_package(Path::new("/tmp/Demo.ipa")));
        assert!(is_application_package(Path::new("Demo.tipa")));
        assert!(!is_application_package(Path::new("Demo.zip")));
        assert!(!is_application_package(Path::new("Demo.apps")));
    }

    #[test]
    fn test_ad_hoc_identity() {
        let signing = SigningInfo {
            identity: "-".into(),
            entitlements: None,
            from_profile: false,
        };
        assert!(signing.is_ad_hoc());
        assert!(signing.entitlements_path().is_none());
        assert_eq!(signing.describe(), "Signed ad hoc");
    }

    #[test]
    fn test_describe_signing_source() {
        let identity = SigningInfo {
            identity: "Apple Development: Dev".into(),
            entitlements: None,
            from_profile: false,
        };
        assert_eq!(identity.describe(), "Signed as Apple Development: Dev");

        let profile = SigningInfo {
            identity: "XYZ98765".into(),
            entitlements: None,
            from_profile: true,
        };
        assert_eq!(
            profile.describe(),
            "Signed with provisioning profile of team XYZ98765"
        );
    }

    #[test]
    fn test_packaging_info_is_empty() {
        assert!(PackagingInfo::default().is_empty());
        let packaging = PackagingInfo {
            enable_documents_support: true,
            ..Default::default()
        };
        assert!(!packaging.is_empty());
    }
}
