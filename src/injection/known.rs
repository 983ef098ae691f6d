//! Local catalog of frameworks injected tweaks commonly link against.
//!
//! The catalog is a directory of `*.framework` bundles. A framework is pulled into the
//! package when any injected binary references it by name.

use super::entry::{EntryKind, InjectionEntry};
use crate::error::{ErrorExt, Result};
use std::path::Path;

/// Swift tweak runtime; it loads through Substrate.
pub const ORION_FRAMEWORK: &str = "Orion.framework";
/// Hooking runtime every Orion tweak needs.
pub const SUBSTRATE_FRAMEWORK: &str = "CydiaSubstrate.framework";

/// Frameworks available for automatic injection.
#[derive(Debug, Clone, Default)]
pub struct KnownFrameworks {
    frameworks: Vec<InjectionEntry>,
}

impl KnownFrameworks {
    /// Scan `dir` for framework bundles; a missing directory is an empty catalog.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            log::debug!("No known framework catalog at {}", dir.display());
            return Ok(Self::default());
        }

        let mut frameworks = std::fs::read_dir(dir)
            .fs_context("reading framework catalog", dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| InjectionEntry::new(entry.path()))
            .filter(|entry| entry.kind() == EntryKind::Framework && entry.path().is_dir())
            .collect::<Vec<_>>();
        frameworks.sort_by_key(InjectionEntry::name);

        Ok(Self { frameworks })
    }

    pub fn frameworks(&self) -> &[InjectionEntry] {
        &self.frameworks
    }

    fn get(&self, name: &str) -> Option<&InjectionEntry> {
        self.frameworks.iter().find(|f| f.name() == name)
    }

    /// Frameworks whose directory name occurs in any of `dependencies`.
    ///
    /// Selecting Orion also selects CydiaSubstrate when the catalog has it.
    pub fn select<S: AsRef<str>>(&self, dependencies: &[S]) -> Vec<InjectionEntry> {
        let mut selected = self
            .frameworks
            .iter()
            .filter(|framework| {
                let name = framework.name();
                dependencies
                    .iter()
                    .any(|dependency| dependency.as_ref().contains(name.as_str()))
            })
            .cloned()
            .collect::<Vec<_>>();

        let has = |selected: &[InjectionEntry], name: &str| selected.iter().any(|f| f.name() == name);
        if has(&selected, ORION_FRAMEWORK)
            && !has(&selected, SUBSTRATE_FRAMEWORK)
            && let Some(substrate) = self.get(SUBSTRATE_FRAMEWORK)
        {
            selected.push(substrate.clone());
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(names: &[&str]) -> (tempfile::TempDir, KnownFrameworks) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let known = KnownFrameworks::load(dir.path()).unwrap();
        (dir, known)
    }

    #[test]
    fn test_missing_catalog_is_empty() {
        let known = KnownFrameworks::load(Path::new("/nonexistent/kodegen/frameworks")).unwrap();
        assert!(known.frameworks().is_empty());
    }

    #[test]
    fn test_orion_pulls_in_substrate() {
        let (_dir, known) = catalog(&[ORION_FRAMEWORK, SUBSTRATE_FRAMEWORK, "Cephei.framework"]);
        let selected = known.select(&["@rpath/Orion.framework/Orion", "/usr/lib/libobjc.A.dylib"]);
        let names: Vec<_> = selected.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec![ORION_FRAMEWORK, SUBSTRATE_FRAMEWORK]);
    }

    #[test]
    fn test_substrate_selected_once() {
        let (_dir, known) = catalog(&[ORION_FRAMEWORK, SUBSTRATE_FRAMEWORK]);
        let selected = known.select(&[
            "@rpath/Orion.framework/Orion",
            "/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate",
        ]);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_nothing_referenced() {
        let (_dir, known) = catalog(&[ORION_FRAMEWORK]);
        assert!(known.select(&["/usr/lib/libSystem.B.dylib"]).is_empty());
        assert_eq!(known.frameworks().len(), 1);
    }
}
