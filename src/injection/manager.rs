//! Copying injection entries into the bundle and tracking the binaries they bring.

use super::copied::CopiedBinary;
use super::deb::{self, ExpandedPackage};
use super::dependencies;
use super::entry::{EntryKind, InjectionEntry};
use super::known::KnownFrameworks;
use crate::bundle::{BundleLayout, info};
use crate::error::{Error, Result};
use crate::macho::MachOBinary;
use crate::toolchain::Toolchain;
use crate::utils::fs::{copy_dir, copy_file, remove_existing};
use std::sync::Arc;

/// Whether copying an entry created it or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    Replaced,
}

/// Owns the registry of injected binaries for one bundle.
///
/// The registry only grows while entries are copied; later stages read it through
/// [`InjectionManager::copied_binaries`].
#[derive(Debug)]
pub struct InjectionManager<T: Toolchain> {
    toolchain: Arc<T>,
    layout: BundleLayout,
    copied: Vec<CopiedBinary>,
}

impl<T: Toolchain> InjectionManager<T> {
    pub fn new(toolchain: Arc<T>, layout: BundleLayout) -> Self {
        Self {
            toolchain,
            layout,
            copied: Vec::new(),
        }
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    /// Binaries injected so far.
    pub fn copied_binaries(&self) -> &[CopiedBinary] {
        &self.copied
    }

    /// Expand Debian packages and copy every resulting entry into the bundle.
    pub async fn add_entries(&mut self, entries: &[InjectionEntry]) -> Result<Vec<CopyOutcome>> {
        let mut expanded: Vec<ExpandedPackage> = Vec::new();
        let mut flattened = Vec::new();

        for entry in entries {
            if entry.kind() == EntryKind::ContainerPackage {
                let package = deb::expand(entry).await?;
                flattened.extend(package.entries().iter().cloned());
                expanded.push(package);
            } else {
                flattened.push(entry.clone());
            }
        }

        // Expanded packages keep their scratch space alive until everything is copied.
        let outcomes = self.copy_entries(&flattened).await;
        drop(expanded);
        outcomes
    }

    /// Copy `entries` into the bundle, replacing whatever is at their destination.
    pub async fn copy_entries(&mut self, entries: &[InjectionEntry]) -> Result<Vec<CopyOutcome>> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.copy_entry(entry).await?);
        }
        Ok(outcomes)
    }

    async fn copy_entry(&mut self, entry: &InjectionEntry) -> Result<CopyOutcome> {
        let destination = entry.destination(&self.layout);
        let outcome = if remove_existing(&destination).await? {
            CopyOutcome::Replaced
        } else {
            CopyOutcome::Copied
        };

        if entry.path().is_dir() {
            copy_dir(entry.path(), &destination).await?;
        } else {
            copy_file(entry.path(), &destination).await?;
        }

        let binary = match entry.kind() {
            EntryKind::DynamicLibrary => Some(MachOBinary::new(&destination)),
            EntryKind::Framework | EntryKind::PlugIn => {
                let executable = info::executable_of(&destination)?;
                Some(MachOBinary::new(destination.join(executable)))
            }
            EntryKind::Bundle | EntryKind::ContainerPackage | EntryKind::Unknown => None,
        };
        if let Some(binary) = binary {
            self.register(CopiedBinary::new(binary, entry.kind()));
        }

        log::info!(
            "{} {}",
            match outcome {
                CopyOutcome::Copied => "Copied",
                CopyOutcome::Replaced => "Replaced",
            },
            entry.name()
        );
        Ok(outcome)
    }

    fn register(&mut self, copied: CopiedBinary) {
        if !self.copied.iter().any(|c| c.path() == copied.path()) {
            self.copied.push(copied);
        }
    }

    /// Reduce every fat injected binary to its arm64 slice. The first failure aborts.
    pub async fn thin_copied_binaries(&self) -> Result<usize> {
        let mut thinned = 0;
        for copied in &self.copied {
            let binary = &copied.binary;
            if !binary.is_fat()? {
                continue;
            }

            let before = binary.file_size()?;
            if !binary.thin(self.toolchain.as_ref()).await? {
                return Err(Error::Thinning(binary.path().to_path_buf()));
            }
            log::info!(
                "Thinned {} ({} -> {})",
                binary.name(),
                before,
                binary.file_size()?
            );
            thinned += 1;
        }
        Ok(thinned)
    }

    /// Copy catalog frameworks the injected binaries depend on.
    pub async fn copy_known_frameworks(&mut self, catalog: &KnownFrameworks) -> Result<usize> {
        if catalog.frameworks().is_empty() {
            return Ok(0);
        }
        let all = dependencies::all_dependencies(&self.toolchain, &self.copied).await?;
        let selected = catalog.select(all.as_slice());
        self.copy_entries(&selected).await?;
        Ok(selected.len())
    }

    /// Point absolute references between injected binaries at their `@rpath` locations.
    pub async fn repair_broken_paths(&self) -> Result<usize> {
        dependencies::repair_broken_paths(&self.toolchain, &self.copied, &self.layout).await
    }

    /// Make `main_binary` load the injected libraries nothing else loads.
    pub async fn insert_missing_load_commands(&self, main_binary: &MachOBinary) -> Result<Vec<String>> {
        dependencies::insert_missing_load_commands(
            &self.toolchain,
            main_binary,
            &self.copied,
            &self.layout,
        )
        .await
    }
}
