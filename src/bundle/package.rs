//! Loading, modifying and writing out application packages.
//!
//! The target package is never touched: a `.app` directory is copied and an archive is
//! extracted into a scratch `Payload/` directory, all work happens on that copy, and the
//! copy is written to the output at the end.

use super::archive::{self, CompressionLevel, PAYLOAD_DIRECTORY};
use super::info::{self, UI_FILE_SHARING_ENABLED, UI_SUPPORTED_DEVICES, UI_SUPPORTS_DOCUMENT_BROWSER};
use super::layout::PackageInfo;
use crate::config::PackagingInfo;
use crate::error::{Context, Error, ErrorExt, Result};
use crate::utils::fs::{copy_dir, remove_existing};
use crate::utils::scratch::ScratchDir;
use plist::{Dictionary, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const INFO_PLIST: &str = "Info.plist";

/// Whether writing the output created a new package or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOutcome {
    Created,
    Replaced,
}

/// Owns the scratch copy of the application package.
#[derive(Debug)]
pub struct PackageManager {
    scratch: ScratchDir,
    info_plist: PathBuf,
    info: Dictionary,
    package_info: PackageInfo,
}

impl PackageManager {
    /// Copy or extract `target` into scratch space and read its Info.plist.
    pub async fn load(target: &Path) -> Result<Self> {
        let scratch = ScratchDir::new()?;
        let payload = scratch.path().join(PAYLOAD_DIRECTORY);
        let package_name = file_name(target);

        let bundle = if target.is_dir() {
            let bundle = payload.join(&package_name);
            copy_dir(target, &bundle).await?;
            log::info!("Copied {}", package_name);
            bundle
        } else if target.is_file() {
            archive::extract_archive(target, scratch.path()).await?;
            log::info!("Extracted {}", package_name);
            first_directory(&payload)?
        } else {
            return Err(Error::InvalidPackage {
                path: target.to_path_buf(),
                reason: "no such file or directory".to_string(),
            });
        };

        let info_plist = bundle.join(INFO_PLIST);
        let info = info::read_dictionary(&info_plist)?;
        let package_info = PackageInfo::new(
            &bundle,
            info::bundle_executable(&info)?,
            info::bundle_identifier(&info)?.to_string(),
        );

        Ok(Self {
            scratch,
            info_plist,
            info,
            package_info,
        })
    }

    /// Executable, identifier and layout of the loaded bundle.
    pub fn package_info(&self) -> &PackageInfo {
        &self.package_info
    }

    fn bundle_dir(&self) -> &Path {
        self.package_info.layout.bundle_dir()
    }

    fn payload_dir(&self) -> PathBuf {
        self.scratch.path().join(PAYLOAD_DIRECTORY)
    }

    /// Apply the requested Info.plist and directory changes to the bundle.
    pub async fn apply_modifications(&mut self, packaging: &PackagingInfo) -> Result<()> {
        for directory in &packaging.directories_to_remove {
            let path = self.bundle_dir().join(directory);
            if remove_existing(&path).await? {
                log::info!("Removed {} directory from the app package", directory);
            } else {
                log::warn!("Directory {} is not present in the app package", directory);
            }
        }

        if packaging.remove_supported_devices {
            if self.info.remove(UI_SUPPORTED_DEVICES).is_some() {
                log::info!("Removed supported devices property");
            } else {
                log::warn!("Unable to remove supported devices property, the key is not present");
            }
        }

        if packaging.enable_documents_support {
            self.info
                .insert(UI_SUPPORTS_DOCUMENT_BROWSER.to_string(), Value::Boolean(true));
            self.info
                .insert(UI_FILE_SHARING_ENABLED.to_string(), Value::Boolean(true));
            log::info!("Enabled documents support for the application");
        }

        info::write_dictionary(&self.info, &self.info_plist)?;

        if let Some(custom_id) = &packaging.custom_bundle_id {
            self.replace_bundle_identifiers(custom_id)?;
        }
        Ok(())
    }

    /// Rewrite the package identifier in every Info.plist of the bundle.
    fn replace_bundle_identifiers(&mut self, custom_id: &str) -> Result<()> {
        let package_id = self.package_info.bundle_identifier.clone();
        let mut replaced = 0usize;

        for entry in WalkDir::new(self.bundle_dir()) {
            let entry = entry?;
            if !entry.file_type().is_file() || entry.file_name() != INFO_PLIST {
                continue;
            }

            let mut dictionary = info::read_dictionary(entry.path())?;
            if info::replace_bundle_identifiers(&mut dictionary, &package_id, custom_id) {
                info::write_dictionary(&dictionary, entry.path())?;
                replaced += 1;
            }
        }

        // Keep the in-memory copy of the main Info.plist in sync.
        self.info = info::read_dictionary(&self.info_plist)?;
        log::info!("Replaced bundle identifier of {} bundles", replaced);
        Ok(())
    }

    /// Write the bundle to `output`: a directory copy for `.app`, an archive otherwise.
    pub async fn create_output(
        &self,
        output: &Path,
        overwrite: bool,
        level: CompressionLevel,
    ) -> Result<OutputOutcome> {
        if output.exists() && !overwrite {
            return Err(Error::OutputExists(output.to_path_buf()));
        }
        let outcome = if remove_existing(output).await? {
            OutputOutcome::Replaced
        } else {
            OutputOutcome::Created
        };

        let name = file_name(output);
        if is_app_directory(output) {
            copy_dir(self.bundle_dir(), output).await?;
            log::info!(
                "{} {}",
                if outcome == OutputOutcome::Replaced { "Replaced" } else { "Copied" },
                name
            );
        } else {
            self.remove_hidden_payload_files().await?;
            archive::create_archive(&self.payload_dir(), output, level).await?;
            log::info!(
                "{} {}",
                if outcome == OutputOutcome::Replaced { "Replaced" } else { "Created" },
                name
            );
        }
        Ok(outcome)
    }

    async fn remove_hidden_payload_files(&self) -> Result<()> {
        let payload = self.payload_dir();
        let mut entries = tokio::fs::read_dir(&payload)
            .await
            .fs_context("reading directory", &payload)?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .fs_context("reading directory", &payload)?
        {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') && entry.path().is_file() {
                tokio::fs::remove_file(entry.path())
                    .await
                    .fs_context("removing file", entry.path())?;
                log::warn!("Removed {} from the app package", name.to_string_lossy());
            }
        }
        Ok(())
    }
}

/// Whether `path` names an `.app` bundle directory rather than an archive.
pub fn is_app_directory(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "app")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn first_directory(payload: &Path) -> Result<PathBuf> {
    let mut directories = std::fs::read_dir(payload)
        .fs_context("reading directory", payload)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    directories.sort();
    directories
        .into_iter()
        .next()
        .with_context(|| format!("no application bundle in {}", payload.display()))
}
