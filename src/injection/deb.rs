//! Debian package expansion.
//!
//! A `.deb` is an `ar` archive whose `data.tar[.*]` member holds the payload. The payload
//! is unpacked into a scratch directory and every injectable file or directory found in
//! it becomes an entry of its own. Expansion is one level deep: a `.deb` inside the
//! payload is dropped.

use super::entry::{EntryKind, InjectionEntry};
use crate::error::{Context, Error, ErrorExt, Result};
use crate::utils::scratch::ScratchDir;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use walkdir::WalkDir;

/// Entries unpacked from one package.
///
/// The entries point into scratch space, which is removed when this value is dropped.
#[derive(Debug)]
pub struct ExpandedPackage {
    scratch: ScratchDir,
    entries: Vec<InjectionEntry>,
}

impl ExpandedPackage {
    pub fn entries(&self) -> &[InjectionEntry] {
        &self.entries
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Unpack the Debian package `entry` and collect its injectable contents.
pub async fn expand(entry: &InjectionEntry) -> Result<ExpandedPackage> {
    if entry.kind() != EntryKind::ContainerPackage {
        return Err(Error::InvalidPackage {
            path: entry.path().to_path_buf(),
            reason: "not a Debian package".to_string(),
        });
    }

    let scratch = ScratchDir::new()?;
    let root = scratch.path().to_path_buf();

    let members = {
        let deb = entry.path().to_path_buf();
        let root = root.clone();
        tokio::task::spawn_blocking(move || extract_ar(&deb, &root)).await??
    };

    let data = members
        .iter()
        .find(|member| {
            member
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("data"))
        })
        .cloned()
        .with_context(|| format!("{} has no data archive", entry.name()))?;

    extract_data(&data, &root).await?;

    let entries = collect_entries(&root)?;
    log::info!(
        "{} entries within {} will be injected",
        entries.len(),
        entry.name()
    );

    Ok(ExpandedPackage { scratch, entries })
}

/// Write every member of the `ar` archive at `deb` into `destination`.
fn extract_ar(deb: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(deb).fs_context("opening package", deb)?;
    let mut archive = ar::Archive::new(file);
    let mut members = Vec::new();

    while let Some(member) = archive.next_entry() {
        let mut member = member.fs_context("reading package member", deb)?;
        let identifier = String::from_utf8_lossy(member.header().identifier()).into_owned();
        let name = identifier.trim_end_matches('/');
        if name.is_empty() || name.contains('/') || name == ".." {
            log::warn!("Skipping package member with unusable name {:?}", identifier);
            continue;
        }

        let path = destination.join(name);
        let mut output = File::create(&path).fs_context("creating file", &path)?;
        io::copy(&mut member, &mut output).fs_context("extracting package member", &path)?;
        members.push(path);
    }

    Ok(members)
}

/// Unpack the payload archive `data` into `destination`.
///
/// Plain and gzip tarballs are read in process; other compressions go through the
/// system `tar`.
async fn extract_data(data: &Path, destination: &Path) -> Result<()> {
    let name = data
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let gzip = !name.ends_with(".tar");
        let data = data.to_path_buf();
        let destination = destination.to_path_buf();
        return tokio::task::spawn_blocking(move || -> Result<()> {
            let file = File::open(&data).fs_context("opening data archive", &data)?;
            if gzip {
                tar::Archive::new(GzDecoder::new(file))
                    .unpack(&destination)
                    .fs_context("unpacking data archive", &data)?;
            } else {
                tar::Archive::new(file)
                    .unpack(&destination)
                    .fs_context("unpacking data archive", &data)?;
            }
            Ok(())
        })
        .await?;
    }

    let tar = which::which("tar").unwrap_or_else(|_| PathBuf::from("tar"));
    let output = Command::new(&tar)
        .arg("-xf")
        .arg(data)
        .arg("-C")
        .arg(destination)
        .output()
        .await
        .map_err(|error| Error::CommandFailed {
            command: format!("tar -xf {}", data.display()),
            error,
        })?;

    if !output.status.success() {
        return Err(Error::GenericError(format!(
            "tar failed to unpack {}: {}",
            name,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Files first, then directories, each sorted; Unknown entries and nested packages dropped.
fn collect_entries(root: &Path) -> Result<Vec<InjectionEntry>> {
    let mut files = Vec::new();
    let mut directories = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            directories.push(entry.into_path());
        } else {
            files.push(entry.into_path());
        }
    }

    Ok(files
        .into_iter()
        .chain(directories)
        .map(InjectionEntry::new)
        .filter(|entry| match entry.kind() {
            EntryKind::Unknown => false,
            EntryKind::ContainerPackage => {
                log::warn!("Ignoring nested package {}", entry.name());
                false
            }
            _ => true,
        })
        .collect())
}
