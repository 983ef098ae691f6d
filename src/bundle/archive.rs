//! Application archive extraction and creation.
//!
//! An application archive is a zip whose single top-level directory is `Payload/`, holding
//! the `.app` bundle. Both directions preserve Unix permissions and symlinks, which
//! framework bundles rely on.

use crate::error::{Error, ErrorExt, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the top-level archive directory.
pub const PAYLOAD_DIRECTORY: &str = "Payload";

/// Compression applied to archive output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CompressionLevel {
    /// Balanced speed and size.
    Optimal,
    /// Fastest deflate.
    #[default]
    Fastest,
    /// Store entries uncompressed.
    NoCompression,
    /// Maximum deflate.
    SmallestSize,
}

impl CompressionLevel {
    fn file_options(self) -> SimpleFileOptions {
        let deflate_level = match self {
            Self::NoCompression => {
                return SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            }
            Self::Fastest => 1,
            Self::Optimal => 6,
            Self::SmallestSize => 9,
        };
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(deflate_level))
    }
}

/// Extract the archive at `archive` into `destination`.
pub async fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive).fs_context("opening archive", &archive)?;
        let mut zip = ZipArchive::new(file)?;
        fs::create_dir_all(&destination).fs_context("creating directory", &destination)?;
        zip.extract(&destination)?;
        Ok(())
    })
    .await?
}

/// Zip `payload` into `output`, every entry under `Payload/`.
pub async fn create_archive(payload: &Path, output: &Path, level: CompressionLevel) -> Result<()> {
    let payload = payload.to_path_buf();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || write_archive(&payload, &output, level)).await?
}

fn write_archive(payload: &Path, output: &Path, level: CompressionLevel) -> Result<()> {
    if !payload.is_dir() {
        return Err(Error::InvalidPackage {
            path: payload.to_path_buf(),
            reason: "payload is not a directory".to_string(),
        });
    }
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).fs_context("creating directory", parent)?;
    }

    let file = File::create(output).fs_context("creating archive", output)?;
    let mut zip = ZipWriter::new(file);
    let options = level.file_options();

    for entry in WalkDir::new(payload).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(payload)?;
        let name = archive_name(relative);

        let metadata = fs::symlink_metadata(entry.path())
            .fs_context("reading metadata", entry.path())?;

        if metadata.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(entry.path()).fs_context("reading symlink", entry.path())?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
        } else {
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                options.unix_permissions(metadata.permissions().mode())
            };

            zip.start_file(name, options)?;
            let mut source = File::open(entry.path()).fs_context("opening file", entry.path())?;
            io::copy(&mut source, &mut zip).fs_context("archiving file", entry.path())?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Archive entry name for a path relative to the payload, with `/` separators.
fn archive_name(relative: &Path) -> String {
    let mut name = PathBuf::from(PAYLOAD_DIRECTORY);
    name.push(relative);
    name.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
