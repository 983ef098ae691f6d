//! Mach-O binary classification.
//!
//! Binaries are recognised purely by the magic number in their first four bytes. Anything
//! that is neither a thin Mach-O nor a fat (universal) container is ignored by the bundle
//! scans.

use crate::error::{ErrorExt, Result};
use crate::toolchain::{THIN_ARCHITECTURE, Toolchain};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Fat header, native byte order.
pub const FAT_MAGIC: u32 = 0xcafebabe;
/// 64-bit fat header, native byte order.
pub const FAT_MAGIC_64: u32 = 0xcafebabf;
/// Fat header, swapped.
pub const FAT_CIGAM: u32 = 0xbebafeca;
/// 64-bit fat header, swapped.
pub const FAT_CIGAM_64: u32 = 0xbfbafeca;

/// 32-bit Mach-O header, native byte order.
pub const MH_MAGIC: u32 = 0xfeedface;
/// 64-bit Mach-O header, native byte order.
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
/// 32-bit Mach-O header, swapped.
pub const MH_CIGAM: u32 = 0xcefaedfe;
/// 64-bit Mach-O header, swapped.
pub const MH_CIGAM_64: u32 = 0xcffaedfe;

const FAT_HEADERS: [u32; 4] = [FAT_MAGIC, FAT_MAGIC_64, FAT_CIGAM, FAT_CIGAM_64];
const MH_HEADERS: [u32; 4] = [MH_MAGIC, MH_MAGIC_64, MH_CIGAM, MH_CIGAM_64];

/// Marker `otool -l` prints for a FairPlay protected segment.
const ENCRYPTED_SEGMENT_MARKER: &str = "cryptid 1";

/// Layout of a recognised binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachOKind {
    /// Single-architecture Mach-O.
    Thin,
    /// Universal container holding several slices.
    Fat,
}

impl MachOKind {
    /// Classify a little-endian header word.
    pub fn from_magic(magic: u32) -> Option<Self> {
        if MH_HEADERS.contains(&magic) {
            Some(Self::Thin)
        } else if FAT_HEADERS.contains(&magic) {
            Some(Self::Fat)
        } else {
            None
        }
    }

    /// Classify the file at `path`; `None` for anything that is not a Mach-O.
    pub fn of_file(path: &Path) -> Result<Option<Self>> {
        Ok(read_magic(path)?.and_then(Self::from_magic))
    }
}

/// Read the first four bytes of `path` as a little-endian word.
///
/// Files shorter than four bytes have no magic.
pub fn read_magic(path: &Path) -> Result<Option<u32>> {
    let mut file = File::open(path).fs_context("opening binary", path)?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let read = file
            .read(&mut magic[filled..])
            .fs_context("reading binary header", path)?;
        if read == 0 {
            return Ok(None);
        }
        filled += read;
    }
    Ok(Some(u32::from_le_bytes(magic)))
}

/// A Mach-O file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachOBinary {
    path: PathBuf,
}

impl MachOBinary {
    /// Wrap `path`; the file is not read until asked.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Full path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether the file is currently a universal container.
    pub fn is_fat(&self) -> Result<bool> {
        Ok(MachOKind::of_file(&self.path)? == Some(MachOKind::Fat))
    }

    /// Human readable size, for log lines.
    pub fn file_size(&self) -> Result<String> {
        let metadata = std::fs::metadata(&self.path).fs_context("reading metadata", &self.path)?;
        Ok(format_size(metadata.len()))
    }

    /// Whether the binary carries a FairPlay encrypted segment.
    pub async fn is_encrypted<T: Toolchain>(&self, toolchain: &T) -> Result<bool> {
        let load_commands = toolchain.load_commands(&self.path).await?;
        Ok(load_commands.contains(ENCRYPTED_SEGMENT_MARKER))
    }

    /// Reduce the binary to its arm64 slice in place.
    pub async fn thin<T: Toolchain>(&self, toolchain: &T) -> Result<bool> {
        toolchain.thin(&self.path, THIN_ARCHITECTURE).await
    }
}

/// Encryption state of a scanned bundle.
#[derive(Debug, Default)]
pub struct EncryptionInfo {
    /// The app's main executable is encrypted; nothing can be injected.
    pub is_main_binary_encrypted: bool,
    /// Other encrypted binaries, which keep working only if left untouched.
    pub encrypted_binaries: Vec<MachOBinary>,
}

/// Format a byte count as bytes, KB, MB or GB with one decimal.
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match size {
        s if s < KB => format!("{s} bytes"),
        s if s < MB => format!("{:.1} KB", s as f64 / KB as f64),
        s if s < GB => format!("{:.1} MB", s as f64 / MB as f64),
        s => format!("{:.1} GB", s as f64 / GB as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::fake::FakeToolchain;

    fn write_with_magic(dir: &Path, name: &str, magic: u32, len: usize) -> PathBuf {
        let path = dir.join(name);
        let mut data = magic.to_le_bytes().to_vec();
        data.resize(len.max(4), 0xAB);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_thin_magics_classify_as_thin() {
        let dir = tempfile::tempdir().unwrap();
        for (i, magic) in MH_HEADERS.iter().enumerate() {
            let path = write_with_magic(dir.path(), &format!("thin{i}"), *magic, 64);
            assert_eq!(MachOKind::of_file(&path).unwrap(), Some(MachOKind::Thin));
            assert!(!MachOBinary::new(&path).is_fat().unwrap());
        }
    }

    #[test]
    fn test_fat_magics_classify_as_fat() {
        let dir = tempfile::tempdir().unwrap();
        for (i, magic) in FAT_HEADERS.iter().enumerate() {
            let path = write_with_magic(dir.path(), &format!("fat{i}"), *magic, 64);
            assert_eq!(MachOKind::of_file(&path).unwrap(), Some(MachOKind::Fat));
            assert!(MachOBinary::new(&path).is_fat().unwrap());
        }
    }

    #[test]
    fn test_other_files_are_not_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let plist = dir.path().join("Info.plist");
        std::fs::write(&plist, "<?xml version=\"1.0\"?>").unwrap();
        let short = dir.path().join("short");
        std::fs::write(&short, [0xfe, 0xed]).unwrap();

        assert_eq!(MachOKind::of_file(&plist).unwrap(), None);
        assert_eq!(MachOKind::of_file(&short).unwrap(), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[tokio::test]
    async fn test_thinning_shrinks_and_yields_thin_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_with_magic(dir.path(), "libfat.dylib", FAT_MAGIC, 4096);
        let binary = MachOBinary::new(&path);
        let before = std::fs::metadata(&path).unwrap().len();

        assert!(binary.thin(&FakeToolchain::new()).await.unwrap());

        assert!(std::fs::metadata(&path).unwrap().len() < before);
        assert_eq!(MachOKind::of_file(&path).unwrap(), Some(MachOKind::Thin));
    }

    #[tokio::test]
    async fn test_encryption_marker() {
        let toolchain = FakeToolchain::new();
        let plain = MachOBinary::new("/bundle/Plain");
        let protected = MachOBinary::new("/bundle/Protected");
        toolchain.set_encrypted(protected.path());

        assert!(!plain.is_encrypted(&toolchain).await.unwrap());
        assert!(protected.is_encrypted(&toolchain).await.unwrap());
    }
}
