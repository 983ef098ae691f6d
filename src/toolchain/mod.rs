//! Binary toolchain abstraction.
//!
//! Everything that inspects or rewrites a Mach-O file goes through [`Toolchain`]. The
//! production implementation is [`XcodeToolchain`], which drives the command line tools
//! shipped with Xcode (`otool`, `install_name_tool`, `codesign`, `lipo`) plus
//! `insert-dylib`. Tests substitute an in-memory fake.
//!
//! Every operation reports tool failure as `Ok(false)` (or an empty dump) and reserves
//! `Err` for the case where the tool could not be run at all, so callers decide which
//! failures are fatal.
//!
//! | Operation | Tool |
//! |-----------|------|
//! | [`Toolchain::load_commands`] | `otool -l` |
//! | [`Toolchain::dependencies`] | `otool -L` |
//! | [`Toolchain::change_dependency`] | `install_name_tool -change` |
//! | [`Toolchain::insert_dependency`] | `insert-dylib --inplace` |
//! | [`Toolchain::remove_signature`] | `codesign --remove-signature` |
//! | [`Toolchain::sign`] | `codesign -f -s` |
//! | [`Toolchain::dump_entitlements`] | `codesign -d --entitlements` |
//! | [`Toolchain::thin`] | `lipo -thin` |

mod xcode;

#[cfg(test)]
pub(crate) mod fake;

pub use xcode::{ToolchainConfig, XcodeToolchain};
pub(crate) use xcode::resolve_tool;

use crate::error::Result;
use std::future::Future;
use std::path::Path;

/// Architecture every fat binary is reduced to.
pub const THIN_ARCHITECTURE: &str = "arm64";

/// Black-box Mach-O toolchain used by the injection and signing pipeline.
///
/// Implementations must be shareable across tasks: stages fan out one task per binary
/// over an `Arc<T>`.
pub trait Toolchain: Send + Sync + 'static {
    /// Dump the load commands of `binary` as text.
    fn load_commands(&self, binary: &Path) -> impl Future<Output = Result<String>> + Send;

    /// List the dylib records of `binary` in file order.
    ///
    /// For a dylib the first record is its own install name, not a dependency.
    fn dependencies(&self, binary: &Path) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Replace the dependency `old` with `new` in `binary`.
    fn change_dependency(
        &self,
        binary: &Path,
        old: &str,
        new: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Add an `LC_LOAD_DYLIB` for `dependency` to `binary`, in place.
    fn insert_dependency(
        &self,
        binary: &Path,
        dependency: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Strip the code signature from `binary`.
    fn remove_signature(&self, binary: &Path) -> impl Future<Output = Result<bool>> + Send;

    /// Sign `binary` with `identity`, optionally embedding `entitlements`.
    fn sign(
        &self,
        binary: &Path,
        identity: &str,
        entitlements: Option<&Path>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Write the entitlements `binary` was signed with to `output` as XML.
    fn dump_entitlements(
        &self,
        binary: &Path,
        output: &Path,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Reduce a fat `binary` to the single `arch` slice, in place.
    fn thin(&self, binary: &Path, arch: &str) -> impl Future<Output = Result<bool>> + Send;
}
