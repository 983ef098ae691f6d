//! [`Toolchain`] backed by the Xcode command line tools.

use super::Toolchain;
use crate::error::{Error, Result};
use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

/// Locations of the external executables.
///
/// Each tool is looked up on `PATH` unless its environment variable names an explicit
/// path, e.g. `KODEGEN_INSERT_DYLIB=/opt/bin/insert-dylib`.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// `otool`
    pub otool: PathBuf,
    /// `install_name_tool`
    pub install_name_tool: PathBuf,
    /// `insert-dylib`
    pub insert_dylib: PathBuf,
    /// `codesign`
    pub codesign: PathBuf,
    /// `lipo`
    pub lipo: PathBuf,
}

impl ToolchainConfig {
    /// Resolve every tool from the environment and `PATH`.
    pub fn from_env() -> Self {
        Self {
            otool: resolve_tool("otool", "KODEGEN_OTOOL"),
            install_name_tool: resolve_tool("install_name_tool", "KODEGEN_INSTALL_NAME_TOOL"),
            insert_dylib: resolve_tool("insert-dylib", "KODEGEN_INSERT_DYLIB"),
            codesign: resolve_tool("codesign", "KODEGEN_CODESIGN"),
            lipo: resolve_tool("lipo", "KODEGEN_LIPO"),
        }
    }

    fn tools(&self) -> [&Path; 5] {
        [
            &self.otool,
            &self.install_name_tool,
            &self.insert_dylib,
            &self.codesign,
            &self.lipo,
        ]
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

pub(crate) fn resolve_tool(name: &str, env_var: &str) -> PathBuf {
    if let Ok(path) = std::env::var(env_var) {
        log::debug!("Using {} from {}: {}", name, env_var, path);
        return PathBuf::from(path);
    }

    match which::which(name) {
        Ok(path) => {
            log::debug!("Found {} at: {}", name, path.display());
            path
        }
        Err(e) => {
            log::debug!("{} not found in PATH: {}", name, e);
            PathBuf::from(name)
        }
    }
}

/// Toolchain that shells out to `otool`, `install_name_tool`, `insert-dylib`,
/// `codesign` and `lipo`.
#[derive(Debug)]
pub struct XcodeToolchain {
    config: ToolchainConfig,
    dylib_record: Regex,
}

impl XcodeToolchain {
    /// Create a toolchain from resolved tool locations.
    pub fn new(config: ToolchainConfig) -> Result<Self> {
        Ok(Self {
            config,
            dylib_record: Regex::new(r"(?m)^\s*([/@].*) \(.*\)$")?,
        })
    }

    /// Fail early when a tool is neither an existing file nor on `PATH`.
    pub fn ensure_available(&self) -> Result<()> {
        for tool in self.config.tools() {
            if tool.is_absolute() && tool.is_file() {
                continue;
            }
            which::which(tool).map_err(|e| Error::ToolNotFound {
                tool: tool.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn parse_dependencies(&self, otool_output: &str) -> Vec<String> {
        self.dylib_record
            .captures_iter(otool_output)
            .filter_map(|captures| captures.get(1))
            .map(|record| record.as_str().to_string())
            .collect()
    }
}

async fn run<I, S>(tool: &Path, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|error| Error::CommandFailed {
            command: tool.display().to_string(),
            error,
        })?;

    if !output.status.success() {
        log::debug!(
            "{} exited with {:?}: {}",
            tool.display(),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(output)
}

impl Toolchain for XcodeToolchain {
    async fn load_commands(&self, binary: &Path) -> Result<String> {
        let output = run(&self.config.otool, [OsStr::new("-l"), binary.as_os_str()]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn dependencies(&self, binary: &Path) -> Result<Vec<String>> {
        let output = run(&self.config.otool, [OsStr::new("-L"), binary.as_os_str()]).await?;
        Ok(self.parse_dependencies(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn change_dependency(&self, binary: &Path, old: &str, new: &str) -> Result<bool> {
        let output = run(
            &self.config.install_name_tool,
            [
                OsStr::new("-change"),
                OsStr::new(old),
                OsStr::new(new),
                binary.as_os_str(),
            ],
        )
        .await?;
        Ok(output.status.success())
    }

    async fn insert_dependency(&self, binary: &Path, dependency: &str) -> Result<bool> {
        let output = run(
            &self.config.insert_dylib,
            [
                OsStr::new(dependency),
                binary.as_os_str(),
                OsStr::new("--all-yes"),
                OsStr::new("--inplace"),
            ],
        )
        .await?;
        Ok(output.status.success())
    }

    async fn remove_signature(&self, binary: &Path) -> Result<bool> {
        let output = run(
            &self.config.codesign,
            [OsStr::new("--remove-signature"), binary.as_os_str()],
        )
        .await?;
        Ok(output.status.success())
    }

    async fn sign(&self, binary: &Path, identity: &str, entitlements: Option<&Path>) -> Result<bool> {
        let mut args = vec![OsStr::new("-f"), OsStr::new("-s"), OsStr::new(identity)];
        if let Some(entitlements) = entitlements {
            args.push(OsStr::new("--entitlements"));
            args.push(entitlements.as_os_str());
        }
        args.push(binary.as_os_str());

        let output = run(&self.config.codesign, args).await?;
        Ok(output.status.success())
    }

    async fn dump_entitlements(&self, binary: &Path, output_path: &Path) -> Result<bool> {
        let output = run(
            &self.config.codesign,
            [
                OsStr::new("-d"),
                OsStr::new("--entitlements"),
                output_path.as_os_str(),
                OsStr::new("--xml"),
                binary.as_os_str(),
            ],
        )
        .await?;
        Ok(output.status.success())
    }

    async fn thin(&self, binary: &Path, arch: &str) -> Result<bool> {
        // lipo -thin <arch> <binary> -output <binary>
        let output = run(
            &self.config.lipo,
            [
                OsStr::new("-thin"),
                OsStr::new(arch),
                binary.as_os_str(),
                OsStr::new("-output"),
                binary.as_os_str(),
            ],
        )
        .await?;
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> XcodeToolchain {
        XcodeToolchain::new(ToolchainConfig {
            otool: "otool".into(),
            install_name_tool: "install_name_tool".into(),
            insert_dylib: "insert-dylib".into(),
            codesign: "codesign".into(),
            lipo: "lipo".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_dylib_records_in_order() {
        let output = "/tmp/Payload/App.app/Frameworks/Foo.framework/Foo:\n\
            \t@rpath/Foo.framework/Foo (compatibility version 1.0.0, current version 1.0.0)\n\
            \t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1311.0.0)\n\
            \t/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate (compatibility version 0.0.0, current version 0.0.0)\n";

        assert_eq!(
            toolchain().parse_dependencies(output),
            vec![
                "@rpath/Foo.framework/Foo",
                "/usr/lib/libSystem.B.dylib",
                "/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate",
            ]
        );
    }

    #[test]
    fn test_parse_skips_architecture_headers() {
        let output = "/tmp/libfat.dylib (architecture arm64):\n\
            \t@rpath/libfat.dylib (compatibility version 1.0.0, current version 1.0.0)\n";

        assert_eq!(
            toolchain().parse_dependencies(output),
            vec!["@rpath/libfat.dylib"]
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(toolchain().parse_dependencies("").is_empty());
    }
}
