//! Command line argument parsing and validation.

use crate::bundle::CompressionLevel;
use crate::config::{self, FRAMEWORKS_DIR_ENV};
use clap::Parser;
use std::path::PathBuf;

/// Inject libraries, frameworks and plugins into iOS app packages and re-sign them
#[derive(Parser, Debug)]
#[command(
    name = "kodegen_bundler_inject",
    version,
    about = "Inject libraries, frameworks and plugins into iOS app packages",
    long_about = "Inject dynamic libraries, frameworks, plugins and Debian packages into an \
iOS application package, repair their load-time dependencies and re-sign the result.

Usage:
  kodegen_bundler_inject App.ipa Patched.ipa -i Tweak.dylib -s -
  kodegen_bundler_inject App.app Patched.ipa -i tweak.deb -p dev.mobileprovision --profile-bundle-id
  kodegen_bundler_inject App.ipa Patched.app -i Kit.framework -s \"Apple Development: Dev\" -e app.plist"
)]
pub struct Args {
    /// The application package, either a .app bundle or an ipa archive
    #[arg(index = 1, value_name = "TARGET", value_parser = parse_package_path)]
    pub target: PathBuf,

    /// The output application package, either a .app bundle or an ipa archive
    #[arg(index = 2, value_name = "OUTPUT", value_parser = parse_package_path)]
    pub output: PathBuf,

    /// Overwrite the output if it already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Compression level for archive output
    #[arg(long, visible_alias = "level", value_enum, default_value_t = CompressionLevel::Fastest)]
    pub compression_level: CompressionLevel,

    /// Entries to inject (Debian packages, dylibs, frameworks, plugins and bundles)
    #[arg(short = 'i', long, num_args = 1.., value_name = "ITEM")]
    pub items: Vec<PathBuf>,

    /// Provisioning profile supplying entitlements, signing identity and bundle ID
    #[arg(short = 'p', long, value_name = "PROFILE", conflicts_with_all = ["sign", "entitlements"])]
    pub profile: Option<PathBuf>,

    /// Replace the bundle ID with the one in the provisioning profile
    #[arg(long, requires = "profile", conflicts_with = "bundle_id")]
    pub profile_bundle_id: bool,

    /// Code signing identity ("-" for ad hoc signing)
    #[arg(short = 's', long = "sign", value_name = "IDENTITY")]
    pub sign: Option<String>,

    /// Entitlements written into main executables
    #[arg(short = 'e', long, value_name = "FILE", requires = "sign")]
    pub entitlements: Option<PathBuf>,

    /// Custom identifier applied to every bundle in the package
    #[arg(short = 'b', long, value_name = "ID")]
    pub bundle_id: Option<String>,

    /// Enable documents support (file sharing) for the application
    #[arg(short = 'd', long)]
    pub enable_documents_support: bool,

    /// Remove the supported devices property
    #[arg(short = 'u', long)]
    pub remove_supported_devices: bool,

    /// Directories to remove from the app package, e.g. PlugIns, Watch, AppClip
    #[arg(short = 'r', long, num_args = 1.., value_name = "DIR")]
    pub remove_directories: Vec<String>,

    /// Fail instead of warning when an original entitlement has no replacement
    #[arg(long)]
    pub strict_entitlements: bool,

    /// Directory of frameworks injected automatically when referenced
    #[arg(long, env = FRAMEWORKS_DIR_ENV, value_name = "DIR")]
    pub frameworks_dir: Option<PathBuf>,

    /// Show debug output
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

fn parse_package_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if config::is_application_package(&path) {
        Ok(path)
    } else {
        Err(format!(
            "'{value}' is not an application package (expected .app or .ipa)"
        ))
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.target == self.output {
            return Err("Output must differ from the target package".to_string());
        }
        if let Some(missing) = self.items.iter().find(|item| !item.exists()) {
            return Err(format!("Injection entry {} does not exist", missing.display()));
        }
        Ok(())
    }

    /// Known framework catalog directory.
    pub fn frameworks_dir(&self) -> PathBuf {
        self.frameworks_dir
            .clone()
            .unwrap_or_else(config::default_frameworks_dir)
    }

    /// Default log filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
}

impl RuntimeConfig {
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print success message
    pub fn success_println(&self, message: &str) {
        written(self.output.success(message));
    }

    /// Print warning message
    pub fn warn_println(&self, message: &str) {
        written(self.output.warn(message));
    }

    /// Print message in verbose mode only
    pub fn verbose_println(&self, message: &str) {
        written(self.output.verbose(message));
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        written(self.output.indent(message));
    }

    /// Print message
    pub fn println(&self, message: &str) {
        written(self.output.println(message));
    }
}

/// Terminal output is best effort; a failed write is only logged.
pub fn written(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(error) => {
            log::debug!("Failed to write to the terminal: {}", error);
            false
        }
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
        }
    }
}
