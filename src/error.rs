//! Error types for injection and re-signing operations.
//!
//! Provides contextual error chaining, filesystem errors that carry the offending path,
//! and the fatal pipeline failures (signature removal, signing, thinning) that terminate
//! a run.
//!
//! # Features
//!
//! - **Context trait**: Add context to errors similar to anyhow
//! - **ErrorExt trait**: Filesystem operations with automatic path context
//!
//! # Example
//!
//! ```no_run
//! use kodegen_bundler_inject::error::{Context, ErrorExt, Result};
//! use std::path::Path;
//!
//! fn read_info(path: &Path) -> Result<plist::Value> {
//!     let bytes = std::fs::read(path).fs_context("reading Info.plist", path)?;
//!     plist::from_bytes::<plist::Value>(&bytes)
//!         .map_err(kodegen_bundler_inject::Error::Plist)
//!         .context("parsing Info.plist")
//! }
//! ```

use std::{
    fmt::Display,
    io,
    path::{self, PathBuf},
};
use thiserror::Error as DeriveError;

/// Errors returned by the injector.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// Error with context. Created by the [`Context`] trait.
    #[error("{0}: {1}")]
    Context(String, Box<Self>),

    /// File system error with path context.
    ///
    /// Created by the [`ErrorExt`] trait's `fs_context` method.
    #[error("{context} {path}: {error}")]
    Fs {
        /// Context describing the operation (e.g., "copying framework")
        context: &'static str,
        /// Path that was being accessed
        path: PathBuf,
        /// The underlying I/O error
        error: io::Error,
    },

    /// An external tool could not be spawned at all.
    #[error("failed to run command {command}: {error}")]
    CommandFailed {
        /// Command that failed to execute
        command: String,
        /// The underlying error
        error: io::Error,
    },

    /// A required toolchain executable was not found.
    #[error("required tool '{tool}' not found: {reason}")]
    ToolNotFound {
        /// Tool name (e.g. `codesign`)
        tool: String,
        /// Why lookup failed
        reason: String,
    },

    /// Removing the existing signature failed for one or more binaries.
    #[error("unable to remove signature from {} binaries: {}", .0.len(), display_paths(.0))]
    SignatureRemoval(Vec<PathBuf>),

    /// Signing failed for one or more binaries.
    #[error("unable to sign {} binaries: {}", .0.len(), display_paths(.0))]
    Signing(Vec<PathBuf>),

    /// Thinning a fat binary failed.
    #[error("unable to thin {0}")]
    Thinning(PathBuf),

    /// Inserting a load command into the main binary failed.
    #[error("unable to insert load command {dependency} into {binary}")]
    LoadCommandInsertion {
        /// Main binary being modified
        binary: PathBuf,
        /// Run-path reference that was being inserted
        dependency: String,
    },

    /// The main application binary is FairPlay encrypted.
    #[error("the main application binary, {0}, is encrypted")]
    EncryptedMainBinary(String),

    /// A replacement entitlement set lacks a key the binary was signed with.
    #[error("entitlement {key} of {binary} has no match in the replacement entitlements")]
    EntitlementDropped {
        /// Entitlement key
        key: String,
        /// Binary name
        binary: String,
    },

    /// Output package already exists and overwriting was not requested.
    #[error("output {0} already exists")]
    OutputExists(PathBuf),

    /// A real identity was given without entitlements.
    #[error("entitlements are required for non ad hoc identity signing")]
    MissingEntitlements,

    /// The target or output is not an application package.
    #[error("invalid application package {path}: {reason}")]
    InvalidPackage {
        /// Offending path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Generic I/O error.
    #[error("{0}")]
    IoError(#[from] io::Error),

    /// Error walking a directory tree.
    #[error("{0}")]
    WalkdirError(#[from] walkdir::Error),

    /// Path prefix stripping error.
    #[error("{0}")]
    StripError(#[from] path::StripPrefixError),

    /// ZIP archive creation/extraction error.
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Property list parsing/writing error.
    #[error("{0}")]
    Plist(#[from] plist::Error),

    /// otool output pattern error.
    #[error("{0}")]
    RegexError(#[from] regex::Error),

    /// A spawned stage task panicked or was aborted.
    #[error("stage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Generic error with custom message.
    #[error("{0}")]
    GenericError(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenient type alias for Result.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            Error::Context(_, inner) => inner.recovery_suggestions(),
            Error::OutputExists(_) => vec![
                "Pass --overwrite to replace the existing output".to_string(),
                "Choose a different output path".to_string(),
            ],
            Error::MissingEntitlements => vec![
                "Pass --entitlements <file> together with --sign".to_string(),
                "Use --profile to take identity and entitlements from a provisioning profile"
                    .to_string(),
                "Use --sign - for ad hoc signing".to_string(),
            ],
            Error::EncryptedMainBinary(_) => vec![
                "Decrypt the application before injecting (FairPlay protected binaries cannot be modified)"
                    .to_string(),
            ],
            Error::ToolNotFound { tool, .. } => vec![
                format!("Install {tool} or put it on PATH"),
                "Install the Xcode Command Line Tools: xcode-select --install".to_string(),
            ],
            Error::Signing(_) => vec![
                "Check the identity is present: security find-identity -v -p codesigning"
                    .to_string(),
                "Verify the entitlements file is a valid property list".to_string(),
            ],
            Error::Thinning(_) => {
                vec!["Verify the binary contains an arm64 slice: lipo -info <binary>".to_string()]
            }
            Error::EntitlementDropped { .. } => vec![
                "Use a provisioning profile that grants the missing capability".to_string(),
                "Drop --strict-entitlements to sign without it".to_string(),
            ],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }
}

/// Trait for adding context to errors.
///
/// Similar to `anyhow::Context` but integrated with the crate's Error type.
/// Works with both `Result<T, E>` and `Option<T>`.
pub trait Context<T> {
    /// Add context to an error.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Add context to an error using a closure (lazy evaluation).
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> Context<T> for Result<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Context(context.to_string(), Box::new(e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context(f().to_string(), Box::new(e)))
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::GenericError(f().to_string()))
    }
}

/// Extension trait for filesystem operations with automatic path context.
pub trait ErrorExt<T> {
    /// Add filesystem context to an I/O error.
    ///
    /// The `context` should be a present-tense verb phrase describing the operation,
    /// e.g., "reading file", "creating directory", "copying binary".
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.into(),
            error,
        })
    }
}
