//! # Kodegen Bundler Inject
//!
//! Injection of dynamic libraries, frameworks and plugins into iOS application packages.
//!
//! A run loads an `.app` bundle or `.ipa` archive into scratch space, copies the requested
//! entries into the bundle (expanding Debian packages), reduces fat binaries to `arm64`,
//! pulls in known companion frameworks, rewrites absolute dependency references to
//! `@rpath`, then strips every signature, adds the missing load commands to the main
//! executable and signs everything again with merged entitlements.
//!
//! ## Usage
//!
//! ```bash
//! kodegen_bundler_inject App.ipa Patched.ipa -i Tweak.dylib -s -
//! kodegen_bundler_inject App.ipa Patched.ipa -i tweak.deb -p dev.mobileprovision --profile-bundle-id
//! ```
//!
//! Binary inspection and signing go through the [`toolchain::Toolchain`] trait; the
//! shipped implementation drives the Xcode command line tools.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod bundle;
pub mod cli;
pub mod codesign;
pub mod config;
pub mod error;
pub mod injection;
pub mod macho;
pub mod pipeline;
pub mod profile;
pub mod stage;
pub mod toolchain;
pub mod utils;

pub use bundle::{BundleLayout, CompressionLevel, PackageInfo, PackageManager};
pub use cli::Args;
pub use codesign::{CodesigningManager, SigningState};
pub use config::{InjectParameters, PackagingInfo, SigningInfo};
pub use error::{Error, Result};
pub use injection::{EntryKind, InjectionEntry, InjectionManager};
pub use macho::MachOBinary;
pub use pipeline::{InjectionSummary, Injector};
pub use toolchain::{Toolchain, ToolchainConfig, XcodeToolchain};
