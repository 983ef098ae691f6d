//! Application bundle handling.
//!
//! Loads the target package (an `.app` directory or an `.ipa` archive) into scratch space,
//! applies Info.plist modifications, and writes the result back out.
//!
//! # Layout
//!
//! ```text
//! <scratch>/Payload/MyApp.app/
//! ├── Info.plist
//! ├── MyApp                 main executable
//! ├── Frameworks/           dylibs and .framework bundles
//! └── PlugIns/              .appex extensions
//! ```

pub mod archive;
pub mod info;
pub mod layout;
pub mod package;

pub use archive::CompressionLevel;
pub use layout::{BundleLayout, PackageInfo};
pub use package::{OutputOutcome, PackageManager};
