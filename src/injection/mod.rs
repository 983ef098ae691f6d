//! Injection of libraries, frameworks, plugins and resources into a bundle.
//!
//! Entries are classified by extension ([`EntryKind`]), Debian packages are expanded into
//! their contents, and everything is copied to its place in the bundle by
//! [`InjectionManager`], which records the binaries it brought in. Dependency repair
//! then rewrites references between those binaries so they resolve through `@rpath`.

pub mod copied;
pub mod deb;
pub mod dependencies;
pub mod entry;
pub mod known;
pub mod manager;

pub use copied::CopiedBinary;
pub use entry::{EntryKind, InjectionEntry};
pub use known::KnownFrameworks;
pub use manager::{CopyOutcome, InjectionManager};
