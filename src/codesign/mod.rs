//! Re-signing of a patched bundle.
//!
//! [`CodesigningManager`] drives the per-binary stages: entitlements are saved from the
//! original signatures, every signature is stripped, the main binary gets its missing
//! load commands, and everything is signed again, main binary last.

pub mod entitlements;
pub mod manager;

pub use entitlements::{EntitlementsStore, merge_entitlements};
pub use manager::{CodesigningManager, SigningState};
