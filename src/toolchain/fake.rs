//! In-memory [`Toolchain`] for tests.
//!
//! Dependencies, entitlements and encryption state are keyed by path; every invocation is
//! appended to a call log so tests can assert ordering across stages. A key matches any
//! binary whose path ends with it, so bundle-relative keys such as `Demo.app/Demo` work
//! for bundles living in scratch directories.

use super::Toolchain;
use crate::error::Result;
use crate::macho::{MH_MAGIC_64, MachOKind};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    LoadCommands(PathBuf),
    Dependencies(PathBuf),
    ChangeDependency(PathBuf, String, String),
    InsertDependency(PathBuf, String),
    RemoveSignature(PathBuf),
    Sign(PathBuf, String, Option<PathBuf>),
    DumpEntitlements(PathBuf),
    Thin(PathBuf),
}

fn lookup<'a, V>(map: &'a HashMap<PathBuf, V>, binary: &Path) -> Option<&'a V> {
    map.get(binary).or_else(|| {
        map.iter()
            .find(|(key, _)| binary.ends_with(key))
            .map(|(_, value)| value)
    })
}

#[derive(Debug, Default)]
struct State {
    dependencies: HashMap<PathBuf, Vec<String>>,
    entitlements: HashMap<PathBuf, plist::Dictionary>,
    encrypted: HashSet<PathBuf>,
    failing: HashSet<PathBuf>,
    calls: Vec<Call>,
    /// Contents of every entitlements file handed to `sign`, read at call time.
    signed_entitlements: HashMap<PathBuf, plist::Dictionary>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeToolchain {
    state: Mutex<State>,
}

impl FakeToolchain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records for `binary`, first one being its own identity.
    pub(crate) fn set_dependencies(&self, binary: &Path, records: &[&str]) {
        self.lock()
            .dependencies
            .insert(binary.to_path_buf(), records.iter().map(|r| r.to_string()).collect());
    }

    pub(crate) fn set_entitlements(&self, binary: &Path, entitlements: plist::Dictionary) {
        self.lock()
            .entitlements
            .insert(binary.to_path_buf(), entitlements);
    }

    pub(crate) fn set_encrypted(&self, binary: &Path) {
        self.lock().encrypted.insert(binary.to_path_buf());
    }

    /// Make every mutating operation on `binary` report failure.
    pub(crate) fn fail_on(&self, binary: &Path) {
        self.lock().failing.insert(binary.to_path_buf());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub(crate) fn records(&self, binary: &Path) -> Vec<String> {
        lookup(&self.lock().dependencies, binary)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn signed_entitlements(&self, binary: &Path) -> Option<plist::Dictionary> {
        self.lock().signed_entitlements.get(binary).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn succeeds(&self, binary: &Path) -> bool {
        !self.lock().failing.contains(binary)
    }
}

impl Toolchain for FakeToolchain {
    async fn load_commands(&self, binary: &Path) -> Result<String> {
        let mut state = self.lock();
        state.calls.push(Call::LoadCommands(binary.to_path_buf()));
        let encrypted = state.encrypted.iter().any(|key| binary.ends_with(key));
        let cryptid = if encrypted { 1 } else { 0 };
        Ok(format!(
            "Load command 12\n          cmd LC_ENCRYPTION_INFO_64\n      cmdsize 24\n    cryptoff 16384\n    cryptsize 1310720\n      cryptid {cryptid}\n"
        ))
    }

    async fn dependencies(&self, binary: &Path) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.calls.push(Call::Dependencies(binary.to_path_buf()));
        Ok(lookup(&state.dependencies, binary).cloned().unwrap_or_default())
    }

    async fn change_dependency(&self, binary: &Path, old: &str, new: &str) -> Result<bool> {
        let ok = self.succeeds(binary);
        let mut state = self.lock();
        state.calls.push(Call::ChangeDependency(
            binary.to_path_buf(),
            old.to_string(),
            new.to_string(),
        ));
        let key = state
            .dependencies
            .keys()
            .find(|key| binary.ends_with(key))
            .cloned();
        if ok
            && let Some(key) = key
            && let Some(records) = state.dependencies.get_mut(&key)
        {
            for record in records.iter_mut().filter(|r| r.as_str() == old) {
                *record = new.to_string();
            }
        }
        Ok(ok)
    }

    async fn insert_dependency(&self, binary: &Path, dependency: &str) -> Result<bool> {
        let ok = self.succeeds(binary);
        let mut state = self.lock();
        state.calls.push(Call::InsertDependency(
            binary.to_path_buf(),
            dependency.to_string(),
        ));
        if ok {
            state
                .dependencies
                .entry(binary.to_path_buf())
                .or_default()
                .push(dependency.to_string());
        }
        Ok(ok)
    }

    async fn remove_signature(&self, binary: &Path) -> Result<bool> {
        let ok = self.succeeds(binary);
        self.lock()
            .calls
            .push(Call::RemoveSignature(binary.to_path_buf()));
        Ok(ok)
    }

    async fn sign(&self, binary: &Path, identity: &str, entitlements: Option<&Path>) -> Result<bool> {
        let ok = self.succeeds(binary);
        let contents = entitlements
            .and_then(|path| plist::Value::from_file(path).ok())
            .and_then(plist::Value::into_dictionary);

        let mut state = self.lock();
        state.calls.push(Call::Sign(
            binary.to_path_buf(),
            identity.to_string(),
            entitlements.map(Path::to_path_buf),
        ));
        if let Some(contents) = contents {
            state
                .signed_entitlements
                .insert(binary.to_path_buf(), contents);
        }
        Ok(ok)
    }

    async fn dump_entitlements(&self, binary: &Path, output: &Path) -> Result<bool> {
        let entitlements = {
            let mut state = self.lock();
            state.calls.push(Call::DumpEntitlements(binary.to_path_buf()));
            lookup(&state.entitlements, binary).cloned()
        };

        match entitlements {
            Some(entitlements) => {
                plist::Value::Dictionary(entitlements).to_file_xml(output)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn thin(&self, binary: &Path, _arch: &str) -> Result<bool> {
        let ok = self.succeeds(binary);
        self.lock().calls.push(Call::Thin(binary.to_path_buf()));
        if !ok {
            return Ok(false);
        }

        // Keep the first half of the slices, rewritten behind a thin header.
        let data = std::fs::read(binary)?;
        let magic = data
            .get(..4)
            .map(|header| u32::from_le_bytes([header[0], header[1], header[2], header[3]]));
        if magic.and_then(MachOKind::from_magic) != Some(MachOKind::Fat) {
            return Ok(false);
        }
        let mut thinned = MH_MAGIC_64.to_le_bytes().to_vec();
        thinned.extend_from_slice(&data[4..4 + (data.len() - 4) / 2]);
        std::fs::write(binary, thinned)?;
        Ok(true)
    }
}
