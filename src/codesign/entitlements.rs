//! Saving and merging entitlements.
//!
//! Before signatures are stripped, the entitlements every main executable was signed
//! with are dumped to transient files. At signing time each saved set is reconciled
//! with the replacement set (usually from a provisioning profile). Keychain access groups
//! keep their suffix under the new team whatever the replacement says. Other keys take
//! the replacement's value, or are dropped when the replacement lacks them.

use crate::error::{Context, Error, Result};
use crate::macho::MachOBinary;
use crate::stage;
use crate::toolchain::Toolchain;
use crate::utils::scratch::transient_file;
use plist::{Dictionary, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

pub const KEYCHAIN_ACCESS_GROUPS: &str = "keychain-access-groups";
pub const TEAM_IDENTIFIER: &str = "com.apple.developer.team-identifier";
pub const APPLICATION_IDENTIFIER: &str = "application-identifier";

/// Team of a replacement entitlement set.
///
/// Taken from `com.apple.developer.team-identifier`, falling back to the prefix of
/// `application-identifier`.
pub fn team_identifier(entitlements: &Dictionary) -> Result<String> {
    if let Some(team) = entitlements.get(TEAM_IDENTIFIER).and_then(Value::as_string) {
        return Ok(team.to_string());
    }
    entitlements
        .get(APPLICATION_IDENTIFIER)
        .and_then(Value::as_string)
        .and_then(|id| id.split_once('.'))
        .map(|(team, _)| team.to_string())
        .context("replacement entitlements name no team identifier")
}

/// Move the access group `group` under `team_id`, keeping everything after the first `.`.
pub fn rebase_access_group(group: &str, team_id: &str) -> String {
    match group.split_once('.') {
        Some((_, suffix)) => format!("{team_id}.{suffix}"),
        None => format!("{team_id}.{group}"),
    }
}

/// Reconcile the entitlements `binary` was signed with against `replacement`.
///
/// Keys are visited in the binary's order. Keychain access groups are always rebuilt from
/// the binary's own list under `team_id`. Any other key the replacement lacks is dropped
/// with a warning, or is an error when `strict` is set.
pub fn merge_entitlements(
    binary: &str,
    saved: &Dictionary,
    replacement: &Dictionary,
    team_id: &str,
    strict: bool,
) -> Result<Dictionary> {
    let mut merged = Dictionary::new();

    for (key, saved_value) in saved {
        if key == KEYCHAIN_ACCESS_GROUPS
            && let Some(groups) = saved_value.as_array()
        {
            let rebased = groups
                .iter()
                .map(|group| match group.as_string() {
                    Some(group) => Value::String(rebase_access_group(group, team_id)),
                    None => group.clone(),
                })
                .collect::<Vec<_>>();
            log::info!(
                "Mapped keychain access groups for {}: {}",
                binary,
                rebased
                    .iter()
                    .filter_map(Value::as_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            merged.insert(key.clone(), Value::Array(rebased));
            continue;
        }

        let Some(replacement_value) = replacement.get(key) else {
            if strict {
                return Err(Error::EntitlementDropped {
                    key: key.clone(),
                    binary: binary.to_string(),
                });
            }
            log::warn!("Matching entitlement for {} ({}) was not found", key, binary);
            continue;
        };
        merged.insert(key.clone(), replacement_value.clone());
    }

    Ok(merged)
}

fn read_entitlements(path: &Path) -> Result<Dictionary> {
    Value::from_file(path)
        .map_err(Error::Plist)
        .with_context(|| format!("reading entitlements {}", path.display()))?
        .into_dictionary()
        .with_context(|| format!("entitlements {} are not a dictionary", path.display()))
}

/// Transient entitlement documents for one signing run.
///
/// Every file is deleted when the store is dropped.
#[derive(Debug, Default)]
pub struct EntitlementsStore {
    saved: HashMap<PathBuf, TempPath>,
    merged: Vec<TempPath>,
}

impl EntitlementsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dump the entitlements of `executables` concurrently.
    ///
    /// Returns whether every dump succeeded. Executables whose dump failed, or that carry
    /// no entitlements, get the caller's entitlements verbatim at signing time.
    pub async fn save<T: Toolchain>(
        &mut self,
        toolchain: &Arc<T>,
        executables: &[MachOBinary],
    ) -> Result<bool> {
        let dumps = stage::run_all(executables.iter().cloned(), |binary: MachOBinary| {
            let toolchain = Arc::clone(toolchain);
            async move {
                let file = transient_file(".plist")?;
                let dumped = toolchain.dump_entitlements(binary.path(), &file).await?;
                let non_empty = std::fs::metadata(&file).is_ok_and(|m| m.len() > 0);
                if !dumped {
                    log::warn!("Unable to save entitlements of {}", binary.name());
                }
                Ok((binary, (dumped && non_empty).then_some(file)))
            }
        })
        .await?;

        let mut all_saved = true;
        for (binary, file) in dumps {
            match file {
                Some(file) => {
                    log::debug!("Saved entitlements of {}", binary.name());
                    self.saved.insert(binary.path().to_path_buf(), file);
                }
                None => all_saved = false,
            }
        }
        Ok(all_saved)
    }

    /// Saved entitlements of `binary`, if any.
    pub fn saved(&self, binary: &Path) -> Option<&Path> {
        self.saved.get(binary).map(|file| &**file)
    }

    /// Merge the saved entitlements of `binary` against `replacement` into a new file.
    pub fn merge(
        &mut self,
        binary: &MachOBinary,
        replacement: &Path,
        strict: bool,
    ) -> Result<Option<PathBuf>> {
        let Some(saved) = self.saved(binary.path()) else {
            return Ok(None);
        };

        let saved = read_entitlements(saved)?;
        let replacement = read_entitlements(replacement)?;
        // Only a keychain rebase needs the new team.
        let team_id = if saved.contains_key(KEYCHAIN_ACCESS_GROUPS) {
            team_identifier(&replacement)?
        } else {
            String::new()
        };
        let merged = merge_entitlements(&binary.name(), &saved, &replacement, &team_id, strict)?;

        let file = transient_file(".plist")?;
        Value::Dictionary(merged)
            .to_file_xml(&file)
            .map_err(Error::Plist)
            .with_context(|| format!("writing merged entitlements for {}", binary.name()))?;
        let path = file.to_path_buf();
        self.merged.push(file);
        Ok(Some(path))
    }
}
