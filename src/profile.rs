//! Provisioning profile decoding.
//!
//! A `.mobileprovision` file is a CMS envelope around a property list. `security cms -D`
//! unwraps it; the `Entitlements` dictionary then yields the signing identity (the team),
//! the bundle identifier the profile is issued for, and the entitlements to sign with.

use crate::codesign::entitlements::{APPLICATION_IDENTIFIER, TEAM_IDENTIFIER};
use crate::config::{EntitlementsSource, SigningInfo};
use crate::error::{Context, Error, Result};
use crate::toolchain::resolve_tool;
use crate::utils::scratch::transient_file;
use plist::{Dictionary, Value};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tempfile::TempPath;
use tokio::process::Command;

/// Decoded payload of a provisioning profile; only the parts signing needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileDocument {
    #[serde(default)]
    name: Option<String>,
    entitlements: Dictionary,
}

/// What a provisioning profile grants.
#[derive(Debug)]
pub struct ProfileInfo {
    /// Team identifier, used as the `codesign` identity.
    pub identity: String,
    /// `application-identifier` without its team prefix.
    pub bundle_id: String,
    /// Profile entitlements written to a transient XML file.
    pub entitlements: TempPath,
}

impl ProfileInfo {
    /// Signing parameters for this profile. The entitlements file moves with them.
    pub fn into_signing_info(self) -> (SigningInfo, String) {
        (
            SigningInfo {
                identity: self.identity,
                entitlements: Some(EntitlementsSource::Transient(self.entitlements)),
                from_profile: true,
            },
            self.bundle_id,
        )
    }
}

/// Decode `profile` with `security cms -D -i`.
pub async fn decode_profile(profile: &Path) -> Result<ProfileInfo> {
    let security = resolve_tool("security", "KODEGEN_SECURITY");
    let output = Command::new(&security)
        .args(["cms", "-D", "-i"])
        .arg(profile)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|error| Error::CommandFailed {
            command: security.display().to_string(),
            error,
        })?;

    if !output.status.success() {
        return Err(Error::InvalidPackage {
            path: profile.to_path_buf(),
            reason: format!(
                "security cms could not decode the profile: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    parse_profile(&output.stdout)
}

/// Parse a decoded profile property list.
pub fn parse_profile(document: &[u8]) -> Result<ProfileInfo> {
    let document: ProfileDocument = plist::from_bytes(document)
        .map_err(Error::Plist)
        .context("decoded provisioning profile is not a property list")?;

    let identity = document
        .entitlements
        .get(TEAM_IDENTIFIER)
        .and_then(Value::as_string)
        .with_context(|| format!("profile entitlements lack {TEAM_IDENTIFIER}"))?
        .to_string();
    let bundle_id = document
        .entitlements
        .get(APPLICATION_IDENTIFIER)
        .and_then(Value::as_string)
        .and_then(|id| id.split_once('.'))
        .map(|(_, bundle_id)| bundle_id.to_string())
        .with_context(|| format!("profile entitlements lack a valid {APPLICATION_IDENTIFIER}"))?;

    let entitlements = transient_file(".plist")?;
    Value::Dictionary(document.entitlements)
        .to_file_xml(&entitlements)
        .map_err(Error::Plist)
        .context("writing profile entitlements")?;

    log::info!(
        "Using provisioning profile {} (team {}, bundle id {})",
        document.name.as_deref().unwrap_or("<unnamed>"),
        identity,
        bundle_id
    );

    Ok(ProfileInfo {
        identity,
        bundle_id,
        entitlements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>AppIDName</key>
    <string>Example</string>
    <key>Entitlements</key>
    <dict>
        <key>application-identifier</key>
        <string>XYZ98765.com.example.app</string>
        <key>com.apple.developer.team-identifier</key>
        <string>XYZ98765</string>
        <key>keychain-access-groups</key>
        <array>
            <string>XYZ98765.*</string>
        </array>
        <key>get-task-allow</key>
        <true/>
    </dict>
    <key>Name</key>
    <string>Example Development</string>
</dict>
</plist>"#;

    #[test]
    fn test_parse_profile() {
        let info = parse_profile(PROFILE.as_bytes()).unwrap();
        assert_eq!(info.identity, "XYZ98765");
        assert_eq!(info.bundle_id, "com.example.app");

        let written = Value::from_file(&info.entitlements)
            .unwrap()
            .into_dictionary()
            .unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written.get("get-task-allow"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_signing_info_owns_entitlements_file() {
        let info = parse_profile(PROFILE.as_bytes()).unwrap();
        let (signing, bundle_id) = info.into_signing_info();
        assert!(signing.from_profile);
        assert_eq!(bundle_id, "com.example.app");

        let path = signing.entitlements_path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(signing);
        assert!(!path.exists());
    }

    #[test]
    fn test_profile_without_team_is_rejected() {
        let document = PROFILE.replace("com.apple.developer.team-identifier", "other-key");
        assert!(parse_profile(document.as_bytes()).is_err());
        assert!(parse_profile(b"not a plist").is_err());
    }
}
