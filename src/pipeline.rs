//! One injection run, from target package to output package.
//!
//! Stages run strictly in order: load and modify the package, inject entries (thin, pull
//! in known frameworks, repair paths), gate on encryption, unsign/patch/re-sign, and
//! write the output. Every scratch artifact is owned by a stage value and is removed when
//! the run returns, successfully or not.

use crate::bundle::{OutputOutcome, PackageManager};
use crate::codesign::CodesigningManager;
use crate::config::InjectParameters;
use crate::error::{Error, Result};
use crate::injection::{InjectionManager, KnownFrameworks};
use crate::toolchain::Toolchain;
use std::sync::Arc;

/// What an injection run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSummary {
    /// Entries copied into the bundle, Debian package contents included.
    pub entries_copied: usize,
    /// Binaries reduced to a single architecture.
    pub binaries_thinned: usize,
    /// Catalog frameworks added because an injected binary references them.
    pub known_frameworks_added: usize,
    /// Dependency references rewritten to `@rpath`.
    pub paths_repaired: usize,
    /// Whether the bundle was re-signed.
    pub signed: bool,
    pub output: OutputOutcome,
}

/// Runs the injection pipeline over a shared toolchain.
#[derive(Debug)]
pub struct Injector<T: Toolchain> {
    toolchain: Arc<T>,
}

impl<T: Toolchain> Injector<T> {
    pub fn new(toolchain: Arc<T>) -> Self {
        Self { toolchain }
    }

    /// Reject parameters that would fail late, before any work is done.
    pub fn validate(parameters: &InjectParameters) -> Result<()> {
        if let Some(signing) = &parameters.signing
            && !signing.is_ad_hoc()
            && signing.entitlements.is_none()
        {
            return Err(Error::MissingEntitlements);
        }
        if parameters.output.exists() && !parameters.overwrite {
            return Err(Error::OutputExists(parameters.output.clone()));
        }
        Ok(())
    }

    pub async fn run(&self, parameters: &InjectParameters) -> Result<InjectionSummary> {
        Self::validate(parameters)?;

        let mut package = PackageManager::load(&parameters.target).await?;
        log::info!("Loaded app package");
        if let Some(packaging) = parameters.packaging.as_ref().filter(|p| !p.is_empty()) {
            package.apply_modifications(packaging).await?;
        }
        let package_info = package.package_info().clone();

        let mut injection =
            InjectionManager::new(Arc::clone(&self.toolchain), package_info.layout.clone());
        let entries_copied = injection.add_entries(&parameters.items).await?.len();
        let binaries_thinned = injection.thin_copied_binaries().await?;
        let catalog = KnownFrameworks::load(&parameters.frameworks_dir)?;
        let known_frameworks_added = injection.copy_known_frameworks(&catalog).await?;
        let paths_repaired = injection.repair_broken_paths().await?;

        let mut signing = CodesigningManager::scan(Arc::clone(&self.toolchain), &package_info)?;
        let encryption = signing.encryption_state().await?;
        if encryption.is_main_binary_encrypted {
            return Err(Error::EncryptedMainBinary(package_info.main_binary.name()));
        }
        if !encryption.encrypted_binaries.is_empty() {
            let layout = &package_info.layout;
            let paths = encryption
                .encrypted_binaries
                .iter()
                .map(|b| layout.relative(b.path()).display().to_string())
                .collect::<Vec<_>>();
            log::error!(
                "The app package contains encrypted binaries. Consider removing them:\n{}",
                paths.join("\n")
            );
        }

        signing
            .process(
                parameters.signing.as_ref(),
                &injection,
                parameters.strict_entitlements,
            )
            .await?;

        let output = package
            .create_output(
                &parameters.output,
                parameters.overwrite,
                parameters.compression_level,
            )
            .await?;

        Ok(InjectionSummary {
            entries_copied,
            binaries_thinned,
            known_frameworks_added,
            paths_repaired,
            signed: parameters.signing.is_some(),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::CompressionLevel;
    use crate::bundle::info::{self, CF_BUNDLE_EXECUTABLE, CF_BUNDLE_IDENTIFIER};
    use crate::config::{PackagingInfo, SigningInfo};
    use crate::injection::InjectionEntry;
    use crate::macho::{FAT_MAGIC, MH_MAGIC_64};
    use crate::toolchain::fake::{Call, FakeToolchain};
    use plist::Dictionary;
    use std::path::{Path, PathBuf};

    fn write_binary(path: &Path, magic: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut data = magic.to_le_bytes().to_vec();
        data.resize(512, 0);
        std::fs::write(path, data).unwrap();
    }

    fn write_info(dir: &Path, executable: &str, identifier: &str) {
        let mut dict = Dictionary::new();
        dict.insert(CF_BUNDLE_EXECUTABLE.into(), executable.into());
        dict.insert(CF_BUNDLE_IDENTIFIER.into(), identifier.into());
        info::write_dictionary(&dict, &dir.join("Info.plist")).unwrap();
    }

    fn write_framework(parent: &Path, name: &str, magic: u32) -> PathBuf {
        let framework = parent.join(format!("{name}.framework"));
        write_binary(&framework.join(name), magic);
        write_info(&framework, name, &format!("com.example.{name}"));
        framework
    }

    struct Fixture {
        dir: tempfile::TempDir,
        app: PathBuf,
        tweak: PathBuf,
        catalog: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("Demo.app");
        write_binary(&app.join("Demo"), MH_MAGIC_64);
        write_info(&app, "Demo", "com.example.demo");
        write_framework(&app.join("Frameworks"), "Core", MH_MAGIC_64);

        let tweak = dir.path().join("Tweak.dylib");
        write_binary(&tweak, FAT_MAGIC);

        let catalog = dir.path().join("catalog");
        write_framework(&catalog, "Orion", MH_MAGIC_64);
        write_framework(&catalog, "CydiaSubstrate", MH_MAGIC_64);
        write_framework(&catalog, "Unused", MH_MAGIC_64);

        Fixture {
            dir,
            app,
            tweak,
            catalog,
        }
    }

    fn parameters(fx: &Fixture, output: &str) -> InjectParameters {
        InjectParameters {
            target: fx.app.clone(),
            output: fx.dir.path().join(output),
            overwrite: false,
            compression_level: CompressionLevel::Fastest,
            items: vec![InjectionEntry::new(&fx.tweak)],
            signing: Some(SigningInfo {
                identity: "-".into(),
                entitlements: None,
                from_profile: false,
            }),
            packaging: Some(PackagingInfo {
                custom_bundle_id: Some("org.me.demo".into()),
                ..PackagingInfo::default()
            }),
            strict_entitlements: false,
            frameworks_dir: fx.catalog.clone(),
        }
    }

    fn tweak_records(toolchain: &FakeToolchain) {
        toolchain.set_dependencies(
            Path::new("Frameworks/Tweak.dylib"),
            &[
                "@rpath/Tweak.dylib",
                "/Library/Frameworks/Orion.framework/Orion",
                "/usr/lib/libSystem.B.dylib",
            ],
        );
    }

    #[tokio::test]
    async fn test_full_run_produces_signed_archive() {
        let fx = fixture();
        let toolchain = Arc::new(FakeToolchain::new());
        tweak_records(&toolchain);
        let injector = Injector::new(toolchain.clone());
        let params = parameters(&fx, "Demo.ipa");

        let summary = injector.run(&params).await.unwrap();
        assert_eq!(
            summary,
            InjectionSummary {
                entries_copied: 1,
                binaries_thinned: 1,
                known_frameworks_added: 2,
                paths_repaired: 1,
                signed: true,
                output: OutputOutcome::Created,
            }
        );
        assert!(params.output.is_file());

        let calls = toolchain.calls();
        let signs = calls
            .iter()
            .filter_map(|c| match c {
                Call::Sign(path, ..) => Some(path.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        // Demo, Core, Tweak, Orion, CydiaSubstrate.
        assert_eq!(signs.len(), 5);
        assert!(signs.last().unwrap().ends_with("Demo.app/Demo"));

        // Tweak references Orion through @rpath now, so it is the only load command added.
        let inserted = calls
            .iter()
            .filter_map(|c| match c {
                Call::InsertDependency(_, dependency) => Some(dependency.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            inserted,
            vec![
                "@rpath/Tweak.dylib",
                "@rpath/CydiaSubstrate.framework/CydiaSubstrate"
            ]
        );
    }

    #[tokio::test]
    async fn test_encrypted_main_binary_is_fatal() {
        let fx = fixture();
        let toolchain = Arc::new(FakeToolchain::new());
        toolchain.set_encrypted(Path::new("Demo.app/Demo"));
        let injector = Injector::new(toolchain.clone());
        let params = parameters(&fx, "Demo.ipa");

        let err = injector.run(&params).await.unwrap_err();
        assert!(matches!(err, Error::EncryptedMainBinary(name) if name == "Demo"));
        assert!(!params.output.exists());
        assert!(!toolchain.calls().iter().any(|c| matches!(c, Call::RemoveSignature(_))));
    }

    #[tokio::test]
    async fn test_encrypted_library_is_reported_only() {
        let fx = fixture();
        let toolchain = Arc::new(FakeToolchain::new());
        toolchain.set_encrypted(Path::new("Frameworks/Core.framework/Core"));
        let injector = Injector::new(toolchain);

        let summary = injector.run(&parameters(&fx, "Demo.ipa")).await.unwrap();
        assert!(summary.signed);
    }

    #[tokio::test]
    async fn test_early_validation() {
        let fx = fixture();
        let injector = Injector::new(Arc::new(FakeToolchain::new()));

        let mut params = parameters(&fx, "Demo.ipa");
        params.signing = Some(SigningInfo {
            identity: "Apple Development: Dev".into(),
            entitlements: None,
            from_profile: false,
        });
        assert!(matches!(
            injector.run(&params).await.unwrap_err(),
            Error::MissingEntitlements
        ));

        let params = parameters(&fx, "Demo.ipa");
        std::fs::write(&params.output, b"existing").unwrap();
        assert!(matches!(
            injector.run(&params).await.unwrap_err(),
            Error::OutputExists(_)
        ));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_app_output() {
        let fx = fixture();
        let injector = Injector::new(Arc::new(FakeToolchain::new()));
        let mut params = parameters(&fx, "Out.app");
        params.signing = None;
        params.overwrite = true;
        std::fs::create_dir_all(&params.output).unwrap();

        let summary = injector.run(&params).await.unwrap();
        assert_eq!(summary.output, OutputOutcome::Replaced);
        assert!(!summary.signed);
        assert!(params.output.join("Frameworks/Tweak.dylib").is_file());
        let written = info::read_dictionary(&params.output.join("Info.plist")).unwrap();
        assert_eq!(
            info::string_value(&written, CF_BUNDLE_IDENTIFIER),
            Some("org.me.demo")
        );
    }
}
