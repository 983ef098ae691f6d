//! Unsign, repair and re-sign every binary of a bundle.
//!
//! ```text
//! Unsigned ──save entitlements──▶ EntitlementsSaved ──remove signatures──▶ SignatureRemoved
//!    │                                                        ▲                   │
//!    └──────────────────────remove signatures─────────────────┘        sign ──────┤
//!                                                                        ▼          ▼
//!                                                                   Resigned   SigningFailed
//! ```
//!
//! Load commands are inserted into the main binary while it is unsigned, between
//! signature removal and signing.

use super::entitlements::EntitlementsStore;
use crate::bundle::{BundleLayout, PackageInfo};
use crate::config::SigningInfo;
use crate::error::{Error, Result};
use crate::injection::InjectionManager;
use crate::macho::{EncryptionInfo, MachOBinary, MachOKind};
use crate::stage;
use crate::toolchain::Toolchain;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Path fragment marking stub executables, whose signature must stay intact.
const STUB_MARKER: &str = "Stub";

/// Progress of a signing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Unsigned,
    EntitlementsSaved,
    SignatureRemoved,
    Resigned,
    SigningFailed,
}

/// Signing of every Mach-O file in one bundle.
#[derive(Debug)]
pub struct CodesigningManager<T: Toolchain> {
    toolchain: Arc<T>,
    layout: BundleLayout,
    /// Main binary first.
    binaries: Vec<MachOBinary>,
    entitlements: EntitlementsStore,
    state: SigningState,
}

impl<T: Toolchain> CodesigningManager<T> {
    /// Collect every Mach-O file of the bundle described by `package`.
    ///
    /// Paths containing `Stub` are skipped with a warning. The package's main binary is
    /// always first.
    pub fn scan(toolchain: Arc<T>, package: &PackageInfo) -> Result<Self> {
        let layout = package.layout.clone();
        let main_path = package.main_binary.path();
        let mut main = None;
        let mut others = Vec::new();

        for entry in WalkDir::new(layout.bundle_dir()).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || MachOKind::of_file(entry.path())?.is_none() {
                continue;
            }

            let relative = layout.relative(entry.path());
            if relative.to_string_lossy().contains(STUB_MARKER) {
                log::warn!(
                    "Skipping stub executable {}, its signature may not be modified",
                    relative.display()
                );
                continue;
            }

            let binary = MachOBinary::new(entry.path());
            if entry.path() == main_path {
                main = Some(binary);
            } else {
                others.push(binary);
            }
        }

        let main = main.ok_or_else(|| Error::InvalidPackage {
            path: main_path.to_path_buf(),
            reason: "main executable is missing or not a Mach-O binary".to_string(),
        })?;

        let mut binaries = Vec::with_capacity(others.len() + 1);
        binaries.push(main);
        binaries.extend(others);
        log::debug!("Found {} binaries in the bundle", binaries.len());

        Ok(Self {
            toolchain,
            layout,
            binaries,
            entitlements: EntitlementsStore::new(),
            state: SigningState::Unsigned,
        })
    }

    pub fn state(&self) -> SigningState {
        self.state
    }

    /// Every scanned binary, main binary first.
    pub fn binaries(&self) -> &[MachOBinary] {
        &self.binaries
    }

    pub fn main_binary(&self) -> &MachOBinary {
        &self.binaries[0]
    }

    fn is_main_executable(&self, binary: &MachOBinary) -> bool {
        !self.layout.is_inside_frameworks(binary.path())
    }

    /// Binaries outside any `Frameworks` directory: the app and its extensions.
    pub fn main_executables(&self) -> Vec<MachOBinary> {
        self.binaries
            .iter()
            .filter(|b| self.is_main_executable(b))
            .cloned()
            .collect()
    }

    fn relative(&self, path: &Path) -> PathBuf {
        self.layout.relative(path).to_path_buf()
    }

    /// Probe every binary for FairPlay encryption.
    pub async fn encryption_state(&self) -> Result<EncryptionInfo> {
        let encrypted = stage::run_all(self.binaries.iter().cloned(), |binary: MachOBinary| {
            let toolchain = Arc::clone(&self.toolchain);
            async move {
                let encrypted = binary.is_encrypted(toolchain.as_ref()).await?;
                Ok((binary, encrypted))
            }
        })
        .await?;

        let mut info = EncryptionInfo::default();
        for (index, (binary, encrypted)) in encrypted.into_iter().enumerate() {
            if !encrypted {
                continue;
            }
            if index == 0 {
                info.is_main_binary_encrypted = true;
            } else {
                info.encrypted_binaries.push(binary);
            }
        }
        Ok(info)
    }

    /// Dump the entitlements of every main executable. Returns whether all dumps succeeded.
    pub async fn save_entitlements(&mut self) -> Result<bool> {
        self.expect_state(&[SigningState::Unsigned], "save entitlements")?;
        let executables = self.main_executables();
        let all_saved = self.entitlements.save(&self.toolchain, &executables).await?;
        self.state = SigningState::EntitlementsSaved;
        Ok(all_saved)
    }

    /// Strip the signature of every scanned binary; any failure is fatal.
    pub async fn remove_signatures(&mut self) -> Result<()> {
        self.expect_state(
            &[SigningState::Unsigned, SigningState::EntitlementsSaved],
            "remove signatures",
        )?;

        let failed = stage::failures(self.binaries.iter().cloned(), |binary: MachOBinary| {
            let toolchain = Arc::clone(&self.toolchain);
            async move { toolchain.remove_signature(binary.path()).await }
        })
        .await?;

        if !failed.is_empty() {
            return Err(Error::SignatureRemoval(
                failed.iter().map(|b| self.relative(b.path())).collect(),
            ));
        }

        self.state = SigningState::SignatureRemoved;
        log::info!("Signature removed from {} binaries", self.binaries.len());
        Ok(())
    }

    /// Entitlements file `binary` is signed with.
    ///
    /// Framework libraries get none. Main executables get their saved entitlements merged
    /// against the caller's, their saved entitlements unchanged when signing ad hoc, or the
    /// caller's entitlements when nothing was saved.
    fn entitlements_for(
        &mut self,
        binary: &MachOBinary,
        signing: &SigningInfo,
        strict: bool,
    ) -> Result<Option<PathBuf>> {
        if !self.is_main_executable(binary) {
            return Ok(None);
        }

        let supplied = signing.entitlements_path().map(Path::to_path_buf);
        let Some(saved) = self.entitlements.saved(binary.path()).map(Path::to_path_buf) else {
            return Ok(supplied);
        };

        if signing.is_ad_hoc() {
            return Ok(Some(saved));
        }
        match signing.entitlements_path() {
            Some(replacement) => {
                let merged = self.entitlements.merge(binary, replacement, strict)?;
                Ok(merged.or(supplied))
            }
            None => Ok(Some(saved)),
        }
    }

    /// Sign every non-main binary concurrently, then the main binary.
    pub async fn sign_package(&mut self, signing: &SigningInfo, strict: bool) -> Result<()> {
        self.expect_state(&[SigningState::SignatureRemoved], "sign")?;

        let result = self.sign_all(signing, strict).await;
        self.state = match result {
            Ok(()) => SigningState::Resigned,
            Err(_) => SigningState::SigningFailed,
        };
        result
    }

    async fn sign_all(&mut self, signing: &SigningInfo, strict: bool) -> Result<()> {
        let mut plan = Vec::with_capacity(self.binaries.len());
        for binary in self.binaries.clone() {
            let entitlements = self.entitlements_for(&binary, signing, strict)?;
            plan.push((binary, entitlements));
        }
        let main = plan.remove(0);

        let identity: Arc<str> = Arc::from(signing.identity.as_str());
        let failed = stage::failures(plan, |(binary, entitlements): (MachOBinary, Option<PathBuf>)| {
            let toolchain = Arc::clone(&self.toolchain);
            let identity = Arc::clone(&identity);
            async move {
                toolchain
                    .sign(binary.path(), &identity, entitlements.as_deref())
                    .await
            }
        })
        .await?;

        if !failed.is_empty() {
            return Err(Error::Signing(
                failed.iter().map(|(b, _)| self.relative(b.path())).collect(),
            ));
        }

        let (main_binary, main_entitlements) = main;
        if !self
            .toolchain
            .sign(main_binary.path(), &identity, main_entitlements.as_deref())
            .await?
        {
            return Err(Error::Signing(vec![self.relative(main_binary.path())]));
        }

        log::info!(
            "Signed {} binaries ({} main executables) with the specified identity",
            self.binaries.len(),
            self.main_executables().len()
        );
        Ok(())
    }

    /// Run the whole signing sequence.
    ///
    /// Without an identity the bundle is only unsigned and patched.
    pub async fn process(
        &mut self,
        signing: Option<&SigningInfo>,
        injection: &InjectionManager<T>,
        strict: bool,
    ) -> Result<()> {
        if let Some(signing) = signing {
            if !signing.is_ad_hoc() && signing.entitlements.is_none() {
                return Err(Error::MissingEntitlements);
            }
            if !self.save_entitlements().await? {
                log::error!(
                    "Unable to save entitlements for one or more binaries. The package is likely unsigned, and all specified entitlements will be applied."
                );
            }
        }

        self.remove_signatures().await?;

        let main_binary = self.main_binary().clone();
        injection.insert_missing_load_commands(&main_binary).await?;

        if let Some(signing) = signing {
            self.sign_package(signing, strict).await?;
        }
        Ok(())
    }

    fn expect_state(&self, allowed: &[SigningState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::GenericError(format!(
                "cannot {operation} while signing state is {:?}",
                self.state
            )))
        }
    }
}
