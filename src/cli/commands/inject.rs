//! The injection command.

use crate::bundle::OutputOutcome;
use crate::cli::{Args, RuntimeConfig};
use crate::config::{EntitlementsSource, InjectParameters, PackagingInfo, SigningInfo};
use crate::error::Result;
use crate::injection::InjectionEntry;
use crate::pipeline::{InjectionSummary, Injector};
use crate::profile;
use crate::toolchain::{ToolchainConfig, XcodeToolchain};
use std::sync::Arc;

/// Build the run parameters, decoding the provisioning profile when one is given.
pub(super) async fn build_parameters(args: &Args) -> Result<InjectParameters> {
    let mut signing = None;
    let mut bundle_id = args.bundle_id.clone();

    if let Some(profile_path) = &args.profile {
        let (info, profile_bundle_id) = profile::decode_profile(profile_path)
            .await?
            .into_signing_info();
        if args.profile_bundle_id {
            bundle_id = Some(profile_bundle_id);
        }
        signing = Some(info);
    } else if let Some(identity) = &args.sign {
        signing = Some(SigningInfo {
            identity: identity.clone(),
            entitlements: args.entitlements.clone().map(EntitlementsSource::File),
            from_profile: false,
        });
    }

    let packaging = PackagingInfo {
        directories_to_remove: args.remove_directories.clone(),
        remove_supported_devices: args.remove_supported_devices,
        enable_documents_support: args.enable_documents_support,
        custom_bundle_id: bundle_id,
    };

    Ok(InjectParameters {
        target: args.target.clone(),
        output: args.output.clone(),
        overwrite: args.overwrite,
        compression_level: args.compression_level,
        items: args.items.iter().map(InjectionEntry::new).collect(),
        signing,
        packaging: (!packaging.is_empty()).then_some(packaging),
        strict_entitlements: args.strict_entitlements,
        frameworks_dir: args.frameworks_dir(),
    })
}

fn report(config: &RuntimeConfig, parameters: &InjectParameters, summary: &InjectionSummary) {
    let verb = match summary.output {
        OutputOutcome::Created => "Created",
        OutputOutcome::Replaced => "Replaced",
    };
    config.success_println(&format!("{} {}", verb, parameters.output.display()));
    config.indent(&format!("{} entries injected", summary.entries_copied));
    if summary.known_frameworks_added > 0 {
        config.indent(&format!(
            "{} known frameworks added",
            summary.known_frameworks_added
        ));
    }
    if summary.binaries_thinned > 0 {
        config.indent(&format!("{} binaries thinned", summary.binaries_thinned));
    }
    config.indent(&format!(
        "{} dependency paths repaired",
        summary.paths_repaired
    ));
    match &parameters.signing {
        Some(signing) => config.indent(&signing.describe()),
        None => {
            config.warn_println("Package was left unsigned, pass --sign or --profile to sign it")
        }
    }
}

pub(super) async fn execute_inject(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let parameters = build_parameters(args).await?;
    Injector::<XcodeToolchain>::validate(&parameters)?;

    let toolchain = XcodeToolchain::new(ToolchainConfig::from_env())?;
    toolchain.ensure_available()?;
    config.verbose_println("All external tools are available");

    let summary = Injector::new(Arc::new(toolchain)).run(&parameters).await?;
    report(config, &parameters, &summary);
    Ok(0)
}
