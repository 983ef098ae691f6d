//! Load-time dependency repair.
//!
//! Injected binaries are usually built against install locations of a jailbroken device
//! (`/Library/Frameworks/...`, `/usr/lib/...`). Those references are rewritten to `@rpath`
//! references that resolve inside the bundle, and binaries nothing else loads get a load
//! command in the main executable.

use super::copied::CopiedBinary;
use super::entry::EntryKind;
use crate::bundle::BundleLayout;
use crate::error::{Error, Result};
use crate::macho::MachOBinary;
use crate::stage;
use crate::toolchain::Toolchain;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Dependencies of `binary` in record order, without its own identity record.
pub async fn get_dependencies<T: Toolchain>(toolchain: &T, binary: &Path) -> Result<Vec<String>> {
    let records = toolchain.dependencies(binary).await?;
    Ok(records.into_iter().skip(1).collect())
}

/// Every distinct dependency of `binaries`, first occurrence order.
pub async fn all_dependencies<T: Toolchain>(
    toolchain: &Arc<T>,
    binaries: &[CopiedBinary],
) -> Result<Vec<String>> {
    let paths = binaries.iter().map(|b| b.path().to_path_buf());
    let lists = stage::run_all(paths, |path: PathBuf| {
        let toolchain = Arc::clone(toolchain);
        async move { get_dependencies(toolchain.as_ref(), &path).await }
    })
    .await?;

    let mut seen = HashSet::new();
    Ok(lists
        .into_iter()
        .flatten()
        .filter(|dependency| seen.insert(dependency.clone()))
        .collect())
}

/// Name and run-path reference of every registered binary.
fn run_path_table(binaries: &[CopiedBinary], layout: &BundleLayout) -> Vec<(String, String)> {
    binaries
        .iter()
        .map(|b| (b.name(), b.run_path(layout)))
        .collect()
}

/// Registered binary `dependency` refers to, by file name; the longest name wins.
fn matching_run_path<'a>(dependency: &str, table: &'a [(String, String)]) -> Option<&'a str> {
    table
        .iter()
        .filter(|(name, _)| !name.is_empty() && dependency.contains(name.as_str()))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, run_path)| run_path.as_str())
}

/// Rewrite absolute references to registered binaries into `@rpath` references.
///
/// Returns the number of rewritten references. A rewrite the toolchain rejects is
/// logged and skipped.
pub async fn repair_broken_paths<T: Toolchain>(
    toolchain: &Arc<T>,
    binaries: &[CopiedBinary],
    layout: &BundleLayout,
) -> Result<usize> {
    let table = Arc::new(run_path_table(binaries, layout));
    let paths = binaries.iter().map(|b| b.path().to_path_buf());

    let counts = stage::run_all(paths, |path: PathBuf| {
        let toolchain = Arc::clone(toolchain);
        let table = Arc::clone(&table);
        async move {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut fixed = 0usize;

            for dependency in get_dependencies(toolchain.as_ref(), &path).await? {
                if dependency.starts_with('@') {
                    continue;
                }
                let Some(run_path) = matching_run_path(&dependency, &table) else {
                    continue;
                };

                if toolchain.change_dependency(&path, &dependency, run_path).await? {
                    log::info!(
                        "Fixed dependency path in {} ({} -> {})",
                        name,
                        dependency,
                        run_path
                    );
                    fixed += 1;
                } else {
                    log::warn!("Unable to change dependency {} of {}", dependency, name);
                }
            }
            Ok(fixed)
        }
    })
    .await?;

    Ok(counts.into_iter().sum())
}

/// Make the main binary load every injected library nothing else references.
///
/// Only dylibs and frameworks are candidates. A candidate is skipped when some `@`
/// dependency of the registered binaries mentions it, or when the main binary already
/// lists its bare name. Returns the inserted references.
pub async fn insert_missing_load_commands<T: Toolchain>(
    toolchain: &Arc<T>,
    main_binary: &MachOBinary,
    binaries: &[CopiedBinary],
    layout: &BundleLayout,
) -> Result<Vec<String>> {
    let run_path_dependencies = all_dependencies(toolchain, binaries)
        .await?
        .into_iter()
        .filter(|dependency| dependency.starts_with('@'))
        .collect::<Vec<_>>();
    let main_dependencies = get_dependencies(toolchain.as_ref(), main_binary.path()).await?;

    let mut inserted = Vec::new();
    for binary in binaries
        .iter()
        .filter(|b| matches!(b.kind, EntryKind::DynamicLibrary | EntryKind::Framework))
    {
        let name = binary.name();
        if run_path_dependencies
            .iter()
            .any(|dependency| dependency.contains(name.as_str()))
        {
            continue;
        }
        if main_dependencies.contains(&name) {
            continue;
        }

        let run_path = binary.run_path(layout);
        if !toolchain
            .insert_dependency(main_binary.path(), &run_path)
            .await?
        {
            return Err(Error::LoadCommandInsertion {
                binary: main_binary.path().to_path_buf(),
                dependency: run_path,
            });
        }
        log::info!(
            "Inserted load command {} into {}",
            run_path,
            main_binary.name()
        );
        inserted.push(run_path);
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::fake::{Call, FakeToolchain};

    const BUNDLE: &str = "/p/App.app";

    fn copied(path: &str, kind: EntryKind) -> CopiedBinary {
        CopiedBinary::new(MachOBinary::new(path), kind)
    }

    #[tokio::test]
    async fn test_get_dependencies_drops_identity() {
        let toolchain = FakeToolchain::new();
        let lib = Path::new("/p/App.app/Frameworks/libA.dylib");
        toolchain.set_dependencies(lib, &["@rpath/libA.dylib", "/usr/lib/libSystem.B.dylib"]);

        assert_eq!(
            get_dependencies(&toolchain, lib).await.unwrap(),
            vec!["/usr/lib/libSystem.B.dylib"]
        );
    }

    #[tokio::test]
    async fn test_absolute_reference_rewritten_to_framework_run_path() {
        let toolchain = Arc::new(FakeToolchain::new());
        let layout = BundleLayout::new(BUNDLE);
        let tweak = copied("/p/App.app/Frameworks/Tweak.dylib", EntryKind::DynamicLibrary);
        let foo = copied("/p/App.app/Frameworks/Foo.framework/Foo", EntryKind::Framework);
        toolchain.set_dependencies(
            tweak.path(),
            &["@rpath/Tweak.dylib", "/usr/lib/libFoo.dylib", "/usr/lib/libobjc.A.dylib"],
        );
        toolchain.set_dependencies(foo.path(), &["@rpath/Foo.framework/Foo"]);

        let fixed = repair_broken_paths(&toolchain, &[tweak.clone(), foo], &layout)
            .await
            .unwrap();

        assert_eq!(fixed, 1);
        assert!(toolchain.calls().contains(&Call::ChangeDependency(
            tweak.path().to_path_buf(),
            "/usr/lib/libFoo.dylib".into(),
            "@rpath/Foo.framework/Foo".into(),
        )));
        assert_eq!(
            toolchain.records(tweak.path()),
            vec!["@rpath/Tweak.dylib", "@rpath/Foo.framework/Foo", "/usr/lib/libobjc.A.dylib"]
        );
    }

    #[test]
    fn test_longest_matching_name_wins() {
        let table = vec![
            ("Foo".to_string(), "@rpath/Foo.framework/Foo".to_string()),
            ("FooKit".to_string(), "@rpath/FooKit.framework/FooKit".to_string()),
        ];
        assert_eq!(
            matching_run_path("/Library/Frameworks/FooKit.framework/FooKit", &table),
            Some("@rpath/FooKit.framework/FooKit")
        );
        assert_eq!(matching_run_path("/usr/lib/libz.dylib", &table), None);
    }

    #[tokio::test]
    async fn test_insert_only_unreferenced_libraries() {
        let toolchain = Arc::new(FakeToolchain::new());
        let layout = BundleLayout::new(BUNDLE);
        let main = MachOBinary::new("/p/App.app/App");
        let tweak = copied("/p/App.app/Frameworks/Tweak.dylib", EntryKind::DynamicLibrary);
        let orion = copied("/p/App.app/Frameworks/Orion.framework/Orion", EntryKind::Framework);
        let already = copied("/p/App.app/Frameworks/libLinked.dylib", EntryKind::DynamicLibrary);
        let share = copied("/p/App.app/PlugIns/Share.appex/Share", EntryKind::PlugIn);

        toolchain.set_dependencies(main.path(), &["/usr/lib/libSystem.B.dylib", "libLinked.dylib"]);
        toolchain.set_dependencies(
            tweak.path(),
            &["@rpath/Tweak.dylib", "@rpath/Orion.framework/Orion"],
        );
        toolchain.set_dependencies(orion.path(), &["@rpath/Orion.framework/Orion"]);

        let inserted = insert_missing_load_commands(
            &toolchain,
            &main,
            &[tweak, orion, already, share],
            &layout,
        )
        .await
        .unwrap();

        // Tweak references itself through its identity record only, which is dropped.
        assert_eq!(inserted, vec!["@rpath/Tweak.dylib"]);
    }

    #[tokio::test]
    async fn test_insertion_failure_is_fatal() {
        let toolchain = Arc::new(FakeToolchain::new());
        let layout = BundleLayout::new(BUNDLE);
        let main = MachOBinary::new("/p/App.app/App");
        toolchain.fail_on(main.path());
        let tweak = copied("/p/App.app/Frameworks/Tweak.dylib", EntryKind::DynamicLibrary);

        let err = insert_missing_load_commands(&toolchain, &main, &[tweak], &layout)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoadCommandInsertion { .. }));
    }
}
