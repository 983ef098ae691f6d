use super::entry::EntryKind;
use crate::bundle::BundleLayout;
use crate::macho::MachOBinary;
use std::path::Path;

/// A binary placed in the bundle by injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedBinary {
    pub binary: MachOBinary,
    pub kind: EntryKind,
}

impl CopiedBinary {
    pub fn new(binary: MachOBinary, kind: EntryKind) -> Self {
        Self { binary, kind }
    }

    pub fn name(&self) -> String {
        self.binary.name()
    }

    pub fn path(&self) -> &Path {
        self.binary.path()
    }

    /// `@rpath` reference the dynamic loader resolves to this binary.
    ///
    /// Frameworks are addressed relative to `Frameworks`, plugins relative to `PlugIns`,
    /// anything else by bare file name.
    pub fn run_path(&self, layout: &BundleLayout) -> String {
        let base = match self.kind {
            EntryKind::Framework => Some(layout.frameworks_dir()),
            EntryKind::PlugIn => Some(layout.plugins_dir()),
            _ => None,
        };
        let relative = base
            .and_then(|base| self.path().strip_prefix(base).ok())
            .map(|relative| {
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_else(|| self.name());
        format!("@rpath/{relative}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_paths() {
        let layout = BundleLayout::new("/p/App.app");
        let copied = |path: &str, kind| CopiedBinary::new(MachOBinary::new(path), kind);

        assert_eq!(
            copied("/p/App.app/Frameworks/Foo.framework/Foo", EntryKind::Framework)
                .run_path(&layout),
            "@rpath/Foo.framework/Foo"
        );
        assert_eq!(
            copied("/p/App.app/PlugIns/Share.appex/Share", EntryKind::PlugIn).run_path(&layout),
            "@rpath/Share.appex/Share"
        );
        assert_eq!(
            copied("/p/App.app/Frameworks/libA.dylib", EntryKind::DynamicLibrary)
                .run_path(&layout),
            "@rpath/libA.dylib"
        );
    }
}
