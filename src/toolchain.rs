use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use serde::Deserialize;

use crate::{
    HostPlatform,
    error::{ConfigurationError, Error},
    meta::parse_properties,
};

/// Oldest API level that ships 64-bit ABIs.
pub const MIN_64_BIT_API_LEVEL: u32 = 21;

/// First NDK release that drops the per-triple binutils.
pub const LLVM_BINUTILS_NDK_MAJOR: u32 = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolchainFlavor {
    DesktopHost,
    AndroidPrebuiltNdk,
    AndroidGeneratedStandalone,
}

impl ToolchainFlavor {
    pub fn is_android(self) -> bool {
        !matches!(self, ToolchainFlavor::DesktopHost)
    }

    /// Lookup order for a build that does or does not use the NDK's
    /// prebuilt toolchains. Prebuilt and generated records are never mixed.
    pub fn preference(use_prebuilt: bool) -> &'static [ToolchainFlavor] {
        if use_prebuilt {
            &[
                ToolchainFlavor::AndroidPrebuiltNdk,
                ToolchainFlavor::DesktopHost,
            ]
        } else {
            &[
                ToolchainFlavor::AndroidGeneratedStandalone,
                ToolchainFlavor::DesktopHost,
            ]
        }
    }
}

impl fmt::Display for ToolchainFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolchainFlavor::DesktopHost => "desktop",
            ToolchainFlavor::AndroidPrebuiltNdk => "prebuilt NDK",
            ToolchainFlavor::AndroidGeneratedStandalone => "generated standalone",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolchainRecord {
    pub architecture_label: &'static str,
    pub flavor: ToolchainFlavor,
    pub target_triple: &'static str,
    pub compiler_triple_prefix: &'static str,
    pub binutils_triple_prefix: &'static str,
    pub output_folder: &'static str,
}

impl ToolchainRecord {
    const fn desktop(label: &'static str, triple: &'static str, folder: &'static str) -> Self {
        Self {
            architecture_label: label,
            flavor: ToolchainFlavor::DesktopHost,
            target_triple: triple,
            compiler_triple_prefix: triple,
            binutils_triple_prefix: triple,
            output_folder: folder,
        }
    }

    const fn android(
        label: &'static str,
        flavor: ToolchainFlavor,
        triple: &'static str,
        compiler: &'static str,
        binutils: &'static str,
        folder: &'static str,
    ) -> Self {
        Self {
            architecture_label: label,
            flavor,
            target_triple: triple,
            compiler_triple_prefix: compiler,
            binutils_triple_prefix: binutils,
            output_folder: folder,
        }
    }
}

use ToolchainFlavor::{AndroidGeneratedStandalone as Generated, AndroidPrebuiltNdk as Prebuilt};

// For 32-bit ARM the NDK prefixes clang with `armv7a-linux-androideabi` but
// binutils with `arm-linux-androideabi`; other architectures share one prefix.
const BUILTIN_TOOLCHAINS: &[ToolchainRecord] = &[
    ToolchainRecord::desktop("linux-x86-64", "x86_64-unknown-linux-gnu", "desktop/linux-x86-64"),
    ToolchainRecord::desktop("darwin", "x86_64-apple-darwin", "desktop/darwin"),
    ToolchainRecord::desktop("darwin-x86-64", "x86_64-apple-darwin", "desktop/darwin-x86-64"),
    ToolchainRecord::desktop("darwin-aarch64", "aarch64-apple-darwin", "desktop/darwin-aarch64"),
    ToolchainRecord::desktop("win32-x86-64-msvc", "x86_64-pc-windows-msvc", "desktop/win32-x86-64"),
    ToolchainRecord::desktop("win32-x86-64-gnu", "x86_64-pc-windows-gnu", "desktop/win32-x86-64"),
    ToolchainRecord::android(
        "arm",
        Generated,
        "armv7-linux-androideabi",
        "arm-linux-androideabi",
        "arm-linux-androideabi",
        "android/armeabi-v7a",
    ),
    ToolchainRecord::android(
        "arm64",
        Generated,
        "aarch64-linux-android",
        "aarch64-linux-android",
        "aarch64-linux-android",
        "android/arm64-v8a",
    ),
    ToolchainRecord::android(
        "x86",
        Generated,
        "i686-linux-android",
        "i686-linux-android",
        "i686-linux-android",
        "android/x86",
    ),
    ToolchainRecord::android(
        "x86_64",
        Generated,
        "x86_64-linux-android",
        "x86_64-linux-android",
        "x86_64-linux-android",
        "android/x86_64",
    ),
    ToolchainRecord::android(
        "arm",
        Prebuilt,
        "armv7-linux-androideabi",
        "armv7a-linux-androideabi",
        "arm-linux-androideabi",
        "android/armeabi-v7a",
    ),
    ToolchainRecord::android(
        "arm64",
        Prebuilt,
        "aarch64-linux-android",
        "aarch64-linux-android",
        "aarch64-linux-android",
        "android/arm64-v8a",
    ),
    ToolchainRecord::android(
        "x86",
        Prebuilt,
        "i686-linux-android",
        "i686-linux-android",
        "i686-linux-android",
        "android/x86",
    ),
    ToolchainRecord::android(
        "x86_64",
        Prebuilt,
        "x86_64-linux-android",
        "x86_64-linux-android",
        "x86_64-linux-android",
        "android/x86_64",
    ),
];

/// 64-bit architectures (labels ending in `64`) do not exist below API 21.
pub fn check_api_level(label: &str, api_level: u32) -> Result<(), Error> {
    if label.ends_with("64") && api_level < MIN_64_BIT_API_LEVEL {
        return Err(Error::UnsupportedApiLevelForArchitecture {
            label: label.to_string(),
            api_level,
        });
    }
    Ok(())
}

/// Immutable table of known toolchains. Safe to share across threads.
#[derive(Debug, Clone)]
pub struct ToolchainCatalog {
    records: Vec<ToolchainRecord>,
}

impl ToolchainCatalog {
    pub fn new(records: Vec<ToolchainRecord>) -> Result<Self, ConfigurationError> {
        let mut seen = BTreeSet::new();
        for record in &records {
            if !seen.insert((record.architecture_label, record.flavor)) {
                return Err(ConfigurationError::DuplicateToolchain {
                    label: record.architecture_label.to_string(),
                    flavor: record.flavor,
                });
            }
        }
        Ok(Self { records })
    }

    pub fn builtin() -> &'static ToolchainCatalog {
        static CATALOG: OnceLock<ToolchainCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| ToolchainCatalog {
            records: BUILTIN_TOOLCHAINS.to_vec(),
        })
    }

    pub fn records(&self) -> &[ToolchainRecord] {
        &self.records
    }

    /// Every architecture label, sorted and de-duplicated.
    pub fn known_labels(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.architecture_label)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Finds the record for `label`, trying each flavor of `preferred` in
    /// turn. Flavors not listed are never considered.
    pub fn lookup(
        &self,
        label: &str,
        preferred: &[ToolchainFlavor],
    ) -> Result<&ToolchainRecord, ConfigurationError> {
        preferred
            .iter()
            .find_map(|flavor| {
                self.records
                    .iter()
                    .find(|r| r.architecture_label == label && r.flavor == *flavor)
            })
            .ok_or_else(|| ConfigurationError::UnrecognizedTarget {
                target: label.to_string(),
                known: self.known_labels(),
            })
    }
}

/// Locations of the native tools for one (toolchain, API level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerPaths {
    pub cc: PathBuf,
    pub cxx: PathBuf,
    pub ar: PathBuf,
    pub sysroot: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolchainResolver {
    host: HostPlatform,
}

impl ToolchainResolver {
    pub fn new(host: HostPlatform) -> Self {
        Self { host }
    }

    /// Root directory the tool paths are relative to. `None` for desktop
    /// toolchains, which come from the host environment.
    pub fn toolchain_root(
        &self,
        record: &ToolchainRecord,
        ndk_dir: &Path,
        generated_root: &Path,
    ) -> Option<PathBuf> {
        match record.flavor {
            ToolchainFlavor::DesktopHost => None,
            ToolchainFlavor::AndroidPrebuiltNdk => Some(
                ndk_dir
                    .join("toolchains")
                    .join("llvm")
                    .join("prebuilt")
                    .join(self.host.tag()),
            ),
            ToolchainFlavor::AndroidGeneratedStandalone => Some(generated_root.to_path_buf()),
        }
    }

    /// Pure path computation; nothing is checked on disk.
    pub fn resolve_compiler_paths(
        &self,
        record: &ToolchainRecord,
        api_level: u32,
        ndk_major: u32,
        toolchain_root: &Path,
    ) -> Option<CompilerPaths> {
        let script = self.host.script_ext();
        let exe = self.host.exe_ext();
        let prefix = record.compiler_triple_prefix;

        let (bin_dir, cc_name) = match record.flavor {
            ToolchainFlavor::DesktopHost => return None,
            ToolchainFlavor::AndroidPrebuiltNdk => {
                (toolchain_root.join("bin"), format!("{prefix}{api_level}-clang"))
            }
            ToolchainFlavor::AndroidGeneratedStandalone => (
                generated_toolchain_dir(toolchain_root, record.architecture_label, api_level)
                    .join("bin"),
                format!("{prefix}-clang"),
            ),
        };

        let ar = if ndk_major >= LLVM_BINUTILS_NDK_MAJOR {
            toolchain_root.join("bin").join(format!("llvm-ar{exe}"))
        } else {
            bin_dir.join(format!("{}-ar{exe}", record.binutils_triple_prefix))
        };

        let sysroot = match record.flavor {
            ToolchainFlavor::AndroidPrebuiltNdk => toolchain_root.join("sysroot"),
            _ => generated_toolchain_dir(toolchain_root, record.architecture_label, api_level)
                .join("sysroot"),
        };

        Some(CompilerPaths {
            cc: bin_dir.join(format!("{cc_name}{script}")),
            cxx: bin_dir.join(format!("{cc_name}++{script}")),
            ar,
            sysroot,
        })
    }
}

/// `{root}/{label}-{api}`, the install directory of a standalone toolchain.
pub fn generated_toolchain_dir(root: &Path, label: &str, api_level: u32) -> PathBuf {
    root.join(format!("{label}-{api_level}"))
}

/// Major component of an NDK revision such as `25.2.9519653`. Anything
/// unparseable counts as 0, which selects the oldest behaviour.
pub fn ndk_major_version(revision: &str) -> u32 {
    revision
        .split('.')
        .next()
        .and_then(|major| major.trim().parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdkVersion {
    pub revision: String,
    pub major: u32,
}

impl NdkVersion {
    pub fn parse(revision: &str) -> Self {
        Self {
            revision: revision.to_string(),
            major: ndk_major_version(revision),
        }
    }

    /// Reads `Pkg.Revision` from the NDK's `source.properties`, falling back
    /// to the directory name (side-by-side installs are named by revision).
    pub fn detect(ndk_dir: &Path) -> Self {
        let from_properties = std::fs::read_to_string(ndk_dir.join("source.properties"))
            .ok()
            .and_then(|s| parse_properties(&s).remove("Pkg.Revision"));

        let revision = from_properties
            .or_else(|| {
                ndk_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "0.0".to_string());

        Self::parse(&revision)
    }
}

impl fmt::Display for NdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ToolchainFlavor] = &[
        ToolchainFlavor::AndroidPrebuiltNdk,
        ToolchainFlavor::AndroidGeneratedStandalone,
        ToolchainFlavor::DesktopHost,
    ];

    fn prebuilt(label: &str) -> &'static ToolchainRecord {
        ToolchainCatalog::builtin()
            .lookup(label, ToolchainFlavor::preference(true))
            .unwrap()
    }

    fn generated(label: &str) -> &'static ToolchainRecord {
        ToolchainCatalog::builtin()
            .lookup(label, ToolchainFlavor::preference(false))
            .unwrap()
    }

    #[test]
    fn builtin_catalog_is_unique() {
        assert!(ToolchainCatalog::new(BUILTIN_TOOLCHAINS.to_vec()).is_ok());
    }

    #[test]
    fn duplicate_records_rejected() {
        let record = BUILTIN_TOOLCHAINS[0].clone();
        let err = ToolchainCatalog::new(vec![record.clone(), record]).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateToolchain { .. }));
    }

    #[test]
    fn lookup_respects_flavor_preference() {
        assert_eq!(prebuilt("arm").flavor, ToolchainFlavor::AndroidPrebuiltNdk);
        assert_eq!(prebuilt("arm").compiler_triple_prefix, "armv7a-linux-androideabi");
        assert_eq!(generated("arm").flavor, ToolchainFlavor::AndroidGeneratedStandalone);
        assert_eq!(generated("arm").compiler_triple_prefix, "arm-linux-androideabi");
        assert_eq!(prebuilt("darwin-aarch64").flavor, ToolchainFlavor::DesktopHost);
    }

    #[test]
    fn lookup_never_crosses_into_unlisted_flavors() {
        let catalog = ToolchainCatalog::builtin();
        let err = catalog
            .lookup("arm64", &[ToolchainFlavor::DesktopHost])
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnrecognizedTarget { .. }));
    }

    #[test]
    fn unknown_label_lists_sorted_labels() {
        let err = ToolchainCatalog::builtin()
            .lookup("bogus", ALL)
            .unwrap_err();
        match err {
            ConfigurationError::UnrecognizedTarget { target, known } => {
                assert_eq!(target, "bogus");
                assert_eq!(
                    known,
                    [
                        "arm",
                        "arm64",
                        "darwin",
                        "darwin-aarch64",
                        "darwin-x86-64",
                        "linux-x86-64",
                        "win32-x86-64-gnu",
                        "win32-x86-64-msvc",
                        "x86",
                        "x86_64",
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn prebuilt_paths_embed_api_level() {
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let root = Path::new("/ndk/toolchains/llvm/prebuilt/linux-x86_64");
        let paths = resolver
            .resolve_compiler_paths(prebuilt("arm64"), 21, 22, root)
            .unwrap();
        assert_eq!(paths.cc, root.join("bin/aarch64-linux-android21-clang"));
        assert_eq!(paths.cxx, root.join("bin/aarch64-linux-android21-clang++"));
        assert_eq!(paths.ar, root.join("bin/aarch64-linux-android-ar"));
        assert_eq!(paths.sysroot, root.join("sysroot"));
    }

    #[test]
    fn prebuilt_arm_splits_compiler_and_binutils_prefix() {
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let root = Path::new("/tc");
        let paths = resolver
            .resolve_compiler_paths(prebuilt("arm"), 19, 21, root)
            .unwrap();
        assert_eq!(paths.cc, root.join("bin/armv7a-linux-androideabi19-clang"));
        assert_eq!(paths.ar, root.join("bin/arm-linux-androideabi-ar"));
    }

    #[test]
    fn generated_paths_live_in_per_api_dir() {
        let resolver = ToolchainResolver::new(HostPlatform::DarwinX86_64);
        let root = Path::new("/tmp/toolchains");
        let paths = resolver
            .resolve_compiler_paths(generated("x86"), 16, 18, root)
            .unwrap();
        assert_eq!(paths.cc, root.join("x86-16/bin/i686-linux-android-clang"));
        assert_eq!(paths.cxx, root.join("x86-16/bin/i686-linux-android-clang++"));
        assert_eq!(paths.ar, root.join("x86-16/bin/i686-linux-android-ar"));
        assert_eq!(paths.sysroot, root.join("x86-16/sysroot"));
    }

    #[test]
    fn windows_hosts_get_suffixes() {
        let resolver = ToolchainResolver::new(HostPlatform::WindowsX86_64);
        let root = Path::new("ndk");
        let paths = resolver
            .resolve_compiler_paths(prebuilt("x86_64"), 26, 25, root)
            .unwrap();
        assert_eq!(paths.cc, root.join("bin/x86_64-linux-android26-clang.cmd"));
        assert_eq!(paths.cxx, root.join("bin/x86_64-linux-android26-clang++.cmd"));
        assert_eq!(paths.ar, root.join("bin/llvm-ar.exe"));
    }

    #[test]
    fn modern_ndk_always_uses_llvm_ar() {
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let root = Path::new("/root");
        for record in ToolchainCatalog::builtin().records() {
            for major in [23, 24, 25, 27] {
                let Some(paths) = resolver.resolve_compiler_paths(record, 21, major, root) else {
                    assert_eq!(record.flavor, ToolchainFlavor::DesktopHost);
                    continue;
                };
                assert_eq!(paths.ar, root.join("bin/llvm-ar"), "{record:?} r{major}");
            }
        }
    }

    #[test]
    fn desktop_has_no_compiler_paths() {
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let record = prebuilt("linux-x86-64");
        assert!(resolver.resolve_compiler_paths(record, 21, 25, Path::new("/")).is_none());
        assert!(resolver.toolchain_root(record, Path::new("/ndk"), Path::new("/gen")).is_none());
    }

    #[test]
    fn prebuilt_root_uses_host_tag() {
        let resolver = ToolchainResolver::new(HostPlatform::Windows);
        let root = resolver
            .toolchain_root(prebuilt("arm64"), Path::new("/ndk"), Path::new("/gen"))
            .unwrap();
        assert_eq!(root, Path::new("/ndk/toolchains/llvm/prebuilt/windows"));
        let root = resolver
            .toolchain_root(generated("arm64"), Path::new("/ndk"), Path::new("/gen"))
            .unwrap();
        assert_eq!(root, Path::new("/gen"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let root = Path::new("/r");
        for record in ToolchainCatalog::builtin().records() {
            assert_eq!(
                resolver.resolve_compiler_paths(record, 24, 22, root),
                resolver.resolve_compiler_paths(record, 24, 22, root)
            );
        }
    }

    #[test]
    fn ndk_major_parsing_degrades_to_zero() {
        assert_eq!(ndk_major_version("25.2.9519653"), 25);
        assert_eq!(ndk_major_version("21"), 21);
        assert_eq!(ndk_major_version("r21e"), 0);
        assert_eq!(ndk_major_version(""), 0);
        assert_eq!(ndk_major_version("ndk-bundle"), 0);
    }

    #[test]
    fn api_level_gate_for_64_bit() {
        for label in ["arm64", "x86_64"] {
            for api in [16, 19, 20] {
                assert!(matches!(
                    check_api_level(label, api),
                    Err(Error::UnsupportedApiLevelForArchitecture { .. })
                ));
            }
            assert!(check_api_level(label, 21).is_ok());
        }
        assert!(check_api_level("arm", 16).is_ok());
        assert!(check_api_level("x86", 16).is_ok());
    }

    #[test]
    fn detects_ndk_version_from_source_properties() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("source.properties"),
            "Pkg.Desc = Android NDK\nPkg.Revision = 26.3.11579264\n",
        )
        .unwrap();
        let version = NdkVersion::detect(dir.path());
        assert_eq!(version.revision, "26.3.11579264");
        assert_eq!(version.major, 26);
    }

    #[test]
    fn detects_ndk_version_from_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let ndk = dir.path().join("22.1.7171670");
        std::fs::create_dir(&ndk).unwrap();
        assert_eq!(NdkVersion::detect(&ndk).major, 22);

        let bundle = dir.path().join("ndk-bundle");
        std::fs::create_dir(&bundle).unwrap();
        assert_eq!(NdkVersion::detect(&bundle).major, 0);
    }
}
