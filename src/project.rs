//! What the core needs to know about the host project it builds for.

use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Lowest API level assumed when a project declares none.
pub const DEFAULT_MIN_SDK: u32 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Application,
    Library,
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProjectKind::Application => "application",
            ProjectKind::Library => "library",
        })
    }
}

/// Capability interface over the host project. The core only depends on
/// this trait, never on a particular project type.
pub trait HostProject {
    fn name(&self) -> &str;

    fn kind(&self) -> ProjectKind;

    fn project_dir(&self) -> &Path;

    /// Scratch space for generated files such as the linker wrapper.
    fn build_dir(&self) -> &Path;

    /// API level used for targets without an explicit one (the project's
    /// minimum SDK version).
    fn default_api_level(&self) -> u32;

    fn ndk_directory(&self) -> Option<&Path>;

    /// Root under which staged libraries for `variant` land; each target
    /// adds its own `android/<abi>` or `desktop/<name>` folder.
    fn native_library_root(&self, variant: &str) -> PathBuf;
}

#[derive(Debug, Clone)]
pub struct ApplicationProject {
    pub name: String,
    pub project_dir: PathBuf,
    pub build_dir: PathBuf,
    pub min_sdk: Option<u32>,
    pub ndk_dir: Option<PathBuf>,
}

impl HostProject for ApplicationProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProjectKind {
        ProjectKind::Application
    }

    fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    fn default_api_level(&self) -> u32 {
        self.min_sdk.unwrap_or(DEFAULT_MIN_SDK)
    }

    fn ndk_directory(&self) -> Option<&Path> {
        self.ndk_dir.as_deref()
    }

    fn native_library_root(&self, variant: &str) -> PathBuf {
        self.build_dir.join("rustJniLibs").join(variant)
    }
}

/// A library project packages its native code into an archive consumed by
/// other projects, so its staged output sits under `intermediates`.
#[derive(Debug, Clone)]
pub struct LibraryProject {
    pub name: String,
    pub project_dir: PathBuf,
    pub build_dir: PathBuf,
    pub min_sdk: Option<u32>,
    pub ndk_dir: Option<PathBuf>,
}

impl HostProject for LibraryProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProjectKind {
        ProjectKind::Library
    }

    fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    fn default_api_level(&self) -> u32 {
        self.min_sdk.unwrap_or(DEFAULT_MIN_SDK)
    }

    fn ndk_directory(&self) -> Option<&Path> {
        self.ndk_dir.as_deref()
    }

    fn native_library_root(&self, variant: &str) -> PathBuf {
        self.build_dir
            .join("intermediates")
            .join("rustJniLibs")
            .join(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_roots_differ_by_kind() {
        let app = ApplicationProject {
            name: "app".into(),
            project_dir: "/p/app".into(),
            build_dir: "/p/app/build".into(),
            min_sdk: Some(24),
            ndk_dir: None,
        };
        let lib = LibraryProject {
            name: "lib".into(),
            project_dir: "/p/lib".into(),
            build_dir: "/p/lib/build".into(),
            min_sdk: None,
            ndk_dir: None,
        };
        assert_eq!(
            app.native_library_root("debug"),
            Path::new("/p/app/build/rustJniLibs/debug")
        );
        assert_eq!(
            lib.native_library_root("release"),
            Path::new("/p/lib/build/intermediates/rustJniLibs/release")
        );
        assert_eq!(app.default_api_level(), 24);
        assert_eq!(lib.default_api_level(), DEFAULT_MIN_SDK);
        assert_eq!(app.kind().to_string(), "application");
        assert_eq!(lib.kind().to_string(), "library");
    }
}
