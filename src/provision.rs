use std::{fs, path::PathBuf};

use crate::{
    error::Error,
    process::{ProcessRunner, ProcessSpec, run_checked},
    toolchain::{ToolchainFlavor, ToolchainRecord, check_api_level, generated_toolchain_dir},
};

/// Generates standalone toolchains with the NDK's
/// `build/tools/make_standalone_toolchain.py`.
///
/// Every call regenerates from scratch so a half-written toolchain left by an
/// interrupted run heals itself. Two calls for the same architecture and API
/// level must not overlap; distinct pairs write distinct directories.
pub struct ToolchainProvisioner<'a> {
    runner: &'a dyn ProcessRunner,
    ndk_dir: PathBuf,
    toolchain_root: PathBuf,
    python: String,
}

impl<'a> ToolchainProvisioner<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        ndk_dir: impl Into<PathBuf>,
        toolchain_root: impl Into<PathBuf>,
        python: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            ndk_dir: ndk_dir.into(),
            toolchain_root: toolchain_root.into(),
            python: python.into(),
        }
    }

    pub fn command(&self, record: &ToolchainRecord, api_level: u32) -> ProcessSpec {
        let script = self
            .ndk_dir
            .join("build")
            .join("tools")
            .join("make_standalone_toolchain.py");
        let install_dir =
            generated_toolchain_dir(&self.toolchain_root, record.architecture_label, api_level);

        let mut spec = ProcessSpec::new(&self.python);
        spec.arg(script)
            .arg(format!("--arch={}", record.architecture_label))
            .arg(format!("--api={api_level}"))
            .arg(format!("--install-dir={}", install_dir.display()))
            .arg("--force");
        spec
    }

    /// Returns the install directory of the freshly generated toolchain.
    pub fn ensure_toolchain(
        &self,
        record: &ToolchainRecord,
        api_level: u32,
    ) -> Result<PathBuf, Error> {
        if record.flavor != ToolchainFlavor::AndroidGeneratedStandalone {
            return Err(Error::FlavorMismatch {
                label: record.architecture_label.to_string(),
                flavor: record.flavor,
            });
        }
        check_api_level(record.architecture_label, api_level)?;

        let install_dir =
            generated_toolchain_dir(&self.toolchain_root, record.architecture_label, api_level);
        if install_dir.exists() {
            fs::remove_dir_all(&install_dir).map_err(|e| Error::io(&install_dir, e))?;
        }
        fs::create_dir_all(&self.toolchain_root).map_err(|e| Error::io(&self.toolchain_root, e))?;

        let spec = self.command(record, api_level);
        run_checked(self.runner, &spec, Some(record.target_triple), Some(record.flavor))?;
        Ok(install_dir)
    }
}
