//! The scripts rustc uses as its linker for Android targets.
//!
//! rustc invokes `CARGO_TARGET_<TRIPLE>_LINKER` with its own argument list.
//! The wrapper prepends the SONAME argument and adjusts libraries the NDK
//! no longer ships before handing everything to the NDK's clang driver.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{HostPlatform, error::Error};

/// File name prefix shared by every wrapper file; anything else in the
/// output directory with this prefix is a leftover and gets removed.
const WRAPPER_PREFIX: &str = "linker-wrapper";

const POSIX_SCRIPT: &str = "linker-wrapper.sh";
const WINDOWS_SCRIPT: &str = "linker-wrapper.bat";
const PYTHON_SCRIPT: &str = "linker-wrapper.py";

const BUNDLED: &[(&str, &str)] = &[
    (POSIX_SCRIPT, include_str!("linker_wrapper/linker-wrapper.sh")),
    (WINDOWS_SCRIPT, include_str!("linker_wrapper/linker-wrapper.bat")),
    (PYTHON_SCRIPT, include_str!("linker_wrapper/linker-wrapper.py")),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperPaths {
    /// Entry point for this host, set as the target's linker.
    pub script: PathBuf,
    /// Shared implementation the entry point runs.
    pub python: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkerWrapperMaterializer {
    host: HostPlatform,
}

impl LinkerWrapperMaterializer {
    pub fn new(host: HostPlatform) -> Self {
        Self { host }
    }

    pub fn paths(&self, dest: &Path) -> WrapperPaths {
        let script = if self.host.is_windows() {
            WINDOWS_SCRIPT
        } else {
            POSIX_SCRIPT
        };
        WrapperPaths {
            script: dest.join(script),
            python: dest.join(PYTHON_SCRIPT),
        }
    }

    /// Writes every bundled script into `dest`, replacing older copies.
    ///
    /// Each file is written to a temporary name and renamed into place, so a
    /// build step starting concurrently never reads a partial script.
    pub fn materialize(&self, dest: &Path) -> Result<WrapperPaths, Error> {
        fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;
        remove_stale(dest).map_err(|e| Error::io(dest, e))?;

        for (name, contents) in BUNDLED {
            let path = dest.join(name);
            write_atomic(&path, contents.as_bytes()).map_err(|e| Error::io(&path, e))?;
        }

        Ok(self.paths(dest))
    }
}

fn remove_stale(dest: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(WRAPPER_PREFIX) || BUNDLED.iter().any(|(n, _)| *n == name) {
            continue;
        }
        let removed = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        match removed {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    // Temp names start with `.tmp`, so `remove_stale` never sees them.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    set_executable(tmp.path())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
