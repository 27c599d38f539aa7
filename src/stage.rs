use std::{
    fs,
    path::{Path, PathBuf},
};

use filetime::FileTime;
use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::error::{ConfigurationError, Error};

/// Directory cargo writes a profile's artifacts to. The `dev` and `test`
/// profiles share `debug`, `bench` shares `release`.
pub fn profile_dir(profile: &str) -> &str {
    match profile {
        "dev" | "test" => "debug",
        "bench" => "release",
        other => other,
    }
}

/// `{target}/{profile}` for the host's default triple, otherwise
/// `{target}/{triple}/{profile}`, matching whether `--target` was passed.
pub fn cargo_output_dir(
    target_dir: &Path,
    triple: &str,
    default_triple: Option<&str>,
    profile: &str,
) -> PathBuf {
    if default_triple == Some(triple) {
        target_dir.join(profile_dir(profile))
    } else {
        target_dir.join(triple).join(profile_dir(profile))
    }
}

/// Shared library names for `libname` on Linux/Android, macOS and Windows.
pub fn default_includes(libname: &str) -> Vec<String> {
    vec![
        format!("lib{libname}.so"),
        format!("lib{libname}.dylib"),
        format!("{libname}.dll"),
    ]
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Copies the artifacts matching `includes` from `source` into `dest`.
///
/// Patterns are globs relative to `source`; `*` stays within one directory
/// and `**` crosses directories. Returns the copied destination paths.
pub fn stage(source: &Path, dest: &Path, includes: &[String]) -> Result<Vec<PathBuf>, Error> {
    let patterns = includes
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ConfigurationError::InvalidValue {
                field: "target-includes".into(),
                value: format!("{p} ({e})"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if !source.is_dir() {
        return Err(Error::ArtifactNotFound {
            dir: source.to_path_buf(),
            patterns: includes.to_vec(),
        });
    }

    // Cargo's profile directories hold deps/, build/ and incremental/ trees;
    // only descend as deep as the patterns can reach.
    let max_depth = if includes.iter().any(|p| p.contains("**")) {
        usize::MAX
    } else {
        includes
            .iter()
            .map(|p| p.matches('/').count() + 1)
            .max()
            .unwrap_or(1)
    };

    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;

    let mut copied = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).max_depth(max_depth).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            Error::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if !patterns
            .iter()
            .any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
        {
            continue;
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::copy(entry.path(), &target).map_err(|e| Error::io(entry.path(), e))?;

        // Keep the compiler's timestamp so the host's up-to-date checks see
        // the artifact as unchanged when cargo did not rebuild it.
        let metadata = entry.metadata().map_err(|e| Error::io(entry.path(), e.into()))?;
        filetime::set_file_mtime(&target, FileTime::from_last_modification_time(&metadata))
            .map_err(|e| Error::io(&target, e))?;

        copied.push(target);
    }

    if copied.is_empty() {
        return Err(Error::ArtifactNotFound {
            dir: source.to_path_buf(),
            patterns: includes.to_vec(),
        });
    }
    Ok(copied)
}
