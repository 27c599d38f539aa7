use std::{collections::BTreeMap, fmt, io, path::PathBuf};

use crate::toolchain::ToolchainFlavor;

/// Problems detected while resolving configuration, before any process spawns.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("`{0}` must be set")]
    MissingField(&'static str),

    #[error("cannot set both `{0}` and `{1}`")]
    Conflict(&'static str, &'static str),

    #[error(
        "target `{target}` is not recognized (recognized targets: {})",
        .known.join(", ")
    )]
    UnrecognizedTarget { target: String, known: Vec<String> },

    #[error("`api-levels` missing entries for: {}", .0.join(", "))]
    MissingApiLevels(Vec<String>),

    #[error("duplicate toolchain record for `{label}` ({flavor})")]
    DuplicateToolchain {
        label: String,
        flavor: ToolchainFlavor,
    },

    #[error("prebuilt toolchains require NDK version 19 or newer (found major version {0})")]
    PrebuiltRequiresNdk19(u32),

    #[error("invalid value for `{field}`: {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(
        "architecture `{label}` requires API level 21 or higher, but API level {api_level} was requested"
    )]
    UnsupportedApiLevelForArchitecture { label: String, api_level: u32 },

    #[error(
        "`{label}` resolved to a {flavor} toolchain; only generated standalone toolchains can be provisioned"
    )]
    FlavorMismatch {
        label: String,
        flavor: ToolchainFlavor,
    },

    #[error("{0}")]
    ExternalProcess(Box<ProcessFailure>),

    #[error("no artifacts matching {patterns:?} found in {}", .dir.display())]
    ArtifactNotFound { dir: PathBuf, patterns: Vec<String> },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug)]
pub enum FailureKind {
    NonZeroExit(i32),
    /// Killed by a signal; no exit code.
    Terminated,
    Spawn(io::Error),
}

/// Everything needed to diagnose a failed external invocation without
/// re-running it at a higher verbosity.
#[derive(Debug)]
pub struct ProcessFailure {
    pub kind: FailureKind,
    pub command_line: String,
    pub target_triple: Option<String>,
    pub flavor: Option<ToolchainFlavor>,
    /// Variables this crate added on top of the inherited environment.
    pub environment: BTreeMap<String, String>,
}

impl ProcessFailure {
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            FailureKind::NonZeroExit(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::NonZeroExit(code) => {
                write!(f, "process exited with code {code}: `{}`", self.command_line)?
            }
            FailureKind::Terminated => {
                write!(f, "process terminated by signal: `{}`", self.command_line)?
            }
            FailureKind::Spawn(e) => {
                write!(f, "could not launch `{}`: {e}", self.command_line)?
            }
        }
        if let Some(triple) = &self.target_triple {
            write!(f, "\n  target: {triple}")?;
        }
        if let Some(flavor) = &self.flavor {
            write!(f, "\n  toolchain: {flavor}")?;
        }
        for (k, v) in &self.environment {
            write!(f, "\n  {k}={v}")?;
        }
        Ok(())
    }
}
