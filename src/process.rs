use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt, io,
    path::PathBuf,
    process::{Command, Stdio},
};

use crate::{
    error::{Error, FailureKind, ProcessFailure},
    toolchain::ToolchainFlavor,
};

/// A fully described external invocation: program, arguments, working
/// directory and the variables layered over the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub env: BTreeMap<String, OsString>,
    /// Collect stdout instead of forwarding it to ours.
    pub capture_stdout: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<OsString>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn capture_stdout(&mut self) -> &mut Self {
        self.capture_stdout = true;
        self
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn env_lossy(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string_lossy().into_owned()))
            .collect()
    }

    /// Builds the error for a failed run of this spec.
    pub(crate) fn failure(
        &self,
        kind: FailureKind,
        target_triple: Option<&str>,
        flavor: Option<ToolchainFlavor>,
    ) -> Error {
        Error::ExternalProcess(Box::new(ProcessFailure {
            kind,
            command_line: self.to_string(),
            target_triple: target_triple.map(str::to_string),
            flavor,
            environment: self.env_lossy(),
        }))
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> std::borrow::Cow<'_, str> {
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        s.into()
    } else {
        format!("{s:?}").into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Launches external processes. The host build system supplies its own
/// implementation when it owns process management.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput>;
}

/// Blocks the calling thread until the child exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        if spec.capture_stdout {
            let output = cmd.stdin(Stdio::null()).stderr(Stdio::inherit()).output()?;
            Ok(ProcessOutput {
                code: output.status.code(),
                stdout: output.stdout,
            })
        } else {
            let status = cmd.status()?;
            Ok(ProcessOutput {
                code: status.code(),
                stdout: Vec::new(),
            })
        }
    }
}

/// Runs `spec` and turns launch failures and non-zero exits into
/// [`Error::ExternalProcess`].
pub(crate) fn run_checked(
    runner: &dyn ProcessRunner,
    spec: &ProcessSpec,
    target_triple: Option<&str>,
    flavor: Option<ToolchainFlavor>,
) -> Result<ProcessOutput, Error> {
    let output = runner
        .run(spec)
        .map_err(|e| spec.failure(FailureKind::Spawn(e), target_triple, flavor))?;
    match output.code {
        Some(0) => Ok(output),
        Some(code) => Err(spec.failure(FailureKind::NonZeroExit(code), target_triple, flavor)),
        None => Err(spec.failure(FailureKind::Terminated, target_triple, flavor)),
    }
}
