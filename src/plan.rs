//! Steps the host build system schedules, and a sequential executor for
//! hosts that just want everything built in one go.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use termcolor::Color;

use crate::{
    HostPlatform,
    cargo::{self, BuildInvoker, PreInvocationHook, RustcInfo},
    error::{ConfigurationError, Error},
    linker_wrapper::{LinkerWrapperMaterializer, WrapperPaths},
    meta::{ResolvedConfig, ResolvedTarget},
    process::ProcessRunner,
    project::HostProject,
    provision::ToolchainProvisioner,
    shell::Shell,
    stage::{self, cargo_output_dir, default_includes},
    toolchain::{CompilerPaths, ToolchainFlavor, ToolchainResolver, generated_toolchain_dir},
};

/// Directory under the project's build dir holding the linker wrapper.
pub const LINKER_WRAPPER_DIR: &str = "linker-wrapper";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Step {
    GenerateLinkerWrapper,
    GenerateToolchain { label: String, api_level: u32 },
    CargoBuild { variant: String, label: String },
}

impl Step {
    /// Unique name the host registers the step under.
    pub fn name(&self) -> String {
        match self {
            Step::GenerateLinkerWrapper => "generate-linker-wrapper".into(),
            Step::GenerateToolchain { label, api_level } => {
                format!("generate-toolchain-{label}-{api_level}")
            }
            Step::CargoBuild { variant, label } => format!("cargo-build-{variant}-{label}"),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A step plus what the host needs for up-to-date checks and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    #[serde(flatten)]
    pub step: Step,
    pub depends_on: Vec<String>,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

impl PlannedStep {
    pub fn name(&self) -> String {
        self.step.name()
    }
}

/// Receives steps from [`BuildPlan::register`]. Dependencies are always
/// registered before their dependents.
pub trait TaskRegistry {
    fn register(&mut self, step: &PlannedStep);
}

impl TaskRegistry for Vec<PlannedStep> {
    fn register(&mut self, step: &PlannedStep) {
        self.push(step.clone());
    }
}

/// Topologically ordered steps for every (variant, target) pair.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    steps: Vec<PlannedStep>,
}

impl BuildPlan {
    pub fn new(config: &ResolvedConfig, project: &dyn HostProject) -> Self {
        let mut steps = Vec::new();

        let wrapper = config.has_android_targets().then(|| {
            let step = PlannedStep {
                step: Step::GenerateLinkerWrapper,
                depends_on: vec![],
                inputs: vec![],
                output_dir: project.build_dir().join(LINKER_WRAPPER_DIR),
            };
            let name = step.name();
            steps.push(step);
            name
        });

        // One provisioning step per (label, api) however many variants use it.
        let mut toolchains = BTreeMap::new();
        for target in &config.targets {
            if target.record.flavor != ToolchainFlavor::AndroidGeneratedStandalone {
                continue;
            }
            let label = target.record.architecture_label;
            toolchains
                .entry((label, target.api_level))
                .or_insert_with(|| {
                    let step = PlannedStep {
                        step: Step::GenerateToolchain {
                            label: label.to_string(),
                            api_level: target.api_level,
                        },
                        depends_on: vec![],
                        inputs: config.ndk_dir.iter().cloned().collect(),
                        output_dir: generated_toolchain_dir(
                            &config.toolchain_directory,
                            label,
                            target.api_level,
                        ),
                    };
                    let name = step.name();
                    steps.push(step);
                    name
                });
        }

        for variant in config.variant_names() {
            let root = project.native_library_root(&variant);
            for target in &config.targets {
                let record = &target.record;
                let mut depends_on = Vec::new();
                if record.flavor.is_android() {
                    depends_on.extend(wrapper.clone());
                }
                if let Some(name) = toolchains.get(&(record.architecture_label, target.api_level)) {
                    depends_on.push(name.clone());
                }
                steps.push(PlannedStep {
                    step: Step::CargoBuild {
                        variant: variant.clone(),
                        label: record.architecture_label.to_string(),
                    },
                    depends_on,
                    inputs: vec![config.module_dir.clone()],
                    output_dir: root.join(record.output_folder),
                });
            }
        }

        Self { steps }
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn register(&self, registry: &mut dyn TaskRegistry) {
        for step in &self.steps {
            registry.register(step);
        }
    }
}

/// Where one (variant, target) pair is in its build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Resolved,
    Provisioning,
    Invoking,
    Staging,
    Done,
    Failed,
}

impl TargetState {
    pub fn can_advance_to(self, next: TargetState) -> bool {
        use TargetState::*;
        matches!(
            (self, next),
            (Resolved, Provisioning | Invoking)
                | (Provisioning, Invoking | Failed)
                | (Invoking, Staging | Failed)
                | (Staging, Done | Failed)
        )
    }
}

#[derive(Debug)]
pub struct TargetOutcome {
    pub variant: String,
    pub label: String,
    pub triple: String,
    pub state: TargetState,
    /// State the target was in when it failed.
    pub failed_during: Option<TargetState>,
    /// Shared when several targets fail on one provisioning step.
    pub error: Option<Arc<Error>>,
    pub staged: Vec<PathBuf>,
}

impl TargetOutcome {
    fn new(variant: &str, target: &ResolvedTarget) -> Self {
        Self {
            variant: variant.to_string(),
            label: target.record.architecture_label.to_string(),
            triple: target.record.target_triple.to_string(),
            state: TargetState::Resolved,
            failed_during: None,
            error: None,
            staged: vec![],
        }
    }

    fn advance(&mut self, next: TargetState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "{:?} -> {next:?}",
            self.state
        );
        self.state = next;
    }

    fn fail(&mut self, error: Arc<Error>) {
        self.failed_during = Some(self.state);
        self.advance(TargetState::Failed);
        self.error = Some(error);
    }
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub default_triple: Option<String>,
    pub targets: Vec<TargetOutcome>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(|t| t.state == TargetState::Done)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.targets.iter().filter(|t| t.state == TargetState::Failed)
    }
}

/// Runs a [`BuildPlan`] step by step on the calling thread. A failure stops
/// only the targets that depend on the failed step.
pub struct Pipeline<'a> {
    config: &'a ResolvedConfig,
    project: &'a dyn HostProject,
    runner: &'a dyn ProcessRunner,
    host: HostPlatform,
    hook: Option<PreInvocationHook>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a ResolvedConfig,
        project: &'a dyn HostProject,
        runner: &'a dyn ProcessRunner,
        host: HostPlatform,
    ) -> Self {
        Self {
            config,
            project,
            runner,
            host,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: PreInvocationHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// `host:` from `rustc -vV`. Failing to ask is only a warning; every
    /// target then gets an explicit `--target`.
    pub fn default_triple(&self, shell: &mut Shell) -> Option<String> {
        let info = match RustcInfo::detect(self.runner, &self.config.commands.rustc) {
            Ok(info) => info,
            Err(e) => {
                shell.report(|s| {
                    s.warn(format_args!(
                        "could not detect the default target triple, passing --target for every target\n{e}"
                    ))
                });
                return None;
            }
        };
        if info.supports_custom_profiles() == Some(false) {
            shell.report(|s| {
                s.warn(format_args!(
                    "rustc {} predates custom profiles; `--profile` may be rejected",
                    info.release.as_deref().unwrap_or("?")
                ))
            });
        }
        if info.host.is_none() {
            shell.report(|s| {
                s.warn(format_args!(
                    "failed to parse `{} -vV` output, passing --target for every target",
                    self.config.commands.rustc
                ))
            });
        }
        info.host
    }

    pub fn run(&self, shell: &mut Shell) -> PipelineReport {
        let plan = BuildPlan::new(self.config, self.project);
        let default_triple = self.default_triple(shell);

        let mut wrapper: Option<Result<WrapperPaths, Arc<Error>>> = None;
        let mut toolchains: BTreeMap<String, Result<PathBuf, Arc<Error>>> = BTreeMap::new();
        let mut outcomes = Vec::new();
        let mut requests = BTreeMap::new();

        for planned in plan.steps() {
            match &planned.step {
                Step::GenerateLinkerWrapper => {
                    shell.report(|s| {
                        s.verbose(|s| {
                            s.status("Generating", format_args!("{}", planned.output_dir.display()))
                        })
                    });
                    let result = LinkerWrapperMaterializer::new(self.host)
                        .materialize(&planned.output_dir)
                        .map_err(Arc::new);
                    wrapper = Some(result);
                }
                Step::GenerateToolchain { label, api_level } => {
                    let result = self.provision(shell, label, *api_level).map_err(Arc::new);
                    toolchains.insert(planned.name(), result);
                }
                Step::CargoBuild { variant, label } => {
                    let Some(target) = self
                        .config
                        .targets
                        .iter()
                        .find(|t| t.record.architecture_label == label.as_str())
                    else {
                        continue;
                    };
                    let request = requests.entry(variant.clone()).or_insert_with(|| {
                        let mut request = self.config.build_request(variant);
                        request.hook = self.hook.clone();
                        request
                    });

                    let mut outcome = TargetOutcome::new(variant, target);
                    let deps = Dependencies {
                        wrapper: wrapper.as_ref(),
                        toolchain: planned
                            .depends_on
                            .iter()
                            .find_map(|name| toolchains.get(name)),
                    };
                    self.build_target(
                        shell,
                        &mut outcome,
                        request,
                        target,
                        deps,
                        default_triple.as_deref(),
                        &planned.output_dir,
                    );
                    outcomes.push(outcome);
                }
            }
        }

        PipelineReport {
            default_triple,
            targets: outcomes,
        }
    }

    fn provision(&self, shell: &mut Shell, label: &str, api_level: u32) -> Result<PathBuf, Error> {
        let target = self
            .config
            .targets
            .iter()
            .find(|t| t.record.architecture_label == label)
            .ok_or_else(|| ConfigurationError::UnrecognizedTarget {
                target: label.to_string(),
                known: vec![],
            })?;
        let ndk_dir = self
            .config
            .ndk_dir
            .as_deref()
            .ok_or(ConfigurationError::MissingField("ndk-directory"))?;

        shell.report(|s| {
            s.status(
                "Provisioning",
                format_args!("standalone toolchain {label} (API {api_level})"),
            )
        });
        ToolchainProvisioner::new(
            self.runner,
            ndk_dir,
            &self.config.toolchain_directory,
            &self.config.commands.python,
        )
        .ensure_toolchain(&target.record, api_level)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_target(
        &self,
        shell: &mut Shell,
        outcome: &mut TargetOutcome,
        request: &cargo::BuildRequest,
        target: &ResolvedTarget,
        deps: Dependencies<'_>,
        default_triple: Option<&str>,
        dest: &Path,
    ) {
        let record = &target.record;

        if let Some(result) = deps.toolchain {
            outcome.advance(TargetState::Provisioning);
            if let Err(e) = result {
                self.report_failure(shell, outcome, e.clone());
                return;
            }
        }

        outcome.advance(TargetState::Invoking);
        let wrapper = match (record.flavor.is_android(), deps.wrapper) {
            (true, Some(Ok(paths))) => Some(paths),
            (true, Some(Err(e))) => {
                self.report_failure(shell, outcome, e.clone());
                return;
            }
            _ => None,
        };

        let paths = match self.compiler_paths(target, request.ndk_major) {
            Ok(paths) => paths,
            Err(e) => {
                self.report_failure(shell, outcome, Arc::new(e));
                return;
            }
        };

        shell.report(|s| {
            s.status(
                "Building",
                format_args!("{} ({}) for {}", record.architecture_label, record.target_triple, outcome.variant),
            )
        });
        if let Some(paths) = &paths {
            shell.report(|s| {
                s.verbose(|s| {
                    s.status_with_color("Using", format_args!("{}", paths.cc.display()), Color::Cyan)
                })
            });
        }

        let invoker = BuildInvoker::new(self.runner, shell.verbosity());
        if let Err(e) = invoker.invoke(request, record, paths.as_ref(), wrapper, default_triple) {
            self.report_failure(shell, outcome, Arc::new(e));
            return;
        }

        outcome.advance(TargetState::Staging);
        let target_dir = request
            .target_directory
            .clone()
            .unwrap_or_else(|| request.module_dir.join("target"));
        let source = cargo_output_dir(&target_dir, record.target_triple, default_triple, &request.profile);
        let includes = request
            .target_includes
            .clone()
            .unwrap_or_else(|| default_includes(&request.libname));

        match stage::stage(&source, dest, &includes) {
            Ok(staged) => {
                shell.report(|s| {
                    s.verbose(|s| {
                        for file in &staged {
                            s.status("Staged", format_args!("{}", file.display()))?;
                        }
                        Ok(())
                    })
                });
                outcome.staged = staged;
                outcome.advance(TargetState::Done);
            }
            Err(e) => self.report_failure(shell, outcome, Arc::new(e)),
        }
    }

    fn compiler_paths(
        &self,
        target: &ResolvedTarget,
        ndk_major: u32,
    ) -> Result<Option<CompilerPaths>, Error> {
        let record = &target.record;
        if !record.flavor.is_android() {
            return Ok(None);
        }
        let ndk_dir = self
            .config
            .ndk_dir
            .as_deref()
            .ok_or(ConfigurationError::MissingField("ndk-directory"))?;
        let resolver = ToolchainResolver::new(self.host);
        let Some(root) = resolver.toolchain_root(record, ndk_dir, &self.config.toolchain_directory)
        else {
            return Ok(None);
        };
        Ok(resolver.resolve_compiler_paths(record, target.api_level, ndk_major, &root))
    }

    fn report_failure(&self, shell: &mut Shell, outcome: &mut TargetOutcome, error: Arc<Error>) {
        shell.report(|s| {
            s.error(format_args!(
                "{} for {} failed: {error}",
                outcome.label, outcome.variant
            ))
        });
        outcome.fail(error);
    }

    /// `cargo clean` in the crate directory.
    pub fn clean(&self, shell: &mut Shell) -> Result<(), Error> {
        shell.report(|s| s.status("Cleaning", self.config.module_dir.display()));
        let variant = self.config.variant_names().into_iter().next().unwrap_or_default();
        cargo::clean(self.runner, &self.config.build_request(&variant))
    }
}

#[derive(Clone, Copy)]
struct Dependencies<'a> {
    wrapper: Option<&'a Result<WrapperPaths, Arc<Error>>>,
    toolchain: Option<&'a Result<PathBuf, Arc<Error>>>,
}

/// Labels of the targets that failed, for a summary line.
pub fn failed_labels(report: &PipelineReport) -> BTreeSet<String> {
    report
        .failures()
        .map(|t| format!("{} ({})", t.label, t.variant))
        .collect()
}
