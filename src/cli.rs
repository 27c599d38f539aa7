use std::path::{Path, PathBuf};

use cargo_metadata::MetadataCommand;
use clap::{ArgAction, Parser, Subcommand};

use crate::{
    HostPlatform,
    meta::{CONFIG_FILE_NAME, Config, PropertySource, ResolvedConfig},
    plan::{BuildPlan, Pipeline, failed_labels},
    process::SystemRunner,
    project::{ApplicationProject, HostProject, LibraryProject},
    shell::{Shell, Verbosity},
    toolchain::ToolchainCatalog,
};

mod env;

pub use env::run as run_env;

#[derive(Debug, Parser)]
#[command(name = "cargo android-build", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory of the Android project (holds rust-android.toml and local.properties)
    #[arg(long, default_value = ".", env = "RUST_ANDROID_PROJECT_DIR", global = true)]
    project_dir: PathBuf,

    /// Configuration file, relative to the project directory
    #[arg(long, default_value = CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Build directory of the project [default: <project-dir>/build]
    #[arg(long, global = true)]
    build_dir: Option<PathBuf>,

    /// Stage into the layout of an Android library project
    #[arg(long, global = true)]
    library: bool,

    /// Minimum SDK version of the project, used when no API level is configured
    #[arg(long, env = "RUST_ANDROID_MIN_SDK", global = true)]
    min_sdk: Option<u32>,

    /// Build only this variant (repeatable)
    #[arg(long = "variant", value_name = "NAME", global = true)]
    variants: Vec<String>,

    /// Use verbose output (-vv very verbose)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Do not print cargo log messages
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, value_name = "WHEN", global = true)]
    color: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Build every variant and target and stage the libraries (default)
    Build,
    /// Run `cargo clean` in the crate directory
    Clean,
    /// Print the steps a build would run
    Plan {
        /// Print output in JSON format
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    fn project(
        &self,
        props: &PropertySource,
        shell: &mut Shell,
    ) -> anyhow::Result<Box<dyn HostProject>> {
        let project_dir = dunce::canonicalize(&self.project_dir)?;
        let name = project_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("app")
            .to_string();
        let build_dir = self
            .build_dir
            .clone()
            .unwrap_or_else(|| project_dir.join("build"));
        let ndk_dir = props
            .local("ndk.dir")
            .map(PathBuf::from)
            .or_else(|| derive_ndk_path(shell).map(|(path, _)| path));

        Ok(if self.library {
            Box::new(LibraryProject {
                name,
                project_dir,
                build_dir,
                min_sdk: self.min_sdk,
                ndk_dir,
            })
        } else {
            Box::new(ApplicationProject {
                name,
                project_dir,
                build_dir,
                min_sdk: self.min_sdk,
                ndk_dir,
            })
        })
    }
}

/// Parses the dotted numeric components of an NDK directory name.
fn ndk_version_key(name: &str) -> Option<Vec<u64>> {
    name.split('.').map(|part| part.parse().ok()).collect()
}

fn highest_version_ndk_in_path(ndk_dir: &Path) -> Option<PathBuf> {
    if ndk_dir.exists() {
        std::fs::read_dir(ndk_dir)
            .ok()?
            .flat_map(Result::ok)
            .filter_map(|x| {
                let path = x.path();
                path.file_name()
                    .and_then(|name| name.to_str())
                    .and_then(ndk_version_key)
                    .map(|version| (version, path))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, path)| path)
    } else {
        None
    }
}

/// Finds an NDK, returning it with a description of where it came from.
pub(crate) fn derive_ndk_path(shell: &mut Shell) -> Option<(PathBuf, String)> {
    let ndk_vars = [
        "ANDROID_NDK_HOME",
        "ANDROID_NDK_ROOT",
        "ANDROID_NDK_PATH",
        "NDK_HOME",
    ];
    for var in ndk_vars {
        if let Some(path) = std::env::var_os(var) {
            let path = PathBuf::from(path);
            shell.report(|shell| {
                shell.very_verbose(|shell| {
                    shell.status_with_color(
                        "Using",
                        format!("{var}: {}", path.display()),
                        termcolor::Color::Cyan,
                    )
                })
            });
            return highest_version_ndk_in_path(&path)
                .or(Some(path))
                .map(|p| (p, var.to_string()));
        }
    }

    let sdk_vars = ["ANDROID_HOME", "ANDROID_SDK_ROOT", "ANDROID_SDK_HOME"];
    for var in sdk_vars {
        if let Some(sdk_path) = std::env::var_os(var) {
            let ndk_path = PathBuf::from(&sdk_path).join("ndk");
            if let Some(v) = highest_version_ndk_in_path(&ndk_path) {
                return Some((v, var.to_string()));
            }
        }
    }

    // Check Android Studio installed directories
    #[cfg(windows)]
    let base_dir = pathos::user::local_dir().ok();
    #[cfg(target_os = "linux")]
    let base_dir = pathos::user::data_dir().ok();
    #[cfg(target_os = "macos")]
    let base_dir = pathos::user::home_dir().ok().map(|home| home.join("Library"));
    #[cfg(not(any(windows, target_os = "linux", target_os = "macos")))]
    let base_dir: Option<PathBuf> = None;

    let ndk_dir = base_dir?.join("Android").join("sdk").join("ndk");
    shell.report(|shell| {
        shell.very_verbose(|shell| {
            shell.status_with_color(
                "Searching",
                format!("default NDK dir: {}", ndk_dir.display()),
                termcolor::Color::Cyan,
            )
        })
    });
    highest_version_ndk_in_path(&ndk_dir).map(|path| (path, "standard location".to_string()))
}

/// Fills in cargo's target directory for the crate when none is configured.
fn detect_target_dir(config: &mut ResolvedConfig, shell: &mut Shell) {
    if config.target_directory.is_some() {
        return;
    }
    let metadata = MetadataCommand::new()
        .cargo_path(&config.commands.cargo)
        .manifest_path(config.module_dir.join("Cargo.toml"))
        .no_deps()
        .exec();
    match metadata {
        Ok(metadata) => {
            config.target_directory = Some(metadata.target_directory.into_std_path_buf());
        }
        Err(e) => {
            shell.report(|shell| {
                shell.warn(format!(
                    "could not read cargo metadata, assuming `target` in the crate directory: {e}"
                ))
            });
        }
    }
}

pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    let mut shell = Shell::new();

    let args = match Args::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => {
            print!("{e}");
            std::process::exit(0);
        }
        Err(e) => {
            shell.error(e)?;
            std::process::exit(2);
        }
    };

    shell.set_verbosity(args.verbosity());
    shell.set_color_choice(args.color.as_deref())?;

    let project_dir = dunce::canonicalize(&args.project_dir)?;
    let props = PropertySource::from_project(&project_dir);
    let project = args.project(&props, &mut shell)?;

    let config_path = project_dir.join(&args.config);
    let resolved = Config::load(&config_path)
        .and_then(|config| config.resolve(project.as_ref(), &props, ToolchainCatalog::builtin()));
    let mut config = match resolved {
        Ok(config) => config,
        Err(e) => {
            shell.error(e)?;
            if project.ndk_directory().is_none() {
                shell.note(
                    "Set the environment ANDROID_NDK_HOME to your NDK installation's root directory,\nor `ndk.dir` in local.properties.",
                )?;
            }
            std::process::exit(1);
        }
    };
    config.select_variants(&args.variants);

    shell.verbose(|shell| {
        if let Some(ndk) = &config.ndk_dir {
            shell.status("Using", format!("NDK {} at {}", config.ndk_version, ndk.display()))?;
        }
        shell.status(
            "Using",
            if config.use_prebuilt {
                "prebuilt NDK toolchains"
            } else {
                "generated standalone toolchains"
            },
        )
    })?;

    let runner = SystemRunner;
    let host = HostPlatform::current();

    match args.command.unwrap_or(Command::Build) {
        Command::Build => {
            detect_target_dir(&mut config, &mut shell);
            let report = Pipeline::new(&config, project.as_ref(), &runner, host).run(&mut shell);
            if !report.is_success() {
                let failed = failed_labels(&report).into_iter().collect::<Vec<_>>();
                shell.error(format!("could not build {}", failed.join(", ")))?;
                std::process::exit(1);
            }
            shell.status(
                "Finished",
                format!(
                    "{} librar{} staged",
                    report.targets.len(),
                    if report.targets.len() == 1 { "y" } else { "ies" }
                ),
            )?;
        }
        Command::Clean => {
            if let Err(e) = Pipeline::new(&config, project.as_ref(), &runner, host).clean(&mut shell) {
                shell.error(e)?;
                std::process::exit(1);
            }
        }
        Command::Plan { json } => {
            let plan = BuildPlan::new(&config, project.as_ref());
            if json {
                println!("{}", serde_json::to_string_pretty(plan.steps())?);
            } else {
                println!("{} ({} project)", project.name(), project.kind());
                for step in plan.steps() {
                    println!("{} -> {}", step.name(), step.output_dir.display());
                    for dep in &step.depends_on {
                        println!("    after {dep}");
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn picks_highest_ndk_version() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["21.4.7075529", "25.2.9519653", "25.10.1", "ndk-bundle"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        assert_eq!(
            highest_version_ndk_in_path(dir.path()),
            Some(dir.path().join("25.10.1"))
        );
        assert_eq!(highest_version_ndk_in_path(&dir.path().join("missing")), None);
    }

    #[test]
    fn verbosity_flags() {
        let args = Args::try_parse_from(["android-build", "-vv", "clean"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::VeryVerbose);
        assert!(matches!(args.command, Some(Command::Clean)));

        let args = Args::try_parse_from(["android-build", "--quiet", "-v"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Quiet);
        assert!(args.command.is_none());
    }

    #[test]
    fn global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "android-build",
            "plan",
            "--json",
            "--variant",
            "release",
            "--library",
        ])
        .unwrap();
        assert!(matches!(args.command, Some(Command::Plan { json: true })));
        assert_eq!(args.variants, ["release"]);
        assert!(args.library);
        assert_eq!(args.config, Path::new(CONFIG_FILE_NAME));
    }
}
