use std::{collections::BTreeMap, fmt::Write as _, path::PathBuf};

use clap::{CommandFactory, Parser};

use crate::{
    HostPlatform,
    cargo::{BuildInvoker, BuildRequest, CommandSettings},
    cli::derive_ndk_path,
    linker_wrapper::LinkerWrapperMaterializer,
    meta::MIN_PREBUILT_NDK_MAJOR,
    process::{ProcessSpec, SystemRunner},
    shell::{Shell, Verbosity},
    toolchain::{
        NdkVersion, ToolchainCatalog, ToolchainFlavor, ToolchainResolver, check_api_level,
    },
};

#[derive(Debug, Parser)]
struct EnvArgs {
    /// Architecture label of the target (i.e. arm64, x86_64, linux-x86-64)
    #[arg(short, long, env = "RUST_ANDROID_ENV_TARGET")]
    target: String,

    /// Platform (also known as API level)
    #[arg(long, default_value_t = 21, env = "RUST_ANDROID_ENV_PLATFORM")]
    platform: u32,

    /// Base name of the library, used for its SONAME
    #[arg(long, env = "RUST_ANDROID_ENV_LIBNAME")]
    libname: String,

    /// Use generated standalone toolchains instead of the NDK's prebuilt ones
    #[arg(long)]
    generated: bool,

    /// Root of generated standalone toolchains
    #[arg(long, env = "ANDROID_NDK_TOOLCHAIN_DIR")]
    toolchain_dir: Option<PathBuf>,

    /// Directory to write the linker wrapper to
    #[arg(long)]
    wrapper_dir: Option<PathBuf>,

    /// Python interpreter the linker wrapper runs with
    #[arg(long, default_value = "python", env = "RUST_ANDROID_PYTHON_COMMAND")]
    python: String,

    /// Use PowerShell syntax
    #[arg(long)]
    powershell: bool,

    /// Print output in JSON format
    #[arg(long)]
    json: bool,

    /// Use verbose output (-vv very verbose)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short)]
    quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, value_name = "WHEN")]
    color: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Posix,
    PowerShell,
    Json,
}

fn render(env: &BTreeMap<String, String>, format: Format) -> anyhow::Result<String> {
    let mut out = String::new();
    match format {
        Format::Json => {
            out = serde_json::to_string_pretty(env)?;
            out.push('\n');
        }
        Format::PowerShell => {
            for (k, v) in env {
                writeln!(out, "${{env:{k}}}={v:?}")?;
            }
            writeln!(out)?;
            writeln!(out, "# To import with PowerShell:")?;
            writeln!(
                out,
                "#     cargo android-env --powershell | Out-String | Invoke-Expression"
            )?;
        }
        Format::Posix => {
            // Shells reject `-` in names; cc-rs reads the underscored spelling too.
            let env = env
                .iter()
                .map(|(k, v)| (k.replace('-', "_"), v))
                .collect::<BTreeMap<_, _>>();
            for (k, v) in env {
                writeln!(out, "export {k}={v:?}")?;
            }
            writeln!(out)?;
            writeln!(out, "# To import with bash/zsh/etc:")?;
            writeln!(out, "#     source <(cargo android-env)")?;
        }
    }
    Ok(out)
}

pub fn run(args: Vec<String>) -> anyhow::Result<()> {
    // Check for help/version before parsing to avoid required arg errors
    if args.contains(&"--help".to_string()) {
        EnvArgs::command().print_long_help()?;
        std::process::exit(0);
    }

    if args.contains(&"-h".to_string()) {
        EnvArgs::command().print_help()?;
        std::process::exit(0);
    }

    if args.contains(&"--version".to_string()) || args.contains(&"-V".to_string()) {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    let color = args
        .iter()
        .position(|x| x == "--color")
        .and_then(|p| args.get(p + 1))
        .map(|x| &**x);

    let verbosity = if args.contains(&"-q".into()) {
        Verbosity::Quiet
    } else if args.contains(&"-vv".into()) {
        Verbosity::VeryVerbose
    } else if args.contains(&"-v".into()) || args.contains(&"--verbose".into()) {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };

    let mut shell = Shell::new();
    shell.set_verbosity(verbosity);
    shell.set_color_choice(color)?;

    let args = match EnvArgs::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) => {
            shell.error(e)?;
            std::process::exit(2);
        }
    };

    let host = HostPlatform::current();
    let catalog = ToolchainCatalog::builtin();

    // Desktop targets need no NDK; look them up first.
    let desktop = catalog
        .lookup(&args.target, &[ToolchainFlavor::DesktopHost])
        .ok();

    let (record, paths, ndk_major) = match desktop {
        Some(record) => (record, None, 0),
        None => {
            let Some((ndk_home, _method)) = derive_ndk_path(&mut shell) else {
                shell.error("Could not find any NDK.")?;
                shell.note(
                    "Set the environment ANDROID_NDK_HOME to your NDK installation's root directory,\nor install the NDK using Android Studio.",
                )?;
                std::process::exit(1);
            };
            let version = NdkVersion::detect(&ndk_home);
            let use_prebuilt = !args.generated && version.major >= MIN_PREBUILT_NDK_MAJOR;

            let preference = ToolchainFlavor::preference(use_prebuilt);
            let record = match catalog.lookup(&args.target, preference) {
                Ok(record) => record,
                Err(e) => {
                    shell.error(e)?;
                    std::process::exit(1);
                }
            };
            if let Err(e) = check_api_level(record.architecture_label, args.platform) {
                shell.error(e)?;
                std::process::exit(1);
            }

            let generated_root = args
                .toolchain_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("rust-android-ndk-toolchains"));
            let resolver = ToolchainResolver::new(host);
            let paths = resolver
                .toolchain_root(record, &ndk_home, &generated_root)
                .and_then(|root| {
                    resolver.resolve_compiler_paths(record, args.platform, version.major, &root)
                });

            if let Some(paths) = &paths {
                if !paths.cc.exists() {
                    shell.warn(format!("{} does not exist", paths.cc.display()))?;
                    if record.flavor == ToolchainFlavor::AndroidGeneratedStandalone {
                        shell.note("Run `cargo android-build` once to generate the toolchain.")?;
                    }
                }
            }
            (record, paths, version.major)
        }
    };

    let wrapper = if record.flavor.is_android() {
        let dir = args.wrapper_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir()
                .join("rust-android-build")
                .join("linker-wrapper")
        });
        Some(LinkerWrapperMaterializer::new(host).materialize(&dir)?)
    } else {
        None
    };

    let request = BuildRequest {
        libname: args.libname.clone(),
        ndk_major,
        commands: CommandSettings {
            python: args.python.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    let mut spec = ProcessSpec::new("cargo");
    BuildInvoker::new(&SystemRunner, verbosity).environment(
        &mut spec,
        &request,
        record,
        paths.as_ref(),
        wrapper.as_ref(),
    );

    let format = if args.json {
        Format::Json
    } else if args.powershell {
        Format::PowerShell
    } else {
        Format::Posix
    };
    print!("{}", render(&spec.env_lossy(), format)?);

    Ok(())
}
