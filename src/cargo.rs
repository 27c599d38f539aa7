use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    cargo_env_target_cfg, env_triple,
    error::Error,
    linker_wrapper::WrapperPaths,
    meta::Features,
    process::{ProcessOutput, ProcessRunner, ProcessSpec, run_checked},
    shell::Verbosity,
    toolchain::{CompilerPaths, ToolchainRecord},
};

/// Prefix of per-target environment overrides. A key
/// `RUST_ANDROID_TARGET_AARCH64_LINUX_ANDROID_FOO=bar` sets `FOO=bar` for
/// `aarch64-linux-android` builds only.
pub const TARGET_ENV_PREFIX: &str = "RUST_ANDROID_TARGET_";

/// Adjusts the cargo invocation before the standard variables are applied.
pub type PreInvocationHook = Arc<dyn Fn(&mut ProcessSpec, &ToolchainRecord) + Send + Sync>;

/// Executables used to drive the Rust toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    pub cargo: String,
    pub rustc: String,
    pub python: String,
    /// rustup toolchain selector, e.g. `nightly` or `+1.80.0`.
    pub rustup_toolchain: Option<String>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            cargo: "cargo".into(),
            rustc: "rustc".into(),
            python: "python".into(),
            rustup_toolchain: None,
        }
    }
}

/// Everything one variant's build needs, independent of the target.
#[derive(Clone, Default)]
pub struct BuildRequest {
    pub module_dir: PathBuf,
    pub libname: String,
    pub targets: Vec<String>,
    pub profile: String,
    pub features: Features,
    pub target_directory: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub hook: Option<PreInvocationHook>,
    pub verbose: Option<bool>,
    pub commands: CommandSettings,
    /// `None` enables header auto-configuration for Android targets only.
    pub auto_configure_clang_sys: Option<bool>,
    pub env_overrides: BTreeMap<String, String>,
    pub ndk_major: u32,
    pub target_includes: Option<Vec<String>>,
}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest")
            .field("module_dir", &self.module_dir)
            .field("libname", &self.libname)
            .field("targets", &self.targets)
            .field("profile", &self.profile)
            .field("features", &self.features)
            .field("target_directory", &self.target_directory)
            .field("extra_args", &self.extra_args)
            .field("hook", &self.hook.as_ref().map(|_| ".."))
            .field("verbose", &self.verbose)
            .field("commands", &self.commands)
            .field("auto_configure_clang_sys", &self.auto_configure_clang_sys)
            .field("env_overrides", &self.env_overrides)
            .field("ndk_major", &self.ndk_major)
            .field("target_includes", &self.target_includes)
            .finish()
    }
}

/// `--verbose`, `--quiet` or nothing. An explicit request wins; otherwise
/// cargo follows our own verbosity, and is kept quiet at normal levels.
pub fn verbosity_flag(explicit: Option<bool>, ambient: Verbosity) -> Option<&'static str> {
    match explicit {
        Some(true) => Some("--verbose"),
        Some(false) => None,
        None => match ambient {
            Verbosity::Verbose | Verbosity::VeryVerbose => Some("--verbose"),
            Verbosity::Normal => Some("--quiet"),
            Verbosity::Quiet => None,
        },
    }
}

pub fn feature_args(features: &Features) -> Vec<String> {
    fn list(set: &std::collections::BTreeSet<String>, args: &mut Vec<String>) {
        if !set.is_empty() {
            args.push("--features".into());
            args.push(set.iter().map(String::as_str).collect::<Vec<_>>().join(" "));
        }
    }

    let mut args = Vec::new();
    match features {
        Features::All => args.push("--all-features".into()),
        Features::DefaultAnd(set) => list(set, &mut args),
        Features::NoDefaultBut(set) => {
            args.push("--no-default-features".into());
            list(set, &mut args);
        }
    }
    args
}

/// Assembles and runs `cargo build` for one target.
pub struct BuildInvoker<'a> {
    runner: &'a dyn ProcessRunner,
    ambient: Verbosity,
}

impl<'a> BuildInvoker<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, ambient: Verbosity) -> Self {
        Self { runner, ambient }
    }

    pub fn command(
        &self,
        request: &BuildRequest,
        record: &ToolchainRecord,
        default_triple: Option<&str>,
    ) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&request.commands.cargo);

        if let Some(channel) = request.commands.rustup_toolchain.as_deref() {
            if !channel.is_empty() {
                if channel.starts_with('+') {
                    spec.arg(channel);
                } else {
                    spec.arg(format!("+{channel}"));
                }
            }
        }

        spec.arg("build");

        if let Some(flag) = verbosity_flag(request.verbose, self.ambient) {
            spec.arg(flag);
        }

        spec.args(feature_args(&request.features));
        spec.arg(format!("--profile={}", request.profile));

        // Leaving out --target for the host triple lets this build share its
        // cache with plain `cargo build`/`cargo test` runs.
        if default_triple != Some(record.target_triple) {
            spec.arg(format!("--target={}", record.target_triple));
        }

        spec.args(&request.extra_args);
        spec.current_dir(&request.module_dir);
        spec
    }

    /// Layers the cross-compilation environment onto `spec`.
    pub fn environment(
        &self,
        spec: &mut ProcessSpec,
        request: &BuildRequest,
        record: &ToolchainRecord,
        paths: Option<&CompilerPaths>,
        wrapper: Option<&WrapperPaths>,
    ) {
        if let Some(dir) = &request.target_directory {
            spec.env("CARGO_TARGET_DIR", dir);
        }

        if record.flavor.is_android() {
            if let Some(paths) = paths {
                android_environment(spec, request, record, paths, wrapper);
            }
        }

        let prefix = format!("{TARGET_ENV_PREFIX}{}_", env_triple(record.target_triple));
        for (key, value) in &request.env_overrides {
            if let Some(real_key) = key.strip_prefix(&prefix) {
                if !real_key.is_empty() {
                    spec.env(real_key, value);
                }
            }
        }
    }

    pub fn invoke(
        &self,
        request: &BuildRequest,
        record: &ToolchainRecord,
        paths: Option<&CompilerPaths>,
        wrapper: Option<&WrapperPaths>,
        default_triple: Option<&str>,
    ) -> Result<ProcessOutput, Error> {
        let mut spec = self.command(request, record, default_triple);
        if let Some(hook) = &request.hook {
            hook(&mut spec, record);
        }
        self.environment(&mut spec, request, record, paths, wrapper);
        run_checked(self.runner, &spec, Some(record.target_triple), Some(record.flavor))
    }
}

fn android_environment(
    spec: &mut ProcessSpec,
    request: &BuildRequest,
    record: &ToolchainRecord,
    paths: &CompilerPaths,
    wrapper: Option<&WrapperPaths>,
) {
    let triple = record.target_triple;
    let underscored = triple.replace('-', "_");

    // cc-rs reads both `CC_aarch64-linux-android` and `CC_aarch64_linux_android`.
    for key in [triple, underscored.as_str()] {
        spec.env(format!("CC_{key}"), &paths.cc);
        spec.env(format!("CXX_{key}"), &paths.cxx);
        spec.env(format!("AR_{key}"), &paths.ar);
    }
    spec.env(cargo_env_target_cfg(triple, "ar"), &paths.ar);

    if let Some(wrapper) = wrapper {
        spec.env(cargo_env_target_cfg(triple, "linker"), &wrapper.script);
        spec.env("RUST_ANDROID_LINKER_WRAPPER_PY", &wrapper.python);
    }
    spec.env("RUST_ANDROID_PYTHON_COMMAND", &request.commands.python);
    spec.env("RUST_ANDROID_CC", &paths.cc);
    spec.env(
        "RUST_ANDROID_CC_LINK_ARG",
        format!("-Wl,-soname,lib{}.so", request.libname),
    );
    spec.env("RUST_ANDROID_NDK_MAJOR_VERSION", request.ndk_major.to_string());

    if request
        .auto_configure_clang_sys
        .unwrap_or(record.flavor.is_android())
    {
        spec.env("CLANG_PATH", &paths.cc);
        let include = paths
            .sysroot
            .join("usr")
            .join("include")
            .join(record.binutils_triple_prefix);
        spec.env(
            format!("BINDGEN_EXTRA_CLANG_ARGS_{underscored}"),
            format!(
                "--sysroot={} -I{}",
                paths.sysroot.display(),
                include.display()
            ),
        );
    }
}

/// What `rustc --version --verbose` reports about the active toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RustcInfo {
    /// Default target triple.
    pub host: Option<String>,
    pub release: Option<String>,
}

impl RustcInfo {
    /// Scans the `key: value` lines of `rustc -vV`.
    pub fn parse(output: &str) -> Self {
        let mut info = RustcInfo::default();
        for line in output.lines() {
            if let Some(host) = line.strip_prefix("host: ") {
                info.host = Some(host.trim().to_string());
            } else if let Some(release) = line.strip_prefix("release: ") {
                info.release = Some(release.trim().to_string());
            }
        }
        info
    }

    pub fn detect(runner: &dyn ProcessRunner, rustc: &str) -> Result<Self, Error> {
        let mut spec = ProcessSpec::new(rustc);
        spec.args(["--version", "--verbose"]).capture_stdout();
        let output = run_checked(runner, &spec, None, None)?;
        Ok(Self::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    /// `--profile` needs cargo 1.57. `None` when the release is unknown.
    pub fn supports_custom_profiles(&self) -> Option<bool> {
        let release = version_check::Version::parse(self.release.as_deref()?)?;
        Some(release.at_least("1.57.0"))
    }
}

/// `cargo clean` in the module directory.
pub fn clean(runner: &dyn ProcessRunner, request: &BuildRequest) -> Result<(), Error> {
    let dir = canonical_module_dir(&request.module_dir)?;
    let mut spec = ProcessSpec::new(&request.commands.cargo);
    if let Some(channel) = request.commands.rustup_toolchain.as_deref() {
        if !channel.is_empty() {
            spec.arg(format!("+{}", channel.trim_start_matches('+')));
        }
    }
    spec.arg("clean").current_dir(dir);
    if let Some(target_dir) = &request.target_directory {
        spec.env("CARGO_TARGET_DIR", target_dir);
    }
    run_checked(runner, &spec, None, None)?;
    Ok(())
}

pub(crate) fn canonical_module_dir(dir: &Path) -> Result<PathBuf, Error> {
    dunce::canonicalize(dir).map_err(|e| Error::io(dir, e))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;

    use super::*;
    use crate::{
        HostPlatform,
        process::testing::FakeRunner,
        toolchain::{ToolchainCatalog, ToolchainFlavor, ToolchainResolver},
    };

    fn record(label: &str, prebuilt: bool) -> &'static ToolchainRecord {
        ToolchainCatalog::builtin()
            .lookup(label, ToolchainFlavor::preference(prebuilt))
            .unwrap()
    }

    fn request() -> BuildRequest {
        BuildRequest {
            module_dir: "/project/rust".into(),
            libname: "rust".into(),
            targets: vec!["arm64".into()],
            profile: "release".into(),
            ..Default::default()
        }
    }

    fn wrapper() -> WrapperPaths {
        WrapperPaths {
            script: "/build/linker-wrapper/linker-wrapper.sh".into(),
            python: "/build/linker-wrapper/linker-wrapper.py".into(),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn verbosity_resolution() {
        assert_eq!(verbosity_flag(Some(true), Verbosity::Quiet), Some("--verbose"));
        assert_eq!(verbosity_flag(Some(false), Verbosity::Normal), None);
        assert_eq!(verbosity_flag(None, Verbosity::Verbose), Some("--verbose"));
        assert_eq!(verbosity_flag(None, Verbosity::Normal), Some("--quiet"));
        assert_eq!(verbosity_flag(None, Verbosity::Quiet), None);
    }

    #[test]
    fn all_features_stands_alone() {
        assert_eq!(feature_args(&Features::All), ["--all-features"]);
    }

    #[test]
    fn default_features_plus_extra() {
        assert!(feature_args(&Features::DefaultAnd(BTreeSet::new())).is_empty());
        assert_eq!(
            feature_args(&Features::DefaultAnd(set(&["b", "a"]))),
            ["--features", "a b"]
        );
    }

    #[test]
    fn no_default_features() {
        assert_eq!(
            feature_args(&Features::NoDefaultBut(BTreeSet::new())),
            ["--no-default-features"]
        );
        assert_eq!(
            feature_args(&Features::NoDefaultBut(set(&["jni"]))),
            ["--no-default-features", "--features", "jni"]
        );
    }

    #[test]
    fn command_line_order() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Normal);
        let mut request = request();
        request.commands.rustup_toolchain = Some("nightly".into());
        request.features = Features::NoDefaultBut(set(&["x"]));
        request.extra_args = vec!["--locked".into()];

        let spec = invoker.command(&request, record("arm64", true), Some("x86_64-unknown-linux-gnu"));
        assert_eq!(spec.program, "cargo");
        assert_eq!(
            spec.args_lossy(),
            [
                "+nightly",
                "build",
                "--quiet",
                "--no-default-features",
                "--features",
                "x",
                "--profile=release",
                "--target=aarch64-linux-android",
                "--locked",
            ]
        );
        assert_eq!(spec.current_dir.as_deref(), Some(Path::new("/project/rust")));
    }

    #[test]
    fn channel_plus_is_not_doubled() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let mut request = request();
        request.commands.rustup_toolchain = Some("+stable".into());
        let spec = invoker.command(&request, record("arm64", true), None);
        assert_eq!(spec.args_lossy()[0], "+stable");
    }

    #[test]
    fn desktop_default_triple_omits_target() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let record = record("linux-x86-64", true);
        let spec = invoker.command(&request(), record, Some("x86_64-unknown-linux-gnu"));
        assert!(!spec.args_lossy().iter().any(|a| a.starts_with("--target")));

        let spec = invoker.command(&request(), record, None);
        assert!(spec.args_lossy().contains(&"--target=x86_64-unknown-linux-gnu".to_string()));
    }

    #[test]
    fn desktop_gets_no_cross_environment() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let mut request = request();
        request.target_directory = Some("/project/target".into());
        let mut spec = ProcessSpec::new("cargo");
        invoker.environment(&mut spec, &request, record("linux-x86-64", true), None, None);
        assert_eq!(spec.env_lossy().keys().collect::<Vec<_>>(), ["CARGO_TARGET_DIR"]);
    }

    #[test]
    fn android_environment_names() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let record = record("arm64", true);
        let root = Path::new("/ndk/toolchains/llvm/prebuilt/linux-x86_64");
        let paths = resolver.resolve_compiler_paths(record, 21, 22, root).unwrap();
        let mut request = request();
        request.ndk_major = 22;

        let mut spec = ProcessSpec::new("cargo");
        invoker.environment(&mut spec, &request, record, Some(&paths), Some(&wrapper()));
        let env = spec.env_lossy();

        let cc = "/ndk/toolchains/llvm/prebuilt/linux-x86_64/bin/aarch64-linux-android21-clang";
        let ar = "/ndk/toolchains/llvm/prebuilt/linux-x86_64/bin/aarch64-linux-android-ar";
        assert_eq!(env["CC_aarch64-linux-android"], cc);
        assert_eq!(env["CC_aarch64_linux_android"], cc);
        assert_eq!(env["CXX_aarch64-linux-android"], format!("{cc}++"));
        assert_eq!(env["AR_aarch64-linux-android"], ar);
        assert_eq!(env["AR_aarch64_linux_android"], ar);
        assert_eq!(env["CARGO_TARGET_AARCH64_LINUX_ANDROID_AR"], ar);
        assert_eq!(
            env["CARGO_TARGET_AARCH64_LINUX_ANDROID_LINKER"],
            "/build/linker-wrapper/linker-wrapper.sh"
        );
        assert_eq!(env["RUST_ANDROID_CC"], cc);
        assert_eq!(env["RUST_ANDROID_CC_LINK_ARG"], "-Wl,-soname,librust.so");
        assert_eq!(env["RUST_ANDROID_NDK_MAJOR_VERSION"], "22");
        assert_eq!(env["RUST_ANDROID_PYTHON_COMMAND"], "python");
        assert_eq!(env["CLANG_PATH"], cc);
        assert_eq!(
            env["BINDGEN_EXTRA_CLANG_ARGS_aarch64_linux_android"],
            "--sysroot=/ndk/toolchains/llvm/prebuilt/linux-x86_64/sysroot \
             -I/ndk/toolchains/llvm/prebuilt/linux-x86_64/sysroot/usr/include/aarch64-linux-android"
        );
    }

    #[test]
    fn header_configuration_can_be_disabled() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let record = record("x86", false);
        let paths = resolver
            .resolve_compiler_paths(record, 19, 20, Path::new("/gen"))
            .unwrap();
        let mut request = request();
        request.auto_configure_clang_sys = Some(false);
        let mut spec = ProcessSpec::new("cargo");
        invoker.environment(&mut spec, &request, record, Some(&paths), Some(&wrapper()));
        let env = spec.env_lossy();
        assert!(!env.contains_key("CLANG_PATH"));
        assert!(!env.contains_key("BINDGEN_EXTRA_CLANG_ARGS_i686_linux_android"));
        assert_eq!(env["CC_i686-linux-android"], "/gen/x86-19/bin/i686-linux-android-clang");
    }

    #[test]
    fn target_scoped_overrides_pass_through_last() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let record = record("arm64", true);
        let paths = resolver
            .resolve_compiler_paths(record, 21, 25, Path::new("/tc"))
            .unwrap();
        let mut request = request();
        request.env_overrides = BTreeMap::from([
            (
                "RUST_ANDROID_TARGET_AARCH64_LINUX_ANDROID_CLANG_PATH".to_string(),
                "/custom/clang".to_string(),
            ),
            (
                "RUST_ANDROID_TARGET_AARCH64_LINUX_ANDROID_OPENSSL_DIR".to_string(),
                "/openssl".to_string(),
            ),
            (
                "RUST_ANDROID_TARGET_X86_64_LINUX_ANDROID_OPENSSL_DIR".to_string(),
                "/other".to_string(),
            ),
        ]);
        let mut spec = ProcessSpec::new("cargo");
        invoker.environment(&mut spec, &request, record, Some(&paths), Some(&wrapper()));
        let env = spec.env_lossy();
        assert_eq!(env["CLANG_PATH"], "/custom/clang");
        assert_eq!(env["OPENSSL_DIR"], "/openssl");
    }

    #[test]
    fn hook_runs_before_standard_variables() {
        let runner = FakeRunner::succeeding();
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let resolver = ToolchainResolver::new(HostPlatform::LinuxX86_64);
        let record = record("arm64", true);
        let paths = resolver
            .resolve_compiler_paths(record, 21, 25, Path::new("/tc"))
            .unwrap();
        let mut request = request();
        request.hook = Some(Arc::new(|spec: &mut ProcessSpec, record: &ToolchainRecord| {
            spec.env("HOOKED", record.architecture_label);
            spec.env("RUST_ANDROID_CC", "overwritten");
        }));

        invoker
            .invoke(&request, record, Some(&paths), Some(&wrapper()), None)
            .unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let env = calls[0].env_lossy();
        assert_eq!(env["HOOKED"], "arm64");
        assert_eq!(env["RUST_ANDROID_CC"], "/tc/bin/aarch64-linux-android21-clang");
    }

    #[test]
    fn non_zero_exit_reports_context() {
        let runner = FakeRunner::new(|_| Ok(ProcessOutput { code: Some(101), stdout: vec![] }));
        let invoker = BuildInvoker::new(&runner, Verbosity::Quiet);
        let err = invoker
            .invoke(&request(), record("linux-x86-64", true), None, None, None)
            .unwrap_err();
        match err {
            Error::ExternalProcess(failure) => {
                assert_eq!(failure.exit_code(), Some(101));
                assert_eq!(failure.target_triple.as_deref(), Some("x86_64-unknown-linux-gnu"));
                assert_eq!(failure.flavor, Some(ToolchainFlavor::DesktopHost));
                assert!(failure.command_line.contains("--target=x86_64-unknown-linux-gnu"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_rustc_verbose_version() {
        let info = RustcInfo::parse(
            "rustc 1.80.0 (051478957 2024-07-21)\n\
             binary: rustc\n\
             commit-hash: 051478957371ee0084a7c0913941d2a8c4757bb9\n\
             host: x86_64-unknown-linux-gnu\n\
             release: 1.80.0\n\
             LLVM version: 18.1.7\n",
        );
        assert_eq!(info.host.as_deref(), Some("x86_64-unknown-linux-gnu"));
        assert_eq!(info.supports_custom_profiles(), Some(true));

        let old = RustcInfo {
            host: None,
            release: Some("1.56.1".into()),
        };
        assert_eq!(old.supports_custom_profiles(), Some(false));
        assert_eq!(RustcInfo::default().supports_custom_profiles(), None);
    }

    #[test]
    fn detect_failure_is_an_error_not_a_panic() {
        let runner = FakeRunner::new(|_| Ok(ProcessOutput { code: Some(1), stdout: vec![] }));
        assert!(RustcInfo::detect(&runner, "rustc").is_err());

        let runner = FakeRunner::new(|_| {
            Ok(ProcessOutput {
                code: Some(0),
                stdout: b"garbage".to_vec(),
            })
        });
        assert_eq!(RustcInfo::detect(&runner, "rustc").unwrap().host, None);
    }

    #[test]
    fn clean_runs_in_module_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::succeeding();
        let mut request = request();
        request.module_dir = dir.path().to_path_buf();
        clean(&runner, &request).unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].args_lossy(), ["clean"]);
        assert_eq!(
            calls[0].current_dir.as_deref(),
            Some(dunce::canonicalize(dir.path()).unwrap().as_path())
        );
    }
}
