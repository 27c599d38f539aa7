use std::{
    collections::{BTreeMap, BTreeSet},
    env,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    cargo::{BuildRequest, CommandSettings, TARGET_ENV_PREFIX},
    error::{ConfigurationError, Error},
    project::HostProject,
    toolchain::{
        NdkVersion, ToolchainCatalog, ToolchainFlavor, ToolchainRecord, check_api_level,
    },
};

pub const CONFIG_FILE_NAME: &str = "rust-android.toml";
pub const LOCAL_PROPERTIES_FILE_NAME: &str = "local.properties";

/// Oldest NDK shipping the unified prebuilt LLVM toolchain.
pub const MIN_PREBUILT_NDK_MAJOR: u32 = 19;

/// Which cargo features to enable. The three shapes exclude each other.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Features {
    All,
    DefaultAnd(BTreeSet<String>),
    NoDefaultBut(BTreeSet<String>),
}

impl Default for Features {
    fn default() -> Self {
        Features::DefaultAnd(BTreeSet::new())
    }
}

/// Architecture label -> API level.
pub type ApiLevelMap = BTreeMap<String, u32>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct VariantConfig {
    pub profile: Option<String>,
    pub features: Option<Features>,
    pub extra_cargo_build_arguments: Option<Vec<String>>,
}

/// Contents of `rust-android.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Directory holding the crate's Cargo.toml, relative to the project.
    pub module: Option<PathBuf>,
    pub libname: Option<String>,
    pub targets: Option<Vec<String>>,
    pub prebuilt_toolchains: Option<bool>,
    pub profile: Option<String>,
    pub verbose: Option<bool>,
    pub target_directory: Option<PathBuf>,
    pub target_includes: Option<Vec<String>>,
    pub api_level: Option<u32>,
    #[serde(default)]
    pub api_levels: ApiLevelMap,
    #[serde(default)]
    pub extra_cargo_build_arguments: Vec<String>,
    pub features: Option<Features>,
    pub auto_configure_clang_sys: Option<bool>,
    pub cargo_command: Option<String>,
    pub rustc_command: Option<String>,
    pub python_command: Option<String>,
    pub rustup_toolchain: Option<String>,
    pub toolchain_directory: Option<PathBuf>,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantConfig>,
    /// Per-target environment overrides, `RUST_ANDROID_TARGET_<TRIPLE>_<KEY>`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(&text, path)?)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigurationError> {
        toml::from_str(text).map_err(|e| ConfigurationError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Parses Java-style `.properties` text: `key=value` or `key: value`,
/// `#`/`!` comments, surrounding whitespace trimmed. Line continuations and
/// escapes are not interpreted.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let idx = line.find(['=', ':'])?;
            let (key, value) = line.split_at(idx);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

/// Settings that may come from `local.properties` (camelCase keys) or the
/// environment (SNAKE_CASE keys), in that order.
#[derive(Debug, Clone, Default)]
pub struct PropertySource {
    local: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl PropertySource {
    pub fn new(local: BTreeMap<String, String>, env: BTreeMap<String, String>) -> Self {
        Self { local, env }
    }

    /// Reads `local.properties` from `project_dir` (if present) and the
    /// process environment.
    pub fn from_project(project_dir: &Path) -> Self {
        let local = std::fs::read_to_string(project_dir.join(LOCAL_PROPERTIES_FILE_NAME))
            .map(|s| parse_properties(&s))
            .unwrap_or_default();
        Self::new(local, env::vars().collect())
    }

    pub fn local(&self, key: &str) -> Option<&str> {
        self.local.get(key).map(String::as_str)
    }

    pub fn get(&self, camel_case: &str, snake_case: &str) -> Option<&str> {
        self.local(camel_case)
            .or_else(|| self.env.get(snake_case).map(String::as_str))
    }

    /// Every entry, from either source, carrying the per-target prefix.
    fn target_overrides(&self) -> impl Iterator<Item = (&String, &String)> {
        self.env
            .iter()
            .chain(self.local.iter())
            .filter(|(k, _)| k.starts_with(TARGET_ENV_PREFIX))
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigurationError> {
    match value.trim() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigurationError::InvalidValue {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

/// One requested target after lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub record: ToolchainRecord,
    /// Unused by desktop toolchains.
    pub api_level: u32,
}

/// Configuration validated against the catalog and host project. Every check
/// that can fail does so here, before anything is spawned.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub module_dir: PathBuf,
    pub libname: String,
    pub targets: Vec<ResolvedTarget>,
    pub use_prebuilt: bool,
    pub ndk_dir: Option<PathBuf>,
    pub ndk_version: NdkVersion,
    pub toolchain_directory: PathBuf,
    pub commands: CommandSettings,
    pub auto_configure_clang_sys: Option<bool>,
    pub target_directory: Option<PathBuf>,
    pub target_includes: Option<Vec<String>>,
    pub verbose: Option<bool>,
    pub profile: Option<String>,
    pub features: Features,
    pub extra_cargo_build_arguments: Vec<String>,
    pub variants: BTreeMap<String, VariantConfig>,
    pub env_overrides: BTreeMap<String, String>,
}

impl Config {
    pub fn resolve(
        self,
        project: &dyn HostProject,
        props: &PropertySource,
        catalog: &ToolchainCatalog,
    ) -> Result<ResolvedConfig, Error> {
        let project_dir = project.project_dir();

        let module = self.module.ok_or(ConfigurationError::MissingField("module"))?;
        let libname = self
            .libname
            .ok_or(ConfigurationError::MissingField("libname"))?;

        // local.properties may narrow targets, per project or globally.
        let local_targets = props
            .local(&format!("rust.targets.{}", project.name()))
            .or_else(|| props.local("rust.targets"))
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            });
        let labels = local_targets
            .or(self.targets)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigurationError::MissingField("targets"))?;

        let api_levels = if !self.api_levels.is_empty() {
            if self.api_level.is_some() {
                return Err(ConfigurationError::Conflict("api-level", "api-levels").into());
            }
            self.api_levels
        } else {
            let default = self.api_level.unwrap_or_else(|| project.default_api_level());
            labels.iter().map(|l| (l.clone(), default)).collect()
        };
        let missing = labels
            .iter()
            .filter(|l| !api_levels.contains_key(*l))
            .cloned()
            .collect::<BTreeSet<_>>();
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingApiLevels(missing.into_iter().collect()).into());
        }

        let ndk_dir = project.ndk_directory().map(Path::to_path_buf);
        let ndk_version = ndk_dir
            .as_deref()
            .map(NdkVersion::detect)
            .unwrap_or_else(|| NdkVersion::parse("0.0"));

        let use_prebuilt = match props.local("rust.prebuiltToolchains") {
            Some(value) => value == "true",
            None => self
                .prebuilt_toolchains
                .unwrap_or(ndk_version.major >= MIN_PREBUILT_NDK_MAJOR),
        };
        if use_prebuilt && ndk_version.major < MIN_PREBUILT_NDK_MAJOR {
            return Err(ConfigurationError::PrebuiltRequiresNdk19(ndk_version.major).into());
        }

        let preference = ToolchainFlavor::preference(use_prebuilt);
        let mut targets = Vec::with_capacity(labels.len());
        for label in &labels {
            let record = catalog.lookup(label, preference)?.clone();
            let api_level = api_levels[label];
            if record.flavor.is_android() {
                check_api_level(label, api_level)?;
                if ndk_dir.is_none() {
                    return Err(ConfigurationError::MissingField("ndk-directory").into());
                }
            }
            targets.push(ResolvedTarget { record, api_level });
        }

        let toolchain_directory = props
            .local("rust.androidNdkToolchainDir")
            .map(PathBuf::from)
            .or_else(|| props.env.get("ANDROID_NDK_TOOLCHAIN_DIR").map(PathBuf::from))
            .or(self.toolchain_directory)
            .unwrap_or_else(|| env::temp_dir().join("rust-android-ndk-toolchains"));
        let toolchain_directory = absolute(project_dir, &toolchain_directory);

        let commands = CommandSettings {
            cargo: props
                .get("rust.cargoCommand", "RUST_ANDROID_CARGO_COMMAND")
                .map(str::to_string)
                .or(self.cargo_command)
                .unwrap_or_else(|| "cargo".into()),
            rustc: props
                .get("rust.rustcCommand", "RUST_ANDROID_RUSTC_COMMAND")
                .map(str::to_string)
                .or(self.rustc_command)
                .unwrap_or_else(|| "rustc".into()),
            python: props
                .get("rust.pythonCommand", "RUST_ANDROID_PYTHON_COMMAND")
                .map(str::to_string)
                .or(self.python_command)
                .unwrap_or_else(|| "python".into()),
            rustup_toolchain: props
                .get("rust.rustupToolchain", "RUST_TOOLCHAIN_VERSION")
                .map(str::to_string)
                .or(self.rustup_toolchain)
                .filter(|s| !s.is_empty()),
        };

        let auto_configure_clang_sys = match props.get(
            "rust.autoConfigureClangSys",
            "RUST_ANDROID_AUTO_CONFIGURE_CLANG_SYS",
        ) {
            Some(value) => Some(parse_bool("auto-configure-clang-sys", value)?),
            None => self.auto_configure_clang_sys,
        };

        let mut env_overrides = self.env;
        env_overrides.extend(
            props
                .target_overrides()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let module_dir = absolute(project_dir, &module);
        let module_dir = dunce::canonicalize(&module_dir).unwrap_or(module_dir);

        Ok(ResolvedConfig {
            module_dir,
            libname,
            targets,
            use_prebuilt,
            ndk_dir,
            ndk_version,
            toolchain_directory,
            commands,
            auto_configure_clang_sys,
            target_directory: self.target_directory.map(|d| absolute(project_dir, &d)),
            target_includes: self.target_includes,
            verbose: self.verbose,
            profile: self.profile,
            features: self.features.unwrap_or_default(),
            extra_cargo_build_arguments: self.extra_cargo_build_arguments,
            variants: self.variants,
            env_overrides,
        })
    }
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl ResolvedConfig {
    /// Variants to build: the configured ones, or `debug` and `release`.
    pub fn variant_names(&self) -> Vec<String> {
        if self.variants.is_empty() {
            vec!["debug".into(), "release".into()]
        } else {
            self.variants.keys().cloned().collect()
        }
    }

    /// Restricts the build to `names`, keeping any overrides they have.
    pub fn select_variants(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut configured = std::mem::take(&mut self.variants);
        self.variants = names
            .iter()
            .map(|name| (name.clone(), configured.remove(name).unwrap_or_default()))
            .collect();
    }

    pub fn profile_for(&self, variant: &str) -> String {
        self.variants
            .get(variant)
            .and_then(|v| v.profile.clone())
            .or_else(|| self.profile.clone())
            .unwrap_or_else(|| {
                if variant == "release" {
                    "release".into()
                } else {
                    "dev".into()
                }
            })
    }

    pub fn build_request(&self, variant: &str) -> BuildRequest {
        let overrides = self.variants.get(variant);
        BuildRequest {
            module_dir: self.module_dir.clone(),
            libname: self.libname.clone(),
            targets: self
                .targets
                .iter()
                .map(|t| t.record.architecture_label.to_string())
                .collect(),
            profile: self.profile_for(variant),
            features: overrides
                .and_then(|v| v.features.clone())
                .unwrap_or_else(|| self.features.clone()),
            target_directory: self.target_directory.clone(),
            extra_args: overrides
                .and_then(|v| v.extra_cargo_build_arguments.clone())
                .unwrap_or_else(|| self.extra_cargo_build_arguments.clone()),
            hook: None,
            verbose: self.verbose,
            commands: self.commands.clone(),
            auto_configure_clang_sys: self.auto_configure_clang_sys,
            env_overrides: self.env_overrides.clone(),
            ndk_major: self.ndk_version.major,
            target_includes: self.target_includes.clone(),
        }
    }

    pub fn has_android_targets(&self) -> bool {
        self.targets.iter().any(|t| t.record.flavor.is_android())
    }
}
