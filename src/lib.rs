pub mod cargo;
pub mod cli;
pub mod error;
pub mod linker_wrapper;
pub mod meta;
pub mod plan;
pub mod process;
pub mod project;
pub mod provision;
pub mod shell;
pub mod stage;
pub mod toolchain;

pub use error::{ConfigurationError, Error};

#[cfg(all(target_os = "android", not(rust_android_build_on_android)))]
compile_error!(
    r#"
Building rust-android-build on Android is not supported. This binary is intended to be run on your host OS.

Set RUST_ANDROID_BUILD_ON_ANDROID to override this check (for example, building for Termux)."
"#
);

/// The machine the build runs on.
///
/// Business logic takes this as a parameter rather than consulting `cfg!`
/// so every branch can be exercised from any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostPlatform {
    WindowsX86_64,
    Windows,
    DarwinX86_64,
    LinuxX86_64,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
                HostPlatform::WindowsX86_64
            } else {
                HostPlatform::Windows
            }
        } else if cfg!(target_os = "macos") {
            HostPlatform::DarwinX86_64
        } else {
            HostPlatform::LinuxX86_64
        }
    }

    /// Directory name of the NDK's prebuilt LLVM toolchain for this host.
    pub fn tag(self) -> &'static str {
        match self {
            HostPlatform::WindowsX86_64 => "windows-x86_64",
            HostPlatform::Windows => "windows",
            HostPlatform::DarwinX86_64 => "darwin-x86_64",
            HostPlatform::LinuxX86_64 => "linux-x86_64",
        }
    }

    pub fn is_windows(self) -> bool {
        matches!(self, HostPlatform::WindowsX86_64 | HostPlatform::Windows)
    }

    /// Suffix of the NDK's clang driver scripts.
    pub fn script_ext(self) -> &'static str {
        if self.is_windows() { ".cmd" } else { "" }
    }

    /// Suffix of native executables such as `llvm-ar`.
    pub fn exe_ext(self) -> &'static str {
        if self.is_windows() { ".exe" } else { "" }
    }
}

/// `aarch64-linux-android` -> `AARCH64_LINUX_ANDROID`
pub(crate) fn env_triple(triple: &str) -> String {
    triple.to_uppercase().replace('-', "_")
}

pub(crate) fn cargo_env_target_cfg(triple: &str, key: &str) -> String {
    format!("CARGO_TARGET_{}_{}", env_triple(triple), key.to_uppercase())
}
