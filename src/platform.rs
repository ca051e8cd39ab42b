//! Platform detection for evaluating formula predicates.
//!
//! Formulae branch on three facts about the host: the OS family, the CPU
//! architecture, and the compiler that will drive `configure`/`make`. These are
//! captured once per run in a [`Platform`] value and every declarative
//! predicate (dependency gates, option gates, step gates) is evaluated against
//! that value rather than re-probing the system at each use site.
//!
//! # Examples
//!
//! ```no_run
//! use kegworks::platform::Platform;
//!
//! let platform = Platform::detect();
//! println!("Building for {}", platform.tag());
//! // Output: "arm64_macos" on Apple Silicon
//! // Output: "x86_64_linux" on an Intel Linux box
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Macos,
    Linux,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Arm64,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    Clang,
    Gcc,
    Other,
}

/// Immutable snapshot of the host a build runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: OsFamily,
    pub arch: Arch,
    pub compiler: Compiler,
}

impl Platform {
    pub fn new(os: OsFamily, arch: Arch, compiler: Compiler) -> Self {
        Self { os, arch, compiler }
    }

    /// Detect the current host.
    ///
    /// The compiler comes from `CC` when it names clang or gcc; otherwise the
    /// platform default is assumed (clang on macOS, gcc elsewhere).
    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "macos" => OsFamily::Macos,
            "linux" => OsFamily::Linux,
            _ => OsFamily::Other,
        };
        let arch = arch_from_str(std::env::consts::ARCH);
        let compiler = std::env::var("CC")
            .ok()
            .and_then(|cc| compiler_from_cc(&cc))
            .unwrap_or(match os {
                OsFamily::Macos => Compiler::Clang,
                _ => Compiler::Gcc,
            });

        Self { os, arch, compiler }
    }

    /// Platform tag in `<arch>_<os>` form, e.g. `arm64_macos`.
    pub fn tag(&self) -> String {
        format!("{}_{}", self.arch, self.os)
    }
}

// Homebrew uses "arm64" not "aarch64"
fn arch_from_str(arch: &str) -> Arch {
    match arch {
        "aarch64" | "arm64" => Arch::Arm64,
        "x86_64" => Arch::X86_64,
        _ => Arch::Other,
    }
}

fn compiler_from_cc(cc: &str) -> Option<Compiler> {
    let program = cc.rsplit('/').next().unwrap_or(cc);
    if program.contains("clang") {
        Some(Compiler::Clang)
    } else if program.contains("gcc") || program.starts_with("g++") {
        Some(Compiler::Gcc)
    } else {
        None
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Macos => "macos",
            Self::Linux => "linux",
            Self::Other => "other",
        })
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
            Self::Other => "other",
        })
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clang => "clang",
            Self::Gcc => "gcc",
            Self::Other => "cc",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform() {
        let platform = Platform::detect();
        #[cfg(target_arch = "aarch64")]
        assert_eq!(platform.arch, Arch::Arm64);
        #[cfg(target_arch = "x86_64")]
        assert_eq!(platform.arch, Arch::X86_64);
        #[cfg(target_os = "linux")]
        assert_eq!(platform.os, OsFamily::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(platform.os, OsFamily::Macos);
    }

    #[test]
    fn test_tag() {
        let platform = Platform::new(OsFamily::Macos, Arch::Arm64, Compiler::Clang);
        assert_eq!(platform.tag(), "arm64_macos");
        let platform = Platform::new(OsFamily::Linux, Arch::X86_64, Compiler::Gcc);
        assert_eq!(platform.tag(), "x86_64_linux");
    }

    #[test]
    fn test_compiler_from_cc() {
        assert_eq!(compiler_from_cc("/usr/bin/clang"), Some(Compiler::Clang));
        assert_eq!(compiler_from_cc("gcc-13"), Some(Compiler::Gcc));
        assert_eq!(compiler_from_cc("cc"), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Arch::X86_64).unwrap();
        assert_eq!(json, "\"x86_64\"");
        let os: OsFamily = serde_json::from_str("\"macos\"").unwrap();
        assert_eq!(os, OsFamily::Macos);
    }
}
