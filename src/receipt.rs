//! Install receipts.
//!
//! A keg counts as installed only once `INSTALL_RECEIPT.json` sits at its
//! root. The receipt keeps the option snapshot (`used_options` /
//! `unused_options`) so `keg test` and `keg postinstall` see the same
//! `build.with?` answers the build did, plus the runtime dependency closure
//! (build-only edges are not recorded), the formula file the keg came from,
//! and the platform it was built on.
//!
//! ```no_run
//! # use kegworks::receipt::InstallReceipt;
//! # fn main() -> anyhow::Result<()> {
//! let receipt = InstallReceipt::read("/usr/local/Cellar/sonarqube/6.1".as_ref())?;
//! assert!(receipt.used_options.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::formula::Formula;
use crate::options::BuildOptions;
use crate::platform::Platform;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub keg_version: String,
    #[serde(default)]
    pub used_options: Vec<String>,
    #[serde(default)]
    pub unused_options: Vec<String>,
    #[serde(default)]
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub installed_on_request: bool,
    pub time: i64,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_on: Option<BuiltOn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub pkg_version: String,
    #[serde(default)]
    pub declared_directly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltOn {
    pub os: String,
    pub cpu_family: String,
    pub compiler: String,
}

impl InstallReceipt {
    /// Read an existing INSTALL_RECEIPT.json file
    pub fn read(keg: &Path) -> Result<Self> {
        let receipt_path = keg.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&receipt_path)
            .with_context(|| format!("Failed to read receipt: {}", receipt_path.display()))?;

        let receipt: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", receipt_path.display()))?;

        Ok(receipt)
    }

    /// Create a receipt for a keg built from source
    pub fn new_build(
        formula: &Formula,
        options: &BuildOptions,
        platform: &Platform,
        runtime_dependencies: Vec<RuntimeDependency>,
        installed_on_request: bool,
    ) -> Self {
        Self {
            keg_version: format!("keg/{}", env!("CARGO_PKG_VERSION")),
            used_options: options.used(),
            unused_options: options.unused(),
            installed_as_dependency: !installed_on_request,
            installed_on_request,
            time: chrono::Utc::now().timestamp(),
            runtime_dependencies,
            source: Some(SourceInfo {
                path: formula.path.as_ref().map(|p| p.display().to_string()),
                url: formula.source.as_ref().map(|s| s.url.clone()),
                sha256: formula.source.as_ref().and_then(|s| s.sha256.clone()),
            }),
            built_on: Some(BuiltOn {
                os: platform.os.to_string(),
                cpu_family: platform.arch.to_string(),
                compiler: platform.compiler.to_string(),
            }),
        }
    }

    /// Option snapshot the keg was built with.
    pub fn options(&self) -> BuildOptions {
        BuildOptions::from_flags(&self.used_options, &self.unused_options)
    }

    /// Write receipt to INSTALL_RECEIPT.json
    pub fn write(&self, keg: &Path) -> Result<()> {
        let receipt_path = keg.join(RECEIPT_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install receipt")?;

        fs::write(&receipt_path, json)
            .with_context(|| format!("Failed to write receipt: {}", receipt_path.display()))?;

        Ok(())
    }
}
