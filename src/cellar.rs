//! Prefix layout and installed kegs.
//!
//! ```text
//! <root>/
//!   Cellar/<name>/<version>/     # one isolated keg per installed version
//!   opt/<name> -> ../Cellar/<name>/<version>
//!   bin/ lib/ include/ share/... # aggregated symlinks into kegs
//!   var/keg/locks/               # lock files for serialized writes
//! ```

use crate::error::Result;
use crate::receipt::InstallReceipt;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Marker present in a keg whose build started but has not completed.
pub const CONTAMINATED_MARKER: &str = ".keg-contaminated";

/// Detect the shared prefix on this system
pub fn detect_prefix() -> PathBuf {
    if let Ok(prefix) = std::env::var("KEG_PREFIX")
        && !prefix.is_empty()
    {
        return PathBuf::from(prefix);
    }

    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

/// Paths under one shared prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cellar(&self) -> PathBuf {
        self.root.join("Cellar")
    }

    /// Isolated per-version prefix of a formula
    pub fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.cellar().join(name).join(version)
    }

    /// Stable path to the active version of a formula
    pub fn opt(&self, name: &str) -> PathBuf {
        self.root.join("opt").join(name)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("var/keg/locks")
    }
}

/// One version directory in the Cellar
#[derive(Debug, Clone)]
pub struct InstalledKeg {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub receipt: Option<InstallReceipt>,
}

impl InstalledKeg {
    fn from_path(name: String, version: String, path: PathBuf) -> Self {
        let receipt = InstallReceipt::read(&path).ok();
        Self {
            name,
            version,
            path,
            receipt,
        }
    }

    /// A keg is complete once it has a receipt and no contamination marker.
    pub fn is_complete(&self) -> bool {
        self.receipt.is_some() && !is_contaminated(&self.path)
    }
}

/// Read all installed kegs from the Cellar
pub fn list_installed(layout: &Layout) -> Result<Vec<InstalledKeg>> {
    let cellar = layout.cellar();

    if !cellar.exists() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(&cellar)
        .with_context(|| format!("Failed to read Cellar: {}", cellar.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        kegs.extend(installed_versions(layout, &name)?);
    }

    Ok(kegs)
}

/// All versions of one formula, newest first
pub fn installed_versions(layout: &Layout, name: &str) -> Result<Vec<InstalledKeg>> {
    let formula_path = layout.cellar().join(name);

    if !formula_path.is_dir() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();

    for entry in fs::read_dir(&formula_path)? {
        let entry = entry?;
        let version = entry.file_name().to_string_lossy().to_string();

        if version.starts_with('.') || !entry.path().is_dir() {
            continue;
        }

        kegs.push(InstalledKeg::from_path(
            name.to_string(),
            version,
            entry.path(),
        ));
    }

    // [0] is always the newest version
    kegs.sort_by(|a, b| compare_versions(&b.version, &a.version));

    Ok(kegs)
}

/// The newest complete keg of `name`, if any.
pub fn current_keg(layout: &Layout, name: &str) -> Result<Option<InstalledKeg>> {
    Ok(installed_versions(layout, name)?
        .into_iter()
        .find(InstalledKeg::is_complete))
}

/// Compare two version strings numerically, falling back to lexicographic order
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u32> {
        v.split(['.', '_'])
            .filter_map(|s| s.parse::<u32>().ok())
            .collect()
    };
    let a_parts = parse(a);
    let b_parts = parse(b);

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).unwrap_or(&0);
        let b_part = b_parts.get(i).unwrap_or(&0);
        match a_part.cmp(b_part) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }

    a.cmp(b)
}

pub fn mark_contaminated(keg: &Path) -> Result<()> {
    let marker = keg.join(CONTAMINATED_MARKER);
    fs::write(&marker, b"")
        .with_context(|| format!("Failed to write marker: {}", marker.display()))?;
    Ok(())
}

pub fn clear_contaminated(keg: &Path) -> Result<()> {
    let marker = keg.join(CONTAMINATED_MARKER);
    if marker.exists() {
        fs::remove_file(&marker)?;
    }
    Ok(())
}

pub fn is_contaminated(keg: &Path) -> bool {
    keg.join(CONTAMINATED_MARKER).exists()
}
