//! Source staging: locate the pre-fetched source, verify it, and unpack it
//! into a fresh build directory.
//!
//! Fetching is someone else's job. A source `url` is resolved as:
//! - `file:///abs/path` or a plain path: used directly (relative paths are
//!   taken from the formula's directory)
//! - anything with a scheme: `<cache>/downloads/<basename of url>`
//!
//! `.tar.gz`/`.tgz`/`.tar` are unpacked in-process; `.tar.xz`, `.tar.bz2`,
//! `.tar.zst` go through the system `tar` and `.zip` through `unzip`. Any other
//! file is copied as-is, and a directory source is copied recursively.
//! When the result is a single top-level directory, that directory is the
//! source tree.

use crate::error::{KegError, Result};
use crate::formula::Formula;
use anyhow::Context;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tar::Archive;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Where the source archive of `formula` is expected on disk.
pub fn source_location(formula: &Formula, downloads: &Path) -> Option<PathBuf> {
    let source = formula.source.as_ref()?;
    let url = source.url.as_str();

    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        let name = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .next()
            .unwrap_or(url);
        return Some(downloads.join(name));
    }

    let path = PathBuf::from(url);
    if path.is_relative()
        && let Some(dir) = formula.path.as_ref().and_then(|p| p.parent())
    {
        return Some(dir.join(path));
    }
    Some(path)
}

/// Stream a file through SHA-256
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stage the source of `formula` under `build_root` and return the source tree.
///
/// The build directory is recreated from scratch on every call.
pub fn stage_source(formula: &Formula, downloads: &Path, build_root: &Path) -> Result<PathBuf> {
    let build_dir = build_root.join(format!("{}-{}", formula.name, formula.pkg_version()));
    if build_dir.exists() {
        fs::remove_dir_all(&build_dir)
            .with_context(|| format!("Failed to clear {}", build_dir.display()))?;
    }
    fs::create_dir_all(&build_dir)
        .with_context(|| format!("Failed to create {}", build_dir.display()))?;

    let Some(location) = source_location(formula, downloads) else {
        debug!("{} has no source; building in an empty directory", formula.name);
        return Ok(build_dir);
    };

    if !location.exists() {
        return Err(KegError::SourceUnavailable {
            formula: formula.name.clone(),
            path: location,
        });
    }

    if location.is_dir() {
        if formula.source.as_ref().is_some_and(|s| s.sha256.is_some()) {
            warn!("{}: checksum ignored for directory source", formula.name);
        }
        copy_tree(&location, &build_dir)?;
        return Ok(enter_single_dir(build_dir));
    }

    if let Some(expected) = formula.source.as_ref().and_then(|s| s.sha256.as_deref()) {
        let actual = sha256_file(&location)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(KegError::ChecksumMismatch {
                formula: formula.name.clone(),
                expected: expected.to_string(),
                actual,
            });
        }
        debug!("Checksum verified for {}", location.display());
    }

    extract(&location, &build_dir)?;
    Ok(enter_single_dir(build_dir))
}

/// Unpack (or copy) one source file into `dest`.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        let file = fs::File::open(archive)
            .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
        Archive::new(GzDecoder::new(file))
            .unpack(dest)
            .with_context(|| format!("Failed to extract {}", archive.display()))?;
    } else if filename.ends_with(".tar") {
        let file = fs::File::open(archive)
            .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
        Archive::new(file)
            .unpack(dest)
            .with_context(|| format!("Failed to extract {}", archive.display()))?;
    } else if [".tar.xz", ".txz", ".tar.bz2", ".tbz2", ".tar.zst"]
        .iter()
        .any(|ext| filename.ends_with(ext))
    {
        let mut cmd = Command::new("tar");
        cmd.arg("-xf").arg(archive).arg("-C").arg(dest);
        run_tool(cmd, archive)?;
    } else if filename.ends_with(".zip") {
        let mut cmd = Command::new("unzip");
        cmd.arg("-qq").arg(archive).arg("-d").arg(dest);
        run_tool(cmd, archive)?;
    } else {
        fs::copy(archive, dest.join(&filename))
            .with_context(|| format!("Failed to copy {}", archive.display()))?;
    }

    Ok(())
}

fn run_tool(mut cmd: Command, archive: &Path) -> Result<()> {
    let output = cmd
        .output()
        .with_context(|| format!("Failed to run extractor for {}", archive.display()))?;
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "Failed to extract {}: {}",
            archive.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )
        .into());
    }
    Ok(())
}

/// Recursively copy `from` into `to`, preserving symlinks and permissions.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.context("Failed to walk source directory")?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .context("Entry outside source directory")?;
        let dest = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(target, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn enter_single_dir(dir: PathBuf) -> PathBuf {
    let entries: Vec<PathBuf> = match fs::read_dir(&dir) {
        Ok(rd) => rd.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(_) => return dir,
    };
    match entries.as_slice() {
        [only] if only.is_dir() && !only.is_symlink() => only.clone(),
        _ => dir,
    }
}
