//! Symlink management for installed kegs
//!
//! Linking is all-or-nothing per keg: every target is checked for conflicts
//! before the first link is created.

use crate::cellar::Layout;
use crate::error::{KegError, Result};
use anyhow::Context;
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directories to symlink from a keg into the shared prefix
pub const LINKABLE_DIRS: &[&str] = &[
    "bin",
    "sbin",
    "lib",
    "include",
    "share",
    "etc",
    "Frameworks",
];

/// Lexically normalize a path, resolving `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Relative path that leads from directory `from` to `to`.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from = normalize_path(from);
    let to = normalize_path(to);
    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();

    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Where an existing symlink points, resolved against its own directory.
fn resolve_link(link: &Path) -> Option<PathBuf> {
    let target = fs::read_link(link).ok()?;
    if target.is_relative() {
        let parent = link.parent()?;
        Some(normalize_path(&parent.join(target)))
    } else {
        Some(normalize_path(&target))
    }
}

/// `name/version` of the keg a path lives in, if it is inside the Cellar.
fn keg_owner(layout: &Layout, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(normalize_path(&layout.cellar())).ok()?;
    let mut parts = rel.components();
    let name = parts.next()?.as_os_str().to_string_lossy().to_string();
    let version = parts.next()?.as_os_str().to_string_lossy().to_string();
    Some(format!("{}/{}", name, version))
}

/// Link every file of a keg into the shared directories.
///
/// Re-linking the same keg is a no-op. A target owned by any other keg
/// (including another version of the same formula) or by no keg at all is a
/// [`KegError::FilesystemConflict`]; nothing is linked in that case.
pub fn link_keg(layout: &Layout, name: &str, version: &str) -> Result<Vec<PathBuf>> {
    let keg = normalize_path(&layout.keg(name, version));
    let mut pending: Vec<(PathBuf, PathBuf)> = Vec::new();

    for dir_name in LINKABLE_DIRS {
        let source_dir = keg.join(dir_name);
        if !source_dir.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&source_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.context("Failed to walk keg")?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&keg)
                .context("Keg entry outside keg")?;
            let target = layout.root().join(rel);

            if target.symlink_metadata().is_ok() {
                match resolve_link(&target) {
                    Some(existing) if existing == entry.path() => continue,
                    Some(existing) => {
                        let owner = keg_owner(layout, &existing);
                        // dangling links left by removed kegs are reclaimed
                        if owner.is_some() && existing.symlink_metadata().is_err() {
                            pending.push((entry.path().to_path_buf(), target));
                            continue;
                        }
                        return Err(KegError::FilesystemConflict {
                            formula: name.to_string(),
                            path: target,
                            owner: owner.unwrap_or_else(|| existing.display().to_string()),
                        });
                    }
                    None => {
                        return Err(KegError::FilesystemConflict {
                            formula: name.to_string(),
                            path: target,
                            owner: "an unmanaged file".to_string(),
                        });
                    }
                }
            }
            pending.push((entry.path().to_path_buf(), target));
        }
    }

    let mut linked = Vec::with_capacity(pending.len());
    for (source, target) in pending {
        let parent = target
            .parent()
            .context("Link target has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)?;
        }
        let relative = relative_path(parent, &source);
        unix_fs::symlink(&relative, &target).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                target.display(),
                relative.display()
            )
        })?;
        linked.push(target);
    }

    debug!("Linked {} files for {}/{}", linked.len(), name, version);
    Ok(linked)
}

/// Remove shared-directory links that point into a keg
pub fn unlink_keg(layout: &Layout, name: &str, version: &str) -> Result<Vec<PathBuf>> {
    let keg = normalize_path(&layout.keg(name, version));
    let mut unlinked = Vec::new();

    for dir_name in LINKABLE_DIRS {
        let target_dir = layout.root().join(dir_name);
        if !target_dir.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&target_dir).min_depth(1) {
            let entry = entry.context("Failed to walk shared directory")?;
            if !entry.path_is_symlink() {
                continue;
            }
            if let Some(existing) = resolve_link(entry.path())
                && existing.starts_with(&keg)
            {
                fs::remove_file(entry.path())?;
                unlinked.push(entry.path().to_path_buf());
            }
        }
    }

    Ok(unlinked)
}

/// Unlink every other installed version of `name`.
pub fn unlink_other_versions(layout: &Layout, name: &str, keep: &str) -> Result<()> {
    let formula_dir = layout.cellar().join(name);
    if !formula_dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(&formula_dir)? {
        let version = entry?.file_name().to_string_lossy().to_string();
        if version != keep && !version.starts_with('.') {
            let removed = unlink_keg(layout, name, &version)?;
            if !removed.is_empty() {
                debug!("Unlinked {} files of {}/{}", removed.len(), name, version);
            }
        }
    }
    Ok(())
}

/// Point `opt/<name>` at the given version
pub fn optlink(layout: &Layout, name: &str, version: &str) -> Result<PathBuf> {
    let opt = layout.opt(name);
    let keg = layout.keg(name, version);
    let parent = opt.parent().context("opt path has no parent")?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let relative = relative_path(parent, &keg);
    if let Ok(existing) = fs::read_link(&opt) {
        if existing == relative {
            return Ok(opt);
        }
        fs::remove_file(&opt)?;
    } else if opt.symlink_metadata().is_ok() {
        return Err(KegError::FilesystemConflict {
            formula: name.to_string(),
            path: opt,
            owner: "an unmanaged file".to_string(),
        });
    }

    unix_fs::symlink(&relative, &opt)
        .with_context(|| format!("Failed to create opt link: {}", opt.display()))?;
    Ok(opt)
}

pub fn unoptlink(layout: &Layout, name: &str) -> Result<()> {
    let opt = layout.opt(name);
    if opt.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(&opt)?;
    }
    Ok(())
}
