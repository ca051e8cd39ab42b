//! Exact-match source patching.
//!
//! Two kinds of edits are supported, and both are all-or-nothing: every
//! anchor or hunk is checked against the in-memory contents first, and files
//! are only written once the whole edit is known to apply. A failed edit
//! never leaves a target half-modified.

use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Why an edit could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub file: PathBuf,
    pub reason: String,
}

impl PatchFailure {
    fn new(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

type PatchResult<T> = std::result::Result<T, PatchFailure>;

/// Replace every occurrence of each `before` with its `after`, in order.
///
/// Fails if any `before` is absent at the point it is applied.
pub fn inreplace(path: &Path, replacements: &[(&str, &str)]) -> PatchResult<()> {
    let original = fs::read_to_string(path)
        .map_err(|e| PatchFailure::new(path, format!("cannot read file: {}", e)))?;

    let mut contents = original.clone();
    for (before, after) in replacements {
        if before.is_empty() {
            return Err(PatchFailure::new(path, "empty search text"));
        }
        if !contents.contains(before) {
            return Err(PatchFailure::new(
                path,
                format!("expected text not found: {:?}", first_line(before)),
            ));
        }
        contents = contents.replace(before, after);
    }

    if contents != original {
        write_atomic(path, contents.as_bytes())
            .map_err(|e| PatchFailure::new(path, format!("cannot write file: {}", e)))?;
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

/// Write through a sibling temp file and rename, keeping the permissions of
/// an existing file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let parent = path.parent().context("Path has no parent directory")?;
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .context("Path has no file name")?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.keg-tmp", file_name));

    fs::write(&tmp, contents).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions())?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// One file's section of a unified diff
#[derive(Debug)]
struct FileDiff {
    old: Option<String>,
    new: Option<String>,
    text: String,
}

fn header_path(line: &str, marker: &str) -> Option<String> {
    let raw = line.strip_prefix(marker)?.trim_end_matches(['\n', '\r']);
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    if raw == "/dev/null" {
        None
    } else {
        Some(raw.to_string())
    }
}

fn hunk_counts(line: &str) -> Option<(usize, usize)> {
    // @@ -l[,s] +l[,s] @@
    let body = line.strip_prefix("@@ ")?;
    let mut parts = body.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let count = |range: &str| -> Option<usize> {
        match range.split_once(',') {
            Some((_, n)) => n.parse().ok(),
            None => Some(1),
        }
    };
    Some((count(old)?, count(new)?))
}

/// Split a (possibly multi-file) unified diff into per-file sections.
fn split_diff(diff: &str) -> std::result::Result<Vec<FileDiff>, String> {
    let lines: Vec<&str> = diff.split_inclusive('\n').collect();
    let mut files: Vec<FileDiff> = Vec::new();
    let (mut old_left, mut new_left) = (0usize, 0usize);
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if old_left > 0 || new_left > 0 {
            let current = files.last_mut().ok_or("hunk outside of a file section")?;
            match line.as_bytes().first() {
                Some(b' ') | Some(b'\n') => {
                    old_left = old_left.saturating_sub(1);
                    new_left = new_left.saturating_sub(1);
                }
                Some(b'-') => old_left = old_left.saturating_sub(1),
                Some(b'+') => new_left = new_left.saturating_sub(1),
                Some(b'\\') => {}
                _ => return Err(format!("malformed hunk line: {:?}", line.trim_end())),
            }
            current.text.push_str(line);
            if !line.ends_with('\n') {
                current.text.push('\n');
            }
        } else if line.starts_with("--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "))
        {
            let old = header_path(line, "--- ");
            let new = header_path(lines[i + 1], "+++ ");
            let text = format!(
                "--- {}\n+++ {}\n",
                old.as_deref().unwrap_or("/dev/null"),
                new.as_deref().unwrap_or("/dev/null")
            );
            files.push(FileDiff { old, new, text });
            i += 1;
        } else if line.starts_with("@@") {
            let (o, n) = hunk_counts(line).ok_or_else(|| format!("bad hunk header: {}", line.trim_end()))?;
            let current = files.last_mut().ok_or("hunk before any file header")?;
            current.text.push_str(line);
            old_left = o;
            new_left = n;
        } else if line.starts_with('\\') {
            if let Some(current) = files.last_mut() {
                current.text.push_str(line);
            }
        }
        // anything else (diff --git, index, prose) is ignored
        i += 1;
    }

    if old_left > 0 || new_left > 0 {
        return Err("diff ends in the middle of a hunk".to_string());
    }
    if files.is_empty() {
        return Err("no file sections found in diff".to_string());
    }
    Ok(files)
}

/// Contents of a newly created file: every `+` line of its hunks.
fn added_lines(text: &str) -> String {
    let mut out = String::new();
    let mut lines = text.split_inclusive('\n').skip(2).peekable();
    while let Some(line) = lines.next() {
        if let Some(added) = line.strip_prefix('+') {
            if lines.peek().is_some_and(|next| next.starts_with('\\')) {
                out.push_str(added.trim_end_matches('\n'));
            } else {
                out.push_str(added);
            }
        }
    }
    out
}

fn strip_components(path: &str, strip: usize) -> Option<PathBuf> {
    let stripped: PathBuf = Path::new(path).components().skip(strip).collect();
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Apply a unified diff under `root`, stripping `strip` leading path components.
///
/// Hunk context must match exactly; there is no fuzz factor.
pub fn apply_unified_diff(root: &Path, diff: &str, strip: usize) -> PatchResult<Vec<PathBuf>> {
    let sections = split_diff(diff).map_err(|reason| PatchFailure::new(root, reason))?;

    // target path -> new contents (None = delete)
    let mut pending: Vec<(PathBuf, Option<String>)> = Vec::new();
    let mut staged: HashMap<PathBuf, Option<String>> = HashMap::new();

    for section in &sections {
        let name = section
            .new
            .as_deref()
            .or(section.old.as_deref())
            .ok_or_else(|| PatchFailure::new(root, "both sides are /dev/null"))?;
        let rel = strip_components(name, strip).ok_or_else(|| {
            PatchFailure::new(root, format!("cannot strip {} components from {}", strip, name))
        })?;
        let target = root.join(&rel);

        let current: Option<String> = match staged.get(&target) {
            Some(contents) => contents.clone(),
            None if target.exists() => Some(
                fs::read_to_string(&target)
                    .map_err(|e| PatchFailure::new(&target, format!("cannot read file: {}", e)))?,
            ),
            None => None,
        };

        let base = match (&section.old, current) {
            (None, None) => String::new(),
            (None, Some(_)) => {
                return Err(PatchFailure::new(&target, "file to be created already exists"));
            }
            (Some(_), None) => return Err(PatchFailure::new(&target, "file not found")),
            (Some(_), Some(text)) => text,
        };

        let patched = if section.old.is_none() {
            added_lines(&section.text)
        } else {
            let patch = diffy::Patch::from_str(&section.text)
                .map_err(|e| PatchFailure::new(&target, format!("malformed diff: {}", e)))?;
            diffy::apply(&base, &patch)
                .map_err(|e| PatchFailure::new(&target, format!("hunk does not match: {}", e)))?
        };

        let result = if section.new.is_none() {
            if !patched.is_empty() {
                return Err(PatchFailure::new(&target, "deleted file still has content"));
            }
            None
        } else {
            Some(patched)
        };

        staged.insert(target.clone(), result.clone());
        pending.retain(|(p, _)| p != &target);
        pending.push((target, result));
    }

    let mut touched = Vec::with_capacity(pending.len());
    for (target, contents) in pending {
        match contents {
            Some(text) => write_atomic(&target, text.as_bytes())
                .map_err(|e| PatchFailure::new(&target, e.to_string()))?,
            None => fs::remove_file(&target)
                .map_err(|e| PatchFailure::new(&target, format!("cannot remove file: {}", e)))?,
        }
        touched.push(target);
    }
    Ok(touched)
}
