//! Prefix matching between candidate paths and blacklist entries.
//!
//! Directories and files share one semantics: an entry protects every path
//! that starts with it. An entry ending in `/` additionally protects the
//! directory named without the separator, so `/home/user/secret/` covers
//! `/home/user/secret` and `/home/user/secret/file.txt` but not
//! `/home/user/secret2/file.txt`.

use std::path::{Component, Path, PathBuf};

pub const SEPARATOR: char = '/';

/// Does `entry` protect `candidate`?
///
/// Pure string work on borrowed data; safe on the decision path.
pub fn matches(entry: &str, candidate: &str) -> bool {
    if entry.is_empty() {
        return false;
    }
    if candidate.starts_with(entry) {
        return true;
    }
    match entry.strip_suffix(SEPARATOR) {
        Some(dir) if !dir.is_empty() => candidate.trim_end_matches(SEPARATOR) == dir,
        _ => false,
    }
}

/// Lexically normalise `path` into an absolute path, resolving it against
/// `cwd` when relative. `.` and `..` are collapsed and repeated separators
/// dropped; the filesystem is never consulted, so symlinks are not followed.
pub fn normalize(path: &str, cwd: Option<&Path>) -> String {
    let raw = Path::new(path);
    let joined: PathBuf = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        match cwd {
            Some(base) => base.join(raw),
            None => Path::new("/").join(raw),
        }
    };

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in joined.components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    let mut out = String::with_capacity(path.len() + 1);
    for part in parts {
        out.push(SEPARATOR);
        out.push_str(&part.to_string_lossy());
    }
    if out.is_empty() {
        out.push(SEPARATOR);
    }
    // Keep a caller-supplied trailing separator: it is meaningful for entries.
    if path.ends_with(SEPARATOR) && !out.ends_with(SEPARATOR) {
        out.push(SEPARATOR);
    }
    out
}

/// Resolve a relative `path` against `base`. Existing paths go through the
/// filesystem, so symlinks are followed; missing ones are normalised
/// lexically. A trailing separator is kept either way.
pub fn resolve_relative(path: &str, base: &Path) -> String {
    let mut resolved = match std::fs::canonicalize(base.join(path)) {
        Ok(p) => p.display().to_string(),
        Err(_) => normalize(path, Some(base)),
    };
    if path.ends_with(SEPARATOR) && !resolved.ends_with(SEPARATOR) {
        resolved.push(SEPARATOR);
    }
    resolved
}
