//! Path utilities for SFTP locations
//!
//! Remote SFTP paths always use `/` (per SFTP protocol), local paths go
//! through `PathBuf` so platform separators stay correct.

use std::path::Path;

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Collapse repeated separators, resolve `.` and `..`, and drop the trailing
/// separator (except for `/`). `..` never climbs above `/`; relative paths
/// keep their leading `..` segments.
pub fn normalize_remote_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                _ if !absolute => segments.push(".."),
                _ => {}
            },
            name => segments.push(name),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Whether a remote path still carries a `.` or `..` segment
pub fn has_dot_segments(path: &str) -> bool {
    path.split('/').any(|segment| segment == "." || segment == "..")
}

/// Whether `path` lies strictly below `ancestor`, compared component by
/// component.
pub fn is_below(ancestor: &str, path: &str) -> bool {
    let mut components = path.split('/').filter(|s| !s.is_empty());
    ancestor
        .split('/')
        .filter(|s| !s.is_empty())
        .all(|expected| components.next() == Some(expected))
        && components.next().is_some()
}

/// Last component of a remote path, if any.
pub fn remote_file_name(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

/// Parent of a remote path (`/a/b` -> `/a`, `/a` -> `/`, `/` -> None).
pub fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => None,
    }
}

/// Build the `n`-th disambiguated variant of `name`.
///
/// Examples:
/// - directory "docs" -> "docs (2)"
/// - file "a.txt" -> "a (2).txt"
/// - file ".env" -> ".env (2)"
/// - file "archive.tar.gz" -> "archive.tar (2).gz"
pub fn numbered_name(name: &str, n: u32, is_dir: bool) -> String {
    let suffix = format!(" ({})", n);
    if is_dir {
        return format!("{}{}", name, suffix);
    }

    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}{}.{}",
            stem.to_string_lossy(),
            suffix,
            ext.to_string_lossy()
        ),
        _ => format!("{}{}", name, suffix),
    }
}
