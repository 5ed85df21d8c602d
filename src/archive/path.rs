use std::path::{Path, PathBuf};

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry path to a relative PathBuf, rejecting empty,
/// absolute or traversal paths.
pub(super) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        return None;
    }

    Some(relative)
}

/// Detect a top-level directory shared by every entry.
///
/// Only reported when at least one entry is nested below it, so an archive
/// holding a single bare file is never stripped.
pub(super) fn detect_common_top_dir<'a, I>(paths: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate: Option<String> = None;
    let mut saw_nested = false;

    for raw in paths {
        let Some(relative) = parse_entry_rel_path(raw) else {
            continue;
        };
        let mut components = relative.components();
        let first = components.next()?.as_os_str().to_str()?.to_string();
        if components.next().is_some() {
            saw_nested = true;
        }
        match &candidate {
            None => candidate = Some(first),
            Some(existing) if *existing == first => {}
            Some(_) => return None,
        }
    }

    candidate.filter(|_| saw_nested)
}

/// Strip the common top-level directory from a relative path, if present.
///
/// Returns `None` for the top-level directory entry itself.
pub(super) fn strip_common_top_dir(relative: &Path, top_dir: Option<&str>) -> Option<PathBuf> {
    let Some(top) = top_dir else {
        return Some(relative.to_path_buf());
    };

    let stripped = relative.strip_prefix(top).ok()?;
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped.to_path_buf())
    }
}
