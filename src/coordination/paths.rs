/// Width of the suffix appended to sequential node names.
pub const SEQUENCE_WIDTH: usize = 10;

/// Joins a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    format!("{}/{}", parent, child)
}

/// Returns the parent of an absolute path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Returns the last segment of a path.
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extracts the sequence number from a sequential node name.
pub fn sequence_of(name: &str) -> Option<u64> {
    let name = node_name(name);
    if name.len() < SEQUENCE_WIDTH {
        return None;
    }
    let start = name.len() - SEQUENCE_WIDTH;
    if !name.is_char_boundary(start) {
        return None;
    }
    let suffix = &name[start..];
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Checks that a path is absolute, has no empty segments and no trailing slash.
pub fn validate_path(path: &str) -> std::result::Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("path '{}' must be absolute", path));
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(format!("path '{}' must not end with '/'", path));
    }
    if path[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(format!("path '{}' contains an empty segment", path));
    }
    Ok(())
}
