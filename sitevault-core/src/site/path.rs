use crate::{Result, VaultError};

/// Files served for a site root, in lookup order.
pub const ENTRY_POINTS: [&str; 2] = ["index.html", "index.htm"];

/// Normalizes a client-supplied relative path into a key-safe form.
///
/// Backslashes become forward slashes and one leading slash is dropped.
/// Empty results, empty segments and `..` are rejected.
pub fn normalize_path(raw: &str) -> Result<String> {
    let converted = raw.replace('\\', "/");
    let trimmed = converted.strip_prefix('/').unwrap_or(&converted);

    if trimmed.is_empty() {
        return Err(VaultError::InvalidPath("path cannot be empty".to_string()));
    }

    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(VaultError::InvalidPath(format!(
                "{}: empty path segment",
                raw
            )));
        }
        if segment == ".." {
            return Err(VaultError::InvalidPath(format!(
                "{}: parent directory segment",
                raw
            )));
        }
        if segment == "." {
            return Err(VaultError::InvalidPath(format!(
                "{}: current directory segment",
                raw
            )));
        }
        if segment.chars().any(|c| c.is_control()) {
            return Err(VaultError::InvalidPath(format!(
                "{}: control character in path",
                raw.escape_debug()
            )));
        }
    }

    Ok(trimmed.to_string())
}

pub fn is_entry_point(path: &str) -> bool {
    ENTRY_POINTS.contains(&path)
}
