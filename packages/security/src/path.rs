// ABOUTME: File path sanitization applied before any path is sent to a provider
// ABOUTME: Strips traversal segments and normalizes separators to a relative path

use crate::SecurityError;

/// Sanitize a sandbox-relative file path before dispatch.
///
/// Drops `..` traversal segments and empty/`.` segments, collapses repeated
/// separators, and strips any leading separator so the result is always
/// relative to the sandbox workspace root. A trailing separator on the input
/// is preserved so directory paths stay recognizable.
///
/// Fails if nothing remains after sanitization.
pub fn sanitize_file_path(path: &str) -> Result<String, SecurityError> {
    let normalized = path.replace('\\', "/");

    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect();

    if segments.is_empty() {
        return Err(SecurityError::InvalidPath(format!(
            "path '{}' is empty after sanitization",
            path
        )));
    }

    let mut sanitized = segments.join("/");
    if normalized.ends_with('/') {
        sanitized.push('/');
    }

    Ok(sanitized)
}
