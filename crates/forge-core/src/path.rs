//! Repository-relative path normalisation.
//!
//! Every overlay and tool boundary funnels paths through
//! [`normalize`] before touching the VFS, so the invariants in
//! `spec.md` §3 ("overlay paths are normalised: forward-slash, no
//! `..`, no leading slash") hold everywhere rather than being
//! re-implemented at each call site.

use crate::Error;

/// Validate and normalise a repository-relative path.
///
/// Rejects: empty paths, absolute paths (leading `/` or `\`), NUL
/// bytes, and any `..` path component (checked after splitting on
/// both `/` and `\` so Windows-style traversal is caught too).
/// Backslashes are rewritten to forward slashes in the returned path.
pub fn normalize(path: &str) -> Result<String, Error> {
    if path.is_empty() {
        return Err(Error::BadPath("path cannot be empty".into()));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(Error::BadPath(format!("'{path}' must be relative")));
    }
    if path.contains('\0') {
        return Err(Error::BadPath(format!("'{path}' contains a NUL byte")));
    }
    for component in path.split(['/', '\\']) {
        if component == ".." {
            return Err(Error::BadPath(format!("'{path}' contains '..' traversal")));
        }
    }

    let normalized: String = path
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/");

    if normalized.is_empty() {
        return Err(Error::BadPath(format!("'{path}' has no path segments")));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_relative() {
        assert_eq!(normalize("src/main.rs").unwrap(), "src/main.rs");
    }

    #[test]
    fn collapses_dot_and_redundant_separators() {
        assert_eq!(normalize("./src//lib.rs").unwrap(), "src/lib.rs");
    }

    #[test]
    fn rewrites_backslashes() {
        assert_eq!(normalize("src\\lib.rs").unwrap(), "src/lib.rs");
    }

    #[test]
    fn rejects_empty() {
        assert!(normalize("").is_err());
    }

    #[test]
    fn rejects_absolute() {
        assert!(normalize("/etc/passwd").is_err());
        assert!(normalize("\\Windows\\system32").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(normalize("src/../../../etc/passwd").is_err());
        assert!(normalize("src\\..\\secret.txt").is_err());
    }

    #[test]
    fn allows_dot_dot_inside_a_filename() {
        assert!(normalize("foo..bar.txt").is_ok());
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(normalize("src/\0evil.rs").is_err());
    }
}
