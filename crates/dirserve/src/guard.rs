//! Path safety checks for untrusted input.
//!
//! Two kinds of input reach the filesystem: single segments (upload
//! filenames, folder/file names, lookup IDs) and whole URL paths. Segments
//! are checked with [`is_safe_segment`] and must always be joined as one
//! path component. URL paths are percent-decoded by [`decode_request_path`]
//! and then mapped under the root by [`resolve_path`], which rejects any
//! component that could climb out of it.
//!
//! Nothing in here decodes percent-escapes implicitly; callers decode first.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::FileServerError;

/// Returns true if `segment` can be used as a single path component.
///
/// Rejects `..` anywhere in the segment, both separators, and NUL.
pub fn is_safe_segment(segment: &str) -> bool {
    !(segment.contains("..")
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0'))
}

/// Reduce a client-supplied filename to its last component.
///
/// Both `/` and `\` count as separators regardless of platform, so
/// `..\\..\\evil.txt` and `../../evil.txt` both become `evil.txt`.
pub fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or_default()
}

/// Percent-decode the path of a request URI.
pub fn decode_request_path(raw: &str) -> Result<String, FileServerError> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| FileServerError::InvalidRequest("path is not valid UTF-8".to_string()))
}

/// Map a decoded URL path onto `root`, one `/`-separated segment at a time.
///
/// Empty and `.` segments are skipped. A segment must be a single plain path
/// component: `..`, anything the platform parses as a root or drive prefix,
/// backslashes and NUL are all rejected. Symlinks are not looked at here; see
/// [`resolve_and_verify_path`].
pub fn resolve_path(root: &Path, request_path: &str) -> Result<PathBuf, FileServerError> {
    let mut resolved = root.to_path_buf();

    for segment in request_path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if !is_plain_component(segment) {
            warn!("Rejected request path segment {:?}", segment);
            return Err(FileServerError::PathTraversal);
        }
        resolved.push(segment);
    }

    Ok(resolved)
}

fn is_plain_component(segment: &str) -> bool {
    if segment.contains(['\\', '\0']) {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// [`resolve_path`], then check the result against the canonical root.
///
/// An existing target is canonicalized, so a symlink pointing outside the
/// root is rejected. A target that does not exist yet is returned as built,
/// provided its closest existing ancestor is inside the root.
pub fn resolve_and_verify_path(root: &Path, request_path: &str) -> Result<PathBuf, FileServerError> {
    let candidate = resolve_path(root, request_path)?;
    let canonical_root = root.canonicalize()?;

    match candidate.canonicalize() {
        Ok(canonical) => {
            ensure_within(&canonical_root, &canonical)?;
            Ok(canonical)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(ancestor) = candidate.ancestors().skip(1).find(|a| a.exists()) {
                ensure_within(&canonical_root, &ancestor.canonicalize()?)?;
            }
            Ok(candidate)
        }
        Err(e) => Err(e.into()),
    }
}

fn ensure_within(canonical_root: &Path, canonical: &Path) -> Result<(), FileServerError> {
    if canonical.starts_with(canonical_root) {
        Ok(())
    } else {
        warn!(
            "Resolved path {} escapes root {}",
            canonical.display(),
            canonical_root.display()
        );
        Err(FileServerError::PathTraversal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_safe_segments() {
        assert!(is_safe_segment("docs"));
        assert!(is_safe_segment("report.v2.pdf"));
        assert!(is_safe_segment("42"));
        assert!(is_safe_segment(".hidden"));
    }

    #[test]
    fn test_unsafe_segments() {
        for segment in ["..", "../etc", "a/b", "a\\b", "x..y", "..\\..\\evil", "nul\0"] {
            assert!(!is_safe_segment(segment), "{segment:?} should be rejected");
        }
    }

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("../../evil.txt"), "evil.txt");
        assert_eq!(base_name("..\\..\\evil.txt"), "evil.txt");
        assert_eq!(base_name("plain.txt"), "plain.txt");
        assert_eq!(base_name("dir/"), "");
    }

    #[test]
    fn test_decode_request_path() {
        assert_eq!(decode_request_path("/a%20b/").unwrap(), "/a b/");
        assert_eq!(decode_request_path("/%2e%2e/x").unwrap(), "/../x");
        assert!(decode_request_path("/%ff").is_err());
    }

    #[test]
    fn test_resolve_path_joins_segments() {
        let root = PathBuf::from("/srv/files");
        assert_eq!(
            resolve_path(&root, "/docs/a b/report.pdf").unwrap(),
            root.join("docs").join("a b").join("report.pdf")
        );
        // Empty and `.` segments collapse.
        assert_eq!(
            resolve_path(&root, "//docs/./x//").unwrap(),
            root.join("docs").join("x")
        );
        assert_eq!(resolve_path(&root, "/").unwrap(), root);
        assert_eq!(resolve_path(&root, "").unwrap(), root);
    }

    #[test]
    fn test_resolve_path_allows_dots_inside_names() {
        let root = PathBuf::from("/srv/files");
        assert_eq!(
            resolve_path(&root, "/v1..2/notes..txt").unwrap(),
            root.join("v1..2").join("notes..txt")
        );
    }

    #[test]
    fn test_resolve_path_rejects_escaping_segments() {
        let root = PathBuf::from("/srv/files");

        for path in ["/..", "/docs/../../etc", "/a\\..\\b", "/nul\0.txt"] {
            assert!(
                matches!(resolve_path(&root, path), Err(FileServerError::PathTraversal)),
                "{path:?}"
            );
        }
    }

    #[test]
    fn test_verify_existing_and_missing_targets() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("docs")).unwrap();
        std::fs::write(root.join("docs/a.txt"), "a").unwrap();

        assert_eq!(
            resolve_and_verify_path(&root, "/docs/a.txt").unwrap(),
            root.join("docs/a.txt")
        );
        assert_eq!(
            resolve_and_verify_path(&root, "/docs/new/deeper.txt").unwrap(),
            root.join("docs/new/deeper.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_rejects_symlink_out_of_root() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        for path in ["/link/secret.txt", "/link/not-yet-created.txt"] {
            assert!(
                matches!(
                    resolve_and_verify_path(&root, path),
                    Err(FileServerError::PathTraversal)
                ),
                "{path:?}"
            );
        }
    }
}
