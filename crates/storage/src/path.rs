//! Path validation and scoping.
//!
//! Every cache operation goes through [`validate`] so that no request can
//! reach outside the cache root, and through [`Scope`] so that writes stay
//! inside the scope a cache was created for.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a cache path for security and correctness.
/// Ensures that paths don't escape the cache root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trove_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("resources-home.dir/logo.png").is_ok());
/// assert!(validate_path("global/../user/store").is_ok()); // (never leaves cache root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves cache root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./module-home/").unwrap(),
///     Path::new("correct/module-home")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let components = normalize(path.as_ref())?;
    match components.as_os_str().is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components),
    }
}

/// Same as [`validate`], but an empty result is allowed (the root itself).
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls. Reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Subdirectory of the cache root that a cache instance is confined to.
///
/// All resolved paths are relative to the cache root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Scope {
    prefix: PathBuf,
    allow_read_outside: bool,
}

impl Scope {
    pub(crate) fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Narrow this scope to `subpath`.
    pub(crate) fn child(&self, subpath: &Path, allow_read_outside: bool) -> Result<Scope> {
        let prefix = validate(self.prefix.join(subpath))?;
        Ok(Scope { prefix, allow_read_outside })
    }

    /// Resolve a path for writing. Never leaves the scope.
    pub(crate) fn write_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.prefix.join(validate(path)?))
    }

    /// Resolve a path for reading. Climbing out of the scope is only allowed
    /// when the scope says so, and never above the cache root.
    pub(crate) fn read_path(&self, path: &Path) -> Result<PathBuf> {
        match self.allow_read_outside {
            true => validate(self.prefix.join(path)),
            false => self.write_path(path),
        }
    }

    /// Resolve a directory for listing; the empty path is the scope itself.
    pub(crate) fn list_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.prefix.join(normalize(path)?))
    }

    /// Express a root-relative path relative to this scope.
    pub(crate) fn strip<'a>(&self, root_relative: &'a Path) -> Option<&'a Path> {
        root_relative.strip_prefix(&self.prefix).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("global/store")).unwrap(), Path::new("global/store"));
        assert_eq!(validate(Path::new("a/b/c/file.png")).unwrap(), Path::new("a/b/c/file.png"));
        assert_eq!(validate(Path::new("module-home")).unwrap(), Path::new("module-home"));
    }

    #[test]
    fn test_path_normalization() {
        // Double slashes are normalized
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        // Current directory references removed
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
        // Trailing slashes stripped
        assert_eq!(validate(Path::new("a/b/c///")).unwrap(), Path::new("a/b/c"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate(Path::new("../etc/passwd")).is_err());
        assert!(validate(Path::new("a/../../b")).is_err());
        assert!(validate(Path::new("..")).is_err());
        assert!(validate(Path::new("../..")).is_err());
        // Traversal remains within cache root
        assert_eq!(validate(Path::new("a/b/..")).unwrap(), Path::new("a"));
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("./.")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_scope_write_stays_inside() {
        let scope = Scope::default().child(Path::new("user-42"), false).unwrap();
        assert_eq!(scope.write_path(Path::new("store")).unwrap(), Path::new("user-42/store"));
        assert!(scope.write_path(Path::new("../global/store")).is_err());
        // Reading out of scope is rejected as well unless allowed.
        assert!(scope.read_path(Path::new("../hello")).is_err());
    }

    #[test]
    fn test_scope_read_outside() {
        let scope = Scope::default().child(Path::new("nested/scope"), true).unwrap();
        assert_eq!(scope.read_path(Path::new("../hello")).unwrap(), Path::new("nested/hello"));
        assert_eq!(scope.read_path(Path::new("../../hello")).unwrap(), Path::new("hello"));
        // Never above the root
        assert!(scope.read_path(Path::new("../../../hello")).is_err());
        // Writes are still confined
        assert!(scope.write_path(Path::new("../hello")).is_err());
    }

    #[test]
    fn test_scope_child_cannot_escape_root() {
        assert!(Scope::default().child(Path::new(".."), false).is_err());
        let scope = Scope::default().child(Path::new("a"), false).unwrap();
        assert_eq!(scope.child(Path::new("b"), false).unwrap().prefix(), Path::new("a/b"));
    }

    #[test]
    fn test_scope_list_and_strip() {
        let scope = Scope::default().child(Path::new("a"), false).unwrap();
        assert_eq!(scope.list_path(Path::new("")).unwrap(), Path::new("a"));
        assert_eq!(scope.list_path(Path::new("dir/")).unwrap(), Path::new("a/dir"));
        assert_eq!(scope.strip(Path::new("a/dir/file")), Some(Path::new("dir/file")));
        assert_eq!(scope.strip(Path::new("b/file")), None);
    }
}
