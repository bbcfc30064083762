//! Virtual path resolution.
//!
//! Clients address files with root-relative "virtual" paths such as
//! `/src/main.py`. Every path is normalized lexically first, so a `..` that
//! would climb above the root is rejected before the filesystem is touched.
//! The deepest existing ancestor is then canonicalized and checked against the
//! canonical root, which catches symlinks pointing outside the workspace.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::GatewayError;

/// Maps virtual paths to real locations inside the workspace root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` should already be canonical; see [`PathResolver::canonical`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build a resolver for an existing directory, canonicalizing it first.
    pub fn canonical(root: &Path) -> Result<Self, GatewayError> {
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically normalize a virtual path into its root-relative segments.
    ///
    /// Duplicate separators and `.` segments are dropped and `..` pops the
    /// previous segment. Popping past the root is a `PathEscape`.
    pub fn normalize(virtual_path: &str) -> Result<Vec<String>, GatewayError> {
        if virtual_path.is_empty() {
            return Err(GatewayError::PathInvalid("path is empty".to_string()));
        }
        if virtual_path.contains('\0') {
            warn!("Path contains null byte: {:?}", virtual_path);
            return Err(GatewayError::PathInvalid(
                "path contains a null byte".to_string(),
            ));
        }

        let mut segments: Vec<String> = Vec::new();
        for segment in virtual_path.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        warn!("Path traversal attempt detected: {:?}", virtual_path);
                        return Err(GatewayError::PathEscape);
                    }
                }
                name => segments.push(name.to_string()),
            }
        }

        Ok(segments)
    }

    /// Join a virtual path onto the root without touching the filesystem.
    pub fn resolve_lexical(&self, virtual_path: &str) -> Result<PathBuf, GatewayError> {
        let segments = Self::normalize(virtual_path)?;
        let mut resolved = self.root.clone();
        for segment in segments {
            resolved.push(segment);
        }

        // Segments are plain names at this point; anything else is a bug.
        if !resolved.starts_with(&self.root) {
            return Err(GatewayError::PathEscape);
        }

        Ok(resolved)
    }

    /// Resolve a virtual path, following symlinks on the existing part of it.
    ///
    /// The returned path is the lexical join (not the canonical form) so that
    /// operations like delete and rename act on the link itself, but it is
    /// guaranteed that whatever it points through stays inside the root.
    pub async fn resolve(&self, virtual_path: &str) -> Result<PathBuf, GatewayError> {
        let resolved = self.resolve_lexical(virtual_path)?;

        // Find the deepest ancestor that exists and canonicalize it.
        let mut existing = resolved.as_path();
        loop {
            match tokio::fs::symlink_metadata(existing).await {
                Ok(_) => break,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    match existing.parent() {
                        Some(parent) if parent.starts_with(&self.root) => existing = parent,
                        _ => return Ok(resolved),
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotADirectory => {
                    return Err(GatewayError::NotADirectory(virtual_path.to_string()));
                }
                Err(err) => return Err(GatewayError::Io(err)),
            }
        }

        let canonical = match tokio::fs::canonicalize(existing).await {
            Ok(canonical) => canonical,
            // Dangling symlink: judge it by where the link text points.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let target = tokio::fs::read_link(existing).await?;
                let parent = existing.parent().unwrap_or(&self.root);
                let parent = tokio::fs::canonicalize(parent).await?;
                clean(&parent.join(target))
            }
            Err(err) => return Err(GatewayError::Io(err)),
        };

        if !canonical.starts_with(&self.root) {
            warn!(
                "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
                virtual_path, canonical, self.root
            );
            return Err(GatewayError::PathEscape);
        }

        Ok(resolved)
    }

    /// Map a real path under the root back to its virtual form (`/a/b.txt`).
    ///
    /// Always uses `/` as separator. Returns `None` for paths outside the root.
    pub fn to_virtual(&self, real: &Path) -> Option<String> {
        let relative = real.strip_prefix(&self.root).ok()?;

        let mut parts = Vec::new();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_string_lossy().to_string());
            }
        }

        Some(format!("/{}", parts.join("/")))
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }
}

/// Resolve `.` and `..` in an absolute path without touching the filesystem.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> PathResolver {
        PathResolver::new("/tmp/testroot")
    }

    #[test]
    fn test_normalize_collapses_separators_and_dots() {
        assert_eq!(
            PathResolver::normalize("//a/./b//c.txt").unwrap(),
            vec!["a", "b", "c.txt"]
        );
        assert_eq!(
            PathResolver::normalize("/a/x/../b.txt").unwrap(),
            vec!["a", "b.txt"]
        );
        assert!(PathResolver::normalize("/").unwrap().is_empty());
    }

    #[test]
    fn test_normalize_rejects_empty_and_null() {
        assert!(matches!(
            PathResolver::normalize(""),
            Err(GatewayError::PathInvalid(_))
        ));
        assert!(matches!(
            PathResolver::normalize("a\0b"),
            Err(GatewayError::PathInvalid(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_parent_escapes() {
        let r = resolver();
        for path in ["..", "/../etc/passwd", "a/../..", "/a/b/../../../x", "..\\..\\win"] {
            assert!(
                matches!(r.resolve_lexical(path), Err(GatewayError::PathEscape)),
                "{path} should escape"
            );
        }
    }

    #[test]
    fn test_resolve_leading_slash_is_root_relative() {
        let r = resolver();
        assert_eq!(
            r.resolve_lexical("/subdir/file.txt").unwrap(),
            PathBuf::from("/tmp/testroot/subdir/file.txt")
        );
        assert_eq!(r.resolve_lexical("/").unwrap(), PathBuf::from("/tmp/testroot"));
    }

    #[test]
    fn test_to_virtual() {
        let r = resolver();
        assert_eq!(
            r.to_virtual(Path::new("/tmp/testroot/a/b.txt")).as_deref(),
            Some("/a/b.txt")
        );
        assert_eq!(r.to_virtual(Path::new("/tmp/testroot")).as_deref(), Some("/"));
        assert_eq!(r.to_virtual(Path::new("/etc/passwd")), None);
    }

    #[tokio::test]
    async fn test_resolve_with_real_fs() {
        let temp_dir = TempDir::new().unwrap();
        let r = PathResolver::canonical(temp_dir.path()).unwrap();
        std::fs::create_dir_all(r.root().join("subdir")).unwrap();
        std::fs::write(r.root().join("subdir/test.txt"), "test").unwrap();

        assert_eq!(
            r.resolve("/subdir/test.txt").await.unwrap(),
            r.root().join("subdir/test.txt")
        );
        // Missing files still resolve, for creation.
        assert_eq!(
            r.resolve("/new/deep/file.txt").await.unwrap(),
            r.root().join("new/deep/file.txt")
        );
        assert!(matches!(
            r.resolve("/../outside").await,
            Err(GatewayError::PathEscape)
        ));
    }

    #[tokio::test]
    async fn test_resolve_through_a_file_is_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let r = PathResolver::canonical(temp_dir.path()).unwrap();
        std::fs::write(r.root().join("file.txt"), "x").unwrap();

        assert!(matches!(
            r.resolve("/file.txt/x").await,
            Err(GatewayError::NotADirectory(p)) if p == "/file.txt/x"
        ));
        assert!(matches!(
            r.resolve("/file.txt/deeper/x").await,
            Err(GatewayError::NotADirectory(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_detects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();

        let r = PathResolver::canonical(temp_dir.path()).unwrap();
        symlink(outside.path(), r.root().join("escape")).unwrap();

        assert!(matches!(
            r.resolve("/escape/secret.txt").await,
            Err(GatewayError::PathEscape)
        ));
        assert!(matches!(
            r.resolve("/escape/new.txt").await,
            Err(GatewayError::PathEscape)
        ));

        let missing_target = outside.path().join("not-there.txt");
        symlink(&missing_target, r.root().join("dangling")).unwrap();
        assert!(matches!(
            r.resolve("/dangling").await,
            Err(GatewayError::PathEscape)
        ));

        symlink("inside.txt", r.root().join("relative-link")).unwrap();
        assert!(r.resolve("/relative-link").await.is_ok());
    }
}
