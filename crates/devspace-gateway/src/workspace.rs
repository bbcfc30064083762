//! Filesystem operations on the shared workspace.
//!
//! Every mutation resolves its paths first and announces the resulting
//! change through the [`RefreshSignal`]. There is no locking: concurrent
//! requests on overlapping paths interleave at their await points and clients
//! converge on the next refresh.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::paths::PathResolver;
use crate::protocol::{ChangeEvent, ChangeKind};
use crate::refresh::RefreshSignal;
use crate::tree::{self, TreeNode};

/// Retry policy for clearing the workspace while something holds it busy.
#[derive(Debug, Clone, Copy)]
pub struct ClearRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ClearRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// The shared workspace directory.
#[derive(Clone)]
pub struct Workspace {
    resolver: PathResolver,
    refresh: RefreshSignal,
    clear_retry: ClearRetry,
}

impl Workspace {
    pub fn new(resolver: PathResolver, refresh: RefreshSignal, clear_retry: ClearRetry) -> Self {
        Self {
            resolver,
            refresh,
            clear_retry,
        }
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Wipe `root` and recreate it empty. Used once at startup.
    pub async fn reset(root: &Path) -> Result<(), GatewayError> {
        match fs::remove_dir_all(root).await {
            Ok(()) => info!("Removed workspace directory {}", root.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(GatewayError::Io(err)),
        }
        fs::create_dir_all(root).await?;
        info!("Ensured workspace directory {} exists", root.display());
        Ok(())
    }

    /// Snapshot the whole workspace.
    pub async fn snapshot(&self) -> Result<TreeNode, GatewayError> {
        tree::snapshot(self.resolver.root()).await
    }

    pub async fn read_file(&self, path: &str) -> Result<String, GatewayError> {
        let real = self.resolver.resolve(path).await?;

        let metadata = fs::metadata(&real)
            .await
            .map_err(|err| GatewayError::from_io(err, path))?;
        if metadata.is_dir() {
            return Err(GatewayError::IsADirectory(path.to_string()));
        }

        let bytes = fs::read(&real)
            .await
            .map_err(|err| GatewayError::from_io(err, path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create (or overwrite) a file, creating missing parent directories.
    pub async fn create_file(&self, path: &str, content: &str) -> Result<(), GatewayError> {
        self.write_file(path, content).await
    }

    /// Write a file, creating missing parent directories.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), GatewayError> {
        let real = self.resolver.resolve(path).await?;
        if self.resolver.is_root(&real) {
            return Err(GatewayError::IsADirectory(path.to_string()));
        }

        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| GatewayError::from_io(err, path))?;
        }

        let existed = fs::try_exists(&real).await.unwrap_or(false);
        fs::write(&real, content.as_bytes())
            .await
            .map_err(|err| GatewayError::from_io(err, path))?;

        debug!("Wrote {} ({} bytes)", real.display(), content.len());
        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        self.announce(kind, &real, false);
        Ok(())
    }

    /// Create a directory and its parents; succeeds if it already exists.
    pub async fn create_folder(&self, path: &str) -> Result<(), GatewayError> {
        let real = self.resolver.resolve(path).await?;
        let existed = match fs::metadata(&real).await {
            Ok(metadata) if metadata.is_dir() => true,
            Ok(_) => return Err(GatewayError::NotADirectory(path.to_string())),
            Err(_) => false,
        };

        fs::create_dir_all(&real)
            .await
            .map_err(|err| GatewayError::from_io(err, path))?;

        if !existed {
            info!("Created directory {}", real.display());
            self.announce(ChangeKind::Added, &real, true);
        }
        Ok(())
    }

    /// Move `old_path` to `new_path`.
    ///
    /// An existing destination is refused unless `overwrite` is set.
    pub async fn rename(
        &self,
        old_path: &str,
        new_path: &str,
        overwrite: bool,
    ) -> Result<(), GatewayError> {
        let old_real = self.resolver.resolve(old_path).await?;
        let new_real = self.resolver.resolve(new_path).await?;

        if self.resolver.is_root(&old_real) || self.resolver.is_root(&new_real) {
            warn!("Attempted to rename workspace root: {} -> {}", old_path, new_path);
            return Err(GatewayError::PathInvalid(
                "cannot rename the workspace root".to_string(),
            ));
        }

        let metadata = fs::symlink_metadata(&old_real)
            .await
            .map_err(|err| GatewayError::from_io(err, old_path))?;

        if let Some(parent) = new_real.parent()
            && !fs::try_exists(parent).await.unwrap_or(false)
        {
            return Err(GatewayError::NotFound(format!(
                "parent directory of {new_path}"
            )));
        }

        if !overwrite && fs::symlink_metadata(&new_real).await.is_ok() {
            return Err(GatewayError::AlreadyExists(new_path.to_string()));
        }

        info!("Renaming: {} -> {}", old_real.display(), new_real.display());
        fs::rename(&old_real, &new_real)
            .await
            .map_err(|err| GatewayError::from_io(err, old_path))?;

        let is_dir = metadata.is_dir();
        self.announce(ChangeKind::Removed, &old_real, is_dir);
        self.announce(ChangeKind::Added, &new_real, is_dir);
        Ok(())
    }

    /// Delete a file, or a directory with everything in it.
    pub async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        let real = self.resolver.resolve(path).await?;

        if self.resolver.is_root(&real) {
            warn!("Attempted to delete workspace root: {:?}", path);
            return Err(GatewayError::PathInvalid(
                "cannot delete the workspace root".to_string(),
            ));
        }

        let metadata = fs::symlink_metadata(&real)
            .await
            .map_err(|err| GatewayError::from_io(err, path))?;

        info!("Deleting: {}", real.display());
        if metadata.is_dir() {
            fs::remove_dir_all(&real).await
        } else {
            fs::remove_file(&real).await
        }
        .map_err(|err| GatewayError::from_io(err, path))?;

        self.announce(ChangeKind::Removed, &real, metadata.is_dir());
        Ok(())
    }

    /// Replace the whole workspace with `files` (relative path -> content).
    ///
    /// Every path is validated before anything is removed, including that no
    /// entry is a file and a parent directory of another entry at once.
    pub async fn upload_project(&self, files: &BTreeMap<String, String>) -> Result<(), GatewayError> {
        let mut targets: Vec<(PathBuf, &str)> = Vec::with_capacity(files.len());
        for (relative, content) in files {
            let real = self.resolver.resolve_lexical(relative)?;
            if self.resolver.is_root(&real) {
                return Err(GatewayError::PathInvalid(format!(
                    "upload entry {relative:?} does not name a file"
                )));
            }
            targets.push((real, content.as_str()));
        }
        self.check_upload_layout(&targets)?;

        self.clear_root().await?;
        self.announce(ChangeKind::Modified, self.resolver.root(), true);

        for (real, content) in &targets {
            if let Some(parent) = real.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(real, content.as_bytes()).await?;
            self.announce(ChangeKind::Added, real, false);
        }

        info!("Uploaded project with {} file(s)", targets.len());
        Ok(())
    }

    /// Reject uploads where one file would have to be a directory of another.
    fn check_upload_layout(&self, targets: &[(PathBuf, &str)]) -> Result<(), GatewayError> {
        let files: HashSet<&Path> = targets.iter().map(|(real, _)| real.as_path()).collect();
        for (real, _) in targets {
            let clash = real
                .ancestors()
                .skip(1)
                .take_while(|ancestor| !self.resolver.is_root(ancestor))
                .find(|ancestor| files.contains(ancestor));
            if let Some(parent) = clash {
                let parent = self.resolver.to_virtual(parent).unwrap_or_default();
                let child = self.resolver.to_virtual(real).unwrap_or_default();
                return Err(GatewayError::PathInvalid(format!(
                    "upload entry {parent} is a file but {child} needs it as a directory"
                )));
            }
        }
        Ok(())
    }

    /// Remove everything inside the root, keeping the root directory itself.
    async fn clear_root(&self) -> Result<(), GatewayError> {
        let mut attempts_left = self.clear_retry.attempts.max(1);
        loop {
            match self.remove_root_entries().await {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::ResourceBusy && attempts_left > 1 => {
                    attempts_left -= 1;
                    warn!(
                        "Error clearing workspace: {}. Retrying ({} left)...",
                        err, attempts_left
                    );
                    tokio::time::sleep(self.clear_retry.delay).await;
                }
                Err(err) => return Err(GatewayError::Io(err)),
            }
        }
    }

    async fn remove_root_entries(&self) -> std::io::Result<()> {
        let mut entries = fs::read_dir(self.resolver.root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let result = if file_type.is_dir() {
                fs::remove_dir_all(entry.path()).await
            } else {
                fs::remove_file(entry.path()).await
            };
            match result {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn announce(&self, kind: ChangeKind, real: &Path, is_directory: bool) {
        if let Some(path) = self.resolver.to_virtual(real) {
            self.refresh.announce(ChangeEvent::new(kind, path, is_directory));
        }
    }
}
