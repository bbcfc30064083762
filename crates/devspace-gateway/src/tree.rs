//! Workspace tree snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::GatewayError;

/// A node in a workspace snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    File,
    Directory { children: BTreeMap<String, TreeNode> },
}

impl TreeNode {
    pub fn empty_dir() -> Self {
        TreeNode::Directory {
            children: BTreeMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, TreeNode::Directory { .. })
    }

    /// Look up a node by a `/`-separated path relative to this node.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match node {
                TreeNode::Directory { children } => node = children.get(segment)?,
                TreeNode::File => return None,
            }
        }
        Some(node)
    }
}

/// Snapshot the directory at `root`.
///
/// The walk runs on the blocking pool. Symlinks are reported as files and
/// never followed.
pub async fn snapshot(root: &Path) -> Result<TreeNode, GatewayError> {
    let root: PathBuf = root.to_path_buf();
    tokio::task::spawn_blocking(move || build_tree(&root))
        .await
        .map_err(|err| GatewayError::Io(std::io::Error::other(err.to_string())))?
}

fn build_tree(dir: &Path) -> Result<TreeNode, GatewayError> {
    let mut children = BTreeMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // Removed while we were walking; the next refresh will catch up.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("Directory vanished during snapshot: {}", dir.display());
            return Ok(TreeNode::empty_dir());
        }
        Err(err) => return Err(GatewayError::Io(err)),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(GatewayError::Io(err)),
        };

        let node = if file_type.is_dir() {
            build_tree(&entry.path())?
        } else {
            TreeNode::File
        };
        children.insert(name, node);
    }

    Ok(TreeNode::Directory { children })
}
