//! Filesystem watcher feeding the refresh debouncer.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::paths::PathResolver;
use crate::protocol::{ChangeEvent, ChangeKind};
use crate::refresh::RefreshSignal;

/// Watches the workspace root recursively for as long as it is alive.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
}

impl ChangeWatcher {
    pub fn start(resolver: PathResolver, refresh: RefreshSignal) -> Result<Self, GatewayError> {
        let (tx, rx) = mpsc::channel(256);
        let mut watcher = notify::recommended_watcher(move |res| {
            if tx.blocking_send(res).is_err() {
                debug!("File watch channel closed");
            }
        })?;
        watcher.watch(resolver.root(), RecursiveMode::Recursive)?;
        info!("Watching {}", resolver.root().display());

        tokio::spawn(forward(rx, resolver, refresh));
        Ok(Self { _watcher: watcher })
    }
}

async fn forward(
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    resolver: PathResolver,
    refresh: RefreshSignal,
) {
    while let Some(incoming) = rx.recv().await {
        let event = match incoming {
            Ok(event) => event,
            Err(err) => {
                warn!("Watcher error: {:?}", err);
                continue;
            }
        };

        for (index, path) in event.paths.iter().enumerate() {
            let Some(virtual_path) = resolver.to_virtual(path) else {
                continue;
            };
            if virtual_path == "/" {
                continue;
            }

            let metadata = fs::symlink_metadata(path).await.ok();
            let Some(kind) = classify(&event.kind, index, metadata.is_some()) else {
                continue;
            };
            let is_dir = match &metadata {
                Some(metadata) => metadata.is_dir(),
                None => matches!(
                    event.kind,
                    EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder)
                ),
            };

            refresh.announce(ChangeEvent::new(kind, virtual_path, is_dir));
        }
    }
    debug!("File watcher stopped");
}

/// Map a notify event to a change kind for the `index`th path it names.
fn classify(kind: &EventKind, index: usize, exists: bool) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => Some(ChangeKind::Removed),
            RenameMode::To => Some(ChangeKind::Added),
            RenameMode::Both if index == 0 => Some(ChangeKind::Removed),
            RenameMode::Both => Some(ChangeKind::Added),
            _ if exists => Some(ChangeKind::Added),
            _ => Some(ChangeKind::Removed),
        },
        EventKind::Modify(_) | EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use crate::protocol::ServerEvent;
    use crate::refresh::{DebounceWindow, spawn_debouncer};
    use notify::event::AccessKind;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let rename = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        assert_eq!(classify(&rename, 0, false), Some(ChangeKind::Removed));
        assert_eq!(classify(&rename, 1, true), Some(ChangeKind::Added));

        let rename_any = EventKind::Modify(ModifyKind::Name(RenameMode::Any));
        assert_eq!(classify(&rename_any, 0, true), Some(ChangeKind::Added));
        assert_eq!(classify(&rename_any, 0, false), Some(ChangeKind::Removed));

        assert_eq!(
            classify(&EventKind::Create(CreateKind::Folder), 0, true),
            Some(ChangeKind::Added)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Any), 0, true),
            Some(ChangeKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Access(AccessKind::Any), 0, true),
            None
        );
    }

    #[tokio::test]
    async fn test_external_write_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathResolver::canonical(temp_dir.path()).unwrap();
        let (signal, mut rx) = RefreshSignal::detached();
        let _watcher = ChangeWatcher::start(resolver.clone(), signal).unwrap();

        std::fs::write(resolver.root().join("external.txt"), "x").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let change = rx.recv().await.unwrap();
                if change.path == "/external.txt" {
                    return change;
                }
            }
        })
        .await
        .unwrap();
        assert!(!change.is_directory);
    }

    #[tokio::test]
    async fn test_burst_yields_fewer_refreshes_than_files() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathResolver::canonical(temp_dir.path()).unwrap();
        let hub = Arc::new(BroadcastHub::new());
        let (_id, mut rx) = hub.subscribe();
        let (signal, _task) = spawn_debouncer(
            hub.clone(),
            DebounceWindow::new(Duration::from_millis(200), Duration::from_secs(1)),
        );
        let _watcher = ChangeWatcher::start(resolver.clone(), signal).unwrap();

        for i in 0..10 {
            std::fs::write(resolver.root().join(format!("f{i}.txt")), "x").unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let mut refreshes = 0;
        while let Ok(envelope) = rx.try_recv() {
            assert!(matches!(envelope.event, ServerEvent::FileRefresh { .. }));
            refreshes += 1;
        }
        assert!(refreshes >= 1);
        assert!(refreshes < 10);
    }
}
