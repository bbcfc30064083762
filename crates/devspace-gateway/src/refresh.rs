//! Coalesces change announcements into `file:refresh` notifications.
//!
//! CRUD operations announce their own changes and the filesystem watcher
//! reports the same changes again moments later. Both feed one debouncer, so
//! everything landing inside a quiet window goes out as a single refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::hub::BroadcastHub;
use crate::protocol::{ChangeEvent, ServerEvent};

/// Cloneable handle used to announce changes.
#[derive(Clone)]
pub struct RefreshSignal {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl RefreshSignal {
    pub fn announce(&self, change: ChangeEvent) {
        if self.tx.send(change).is_err() {
            debug!("Refresh debouncer stopped; dropping change");
        }
    }

    /// A signal whose receiver is handed back to the caller, for tests.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Timing of the debouncer.
#[derive(Debug, Clone, Copy)]
pub struct DebounceWindow {
    /// Quiet period after the latest change before publishing.
    pub quiet: Duration,
    /// Longest a change may wait while changes keep arriving.
    pub max_wait: Duration,
}

impl DebounceWindow {
    pub fn new(quiet: Duration, max_wait: Duration) -> Self {
        Self {
            quiet,
            max_wait: max_wait.max(quiet),
        }
    }
}

/// Spawn the debouncer task publishing to `hub`.
///
/// The task ends once every [`RefreshSignal`] clone has been dropped,
/// flushing whatever is still pending.
pub fn spawn_debouncer(hub: Arc<BroadcastHub>, window: DebounceWindow) -> (RefreshSignal, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(rx, hub, window));
    (RefreshSignal { tx }, handle)
}

async fn run(mut rx: mpsc::UnboundedReceiver<ChangeEvent>, hub: Arc<BroadcastHub>, window: DebounceWindow) {
    let mut pending: HashMap<String, ChangeEvent> = HashMap::new();
    let mut first_pending: Option<Instant> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            incoming = rx.recv() => {
                match incoming {
                    Some(change) => {
                        pending.insert(change.path.clone(), change);
                        let now = Instant::now();
                        let first = *first_pending.get_or_insert(now);
                        // Bounded by max_wait from the first pending change.
                        deadline = Some((now + window.quiet).min(first + window.max_wait));
                    }
                    None => break,
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                first_pending = None;
                flush(&hub, &mut pending);
            }
        }
    }

    flush(&hub, &mut pending);
}

fn flush(hub: &BroadcastHub, pending: &mut HashMap<String, ChangeEvent>) {
    if pending.is_empty() {
        return;
    }

    let mut changes: Vec<ChangeEvent> = pending.drain().map(|(_, change)| change).collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    debug!("Publishing file:refresh with {} change(s)", changes.len());
    hub.publish(ServerEvent::FileRefresh { changes });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChangeKind;

    const QUIET: Duration = Duration::from_millis(40);

    fn window() -> DebounceWindow {
        DebounceWindow::new(QUIET, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_into_one_refresh() {
        let hub = Arc::new(BroadcastHub::new());
        let (_id, mut rx) = hub.subscribe();
        let (signal, _task) = spawn_debouncer(hub.clone(), window());

        for i in 0..20 {
            signal.announce(ChangeEvent::new(ChangeKind::Added, format!("/f{i}.txt"), false));
        }
        // Same path reported twice (operation + watcher) collapses.
        signal.announce(ChangeEvent::new(ChangeKind::Modified, "/f0.txt", false));

        let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.event {
            ServerEvent::FileRefresh { changes } => {
                assert_eq!(changes.len(), 20);
                let f0 = changes.iter().find(|c| c.path == "/f0.txt").unwrap();
                assert_eq!(f0.kind, ChangeKind::Modified);
            }
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::sleep(QUIET * 4).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_separate_windows_publish_separately() {
        let hub = Arc::new(BroadcastHub::new());
        let (_id, mut rx) = hub.subscribe();
        let (signal, _task) = spawn_debouncer(hub.clone(), window());

        signal.announce(ChangeEvent::new(ChangeKind::Added, "/a", true));
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();

        signal.announce(ChangeEvent::new(ChangeKind::Removed, "/a", true));
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();

        assert_eq!((first.seq, second.seq), (1, 2));
    }

    #[tokio::test]
    async fn test_pending_changes_flush_on_shutdown() {
        let hub = Arc::new(BroadcastHub::new());
        let (_id, mut rx) = hub.subscribe();
        let (signal, task) = spawn_debouncer(
            hub.clone(),
            DebounceWindow::new(Duration::from_secs(60), Duration::from_secs(60)),
        );

        signal.announce(ChangeEvent::new(ChangeKind::Added, "/late.txt", false));
        drop(signal);
        task.await.unwrap();

        assert!(matches!(
            rx.try_recv().unwrap().event,
            ServerEvent::FileRefresh { .. }
        ));
    }

    #[tokio::test]
    async fn test_steady_activity_still_publishes_within_max_wait() {
        let hub = Arc::new(BroadcastHub::new());
        let (_id, mut rx) = hub.subscribe();
        let (signal, _task) = spawn_debouncer(
            hub.clone(),
            DebounceWindow::new(Duration::from_millis(250), Duration::from_millis(500)),
        );

        // A change every 100 ms never leaves a 250 ms quiet gap.
        let writer = tokio::spawn(async move {
            for _ in 0..30 {
                signal.announce(ChangeEvent::new(ChangeKind::Modified, "/out.log", false));
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let envelope = tokio::time::timeout(Duration::from_millis(1500), rx.recv())
            .await
            .expect("refresh postponed by steady activity")
            .unwrap();
        assert!(matches!(envelope.event, ServerEvent::FileRefresh { .. }));
        writer.abort();
    }

    #[test]
    fn test_max_wait_is_never_shorter_than_quiet() {
        let window = DebounceWindow::new(Duration::from_millis(300), Duration::from_millis(100));
        assert_eq!(window.max_wait, Duration::from_millis(300));
    }
}
