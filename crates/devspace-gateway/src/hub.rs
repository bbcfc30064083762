//! Broadcast hub fanning events out to every connected session.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::{Envelope, ServerEvent};

/// Identifier of a connected session.
pub type SessionId = Uuid;

/// Receiving end of a session's event queue.
pub type SessionReceiver = mpsc::UnboundedReceiver<Envelope>;

struct SessionQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    next_seq: u64,
}

impl SessionQueue {
    fn push(&mut self, event: ServerEvent) -> bool {
        self.next_seq += 1;
        self.tx
            .send(Envelope {
                seq: self.next_seq,
                event,
            })
            .is_ok()
    }
}

/// Hub tracking every open session and its event queue.
///
/// Each session owns an unbounded queue, so a slow or stuck client never
/// blocks publishing to the others. Sequence numbers are assigned while the
/// session entry is locked, which keeps them strictly increasing in the
/// order events land in the queue.
pub struct BroadcastHub {
    sessions: DashMap<SessionId, SessionQueue>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a new session and return its id and event queue.
    pub fn subscribe(&self) -> (SessionId, SessionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.sessions.insert(id, SessionQueue { tx, next_seq: 0 });
        info!("Session {} subscribed ({} connected)", id, self.sessions.len());
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &SessionId) {
        if self.sessions.remove(id).is_some() {
            info!("Session {} unsubscribed ({} connected)", id, self.sessions.len());
        }
    }

    /// Deliver an event to every subscribed session.
    pub fn publish(&self, event: ServerEvent) {
        let mut closed = Vec::new();

        for mut entry in self.sessions.iter_mut() {
            if !entry.value_mut().push(event.clone()) {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            debug!("Dropping closed session {} during {}", id, event.kind());
            self.sessions.remove(&id);
        }
    }

    /// Deliver an event to a single session. Returns false if it is gone.
    pub fn send_to(&self, id: &SessionId, event: ServerEvent) -> bool {
        let delivered = match self.sessions.get_mut(id) {
            Some(mut queue) => queue.push(event),
            None => return false,
        };

        if !delivered {
            debug!("Dropping closed session {}", id);
            self.sessions.remove(id);
        }
        delivered
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
