//! Per-session event bus: an ordered, bounded, resumable stream of outbound
//! events.
//!
//! Each session owns one [`SessionChannel`]. Events emitted through it get
//! monotonic `m{seq}` ids, land in a bounded ring for replay, and fan out to
//! every attached connection. Connection-scoped events
//! (`connection_established`, replies to malformed input) carry `c{seq}`
//! ids and bypass the ring — they are not part of the session's replayable
//! history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use cf_domain::event::{Event, EventPayload};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionChannel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
}

struct ChannelInner {
    ring: VecDeque<Event>,
    next_seq: u64,
    next_conn_seq: u64,
    next_conn_id: u64,
    connections: Vec<Connection>,
}

/// One session's ordered event stream. The inner mutex serializes sends, so
/// all connections observe the same total order.
pub struct SessionChannel {
    session_id: String,
    capacity: usize,
    inner: Mutex<ChannelInner>,
}

impl SessionChannel {
    fn new(session_id: &str, capacity: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            capacity: capacity.max(1),
            inner: Mutex::new(ChannelInner {
                ring: VecDeque::new(),
                next_seq: 0,
                next_conn_seq: 0,
                next_conn_id: 0,
                connections: Vec::new(),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(session_id: &str) -> Self {
        Self::new(session_id, 100)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emit an event to every attached connection and record it in the
    /// replay ring. When the ring is full the oldest event is dropped and
    /// can no longer be replayed. Connections whose receiver is gone are
    /// detached; other connections are unaffected.
    pub fn emit(&self, payload: EventPayload) -> Event {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let event = Event {
            message_id: format!("m{}", inner.next_seq),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            payload,
        };

        inner.ring.push_back(event.clone());
        while inner.ring.len() > self.capacity {
            inner.ring.pop_front();
        }

        inner
            .connections
            .retain(|conn| conn.tx.send(event.clone()).is_ok());
        event
    }

    /// Send a connection-scoped event to one connection only, without
    /// touching the ring.
    pub fn emit_to(&self, connection_id: u64, payload: EventPayload) {
        let mut inner = self.inner.lock();
        inner.next_conn_seq += 1;
        let event = Event {
            message_id: format!("c{}", inner.next_conn_seq),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            payload,
        };
        if let Some(conn) = inner.connections.iter().find(|c| c.id == connection_id) {
            let _ = conn.tx.send(event);
        }
    }

    /// Attach a connection. `connection_established` is queued synchronously
    /// before this returns — it precedes any replay and any event emitted
    /// after the attach. With `last_seen = Some(id)`, buffered events newer
    /// than `id` are replayed; an unknown id replays the whole ring (the
    /// receiver reconciles); `None` delivers only future events.
    pub fn attach(
        &self,
        last_seen: Option<&str>,
    ) -> (u64, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_conn_id += 1;
        let connection_id = inner.next_conn_id;

        inner.next_conn_seq += 1;
        let established = Event {
            message_id: format!("c{}", inner.next_conn_seq),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            payload: EventPayload::ConnectionEstablished,
        };
        let _ = tx.send(established);

        if let Some(last_seen) = last_seen {
            let start = inner
                .ring
                .iter()
                .position(|e| e.message_id == last_seen)
                .map(|idx| idx + 1)
                // Unknown id: everything still buffered.
                .unwrap_or(0);
            for event in inner.ring.iter().skip(start) {
                let _ = tx.send(event.clone());
            }
        }

        inner.connections.push(Connection {
            id: connection_id,
            tx,
        });
        (connection_id, rx)
    }

    pub fn detach(&self, connection_id: u64) {
        self.inner
            .lock()
            .connections
            .retain(|c| c.id != connection_id);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Snapshot of the replay ring (tests, diagnostics).
    pub fn buffered(&self) -> Vec<Event> {
        self.inner.lock().ring.iter().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All session channels, created lazily.
pub struct EventBus {
    channels: RwLock<HashMap<String, Arc<SessionChannel>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn channel(&self, session_id: &str) -> Arc<SessionChannel> {
        if let Some(ch) = self.channels.read().get(session_id) {
            return ch.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionChannel::new(session_id, self.capacity)))
            .clone()
    }

    /// Drop a session's channel (teardown / eviction).
    pub fn remove(&self, session_id: &str) {
        self.channels.write().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.channels.read().len()
    }
}
