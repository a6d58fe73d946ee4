use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::proto::{Command, CommandId, Record, format_command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    TimedOut,
    NotConnected,
}

/// A command waiting for its `<ACK/>`.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub raw: String,
    pub id: CommandId,
    pub deadline: Instant,
    token: u64,
}

/// Correlates confirmation-seeking sends with incoming acknowledgements.
///
/// Matching is by command id only: the device does not echo parameters, so an
/// acknowledgement frees the oldest pending entry with that id. Two in-flight
/// commands sharing an id can therefore be resolved out of order; callers that
/// need per-request outcomes must not overlap them.
#[derive(Clone)]
pub struct AckTracker {
    conn: Connection,
    pending: Rc<RefCell<Vec<PendingAck>>>,
    next_token: Rc<Cell<u64>>,
    polls: u32,
}

impl AckTracker {
    /// Registers the tracker as a record handler. Attach it before any other
    /// handler so acknowledgements are seen first.
    pub fn attach(conn: &Connection, polls: u32) -> Self {
        let tracker = Self {
            conn: conn.clone(),
            pending: Rc::new(RefCell::new(Vec::new())),
            next_token: Rc::new(Cell::new(0)),
            polls: polls.max(1),
        };
        // Only the pending set goes into the handler; the connection must not own itself.
        let pending = tracker.pending.clone();
        conn.on_record(move |record| {
            if let Record::Ack(ack) = record {
                release_first(&pending, ack.id);
            }
        });
        tracker
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn pending(&self) -> Vec<PendingAck> {
        self.pending.borrow().clone()
    }

    pub fn send_without_ack(&self, cmd: &Command) -> SendOutcome {
        match self.conn.send_command(cmd) {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!("[ack] {} not sent: {}", cmd.id(), e);
                SendOutcome::NotConnected
            }
        }
    }

    /// Send and wait up to `timeout` for the matching acknowledgement, checking
    /// at evenly spaced points across the window.
    pub async fn send_with_ack(&self, cmd: &Command, timeout: Duration) -> AckOutcome {
        let raw = format_command(cmd);
        let token = self.next_token.get();
        self.next_token.set(token.wrapping_add(1));
        self.pending.borrow_mut().push(PendingAck {
            raw: raw.clone(),
            id: cmd.id(),
            deadline: Instant::now() + timeout,
            token,
        });

        // Abandoning the wait must not leave an entry behind to absorb a later ack.
        let _entry = PendingGuard {
            pending: &self.pending,
            token,
        };

        if let Err(e) = self.conn.send(raw.as_bytes()) {
            warn!("[ack] {} not sent: {}", cmd.id(), e);
            return AckOutcome::NotConnected;
        }

        let step = timeout / self.polls;
        for _ in 0..self.polls {
            tokio::time::sleep(step).await;
            if !self.is_pending(token) {
                debug!("[ack] {} acknowledged", cmd.id());
                return AckOutcome::Acknowledged;
            }
        }

        if let Some(entry) = self.remove(token) {
            warn!(
                "[ack] no acknowledgement for {} by {:?}: {}",
                entry.id,
                entry.deadline,
                entry.raw.trim_end()
            );
        }
        AckOutcome::TimedOut
    }

    /// Frees the first pending entry for `id`, whichever request it was.
    pub fn on_acknowledgement(&self, id: CommandId) {
        release_first(&self.pending, id);
    }

    fn is_pending(&self, token: u64) -> bool {
        self.pending.borrow().iter().any(|p| p.token == token)
    }

    fn remove(&self, token: u64) -> Option<PendingAck> {
        remove_token(&self.pending, token)
    }
}

/// Drops the entry for `token` when the wait ends, however it ends.
struct PendingGuard<'a> {
    pending: &'a RefCell<Vec<PendingAck>>,
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if remove_token(self.pending, self.token).is_some() {
            debug!("[ack] dropped pending entry {}", self.token);
        }
    }
}

fn remove_token(pending: &RefCell<Vec<PendingAck>>, token: u64) -> Option<PendingAck> {
    let mut pending = pending.borrow_mut();
    let idx = pending.iter().position(|p| p.token == token)?;
    Some(pending.remove(idx))
}

fn release_first(pending: &RefCell<Vec<PendingAck>>, id: CommandId) {
    let mut pending = pending.borrow_mut();
    match pending.iter().position(|p| p.id == id) {
        Some(idx) => {
            pending.remove(idx);
        }
        None => debug!("[ack] unsolicited acknowledgement for {}", id),
    }
}
