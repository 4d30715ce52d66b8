//! Session bookkeeping for the relay server
//!
//! This module owns every connected session and is the only place that
//! creates or destroys them:
//! - Admission with a hard capacity limit and monotonically assigned ids
//! - Activity tracking for idle eviction
//! - Best-effort, non-blocking delivery to one session or to all of them
//! - Mark-for-removal of peers whose sends failed
//!
//! Other components refer to sessions by id only and never keep a session
//! across ticks.

use log::{debug, info};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{Result, ServerError};

pub type SessionId = u64;

/// Server side handle to one TCP connection.
///
/// Outbound payloads go through a bounded queue drained by a writer task; the
/// reader task is aborted when the link goes away. Dropping the link is what
/// closes the socket, so it happens exactly once.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<Vec<u8>>,
    reader: Option<AbortHandle>,
    writer: Option<JoinHandle<()>>,
}

impl Link {
    /// Creates a link with no I/O tasks attached.
    pub fn new(outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            outbound,
            reader: None,
            writer: None,
        }
    }

    pub fn with_tasks(
        outbound: mpsc::Sender<Vec<u8>>,
        reader: AbortHandle,
        writer: JoinHandle<()>,
    ) -> Self {
        Self {
            outbound,
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Closes the connection.
    ///
    /// Payloads already queued are still flushed; the returned writer handle
    /// finishes once they are. A writer whose queue is full is stuck on a peer
    /// that stopped reading, so it is aborted instead and nothing is returned.
    pub fn close(mut self) -> Option<JoinHandle<()>> {
        let writer = self.writer.take()?;
        if self.outbound.capacity() == 0 {
            writer.abort();
            return None;
        }
        Some(writer)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// A connected client
#[derive(Debug)]
pub struct Session {
    /// Unique id assigned at accept time
    pub id: SessionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    /// Last time anything was received from this session
    pub last_seen: Instant,
    link: Link,
}

impl Session {
    fn new(id: SessionId, addr: SocketAddr, link: Link) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            link,
        }
    }

    pub fn refresh_last_seen(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if the session has been silent for longer than `timeout`
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Queues `payload` without waiting.
    ///
    /// Fails when the writer is gone or the peer has stopped draining its
    /// queue.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        match self.link.outbound.try_send(payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                Err(ServerError::SendFailure { id: self.id })
            }
        }
    }

    fn close(self) -> Option<JoinHandle<()>> {
        self.link.close()
    }
}

/// The authoritative set of active sessions
///
/// Sessions are kept in admission order. Ids are never reused while the
/// registry lives, and the number of sessions never exceeds `max_sessions`.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    next_session_id: SessionId,
    max_sessions: usize,
    /// Sessions whose sends failed, evicted by the next reaper pass
    scheduled: Vec<SessionId>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Vec::new(),
            next_session_id: 0,
            max_sessions,
            scheduled: Vec::new(),
        }
    }

    /// Admits a new connection
    ///
    /// `connect` is handed the freshly assigned id and builds the session's
    /// link. It is not called when the registry is full, in which case
    /// whatever it captured is dropped by the caller.
    pub fn accept<F>(&mut self, addr: SocketAddr, connect: F) -> Result<SessionId>
    where
        F: FnOnce(SessionId) -> Link,
    {
        if self.sessions.len() >= self.max_sessions {
            return Err(ServerError::CapacityExceeded {
                capacity: self.max_sessions,
            });
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        let session = Session::new(id, addr, connect(id));
        info!("Session {} connected from {}", id, addr);
        self.sessions.push(session);

        Ok(id)
    }

    /// Removes a session and closes its connection
    ///
    /// Removing an id that is not registered changes nothing and reports
    /// `SessionNotFound`.
    pub fn remove(&mut self, id: SessionId) -> Result<()> {
        let index = self
            .position(id)
            .ok_or(ServerError::SessionNotFound(id))?;

        let session = self.sessions.remove(index);
        info!("Session {} disconnected", session.id);
        drop(session.close());
        Ok(())
    }

    /// Marks a session as active now. Returns false for unknown ids.
    pub fn touch(&mut self, id: SessionId) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.refresh_last_seen();
                true
            }
            None => false,
        }
    }

    pub fn find_by_id(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.position(id).is_some()
    }

    /// Snapshot of every registered id, in admission order
    ///
    /// Callers that remove sessions while walking the registry iterate this
    /// copy, never the live collection.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id).collect()
    }

    /// Sends `payload` to a single session
    ///
    /// A failed send schedules the target for removal.
    pub fn send_to(&mut self, id: SessionId, payload: &[u8]) -> Result<()> {
        let session = self
            .find_by_id(id)
            .ok_or(ServerError::SessionNotFound(id))?;

        let result = session.send(payload);
        if result.is_err() {
            self.schedule_removal(id);
        }
        result
    }

    /// Sends `payload` to every session except `exclude`
    ///
    /// Returns how many sessions accepted the payload. Sessions that could not
    /// take it are scheduled for removal.
    pub fn broadcast(&mut self, payload: &[u8], exclude: Option<SessionId>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for session in &self.sessions {
            if Some(session.id) == exclude {
                continue;
            }

            match session.send(payload) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(session.id),
            }
        }

        for id in failed {
            self.schedule_removal(id);
        }

        delivered
    }

    /// Queues a session for eviction by the next reaper pass
    pub fn schedule_removal(&mut self, id: SessionId) {
        if !self.scheduled.contains(&id) {
            debug!("Session {} scheduled for removal", id);
            self.scheduled.push(id);
        }
    }

    pub fn take_scheduled(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.scheduled)
    }

    /// Ids of sessions silent for longer than `timeout` at `now`
    pub fn idle_ids(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|s| s.is_timed_out(now, timeout))
            .map(|s| s.id)
            .collect()
    }

    /// Closes and removes every session
    ///
    /// Returns the writer tasks still flushing, so shutdown can wait for them.
    pub fn close_all(&mut self) -> Vec<JoinHandle<()>> {
        self.scheduled.clear();
        self.sessions
            .drain(..)
            .filter_map(|session| {
                info!("Closing session {}", session.id);
                session.close()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }
}
