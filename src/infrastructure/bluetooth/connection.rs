//! Serial Link Transport Module
//!
//! A [`Connector`] performs the blocking handshake with a peer and hands back a
//! [`Transport`], a byte-oriented output stream. Once a link is established the
//! transport moves onto a dedicated writer thread owned by a [`LinkHandle`]:
//!
//! ```text
//!   LinkManager::write ──▶ LinkWriter ──(bounded queue)──▶ link-writer thread
//!                              ▲                               │ Transport::write_all
//!                              └──── result or timeout ◀───────┘
//! ```
//!
//! A write that does not complete within its deadline fails as
//! [`TransportError::Stalled`] instead of blocking the caller. Dropping the
//! handle asks the writer to dispose the transport; a writer stuck in a write
//! disposes it as soon as that write returns. [`LinkTracker`] counts transports
//! that are not yet disposed, so a new link is never opened next to an old one.

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TrySendError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Byte-oriented output stream to a connected peer.
pub trait Transport: Send {
    /// Write and flush the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the output stream and the underlying socket.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens a [`Transport`] to a peer. `connect` may block for the duration of the
/// handshake and is only ever called from a connect worker.
pub trait Connector: Send + Sync {
    fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn Transport>, TransportError>;
}

/// Close a transport, discarding disposal errors.
pub fn dispose(peer: &PeerDescriptor, mut transport: Box<dyn Transport>) {
    match transport.close() {
        Ok(()) => debug!("Transport to {} disposed", peer.display_name()),
        Err(e) => trace!(
            "Ignoring error while disposing transport to {}: {}",
            peer.display_name(),
            e
        ),
    }
}

/// Number of link transports handed to a writer and not yet disposed.
#[derive(Debug, Default)]
pub struct LinkTracker {
    live: Mutex<usize>,
    idle: Condvar,
}

impl LinkTracker {
    pub fn live(&self) -> usize {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until every link transport is disposed. False on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let (live, _) = self
            .idle
            .wait_timeout_while(live, timeout, |live| *live > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *live == 0
    }

    fn enter(&self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.idle.notify_all();
        }
    }
}

/// A transport counted by a [`LinkTracker`]. Dropping it disposes the transport.
struct TrackedTransport {
    peer: PeerDescriptor,
    transport: Option<Box<dyn Transport>>,
    tracker: Arc<LinkTracker>,
}

impl Drop for TrackedTransport {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            dispose(&self.peer, transport);
        }
        self.tracker.leave();
    }
}

enum WriterMsg {
    Write {
        bytes: Vec<u8>,
        reply: mpsc::SyncSender<Result<(), TransportError>>,
    },
    Shutdown,
}

fn run_writer(
    mut link: TrackedTransport,
    inbox: mpsc::Receiver<WriterMsg>,
    closed: Arc<AtomicBool>,
    disposed: mpsc::SyncSender<()>,
) {
    while let Ok(msg) = inbox.recv() {
        if closed.load(Ordering::Acquire) {
            break;
        }
        let WriterMsg::Write { bytes, reply } = msg else {
            break;
        };
        let Some(transport) = link.transport.as_mut() else {
            break;
        };
        match transport.write_all(&bytes) {
            Ok(()) => {
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                // Dispose before reporting so the failure is observed on a closed link
                drop(link);
                let _ = reply.send(Err(e));
                drop(disposed);
                return;
            }
        }
    }
    drop(link);
    drop(disposed);
}

fn not_connected() -> TransportError {
    TransportError::Io(io::Error::from(io::ErrorKind::NotConnected))
}

/// Cloneable sender half of a link. Each write waits at most `timeout`.
#[derive(Clone)]
pub struct LinkWriter {
    requests: mpsc::SyncSender<WriterMsg>,
}

impl LinkWriter {
    pub fn write(&self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let (reply, result) = mpsc::sync_channel(1);
        let msg = WriterMsg::Write {
            bytes: bytes.to_vec(),
            reply,
        };
        match self.requests.try_send(msg) {
            Ok(()) => {}
            // The previous write never completed
            Err(TrySendError::Full(_)) => return Err(TransportError::Stalled(timeout)),
            Err(TrySendError::Disconnected(_)) => return Err(not_connected()),
        }

        match result.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Stalled(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(not_connected()),
        }
    }
}

/// Owns a live transport through its writer thread. Dropping the handle
/// disposes the transport, and disposal errors are discarded.
pub struct LinkHandle {
    peer: PeerDescriptor,
    writer: LinkWriter,
    closed: Arc<AtomicBool>,
    disposed: mpsc::Receiver<()>,
    dispose_grace: Duration,
}

impl LinkHandle {
    /// Move `transport` onto a writer thread. Drop waits up to `dispose_grace`
    /// for the transport to be closed.
    pub fn spawn(
        peer: PeerDescriptor,
        transport: Box<dyn Transport>,
        tracker: Arc<LinkTracker>,
        dispose_grace: Duration,
    ) -> Result<Self, TransportError> {
        tracker.enter();
        let tracked = TrackedTransport {
            peer: peer.clone(),
            transport: Some(transport),
            tracker,
        };

        let (requests, inbox) = mpsc::sync_channel(1);
        let (disposed_tx, disposed) = mpsc::sync_channel(0);
        let closed = Arc::new(AtomicBool::new(false));
        let writer_closed = closed.clone();

        // A failed spawn drops the closure, which disposes the transport
        thread::Builder::new()
            .name("link-writer".to_string())
            .spawn(move || run_writer(tracked, inbox, writer_closed, disposed_tx))?;

        Ok(Self {
            peer,
            writer: LinkWriter { requests },
            closed,
            disposed,
            dispose_grace,
        })
    }

    pub fn peer(&self) -> &PeerDescriptor {
        &self.peer
    }

    pub fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        // When the queue is full the writer is busy and sees `closed` next
        let _ = self.writer.requests.try_send(WriterMsg::Shutdown);

        match self.disposed.recv_timeout(self.dispose_grace) {
            Err(RecvTimeoutError::Timeout) => warn!(
                "Transport to {} is stuck in a write; it is disposed once the write returns",
                self.peer.display_name()
            ),
            _ => trace!("Link writer for {} finished", self.peer.display_name()),
        }
    }
}
