//! Link Connection Manager
//!
//! Sole owner of the serial link lifecycle:
//!
//! ```text
//!              open(peer)               handshake ok
//!   Closed ───────────────▶ Opening ───────────────▶ Open
//!     ▲                        │                       │
//!     ├──── handshake failed ──┘                       │
//!     └──────────── close() / write failure ───────────┘
//! ```
//!
//! State and the [`LinkHandle`] sit behind one mutex. Each transition is a single
//! critical section and the lock is never held across a handshake or a write.
//! The handle stays in place while a write runs, so `close` always reaches it.
//! Every `open` and `close` bumps an attempt counter; a connect worker that
//! finishes after being superseded disposes its transport instead of installing
//! it. Workers also serialize on a connect gate, so at most one handshake runs
//! at a time, and no handshake starts while an earlier link transport is still
//! waiting to be disposed.

use crate::domain::errors::{LinkError, TransportError};
use crate::domain::models::{
    AppEvent, ConnectionState, ErrorReport, MessageSeverity, PeerDescriptor, StatusMessage,
};
use crate::infrastructure::bluetooth::connection::{Connector, LinkHandle, LinkTracker};
use crate::infrastructure::keep_alive::KeepAlive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes handed to the transport
    Written(usize),
    /// Link not open, nothing emitted
    Skipped,
}

/// Deadlines that keep the link from stalling its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// Longest a single write may take before the link is torn down
    pub write: Duration,
    /// Longest a connect worker waits for the previous transport to be disposed
    pub retire: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            write: Duration::from_millis(50),
            retire: Duration::from_secs(2),
        }
    }
}

struct Inner {
    state: ConnectionState,
    peer: Option<PeerDescriptor>,
    link: Option<LinkHandle>,
    attempt: u64,
    keep_alive_held: bool,
    workers: Vec<JoinHandle<()>>,
}

impl Inner {
    fn is_current(&self, attempt: u64, state: ConnectionState) -> bool {
        self.attempt == attempt && self.state == state
    }
}

struct Shared {
    inner: Mutex<Inner>,
    connect_gate: Mutex<()>,
    links: Arc<LinkTracker>,
    timeouts: LinkTimeouts,
    connector: Arc<dyn Connector>,
    keep_alive: Arc<dyn KeepAlive>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_state(&self, state: ConnectionState) {
        let _ = self.event_sender.send(AppEvent::ConnectionStatus(state));
    }

    fn send_log(&self, message: String, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }

    fn report(&self, err: &LinkError) {
        let _ = self.event_sender.send(AppEvent::Error(ErrorReport::from(err)));
        self.send_log(err.to_string(), MessageSeverity::Error);
    }

    /// Connect worker body, run on the blocking pool.
    fn run_connect(&self, attempt: u64, peer: PeerDescriptor) {
        let _gate = self
            .connect_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !self.lock().is_current(attempt, ConnectionState::Opening) {
            debug!("Connect attempt {} superseded before handshake", attempt);
            return;
        }

        let result = if self.links.wait_idle(self.timeouts.retire) {
            self.connector.connect(&peer).and_then(|transport| {
                LinkHandle::spawn(
                    peer.clone(),
                    transport,
                    self.links.clone(),
                    self.timeouts.write,
                )
            })
        } else {
            warn!(
                "{} previous link transport(s) still stuck in a write",
                self.links.live()
            );
            Err(TransportError::PreviousLinkBusy)
        };

        let mut inner = self.lock();
        if !inner.is_current(attempt, ConnectionState::Opening) {
            drop(inner);
            if let Ok(link) = result {
                info!(
                    "Discarding stale connection to {} (attempt {})",
                    peer.display_name(),
                    attempt
                );
                drop(link);
            }
            return;
        }

        match result {
            Ok(link) => {
                let name = peer.display_name().to_string();
                inner.link = Some(link);
                inner.state = ConnectionState::Open;
                if !inner.keep_alive_held {
                    inner.keep_alive_held = true;
                    self.keep_alive.request();
                }
                info!("Link OPEN to {}", name);
                self.publish_state(ConnectionState::Open);
                self.send_log(format!("Port OPEN ({})", name), MessageSeverity::Success);
            }
            Err(source) => {
                inner.state = ConnectionState::Closed;
                inner.peer = None;
                self.publish_state(ConnectionState::Closed);
                drop(inner);

                let err = LinkError::ConnectFailed {
                    peer: peer.display_name().to_string(),
                    source,
                };
                warn!("{}", err);
                self.report(&err);
            }
        }
    }

    /// Move to `Closed` and hand back the link for disposal outside the lock.
    /// With `only_attempt`, nothing happens unless that attempt is still open.
    fn teardown(&self, only_attempt: Option<u64>) -> Option<LinkHandle> {
        let mut inner = self.lock();
        if let Some(attempt) = only_attempt {
            if !inner.is_current(attempt, ConnectionState::Open) {
                return None;
            }
        }

        let previous = inner.state;
        inner.attempt += 1;
        inner.state = ConnectionState::Closed;
        inner.peer = None;
        if std::mem::take(&mut inner.keep_alive_held) {
            self.keep_alive.release();
        }

        let link = inner.link.take();
        if previous == ConnectionState::Closed {
            debug!("Close requested while already closed");
        } else {
            match &link {
                Some(link) => info!(
                    "Link CLOSED to {} (was {})",
                    link.peer().display_name(),
                    previous
                ),
                None => info!("Link CLOSED (was {})", previous),
            }
            self.publish_state(ConnectionState::Closed);
            self.send_log("Port CLOSED".to_string(), MessageSeverity::Info);
        }

        link
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.keep_alive_held {
            self.keep_alive.release();
        }
    }
}

/// Cloneable handle to the single connection state machine.
#[derive(Clone)]
pub struct LinkManager {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl LinkManager {
    /// Create a manager whose connect workers run on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        connector: Arc<dyn Connector>,
        keep_alive: Arc<dyn KeepAlive>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self::with_timeouts(connector, keep_alive, event_sender, LinkTimeouts::default())
    }

    /// Like [`LinkManager::new`] with explicit deadlines.
    pub fn with_timeouts(
        connector: Arc<dyn Connector>,
        keep_alive: Arc<dyn KeepAlive>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        timeouts: LinkTimeouts,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Closed,
                    peer: None,
                    link: None,
                    attempt: 0,
                    keep_alive_held: false,
                    workers: Vec::new(),
                }),
                connect_gate: Mutex::new(()),
                links: Arc::new(LinkTracker::default()),
                timeouts,
                connector,
                keep_alive,
                event_sender,
            }),
            runtime: Handle::current(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Peer being opened or currently open
    pub fn peer(&self) -> Option<PeerDescriptor> {
        self.shared.lock().peer.clone()
    }

    /// Start connecting to `peer`.
    ///
    /// Returns as soon as the state is `Opening`; the handshake runs on a
    /// worker and its outcome is published as events. A no-op while the link
    /// is already opening or open.
    pub fn open(&self, peer: Option<&PeerDescriptor>) -> Result<(), LinkError> {
        let Some(peer) = peer else {
            let err = LinkError::NoDeviceSelected;
            warn!("Open requested but no device selected");
            self.shared.report(&err);
            return Err(err);
        };

        let stale = {
            let mut inner = self.shared.lock();
            if inner.state.is_active() {
                debug!("Open ignored, link already {}", inner.state);
                return Ok(());
            }

            inner.attempt += 1;
            let attempt = inner.attempt;
            inner.state = ConnectionState::Opening;
            inner.peer = Some(peer.clone());

            info!("Opening RFCOMM to {} (attempt {})", peer.display_name(), attempt);
            self.shared.publish_state(ConnectionState::Opening);
            self.shared.send_log(
                format!("Opening link to {}", peer.display_name()),
                MessageSeverity::Info,
            );

            inner.workers.retain(|worker| !worker.is_finished());
            let shared = self.shared.clone();
            let target = peer.clone();
            inner.workers.push(
                self.runtime
                    .spawn_blocking(move || shared.run_connect(attempt, target)),
            );

            inner.link.take()
        };
        drop(stale);

        Ok(())
    }

    /// Tear the link down. Always succeeds, from any state.
    pub fn close(&self) {
        let link = self.shared.teardown(None);
        drop(link);
    }

    /// Close when opening or open, otherwise open `peer`.
    pub fn toggle(&self, peer: Option<&PeerDescriptor>) -> Result<(), LinkError> {
        if self.state().is_active() {
            self.close();
            Ok(())
        } else {
            self.open(peer)
        }
    }

    /// Write to the open link.
    ///
    /// Returns [`WriteOutcome::Skipped`] when the link is not open. A transport
    /// error, or a write that does not finish within the write deadline, closes
    /// the link before `WriteFailed` is returned; there is no retry.
    pub fn write(&self, bytes: &[u8]) -> Result<WriteOutcome, LinkError> {
        let (writer, attempt) = {
            let inner = self.shared.lock();
            if inner.state != ConnectionState::Open {
                return Ok(WriteOutcome::Skipped);
            }
            match &inner.link {
                Some(link) => (link.writer(), inner.attempt),
                None => return Ok(WriteOutcome::Skipped),
            }
        };

        match writer.write(bytes, self.shared.timeouts.write) {
            Ok(()) => Ok(WriteOutcome::Written(bytes.len())),
            Err(source) => {
                drop(writer);
                // A close that raced the write already disposed the link
                let link = self.shared.teardown(Some(attempt));
                drop(link);

                let err = LinkError::WriteFailed(source);
                warn!("{}", err);
                self.shared.report(&err);
                Err(err)
            }
        }
    }

    /// Wait until every connect worker spawned so far has finished.
    pub async fn wait_for_connect(&self) {
        loop {
            let workers = std::mem::take(&mut self.shared.lock().workers);
            if workers.is_empty() {
                return;
            }
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!("Connect worker failed: {}", e);
                }
            }
        }
    }
}
