use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use crate::infrastructure::bluetooth::connection::{Connector, Transport};
use crate::infrastructure::bluetooth::manager::LinkTimeouts;
use crate::infrastructure::keep_alive::KeepAlive;

// ─── Scripted serial transport ──────────────────────────────────────────────

/// What the next `connect` call does. Unscripted calls succeed.
pub enum ConnectPlan {
    Succeed,
    Refuse,
    /// Succeeds, then the nth write (1-based) fails with a broken pipe
    FailOnWrite(usize),
    /// Succeeds, but closing reports an error
    FailOnClose,
    /// Blocks the handshake until the sender fires or is dropped, then succeeds
    HoldUntil(mpsc::Receiver<()>),
    /// Succeeds, then the nth write (1-based) blocks until the sender fires or
    /// is dropped, like a peer that stopped draining
    StallOnWrite(usize, mpsc::Receiver<()>),
}

#[derive(Debug, Default)]
pub struct MockStats {
    live: AtomicUsize,
    max_live: AtomicUsize,
    write_calls: AtomicUsize,
    opened: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    written: Mutex<Vec<u8>>,
}

impl MockStats {
    /// Transports connected and not yet closed
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of transports alive at the same time
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Writes that reached a transport, including ones still blocked
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Highest number of handshakes that ran at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
    }
}

#[derive(Default)]
pub struct MockConnector {
    plans: Mutex<VecDeque<ConnectPlan>>,
    stats: Arc<MockStats>,
    connected_peers: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&self, plan: ConnectPlan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        self.connected_peers.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectPlan::Succeed);

        let mut stall = None;
        let (fail_on_write, fail_on_close) = match plan {
            ConnectPlan::Succeed => (None, false),
            ConnectPlan::FailOnWrite(n) => (Some(n), false),
            ConnectPlan::FailOnClose => (None, true),
            ConnectPlan::HoldUntil(release) => {
                let _ = release.recv();
                (None, false)
            }
            ConnectPlan::StallOnWrite(n, release) => {
                stall = Some((n, release));
                (None, false)
            }
            ConnectPlan::Refuse => {
                self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "peer refused connection",
                )));
            }
        };

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live.fetch_max(live, Ordering::SeqCst);
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        self.connected_peers.lock().unwrap().push(peer.id.clone());

        Ok(Box::new(MockTransport {
            stats: self.stats.clone(),
            writes: 0,
            fail_on_write,
            fail_on_close,
            stall,
            closed: false,
        }))
    }
}

struct MockTransport {
    stats: Arc<MockStats>,
    writes: usize,
    fail_on_write: Option<usize>,
    fail_on_close: bool,
    stall: Option<(usize, mpsc::Receiver<()>)>,
    closed: bool,
}

impl Transport for MockTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        }
        self.writes += 1;
        self.stats.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_write == Some(self.writes) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away").into());
        }
        if let Some((n, release)) = &self.stall {
            if *n == self.writes {
                let _ = release.recv();
            }
        }
        self.stats.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail_on_close {
            return Err(io::Error::new(io::ErrorKind::Other, "socket already reset").into());
        }
        Ok(())
    }
}

/// Link timeouts generous enough for a loaded test machine
pub fn relaxed_timeouts() -> LinkTimeouts {
    LinkTimeouts {
        write: Duration::from_secs(2),
        retire: Duration::from_secs(5),
    }
}

// ─── Keep-alive recorder ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CountingKeepAlive {
    requests: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingKeepAlive {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> bool {
        self.requests() > self.releases()
    }
}

impl KeepAlive for CountingKeepAlive {
    fn request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
