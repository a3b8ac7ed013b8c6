//! Keep-alive hook
//!
//! While a link is open the process asks the host to stay resident. The
//! connection manager pairs every `request` with exactly one `release`.

use tracing::debug;

pub trait KeepAlive: Send + Sync {
    fn request(&self);
    fn release(&self);
}

/// For hosts with no residency requirement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {
    fn request(&self) {}
    fn release(&self) {}
}

/// Keeps the system awake while the link is open.
///
/// On Windows a dedicated thread owns the execution state, since
/// `SetThreadExecutionState` is scoped to the calling thread. Elsewhere this
/// only records the request.
pub struct SystemKeepAlive {
    #[cfg(windows)]
    requests: std::sync::Mutex<std::sync::mpsc::Sender<bool>>,
}

impl SystemKeepAlive {
    #[cfg(windows)]
    pub fn new() -> Self {
        use windows::Win32::System::Power::{
            SetThreadExecutionState, ES_CONTINUOUS, ES_SYSTEM_REQUIRED,
        };

        let (tx, rx) = std::sync::mpsc::channel::<bool>();
        let spawned = std::thread::Builder::new()
            .name("keep-alive".to_string())
            .spawn(move || {
                while let Ok(hold) = rx.recv() {
                    let flags = if hold {
                        ES_CONTINUOUS | ES_SYSTEM_REQUIRED
                    } else {
                        ES_CONTINUOUS
                    };
                    // SAFETY: only affects this thread's execution state.
                    let previous = unsafe { SetThreadExecutionState(flags) };
                    if previous.0 == 0 {
                        tracing::warn!("SetThreadExecutionState rejected {:?}", flags);
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Keep-alive thread unavailable: {}", e);
        }

        Self {
            requests: std::sync::Mutex::new(tx),
        }
    }

    #[cfg(not(windows))]
    pub fn new() -> Self {
        Self {}
    }

    #[cfg(windows)]
    fn set(&self, hold: bool) {
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if sender.send(hold).is_err() {
            tracing::warn!("Keep-alive thread is gone");
        }
    }

    #[cfg(not(windows))]
    fn set(&self, _hold: bool) {}
}

impl Default for SystemKeepAlive {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepAlive for SystemKeepAlive {
    fn request(&self) {
        debug!("Keep-alive requested");
        self.set(true);
    }

    fn release(&self) {
        debug!("Keep-alive released");
        self.set(false);
    }
}
