//! Speed sampling contract shared by every sensor backend.

use crate::domain::errors::ProviderError;
use crate::domain::models::{clamp_raw, SpeedSample};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub const MPS_TO_MPH: f64 = 2.23694;
pub const KNOTS_TO_MPH: f64 = 1.15078;
pub const KMH_TO_MPH: f64 = 0.621371;

/// A source of speed samples.
///
/// `latest()` is called from the 10 Hz transmit tick and must never block.
pub trait SpeedProvider: Send {
    /// Short backend name, copied into every sample
    fn source(&self) -> &'static str;

    /// Subscribe to updates. Calling it again while started is a no-op.
    ///
    /// When the backend's capability has not been granted the provider stays
    /// inert and `ProviderError::CapabilityDenied` is returned; `start()` may be
    /// retried once the capability is available.
    fn start(&mut self) -> Result<(), ProviderError>;

    /// Unsubscribe. Safe to call when never started.
    fn stop(&mut self);

    fn is_started(&self) -> bool;

    /// Most recent sample, or a zero sample before the first update.
    fn latest(&self) -> SpeedSample;
}

/// Gate consulted by backends before they subscribe to updates.
pub trait AuthorizationCheck: Send + Sync {
    fn has_capability(&self, name: &str) -> bool;
}

/// Capabilities granted up front, typically from settings.
#[derive(Debug, Clone, Default)]
pub struct GrantedCapabilities {
    granted: HashSet<String>,
}

impl GrantedCapabilities {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuthorizationCheck for GrantedCapabilities {
    fn has_capability(&self, name: &str) -> bool {
        self.granted.contains(name)
    }
}

/// Lock-free cell holding the last raw speed seen by a backend, in mph.
#[derive(Debug, Default)]
pub struct LatestSpeed {
    raw_mph_bits: AtomicU64,
}

impl LatestSpeed {
    pub fn store_mph(&self, raw_mph: f64) {
        self.raw_mph_bits
            .store(clamp_raw(raw_mph).to_bits(), Ordering::Release);
    }

    pub fn load_mph(&self) -> f64 {
        f64::from_bits(self.raw_mph_bits.load(Ordering::Acquire))
    }

    pub fn sample(&self, source: &'static str) -> SpeedSample {
        SpeedSample::from_raw_mph(self.load_mph(), source)
    }
}
