//! Programmatically fed speed backend
//!
//! Stands in for a real sensor on the bench. Values arrive through a
//! [`SpeedFeed`] handle and only land while the provider is started.

use crate::domain::errors::ProviderError;
use crate::domain::models::SpeedSample;
use crate::domain::speed::{LatestSpeed, SpeedProvider, MPS_TO_MPH};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub const SOURCE_NAME: &str = "SIM";

#[derive(Debug, Default)]
struct FeedState {
    latest: LatestSpeed,
    subscribed: AtomicBool,
}

/// Cloneable handle for pushing readings into a [`SimulatedSpeedProvider`].
#[derive(Debug, Clone)]
pub struct SpeedFeed {
    state: Arc<FeedState>,
}

impl SpeedFeed {
    /// Returns false when the reading was dropped because the provider is stopped.
    pub fn push_mph(&self, raw_mph: f64) -> bool {
        if !self.state.subscribed.load(Ordering::Acquire) {
            debug!("Simulated reading {} ignored, provider stopped", raw_mph);
            return false;
        }
        self.state.latest.store_mph(raw_mph);
        true
    }

    pub fn push_mps(&self, meters_per_second: f64) -> bool {
        self.push_mph(meters_per_second * MPS_TO_MPH)
    }
}

#[derive(Debug)]
pub struct SimulatedSpeedProvider {
    state: Arc<FeedState>,
    initial_mph: f64,
}

impl SimulatedSpeedProvider {
    /// `initial_mph` becomes the current reading on the first `start()`.
    pub fn new(initial_mph: f64) -> Self {
        Self {
            state: Arc::new(FeedState::default()),
            initial_mph,
        }
    }

    pub fn feed(&self) -> SpeedFeed {
        SpeedFeed {
            state: self.state.clone(),
        }
    }
}

impl SpeedProvider for SimulatedSpeedProvider {
    fn source(&self) -> &'static str {
        SOURCE_NAME
    }

    fn start(&mut self) -> Result<(), ProviderError> {
        if self.state.subscribed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.initial_mph != 0.0 {
            self.state.latest.store_mph(self.initial_mph);
            self.initial_mph = 0.0;
        }
        info!("sim_started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.state.subscribed.swap(false, Ordering::AcqRel) {
            info!("sim_stopped");
        }
    }

    fn is_started(&self) -> bool {
        self.state.subscribed.load(Ordering::Acquire)
    }

    fn latest(&self) -> SpeedSample {
        self.state.latest.sample(SOURCE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_are_ignored_until_started() {
        let mut provider = SimulatedSpeedProvider::new(0.0);
        let feed = provider.feed();

        assert!(!feed.push_mph(12.0));
        assert_eq!(provider.latest(), SpeedSample::zero(SOURCE_NAME));

        provider.start().unwrap();
        assert!(feed.push_mph(12.0));
        assert_eq!(provider.latest().speed_mph, 12.0);
    }

    #[test]
    fn initial_value_applies_on_start() {
        let mut provider = SimulatedSpeedProvider::new(7.5);
        assert_eq!(provider.latest().speed_mph, 0.0);
        provider.start().unwrap();
        assert_eq!(provider.latest().speed_mph, 7.5);
    }

    #[test]
    fn metres_per_second_are_converted() {
        let mut provider = SimulatedSpeedProvider::new(0.0);
        provider.start().unwrap();
        provider.feed().push_mps(10.0);
        assert!((provider.latest().speed_mph - 22.3694).abs() < 1e-9);
    }

    #[test]
    fn stop_keeps_last_value_and_drops_new_pushes() {
        let mut provider = SimulatedSpeedProvider::new(0.0);
        let feed = provider.feed();
        provider.start().unwrap();
        feed.push_mph(30.0);

        provider.stop();
        provider.stop();
        assert!(!provider.is_started());
        assert!(!feed.push_mph(45.0));
        assert_eq!(provider.latest().speed_mph, 30.0);
    }

    #[test]
    fn readings_are_clamped_and_deadbanded() {
        let mut provider = SimulatedSpeedProvider::new(0.0);
        let feed = provider.feed();
        provider.start().unwrap();

        feed.push_mph(-4.0);
        assert_eq!(provider.latest(), SpeedSample::zero(SOURCE_NAME));

        feed.push_mph(f64::NAN);
        assert_eq!(provider.latest().raw_mph, 0.0);

        feed.push_mph(0.3);
        let sample = provider.latest();
        assert_eq!(sample.speed_mph, 0.0);
        assert_eq!(sample.raw_mph, 0.3);
    }
}
