//! Speed sensor backends

pub mod nmea;
pub mod simulated;

pub use nmea::NmeaSpeedProvider;
pub use simulated::{SimulatedSpeedProvider, SpeedFeed};

use crate::domain::settings::SpeedSourceSettings;
use crate::domain::speed::{AuthorizationCheck, SpeedProvider};
use std::sync::Arc;

/// Build the configured backend. The simulated backend also hands back its feed.
pub fn provider_from_settings(
    settings: &SpeedSourceSettings,
    authorization: Arc<dyn AuthorizationCheck>,
) -> (Box<dyn SpeedProvider>, Option<SpeedFeed>) {
    match settings {
        SpeedSourceSettings::Nmea { path } => {
            (Box::new(NmeaSpeedProvider::new(path, authorization)), None)
        }
        SpeedSourceSettings::Simulated { mph } => {
            let provider = SimulatedSpeedProvider::new(*mph);
            let feed = provider.feed();
            (Box::new(provider), Some(feed))
        }
    }
}
