//! Relays a vehicle's speed over a Bluetooth Serial Port Profile link as a
//! 10 Hz ASCII telemetry stream.

pub mod domain;
pub mod infrastructure;
pub mod presentation;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;
