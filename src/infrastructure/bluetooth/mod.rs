//! Bluetooth Serial Link Module
//!
//! Carries the telemetry stream to the selected peer over a Serial Port
//! Profile (RFCOMM) channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LinkManager                        │
//! │   (Closed / Opening / Open state machine, sole owner    │
//! │    of the LinkHandle)                                   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ Connector::connect (worker)
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌─────────────┐ ┌────────────┐ ┌──────────────┐
//! │ DeviceFile  │ │ LocalSocket│ │ Rfcomm       │
//! │ /dev/rfcommN│ │ simulator  │ │ WinRT socket │
//! └─────────────┘ └────────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - SPP service UUID, wire line format, address parsing
//! - [`connection`] - `Transport`/`Connector` seam and the `LinkHandle` writer thread
//! - [`manager`] - the connection state machine
//! - [`directory`] - paired peer enumeration for the picker
//! - [`device_file`], [`local_socket`], `rfcomm` - transports

pub mod connection;
pub mod device_file;
pub mod directory;
pub mod local_socket;
pub mod manager;
pub mod protocol;
#[cfg(windows)]
pub mod rfcomm;

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use crate::domain::settings::TransportKind;
use connection::Connector;
use directory::{CombinedDirectory, ConfiguredPeers, PeerDirectory, RfcommDeviceDirectory};
use std::sync::Arc;

// Re-export main manager for convenience
pub use manager::LinkManager;

/// Build the connector for the configured transport.
pub fn connector_for(kind: TransportKind) -> Result<Arc<dyn Connector>, TransportError> {
    match kind {
        TransportKind::DeviceFile => Ok(Arc::new(device_file::DeviceFileConnector)),
        TransportKind::LocalSocket => Ok(Arc::new(local_socket::LocalSocketConnector)),
        #[cfg(windows)]
        TransportKind::Rfcomm => Ok(Arc::new(rfcomm::RfcommConnector::new()?)),
        #[cfg(not(windows))]
        TransportKind::Rfcomm => Err(TransportError::Unsupported(
            "Windows; bind the peer with `rfcomm bind` and use the device_file transport",
        )),
    }
}

/// Peer sources matching the configured transport, configured peers first.
pub fn directory_for(kind: TransportKind, known_peers: Vec<PeerDescriptor>) -> impl PeerDirectory {
    let combined = CombinedDirectory::new().with(ConfiguredPeers::new(known_peers));
    match kind {
        TransportKind::DeviceFile => combined.with(RfcommDeviceDirectory::new()),
        #[cfg(windows)]
        TransportKind::Rfcomm => combined.with(rfcomm::PairedDeviceDirectory),
        _ => combined,
    }
}
