//! RFCOMM TTY transport
//!
//! On Linux the peer is bound to a character device beforehand
//! (`rfcomm bind /dev/rfcomm0 <address> 1`). Opening the device performs the
//! RFCOMM connect, so the peer identifier is simply the device path.

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use crate::infrastructure::bluetooth::connection::{Connector, Transport};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceFileConnector;

impl Connector for DeviceFileConnector {
    fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        info!("Opening serial device {}", peer.id);
        let file = OpenOptions::new().write(true).open(&peer.id)?;
        Ok(Box::new(DeviceFileTransport { file: Some(file) }))
    }
}

struct DeviceFileTransport {
    file: Option<File>,
}

impl Transport for DeviceFileTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the descriptor hangs up the RFCOMM channel
        self.file.take();
        Ok(())
    }
}
