//! Local socket transport
//!
//! Connects to a receiver simulator listening on a local socket (a Unix
//! domain socket path, or a named pipe on Windows). Useful on the bench when no
//! Bluetooth peer is around.

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use crate::infrastructure::bluetooth::connection::{Connector, Transport};
use interprocess::local_socket::{
    traits::Stream as _, GenericFilePath, Stream as LocalStream, ToFsName,
};
use std::io::{self, Write};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSocketConnector;

impl Connector for LocalSocketConnector {
    fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        let name = peer
            .id
            .as_str()
            .to_fs_name::<GenericFilePath>()
            .map_err(|_| TransportError::InvalidPeerId(peer.id.clone()))?;
        let stream = LocalStream::connect(name)?;
        info!("Connected to local socket {}", peer.id);
        Ok(Box::new(LocalSocketTransport {
            stream: Some(stream),
        }))
    }
}

struct LocalSocketTransport {
    stream: Option<LocalStream>,
}

impl Transport for LocalSocketTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stream.take();
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use interprocess::local_socket::{traits::ListenerExt, ListenerOptions};
    use std::io::{BufRead, BufReader};

    #[test]
    fn line_reaches_the_listener() {
        let path = std::env::temp_dir().join(format!("spp_relay_{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let name = path.as_path().to_fs_name::<GenericFilePath>().unwrap();
        let listener = ListenerOptions::new().name(name).create_sync().unwrap();

        let peer = PeerDescriptor::new(path.to_string_lossy(), "simulator");
        let mut transport = LocalSocketConnector.connect(&peer).unwrap();

        let accepted = listener.incoming().next().unwrap().unwrap();
        transport.write_all(b"SPEED_MPH:12.34\r\n").unwrap();
        transport.close().unwrap();

        let mut line = String::new();
        BufReader::new(accepted).read_line(&mut line).unwrap();
        assert_eq!(line, "SPEED_MPH:12.34\r\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn nobody_listening_fails_to_connect() {
        let path = std::env::temp_dir().join(format!("spp_relay_absent_{}.sock", std::process::id()));
        let peer = PeerDescriptor::new(path.to_string_lossy(), "");
        assert!(LocalSocketConnector.connect(&peer).is_err());
    }
}
