//! Native RFCOMM transport (Windows)
//!
//! Resolves the peer's Serial Port Profile service through WinRT and connects a
//! `StreamSocket` to it. Connectors run on a blocking worker, so the WinRT
//! async operations are driven to completion with `get()`.

use crate::domain::errors::TransportError;
use crate::domain::models::PeerDescriptor;
use crate::infrastructure::bluetooth::connection::{Connector, Transport};
use crate::infrastructure::bluetooth::directory::PeerDirectory;
use crate::infrastructure::bluetooth::protocol::{self, ServiceUuid};
use tracing::{info, warn};
use windows::Devices::Bluetooth::Rfcomm::RfcommServiceId;
use windows::Devices::Bluetooth::BluetoothDevice;
use windows::Devices::Enumeration::DeviceInformation;
use windows::Networking::Sockets::StreamSocket;
use windows::Storage::Streams::{DataWriter, IOutputStream};

pub struct RfcommConnector {
    service_uuid: ServiceUuid,
}

impl RfcommConnector {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            service_uuid: protocol::parse_uuid(protocol::SPP_UUID)?,
        })
    }
}

impl Connector for RfcommConnector {
    fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        let address = protocol::parse_bt_address(&peer.id)?;
        info!("Connecting RFCOMM to {:#X}", address);

        let device = BluetoothDevice::FromBluetoothAddressAsync(address)?.get()?;
        let service_id = RfcommServiceId::FromUuid(self.service_uuid.into())?;
        let services = device
            .GetRfcommServicesForIdAsync(&service_id)?
            .get()?
            .Services()?;

        if services.Size()? == 0 {
            let _ = device.Close();
            return Err(TransportError::ServiceNotFound(self.service_uuid.to_string()));
        }
        let service = services.GetAt(0)?;

        let socket = StreamSocket::new()?;
        let connected = socket
            .ConnectAsync(
                &service.ConnectionHostName()?,
                &service.ConnectionServiceName()?,
            )
            .and_then(|action| action.get());
        if let Err(e) = connected {
            let _ = socket.Close();
            let _ = device.Close();
            return Err(e.into());
        }

        let output = socket.OutputStream()?;
        Ok(Box::new(RfcommTransport {
            device: Some(device),
            socket: Some(socket),
            output: Some(output),
        }))
    }
}

struct RfcommTransport {
    device: Option<BluetoothDevice>,
    socket: Option<StreamSocket>,
    output: Option<IOutputStream>,
}

impl Transport for RfcommTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let output = self.output.as_ref().ok_or_else(|| {
            TransportError::Io(std::io::Error::from(std::io::ErrorKind::NotConnected))
        })?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(bytes)?;
        let buffer = writer.DetachBuffer()?;
        output.WriteAsync(&buffer)?.get()?;
        output.FlushAsync()?.get()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.output.take();
        let socket = self.socket.take().map(|s| s.Close());
        let device = self.device.take().map(|d| d.Close());
        socket.transpose()?;
        device.transpose()?;
        Ok(())
    }
}

/// Paired Bluetooth devices known to Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairedDeviceDirectory;

impl PeerDirectory for PairedDeviceDirectory {
    fn list_paired(&self) -> Result<Vec<PeerDescriptor>, TransportError> {
        let selector = BluetoothDevice::GetDeviceSelectorFromPairingState(true)?;
        let infos = DeviceInformation::FindAllAsyncAqsFilter(&selector)?.get()?;

        let mut peers = Vec::new();
        for i in 0..infos.Size()? {
            let info = infos.GetAt(i)?;
            let device = match BluetoothDevice::FromIdAsync(&info.Id()?)?.get() {
                Ok(device) => device,
                Err(e) => {
                    warn!("Skipping paired device {}: {}", info.Name()?, e);
                    continue;
                }
            };
            peers.push(PeerDescriptor::new(
                protocol::format_bt_address(device.BluetoothAddress()?),
                info.Name()?.to_string(),
            ));
            let _ = device.Close();
        }
        Ok(peers)
    }
}
