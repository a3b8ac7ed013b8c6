//! Serial Port Profile protocol definitions
//!
//! The receiving device expects one ASCII line per tick:
//!
//! ```text
//! SPEED_MPH:<value>\r\n
//! ```
//!
//! `<value>` carries exactly two decimals. There is no framing, checksum or
//! acknowledgement.

use crate::domain::errors::TransportError;
use std::fmt;

/// Well-known Serial Port Profile service class UUID
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

pub const LINE_PREFIX: &str = "SPEED_MPH:";
pub const LINE_TERMINATOR: &str = "\r\n";

/// Format the wire line for one tick.
pub fn format_speed_line(speed_mph: f64) -> String {
    format!("{}{:.2}{}", LINE_PREFIX, speed_mph, LINE_TERMINATOR)
}

/// A 128-bit service UUID split into GUID-style fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceUuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl fmt::Display for ServiceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1]
        )?;
        for byte in &self.data4[2..] {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(windows)]
impl From<ServiceUuid> for windows::core::GUID {
    fn from(uuid: ServiceUuid) -> Self {
        windows::core::GUID {
            data1: uuid.data1,
            data2: uuid.data2,
            data3: uuid.data3,
            data4: uuid.data4,
        }
    }
}

/// Parse a UUID string such as [`SPP_UUID`]
pub fn parse_uuid(uuid_str: &str) -> Result<ServiceUuid, TransportError> {
    let invalid = || TransportError::InvalidPeerId(uuid_str.to_string());
    let hex = uuid_str.replace('-', "");

    if hex.len() != 32 || !hex.is_ascii() {
        return Err(invalid());
    }

    let data1 = u32::from_str_radix(&hex[0..8], 16).map_err(|_| invalid())?;
    let data2 = u16::from_str_radix(&hex[8..12], 16).map_err(|_| invalid())?;
    let data3 = u16::from_str_radix(&hex[12..16], 16).map_err(|_| invalid())?;

    let mut data4 = [0u8; 8];
    for (i, byte) in data4.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[16 + i * 2..18 + i * 2], 16).map_err(|_| invalid())?;
    }

    Ok(ServiceUuid {
        data1,
        data2,
        data3,
        data4,
    })
}

/// Parse a Bluetooth device address (`00:11:22:AA:BB:CC`, dashes or bare hex)
pub fn parse_bt_address(address: &str) -> Result<u64, TransportError> {
    let hex: String = address
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TransportError::InvalidPeerId(address.to_string()));
    }

    u64::from_str_radix(&hex, 16).map_err(|_| TransportError::InvalidPeerId(address.to_string()))
}

pub fn format_bt_address(address: u64) -> String {
    let bytes = address.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_speed_line() {
        assert_eq!(format_speed_line(5.0), "SPEED_MPH:5.00\r\n");
        assert_eq!(format_speed_line(12.34), "SPEED_MPH:12.34\r\n");
        assert_eq!(format_speed_line(0.0), "SPEED_MPH:0.00\r\n");
        assert_eq!(format_speed_line(101.5), "SPEED_MPH:101.50\r\n");
    }

    #[test]
    fn test_parse_spp_uuid() {
        let uuid = parse_uuid(SPP_UUID).unwrap();
        assert_eq!(uuid.data1, 0x0000_1101);
        assert_eq!(uuid.data2, 0x0000);
        assert_eq!(uuid.data3, 0x1000);
        assert_eq!(uuid.data4, [0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB]);
        assert_eq!(uuid.to_string(), SPP_UUID);
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(parse_uuid("00001101-0000").is_err());
        assert!(parse_uuid("zz001101-0000-1000-8000-00805F9B34FB").is_err());
    }

    #[test]
    fn test_bt_address_round_trip() {
        let address = parse_bt_address("00:1A:7D:DA:71:13").unwrap();
        assert_eq!(address, 0x001A_7DDA_7113);
        assert_eq!(format_bt_address(address), "00:1A:7D:DA:71:13");
        assert_eq!(parse_bt_address("001a7dda7113").unwrap(), address);
    }

    #[test]
    fn test_bt_address_rejects_paths() {
        assert!(parse_bt_address("/dev/rfcomm0").is_err());
    }

    #[test]
    fn test_bt_address_rejects_sign_prefix() {
        // Twelve characters, but `from_str_radix` alone would accept the sign
        assert!(parse_bt_address("+1A7DDA71131").is_err());
        assert!(parse_bt_address("+1:A7:DD:A7:11:31").is_err());
    }
}
