use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Kind of endpoint an address points at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum AddressType {
    /// Framed RPC over TCP (broker, participant services).
    TCP = 0,
    /// Tag-matching worker used by the RMA transport.
    RMA = 1,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::TCP => write!(f, "TCP"),
            AddressType::RMA => write!(f, "RMA"),
        }
    }
}

/// Size of the packed binary form, see [`Address::to_bytes`].
pub const ADDRESS_BYTES: usize = 8;

/// IPv4 address, port, and endpoint kind.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// IPv4 address in network byte order (big-endian).
    pub ip: u32,
    pub port: u16,
    pub addr_type: AddressType,
}

impl Address {
    pub fn new(ip: u32, port: u16, addr_type: AddressType) -> Self {
        Self {
            ip,
            port,
            addr_type,
        }
    }

    pub fn from_octets(a: u8, b: u8, c: u8, d: u8, port: u16, addr_type: AddressType) -> Self {
        Self::new(u32::from_be_bytes([a, b, c, d]), port, addr_type)
    }

    pub fn octets(&self) -> [u8; 4] {
        self.ip.to_be_bytes()
    }

    /// Pack into a u64. Layout: `[ip:32][port:16][addr_type:16]`.
    pub fn to_u64(&self) -> u64 {
        let ty: u16 = self.addr_type.into();
        ((self.ip as u64) << 32) | ((self.port as u64) << 16) | (ty as u64)
    }

    pub fn from_u64(val: u64) -> Option<Self> {
        let ip = (val >> 32) as u32;
        let port = ((val >> 16) & 0xFFFF) as u16;
        let addr_type = AddressType::try_from((val & 0xFFFF) as u16).ok()?;
        Some(Self {
            ip,
            port,
            addr_type,
        })
    }

    /// Opaque little-endian form handed to peers as a worker address.
    pub fn to_bytes(&self) -> [u8; ADDRESS_BYTES] {
        self.to_u64().to_le_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let raw: [u8; ADDRESS_BYTES] = data.try_into().ok()?;
        Self::from_u64(u64::from_le_bytes(raw))
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(self.ip), self.port))
    }

    /// Convert a [`SocketAddr`]. IPv6 is only accepted in its IPv4-mapped form.
    pub fn from_socket_addr(sa: SocketAddr, addr_type: AddressType) -> Option<Self> {
        let ip = match sa {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped()?,
        };
        Some(Self::new(u32::from(ip), sa.port(), addr_type))
    }

    pub fn with_type(mut self, addr_type: AddressType) -> Self {
        self.addr_type = addr_type;
        self
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{}://{}.{}.{}.{}:{}", self.addr_type, a, b, c, d, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parse `"TCP://192.168.1.1:8080"`. A bare `"192.168.1.1:8080"` is TCP.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr_type, rest) = match s.split_once("://") {
            Some(("TCP", rest)) => (AddressType::TCP, rest),
            Some(("RMA", rest)) => (AddressType::RMA, rest),
            Some((other, _)) => return Err(AddressParseError::UnknownType(other.to_string())),
            None => (AddressType::TCP, s),
        };

        let (ip_str, port_str) = rest.rsplit_once(':').ok_or(AddressParseError::MissingPort)?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| AddressParseError::InvalidPort)?;
        let ip: Ipv4Addr = ip_str.parse().map_err(|_| AddressParseError::InvalidIp)?;

        Ok(Address::new(u32::from(ip), port, addr_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("unknown address type: {0}")]
    UnknownType(String),
    #[error("missing port")]
    MissingPort,
    #[error("invalid port number")]
    InvalidPort,
    #[error("invalid IP address")]
    InvalidIp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = Address::from_octets(192, 168, 1, 100, 8080, AddressType::TCP);
        assert_eq!(format!("{}", addr), "TCP://192.168.1.100:8080");
    }

    #[test]
    fn test_address_parse() {
        let addr: Address = "RMA://10.0.0.1:9999".parse().unwrap();
        assert_eq!(addr.addr_type, AddressType::RMA);
        assert_eq!(addr.octets(), [10, 0, 0, 1]);
        assert_eq!(addr.port, 9999);

        let bare: Address = "127.0.0.1:7000".parse().unwrap();
        assert_eq!(bare.addr_type, AddressType::TCP);
        assert_eq!(bare.port, 7000);
    }

    #[test]
    fn test_address_parse_errors() {
        assert!("UNKNOWN://1.2.3.4:80".parse::<Address>().is_err());
        assert!("TCP://1.2.3.4".parse::<Address>().is_err());
        assert!("TCP://1.2.3:80".parse::<Address>().is_err());
        assert!("TCP://1.2.3.4:99999".parse::<Address>().is_err());
    }

    #[test]
    fn test_worker_address_bytes() {
        let addr = Address::from_octets(10, 20, 30, 40, 5000, AddressType::RMA);
        let bytes = addr.to_bytes();
        assert_eq!(Address::from_bytes(&bytes), Some(addr));
        assert_eq!(Address::from_bytes(&bytes[..7]), None);
    }

    #[test]
    fn test_socket_addr_conversion() {
        let addr = Address::from_octets(127, 0, 0, 1, 4321, AddressType::TCP);
        let sa = addr.to_socket_addr();
        assert_eq!(sa.to_string(), "127.0.0.1:4321");
        assert_eq!(Address::from_socket_addr(sa, AddressType::TCP), Some(addr));

        let mapped: SocketAddr = "[::ffff:10.0.0.1]:8080".parse().unwrap();
        let back = Address::from_socket_addr(mapped, AddressType::RMA).unwrap();
        assert_eq!(back.octets(), [10, 0, 0, 1]);

        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert!(Address::from_socket_addr(v6, AddressType::TCP).is_none());
    }
}
