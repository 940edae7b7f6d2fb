//! Companion UDP datagrams. The command stream stays on TCP; these two fixed
//! layouts serve the discovery broadcast and the low-latency trackpad path.
//! Only the codec lives here, the sockets belong to the platform glue.

use crate::protocol::wire::WireError;

pub const DATAGRAM_SERVICE_DISCOVERY: u8 = 1;
pub const DATAGRAM_MOUSE_MOVE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datagram {
    /// Broadcast advertising the command port a host listens on.
    ServiceDiscovery { port: u32 },
    /// Relative pointer motion, fire-and-forget.
    MouseMove { dx: i16, dy: i16 },
}

pub fn encode_datagram(datagram: Datagram) -> Vec<u8> {
    match datagram {
        Datagram::ServiceDiscovery { port } => {
            let mut buf = Vec::with_capacity(5);
            buf.push(DATAGRAM_SERVICE_DISCOVERY);
            buf.extend_from_slice(&port.to_le_bytes());
            buf
        }
        Datagram::MouseMove { dx, dy } => {
            let mut buf = Vec::with_capacity(5);
            buf.push(DATAGRAM_MOUSE_MOVE);
            buf.extend_from_slice(&dx.to_le_bytes());
            buf.extend_from_slice(&dy.to_le_bytes());
            buf
        }
    }
}

pub fn decode_datagram(bytes: &[u8]) -> Result<Datagram, WireError> {
    let (&discriminant, rest) = bytes.split_first().ok_or(WireError::UnexpectedEof)?;
    match discriminant {
        DATAGRAM_SERVICE_DISCOVERY => {
            let raw: [u8; 4] = rest
                .try_into()
                .map_err(|_| WireError::InvalidData("discovery datagram must carry 4 bytes"))?;
            Ok(Datagram::ServiceDiscovery {
                port: u32::from_le_bytes(raw),
            })
        }
        DATAGRAM_MOUSE_MOVE => {
            if rest.len() != 4 {
                return Err(WireError::InvalidData("mouse move datagram must carry 4 bytes"));
            }
            let dx = i16::from_le_bytes([rest[0], rest[1]]);
            let dy = i16::from_le_bytes([rest[2], rest[3]]);
            Ok(Datagram::MouseMove { dx, dy })
        }
        other => Err(WireError::UnknownPacketKind(other)),
    }
}
