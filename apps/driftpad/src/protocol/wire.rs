use bytes::Bytes;

use super::{ClickKind, ErrorKind, PROTOCOL_VERSION, Packet};

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const KIND_MASK: u8 = 0b0001_1111;

const KIND_CHALLENGE: u8 = 0;
const KIND_CHALLENGE_RESPONSE: u8 = 1;
const KIND_SUCCESS: u8 = 2;
const KIND_ERROR: u8 = 3;
const KIND_TILE_INFO_REQUEST: u8 = 4;
const KIND_TILE_INFO_REPLY: u8 = 5;
const KIND_TILE_SET_REQUEST: u8 = 6;
const KIND_TILE_UPDATE: u8 = 7;
const KIND_CLICK: u8 = 8;
const KIND_MOUSE_CLICK: u8 = 9;
const KIND_COMMAND: u8 = 10;
const KIND_REPLY: u8 = 11;
const KIND_UPDATE_REQUEST: u8 = 12;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unknown packet kind: {0}")]
    UnknownPacketKind(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    match packet {
        Packet::Challenge {
            nonce,
            server_version,
        } => {
            write_header(&mut buf, KIND_CHALLENGE);
            write_bytes(&mut buf, nonce);
            write_str(&mut buf, server_version);
        }
        Packet::ChallengeResponse { digest } => {
            write_header(&mut buf, KIND_CHALLENGE_RESPONSE);
            write_bytes(&mut buf, digest);
        }
        Packet::Success => {
            write_header(&mut buf, KIND_SUCCESS);
        }
        Packet::Error { kind, message } => {
            write_header(&mut buf, KIND_ERROR);
            buf.push(kind.as_u8());
            write_str(&mut buf, message);
        }
        Packet::TileInfoRequest => {
            write_header(&mut buf, KIND_TILE_INFO_REQUEST);
        }
        Packet::TileInfoReply {
            width,
            height,
            tile_size,
        } => {
            write_header(&mut buf, KIND_TILE_INFO_REPLY);
            write_var_u32(&mut buf, *width);
            write_var_u32(&mut buf, *height);
            write_var_u32(&mut buf, *tile_size);
        }
        Packet::TileSetRequest { x1, y1, x2, y2 } => {
            write_header(&mut buf, KIND_TILE_SET_REQUEST);
            write_var_u32(&mut buf, *x1);
            write_var_u32(&mut buf, *y1);
            write_var_u32(&mut buf, *x2);
            write_var_u32(&mut buf, *y2);
        }
        Packet::TileUpdate {
            tile_x,
            tile_y,
            image,
        } => {
            write_header(&mut buf, KIND_TILE_UPDATE);
            write_var_u32(&mut buf, *tile_x);
            write_var_u32(&mut buf, *tile_y);
            write_bytes(&mut buf, image);
        }
        Packet::Click {
            tile_x,
            tile_y,
            offset_x,
            offset_y,
            kind,
        } => {
            write_header(&mut buf, KIND_CLICK);
            write_var_u32(&mut buf, *tile_x);
            write_var_u32(&mut buf, *tile_y);
            write_var_u32(&mut buf, *offset_x);
            write_var_u32(&mut buf, *offset_y);
            buf.push(kind.as_u8());
        }
        Packet::MouseClick { kind } => {
            write_header(&mut buf, KIND_MOUSE_CLICK);
            buf.push(kind.as_u8());
        }
        Packet::Command { name, args } => {
            write_header(&mut buf, KIND_COMMAND);
            write_str(&mut buf, name);
            write_var_u32(&mut buf, args.len() as u32);
            for arg in args {
                write_str(&mut buf, arg);
            }
        }
        Packet::Reply { payload } => {
            write_header(&mut buf, KIND_REPLY);
            write_str(&mut buf, payload);
        }
        Packet::UpdateRequest => {
            write_header(&mut buf, KIND_UPDATE_REQUEST);
        }
    }
    buf
}

pub fn decode_packet(bytes: &[u8]) -> Result<Packet, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    match kind {
        KIND_CHALLENGE => {
            let nonce = cursor.read_len_prefixed()?.to_vec();
            let server_version = cursor.read_string()?;
            Ok(Packet::Challenge {
                nonce,
                server_version,
            })
        }
        KIND_CHALLENGE_RESPONSE => {
            let digest = cursor.read_len_prefixed()?.to_vec();
            Ok(Packet::ChallengeResponse { digest })
        }
        KIND_SUCCESS => Ok(Packet::Success),
        KIND_ERROR => {
            let kind = ErrorKind::from_u8(cursor.read_u8()?);
            let message = cursor.read_string()?;
            Ok(Packet::Error { kind, message })
        }
        KIND_TILE_INFO_REQUEST => Ok(Packet::TileInfoRequest),
        KIND_TILE_INFO_REPLY => {
            let width = cursor.read_var_u32()?;
            let height = cursor.read_var_u32()?;
            let tile_size = cursor.read_var_u32()?;
            if tile_size == 0 {
                return Err(WireError::InvalidData("zero tile size"));
            }
            Ok(Packet::TileInfoReply {
                width,
                height,
                tile_size,
            })
        }
        KIND_TILE_SET_REQUEST => {
            let x1 = cursor.read_var_u32()?;
            let y1 = cursor.read_var_u32()?;
            let x2 = cursor.read_var_u32()?;
            let y2 = cursor.read_var_u32()?;
            Ok(Packet::TileSetRequest { x1, y1, x2, y2 })
        }
        KIND_TILE_UPDATE => {
            let tile_x = cursor.read_var_u32()?;
            let tile_y = cursor.read_var_u32()?;
            let image = Bytes::copy_from_slice(cursor.read_len_prefixed()?);
            Ok(Packet::TileUpdate {
                tile_x,
                tile_y,
                image,
            })
        }
        KIND_CLICK => {
            let tile_x = cursor.read_var_u32()?;
            let tile_y = cursor.read_var_u32()?;
            let offset_x = cursor.read_var_u32()?;
            let offset_y = cursor.read_var_u32()?;
            let kind = ClickKind::from_u8(cursor.read_u8()?)
                .ok_or(WireError::InvalidData("unknown click kind"))?;
            Ok(Packet::Click {
                tile_x,
                tile_y,
                offset_x,
                offset_y,
                kind,
            })
        }
        KIND_MOUSE_CLICK => {
            let kind = ClickKind::from_u8(cursor.read_u8()?)
                .ok_or(WireError::InvalidData("unknown click kind"))?;
            Ok(Packet::MouseClick { kind })
        }
        KIND_COMMAND => {
            let name = cursor.read_string()?;
            let count = cursor.read_var_u32()? as usize;
            let mut args = Vec::with_capacity(count);
            for _ in 0..count {
                args.push(cursor.read_string()?);
            }
            Ok(Packet::Command { name, args })
        }
        KIND_REPLY => {
            let payload = cursor.read_string()?;
            Ok(Packet::Reply { payload })
        }
        KIND_UPDATE_REQUEST => Ok(Packet::UpdateRequest),
        other => Err(WireError::UnknownPacketKind(other)),
    }
}

/// Decode for the receive path: an unknown kind byte degrades to an
/// `Unspecified` error report instead of failing, so version skew on the peer
/// never tears the channel down. Structural damage (truncation, bad varints)
/// still surfaces as an error.
pub fn decode_packet_lossy(bytes: &[u8]) -> Result<Packet, WireError> {
    match decode_packet(bytes) {
        Err(WireError::UnknownPacketKind(kind)) => Ok(Packet::Error {
            kind: ErrorKind::Unspecified,
            message: format!("unrecognised packet kind {kind}"),
        }),
        other => other,
    }
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & KIND_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::InvalidVersion(version));
    }
    Ok(byte & KIND_MASK)
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn write_str(buf: &mut Vec<u8>, value: &str) {
    write_bytes(buf, value.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_var_u32()? as usize;
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let raw = self.read_len_prefixed()?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidData("invalid utf-8"))
    }
}
