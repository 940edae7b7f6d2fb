pub mod udp;
pub mod wire;

use bytes::Bytes;

pub const PROTOCOL_VERSION: u8 = 1;

/// Mouse click flavours carried by both click paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ClickKind {
    Left,
    Right,
    Double,
}

impl ClickKind {
    pub fn as_u8(self) -> u8 {
        match self {
            ClickKind::Left => 0,
            ClickKind::Right => 1,
            ClickKind::Double => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ClickKind::Left),
            1 => Some(ClickKind::Right),
            2 => Some(ClickKind::Double),
            _ => None,
        }
    }
}

/// Error report ordinals. Ordinal 0 is the catch-all: a peer speaking a newer
/// revision may send kinds this build has never heard of, and those must land
/// here instead of failing the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    Unspecified,
    AuthenticationFailure,
    VersionMismatch,
    UnknownRequest,
}

impl ErrorKind {
    pub fn as_u8(self) -> u8 {
        match self {
            ErrorKind::Unspecified => 0,
            ErrorKind::AuthenticationFailure => 1,
            ErrorKind::VersionMismatch => 2,
            ErrorKind::UnknownRequest => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ErrorKind::AuthenticationFailure,
            2 => ErrorKind::VersionMismatch,
            3 => ErrorKind::UnknownRequest,
            _ => ErrorKind::Unspecified,
        }
    }
}

/// The closed set of records exchanged on the command stream. Every variant is
/// self-describing once its kind byte is known.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "packet", rename_all = "snake_case")]
pub enum Packet {
    Challenge {
        nonce: Vec<u8>,
        server_version: String,
    },
    ChallengeResponse {
        digest: Vec<u8>,
    },
    Success,
    Error {
        kind: ErrorKind,
        message: String,
    },
    TileInfoRequest,
    TileInfoReply {
        width: u32,
        height: u32,
        tile_size: u32,
    },
    TileSetRequest {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
    },
    TileUpdate {
        tile_x: u32,
        tile_y: u32,
        image: Bytes,
    },
    Click {
        tile_x: u32,
        tile_y: u32,
        offset_x: u32,
        offset_y: u32,
        kind: ClickKind,
    },
    /// Plain touchpad click: no coordinates, the pointer position lives on
    /// the host.
    MouseClick {
        kind: ClickKind,
    },
    /// Opaque transport command (play, pause, volume, ...). The core does not
    /// interpret the payload.
    Command {
        name: String,
        args: Vec<String>,
    },
    /// Generic non-tile reply surfaced to the event stream.
    Reply {
        payload: String,
    },
    /// Ask a version-incompatible host to fetch a newer build of itself. The
    /// only packet a deprecated connection will carry.
    UpdateRequest,
}

impl Packet {
    /// True for packets the receive loop routes to the tile engine rather
    /// than the generic reply stream.
    pub fn is_tile_push(&self) -> bool {
        matches!(
            self,
            Packet::TileUpdate { .. } | Packet::TileInfoReply { .. }
        )
    }
}
