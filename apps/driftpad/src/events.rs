use bytes::Bytes;
use serde::Serialize;

use crate::protocol::Packet;

/// State transitions and generic replies, delivered on the subscription
/// stream handed out when the session channel is built. Tile traffic never
/// appears here; it has its own stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Connecting,
    Connected { session_id: String },
    AuthenticationFailure,
    ConnectionFailure,
    ServerOutOfDate { version: String },
    Reply { packet: Packet },
}

/// Unsolicited pushes routed to the tile grid engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TilePush {
    ScreenInfo {
        width: u32,
        height: u32,
        tile_size: u32,
    },
    Tile {
        tile_x: u32,
        tile_y: u32,
        image: Bytes,
    },
}
