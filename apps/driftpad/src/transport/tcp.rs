use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};

use super::{Connector, Transport, TransportError};
use crate::protocol::Packet;
use crate::protocol::wire::{decode_packet_lossy, encode_packet};

/// Frames larger than this are treated as stream corruption rather than
/// attempted allocations.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Length-prefixed packet framing over one TCP stream: varint byte count,
/// then the encoded packet.
pub struct TcpTransport {
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<OwnedReadHalf>,
    connected: AtomicBool,
    closed: Notify,
}

impl TcpTransport {
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            connected: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    async fn read_frame(&self) -> Result<Packet, TransportError> {
        let mut reader = self.reader.lock().await;
        let len = read_var_u32(&mut *reader).await?;
        if len > MAX_FRAME_BYTES {
            return Err(TransportError::Codec(
                crate::protocol::wire::WireError::InvalidData("frame too large"),
            ));
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await.map_err(map_eof)?;
        Ok(decode_packet_lossy(&payload)?)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let payload = encode_packet(packet);
        let mut frame = Vec::with_capacity(payload.len() + 5);
        write_var_u32(&mut frame, payload.len() as u32);
        frame.extend_from_slice(&payload);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Packet, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            result = self.read_frame() => result,
            _ = self.closed.notified() => Err(TransportError::Closed),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        self.closed.notify_waiters();
    }
}

async fn read_var_u32(reader: &mut OwnedReadHalf) -> Result<u32, TransportError> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await.map_err(map_eof)?;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 32 {
            return Err(TransportError::Codec(
                crate::protocol::wire::WireError::VarIntOverflow,
            ));
        }
    }
}

fn write_var_u32(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn map_eof(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(err)
    }
}

/// Dials a fixed host:port.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn dial(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let stream = TcpStream::connect(&self.addr).await?;
        tracing::debug!(target = "driftpad::transport", addr = %self.addr, "dialed host");
        Ok(Arc::new(TcpTransport::from_stream(stream)))
    }
}
