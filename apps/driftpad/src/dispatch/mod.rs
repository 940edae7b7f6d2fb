//! Single-writer outbound queue. Callers enqueue and move on; one worker
//! task drains strictly in order and owns every interaction with the wire,
//! so no two packets ever interleave.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::Packet;
use crate::session::{SessionChannel, SessionError};
use crate::tiles::TileRequestSink;

pub struct CommandDispatcher {
    tx: mpsc::UnboundedSender<Packet>,
}

impl CommandDispatcher {
    /// Start the worker. The credential is held so the worker can establish
    /// a connection on demand for whatever it dequeues.
    pub fn spawn(session: Arc<SessionChannel>, credential: impl Into<String>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let credential = credential.into();
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                transmit(&session, &credential, packet).await;
            }
        });
        Self { tx }
    }

    /// Queue a packet for transmission. Never blocks and never fails; the
    /// queue is unbounded and the worker outlives every sender.
    pub fn enqueue(&self, packet: Packet) {
        let _ = self.tx.send(packet);
    }
}

/// At-most-two-attempts delivery: establish a connection if none exists, and
/// on an I/O send failure tear down and retry exactly once. A second failure
/// surfaces `ConnectionFailure` and the packet is dropped — this is not
/// at-least-once delivery.
async fn transmit(session: &Arc<SessionChannel>, credential: &str, packet: Packet) {
    for attempt in 0..2u8 {
        if !session.is_connected() {
            match session.connect(credential).await {
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    if attempt == 0 {
                        continue;
                    }
                    break;
                }
                Err(err) => {
                    // Authentication or version trouble: the session channel
                    // has already told the subscriber; retrying with the same
                    // credential cannot help.
                    tracing::warn!(
                        target = "driftpad::dispatch",
                        error = %err,
                        "dropping packet, connection cannot be established"
                    );
                    return;
                }
            }
        }
        match session.send(&packet).await {
            Ok(()) => return,
            Err(SessionError::Transport(err)) => {
                tracing::debug!(
                    target = "driftpad::dispatch",
                    attempt,
                    error = %err,
                    "send failed, tearing down transport"
                );
                session.disconnect().await;
            }
            Err(SessionError::NotConnected) => {
                // Receiver noticed the loss first; treat like a send failure.
            }
            Err(err) => {
                tracing::warn!(
                    target = "driftpad::dispatch",
                    error = %err,
                    "dropping packet rejected by session"
                );
                return;
            }
        }
    }
    session.notify_connection_failure();
    tracing::warn!(
        target = "driftpad::dispatch",
        "dropping packet after exhausted retry"
    );
}

impl TileRequestSink for CommandDispatcher {
    fn request_tiles(&self, x1: u32, y1: u32, x2: u32, y2: u32) {
        self.enqueue(Packet::TileSetRequest { x1, y1, x2, y2 });
    }
}
