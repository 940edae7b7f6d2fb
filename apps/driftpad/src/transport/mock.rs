//! In-memory transports for exercising the session and dispatcher without a
//! network. A pair behaves like a connected duplex stream; faults (dead
//! sends, refused dials) are injected by the tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};

use super::{Connector, Transport, TransportError};
use crate::protocol::Packet;

pub struct MockTransport {
    tx: mpsc::UnboundedSender<Packet>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Packet>>,
    connected: AtomicBool,
    closed: Notify,
    sends_left: Mutex<Option<usize>>,
}

impl MockTransport {
    /// Two cross-wired ends of an in-memory stream.
    pub fn pair() -> (Arc<MockTransport>, Arc<MockTransport>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let make = |tx, rx| {
            Arc::new(MockTransport {
                tx,
                rx: AsyncMutex::new(rx),
                connected: AtomicBool::new(true),
                closed: Notify::new(),
                sends_left: Mutex::new(None),
            })
        };
        (make(a_tx, a_rx), make(b_tx, b_rx))
    }

    /// Allow `budget` more successful sends, then fail every send with an
    /// injected transport error.
    pub fn fail_sends_after(&self, budget: usize) {
        *self.sends_left.lock() = Some(budget);
    }

    fn consume_send_budget(&self) -> bool {
        let mut guard = self.sends_left.lock();
        match guard.as_mut() {
            None => true,
            Some(0) => false,
            Some(budget) => {
                *budget -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        if !self.consume_send_budget() {
            return Err(TransportError::Injected("send fault"));
        }
        self.tx
            .send(packet.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Packet, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            received = rx.recv() => received.ok_or(TransportError::Closed),
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

/// Hands out pre-scripted transports and counts dial attempts, which is how
/// the reconnect-retry policy is pinned down in tests.
#[derive(Default)]
pub struct MockConnector {
    dials: AtomicUsize,
    script: Mutex<VecDeque<Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, transport: Arc<MockTransport>) {
        self.script.lock().push_back(transport);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn dial(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self.dials.fetch_add(1, Ordering::AcqRel);
        let next = self.script.lock().pop_front();
        match next {
            Some(transport) => Ok(transport),
            None => Err(TransportError::Injected("dial refused")),
        }
    }
}
