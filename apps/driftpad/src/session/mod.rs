pub mod auth;
pub mod error;

pub use auth::{AuthenticationHandler, HmacAuthenticator};
pub use error::SessionError;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::events::{ClientEvent, TilePush};
use crate::protocol::{ErrorKind, Packet};
use crate::transport::{Connector, Transport, TransportError};

/// How long to wait for a legacy host's trailing version-mismatch report
/// after it has already said `Success`.
const LEGACY_DRAIN_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Reachable but protocol-incompatible; the connection is held open only
    /// so an update can be requested.
    ConnectedButDeprecated,
}

/// The negotiated handshake nonce, hex-encoded. Side channels (the byte-range
/// file server among them) echo this to prove they belong to a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    fn from_nonce(nonce: &[u8]) -> Self {
        Self(hex::encode(nonce))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Knobs the session channel needs from configuration. Injectable so tests
/// can pin the retry count.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub connect_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_timeout: Duration::from_secs(4),
        }
    }
}

/// Receiving ends of the two delivery streams.
pub struct SessionStreams {
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub tiles: mpsc::UnboundedReceiver<TilePush>,
}

struct Live {
    transport: Arc<dyn Transport>,
    session_id: SessionId,
    server_version: String,
    deprecated: bool,
    recv_task: Option<JoinHandle<()>>,
}

enum Handshake {
    Ready {
        transport: Arc<dyn Transport>,
        session_id: SessionId,
        server_version: String,
    },
    Deprecated {
        transport: Option<Arc<dyn Transport>>,
        session_id: SessionId,
        server_version: String,
        supports_update: bool,
    },
}

/// Owns the socket for the lifetime of one connect/disconnect cycle, runs the
/// handshake, and fans decoded traffic out to the tile and event streams. At
/// most one live transport exists at a time; connecting again tears the
/// previous one down first.
pub struct SessionChannel {
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthenticationHandler>,
    tuning: SessionTuning,
    events: mpsc::UnboundedSender<ClientEvent>,
    tiles: mpsc::UnboundedSender<TilePush>,
    state_tx: watch::Sender<ConnectionState>,
    live: AsyncMutex<Option<Live>>,
}

impl SessionChannel {
    pub fn new(
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthenticationHandler>,
        tuning: SessionTuning,
    ) -> (Arc<Self>, SessionStreams) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (tile_tx, tile_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let channel = Arc::new(Self {
            connector,
            auth,
            tuning,
            events: event_tx,
            tiles: tile_tx,
            state_tx,
            live: AsyncMutex::new(None),
        });
        (
            channel,
            SessionStreams {
                events: event_rx,
                tiles: tile_rx,
            },
        )
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            ConnectionState::Connected | ConnectionState::ConnectedButDeprecated
        )
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.live
            .lock()
            .await
            .as_ref()
            .map(|live| live.session_id.clone())
    }

    /// Establish a session: dial, answer the challenge, check the host
    /// revision. Transport failures are retried up to the tuned attempt count
    /// with a per-attempt deadline; authentication and version failures are
    /// terminal for this call.
    pub async fn connect(self: &Arc<Self>, password: &str) -> Result<SessionId, SessionError> {
        let mut live = self.live.lock().await;
        teardown(&mut live);
        self.set_state(ConnectionState::Connecting);
        self.emit(ClientEvent::Connecting);

        let mut last_err = SessionError::Transport(TransportError::Timeout);
        for attempt in 1..=self.tuning.connect_attempts.max(1) {
            let outcome = match timeout(self.tuning.connect_timeout, self.handshake(password)).await
            {
                Ok(result) => result,
                Err(_) => Err(SessionError::Transport(TransportError::Timeout)),
            };
            match outcome {
                Ok(Handshake::Ready {
                    transport,
                    session_id,
                    server_version,
                }) => {
                    let recv_task = self.spawn_receiver(Arc::clone(&transport));
                    *live = Some(Live {
                        transport,
                        session_id: session_id.clone(),
                        server_version,
                        deprecated: false,
                        recv_task: Some(recv_task),
                    });
                    self.set_state(ConnectionState::Connected);
                    self.emit(ClientEvent::Connected {
                        session_id: session_id.as_str().to_string(),
                    });
                    tracing::info!(
                        target = "driftpad::session",
                        session_id = %session_id,
                        attempt,
                        "session established"
                    );
                    return Ok(session_id);
                }
                Ok(Handshake::Deprecated {
                    transport,
                    session_id,
                    server_version,
                    supports_update,
                }) => {
                    if let Some(transport) = transport {
                        let recv_task = self.spawn_receiver(Arc::clone(&transport));
                        *live = Some(Live {
                            transport,
                            session_id,
                            server_version: server_version.clone(),
                            deprecated: true,
                            recv_task: Some(recv_task),
                        });
                        self.set_state(ConnectionState::ConnectedButDeprecated);
                    } else {
                        self.set_state(ConnectionState::Disconnected);
                    }
                    self.emit(ClientEvent::ServerOutOfDate {
                        version: server_version.clone(),
                    });
                    tracing::warn!(
                        target = "driftpad::session",
                        version = %server_version,
                        supports_update,
                        "host protocol revision unsupported"
                    );
                    return Err(SessionError::ServerOutOfDate {
                        version: server_version,
                        supports_update,
                    });
                }
                Err(err) if err.is_retryable() => {
                    tracing::debug!(
                        target = "driftpad::session",
                        attempt,
                        error = %err,
                        "handshake attempt failed"
                    );
                    last_err = err;
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    if matches!(err, SessionError::AuthenticationFailed) {
                        self.emit(ClientEvent::AuthenticationFailure);
                    }
                    return Err(err);
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
        Err(last_err)
    }

    async fn handshake(&self, password: &str) -> Result<Handshake, SessionError> {
        let transport = self.connector.dial().await?;
        self.set_state(ConnectionState::Authenticating);

        let (nonce, server_version) = match transport.recv().await? {
            Packet::Challenge {
                nonce,
                server_version,
            } => (nonce, server_version),
            other => {
                transport.shutdown();
                return Err(SessionError::Protocol(format!(
                    "expected challenge, got {other:?}"
                )));
            }
        };

        let digest = self.auth.respond_to_challenge(password, &nonce);
        transport.send(&Packet::ChallengeResponse { digest }).await?;

        match transport.recv().await? {
            Packet::Success => {}
            Packet::Error {
                kind: ErrorKind::AuthenticationFailure,
                ..
            } => {
                transport.shutdown();
                return Err(SessionError::AuthenticationFailed);
            }
            Packet::Error {
                kind: ErrorKind::VersionMismatch,
                ..
            } => {
                // Very old hosts refuse before ever saying Success.
                transport.shutdown();
                return Ok(Handshake::Deprecated {
                    transport: None,
                    session_id: SessionId::from_nonce(&nonce),
                    server_version,
                    supports_update: false,
                });
            }
            other => {
                transport.shutdown();
                return Err(SessionError::Protocol(format!(
                    "expected handshake verdict, got {other:?}"
                )));
            }
        }

        let session_id = SessionId::from_nonce(&nonce);
        if !self.auth.is_version_compatible(&server_version) {
            // Legacy hosts emit their own mismatch report after Success, so a
            // second message may need draining before we can classify them.
            let legacy = matches!(
                timeout(LEGACY_DRAIN_WINDOW, transport.recv()).await,
                Ok(Ok(Packet::Error {
                    kind: ErrorKind::VersionMismatch,
                    ..
                }))
            );
            if legacy {
                transport.shutdown();
                return Ok(Handshake::Deprecated {
                    transport: None,
                    session_id,
                    server_version,
                    supports_update: false,
                });
            }
            return Ok(Handshake::Deprecated {
                transport: Some(transport),
                session_id,
                server_version,
                supports_update: true,
            });
        }

        Ok(Handshake::Ready {
            transport,
            session_id,
            server_version,
        })
    }

    /// Transmit one packet on the live transport. A deprecated connection
    /// only admits [`Packet::UpdateRequest`].
    pub async fn send(&self, packet: &Packet) -> Result<(), SessionError> {
        let live = self.live.lock().await;
        let live = live.as_ref().ok_or(SessionError::NotConnected)?;
        if live.deprecated && !matches!(packet, Packet::UpdateRequest) {
            return Err(SessionError::ServerOutOfDate {
                version: live.server_version.clone(),
                supports_update: true,
            });
        }
        live.transport.send(packet).await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut live = self.live.lock().await;
        teardown(&mut live);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Emitted by the dispatcher when its retry budget is exhausted.
    pub fn notify_connection_failure(&self) {
        self.emit(ClientEvent::ConnectionFailure);
    }

    fn spawn_receiver(self: &Arc<Self>, transport: Arc<dyn Transport>) -> JoinHandle<()> {
        let events = self.events.clone();
        let tiles = self.tiles.clone();
        let state_tx = self.state_tx.clone();
        tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(Packet::TileUpdate {
                        tile_x,
                        tile_y,
                        image,
                    }) => {
                        let _ = tiles.send(TilePush::Tile {
                            tile_x,
                            tile_y,
                            image,
                        });
                    }
                    Ok(Packet::TileInfoReply {
                        width,
                        height,
                        tile_size,
                    }) => {
                        let _ = tiles.send(TilePush::ScreenInfo {
                            width,
                            height,
                            tile_size,
                        });
                    }
                    Ok(packet) => {
                        let _ = events.send(ClientEvent::Reply { packet });
                    }
                    Err(err) => {
                        tracing::debug!(
                            target = "driftpad::session",
                            error = %err,
                            "receiver loop ended"
                        );
                        state_tx.send_replace(ConnectionState::Disconnected);
                        break;
                    }
                }
            }
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ClientEvent) {
        // The subscriber may be gone during shutdown; nothing to do then.
        let _ = self.events.send(event);
    }
}

fn teardown(live: &mut Option<Live>) {
    if let Some(mut previous) = live.take() {
        previous.transport.shutdown();
        if let Some(task) = previous.recv_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use crate::transport::mock::{MockConnector, MockTransport};

    fn seeded_host(
        host: &Arc<MockTransport>,
        auth: &HmacAuthenticator,
        password: &'static str,
        version: &str,
    ) -> tokio::task::JoinHandle<()> {
        let host = Arc::clone(host);
        let nonce = auth.generate_challenge();
        let expected = auth.respond_to_challenge(password, &nonce);
        let version = version.to_string();
        tokio::spawn(async move {
            host.send(&Packet::Challenge {
                nonce,
                server_version: version,
            })
            .await
            .expect("send challenge");
            match host.recv().await.expect("recv response") {
                Packet::ChallengeResponse { digest } if digest == expected => {
                    host.send(&Packet::Success).await.expect("send success");
                }
                _ => {
                    host.send(&Packet::Error {
                        kind: ErrorKind::AuthenticationFailure,
                        message: "bad credential".into(),
                    })
                    .await
                    .expect("send failure");
                }
            }
        })
    }

    fn channel_with(
        connector: Arc<MockConnector>,
        attempts: u32,
    ) -> (Arc<SessionChannel>, SessionStreams) {
        SessionChannel::new(
            connector,
            Arc::new(HmacAuthenticator::new(1)),
            SessionTuning {
                connect_attempts: attempts,
                connect_timeout: Duration::from_secs(5),
            },
        )
    }

    #[test_timeout::tokio_timeout_test]
    async fn connect_yields_nonempty_session_id() {
        let (client_end, host_end) = MockTransport::pair();
        let auth = HmacAuthenticator::new(1);
        seeded_host(&host_end, &auth, "tide", "1");
        let connector = Arc::new(MockConnector::new());
        connector.push(client_end);
        let (channel, mut streams) = channel_with(connector, 1);

        let session_id = channel.connect("tide").await.expect("connect");
        assert!(!session_id.as_str().is_empty());
        assert!(channel.is_connected());
        assert_eq!(streams.events.recv().await, Some(ClientEvent::Connecting));
        assert_eq!(
            streams.events.recv().await,
            Some(ClientEvent::Connected {
                session_id: session_id.as_str().to_string()
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn bad_credential_is_terminal_and_emits_event() {
        let (client_end, host_end) = MockTransport::pair();
        let auth = HmacAuthenticator::new(1);
        seeded_host(&host_end, &auth, "tide", "1");
        let connector = Arc::new(MockConnector::new());
        connector.push(client_end);
        // Three attempts tuned, but authentication failure must not retry.
        let (channel, mut streams) = channel_with(Arc::clone(&connector), 3);

        let err = channel.connect("wrong").await.expect_err("must fail");
        assert!(matches!(err, SessionError::AuthenticationFailed));
        assert_eq!(connector.dial_count(), 1);
        assert!(!channel.is_connected());
        assert_eq!(streams.events.recv().await, Some(ClientEvent::Connecting));
        assert_eq!(
            streams.events.recv().await,
            Some(ClientEvent::AuthenticationFailure)
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn dial_failures_retry_up_to_the_tuned_attempts() {
        let connector = Arc::new(MockConnector::new());
        let (channel, _streams) = channel_with(Arc::clone(&connector), 3);
        let err = channel.connect("tide").await.expect_err("must fail");
        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(connector.dial_count(), 3);
    }

    #[test_timeout::tokio_timeout_test]
    async fn modern_incompatible_host_keeps_update_path_open() {
        let (client_end, host_end) = MockTransport::pair();
        let auth = HmacAuthenticator::new(1);
        seeded_host(&host_end, &auth, "tide", "0");
        let connector = Arc::new(MockConnector::new());
        connector.push(client_end);
        let (channel, mut streams) = channel_with(connector, 1);

        let err = channel.connect("tide").await.expect_err("must fail");
        match err {
            SessionError::ServerOutOfDate {
                version,
                supports_update,
            } => {
                assert_eq!(version, "0");
                assert!(supports_update);
            }
            other => panic!("expected version error, got {other:?}"),
        }
        assert_eq!(
            *channel.state().borrow(),
            ConnectionState::ConnectedButDeprecated
        );
        // Only the update request passes the deprecated gate.
        assert!(channel.send(&Packet::UpdateRequest).await.is_ok());
        assert!(matches!(
            channel.send(&Packet::TileInfoRequest).await,
            Err(SessionError::ServerOutOfDate { .. })
        ));
        assert_eq!(streams.events.recv().await, Some(ClientEvent::Connecting));
        assert_eq!(
            streams.events.recv().await,
            Some(ClientEvent::ServerOutOfDate {
                version: "0".into()
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn legacy_host_drains_trailing_mismatch_report() {
        let (client_end, host_end) = MockTransport::pair();
        let auth = HmacAuthenticator::new(1);
        let nonce = auth.generate_challenge();
        let expected = auth.respond_to_challenge("tide", &nonce);
        {
            let host = Arc::clone(&host_end);
            tokio::spawn(async move {
                host.send(&Packet::Challenge {
                    nonce,
                    server_version: "0".into(),
                })
                .await
                .expect("challenge");
                match host.recv().await.expect("response") {
                    Packet::ChallengeResponse { digest } if digest == expected => {}
                    other => panic!("unexpected response {other:?}"),
                }
                host.send(&Packet::Success).await.expect("success");
                host.send(&Packet::Error {
                    kind: ErrorKind::VersionMismatch,
                    message: "too old".into(),
                })
                .await
                .expect("mismatch");
            });
        }
        let connector = Arc::new(MockConnector::new());
        connector.push(client_end);
        let (channel, _streams) = channel_with(connector, 1);

        match channel.connect("tide").await.expect_err("must fail") {
            SessionError::ServerOutOfDate {
                supports_update, ..
            } => assert!(!supports_update),
            other => panic!("expected version error, got {other:?}"),
        }
        assert!(!channel.is_connected());
    }

    #[test_timeout::tokio_timeout_test]
    async fn receiver_routes_tiles_and_replies() {
        let (client_end, host_end) = MockTransport::pair();
        let auth = HmacAuthenticator::new(1);
        seeded_host(&host_end, &auth, "tide", "1");
        let connector = Arc::new(MockConnector::new());
        connector.push(client_end);
        let (channel, mut streams) = channel_with(connector, 1);
        channel.connect("tide").await.expect("connect");

        host_end
            .send(&Packet::TileInfoReply {
                width: 1024,
                height: 768,
                tile_size: 128,
            })
            .await
            .expect("screen info");
        host_end
            .send(&Packet::TileUpdate {
                tile_x: 1,
                tile_y: 2,
                image: bytes::Bytes::from_static(&[7, 7]),
            })
            .await
            .expect("tile");
        host_end
            .send(&Packet::Reply {
                payload: "volume=30".into(),
            })
            .await
            .expect("reply");

        assert_eq!(
            streams.tiles.recv().await,
            Some(TilePush::ScreenInfo {
                width: 1024,
                height: 768,
                tile_size: 128
            })
        );
        assert_eq!(
            streams.tiles.recv().await,
            Some(TilePush::Tile {
                tile_x: 1,
                tile_y: 2,
                image: bytes::Bytes::from_static(&[7, 7])
            })
        );
        // Connecting + Connected arrive first on the event stream.
        assert_eq!(streams.events.recv().await, Some(ClientEvent::Connecting));
        let _connected = streams.events.recv().await;
        assert_eq!(
            streams.events.recv().await,
            Some(ClientEvent::Reply {
                packet: Packet::Reply {
                    payload: "volume=30".into()
                }
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn reconnect_tears_down_previous_transport() {
        let auth = HmacAuthenticator::new(1);
        let (first_client, first_host) = MockTransport::pair();
        let (second_client, second_host) = MockTransport::pair();
        seeded_host(&first_host, &auth, "tide", "1");
        seeded_host(&second_host, &auth, "tide", "1");
        let connector = Arc::new(MockConnector::new());
        connector.push(Arc::clone(&first_client));
        connector.push(second_client);
        let (channel, _streams) = channel_with(connector, 1);

        channel.connect("tide").await.expect("first connect");
        channel.connect("tide").await.expect("second connect");
        assert!(!first_client.is_connected());
        assert!(channel.is_connected());
    }
}
