//! Cloud WebSocket transport adapter
//!
//! Connects the head unit to cloud-hosted applications over a WebSocket
//! client session, plain or TLS. The connect pipeline is staged and each
//! stage is bounded by a caller-supplied timeout:
//!
//! ```text
//! resolve host:port → TCP connect → [TLS handshake] → WS upgrade "/" → Connected
//! ```
//!
//! Failure at any stage releases everything acquired so far and surfaces as
//! the stage's typed error; the state cell records `Aborted`. Frames are
//! binary WebSocket messages, one frame per logical message each direction;
//! no length prefix is added at this layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async, WebSocketStream};
use tracing::{debug, error, info};

use crate::config::{CloudConfigStore, CloudTransportProperties, ConnectTimeouts, TransportSecurity};
use crate::connection::{Connection, ConnectionState, StateCell};
use crate::constants::WEBSOCKET_PATH;
use crate::device::{AppHandle, Device, TransportKind};
use crate::error::{HandshakeStage, Result, TransportError};
use crate::event::EventTx;
use crate::queue::ShutdownToken;
use crate::transport::{FrameSink, FrameSource, TransportAdapter};

type PlainWs = WebSocketStream<TcpStream>;
type SecureWs = WebSocketStream<tokio_rustls::client::TlsStream<TcpStream>>;

/// Cloud WebSocket adapter (plain `ws://` and secure `wss://`)
///
/// Per-device endpoint properties come from the `CloudConfigStore`
/// populated by the policy collaborator before `connect`.
pub struct CloudWebsocketAdapter {
    config: Arc<CloudConfigStore>,
    timeouts: ConnectTimeouts,
}

impl CloudWebsocketAdapter {
    pub fn new(config: Arc<CloudConfigStore>) -> Self {
        Self {
            config,
            timeouts: ConnectTimeouts::default(),
        }
    }

    pub fn with_timeouts(config: Arc<CloudConfigStore>, timeouts: ConnectTimeouts) -> Self {
        Self { config, timeouts }
    }
}

#[async_trait]
impl TransportAdapter for CloudWebsocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::CloudWebsocket
    }

    /// Cloud devices are provisioned, not probed: every configured endpoint
    /// becomes one device, keyed by its device id.
    async fn scan_devices(&self) -> Result<Vec<Device>> {
        let devices = self
            .config
            .entries()
            .into_iter()
            .map(|(id, props)| {
                let locator = props.endpoint();
                Device {
                    name: id.as_str().to_string(),
                    id,
                    locator,
                    kind: TransportKind::CloudWebsocket,
                }
            })
            .collect();
        Ok(devices)
    }

    async fn connect(
        &self,
        device: &Device,
        app_handle: AppHandle,
        events: EventTx,
    ) -> Result<Arc<Connection>> {
        let props = self
            .config
            .get(&device.id)
            .ok_or_else(|| TransportError::Config {
                field: "cloud properties",
                reason: format!("no cloud configuration for device {}", device.id),
            })?;
        props.validate()?;

        debug!(
            device = %device.id,
            endpoint = %props.endpoint(),
            security = ?props.security,
            has_auth_token = props.auth_token.is_some(),
            hybrid_app_preference = ?props.hybrid_app_preference,
            "starting cloud connect"
        );

        let state = Arc::new(StateCell::new());
        match establish(&props, &self.timeouts, &state).await {
            Ok((sink, source)) => {
                info!(device = %device.id, endpoint = %props.endpoint(), "cloud websocket connected");
                Ok(Connection::spawn(
                    device.id.clone(),
                    app_handle,
                    state,
                    sink,
                    source,
                    events,
                    ShutdownToken::new(),
                ))
            }
            Err(e) => {
                state.set(ConnectionState::Aborted);
                error!(device = %device.id, endpoint = %props.endpoint(), error = %e, "cloud connect failed");
                Err(e)
            }
        }
    }
}

/// Drive the staged pipeline up to a ready pair of stream halves
async fn establish(
    props: &CloudTransportProperties,
    timeouts: &ConnectTimeouts,
    state: &StateCell,
) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
    let endpoint = props.endpoint();

    state.set(ConnectionState::Resolving);
    let addr = resolve(&props.host, props.port, timeouts.resolve).await?;
    debug!(endpoint = %endpoint, %addr, "resolved cloud endpoint");

    state.set(ConnectionState::MediumConnecting);
    let tcp = tokio::time::timeout(timeouts.connect, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Connect {
            endpoint: endpoint.clone(),
            source: std::io::Error::from(std::io::ErrorKind::TimedOut),
        })?
        .map_err(|e| TransportError::Connect {
            endpoint: endpoint.clone(),
            source: e,
        })?;
    debug!(endpoint = %endpoint, "tcp stream opened");

    let url = format!("ws://{}{}", endpoint, WEBSOCKET_PATH);
    match props.security {
        TransportSecurity::Plain => {
            state.set(ConnectionState::UpgradingProtocol);
            let ws = upgrade(&url, tcp, &endpoint, timeouts.handshake).await?;
            let (sink, source) = ws.split();
            Ok((
                Box::new(WsSink::Plain(sink)),
                Box::new(WsSource::Plain(source)),
            ))
        }
        TransportSecurity::Secure => {
            state.set(ConnectionState::SecuringTls);
            // validate() guarantees the trust anchor is present
            let pem = props.certificate.as_deref().unwrap_or_default();
            let roots = install_trust_anchor(pem, &endpoint)?;
            let tls = tls_handshake(tcp, &props.host, roots, &endpoint, timeouts.handshake).await?;
            debug!(endpoint = %endpoint, "tls handshake complete");

            state.set(ConnectionState::UpgradingProtocol);
            let ws = upgrade(&url, tls, &endpoint, timeouts.handshake).await?;
            let (sink, source) = ws.split();
            Ok((
                Box::new(WsSink::Secure(sink)),
                Box::new(WsSource::Secure(source)),
            ))
        }
    }
}

async fn resolve(host: &str, port: u16, bound: Duration) -> Result<SocketAddr> {
    let endpoint = format!("{}:{}", host, port);
    let mut addrs = tokio::time::timeout(bound, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| TransportError::Resolution {
            endpoint: endpoint.clone(),
            detail: "timed out".to_string(),
        })?
        .map_err(|e| TransportError::Resolution {
            endpoint: endpoint.clone(),
            detail: e.to_string(),
        })?;
    addrs.next().ok_or(TransportError::Resolution {
        endpoint,
        detail: "no addresses".to_string(),
    })
}

/// Parse the PEM trust anchor into a root store
fn install_trust_anchor(pem: &str, endpoint: &str) -> Result<RootCertStore> {
    let handshake_err = |detail: String| TransportError::Handshake {
        endpoint: endpoint.to_string(),
        stage: HandshakeStage::CertificateInstall,
        detail,
    };

    let mut reader = std::io::Cursor::new(pem.as_bytes());
    let mut roots = RootCertStore::empty();
    let mut installed = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| handshake_err(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| handshake_err(e.to_string()))?;
        installed += 1;
    }
    if installed == 0 {
        return Err(handshake_err("no certificate in PEM material".to_string()));
    }
    debug!(endpoint = %endpoint, certificates = installed, "trust anchor installed");
    Ok(roots)
}

async fn tls_handshake(
    tcp: TcpStream,
    host: &str,
    roots: RootCertStore,
    endpoint: &str,
    bound: Duration,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let handshake_err = |detail: String| TransportError::Handshake {
        endpoint: endpoint.to_string(),
        stage: HandshakeStage::Tls,
        detail,
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| handshake_err(e.to_string()))?;

    tokio::time::timeout(bound, connector.connect(server_name, tcp))
        .await
        .map_err(|_| handshake_err("timed out".to_string()))?
        .map_err(|e| handshake_err(e.to_string()))
}

/// WebSocket client upgrade against the fixed resource path
async fn upgrade<S>(url: &str, stream: S, endpoint: &str, bound: Duration) -> Result<WebSocketStream<S>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let handshake_err = |detail: String| TransportError::Handshake {
        endpoint: endpoint.to_string(),
        stage: HandshakeStage::Upgrade,
        detail,
    };

    let (ws, _response) = tokio::time::timeout(bound, client_async(url, stream))
        .await
        .map_err(|_| handshake_err("timed out".to_string()))?
        .map_err(|e| handshake_err(e.to_string()))?;
    Ok(ws)
}

/// Write half, one variant per transport security kind
///
/// Selected at connection creation and fixed for the connection's lifetime.
enum WsSink {
    Plain(SplitSink<PlainWs, Message>),
    Secure(SplitSink<SecureWs, Message>),
}

#[async_trait]
impl FrameSink for WsSink {
    async fn write_frame(&mut self, payload: Bytes) -> Result<()> {
        let message = Message::Binary(payload);
        let result = match self {
            Self::Plain(sink) => sink.send(message).await,
            Self::Secure(sink) => sink.send(message).await,
        };
        result.map_err(|e| TransportError::Write {
            detail: e.to_string(),
        })
    }

    async fn close(&mut self) {
        let _ = match self {
            Self::Plain(sink) => sink.close().await,
            Self::Secure(sink) => sink.close().await,
        };
    }
}

/// Read half, one variant per transport security kind
enum WsSource {
    Plain(SplitStream<PlainWs>),
    Secure(SplitStream<SecureWs>),
}

#[async_trait]
impl FrameSource for WsSource {
    async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            let next = match self {
                Self::Plain(stream) => stream.next().await,
                Self::Secure(stream) => stream.next().await,
            };
            match next {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                // Control frames and text are not part of the contract
                Some(Ok(Message::Close(_))) => {
                    return Err(TransportError::Read {
                        detail: "closed by peer".to_string(),
                    })
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::Read {
                        detail: e.to_string(),
                    })
                }
                None => {
                    return Err(TransportError::Read {
                        detail: "stream ended".to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELF_SIGNED_PEM: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBfTCCASOgAwIBAgIUEviWde5I4GMc0Q8W+ExI6lE76ykwCgYIKoZIzj0EAwIw\n\
FDESMBAGA1UEAwwJbG9jYWxob3N0MB4XDTI2MDgzMDAyMzE0NFoXDTM2MDgyNzAy\n\
MzE0NFowFDESMBAGA1UEAwwJbG9jYWxob3N0MFkwEwYHKoZIzj0CAQYIKoZIzj0D\n\
AQcDQgAEVYqtMihbWcCLhjs7iGIVvNQIHrP7F1jGW4Fzj0Fi6msTHh6xS1b3dYgJ\n\
eVEknF9HLILiHfM64Ldsdb9zrLUuKaNTMFEwHQYDVR0OBBYEFGrkfJVIV6NwbakT\n\
o5y7sFgKb46DMB8GA1UdIwQYMBaAFGrkfJVIV6NwbakTo5y7sFgKb46DMA8GA1Ud\n\
EwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIhAKUOA0gHMAOQmCS+wMAaf9js\n\
3ykm/KcwEBTw71UAC5mrAiAMHw5M2Mrjt0DBo6mwqB/JBYuHgKuP8bCdt37wHlCC\n\
7w==\n\
-----END CERTIFICATE-----\n";

    #[test]
    fn test_trust_anchor_install_rejects_garbage() {
        let err = install_trust_anchor("not a certificate", "host:443").unwrap_err();
        assert!(matches!(
            err,
            TransportError::Handshake {
                stage: HandshakeStage::CertificateInstall,
                ..
            }
        ));
    }

    #[test]
    fn test_trust_anchor_install_accepts_pem() {
        let roots = install_trust_anchor(SELF_SIGNED_PEM, "host:443").unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_invalid_host_fails() {
        let err = resolve("nonexistent.invalid", 80, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addr = resolve("127.0.0.1", 8080, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());
    }
}
