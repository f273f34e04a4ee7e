//! Local TCP/Wi-Fi transport adapter
//!
//! Connects to a device on the local network by its `host:port` locator.
//! There is no session handshake: the state machine skips the bracketed
//! stages and goes straight from `MediumConnecting` to `Connected`.
//!
//! Frames are raw read chunks; any application framing above raw bytes is
//! an upstream concern.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::ConnectTimeouts;
use crate::connection::{Connection, ConnectionState, StateCell};
use crate::constants::READ_BUFFER_SIZE;
use crate::device::{AppHandle, Device, TransportKind};
use crate::error::{Result, TransportError};
use crate::event::EventTx;
use crate::queue::ShutdownToken;
use crate::transport::{FrameSink, FrameSource, TransportAdapter};

/// TCP adapter for devices reachable over the local network
///
/// Devices are registered by the configuration collaborator (there is no
/// broadcast discovery in this layer), so `scan_devices` reports none.
pub struct TcpAdapter {
    timeouts: ConnectTimeouts,
}

impl TcpAdapter {
    pub fn new() -> Self {
        Self {
            timeouts: ConnectTimeouts::default(),
        }
    }

    pub fn with_timeouts(timeouts: ConnectTimeouts) -> Self {
        Self { timeouts }
    }
}

impl Default for TcpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for TcpAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn scan_devices(&self) -> Result<Vec<Device>> {
        Ok(Vec::new())
    }

    async fn connect(
        &self,
        device: &Device,
        app_handle: AppHandle,
        events: EventTx,
    ) -> Result<Arc<Connection>> {
        let state = Arc::new(StateCell::new());
        let stream = match establish(&device.locator, self.timeouts, &state).await {
            Ok(stream) => stream,
            Err(e) => {
                state.set(ConnectionState::Aborted);
                return Err(e);
            }
        };

        info!(device = %device.id, endpoint = %device.locator, "tcp connected");
        let (read_half, write_half) = stream.into_split();
        Ok(Connection::spawn(
            device.id.clone(),
            app_handle,
            state,
            Box::new(TcpSink { write_half }),
            Box::new(TcpSource {
                read_half,
                buf: vec![0u8; READ_BUFFER_SIZE],
            }),
            events,
            ShutdownToken::new(),
        ))
    }
}

async fn establish(
    locator: &str,
    timeouts: ConnectTimeouts,
    state: &StateCell,
) -> Result<TcpStream> {
    state.set(ConnectionState::Resolving);
    let addr = resolve_locator(locator, timeouts).await?;
    debug!(%addr, "resolved tcp locator");

    state.set(ConnectionState::MediumConnecting);
    tokio::time::timeout(timeouts.connect, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Connect {
            endpoint: locator.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::TimedOut),
        })?
        .map_err(|e| TransportError::Connect {
            endpoint: locator.to_string(),
            source: e,
        })
}

async fn resolve_locator(locator: &str, timeouts: ConnectTimeouts) -> Result<SocketAddr> {
    // Fast path for literal socket addresses, lookup for names
    if let Ok(addr) = locator.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let mut addrs = tokio::time::timeout(timeouts.resolve, tokio::net::lookup_host(locator))
        .await
        .map_err(|_| TransportError::Resolution {
            endpoint: locator.to_string(),
            detail: "timed out".to_string(),
        })?
        .map_err(|e| TransportError::Resolution {
            endpoint: locator.to_string(),
            detail: e.to_string(),
        })?;
    addrs.next().ok_or(TransportError::Resolution {
        endpoint: locator.to_string(),
        detail: "no addresses".to_string(),
    })
}

struct TcpSink {
    write_half: OwnedWriteHalf,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn write_frame(&mut self, payload: Bytes) -> Result<()> {
        self.write_half
            .write_all(&payload)
            .await
            .map_err(|e| TransportError::Write {
                detail: e.to_string(),
            })
    }

    async fn close(&mut self) {
        let _ = self.write_half.shutdown().await;
    }
}

struct TcpSource {
    read_half: OwnedReadHalf,
    buf: Vec<u8>,
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn read_frame(&mut self) -> Result<Bytes> {
        match self.read_half.read(&mut self.buf).await {
            Ok(0) => Err(TransportError::Read {
                detail: "closed by peer".to_string(),
            }),
            Ok(n) => Ok(Bytes::copy_from_slice(&self.buf[..n])),
            Err(e) => Err(TransportError::Read {
                detail: e.to_string(),
            }),
        }
    }
}
