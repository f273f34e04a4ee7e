//! Transport manager connection layer for in-vehicle application
//! connectivity
//!
//! A head-unit process exchanges framed binary messages with mobile
//! applications over heterogeneous physical media - cloud WebSocket (plain
//! or TLS), local TCP/Wi-Fi, and USB - behind one uniform connection
//! abstraction.
//!
//! # Architecture
//!
//! ```text
//! protocol layer
//!       │ connect / send_data / disconnect          ▲ TransportEvent
//!       ▼                                           │
//! TransportController ── adapter registry ── event router
//!       │
//!       ▼
//! TransportAdapter (cloud / tcp / usb)
//!       │ staged handshake
//!       ▼
//! Connection ── writer loop (outbound queue, FIFO)
//!            └─ read loop   (one frame per DataReceiveDone)
//! ```
//!
//! Payloads are opaque bytes; framing above the transport boundary, retry
//! policy, and reconnection all belong to the upstream layer.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(CloudConfigStore::new());
//! store.load_file(Path::new("cloud.toml"))?;
//! let (controller, mut events) = TransportController::new(vec![
//!     Arc::new(CloudWebsocketAdapter::new(store)),
//!     Arc::new(TcpAdapter::new()),
//! ]);
//!
//! controller.scan(TransportKind::CloudWebsocket).await?;
//! controller.connect(&device_id, AppHandle(1)).await?;
//! controller.send_data(&device_id, AppHandle(1), payload)?;
//! while let Some(event) = events.recv().await {
//!     // ConnectDone / DataReceiveDone / DataSendFailed / ConnectionAborted
//! }
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod controller;
pub mod device;
pub mod error;
pub mod event;
pub mod queue;
pub mod transport;

pub use config::{
    CloudConfigStore, CloudTransportProperties, ConnectTimeouts, TransportSecurity, UsbDeviceFilter,
};
pub use connection::{Connection, ConnectionState};
pub use controller::TransportController;
pub use device::{AppHandle, Device, DeviceId, TransportKind};
pub use error::{HandshakeStage, Result, TransportError};
pub use event::{EventRx, EventTx, TransportEvent};
pub use queue::{OutboundMessage, OutboundQueue, ShutdownToken};
pub use transport::{
    CloudWebsocketAdapter, FrameSink, FrameSource, TcpAdapter, TransportAdapter, UsbAdapter,
};
