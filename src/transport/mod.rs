//! Transport abstraction for byte-level I/O
//!
//! Separates medium concerns from connection logic:
//! - **TransportAdapter**: discovery + connection establishment for one
//!   physical medium (cloud WebSocket, TCP, USB...)
//! - **FrameSink / FrameSource**: the split write/read halves of one
//!   established stream, handed to the connection at creation time
//!
//! Each adapter manages its own execution model internally:
//! - Cloud/TCP: async tokio tasks on the shared reactor
//! - USB: blocking threads bridged through channels
//!
//! The sink is driven only by the connection's writer loop and the source
//! only by its read loop, so full-duplex I/O needs no shared lock.
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs`
//! 2. Implement `TransportAdapter` plus sink/source types for the medium
//! 3. Add `pub mod my_transport;` here
//! 4. Register the adapter with the `TransportController`

pub mod cloud;
pub mod tcp;
pub mod usb;

pub use cloud::CloudWebsocketAdapter;
pub use tcp::TcpAdapter;
pub use usb::UsbAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::Connection;
use crate::device::{AppHandle, Device, TransportKind};
use crate::error::Result;
use crate::event::EventTx;

/// Write half of an established stream
///
/// Invoked only by the owning connection's writer loop, never concurrently
/// for the same connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Transmit one complete frame
    async fn write_frame(&mut self, payload: Bytes) -> Result<()>;

    /// Release the underlying stream; idempotent, safe after partial failure
    async fn close(&mut self);
}

/// Read half of an established stream
///
/// Driven only by the owning connection's read loop. Each call yields one
/// complete frame or the error that aborts the connection.
#[async_trait]
pub trait FrameSource: Send {
    async fn read_frame(&mut self) -> Result<Bytes>;
}

/// Contract every transport medium implements
///
/// All failures cross this boundary as typed `TransportError` values;
/// adapters never panic into the controller.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// The physical medium this adapter owns
    fn kind(&self) -> TransportKind;

    /// Bounded-time probe of the medium
    ///
    /// Duplicate locators collapse to one device. A probe failure is an
    /// error, never a silently-partial device list.
    async fn scan_devices(&self) -> Result<Vec<Device>>;

    /// Establish the medium-specific channel and hand back a live connection
    ///
    /// On success the connection is already `Connected`: its writer loop is
    /// running, `ConnectDone` has been emitted, and the first asynchronous
    /// read has been issued. On failure every stage resource has been
    /// released before the error is returned.
    async fn connect(
        &self,
        device: &Device,
        app_handle: AppHandle,
        events: EventTx,
    ) -> Result<Arc<Connection>>;
}
