//! Connection state machine and lifecycle
//!
//! A `Connection` is the stateful link for one (device, app handle) pair.
//! It owns the split stream halves, the outbound queue, the writer loop,
//! and the read loop. It is created by an adapter once the handshake
//! pipeline has completed and destroyed only after both the writer and
//! reader paths have fully stopped.

mod reader;
mod writer;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::device::{AppHandle, DeviceId};
use crate::event::{EventTx, TransportEvent};
use crate::queue::{OutboundMessage, OutboundQueue, ShutdownToken};
use crate::transport::{FrameSink, FrameSource};

/// States of the connection state machine
///
/// The bracketed handshake stages (`SecuringTls`, `UpgradingProtocol`) are
/// only visited by media with a session handshake; other variants skip
/// straight from `MediumConnecting` to `Connected`. `Closed` and `Aborted`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Resolving = 1,
    MediumConnecting = 2,
    SecuringTls = 3,
    UpgradingProtocol = 4,
    Connected = 5,
    Closing = 6,
    Closed = 7,
    Aborted = 8,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Resolving,
            2 => Self::MediumConnecting,
            3 => Self::SecuringTls,
            4 => Self::UpgradingProtocol,
            5 => Self::Connected,
            6 => Self::Closing,
            7 => Self::Closed,
            _ => Self::Aborted,
        }
    }
}

/// Lock-free cell holding the current connection state
///
/// Terminal states are sticky: once `Closed` or `Aborted` is recorded no
/// further transition is accepted. This is what makes a second `Disconnect`
/// after an abort a no-op.
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Record a transition; returns false if the current state is terminal
    pub fn set(&self, next: ConnectionState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_terminal() {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateful logical link for one (device, app handle) pair
pub struct Connection {
    device: DeviceId,
    app_handle: AppHandle,
    state: Arc<StateCell>,
    queue: Arc<OutboundQueue>,
    shutdown: ShutdownToken,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Bring a handshaken stream to life
    ///
    /// Starts the writer loop, emits `ConnectDone`, then issues the first
    /// asynchronous read. The order matters: upstream must observe
    /// `ConnectDone` before any `DataReceiveDone` for the pair.
    pub(crate) fn spawn(
        device: DeviceId,
        app_handle: AppHandle,
        state: Arc<StateCell>,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
        events: EventTx,
        shutdown: ShutdownToken,
    ) -> Arc<Self> {
        state.set(ConnectionState::Connected);
        debug!(device = %device, app_handle = %app_handle, "connection established");

        let queue = Arc::new(OutboundQueue::new());

        let writer = tokio::spawn(writer::run(
            sink,
            queue.clone(),
            shutdown.clone(),
            events.clone(),
            device.clone(),
            app_handle,
        ));

        let _ = events.send(TransportEvent::ConnectDone {
            device: device.clone(),
            app_handle,
        });

        let reader = tokio::spawn(reader::run(
            source,
            state.clone(),
            shutdown.clone(),
            events,
            device.clone(),
            app_handle,
        ));

        Arc::new(Self {
            device,
            app_handle,
            state,
            queue,
            shutdown,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn app_handle(&self) -> AppHandle {
        self.app_handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Enqueue an outbound payload
    ///
    /// Returns once the message is queued; transmission is asynchronous and
    /// failures surface as `DataSendFailed` events.
    pub fn send(&self, payload: Bytes) {
        self.queue.push(OutboundMessage::new(
            payload,
            self.device.clone(),
            self.app_handle,
        ));
    }

    /// Tear the connection down
    ///
    /// Safe to call from any task and idempotent. Upon return the writer
    /// loop has drained and been joined, the read loop has stopped, and no
    /// further events will be emitted for this connection.
    pub async fn shutdown(&self) {
        self.state.set(ConnectionState::Closing);
        self.shutdown.trigger();

        let writer = self.writer.lock().take();
        if let Some(handle) = writer {
            let _ = handle.await;
        }

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }

        // No-op when the read loop already recorded Aborted
        self.state.set(ConnectionState::Closed);
        debug!(device = %self.device, app_handle = %self.app_handle, state = ?self.state.get(), "connection closed");
    }
}
