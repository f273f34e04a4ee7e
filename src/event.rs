//! Upstream lifecycle events
//!
//! Connections report into the controller, which forwards events upstream
//! in per-pair order. Each underlying connection event is delivered exactly
//! once; ordering across different pairs is not guaranteed.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::device::{AppHandle, DeviceId};
use crate::error::TransportError;
use crate::queue::OutboundMessage;

/// Lifecycle and data events emitted for a connection
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection reached `Connected`; reads are running
    ConnectDone {
        device: DeviceId,
        app_handle: AppHandle,
    },
    /// One complete inbound frame
    DataReceiveDone {
        device: DeviceId,
        app_handle: AppHandle,
        frame: Bytes,
    },
    /// The writer loop failed to transmit `message`; the connection is
    /// shutting down
    DataSendFailed {
        device: DeviceId,
        app_handle: AppHandle,
        message: OutboundMessage,
        error: TransportError,
    },
    /// The connection left `Connected` on a read failure or peer close
    ConnectionAborted {
        device: DeviceId,
        app_handle: AppHandle,
        error: TransportError,
    },
}

impl TransportEvent {
    /// The (device, app handle) pair this event belongs to
    pub fn pair(&self) -> (&DeviceId, AppHandle) {
        match self {
            Self::ConnectDone {
                device, app_handle, ..
            }
            | Self::DataReceiveDone {
                device, app_handle, ..
            }
            | Self::DataSendFailed {
                device, app_handle, ..
            }
            | Self::ConnectionAborted {
                device, app_handle, ..
            } => (device, *app_handle),
        }
    }
}

/// Sender side of the connection-to-controller event channel
pub type EventTx = mpsc::UnboundedSender<TransportEvent>;

/// Receiver handed to the upstream protocol layer
pub type EventRx = mpsc::UnboundedReceiver<TransportEvent>;
