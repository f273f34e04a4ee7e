//! Outbound queue and shutdown signaling
//!
//! The outbound queue is the only structure on a connection with concurrent
//! multi-writer access: any upstream thread may `push` while the writer
//! loop drains. Insertion order is preserved; messages are never reordered
//! or dropped except during the final best-effort drain on shutdown.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use crate::device::{AppHandle, DeviceId};

/// One pending outbound payload
///
/// Created by `send_data`, consumed exactly once by the writer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Bytes,
    pub device: DeviceId,
    pub app_handle: AppHandle,
}

impl OutboundMessage {
    pub fn new(payload: Bytes, device: DeviceId, app_handle: AppHandle) -> Self {
        Self {
            payload,
            device,
            app_handle,
        }
    }
}

/// Thread-safe FIFO of pending outbound messages for one connection
///
/// `push` never blocks the caller beyond lock acquisition. The writer loop
/// is the single consumer: it drains the batch present at wake time, so new
/// arrivals are picked up on the next wait cycle and forward progress under
/// shutdown is guaranteed.
#[derive(Default)]
pub struct OutboundQueue {
    inner: Mutex<VecDeque<OutboundMessage>>,
    ready: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake the writer loop
    pub fn push(&self, message: OutboundMessage) {
        self.inner.lock().push_back(message);
        self.ready.notify_one();
    }

    /// Take every message queued at this instant, in FIFO order
    pub fn drain(&self) -> VecDeque<OutboundMessage> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wait until `push` signals new work
    ///
    /// `Notify` stores a wakeup issued while no one waits, so a push between
    /// `drain` and `wait_ready` is not lost. Callers must still re-check the
    /// queue after waking.
    pub async fn wait_ready(&self) {
        self.ready.notified().await;
    }
}

/// Cancellation token observed at every wait point of a connection
///
/// Backed by a `watch` channel so that triggering wakes all waiters without
/// polling races. Triggering is idempotent; the token never un-triggers.
#[derive(Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal shutdown to every holder of this token
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token has been triggered
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns immediately if already true
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
