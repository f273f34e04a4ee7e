//! Read loop - asynchronous read/dispatch path
//!
//! The original callback chain (read completion re-arms the next read) is
//! expressed here as an explicit loop: each iteration is one "issue read"
//! transition, guarded by the shutdown token so no read is ever issued
//! after shutdown starts.
//!
//! A completed read either yields a frame forwarded upstream as
//! `DataReceiveDone`, or an error which records `Aborted`, triggers
//! shutdown, and emits `ConnectionAborted` as the final event for the pair.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::connection::{ConnectionState, StateCell};
use crate::device::{AppHandle, DeviceId};
use crate::event::{EventTx, TransportEvent};
use crate::queue::ShutdownToken;
use crate::transport::FrameSource;

pub(super) async fn run(
    mut source: Box<dyn FrameSource>,
    state: Arc<StateCell>,
    shutdown: ShutdownToken,
    events: EventTx,
    device: DeviceId,
    app_handle: AppHandle,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.triggered() => break,

            result = source.read_frame() => match result {
                Ok(frame) => {
                    if frame.is_empty() {
                        trace!(device = %device, "ignoring empty frame");
                        continue;
                    }
                    let delivered = events.send(TransportEvent::DataReceiveDone {
                        device: device.clone(),
                        app_handle,
                        frame,
                    });
                    if delivered.is_err() {
                        // Controller gone; nothing left to report to
                        break;
                    }
                }
                Err(error) => {
                    debug!(device = %device, app_handle = %app_handle, %error, "read failed, aborting connection");
                    state.set(ConnectionState::Aborted);
                    shutdown.trigger();
                    let _ = events.send(TransportEvent::ConnectionAborted {
                        device: device.clone(),
                        app_handle,
                        error,
                    });
                    break;
                }
            }
        }
    }
    debug!(device = %device, app_handle = %app_handle, "read loop stopped");
}
