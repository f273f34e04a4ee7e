//! Writer loop - dedicated worker draining the outbound queue
//!
//! Contract: drain in FIFO order until shutdown, then stop. The loop waits
//! until the queue is non-empty or the shutdown token triggers; on wake it
//! drains the batch that was queued at that instant, so new arrivals go to
//! the next cycle and shutdown always makes forward progress.
//!
//! A write failure stops the batch, reports `DataSendFailed` with the
//! failed message, and triggers shutdown on the owning connection. There is
//! no automatic retry. On shutdown the loop performs one final best-effort
//! drain before releasing the sink.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::device::{AppHandle, DeviceId};
use crate::event::{EventTx, TransportEvent};
use crate::queue::{OutboundQueue, ShutdownToken};
use crate::transport::FrameSink;

pub(super) async fn run(
    mut sink: Box<dyn FrameSink>,
    queue: Arc<OutboundQueue>,
    shutdown: ShutdownToken,
    events: EventTx,
    device: DeviceId,
    app_handle: AppHandle,
) {
    let clean = pump(
        sink.as_mut(),
        &queue,
        &shutdown,
        &events,
        &device,
        app_handle,
    )
    .await;

    if clean {
        final_drain(sink.as_mut(), &queue, &device).await;
    }

    sink.close().await;
    debug!(device = %device, app_handle = %app_handle, "writer loop stopped");
}

/// Main wait/drain cycle; returns true on clean shutdown, false on write error
async fn pump(
    sink: &mut dyn FrameSink,
    queue: &OutboundQueue,
    shutdown: &ShutdownToken,
    events: &EventTx,
    device: &DeviceId,
    app_handle: AppHandle,
) -> bool {
    loop {
        for message in queue.drain() {
            if let Err(error) = sink.write_frame(message.payload.clone()).await {
                warn!(device = %device, app_handle = %app_handle, %error, "write failed, aborting connection");
                shutdown.trigger();
                let _ = events.send(TransportEvent::DataSendFailed {
                    device: device.clone(),
                    app_handle,
                    message,
                    error,
                });
                return false;
            }
        }

        tokio::select! {
            _ = shutdown.triggered() => return true,
            _ = queue.wait_ready() => {}
        }
    }
}

/// Deliver whatever is still queued, best-effort, then give up on the first
/// error. Failures here are logged rather than reported: the connection is
/// already shutting down.
async fn final_drain(sink: &mut dyn FrameSink, queue: &OutboundQueue, device: &DeviceId) {
    for message in queue.drain() {
        if let Err(error) = sink.write_frame(message.payload).await {
            warn!(device = %device, %error, "dropping queued messages during shutdown");
            break;
        }
    }
}
