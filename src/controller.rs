//! Transport controller - routing between adapters and the upstream layer
//!
//! The controller owns the adapter registry and the device table, enforces
//! the one-connection-per-(device, app handle) invariant, and fans
//! connection events out to the upstream protocol layer in per-pair order.
//!
//! It is an explicitly constructed object: build it with the adapters you
//! need and pass it to the components that consume it. There is no global
//! instance.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::device::{AppHandle, Device, DeviceId, TransportKind};
use crate::error::{Result, TransportError};
use crate::event::{EventRx, EventTx, TransportEvent};
use crate::queue::ShutdownToken;
use crate::transport::TransportAdapter;

type PairKey = (DeviceId, AppHandle);

/// Connection slot for one pair
///
/// `Pending` reserves the pair while an adapter's connect pipeline runs, so
/// the invariant holds across concurrent `connect` calls. Its token marks
/// the attempt cancelled when a disconnect lands in the pending window.
enum Slot {
    Pending(ShutdownToken),
    Live(Arc<Connection>),
}

type ConnectionMap = Arc<Mutex<HashMap<PairKey, Slot>>>;

/// Orchestrates transport adapters and routes lifecycle events
pub struct TransportController {
    adapters: HashMap<TransportKind, Arc<dyn TransportAdapter>>,
    devices: RwLock<HashMap<DeviceId, Device>>,
    connections: ConnectionMap,
    events: EventTx,
}

impl TransportController {
    /// Build a controller over the given adapters
    ///
    /// Returns the controller and the upstream event receiver. Events for
    /// one pair arrive in the order the underlying connection produced
    /// them; no ordering holds across pairs.
    pub fn new(adapters: Vec<Arc<dyn TransportAdapter>>) -> (Self, EventRx) {
        let adapters: HashMap<_, _> = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();

        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();

        tokio::spawn(route_events(internal_rx, upstream_tx, connections.clone()));

        (
            Self {
                adapters,
                devices: RwLock::new(HashMap::new()),
                connections,
                events: internal_tx,
            },
            upstream_rx,
        )
    }

    /// Probe one medium for devices, recording what it finds
    pub async fn scan(&self, kind: TransportKind) -> Result<Vec<Device>> {
        let adapter = self
            .adapters
            .get(&kind)
            .ok_or_else(|| TransportError::Discovery {
                kind,
                detail: "no adapter registered".to_string(),
            })?;
        let found = adapter.scan_devices().await?;
        let mut devices = self.devices.write();
        for device in &found {
            devices.insert(device.id.clone(), device.clone());
        }
        info!(%kind, count = found.len(), "device scan complete");
        Ok(found)
    }

    /// Record a device supplied by the configuration collaborator
    pub fn register_device(&self, device: Device) {
        debug!(device = %device.id, kind = %device.kind, locator = %device.locator, "device registered");
        self.devices.write().insert(device.id.clone(), device);
    }

    /// Forget a device that is no longer reachable
    pub fn remove_device(&self, device: &DeviceId) {
        self.devices.write().remove(device);
    }

    /// Look up a device by id
    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().get(id).cloned()
    }

    /// Establish a connection for the (device, app handle) pair
    ///
    /// Completion is signaled by `ConnectDone`; a failure before the
    /// connection comes up is reported exactly once, as the returned error.
    /// If the pair is disconnected, or the connection aborts, while
    /// establishment is still in flight, the attempt is torn down on
    /// completion and the pair is free again.
    pub async fn connect(&self, device_id: &DeviceId, app_handle: AppHandle) -> Result<()> {
        let device = self
            .device(device_id)
            .ok_or_else(|| TransportError::UnknownDevice {
                device: device_id.clone(),
            })?;
        let adapter =
            self.adapters
                .get(&device.kind)
                .ok_or_else(|| TransportError::UnknownDevice {
                    device: device_id.clone(),
                })?;

        let key: PairKey = (device_id.clone(), app_handle);
        let cancel = ShutdownToken::new();
        {
            let mut connections = self.connections.lock();
            if connections.contains_key(&key) {
                return Err(TransportError::DuplicateConnection {
                    device: device_id.clone(),
                    app_handle,
                });
            }
            connections.insert(key.clone(), Slot::Pending(cancel.clone()));
        }

        match adapter.connect(&device, app_handle, self.events.clone()).await {
            Ok(connection) => {
                let promoted = {
                    let mut connections = self.connections.lock();
                    let keep = matches!(
                        connections.get(&key),
                        Some(Slot::Pending(token)) if !token.is_triggered()
                    );
                    if keep {
                        connections.insert(key, Slot::Live(connection.clone()));
                    } else {
                        // Cancelled by a disconnect, or reaped by the router
                        // on an abort that raced establishment
                        connections.remove(&key);
                    }
                    keep
                };
                if !promoted {
                    connection.shutdown().await;
                }
                Ok(())
            }
            Err(e) => {
                self.connections.lock().remove(&key);
                Err(e)
            }
        }
    }

    /// Enqueue outbound bytes for the pair's connection
    ///
    /// Returns once the message is queued (not sent); a transmission
    /// failure surfaces later as `DataSendFailed`.
    pub fn send_data(
        &self,
        device_id: &DeviceId,
        app_handle: AppHandle,
        payload: Bytes,
    ) -> Result<()> {
        let connections = self.connections.lock();
        match connections.get(&(device_id.clone(), app_handle)) {
            Some(Slot::Live(connection)) => {
                connection.send(payload);
                Ok(())
            }
            _ => Err(TransportError::NoSuchConnection {
                device: device_id.clone(),
                app_handle,
            }),
        }
    }

    /// Tear down the pair's connection; absent connection is a no-op
    ///
    /// A pair whose connect is still in flight is marked cancelled; the
    /// attempt keeps its slot reservation and is torn down as soon as
    /// establishment completes.
    pub async fn disconnect(&self, device_id: &DeviceId, app_handle: AppHandle) {
        let key: PairKey = (device_id.clone(), app_handle);
        let connection = {
            let mut connections = self.connections.lock();
            match connections.remove(&key) {
                Some(Slot::Live(connection)) => Some(connection),
                Some(Slot::Pending(cancel)) => {
                    // The attempt owns its reservation until it completes
                    cancel.trigger();
                    connections.insert(key.clone(), Slot::Pending(cancel));
                    None
                }
                None => None,
            }
        };
        if let Some(connection) = connection {
            connection.shutdown().await;
            info!(device = %device_id, app_handle = %app_handle, "disconnected");
        }
    }

    /// Tear down every live connection
    pub async fn shutdown_all(&self) {
        let live: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            connections
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Live(connection) => Some(connection),
                    Slot::Pending(cancel) => {
                        cancel.trigger();
                        None
                    }
                })
                .collect()
        };
        for connection in live {
            connection.shutdown().await;
        }
    }
}

/// Forward connection events upstream and reap dead connections
///
/// Every error is terminal for its connection, so a `ConnectionAborted` or
/// `DataSendFailed` removes the pair's slot and finishes the teardown the
/// connection already started.
async fn route_events(
    mut internal_rx: mpsc::UnboundedReceiver<TransportEvent>,
    upstream_tx: mpsc::UnboundedSender<TransportEvent>,
    connections: ConnectionMap,
) {
    while let Some(event) = internal_rx.recv().await {
        if matches!(
            event,
            TransportEvent::ConnectionAborted { .. } | TransportEvent::DataSendFailed { .. }
        ) {
            let (device, app_handle) = event.pair();
            let key: PairKey = (device.clone(), app_handle);
            let slot = connections.lock().remove(&key);
            if let Some(Slot::Live(connection)) = slot {
                // Join the connection's tasks off the router so event
                // forwarding stays prompt
                tokio::spawn(async move { connection.shutdown().await });
            }
        }

        if upstream_tx.send(event).is_err() {
            warn!("upstream event receiver dropped, stopping event routing");
            break;
        }
    }
}
