//! Configuration for transport adapters
//!
//! Cloud connection properties are supplied per device by an external
//! configuration collaborator (policy layer) before `connect`, either
//! programmatically through `CloudConfigStore::set` or from a TOML file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_RESOLVE_TIMEOUT,
};
use crate::device::DeviceId;
use crate::error::{Result, TransportError};

// =============================================================================
// Cloud Transport Configuration
// =============================================================================

/// Security mode for a cloud connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSecurity {
    /// Plain WebSocket (`ws://`)
    #[default]
    Plain,
    /// TLS WebSocket (`wss://`) with a supplied trust anchor
    Secure,
}

/// Per-device cloud endpoint properties
///
/// Immutable for the duration of one connection attempt. `auth_token` and
/// `hybrid_app_preference` are carried for the upstream policy layer and
/// are not consumed at the transport boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudTransportProperties {
    /// Endpoint host (name or IP literal)
    pub host: String,
    /// Endpoint port
    pub port: u16,
    /// Plain or secure transport
    #[serde(default)]
    pub security: TransportSecurity,
    /// PEM-encoded trust anchor; required when `security` is `Secure`
    #[serde(default)]
    pub certificate: Option<String>,
    /// Application auth token (opaque at this layer)
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Hybrid app preference (opaque at this layer)
    #[serde(default)]
    pub hybrid_app_preference: Option<String>,
}

impl CloudTransportProperties {
    /// `host:port` endpoint string for logging and error reporting
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the property set for a connection attempt
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(TransportError::Config {
                field: "host",
                reason: "empty host".to_string(),
            });
        }
        if self.port == 0 {
            return Err(TransportError::Config {
                field: "port",
                reason: "port must be non-zero".to_string(),
            });
        }
        if self.security == TransportSecurity::Secure && self.certificate.is_none() {
            return Err(TransportError::Config {
                field: "certificate",
                reason: "secure transport requires a PEM trust anchor".to_string(),
            });
        }
        Ok(())
    }
}

/// Wrapper for the cloud properties file format
///
/// ```toml
/// [devices.cloud-app-1]
/// host = "cloud.example"
/// port = 443
/// security = "secure"
/// certificate = "-----BEGIN CERTIFICATE-----..."
/// ```
#[derive(Debug, Deserialize)]
struct CloudConfigFile {
    devices: HashMap<DeviceId, CloudTransportProperties>,
}

/// Thread-safe lookup of cloud properties by device id
///
/// Populated by the configuration collaborator; read by the cloud adapter
/// at the start of each connection attempt.
#[derive(Default)]
pub struct CloudConfigStore {
    inner: RwLock<HashMap<DeviceId, CloudTransportProperties>>,
}

impl CloudConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the properties for a device
    pub fn set(&self, device: DeviceId, properties: CloudTransportProperties) {
        self.inner.write().insert(device, properties);
    }

    /// Properties for a device, if configured
    pub fn get(&self, device: &DeviceId) -> Option<CloudTransportProperties> {
        self.inner.read().get(device).cloned()
    }

    pub fn remove(&self, device: &DeviceId) {
        self.inner.write().remove(device);
    }

    /// Snapshot of every configured (device, properties) entry
    pub fn entries(&self) -> Vec<(DeviceId, CloudTransportProperties)> {
        self.inner
            .read()
            .iter()
            .map(|(id, props)| (id.clone(), props.clone()))
            .collect()
    }

    /// Load device properties from a TOML file, merging into the store
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path).map_err(|e| TransportError::Config {
            field: "cloud config file",
            reason: format!("{}: {}", path.display(), e),
        })?;
        let file: CloudConfigFile = toml::from_str(&text).map_err(|e| TransportError::Config {
            field: "cloud config file",
            reason: e.to_string(),
        })?;
        let count = file.devices.len();
        let mut inner = self.inner.write();
        for (device, properties) in file.devices {
            inner.insert(device, properties);
        }
        Ok(count)
    }
}

// =============================================================================
// Connection Timeouts
// =============================================================================

/// Caller-supplied bounds for the connect pipeline stages
///
/// Expiry of a stage bound is treated identically to that stage failing.
#[derive(Debug, Clone, Copy)]
pub struct ConnectTimeouts {
    pub resolve: Duration,
    pub connect: Duration,
    pub handshake: Duration,
}

impl Default for ConnectTimeouts {
    fn default() -> Self {
        Self {
            resolve: DEFAULT_RESOLVE_TIMEOUT,
            connect: DEFAULT_CONNECT_TIMEOUT,
            handshake: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

// =============================================================================
// USB Device Filter
// =============================================================================

/// USB device detection configuration
///
/// Devices are matched by VID plus any accepted PID; when port metadata is
/// unavailable the port name hint is used as a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbDeviceFilter {
    /// Display name for matched devices
    pub name: String,
    /// USB Vendor ID
    pub vid: u16,
    /// List of accepted USB Product IDs
    pub pid_list: Vec<u16>,
    /// Port name pattern fallback (e.g., "ttyACM", "usbmodem", "COM")
    #[serde(default)]
    pub name_hint: Option<String>,
}
