//! Device identity and addressing
//!
//! A `Device` is the identity/metadata record for a discoverable endpoint.
//! It is immutable once discovered; connections reference it by `DeviceId`
//! and never own it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a discoverable endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque handle for a logical application session multiplexed over a device
///
/// Pairs with a `DeviceId` to address a unique connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppHandle(pub u32);

impl fmt::Display for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical medium a device is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Bluetooth,
    Tcp,
    Usb,
    CloudWebsocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth => write!(f, "bluetooth"),
            Self::Tcp => write!(f, "tcp"),
            Self::Usb => write!(f, "usb"),
            Self::CloudWebsocket => write!(f, "cloud-websocket"),
        }
    }
}

/// Identity/metadata for a discoverable endpoint
///
/// `locator` is the medium-specific address: `host:port` for tcp and cloud
/// devices, the port name (`/dev/ttyACM0`, `COM3`) for usb devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub locator: String,
    pub kind: TransportKind,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        locator: impl Into<String>,
        kind: TransportKind,
    ) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.into(),
            locator: locator.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("cloud-app-42");
        assert_eq!(id.to_string(), "cloud-app-42");
        assert_eq!(id.as_str(), "cloud-app-42");
    }

    #[test]
    fn test_transport_kind_serde_names() {
        let kind: TransportKind = toml::from_str::<toml::Value>("v = \"cloud_websocket\"")
            .unwrap()
            .get("v")
            .unwrap()
            .clone()
            .try_into()
            .unwrap();
        assert_eq!(kind, TransportKind::CloudWebsocket);
    }

    #[test]
    fn test_pair_is_hashable_key() {
        use std::collections::HashMap;
        let mut map: HashMap<(DeviceId, AppHandle), &str> = HashMap::new();
        map.insert((DeviceId::new("d1"), AppHandle(1)), "conn");
        assert!(map.contains_key(&(DeviceId::new("d1"), AppHandle(1))));
        assert!(!map.contains_key(&(DeviceId::new("d1"), AppHandle(2))));
    }
}
