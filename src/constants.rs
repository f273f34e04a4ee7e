//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

use std::time::Duration;

// =============================================================================
// Cloud transport
// =============================================================================

/// WebSocket resource path used for the cloud session upgrade
pub const WEBSOCKET_PATH: &str = "/";

/// Default bound for the resolution stage
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for the TCP connect stage
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for each handshake stage (TLS, protocol upgrade)
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Buffers
// =============================================================================

/// Read buffer size for raw stream transports
pub const READ_BUFFER_SIZE: usize = 4096;

/// Channel capacity for async message passing
pub const CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// USB serial
// =============================================================================

/// Nominal baud rate for USB CDC ports (ignored by CDC, required by the API)
pub const USB_CDC_BAUD: u32 = 115200;

/// Blocking read timeout on the USB serial port
pub const USB_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Consecutive zero-byte reads before assuming the port disconnected
pub const USB_DISCONNECT_THRESHOLD: u32 = 10;
