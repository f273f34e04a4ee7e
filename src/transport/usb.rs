//! USB transport adapter (CDC serial)
//!
//! USB devices expose a CDC serial port and have no native asynchronous
//! primitive, so this adapter uses blocking threads per connection:
//! - Reader thread: reads from the port, forwards chunks to the read loop
//! - Writer thread: receives from the writer loop, writes to the port
//!
//! Both threads observe the connection's shutdown token and exit when it
//! triggers, when the port disconnects, or when their channel peer closes.

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serialport::{SerialPortInfo, SerialPortType};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::UsbDeviceFilter;
use crate::connection::{Connection, ConnectionState, StateCell};
use crate::constants::{
    CHANNEL_CAPACITY, READ_BUFFER_SIZE, USB_CDC_BAUD, USB_DISCONNECT_THRESHOLD, USB_READ_TIMEOUT,
};
use crate::device::{AppHandle, Device, TransportKind};
use crate::error::{Result, TransportError};
use crate::event::EventTx;
use crate::queue::ShutdownToken;
use crate::transport::{FrameSink, FrameSource, TransportAdapter};

/// USB CDC adapter
///
/// Scans available serial ports for devices matching the configured
/// VID/PID filter; the port name is the device locator.
pub struct UsbAdapter {
    filter: UsbDeviceFilter,
}

impl UsbAdapter {
    pub fn new(filter: UsbDeviceFilter) -> Self {
        Self { filter }
    }

    fn open(port_name: &str) -> Result<Box<dyn serialport::SerialPort>> {
        // Baud rate is ignored for USB CDC - uses native USB speed
        serialport::new(port_name, USB_CDC_BAUD)
            .timeout(USB_READ_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Connect {
                endpoint: port_name.to_string(),
                source: std::io::Error::other(e.to_string()),
            })
    }
}

/// Check if a serial port matches the device filter
fn matches_filter(port: &SerialPortInfo, filter: &UsbDeviceFilter) -> bool {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            usb.vid == filter.vid && filter.pid_list.contains(&usb.pid)
        }
        _ => filter
            .name_hint
            .as_deref()
            .map(|hint| port.port_name.contains(hint))
            .unwrap_or(false),
    }
}

#[async_trait]
impl TransportAdapter for UsbAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    async fn scan_devices(&self) -> Result<Vec<Device>> {
        let ports = serialport::available_ports().map_err(|e| TransportError::Discovery {
            kind: TransportKind::Usb,
            detail: e.to_string(),
        })?;

        let mut devices: Vec<Device> = Vec::new();
        for port in ports.iter().filter(|p| matches_filter(p, &self.filter)) {
            // Duplicate port names collapse to one device
            if devices.iter().any(|d| d.locator == port.port_name) {
                continue;
            }
            devices.push(Device::new(
                format!("usb:{}", port.port_name),
                self.filter.name.clone(),
                port.port_name.clone(),
                TransportKind::Usb,
            ));
        }
        debug!(count = devices.len(), "usb scan complete");
        Ok(devices)
    }

    async fn connect(
        &self,
        device: &Device,
        app_handle: AppHandle,
        events: EventTx,
    ) -> Result<Arc<Connection>> {
        let state = Arc::new(StateCell::new());
        state.set(ConnectionState::MediumConnecting);

        let port_read = match Self::open(&device.locator) {
            Ok(port) => port,
            Err(e) => {
                state.set(ConnectionState::Aborted);
                return Err(e);
            }
        };
        let port_write = match port_read.try_clone() {
            Ok(port) => port,
            Err(e) => {
                state.set(ConnectionState::Aborted);
                return Err(TransportError::Connect {
                    endpoint: device.locator.clone(),
                    source: std::io::Error::other(e.to_string()),
                });
            }
        };

        info!(device = %device.id, port = %device.locator, "usb port opened");

        let shutdown = ShutdownToken::new();
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        spawn_reader_thread(port_read, in_tx, shutdown.clone());
        spawn_writer_thread(port_write, out_rx, shutdown.clone());

        Ok(Connection::spawn(
            device.id.clone(),
            app_handle,
            state,
            Box::new(UsbSink { tx: Some(out_tx) }),
            Box::new(UsbSource { rx: in_rx }),
            events,
            shutdown,
        ))
    }
}

fn spawn_reader_thread(
    mut port: Box<dyn serialport::SerialPort>,
    in_tx: mpsc::Sender<Bytes>,
    shutdown: ShutdownToken,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut consecutive_errors = 0u32;

        while !shutdown.is_triggered() {
            match port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    consecutive_errors = 0;
                    if in_tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        // Source dropped, connection is gone
                        break;
                    }
                }
                Ok(_) => {
                    // Zero bytes read - could be normal or port gone
                    consecutive_errors += 1;
                    if consecutive_errors > USB_DISCONNECT_THRESHOLD {
                        warn!("usb port stopped responding");
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    consecutive_errors = 0;
                }
                Err(_) => {
                    // Port disconnected
                    break;
                }
            }
        }
        // Dropping in_tx closes the source, which aborts the read loop
    });
}

fn spawn_writer_thread(
    mut port: Box<dyn serialport::SerialPort>,
    mut out_rx: mpsc::Receiver<Bytes>,
    shutdown: ShutdownToken,
) {
    std::thread::spawn(move || {
        loop {
            if shutdown.is_triggered() {
                break;
            }
            match out_rx.blocking_recv() {
                Some(data) => {
                    if port.write_all(&data).is_err() {
                        // Port disconnected; the sink sees the closed channel
                        break;
                    }
                }
                None => break,
            }
        }
    });
}

/// Write half bridging the async writer loop to the blocking writer thread
struct UsbSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl FrameSink for UsbSink {
    async fn write_frame(&mut self, payload: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Write {
            detail: "port already closed".to_string(),
        })?;
        tx.send(payload).await.map_err(|_| TransportError::Write {
            detail: "usb writer thread stopped".to_string(),
        })
    }

    async fn close(&mut self) {
        // Dropping the sender lets the writer thread exit its recv
        self.tx.take();
    }
}

/// Read half fed by the blocking reader thread
struct UsbSource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl FrameSource for UsbSource {
    async fn read_frame(&mut self) -> Result<Bytes> {
        self.rx.recv().await.ok_or(TransportError::Read {
            detail: "usb port disconnected".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> UsbDeviceFilter {
        UsbDeviceFilter {
            name: "Head Unit Dev Board".to_string(),
            vid: 0x16c0,
            pid_list: vec![0x0483, 0x048b],
            name_hint: Some("ttyACM".to_string()),
        }
    }

    fn usb_port(name: &str, vid: u16, pid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    #[test]
    fn test_filter_matches_vid_pid() {
        assert!(matches_filter(
            &usb_port("/dev/ttyACM0", 0x16c0, 0x0483),
            &filter()
        ));
        assert!(!matches_filter(
            &usb_port("/dev/ttyACM0", 0x16c0, 0x9999),
            &filter()
        ));
        assert!(!matches_filter(
            &usb_port("/dev/ttyACM0", 0xdead, 0x0483),
            &filter()
        ));
    }

    #[test]
    fn test_filter_name_hint_fallback() {
        let port = SerialPortInfo {
            port_name: "/dev/ttyACM3".to_string(),
            port_type: SerialPortType::Unknown,
        };
        assert!(matches_filter(&port, &filter()));

        let mut no_hint = filter();
        no_hint.name_hint = None;
        assert!(!matches_filter(&port, &no_hint));
    }

    #[tokio::test]
    async fn test_sink_reports_write_error_after_close() {
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        drop(rx);
        let mut sink = UsbSink { tx: Some(tx) };

        let err = sink.write_frame(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, TransportError::Write { .. }));

        sink.close().await;
        let err = sink.write_frame(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, TransportError::Write { .. }));
    }

    #[tokio::test]
    async fn test_source_end_is_read_error() {
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        drop(tx);
        let mut source = UsbSource { rx };
        let err = source.read_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::Read { .. }));
    }
}
