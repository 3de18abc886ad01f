//! Serial port handling
//!
//! Host-side serial access: port enumeration with deterministic ordering,
//! the [`SerialTransport`] implementation over a real port, and the reader
//! thread that feeds received bytes into the [`RxPipeline`].

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::engine::{LinkConfig, ModuleLink};
use super::pipeline::RxPipeline;
use super::transport::{SerialConfig, SerialEvent, SerialTransport, TxDoneSignal};
use super::{ProtocolError, DEFAULT_BAUD_RATE, RECV_SLOT_LEN};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    // Collect from serialport API
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
    {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: Add /dev/ttyACM* and /dev/ttyUSB* entries if present but not found by API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        manufacturer: None,
                        product: None,
                        serial_number: None,
                    });
                }
            }
        }
    }

    // Collect and sort deterministically
    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port with default settings
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    // Short timeout (100ms) keeps the reader thread responsive to shutdown
    serialport::new(name, baud)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}

/// Configure a serial port for module communication (8N1, no flow control)
pub fn configure_port(port: &mut dyn SerialPort, config: &SerialConfig) -> Result<(), ProtocolError> {
    port.set_baud_rate(config.baud_rate)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

/// [`SerialTransport`] over a real host serial port.
///
/// `start_transmit` writes synchronously into the kernel buffer and sets the
/// completion signal itself; on a host there is no transmit interrupt to
/// wait for.
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
    tx_done: TxDoneSignal,
}

impl SerialPortTransport {
    /// Wrap an already-open port.
    pub fn new(port: Box<dyn SerialPort>, tx_done: TxDoneSignal) -> Self {
        Self { port, tx_done }
    }
}

impl SerialTransport for SerialPortTransport {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), ProtocolError> {
        configure_port(self.port.as_mut(), config)
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(data)?;
        if let Err(err) = self.port.flush() {
            debug!(%err, "flush after write failed");
        }
        self.tx_done.set();
        Ok(())
    }

    fn enable_receive(&mut self, _idle_timeout: Duration) -> Result<(), ProtocolError> {
        // A host port receives continuously once open.
        Ok(())
    }
}

// The reader thread has no occasion to reconfigure or retransmit; it only
// needs a transport to satisfy the pipeline's re-arm path, which a host port
// never takes.
struct InertTransport;

impl SerialTransport for InertTransport {
    fn configure(&mut self, _config: &SerialConfig) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn start_transmit(&mut self, _data: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn enable_receive(&mut self, _idle_timeout: Duration) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Handle over the background reader thread.
pub struct ReaderHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the reader thread: polls the port and feeds each read into
/// `pipeline` as a receive-ready event, swapping slots after every read.
pub fn spawn_reader(port: Box<dyn SerialPort>, mut pipeline: RxPipeline) -> ReaderHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = {
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("modlink-reader".to_string())
            .spawn(move || reader_loop(port, &mut pipeline, &shutdown))
            .expect("failed to spawn reader thread")
    };
    ReaderHandle {
        shutdown,
        thread: Some(handle),
    }
}

fn reader_loop(mut port: Box<dyn SerialPort>, pipeline: &mut RxPipeline, shutdown: &AtomicBool) {
    let mut inert = InertTransport;
    while !shutdown.load(Ordering::Relaxed) {
        let pending = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(err) => {
                warn!(%err, "serial port unreadable, stopping reader");
                break;
            }
        };
        if pending == 0 {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        let slot = pipeline.active_slot();
        let want = pending.min(RECV_SLOT_LEN);
        let len = {
            let buf = pipeline.slot_mut(slot);
            match port.read(&mut buf[..want]) {
                Ok(len) => len,
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(err) => {
                    warn!(%err, "serial read failed, stopping reader");
                    break;
                }
            }
        };
        if len == 0 {
            continue;
        }

        pipeline.handle_event(
            SerialEvent::RxReady {
                slot,
                offset: 0,
                len,
            },
            &mut inert,
        );
        pipeline.handle_event(SerialEvent::RxBufRequest, &mut inert);
    }
    debug!("reader thread exiting");
}

/// Open `port_name` and assemble a ready-to-start link plus its reader
/// thread.
pub fn open_link(
    port_name: &str,
    config: LinkConfig,
) -> Result<(ModuleLink, ReaderHandle), ProtocolError> {
    let port = open_port(port_name, Some(config.serial.baud_rate))?;
    let reader_port = port
        .try_clone()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    let tx_done = TxDoneSignal::new();
    let transport = Box::new(SerialPortTransport::new(port, tx_done.clone()));
    let (link, pipeline) = ModuleLink::new(transport, tx_done, config);
    let reader = spawn_reader(reader_port, pipeline);
    Ok((link, reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo {
                name: n.to_string(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            })
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
    }
}
