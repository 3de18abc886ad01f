//! In-process module simulator
//!
//! A scriptable stand-in for the real serial-attached module, wired directly
//! into the engine's transport seam. Everything runs synchronously in the
//! caller's thread: a transmitted command is parsed and its response lines
//! land in the receive ring before the transmit call returns, which keeps
//! tests and demos deterministic with no background threads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::protocol::pipeline::RxPipeline;
use crate::protocol::transport::{
    ControlLines, EventInput, SerialConfig, SerialEvent, SerialTransport, TxDoneSignal,
};
use crate::protocol::{LinkConfig, ModuleLink, ProtocolError, RECV_SLOT_LEN};

struct TransferState {
    total: u64,
    block_size: u64,
    received: u64,
}

struct SimInner {
    pipeline: Option<RxPipeline>,
    received: Vec<u8>,
    line: Vec<u8>,
    responses: HashMap<String, Vec<String>>,
    events: VecDeque<String>,
    transfer: Option<TransferState>,
    fail_block: Option<u64>,
    muted: bool,
    configured: Option<SerialConfig>,
    reset_count: u32,
    wake_count: u32,
    block_acks: u64,
    completions: u64,
    rng: StdRng,
}

/// Scriptable simulated module.
///
/// Cloning is cheap; all clones share the same module state.
#[derive(Clone)]
pub struct SimulatedModule {
    inner: Arc<Mutex<SimInner>>,
    event_pin: Arc<AtomicBool>,
    tx_done: TxDoneSignal,
}

impl Default for SimulatedModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModule {
    /// Create a simulator with an empty script.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimInner {
                pipeline: None,
                received: Vec::new(),
                line: Vec::new(),
                responses: HashMap::new(),
                events: VecDeque::new(),
                transfer: None,
                fail_block: None,
                muted: false,
                configured: None,
                reset_count: 0,
                wake_count: 0,
                block_acks: 0,
                completions: 0,
                rng: StdRng::from_entropy(),
            })),
            event_pin: Arc::new(AtomicBool::new(false)),
            tx_done: TxDoneSignal::new(),
        }
    }

    /// Build a fully wired link over this simulator: transport, receive
    /// pipeline, event pin, and control lines.
    pub fn connect(&self, config: LinkConfig) -> ModuleLink {
        let (mut link, pipeline) = ModuleLink::new(self.transport(), self.tx_done.clone(), config);
        self.lock().pipeline = Some(pipeline);
        link.set_event_input(self.event_input());
        link.set_control_lines(self.control_lines());
        link
    }

    /// The transmit-completion signal the simulator sets.
    pub fn tx_done(&self) -> TxDoneSignal {
        self.tx_done.clone()
    }

    /// Transport half for [`ModuleLink::new`].
    pub fn transport(&self) -> Box<dyn SerialTransport> {
        Box::new(SimTransport {
            shared: self.clone(),
        })
    }

    /// Event-pending pin for [`ModuleLink::set_event_input`].
    pub fn event_input(&self) -> Box<dyn EventInput> {
        Box::new(SimEventInput {
            pin: Arc::clone(&self.event_pin),
        })
    }

    /// Reset/wake lines for [`ModuleLink::set_control_lines`].
    pub fn control_lines(&self) -> Box<dyn ControlLines> {
        Box::new(SimControlLines {
            shared: self.clone(),
        })
    }

    /// Install the receive pipeline the simulator delivers bytes through.
    /// Unnecessary when the link was built with [`SimulatedModule::connect`].
    pub fn install_pipeline(&self, pipeline: RxPipeline) {
        self.lock().pipeline = Some(pipeline);
    }

    /// Script the response lines for one exact command (newline excluded).
    /// Scripted commands take precedence over the built-in responder.
    pub fn script_response(&self, command: &str, lines: &[&str]) {
        self.lock().responses.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Queue a pending event message (`<code> <parameter> ...`) and assert
    /// the event pin.
    pub fn push_event(&self, message: &str) {
        self.lock().events.push_back(message.to_string());
        self.event_pin.store(true, Ordering::SeqCst);
    }

    /// Deliver one unsolicited line (CRLF-terminated) from the module.
    pub fn inject_line(&self, line: &str) {
        let mut inner = self.lock();
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        inner.deliver(&bytes);
    }

    /// Deliver raw unsolicited bytes from the module.
    pub fn inject_bytes(&self, bytes: &[u8]) {
        self.lock().deliver(bytes);
    }

    /// Stop answering commands. Transmissions are still recorded.
    pub fn mute(&self, muted: bool) {
        self.lock().muted = muted;
    }

    /// Make the transfer responder reject the given 1-based block.
    pub fn fail_block(&self, block: u64) {
        self.lock().fail_block = Some(block);
    }

    /// All bytes the host has transmitted, in order.
    pub fn received(&self) -> Vec<u8> {
        self.lock().received.clone()
    }

    /// UART settings from the last configure call, if any.
    pub fn configured(&self) -> Option<SerialConfig> {
        self.lock().configured.clone()
    }

    /// Number of reset pulses seen.
    pub fn reset_count(&self) -> u32 {
        self.lock().reset_count
    }

    /// Number of wake pulses seen.
    pub fn wake_count(&self) -> u32 {
        self.lock().wake_count
    }

    /// Transfer blocks acknowledged so far.
    pub fn block_acks(&self) -> u64 {
        self.lock().block_acks
    }

    /// Completed transfers so far.
    pub fn completions(&self) -> u64 {
        self.lock().completions
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct SimTransport {
    shared: SimulatedModule,
}

impl SerialTransport for SimTransport {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), ProtocolError> {
        self.shared.lock().configured = Some(config.clone());
        Ok(())
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        {
            let mut inner = self.shared.lock();
            inner.received.extend_from_slice(data);
            inner.handle_host_bytes(data, &self.shared.event_pin);
        }
        self.shared.tx_done.set();
        Ok(())
    }

    fn enable_receive(&mut self, _idle_timeout: Duration) -> Result<(), ProtocolError> {
        Ok(())
    }
}

struct SimEventInput {
    pin: Arc<AtomicBool>,
}

impl EventInput for SimEventInput {
    fn is_asserted(&self) -> bool {
        self.pin.load(Ordering::SeqCst)
    }
}

struct SimControlLines {
    shared: SimulatedModule,
}

impl ControlLines for SimControlLines {
    fn set_reset(&mut self, asserted: bool) {
        if asserted {
            self.shared.lock().reset_count += 1;
        } else {
            // Releasing reset boots the module, which announces itself.
            self.shared.lock().events.push_back("2 0".to_string());
            self.shared.event_pin.store(true, Ordering::SeqCst);
        }
    }

    fn set_wake(&mut self, asserted: bool) {
        if asserted {
            self.shared.lock().wake_count += 1;
        }
    }
}

// Delivery never takes the pipeline's re-arm path, so a do-nothing transport
// satisfies it.
struct NullTransport;

impl SerialTransport for NullTransport {
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

impl SimInner {
    fn handle_host_bytes(&mut self, data: &[u8], pin: &AtomicBool) {
        if self.transfer.is_some() {
            self.handle_transfer_bytes(data.len() as u64);
            return;
        }
        for &byte in data {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.line).to_string();
                self.line.clear();
                let command = line.trim_end_matches('\r').to_string();
                self.handle_command(&command, pin);
            } else {
                self.line.push(byte);
            }
        }
    }

    fn handle_transfer_bytes(&mut self, len: u64) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        let before = transfer.received / transfer.block_size;
        transfer.received += len;
        let after = transfer.received / transfer.block_size;
        let total = transfer.total;
        let received = transfer.received;

        for block in (before + 1)..=after {
            if self.fail_block == Some(block) {
                self.transfer = None;
                self.respond("ERR18 FLASH WRITE FAILED");
                return;
            }
            self.block_acks += 1;
            self.respond("OK");
        }

        if received >= total {
            self.transfer = None;
            self.completions += 1;
            self.respond("OK COMPLETE");
        }
    }

    fn handle_command(&mut self, command: &str, pin: &AtomicBool) {
        debug!(command, "simulator received command");
        if self.muted {
            return;
        }

        if let Some(lines) = self.responses.get(command).cloned() {
            for line in lines {
                self.respond(&line);
            }
            return;
        }

        if command == "AT+EVENT?" {
            match self.events.pop_front() {
                Some(message) => {
                    if self.events.is_empty() {
                        pin.store(false, Ordering::SeqCst);
                    }
                    self.respond(&format!("OK {message}"));
                }
                None => self.respond("OK"),
            }
            return;
        }

        if let Some(args) = command.strip_prefix("AT+OTW ") {
            let mut parts = args.splitn(2, ',');
            let total = parts.next().and_then(|t| t.parse::<u64>().ok());
            let block_size = parts.next().and_then(|b| b.parse::<u64>().ok());
            match (total, block_size) {
                (Some(total), Some(block_size)) if total > 0 && block_size > 0 => {
                    self.transfer = Some(TransferState {
                        total,
                        block_size,
                        received: 0,
                    });
                    self.respond("OK");
                }
                _ => self.respond("ERR2 PARAMETER ERROR"),
            }
            return;
        }

        if command == "AT+CONF? Version" {
            self.respond("OK 2.4.4");
            return;
        }

        if command.starts_with("AT+DIAG WIFI SCAN") {
            let rssi_a = self.rng.gen_range(-90..=-30);
            let rssi_b = self.rng.gen_range(-90..=-30);
            self.respond("OK2 networks found");
            self.respond(&format!("HomeNet {rssi_a} 6"));
            self.respond(&format!("Workshop {rssi_b} 11"));
            return;
        }

        self.respond("ERR2 UNKNOWN COMMAND");
    }

    fn respond(&mut self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.deliver(&bytes);
    }

    fn deliver(&mut self, bytes: &[u8]) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            debug!("no pipeline installed, dropping simulated bytes");
            return;
        };
        let mut null = NullTransport;
        for chunk in bytes.chunks(RECV_SLOT_LEN) {
            let slot = pipeline.active_slot();
            pipeline.slot_mut(slot)[..chunk.len()].copy_from_slice(chunk);
            pipeline.handle_event(
                SerialEvent::RxReady {
                    slot,
                    offset: 0,
                    len: chunk.len(),
                },
                &mut null,
            );
            pipeline.handle_event(SerialEvent::RxBufRequest, &mut null);
        }
    }
}
