//! AT-style serial protocol engine
//!
//! Drives a serial-attached connectivity module over a single-line textual
//! command protocol. Commands are newline-terminated ASCII lines; the first
//! response line is classified as `OK`, `OK <text>`, `OK<digits>...`
//! (continuation count), or a failure carrying the verbatim line.
//!
//! One command/response exchange runs at a time under the engine's exchange
//! lock, which is also what keeps the passthrough bypass and the firmware
//! block transfer from interleaving with ordinary commands.

pub mod bypass;
pub mod engine;
mod error;
pub mod events;
pub mod line_reader;
pub mod pipeline;
pub mod serial;
pub mod transfer;
pub mod transport;

pub use bypass::{BypassControl, BypassSession};
pub use engine::{
    classify_response, CommandOutcome, ExchangeGuard, LinkConfig, LinkCounters, LinkState,
    ModuleLink,
};
pub use error::ProtocolError;
pub use events::{EventCode, EventLine};
pub use line_reader::LineReader;
pub use pipeline::RxPipeline;
pub use serial::{
    list_ports, open_link, open_port, spawn_reader, PortInfo, ReaderHandle, SerialPortTransport,
};
pub use transfer::TransferOptions;
pub use transport::{
    ControlLines, DiagnosticOverride, EventInput, SerialConfig, SerialEvent, SerialTransport,
    SlotId, TxDoneSignal,
};

use std::time::Duration;

/// Default baud rate for the module UART
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Length in bytes of each of the two driver receive slots
pub const RECV_SLOT_LEN: usize = 4096;

/// Capacity in bytes of the receive ring buffer
pub const RING_CAPACITY: usize = 4096;

/// Capacity of the reusable response line buffer. Twice a receive slot so a
/// line spanning a buffer swap still fits.
pub const RESPONSE_LINE_CAPACITY: usize = RECV_SLOT_LEN * 2;

/// Upper bound on waiting for a response line. No command takes longer than
/// this to complete per the module's documented command latency.
pub const RESPONSE_DEADLINE: Duration = Duration::from_secs(120);

/// Upper bound on waiting for the transmit-complete signal
pub const TRANSMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle timeout handed to the driver when (re)enabling reception
pub const RX_IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Park interval of the line reader while waiting for response bytes
pub const LINE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Module internal flash capacity; firmware images must not exceed it
pub const MODULE_FLASH_CAPACITY: u64 = 4 * 1024 * 1024;

/// Exit sentinel that, followed by a line terminator, deactivates bypass
pub const BYPASS_EXIT_SENTINEL: &str = "AT+EXIT";

/// Completion marker ending a firmware block transfer
pub const TRANSFER_COMPLETE_MARKER: &str = "OK COMPLETE";
