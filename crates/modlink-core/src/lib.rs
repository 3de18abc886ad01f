//! # modlink Core Library
//!
//! Core functionality for driving serial-attached IoT connectivity modules
//! that speak a textual AT-style protocol.
//!
//! This library provides:
//! - A double-buffered receive pipeline fed by an asynchronous serial driver
//! - Deadline-bounded response line assembly
//! - A serialized command/response engine with response classification
//! - Out-of-band event pin monitoring and event line parsing
//! - Chunked firmware block transfer (OTW) with progress feedback
//! - A raw UART passthrough (bypass) mode
//!
//! ## Example
//!
//! ```rust,ignore
//! use modlink_core::protocol::{serial, LinkConfig};
//!
//! let (link, _reader) = serial::open_link("/dev/ttyUSB0", LinkConfig::default())?;
//! link.start()?;
//!
//! let outcome = link.send_command("AT+CONF? Version\n")?;
//! println!("module firmware: {:?}", outcome.message());
//! ```
//!
//! For development without hardware, [`sim::SimulatedModule`] stands in for
//! the physical module behind the same transport seam.

#![warn(missing_docs)]

pub mod protocol;
pub mod ring;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        BypassControl, BypassSession, CommandOutcome, EventCode, EventLine, ExchangeGuard,
        LinkConfig, LinkState, ModuleLink, ProtocolError, TransferOptions,
    };
    pub use crate::ring::{RingBuffer, RingConsumer, RingProducer};
    pub use crate::sim::SimulatedModule;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
