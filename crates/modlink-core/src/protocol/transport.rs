//! Seams between the engine and its external collaborators
//!
//! The serial driver, the event pin, the reset/wake pins, and the optional
//! diagnostic override are all reached through the traits in this module so
//! the engine can run against real hardware or the in-process simulator.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// UART configuration applied at start-up: 8 data bits, no parity, one stop
/// bit, no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Identifier of one of the two fixed receive buffer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    /// First slot; reception always restarts here.
    Zero,
    /// Second slot.
    One,
}

impl SlotId {
    /// The other slot.
    pub fn other(self) -> SlotId {
        match self {
            SlotId::Zero => SlotId::One,
            SlotId::One => SlotId::Zero,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            SlotId::Zero => 0,
            SlotId::One => 1,
        }
    }
}

/// Notifications delivered by the serial driver to the receive pipeline.
///
/// The handler runs in the driver's callback context and must stay
/// non-blocking; see [`crate::protocol::RxPipeline::handle_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent {
    /// An asynchronous transmission completed.
    TxDone,
    /// An asynchronous transmission was aborted by the driver.
    TxAborted,
    /// A span of the given slot now holds received bytes.
    RxReady {
        /// Slot that was filled.
        slot: SlotId,
        /// Offset of the span within the slot.
        offset: usize,
        /// Length of the span.
        len: usize,
    },
    /// The active buffer is exhausted and the driver needs the other slot.
    RxBufRequest,
    /// The driver no longer writes into the given slot.
    RxBufReleased(SlotId),
    /// Reception shut down; the pipeline re-arms it.
    RxDisabled,
    /// Driver-level receive fault with a driver-specific reason code.
    RxStopped(i32),
}

/// Asynchronous serial driver surface required by this crate.
///
/// Transmission and reception are both asynchronous: `start_transmit`
/// returns once the transfer is queued and completion arrives later as
/// [`SerialEvent::TxDone`]; received bytes arrive as [`SerialEvent::RxReady`]
/// spans. The engine never performs synchronous reads or writes itself.
pub trait SerialTransport: Send {
    /// Apply the UART configuration.
    fn configure(&mut self, config: &SerialConfig) -> Result<(), ProtocolError>;

    /// Queue `data` for asynchronous transmission.
    fn start_transmit(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// (Re-)enable reception with a bounded per-receive idle timeout.
    fn enable_receive(&mut self, idle_timeout: Duration) -> Result<(), ProtocolError>;
}

/// Timed synchronization signal for transmit completion.
///
/// Set by the receive pipeline when the driver reports
/// [`SerialEvent::TxDone`]; waited on by the blocking transmit primitive
/// with a fixed upper bound.
#[derive(Clone)]
pub struct TxDoneSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for TxDoneSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TxDoneSignal {
    /// Create an unsignaled instance.
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Mark the in-flight transmission as complete.
    pub fn set(&self) {
        let (flag, condvar) = &*self.inner;
        let mut done = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *done = true;
        condvar.notify_all();
    }

    /// Wait for the signal, consuming it. Returns `false` if `timeout`
    /// elapsed without the signal being set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut done = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*done {
            let (guard, result) = condvar
                .wait_timeout_while(done, timeout, |done| !*done)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            done = guard;
            if result.timed_out() && !*done {
                return false;
            }
        }
        *done = false;
        true
    }
}

/// Level read of the module's event-pending indicator pin.
///
/// No debouncing and no edge latching: the engine only offers the level
/// check, and the module itself clears the level once the pending events
/// have been retrieved with the event-check command.
pub trait EventInput: Send + Sync {
    /// Whether the event indicator is currently asserted.
    fn is_asserted(&self) -> bool;
}

/// Reset and wake output lines of the module.
///
/// Both lines are active-low at the pin; implementations translate
/// `asserted` to whatever polarity the wiring uses.
pub trait ControlLines: Send {
    /// Drive the reset line; `true` holds the module in reset.
    fn set_reset(&mut self, asserted: bool);

    /// Drive the wake line; `true` asserts the wake request.
    fn set_wake(&mut self, asserted: bool);
}

/// Optional interception hook for one reserved diagnostic command.
///
/// Given the full command string, the collaborator may supply a complete
/// canned response line (classified exactly like a wire response) instead of
/// hardware transmission, or decline by returning `None`.
pub trait DiagnosticOverride: Send {
    /// Intercept `command`, returning the canned response line if handled.
    fn intercept(&mut self, command: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_alternation() {
        assert_eq!(SlotId::Zero.other(), SlotId::One);
        assert_eq!(SlotId::One.other(), SlotId::Zero);
        assert_eq!(SlotId::Zero.other().other(), SlotId::Zero);
    }

    #[test]
    fn tx_done_signal_is_consumed_by_wait() {
        let signal = TxDoneSignal::new();
        signal.set();
        assert!(signal.wait(Duration::from_millis(1)));
        // Consumed: a second wait times out.
        assert!(!signal.wait(Duration::from_millis(1)));
    }

    #[test]
    fn tx_done_signal_times_out_when_never_set() {
        let signal = TxDoneSignal::new();
        let start = std::time::Instant::now();
        assert!(!signal.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn tx_done_signal_crosses_threads() {
        let signal = TxDoneSignal::new();
        let remote = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.set();
        });
        assert!(signal.wait(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn serial_config_default_baud() {
        assert_eq!(SerialConfig::default().baud_rate, DEFAULT_BAUD_RATE);
    }
}
