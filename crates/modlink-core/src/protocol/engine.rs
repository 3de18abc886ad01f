//! Command/response engine
//!
//! Serializes one logical command+response exchange at a time under the
//! exchange lock, classifies the first response line, and exposes the
//! synchronous API used by all higher layers. Continuation lines, the
//! firmware block transfer, and the passthrough bypass all run on the same
//! lock so nothing interleaves on the wire.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::line_reader::LineReader;
use super::pipeline::RxPipeline;
use super::transport::{
    ControlLines, DiagnosticOverride, EventInput, SerialTransport, TxDoneSignal,
};
use super::{ProtocolError, RESPONSE_DEADLINE, RING_CAPACITY, RX_IDLE_TIMEOUT, TRANSMIT_TIMEOUT};
use crate::ring::RingBuffer;

/// The event-check command; its response carries the oldest pending event.
pub const EVENT_QUERY: &str = "AT+EVENT?\n";

/// Diagnostic command eligible for interception by an override collaborator.
pub const INTERCEPT_COMMAND: &str = "AT+DIAG WIFI SCAN";

/// Marker argument that redirects [`INTERCEPT_COMMAND`] to the override.
pub const INTERCEPT_MARKER: &str = " simulated ";

/// Link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// UART settings applied at start-up.
    pub serial: super::transport::SerialConfig,
    /// Upper bound on waiting for a response line.
    pub response_deadline: Duration,
    /// Upper bound on waiting for the transmit-complete signal.
    pub transmit_timeout: Duration,
    /// Per-receive idle timeout handed to the driver.
    pub rx_idle_timeout: Duration,
    /// How long the reset line is held asserted.
    pub reset_pulse: Duration,
    /// Boot settle time after releasing reset.
    pub boot_settle: Duration,
    /// How long the wake line is held asserted.
    pub wake_pulse: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            serial: super::transport::SerialConfig::default(),
            response_deadline: RESPONSE_DEADLINE,
            transmit_timeout: TRANSMIT_TIMEOUT,
            rx_idle_timeout: RX_IDLE_TIMEOUT,
            reset_pulse: Duration::from_millis(50),
            boot_settle: Duration::from_millis(2500),
            wake_pulse: Duration::from_millis(50),
        }
    }
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Not started yet
    Idle,
    /// Start-up sequence in progress
    Starting,
    /// Started and ready for commands
    Ready,
    /// Start-up failed
    Error,
}

/// Cumulative wire metrics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    /// Bytes handed to the transmit primitive.
    pub tx_bytes: u64,
    /// Bytes of assembled response lines (terminators excluded).
    pub rx_bytes: u64,
    /// Commands issued (including intercepted ones).
    pub commands: u64,
    /// Response lines assembled.
    pub rx_lines: u64,
}

/// Classified result of one command exchange.
///
/// Derived purely from the first response line's prefix; the engine never
/// interprets the payload beyond this classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Bare `OK` or `OK <text>`; carries the text (possibly empty).
    Success(String),
    /// `OK<digits>...`: success announcing additional response lines.
    SuccessWithContinuation {
        /// Number of continuation lines the caller may retrieve.
        count: usize,
        /// Remainder of the first line after the digits, verbatim.
        message: String,
    },
    /// Any other line; carries it verbatim.
    Failure(String),
    /// No line arrived before the response deadline.
    Timeout,
}

impl CommandOutcome {
    /// Whether the module acknowledged the command.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CommandOutcome::Success(_) | CommandOutcome::SuccessWithContinuation { .. }
        )
    }

    /// The carried message, if any. `Timeout` has none.
    pub fn message(&self) -> Option<&str> {
        match self {
            CommandOutcome::Success(message) => Some(message),
            CommandOutcome::SuccessWithContinuation { message, .. } => Some(message),
            CommandOutcome::Failure(message) => Some(message),
            CommandOutcome::Timeout => None,
        }
    }

    /// Announced continuation line count (zero unless announced).
    pub fn continuation_count(&self) -> usize {
        match self {
            CommandOutcome::SuccessWithContinuation { count, .. } => *count,
            _ => 0,
        }
    }
}

/// Classify the first response line of an exchange.
///
/// The continuation count takes all leading digits after `OK`; the message
/// is everything after them, leading whitespace preserved. The count is not
/// bounded here; callers retrieve exactly that many lines.
pub fn classify_response(line: &str) -> CommandOutcome {
    if line == "OK" {
        return CommandOutcome::Success(String::new());
    }
    if let Some(rest) = line.strip_prefix("OK ") {
        return CommandOutcome::Success(rest.to_string());
    }
    if let Some(rest) = line.strip_prefix("OK") {
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let count = match rest[..digits_end].parse() {
                Ok(count) => count,
                Err(err) => {
                    warn!(%err, line, "unparseable continuation count");
                    0
                }
            };
            return CommandOutcome::SuccessWithContinuation {
                count,
                message: rest[digits_end..].to_string(),
            };
        }
    }
    CommandOutcome::Failure(line.to_string())
}

// Never hand oversized payloads to the logging subsystem in full.
const MAX_LOGGED_COMMAND: usize = 128;
const MAX_LOGGED_RESPONSE: usize = 62;
const ALWAYS_LOGGED_PREFIX: &str = "AT+CONF? ";

// Configuration reads are short and always worth logging whole; anything
// else is elided once it reaches the response threshold.
fn response_logged_in_full(command: &str, line: &str) -> bool {
    command.starts_with(ALWAYS_LOGGED_PREFIX) || line.len() < MAX_LOGGED_RESPONSE
}

fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Everything owned by one wire exchange: the transport's write side, the
/// line reader, and the optional collaborators. Lives behind the exchange
/// lock inside [`ModuleLink`].
pub(crate) struct Exchange {
    pub(crate) transport: Box<dyn SerialTransport>,
    pub(crate) reader: LineReader,
    pub(crate) tx_done: TxDoneSignal,
    pub(crate) config: LinkConfig,
    pub(crate) control: Option<Box<dyn ControlLines>>,
    pub(crate) diag_override: Option<Box<dyn DiagnosticOverride>>,
    pub(crate) counters: LinkCounters,
}

impl Exchange {
    pub(crate) fn send_command(&mut self, command: &str) -> Result<CommandOutcome, ProtocolError> {
        if !command.ends_with('\n') {
            // The protocol requires newline termination; stay tolerant and
            // transmit as-is.
            warn!("command missing trailing newline");
        }

        let shown = command.trim_end_matches(['\r', '\n']);
        if shown.len() <= MAX_LOGGED_COMMAND {
            info!("> {shown}");
        } else {
            info!(
                "> {} [... command too long ...]",
                truncate_for_log(shown, MAX_LOGGED_COMMAND)
            );
        }

        self.counters.commands += 1;

        if let Some(line) = self.try_intercept(command) {
            info!("< {line}");
            return Ok(classify_response(&line));
        }

        self.blocking_transmit(command.as_bytes())?;

        let line = match self.read_line() {
            Some(line) => line,
            None => return Ok(CommandOutcome::Timeout),
        };

        if response_logged_in_full(command, &line) {
            info!("< {line}");
        } else {
            info!(
                "< {} [... response too long ...]",
                truncate_for_log(&line, MAX_LOGGED_RESPONSE)
            );
        }

        Ok(classify_response(&line))
    }

    /// Transmit and wait for the completion signal, bounded by the transmit
    /// timeout. A missed signal is logged and the write is assumed to have
    /// gone out.
    pub(crate) fn blocking_transmit(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.transport.start_transmit(data)?;
        self.counters.tx_bytes += data.len() as u64;
        if !self.tx_done.wait(self.config.transmit_timeout) {
            warn!(len = data.len(), "transmit-complete signal missed");
        }
        Ok(())
    }

    pub(crate) fn read_line(&mut self) -> Option<String> {
        let deadline = Instant::now() + self.config.response_deadline;
        let line = self.reader.read_line(deadline)?;
        self.counters.rx_lines += 1;
        self.counters.rx_bytes += line.len() as u64;
        Some(line)
    }

    fn try_intercept(&mut self, command: &str) -> Option<String> {
        if !command.starts_with(INTERCEPT_COMMAND) || !command.contains(INTERCEPT_MARKER) {
            return None;
        }
        self.diag_override.as_mut()?.intercept(command)
    }

    pub(crate) fn reset_module(&mut self) {
        let Some(lines) = self.control.as_mut() else {
            debug!("no control lines wired, skipping module reset");
            return;
        };
        lines.set_reset(true);
        thread::sleep(self.config.reset_pulse);
        // Anything buffered predates the reset and is stale.
        self.reader.clear();
        lines.set_reset(false);
        thread::sleep(self.config.boot_settle);
    }

    pub(crate) fn wake_module(&mut self) {
        let Some(lines) = self.control.as_mut() else {
            debug!("no control lines wired, skipping module wake");
            return;
        };
        lines.set_wake(true);
        thread::sleep(self.config.wake_pulse);
        lines.set_wake(false);
    }
}

/// Handle over the serial-attached module.
///
/// All command activity funnels through the internal exchange lock; one
/// logical exchange runs at a time and no two commands interleave on the
/// wire. [`ModuleLink::new`] also returns the [`RxPipeline`] that the serial
/// driver's event source must own and feed.
pub struct ModuleLink {
    exchange: Mutex<Exchange>,
    event_input: Option<Box<dyn EventInput>>,
    state: Mutex<LinkState>,
}

impl ModuleLink {
    /// Create a link over `transport`. `tx_done` must be the same signal the
    /// returned pipeline sets on [`super::SerialEvent::TxDone`].
    pub fn new(
        transport: Box<dyn SerialTransport>,
        tx_done: TxDoneSignal,
        config: LinkConfig,
    ) -> (Self, RxPipeline) {
        let (producer, consumer) = RingBuffer::with_capacity(RING_CAPACITY);
        let pipeline = RxPipeline::new(producer, tx_done.clone());
        let exchange = Exchange {
            transport,
            reader: LineReader::new(consumer),
            tx_done,
            config,
            control: None,
            diag_override: None,
            counters: LinkCounters::default(),
        };
        let link = Self {
            exchange: Mutex::new(exchange),
            event_input: None,
            state: Mutex::new(LinkState::Idle),
        };
        (link, pipeline)
    }

    /// Wire the event-pending input pin.
    pub fn set_event_input(&mut self, input: Box<dyn EventInput>) {
        self.event_input = Some(input);
    }

    /// Wire the reset/wake control lines.
    pub fn set_control_lines(&mut self, lines: Box<dyn ControlLines>) {
        self.exchange_mut().control = Some(lines);
    }

    /// Wire the diagnostic override collaborator.
    pub fn set_diagnostic_override(&mut self, collaborator: Box<dyn DiagnosticOverride>) {
        self.exchange_mut().diag_override = Some(collaborator);
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the link: configure the UART, enable reception, hard-reset and
    /// wake the module, then retrieve the start-up event so the pending
    /// indicator clears.
    pub fn start(&self) -> Result<(), ProtocolError> {
        self.set_state(LinkState::Starting);
        match self.start_inner() {
            Ok(()) => {
                self.set_state(LinkState::Ready);
                info!("link started");
                Ok(())
            }
            Err(err) => {
                self.set_state(LinkState::Error);
                Err(err)
            }
        }
    }

    fn start_inner(&self) -> Result<(), ProtocolError> {
        let mut exchange = self.lock_exchange();
        let serial = exchange.config.serial.clone();
        exchange.transport.configure(&serial)?;
        let idle = exchange.config.rx_idle_timeout;
        exchange.transport.enable_receive(idle)?;
        exchange.reset_module();
        exchange.wake_module();
        exchange.send_command(EVENT_QUERY)?;
        Ok(())
    }

    /// Pulse the reset line and discard stale receive bytes.
    pub fn reset(&self) {
        self.lock_exchange().reset_module();
    }

    /// Pulse the wake line.
    pub fn wake(&self) {
        self.lock_exchange().wake_module();
    }

    /// Non-blocking level read of the event-pending indicator. Idempotent
    /// until the module clears the level in response to the event-check
    /// command; edge detection belongs to the caller.
    pub fn is_event_pending(&self) -> bool {
        self.event_input
            .as_ref()
            .map(|input| input.is_asserted())
            .unwrap_or(false)
    }

    /// Send one command and classify its response. Equivalent to running a
    /// single-command exchange on [`ModuleLink::begin_exchange`].
    pub fn send_command(&self, command: &str) -> Result<CommandOutcome, ProtocolError> {
        self.begin_exchange().send_command(command)
    }

    /// Acquire the exchange lock for a multi-step exchange (continuation
    /// line retrieval, firmware transfer). The lock is held until the guard
    /// is dropped; every other exchange waits.
    pub fn begin_exchange(&self) -> ExchangeGuard<'_> {
        ExchangeGuard {
            inner: self.lock_exchange(),
        }
    }

    /// Cumulative wire metrics.
    pub fn counters(&self) -> LinkCounters {
        self.lock_exchange().counters
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    fn lock_exchange(&self) -> MutexGuard<'_, Exchange> {
        self.exchange
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn exchange_mut(&mut self) -> &mut Exchange {
        self.exchange
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped hold of the exchange lock.
///
/// Write-then-read ordering is strict within one guard, and dropping the
/// guard is the only way to release the lock, so it provably spans the whole
/// exchange including continuation reads.
pub struct ExchangeGuard<'a> {
    pub(crate) inner: MutexGuard<'a, Exchange>,
}

impl ExchangeGuard<'_> {
    /// Send one command and classify its response.
    pub fn send_command(&mut self, command: &str) -> Result<CommandOutcome, ProtocolError> {
        self.inner.send_command(command)
    }

    /// Raw line-read entry point for announced continuation lines, retrieved
    /// one-by-one in order with no classification. `None` once the response
    /// deadline elapses.
    pub fn read_response_line(&mut self) -> Option<String> {
        self.inner.read_line()
    }

    /// Drain `count` continuation lines into `sink`, each terminated with
    /// CRLF. Returns the number of lines written.
    pub fn read_continuation_lines(
        &mut self,
        count: usize,
        sink: &mut dyn Write,
    ) -> Result<usize, ProtocolError> {
        let mut written = 0;
        for _ in 0..count {
            let line = self.inner.read_line().ok_or(ProtocolError::Timeout)?;
            sink.write_all(line.as_bytes())?;
            sink.write_all(b"\r\n")?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_bare_ok() {
        assert_eq!(classify_response("OK"), CommandOutcome::Success(String::new()));
    }

    #[test]
    fn classify_ok_with_message() {
        assert_eq!(
            classify_response("OK hello"),
            CommandOutcome::Success("hello".to_string())
        );
    }

    #[test]
    fn classify_continuation_count() {
        assert_eq!(
            classify_response("OK2 rest"),
            CommandOutcome::SuccessWithContinuation {
                count: 2,
                message: " rest".to_string(),
            }
        );
    }

    #[test]
    fn classify_multi_digit_continuation() {
        assert_eq!(
            classify_response("OK12abc"),
            CommandOutcome::SuccessWithContinuation {
                count: 12,
                message: "abc".to_string(),
            }
        );
    }

    #[test]
    fn classify_continuation_without_message() {
        assert_eq!(
            classify_response("OK3"),
            CommandOutcome::SuccessWithContinuation {
                count: 3,
                message: String::new(),
            }
        );
    }

    #[test]
    fn classify_failure_verbatim() {
        assert_eq!(
            classify_response("ERR bad arg"),
            CommandOutcome::Failure("ERR bad arg".to_string())
        );
    }

    #[test]
    fn classify_empty_line_is_failure() {
        assert_eq!(classify_response(""), CommandOutcome::Failure(String::new()));
    }

    #[test]
    fn classify_okx_is_failure() {
        // `OK` followed by a non-space non-digit is not a success prefix.
        assert_eq!(
            classify_response("OKAY"),
            CommandOutcome::Failure("OKAY".to_string())
        );
    }

    #[test]
    fn outcome_accessors() {
        assert!(classify_response("OK").is_success());
        assert!(classify_response("OK2 x").is_success());
        assert!(!classify_response("ERR").is_success());
        assert!(!CommandOutcome::Timeout.is_success());
        assert_eq!(CommandOutcome::Timeout.message(), None);
        assert_eq!(classify_response("OK2 x").continuation_count(), 2);
        assert_eq!(classify_response("OK x").continuation_count(), 0);
    }

    #[test]
    fn response_elision_threshold_is_strict() {
        let short = "x".repeat(MAX_LOGGED_RESPONSE - 1);
        let boundary = "x".repeat(MAX_LOGGED_RESPONSE);
        assert!(response_logged_in_full("AT+PING\n", &short));
        // Exactly at the threshold is already elided.
        assert!(!response_logged_in_full("AT+PING\n", &boundary));
        // Configuration reads are exempt regardless of length.
        assert!(response_logged_in_full("AT+CONF? Certificate\n", &boundary));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("abcdef", 4), "abcd");
        assert_eq!(truncate_for_log("ab", 4), "ab");
        // 'é' is two bytes; the cut must not split it.
        assert_eq!(truncate_for_log("aéé", 2), "a");
    }

    #[test]
    fn config_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.response_deadline, RESPONSE_DEADLINE);
        assert_eq!(config.transmit_timeout, TRANSMIT_TIMEOUT);
        assert_eq!(config.serial.baud_rate, super::super::DEFAULT_BAUD_RATE);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = LinkConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: LinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.response_deadline, config.response_deadline);
        assert_eq!(back.serial, config.serial);
    }
}
