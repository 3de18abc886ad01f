//! Passthrough bypass
//!
//! Hands the wire to an external party (typically a host-side tool talking
//! straight to the module) while holding the exchange lock so no command can
//! interleave. Host-bound bytes are scanned for the exit sentinel; once the
//! sentinel arrives followed by a line terminator, the session deactivates
//! and the wire returns to command mode.

use std::io::Write;
use tracing::{debug, info};

use super::engine::{ExchangeGuard, ModuleLink};
use super::{ProtocolError, BYPASS_EXIT_SENTINEL};

/// Whether a bypass session is still forwarding bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassControl {
    /// The session forwards bytes in both directions.
    Active,
    /// The exit sentinel was seen; the wire is back in command mode.
    Exited,
}

/// One passthrough session.
///
/// Owns the exchange lock for its whole lifetime; dropping the session
/// releases the wire for ordinary commands. The sentinel scan runs across
/// chunk boundaries, so `AT+EX` in one chunk and `IT\r` in the next still
/// exit.
pub struct BypassSession<'a> {
    exchange: ExchangeGuard<'a>,
    matched: usize,
    exited: bool,
}

impl<'a> BypassSession<'a> {
    fn new(exchange: ExchangeGuard<'a>) -> Self {
        info!("entering passthrough bypass");
        Self {
            exchange,
            matched: 0,
            exited: false,
        }
    }

    /// Whether the exit sentinel has been seen.
    pub fn is_exited(&self) -> bool {
        self.exited
    }

    /// Drain all module-originated bytes currently buffered into `sink`.
    /// Returns the number of bytes forwarded; zero when nothing is pending.
    pub fn pump_module(&mut self, sink: &mut dyn Write) -> Result<usize, ProtocolError> {
        let mut scratch = [0u8; 256];
        let mut forwarded = 0;
        loop {
            let n = self.exchange.inner.reader.pop_available(&mut scratch);
            if n == 0 {
                break;
            }
            sink.write_all(&scratch[..n])?;
            forwarded += n;
        }
        Ok(forwarded)
    }

    /// Forward one chunk of host-originated bytes to the module, scanning
    /// for the exit sentinel on the way.
    ///
    /// A chunk completing the sentinel plus terminator is not transmitted at
    /// all; the module never sees any part of it. On exit the receive buffer
    /// is cleared so stale passthrough bytes cannot leak into the next
    /// command exchange.
    pub fn write_host(&mut self, chunk: &[u8]) -> Result<BypassControl, ProtocolError> {
        if self.exited {
            return Err(ProtocolError::BypassExited);
        }

        let sentinel = BYPASS_EXIT_SENTINEL.as_bytes();
        for &byte in chunk {
            if self.matched == sentinel.len() {
                if byte == b'\r' || byte == b'\n' {
                    self.exited = true;
                    self.exchange.inner.reader.clear();
                    info!("exit sentinel received, leaving bypass");
                    return Ok(BypassControl::Exited);
                }
                self.matched = 0;
            } else if byte == sentinel[self.matched] {
                self.matched += 1;
            } else {
                // A mismatch restarts the scan at the next byte; the current
                // byte itself is not re-examined.
                self.matched = 0;
            }
        }

        self.exchange.inner.blocking_transmit(chunk)?;
        debug!(len = chunk.len(), "forwarded host chunk");
        Ok(BypassControl::Active)
    }
}

impl ModuleLink {
    /// Enter passthrough bypass. The returned session holds the exchange
    /// lock until dropped.
    pub fn enter_bypass(&self) -> BypassSession<'_> {
        BypassSession::new(self.begin_exchange())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The sentinel scan itself is pure byte-level state; drive it through a
    // standalone copy so no transport is needed.
    fn scan(chunks: &[&[u8]]) -> (usize, bool) {
        let sentinel = BYPASS_EXIT_SENTINEL.as_bytes();
        let mut matched = 0;
        for chunk in chunks {
            for &byte in *chunk {
                if matched == sentinel.len() {
                    if byte == b'\r' || byte == b'\n' {
                        return (matched, true);
                    }
                    matched = 0;
                } else if byte == sentinel[matched] {
                    matched += 1;
                } else {
                    matched = 0;
                }
            }
        }
        (matched, false)
    }

    #[test]
    fn sentinel_with_terminator_exits() {
        assert_eq!(scan(&[b"AT+EXIT\r"]).1, true);
        assert_eq!(scan(&[b"AT+EXIT\n"]).1, true);
    }

    #[test]
    fn sentinel_without_terminator_stays_armed() {
        let (matched, exited) = scan(&[b"AT+EXIT"]);
        assert!(!exited);
        assert_eq!(matched, BYPASS_EXIT_SENTINEL.len());
    }

    #[test]
    fn sentinel_spanning_chunks_exits() {
        assert!(scan(&[b"dataAT+EX", b"IT", b"\r"]).1);
    }

    #[test]
    fn mismatch_resets_scan() {
        assert!(!scan(&[b"AT+EXIS\r"]).1);
        assert_eq!(scan(&[b"AT+EXIS"]).0, 0);
    }

    #[test]
    fn sentinel_followed_by_data_rearms() {
        // A completed sentinel followed by a non-terminator byte restarts
        // the scan from scratch.
        let (matched, exited) = scan(&[b"AT+EXITx"]);
        assert!(!exited);
        assert_eq!(matched, 0);
    }
}
