//! Firmware block transfer
//!
//! Streams a firmware image to the module over the wire in fixed-size
//! blocks. The whole transfer runs under one exchange lock hold: setup
//! command, raw block bytes with a per-block acknowledgement, then a final
//! completion check after a settle pause.

use std::io::Read;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use super::engine::{CommandOutcome, ExchangeGuard, ModuleLink};
use super::{ProtocolError, MODULE_FLASH_CAPACITY, TRANSFER_COMPLETE_MARKER};

/// Tuning knobs for [`ExchangeGuard::transfer_firmware`].
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Bytes per acknowledged block.
    pub block_size: u64,
    /// Bytes read from the source per write.
    pub read_chunk: usize,
    /// Pause before the completion check, giving the module time to commit
    /// the final block to flash.
    pub settle: Duration,
    /// Progress is reported every this many blocks.
    pub progress_stride: u64,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            block_size: 2048,
            read_chunk: 128,
            settle: Duration::from_millis(500),
            progress_stride: 4,
        }
    }
}

impl ExchangeGuard<'_> {
    /// Stream `total_size` bytes of firmware from `source` to the module.
    ///
    /// Preconditions are checked before anything touches the wire: the image
    /// must be non-empty, fit the module flash, and the block size must be
    /// positive. `progress` receives a completion percentage every
    /// `progress_stride` blocks and once at the end.
    ///
    /// Short reads from `source` are tolerated: each wire chunk is filled
    /// completely before transmission, so acknowledgement reads stay on
    /// block boundaries no matter how the source dribbles bytes.
    ///
    /// `source` is consumed and dropped when the transfer finishes, whatever
    /// the outcome.
    pub fn transfer_firmware<R: Read>(
        &mut self,
        source: R,
        total_size: u64,
        options: &TransferOptions,
        progress: impl FnMut(f32),
    ) -> Result<(), ProtocolError> {
        if total_size == 0 {
            return Err(ProtocolError::TransferRejected(
                "firmware image is empty".to_string(),
            ));
        }
        if total_size > MODULE_FLASH_CAPACITY {
            return Err(ProtocolError::TransferRejected(format!(
                "firmware image of {total_size} bytes exceeds the {MODULE_FLASH_CAPACITY} byte module flash"
            )));
        }
        if options.block_size == 0 {
            return Err(ProtocolError::TransferRejected(
                "block size must be positive".to_string(),
            ));
        }
        self.run_transfer(source, total_size, options, progress)
    }

    fn run_transfer<R: Read>(
        &mut self,
        mut source: R,
        total_size: u64,
        options: &TransferOptions,
        mut progress: impl FnMut(f32),
    ) -> Result<(), ProtocolError> {
        let setup = format!("AT+OTW {},{}\n", total_size, options.block_size);
        match self.send_command(&setup)? {
            outcome if outcome.is_success() => {}
            CommandOutcome::Timeout => return Err(ProtocolError::Timeout),
            outcome => {
                return Err(ProtocolError::TransferFailed {
                    response: outcome.message().unwrap_or("").to_string(),
                })
            }
        }

        info!(
            total_size,
            block_size = options.block_size,
            "starting firmware transfer"
        );

        let mut chunk = vec![0u8; options.read_chunk.max(1)];
        let mut sent: u64 = 0;
        let mut blocks_acked: u64 = 0;
        while sent < total_size {
            let want = chunk.len().min((total_size - sent) as usize);
            // Fill the whole chunk even if the source delivers short reads,
            // so block boundaries always land on an acknowledgement.
            let mut filled = 0;
            while filled < want {
                let read = source.read(&mut chunk[filled..want])?;
                if read == 0 {
                    return Err(ProtocolError::TransferRejected(format!(
                        "source ended early at {} of {total_size} bytes",
                        sent + filled as u64
                    )));
                }
                filled += read;
            }
            self.inner.blocking_transmit(&chunk[..filled])?;
            sent += filled as u64;

            // The module acknowledges full blocks only; a trailing partial
            // block is covered by the completion check.
            if sent % options.block_size == 0 {
                let line = self.inner.read_line().ok_or(ProtocolError::Timeout)?;
                if !line.starts_with("OK") {
                    return Err(ProtocolError::TransferFailed { response: line });
                }
                blocks_acked += 1;
                debug!(sent, blocks_acked, "block acknowledged");
                if blocks_acked % options.progress_stride == 0 {
                    progress(100.0 * sent as f32 / total_size as f32);
                }
            }
        }

        // Give the module time to commit the final block before asking for
        // the verdict.
        thread::sleep(options.settle);
        let line = self.inner.read_line().ok_or(ProtocolError::Timeout)?;
        if !line.starts_with(TRANSFER_COMPLETE_MARKER) {
            return Err(ProtocolError::TransferFailed { response: line });
        }

        progress(100.0);
        info!(total_size, blocks_acked, "firmware transfer complete");
        Ok(())
    }
}

impl ModuleLink {
    /// Run a whole firmware transfer as one exchange. Convenience wrapper
    /// over [`ModuleLink::begin_exchange`] plus
    /// [`ExchangeGuard::transfer_firmware`].
    pub fn transfer_firmware<R: Read>(
        &self,
        source: R,
        total_size: u64,
        options: &TransferOptions,
        progress: impl FnMut(f32),
    ) -> Result<(), ProtocolError> {
        self.begin_exchange()
            .transfer_firmware(source, total_size, options, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = TransferOptions::default();
        assert_eq!(options.block_size, 2048);
        assert_eq!(options.read_chunk, 128);
        assert_eq!(options.progress_stride, 4);
    }
}
