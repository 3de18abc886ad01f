//! Receive pipeline
//!
//! Owns the two alternating driver receive slots and forwards completed
//! fragments into the receive ring buffer. `handle_event` is the single
//! entry point for driver notifications; it runs in the driver's callback
//! context, so every arm is non-blocking and best-effort. Persistent receive
//! failure only ever surfaces indirectly, as line reader timeouts.

use tracing::{debug, error, warn};

use super::transport::{SerialEvent, SerialTransport, SlotId, TxDoneSignal};
use super::{RECV_SLOT_LEN, RX_IDLE_TIMEOUT};
use crate::ring::RingProducer;

/// Producer half of the receive path, driven by serial driver events.
pub struct RxPipeline {
    slots: [Box<[u8]>; 2],
    active: SlotId,
    producer: RingProducer,
    tx_done: TxDoneSignal,
}

impl RxPipeline {
    /// Create a pipeline feeding `producer`, signaling `tx_done` on
    /// transmit completion.
    pub fn new(producer: RingProducer, tx_done: TxDoneSignal) -> Self {
        Self {
            slots: [
                vec![0u8; RECV_SLOT_LEN].into_boxed_slice(),
                vec![0u8; RECV_SLOT_LEN].into_boxed_slice(),
            ],
            active: SlotId::Zero,
            producer,
            tx_done,
        }
    }

    /// The slot currently handed to the driver.
    pub fn active_slot(&self) -> SlotId {
        self.active
    }

    /// Mutable access to a slot's storage, for the driver to fill before it
    /// posts [`SerialEvent::RxReady`].
    pub fn slot_mut(&mut self, slot: SlotId) -> &mut [u8] {
        &mut self.slots[slot.index()]
    }

    /// Total received bytes dropped because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.producer.dropped()
    }

    /// Handle one driver notification. Non-blocking; never returns an error
    /// to the driver.
    pub fn handle_event(&mut self, event: SerialEvent, transport: &mut dyn SerialTransport) {
        match event {
            SerialEvent::TxDone => self.tx_done.set(),
            SerialEvent::TxAborted => error!("serial transmit aborted"),
            SerialEvent::RxReady { slot, offset, len } => {
                let storage = &self.slots[slot.index()];
                let end = offset.saturating_add(len);
                if end > storage.len() {
                    error!(offset, len, "driver reported out-of-range receive span");
                    return;
                }
                let span = &storage[offset..end];
                let accepted = self.producer.push_slice(span);
                if accepted < span.len() {
                    warn!(
                        dropped = span.len() - accepted,
                        total_dropped = self.producer.dropped(),
                        "receive ring full, dropping bytes"
                    );
                }
            }
            SerialEvent::RxBufRequest => {
                // Hand over the slot that is not being drained; ownership
                // alternates on every exhaustion.
                self.active = self.active.other();
                debug!(slot = self.active.index(), "receive buffer swapped");
            }
            SerialEvent::RxBufReleased(slot) => {
                debug!(slot = slot.index(), "receive buffer released");
            }
            SerialEvent::RxDisabled => {
                // Self-healing path: restart reception from slot 0.
                self.active = SlotId::Zero;
                if let Err(err) = transport.enable_receive(RX_IDLE_TIMEOUT) {
                    error!(%err, "re-enabling reception failed");
                }
            }
            SerialEvent::RxStopped(reason) => {
                error!(reason, "reception stopped");
            }
        }
    }
}
