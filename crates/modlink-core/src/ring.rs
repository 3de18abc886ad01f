//! Single-producer/single-consumer byte ring buffer
//!
//! The receive pipeline appends completed driver fragments on the producer
//! side, which runs in the serial driver's callback context and must never
//! block. The line reader (or the bypass relay) drains the consumer side.
//! When the ring is full the excess is dropped and counted; already buffered
//! bytes are never corrupted.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct Shared {
    /// Backing storage, one slot longer than the capacity so a full ring is
    /// distinguishable from an empty one. Per-byte cells: both endpoints
    /// copy through raw pointers only, so neither ever holds a reference
    /// spanning the other's slots.
    storage: Box<[UnsafeCell<u8>]>,
    /// Slot count, cached so index math never touches the cells.
    slots: usize,
    /// Next index to read. Written only by the consumer.
    head: AtomicUsize,
    /// Next index to write. Written only by the producer.
    tail: AtomicUsize,
    /// Total bytes dropped due to overflow.
    dropped: AtomicU64,
    /// Parking lot for a consumer waiting on data.
    park: Mutex<()>,
    data_available: Condvar,
}

// The producer only ever writes slots in [tail, tail+n) before publishing
// the new tail with Release ordering, and the consumer only reads slots in
// [head, tail) after an Acquire load of tail. The two index owners never
// touch the same slot concurrently, and all slot access goes through the
// cells' raw pointers.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

impl Shared {
    fn slot_ptr(&self, index: usize) -> *mut u8 {
        self.storage[index].get()
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + self.slots - head) % self.slots
    }
}

fn lock_park(shared: &Shared) -> MutexGuard<'_, ()> {
    shared.park.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fixed-capacity circular byte queue split into its two endpoint handles.
pub struct RingBuffer;

impl RingBuffer {
    /// Create a ring buffer holding up to `capacity` bytes and return its
    /// producer and consumer handles.
    pub fn with_capacity(capacity: usize) -> (RingProducer, RingConsumer) {
        let slots = capacity + 1;
        let shared = Arc::new(Shared {
            storage: (0..slots).map(|_| UnsafeCell::new(0)).collect(),
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            park: Mutex::new(()),
            data_available: Condvar::new(),
        });
        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

/// Producer endpoint, owned by the receive pipeline.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Append as many bytes from `data` as fit and return the accepted count.
    /// The remainder is dropped and counted; this never blocks and never
    /// overwrites buffered bytes.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let shared = &*self.shared;
        let slots = shared.slots;
        let head = shared.head.load(Ordering::Acquire);
        let tail = shared.tail.load(Ordering::Relaxed);
        let free = (head + slots - tail - 1) % slots;
        let accepted = data.len().min(free);

        if accepted > 0 {
            let first = accepted.min(slots - tail);
            // Safe: the producer exclusively owns [tail, tail + accepted),
            // copied through raw slot pointers.
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), shared.slot_ptr(tail), first);
                if first < accepted {
                    ptr::copy_nonoverlapping(
                        data.as_ptr().add(first),
                        shared.slot_ptr(0),
                        accepted - first,
                    );
                }
            }
            shared
                .tail
                .store((tail + accepted) % slots, Ordering::Release);

            // Wake a parked consumer. try_lock keeps the producer non-blocking:
            // if the consumer holds the park mutex it is re-checking emptiness
            // and will observe the new tail without a wakeup.
            if let Ok(guard) = shared.park.try_lock() {
                drop(guard);
                shared.data_available.notify_one();
            }
        }

        let overflow = data.len() - accepted;
        if overflow > 0 {
            shared.dropped.fetch_add(overflow as u64, Ordering::Relaxed);
        }
        accepted
    }

    /// Total bytes dropped due to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer endpoint, owned by the line reader or the bypass relay.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Pop a single byte, if one is buffered.
    pub fn pop(&mut self) -> Option<u8> {
        let mut byte = 0u8;
        if self.pop_slice(std::slice::from_mut(&mut byte)) == 1 {
            Some(byte)
        } else {
            None
        }
    }

    /// Pop up to `buf.len()` bytes and return how many were copied.
    pub fn pop_slice(&mut self, buf: &mut [u8]) -> usize {
        let shared = &*self.shared;
        let slots = shared.slots;
        let head = shared.head.load(Ordering::Relaxed);
        let tail = shared.tail.load(Ordering::Acquire);
        let buffered = (tail + slots - head) % slots;
        let taken = buf.len().min(buffered);

        if taken > 0 {
            let first = taken.min(slots - head);
            // Safe: the consumer exclusively owns [head, head + taken),
            // copied through raw slot pointers.
            unsafe {
                ptr::copy_nonoverlapping(shared.slot_ptr(head), buf.as_mut_ptr(), first);
                if first < taken {
                    ptr::copy_nonoverlapping(
                        shared.slot_ptr(0),
                        buf.as_mut_ptr().add(first),
                        taken - first,
                    );
                }
            }
            shared.head.store((head + taken) % slots, Ordering::Release);
        }
        taken
    }

    /// Discard everything currently buffered.
    pub fn clear(&mut self) {
        let tail = self.shared.tail.load(Ordering::Acquire);
        self.shared.head.store(tail, Ordering::Release);
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the ring is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes dropped due to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Park until the producer delivers bytes or `timeout` elapses. Returns
    /// whether data is available afterwards.
    pub fn wait(&self, timeout: Duration) -> bool {
        if !self.is_empty() {
            return true;
        }
        let guard = lock_park(&self.shared);
        if !self.is_empty() {
            return true;
        }
        let (_guard, _result) = self
            .shared
            .data_available
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !self.is_empty()
    }
}
