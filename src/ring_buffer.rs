//! Slotted ring buffer between a push-fed ingest path and a pull-driven consumer.
//!
//! The producer stores whole blocks into free slots; the consumer reads an
//! arbitrary number of bytes across slot boundaries. All state sits behind a
//! single lock. Two condition variables carry the two directions of flow
//! control:
//!
//! - `data_request` wakes the producer side: a consumer is starved.
//! - `data_ready` wakes a starved consumer: data arrived, the stream ended,
//!   or the buffer was reset.
//!
//! A starved consumer waits at most [`STALL_TIMEOUT`] and then returns what is
//! available. Short reads are normal; an empty read only means "finished"
//! once [`RingBuffer::set_eof`] was called.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Upper bound on how long a starved consumer waits for new data.
pub const STALL_TIMEOUT: Duration = Duration::from_millis(150);

type StopHandler = Box<dyn Fn() + Send + Sync>;

/// Snapshot of the buffer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub num_slots: usize,
    pub free_slots: usize,
    pub occupied_slots: usize,
    /// Unread bytes across all occupied slots.
    pub buffered_bytes: usize,
    pub eof: bool,
    /// Number of stall episodes signalled to the producer so far.
    pub stall_episodes: u64,
}

struct RingState {
    /// Arena of owned blocks; an empty `Bytes` marks a free slot.
    slots: Vec<Bytes>,
    /// Next slot the producer fills.
    head: usize,
    /// Consumer cursor: slot being read and offset within it.
    current_slot: usize,
    current_index: usize,
    free_slots: usize,
    buff_bytes_left: usize,
    eof: bool,
    /// A consumer stalled and the producer has not serviced it yet.
    data_requested: bool,
    stall_episodes: u64,
}

impl RingState {
    fn new(num_slots: usize) -> Self {
        Self {
            slots: vec![Bytes::new(); num_slots],
            head: 0,
            current_slot: 0,
            current_index: 0,
            free_slots: num_slots,
            buff_bytes_left: 0,
            eof: false,
            data_requested: false,
            stall_episodes: 0,
        }
    }

    fn num_slots(&self) -> usize {
        self.slots.len()
    }

    fn occupied_slots(&self) -> usize {
        self.num_slots() - self.free_slots
    }

    /// Unread bytes left in the slot under the consumer cursor.
    fn slot_bytes_left(&self) -> usize {
        if self.occupied_slots() == 0 {
            0
        } else {
            self.slots[self.current_slot].len() - self.current_index
        }
    }

    /// Return the fully read current slot to the free pool and move to the next one.
    fn release_current(&mut self) {
        self.slots[self.current_slot] = Bytes::new();
        self.current_slot = (self.current_slot + 1) % self.num_slots();
        self.current_index = 0;
        self.free_slots += 1;
    }

    fn clear(&mut self) {
        let stall_episodes = self.stall_episodes;
        *self = Self::new(self.num_slots());
        self.stall_episodes = stall_episodes;
    }
}

/// Bounded, slotted byte buffer shared between one producer and one consumer.
pub struct RingBuffer {
    state: Mutex<RingState>,
    data_request: Condvar,
    data_ready: Condvar,
    stop_handler: Mutex<Option<StopHandler>>,
}

impl RingBuffer {
    /// Create a buffer with `num_slots` slots.
    pub fn new(num_slots: usize) -> Result<Self> {
        if num_slots == 0 {
            return Err(Error::Config("ring buffer needs at least one slot".to_string()));
        }
        Ok(Self {
            state: Mutex::new(RingState::new(num_slots)),
            data_request: Condvar::new(),
            data_ready: Condvar::new(),
            stop_handler: Mutex::new(None),
        })
    }

    /// Install the upstream notification invoked on every [`reset`](Self::reset).
    pub fn set_stop_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.stop_handler.lock() = Some(Box::new(handler));
    }

    /// Store `block` in the next free slot.
    ///
    /// Fails with [`Error::BufferFull`] when no slot is free. Empty blocks are
    /// accepted and ignored.
    pub fn write(&self, block: Bytes) -> Result<()> {
        let mut state = self.state.lock();

        if state.eof {
            return Err(Error::StreamIo("write after end of stream".to_string()));
        }
        if block.is_empty() {
            return Ok(());
        }
        if state.free_slots == 0 {
            return Err(Error::BufferFull);
        }

        let len = block.len();
        let head = state.head;
        state.slots[head] = block;
        state.head = (head + 1) % state.num_slots();
        state.free_slots -= 1;
        state.buff_bytes_left += len;

        trace!(
            slot = head,
            len,
            free_slots = state.free_slots,
            buffered = state.buff_bytes_left,
            "Ring write"
        );

        if state.data_requested {
            state.data_requested = false;
            self.data_ready.notify_all();
        }
        Ok(())
    }

    /// Read up to `len` bytes.
    ///
    /// If fewer than `len` bytes are buffered and the stream has not ended,
    /// signals the producer and waits at most [`STALL_TIMEOUT`] before
    /// returning whatever is available.
    pub fn read(&self, len: usize) -> Bytes {
        let mut state = self.state.lock();

        if len > 0 && state.buff_bytes_left < len && !state.eof {
            if !state.data_requested {
                state.data_requested = true;
                state.stall_episodes += 1;
                debug!(
                    requested = len,
                    buffered = state.buff_bytes_left,
                    "Ring stalled, requesting data"
                );
                self.data_request.notify_all();
            }
            self.data_ready
                .wait_while_for(&mut state, |s| s.data_requested && !s.eof, STALL_TIMEOUT);
        }

        let mut out = BytesMut::with_capacity(len.min(state.buff_bytes_left));
        while out.len() < len && state.buff_bytes_left > 0 {
            let wanted = len - out.len();
            let remaining = state.slot_bytes_left();
            let start = state.current_index;
            let slot = state.current_slot;

            if wanted < remaining {
                out.extend_from_slice(&state.slots[slot][start..start + wanted]);
                state.current_index += wanted;
                state.buff_bytes_left -= wanted;
            } else {
                out.extend_from_slice(&state.slots[slot][start..]);
                state.buff_bytes_left -= remaining;
                state.release_current();
            }
        }

        trace!(
            requested = len,
            copied = out.len(),
            buffered = state.buff_bytes_left,
            "Ring read"
        );
        out.freeze()
    }

    /// Producer side: wait until a consumer reports starvation.
    ///
    /// Returns `true` if data was requested, `false` on timeout or end of stream.
    pub fn wait_for_request(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.data_request
            .wait_while_for(&mut state, |s| !s.data_requested && !s.eof, timeout);
        state.data_requested && !state.eof
    }

    /// Mark the end of the stream. Suppresses all further stall signals.
    pub fn set_eof(&self) {
        let mut state = self.state.lock();
        state.eof = true;
        state.data_requested = false;
        drop(state);
        self.data_ready.notify_all();
        self.data_request.notify_all();
    }

    /// `true` once the stream ended and every buffered byte was read.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.eof && state.buff_bytes_left == 0
    }

    /// Drop all buffered data and notify upstream that the stream stopped.
    ///
    /// Wakes any waiting consumer or producer. The stop handler runs exactly
    /// once per call, outside the buffer lock.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.clear();
        }
        self.data_ready.notify_all();
        self.data_request.notify_all();

        debug!("Ring reset");
        if let Some(handler) = self.stop_handler.lock().as_ref() {
            handler();
        }
    }

    pub fn stats(&self) -> RingStats {
        let state = self.state.lock();
        RingStats {
            num_slots: state.num_slots(),
            free_slots: state.free_slots,
            occupied_slots: state.occupied_slots(),
            buffered_bytes: state.buff_bytes_left,
            eof: state.eof,
            stall_episodes: state.stall_episodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    fn block(byte: u8, len: usize) -> Bytes {
        Bytes::from(vec![byte; len])
    }

    fn assert_invariants(ring: &RingBuffer) {
        let state = ring.state.lock();
        let occupied = state.slots.iter().filter(|s| !s.is_empty()).count();
        assert_eq!(state.free_slots + occupied, state.num_slots());

        let mut unread = 0;
        for i in 0..occupied {
            let slot = (state.current_slot + i) % state.num_slots();
            assert!(!state.slots[slot].is_empty(), "occupied slots must be contiguous");
            unread += state.slots[slot].len();
        }
        unread -= state.current_index;
        assert_eq!(unread, state.buff_bytes_left);
        if state.slot_bytes_left() > 0 {
            assert!(state.current_index < state.slots[state.current_slot].len());
        }
    }

    #[test]
    fn reads_across_slot_boundaries() {
        let ring = RingBuffer::new(4).unwrap();
        ring.write(block(1, 3)).unwrap();
        ring.write(block(2, 3)).unwrap();
        ring.write(block(3, 3)).unwrap();

        assert_eq!(ring.read(2).as_ref(), &[1, 1]);
        assert_eq!(ring.read(5).as_ref(), &[1, 2, 2, 2, 3]);
        assert_eq!(ring.stats().free_slots, 3);
        assert_eq!(ring.stats().buffered_bytes, 2);
        assert_invariants(&ring);
    }

    #[test]
    fn full_buffer_rejects_writes() {
        let ring = RingBuffer::new(2).unwrap();
        ring.write(block(1, 1)).unwrap();
        ring.write(block(2, 1)).unwrap();
        assert!(matches!(ring.write(block(3, 1)), Err(Error::BufferFull)));

        ring.read(1);
        ring.write(block(3, 1)).unwrap();
        assert_eq!(ring.read(2).as_ref(), &[2, 3]);
        assert_invariants(&ring);
    }

    #[test]
    fn empty_read_at_eof_returns_immediately() {
        let ring = RingBuffer::new(2).unwrap();
        ring.set_eof();

        let start = Instant::now();
        let data = ring.read(1024);
        assert!(data.is_empty());
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(ring.stats().stall_episodes, 0);
        assert!(ring.is_finished());
    }

    #[test]
    fn stalled_read_is_bounded_and_signals_once_per_episode() {
        let ring = RingBuffer::new(2).unwrap();
        ring.write(block(9, 4)).unwrap();

        let start = Instant::now();
        let data = ring.read(10);
        let elapsed = start.elapsed();
        assert_eq!(data.len(), 4);
        assert!(elapsed >= Duration::from_millis(100), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");
        assert_eq!(ring.stats().stall_episodes, 1);

        // Still unserviced: same episode.
        assert!(ring.read(10).is_empty());
        assert_eq!(ring.stats().stall_episodes, 1);

        // Producer services the request; the next starvation is a new episode.
        ring.write(block(1, 1)).unwrap();
        assert_eq!(ring.read(10).len(), 1);
        assert_eq!(ring.stats().stall_episodes, 2);
    }

    #[test]
    fn producer_wakes_starved_consumer() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                assert!(ring.wait_for_request(Duration::from_secs(5)));
                ring.write(block(7, 8)).unwrap();
            })
        };

        let start = Instant::now();
        let mut data = BytesMut::new();
        while data.len() < 8 && start.elapsed() < Duration::from_secs(2) {
            data.extend_from_slice(&ring.read(8 - data.len()));
        }
        producer.join().unwrap();

        assert_eq!(data.as_ref(), &[7; 8]);
        assert_eq!(ring.stats().stall_episodes, 1);
    }

    #[test]
    fn wait_for_request_times_out_without_consumer() {
        let ring = RingBuffer::new(1).unwrap();
        assert!(!ring.wait_for_request(Duration::from_millis(20)));
    }

    #[test]
    fn write_after_eof_is_rejected() {
        let ring = RingBuffer::new(1).unwrap();
        ring.set_eof();
        assert!(matches!(ring.write(block(1, 1)), Err(Error::StreamIo(_))));
    }

    #[test]
    fn reset_clears_and_notifies_once() {
        let ring = RingBuffer::new(3).unwrap();
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let stops = Arc::clone(&stops);
            ring.set_stop_handler(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            });
        }

        ring.write(block(1, 5)).unwrap();
        ring.write(block(2, 5)).unwrap();
        ring.read(3);
        ring.set_eof();
        ring.reset();

        let stats = ring.stats();
        assert_eq!(stats.free_slots, 3);
        assert_eq!(stats.buffered_bytes, 0);
        assert!(!stats.eof);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_invariants(&ring);

        // Usable again after reset.
        ring.write(block(4, 2)).unwrap();
        assert_eq!(ring.read(2).as_ref(), &[4, 4]);
    }

    #[test]
    fn random_interleavings_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0x6e79_6d70);
        let ring = RingBuffer::new(5).unwrap();
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut next_byte = 0u8;

        for _ in 0..2_000 {
            if rng.gen_bool(0.5) {
                let len = rng.gen_range(1..40);
                let data: Vec<u8> = (0..len)
                    .map(|_| {
                        next_byte = next_byte.wrapping_add(1);
                        next_byte
                    })
                    .collect();
                match ring.write(Bytes::from(data.clone())) {
                    Ok(()) => model.extend(data),
                    Err(Error::BufferFull) => {
                        next_byte = next_byte.wrapping_sub(len as u8);
                        assert_eq!(ring.stats().free_slots, 0);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            } else if !model.is_empty() {
                let len = rng.gen_range(1..=model.len());
                let data = ring.read(len);
                let expected: Vec<u8> = model.drain(..len).collect();
                assert_eq!(data.as_ref(), expected.as_slice());
            }

            assert_invariants(&ring);
            assert_eq!(ring.stats().buffered_bytes, model.len());
        }
    }
}
