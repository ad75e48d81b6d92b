//! Shared frame ring buffer - the synchronization core
//!
//! One writer, N registered readers, each reader with its own cursor. A slot
//! becomes writable again only once every registered consumer has released
//! it, which is what stops a fast producer from overwriting a frame a slow
//! consumer has not yet processed. The cursor table behind the single state
//! mutex is the only structure mutated by more than one thread; frame
//! payloads are reached through per-slot locks that the cursor protocol
//! keeps uncontended.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::PipelineError;
use crate::image::{Image, ImageFormat};
use crate::stats::{self, stats};

/// What the writer does when the ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Strict mode: block the producer until the slowest consumer releases
    /// a slot. Backpressure for stages that must not lose frames.
    Block,
    /// Lossy mode: drop the oldest unread frame and advance the stale
    /// cursors past it. For live sources that must never stall.
    DropOldest,
}

/// Constructor-time buffer parameters; not runtime-mutable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of usable slots, at least 2. Memory use is bounded by this
    /// regardless of consumer count.
    pub capacity: usize,
    pub policy: OverflowPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            policy: OverflowPolicy::Block,
        }
    }
}

/// Handle for one registered read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

struct Cursor {
    /// Next slot this consumer will reserve.
    head: usize,
    /// Next slot this consumer will release.
    tail: usize,
    dropped: u64,
}

struct RingState {
    /// Next slot the writer will reserve.
    write_head: usize,
    /// Next slot the writer will commit; equals write_head when no write is
    /// in flight.
    write_tail: usize,
    /// Oldest retained committed slot. With consumers attached it tracks
    /// the slowest tail; with none attached it stays put so frames are
    /// retained for a consumer that registers later.
    floor: usize,
    cursors: HashMap<ConsumerId, Cursor>,
    next_id: u64,
}

impl RingState {
    fn lag(&self, n: usize, idx: usize) -> usize {
        (self.write_head + n - idx) % n
    }

    fn fill(&self, n: usize) -> usize {
        self.lag(n, self.floor).max(self.lag(n, self.write_tail))
    }

    /// Full leaves one physical slot free to tell full from empty.
    fn is_full(&self, n: usize) -> bool {
        self.fill(n) == n - 1
    }

    fn available(&self, n: usize, cursor_head: usize) -> usize {
        (self.write_tail + n - cursor_head) % n
    }

    /// Re-derive the floor from the slowest tail. Returns whether it moved,
    /// i.e. whether a blocked writer may now proceed.
    fn recompute_floor(&mut self, n: usize) -> bool {
        let mut slowest: Option<(usize, usize)> = None;
        for c in self.cursors.values() {
            let lag = (self.write_head + n - c.tail) % n;
            match slowest {
                Some((l, _)) if l >= lag => {}
                _ => slowest = Some((lag, c.tail)),
            }
        }
        if let Some((_, tail)) = slowest {
            if tail != self.floor {
                self.floor = tail;
                return true;
            }
        }
        false
    }
}

/// Fixed-capacity multi-slot ring shared between one producer and its
/// consumers. Owned by the producer, handed to consumers as `Arc`.
pub struct SharedImageBuffer {
    format: ImageFormat,
    policy: OverflowPolicy,
    /// capacity + 1 physical slots; payloads allocated lazily on first write.
    slots: Vec<RwLock<Image>>,
    state: Mutex<RingState>,
    /// Writer parks here in strict mode.
    space_cv: Condvar,
    /// Consumers park here in `wait_for_frame`.
    frames_cv: Condvar,
    stopped: AtomicBool,
}

impl SharedImageBuffer {
    pub fn new(format: ImageFormat, config: BufferConfig) -> Self {
        assert!(config.capacity >= 2, "buffer capacity must be at least 2");
        let n = config.capacity + 1;
        Self {
            format,
            policy: config.policy,
            slots: (0..n).map(|_| RwLock::new(Image::new(format))).collect(),
            state: Mutex::new(RingState {
                write_head: 0,
                write_tail: 0,
                floor: 0,
                cursors: HashMap::new(),
                next_id: 0,
            }),
            space_cv: Condvar::new(),
            frames_cv: Condvar::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    fn n(&self) -> usize {
        self.slots.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new read cursor, starting at the oldest retained frame.
    pub fn register_consumer(&self) -> ConsumerId {
        let mut st = self.lock_state();
        let id = ConsumerId(st.next_id);
        st.next_id += 1;
        let floor = st.floor;
        st.cursors.insert(
            id,
            Cursor {
                head: floor,
                tail: floor,
                dropped: 0,
            },
        );
        debug!(?id, "consumer registered");
        id
    }

    /// Remove a cursor. A departed consumer must not keep the writer parked,
    /// so a blocked writer is woken if this cursor was the slowest.
    pub fn unregister_consumer(&self, id: ConsumerId) {
        let n = self.n();
        let mut st = self.lock_state();
        if st.cursors.remove(&id).is_some() {
            let advanced = st.recompute_floor(n);
            drop(st);
            debug!(?id, "consumer unregistered");
            if advanced {
                self.space_cv.notify_all();
            }
        }
    }

    /// Reserve the next write slot, honoring the configured overflow policy.
    ///
    /// In strict mode this blocks until a slot frees up or [`stop`] wakes
    /// it with `Err(Stopped)`. In lossy mode it never blocks: the oldest
    /// unread frame is dropped, or the incoming frame is dropped
    /// (`Err(BufferFull)`) when the oldest slot is pinned by an active read.
    ///
    /// [`stop`]: SharedImageBuffer::stop
    pub fn reserve_write(&self) -> Result<WriteGuard<'_>, PipelineError> {
        let n = self.n();
        let mut st = self.lock_state();
        while st.is_full(n) {
            if self.stopped.load(Ordering::Acquire) {
                return Err(PipelineError::Stopped);
            }
            match self.policy {
                OverflowPolicy::Block => {
                    st = self
                        .space_cv
                        .wait(st)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                OverflowPolicy::DropOldest => {
                    if !Self::reclaim_oldest(&mut st, n) {
                        // oldest slot is mid-read, so the incoming frame is
                        // the one lost; no cursor will ever observe it
                        for c in st.cursors.values_mut() {
                            c.dropped += 1;
                        }
                        stats().increment(stats::FRAMES_DROPPED);
                        metrics::counter!("frames_dropped").increment(1);
                        return Err(PipelineError::BufferFull);
                    }
                }
            }
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(PipelineError::Stopped);
        }
        Ok(self.take_write_slot(st))
    }

    /// Non-blocking variant: fails with `BufferFull` when strict-full
    /// instead of waiting, and never drops anything.
    pub fn try_reserve_write(&self) -> Result<WriteGuard<'_>, PipelineError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PipelineError::Stopped);
        }
        let n = self.n();
        let st = self.lock_state();
        if st.is_full(n) {
            return Err(PipelineError::BufferFull);
        }
        Ok(self.take_write_slot(st))
    }

    fn take_write_slot(&self, mut st: MutexGuard<'_, RingState>) -> WriteGuard<'_> {
        let n = self.n();
        let slot = st.write_head;
        st.write_head = (st.write_head + 1) % n;
        drop(st);
        // The cursor protocol guarantees no reader still holds this slot.
        let mut lock = self.slots[slot]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        lock.ensure_allocated();
        WriteGuard {
            buffer: self,
            slot,
            aborted: false,
            lock,
        }
    }

    /// Drop the oldest unread frame by advancing every stale cursor past
    /// it. Fails if a consumer holds an active read reservation on that
    /// slot, in which case the caller drops the incoming frame instead.
    fn reclaim_oldest(st: &mut RingState, n: usize) -> bool {
        let floor = st.floor;
        for c in st.cursors.values() {
            if c.tail == floor && c.head != c.tail {
                return false;
            }
        }
        for c in st.cursors.values_mut() {
            if c.tail == floor {
                c.tail = (c.tail + 1) % n;
                c.head = c.tail;
                c.dropped += 1;
            }
        }
        st.floor = (floor + 1) % n;
        stats().increment(stats::FRAMES_DROPPED);
        metrics::counter!("frames_dropped").increment(1);
        trace!("dropped oldest unread frame");
        true
    }

    fn commit_write(&self, _slot: usize) {
        let n = self.n();
        let mut st = self.lock_state();
        st.write_tail = (st.write_tail + 1) % n;
        drop(st);
        stats().increment(stats::FRAMES_PRODUCED);
        metrics::counter!("frames_produced").increment(1);
        self.frames_cv.notify_all();
    }

    /// Roll back a reservation that will not be committed. Sound because the
    /// single writer holds at most one reservation per buffer.
    fn abort_write(&self, _slot: usize) {
        let n = self.n();
        let mut st = self.lock_state();
        st.write_head = (st.write_head + n - 1) % n;
    }

    /// Reserve the next unseen frame for `id`. Never blocks; returns
    /// `NoNewFrame` when the consumer has caught up with the writer.
    pub fn reserve_read(&self, id: ConsumerId) -> Result<ReadGuard<'_>, PipelineError> {
        let n = self.n();
        let mut st = self.lock_state();
        let write_tail = st.write_tail;
        let cur = st
            .cursors
            .get_mut(&id)
            .expect("consumer id not registered with this buffer");
        if (write_tail + n - cur.head) % n == 0 {
            return Err(PipelineError::NoNewFrame);
        }
        let slot = cur.head;
        cur.head = (cur.head + 1) % n;
        drop(st);
        let lock = self.slots[slot]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(ReadGuard {
            buffer: self,
            id,
            slot,
            lock,
        })
    }

    fn release_read(&self, id: ConsumerId, _slot: usize) {
        let n = self.n();
        let mut st = self.lock_state();
        match st.cursors.get_mut(&id) {
            Some(cur) => cur.tail = (cur.tail + 1) % n,
            // Unregistered mid-read; the floor was already recomputed.
            None => return,
        }
        let advanced = st.recompute_floor(n);
        drop(st);
        stats().increment(stats::FRAMES_CONSUMED);
        metrics::counter!("frames_consumed").increment(1);
        if advanced {
            self.space_cv.notify_all();
        }
    }

    /// Committed frames `id` has not yet reserved.
    pub fn available(&self, id: ConsumerId) -> usize {
        let n = self.n();
        let st = self.lock_state();
        st.cursors
            .get(&id)
            .map(|c| st.available(n, c.head))
            .unwrap_or(0)
    }

    /// Least number of readable frames across all consumers.
    pub fn least_available(&self) -> usize {
        let n = self.n();
        let st = self.lock_state();
        st.cursors
            .values()
            .map(|c| st.available(n, c.head))
            .min()
            .unwrap_or(0)
    }

    pub fn is_full(&self) -> bool {
        let n = self.n();
        self.lock_state().is_full(n)
    }

    /// Slots between the oldest retained frame and the write head.
    pub fn fill(&self) -> usize {
        let n = self.n();
        self.lock_state().fill(n)
    }

    /// Frames this consumer missed to lossy-mode reclaim.
    pub fn dropped(&self, id: ConsumerId) -> u64 {
        let st = self.lock_state();
        st.cursors.get(&id).map(|c| c.dropped).unwrap_or(0)
    }

    /// Park until a frame is available for `id`, the buffer stops, or the
    /// timeout elapses. Returns whether a frame is ready.
    pub fn wait_for_frame(&self, id: ConsumerId, timeout: Duration) -> bool {
        let n = self.n();
        let deadline = Instant::now() + timeout;
        let mut st = self.lock_state();
        loop {
            let Some(cur) = st.cursors.get(&id) else {
                return false;
            };
            if st.available(n, cur.head) > 0 {
                return true;
            }
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout_result) = self
                .frames_cv
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
        }
    }

    /// Stop the buffer: wakes a writer blocked on a full ring and any
    /// consumers parked in `wait_for_frame`. Restart is an explicit
    /// external action, not provided here.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // Take the state lock so waiters cannot re-check between our store
        // and the notify.
        drop(self.lock_state());
        self.space_cv.notify_all();
        self.frames_cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Exclusive access to a reserved write slot. Dropping the guard commits
/// the frame and signals readers; all slots of one trigger cycle are
/// committed only after every stream's payload is in place.
pub struct WriteGuard<'a> {
    buffer: &'a SharedImageBuffer,
    slot: usize,
    aborted: bool,
    lock: RwLockWriteGuard<'a, Image>,
}

impl WriteGuard<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Abandon the reservation without publishing a frame. Used when a
    /// multi-stream trigger cycle fails partway.
    pub fn cancel(mut self) {
        self.aborted = true;
    }
}

impl Deref for WriteGuard<'_> {
    type Target = Image;

    fn deref(&self) -> &Image {
        &self.lock
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Image {
        &mut self.lock
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.aborted {
            self.buffer.abort_write(self.slot);
        } else {
            self.buffer.commit_write(self.slot);
        }
    }
}

/// Read-only view of a reserved frame, valid for the duration of the
/// processing call. Dropping it releases the slot and wakes a blocked
/// writer if this consumer was the slowest. Use [`Image::snapshot`] to
/// retain the frame beyond the guard.
pub struct ReadGuard<'a> {
    buffer: &'a SharedImageBuffer,
    id: ConsumerId,
    slot: usize,
    lock: RwLockReadGuard<'a, Image>,
}

impl ReadGuard<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for ReadGuard<'_> {
    type Target = Image;

    fn deref(&self) -> &Image {
        &self.lock
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.buffer.release_read(self.id, self.slot);
    }
}
