//! Segment ring buffer and shared block-data table.
//!
//! A single-producer single-consumer ring sized [`SEGMENT_BUFFER_SIZE`],
//! statically allocatable and split into a producer half for the foreground
//! preparer and a consumer half for the step interrupt, in the manner of
//! `heapless::spsc::Queue::split`. Two properties keep it from *being* a
//! stock SPSC queue:
//!
//! - The consumer peeks at `tail` when it loads a segment but advances
//!   `tail` only once the segment has been fully executed, phase ticks
//!   included. Until then the slot stays owned by the consumer.
//! - Each segment carries an index into a paired table of per-block
//!   [`BlockData`]. A data slot is written by the producer before any
//!   segment referencing it is published, and stays read-only to the
//!   consumer for as long as a live segment references it. The table is
//!   cycled round-robin with period [`SEGMENT_DATA_SLOTS`], which the ring
//!   capacity guarantees is long enough for every referenced slot to have
//!   drained.
//!
//! `head` and `tail` are published with release stores and observed with
//! acquire loads, so segment contents are visible to the other side before
//! the index that exposes them.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{SEGMENT_BUFFER_SIZE, SEGMENT_DATA_SLOTS};

/// Marks the last segment of a planner block. Popping it releases the block.
pub const SEGMENT_END_OF_BLOCK: u8 = 1 << 0;

/// One execution-ready slice of a planner block, treated as constant-rate by
/// the executor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct Segment {
    /// Number of step events to fire in this segment.
    pub n_step: u8,
    /// Interrupt ticks to run after the last step, keeping the pulse-train
    /// phase aligned into the next segment.
    pub n_phase_tick: u8,
    /// Inverse-time increment, `INV_TIME_MULTIPLIER * mm` per interrupt tick.
    pub dist_per_tick: u32,
    /// Index of the [`BlockData`] slot this segment executes against.
    pub data_index: u8,
    /// Bit flags, see [`SEGMENT_END_OF_BLOCK`].
    pub flags: u8,
}

impl Segment {
    const EMPTY: Self = Self {
        n_step: 0,
        n_phase_tick: 0,
        dist_per_tick: 0,
        data_index: 0,
        flags: 0,
    };
}

impl Default for Segment {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Per-block execution parameters shared between the segments of one planner
/// block. All rates are expressed in steps of that block.
///
/// The preparer mutates the rate and profile fields while slicing; the
/// executor reads only `dist_per_step`, which is fixed before the first
/// referencing segment is published and carried forward unchanged across a
/// mid-block replan.
#[derive(Debug, Copy, Clone, Default)]
pub struct BlockData {
    /// Inverse-time reload value, `ceil(INV_TIME_MULTIPLIER / step_per_mm)`.
    pub dist_per_step: u32,
    /// Step events left in the block, fractional.
    pub step_events_remaining: f32,
    /// Steps-remaining threshold above which the block accelerates.
    pub accelerate_until: f32,
    /// Steps-remaining threshold at or below which the block decelerates.
    pub decelerate_after: f32,
    /// Rate at the current slicing position, steps/s.
    pub current_rate: f32,
    /// Rate ceiling of the profile, steps/s.
    pub maximum_rate: f32,
    /// Rate at the end of the block, steps/s.
    pub exit_rate: f32,
    /// Acceleration in steps/s^2.
    pub acceleration: f32,
    /// Conversion factor of this block, steps per mm.
    pub step_per_mm: f32,
}

/// The segment ring plus its block-data table. Construct once (typically in
/// a `static`), then [`split`](Self::split) into the two halves.
pub struct SegmentQueue {
    segments: [UnsafeCell<Segment>; SEGMENT_BUFFER_SIZE],
    data: [UnsafeCell<BlockData>; SEGMENT_DATA_SLOTS],
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: the producer and consumer halves enforce disjoint slot access via
// the head/tail protocol described in the module docs.
unsafe impl Sync for SegmentQueue {}

impl SegmentQueue {
    pub const fn new() -> Self {
        const SEG: UnsafeCell<Segment> = UnsafeCell::new(Segment::EMPTY);
        const DATA: UnsafeCell<BlockData> = UnsafeCell::new(BlockData {
            dist_per_step: 0,
            step_events_remaining: 0.0,
            accelerate_until: 0.0,
            decelerate_after: 0.0,
            current_rate: 0.0,
            maximum_rate: 0.0,
            exit_rate: 0.0,
            acceleration: 0.0,
            step_per_mm: 0.0,
        });
        Self {
            segments: [SEG; SEGMENT_BUFFER_SIZE],
            data: [DATA; SEGMENT_DATA_SLOTS],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Splits the queue into its producer and consumer halves, resetting the
    /// ring indices. The `&mut` receiver guarantees no half from a previous
    /// split is still alive.
    pub fn split(&mut self) -> (SegmentProducer<'_>, SegmentConsumer<'_>) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        let queue: &Self = self;
        (SegmentProducer { queue }, SegmentConsumer { queue })
    }

    /// Number of published, unconsumed segments.
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + SEGMENT_BUFFER_SIZE - tail) % SEGMENT_BUFFER_SIZE
    }
}

impl Default for SegmentQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Foreground half: publishes segments and owns the block-data slots that no
/// live segment references yet.
pub struct SegmentProducer<'a> {
    queue: &'a SegmentQueue,
}

impl SegmentProducer<'_> {
    /// True when only the reserved slot is left.
    pub fn is_full(&self) -> bool {
        let head = self.queue.head.load(Ordering::Relaxed);
        let next = (head + 1) % SEGMENT_BUFFER_SIZE;
        next == self.queue.tail.load(Ordering::Acquire)
    }

    /// Publishes a segment. Returns it back if the ring is full.
    pub fn push(&mut self, segment: Segment) -> Result<(), Segment> {
        let head = self.queue.head.load(Ordering::Relaxed);
        let next = (head + 1) % SEGMENT_BUFFER_SIZE;
        if next == self.queue.tail.load(Ordering::Acquire) {
            return Err(segment);
        }
        // Safety: the slot at `head` is the reserved slot, unreachable from
        // the consumer until the store below publishes it.
        unsafe { *self.queue.segments[head].get() = segment };
        self.queue.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Mutable access to a block-data slot being prepared.
    ///
    /// Must only be called for the slot the preparer is currently filling.
    /// The consumer reads exactly one field of the table, `dist_per_step`,
    /// so that field must be final before the first segment referencing the
    /// slot is pushed; the remaining fields are prep-side scratch for the
    /// whole life of the block. A slot becomes writable again only after the
    /// round-robin allocation comes back to it, by which time the ring
    /// capacity guarantees its last referencing segment has drained.
    pub fn data_mut(&mut self, index: u8) -> &mut BlockData {
        debug_assert!((index as usize) < SEGMENT_DATA_SLOTS);
        // Safety: see above; the one consumer-visible field is write-once
        // per block and published before the segment that exposes it.
        unsafe { &mut *self.queue.data[index as usize].get() }
    }

    /// Copy of a block-data slot. Reads are always safe on the producer
    /// side: the consumer never writes the table.
    pub fn data(&self, index: u8) -> BlockData {
        debug_assert!((index as usize) < SEGMENT_DATA_SLOTS);
        // Safety: the consumer only ever reads this table.
        unsafe { *self.queue.data[index as usize].get() }
    }

    /// Drops every published segment by declaring the ring empty. Only valid
    /// while the consumer side is quiescent (step interrupt stopped), which
    /// is the one situation `reset` is specified for.
    pub fn flush(&mut self) {
        let tail = self.queue.tail.load(Ordering::Acquire);
        self.queue.head.store(tail, Ordering::Release);
    }

    /// Number of published, unconsumed segments.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interrupt half: peeks segments at `tail` and retires them once fully
/// executed.
pub struct SegmentConsumer<'a> {
    queue: &'a SegmentQueue,
}

impl SegmentConsumer<'_> {
    /// Copy of the segment at `tail`, or `None` when the ring is empty. Does
    /// not retire the slot.
    pub fn peek(&self) -> Option<Segment> {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        if tail == self.queue.head.load(Ordering::Acquire) {
            return None;
        }
        // Safety: a non-empty ring never lets the producer write the slot at
        // `tail`; the acquire load above ordered the slot contents.
        Some(unsafe { *self.queue.segments[tail].get() })
    }

    /// Inverse-time reload value of the referenced block-data slot.
    pub fn dist_per_step(&self, index: u8) -> u32 {
        debug_assert!((index as usize) < SEGMENT_DATA_SLOTS);
        // Safety: slots referenced by live segments are read-only for the
        // producer (module docs).
        unsafe { (*self.queue.data[index as usize].get()).dist_per_step }
    }

    /// Retires the segment at `tail` after it has fully executed.
    pub fn finish(&mut self) {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        debug_assert_ne!(tail, self.queue.head.load(Ordering::Acquire));
        self.queue
            .tail
            .store((tail + 1) % SEGMENT_BUFFER_SIZE, Ordering::Release);
    }

    /// Number of published, unconsumed segments.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
