//! Lock-Free Ring Buffer Implementation

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Lock-free SPSC ring buffer with `N` slots.
///
/// `head` is the next slot to write, `tail` the next slot to read and
/// `head == tail` means empty. The producer never advances `head` onto
/// `tail`, so at most `N - 1` items are ever buffered and a push into a
/// full buffer drops the new item, leaving everything already queued
/// untouched.
///
/// Each side is guarded by a try-flag: a second producer (or consumer)
/// racing the first one is turned away instead of blocking, which keeps
/// both operations safe to call from interrupt context.
pub struct RingBuffer<T, const N: usize> {
    /// Pre-allocated storage
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    /// Head position (write pointer)
    head: AtomicUsize,
    /// Tail position (read pointer)
    tail: AtomicUsize,
    /// Set while a producer is inside `push`
    producing: AtomicBool,
    /// Set while a consumer is inside `pop`
    consuming: AtomicBool,
    /// Total items accepted (for statistics)
    total_written: AtomicUsize,
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    /// Create an empty buffer. Usable in `static` initialisers.
    pub const fn new() -> Self {
        assert!(N >= 2, "ring buffer needs at least two slots");
        Self {
            slots: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            producing: AtomicBool::new(false),
            consuming: AtomicBool::new(false),
            total_written: AtomicUsize::new(0),
        }
    }

    /// Push an item. Never blocks.
    ///
    /// Returns the item back when the buffer is full or another producer
    /// is mid-push; the caller decides whether that counts as a drop.
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.producing.swap(true, Ordering::Acquire) {
            return Err(item);
        }

        let head = self.head.load(Ordering::Relaxed);
        let next_head = (head + 1) % N;

        let result = if next_head == self.tail.load(Ordering::Acquire) {
            Err(item)
        } else {
            // SAFETY: only the producer holding `producing` writes slots, and
            // the consumer never reads the slot at `head` until it is published.
            unsafe { (*self.slots[head].get()).write(item) };
            self.head.store(next_head, Ordering::Release);
            self.total_written.fetch_add(1, Ordering::Relaxed);
            Ok(())
        };

        self.producing.store(false, Ordering::Release);
        result
    }

    /// Remove the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        if self.consuming.swap(true, Ordering::Acquire) {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let item = if tail == self.head.load(Ordering::Acquire) {
            None
        } else {
            // SAFETY: `tail != head`, so the producer initialised this slot and
            // published it with the Release store on `head`.
            let item = unsafe { (*self.slots[tail].get()).assume_init_read() };
            self.tail.store((tail + 1) % N, Ordering::Release);
            Some(item)
        };

        self.consuming.store(false, Ordering::Release);
        item
    }

    /// Get the number of items currently in the buffer
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            N - tail + head
        }
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Usable capacity, one less than the slot count
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// Get total items accepted (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Discard everything currently buffered. Consumer side.
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: slot access is serialised by the head/tail protocol and the
// per-side try-flags; items only cross threads by value.
unsafe impl<T: Send, const N: usize> Send for RingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}
