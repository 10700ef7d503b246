//! Single-producer/single-consumer ring with batched access.
//!
//! The ring splits into a [`Producer`] and a [`Consumer`] handle; each side
//! keeps a *shadow* copy of the opposite cursor so the cross-core cache
//! line is only re-read when the shadow says the ring looks full (or
//! empty). Batch users call `reserve`/`commit` on the producer side and
//! `peek`/`advance` on the consumer side; `push`/`pop` are the derived
//! single-element operations.
//!
//! Full and empty are reported as zero-length slices. Nothing blocks.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(C)]
struct Shared<T> {
    /// Consumer cursor. Only the consumer stores; the producer reloads it
    /// into its shadow when the ring looks full.
    head: AtomicUsize,
    _pad1: [u8; 56],
    /// Producer cursor.
    tail: AtomicUsize,
    _pad2: [u8; 56],
    mask: usize,
    buffer: Box<[UnsafeCell<T>]>,
}

// Safety: the cursor protocol partitions the buffer between the two sides.
// A cell is written only while tail points at it (before commit) and read
// only while head points at it (before advance); commit/advance publish
// with release stores matched by acquire loads of the opposite cursor.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

/// SPSC ring constructor; see [`SpscRing::with_capacity`].
pub struct SpscRing;

impl SpscRing {
    /// Creates a ring and splits it into its two handles.
    ///
    /// The capacity is rounded up to the next power of two.
    #[must_use]
    pub fn with_capacity<T: Copy + Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
        let capacity = capacity.next_power_of_two();
        let buffer: Box<[UnsafeCell<T>]> =
            (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();

        let shared = Arc::new(Shared {
            head: AtomicUsize::new(0),
            _pad1: [0; 56],
            tail: AtomicUsize::new(0),
            _pad2: [0; 56],
            mask: capacity - 1,
            buffer,
        });

        (
            Producer {
                shared: Arc::clone(&shared),
                cached_head: 0,
            },
            Consumer {
                shared,
                cached_tail: 0,
            },
        )
    }
}

/// Write side of an SPSC ring. Not clonable; exactly one producer exists.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    cached_head: usize,
}

impl<T: Copy + Default> Producer<T> {
    /// Returns the contiguous writable region starting at the current tail.
    ///
    /// The slice length is `min(free space, distance to wrap)`; it is empty
    /// when the ring is full. Written elements become visible to the
    /// consumer only after [`Producer::commit`].
    pub fn reserve(&mut self) -> &mut [T] {
        let shared = &self.shared;
        let capacity = shared.mask + 1;
        let tail = shared.tail.load(Ordering::Relaxed);

        if tail.wrapping_sub(self.cached_head) >= capacity {
            self.cached_head = shared.head.load(Ordering::Acquire);
            if tail.wrapping_sub(self.cached_head) >= capacity {
                return &mut [];
            }
        }

        let index = tail & shared.mask;
        let contiguous =
            (capacity - tail.wrapping_sub(self.cached_head)).min(capacity - index);

        // Safety: [index, index + contiguous) is owned by the producer
        // until commit; the consumer never reads past the committed tail.
        unsafe { std::slice::from_raw_parts_mut(shared.buffer[index].get(), contiguous) }
    }

    /// Publishes `n` elements written into the reserved region.
    pub fn commit(&mut self, n: usize) {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        self.shared.tail.store(tail.wrapping_add(n), Ordering::Release);
    }

    /// Pushes a single element. Returns false when the ring is full.
    pub fn push(&mut self, item: T) -> bool {
        let slot = self.reserve();
        if slot.is_empty() {
            return false;
        }
        slot[0] = item;
        self.commit(1);
        true
    }

    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

/// Read side of an SPSC ring. Not clonable; exactly one consumer exists.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    cached_tail: usize,
}

impl<T: Copy + Default> Consumer<T> {
    /// Returns the contiguous readable region starting at the current head.
    ///
    /// Empty when the ring is empty. Elements stay readable until
    /// [`Consumer::advance`] returns their slots to the producer.
    pub fn peek(&mut self) -> &[T] {
        let shared = &self.shared;
        let head = shared.head.load(Ordering::Relaxed);

        if self.cached_tail <= head {
            self.cached_tail = shared.tail.load(Ordering::Acquire);
            if self.cached_tail <= head {
                return &[];
            }
        }

        let index = head & shared.mask;
        let contiguous = (self.cached_tail - head).min(shared.mask + 1 - index);

        // Safety: [index, index + contiguous) holds committed elements the
        // producer will not touch until advance moves head past them.
        unsafe { std::slice::from_raw_parts(shared.buffer[index].get(), contiguous) }
    }

    /// Returns `n` consumed slots to the producer.
    pub fn advance(&mut self, n: usize) {
        let head = self.shared.head.load(Ordering::Relaxed);
        self.shared.head.store(head.wrapping_add(n), Ordering::Release);
    }

    /// Pops a single element, or `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<T> {
        let slot = self.peek();
        if slot.is_empty() {
            return None;
        }
        let item = slot[0];
        self.advance(1);
        Some(item)
    }

    /// Number of readable elements (approximate from this side).
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// Returns true when no elements are readable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
