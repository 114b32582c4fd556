//! Lock-free ring of buffer handles
//!
//! A fixed-capacity single-producer single-consumer (SPSC) queue. The
//! capture pipeline moves [`BufferHandle`](crate::audio::pool::BufferHandle)s
//! between three of these; the handles themselves are tiny, so the ring never
//! touches audio bytes.
//!
//! The shared state is split into a [`Producer`] and a [`Consumer`] half.
//! Both halves take `&mut self`, so the "exactly one pusher, exactly one
//! popper" discipline is checked by the compiler instead of by convention.
//!
//! Head and tail are cursors in `0..2 * capacity`. The queue is empty when
//! they are equal and full when they differ by exactly `capacity`, so no
//! separate emptiness flag is kept.

use crossbeam::utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared storage of an SPSC ring.
pub struct RingHandle<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    /// Next cursor to pop. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next cursor to push. Written only by the producer.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: a slot is written only by the producer while it is outside
// `head..tail`, and read only by the consumer while it is inside. The cursor
// stores use release ordering and the loads on the opposite side use acquire
// ordering, so a slot's contents are published before it changes hands.
unsafe impl<T: Send> Sync for RingHandle<T> {}
unsafe impl<T: Send> Send for RingHandle<T> {}

impl<T> RingHandle<T> {
    /// Create a ring that can hold up to `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Split the ring into its producer and consumer halves.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let shared = Arc::new(self);
        (
            Producer {
                ring: shared.clone(),
            },
            Consumer { ring: shared },
        )
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently queued.
    ///
    /// Exact when called from either half; a snapshot otherwise.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.distance(head, tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn distance(&self, head: usize, tail: usize) -> usize {
        if tail >= head {
            tail - head
        } else {
            tail + 2 * self.capacity - head
        }
    }

    fn advance(&self, cursor: usize) -> usize {
        let next = cursor + 1;
        if next == 2 * self.capacity {
            0
        } else {
            next
        }
    }

    fn slot(&self, cursor: usize) -> &UnsafeCell<MaybeUninit<T>> {
        let index = if cursor >= self.capacity {
            cursor - self.capacity
        } else {
            cursor
        };
        &self.slots[index]
    }
}

impl<T> Drop for RingHandle<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            // SAFETY: every cursor in head..tail holds an initialized value
            // and we have exclusive access.
            unsafe { (*self.slot(head).get()).assume_init_drop() };
            head = self.advance(head);
        }
    }
}

/// Pushing half of a [`RingHandle`].
pub struct Producer<T> {
    ring: Arc<RingHandle<T>>,
}

impl<T> Producer<T> {
    /// Append `value` at the tail.
    ///
    /// The pipeline never holds more handles than a ring's capacity, so a
    /// full ring is a protocol violation. The value is handed back rather
    /// than overwriting a live slot.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);

        if ring.distance(head, tail) == ring.capacity {
            return Err(value);
        }

        // SAFETY: the slot at `tail` is outside head..tail, so the consumer
        // does not read it until the release store below.
        unsafe { (*ring.slot(tail).get()).write(value) };
        ring.tail.store(ring.advance(tail), Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }
}

/// Popping half of a [`RingHandle`].
pub struct Consumer<T> {
    ring: Arc<RingHandle<T>>,
}

impl<T> Consumer<T> {
    /// Remove the oldest entry, or return `None` immediately if empty.
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        // SAFETY: the slot at `head` is inside head..tail and was published
        // by the producer's release store observed above.
        let value = unsafe { (*ring.slot(head).get()).assume_init_read() };
        ring.head.store(ring.advance(head), Ordering::Release);
        Some(value)
    }

    /// Remove the oldest entry, spinning until one is pushed or the caller
    /// stops waiting.
    ///
    /// Spins briefly, then yields the processor on every empty poll.
    /// `keep_waiting` is consulted after every empty poll; the wait gives up
    /// with `None` as soon as it returns `false`.
    pub fn pop_while(&mut self, mut keep_waiting: impl FnMut() -> bool) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.pop() {
                return Some(value);
            }
            if !keep_waiting() {
                return None;
            }
            backoff.snooze();
        }
    }

    /// Borrow the oldest entry without removing it.
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        // SAFETY: the slot stays inside head..tail until this consumer pops
        // it, which requires `&mut self` and ends the borrow.
        Some(unsafe { (*ring.slot(head).get()).assume_init_mut() })
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }
}

/// Create an SPSC ring of `capacity` entries and split it.
pub fn ring<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    RingHandle::with_capacity(capacity).split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ring_fifo_basic() {
        let (mut tx, mut rx) = ring::<u32>(4);

        assert!(rx.pop().is_none());
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();
        assert_eq!(rx.len(), 3);

        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert!(rx.pop().is_none());
        assert!(tx.is_empty());
    }

    #[test]
    fn test_ring_full_hands_value_back() {
        let (mut tx, mut rx) = ring::<u32>(2);

        tx.push(10).unwrap();
        tx.push(11).unwrap();
        assert_eq!(tx.push(12), Err(12));
        assert_eq!(tx.len(), 2);

        assert_eq!(rx.pop(), Some(10));
        tx.push(12).unwrap();
        assert_eq!(rx.pop(), Some(11));
        assert_eq!(rx.pop(), Some(12));
    }

    #[test]
    fn test_ring_wraps_many_times() {
        let (mut tx, mut rx) = ring::<usize>(3);

        for round in 0..100 {
            tx.push(round * 2).unwrap();
            tx.push(round * 2 + 1).unwrap();
            assert_eq!(rx.len(), 2);
            assert_eq!(rx.pop(), Some(round * 2));
            assert_eq!(rx.pop(), Some(round * 2 + 1));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_peek_mut_does_not_consume() {
        let (mut tx, mut rx) = ring::<Vec<u8>>(2);
        tx.push(vec![0; 4]).unwrap();

        rx.peek_mut().unwrap()[0] = 7;
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.pop().unwrap(), vec![7, 0, 0, 0]);
        assert!(rx.peek_mut().is_none());
    }

    #[test]
    fn test_drop_releases_queued_values() {
        let tracker = Arc::new(());
        {
            let (mut tx, _rx) = ring::<Arc<()>>(4);
            tx.push(tracker.clone()).unwrap();
            tx.push(tracker.clone()).unwrap();
            assert_eq!(Arc::strong_count(&tracker), 3);
        }
        assert_eq!(Arc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_pop_while_waits_for_push() {
        let (mut tx, mut rx) = ring::<u32>(1);
        let pushed = Arc::new(AtomicBool::new(false));
        let pushed_flag = pushed.clone();

        let consumer = thread::spawn(move || {
            let value = rx.pop_while(|| true);
            // The value can only be observed after the producer pushed it.
            assert!(pushed_flag.load(Ordering::SeqCst));
            value
        });

        thread::sleep(Duration::from_millis(50));
        pushed.store(true, Ordering::SeqCst);
        tx.push(42).unwrap();

        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_pop_while_gives_up_when_cancelled() {
        let (_tx, mut rx) = ring::<u32>(1);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let consumer = thread::spawn(move || rx.pop_while(|| flag.load(Ordering::Acquire)));
        thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Release);

        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_spsc_threads_no_loss_no_duplication() {
        const COUNT: usize = 100_000;
        let (mut tx, mut rx) = ring::<usize>(4);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_consumer = seen.clone();

        let consumer = thread::spawn(move || {
            for expected in 0..COUNT {
                assert_eq!(rx.pop_while(|| true), Some(expected));
                seen_consumer.fetch_add(1, Ordering::Relaxed);
            }
            assert!(rx.pop().is_none());
        });

        for value in 0..COUNT {
            let mut pending = value;
            while let Err(back) = tx.push(pending) {
                pending = back;
                thread::yield_now();
            }
        }

        consumer.join().unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), COUNT);
    }

    proptest! {
        #[test]
        fn prop_pops_return_pushes_in_order(
            capacity in 1usize..16,
            values in proptest::collection::vec(any::<u16>(), 0..16),
        ) {
            let (mut tx, mut rx) = ring::<u16>(capacity);
            let batch: Vec<u16> = values.into_iter().take(capacity).collect();

            for value in &batch {
                prop_assert!(tx.push(*value).is_ok());
            }
            let popped: Vec<u16> = std::iter::from_fn(|| rx.pop()).collect();
            prop_assert_eq!(popped, batch);
        }
    }
}
