//! Bounded lock-free MPSC queue for encoded frames.
//!
//! One queue feeds each async sink's worker. Producers claim a slot with a
//! compare-and-swap on the tail counter and publish through the slot's
//! sequence number; the single consumer claims from the head the same way.
//! The fast path touches no locks. Parking, both the consumer waiting for
//! frames and producers waiting for space under the block policy, goes
//! through a condvar with bounded waits, so a lost wakeup race costs
//! latency, never progress.
//!
//! The head is also claimed by CAS so that a producer applying the
//! drop-oldest overflow policy can evict the oldest published frame while
//! competing fairly with the consumer; each slot is still consumed exactly
//! once.

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Default per-sink queue capacity.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Outcome of a blocking dequeue.
pub enum Dequeue {
    Frame(Frame),
    Timeout,
    /// Shutdown is latched and the queue is empty.
    Shutdown,
}

struct Slot {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<Frame>>,
}

pub struct FrameQueue {
    mask: usize,
    slots: Box<[Slot]>,
    tail: CachePadded<AtomicUsize>,
    head: CachePadded<AtomicUsize>,
    shutdown: AtomicBool,
    consumer_parked: AtomicBool,
    producers_waiting: AtomicUsize,
    park: Mutex<()>,
    ready: Condvar,
    not_full: Condvar,
}

unsafe impl Send for FrameQueue {}
unsafe impl Sync for FrameQueue {}

impl FrameQueue {
    /// Create a queue holding at least `capacity` frames. The capacity is
    /// rounded up to a power of two, minimum 2.
    pub fn with_capacity(capacity: usize) -> FrameQueue {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        FrameQueue {
            mask: capacity - 1,
            slots,
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
            consumer_parked: AtomicBool::new(false),
            producers_waiting: AtomicUsize::new(0),
            park: Mutex::new(()),
            ready: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate number of queued frames.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a frame. Returns the frame back when the queue is full so
    /// the caller can apply its overflow policy.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), Frame> {
        let backoff = Backoff::new();
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos as isize);
            if dif == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(frame) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        // Notify without taking the park mutex: a lost race
                        // with a consumer about to sleep is bounded by its
                        // wait timeout, and skipping the lock keeps this
                        // callable from contexts that already hold it.
                        if self.consumer_parked.load(Ordering::Acquire) {
                            self.ready.notify_one();
                        }
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // The claimed position still holds a frame the consumer has
                // not freed: the queue is full.
                return Err(frame);
            } else {
                backoff.spin();
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Enqueue under the block policy: bounded exponential backoff, then
    /// park until the consumer frees space. Returns the frame back only if
    /// shutdown is latched while waiting.
    pub fn enqueue_blocking(&self, frame: Frame) -> Result<(), Frame> {
        let mut frame = frame;
        let backoff = Backoff::new();
        loop {
            match self.try_enqueue(frame) {
                Ok(()) => return Ok(()),
                Err(back) => frame = back,
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(frame);
            }
            if backoff.is_completed() {
                self.producers_waiting.fetch_add(1, Ordering::SeqCst);
                let mut guard = self.park.lock();
                if self.len() > self.mask {
                    // Still full: wait, bounded so a lost wakeup cannot
                    // strand us.
                    self.not_full
                        .wait_for(&mut guard, Duration::from_millis(10));
                }
                drop(guard);
                self.producers_waiting.fetch_sub(1, Ordering::SeqCst);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Claim and remove the oldest published frame. Used by the worker and
    /// by producers evicting under the drop-oldest policy.
    pub fn pop_front(&self) -> Option<Frame> {
        let backoff = Backoff::new();
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize);
            if dif == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let frame = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        // Lockless notify; see try_enqueue. The consumer
                        // calls this while holding the park mutex.
                        if self.producers_waiting.load(Ordering::Relaxed) > 0 {
                            self.not_full.notify_all();
                        }
                        return Some(frame);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return None;
            } else {
                backoff.spin();
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Consumer-side blocking dequeue with a wake interval. Spins briefly,
    /// then parks until a producer publishes, the timeout elapses, or
    /// shutdown is signalled with the queue drained.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Dequeue {
        let backoff = Backoff::new();
        loop {
            if let Some(frame) = self.pop_front() {
                return Dequeue::Frame(frame);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Dequeue::Shutdown;
            }
            if backoff.is_completed() {
                break;
            }
            backoff.snooze();
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.park.lock();
        loop {
            self.consumer_parked.store(true, Ordering::SeqCst);
            if let Some(frame) = self.pop_front() {
                self.consumer_parked.store(false, Ordering::Relaxed);
                return Dequeue::Frame(frame);
            }
            if self.shutdown.load(Ordering::Acquire) {
                self.consumer_parked.store(false, Ordering::Relaxed);
                return Dequeue::Shutdown;
            }
            if self.ready.wait_until(&mut guard, deadline).timed_out() {
                self.consumer_parked.store(false, Ordering::Relaxed);
                return match self.pop_front() {
                    Some(frame) => Dequeue::Frame(frame),
                    None if self.shutdown.load(Ordering::Acquire) => Dequeue::Shutdown,
                    None => Dequeue::Timeout,
                };
            }
        }
    }

    /// Latch shutdown and wake everyone parked on the queue.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.park.lock();
        self.ready.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for FrameQueue {
    fn drop(&mut self) {
        while let Some(frame) = self.pop_front() {
            frame.recycle();
        }
    }
}
