//! Pooled frame storage.
//!
//! Encoding allocates exactly one buffer per frame. Buffers come from a
//! global pool of power-of-two buckets and are returned by the worker once
//! the frame has been written, so a steady-state pipeline recycles the same
//! handful of buffers instead of hitting the allocator per record.

use parking_lot::Mutex;

/// Smallest bucket capacity.
const MIN_BUCKET: usize = 256;
/// Bucket capacities: 256 B up to 64 KiB.
const BUCKETS: usize = 9;
/// Buffers retained per bucket; beyond this, returned buffers are freed.
const MAX_POOLED: usize = 64;

static POOL: [Mutex<Vec<Vec<u8>>>; BUCKETS] = [
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
    Mutex::new(Vec::new()),
];

fn bucket_for(len: usize) -> Option<usize> {
    let mut cap = MIN_BUCKET;
    for idx in 0..BUCKETS {
        if len <= cap {
            return Some(idx);
        }
        cap <<= 1;
    }
    None
}

fn bucket_cap(idx: usize) -> usize {
    MIN_BUCKET << idx
}

/// Take an empty buffer with capacity for at least `len` bytes.
pub(crate) fn take(len: usize) -> Vec<u8> {
    match bucket_for(len) {
        Some(idx) => {
            if let Some(buf) = POOL[idx].lock().pop() {
                return buf;
            }
            Vec::with_capacity(bucket_cap(idx))
        }
        // Oversize requests bypass the pool entirely.
        None => Vec::with_capacity(len),
    }
}

/// Return a buffer to its bucket. Buffers whose capacity matches no bucket
/// are dropped.
pub(crate) fn give(mut buf: Vec<u8>) {
    let cap = buf.capacity();
    if cap < MIN_BUCKET || !cap.is_power_of_two() || cap > bucket_cap(BUCKETS - 1) {
        return;
    }
    let idx = match bucket_for(cap) {
        Some(idx) if bucket_cap(idx) == cap => idx,
        _ => return,
    };
    buf.clear();
    let mut bucket = POOL[idx].lock();
    if bucket.len() < MAX_POOLED {
        bucket.push(buf);
    }
}
