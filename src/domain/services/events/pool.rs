//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                   | Key Methods                   |
// |---------------|-----------------------------------------------|-------------------------------|
// | EnvelopePool  | Free-list of boxed envelope shells            | acquire, release              |
// | PoolStats     | Counters for allocations and reuse            |                               |
//--------------------------------------------------------------------------------------------------

use crate::domain::models::event::Envelope;

/// Counters describing how the pool has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Shells created because the free-list was empty
    pub allocated: u64,
    /// Shells handed out again from the free-list
    pub reused: u64,
    /// Shells dropped on release because the pool was at `max_size`
    pub discarded: u64,
}

/// Recycles the heap storage of envelopes between publishes.
///
/// Pool exhaustion is not an error: `acquire` falls back to a fresh allocation
/// and `release` simply lets the shell go when the free-list is full.
#[derive(Debug)]
pub struct EnvelopePool {
    free: Vec<Box<Envelope>>,
    max_size: usize,
    stats: PoolStats,
}

impl EnvelopePool {
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_size.min(1024)),
            max_size,
            stats: PoolStats::default(),
        }
    }

    /// Moves `envelope` into a recycled shell, or a new box if none is free.
    pub fn acquire(&mut self, envelope: Envelope) -> Box<Envelope> {
        match self.free.pop() {
            Some(mut shell) => {
                *shell = envelope;
                self.stats.reused += 1;
                shell
            }
            None => {
                self.stats.allocated += 1;
                Box::new(envelope)
            }
        }
    }

    /// Returns a shell once it has been dispatched or dropped.
    ///
    /// The shell keeps its last envelope, payload strings included, until the
    /// next `acquire` overwrites it, so up to `max_size` stale events stay resident.
    pub fn release(&mut self, shell: Box<Envelope>) {
        if self.free.len() < self.max_size {
            self.free.push(shell);
        } else {
            self.stats.discarded += 1;
        }
    }

    /// Shells currently waiting on the free-list.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
