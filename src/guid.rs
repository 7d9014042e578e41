//! GUID Leasing
//!
//! Identifiers come from a bounded range `[1, uid_max]`. The daemon carves
//! contiguous blocks off its range for clients; each client issues ids from
//! its own block without further coordination and asks for another block
//! when it runs dry. A block is never handed out twice, so ids never collide.
//!
//! In a multi-daemon deployment each daemon owns a disjoint slice of the
//! range selected by its rank, fixed before any client connects.

use parking_lot::Mutex;

pub const DEFAULT_UID_MAX: u64 = 1_000_000_000_000;
pub const DEFAULT_GUID_BLOCK: u64 = 4096;

/// Error type for GUID issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuidError {
    /// Every id in the current range has been issued
    Exhausted { next: u64, last: u64 },
    /// A client could not obtain a fresh block from its daemon
    Refill(String),
}

impl std::fmt::Display for GuidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuidError::Exhausted { next, last } => {
                write!(f, "GUID pool exhausted (next {} > last {})", next, last)
            }
            GuidError::Refill(msg) => write!(f, "GUID block refill failed: {}", msg),
        }
    }
}

impl std::error::Error for GuidError {}

/// Inclusive id range `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuidBlock {
    pub from: u64,
    pub to: u64,
}

impl GuidBlock {
    pub fn new(from: u64, to: u64) -> Self {
        GuidBlock { from, to }
    }

    pub fn len(&self) -> u64 {
        if self.to < self.from {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.from && id <= self.to
    }

    pub fn overlaps(&self, other: &GuidBlock) -> bool {
        !self.is_empty() && !other.is_empty() && self.from <= other.to && other.from <= self.to
    }
}

/// Anything that can hand out fresh ids
pub trait GuidSource: Send + Sync {
    fn next_guid(&self) -> Result<u64, GuidError>;
}

#[derive(Debug)]
struct Range {
    next: u64,
    last: u64,
}

/// Mutex-guarded `next`/`last` pair
#[derive(Debug)]
pub struct GuidAllocator {
    range: Mutex<Range>,
}

impl GuidAllocator {
    /// Issue ids from the inclusive range `[first, last]`.
    pub fn new(first: u64, last: u64) -> Self {
        GuidAllocator {
            range: Mutex::new(Range { next: first, last }),
        }
    }

    /// An allocator with nothing to issue until [`GuidAllocator::refill`].
    pub fn empty() -> Self {
        GuidAllocator::new(1, 0)
    }

    /// The slice of `[1, uid_max]` owned by daemon `comm_rank` of `comm_size`.
    pub fn for_rank(uid_max: u64, comm_rank: u32, comm_size: u32) -> Self {
        let size = u64::from(comm_size.max(1));
        let rank = u64::from(comm_rank);
        debug_assert!(rank < size, "rank {} outside comm size {}", rank, size);
        let span = uid_max / size;
        let first = rank * span + 1;
        GuidAllocator::new(first, first + span - 1)
    }

    /// Issue one id.
    pub fn next_id(&self) -> Result<u64, GuidError> {
        let mut range = self.range.lock();
        if range.next > range.last {
            return Err(GuidError::Exhausted {
                next: range.next,
                last: range.last,
            });
        }
        let id = range.next;
        range.next += 1;
        Ok(id)
    }

    /// Carve `size + 1` ids off the front of the range. When fewer remain the
    /// remainder is returned and the allocator is left exhausted.
    pub fn claim_block(&self, size: u64) -> Result<GuidBlock, GuidError> {
        let mut range = self.range.lock();
        if range.next > range.last {
            return Err(GuidError::Exhausted {
                next: range.next,
                last: range.last,
            });
        }

        let block = match range.next.checked_add(size) {
            Some(end) if end <= range.last => {
                let block = GuidBlock::new(range.next, end);
                range.next = end + 1;
                block
            }
            _ => {
                let block = GuidBlock::new(range.next, range.last);
                range.next = range.last + 1;
                block
            }
        };

        debug_assert!(block.from <= block.to);
        debug_assert!(range.next > block.to);
        Ok(block)
    }

    /// Replace the range with a newly leased block.
    pub fn refill(&self, block: GuidBlock) {
        let mut range = self.range.lock();
        range.next = block.from;
        range.last = block.to;
    }

    pub fn remaining(&self) -> u64 {
        let range = self.range.lock();
        GuidBlock::new(range.next, range.last).len()
    }

    /// Current `(next, last)`.
    pub fn bounds(&self) -> (u64, u64) {
        let range = self.range.lock();
        (range.next, range.last)
    }
}

impl GuidSource for GuidAllocator {
    fn next_guid(&self) -> Result<u64, GuidError> {
        self.next_id()
    }
}
