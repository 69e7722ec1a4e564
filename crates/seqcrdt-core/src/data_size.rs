//! Data size accounting for storage-quota bookkeeping.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Serialized size of one `TimeTicket`: lamport (8) + delimiter (4) + actor (12).
pub const TIME_TICKET_SIZE: usize = 8 + 4 + 12;

/// Content bytes (`data`) and bookkeeping bytes (`meta`) of a node or element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSize {
    pub data: usize,
    pub meta: usize,
}

impl DataSize {
    pub fn new(data: usize, meta: usize) -> Self {
        Self { data, meta }
    }

    pub fn total(&self) -> usize {
        self.data + self.meta
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(self, other: DataSize) -> DataSize {
        DataSize {
            data: self.data.saturating_sub(other.data),
            meta: self.meta.saturating_sub(other.meta),
        }
    }
}

impl Add for DataSize {
    type Output = DataSize;

    fn add(self, other: DataSize) -> DataSize {
        DataSize {
            data: self.data + other.data,
            meta: self.meta + other.meta,
        }
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, other: DataSize) {
        self.data += other.data;
        self.meta += other.meta;
    }
}

/// Size split into what is visible and what only waits for GC: tombstoned
/// nodes and removed attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocSize {
    pub live: DataSize,
    pub gc: DataSize,
}

impl DocSize {
    pub fn live(live: DataSize) -> Self {
        DocSize { live, gc: DataSize::default() }
    }

    pub fn garbage(gc: DataSize) -> Self {
        DocSize { live: DataSize::default(), gc }
    }
}

impl Add for DocSize {
    type Output = DocSize;

    fn add(self, other: DocSize) -> DocSize {
        DocSize {
            live: self.live + other.live,
            gc: self.gc + other.gc,
        }
    }
}

impl AddAssign for DocSize {
    fn add_assign(&mut self, other: DocSize) {
        self.live += other.live;
        self.gc += other.gc;
    }
}
