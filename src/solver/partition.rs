//! Row-range partition of the global index space.
//!
//! The unknowns `[0, N)` are split into contiguous per-rank subranges. The
//! table is assembled collectively by all-gathering the local row counts, so
//! every rank ends up with the identical map and can answer column-ownership
//! queries locally.

use super::comm::Communicator;
use crate::error::{Result, SubdefError};

/// Per-rank row-range table.
///
/// `domain[p]` is the first global index owned by rank `p`;
/// `domain[size]` is the global problem size.
#[derive(Debug, Clone)]
pub struct Partition {
    domain: Vec<usize>,
}

impl Partition {
    /// Collectively build the table from this rank's row count.
    pub fn gather(comm: &dyn Communicator, local_rows: usize) -> Self {
        let sizes = comm.all_gather_indices(&[local_rows]);
        let mut domain = vec![0; comm.size() + 1];
        for (p, s) in sizes.iter().enumerate() {
            domain[p + 1] = domain[p] + s[0];
        }
        Self { domain }
    }

    /// Table from explicit per-rank row counts. Used by tests and adapters
    /// that already know the full layout.
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut domain = vec![0; sizes.len() + 1];
        for (p, &s) in sizes.iter().enumerate() {
            domain[p + 1] = domain[p] + s;
        }
        Self { domain }
    }

    /// Global problem size `N`.
    pub fn total(&self) -> usize {
        *self.domain.last().unwrap()
    }

    /// First global index owned by `rank`.
    pub fn start(&self, rank: usize) -> usize {
        self.domain[rank]
    }

    /// One past the last global index owned by `rank`.
    pub fn end(&self, rank: usize) -> usize {
        self.domain[rank + 1]
    }

    /// Number of rows owned by `rank`.
    pub fn size_of(&self, rank: usize) -> usize {
        self.end(rank) - self.start(rank)
    }

    /// Rank owning global column `col`: `upper_bound(domain, col) - 1`.
    pub fn owner(&self, col: usize) -> usize {
        self.domain.partition_point(|&d| d <= col) - 1
    }

    /// Reject columns outside the global range.
    pub fn check_col(&self, col: usize) -> Result<()> {
        if col >= self.total() {
            return Err(SubdefError::Setup(format!(
                "column {} outside the global range [0, {})",
                col,
                self.total()
            )));
        }
        Ok(())
    }
}
