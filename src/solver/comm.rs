//! Communication backend abstraction for the distributed solver.
//!
//! Provides the [`Communicator`] trait the deflation setup and the online
//! operator are written against, the message tags that segregate traffic
//! classes, and the send/receive schedule structs produced by the
//! halo-exchange setup.
//!
//! Implementations: `LocalComm` (in-process, any number of ranks on
//! threads), `MpiComm` (via the mpi crate, `distributed` feature).

use std::sync::Arc;

/// Message tag. Each traffic class gets its own tag so payloads between the
/// same pair of ranks never mix across phases.
pub type Tag = u16;

/// Ghost-column id lists exchanged during schedule construction.
pub const TAG_EXC_COLS: Tag = 1001;
/// Halo values (and deflation-vector payloads during setup).
pub const TAG_EXC_VALS: Tag = 2001;
/// Coarse-matrix rows shipped to master ranks.
pub const TAG_EXC_DMAT: Tag = 3001;
/// Coarse right-hand-side / solution slices.
pub const TAG_EXC_DVEC: Tag = 4001;
/// Per-rank coarse row lengths.
pub const TAG_EXC_LNNZ: Tag = 5001;

/// Abstraction over inter-rank communication.
///
/// Point-to-point semantics: `send_*` buffers the message and returns
/// without waiting for the receiver (this is what lets the local spmv run
/// between posting sends and collecting receives); `recv_*` blocks until a
/// matching message arrives. Within one (source, destination, tag) channel
/// messages are delivered in issue order.
///
/// All collectives are collective over every rank of the communicator and
/// must be called in the same order on each.
pub trait Communicator: Send + Sync {
    /// This rank's id within the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    fn send_indices(&self, to: usize, tag: Tag, data: &[usize]);

    fn send_values(&self, to: usize, tag: Tag, data: &[f64]);

    fn recv_indices(&self, from: usize, tag: Tag) -> Vec<usize>;

    fn recv_values(&self, from: usize, tag: Tag) -> Vec<f64>;

    /// Every rank's contribution, indexed by rank. Contributions may have
    /// different lengths.
    fn all_gather_indices(&self, data: &[usize]) -> Vec<Vec<usize>>;

    fn all_gather_values(&self, data: &[f64]) -> Vec<Vec<f64>>;

    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> f64;

    /// Gather variable-length value slices to `root`. Returns per-rank
    /// contributions on the root, `None` elsewhere.
    fn gather_values(&self, data: &[f64], root: usize) -> Option<Vec<Vec<f64>>>;

    /// Broadcast `buf` from `root`; other ranks' buffers are overwritten
    /// (and resized if needed).
    fn broadcast_values(&self, buf: &mut Vec<f64>, root: usize);

    /// Split into sub-communicators by colour. Ranks passing `None` drop out
    /// and get `None` back; ranks sharing a colour value form a new group
    /// ordered by their rank in the parent.
    fn split(&self, colour: Option<usize>) -> Option<Arc<dyn Communicator>>;

    /// Synchronization barrier.
    fn barrier(&self);
}

/// Receive side of the halo-exchange schedule.
///
/// `nbr[i]` is a source rank, `ptr[i]..ptr[i+1]` its span in the ghost
/// numbering. `ptr` covers `[0, n_ghost)` exactly.
#[derive(Debug, Default)]
pub struct RecvSchedule {
    pub nbr: Vec<usize>,
    pub ptr: Vec<usize>,
}

/// Send side of the halo-exchange schedule.
///
/// `col[ptr[i]..ptr[i+1]]` holds the local indices whose values rank
/// `nbr[i]` consumes.
#[derive(Debug, Default)]
pub struct SendSchedule {
    pub nbr: Vec<usize>,
    pub ptr: Vec<usize>,
    pub col: Vec<usize>,
}

impl RecvSchedule {
    /// Source rank owning ghost column `c`, by binary search over `ptr`.
    pub fn owner_of_ghost(&self, c: usize) -> usize {
        let idx = self.ptr.partition_point(|&p| p <= c) - 1;
        self.nbr[idx]
    }
}
