//! MPI communication backend.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//! Implements [`Communicator`] using `mpi::traits::*`.
//!
//! # Usage
//!
//! The caller must initialize MPI before constructing `MpiComm`:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::world();
//! ```
//!
//! # Point-to-point semantics
//!
//! `send_*` uses blocking standard-mode MPI sends. The payloads this solver
//! exchanges are small (ghost-column lists, halo strips, coarse-matrix rows)
//! and fit the eager path of every common MPI implementation; self-messages
//! go through an internal loop-back queue so a rank can feed its own
//! receive. TODO: replace the standard-mode sends with immediate sends
//! completed in a wait-all once the exchange buffers are owned by this type.

use super::comm::{Communicator, Tag};
use mpi::collective::SystemOperation;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

enum Loopback {
    Indices(Vec<usize>),
    Values(Vec<f64>),
}

/// MPI-based communicator. Wraps one MPI communicator handle (the world or a
/// colour-split subset).
pub struct MpiComm {
    comm: SimpleCommunicator,
    selfq: Mutex<HashMap<Tag, VecDeque<Loopback>>>,
}

// The solver allows at most one in-flight call per rank, so the MPI handle
// is never used from two threads at once.
unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    /// Communicator over the MPI world.
    ///
    /// Panics if MPI has not been initialized via `mpi::initialize()`.
    pub fn world() -> Self {
        Self::from_comm(SimpleCommunicator::world())
    }

    fn from_comm(comm: SimpleCommunicator) -> Self {
        Self {
            comm,
            selfq: Mutex::new(HashMap::new()),
        }
    }

    fn push_self(&self, tag: Tag, msg: Loopback) {
        self.selfq.lock().unwrap().entry(tag).or_default().push_back(msg);
    }

    fn pop_self(&self, tag: Tag) -> Loopback {
        self.selfq
            .lock()
            .unwrap()
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
            .expect("self message not queued")
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn send_indices(&self, to: usize, tag: Tag, data: &[usize]) {
        if to == self.rank() {
            self.push_self(tag, Loopback::Indices(data.to_vec()));
            return;
        }
        let wire: Vec<u64> = data.iter().map(|&c| c as u64).collect();
        self.comm
            .process_at_rank(to as i32)
            .send_with_tag(&wire[..], tag as i32);
    }

    fn send_values(&self, to: usize, tag: Tag, data: &[f64]) {
        if to == self.rank() {
            self.push_self(tag, Loopback::Values(data.to_vec()));
            return;
        }
        self.comm
            .process_at_rank(to as i32)
            .send_with_tag(data, tag as i32);
    }

    fn recv_indices(&self, from: usize, tag: Tag) -> Vec<usize> {
        if from == self.rank() {
            match self.pop_self(tag) {
                Loopback::Indices(v) => return v,
                Loopback::Values(_) => panic!("index message expected on tag {tag}"),
            }
        }
        let (wire, _status) = self
            .comm
            .process_at_rank(from as i32)
            .receive_vec_with_tag::<u64>(tag as i32);
        wire.into_iter().map(|c| c as usize).collect()
    }

    fn recv_values(&self, from: usize, tag: Tag) -> Vec<f64> {
        if from == self.rank() {
            match self.pop_self(tag) {
                Loopback::Values(v) => return v,
                Loopback::Indices(_) => panic!("value message expected on tag {tag}"),
            }
        }
        let (v, _status) = self
            .comm
            .process_at_rank(from as i32)
            .receive_vec_with_tag::<f64>(tag as i32);
        v
    }

    fn all_gather_indices(&self, data: &[usize]) -> Vec<Vec<usize>> {
        let wire: Vec<u64> = data.iter().map(|&c| c as u64).collect();
        let counts = self.gather_counts(wire.len());
        let parts = self.all_gather_varcount(&wire, &counts);
        parts
            .into_iter()
            .map(|p| p.into_iter().map(|c| c as usize).collect())
            .collect()
    }

    fn all_gather_values(&self, data: &[f64]) -> Vec<Vec<f64>> {
        let counts = self.gather_counts(data.len());
        let mut recv = vec![0.0f64; counts.iter().sum()];
        let (c, d) = counts_displs(&counts);
        {
            let mut partition = mpi::datatype::PartitionMut::new(&mut recv[..], &c[..], &d[..]);
            self.comm.all_gather_varcount_into(data, &mut partition);
        }
        chop(recv, &counts)
    }

    fn all_reduce_sum(&self, local: f64) -> f64 {
        let mut global = 0.0f64;
        self.comm
            .all_reduce_into(&local, &mut global, SystemOperation::sum());
        global
    }

    fn gather_values(&self, data: &[f64], root: usize) -> Option<Vec<Vec<f64>>> {
        let counts = self.gather_counts(data.len());
        let root_process = self.comm.process_at_rank(root as i32);
        if self.rank() == root {
            let mut recv = vec![0.0f64; counts.iter().sum()];
            let (c, d) = counts_displs(&counts);
            {
                let mut partition =
                    mpi::datatype::PartitionMut::new(&mut recv[..], &c[..], &d[..]);
                root_process.gather_varcount_into_root(data, &mut partition);
            }
            Some(chop(recv, &counts))
        } else {
            root_process.gather_varcount_into(data);
            None
        }
    }

    fn broadcast_values(&self, buf: &mut Vec<f64>, root: usize) {
        let root_process = self.comm.process_at_rank(root as i32);
        let mut len = buf.len() as u64;
        root_process.broadcast_into(&mut len);
        buf.resize(len as usize, 0.0);
        root_process.broadcast_into(&mut buf[..]);
    }

    fn split(&self, colour: Option<usize>) -> Option<Arc<dyn Communicator>> {
        let color = match colour {
            Some(c) => Color::with_value(c as i32),
            None => Color::undefined(),
        };
        self.comm
            .split_by_color(color)
            .map(|sub| Arc::new(Self::from_comm(sub)) as Arc<dyn Communicator>)
    }

    fn barrier(&self) {
        self.comm.barrier();
    }
}

impl MpiComm {
    fn gather_counts(&self, mine: usize) -> Vec<usize> {
        let mut counts = vec![0u64; self.size()];
        self.comm.all_gather_into(&(mine as u64), &mut counts[..]);
        counts.into_iter().map(|c| c as usize).collect()
    }

    fn all_gather_varcount(&self, wire: &[u64], counts: &[usize]) -> Vec<Vec<u64>> {
        let mut recv = vec![0u64; counts.iter().sum()];
        let (c, d) = counts_displs(counts);
        {
            let mut partition = mpi::datatype::PartitionMut::new(&mut recv[..], &c[..], &d[..]);
            self.comm.all_gather_varcount_into(wire, &mut partition);
        }
        chop(recv, counts)
    }
}

fn counts_displs(counts: &[usize]) -> (Vec<i32>, Vec<i32>) {
    let c: Vec<i32> = counts.iter().map(|&n| n as i32).collect();
    let mut d = Vec::with_capacity(counts.len());
    let mut off = 0i32;
    for &n in &c {
        d.push(off);
        off += n;
    }
    (c, d)
}

fn chop<T: Copy>(flat: Vec<T>, counts: &[usize]) -> Vec<Vec<T>> {
    let mut out = Vec::with_capacity(counts.len());
    let mut off = 0;
    for &n in counts {
        out.push(flat[off..off + n].to_vec());
        off += n;
    }
    out
}
