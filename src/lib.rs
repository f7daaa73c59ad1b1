//! Distributed subdomain-deflated Krylov solver.
//!
//! Solves large sparse systems `A x = b` where `A` is partitioned by
//! contiguous row ranges across a group of cooperating ranks. Each outer
//! iteration combines a per-subdomain preconditioner applied locally with a
//! global coarse-grid correction through `E = Zᵀ A Z`, where the deflation
//! basis `Z` is assembled from caller-supplied per-subdomain vectors.
//!
//! The entry point is [`solver::deflated::SubdomainDeflation`], built
//! collectively over a [`solver::comm::Communicator`]. The in-process
//! transport [`solver::comm_local::LocalComm`] runs any number of ranks on
//! threads; the `distributed` feature adds an MPI transport.

pub mod error;
pub mod sparse;
pub mod solver;
