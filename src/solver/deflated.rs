//! Distributed solver based on subdomain deflation.
//!
//! Each rank owns a contiguous row strip of the global matrix. Setup splits
//! the strip into the diagonal block `A_loc` (owned columns, local
//! numbering) and the off-diagonal block `A_rem` (ghost columns, compact
//! numbering), derives the halo-exchange schedule from an all-gathered
//! communication matrix, assembles the coarse product `AZ = A·Z` with a
//! second round of deflation-vector exchange, and ships the rows of
//! `E = Zᵀ(AZ)` to the master ranks for direct factorization.
//!
//! The resulting operator serves the Krylov driver with the projected
//! matvec `y = (I − AZ·E⁻¹·Zᵀ) A x`, applies the per-subdomain
//! preconditioner locally, and finishes a solve with the coarse
//! post-correction `x += Z·E⁻¹·Zᵀ(rhs − Ax)`.
//!
//! Everything in setup is collective; the built operator owns its scratch
//! buffers and supports one call at a time.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::Result;
use crate::sparse::{CsrMatrix, RowStrip};

use super::bicgstab::bicgstab;
use super::coarse::ReplicatedLu;
use super::comm::{
    Communicator, RecvSchedule, SendSchedule, TAG_EXC_COLS, TAG_EXC_DMAT, TAG_EXC_DVEC,
    TAG_EXC_LNNZ, TAG_EXC_VALS,
};
use super::deflation::DeflationVectors;
use super::local_lu::LocalLu;
use super::partition::Partition;
use super::{axpby, axpbypcz, dot, LocalPreconditioner, Operator, Params};

struct ExchangeBufs {
    send_val: Vec<f64>,
    recv_val: Vec<f64>,
}

struct CoarseVecs {
    df: Vec<f64>,
    dx: Vec<f64>,
}

struct MasterVecs {
    cf: Vec<f64>,
    cx: Vec<f64>,
}

/// Subdomain-deflated distributed operator and solver.
///
/// Built collectively over `comm`; immutable afterwards except for the
/// internal scratch buffers, which restrict the operator to one in-flight
/// call. The operator is neither `Clone` nor `Sync`.
pub struct SubdomainDeflation {
    comm: Arc<dyn Communicator>,
    prm: Params,

    nrows: usize,
    ndv: usize,
    /// Global coarse dimension `K`.
    nz: usize,
    dv_size: Vec<usize>,
    dv_start: Vec<usize>,
    partition: Partition,

    /// Local deflation vectors, one column per entry.
    z: Vec<Vec<f64>>,

    a_loc: CsrMatrix,
    a_rem: CsrMatrix,
    az: CsrMatrix,

    /// Global ids of the ghost columns, ascending; index = ghost numbering.
    ghost_cols: Vec<usize>,
    recv: RecvSchedule,
    send: SendSchedule,

    nmasters: usize,
    master: usize,
    /// `slaves[m]..slaves[m+1]` is the rank range feeding master `m`.
    slaves: Vec<usize>,
    coarse: Option<ReplicatedLu>,

    precond: LocalLu,

    exc: RefCell<ExchangeBufs>,
    dfx: RefCell<CoarseVecs>,
    cfx: RefCell<MasterVecs>,
    q: RefCell<Vec<f64>>,
}

impl SubdomainDeflation {
    /// Collectively build the deflated operator from this rank's row strip
    /// and deflation vectors.
    pub fn new<M, D>(
        comm: Arc<dyn Communicator>,
        a_strip: &M,
        def_vec: &D,
        prm: Params,
    ) -> Result<Self>
    where
        M: RowStrip,
        D: DeflationVectors,
    {
        let rank = comm.rank();
        let psize = comm.size();
        let nrows = a_strip.rows();
        let ndv = def_vec.dim();

        let _span = tracing::debug_span!("deflation_setup", rank, nrows, ndv).entered();

        // How many deflation vectors are there on each rank.
        let dv_size: Vec<usize> = comm
            .all_gather_indices(&[ndv])
            .iter()
            .map(|v| v[0])
            .collect();
        let mut dv_start = vec![0usize; psize + 1];
        for p in 0..psize {
            dv_start[p + 1] = dv_start[p] + dv_size[p];
        }
        let nz = dv_start[psize];

        let partition = Partition::gather(comm.as_ref(), nrows);
        let chunk_start = partition.start(rank);

        let z: Vec<Vec<f64>> = (0..ndv)
            .map(|j| (0..nrows).map(|i| def_vec.eval(i, j)).collect())
            .collect();

        // First pass over the strip: count local and remote nonzeros, build
        // the ordered remote-column set, and size the rows of AZ. A row
        // contributes dv_size[d] slots for every distinct owner d it touches.
        let mut loc_nnz = 0usize;
        let mut rem_nnz = 0usize;
        let mut remote_cols: BTreeMap<usize, usize> = BTreeMap::new();
        let mut az_ptr = vec![0usize; nrows + 1];
        let mut row_marker = vec![usize::MAX; psize];

        for i in 0..nrows {
            let (cols, _) = a_strip.row(i);
            for &c in cols {
                partition.check_col(c)?;
                let d = partition.owner(c);
                if d == rank {
                    loc_nnz += 1;
                } else {
                    rem_nnz += 1;
                    remote_cols.insert(c, 0);
                }
                if row_marker[d] != i {
                    row_marker[d] = i;
                    az_ptr[i + 1] += dv_size[d];
                }
            }
        }

        // Ghost numbering in ascending global order; per-owner receive
        // counts fall out of the same sweep.
        let n_ghost = remote_cols.len();
        let mut ghost_cols = Vec::with_capacity(n_ghost);
        let mut num_recv = vec![0usize; psize];
        let mut cur_nbr = 0usize;
        for (id, (c, slot)) in remote_cols.iter_mut().enumerate() {
            *slot = id;
            ghost_cols.push(*c);
            while *c >= partition.end(cur_nbr) {
                cur_nbr += 1;
            }
            num_recv[cur_nbr] += 1;
        }

        // Who needs how many columns from whom.
        let comm_rows = comm.all_gather_indices(&num_recv);
        let cm = |p: usize, q: usize| comm_rows[p][q];

        let mut recv = RecvSchedule::default();
        recv.ptr.push(0);
        let mut send = SendSchedule::default();
        send.ptr.push(0);
        let mut send_size = 0usize;
        for i in 0..psize {
            let nr = cm(rank, i);
            if nr > 0 {
                recv.nbr.push(i);
                recv.ptr.push(recv.ptr.last().unwrap() + nr);
            }
            let ns = cm(i, rank);
            if ns > 0 {
                send.nbr.push(i);
                send.ptr.push(send.ptr.last().unwrap() + ns);
                send_size += ns;
            }
        }

        // Here is what I need from you. The producers pick these up after
        // their own second pass; ours runs while the messages are in flight.
        for (idx, &nbr) in recv.nbr.iter().enumerate() {
            comm.send_indices(nbr, TAG_EXC_COLS, &ghost_cols[recv.ptr[idx]..recv.ptr[idx + 1]]);
        }

        // Second pass: emit A_loc and A_rem, and fill the local part of AZ.
        // az_ptr doubles as the per-row fill cursor; slot_marker remembers
        // where a coarse column was placed within the current row.
        let mut a_loc = CsrMatrix::with_capacity(nrows, nrows, loc_nnz);
        let mut a_rem = CsrMatrix::with_capacity(nrows, n_ghost, rem_nnz);

        for i in 1..=nrows {
            az_ptr[i] += az_ptr[i - 1];
        }
        let az_nnz = az_ptr[nrows];
        let mut az_col = vec![0usize; az_nnz];
        let mut az_val = vec![0f64; az_nnz];
        let mut slot_marker = vec![-1i64; nz];

        for i in 0..nrows {
            let az_row_beg = az_ptr[i] as i64;
            let mut az_row_end = az_row_beg;

            let (cols, vals) = a_strip.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                if c >= chunk_start && c < partition.end(rank) {
                    let lc = c - chunk_start;
                    a_loc.push(lc, v);

                    let mut k = dv_start[rank];
                    for zj in &z {
                        if slot_marker[k] < az_row_beg {
                            slot_marker[k] = az_row_end;
                            az_col[az_row_end as usize] = k;
                            az_val[az_row_end as usize] = v * zj[lc];
                            az_row_end += 1;
                        } else {
                            az_val[slot_marker[k] as usize] += v * zj[lc];
                        }
                        k += 1;
                    }
                } else {
                    a_rem.push(remote_cols[&c], v);
                }
            }

            az_ptr[i] = az_row_end as usize;
            a_loc.finish_row();
            a_rem.finish_row();
        }

        // Collect the column lists our consumers asked for and shift them to
        // local numbering.
        let mut send_col = vec![0usize; send_size];
        for (idx, &nbr) in send.nbr.iter().enumerate() {
            let cols = comm.recv_indices(nbr, TAG_EXC_COLS);
            send_col[send.ptr[idx]..send.ptr[idx + 1]].copy_from_slice(&cols);
        }
        for c in &mut send_col {
            debug_assert!(*c >= chunk_start && *c < partition.end(rank));
            *c -= chunk_start;
        }
        send.col = send_col;

        // Deflation-vector exchange: where the halo carries one scalar per
        // ghost column, this round carries dv_size[owner] values per column.
        let mut zrecv_ptr = vec![0usize; recv.nbr.len() + 1];
        let mut zcol_ptr = Vec::with_capacity(n_ghost + 1);
        zcol_ptr.push(0usize);
        for (idx, &nbr) in recv.nbr.iter().enumerate() {
            let cols = recv.ptr[idx + 1] - recv.ptr[idx];
            zrecv_ptr[idx + 1] = zrecv_ptr[idx] + cols * dv_size[nbr];
            for _ in 0..cols {
                zcol_ptr.push(zcol_ptr.last().unwrap() + dv_size[nbr]);
            }
        }

        let mut zsend = vec![0f64; send.col.len() * ndv];
        for (i, &lc) in send.col.iter().enumerate() {
            for (j, zj) in z.iter().enumerate() {
                zsend[i * ndv + j] = zj[lc];
            }
        }
        for (idx, &nbr) in send.nbr.iter().enumerate() {
            comm.send_values(
                nbr,
                TAG_EXC_VALS,
                &zsend[ndv * send.ptr[idx]..ndv * send.ptr[idx + 1]],
            );
        }
        let mut zrecv = vec![0f64; *zrecv_ptr.last().unwrap()];
        for (idx, &nbr) in recv.nbr.iter().enumerate() {
            let vals = comm.recv_values(nbr, TAG_EXC_VALS);
            zrecv[zrecv_ptr[idx]..zrecv_ptr[idx + 1]].copy_from_slice(&vals);
        }

        // AZ += A_rem · Z, resuming each row at its fill cursor.
        slot_marker.fill(-1);
        for i in 0..nrows {
            let az_row_beg = az_ptr[i] as i64;
            let mut az_row_end = az_row_beg;

            let (gcols, gvals) = a_rem.row(i);
            for (&c, &v) in gcols.iter().zip(gvals) {
                let d = recv.owner_of_ghost(c);
                let zval = &zrecv[zcol_ptr[c]..zcol_ptr[c] + dv_size[d]];
                let mut k = dv_start[d];
                for &zv in zval {
                    if slot_marker[k] < az_row_beg {
                        slot_marker[k] = az_row_end;
                        az_col[az_row_end as usize] = k;
                        az_val[az_row_end as usize] = v * zv;
                        az_row_end += 1;
                    } else {
                        az_val[slot_marker[k] as usize] += v * zv;
                    }
                    k += 1;
                }
            }

            az_ptr[i] = az_row_end as usize;
        }

        // The cursor pass left az_ptr[i] one past the last entry of row i;
        // a single right-rotate restores a valid CSR pointer array.
        az_ptr.rotate_right(1);
        az_ptr[0] = 0;
        let az = CsrMatrix {
            nrows,
            ncols: nz,
            values: az_val,
            col_indices: az_col,
            row_pointers: az_ptr,
        };

        // Masters topology for the coarse factorization.
        let nmasters = ReplicatedLu::comm_size(nz, &prm.coarse).min(psize);
        let spread = (psize + nmasters - 1) / nmasters;
        let master = rank / spread;
        let mut slaves = Vec::with_capacity(nmasters + 1);
        for p in 0..=nmasters {
            slaves.push((p * spread).min(psize));
        }

        // E row widths under the symmetrized subdomain adjacency: a column
        // block for p is kept iff either side of the pair communicates.
        let adjacent: Vec<bool> = (0..psize)
            .map(|p| p == rank || cm(rank, p) > 0 || cm(p, rank) > 0)
            .collect();
        let erow_width: usize = (0..psize)
            .filter(|&p| adjacent[p])
            .map(|p| dv_size[p])
            .sum();

        let widths = vec![erow_width; ndv];
        comm.send_indices(master, TAG_EXC_LNNZ, &widths);

        // Dense strip erow[j][c] = Σ_i z_j[i] · AZ[i][c]; the rows are
        // independent, one worker each.
        let mut erow = vec![0f64; ndv * nz];
        erow.par_chunks_mut(nz.max(1))
            .zip(&z)
            .for_each(|(row, zj)| {
                for i in 0..nrows {
                    let zji = zj[i];
                    if zji == 0.0 {
                        continue;
                    }
                    let (cols, vals) = az.row(i);
                    for (&c, &v) in cols.iter().zip(vals) {
                        row[c] += v * zji;
                    }
                }
            });

        // Flatten to CSR rows in block order over the adjacent subdomains.
        let mut ecol = vec![0usize; ndv * erow_width];
        let mut eval = vec![0f64; ndv * erow_width];
        let mut head = 0usize;
        for j in 0..ndv {
            for p in 0..psize {
                if !adjacent[p] {
                    continue;
                }
                for k in 0..dv_size[p] {
                    let c = dv_start[p] + k;
                    ecol[head] = c;
                    eval[head] = erow[j * nz + c];
                    head += 1;
                }
            }
        }
        comm.send_indices(master, TAG_EXC_DMAT, &ecol);
        comm.send_values(master, TAG_EXC_DMAT, &eval);

        // Masters gather their slaves' strips and factorize over the
        // colour-split sub-communicator; everyone else drops out of it.
        let masters_comm = comm.split(if rank < nmasters { Some(0) } else { None });
        let coarse = if rank < nmasters {
            let row_lo = dv_start[slaves[rank]];
            let row_hi = dv_start[slaves[rank + 1]];

            let mut eptr = vec![0usize; row_hi - row_lo + 1];
            for p in slaves[rank]..slaves[rank + 1] {
                let lens = comm.recv_indices(p, TAG_EXC_LNNZ);
                let begin = dv_start[p] - row_lo + 1;
                eptr[begin..begin + lens.len()].copy_from_slice(&lens);
            }
            for r in 1..eptr.len() {
                eptr[r] += eptr[r - 1];
            }

            let ennz = *eptr.last().unwrap();
            let mut ecol_g = vec![0usize; ennz];
            let mut eval_g = vec![0f64; ennz];
            for p in slaves[rank]..slaves[rank + 1] {
                let cols = comm.recv_indices(p, TAG_EXC_DMAT);
                let vals = comm.recv_values(p, TAG_EXC_DMAT);
                let begin = eptr[dv_start[p] - row_lo];
                ecol_g[begin..begin + cols.len()].copy_from_slice(&cols);
                eval_g[begin..begin + vals.len()].copy_from_slice(&vals);
            }

            let sub = masters_comm.expect("masters keep a colour");
            Some(ReplicatedLu::new(sub, row_lo, nz, &eptr, &ecol_g, &eval_g)?)
        } else {
            None
        };

        let precond = LocalLu::new(&a_loc)?;

        let master_rows = if rank < nmasters {
            dv_start[slaves[rank + 1]] - dv_start[slaves[rank]]
        } else {
            0
        };

        Ok(Self {
            comm,
            prm,
            nrows,
            ndv,
            nz,
            dv_size,
            dv_start,
            partition,
            z,
            a_loc,
            a_rem,
            az,
            ghost_cols,
            recv,
            send,
            nmasters,
            master,
            slaves,
            coarse,
            precond,
            exc: RefCell::new(ExchangeBufs {
                send_val: vec![0.0; send_size],
                recv_val: vec![0.0; n_ghost],
            }),
            dfx: RefCell::new(CoarseVecs {
                df: vec![0.0; ndv],
                dx: vec![0.0; nz],
            }),
            cfx: RefCell::new(MasterVecs {
                cf: vec![0.0; master_rows],
                cx: vec![0.0; master_rows],
            }),
            q: RefCell::new(vec![0.0; nrows]),
        })
    }

    /// Run the Krylov driver on the deflated system with this operator as
    /// both matrix and preconditioner, then apply the coarse
    /// post-correction. Returns `(iterations, relative residual)`.
    pub fn solve(&self, rhs: &[f64], x: &mut [f64]) -> Result<(usize, f64)> {
        let _span = tracing::debug_span!("deflated_solve", rank = self.comm.rank()).entered();
        let inner = |a: &[f64], b: &[f64]| self.comm.all_reduce_sum(dot(a, b));
        let cnv = bicgstab(self, self, rhs, x, &self.prm.solver, &inner)?;
        self.postprocess(rhs, x);
        tracing::debug!(iterations = cnv.0, residual = cnv.1, "deflated solve finished");
        Ok(cnv)
    }

    /// `y = alpha * A * x + beta * y` across the partition. The local spmv
    /// runs between posting the halo sends and collecting the receives.
    pub fn mul(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        let mut exc = self.exc.borrow_mut();
        self.start_exchange(x, &mut exc);
        self.a_loc.spmv(alpha, x, beta, y);
        self.finish_exchange(&mut exc);

        if !exc.recv_val.is_empty() {
            self.a_rem.spmv(alpha, &exc.recv_val, 1.0, y);
        }
    }

    /// `y = project(alpha * A * x + beta * y)`.
    pub fn mul_n_project(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        self.mul(alpha, x, beta, y);
        self.project(y);
    }

    /// `r = project(f - A * x)`.
    pub fn residual(&self, f: &[f64], x: &[f64], r: &mut [f64]) {
        {
            let mut exc = self.exc.borrow_mut();
            self.start_exchange(x, &mut exc);
            self.a_loc.residual(f, x, r);
            self.finish_exchange(&mut exc);

            if !exc.recv_val.is_empty() {
                self.a_rem.spmv(-1.0, &exc.recv_val, 1.0, r);
            }
        }
        self.project(r);
    }

    /// Subtract the coarse component: `x -= AZ · E⁻¹ · Zᵀ x`. After the
    /// call `x` is orthogonal to every local deflation vector.
    pub fn project(&self, x: &mut [f64]) {
        if self.nz == 0 {
            return;
        }
        let mut s = self.dfx.borrow_mut();
        let s = &mut *s;
        for (j, zj) in self.z.iter().enumerate() {
            s.df[j] = dot(x, zj);
        }
        self.coarse_solve(&s.df, &mut s.dx);
        self.az.spmv(-1.0, &s.dx, 1.0, x);
    }

    /// Coarse post-correction `x += Z · E⁻¹ · Zᵀ (rhs − A x)`, fusing two
    /// column updates per pass.
    pub fn postprocess(&self, rhs: &[f64], x: &mut [f64]) {
        if self.nz == 0 {
            return;
        }
        let mut s = self.dfx.borrow_mut();
        let s = &mut *s;
        {
            let mut q = self.q.borrow_mut();
            self.mul(1.0, x, 0.0, q.as_mut_slice());
            for (j, zj) in self.z.iter().enumerate() {
                s.df[j] = dot(rhs, zj) - dot(&q, zj);
            }
        }
        self.coarse_solve(&s.df, &mut s.dx);

        let mut j = 0;
        let mut k = self.dv_start[self.comm.rank()];
        while j + 1 < self.ndv {
            axpbypcz(s.dx[k], &self.z[j], s.dx[k + 1], &self.z[j + 1], 1.0, x);
            j += 2;
            k += 2;
        }
        if j < self.ndv {
            axpby(s.dx[k], &self.z[j], 1.0, x);
        }
    }

    /// Apply the per-subdomain preconditioner: `x = M⁻¹_loc rhs`. No
    /// communication.
    pub fn apply(&self, rhs: &[f64], x: &mut [f64]) {
        self.precond.apply(rhs, x);
    }

    /// Solve `E dx = Zᵀ-assembled f` through the master ranks: gather the
    /// per-rank slices on rank 0, scatter per-master blocks, run the direct
    /// solver over the masters' group, reassemble on rank 0 and broadcast.
    fn coarse_solve(&self, f: &[f64], x: &mut Vec<f64>) {
        let comm = self.comm.as_ref();

        if let Some(parts) = comm.gather_values(f, 0) {
            for (p, part) in parts.iter().enumerate() {
                x[self.dv_start[p]..self.dv_start[p] + part.len()].copy_from_slice(part);
            }
        }

        if comm.rank() == 0 {
            for m in 0..self.nmasters {
                let lo = self.dv_start[self.slaves[m]];
                let hi = self.dv_start[self.slaves[m + 1]];
                comm.send_values(m, TAG_EXC_DVEC, &x[lo..hi]);
            }
        }

        if let Some(coarse) = &self.coarse {
            let mut mv = self.cfx.borrow_mut();
            let mv = &mut *mv;
            let block = comm.recv_values(0, TAG_EXC_DVEC);
            mv.cf.copy_from_slice(&block);
            coarse.solve(&mv.cf, &mut mv.cx);
            comm.send_values(0, TAG_EXC_DVEC, &mv.cx);
        }

        if comm.rank() == 0 {
            for m in 0..self.nmasters {
                let part = comm.recv_values(m, TAG_EXC_DVEC);
                let lo = self.dv_start[self.slaves[m]];
                x[lo..lo + part.len()].copy_from_slice(&part);
            }
        }

        comm.broadcast_values(x, 0);
    }

    fn start_exchange(&self, x: &[f64], exc: &mut ExchangeBufs) {
        for (i, &lc) in self.send.col.iter().enumerate() {
            exc.send_val[i] = x[lc];
        }
        for (idx, &nbr) in self.send.nbr.iter().enumerate() {
            self.comm.send_values(
                nbr,
                TAG_EXC_VALS,
                &exc.send_val[self.send.ptr[idx]..self.send.ptr[idx + 1]],
            );
        }
    }

    fn finish_exchange(&self, exc: &mut ExchangeBufs) {
        for (idx, &nbr) in self.recv.nbr.iter().enumerate() {
            let vals = self.comm.recv_values(nbr, TAG_EXC_VALS);
            exc.recv_val[self.recv.ptr[idx]..self.recv.ptr[idx + 1]].copy_from_slice(&vals);
        }
    }

    /// Rows owned by this rank.
    pub fn local_rows(&self) -> usize {
        self.nrows
    }

    /// Deflation vectors contributed by this rank.
    pub fn local_dv(&self) -> usize {
        self.ndv
    }

    /// Order `K` of the coarse operator.
    pub fn coarse_order(&self) -> usize {
        self.nz
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn dv_size(&self) -> &[usize] {
        &self.dv_size
    }

    pub fn dv_start(&self) -> &[usize] {
        &self.dv_start
    }

    pub fn a_loc(&self) -> &CsrMatrix {
        &self.a_loc
    }

    pub fn a_rem(&self) -> &CsrMatrix {
        &self.a_rem
    }

    pub fn az(&self) -> &CsrMatrix {
        &self.az
    }

    /// Ghost numbering to global column ids, ascending.
    pub fn ghost_cols(&self) -> &[usize] {
        &self.ghost_cols
    }

    pub fn recv_schedule(&self) -> &RecvSchedule {
        &self.recv
    }

    pub fn send_schedule(&self) -> &SendSchedule {
        &self.send
    }

    pub fn nmasters(&self) -> usize {
        self.nmasters
    }

    /// Master rank this rank feeds its coarse rows to.
    pub fn master(&self) -> usize {
        self.master
    }

    pub fn slaves(&self) -> &[usize] {
        &self.slaves
    }

    /// The coarse factorization; present on master ranks only.
    pub fn coarse(&self) -> Option<&ReplicatedLu> {
        self.coarse.as_ref()
    }
}

impl Operator for SubdomainDeflation {
    fn apply(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        self.mul_n_project(alpha, x, beta, y);
    }

    fn residual(&self, f: &[f64], x: &[f64], r: &mut [f64]) {
        SubdomainDeflation::residual(self, f, x, r);
    }
}

impl LocalPreconditioner for SubdomainDeflation {
    fn apply(&self, rhs: &[f64], x: &mut [f64]) {
        SubdomainDeflation::apply(self, rhs, x);
    }
}
