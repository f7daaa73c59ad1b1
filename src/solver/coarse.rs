//! Direct solver for the coarse operator `E`.
//!
//! Master ranks each hold a contiguous row strip of `E` in CSR form. The
//! factorization is replicated: the strips are all-gathered over the
//! masters' sub-communicator and every master factorizes the full operator,
//! so a coarse solve needs one gather of right-hand-side slices and no
//! triangular-solve communication.

use super::comm::Communicator;
use super::CoarseParams;
use crate::error::{Result, SubdefError};
use faer::prelude::*;
use faer::sparse::SparseColMat;
use std::sync::Arc;

/// Replicated sparse LU factorization of `E` over the masters' group.
pub struct ReplicatedLu {
    comm: Arc<dyn Communicator>,
    /// First global coarse row held by this master.
    row_offset: usize,
    /// Number of coarse rows held by this master.
    local_rows: usize,
    order: usize,
    lu: Option<faer::sparse::linalg::solvers::Lu<usize, f64>>,
    /// Global sparsity of the gathered operator, kept for pattern queries.
    pub eptr: Vec<usize>,
    pub ecol: Vec<usize>,
}

impl ReplicatedLu {
    /// Number of ranks the factorization wants for a coarse problem of the
    /// given order. The replicated scheme works at any count; the parameter
    /// block bounds it.
    pub fn comm_size(order: usize, prm: &CoarseParams) -> usize {
        prm.max_masters.max(1).min(order.max(1))
    }

    /// Collectively gather the row strips and factorize. `eptr` spans this
    /// master's `local_rows` with `eptr[0] = 0`; `ecol` holds global coarse
    /// column ids.
    pub fn new(
        comm: Arc<dyn Communicator>,
        row_offset: usize,
        order: usize,
        eptr: &[usize],
        ecol: &[usize],
        eval: &[f64],
    ) -> Result<Self> {
        let local_rows = eptr.len() - 1;

        // Row lengths travel instead of the offsets so the gathered strips
        // concatenate without rebasing.
        let lens: Vec<usize> = (0..local_rows).map(|r| eptr[r + 1] - eptr[r]).collect();
        let all_lens = comm.all_gather_indices(&lens);
        let all_cols = comm.all_gather_indices(ecol);
        let all_vals = comm.all_gather_values(eval);

        let mut gptr = Vec::with_capacity(order + 1);
        gptr.push(0);
        let mut gcol = Vec::new();
        let mut triplets = Vec::new();
        let mut grow = 0;
        for (m, lens) in all_lens.iter().enumerate() {
            let mut off = 0;
            for &len in lens {
                for k in off..off + len {
                    let c = all_cols[m][k];
                    let v = all_vals[m][k];
                    if !v.is_finite() {
                        return Err(SubdefError::Factorization(
                            "coarse matrix contains NaN/Inf".into(),
                        ));
                    }
                    gcol.push(c);
                    triplets.push((grow, c, v));
                }
                gptr.push(gcol.len());
                off += len;
                grow += 1;
            }
        }
        if grow != order {
            return Err(SubdefError::Factorization(format!(
                "gathered {grow} coarse rows, expected {order}"
            )));
        }

        let lu = if order > 0 {
            let e_sp = SparseColMat::<usize, f64>::try_new_from_triplets(order, order, &triplets)
                .map_err(|e| {
                    SubdefError::Factorization(format!("coarse matrix build failed: {e:?}"))
                })?;
            Some(e_sp.sp_lu().map_err(|e| {
                SubdefError::Factorization(format!("coarse LU factorization failed: {e:?}"))
            })?)
        } else {
            None
        };

        Ok(Self {
            comm,
            row_offset,
            local_rows,
            order,
            lu,
            eptr: gptr,
            ecol: gcol,
        })
    }

    /// Solve `E cx = cf` for this master's row slice. `cf` holds the local
    /// rows of the right-hand side; collective over the masters' group.
    pub fn solve(&self, cf: &[f64], cx: &mut [f64]) {
        let parts = self.comm.all_gather_values(cf);
        let Some(lu) = &self.lu else {
            return;
        };

        let f: Vec<f64> = parts.concat();
        debug_assert_eq!(f.len(), self.order);
        let b = faer::Mat::<f64>::from_fn(self.order, 1, |i, _| f[i]);
        let sol = lu.solve(b);
        for r in 0..self.local_rows {
            cx[r] = sol[(self.row_offset + r, 0)];
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }
}
