//! Per-subdomain preconditioner based on sparse LU factorization.
//!
//! Stands in for the external multilevel preconditioner: exact solves with
//! the local diagonal block `A_loc`, no communication. Anything implementing
//! [`LocalPreconditioner`](super::LocalPreconditioner) can replace it.

use super::LocalPreconditioner;
use crate::error::{Result, SubdefError};
use crate::sparse::CsrMatrix;
use faer::prelude::*;
use faer::sparse::SparseColMat;

/// Sparse LU factors of the local diagonal block.
#[derive(Debug)]
pub struct LocalLu {
    n: usize,
    lu: Option<faer::sparse::linalg::solvers::Lu<usize, f64>>,
}

impl LocalLu {
    /// Factorize `a_loc`. An empty strip (`n = 0`) yields a no-op solver.
    pub fn new(a_loc: &CsrMatrix) -> Result<Self> {
        let n = a_loc.nrows;
        if n == 0 {
            return Ok(Self { n, lu: None });
        }

        let mut triplets = Vec::with_capacity(a_loc.nnz());
        for row in 0..n {
            let (cols, vals) = a_loc.row(row);
            for (&c, &v) in cols.iter().zip(vals) {
                if !v.is_finite() {
                    return Err(SubdefError::Factorization(
                        "local matrix contains NaN/Inf".into(),
                    ));
                }
                triplets.push((row, c, v));
            }
        }

        let a_sp = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| SubdefError::Factorization(format!("local matrix build failed: {e:?}")))?;

        let lu = a_sp.sp_lu().map_err(|e| {
            SubdefError::Factorization(format!("local LU factorization failed: {e:?}"))
        })?;

        Ok(Self { n, lu: Some(lu) })
    }
}

impl LocalPreconditioner for LocalLu {
    fn apply(&self, rhs: &[f64], x: &mut [f64]) {
        let Some(lu) = &self.lu else {
            return;
        };
        let b = faer::Mat::<f64>::from_fn(self.n, 1, |i, _| rhs[i]);
        let sol = lu.solve(b);
        for i in 0..self.n {
            x[i] = sol[(i, 0)];
        }
    }
}
