//! Compressed Sparse Row (CSR) matrix.
//!
//! Used for the row strips of the distributed system matrix and for the
//! derived products (`A_loc`, `A_rem`, `AZ`). Column indices are local,
//! ghost, or coarse depending on which matrix they belong to; the type
//! itself is agnostic.

/// Sparse matrix in Compressed Sparse Row format.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub ncols: usize,
    /// Non-zero values, stored row by row.
    pub values: Vec<f64>,
    /// Column index for each non-zero value.
    pub col_indices: Vec<usize>,
    /// `row_pointers[i]` is the index into values/col_indices where row i starts.
    /// `row_pointers[nrows]` = total number of non-zeros.
    pub row_pointers: Vec<usize>,
}

impl CsrMatrix {
    /// Create an empty matrix with no non-zero entries.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_pointers: vec![0; nrows + 1],
        }
    }

    /// Empty matrix with value/column storage reserved for `nnz` entries and
    /// a single leading row pointer. Rows are appended by pushing entries and
    /// closing each row with [`CsrMatrix::finish_row`].
    pub fn with_capacity(nrows: usize, ncols: usize, nnz: usize) -> Self {
        let mut row_pointers = Vec::with_capacity(nrows + 1);
        row_pointers.push(0);
        Self {
            nrows,
            ncols,
            values: Vec::with_capacity(nnz),
            col_indices: Vec::with_capacity(nnz),
            row_pointers,
        }
    }

    /// Append one entry to the row currently under construction.
    pub fn push(&mut self, col: usize, value: f64) {
        self.col_indices.push(col);
        self.values.push(value);
    }

    /// Close the row under construction.
    pub fn finish_row(&mut self) {
        self.row_pointers.push(self.col_indices.len());
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let begin = self.row_pointers[i];
        let end = self.row_pointers[i + 1];
        (&self.col_indices[begin..end], &self.values[begin..end])
    }

    /// Build CSR matrix from (row, col, value) triplets.
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        if triplets.is_empty() {
            return Self::new(nrows, ncols);
        }

        let mut indices: Vec<usize> = (0..triplets.len()).collect();
        indices.sort_by_key(|&i| (triplets[i].0, triplets[i].1));

        let mut values = Vec::with_capacity(triplets.len());
        let mut col_indices = Vec::with_capacity(triplets.len());
        let mut row_pointers = vec![0usize; nrows + 1];

        let first = indices[0];
        let mut cur_row = triplets[first].0;
        let mut cur_col = triplets[first].1;
        let mut cur_val = triplets[first].2;

        for &idx in &indices[1..] {
            let (row, col, val) = triplets[idx];
            if row == cur_row && col == cur_col {
                cur_val += val;
            } else {
                values.push(cur_val);
                col_indices.push(cur_col);
                row_pointers[cur_row + 1] += 1;
                cur_row = row;
                cur_col = col;
                cur_val = val;
            }
        }
        values.push(cur_val);
        col_indices.push(cur_col);
        row_pointers[cur_row + 1] += 1;

        for i in 1..=nrows {
            row_pointers[i] += row_pointers[i - 1];
        }

        Self {
            nrows,
            ncols,
            values,
            col_indices,
            row_pointers,
        }
    }

    /// `y = alpha * A * x + beta * y`
    pub fn spmv(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols, "spmv dimension mismatch");
        assert_eq!(y.len(), self.nrows, "spmv dimension mismatch");
        for row in 0..self.nrows {
            let mut sum = 0.0;
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                sum += self.values[idx] * x[self.col_indices[idx]];
            }
            y[row] = alpha * sum + beta * y[row];
        }
    }

    /// `r = f - A * x`
    pub fn residual(&self, f: &[f64], x: &[f64], r: &mut [f64]) {
        r.copy_from_slice(f);
        self.spmv(-1.0, x, 1.0, r);
    }

    /// Convert to dense matrix (row-major). For testing and small matrices only.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.ncols]; self.nrows];
        for row in 0..self.nrows {
            for idx in self.row_pointers[row]..self.row_pointers[row + 1] {
                dense[row][self.col_indices[idx]] = self.values[idx];
            }
        }
        dense
    }
}

/// Row-iterable sparse input for the distributed setup.
///
/// Column indices are global; the splitter classifies them by owner rank.
/// Any adapter exposing its rows as (columns, values) slice pairs qualifies.
pub trait RowStrip {
    fn rows(&self) -> usize;
    fn row(&self, i: usize) -> (&[usize], &[f64]);
}

impl RowStrip for CsrMatrix {
    fn rows(&self) -> usize {
        self.nrows
    }

    fn row(&self, i: usize) -> (&[usize], &[f64]) {
        CsrMatrix::row(self, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matrix() {
        let m = CsrMatrix::new(3, 3);
        assert_eq!(m.nnz(), 0);
        assert_eq!(m.row_pointers, vec![0, 0, 0, 0]);
    }

    #[test]
    fn from_triplets_duplicates_summed() {
        let triplets = vec![(0, 0, 1.0), (0, 0, 2.0), (1, 1, 3.0)];
        let m = CsrMatrix::from_triplets(2, 2, &triplets);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.to_dense(), vec![vec![3.0, 0.0], vec![0.0, 3.0]]);
    }

    #[test]
    fn spmv_alpha_beta() {
        // [[2, 1], [0, 3]]
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)]);
        let mut y = vec![1.0, 1.0];
        m.spmv(2.0, &[1.0, 2.0], -1.0, &mut y);
        // y = 2*[4, 6] - [1, 1]
        assert_eq!(y, vec![7.0, 11.0]);
    }

    #[test]
    fn residual_matches_definition() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 3.0)]);
        let mut r = vec![0.0; 2];
        m.residual(&[5.0, 5.0], &[1.0, 1.0], &mut r);
        assert_eq!(r, vec![3.0, 2.0]);
    }

    #[test]
    fn incremental_builder_matches_triplets() {
        let mut m = CsrMatrix::with_capacity(2, 3, 3);
        m.push(0, 1.0);
        m.push(2, 2.0);
        m.finish_row();
        m.push(1, 3.0);
        m.finish_row();

        let t = CsrMatrix::from_triplets(2, 3, &[(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)]);
        assert_eq!(m.to_dense(), t.to_dense());
    }

    #[test]
    fn row_slices() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)]);
        let (cols, vals) = m.row(0);
        assert_eq!(cols, &[0, 1]);
        assert_eq!(vals, &[2.0, 1.0]);
    }
}
