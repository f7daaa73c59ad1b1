//! Multi-rank solver tests over the in-process transport.
//!
//! Every test runs the full collective pipeline (setup, schedules, coarse
//! assembly, solve) with ranks on threads, so no MPI launcher is needed.

use subdef::solver::comm::Communicator;
use subdef::solver::comm_local::LocalComm;
use subdef::solver::deflated::SubdomainDeflation;
use subdef::solver::deflation::{ConstantDeflation, DeflationVectors};
use subdef::solver::local_lu::LocalLu;
use subdef::solver::{CoarseParams, LocalPreconditioner, Params};
use subdef::sparse::CsrMatrix;

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// All-ones deflation basis with a per-rank vector count (possibly zero).
struct MaybeOnes {
    ndv: usize,
}

impl DeflationVectors for MaybeOnes {
    fn dim(&self) -> usize {
        self.ndv
    }

    fn eval(&self, _i: usize, _j: usize) -> f64 {
        1.0
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 1-D Poisson matrix: tridiagonal [-1, 2, -1].
fn poisson_1d(n: usize) -> CsrMatrix {
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, 2.0));
        if i > 0 {
            t.push((i, i - 1, -1.0));
        }
        if i + 1 < n {
            t.push((i, i + 1, -1.0));
        }
    }
    CsrMatrix::from_triplets(n, n, &t)
}

/// Row strip [lo, hi) of a global matrix, keeping global column ids.
fn strip_of(global: &CsrMatrix, lo: usize, hi: usize) -> CsrMatrix {
    let mut s = CsrMatrix::with_capacity(hi - lo, global.ncols, 0);
    for i in lo..hi {
        let (cols, vals) = global.row(i);
        for (&c, &v) in cols.iter().zip(vals) {
            s.push(c, v);
        }
        s.finish_row();
    }
    s
}

/// Half-open row ranges for the given per-rank sizes.
fn ranges(sizes: &[usize]) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut lo = 0;
    for &s in sizes {
        out.push((lo, lo + s));
        lo += s;
    }
    out
}

fn direct_reference(a: &CsrMatrix, f: &[f64]) -> Vec<f64> {
    let lu = LocalLu::new(a).expect("reference factorization");
    let mut x = vec![0.0; f.len()];
    lu.apply(f, &mut x);
    x
}

fn rel_residual(a: &CsrMatrix, f: &[f64], x: &[f64]) -> f64 {
    let mut r = vec![0.0; f.len()];
    a.residual(f, x, &mut r);
    let rr: f64 = r.iter().map(|v| v * v).sum::<f64>().sqrt();
    let ff: f64 = f.iter().map(|v| v * v).sum::<f64>().sqrt();
    rr / ff
}

#[test]
fn poisson_two_ranks_matches_reference() {
    init_logging();
    let n = 8;
    let global = poisson_1d(n);
    let f = vec![1.0; n];

    let parts = LocalComm::run_on(2, |comm| {
        let (lo, hi) = ranges(&[4, 4])[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &ConstantDeflation::new(1),
            Params::default(),
        )
        .expect("setup");

        // One interface edge per rank, one coarse column per interior row
        // and two on the boundary row.
        assert_eq!(op.partition().total(), n);
        assert_eq!(op.partition().start(1), 4);
        assert_eq!(op.a_rem().nnz(), 1);
        assert_eq!(op.coarse_order(), 2);
        let widths: Vec<usize> = (0..4)
            .map(|i| op.az().row_pointers[i + 1] - op.az().row_pointers[i])
            .collect();
        if comm.rank() == 0 {
            assert_eq!(widths, vec![1, 1, 1, 2]);
        } else {
            assert_eq!(widths, vec![2, 1, 1, 1]);
        }

        let rhs = vec![1.0; hi - lo];
        let mut x = vec![0.0; hi - lo];
        let (iters, resid) = op.solve(&rhs, &mut x).expect("solve");
        assert!(iters > 0);
        assert!(resid <= 1e-8, "driver residual {resid}");
        x
    });

    let x: Vec<f64> = parts.concat();
    let expect = [4.0, 7.0, 9.0, 10.0, 10.0, 9.0, 7.0, 4.0];
    for (got, want) in x.iter().zip(expect) {
        assert!((got - want).abs() < 1e-5, "x = {got}, expected {want}");
    }
    assert!(rel_residual(&global, &f, &x) <= 1e-6);
}

#[test]
fn splitter_conserves_entries_and_orders_ghosts() {
    // One off-diagonal per row, three hops away, wrapping around. Exercises
    // ghosts that are not nearest-neighbour.
    let n = 9;
    let sizes = [4, 2, 3];
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, 2.0));
        t.push((i, (i + 3) % n, -1.0));
    }
    let global = CsrMatrix::from_triplets(n, n, &t);

    let rows = LocalComm::run_on(3, move |comm| {
        let (lo, hi) = ranges(&sizes)[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &ConstantDeflation::new(1),
            Params::default(),
        )
        .expect("setup");

        // No entry lost or duplicated, per row.
        for i in 0..(hi - lo) {
            let strip_w = strip.row_pointers[i + 1] - strip.row_pointers[i];
            let loc_w = op.a_loc().row_pointers[i + 1] - op.a_loc().row_pointers[i];
            let rem_w = op.a_rem().row_pointers[i + 1] - op.a_rem().row_pointers[i];
            assert_eq!(loc_w + rem_w, strip_w, "row {i} nnz conservation");
        }
        assert_eq!(op.a_loc().nnz() + op.a_rem().nnz(), strip.nnz());

        // Ghost numbering is strictly increasing over global ids, and no
        // ghost is locally owned.
        let ghosts = op.ghost_cols().to_vec();
        for w in ghosts.windows(2) {
            assert!(w[0] < w[1], "ghost numbering not increasing");
        }
        for &g in &ghosts {
            assert!(!(lo..hi).contains(&g));
        }
        assert_eq!(ghosts.len(), op.a_rem().ncols);

        // send.col holds local indices after the chunk-start shift.
        for &c in &op.send_schedule().col {
            assert!(c < hi - lo);
        }
        ghosts
    });

    // Rank 0 (rows 0..4) references columns 3..7 minus its own: {4, 5, 6}.
    assert_eq!(rows[0], vec![4, 5, 6]);
}

#[test]
fn halo_exchange_matches_global_spmv() {
    let n = 9;
    let sizes = [4, 2, 3];
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, 2.0));
        t.push((i, (i + 3) % n, -1.0));
    }
    let global = CsrMatrix::from_triplets(n, n, &t);
    let x_global: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let mut y_ref = vec![0.0; n];
    global.spmv(1.0, &x_global, 0.0, &mut y_ref);

    let parts = LocalComm::run_on(3, move |comm| {
        let (lo, hi) = ranges(&sizes)[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &ConstantDeflation::new(1),
            Params::default(),
        )
        .expect("setup");

        let x: Vec<f64> = (lo..hi).map(|i| i as f64).collect();
        let mut y = vec![0.0; hi - lo];
        op.mul(1.0, &x, 0.0, &mut y);
        y
    });

    let y: Vec<f64> = parts.concat();
    for (got, want) in y.iter().zip(&y_ref) {
        assert_relative_eq!(*got, *want, epsilon = 1e-12);
    }
}

#[test]
fn schedules_and_coarse_pattern_are_symmetric() {
    let n = 9;
    let global = poisson_1d(n);

    let results = LocalComm::run_on(3, move |comm| {
        let (lo, hi) = ranges(&[3, 3, 3])[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &ConstantDeflation::new(1),
            Params::default(),
        )
        .expect("setup");

        let recv: Vec<(usize, usize)> = op
            .recv_schedule()
            .nbr
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, op.recv_schedule().ptr[i + 1] - op.recv_schedule().ptr[i]))
            .collect();
        let send: Vec<(usize, usize)> = op
            .send_schedule()
            .nbr
            .iter()
            .enumerate()
            .map(|(i, &p)| (p, op.send_schedule().ptr[i + 1] - op.send_schedule().ptr[i]))
            .collect();
        let pattern = op
            .coarse()
            .map(|c| (c.eptr.clone(), c.ecol.clone(), c.order()));
        (recv, send, pattern)
    });

    // What p receives from q, q sends to p.
    for (p, (recv, _, _)) in results.iter().enumerate() {
        for &(q, count) in recv {
            let (_, q_send, _) = &results[q];
            let back = q_send.iter().find(|(to, _)| *to == p);
            assert_eq!(back, Some(&(p, count)), "send/recv mismatch {p} <- {q}");
        }
    }
    for (p, (_, send, _)) in results.iter().enumerate() {
        for &(q, count) in send {
            let (q_recv, _, _) = &results[q];
            assert!(q_recv.contains(&(p, count)));
        }
    }

    // The single master holds the full coarse pattern: symmetric, and with
    // no block for the non-communicating pair (0, 2).
    let (_, _, pattern) = &results[0];
    let (eptr, ecol, order) = pattern.as_ref().expect("rank 0 is a master");
    assert_eq!(*order, 3);
    let mut dense = vec![vec![false; 3]; 3];
    for r in 0..3 {
        for idx in eptr[r]..eptr[r + 1] {
            dense[r][ecol[idx]] = true;
        }
    }
    for r in 0..3 {
        for c in 0..3 {
            assert_eq!(dense[r][c], dense[c][r], "pattern not symmetric at ({r}, {c})");
        }
    }
    assert!(!dense[0][2]);
    assert!(!dense[2][0]);
    assert!(dense[0][1] && dense[1][0] && dense[1][2] && dense[2][1]);
}

#[test]
fn project_enforces_galerkin_and_is_idempotent() {
    let n = 12;
    let global = poisson_1d(n);

    let checks = LocalComm::run_on(3, move |comm| {
        let (lo, hi) = ranges(&[4, 4, 4])[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &ConstantDeflation::new(1),
            Params::default(),
        )
        .expect("setup");

        let mut rng = StdRng::seed_from_u64(17 + comm.rank() as u64);
        let mut x: Vec<f64> = (0..(hi - lo)).map(|_| rng.gen_range(-1.0..1.0)).collect();

        op.project(&mut x);
        // Orthogonal to the local all-ones deflation vector.
        let galerkin: f64 = x.iter().sum();

        let y = x.clone();
        op.project(&mut x);
        let diff_sq: f64 = comm.all_reduce_sum(
            y.iter()
                .zip(&x)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>(),
        );
        let norm_sq: f64 = comm.all_reduce_sum(y.iter().map(|a| a * a).sum::<f64>());
        (galerkin, diff_sq.sqrt(), norm_sq.sqrt())
    });

    for (galerkin, diff, norm) in checks {
        assert!(galerkin.abs() <= 1e-10 * norm.max(1.0), "<Px, Z> = {galerkin}");
        assert!(diff <= 1e-10 * norm, "projection not idempotent: {diff} vs {norm}");
    }
}

#[test]
fn empty_rank_participates() {
    let n = 8;
    let sizes = [4, 0, 4];
    let global = poisson_1d(n);
    let f = vec![1.0; n];

    let parts = LocalComm::run_on(3, |comm| {
        let (lo, hi) = ranges(&sizes)[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let ndv = usize::from(hi > lo);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &MaybeOnes { ndv },
            Params::default(),
        )
        .expect("setup");

        if comm.rank() == 1 {
            assert_eq!(op.local_rows(), 0);
            assert_eq!(op.a_loc().nnz(), 0);
            assert_eq!(op.a_rem().nnz(), 0);
            assert!(op.send_schedule().nbr.is_empty());
            assert!(op.recv_schedule().nbr.is_empty());
        }
        assert_eq!(op.coarse_order(), 2);

        let rhs = vec![1.0; hi - lo];
        let mut x = vec![0.0; hi - lo];
        op.solve(&rhs, &mut x).expect("solve");
        x
    });

    let x: Vec<f64> = parts.concat();
    let reference = direct_reference(&global, &f);
    for (got, want) in x.iter().zip(&reference) {
        assert!((got - want).abs() < 1e-5, "x = {got}, expected {want}");
    }
}

#[test]
fn empty_deflation_on_one_rank() {
    let n = 8;
    let sizes = [2, 2, 2, 2];
    let dv = [1usize, 0, 1, 1];
    let global = poisson_1d(n);
    let f: Vec<f64> = (0..n).map(|i| 1.0 + (i % 3) as f64).collect();

    let parts = LocalComm::run_on(4, |comm| {
        let (lo, hi) = ranges(&sizes)[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &MaybeOnes {
                ndv: dv[comm.rank()],
            },
            Params::default(),
        )
        .expect("setup");

        assert_eq!(op.local_dv(), dv[comm.rank()]);
        assert_eq!(op.coarse_order(), 3);
        assert_eq!(op.dv_start(), &[0, 1, 1, 2, 3]);
        if let Some(coarse) = op.coarse() {
            assert_eq!(coarse.order(), 3);
        }

        // Projection still annihilates every contributed mode.
        let mut rng = StdRng::seed_from_u64(3 + comm.rank() as u64);
        let mut x: Vec<f64> = (0..(hi - lo)).map(|_| rng.gen_range(-1.0..1.0)).collect();
        op.project(&mut x);
        let galerkin: f64 = if dv[comm.rank()] > 0 { x.iter().sum() } else { 0.0 };
        assert!(galerkin.abs() <= 1e-10, "<Px, Z> = {galerkin}");

        let rhs = f[lo..hi].to_vec();
        let mut x = vec![0.0; hi - lo];
        op.solve(&rhs, &mut x).expect("solve");
        x
    });

    let x: Vec<f64> = parts.concat();
    let reference = direct_reference(&global, &f);
    for (got, want) in x.iter().zip(&reference) {
        assert!((got - want).abs() < 1e-5, "x = {got}, expected {want}");
    }
}

#[test]
fn single_rank_degenerates_cleanly() {
    let n = 6;
    let global = poisson_1d(n);
    let f = vec![1.0; n];

    let comm = LocalComm::solo();
    let op = SubdomainDeflation::new(
        comm as Arc<dyn Communicator>,
        &global,
        &ConstantDeflation::new(1),
        Params::default(),
    )
    .expect("setup");

    assert_eq!(op.a_rem().nnz(), 0);
    assert!(op.ghost_cols().is_empty());
    assert_eq!(op.nmasters(), 1);
    assert_eq!(op.coarse_order(), 1);
    // E = Zᵀ A Z: the total entry sum of the Poisson matrix.
    assert!(op.coarse().is_some());

    let mut x = vec![0.0; n];
    let (_, resid) = op.solve(&f, &mut x).expect("solve");
    assert!(resid <= 1e-8);

    let reference = direct_reference(&global, &f);
    for (got, want) in x.iter().zip(&reference) {
        assert!((got - want).abs() < 1e-5, "x = {got}, expected {want}");
    }
}

#[test]
fn two_masters_split_the_coarse_rows() {
    let n = 8;
    let sizes = [2, 2, 2, 2];
    let global = poisson_1d(n);
    let f: Vec<f64> = (0..n).map(|i| (i as f64).sin() + 2.0).collect();

    let prm = Params {
        coarse: CoarseParams { max_masters: 2 },
        ..Params::default()
    };

    let results = LocalComm::run_on(4, |comm| {
        let (lo, hi) = ranges(&sizes)[comm.rank()];
        let strip = strip_of(&global, lo, hi);
        let op = SubdomainDeflation::new(
            comm.clone() as Arc<dyn Communicator>,
            &strip,
            &ConstantDeflation::new(1),
            prm.clone(),
        )
        .expect("setup");

        assert_eq!(op.nmasters(), 2);
        assert_eq!(op.master(), comm.rank() / 2);
        assert_eq!(op.slaves(), &[0, 2, 4]);
        assert_eq!(op.coarse().is_some(), comm.rank() < 2);

        let rhs = f[lo..hi].to_vec();
        let mut x = vec![0.0; hi - lo];
        op.solve(&rhs, &mut x).expect("solve");
        x
    });

    // The two-master coarse solve must match the single-rank operator on
    // the same global system.
    let comm = LocalComm::solo();
    let op = SubdomainDeflation::new(
        comm as Arc<dyn Communicator>,
        &global,
        &ConstantDeflation::new(4),
        Params::default(),
    )
    .expect("reference setup");
    let mut x_ref = vec![0.0; n];
    op.solve(&f, &mut x_ref).expect("reference solve");

    let x: Vec<f64> = results.concat();
    for (got, want) in x.iter().zip(&x_ref) {
        assert!((got - want).abs() < 1e-5, "x = {got}, reference {want}");
    }
    assert!(rel_residual(&global, &f, &x) <= 1e-6);
}
