//! In-process communicator running a rank group on threads.
//!
//! Gives the collective setup and solve phases real multi-rank semantics
//! without an MPI launcher: each rank is a thread, point-to-point messages
//! go through per-(source, destination, tag) FIFO mailboxes, and
//! collectives synchronize on a shared board. `LocalComm::solo()` covers the
//! single-process production case; [`LocalComm::run_on`] is the harness the
//! integration tests are built on.

use super::comm::{Communicator, Tag};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

enum Payload {
    Indices(Vec<usize>),
    Values(Vec<f64>),
}

/// One rank's input to the collective in flight. All ranks must contribute
/// the same variant; the SPMD call discipline of the solver guarantees it.
enum Contribution {
    Indices(Vec<usize>),
    Values(Vec<f64>),
    Scalar(f64),
    /// Broadcast payload; `Some` on the root only.
    Root(Option<Vec<f64>>),
    /// Split colour; `None` drops out of the new group.
    Colour(Option<usize>),
    Barrier,
}

enum Outcome {
    /// Per-rank contributions, for gathers/reductions/broadcasts.
    Gathered(Vec<Contribution>),
    /// Per-rank subgroup handle and sub-rank after a colour split.
    Split(Vec<Option<(Arc<Shared>, usize)>>),
    Done,
}

#[derive(Default)]
struct Board {
    contrib: Vec<Option<Contribution>>,
    arrived: usize,
    result: Option<Arc<Outcome>>,
    taken: usize,
    /// True while the previous round's result is being picked up.
    draining: bool,
}

struct Shared {
    size: usize,
    mail: Mutex<HashMap<(usize, usize, Tag), VecDeque<Payload>>>,
    mail_cv: Condvar,
    board: Mutex<Board>,
    board_cv: Condvar,
}

impl Shared {
    fn new(size: usize) -> Self {
        Self {
            size,
            mail: Mutex::new(HashMap::new()),
            mail_cv: Condvar::new(),
            board: Mutex::new(Board {
                contrib: (0..size).map(|_| None).collect(),
                ..Board::default()
            }),
            board_cv: Condvar::new(),
        }
    }
}

/// One rank's endpoint of an in-process communicator.
pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
}

impl LocalComm {
    /// Single-rank communicator; the degenerate `P = 1` case.
    pub fn solo() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared::new(1)),
            rank: 0,
        })
    }

    /// Run `f` once per rank on `nranks` threads sharing one communicator.
    /// Returns the per-rank results in rank order.
    pub fn run_on<T, F>(nranks: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Arc<LocalComm>) -> T + Send + Sync,
    {
        let shared = Arc::new(Shared::new(nranks));
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..nranks)
                .map(|rank| {
                    let comm = Arc::new(LocalComm {
                        shared: Arc::clone(&shared),
                        rank,
                    });
                    let f = &f;
                    s.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }

    fn post(&self, to: usize, tag: Tag, payload: Payload) {
        let mut mail = self.shared.mail.lock().unwrap();
        mail.entry((self.rank, to, tag))
            .or_default()
            .push_back(payload);
        self.shared.mail_cv.notify_all();
    }

    fn take(&self, from: usize, tag: Tag) -> Payload {
        let key = (from, self.rank, tag);
        let mut mail = self.shared.mail.lock().unwrap();
        loop {
            if let Some(msg) = mail.get_mut(&key).and_then(VecDeque::pop_front) {
                return msg;
            }
            mail = self.shared.mail_cv.wait(mail).unwrap();
        }
    }

    /// One round of the collective board. The last rank to arrive combines
    /// the contributions; the last rank to pick up the result resets the
    /// board for the next round.
    fn collective(&self, c: Contribution) -> Arc<Outcome> {
        let mut b = self.shared.board.lock().unwrap();
        while b.draining {
            b = self.shared.board_cv.wait(b).unwrap();
        }

        b.contrib[self.rank] = Some(c);
        b.arrived += 1;

        if b.arrived == self.shared.size {
            let contribs: Vec<Contribution> =
                b.contrib.iter_mut().map(|c| c.take().unwrap()).collect();
            b.result = Some(Arc::new(combine(contribs)));
            b.draining = true;
            self.shared.board_cv.notify_all();
        } else {
            while !b.draining {
                b = self.shared.board_cv.wait(b).unwrap();
            }
        }

        let out = Arc::clone(b.result.as_ref().unwrap());
        b.taken += 1;
        if b.taken == self.shared.size {
            b.draining = false;
            b.arrived = 0;
            b.taken = 0;
            b.result = None;
            self.shared.board_cv.notify_all();
        }
        out
    }
}

fn combine(contribs: Vec<Contribution>) -> Outcome {
    match contribs.first() {
        Some(Contribution::Colour(_)) => {
            // Group ranks by colour, ordered by parent rank, and hand each
            // member its subgroup state and sub-rank.
            let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
            for (rank, c) in contribs.iter().enumerate() {
                if let Contribution::Colour(Some(colour)) = c {
                    groups.entry(*colour).or_default().push(rank);
                }
            }
            let mut assignment: Vec<Option<(Arc<Shared>, usize)>> =
                (0..contribs.len()).map(|_| None).collect();
            for members in groups.values() {
                let sub = Arc::new(Shared::new(members.len()));
                for (subrank, &rank) in members.iter().enumerate() {
                    assignment[rank] = Some((Arc::clone(&sub), subrank));
                }
            }
            Outcome::Split(assignment)
        }
        Some(Contribution::Barrier) => Outcome::Done,
        _ => Outcome::Gathered(contribs),
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn send_indices(&self, to: usize, tag: Tag, data: &[usize]) {
        self.post(to, tag, Payload::Indices(data.to_vec()));
    }

    fn send_values(&self, to: usize, tag: Tag, data: &[f64]) {
        self.post(to, tag, Payload::Values(data.to_vec()));
    }

    fn recv_indices(&self, from: usize, tag: Tag) -> Vec<usize> {
        match self.take(from, tag) {
            Payload::Indices(v) => v,
            Payload::Values(_) => panic!("index message expected on tag {tag}"),
        }
    }

    fn recv_values(&self, from: usize, tag: Tag) -> Vec<f64> {
        match self.take(from, tag) {
            Payload::Values(v) => v,
            Payload::Indices(_) => panic!("value message expected on tag {tag}"),
        }
    }

    fn all_gather_indices(&self, data: &[usize]) -> Vec<Vec<usize>> {
        match &*self.collective(Contribution::Indices(data.to_vec())) {
            Outcome::Gathered(all) => all
                .iter()
                .map(|c| match c {
                    Contribution::Indices(v) => v.clone(),
                    _ => unreachable!("mixed collective"),
                })
                .collect(),
            _ => unreachable!("mixed collective"),
        }
    }

    fn all_gather_values(&self, data: &[f64]) -> Vec<Vec<f64>> {
        match &*self.collective(Contribution::Values(data.to_vec())) {
            Outcome::Gathered(all) => all
                .iter()
                .map(|c| match c {
                    Contribution::Values(v) => v.clone(),
                    _ => unreachable!("mixed collective"),
                })
                .collect(),
            _ => unreachable!("mixed collective"),
        }
    }

    fn all_reduce_sum(&self, local: f64) -> f64 {
        match &*self.collective(Contribution::Scalar(local)) {
            Outcome::Gathered(all) => all
                .iter()
                .map(|c| match c {
                    Contribution::Scalar(x) => *x,
                    _ => unreachable!("mixed collective"),
                })
                .sum(),
            _ => unreachable!("mixed collective"),
        }
    }

    fn gather_values(&self, data: &[f64], root: usize) -> Option<Vec<Vec<f64>>> {
        let out = self.collective(Contribution::Values(data.to_vec()));
        if self.rank != root {
            return None;
        }
        match &*out {
            Outcome::Gathered(all) => Some(
                all.iter()
                    .map(|c| match c {
                        Contribution::Values(v) => v.clone(),
                        _ => unreachable!("mixed collective"),
                    })
                    .collect(),
            ),
            _ => unreachable!("mixed collective"),
        }
    }

    fn broadcast_values(&self, buf: &mut Vec<f64>, root: usize) {
        let payload = if self.rank == root {
            Some(buf.clone())
        } else {
            None
        };
        match &*self.collective(Contribution::Root(payload)) {
            Outcome::Gathered(all) => match &all[root] {
                Contribution::Root(Some(v)) => {
                    if self.rank != root {
                        buf.clear();
                        buf.extend_from_slice(v);
                    }
                }
                _ => unreachable!("broadcast without a root payload"),
            },
            _ => unreachable!("mixed collective"),
        }
    }

    fn split(&self, colour: Option<usize>) -> Option<Arc<dyn Communicator>> {
        match &*self.collective(Contribution::Colour(colour)) {
            Outcome::Split(assignment) => assignment[self.rank].as_ref().map(|(shared, subrank)| {
                Arc::new(LocalComm {
                    shared: Arc::clone(shared),
                    rank: *subrank,
                }) as Arc<dyn Communicator>
            }),
            _ => unreachable!("mixed collective"),
        }
    }

    fn barrier(&self) {
        self.collective(Contribution::Barrier);
    }
}
