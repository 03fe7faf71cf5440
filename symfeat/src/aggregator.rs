use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};
use ndarray::{Array2, Array4, ArrayView2, Axis};

use crate::Error;
use crate::kernel::AbortSignal;
use crate::partition::AtomSubset;

/// How often the collector checks for cancellation while waiting for workers
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Output of a single worker, for the atoms in its `AtomSubset`
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    /// Values of the symmetry functions, with shape `n_subset x P`
    pub values: Array2<f64>,
    /// Derivatives of the symmetry functions, with shape `n_subset x (N * P *
    /// 3)`
    pub derivatives: Array2<f64>,
}

impl PartialResult {
    /// Allocate a zero-initialized partial result for `n_rows` atoms in a
    /// structure with `n_atoms` atoms and `n_functions` symmetry functions
    pub fn zeros(n_rows: usize, n_atoms: usize, n_functions: usize) -> PartialResult {
        PartialResult {
            values: Array2::zeros((n_rows, n_functions)),
            derivatives: Array2::zeros((n_rows, n_atoms * n_functions * 3)),
        }
    }
}

/// Final features for a full structure
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    /// Values of the symmetry functions, with shape `N x P`. Row `i` contains
    /// the features of atom `i`.
    pub values: Array2<f64>,
    /// Derivatives of the symmetry functions, with shape `N x P x N x 3`.
    /// Entry `[i, p, j, c]` is the derivative of function `p` of atom `i`
    /// w.r.t. coordinate `c` of atom `j`.
    pub derivatives: Array4<f64>,
}

impl FeatureTensor {
    /// Number of atoms in the structure
    pub fn n_atoms(&self) -> usize {
        self.values.nrows()
    }

    /// Number of symmetry functions
    pub fn n_functions(&self) -> usize {
        self.values.ncols()
    }
}

/// Message sent by each worker to the collector once its computation is done
#[derive(Debug)]
pub struct WorkerMessage {
    /// role of the worker sending this message
    pub role: usize,
    /// atoms computed by this worker
    pub subset: AtomSubset,
    /// result of the computation
    pub result: Result<PartialResult, Error>,
}

/// The `Aggregator` gathers the partial results of all workers at the
/// collector role, and re-assembles them into a single `FeatureTensor`.
#[derive(Debug, Clone)]
pub struct Aggregator {
    n_atoms: usize,
    n_functions: usize,
    n_workers: usize,
    collector: usize,
}

impl Aggregator {
    /// Create a new aggregator for a structure with `n_atoms` atoms and
    /// `n_functions` symmetry functions computed by `n_workers` workers.
    pub fn new(n_atoms: usize, n_functions: usize, n_workers: usize, collector: usize) -> Result<Aggregator, Error> {
        if n_workers == 0 {
            return Err(Error::InvalidArgument("the number of workers must be at least 1".into()));
        }

        if collector >= n_workers {
            return Err(Error::InvalidArgument(format!(
                "collector role {} is out of bounds for {} workers", collector, n_workers
            )));
        }

        return Ok(Aggregator {
            n_atoms: n_atoms,
            n_functions: n_functions,
            n_workers: n_workers,
            collector: collector,
        });
    }

    /// Get the role of the collector
    pub fn collector(&self) -> usize {
        self.collector
    }

    fn check_role(&self, role: usize) -> Result<(), Error> {
        if role >= self.n_workers {
            return Err(Error::InvalidArgument(format!(
                "worker role {} is out of bounds for {} workers", role, self.n_workers
            )));
        }
        return Ok(());
    }

    /// Gather the partial results of all workers into a `FeatureTensor`.
    ///
    /// `partials` can be in any order. Only the collector role gets the
    /// features, other roles get `None`.
    ///
    /// # Errors
    ///
    /// This function returns `Error::ShapeMismatch` if there is not exactly
    /// one partial result per worker, if a partial result does not have the
    /// shape expected from its subset, or if the subsets do not cover all
    /// atoms exactly once.
    #[time_graph::instrument(name = "Aggregator::gather")]
    pub fn gather(&self, role: usize, mut partials: Vec<(AtomSubset, PartialResult)>) -> Result<Option<FeatureTensor>, Error> {
        self.check_role(role)?;
        if role != self.collector {
            return Ok(None);
        }

        if partials.len() != self.n_workers {
            return Err(Error::ShapeMismatch(format!(
                "expected {} partial results, got {}", self.n_workers, partials.len()
            )));
        }

        let n_derivatives = self.n_atoms * self.n_functions * 3;
        for (subset, partial) in &partials {
            if subset.begin > subset.end || subset.end > self.n_atoms {
                return Err(Error::ShapeMismatch(format!(
                    "invalid subset {}..{} for a structure with {} atoms",
                    subset.begin, subset.end, self.n_atoms
                )));
            }

            if partial.values.shape() != [subset.len(), self.n_functions] {
                return Err(Error::ShapeMismatch(format!(
                    "values for atoms {}..{} should have shape [{}, {}], got {:?}",
                    subset.begin, subset.end, subset.len(), self.n_functions, partial.values.shape()
                )));
            }

            if partial.derivatives.shape() != [subset.len(), n_derivatives] {
                return Err(Error::ShapeMismatch(format!(
                    "derivatives for atoms {}..{} should have shape [{}, {}], got {:?}",
                    subset.begin, subset.end, subset.len(), n_derivatives, partial.derivatives.shape()
                )));
            }
        }

        // restore the global atom order, independently of the arrival order
        partials.sort_by_key(|(subset, _)| (subset.begin, subset.end));

        let mut next = 0;
        for (subset, _) in &partials {
            if subset.begin != next {
                return Err(Error::ShapeMismatch(format!(
                    "partial results do not cover atoms contiguously: expected a subset starting at {}, got {}..{}",
                    next, subset.begin, subset.end
                )));
            }
            next = subset.end;
        }

        if next != self.n_atoms {
            return Err(Error::ShapeMismatch(format!(
                "partial results contain {} atoms, expected {}", next, self.n_atoms
            )));
        }

        let values = partials.iter().map(|(_, p)| p.values.view()).collect::<Vec<ArrayView2<'_, f64>>>();
        let values = ndarray::concatenate(Axis(0), &values)?;

        let derivatives = partials.iter().map(|(_, p)| p.derivatives.view()).collect::<Vec<ArrayView2<'_, f64>>>();
        let derivatives = ndarray::concatenate(Axis(0), &derivatives)?;
        let derivatives = derivatives.into_shape_with_order((self.n_atoms, self.n_functions, self.n_atoms, 3))?;

        return Ok(Some(FeatureTensor {
            values: values,
            derivatives: derivatives,
        }));
    }

    /// Receive exactly one message per worker from `receiver`, and gather the
    /// corresponding partial results.
    ///
    /// This blocks until all workers reported back, even if some of them
    /// failed. On the first failure, `abort` is raised to stop the other
    /// workers, and the first non-cancellation error is returned once all
    /// workers are done. If `timeout` elapses first, `abort` is raised and
    /// `Error::Timeout` is returned immediately. If `abort` is raised by
    /// someone else, `Error::Cancelled` is returned immediately.
    ///
    /// Only the collector role receives messages, other roles get `None`.
    #[time_graph::instrument(name = "Aggregator::collect")]
    pub fn collect(
        &self,
        role: usize,
        receiver: &Receiver<WorkerMessage>,
        timeout: Option<Duration>,
        abort: &AbortSignal,
    ) -> Result<Option<FeatureTensor>, Error> {
        self.check_role(role)?;
        if role != self.collector {
            return Ok(None);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mut received = vec![false; self.n_workers];
        let mut partials = Vec::with_capacity(self.n_workers);
        let mut error: Option<Error> = None;
        let mut n_received = 0;

        while n_received < self.n_workers {
            if error.is_none() && abort.is_raised() {
                return Err(Error::Cancelled);
            }

            let mut wait = POLL_INTERVAL;
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                let now = Instant::now();
                if now >= deadline {
                    abort.raise();
                    warn!("only {} of {} workers finished before the timeout", n_received, self.n_workers);
                    return Err(Error::Timeout(timeout));
                }
                wait = Duration::min(wait, deadline - now);
            }

            let message = match receiver.recv_timeout(wait) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    abort.raise();
                    return Err(error.unwrap_or_else(|| Error::ShapeMismatch(format!(
                        "only {} of {} workers sent their partial results", n_received, self.n_workers
                    ))));
                }
            };

            if message.role >= self.n_workers || received[message.role] {
                abort.raise();
                return Err(Error::ShapeMismatch(format!(
                    "unexpected message from worker {}", message.role
                )));
            }
            received[message.role] = true;
            n_received += 1;

            match message.result {
                Ok(partial) => {
                    debug!(
                        "received partial result for atoms {}..{} from worker {}",
                        message.subset.begin, message.subset.end, message.role
                    );
                    partials.push((message.subset, partial));
                }
                Err(e) => {
                    debug!("worker {} failed: {}", message.role, e);
                    abort.raise();
                    let replace = match &error {
                        None => true,
                        Some(Error::Cancelled) => !matches!(e, Error::Cancelled),
                        Some(_) => false,
                    };
                    if replace {
                        error = Some(e);
                    }
                }
            }
        }

        if let Some(error) = error {
            return Err(error);
        }

        return self.gather(role, partials);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::partition::partition;

    use super::*;

    const N_ATOMS: usize = 7;
    const N_FUNCTIONS: usize = 2;

    /// Create the partial results a worker would produce, where each value
    /// encodes its own global index
    fn partial(subset: AtomSubset) -> PartialResult {
        let mut partial = PartialResult::zeros(subset.len(), N_ATOMS, N_FUNCTIONS);
        for (row, atom) in (subset.begin..subset.end).enumerate() {
            for p in 0..N_FUNCTIONS {
                partial.values[[row, p]] = (10 * atom + p) as f64;
                for j in 0..N_ATOMS {
                    for c in 0..3 {
                        partial.derivatives[[row, (p * N_ATOMS + j) * 3 + c]] = (1000 * atom + 100 * p + 10 * j + c) as f64;
                    }
                }
            }
        }
        return partial;
    }

    fn partials(n_workers: usize) -> Vec<(AtomSubset, PartialResult)> {
        partition(N_ATOMS, n_workers).unwrap()
            .into_iter()
            .map(|subset| (subset, partial(subset)))
            .collect()
    }

    fn check_features(features: &FeatureTensor) {
        assert_eq!(features.n_atoms(), N_ATOMS);
        assert_eq!(features.n_functions(), N_FUNCTIONS);
        assert_eq!(features.derivatives.shape(), [N_ATOMS, N_FUNCTIONS, N_ATOMS, 3]);

        for i in 0..N_ATOMS {
            for p in 0..N_FUNCTIONS {
                assert_eq!(features.values[[i, p]], (10 * i + p) as f64);
                for j in 0..N_ATOMS {
                    for c in 0..3 {
                        assert_eq!(features.derivatives[[i, p, j, c]], (1000 * i + 100 * p + 10 * j + c) as f64);
                    }
                }
            }
        }
    }

    #[test]
    fn gather() {
        for n_workers in 1..=N_ATOMS + 2 {
            let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, n_workers, 0).unwrap();
            let features = aggregator.gather(0, partials(n_workers)).unwrap().unwrap();
            check_features(&features);
        }
    }

    #[test]
    fn arrival_order() {
        let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, 3, 2).unwrap();
        let reference = aggregator.gather(2, partials(3)).unwrap().unwrap();

        let mut shuffled = partials(3);
        shuffled.swap(0, 2);
        shuffled.swap(1, 2);
        assert_eq!(aggregator.gather(2, shuffled).unwrap().unwrap(), reference);

        let mut reversed = partials(3);
        reversed.reverse();
        assert_eq!(aggregator.gather(2, reversed).unwrap().unwrap(), reference);
    }

    #[test]
    fn non_collector() {
        let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, 3, 1).unwrap();
        assert_eq!(aggregator.collector(), 1);
        assert!(aggregator.gather(0, partials(3)).unwrap().is_none());
        assert!(aggregator.gather(2, partials(3)).unwrap().is_none());
        assert!(matches!(aggregator.gather(3, partials(3)), Err(Error::InvalidArgument(_))));

        assert!(matches!(Aggregator::new(N_ATOMS, N_FUNCTIONS, 0, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(Aggregator::new(N_ATOMS, N_FUNCTIONS, 2, 2), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn shape_mismatch() {
        let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, 3, 0).unwrap();

        // missing a worker
        let mut missing = partials(3);
        missing.pop();
        assert!(matches!(aggregator.gather(0, missing), Err(Error::ShapeMismatch(_))));

        // row count disagrees with the subset
        let mut wrong_rows = partials(3);
        wrong_rows[1].1.values = Array2::zeros((2, N_FUNCTIONS));
        assert!(matches!(aggregator.gather(0, wrong_rows), Err(Error::ShapeMismatch(_))));

        let mut wrong_rows = partials(3);
        wrong_rows[1].1.derivatives = Array2::zeros((3, N_FUNCTIONS));
        assert!(matches!(aggregator.gather(0, wrong_rows), Err(Error::ShapeMismatch(_))));

        // overlapping subsets
        let subsets = [
            AtomSubset { begin: 0, end: 3 },
            AtomSubset { begin: 2, end: 5 },
            AtomSubset { begin: 5, end: 7 },
        ];
        let overlapping = subsets.iter().map(|&s| (s, partial(s))).collect();
        assert!(matches!(aggregator.gather(0, overlapping), Err(Error::ShapeMismatch(_))));

        // not enough atoms
        let subsets = [
            AtomSubset { begin: 0, end: 3 },
            AtomSubset { begin: 3, end: 5 },
            AtomSubset { begin: 5, end: 6 },
        ];
        let short = subsets.iter().map(|&s| (s, partial(s))).collect();
        assert!(matches!(aggregator.gather(0, short), Err(Error::ShapeMismatch(_))));

        // reversed and out of bounds subsets
        let aggregator = Aggregator::new(3, 1, 1, 0).unwrap();
        let reversed = vec![(AtomSubset { begin: 2, end: 1 }, PartialResult::zeros(0, 3, 1))];
        assert!(matches!(aggregator.gather(0, reversed), Err(Error::ShapeMismatch(_))));

        let too_large = vec![(AtomSubset { begin: 0, end: 4 }, PartialResult::zeros(4, 3, 1))];
        assert!(matches!(aggregator.gather(0, too_large), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn collect() {
        let n_workers = 4;
        let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, n_workers, 0).unwrap();
        let (sender, receiver) = crossbeam::channel::unbounded();

        std::thread::scope(|scope| {
            for (role, (subset, partial)) in partials(n_workers).into_iter().enumerate().rev() {
                let sender = sender.clone();
                scope.spawn(move || {
                    std::thread::sleep(Duration::from_millis(2 * role as u64));
                    sender.send(WorkerMessage { role: role, subset: subset, result: Ok(partial) }).unwrap();
                });
            }

            let features = aggregator.collect(0, &receiver, None, &AbortSignal::new()).unwrap().unwrap();
            check_features(&features);
        });

        assert!(aggregator.collect(1, &receiver, None, &AbortSignal::new()).unwrap().is_none());
    }

    #[test]
    fn collect_worker_failure() {
        let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, 3, 0).unwrap();
        let (sender, receiver) = crossbeam::channel::unbounded();
        let abort = AbortSignal::new();

        let mut partials = partials(3);
        let (subset, _) = partials.remove(1);
        sender.send(WorkerMessage { role: 2, subset: partials[1].0, result: Err(Error::Cancelled) }).unwrap();
        sender.send(WorkerMessage { role: 1, subset: subset, result: Err(Error::Kernel("degenerate geometry".into())) }).unwrap();
        let (subset, partial) = partials.remove(0);
        sender.send(WorkerMessage { role: 0, subset: subset, result: Ok(partial) }).unwrap();

        match aggregator.collect(0, &receiver, None, &abort) {
            Err(Error::Kernel(message)) => assert_eq!(message, "degenerate geometry"),
            other => panic!("expected a kernel error, got {:?}", other),
        }
        assert!(abort.is_raised());
    }

    #[test]
    fn collect_timeout_and_cancel() {
        let aggregator = Aggregator::new(N_ATOMS, N_FUNCTIONS, 2, 0).unwrap();
        let (sender, receiver) = crossbeam::channel::unbounded::<WorkerMessage>();

        let abort = AbortSignal::new();
        let timeout = Duration::from_millis(20);
        let result = aggregator.collect(0, &receiver, Some(timeout), &abort);
        assert!(matches!(result, Err(Error::Timeout(t)) if t == timeout));
        assert!(abort.is_raised());

        let result = aggregator.collect(0, &receiver, None, &abort);
        assert!(matches!(result, Err(Error::Cancelled)));

        let (subset, partial) = partials(2).remove(0);
        sender.send(WorkerMessage { role: 0, subset: subset, result: Ok(partial) }).unwrap();
        drop(sender);
        let result = aggregator.collect(0, &receiver, None, &AbortSignal::new());
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }
}
