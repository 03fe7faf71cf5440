use crate::Error;

/// Contiguous range `[begin, end)` of global atom indexes assigned to a
/// single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomSubset {
    /// first atom in this subset
    pub begin: usize,
    /// one past the last atom in this subset
    pub end: usize,
}

impl AtomSubset {
    /// Get the subset of atoms assigned to the worker with the given `role`,
    /// when distributing `n_atoms` over `n_workers`. The first `n_atoms %
    /// n_workers` workers get one more atom than the others.
    pub fn for_worker(n_atoms: usize, n_workers: usize, role: usize) -> Result<AtomSubset, Error> {
        if n_workers == 0 {
            return Err(Error::InvalidArgument("the number of workers must be at least 1".into()));
        }

        if role >= n_workers {
            return Err(Error::InvalidArgument(format!(
                "worker role {} is out of bounds for {} workers", role, n_workers
            )));
        }

        let quotient = n_atoms / n_workers;
        let remainder = n_atoms % n_workers;

        let begin = role * quotient + usize::min(role, remainder);
        let mut end = begin + quotient;
        if role < remainder {
            end += 1;
        }

        return Ok(AtomSubset { begin: begin, end: end });
    }

    /// Number of atoms in this subset
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Is this subset empty?
    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }

    /// Get the list of global atom indexes in this subset
    pub fn indices(&self) -> Vec<usize> {
        (self.begin..self.end).collect()
    }
}

/// Split `n_atoms` over `n_workers`, in contiguous blocks of near-equal
/// sizes. Subsets are returned in increasing worker role order.
pub fn partition(n_atoms: usize, n_workers: usize) -> Result<Vec<AtomSubset>, Error> {
    if n_workers == 0 {
        return Err(Error::InvalidArgument("the number of workers must be at least 1".into()));
    }

    return (0..n_workers)
        .map(|role| AtomSubset::for_worker(n_atoms, n_workers, role))
        .collect();
}
