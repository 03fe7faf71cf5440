use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::ArrayViewMut2;

use crate::Error;
use crate::parameters::EncodedParameters;
use crate::systems::KernelInput;

mod symmetry_functions;
pub use self::symmetry_functions::SymmetryFunctionKernel;

mod foreign;
pub use self::foreign::{ForeignKernel, CalculateSymmetryFunctions};

/// Shared flag used to ask running computations to stop as soon as possible.
///
/// Cloning an `AbortSignal` gives another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl AbortSignal {
    /// Create a new signal, initially not raised
    pub fn new() -> AbortSignal {
        AbortSignal::default()
    }

    /// Create a new signal which is raised when either itself or `self` is
    /// raised. Raising the child does not raise `self`.
    pub fn child(&self) -> AbortSignal {
        AbortSignal {
            raised: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.raised)),
        }
    }

    /// Ask all computations watching this signal to stop
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Check if this signal (or its parent) has been raised
    pub fn is_raised(&self) -> bool {
        if self.raised.load(Ordering::SeqCst) {
            return true;
        }

        match &self.parent {
            Some(parent) => parent.load(Ordering::SeqCst),
            None => false,
        }
    }
}

/// A `DescriptorKernel` computes the values and derivatives of all symmetry
/// functions for a subset of the atoms in a structure.
///
/// Kernels are pure functions of their inputs, and will be called
/// concurrently from multiple workers, each with its own output buffers.
pub trait DescriptorKernel: Send + Sync {
    /// Get the name of this kernel
    fn name(&self) -> String;

    /// Compute the symmetry functions for the given list of `atoms` (global
    /// atom indexes, not necessarily contiguous) of the structure described by
    /// `input`.
    ///
    /// `values` must have the shape `atoms.len() x P` and `derivatives` the
    /// shape `atoms.len() x (N * P * 3)`, where `P` is the number of symmetry
    /// functions and `N` the number of atoms in the structure. On output, row
    /// `a` of `values` contains the symmetry functions of atom `atoms[a]`, and
    /// `derivatives[[a, (p * N + j) * 3 + c]]` contains the derivative of
    /// function `p` for this atom with respect to coordinate `c` of atom `j`.
    ///
    /// Kernels should stop and return `Error::Cancelled` when `abort` is
    /// raised, if they are able to.
    #[allow(clippy::too_many_arguments)]
    fn compute(
        &self,
        input: &KernelInput<'_>,
        atoms: &[usize],
        parameters: &EncodedParameters,
        values: ArrayViewMut2<'_, f64>,
        derivatives: ArrayViewMut2<'_, f64>,
        abort: &AbortSignal,
    ) -> Result<(), Error>;
}

/// Check that all the kernel inputs and outputs have the expected shapes
pub(crate) fn check_kernel_buffers(
    input: &KernelInput<'_>,
    atoms: &[usize],
    parameters: &EncodedParameters,
    values: &ArrayViewMut2<'_, f64>,
    derivatives: &ArrayViewMut2<'_, f64>,
) -> Result<(), Error> {
    input.validate()?;

    let n_atoms = input.size();
    let n_functions = parameters.len();

    if parameters.float_fields.nrows() != n_functions || parameters.int_fields.ncols() != 3 {
        return Err(Error::ShapeMismatch(format!(
            "inconsistent encoded parameters: {:?} integer fields and {:?} float fields",
            parameters.int_fields.shape(), parameters.float_fields.shape()
        )));
    }

    if let Some(atom) = atoms.iter().find(|&&atom| atom >= n_atoms) {
        return Err(Error::InvalidArgument(format!(
            "atom index {} is out of bounds for a structure with {} atoms", atom, n_atoms
        )));
    }

    if values.shape() != [atoms.len(), n_functions] {
        return Err(Error::ShapeMismatch(format!(
            "expected values buffer with shape [{}, {}], got {:?}",
            atoms.len(), n_functions, values.shape()
        )));
    }

    if derivatives.shape() != [atoms.len(), n_atoms * n_functions * 3] {
        return Err(Error::ShapeMismatch(format!(
            "expected derivatives buffer with shape [{}, {}], got {:?}",
            atoms.len(), n_atoms * n_functions * 3, derivatives.shape()
        )));
    }

    return Ok(());
}
