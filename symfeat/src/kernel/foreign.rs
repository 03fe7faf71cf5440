use ndarray::{Array2, ArrayViewMut2};

use crate::Error;
use crate::parameters::EncodedParameters;
use crate::systems::KernelInput;

use super::{AbortSignal, DescriptorKernel, check_kernel_buffers};

/// Signature of native symmetry functions implementations:
///
/// ```c
/// void calculate_sf(
///     double** lattice, double** cartesian, double** fractional,
///     int* species, int n_atoms,
///     int* atoms, int n_computed,
///     int** int_fields, double** float_fields, int n_functions,
///     double** values, double** derivatives
/// );
/// ```
///
/// All 2D arrays are passed as arrays of pointers to the start of each row.
pub type CalculateSymmetryFunctions = unsafe extern "C" fn(
    lattice: *mut *mut f64,
    cartesian: *mut *mut f64,
    fractional: *mut *mut f64,
    species: *mut i32,
    n_atoms: i32,
    atoms: *mut i32,
    n_computed: i32,
    int_fields: *mut *mut i32,
    float_fields: *mut *mut f64,
    n_functions: i32,
    values: *mut *mut f64,
    derivatives: *mut *mut f64,
);

/// A `DescriptorKernel` delegating the computation to a native function.
///
/// Inputs are copied to buffers owned by this kernel before each call, so the
/// native code never sees memory shared with other workers. Native code can
/// not be interrupted: the `AbortSignal` is only checked before the call.
#[derive(Clone)]
pub struct ForeignKernel {
    name: String,
    function: CalculateSymmetryFunctions,
}

impl std::fmt::Debug for ForeignKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignKernel").field("name", &self.name).finish_non_exhaustive()
    }
}

impl ForeignKernel {
    /// Wrap the native `function` in a `ForeignKernel`.
    ///
    /// # Safety
    ///
    /// `function` must follow the calling convention documented in
    /// [`CalculateSymmetryFunctions`], only write inside the `values` and
    /// `derivatives` rows it is given, and be safe to call concurrently from
    /// multiple threads.
    pub unsafe fn new(name: impl Into<String>, function: CalculateSymmetryFunctions) -> ForeignKernel {
        ForeignKernel {
            name: name.into(),
            function: function,
        }
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| Error::InvalidArgument(format!(
        "{} ({}) does not fit in a 32-bit integer", what, value
    )))
}

/// Get pointers to the start of each row of a standard layout array
fn row_pointers<T>(array: &mut Array2<T>) -> Vec<*mut T> {
    debug_assert!(array.is_standard_layout());
    let n_columns = array.ncols();
    let start = array.as_mut_ptr();
    return (0..array.nrows())
        // SAFETY: the array is contiguous, so every row starts inside the
        // allocation
        .map(|row| unsafe { start.add(row * n_columns) })
        .collect();
}

impl DescriptorKernel for ForeignKernel {
    fn name(&self) -> String {
        self.name.clone()
    }

    #[time_graph::instrument(name = "ForeignKernel::compute")]
    fn compute(
        &self,
        input: &KernelInput<'_>,
        atoms: &[usize],
        parameters: &EncodedParameters,
        mut values: ArrayViewMut2<'_, f64>,
        mut derivatives: ArrayViewMut2<'_, f64>,
        abort: &AbortSignal,
    ) -> Result<(), Error> {
        check_kernel_buffers(input, atoms, parameters, &values, &derivatives)?;

        if abort.is_raised() {
            return Err(Error::Cancelled);
        }

        values.fill(0.0);
        derivatives.fill(0.0);
        if atoms.is_empty() || parameters.is_empty() {
            return Ok(());
        }

        let n_atoms = to_i32(input.size(), "number of atoms")?;
        let n_computed = to_i32(atoms.len(), "number of computed atoms")?;
        let n_functions = to_i32(parameters.len(), "number of symmetry functions")?;

        let mut lattice = input.lattice.as_standard_layout().into_owned();
        let mut cartesian = input.cartesian.as_standard_layout().into_owned();
        let mut fractional = input.fractional.as_standard_layout().into_owned();
        let mut species = input.species.to_vec();
        let mut atoms = atoms.iter()
            .map(|&atom| to_i32(atom, "atom index"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut int_fields = parameters.int_fields.as_standard_layout().into_owned();
        let mut float_fields = parameters.float_fields.as_standard_layout().into_owned();

        let mut output_values = Array2::<f64>::zeros(values.raw_dim());
        let mut output_derivatives = Array2::<f64>::zeros(derivatives.raw_dim());

        let mut lattice_rows = row_pointers(&mut lattice);
        let mut cartesian_rows = row_pointers(&mut cartesian);
        let mut fractional_rows = row_pointers(&mut fractional);
        let mut int_fields_rows = row_pointers(&mut int_fields);
        let mut float_fields_rows = row_pointers(&mut float_fields);
        let mut values_rows = row_pointers(&mut output_values);
        let mut derivatives_rows = row_pointers(&mut output_derivatives);

        // SAFETY: all buffers are owned by this function, have the size
        // expected by the calling convention and outlive the call. The
        // function itself is trusted through `ForeignKernel::new`.
        unsafe {
            (self.function)(
                lattice_rows.as_mut_ptr(),
                cartesian_rows.as_mut_ptr(),
                fractional_rows.as_mut_ptr(),
                species.as_mut_ptr(),
                n_atoms,
                atoms.as_mut_ptr(),
                n_computed,
                int_fields_rows.as_mut_ptr(),
                float_fields_rows.as_mut_ptr(),
                n_functions,
                values_rows.as_mut_ptr(),
                derivatives_rows.as_mut_ptr(),
            );
        }

        let all_finite = |array: &Array2<f64>| array.iter().all(|v| v.is_finite());
        if !all_finite(&output_values) || !all_finite(&output_derivatives) {
            return Err(Error::Kernel(format!("{} produced non-finite values", self.name)));
        }

        values.assign(&output_values);
        derivatives.assign(&output_derivatives);

        return Ok(());
    }
}
