use indexmap::IndexSet;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::{Error, Matrix3, Vector3D};
use super::UnitCell;

/// Ordered list of chemical species. The position of a species in this list
/// defines its 1-based species id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesOrder {
    symbols: IndexSet<String>,
}

impl SpeciesOrder {
    /// Create a new species order from the given list of symbols.
    ///
    /// # Errors
    ///
    /// This function fails if the list is empty or contains the same symbol
    /// more than once.
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Result<SpeciesOrder, Error> {
        let mut set = IndexSet::new();
        for symbol in symbols {
            let symbol = symbol.into();
            if !set.insert(symbol.clone()) {
                return Err(Error::InvalidArgument(format!(
                    "species '{}' is present more than once in the species order", symbol
                )));
            }
        }

        if set.is_empty() {
            return Err(Error::InvalidArgument("the species order can not be empty".into()));
        }

        return Ok(SpeciesOrder { symbols: set });
    }

    /// Get the 1-based id of the species with the given `symbol`
    pub fn id(&self, symbol: &str) -> Option<i32> {
        self.symbols.get_index_of(symbol).map(|index| index as i32 + 1)
    }

    /// Get the symbol corresponding to a 1-based species `id`
    pub fn symbol(&self, id: i32) -> Option<&str> {
        if id < 1 {
            return None;
        }
        self.symbols.get_index(id as usize - 1).map(|s| s.as_str())
    }

    /// Number of species in this order
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Is this species order empty? This is never the case for orders built
    /// with [`SpeciesOrder::new`].
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterate over the symbols, in id order
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.symbols.iter().map(|s| s.as_str())
    }
}

/// An atomic structure, as provided by structure file readers: lattice,
/// Cartesian and fractional positions, and the chemical symbol of each atom.
#[derive(Debug, Clone)]
pub struct Structure {
    cell: UnitCell,
    positions: Vec<Vector3D>,
    fractional: Vec<Vector3D>,
    symbols: Vec<String>,
}

impl Structure {
    /// Create a new empty structure with the given unit cell
    pub fn new(cell: UnitCell) -> Structure {
        Structure {
            cell: cell,
            positions: Vec::new(),
            fractional: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Add an atom with the given chemical `symbol` and Cartesian `position`
    /// to this structure. The fractional position is computed from the unit
    /// cell.
    pub fn add_atom(&mut self, symbol: impl Into<String>, position: Vector3D) {
        let fractional = self.fractional_position(position);
        self.add_atom_with_fractional(symbol, position, fractional);
    }

    /// Add an atom with both Cartesian and fractional positions, as given by
    /// a structure file reader.
    pub fn add_atom_with_fractional(&mut self, symbol: impl Into<String>, position: Vector3D, fractional: Vector3D) {
        self.symbols.push(symbol.into());
        self.positions.push(position);
        self.fractional.push(fractional);
    }

    /// Move the atom at `index` to a new Cartesian `position`
    pub fn set_position(&mut self, index: usize, position: Vector3D) {
        self.fractional[index] = self.fractional_position(position);
        self.positions[index] = position;
    }

    fn fractional_position(&self, position: Vector3D) -> Vector3D {
        if self.cell.is_infinite() {
            Vector3D::zero()
        } else {
            self.cell.fractional(position)
        }
    }

    /// Get the number of atoms in this structure
    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    /// Get the unit cell of this structure
    pub fn cell(&self) -> UnitCell {
        self.cell
    }

    /// Get the Cartesian positions of all atoms
    pub fn positions(&self) -> &[Vector3D] {
        &self.positions
    }

    /// Get the fractional positions of all atoms. These are all zero for
    /// structures without periodic boundary conditions.
    pub fn fractional_positions(&self) -> &[Vector3D] {
        &self.fractional
    }

    /// Get the chemical symbols of all atoms
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

/// Read-only view of the buffers a descriptor kernel works on. All arrays are
/// in standard (row-major, contiguous) layout.
#[derive(Debug, Clone, Copy)]
pub struct KernelInput<'a> {
    /// Lattice matrix (3 x 3), one cell vector per row. All zeros for
    /// non-periodic structures.
    pub lattice: ArrayView2<'a, f64>,
    /// Cartesian positions (N x 3)
    pub cartesian: ArrayView2<'a, f64>,
    /// Fractional positions (N x 3)
    pub fractional: ArrayView2<'a, f64>,
    /// 1-based species id of each atom (N)
    pub species: ArrayView1<'a, i32>,
}

impl<'a> KernelInput<'a> {
    /// Number of atoms in the structure
    pub fn size(&self) -> usize {
        self.species.len()
    }

    /// Check that all the arrays have consistent shapes
    pub fn validate(&self) -> Result<(), Error> {
        let n_atoms = self.size();
        if self.lattice.shape() != [3, 3] {
            return Err(Error::ShapeMismatch(format!(
                "expected a 3x3 lattice, got {:?}", self.lattice.shape()
            )));
        }

        if self.cartesian.shape() != [n_atoms, 3] || self.fractional.shape() != [n_atoms, 3] {
            return Err(Error::ShapeMismatch(format!(
                "expected positions with shape [{}, 3], got {:?} (cartesian) and {:?} (fractional)",
                n_atoms, self.cartesian.shape(), self.fractional.shape()
            )));
        }

        return Ok(());
    }
}

/// A `Structure` adapted to the buffers expected by descriptor kernels, with
/// species symbols converted to 1-based ids.
#[derive(Debug, Clone)]
pub struct StructureView {
    cell: UnitCell,
    lattice: Array2<f64>,
    cartesian: Array2<f64>,
    fractional: Array2<f64>,
    species: Array1<i32>,
}

impl StructureView {
    /// Build the view of `structure`, using `species` to assign ids to the
    /// atoms.
    ///
    /// # Errors
    ///
    /// This function fails with `Error::UnknownSpecies` if one of the atoms
    /// has a symbol not present in `species`.
    pub fn new(structure: &Structure, species: &SpeciesOrder) -> Result<StructureView, Error> {
        let n_atoms = structure.size();

        let mut ids = Array1::zeros(n_atoms);
        for (atom, symbol) in structure.symbols().iter().enumerate() {
            ids[atom] = species.id(symbol).ok_or_else(|| Error::UnknownSpecies(format!(
                "atom {} is '{}', which is not one of the configured species [{}]",
                atom, symbol, species.iter().collect::<Vec<_>>().join(", ")
            )))?;
        }

        let matrix = structure.cell().matrix();
        let lattice = Array2::from_shape_fn((3, 3), |(i, j)| matrix[i][j]);

        let positions = structure.positions();
        let cartesian = Array2::from_shape_fn((n_atoms, 3), |(i, j)| positions[i][j]);

        let fractional = structure.fractional_positions();
        let fractional = Array2::from_shape_fn((n_atoms, 3), |(i, j)| fractional[i][j]);

        return Ok(StructureView {
            cell: structure.cell(),
            lattice: lattice,
            cartesian: cartesian,
            fractional: fractional,
            species: ids,
        });
    }

    /// Get the number of atoms in this structure
    pub fn size(&self) -> usize {
        self.species.len()
    }

    /// Get the unit cell of this structure
    pub fn cell(&self) -> UnitCell {
        self.cell
    }

    /// Get the species id of all atoms
    pub fn species(&self) -> ArrayView1<'_, i32> {
        self.species.view()
    }

    /// Get the buffers to be passed to a descriptor kernel
    pub fn kernel_input(&self) -> KernelInput<'_> {
        KernelInput {
            lattice: self.lattice.view(),
            cartesian: self.cartesian.view(),
            fractional: self.fractional.view(),
            species: self.species.view(),
        }
    }
}

/// Convert a row of a N x 3 array to a `Vector3D`
pub(crate) fn row_to_vector(array: &ArrayView2<'_, f64>, row: usize) -> Vector3D {
    Vector3D::new(array[[row, 0]], array[[row, 1]], array[[row, 2]])
}

/// Convert a 3 x 3 array to a `Matrix3`
pub(crate) fn array_to_matrix(array: &ArrayView2<'_, f64>) -> Matrix3 {
    Matrix3::new([
        [array[[0, 0]], array[[0, 1]], array[[0, 2]]],
        [array[[1, 0]], array[[1, 1]], array[[1, 2]]],
        [array[[2, 0]], array[[2, 1]], array[[2, 2]]],
    ])
}
