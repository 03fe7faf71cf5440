use log::warn;
use ndarray::Array3;

use crate::{Matrix3, Vector3D};
use super::UnitCell;

/// Maximal number of cells, we need to use this to prevent having too many
/// cells with a small unit cell and a large cutoff
const MAX_NUMBER_OF_CELLS: f64 = 1e5;

/// A cell shift represents the displacement along cell axis between the actual
/// position of an atom and a periodic image of this atom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellShift([i32; 3]);

impl std::ops::Add<CellShift> for CellShift {
    type Output = CellShift;

    fn add(mut self, rhs: CellShift) -> Self::Output {
        self.0[0] += rhs[0];
        self.0[1] += rhs[1];
        self.0[2] += rhs[2];
        return self;
    }
}

impl std::ops::Sub<CellShift> for CellShift {
    type Output = CellShift;

    fn sub(mut self, rhs: CellShift) -> Self::Output {
        self.0[0] -= rhs[0];
        self.0[1] -= rhs[1];
        self.0[2] -= rhs[2];
        return self;
    }
}

impl std::ops::Index<usize> for CellShift {
    type Output = i32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl CellShift {
    /// Compute the shift vector in cartesian coordinates, using the given cell
    /// matrix (stored in row major order).
    pub fn cartesian(&self, cell: &Matrix3) -> Vector3D {
        let x = cell[0][0] * self[0] as f64 + cell[1][0] * self[1] as f64 + cell[2][0] * self[2] as f64;
        let y = cell[0][1] * self[0] as f64 + cell[1][1] * self[1] as f64 + cell[2][1] * self[2] as f64;
        let z = cell[0][2] * self[0] as f64 + cell[1][2] * self[1] as f64 + cell[2][2] * self[2] as f64;
        Vector3D::new(x, y, z)
    }

    fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }
}

/// A neighbor of some central atom, within the cutoff of the `CellList`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// index of the neighbor in the structure. Periodic images of the same
    /// atom share this index.
    pub index: usize,
    /// vector from the central atom to this neighbor, accounting for periodic
    /// boundary conditions.
    pub vector: Vector3D,
    /// distance between the central atom and this neighbor
    pub distance: f64,
    /// how many cell shifts were applied to the neighbor to create this
    /// periodic image
    pub cell_shift: [i32; 3],
}

/// Data associated with an atoms inside the `CellList`
#[derive(Debug, Clone)]
struct AtomData {
    /// index of the atom in the original system
    index: usize,
    /// the shift vector from the actual atom position to the image of this atom
    /// inside the unit cell
    shift: CellShift,
}

/// The cell list is used to sort atoms inside bins/cells.
///
/// The neighbors of a given atom are then found by looking through all
/// neighboring cells (the number of cells to search depends on the cutoff and
/// the size of the cells).
#[derive(Debug, Clone)]
pub struct CellList {
    /// How many cells do we need to look at when searching neighbors to include
    /// all neighbors below cutoff
    n_search: [i32; 3],
    /// the cells themselves
    cells: Array3<Vec<AtomData>>,
    /// cell index and shift of every atom, indexed by atom
    locations: Vec<([usize; 3], CellShift)>,
    /// Cartesian positions of all atoms
    positions: Vec<Vector3D>,
    /// Unit cell defining periodic boundary conditions
    unit_cell: UnitCell,
    /// Cutoff radius for the neighbors search
    cutoff: f64,
}

impl CellList {
    /// Create a new `CellList` for the given unit cell and cutoff, determining
    /// all required parameters.
    pub fn new(unit_cell: UnitCell, cutoff: f64) -> CellList {
        assert!(cutoff > 0.0 && cutoff.is_finite(), "cutoff must be positive and finite");

        let distances_between_faces = if unit_cell.is_infinite() {
            // use a pseudo orthorhombic cell with size 1, `n_search` below will
            // make sure we look to every cell up to the cutoff
            Vector3D::new(1.0, 1.0, 1.0)
        } else {
            unit_cell.distances_between_faces()
        };

        let mut n_cells = [
            f64::clamp(f64::trunc(distances_between_faces[0] / cutoff), 1.0, f64::INFINITY),
            f64::clamp(f64::trunc(distances_between_faces[1] / cutoff), 1.0, f64::INFINITY),
            f64::clamp(f64::trunc(distances_between_faces[2] / cutoff), 1.0, f64::INFINITY),
        ];

        // limit memory consumption by ensuring we have less than `MAX_N_CELLS`
        // cells to look though
        let n_cells_total = n_cells[0] * n_cells[1] * n_cells[2];
        if n_cells_total > MAX_NUMBER_OF_CELLS {
            // set the total number of cells close to MAX_N_CELLS, while keeping
            // roughly the ratio of cells in each direction
            let ratio_x_y = n_cells[0] / n_cells[1];
            let ratio_y_z = n_cells[1] / n_cells[2];

            n_cells[2] = f64::trunc(f64::cbrt(MAX_NUMBER_OF_CELLS / (ratio_x_y * ratio_y_z * ratio_y_z)));
            n_cells[1] = f64::trunc(ratio_y_z * n_cells[2]);
            n_cells[0] = f64::trunc(ratio_x_y * n_cells[1]);
        }

        // number of cells to search in each direction to make sure all possible
        // pairs below the cutoff are accounted for.
        let mut n_search = [
            f64::ceil(cutoff * n_cells[0] / distances_between_faces[0]) as i32,
            f64::ceil(cutoff * n_cells[1] / distances_between_faces[1]) as i32,
            f64::ceil(cutoff * n_cells[2] / distances_between_faces[2]) as i32,
        ];

        let n_cells = [
            n_cells[0] as usize,
            n_cells[1] as usize,
            n_cells[2] as usize,
        ];

        for xyz in 0..3 {
            if n_search[xyz] < 1 {
                n_search[xyz] = 1;
            }

            // don't look for neighboring cells if we have only one cell and no
            // periodic boundary condition
            if n_cells[xyz] == 1 && unit_cell.is_infinite() {
                n_search[xyz] = 0;
            }
        }

        CellList {
            n_search: n_search,
            cells: Array3::from_elem(n_cells, Vec::new()),
            locations: Vec::new(),
            positions: Vec::new(),
            unit_cell: unit_cell,
            cutoff: cutoff,
        }
    }

    /// Add the next atom to the cell list. Atoms are identified by the order
    /// in which they are added. The `fractional` position is used to bin the
    /// atom for periodic cells, and ignored for infinite cells.
    pub fn add_atom(&mut self, position: Vector3D, fractional: Vector3D) {
        let index = self.positions.len();
        let binning = if self.unit_cell.is_infinite() {
            position
        } else {
            fractional
        };

        let n_cells = self.cells.shape();
        let n_cells = [n_cells[0], n_cells[1], n_cells[2]];

        // find the subcell in which this atom 'should go'
        let cell_index = [
            f64::floor(binning[0] * n_cells[0] as f64) as i32,
            f64::floor(binning[1] * n_cells[1] as f64) as i32,
            f64::floor(binning[2] * n_cells[2] as f64) as i32,
        ];

        // deal with pbc by wrapping the atom inside if it was outside of the
        // cell
        let (shift, cell_index) = if self.unit_cell.is_infinite() {
            let cell_index = [
                i32::clamp(cell_index[0], 0, n_cells[0] as i32 - 1) as usize,
                i32::clamp(cell_index[1], 0, n_cells[1] as i32 - 1) as usize,
                i32::clamp(cell_index[2], 0, n_cells[2] as i32 - 1) as usize,
            ];
            ([0, 0, 0], cell_index)
        } else {
            divmod_vec(cell_index, n_cells)
        };

        self.cells[cell_index].push(AtomData {
            index: index,
            shift: CellShift(shift),
        });
        self.locations.push((cell_index, CellShift(shift)));
        self.positions.push(position);
    }

    /// Get all neighbors of the atom at index `center` within the cutoff,
    /// including periodic images of other atoms and of `center` itself.
    ///
    /// The order of the neighbors only depends on the atoms in the list and
    /// the cutoff, so two calls with the same data always give the same list.
    pub fn neighbors(&self, center: usize) -> Vec<Neighbor> {
        let mut neighbors = Vec::new();

        let n_cells = self.cells.shape();
        let n_cells = [n_cells[0], n_cells[1], n_cells[2]];

        let (center_cell, center_shift) = self.locations[center];
        let center_position = self.positions[center];
        let cell_matrix = self.unit_cell.matrix();
        let cutoff2 = self.cutoff * self.cutoff;

        for delta_x in -self.n_search[0]..=self.n_search[0] {
            for delta_y in -self.n_search[1]..=self.n_search[1] {
                for delta_z in -self.n_search[2]..=self.n_search[2] {
                    let cell_i = [
                        center_cell[0] as i32 + delta_x,
                        center_cell[1] as i32 + delta_y,
                        center_cell[2] as i32 + delta_z,
                    ];

                    // shift vector from one cell to the other and index of
                    // the neighboring cell
                    let (cell_shift, neighbor_cell_i) = divmod_vec(cell_i, n_cells);

                    for atom in &self.cells[neighbor_cell_i] {
                        let shift = CellShift(cell_shift) + center_shift - atom.shift;

                        if atom.index == center && shift.is_zero() {
                            continue;
                        }

                        if self.unit_cell.is_infinite() && !shift.is_zero() {
                            // do not create pairs crossing the periodic
                            // boundaries in an infinite cell
                            continue;
                        }

                        let vector = self.positions[atom.index] - center_position + shift.cartesian(&cell_matrix);
                        let distance2 = vector.norm2();
                        if distance2 < cutoff2 {
                            if distance2 < 1e-3 {
                                warn!(
                                    "atoms {} and {} are very close to one another ({} A)",
                                    center, atom.index, distance2.sqrt()
                                );
                            }

                            neighbors.push(Neighbor {
                                index: atom.index,
                                vector: vector,
                                distance: distance2.sqrt(),
                                cell_shift: shift.0,
                            });
                        }
                    }
                }
            }
        }

        return neighbors;
    }
}

/// Function to compute both quotient and remainder of the division of a by b.
/// This function follows Python convention, making sure the remainder have the
/// same sign as `b`.
fn divmod(a: i32, b: usize) -> (i32, usize) {
    debug_assert!(b < (i32::MAX as usize));
    let b = b as i32;
    let mut quotient = a / b;
    let mut remainder = a % b;
    if remainder < 0 {
        remainder += b;
        quotient -= 1;
    }
    return (quotient, remainder as usize);
}

/// Apply the [`divmod`] function to three components at the time
fn divmod_vec(a: [i32; 3], b: [usize; 3]) -> ([i32; 3], [usize; 3]) {
    let (qx, rx) = divmod(a[0], b[0]);
    let (qy, ry) = divmod(a[1], b[1]);
    let (qz, rz) = divmod(a[2], b[2]);
    return ([qx, qy, qz], [rx, ry, rz]);
}
