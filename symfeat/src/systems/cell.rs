//! The `UnitCell` type represents the periodic lattice of a structure, or the
//! absence of one.
use crate::{Error, Matrix3, Vector3D};

/// The shape of a cell determine how we will be able to compute the periodic
/// boundaries condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellShape {
    /// Infinite unit cell, with no boundaries
    Infinite,
    /// Orthorhombic unit cell, with cuboid shape
    Orthorhombic,
    /// Triclinic unit cell, with arbitrary parallelepiped shape
    Triclinic,
}

/// An `UnitCell` defines the system physical boundaries.
///
/// The cell vectors are the rows of the lattice matrix. An all-zero lattice
/// is used for structures without periodic boundary conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCell {
    /// Unit cell matrix, with one cell vector per row
    matrix: Matrix3,
    /// Transpose of the unit cell matrix, cached from matrix
    transpose: Matrix3,
    /// Inverse of the transpose of the unit cell matrix, cached from matrix
    inverse: Matrix3,
    /// Unit cell shape
    shape: CellShape,
}

impl UnitCell {
    /// Create a unit cell from a lattice matrix containing the cell vectors
    /// as rows. A matrix full of zeros creates an infinite cell.
    ///
    /// # Errors
    ///
    /// This function fails if the lattice contains non-finite values or is
    /// not invertible.
    pub fn new(matrix: Matrix3) -> Result<UnitCell, Error> {
        let is_close_0 = |value: f64| f64::abs(value) < 1e-6;

        let mut all_zero = true;
        for i in 0..3 {
            for j in 0..3 {
                if !matrix[i][j].is_finite() {
                    return Err(Error::InvalidArgument(format!(
                        "lattice contains a non-finite value: {:?}", matrix
                    )));
                }
                all_zero &= matrix[i][j] == 0.0;
            }
        }

        if all_zero {
            return Ok(UnitCell::infinite());
        }

        if is_close_0(matrix.determinant()) {
            return Err(Error::InvalidArgument(format!(
                "lattice is not invertible: {:?}", matrix
            )));
        }

        let is_diagonal = is_close_0(matrix[0][1]) && is_close_0(matrix[0][2]) &&
                          is_close_0(matrix[1][0]) && is_close_0(matrix[1][2]) &&
                          is_close_0(matrix[2][0]) && is_close_0(matrix[2][1]);

        let shape = if is_diagonal {
            CellShape::Orthorhombic
        } else {
            CellShape::Triclinic
        };

        return Ok(UnitCell {
            matrix: matrix,
            transpose: matrix.transposed(),
            inverse: matrix.transposed().inverse(),
            shape: shape,
        });
    }

    /// Create an infinite unit cell
    pub fn infinite() -> UnitCell {
        UnitCell {
            matrix: Matrix3::zero(),
            transpose: Matrix3::zero(),
            inverse: Matrix3::zero(),
            shape: CellShape::Infinite,
        }
    }

    /// Create an orthorhombic unit cell, with side lengths `a, b, c`.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> UnitCell {
        assert!(a > 0.0 && b > 0.0 && c > 0.0, "Cell lengths must be positive");
        let matrix = Matrix3::new([
            [a, 0.0, 0.0],
            [0.0, b, 0.0],
            [0.0, 0.0, c]
        ]);
        UnitCell {
            matrix: matrix,
            transpose: matrix,
            inverse: matrix.inverse(),
            shape: CellShape::Orthorhombic,
        }
    }

    /// Create a cubic unit cell, with side lengths `length, length, length`.
    pub fn cubic(length: f64) -> UnitCell {
        UnitCell::orthorhombic(length, length, length)
    }

    /// Get the cell shape
    pub fn shape(&self) -> CellShape {
        self.shape
    }

    /// Check if this unit cell is infinite, *i.e.* if it does not have
    /// periodic boundary conditions.
    pub fn is_infinite(&self) -> bool {
        self.shape() == CellShape::Infinite
    }

    /// Get the matricial representation of the unit cell
    pub fn matrix(&self) -> Matrix3 {
        self.matrix
    }

    /// Get the distances between faces of the unit cell
    pub fn distances_between_faces(&self) -> Vector3D {
        if self.shape == CellShape::Infinite {
            return Vector3D::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        }

        let a: Vector3D = self.matrix[0].into();
        let b: Vector3D = self.matrix[1].into();
        let c: Vector3D = self.matrix[2].into();

        // Plans normal vectors
        let na = (b ^ c).normalized();
        let nb = (c ^ a).normalized();
        let nc = (a ^ b).normalized();

        Vector3D::new(f64::abs(na * a), f64::abs(nb * b), f64::abs(nc * c))
    }

    /// Get the fractional representation of the `vector` in this cell
    pub fn fractional(&self, vector: Vector3D) -> Vector3D {
        // this needs to use the inverse of the transpose of the matrix, since
        // we only have code to multiply a vector by a matrix on the left
        return self.inverse * vector;
    }

    /// Get the Cartesian representation of the `fractional` vector in this
    /// cell
    pub fn cartesian(&self, fractional: Vector3D) -> Vector3D {
        return self.transpose * fractional;
    }
}
