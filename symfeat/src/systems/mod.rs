mod cell;
pub use self::cell::{UnitCell, CellShape};

mod neighbors;
pub use self::neighbors::{CellList, CellShift, Neighbor};

mod structure;
pub use self::structure::{Structure, StructureView, SpeciesOrder, KernelInput};
pub(crate) use self::structure::{row_to_vector, array_to_matrix};

mod chemfiles;
pub use self::chemfiles::read_structures;

#[cfg(test)]
pub(crate) mod test_utils;
