use std::path::Path;

use super::Structure;
use crate::Error;

#[cfg(feature = "chemfiles")]
impl From<chemfiles::Error> for Error {
    fn from(error: chemfiles::Error) -> Error {
        Error::Chemfiles(error.message)
    }
}

/// Read all structures in the file at the given `path` using
/// [chemfiles](https://chemfiles.org/), and convert them to `Structure`s.
///
/// Atoms are identified by their chemical type (the symbol in XYZ files),
/// which must then be part of the `SpeciesOrder` used to compute features.
#[cfg(feature = "chemfiles")]
#[allow(clippy::needless_range_loop)]
pub fn read_structures(path: impl AsRef<Path>) -> Result<Vec<Structure>, Error> {
    use crate::{Matrix3, Vector3D};
    use crate::systems::UnitCell;

    let path = path.as_ref();
    let mut structures = Vec::new();

    let mut trajectory = chemfiles::Trajectory::open(path, 'r')?;
    let mut frame = chemfiles::Frame::new();

    for step in 0..trajectory.nsteps() {
        trajectory.read(&mut frame)?;

        let cell = if frame.cell().shape() == chemfiles::CellShape::Infinite {
            UnitCell::infinite()
        } else {
            // chemfiles is using columns for the cell vectors and we want rows
            UnitCell::new(Matrix3::from(frame.cell().matrix()).transposed())?
        };

        let mut structure = Structure::new(cell);
        let positions = frame.positions();
        for i in 0..frame.size() {
            let atom = frame.atom(i);
            structure.add_atom(atom.atomic_type(), Vector3D::from(positions[i]));
        }

        log::debug!("read structure {} with {} atoms from {}", step, structure.size(), path.display());
        structures.push(structure);
    }

    return Ok(structures);
}

/// Read all structures in the file at the given `path` using
/// [chemfiles](https://chemfiles.org/), and convert them to `Structure`s.
#[cfg(not(feature = "chemfiles"))]
pub fn read_structures(_: impl AsRef<Path>) -> Result<Vec<Structure>, Error> {
    Err(Error::Chemfiles(
        "read_structures is only available with the chemfiles feature enabled".into()
    ))
}
