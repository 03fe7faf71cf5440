use crate::{Matrix3, Vector3D};
use super::{Structure, SpeciesOrder, UnitCell};

pub fn test_structure(name: &str) -> Structure {
    match name {
        "water" => get_water(),
        "methane" => get_methane(),
        "NiSi" => get_nisi(),
        "SiC" => get_sic(),
        _ => panic!("unknown test structure {}", name)
    }
}

/// Species order containing all the species used in test structures
pub fn test_species() -> SpeciesOrder {
    SpeciesOrder::new(["H", "C", "O", "Si", "Ni"]).expect("valid species")
}

fn get_water() -> Structure {
    let mut structure = Structure::new(UnitCell::infinite());
    structure.add_atom("O", Vector3D::new(0.0, 0.0, 0.0));
    structure.add_atom("H", Vector3D::new(0.0, 0.75545, -0.58895));
    structure.add_atom("H", Vector3D::new(0.0, -0.75545, -0.58895));
    return structure;
}

fn get_methane() -> Structure {
    let mut structure = Structure::new(UnitCell::infinite());
    structure.add_atom("C", Vector3D::new(5.0000, 5.0000, 5.0000));
    structure.add_atom("H", Vector3D::new(5.5288, 5.1610, 5.9359));
    structure.add_atom("H", Vector3D::new(5.2051, 5.8240, 4.3214));
    structure.add_atom("H", Vector3D::new(5.3345, 4.0686, 4.5504));
    structure.add_atom("H", Vector3D::new(3.9315, 4.9463, 5.1921));
    return structure;
}

/// Small distorted periodic structure, with a triclinic cell smaller than the
/// cutoffs used in tests so that atoms see many of their own images
fn get_nisi() -> Structure {
    let cell = Matrix3::new([[3.1, 0.0, 0.0], [0.4, 2.9, 0.0], [0.3, -0.2, 3.3]]);
    let cell = UnitCell::new(cell).expect("valid cell");
    let mut structure = Structure::new(cell);
    structure.add_atom("Ni", Vector3D::new(0.1, 0.2, 0.05));
    structure.add_atom("Si", Vector3D::new(1.6, 1.3, 1.7));
    structure.add_atom("Si", Vector3D::new(2.4, 0.4, 2.6));
    structure.add_atom("Ni", Vector3D::new(0.9, 2.1, 0.8));
    return structure;
}

/// Non-periodic SiC cluster, without any three collinear atoms
fn get_sic() -> Structure {
    let mut structure = Structure::new(UnitCell::infinite());
    structure.add_atom("Si", Vector3D::new(0.0, 0.0, 0.0));
    structure.add_atom("C", Vector3D::new(1.1, 0.9, 0.2));
    structure.add_atom("Si", Vector3D::new(-0.3, 1.5, 1.1));
    structure.add_atom("C", Vector3D::new(1.4, -0.6, 1.3));
    structure.add_atom("Si", Vector3D::new(0.5, 0.7, -1.2));
    return structure;
}
