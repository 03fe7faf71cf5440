#![allow(dead_code)]

use symfeat::{ParameterSet, Structure, UnitCell, Matrix3, Vector3D};

pub fn load_parameters(path: &str) -> ParameterSet {
    ParameterSet::load(format!("tests/data/{}", path)).expect("failed to load parameters")
}

/// Zinc-blende SiC supercell with `n_cells^3` conventional cells, where atoms
/// are displaced by a small deterministic amount from their ideal positions
pub fn silicon_carbide(n_cells: usize) -> Structure {
    let a = 4.36;
    let size = a * n_cells as f64;
    let cell = UnitCell::new(Matrix3::new([[size, 0.0, 0.0], [0.0, size, 0.0], [0.0, 0.0, size]]))
        .expect("invalid cell");

    let fcc = [[0.0, 0.0, 0.0], [0.0, 0.5, 0.5], [0.5, 0.0, 0.5], [0.5, 0.5, 0.0]];

    let mut structure = Structure::new(cell);
    let mut atom = 0;
    for i in 0..n_cells {
        for j in 0..n_cells {
            for k in 0..n_cells {
                let origin = Vector3D::new(i as f64, j as f64, k as f64);
                for site in &fcc {
                    for (symbol, shift) in [("Si", 0.0), ("C", 0.25)] {
                        let position = (origin + Vector3D::new(site[0] + shift, site[1] + shift, site[2] + shift)) * a;
                        structure.add_atom(symbol, position + displacement(atom));
                        atom += 1;
                    }
                }
            }
        }
    }

    return structure;
}

fn displacement(atom: usize) -> Vector3D {
    let x = atom as f64;
    return Vector3D::new(
        0.07 * f64::sin(1.3 * x),
        0.05 * f64::cos(2.1 * x + 0.4),
        0.06 * f64::sin(0.7 * x + 1.1),
    );
}

/// Small non-periodic structure with three atoms of three different species
pub fn triatomic() -> Structure {
    let mut structure = Structure::new(UnitCell::infinite());
    structure.add_atom("O", Vector3D::new(0.0, 0.0, 0.0));
    structure.add_atom("C", Vector3D::new(1.2, 0.1, 0.0));
    structure.add_atom("H", Vector3D::new(-0.4, 0.9, 0.3));
    return structure;
}
