use std::f64::consts::PI;

use ndarray::{ArrayView1, ArrayViewMut1, ArrayViewMut2};

use crate::{Error, Vector3D};
use crate::parameters::{EncodedParameters, SymmetryFunctionType};
use crate::systems::{CellList, KernelInput, Neighbor, UnitCell};
use crate::systems::{array_to_matrix, row_to_vector};

use super::{AbortSignal, DescriptorKernel, check_kernel_buffers};

/// Atoms closer than this are considered to be on top of each other
const MIN_DISTANCE: f64 = 1e-8;

/// Below this value of sin(θ), the derivative of sin(θ) w.r.t. cos(θ) is
/// taken to be zero
const MIN_SIN_THETA: f64 = 1e-6;

/// Native implementation of Behler-Parrinello style symmetry functions (types
/// 2, 4 and 5) and of the modified angular functions used by ANI (type 6),
/// with a cosine cutoff function.
///
/// Neighbors are searched with a cell list using the largest cutoff of all
/// functions, accounting for all periodic images. Derivatives with respect to
/// the position of a periodic image are accumulated on the corresponding atom.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetryFunctionKernel;

/// Shape parameters of a single symmetry function
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Radial { eta: f64, rs: f64 },
    Angular { eta: f64, zeta: f64, lambda: f64 },
    AngularWide { eta: f64, zeta: f64, lambda: f64 },
    AngularModified { eta: f64, zeta: f64, rs: f64, theta_s: f64 },
}

/// A symmetry function, decoded from the parallel integer/float fields
#[derive(Debug, Clone, Copy, PartialEq)]
struct Function {
    shape: Shape,
    species: [i32; 2],
    cutoff: f64,
}

impl Function {
    /// Does the pair of neighbors with species `a` and `b` contribute to this
    /// (angular) function?
    fn matches_pair(&self, a: i32, b: i32) -> bool {
        (a == self.species[0] && b == self.species[1]) ||
        (a == self.species[1] && b == self.species[0])
    }
}

fn decode(parameters: &EncodedParameters) -> Result<Vec<Function>, Error> {
    let mut functions = Vec::with_capacity(parameters.len());
    let rows = parameters.int_fields.outer_iter().zip(parameters.float_fields.outer_iter());
    for (p, (ints, floats)) in rows.enumerate() {
        let kind = SymmetryFunctionType::from_code(ints[0]).ok_or_else(|| Error::Kernel(format!(
            "unknown type {} for symmetry function {}", ints[0], p
        )))?;

        if floats.len() < 1 + kind.n_constants() {
            return Err(Error::Kernel(format!(
                "symmetry function {} of type {} needs {} float fields, only {} are available",
                p, kind.code(), 1 + kind.n_constants(), floats.len()
            )));
        }

        let cutoff = floats[0];
        if !(cutoff > 0.0 && cutoff.is_finite()) {
            return Err(Error::Kernel(format!(
                "invalid cutoff {} for symmetry function {}", cutoff, p
            )));
        }

        let shape = match kind {
            SymmetryFunctionType::Radial => Shape::Radial {
                eta: floats[1],
                rs: floats[2],
            },
            SymmetryFunctionType::Angular => Shape::Angular {
                eta: floats[1],
                zeta: floats[2],
                lambda: floats[3],
            },
            SymmetryFunctionType::AngularWide => Shape::AngularWide {
                eta: floats[1],
                zeta: floats[2],
                lambda: floats[3],
            },
            SymmetryFunctionType::AngularModified => Shape::AngularModified {
                eta: floats[1],
                zeta: floats[2],
                rs: floats[3],
                theta_s: floats[4].to_radians(),
            },
        };

        functions.push(Function {
            shape: shape,
            species: [ints[1], ints[2]],
            cutoff: cutoff,
        });
    }

    return Ok(functions);
}

/// Cosine cutoff function `fc(r) = 1/2 (1 + cos(π r / rc))` and its
/// derivative
fn cutoff_function(r: f64, cutoff: f64) -> (f64, f64) {
    if r >= cutoff {
        return (0.0, 0.0);
    }

    let s = PI * r / cutoff;
    return (0.5 * (1.0 + f64::cos(s)), -0.5 * PI * f64::sin(s) / cutoff);
}

/// `base^exponent`, using integer powers when possible
fn power(base: f64, exponent: f64) -> f64 {
    if exponent.fract() == 0.0 && exponent.abs() < i32::MAX as f64 {
        base.powi(exponent as i32)
    } else {
        base.powf(exponent)
    }
}

/// `base^ζ` and its derivative w.r.t. `base`. Negative bases only come from
/// rounding errors around collinear triplets, and are treated as zero.
fn angular_power(base: f64, zeta: f64) -> (f64, f64) {
    if base <= 0.0 {
        let value = if zeta == 0.0 { 1.0 } else { 0.0 };
        let derivative = if zeta == 1.0 { 1.0 } else { 0.0 };
        return (value, derivative);
    }

    return (power(base, zeta), zeta * power(base, zeta - 1.0));
}

/// Geometry of a center atom `i` together with two of its neighbors `j` and
/// `k`
struct Triplet {
    r_ij: f64,
    r_ik: f64,
    r_jk: f64,
    /// unit vector from i to j
    u_ij: Vector3D,
    /// unit vector from i to k
    u_ik: Vector3D,
    /// unit vector from j to k
    u_jk: Vector3D,
    cos_theta: f64,
    /// derivatives of cos(θ) w.r.t. `r_ij`, `r_ik` and `r_jk`
    dcos: [f64; 3],
}

impl Triplet {
    fn new(j: &Neighbor, k: &Neighbor) -> Result<Triplet, Error> {
        let jk = k.vector - j.vector;
        let r_jk = jk.norm();
        if r_jk < MIN_DISTANCE {
            return Err(Error::Kernel(format!(
                "atoms {} and {} are on top of each other", j.index, k.index
            )));
        }

        let (r_ij, r_ik) = (j.distance, k.distance);
        let cos_theta = (j.vector * k.vector) / (r_ij * r_ik);

        return Ok(Triplet {
            r_ij: r_ij,
            r_ik: r_ik,
            r_jk: r_jk,
            u_ij: j.vector / r_ij,
            u_ik: k.vector / r_ik,
            u_jk: jk / r_jk,
            cos_theta: cos_theta,
            dcos: [
                1.0 / r_ik - cos_theta / r_ij,
                1.0 / r_ij - cos_theta / r_ik,
                -r_jk / (r_ij * r_ik),
            ],
        });
    }

    /// Convert derivatives w.r.t. the three distances to gradients w.r.t.
    /// the positions of `j` and `k`. The gradient w.r.t. `i` is minus the
    /// sum of both.
    fn gradients(&self, d: [f64; 3]) -> (Vector3D, Vector3D) {
        let grad_j = d[0] * self.u_ij - d[2] * self.u_jk;
        let grad_k = d[1] * self.u_ik + d[2] * self.u_jk;
        return (grad_j, grad_k);
    }
}

/// Radial function G2 and its derivative w.r.t. `r`
fn radial(r: f64, cutoff: f64, eta: f64, rs: f64) -> (f64, f64) {
    let (fc, dfc) = cutoff_function(r, cutoff);
    let shifted = r - rs;
    let exponential = f64::exp(-eta * shifted * shifted);
    return (exponential * fc, exponential * (dfc - 2.0 * eta * shifted * fc));
}

/// Angular functions G4 (`with_jk = true`) and G5 (`with_jk = false`), and
/// their derivatives w.r.t. the three distances in the triplet
fn angular(triplet: &Triplet, cutoff: f64, eta: f64, zeta: f64, lambda: f64, with_jk: bool) -> (f64, [f64; 3]) {
    let t = triplet;
    let (f_ij, df_ij) = cutoff_function(t.r_ij, cutoff);
    let (f_ik, df_ik) = cutoff_function(t.r_ik, cutoff);
    let (f_jk, df_jk, eta_jk) = if with_jk {
        let (f_jk, df_jk) = cutoff_function(t.r_jk, cutoff);
        (f_jk, df_jk, eta)
    } else {
        (1.0, 0.0, 0.0)
    };

    let (base_zeta, dbase) = angular_power(1.0 + lambda * t.cos_theta, zeta);
    // derivative of base^ζ w.r.t. cos(θ)
    let dbase_zeta = lambda * dbase;

    let exponential = f64::exp(-eta * (t.r_ij * t.r_ij + t.r_ik * t.r_ik) - eta_jk * t.r_jk * t.r_jk);
    let common = power(2.0, 1.0 - zeta) * exponential;

    let value = common * base_zeta * f_ij * f_ik * f_jk;
    let d_ij = common * f_ik * f_jk * (dbase_zeta * t.dcos[0] * f_ij + base_zeta * (df_ij - 2.0 * eta * t.r_ij * f_ij));
    let d_ik = common * f_ij * f_jk * (dbase_zeta * t.dcos[1] * f_ik + base_zeta * (df_ik - 2.0 * eta * t.r_ik * f_ik));
    let d_jk = common * f_ij * f_ik * (dbase_zeta * t.dcos[2] * f_jk + base_zeta * (df_jk - 2.0 * eta_jk * t.r_jk * f_jk));

    return (value, [d_ij, d_ik, d_jk]);
}

/// Modified angular function G6, and its derivatives w.r.t. the three
/// distances in the triplet
fn angular_modified(triplet: &Triplet, cutoff: f64, eta: f64, zeta: f64, rs: f64, theta_s: f64) -> (f64, [f64; 3]) {
    let t = triplet;
    let (f_ij, df_ij) = cutoff_function(t.r_ij, cutoff);
    let (f_ik, df_ik) = cutoff_function(t.r_ik, cutoff);

    let sin_theta = f64::sqrt(f64::max(0.0, 1.0 - t.cos_theta * t.cos_theta));
    let dsin_theta = if sin_theta > MIN_SIN_THETA {
        -t.cos_theta / sin_theta
    } else {
        0.0
    };

    // 1 + cos(θ - θs)
    let base = 1.0 + t.cos_theta * f64::cos(theta_s) + sin_theta * f64::sin(theta_s);
    let (base_zeta, dbase) = angular_power(base, zeta);
    let dbase_zeta = dbase * (f64::cos(theta_s) + f64::sin(theta_s) * dsin_theta);

    let shifted = 0.5 * (t.r_ij + t.r_ik) - rs;
    let exponential = f64::exp(-eta * shifted * shifted);
    let common = power(2.0, 1.0 - zeta) * exponential;

    let value = common * base_zeta * f_ij * f_ik;
    let d_ij = common * f_ik * (dbase_zeta * t.dcos[0] * f_ij + base_zeta * (df_ij - eta * shifted * f_ij));
    let d_ik = common * f_ij * (dbase_zeta * t.dcos[1] * f_ik + base_zeta * (df_ik - eta * shifted * f_ik));
    let d_jk = common * f_ij * f_ik * dbase_zeta * t.dcos[2];

    return (value, [d_ij, d_ik, d_jk]);
}

/// Neighborhood of a single center atom, and the row of the output buffers
/// for this center.
struct Environment<'a> {
    center: usize,
    neighbors: &'a [Neighbor],
    species: ArrayView1<'a, i32>,
    n_atoms: usize,
}

impl<'a> Environment<'a> {
    /// Add `gradient` to the derivative of function `p` w.r.t. the position
    /// of `atom`
    fn add_gradient(&self, derivatives: &mut ArrayViewMut1<'_, f64>, p: usize, atom: usize, gradient: Vector3D) {
        let start = (p * self.n_atoms + atom) * 3;
        derivatives[start] += gradient[0];
        derivatives[start + 1] += gradient[1];
        derivatives[start + 2] += gradient[2];
    }

    fn radial(&self, p: usize, function: &Function, eta: f64, rs: f64, derivatives: &mut ArrayViewMut1<'_, f64>) -> f64 {
        let mut value = 0.0;
        for neighbor in self.neighbors {
            if self.species[neighbor.index] != function.species[0] || neighbor.distance >= function.cutoff {
                continue;
            }

            let (g, dg) = radial(neighbor.distance, function.cutoff, eta, rs);
            value += g;

            let gradient = dg / neighbor.distance * neighbor.vector;
            self.add_gradient(derivatives, p, neighbor.index, gradient);
            self.add_gradient(derivatives, p, self.center, -gradient);
        }
        return value;
    }

    fn angular(&self, p: usize, function: &Function, derivatives: &mut ArrayViewMut1<'_, f64>) -> Result<f64, Error> {
        let cutoff = function.cutoff;

        let mut value = 0.0;
        for (a, j) in self.neighbors.iter().enumerate() {
            if j.distance >= cutoff {
                continue;
            }

            for k in &self.neighbors[(a + 1)..] {
                if k.distance >= cutoff || !function.matches_pair(self.species[j.index], self.species[k.index]) {
                    continue;
                }

                let triplet = Triplet::new(j, k)?;
                let (g, d) = match function.shape {
                    Shape::Angular { eta, zeta, lambda } => {
                        if triplet.r_jk >= cutoff {
                            continue;
                        }
                        angular(&triplet, cutoff, eta, zeta, lambda, true)
                    }
                    Shape::AngularWide { eta, zeta, lambda } => {
                        angular(&triplet, cutoff, eta, zeta, lambda, false)
                    }
                    Shape::AngularModified { eta, zeta, rs, theta_s } => {
                        angular_modified(&triplet, cutoff, eta, zeta, rs, theta_s)
                    }
                    Shape::Radial { .. } => unreachable!("radial functions have no triplets"),
                };

                value += g;

                let (grad_j, grad_k) = triplet.gradients(d);
                self.add_gradient(derivatives, p, j.index, grad_j);
                self.add_gradient(derivatives, p, k.index, grad_k);
                self.add_gradient(derivatives, p, self.center, -(grad_j + grad_k));
            }
        }

        return Ok(value);
    }
}

#[time_graph::instrument(name = "SymmetryFunctionKernel::neighbors")]
fn build_cell_list(input: &KernelInput<'_>, cutoff: f64) -> Result<CellList, Error> {
    let cell = UnitCell::new(array_to_matrix(&input.lattice))?;
    let mut cell_list = CellList::new(cell, cutoff);
    for atom in 0..input.size() {
        cell_list.add_atom(
            row_to_vector(&input.cartesian, atom),
            row_to_vector(&input.fractional, atom),
        );
    }
    return Ok(cell_list);
}

impl DescriptorKernel for SymmetryFunctionKernel {
    fn name(&self) -> String {
        "symmetry functions".into()
    }

    #[time_graph::instrument(name = "SymmetryFunctionKernel::compute")]
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
        let functions = decode(parameters)?;

        values.fill(0.0);
        derivatives.fill(0.0);

        if atoms.is_empty() || functions.is_empty() {
            return Ok(());
        }

        let max_cutoff = functions.iter().map(|f| f.cutoff).fold(0.0, f64::max);
        let cell_list = build_cell_list(input, max_cutoff)?;

        for (row, &center) in atoms.iter().enumerate() {
            if abort.is_raised() {
                return Err(Error::Cancelled);
            }

            let neighbors = cell_list.neighbors(center);
            if let Some(neighbor) = neighbors.iter().find(|n| n.distance < MIN_DISTANCE) {
                return Err(Error::Kernel(format!(
                    "atoms {} and {} are on top of each other", center, neighbor.index
                )));
            }

            let environment = Environment {
                center: center,
                neighbors: &neighbors,
                species: input.species.view(),
                n_atoms: input.size(),
            };

            let mut derivatives = derivatives.row_mut(row);
            for (p, function) in functions.iter().enumerate() {
                let value = match function.shape {
                    Shape::Radial { eta, rs } => environment.radial(p, function, eta, rs, &mut derivatives),
                    _ => environment.angular(p, function, &mut derivatives)?,
                };
                values[[row, p]] = value;
            }

            let all_finite = values.row(row).iter().chain(derivatives.iter()).all(|v| v.is_finite());
            if !all_finite {
                return Err(Error::Kernel(format!(
                    "non-finite symmetry functions for atom {}", center
                )));
            }
        }

        return Ok(());
    }
}
