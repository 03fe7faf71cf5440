use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array2, Array4, ArrayView, Axis, Dimension};

use crate::Error;
use crate::aggregator::FeatureTensor;
use crate::systems::{SpeciesOrder, StructureView};

/// A check executed by the collector on freshly assembled features, before
/// they are returned to the caller.
pub trait FeatureCheck: Send + Sync {
    /// Get the name of this check, used in logs
    fn name(&self) -> String;

    /// Check the `features` computed for the structure `view`, where species
    /// ids refer to `species`.
    fn check(&self, view: &StructureView, species: &SpeciesOrder, features: &FeatureTensor) -> Result<(), Error>;
}

fn default_tolerance() -> f64 {
    1e-10
}

/// Precomputed features for a single structure, grouped by the species of the
/// central atom.
///
/// For each species, `values` has shape `n_species_atoms x P` and
/// `derivatives` has shape `n_species_atoms x P x N x 3`, with atoms in the
/// order they appear in the structure. The comparison uses all rows and all
/// columns.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceData {
    /// reference values, per central species
    #[serde(default)]
    pub values: BTreeMap<String, Array2<f64>>,
    /// reference derivatives, per central species
    #[serde(default)]
    pub derivatives: BTreeMap<String, Array4<f64>>,
    /// maximal absolute difference allowed between computed and reference
    /// features
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl ReferenceData {
    /// Read reference data from the JSON string `json`
    pub fn from_json(json: &str) -> Result<ReferenceData, Error> {
        let reference: ReferenceData = serde_json::from_str(json)?;
        if !(reference.tolerance >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "reference tolerance can not be negative, got {}", reference.tolerance
            )));
        }
        return Ok(reference);
    }

    /// Read reference data from the JSON file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<ReferenceData, Error> {
        let content = std::fs::read_to_string(path)?;
        return ReferenceData::from_json(&content);
    }

    /// Create reference data from already computed `features`, for all the
    /// species present in the structure.
    pub fn from_features(view: &StructureView, species: &SpeciesOrder, features: &FeatureTensor, tolerance: f64) -> ReferenceData {
        let mut values = BTreeMap::new();
        let mut derivatives = BTreeMap::new();

        for (index, symbol) in species.iter().enumerate() {
            let rows = rows_for_species(view, index as i32 + 1);
            if rows.is_empty() {
                continue;
            }

            values.insert(symbol.to_owned(), features.values.select(Axis(0), &rows));
            derivatives.insert(symbol.to_owned(), features.derivatives.select(Axis(0), &rows));
        }

        return ReferenceData {
            values: values,
            derivatives: derivatives,
            tolerance: tolerance,
        };
    }
}

fn rows_for_species(view: &StructureView, id: i32) -> Vec<usize> {
    view.species().iter()
        .enumerate()
        .filter(|(_, &species)| species == id)
        .map(|(atom, _)| atom)
        .collect()
}

fn compare<D: Dimension>(
    what: &str,
    symbol: &str,
    computed: ArrayView<'_, f64, D>,
    reference: ArrayView<'_, f64, D>,
    tolerance: f64,
) -> Result<(), Error> {
    if computed.shape() != reference.shape() {
        return Err(Error::ShapeMismatch(format!(
            "reference {} for '{}' have shape {:?}, but the computed ones have shape {:?}",
            what, symbol, reference.shape(), computed.shape()
        )));
    }

    let mut failed = false;
    let mut max_deviation = 0.0;
    for (a, b) in computed.iter().zip(reference.iter()) {
        let deviation = f64::abs(a - b);
        if !(deviation <= tolerance) {
            failed = true;
        }
        if deviation > max_deviation {
            max_deviation = deviation;
        }
    }

    if failed {
        return Err(Error::Validation(format!(
            "{} for '{}' differ from the reference by up to {:e} (tolerance is {:e})",
            what, symbol, max_deviation, tolerance
        )));
    }

    return Ok(());
}

impl FeatureCheck for ReferenceData {
    fn name(&self) -> String {
        "reference data".into()
    }

    #[time_graph::instrument(name = "ReferenceData::check")]
    fn check(&self, view: &StructureView, species: &SpeciesOrder, features: &FeatureTensor) -> Result<(), Error> {
        let get_rows = |symbol: &str| {
            let id = species.id(symbol).ok_or_else(|| Error::UnknownSpecies(format!(
                "reference data contains species '{}', which is not one of the configured species", symbol
            )))?;
            Ok::<_, Error>(rows_for_species(view, id))
        };

        for (symbol, reference) in &self.values {
            let rows = get_rows(symbol)?;
            let computed = features.values.select(Axis(0), &rows);
            compare("values", symbol, computed.view(), reference.view(), self.tolerance)?;
        }

        for (symbol, reference) in &self.derivatives {
            let rows = get_rows(symbol)?;
            let computed = features.derivatives.select(Axis(0), &rows);
            compare("derivatives", symbol, computed.view(), reference.view(), self.tolerance)?;
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array4};

    use crate::systems::StructureView;
    use crate::systems::test_utils::{test_structure, test_species};

    use super::*;

    /// Fake features for the water molecule, each entry being different
    fn water_features() -> (StructureView, FeatureTensor) {
        let view = StructureView::new(&test_structure("water"), &test_species()).unwrap();
        let values = Array2::from_shape_fn((3, 2), |(i, p)| (10 * i + p) as f64);
        let derivatives = Array4::from_shape_fn((3, 2, 3, 3), |(i, p, j, c)| (1000 * i + 100 * p + 10 * j + c) as f64);
        return (view, FeatureTensor { values: values, derivatives: derivatives });
    }

    #[test]
    fn from_features() {
        let (view, features) = water_features();
        let species = test_species();
        let reference = ReferenceData::from_features(&view, &species, &features, 1e-8);

        assert_eq!(reference.values.keys().collect::<Vec<_>>(), ["H", "O"]);
        assert_eq!(reference.values["H"].shape(), [2, 2]);
        assert_eq!(reference.values["H"][[1, 1]], 21.0);
        assert_eq!(reference.derivatives["O"].shape(), [1, 2, 3, 3]);
        assert_eq!(reference.derivatives["O"][[0, 1, 2, 0]], 120.0);

        reference.check(&view, &species, &features).unwrap();
    }

    #[test]
    fn json() {
        let (view, features) = water_features();
        let species = test_species();
        let reference = ReferenceData::from_features(&view, &species, &features, 1e-8);

        let json = serde_json::to_string(&reference).unwrap();
        let parsed = ReferenceData::from_json(&json).unwrap();
        assert_eq!(parsed, reference);

        let error = ReferenceData::from_json(r#"{"values": {}, "tolerance": -1.0}"#).unwrap_err();
        assert!(matches!(error, Error::InvalidArgument(_)));

        let error = ReferenceData::from_json(r#"{"values": {}, "other": 3}"#).unwrap_err();
        assert!(matches!(error, Error::Json(_)));

        let empty = ReferenceData::from_json("{}").unwrap();
        assert_eq!(empty.tolerance, 1e-10);
        empty.check(&view, &species, &features).unwrap();
    }

    #[test]
    fn mismatch() {
        let (view, features) = water_features();
        let species = test_species();
        let reference = ReferenceData::from_features(&view, &species, &features, 1e-8);

        // the last atom is checked as well
        let mut modified = reference.clone();
        modified.derivatives.get_mut("H").unwrap()[[1, 1, 2, 2]] += 1e-6;
        match modified.check(&view, &species, &features) {
            Err(Error::Validation(message)) => {
                assert!(message.contains("derivatives for 'H'"));
            }
            other => panic!("expected a validation error, got {:?}", other),
        }

        let mut modified = reference.clone();
        modified.values.get_mut("O").unwrap()[[0, 0]] = f64::NAN;
        assert!(matches!(modified.check(&view, &species, &features), Err(Error::Validation(_))));

        let mut modified = reference.clone();
        modified.values.insert("H".into(), Array2::zeros((1, 2)));
        assert!(matches!(modified.check(&view, &species, &features), Err(Error::ShapeMismatch(_))));

        let mut modified = reference;
        modified.values.insert("Xe".into(), Array2::zeros((1, 2)));
        assert!(matches!(modified.check(&view, &species, &features), Err(Error::UnknownSpecies(_))));
    }
}
