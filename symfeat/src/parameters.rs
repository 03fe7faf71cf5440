//! Definition and parsing of the symmetry functions used to compute features.
//!
//! Parameter files are line oriented. The first line lists the chemical
//! species, defining the 1-based species ids. Every following line defines one
//! symmetry function (one column of the features) as
//!
//! ```text
//! <type> <species 1> <species 2> <cutoff> <constants...>
//! ```
//!
//! where `type` is one of the codes of [`SymmetryFunctionType`], species are
//! 1-based species ids and the constants depend on the function type.
use std::path::Path;

use ndarray::Array2;
use serde::Serialize;

use crate::Error;
use crate::systems::SpeciesOrder;

/// The different families of symmetry functions, identified by their integer
/// code in parameter files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymmetryFunctionType {
    /// Two-body radial function, with constants `η, Rs`
    Radial,
    /// Three-body angular function, with constants `η, ζ, λ`
    Angular,
    /// Three-body angular function without the contribution of the distance
    /// between neighbors, with constants `η, ζ, λ`
    AngularWide,
    /// Three-body modified angular function, with constants `η, ζ, Rs, θs`
    /// (`θs` in degrees)
    AngularModified,
}

impl SymmetryFunctionType {
    /// Get the type corresponding to an integer `code`, if any
    pub fn from_code(code: i32) -> Option<SymmetryFunctionType> {
        match code {
            2 => Some(SymmetryFunctionType::Radial),
            4 => Some(SymmetryFunctionType::Angular),
            5 => Some(SymmetryFunctionType::AngularWide),
            6 => Some(SymmetryFunctionType::AngularModified),
            _ => None,
        }
    }

    /// Get the integer code of this type
    pub fn code(self) -> i32 {
        match self {
            SymmetryFunctionType::Radial => 2,
            SymmetryFunctionType::Angular => 4,
            SymmetryFunctionType::AngularWide => 5,
            SymmetryFunctionType::AngularModified => 6,
        }
    }

    /// Number of constants (after the cutoff) required by this type
    pub fn n_constants(self) -> usize {
        match self {
            SymmetryFunctionType::Radial => 2,
            SymmetryFunctionType::Angular | SymmetryFunctionType::AngularWide => 3,
            SymmetryFunctionType::AngularModified => 4,
        }
    }

    /// Does this function depend on pairs of neighbors?
    pub fn is_angular(self) -> bool {
        self != SymmetryFunctionType::Radial
    }
}

/// A single symmetry function, defining one column in the features
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymmetryFunction {
    /// Family of this function
    #[serde(rename = "type")]
    pub kind: SymmetryFunctionType,
    /// species id of the (first) neighbor
    pub first: usize,
    /// species id of the second neighbor, for angular functions. Radial
    /// functions ignore this selector.
    pub second: Option<usize>,
    /// spherical cutoff radius
    pub cutoff: f64,
    /// additional constants, in the order they appear in the file
    pub constants: Vec<f64>,
}

/// Parameters encoded in the layout used by descriptor kernels: one row per
/// symmetry function, in the same order as the `ParameterSet`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedParameters {
    /// `P x 3` array containing the type code and the two species selectors
    pub int_fields: Array2<i32>,
    /// `P x F` array containing the cutoff followed by the constants, padded
    /// with zeros
    pub float_fields: Array2<f64>,
}

impl EncodedParameters {
    /// Number of symmetry functions
    pub fn len(&self) -> usize {
        self.int_fields.nrows()
    }

    /// Are there no symmetry functions in these parameters?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered set of symmetry functions, together with the species order they
/// refer to. The order of the functions is the order of the feature columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSet {
    species: SpeciesOrder,
    functions: Vec<SymmetryFunction>,
}

impl Serialize for SpeciesOrder {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl ParameterSet {
    /// Create a parameter set from already validated parts
    ///
    /// # Errors
    ///
    /// This function fails if `functions` is empty, or if a function is
    /// invalid or refers to a species not in `species`.
    pub fn new(species: SpeciesOrder, functions: Vec<SymmetryFunction>) -> Result<ParameterSet, Error> {
        if functions.is_empty() {
            return Err(Error::InvalidArgument("a parameter set needs at least one symmetry function".into()));
        }

        for (i, function) in functions.iter().enumerate() {
            check_function(function, species.len()).map_err(|e| Error::InvalidArgument(
                format!("symmetry function {}: {}", i, e)
            ))?;
        }

        return Ok(ParameterSet {
            species: species,
            functions: functions,
        });
    }

    /// Read the parameter file at the given `path`
    pub fn load(path: impl AsRef<Path>) -> Result<ParameterSet, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let parameters = ParameterSet::parse(&content).map_err(|e| match e {
            Error::Parse(message) => Error::Parse(format!("{}: {}", path.display(), message)),
            e => e,
        })?;

        log::info!(
            "loaded {} symmetry functions for {} species from {}",
            parameters.len(), parameters.species.len(), path.display()
        );

        return Ok(parameters);
    }

    /// Parse the content of a parameter file
    pub fn parse(content: &str) -> Result<ParameterSet, Error> {
        let mut lines = content.lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let species = match lines.next() {
            Some((line_number, line)) => SpeciesOrder::new(line.split_whitespace()).map_err(|e| {
                Error::Parse(format!("line {}: invalid species list: {}", line_number, e))
            })?,
            None => return Err(Error::Parse("parameter file is empty".into())),
        };

        let mut functions = Vec::new();
        for (line_number, line) in lines {
            let function = parse_function(line, species.len()).map_err(|message| {
                Error::Parse(format!("line {}: {}", line_number, message))
            })?;
            functions.push(function);
        }

        if functions.is_empty() {
            return Err(Error::Parse("parameter file does not define any symmetry function".into()));
        }

        return Ok(ParameterSet {
            species: species,
            functions: functions,
        });
    }

    /// Get the species order used by these parameters
    pub fn species(&self) -> &SpeciesOrder {
        &self.species
    }

    /// Get the symmetry functions, in column order
    pub fn functions(&self) -> &[SymmetryFunction] {
        &self.functions
    }

    /// Number of symmetry functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Is this parameter set empty? This can not happen for sets created by
    /// this crate.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Get the largest cutoff of all functions
    pub fn max_cutoff(&self) -> f64 {
        self.functions.iter().map(|f| f.cutoff).fold(0.0, f64::max)
    }

    /// Encode these parameters in the layout expected by descriptor kernels
    pub fn encode(&self) -> EncodedParameters {
        let n_floats = self.functions.iter()
            .map(|f| 1 + f.constants.len())
            .max()
            .unwrap_or(1);

        let mut int_fields = Array2::zeros((self.functions.len(), 3));
        let mut float_fields = Array2::zeros((self.functions.len(), n_floats));
        for (i, function) in self.functions.iter().enumerate() {
            int_fields[[i, 0]] = function.kind.code();
            int_fields[[i, 1]] = function.first as i32;
            int_fields[[i, 2]] = function.second.unwrap_or(0) as i32;

            float_fields[[i, 0]] = function.cutoff;
            for (j, &constant) in function.constants.iter().enumerate() {
                float_fields[[i, j + 1]] = constant;
            }
        }

        return EncodedParameters {
            int_fields: int_fields,
            float_fields: float_fields,
        };
    }
}

fn parse_function(line: &str, n_species: usize) -> Result<SymmetryFunction, String> {
    let fields = line.split_whitespace().collect::<Vec<_>>();
    if fields.len() < 4 {
        return Err(format!(
            "expected at least 4 fields (type, two species and cutoff), got {}", fields.len()
        ));
    }

    let mut integers = [0; 3];
    for (integer, field) in integers.iter_mut().zip(&fields[..3]) {
        *integer = field.parse::<i32>().map_err(|_| format!("'{}' is not an integer", field))?;
    }

    let mut floats = Vec::with_capacity(fields.len() - 3);
    for field in &fields[3..] {
        floats.push(field.parse::<f64>().map_err(|_| format!("'{}' is not a number", field))?);
    }

    let kind = SymmetryFunctionType::from_code(integers[0]).ok_or_else(|| {
        format!("unknown symmetry function type {}", integers[0])
    })?;

    // check the selectors as written, before converting them to usize
    let check_selector = |id: i32| {
        if id < 1 || id as usize > n_species {
            return Err(format!(
                "species selector {} does not refer to one of the {} species", id, n_species
            ));
        }
        Ok(id as usize)
    };

    let first = check_selector(integers[1])?;
    let second = if !kind.is_angular() && integers[2] <= 0 {
        None
    } else {
        Some(check_selector(integers[2])?)
    };

    let function = SymmetryFunction {
        kind: kind,
        first: first,
        second: second,
        cutoff: floats[0],
        constants: floats[1..].to_vec(),
    };

    check_function(&function, n_species)?;

    return Ok(function);
}

fn check_function(function: &SymmetryFunction, n_species: usize) -> Result<(), String> {
    let kind = function.kind;
    if function.constants.len() < kind.n_constants() {
        return Err(format!(
            "type {} requires a cutoff and {} constants, got {} constants",
            kind.code(), kind.n_constants(), function.constants.len()
        ));
    }

    if !(function.cutoff > 0.0 && function.cutoff.is_finite()) {
        return Err(format!("cutoff must be positive and finite, got {}", function.cutoff));
    }

    let valid_species = |id: usize| id >= 1 && id <= n_species;
    if !valid_species(function.first) {
        return Err(format!(
            "species selector {} does not refer to one of the {} species", function.first, n_species
        ));
    }

    match function.second {
        Some(second) if !valid_species(second) => {
            return Err(format!(
                "species selector {} does not refer to one of the {} species", second, n_species
            ));
        }
        None if kind.is_angular() => {
            return Err(format!("type {} requires two species selectors", kind.code()));
        }
        _ => {}
    }

    return Ok(());
}
