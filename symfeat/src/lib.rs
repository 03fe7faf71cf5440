#![warn(clippy::all, clippy::pedantic)]

// disable some style lints
#![allow(clippy::needless_return, clippy::must_use_candidate, clippy::comparison_chain)]
#![allow(clippy::redundant_field_names, clippy::redundant_closure_for_method_calls)]
#![allow(clippy::unreadable_literal, clippy::option_if_let_else, clippy::range_plus_one)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::module_name_repetitions)]
#![allow(clippy::many_single_char_names, clippy::similar_names)]

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap, clippy::cast_lossless, clippy::cast_sign_loss)]
#![allow(clippy::default_trait_access)]

// Tests lints
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod types;
pub use types::*;

mod errors;
pub use self::errors::Error;

pub mod systems;
pub use systems::{Structure, StructureView, SpeciesOrder, UnitCell, read_structures};

pub mod parameters;
pub use parameters::{ParameterSet, SymmetryFunction, SymmetryFunctionType, EncodedParameters};

pub mod kernel;
pub use kernel::{DescriptorKernel, AbortSignal, SymmetryFunctionKernel, ForeignKernel};

pub mod partition;
pub use partition::{AtomSubset, partition};

pub mod aggregator;
pub use aggregator::{Aggregator, PartialResult, FeatureTensor, WorkerMessage};

pub mod pipeline;
pub use pipeline::{FeaturePipeline, PipelineOptions};

pub mod validation;
pub use validation::{FeatureCheck, ReferenceData};
