use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::Error;
use crate::aggregator::{Aggregator, FeatureTensor, PartialResult, WorkerMessage};
use crate::kernel::{AbortSignal, DescriptorKernel, SymmetryFunctionKernel};
use crate::parameters::{EncodedParameters, ParameterSet};
use crate::partition::{partition, AtomSubset};
use crate::systems::{KernelInput, Structure, StructureView};
use crate::validation::FeatureCheck;

fn default_workers() -> usize {
    1
}

/// Options controlling how features are computed
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineOptions {
    /// Number of parallel workers used for every structure
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Role of the worker assembling the final features, between 0 and
    /// `workers - 1`
    #[serde(default)]
    pub collector: usize,
    /// Maximal time allowed to compute a single structure, in seconds. There
    /// is no limit if this is not set. Workers are asked to stop when the
    /// time is up, and the computation returns once all of them stopped: a
    /// kernel that can not be interrupted delays the error until it is done.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// When computing multiple structures, should we log errors and continue
    /// with the next structure instead of stopping?
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for PipelineOptions {
    fn default() -> PipelineOptions {
        PipelineOptions {
            workers: default_workers(),
            collector: 0,
            timeout: None,
            continue_on_error: false,
        }
    }
}

impl PipelineOptions {
    /// Parse options from a JSON string, and validate them
    pub fn from_json(json: &str) -> Result<PipelineOptions, Error> {
        let options: PipelineOptions = serde_json::from_str(json)?;
        options.validate()?;
        return Ok(options);
    }

    /// Check that these options are valid
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::InvalidArgument("the number of workers must be at least 1".into()));
        }

        if self.collector >= self.workers {
            return Err(Error::InvalidArgument(format!(
                "collector role {} is out of bounds for {} workers", self.collector, self.workers
            )));
        }

        if let Some(timeout) = self.timeout {
            if !(timeout > 0.0 && timeout.is_finite()) {
                return Err(Error::InvalidArgument(format!(
                    "timeout must be a positive number of seconds, got {}", timeout
                )));
            }
        }

        return Ok(());
    }

    fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs_f64)
    }
}

/// The `FeaturePipeline` computes symmetry functions for complete structures,
/// distributing the atoms of each structure over a fixed pool of workers.
///
/// For every structure, each worker computes the features of its own subset
/// of atoms with the `DescriptorKernel`, and sends them to the collector. The
/// collector waits for all workers, assembles the final `FeatureTensor` and
/// runs the registered `FeatureCheck`s on it.
pub struct FeaturePipeline {
    parameters: ParameterSet,
    encoded: EncodedParameters,
    kernel: Box<dyn DescriptorKernel>,
    options: PipelineOptions,
    pool: rayon::ThreadPool,
    checks: Vec<Box<dyn FeatureCheck>>,
}

impl std::fmt::Debug for FeaturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeaturePipeline")
            .field("parameters", &self.parameters)
            .field("kernel", &self.kernel.name())
            .field("options", &self.options)
            .field("checks", &self.checks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FeaturePipeline {
    /// Create a new pipeline computing the symmetry functions in `parameters`
    /// with the native kernel.
    pub fn new(parameters: ParameterSet, options: PipelineOptions) -> Result<FeaturePipeline, Error> {
        return FeaturePipeline::with_kernel(parameters, Box::new(SymmetryFunctionKernel), options);
    }

    /// Create a new pipeline using a custom `kernel`
    pub fn with_kernel(
        parameters: ParameterSet,
        kernel: Box<dyn DescriptorKernel>,
        options: PipelineOptions,
    ) -> Result<FeaturePipeline, Error> {
        options.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("symfeat-worker-{}", i))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("failed to create the worker pool: {}", e)))?;

        let encoded = parameters.encode();
        return Ok(FeaturePipeline {
            parameters: parameters,
            encoded: encoded,
            kernel: kernel,
            options: options,
            pool: pool,
            checks: Vec::new(),
        });
    }

    /// Register a new check to run on the features of every structure
    pub fn add_check(&mut self, check: impl FeatureCheck + 'static) {
        self.checks.push(Box::new(check));
    }

    /// Get the symmetry functions used by this pipeline
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Get the options used by this pipeline
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Compute the features of a single `structure`
    pub fn compute(&self, structure: &Structure) -> Result<FeatureTensor, Error> {
        return self.compute_with_signal(structure, &AbortSignal::new());
    }

    /// Compute the features of a single `structure`, stopping early with
    /// `Error::Cancelled` if `signal` is raised.
    #[time_graph::instrument(name = "FeaturePipeline::compute")]
    pub fn compute_with_signal(&self, structure: &Structure, signal: &AbortSignal) -> Result<FeatureTensor, Error> {
        let start = Instant::now();

        let view = StructureView::new(structure, self.parameters.species())?;
        let n_atoms = view.size();
        let n_workers = self.options.workers;

        let subsets = partition(n_atoms, n_workers)?;
        let aggregator = Aggregator::new(n_atoms, self.encoded.len(), n_workers, self.options.collector)?;

        // raised to stop all workers of this structure, without touching the
        // caller's signal
        let abort = signal.child();
        let input = view.kernel_input();
        let (sender, receiver) = crossbeam::channel::unbounded();

        let features = self.pool.in_place_scope(|scope| {
            for (role, subset) in subsets.into_iter().enumerate() {
                let sender = sender.clone();
                let abort = &abort;
                let input = &input;
                scope.spawn(move |_| {
                    let result = self.run_worker(role, subset, input, abort);
                    // the collector is gone if it already timed out
                    let _ = sender.send(WorkerMessage {
                        role: role,
                        subset: subset,
                        result: result,
                    });
                });
            }
            drop(sender);

            aggregator.collect(aggregator.collector(), &receiver, self.options.timeout_duration(), &abort)
        })?;

        let features = features.ok_or_else(|| Error::ShapeMismatch(
            "the collector did not produce any features".into()
        ))?;

        for check in &self.checks {
            check.check(&view, self.parameters.species(), &features)?;
            debug!("features passed the '{}' check", check.name());
        }

        info!(
            "computed {} symmetry functions for {} atoms with {} workers in {:.3}s",
            self.encoded.len(), n_atoms, n_workers, start.elapsed().as_secs_f64()
        );

        return Ok(features);
    }

    /// Compute the features of the given atom `subset`, as the worker `role`
    fn run_worker(&self, role: usize, subset: AtomSubset, input: &KernelInput<'_>, abort: &AbortSignal) -> Result<PartialResult, Error> {
        let start = Instant::now();
        let atoms = subset.indices();
        let mut partial = PartialResult::zeros(subset.len(), input.size(), self.encoded.len());

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.kernel.compute(
                input,
                &atoms,
                &self.encoded,
                partial.values.view_mut(),
                partial.derivatives.view_mut(),
                abort,
            )
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(panic) => return Err(Error::from(panic)),
        }

        debug!(
            "worker {} computed atoms {}..{} in {:.3}s",
            role, subset.begin, subset.end, start.elapsed().as_secs_f64()
        );

        return Ok(partial);
    }

    /// Compute the features of all `structures`, in order.
    ///
    /// If `continue_on_error` is set in the options, failures are logged and
    /// the corresponding entry is `None`. Otherwise, the first failure is
    /// returned.
    pub fn compute_all(&self, structures: &[Structure]) -> Result<Vec<Option<FeatureTensor>>, Error> {
        let mut all_features = Vec::with_capacity(structures.len());
        for (i, structure) in structures.iter().enumerate() {
            match self.compute(structure) {
                Ok(features) => all_features.push(Some(features)),
                Err(e) => {
                    if !self.options.continue_on_error {
                        return Err(e);
                    }
                    error!("failed to compute features for structure {}, skipping it: {}", i, e);
                    all_features.push(None);
                }
            }
        }

        return Ok(all_features);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ndarray::ArrayViewMut2;

    use crate::systems::test_utils::test_structure;
    use crate::systems::UnitCell;
    use crate::Vector3D;

    use super::*;

    const PARAMETERS: &str = "H C O Si Ni
2 1 0 4.0 0.5 0.0
2 2 0 4.0 0.5 0.0
4 1 1 4.0 0.1 1.0 1.0
";

    /// Kernel failing or misbehaving for a given atom
    struct BrokenKernel {
        atom: usize,
        mode: &'static str,
    }

    impl DescriptorKernel for BrokenKernel {
        fn name(&self) -> String {
            format!("broken ({})", self.mode)
        }

        fn compute(
            &self,
            input: &KernelInput<'_>,
            atoms: &[usize],
            parameters: &EncodedParameters,
            values: ArrayViewMut2<'_, f64>,
            derivatives: ArrayViewMut2<'_, f64>,
            abort: &AbortSignal,
        ) -> Result<(), Error> {
            if atoms.contains(&self.atom) {
                match self.mode {
                    "panic" => panic!("something went very wrong"),
                    "error" => return Err(Error::Kernel("degenerate geometry".into())),
                    "wait" => {
                        while !abort.is_raised() {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        return Err(Error::Cancelled);
                    }
                    _ => unreachable!(),
                }
            }

            return SymmetryFunctionKernel.compute(input, atoms, parameters, values, derivatives, abort);
        }
    }

    fn broken_pipeline(atom: usize, mode: &'static str, options: &str) -> FeaturePipeline {
        let parameters = ParameterSet::parse(PARAMETERS).unwrap();
        let kernel = Box::new(BrokenKernel { atom: atom, mode: mode });
        return FeaturePipeline::with_kernel(parameters, kernel, PipelineOptions::from_json(options).unwrap()).unwrap();
    }

    #[test]
    fn options() {
        let options = PipelineOptions::from_json("{}").unwrap();
        assert_eq!(options, PipelineOptions::default());
        assert_eq!(options.workers, 1);

        let options = PipelineOptions::from_json(r#"{"workers": 4, "collector": 3, "timeout": 2.5, "continue_on_error": true}"#).unwrap();
        assert_eq!(options.workers, 4);
        assert_eq!(options.collector, 3);
        assert_eq!(options.timeout_duration(), Some(Duration::from_millis(2500)));
        assert!(options.continue_on_error);

        let invalid = |json: &str| matches!(PipelineOptions::from_json(json), Err(Error::InvalidArgument(_)));
        assert!(invalid(r#"{"workers": 0}"#));
        assert!(invalid(r#"{"workers": 2, "collector": 2}"#));
        assert!(invalid(r#"{"timeout": 0.0}"#));
        assert!(invalid(r#"{"timeout": -3.0}"#));

        assert!(matches!(PipelineOptions::from_json(r#"{"threads": 3}"#), Err(Error::Json(_))));
        assert!(matches!(PipelineOptions::from_json(r#"{"workers": -3}"#), Err(Error::Json(_))));
    }

    #[test]
    fn schema() {
        let schema = schemars::schema_for!(PipelineOptions);
        let schema = serde_json::to_string(&schema).unwrap();
        assert!(schema.contains("continue_on_error"));
        assert!(schema.contains("collector"));
    }

    #[test]
    fn collector_role() {
        let structure = test_structure("methane");
        let parameters = ParameterSet::parse(PARAMETERS).unwrap();

        let reference = FeaturePipeline::new(parameters.clone(), PipelineOptions::default()).unwrap()
            .compute(&structure)
            .unwrap();

        for collector in 0..3 {
            let options = PipelineOptions { workers: 3, collector: collector, ..Default::default() };
            let pipeline = FeaturePipeline::new(parameters.clone(), options).unwrap();
            assert_eq!(pipeline.compute(&structure).unwrap().values, reference.values);
        }
    }

    #[test]
    fn unknown_species() {
        let mut structure = Structure::new(UnitCell::infinite());
        structure.add_atom("H", Vector3D::new(0.0, 0.0, 0.0));
        structure.add_atom("Xe", Vector3D::new(0.0, 0.0, 3.0));

        let pipeline = FeaturePipeline::new(ParameterSet::parse(PARAMETERS).unwrap(), PipelineOptions::default()).unwrap();
        assert!(matches!(pipeline.compute(&structure), Err(Error::UnknownSpecies(_))));
    }

    #[test]
    fn worker_failures() {
        let structure = test_structure("methane");

        let pipeline = broken_pipeline(3, "error", r#"{"workers": 3}"#);
        match pipeline.compute(&structure) {
            Err(Error::Kernel(message)) => assert_eq!(message, "degenerate geometry"),
            other => panic!("expected a kernel error, got {:?}", other),
        }

        let pipeline = broken_pipeline(0, "panic", r#"{"workers": 2, "collector": 1}"#);
        match pipeline.compute(&structure) {
            Err(Error::Panic(message)) => assert_eq!(message, "something went very wrong"),
            other => panic!("expected a panic error, got {:?}", other),
        }

        // the pipeline can be used again after a failure
        let pipeline = broken_pipeline(12, "error", r#"{"workers": 2}"#);
        assert!(pipeline.compute(&structure).is_ok());
    }

    #[test]
    fn timeout() {
        let structure = test_structure("methane");
        let pipeline = broken_pipeline(4, "wait", r#"{"workers": 2, "timeout": 0.05}"#);

        let start = Instant::now();
        match pipeline.compute(&structure) {
            Err(Error::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(50)),
            other => panic!("expected a timeout error, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancellation() {
        let structure = test_structure("methane");
        let pipeline = broken_pipeline(4, "wait", r#"{"workers": 2}"#);

        let signal = AbortSignal::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                signal.raise();
            });

            assert!(matches!(pipeline.compute_with_signal(&structure, &signal), Err(Error::Cancelled)));
        });

        let pipeline = broken_pipeline(12, "wait", r#"{"workers": 2}"#);
        assert!(matches!(pipeline.compute_with_signal(&structure, &signal), Err(Error::Cancelled)));
    }

    #[test]
    fn compute_all() {
        let mut broken = Structure::new(UnitCell::infinite());
        broken.add_atom("H", Vector3D::new(0.0, 0.0, 0.0));
        broken.add_atom("Xe", Vector3D::new(0.0, 0.0, 3.0));

        let structures = vec![test_structure("methane"), broken, test_structure("water")];
        let parameters = ParameterSet::parse(PARAMETERS).unwrap();

        let pipeline = FeaturePipeline::new(parameters.clone(), PipelineOptions::default()).unwrap();
        assert!(matches!(pipeline.compute_all(&structures), Err(Error::UnknownSpecies(_))));

        let options = PipelineOptions { continue_on_error: true, ..Default::default() };
        let pipeline = FeaturePipeline::new(parameters, options).unwrap();
        let all = pipeline.compute_all(&structures).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].as_ref().map(|f| f.n_atoms()), Some(5));
        assert!(all[1].is_none());
        assert_eq!(all[2].as_ref().map(|f| f.n_atoms()), Some(3));
    }

    unsafe extern "C" fn slow_kernel(
        _: *mut *mut f64, _: *mut *mut f64, _: *mut *mut f64,
        _: *mut i32, _: i32, _: *mut i32, _: i32,
        _: *mut *mut i32, _: *mut *mut f64, _: i32,
        _: *mut *mut f64, _: *mut *mut f64,
    ) {
        std::thread::sleep(Duration::from_millis(200));
    }

    #[test]
    fn timeout_waits_for_foreign_kernel() {
        let structure = test_structure("methane");
        let parameters = ParameterSet::parse(PARAMETERS).unwrap();
        // SAFETY: slow_kernel does not touch any of its arguments
        let kernel = unsafe { crate::kernel::ForeignKernel::new("slow", slow_kernel) };
        let options = PipelineOptions::from_json(r#"{"workers": 2, "timeout": 0.02}"#).unwrap();
        let pipeline = FeaturePipeline::with_kernel(parameters, Box::new(kernel), options).unwrap();

        let start = Instant::now();
        match pipeline.compute(&structure) {
            Err(Error::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(20)),
            other => panic!("expected a timeout error, got {:?}", other),
        }
        // the native calls can not be interrupted, and are waited for
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
