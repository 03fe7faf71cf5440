use symfeat::{FeaturePipeline, ParameterSet, PipelineOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // usage: compute-features <parameters> <structures> [options.json]
    let mut args = std::env::args().skip(1);
    let parameters = args.next().expect("expected a parameter file as first argument");
    let structures = args.next().expect("expected a structure file as second argument");

    let parameters = ParameterSet::load(parameters)?;
    // this requires the "chemfiles" feature
    let structures = symfeat::read_structures(structures)?;

    // options are given as JSON, see `PipelineOptions` for the available keys
    let options = match args.next() {
        Some(path) => PipelineOptions::from_json(&std::fs::read_to_string(path)?)?,
        None => PipelineOptions {
            workers: 4,
            continue_on_error: true,
            ..Default::default()
        },
    };

    // the column order of the features, as JSON
    println!("{}", serde_json::to_string_pretty(&parameters)?);

    let pipeline = FeaturePipeline::new(parameters, options)?;
    let all_features = pipeline.compute_all(&structures)?;

    for (i, features) in all_features.iter().enumerate() {
        match features {
            Some(features) => println!(
                "structure {}: values {:?}, derivatives {:?}",
                i, features.values.shape(), features.derivatives.shape()
            ),
            None => println!("structure {}: failed", i),
        }
    }

    Ok(())
}
