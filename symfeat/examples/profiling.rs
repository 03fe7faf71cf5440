use symfeat::{FeaturePipeline, ParameterSet, PipelineOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let parameters = args.next().expect("expected a parameter file as first argument");
    let structures = args.next().expect("expected a structure file as second argument");

    // enable collection of profiling data
    time_graph::enable_data_collection(true);
    // clear any existing collected data
    time_graph::clear_collected_data();

    // run the calculation
    time_graph::spanned!("Full calculation", {
        let parameters = ParameterSet::load(parameters)?;
        let structures = symfeat::read_structures(structures)?;

        let options = PipelineOptions { workers: 4, ..Default::default() };
        let pipeline = FeaturePipeline::new(parameters, options)?;
        pipeline.compute_all(&structures)?;
    });

    // get the call graph and display it
    let graph = time_graph::get_full_graph();
    // (this requires the "table" feature for the time_graph crate)
    println!("{}", graph.as_short_table());

    // also available for saving profiling data to the disk & future analysis
    // (this requires the "json" feature for the time_graph crate)
    println!("{}", graph.as_json());

    Ok(())
}
