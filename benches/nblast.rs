extern crate homology;
#[macro_use]
extern crate bencher;

use bencher::Bencher;

use homology::dotprop::neuron_to_dotprop;
use homology::nblast::{exact_nblast, nblast_dotprop_pair, nblast_neurons};
use homology::transform::{transform_neuronlist, Mirror};
use homology::{InMemorySource, NblastParams, NeuronList, NeuronSource, ScoreMatrixLookup};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

fn to_path(fname: &str) -> PathBuf {
    let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    d.push("resources/test");
    d.push(fname);
    d
}

fn read_lookup() -> ScoreMatrixLookup {
    let mut f = File::open(to_path("smat.json")).expect("file not found");
    let mut contents = String::new();
    f.read_to_string(&mut contents)
        .expect("something went wrong reading the file");
    ScoreMatrixLookup::from_json(&contents).expect("fail")
}

fn read_source() -> InMemorySource {
    InMemorySource::from_directory(to_path("skeletons")).expect("fail")
}

fn sides(source: &InMemorySource) -> (NeuronList, NeuronList) {
    let left = source.neurons_with_annotation("left").expect("fail");
    let right = source.neurons_with_annotation("right").expect("fail");
    (left, transform_neuronlist(&right, &Mirror { plane: 50000.0 }))
}

fn bench_dotprops(b: &mut Bencher) {
    let nrn = read_source().neuron(11).expect("fail");
    b.iter(|| neuron_to_dotprop(&nrn, 1000.0, 5, None).expect("fail"))
}

fn bench_dotprop_pair(b: &mut Bencher) {
    let source = read_source();
    let lookup = read_lookup();
    let dp_q = neuron_to_dotprop(&source.neuron(11).expect("fail"), 1000.0, 5, None).expect("fail");
    let dp_t = neuron_to_dotprop(&source.neuron(21).expect("fail"), 1000.0, 5, None).expect("fail");
    let index = dp_t.index();
    b.iter(|| nblast_dotprop_pair(&dp_q, &dp_t, &index, &lookup, true, None))
}

fn bench_all_by_all(b: &mut Bencher) {
    let source = read_source();
    let lookup = read_lookup();
    let nrns = source.all();
    let params = NblastParams::default();
    b.iter(|| nblast_neurons(&lookup, &nrns, None, &params).expect("fail"))
}

fn bench_exact(b: &mut Bencher) {
    let source = read_source();
    let lookup = read_lookup();
    let (left, right) = sides(&source);
    let params = NblastParams::default();
    b.iter(|| exact_nblast(&lookup, &left, &right, &params).expect("fail"))
}

benchmark_group!(dotprops, bench_dotprops, bench_dotprop_pair);
benchmark_group!(scoring, bench_all_by_all, bench_exact);
benchmark_main!(dotprops, scoring);
