#![allow(dead_code)]

use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use homology::transform::{transform_neuronlist, Mirror};
use homology::utils::FastMap;
use homology::{
    AnalysisConfig, ConnStats, HomologyPairs, InMemorySource, NeuronList, NeuronSource,
    ScoreMatrixLookup,
};

/// Midline of the test skeletons; right-hand neurons are reflections of left-hand ones.
pub const MIDLINE: f64 = 50000.0;
pub const LEFT: &str = "left";
pub const RIGHT: &str = "right";
pub const PROJECTION: &str = "PN";

pub fn to_path(relpath: &str) -> PathBuf {
    let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("resources/test");
    p.push(relpath);
    p
}

pub fn read_file(relpath: &str) -> String {
    let mut f = File::open(to_path(relpath)).expect("file not found");

    let mut contents = String::new();
    f.read_to_string(&mut contents)
        .expect("something went wrong reading the file");
    contents
}

pub fn mk_source() -> InMemorySource {
    InMemorySource::from_directory(to_path("skeletons")).expect("couldn't load skeletons")
}

pub fn mk_lookup() -> ScoreMatrixLookup {
    ScoreMatrixLookup::from_json(&read_file("smat.json")).expect("couldn't parse score matrix")
}

pub fn mk_config() -> AnalysisConfig {
    AnalysisConfig::load(to_path("config.toml")).expect("couldn't load config")
}

pub fn mk_conn_stats() -> ConnStats {
    serde_json::from_str(&read_file("conn_stats.json")).expect("couldn't deser conn stats")
}

pub fn mk_pairs(source: &InMemorySource) -> HomologyPairs {
    let mut pairs = HomologyPairs::from_json(&read_file("pairs.json")).expect("couldn't deser pairs");
    pairs.retain_present(&source.all());
    pairs
}

pub fn with_annotations(source: &InMemorySource, annotations: &[&str]) -> NeuronList {
    source
        .all()
        .filter(|n| annotations.iter().all(|a| n.has_annotation(a)))
}

/// Right-hand projection neurons reflected into the left hemisphere.
pub fn mirrored_right(source: &InMemorySource) -> NeuronList {
    let right = with_annotations(source, &[RIGHT, PROJECTION]);
    transform_neuronlist(&right, &Mirror { plane: MIDLINE })
}

pub fn left(source: &InMemorySource) -> NeuronList {
    with_annotations(source, &[LEFT, PROJECTION])
}

pub fn assert_vec_members<T: PartialOrd + PartialEq + Clone + Debug>(test: &[T], reference: &[T]) {
    let mut v1 = test.to_vec();
    v1.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut v2 = reference.to_vec();
    v2.sort_by(|a, b| a.partial_cmp(b).unwrap());

    assert_eq!(v1, v2);
}

pub fn source_skids(source: &InMemorySource, annotation: &str) -> Vec<u64> {
    source.skids_with_annotation(annotation)
}

pub fn partitions_to_edges(partitions: Vec<Vec<u64>>) -> FastMap<u64, u64> {
    let mut edges: FastMap<u64, u64> = FastMap::default();
    for partition in partitions.iter() {
        for pair in partition.windows(2) {
            let was_present = edges.insert(pair[0], pair[1]);
            assert_eq!(was_present, None);
        }
    }
    edges
}
