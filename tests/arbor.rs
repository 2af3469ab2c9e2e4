extern crate homology;
extern crate serde_json;
#[macro_use]
extern crate approx;

mod common;

use common::{assert_vec_members, mk_source, partitions_to_edges, read_file};
use homology::arbor::BranchAndEndNodes;
use homology::skeleton::SkeletonResponse;
use homology::utils::{FastMap, FastSet};
use homology::NeuronSource;

const SKID: u64 = 11;
const BRANCH: u64 = 11008;

fn response() -> SkeletonResponse {
    SkeletonResponse::from_json(&read_file("skeletons/11.json")).expect("couldn't deser skeleton")
}

#[test]
fn root_is_soma() {
    let nrn = mk_source().neuron(SKID).unwrap();
    assert_eq!(nrn.arbor.root, Some(11000));
    assert_eq!(nrn.arbor.len(), 28);
    assert_eq!(nrn.soma_location(), nrn.locations.get(&11000).cloned());
}

#[test]
fn find_branch_and_end_nodes() {
    let test: BranchAndEndNodes<u64> = mk_source().neuron(SKID).unwrap().arbor.find_branch_and_end_nodes();

    let mut branches = FastMap::default();
    branches.insert(BRANCH, 2);
    let ends: FastSet<u64> = vec![11019, 11027].into_iter().collect();
    assert_eq!(test, BranchAndEndNodes { branches, ends });
}

#[test]
fn partitions_cover_every_edge_once() {
    let nrn = mk_source().neuron(SKID).unwrap();
    let partitions = nrn.minimal_paths();
    assert_eq!(partitions.len(), 2);
    // highest-numbered leaf first, running all the way to the root
    assert_eq!(partitions[0].first(), Some(&11027));
    assert_eq!(partitions[0].last(), Some(&11000));
    assert_eq!(partitions[1].first(), Some(&11019));
    assert_eq!(partitions[1].last(), Some(&BRANCH));

    let reference: FastMap<u64, u64> = nrn.arbor.edges().map(|(c, p)| (*c, *p)).collect();
    assert_eq!(partitions_to_edges(partitions), reference);
}

#[test]
fn breadth_first_parents_first() {
    let arbor = mk_source().neuron(SKID).unwrap().arbor;
    let order = arbor.breadth_first();
    assert_eq!(order[0], 11000);

    let position: FastMap<u64, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    for (child, parent) in arbor.edges() {
        assert!(position[parent] < position[child]);
    }
    let all: Vec<u64> = arbor.nodes().collect();
    assert_vec_members(&order, &all);
}

#[test]
fn strahler_numbers() {
    let strahler = mk_source().neuron(SKID).unwrap().strahler_number();
    assert_eq!(strahler[&11000], 2);
    assert_eq!(strahler[&BRANCH], 2);
    assert_eq!(strahler[&11009], 1);
    assert_eq!(strahler[&11020], 1);
    assert_eq!(strahler.values().cloned().max(), Some(2));
}

#[test]
fn cable_length_matches_treenodes() {
    let response = response();
    let by_id: FastMap<u64, [f64; 3]> = response
        .treenodes()
        .iter()
        .map(|t| (t.id, [t.x, t.y, t.z]))
        .collect();
    let expected: f64 = response
        .treenodes()
        .iter()
        .filter_map(|t| t.parent_id.map(|p| (by_id[&t.id], by_id[&p])))
        .map(|(a, b)| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt())
        .sum();

    let nrn = mk_source().neuron(SKID).unwrap();
    assert_relative_eq!(nrn.cable_length(), expected, max_relative = 1e-12);
    // 27 edges of roughly 500nm
    assert_relative_eq!(expected, 13500.0, max_relative = 0.1);
}
