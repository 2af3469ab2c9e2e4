extern crate homology;
#[macro_use]
extern crate approx;

mod common;

use common::{left, mirrored_right, mk_config, mk_lookup, mk_source};
use homology::dotprop::neuron_to_dotprop;
use homology::matching::{match_report, max_match_similarity, MatchReport};
use homology::nblast::{exact_nblast, max_blast_score, nblast_neuron_pair, nblast_neurons, soma_distance};
use homology::{NblastParams, NeuronList, NeuronSource};

#[test]
fn score_matrix_from_json() {
    let lookup = mk_lookup();
    assert_eq!(lookup.shape(), (5, 3));
    assert_eq!(lookup.score(0.0, 1.0), 8.0);
    assert_eq!(lookup.score(999.0, 0.95), 8.0);
    // interval boundaries belong to the interval above
    assert_eq!(lookup.score(1000.0, 0.95), 4.0);
    assert_eq!(lookup.score(50000.0, 0.0), -3.0);
    assert_eq!(max_blast_score(10, &lookup), 80.0);
}

#[test]
fn dotprops_resampled_per_path() {
    let nrn = mk_source().neuron(11).unwrap();
    let dp = neuron_to_dotprop(&nrn, 1000.0, 5, None).unwrap();
    // about 8.1um and 5.6um of cable resample to 8 + 6 points
    assert_eq!(dp.len(), 14);
    for t in dp.tangents.iter() {
        assert_abs_diff_eq!((t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn self_nblast_is_max() {
    let source = mk_source();
    let nrn = source.neuron(21).unwrap();
    let params = NblastParams {
        normalize: true,
        ..NblastParams::default()
    };
    let s = nblast_neuron_pair(&nrn, &nrn, &mk_lookup(), &params, false).unwrap();
    assert_abs_diff_eq!(s, 1.0, epsilon = 1e-12);
}

#[test]
fn mirrored_homologue_scores_high() {
    let source = mk_source();
    let lookup = mk_lookup();
    let params = mk_config().nblast;
    let mirrored = mirrored_right(&source);
    let nrn_q = source.neuron(11).unwrap();

    let s_bid = nblast_neuron_pair(&nrn_q, mirrored.get(12).unwrap(), &lookup, &params, true).unwrap();
    assert!(s_bid > 0.9);
    let s_other = nblast_neuron_pair(&nrn_q, mirrored.get(22).unwrap(), &lookup, &params, true).unwrap();
    assert_eq!(s_other, 0.0);
    // without reflection the pair is far apart
    let raw = nblast_neuron_pair(&nrn_q, &source.neuron(12).unwrap(), &lookup, &params, true).unwrap();
    assert_eq!(raw, 0.0);
}

#[test]
fn all_by_all_rows() {
    let source = mk_source();
    let nrns = left(&source);
    let params = NblastParams {
        normalize: true,
        ..NblastParams::default()
    };
    let rows = nblast_neurons(&mk_lookup(), &nrns, None, &params).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].queries, "PN a left (11)");
    assert_eq!(rows[1].targets, "PN b left (21)");
    assert_abs_diff_eq!(rows[0].s, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(rows[3].s, 1.0, epsilon = 1e-12);
    assert!(rows[1].s < 0.0);
}

#[test]
fn soma_distances() {
    let source = mk_source();
    let rows = soma_distance(&left(&source), Some(&mirrored_right(&source)));
    assert_eq!(rows.len(), 4);
    // homologues are reflected onto each other, up to jitter
    assert!(rows[0].soma_distance < 200.0);
    assert!(rows[1].soma_distance > 10000.0);

    let mut no_soma = source.neuron(11).unwrap();
    no_soma.tags.clear();
    no_soma.arbor.root = None;
    let rows = soma_distance(&NeuronList::new(vec![no_soma]), Some(&left(&source)));
    assert!(rows.iter().all(|r| r.soma_distance.is_nan()));
}

#[test]
fn exact_nblast_and_matching() {
    let source = mk_source();
    let config = mk_config();
    let queries = left(&source);
    let targets = mirrored_right(&source);

    let sb = exact_nblast(&mk_lookup(), &queries, &targets, &config.nblast).unwrap();
    assert_eq!(sb.shape(), (2, 2));
    assert!(sb.get("PN a left (11)", "PN a right (12)").unwrap() > 0.9);
    assert_eq!(sb.get("PN a left (11)", "PN b right (22)"), Some(0.0));

    let matching = max_match_similarity(&sb, config.partners.min_similarity, &[], 1.0).unwrap();
    let pairs: Vec<(u64, u64)> = matching.iter().map(|m| (m.query_id, m.target_id)).collect();
    assert_eq!(pairs.len(), 2);
    assert!(pairs.contains(&(11, 12)));
    assert!(pairs.contains(&(21, 22)));
    assert!(matching[0].s >= matching[1].s);

    let report = match_report(&queries, &sb, config.partners.min_similarity);
    match &report[&11] {
        MatchReport::Matches(best) => assert_eq!(best[0].0, "PN a right (12)"),
        MatchReport::NoMatch(msg) => panic!("{}", msg),
    }
}

#[test]
fn exact_nblast_length_filter() {
    let source = mk_source();
    let mut params = mk_config().nblast;
    params.min_length = Some(1e9);
    let sb = exact_nblast(&mk_lookup(), &left(&source), &mirrored_right(&source), &params).unwrap();
    assert_eq!(sb.shape(), (0, 0));
}

#[test]
fn unusable_resample_distance_is_an_error() {
    let source = mk_source();
    let nrns = left(&source);
    let mut params = mk_config().nblast;
    for d in [0.0, -1000.0, std::f64::NAN].iter() {
        params.resample_distance = *d;
        assert!(nblast_neurons(&mk_lookup(), &nrns, None, &params).is_err());
        assert!(exact_nblast(&mk_lookup(), &nrns, &mirrored_right(&source), &params).is_err());
    }
}

#[test]
fn stacked_skeleton_nodes() {
    let source = mk_source();
    let mut nrn = source.neuron(11).unwrap();
    // collapse the whole arbor onto its root
    let root = nrn.arbor.root.unwrap();
    let at = nrn.locations[&root];
    for loc in nrn.locations.values_mut() {
        *loc = at;
    }
    let dp = neuron_to_dotprop(&nrn, 1000.0, 5, None).unwrap();
    assert!(!dp.is_empty());
    let s = nblast_neuron_pair(&nrn, &nrn, &mk_lookup(), &mk_config().nblast, true).unwrap();
    assert!(s.is_finite());
}
