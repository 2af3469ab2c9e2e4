extern crate homology;
#[macro_use]
extern crate approx;

mod common;

use common::{left, mirrored_right, mk_config, mk_conn_stats, mk_lookup, mk_pairs, mk_source, MIDLINE};
use homology::analysis::{conn_training_vectors, pair_observations, train_conn_stats};
use homology::homology::{compare_partners, compare_partners_prob, log_p_matrix, match_likelihood_ratio, LikelihoodRow};
use homology::matching::max_match_similarity;
use homology::transform::{transform_neuron, Identity, Mirror};
use homology::{ConnectionType, NeuronSource, PartnerParams};

fn likelihood_table() -> Vec<LikelihoodRow> {
    let source = mk_source();
    let config = mk_config();
    let pairs = mk_pairs(&source);
    match_likelihood_ratio(
        &source,
        &mk_lookup(),
        &left(&source),
        &mirrored_right(&source),
        &pairs.pair_map(),
        &mk_conn_stats(),
        config.morpho.as_ref().unwrap(),
        &config.nblast,
        true,
    )
    .unwrap()
}

fn row<'a>(rows: &'a [LikelihoodRow], q: u64, t: u64) -> &'a LikelihoodRow {
    let (q, t) = (format!("({})", q), format!("({})", t));
    rows.iter()
        .find(|r| r.queries.ends_with(&q) && r.targets.ends_with(&t))
        .expect("missing row")
}

#[test]
fn likelihood_table_is_complete() {
    let rows = likelihood_table();
    assert_eq!(rows.len(), 4);
    assert!(rows[0].queries.ends_with("(11)"));
    assert!(rows[3].targets.ends_with("(22)"));
}

#[test]
fn ragged_conn_stats_rejected() {
    let source = mk_source();
    let config = mk_config();
    let pairs = mk_pairs(&source);
    let mut conn_stats = mk_conn_stats();
    conn_stats.log_ratio[1].truncate(1);
    let result = match_likelihood_ratio(
        &source,
        &mk_lookup(),
        &left(&source),
        &mirrored_right(&source),
        &pairs.pair_map(),
        &conn_stats,
        config.morpho.as_ref().unwrap(),
        &config.nblast,
        true,
    );
    assert!(result.is_err());
}

#[test]
fn likelihood_connectivity_terms() {
    let rows = likelihood_table();

    let r = row(&rows, 11, 12);
    assert_eq!(r.pre_prob, 2.0);
    assert_eq!(r.post_prob, 2.0);

    let r = row(&rows, 21, 22);
    assert_eq!(r.pre_prob, 4.0);
    assert_eq!(r.post_prob, 0.0);

    let r = row(&rows, 11, 22);
    assert_eq!(r.pre_prob, -2.0);
    assert_eq!(r.post_prob, -1.0);
}

#[test]
fn likelihood_morphology_terms() {
    let rows = likelihood_table();
    for r in rows.iter() {
        assert!(r.sqt >= 0.0 && r.stq >= 0.0);
        assert_abs_diff_eq!(r.sbid, (r.sqt * r.stq).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(r.log_p, r.p_morph_log_ratio + r.pre_prob + r.post_prob, epsilon = 1e-12);
    }
    assert!(row(&rows, 11, 12).sbid > 0.9);
    assert_eq!(row(&rows, 11, 22).sbid, 0.0);
}

#[test]
fn homologues_are_most_likely() {
    let rows = likelihood_table();
    assert!(row(&rows, 11, 12).log_p > row(&rows, 11, 22).log_p);
    assert!(row(&rows, 21, 22).log_p > row(&rows, 21, 12).log_p);

    let matching = max_match_similarity(&log_p_matrix(&rows), 0.0, &[], 1.0).unwrap();
    let mut found: Vec<(u64, u64)> = matching.iter().map(|m| (m.query_id, m.target_id)).collect();
    found.sort_unstable();
    assert_eq!(found, vec![(11, 12), (21, 22)]);
}

#[test]
fn split_known_pairs() {
    let rows = likelihood_table();
    let pairs = mk_pairs(&mk_source());
    let (matched, unmatched) = pair_observations(&rows, &pairs).unwrap();
    assert_eq!(matched.len(), 2);
    assert_eq!(unmatched.len(), 2);
    assert!(matched.iter().all(|r| r.sbid > 0.9));
}

#[test]
fn partners_match_across_midline() {
    let source = mk_source();
    let config = mk_config();
    let nrn_q = source.neuron(11).unwrap();
    let nrn_t = source.neuron(12).unwrap();

    let cmp = compare_partners(
        &source,
        &mk_lookup(),
        &nrn_q,
        &nrn_t,
        ConnectionType::Presynaptic,
        &Mirror { plane: MIDLINE },
        &config.nblast,
        &config.partners,
    )
    .unwrap();

    assert_eq!(cmp.partners_q, vec![(31, 3.0)]);
    assert_eq!(cmp.partners_t, vec![(32, 3.0)]);
    assert_eq!(cmp.matching.len(), 1);
    let m = &cmp.matching[0];
    assert_eq!((m.matched.query_id, m.matched.target_id), (31, 32));
    assert_eq!(m.query_synapses, 3.0);
    assert_eq!(m.target_synapses, 3.0);
    assert!(m.matched.s > 0.9);
}

#[test]
fn partners_unmatched_without_reflection() {
    let source = mk_source();
    let config = mk_config();
    let cmp = compare_partners(
        &source,
        &mk_lookup(),
        &source.neuron(11).unwrap(),
        &source.neuron(12).unwrap(),
        ConnectionType::Presynaptic,
        &Identity,
        &config.nblast,
        &config.partners,
    )
    .unwrap();
    assert_eq!(cmp.similarity.shape(), (1, 1));
    assert!(cmp.matching.is_empty());
}

#[test]
fn no_partners_gives_empty_comparison() {
    let source = mk_source();
    let config = mk_config();
    // 21 has no downstream partners
    let cmp = compare_partners(
        &source,
        &mk_lookup(),
        &source.neuron(21).unwrap(),
        &source.neuron(22).unwrap(),
        ConnectionType::Postsynaptic,
        &Mirror { plane: MIDLINE },
        &config.nblast,
        &config.partners,
    )
    .unwrap();
    assert!(cmp.matching.is_empty());
    assert_eq!(cmp.similarity.shape(), (0, 0));
}

#[test]
fn partners_match_by_likelihood() {
    let source = mk_source();
    let config = mk_config();
    let pairs = mk_pairs(&source);
    let partner = PartnerParams {
        kmin_t: 1,
        min_similarity: 0.0,
        ..config.partners.clone()
    };
    let cmp = compare_partners_prob(
        &source,
        &mk_lookup(),
        &source.neuron(21).unwrap(),
        &source.neuron(22).unwrap(),
        ConnectionType::Presynaptic,
        &Mirror { plane: MIDLINE },
        &pairs.pair_map(),
        &mk_conn_stats(),
        config.morpho.as_ref().unwrap(),
        &config.nblast,
        &partner,
    )
    .unwrap();

    let ids_q: Vec<u64> = cmp.partners_q.iter().map(|p| p.0).collect();
    assert_eq!(ids_q, vec![11, 31]);
    let ids_t: Vec<u64> = cmp.partners_t.iter().map(|p| p.0).collect();
    assert_eq!(ids_t, vec![12, 32]);
    assert_eq!(cmp.similarity.shape(), (2, 2));

    let mut found: Vec<(u64, u64)> = cmp
        .matching
        .iter()
        .map(|m| (m.matched.query_id, m.matched.target_id))
        .collect();
    found.sort_unstable();
    assert_eq!(found, vec![(11, 12), (31, 32)]);
}

#[test]
fn mirror_moves_skeleton_and_synapses() {
    let source = mk_source();
    let nrn = source.neuron(12).unwrap();
    let mirrored = transform_neuron(&nrn, &Mirror { plane: MIDLINE });
    assert_eq!(mirrored.id, nrn.id);

    let before = nrn.soma_location().unwrap();
    let after = mirrored.soma_location().unwrap();
    assert_abs_diff_eq!(after.x, 2.0 * MIDLINE - before.x, epsilon = 1e-9);
    assert_eq!(after.y, before.y);

    let homologue = source.neuron(11).unwrap().soma_location().unwrap();
    assert!(after.distance_to(&homologue) < 200.0);

    for (a, b) in nrn.connectors.iter().zip(mirrored.connectors.iter()) {
        assert_abs_diff_eq!(a.x + b.x, 2.0 * MIDLINE, epsilon = 1e-9);
    }
}

#[test]
fn conn_stats_trained_from_pairs() {
    let source = mk_source();
    let pairs = mk_pairs(&source);
    let n_pairs = pairs.len();
    let (matched, unmatched) = conn_training_vectors(&source, &pairs).unwrap();
    // inputs and outputs of every left/right combination
    assert_eq!(matched.len(), 2 * n_pairs);
    assert_eq!(unmatched.len(), 2 * n_pairs * (n_pairs - 1));
    assert!(matched.iter().all(|(a, b)| a.len() == 2 * n_pairs && b.len() == 2 * n_pairs));

    let stats = train_conn_stats(&matched, &unmatched, 5);
    stats.validate().unwrap();
    assert_eq!(stats.log_ratio.len(), 6);
    assert!(stats.log_ratio.iter().flatten().all(|v| v.is_finite()));
}
