//! Putting morphology and connectivity together: likelihood tables for
//! candidate homologues, and matching of two neurons' synaptic partners.

use tracing::{info, warn};

use crate::config::{NblastParams, PartnerParams};
use crate::connectivity::{paired_connectivity_prob, ConnectivityProbRow, PairMap};
use crate::error::Result;
use crate::likelihood::{match_prob_morpho_log_ratio, ConnStats, MorphoStats};
use crate::matching::{max_match_similarity, MatchRow, SimilarityMatrix};
use crate::nblast::{exact_nblast, nblast_dotprops, prepare_neurons, soma_distance, ScoreRow, SomaDistanceRow};
use crate::neuron::{Neuron, NeuronList};
use crate::score::ScoreMatrixLookup;
use crate::source::{synaptic_partners, ConnectionType, NeuronSource};
use crate::transform::{transform_neuronlist, PointTransform};
use crate::utils::FastMap;

/// Every measure computed for one query/target pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodRow {
    #[serde(rename = "Queries")]
    pub queries: String,
    #[serde(rename = "Targets")]
    pub targets: String,
    #[serde(rename = "Sqt")]
    pub sqt: f64,
    #[serde(rename = "Stq")]
    pub stq: f64,
    #[serde(rename = "Sbid")]
    pub sbid: f64,
    pub soma_distance: f64,
    pub pre_prob: f64,
    pub post_prob: f64,
    #[serde(rename = "P_morph_log_ratio")]
    pub p_morph_log_ratio: f64,
    #[serde(rename = "logP")]
    pub log_p: f64,
}

/// Pivot a likelihood table into a query-by-target matrix of `logP`.
pub fn log_p_matrix(rows: &[LikelihoodRow]) -> SimilarityMatrix {
    SimilarityMatrix::pivot(rows.iter().map(|r| (r.queries.clone(), r.targets.clone(), r.log_p)))
}

fn keyed<T, F: Fn(&T) -> (String, String)>(rows: Vec<T>, key: F) -> FastMap<(String, String), T> {
    rows.into_iter().map(|r| (key(&r), r)).collect()
}

/// Log2 likelihood ratio of every query being the homologue of every target.
///
/// Combines normalized NBLAST in both directions (negatives clamped to zero),
/// their geometric mean, soma distance and paired connectivity. Pairs missing
/// from any of the component tables are dropped. Rows are in query-major order.
#[allow(clippy::too_many_arguments)]
pub fn match_likelihood_ratio<S: NeuronSource + ?Sized>(
    source: &S,
    lookup: &ScoreMatrixLookup,
    nrns_q: &NeuronList,
    nrns_t: &NeuronList,
    pair_map: &PairMap,
    conn_stats: &ConnStats,
    morpho_stats: &MorphoStats,
    params: &NblastParams,
    is_mirrored: bool,
) -> Result<Vec<LikelihoodRow>> {
    conn_stats.validate()?;
    let (nrns_q, nrns_t) = match params.min_length {
        Some(min_length) => (nrns_q.filter_by_length(min_length), nrns_t.filter_by_length(min_length)),
        None => (nrns_q.clone(), nrns_t.clone()),
    };
    info!(n_queries = nrns_q.len(), n_targets = nrns_t.len(), "computing match likelihoods");

    let distances = keyed(soma_distance(&nrns_q, Some(&nrns_t)), |r: &SomaDistanceRow| {
        (r.queries.clone(), r.targets.clone())
    });

    let prepared_q = prepare_neurons(&nrns_q, params)?;
    let prepared_t = prepare_neurons(&nrns_t, params)?;
    let s_qt = nblast_dotprops(lookup, &prepared_q, &prepared_t, true, params.max_proximity);
    // keyed as (query, target) so it lines up with the forward direction
    let s_tq = keyed(
        nblast_dotprops(lookup, &prepared_t, &prepared_q, true, params.max_proximity),
        |r: &ScoreRow| (r.targets.clone(), r.queries.clone()),
    );

    let conn = keyed(
        paired_connectivity_prob(source, &nrns_q, &nrns_t, pair_map, conn_stats, is_mirrored),
        |r: &ConnectivityProbRow| (r.queries.clone(), r.targets.clone()),
    );

    let mut rows = Vec::with_capacity(s_qt.len());
    for fwd in s_qt {
        let key = (fwd.queries, fwd.targets);
        let (rev, dist, con) = match (s_tq.get(&key), distances.get(&key), conn.get(&key)) {
            (Some(rev), Some(dist), Some(con)) => (rev, dist, con),
            _ => continue,
        };

        let sqt = fwd.s.max(0.0);
        let stq = rev.s.max(0.0);
        let sbid = match (sqt * stq).sqrt() {
            s if s.is_nan() => 0.0,
            s => s,
        };
        let p_morph_log_ratio = match_prob_morpho_log_ratio(sbid, dist.soma_distance, morpho_stats)?;
        rows.push(LikelihoodRow {
            log_p: p_morph_log_ratio + con.post_prob + con.pre_prob,
            queries: key.0,
            targets: key.1,
            sqt,
            stq,
            sbid,
            soma_distance: dist.soma_distance,
            pre_prob: con.pre_prob,
            post_prob: con.post_prob,
            p_morph_log_ratio,
        });
    }
    Ok(rows)
}

/// A matched pair of partners with their synapse counts onto the compared neurons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerMatch {
    #[serde(flatten)]
    pub matched: MatchRow,
    #[serde(rename = "Query_synapses")]
    pub query_synapses: f64,
    #[serde(rename = "Target_synapses")]
    pub target_synapses: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerComparison {
    pub matching: Vec<PartnerMatch>,
    /// Full query-partner by target-partner score matrix that was matched on
    pub similarity: SimilarityMatrix,
    pub partners_q: Vec<(u64, f64)>,
    pub partners_t: Vec<(u64, f64)>,
}

impl PartnerComparison {
    fn empty() -> Self {
        PartnerComparison {
            matching: Vec::new(),
            similarity: SimilarityMatrix::new(Vec::new(), Vec::new(), 0.0),
            partners_q: Vec::new(),
            partners_t: Vec::new(),
        }
    }
}

struct PartnerSets {
    partners_q: Vec<(u64, f64)>,
    partners_t: Vec<(u64, f64)>,
    nrns_q: NeuronList,
    nrns_t: NeuronList,
}

/// The query's strongest partners, and every target partner at least a
/// comparable fraction as strong, moved into the query's frame.
fn select_partners<S, T>(
    source: &S,
    nrn_q: &Neuron,
    nrn_t: &Neuron,
    connection_type: ConnectionType,
    transform: &T,
    partner: &PartnerParams,
) -> Result<Option<PartnerSets>>
where
    S: NeuronSource + ?Sized,
    T: PointTransform + ?Sized,
{
    let all_q = synaptic_partners(source, nrn_q, connection_type, 0, false);
    let ntop_q = partner.ntop_q.min(all_q.len());
    if ntop_q == 0 {
        warn!(skid = nrn_q.id, ?connection_type, "query has no partners");
        return Ok(None);
    }
    let top_q: Vec<u64> = all_q[..ntop_q].iter().map(|p| p.0).collect();
    let nrns_q = NeuronList::from_id_list(&top_q, source)?;

    let weakest = all_q[ntop_q - 1].1;
    let min_synapses = (partner.kmin_t as f64).max(partner.kmin_f * weakest) as usize;

    let partners_t = synaptic_partners(source, nrn_t, connection_type, min_synapses, partner.normalized);
    let ids_t: Vec<u64> = partners_t.iter().map(|p| p.0).collect();
    let nrns_t = NeuronList::from_id_list(&ids_t, source)?;
    let nrns_t = if partner.contralateral {
        transform_neuronlist(&nrns_t, transform)
    } else {
        nrns_t
    };
    info!(
        query = nrn_q.id,
        target = nrn_t.id,
        n_partners_q = nrns_q.len(),
        n_partners_t = nrns_t.len(),
        min_synapses,
        "selected partners"
    );

    Ok(Some(PartnerSets {
        partners_q: all_q,
        partners_t,
        nrns_q,
        nrns_t,
    }))
}

fn with_synapses(matching: Vec<MatchRow>, sets: &PartnerSets) -> Vec<PartnerMatch> {
    let weight = |partners: &[(u64, f64)], id: u64| {
        partners
            .iter()
            .find(|p| p.0 == id)
            .map_or(std::f64::NAN, |p| p.1)
    };
    matching
        .into_iter()
        .map(|m| PartnerMatch {
            query_synapses: weight(&sets.partners_q, m.query_id),
            target_synapses: weight(&sets.partners_t, m.target_id),
            matched: m,
        })
        .collect()
}

fn finish(sb: SimilarityMatrix, sets: PartnerSets, partner: &PartnerParams) -> Result<PartnerComparison> {
    let matching = max_match_similarity(&sb, partner.min_similarity, &[], 1.0)?;
    Ok(PartnerComparison {
        matching: with_synapses(matching, &sets),
        similarity: sb,
        partners_q: sets.partners_q,
        partners_t: sets.partners_t,
    })
}

/// Match the top synaptic partners of `nrn_q` to the partners of `nrn_t` by
/// exact (symmetric) NBLAST.
#[allow(clippy::too_many_arguments)]
pub fn compare_partners<S, T>(
    source: &S,
    lookup: &ScoreMatrixLookup,
    nrn_q: &Neuron,
    nrn_t: &Neuron,
    connection_type: ConnectionType,
    transform: &T,
    params: &NblastParams,
    partner: &PartnerParams,
) -> Result<PartnerComparison>
where
    S: NeuronSource + ?Sized,
    T: PointTransform + ?Sized,
{
    let sets = match select_partners(source, nrn_q, nrn_t, connection_type, transform, partner)? {
        Some(sets) => sets,
        None => return Ok(PartnerComparison::empty()),
    };
    let sb = exact_nblast(lookup, &sets.nrns_q, &sets.nrns_t, params)?;
    finish(sb, sets, partner)
}

/// As `compare_partners`, but partners are matched on the combined
/// morphology and connectivity log likelihood ratio.
#[allow(clippy::too_many_arguments)]
pub fn compare_partners_prob<S, T>(
    source: &S,
    lookup: &ScoreMatrixLookup,
    nrn_q: &Neuron,
    nrn_t: &Neuron,
    connection_type: ConnectionType,
    transform: &T,
    pair_map: &PairMap,
    conn_stats: &ConnStats,
    morpho_stats: &MorphoStats,
    params: &NblastParams,
    partner: &PartnerParams,
) -> Result<PartnerComparison>
where
    S: NeuronSource + ?Sized,
    T: PointTransform + ?Sized,
{
    let sets = match select_partners(source, nrn_q, nrn_t, connection_type, transform, partner)? {
        Some(sets) => sets,
        None => return Ok(PartnerComparison::empty()),
    };
    let table = match_likelihood_ratio(
        source,
        lookup,
        &sets.nrns_q,
        &sets.nrns_t,
        pair_map,
        conn_stats,
        morpho_stats,
        params,
        true,
    )?;
    finish(log_p_matrix(&table), sets, partner)
}
