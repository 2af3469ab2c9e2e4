//! Synaptic connectivity expressed over a fixed set of known homologous pairs.

use tracing::{debug, warn};

use crate::likelihood::{match_prob_conn_log_ratio, ConnStats};
use crate::neuron::NeuronList;
use crate::source::NeuronSource;
use crate::utils::FastMap;

/// Consistent ordering of paired skeletons, so that connectivity vectors of
/// different neurons can be compared element by element, and mirrored by
/// swapping the two members of each pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairMap {
    pub pair_ids: Vec<u64>,
    pub skid_to_ind: FastMap<u64, usize>,
    pub mirror_inds: Vec<usize>,
}

impl PairMap {
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        let mut map = PairMap::default();
        for (left, right) in pairs {
            if map.skid_to_ind.contains_key(left) || map.skid_to_ind.contains_key(right) {
                warn!(left, right, "skeleton already paired, skipping");
                continue;
            }
            let i = map.pair_ids.len();
            map.pair_ids.push(*left);
            map.pair_ids.push(*right);
            map.skid_to_ind.insert(*left, i);
            map.skid_to_ind.insert(*right, i + 1);
            map.mirror_inds.push(i + 1);
            map.mirror_inds.push(i);
        }
        map
    }

    pub fn len(&self) -> usize {
        self.pair_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pair_ids.is_empty()
    }

    /// Swap every element with its pair partner's.
    pub fn mirror(&self, vec: &[f64]) -> Vec<f64> {
        self.mirror_inds.iter().map(|i| vec[*i]).collect()
    }

    fn vector(&self, partners: &FastMap<u64, usize>) -> Vec<f64> {
        let mut vec = vec![0.0; self.len()];
        for (skid, count) in partners {
            if let Some(i) = self.skid_to_ind.get(skid) {
                vec[*i] = *count as f64;
            }
        }
        vec
    }
}

/// Per skeleton, weights over `PairMap::pair_ids`.
pub type ConnectivityVectors = FastMap<u64, Vec<f64>>;

/// Input and output connectivity vectors of every neuron in `nrns`.
///
/// With `normalize_weights`, inputs become a fraction of the neuron's own
/// total inputs and outputs a fraction of each partner's total inputs.
pub fn paired_connectivity_vector<S: NeuronSource + ?Sized>(
    source: &S,
    nrns: &NeuronList,
    pair_map: &PairMap,
    is_mirrored: bool,
    normalize_weights: bool,
) -> (ConnectivityVectors, ConnectivityVectors) {
    let skids = nrns.ids();
    let connected = source.connected_skeletons(&skids);

    let (own_inputs, partner_inputs) = if normalize_weights {
        (source.total_inputs(&skids), source.total_inputs(&pair_map.pair_ids))
    } else {
        (FastMap::default(), FastMap::default())
    };

    let finish = |vec: Vec<f64>| {
        if is_mirrored {
            pair_map.mirror(&vec)
        } else {
            vec
        }
    };

    let mut vecs_in = FastMap::default();
    for (skid, partners) in connected.presynaptic.iter() {
        let mut vec = pair_map.vector(partners);
        if normalize_weights {
            match own_inputs.get(skid) {
                Some(total) if *total > 0 => vec.iter_mut().for_each(|w| *w /= *total as f64),
                _ => debug!(skid, "no inputs to normalize by"),
            }
        }
        vecs_in.insert(*skid, finish(vec));
    }

    let mut vecs_out = FastMap::default();
    for (skid, partners) in connected.postsynaptic.iter() {
        let mut vec = pair_map.vector(partners);
        if normalize_weights {
            for (w, pid) in vec.iter_mut().zip(pair_map.pair_ids.iter()) {
                match partner_inputs.get(pid) {
                    Some(total) if *total > 0 => *w /= *total as f64,
                    _ => *w = 0.0,
                }
            }
        }
        vecs_out.insert(*skid, finish(vec));
    }

    (vecs_in, vecs_out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityProbRow {
    #[serde(rename = "Queries")]
    pub queries: String,
    #[serde(rename = "Targets")]
    pub targets: String,
    pub pre_prob: f64,
    pub post_prob: f64,
}

fn summed_log_ratio(a: Option<&Vec<f64>>, b: Option<&Vec<f64>>, stats: &ConnStats) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(w1, w2)| match_prob_conn_log_ratio(*w1 as usize, *w2 as usize, stats))
            .sum(),
        _ => 0.0,
    }
}

/// Connectivity log-likelihood ratio of every query/target pair, from input
/// (`pre_prob`) and output (`post_prob`) synapse counts onto paired neurons.
/// Rows are in query-major order.
pub fn paired_connectivity_prob<S: NeuronSource + ?Sized>(
    source: &S,
    nrns_q: &NeuronList,
    nrns_t: &NeuronList,
    pair_map: &PairMap,
    conn_stats: &ConnStats,
    is_mirrored: bool,
) -> Vec<ConnectivityProbRow> {
    let (q_in, q_out) = paired_connectivity_vector(source, nrns_q, pair_map, false, false);
    let (t_in, t_out) = paired_connectivity_vector(source, nrns_t, pair_map, is_mirrored, false);

    let mut rows = Vec::with_capacity(nrns_q.len() * nrns_t.len());
    for nrn_q in nrns_q {
        for nrn_t in nrns_t {
            rows.push(ConnectivityProbRow {
                queries: nrn_q.name_number(),
                targets: nrn_t.name_number(),
                pre_prob: summed_log_ratio(q_in.get(&nrn_q.id), t_in.get(&nrn_t.id), conn_stats),
                post_prob: summed_log_ratio(q_out.get(&nrn_q.id), t_out.get(&nrn_t.id), conn_stats),
            });
        }
    }
    rows
}

/// Pearson correlation; NaN if either vector is constant.
pub fn connectivity_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return std::f64::NAN;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return std::f64::NAN;
    }
    cov / (var_a * var_b).sqrt()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCorrelation {
    pub left: u64,
    pub right: u64,
    pub input_correlation: f64,
    pub output_correlation: f64,
}

/// Correlation between the connectivity of each pair's two members, with the
/// right-hand neuron's vector mirrored into the left-hand frame.
pub fn pair_correlations<S: NeuronSource + ?Sized>(
    source: &S,
    nrns: &NeuronList,
    pair_map: &PairMap,
    pairs: &[(u64, u64)],
) -> Vec<PairCorrelation> {
    let (vecs_in, vecs_out) = paired_connectivity_vector(source, nrns, pair_map, false, false);
    let correlate = |vecs: &ConnectivityVectors, left: u64, right: u64| {
        match (vecs.get(&left), vecs.get(&right)) {
            (Some(l), Some(r)) => connectivity_correlation(l, &pair_map.mirror(r)),
            _ => std::f64::NAN,
        }
    };

    pairs
        .iter()
        .map(|(left, right)| PairCorrelation {
            left: *left,
            right: *right,
            input_correlation: correlate(&vecs_in, *left, *right),
            output_correlation: correlate(&vecs_out, *left, *right),
        })
        .collect()
}
