//! NBLAST morphological similarity between dotprop clouds.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::NblastParams;
use crate::dotprop::{neuron_to_dotprop, Dotprops, PointIndex};
use crate::error::Result;
use crate::matching::SimilarityMatrix;
use crate::neuron::{Neuron, NeuronList};
use crate::score::ScoreMatrixLookup;

/// Distance to the nearest target point and absolute tangent dot product,
/// one entry per query point.
pub type Components = Vec<(f64, f64)>;

fn dot(u: &[f64; 3], v: &[f64; 3]) -> f64 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}

fn components_with_index(
    query: &Dotprops,
    target: &Dotprops,
    target_index: &PointIndex,
    max_proximity: Option<f64>,
) -> Components {
    let max_proximity = max_proximity.unwrap_or(std::f64::INFINITY);
    query
        .points
        .iter()
        .zip(query.tangents.iter())
        .filter_map(|(p, u)| {
            target_index.nearest_one(p).map(|(d, idx)| {
                let udotv = if d > max_proximity {
                    0.0
                } else {
                    dot(u, &target.tangents[idx]).abs()
                };
                (d, udotv)
            })
        })
        .collect()
}

/// Compare every query point to its nearest neighbour in the target.
/// Points farther than `max_proximity` from the target carry no orientation (dot product 0).
pub fn nblast_components(
    query: &Dotprops,
    target: &Dotprops,
    max_proximity: Option<f64>,
) -> Components {
    components_with_index(query, target, &target.index(), max_proximity)
}

pub fn nblast_dist_fun(components: &[(f64, f64)], lookup: &ScoreMatrixLookup) -> f64 {
    components
        .iter()
        .map(|(d, udotv)| lookup.score(*d, *udotv))
        .sum()
}

pub fn nblast_dist_fun_local(components: &[(f64, f64)], lookup: &ScoreMatrixLookup) -> Vec<f64> {
    components
        .iter()
        .map(|(d, udotv)| lookup.score(*d, *udotv))
        .collect()
}

/// Score of a query of `len` points against itself: every distance 0, every dot product 1.
pub fn max_blast_score(len: usize, lookup: &ScoreMatrixLookup) -> f64 {
    len as f64 * lookup.score(0.0, 1.0)
}

fn normalized(raw: f64, len: usize, lookup: &ScoreMatrixLookup) -> f64 {
    raw / max_blast_score(len, lookup)
}

/// Score of a query dotprop against a target. Clouds of one point or fewer score 0.
pub fn nblast_dotprop_pair(
    query: &Dotprops,
    target: &Dotprops,
    target_index: &PointIndex,
    lookup: &ScoreMatrixLookup,
    normalize: bool,
    max_proximity: Option<f64>,
) -> f64 {
    if query.len() <= 1 || target.len() <= 1 {
        return 0.0;
    }
    let components = components_with_index(query, target, target_index, max_proximity);
    let raw = nblast_dist_fun(&components, lookup);
    if normalize {
        normalized(raw, components.len(), lookup)
    } else {
        raw
    }
}

/// NBLAST score of two neurons. `bidirectional` gives the geometric mean of the
/// two normalized directions, each clamped at zero.
pub fn nblast_neuron_pair(
    nrn_q: &Neuron,
    nrn_t: &Neuron,
    lookup: &ScoreMatrixLookup,
    params: &NblastParams,
    bidirectional: bool,
) -> Result<f64> {
    let dp_q = neuron_to_dotprop(nrn_q, params.resample_distance, params.num_nn, params.min_strahler)?;
    let dp_t = neuron_to_dotprop(nrn_t, params.resample_distance, params.num_nn, params.min_strahler)?;

    Ok(if bidirectional {
        let s_qt = nblast_dotprop_pair(&dp_q, &dp_t, &dp_t.index(), lookup, true, params.max_proximity);
        let s_tq = nblast_dotprop_pair(&dp_t, &dp_q, &dp_q.index(), lookup, true, params.max_proximity);
        (s_qt.max(0.0) * s_tq.max(0.0)).sqrt()
    } else {
        nblast_dotprop_pair(&dp_q, &dp_t, &dp_t.index(), lookup, params.normalize, params.max_proximity)
    })
}

/// Query point locations with their pointwise NBLAST score.
pub fn point_cloud_nblast(
    query: &Dotprops,
    target: &Dotprops,
    lookup: &ScoreMatrixLookup,
    max_proximity: Option<f64>,
) -> Vec<[f64; 4]> {
    let components = nblast_components(query, target, max_proximity);
    let local = nblast_dist_fun_local(&components, lookup);
    query
        .points
        .iter()
        .zip(local)
        .map(|(p, s)| [p[0], p[1], p[2], s])
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    #[serde(rename = "Queries")]
    pub queries: String,
    #[serde(rename = "Targets")]
    pub targets: String,
    #[serde(rename = "S")]
    pub s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SomaDistanceRow {
    #[serde(rename = "Queries")]
    pub queries: String,
    #[serde(rename = "Targets")]
    pub targets: String,
    pub soma_distance: f64,
}

/// A labelled dotprop with its spatial index built once.
pub struct PreparedDotprops {
    pub label: String,
    pub dotprops: Dotprops,
    index: PointIndex,
}

impl PreparedDotprops {
    pub fn new(label: String, dotprops: Dotprops) -> Self {
        let index = dotprops.index();
        PreparedDotprops {
            label,
            dotprops,
            index,
        }
    }
}

pub fn prepare_neurons(nrns: &NeuronList, params: &NblastParams) -> Result<Vec<PreparedDotprops>> {
    params.validate()?;
    let neurons: Vec<&Neuron> = nrns.iter().collect();
    neurons
        .par_iter()
        .map(|nrn| {
            let dp = neuron_to_dotprop(nrn, params.resample_distance, params.num_nn, params.min_strahler)?;
            debug!(skid = nrn.id, n_points = dp.len(), "built dotprops");
            Ok(PreparedDotprops::new(nrn.name_number(), dp))
        })
        .collect()
}

/// Score every query against every target, in parallel. Rows are in
/// query-major order.
pub fn nblast_dotprops(
    lookup: &ScoreMatrixLookup,
    queries: &[PreparedDotprops],
    targets: &[PreparedDotprops],
    normalize: bool,
    max_proximity: Option<f64>,
) -> Vec<ScoreRow> {
    let pairs: Vec<(&PreparedDotprops, &PreparedDotprops)> = queries
        .iter()
        .flat_map(|q| targets.iter().map(move |t| (q, t)))
        .collect();

    pairs
        .par_iter()
        .map(|(q, t)| ScoreRow {
            queries: q.label.clone(),
            targets: t.label.clone(),
            s: nblast_dotprop_pair(&q.dotprops, &t.dotprops, &t.index, lookup, normalize, max_proximity),
        })
        .collect()
}

/// All-by-all NBLAST of query neurons against targets (or against themselves).
pub fn nblast_neurons(
    lookup: &ScoreMatrixLookup,
    nrns_q: &NeuronList,
    nrns_t: Option<&NeuronList>,
    params: &NblastParams,
) -> Result<Vec<ScoreRow>> {
    info!(
        n_queries = nrns_q.len(),
        n_targets = nrns_t.map_or(nrns_q.len(), NeuronList::len),
        "running nblast"
    );
    let prepared_q = prepare_neurons(nrns_q, params)?;
    Ok(match nrns_t {
        Some(nrns_t) => {
            let prepared_t = prepare_neurons(nrns_t, params)?;
            nblast_dotprops(lookup, &prepared_q, &prepared_t, params.normalize, params.max_proximity)
        }
        None => nblast_dotprops(lookup, &prepared_q, &prepared_q, params.normalize, params.max_proximity),
    })
}

/// Euclidean distance between somata for every query/target pair.
/// Pairs where either neuron lacks a soma location get NaN.
pub fn soma_distance(nrns_q: &NeuronList, nrns_t: Option<&NeuronList>) -> Vec<SomaDistanceRow> {
    let nrns_t = nrns_t.unwrap_or(nrns_q);
    let mut rows = Vec::with_capacity(nrns_q.len() * nrns_t.len());
    for nrn_q in nrns_q {
        let xyz_q = nrn_q.soma_location();
        for nrn_t in nrns_t {
            let soma_distance = match (xyz_q, nrn_t.soma_location()) {
                (Some(a), Some(b)) => a.distance_to(&b),
                _ => std::f64::NAN,
            };
            rows.push(SomaDistanceRow {
                queries: nrn_q.name_number(),
                targets: nrn_t.name_number(),
                soma_distance,
            });
        }
    }
    rows
}

fn clamped_matrix(rows: &[ScoreRow]) -> SimilarityMatrix {
    SimilarityMatrix::pivot(rows.iter().map(|r| (r.queries.clone(), r.targets.clone(), r.s.max(0.0))))
}

/// Symmetric NBLAST for finding exact matches: the geometric mean of normalized
/// query-to-target and target-to-query scores, negatives clamped to zero.
/// Rows are queries, columns are targets.
pub fn exact_nblast(
    lookup: &ScoreMatrixLookup,
    nrns_q: &NeuronList,
    nrns_t: &NeuronList,
    params: &NblastParams,
) -> Result<SimilarityMatrix> {
    let (nrns_q, nrns_t) = match params.min_length {
        Some(min_length) => (nrns_q.filter_by_length(min_length), nrns_t.filter_by_length(min_length)),
        None => (nrns_q.clone(), nrns_t.clone()),
    };

    let prepared_q = prepare_neurons(&nrns_q, params)?;
    let prepared_t = prepare_neurons(&nrns_t, params)?;

    let s_qt = clamped_matrix(&nblast_dotprops(lookup, &prepared_q, &prepared_t, true, params.max_proximity));
    let s_tq = clamped_matrix(&nblast_dotprops(lookup, &prepared_t, &prepared_q, true, params.max_proximity))
        .transpose();

    Ok(s_qt.combine(&s_tq, |a, b| {
        let s = (a * b).sqrt();
        if s.is_nan() {
            0.0
        } else {
            s
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoreMatrixLookup;

    fn lookup() -> ScoreMatrixLookup {
        // distance bins [0,1), [1,5), [5,inf); dot bins [0,0.5), [0.5,inf)
        ScoreMatrixLookup::new(
            vec![vec![1.0, 2.0], vec![0.0, 0.5], vec![-1.0, -1.0]],
            vec![1.0, 5.0],
            vec![0.5],
        )
        .unwrap()
    }

    fn line(offset: [f64; 3], n: usize, dir: [f64; 3]) -> Dotprops {
        Dotprops {
            points: (0..n)
                .map(|i| {
                    let t = i as f64;
                    [offset[0] + t * dir[0], offset[1] + t * dir[1], offset[2] + t * dir[2]]
                })
                .collect(),
            tangents: vec![dir; n],
        }
    }

    #[test]
    fn identical_clouds_score_max() {
        let dp = line([0.0, 0.0, 0.0], 10, [1.0, 0.0, 0.0]);
        let components = nblast_components(&dp, &dp, None);
        assert!(components.iter().all(|(d, u)| *d == 0.0 && *u == 1.0));
        let s = nblast_dist_fun(&components, &lookup());
        assert_eq!(s, max_blast_score(10, &lookup()));
        let idx = dp.index();
        assert_eq!(nblast_dotprop_pair(&dp, &dp, &idx, &lookup(), true, None), 1.0);
    }

    #[test]
    fn orthogonal_offset_cloud() {
        let q = line([0.0, 0.0, 0.0], 4, [1.0, 0.0, 0.0]);
        let t = line([0.0, 2.0, 0.0], 4, [0.0, 0.0, 1.0]);
        let components = nblast_components(&q, &t, None);
        for (d, u) in components.iter() {
            assert!(*d >= 2.0 && *d < 5.0);
            assert_eq!(*u, 0.0);
        }
        assert_eq!(nblast_dist_fun(&components, &lookup()), 0.0);
    }

    #[test]
    fn anti_parallel_tangents_match() {
        let q = line([0.0, 0.0, 0.0], 5, [1.0, 0.0, 0.0]);
        let mut t = q.clone();
        for tangent in t.tangents.iter_mut() {
            *tangent = [-1.0, 0.0, 0.0];
        }
        let components = nblast_components(&q, &t, None);
        assert!(components.iter().all(|(_, u)| *u == 1.0));
    }

    #[test]
    fn max_proximity_drops_orientation() {
        let q = line([0.0, 0.0, 0.0], 3, [1.0, 0.0, 0.0]);
        let t = line([0.0, 3.0, 0.0], 3, [1.0, 0.0, 0.0]);
        let near = nblast_components(&q, &t, Some(10.0));
        let far = nblast_components(&q, &t, Some(1.0));
        assert!(near.iter().all(|(_, u)| *u == 1.0));
        assert!(far.iter().all(|(_, u)| *u == 0.0));
    }

    #[test]
    fn tiny_clouds_score_zero() {
        let q = line([0.0, 0.0, 0.0], 1, [1.0, 0.0, 0.0]);
        let t = line([0.0, 0.0, 0.0], 5, [1.0, 0.0, 0.0]);
        assert_eq!(nblast_dotprop_pair(&q, &t, &t.index(), &lookup(), false, None), 0.0);
        assert_eq!(nblast_dotprop_pair(&t, &q, &q.index(), &lookup(), false, None), 0.0);
    }

    #[test]
    fn point_cloud_scores() {
        let q = line([0.0, 0.0, 0.0], 3, [1.0, 0.0, 0.0]);
        let out = point_cloud_nblast(&q, &q, &lookup(), None);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], [2.0, 0.0, 0.0, 2.0]);
    }
}
