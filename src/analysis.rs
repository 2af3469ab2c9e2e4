//! Studies over known homologous pairs: which scored pairs are true matches,
//! and fitting the match models to them.

use std::path::Path;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use statrs::function::gamma::digamma;
use tracing::{debug, info, warn};

use crate::connectivity::{paired_connectivity_vector, PairMap};
use crate::error::{HomologyError, Result};
use crate::homology::LikelihoodRow;
use crate::likelihood::{ConnStats, KdeMorphoModel, MorphoStats};
use crate::nblast::ScoreRow;
use crate::neuron::{name_number_to_id, NeuronList};
use crate::source::NeuronSource;
use crate::utils::{load_json, FastMap, FastSet};

const SIDE_SUFFIXES: [&str; 6] = [" left", " right", "_left", "_right", " l", " r"];

fn side_agnostic_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    for suffix in SIDE_SUFFIXES.iter() {
        if let Some(stripped) = lower.strip_suffix(suffix) {
            return stripped.trim_end().to_owned();
        }
    }
    lower
}

/// Known (left, right) homologous pairs of skeleton IDs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomologyPairs {
    pub pairs: Vec<(u64, u64)>,
}

impl HomologyPairs {
    pub fn new(pairs: Vec<(u64, u64)>) -> Self {
        HomologyPairs { pairs }
    }

    /// Parse `[[left, right], ...]`.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }

    /// Pair neurons annotated `left_annotation` with those annotated
    /// `right_annotation` whose names agree once any side suffix is removed.
    /// Names that occur more than once on a side are ambiguous and skipped.
    pub fn from_annotations<S: NeuronSource + ?Sized>(
        source: &S,
        left_annotation: &str,
        right_annotation: &str,
    ) -> Result<Self> {
        let left = source.neurons_with_annotation(left_annotation)?;
        let right = source.neurons_with_annotation(right_annotation)?;

        let by_name = |nrns: &NeuronList| {
            let mut map: FastMap<String, Vec<u64>> = FastMap::default();
            for nrn in nrns {
                map.entry(side_agnostic_name(&nrn.name))
                    .or_insert_with(Vec::new)
                    .push(nrn.id);
            }
            map
        };
        let right_names = by_name(&right);

        let mut pairs = Vec::new();
        let mut left_names: Vec<(String, Vec<u64>)> = by_name(&left).into_iter().collect();
        left_names.sort();
        for (name, left_ids) in left_names {
            match (left_ids.as_slice(), right_names.get(&name).map(Vec::as_slice)) {
                ([l], Some([r])) => pairs.push((*l, *r)),
                (_, None) => debug!(name = %name, "no right-hand partner"),
                _ => warn!(name = %name, "ambiguous name, not paired"),
            }
        }
        info!(n_pairs = pairs.len(), left_annotation, right_annotation, "paired by name");
        Ok(HomologyPairs { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Drop pairs where either skeleton is not in `nrns`.
    pub fn retain_present(&mut self, nrns: &NeuronList) {
        let before = self.pairs.len();
        self.pairs
            .retain(|(l, r)| nrns.get(*l).is_some() && nrns.get(*r).is_some());
        if self.pairs.len() < before {
            warn!(dropped = before - self.pairs.len(), "pairs with missing skeletons");
        }
    }

    pub fn lefts(&self) -> Vec<u64> {
        self.pairs.iter().map(|p| p.0).collect()
    }

    pub fn rights(&self) -> Vec<u64> {
        self.pairs.iter().map(|p| p.1).collect()
    }

    pub fn pair_map(&self) -> PairMap {
        PairMap::from_pairs(&self.pairs)
    }

    /// Either orientation.
    pub fn contains(&self, a: u64, b: u64) -> bool {
        self.pairs.iter().any(|p| *p == (a, b) || *p == (b, a))
    }
}

/// A scored query/target row.
pub trait PairedRow {
    fn labels(&self) -> (&str, &str);
}

impl PairedRow for ScoreRow {
    fn labels(&self) -> (&str, &str) {
        (&self.queries, &self.targets)
    }
}

impl PairedRow for LikelihoodRow {
    fn labels(&self) -> (&str, &str) {
        (&self.queries, &self.targets)
    }
}

/// Split rows into those whose query and target form a known pair, and the rest.
/// A neuron scored against itself is neither, and is dropped.
pub fn pair_observations<T: PairedRow + Clone>(
    rows: &[T],
    pairs: &HomologyPairs,
) -> Result<(Vec<T>, Vec<T>)> {
    let known: FastSet<(u64, u64)> = pairs
        .pairs
        .iter()
        .flat_map(|&(l, r)| vec![(l, r), (r, l)])
        .collect();

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for row in rows {
        let (q, t) = row.labels();
        let key = (name_number_to_id(q)?, name_number_to_id(t)?);
        if key.0 == key.1 {
            continue;
        }
        if known.contains(&key) {
            matched.push(row.clone());
        } else {
            unmatched.push(row.clone());
        }
    }
    Ok((matched, unmatched))
}

fn logistic(x: f64, p: &Vector3<f64>) -> f64 {
    p[0] / (1.0 + (-p[1] * (x - p[2])).exp())
}

fn sum_sq_residuals(x: &[f64], y: &[f64], p: &Vector3<f64>) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(xi, yi)| (logistic(*xi, p) - yi).powi(2))
        .sum()
}

const LM_MAX_ITER: usize = 500;
const LM_TOL: f64 = 1e-12;

/// Least-squares fit of `a / (1 + exp(-b (x - c)))` by Levenberg-Marquardt.
pub fn fit_logistic(x: &[f64], y: &[f64]) -> Result<[f64; 3]> {
    if x.len() != y.len() {
        return Err(HomologyError::Fit("x and y differ in length".into()));
    }
    if x.len() < 3 {
        return Err(HomologyError::Fit("need at least 3 points".into()));
    }

    let x_min = x.iter().cloned().fold(std::f64::INFINITY, f64::min);
    let x_max = x.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
    let y_max = y.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
    let span = if x_max > x_min { x_max - x_min } else { 1.0 };
    let mut p = Vector3::new(
        if y_max > 0.0 { y_max } else { 1.0 },
        10.0 / span,
        x.iter().sum::<f64>() / x.len() as f64,
    );

    let mut lambda = 1e-3;
    let mut cost = sum_sq_residuals(x, y, &p);
    for iter in 0..LM_MAX_ITER {
        let mut jtj = Matrix3::zeros();
        let mut jtr = Vector3::zeros();
        for (xi, yi) in x.iter().zip(y.iter()) {
            let e = (-p[1] * (xi - p[2])).exp();
            let denom = 1.0 + e;
            let j = Vector3::new(
                1.0 / denom,
                p[0] * e * (xi - p[2]) / denom.powi(2),
                -p[0] * e * p[1] / denom.powi(2),
            );
            jtj += j * j.transpose();
            jtr += j * (logistic(*xi, &p) - yi);
        }

        let mut damped = jtj;
        for i in 0..3 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
        }
        let step = match damped.try_inverse() {
            Some(inv) => -(inv * jtr),
            None => return Err(HomologyError::Fit("singular normal equations".into())),
        };

        let candidate = p + step;
        let new_cost = sum_sq_residuals(x, y, &candidate);
        if new_cost.is_finite() && new_cost < cost {
            let improvement = cost - new_cost;
            p = candidate;
            cost = new_cost;
            lambda = (lambda / 10.0).max(1e-12);
            if improvement < LM_TOL * (1.0 + cost) && step.norm() < 1e-9 * (1.0 + p.norm()) {
                debug!(iter, cost, "logistic fit converged");
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                debug!(iter, cost, "logistic fit stalled");
                break;
            }
        }
    }

    if p.iter().any(|v| !v.is_finite()) {
        return Err(HomologyError::Fit("logistic fit diverged".into()));
    }
    Ok([p[0], p[1], p[2]])
}

/// Fit the logistic to the fraction of matched pairs in each of `bins`
/// equal-width similarity bins. Empty bins are skipped.
pub fn fit_logistic_match_fraction(s_match: &[f64], s_nonmatch: &[f64], bins: usize) -> Result<[f64; 3]> {
    let all = s_match.iter().chain(s_nonmatch.iter()).filter(|s| s.is_finite());
    let lo = all.clone().cloned().fold(std::f64::INFINITY, f64::min);
    let hi = all.cloned().fold(std::f64::NEG_INFINITY, f64::max);
    if bins == 0 || !(hi > lo) {
        return Err(HomologyError::Fit("similarities span no range".into()));
    }
    let width = (hi - lo) / bins as f64;
    let bin_of = |s: f64| (((s - lo) / width) as usize).min(bins - 1);

    let mut n_match = vec![0usize; bins];
    let mut n_nonmatch = vec![0usize; bins];
    for s in s_match.iter().filter(|s| s.is_finite()) {
        n_match[bin_of(*s)] += 1;
    }
    for s in s_nonmatch.iter().filter(|s| s.is_finite()) {
        n_nonmatch[bin_of(*s)] += 1;
    }

    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in 0..bins {
        let total = n_match[i] + n_nonmatch[i];
        if total > 0 {
            x.push(lo + (i as f64 + 0.5) * width);
            y.push(n_match[i] as f64 / total as f64);
        }
    }
    fit_logistic(&x, &y)
}

/// Maximum-likelihood gamma fit with location fixed at 0, as (shape, 0, scale).
pub fn fit_gamma(samples: &[f64]) -> Result<[f64; 3]> {
    if samples.iter().any(|x| !(*x > 0.0) || !x.is_finite()) {
        return Err(HomologyError::Fit("gamma samples must be positive".into()));
    }
    if samples.len() < 2 {
        return Err(HomologyError::Fit("need at least 2 samples".into()));
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let mean_ln = samples.iter().map(|x| x.ln()).sum::<f64>() / n;
    let s = mean.ln() - mean_ln;
    if !(s > 0.0) {
        return Err(HomologyError::Fit("gamma samples are all equal".into()));
    }

    // ln(k) - digamma(k) decreases from +inf to 0, so bisect on log k
    let f = |k: f64| k.ln() - digamma(k) - s;
    let mut lo: f64 = 1e-8;
    let mut hi: f64 = 1e8;
    for _ in 0..200 {
        let mid = (lo * hi).sqrt();
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi / lo < 1.0 + 1e-12 {
            break;
        }
    }
    let shape = (lo * hi).sqrt();
    Ok([shape, 0.0, mean / shape])
}

fn usable_distances<'a, I: IntoIterator<Item = &'a LikelihoodRow>>(rows: I) -> Vec<f64> {
    rows.into_iter()
        .map(|r| r.soma_distance)
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect()
}

/// Fit the morphological model from matched and unmatched pair rows.
pub fn fit_morpho_stats(
    matched: &[LikelihoodRow],
    unmatched: &[LikelihoodRow],
    exp_cutoff: [f64; 2],
    bins: usize,
) -> Result<MorphoStats> {
    info!(n_matched = matched.len(), n_unmatched = unmatched.len(), "fitting morphology model");
    let s_match: Vec<f64> = matched.iter().map(|r| r.sbid).collect();
    let s_nonmatch: Vec<f64> = unmatched.iter().map(|r| r.sbid).collect();
    Ok(MorphoStats {
        shape: fit_logistic_match_fraction(&s_match, &s_nonmatch, bins)?,
        dist_match: fit_gamma(&usable_distances(matched))?,
        dist_nonmatch: fit_gamma(&usable_distances(unmatched))?,
        exp_cutoff,
    })
}

/// Fit the kernel density alternative to `MorphoStats`, over (soma distance, Sbid).
pub fn fit_kde_morpho(matched: &[LikelihoodRow], unmatched: &[LikelihoodRow]) -> Result<KdeMorphoModel> {
    let points = |rows: &[LikelihoodRow]| -> Vec<Vec<f64>> {
        rows.iter()
            .filter(|r| r.soma_distance.is_finite())
            .map(|r| vec![r.soma_distance, r.sbid])
            .collect()
    };
    Ok(KdeMorphoModel {
        matched: GaussianKde::new(points(matched))?,
        unmatched: GaussianKde::new(points(unmatched))?,
    })
}

fn weight_histogram(vectors: &[(Vec<f64>, Vec<f64>)], max_weight: usize) -> Vec<Vec<f64>> {
    let n = max_weight + 1;
    // pseudocount of one in every cell
    let mut hist = vec![vec![1.0; n]; n];
    for (a, b) in vectors {
        for (w1, w2) in a.iter().zip(b.iter()) {
            let i = (*w1 as usize).min(max_weight);
            let j = (*w2 as usize).min(max_weight);
            hist[i][j] += 1.0;
        }
    }
    let total: f64 = hist.iter().flatten().sum();
    hist.iter_mut().flatten().for_each(|v| *v /= total);
    hist
}

/// Tabulate how often each pair of synapse counts occurs between matched and
/// between unmatched neurons' paired connectivity vectors, and store
/// log2(P(match) / P(non-match)) per cell.
pub fn train_conn_stats(
    matched_vectors: &[(Vec<f64>, Vec<f64>)],
    unmatched_vectors: &[(Vec<f64>, Vec<f64>)],
    max_weight: usize,
) -> ConnStats {
    let p_match = weight_histogram(matched_vectors, max_weight);
    let p_nonmatch = weight_histogram(unmatched_vectors, max_weight);
    let log_ratio = p_match
        .iter()
        .zip(p_nonmatch.iter())
        .map(|(m, n)| m.iter().zip(n.iter()).map(|(a, b)| a.log2() - b.log2()).collect())
        .collect();
    ConnStats {
        log_ratio,
        ..ConnStats::default()
    }
}

pub type VectorPairs = Vec<(Vec<f64>, Vec<f64>)>;

/// Input and output connectivity vectors of every left/right combination of
/// paired neurons, split into known pairs and the rest. Right-hand vectors are
/// mirrored to line up with the left. Every paired skeleton must be in `source`.
pub fn conn_training_vectors<S: NeuronSource + ?Sized>(
    source: &S,
    pairs: &HomologyPairs,
) -> Result<(VectorPairs, VectorPairs)> {
    let pair_map = pairs.pair_map();
    let lefts = pairs.lefts();
    let rights = pairs.rights();
    let (in_l, out_l) =
        paired_connectivity_vector(source, &NeuronList::from_id_list(&lefts, source)?, &pair_map, false, false);
    let (in_r, out_r) =
        paired_connectivity_vector(source, &NeuronList::from_id_list(&rights, source)?, &pair_map, true, false);

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for l in lefts.iter() {
        for r in rights.iter() {
            let out = if pairs.contains(*l, *r) {
                &mut matched
            } else {
                &mut unmatched
            };
            for (a, b) in [(&in_l, &in_r), (&out_l, &out_r)].iter() {
                if let (Some(va), Some(vb)) = (a.get(l), b.get(r)) {
                    out.push((va.clone(), vb.clone()));
                }
            }
        }
    }
    debug!(n_matched = matched.len(), n_unmatched = unmatched.len(), "collected connectivity vectors");
    Ok((matched, unmatched))
}

/// Multivariate Gaussian kernel density estimate, bandwidth by Scott's rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianKde {
    points: Vec<Vec<f64>>,
    inv_cov: Vec<Vec<f64>>,
    norm: f64,
}

impl GaussianKde {
    pub fn new(points: Vec<Vec<f64>>) -> Result<Self> {
        let n = points.len();
        let d = points.first().map_or(0, Vec::len);
        if n < 2 || d == 0 {
            return Err(HomologyError::Fit("kde needs at least 2 points".into()));
        }
        if points.iter().any(|p| p.len() != d) {
            return Err(HomologyError::Fit("kde points differ in dimension".into()));
        }

        let data = DMatrix::from_fn(n, d, |r, c| points[r][c]);
        let mean: DVector<f64> = DVector::from_fn(d, |c, _| data.column(c).mean());
        let mut cov = DMatrix::zeros(d, d);
        for row in data.row_iter() {
            let centred = row.transpose() - &mean;
            cov += &centred * centred.transpose();
        }
        cov /= (n - 1) as f64;

        let factor = (n as f64).powf(-1.0 / (d as f64 + 4.0));
        let kernel_cov = cov * factor.powi(2);
        let det = kernel_cov.determinant();
        let inv = match kernel_cov.try_inverse() {
            Some(inv) if det > 0.0 => inv,
            _ => return Err(HomologyError::Fit("kde data covariance is singular".into())),
        };

        let norm = ((2.0 * std::f64::consts::PI).powi(d as i32) * det).sqrt() * n as f64;
        let inv_cov = (0..d).map(|r| (0..d).map(|c| inv[(r, c)]).collect()).collect();
        Ok(GaussianKde { points, inv_cov, norm })
    }

    pub fn dimension(&self) -> usize {
        self.inv_cov.len()
    }

    /// Density at `x`.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let d = self.dimension();
        let mut total = 0.0;
        let mut diff = vec![0.0; d];
        for p in self.points.iter() {
            for k in 0..d {
                diff[k] = x[k] - p[k];
            }
            let mut mahalanobis = 0.0;
            for r in 0..d {
                for c in 0..d {
                    mahalanobis += diff[r] * self.inv_cov[r][c] * diff[c];
                }
            }
            total += (-0.5 * mahalanobis).exp();
        }
        total / self.norm
    }
}
