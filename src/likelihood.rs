//! Log-odds that a query/target pair is a true homologous match, from
//! morphology (NBLAST similarity, soma distance) and paired connectivity.

use statrs::distribution::{Continuous, Gamma, LogNormal};

use std::path::Path;

use crate::analysis::GaussianKde;
use crate::error::{HomologyError, Result};
use crate::utils::load_json;

/// Parameters of the morphological match model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphoStats {
    /// Logistic `a / (1 + exp(-b (S - c)))` over bidirectional NBLAST
    pub shape: [f64; 3],
    /// Gamma (shape, loc, scale) of soma distances between matched pairs
    pub dist_match: [f64; 3],
    /// Gamma (shape, loc, scale) of soma distances between unmatched pairs
    pub dist_nonmatch: [f64; 3],
    /// (amplitude, length) of the exponential penalty on very close somata
    pub exp_cutoff: [f64; 2],
}

/// Gamma density with (shape, loc, scale) parameters.
pub fn gamma_pdf(x: f64, param: &[f64; 3]) -> Result<f64> {
    let dist = Gamma::new(param[0], 1.0 / param[2])?;
    Ok(dist.pdf(x - param[1]))
}

/// Log-normal density with (s, loc, scale) parameters.
pub fn lognorm_pdf(x: f64, param: &[f64; 3]) -> Result<f64> {
    let dist = LogNormal::new(param[2].ln(), param[0])?;
    Ok(dist.pdf(x - param[1]))
}

fn log_odds(p: f64) -> f64 {
    p.log2() - (1.0 - p).log2()
}

/// Log2 odds of a match given NBLAST similarity, from the fitted logistic.
pub fn logistic_ratio(x: f64, shape: &[f64; 3]) -> f64 {
    let p = shape[0] / (1.0 + (-shape[1] * (x - shape[2])).exp());
    log_odds(p)
}

/// Log2 odds of a match given soma distance. Matched and unmatched distances
/// are each gamma distributed, and very close somata are penalised by an
/// exponential cutoff.
pub fn gamma_ratio(
    x: f64,
    match_param: &[f64; 3],
    nonmatch_param: &[f64; 3],
    exp_param: &[f64; 2],
) -> Result<f64> {
    let num = gamma_pdf(x, match_param)?;
    let denom = gamma_pdf(x, nonmatch_param)?;
    let p = num / (num + denom) * (1.0 - exp_param[0] * (-x / exp_param[1]).exp());
    Ok(log_odds(p))
}

/// Morphological log2 odds; an undefined distance term counts as 1.
pub fn match_prob_morpho_log_ratio(s: f64, d: f64, stats: &MorphoStats) -> Result<f64> {
    let s_prob = logistic_ratio(s, &stats.shape);
    let mut d_prob = gamma_ratio(d, &stats.dist_match, &stats.dist_nonmatch, &stats.exp_cutoff)?;
    if d_prob.is_nan() {
        d_prob = 1.0;
    }
    Ok(s_prob + d_prob)
}

/// Trained statistics of synaptic weights between paired partners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnStats {
    /// log2(P(w1, w2 | match) / P(w1, w2 | non-match)), indexed by synapse counts
    pub log_ratio: Vec<Vec<f64>>,
    #[serde(default)]
    pub percentiles: Vec<f64>,
    /// Log-normal (s, loc, scale) of normalized weights
    #[serde(default)]
    pub freq_param: Option<[f64; 3]>,
    /// Gamma (shape, loc, scale) of |w1 - w2| per percentile bin of the mean weight
    #[serde(default)]
    pub var_param: Vec<[f64; 3]>,
}

impl ConnStats {
    /// The log ratio table must be empty or a non-empty rectangle.
    pub fn validate(&self) -> Result<()> {
        let n1 = match self.log_ratio.first() {
            Some(row) => row.len(),
            None => return Ok(()),
        };
        if n1 == 0 {
            return Err(HomologyError::ConnTable("log_ratio has empty rows".into()));
        }
        if let Some((i, row)) = self.log_ratio.iter().enumerate().find(|(_, r)| r.len() != n1) {
            return Err(HomologyError::ConnTable(format!(
                "log_ratio row {} has {} columns, expected {}",
                i,
                row.len(),
                n1
            )));
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stats: ConnStats = load_json(path)?;
        stats.validate()?;
        Ok(stats)
    }
}

/// Log2 ratio for one pair of integer synapse counts. Zero when neither side
/// connects. Counts past the end of the table are shifted down together until
/// the larger overflow sits on the last index.
pub fn match_prob_conn_log_ratio(w1: usize, w2: usize, stats: &ConnStats) -> f64 {
    if w1 == 0 && w2 == 0 {
        return 0.0;
    }
    let n0 = stats.log_ratio.len();
    let n1 = stats.log_ratio.first().map_or(0, Vec::len);
    if n0 == 0 || n1 == 0 {
        return 0.0;
    }

    let over1 = w1.saturating_sub(n0 - 1);
    let over2 = w2.saturating_sub(n1 - 1);
    let shift = over1.max(over2);
    let w1 = w1.saturating_sub(shift);
    let w2 = w2.saturating_sub(shift);
    stats
        .log_ratio
        .get(w1)
        .and_then(|row| row.get(w2))
        .copied()
        .unwrap_or(0.0)
}

fn percentile_bin(value: f64, percentiles: &[f64]) -> usize {
    let n_bins = percentiles.len().saturating_sub(1).max(1);
    let above = percentiles.partition_point(|p| *p <= value);
    above.saturating_sub(1).min(n_bins - 1)
}

/// Log2 ratio for normalized weights: the match model draws the mean weight
/// from the frequency distribution and the difference from a gamma chosen by
/// the mean's percentile bin; the non-match model draws both independently.
pub fn match_prob_conn_normalized_log_ratio(w1: f64, w2: f64, stats: &ConnStats) -> Result<f64> {
    if !(w1 > 0.0 || w2 > 0.0) {
        return Ok(0.0);
    }
    let freq_param = match stats.freq_param {
        Some(p) => p,
        None => return Ok(0.0),
    };
    if stats.var_param.is_empty() {
        return Ok(0.0);
    }

    let wmean = (w1 + w2) / 2.0;
    let bin = percentile_bin(wmean, &stats.percentiles).min(stats.var_param.len() - 1);
    let p_match = lognorm_pdf(wmean, &freq_param)? * gamma_pdf((w1 - w2).abs(), &stats.var_param[bin])?;
    let p_nonmatch = lognorm_pdf(w1, &freq_param)? * lognorm_pdf(w2, &freq_param)?;
    Ok(p_match.log2() - p_nonmatch.log2())
}

/// Alternative morphological model: kernel density estimates of
/// (soma distance, similarity) for matched and for unmatched pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdeMorphoModel {
    pub matched: GaussianKde,
    pub unmatched: GaussianKde,
}

impl KdeMorphoModel {
    pub fn log_ratio(&self, s: f64, d: f64) -> f64 {
        let point = [d, s];
        self.matched.evaluate(&point).log2() - (self.unmatched.evaluate(&point) + std::f64::EPSILON).log2()
    }
}
