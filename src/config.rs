use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HomologyError, Result};
use crate::likelihood::MorphoStats;

/// How neurons are turned into dotprops and scored against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NblastParams {
    /// Spacing of resampled points, in the skeleton's units (nm)
    pub resample_distance: f64,
    /// Neighbours used to estimate each tangent
    pub num_nn: usize,
    pub min_strahler: Option<i32>,
    pub max_proximity: Option<f64>,
    pub normalize: bool,
    /// Neurons with less cable than this are dropped before scoring
    pub min_length: Option<f64>,
}

impl NblastParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.resample_distance > 0.0 && self.resample_distance.is_finite()) {
            return Err(HomologyError::Parameter(format!(
                "nblast.resample_distance must be positive and finite, got {}",
                self.resample_distance
            )));
        }
        if let Some(min_length) = self.min_length {
            if min_length.is_nan() {
                return Err(HomologyError::Parameter("nblast.min_length is NaN".into()));
            }
        }
        Ok(())
    }
}

impl Default for NblastParams {
    fn default() -> Self {
        NblastParams {
            resample_distance: 1000.0,
            num_nn: 5,
            min_strahler: None,
            max_proximity: None,
            normalize: false,
            min_length: None,
        }
    }
}

/// How synaptic partners are chosen when comparing two neurons' partners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerParams {
    /// Number of the query's strongest partners to consider
    pub ntop_q: usize,
    /// Target partners need more than this fraction of the weakest query connection
    pub kmin_f: f64,
    /// Absolute minimum synapse count for target partners
    pub kmin_t: usize,
    pub normalized: bool,
    pub min_similarity: f64,
    pub contralateral: bool,
}

impl Default for PartnerParams {
    fn default() -> Self {
        PartnerParams {
            ntop_q: 2,
            kmin_f: 0.5,
            kmin_t: 3,
            normalized: false,
            min_similarity: 0.4,
            contralateral: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub nblast: NblastParams,
    pub partners: PartnerParams,
    pub score_matrix: Option<PathBuf>,
    pub morpho: Option<MorphoStats>,
}

impl AnalysisConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.nblast.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| HomologyError::io(path, e))?;
        Self::from_toml_str(&contents)
    }
}
