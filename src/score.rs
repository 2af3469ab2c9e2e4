use crate::error::{HomologyError, Result};

/// A score matrix as exported from R/nat.nblast: rows are distance intervals,
/// columns are dot-product intervals, both labelled like `"(0,0.75]"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

/// Look up NBLAST scores by bisecting interval boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMatrixLookup {
    mat: Vec<Vec<f64>>,
    d_bounds: Vec<f64>,
    udotv_bounds: Vec<f64>,
}

/// Lower bound of an interval label `"(lo,hi]"`.
fn interval_lower_bound(label: &str) -> Result<f64> {
    let err = || HomologyError::ScoreTable(format!("bad interval label {:?}", label));
    let inner = label
        .trim()
        .strip_prefix(|c: char| c == '(' || c == '[')
        .and_then(|l| l.strip_suffix(|c: char| c == ']' || c == ')'))
        .ok_or_else(err)?;
    inner
        .split(',')
        .next()
        .ok_or_else(err)?
        .trim()
        .parse()
        .map_err(|_| err())
}

/// Inner boundaries between consecutive intervals; the first lower bound is dropped.
fn interval_boundaries(labels: &[String]) -> Result<Vec<f64>> {
    let lows = labels
        .iter()
        .map(|l| interval_lower_bound(l))
        .collect::<Result<Vec<f64>>>()?;
    Ok(lows.into_iter().skip(1).collect())
}

fn bisect_right(bounds: &[f64], value: f64) -> usize {
    bounds.partition_point(|b| *b <= value)
}

impl ScoreMatrixLookup {
    /// `d_bounds` and `udotv_bounds` are the inner boundaries, one fewer than rows and columns.
    pub fn new(mat: Vec<Vec<f64>>, d_bounds: Vec<f64>, udotv_bounds: Vec<f64>) -> Result<Self> {
        if mat.is_empty() {
            return Err(HomologyError::ScoreTable("empty matrix".to_owned()));
        }
        if mat.len() != d_bounds.len() + 1 {
            return Err(HomologyError::ScoreTable(format!(
                "{} rows but {} distance boundaries",
                mat.len(),
                d_bounds.len()
            )));
        }
        for row in mat.iter() {
            if row.len() != udotv_bounds.len() + 1 {
                return Err(HomologyError::ScoreTable(format!(
                    "row of {} columns but {} dot-product boundaries",
                    row.len(),
                    udotv_bounds.len()
                )));
            }
        }
        Ok(ScoreMatrixLookup {
            mat,
            d_bounds,
            udotv_bounds,
        })
    }

    pub fn from_table(table: ScoreTable) -> Result<Self> {
        let d_bounds = interval_boundaries(&table.row_labels)?;
        let udotv_bounds = interval_boundaries(&table.col_labels)?;
        Self::new(table.values, d_bounds, udotv_bounds)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let table: ScoreTable = serde_json::from_str(s)?;
        Self::from_table(table)
    }

    pub fn score(&self, d: f64, udotv: f64) -> f64 {
        let ind_d = bisect_right(&self.d_bounds, d);
        let ind_udotv = bisect_right(&self.udotv_bounds, udotv);
        self.mat[ind_d][ind_udotv]
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.mat.len(), self.mat[0].len())
    }
}
