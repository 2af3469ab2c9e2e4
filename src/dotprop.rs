//! Point-and-tangent ("dotprop") representations of neurons.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::error::{HomologyError, Result};
use crate::neuron::Neuron;
use crate::utils::FastSet;

type Tree = ImmutableKdTree<f64, u64, 3, 32>;

/// Nearest-neighbour index over a fixed point cloud.
///
/// Coincident points are indexed once, under the first of their indices;
/// the tree cannot split a bucket of identical points.
pub struct PointIndex {
    tree: Option<Tree>,
    /// Index into the original points of each indexed point
    original: Vec<usize>,
}

impl PointIndex {
    pub fn new(points: &[[f64; 3]]) -> Self {
        let mut seen: FastSet<[u64; 3]> = FastSet::default();
        let mut unique = Vec::with_capacity(points.len());
        let mut original = Vec::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            // -0.0 and 0.0 are the same location
            let key = [(p[0] + 0.0).to_bits(), (p[1] + 0.0).to_bits(), (p[2] + 0.0).to_bits()];
            if seen.insert(key) {
                unique.push(*p);
                original.push(i);
            }
        }
        if unique.len() < points.len() {
            debug!(n_points = points.len(), n_unique = unique.len(), "indexing coincident points once");
        }

        let tree = if unique.is_empty() {
            None
        } else {
            Some(Tree::new_from_slice(&unique))
        };
        PointIndex { tree, original }
    }

    /// Distance to and index of the nearest point.
    pub fn nearest_one(&self, query: &[f64; 3]) -> Option<(f64, usize)> {
        self.tree.as_ref().map(|t| {
            let nn = t.nearest_one::<SquaredEuclidean>(query);
            (nn.distance.sqrt(), self.original[nn.item as usize])
        })
    }

    /// Indices of the `qty` nearest points, nearest first.
    pub fn nearest_n(&self, query: &[f64; 3], qty: usize) -> Vec<usize> {
        match (self.tree.as_ref(), std::num::NonZeroUsize::new(qty)) {
            (Some(t), Some(qty)) => t
                .nearest_n::<SquaredEuclidean>(query, qty)
                .into_iter()
                .map(|nn| self.original[nn.item as usize])
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dotprops {
    pub points: Vec<[f64; 3]>,
    pub tangents: Vec<[f64; 3]>,
}

impl Dotprops {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn append(&mut self, other: &mut Dotprops) {
        self.points.append(&mut other.points);
        self.tangents.append(&mut other.tangents);
    }

    pub fn index(&self) -> PointIndex {
        PointIndex::new(&self.points)
    }
}

fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    let i = xp.partition_point(|v| *v <= x) - 1;
    let span = xp[i + 1] - xp[i];
    if span <= 0.0 {
        return fp[i];
    }
    fp[i] + (x - xp[i]) / span * (fp[i + 1] - fp[i])
}

fn check_resample_distance(resample_distance: f64) -> Result<()> {
    if resample_distance > 0.0 && resample_distance.is_finite() {
        Ok(())
    } else {
        Err(HomologyError::Parameter(format!(
            "resample distance must be positive and finite, got {}",
            resample_distance
        )))
    }
}

/// Evenly resample an ordered path. The number of points is the cable length
/// over `resample_distance`, rounded to nearest but never less than one.
pub fn interpolate_path(xyz: &[[f64; 3]], resample_distance: f64) -> Result<Vec<[f64; 3]>> {
    check_resample_distance(resample_distance)?;
    if xyz.is_empty() {
        return Ok(Vec::new());
    }

    let mut cumlen = Vec::with_capacity(xyz.len());
    cumlen.push(0.0);
    for pair in xyz.windows(2) {
        let d = ((pair[1][0] - pair[0][0]).powi(2)
            + (pair[1][1] - pair[0][1]).powi(2)
            + (pair[1][2] - pair[0][2]).powi(2))
        .sqrt();
        let prev = *cumlen.last().unwrap_or(&0.0);
        cumlen.push(prev + d);
    }
    let total = *cumlen.last().unwrap_or(&0.0);
    if !total.is_finite() {
        return Err(HomologyError::Parameter("path has non-finite coordinates".into()));
    }

    let ratio = total / resample_distance;
    if !ratio.is_finite() {
        return Err(HomologyError::Parameter(format!(
            "cannot resample a path of length {} every {}",
            total, resample_distance
        )));
    }
    let whole = ratio.trunc();
    let frac = ratio - whole;
    let n = if whole < 1.0 {
        1
    } else if frac < 0.5 {
        whole as usize
    } else {
        whole as usize + 1
    };

    let coords: Vec<Vec<f64>> = (0..3)
        .map(|dim| xyz.iter().map(|p| p[dim]).collect())
        .collect();

    Ok((0..n)
        .map(|i| {
            let l = if n == 1 {
                0.0
            } else {
                total * i as f64 / (n - 1) as f64
            };
            [
                interp(l, &cumlen, &coords[0]),
                interp(l, &cumlen, &coords[1]),
                interp(l, &cumlen, &coords[2]),
            ]
        })
        .collect())
}

/// Unit vector along the first principal axis of a set of points.
fn principal_direction(points: &[[f64; 3]]) -> [f64; 3] {
    let n = points.len() as f64;
    let mut mean = Vector3::zeros();
    for p in points {
        mean += Vector3::new(p[0], p[1], p[2]);
    }
    mean /= n;

    let mut cov = Matrix3::zeros();
    for p in points {
        let c = Vector3::new(p[0], p[1], p[2]) - mean;
        cov += c * c.transpose();
    }

    let eigen = cov.symmetric_eigen();
    let v = eigen.eigenvectors.column(eigen.eigenvalues.imax()).into_owned();
    [v[0], v[1], v[2]]
}

/// Resample a path and attach to each point the local tangent, estimated from
/// its `num_nn` nearest resampled neighbours.
pub fn dotprop_path(xyz: &[[f64; 3]], resample_distance: f64, num_nn: usize) -> Result<Dotprops> {
    let points = interpolate_path(xyz, resample_distance)?;
    let index = PointIndex::new(&points);
    // +1 because the point itself is returned
    let qty = (num_nn + 1).min(points.len());

    let tangents = points
        .iter()
        .map(|p| {
            let neighbours: Vec<[f64; 3]> = index
                .nearest_n(p, qty)
                .into_iter()
                .map(|i| points[i])
                .collect();
            principal_direction(&neighbours)
        })
        .collect();

    Ok(Dotprops { points, tangents })
}

/// Dotprops for a whole neuron, built path by path so that branch points are kept.
///
/// `min_strahler` prunes low-order branches first: a positive value keeps nodes
/// of at least that Strahler number, zero or a negative value is taken relative
/// to the neuron's highest Strahler number.
pub fn neuron_to_dotprop(
    nrn: &Neuron,
    resample_distance: f64,
    num_nn: usize,
    min_strahler: Option<i32>,
) -> Result<Dotprops> {
    check_resample_distance(resample_distance)?;
    let mut paths = nrn.minimal_paths();

    if let Some(min_strahler) = min_strahler {
        let sn = nrn.strahler_number();
        let max_sn = sn.values().cloned().max().unwrap_or(0) as i32;
        if min_strahler > max_sn {
            debug!(skid = nrn.id, min_strahler, max_sn, "pruned to nothing");
            return Ok(Dotprops::default());
        }
        let threshold = if min_strahler > 0 {
            min_strahler
        } else {
            max_sn + min_strahler
        };
        for path in paths.iter_mut() {
            path.retain(|nid| sn.get(nid).map_or(false, |s| *s as i32 >= threshold));
        }
    }

    let mut out = Dotprops::default();
    for path in paths.iter().filter(|p| !p.is_empty()) {
        let xyz: Vec<[f64; 3]> = path
            .iter()
            .filter_map(|nid| nrn.locations.get(nid))
            .map(|loc| loc.to_array())
            .collect();
        out.append(&mut dotprop_path(&xyz, resample_distance, num_nn)?);
    }
    Ok(out)
}
