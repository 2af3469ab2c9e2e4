//! Spatial transforms between hemispheres or between neuron groups.

use nalgebra::{DMatrix, Matrix3x4, Vector3, Vector4};

use crate::error::{HomologyError, Result};
use crate::neuron::{Neuron, NeuronList};
use crate::utils::Location;

pub trait PointTransform: Sync {
    fn apply(&self, loc: Location<f64>) -> Location<f64>;
}

/// Leaves every point where it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity;

impl PointTransform for Identity {
    fn apply(&self, loc: Location<f64>) -> Location<f64> {
        loc
    }
}

/// Reflection across the plane `x = plane`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mirror {
    pub plane: f64,
}

impl PointTransform for Mirror {
    fn apply(&self, loc: Location<f64>) -> Location<f64> {
        Location::new(2.0 * self.plane - loc.x, loc.y, loc.z)
    }
}

/// `p' = M [x y z 1]^T` for a 3x4 matrix `M`, stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub matrix: [[f64; 4]; 3],
}

impl Default for Affine {
    fn default() -> Self {
        Affine {
            matrix: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
        }
    }
}

impl Affine {
    fn as_matrix(&self) -> Matrix3x4<f64> {
        Matrix3x4::from_fn(|r, c| self.matrix[r][c])
    }

    /// Least-squares affine mapping each `from` landmark onto the matching
    /// `to` landmark. Needs at least four landmark pairs that are not coplanar.
    pub fn fit(from: &[Location<f64>], to: &[Location<f64>]) -> Result<Affine> {
        if from.len() != to.len() {
            return Err(HomologyError::Fit(format!(
                "{} source landmarks but {} target landmarks",
                from.len(),
                to.len()
            )));
        }
        if from.len() < 4 {
            return Err(HomologyError::Fit("need at least 4 landmark pairs".into()));
        }

        let a = DMatrix::from_fn(from.len(), 4, |r, c| match c {
            0 => from[r].x,
            1 => from[r].y,
            2 => from[r].z,
            _ => 1.0,
        });
        let b = DMatrix::from_fn(to.len(), 3, |r, c| to[r].to_array()[c]);

        let svd = a.svd(true, true);
        if svd.rank(1e-9) < 4 {
            return Err(HomologyError::Fit("landmarks are degenerate".into()));
        }
        let x = svd
            .solve(&b, 1e-12)
            .map_err(|e| HomologyError::Fit(e.to_string()))?;

        let mut matrix = [[0.0; 4]; 3];
        for (r, row) in matrix.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = x[(c, r)];
            }
        }
        Ok(Affine { matrix })
    }
}

impl PointTransform for Affine {
    fn apply(&self, loc: Location<f64>) -> Location<f64> {
        let out: Vector3<f64> = self.as_matrix() * Vector4::new(loc.x, loc.y, loc.z, 1.0);
        Location::new(out[0], out[1], out[2])
    }
}

/// Copy of the neuron with every node and connector moved.
pub fn transform_neuron<T: PointTransform + ?Sized>(nrn: &Neuron, transform: &T) -> Neuron {
    nrn.map_locations(|loc| transform.apply(loc))
}

pub fn transform_neuronlist<T: PointTransform + ?Sized>(nrns: &NeuronList, transform: &T) -> NeuronList {
    nrns.iter().map(|n| transform_neuron(n, transform)).collect()
}
