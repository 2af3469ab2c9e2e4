use hashbrown::{HashMap, HashSet};
use num::traits::float::Float;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Sub;
use std::path::Path;

use crate::error::{HomologyError, Result};

// Type aliases allow easier switching between hash implementations
/// Mapping keyed by skeleton or treenode ID
pub type FastMap<T, U> = HashMap<T, U>;

/// Set of skeleton or treenode IDs
pub type FastSet<T> = HashSet<T>;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Location<F: Float> {
    pub x: F,
    pub y: F,
    pub z: F,
}

impl<F: Float> Location<F> {
    pub fn new(x: F, y: F, z: F) -> Self {
        Location { x, y, z }
    }

    pub fn norm(&self) -> F {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    pub fn distance_to(self, other: &Location<F>) -> F {
        (self - *other).norm()
    }

    pub fn to_array(&self) -> [F; 3] {
        [self.x, self.y, self.z]
    }
}

impl<F: Float> From<[F; 3]> for Location<F> {
    fn from(xyz: [F; 3]) -> Self {
        Location {
            x: xyz[0],
            y: xyz[1],
            z: xyz[2],
        }
    }
}

impl<F: Float> Sub<Location<F>> for Location<F> {
    type Output = Location<F>;

    fn sub(self, rhs: Location<F>) -> Location<F> {
        Location {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

/// Write an intermediate result to disk as pretty-printed JSON.
pub fn save_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let f = File::create(path).map_err(|e| HomologyError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(f), value)?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| HomologyError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}
