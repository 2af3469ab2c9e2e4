use std::convert::TryFrom;

use crate::arbor::Arbor;
use crate::error::{HomologyError, Result};
use crate::utils::{FastMap, Location};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(try_from = "i64", into = "i64")]
pub enum ConnectorRelation {
    Presynaptic,
    Postsynaptic,
    GapJunction,
    Other,
}

impl TryFrom<i64> for ConnectorRelation {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, String> {
        match value {
            -1 => Ok(ConnectorRelation::Other),
            0 => Ok(ConnectorRelation::Presynaptic),
            1 => Ok(ConnectorRelation::Postsynaptic),
            2 => Ok(ConnectorRelation::GapJunction),
            _ => Err(format!("unrecognised connector relation {}", value)),
        }
    }
}

impl From<ConnectorRelation> for i64 {
    fn from(relation: ConnectorRelation) -> i64 {
        match relation {
            ConnectorRelation::Other => -1,
            ConnectorRelation::Presynaptic => 0,
            ConnectorRelation::Postsynaptic => 1,
            ConnectorRelation::GapJunction => 2,
        }
    }
}

/// `[id, parent_id, user_id, location_x, location_y, location_z, radius, confidence]`
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Treenode {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub user_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: f64,
    pub confidence: u8,
}

/// `[treenode_id, connector_id, 0|1|2|-1, location_x, location_y, location_z]`
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Connector {
    pub treenode_id: u64,
    pub connector_id: u64,
    pub relation: ConnectorRelation,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Connector {
    pub fn location(&self) -> Location<f64> {
        Location::new(self.x, self.y, self.z)
    }
}

/// CATMAID `compact-skeleton` response, fetched with all optional flags off:
///
/// `[[nodes], [connectors], {tag: [node IDs]}]`
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SkeletonResponse(
    pub Vec<Treenode>,
    pub Vec<Connector>,
    pub FastMap<String, Vec<u64>>,
);

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSkeleton {
    pub arbor: Arbor<u64>,
    pub locations: FastMap<u64, Location<f64>>,
    pub connectors: Vec<Connector>,
    pub tags: FastMap<String, Vec<u64>>,
}

impl SkeletonResponse {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn treenodes(&self) -> &[Treenode] {
        &self.0
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.1
    }

    pub fn tags(&self) -> &FastMap<String, Vec<u64>> {
        &self.2
    }

    pub fn parse(self) -> Result<ParsedSkeleton> {
        let SkeletonResponse(treenodes, connectors, tags) = self;

        let mut locations: FastMap<u64, Location<f64>> = FastMap::default();
        let mut edges: FastMap<u64, u64> = FastMap::default();
        let mut root = None;

        for treenode in treenodes.iter() {
            match treenode.parent_id {
                Some(parent) => {
                    edges.insert(treenode.id, parent);
                }
                None => {
                    if let Some(existing) = root {
                        return Err(HomologyError::MalformedResponse(format!(
                            "more than one parentless node ({} and {})",
                            existing, treenode.id
                        )));
                    }
                    root = Some(treenode.id);
                }
            }
            locations.insert(treenode.id, Location::new(treenode.x, treenode.y, treenode.z));
        }

        for connector in connectors.iter() {
            if !locations.contains_key(&connector.treenode_id) {
                return Err(HomologyError::MalformedResponse(format!(
                    "connector {} links to unknown treenode {}",
                    connector.connector_id, connector.treenode_id
                )));
            }
        }

        Ok(ParsedSkeleton {
            arbor: Arbor::from(edges, root)?,
            locations,
            connectors,
            tags,
        })
    }
}
