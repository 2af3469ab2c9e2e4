//! Access to neurons and their connectivity.
//!
//! `NeuronSource` is the seam where an annotation database would plug in.
//! `InMemorySource` answers the same questions from a set of skeletons already
//! on hand, joining presynaptic and postsynaptic links on their connector IDs.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{HomologyError, Result};
use crate::neuron::{Neuron, NeuronList};
use crate::skeleton::{ConnectorRelation, SkeletonResponse};
use crate::utils::{load_json, FastMap, FastSet};

pub const INDEX_FILE: &str = "neurons.json";

/// Per skeleton, partner skeleton to synapse count.
pub type PartnerCounts = FastMap<u64, FastMap<u64, usize>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSkeletons {
    /// Upstream partners of each skeleton
    pub presynaptic: PartnerCounts,
    /// Downstream partners of each skeleton
    pub postsynaptic: PartnerCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Partners upstream of the neuron
    Presynaptic,
    /// Partners downstream of the neuron
    Postsynaptic,
}

pub trait NeuronSource: Sync {
    fn neuron(&self, skid: u64) -> Result<Neuron>;

    fn skids_with_annotation(&self, annotation: &str) -> Vec<u64>;

    fn connected_skeletons(&self, skids: &[u64]) -> ConnectedSkeletons;

    /// Total number of postsynaptic sites per skeleton.
    fn total_inputs(&self, skids: &[u64]) -> FastMap<u64, usize>;

    fn neurons_with_annotation(&self, annotation: &str) -> Result<NeuronList> {
        let skids = self.skids_with_annotation(annotation);
        NeuronList::from_id_list(&skids, self)
    }
}

/// Entry in the optional `neurons.json` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronInfo {
    pub skid: u64,
    pub name: String,
    #[serde(default)]
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Link {
    skid: u64,
    relation: ConnectorRelation,
}

#[derive(Debug, Default)]
pub struct InMemorySource {
    neurons: FastMap<u64, Neuron>,
    links: FastMap<u64, Vec<Link>>,
}

impl InMemorySource {
    pub fn new<I: IntoIterator<Item = Neuron>>(neurons: I) -> Self {
        let mut source = InMemorySource::default();
        for neuron in neurons {
            source.insert(neuron);
        }
        source
    }

    pub fn insert(&mut self, neuron: Neuron) {
        if let Some(old) = self.neurons.remove(&neuron.id) {
            for links in self.links.values_mut() {
                links.retain(|l| l.skid != old.id);
            }
        }
        for connector in neuron.connectors.iter() {
            self.links
                .entry(connector.connector_id)
                .or_insert_with(Vec::new)
                .push(Link {
                    skid: neuron.id,
                    relation: connector.relation,
                });
        }
        self.neurons.insert(neuron.id, neuron);
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn all(&self) -> NeuronList {
        let mut skids: Vec<u64> = self.neurons.keys().cloned().collect();
        skids.sort_unstable();
        skids.iter().map(|s| self.neurons[s].clone()).collect()
    }

    /// Load every `<skid>.json` compact-skeleton response in a directory.
    /// Names and annotations come from `neurons.json` when present.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let index_path = dir.join(INDEX_FILE);
        let index: FastMap<u64, NeuronInfo> = if index_path.exists() {
            let infos: Vec<NeuronInfo> = load_json(&index_path)?;
            infos.into_iter().map(|i| (i.skid, i)).collect()
        } else {
            FastMap::default()
        };

        let mut source = InMemorySource::default();
        let entries = fs::read_dir(dir).map_err(|e| HomologyError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| HomologyError::io(dir, e))?.path();
            if path.extension() != Some(OsStr::new("json")) || path == index_path {
                continue;
            }
            let skid: u64 = match path.file_stem().and_then(OsStr::to_str).map(str::parse) {
                Some(Ok(skid)) => skid,
                _ => {
                    warn!(?path, "skipping file not named by skeleton ID");
                    continue;
                }
            };

            let contents = fs::read_to_string(&path).map_err(|e| HomologyError::io(&path, e))?;
            let response = SkeletonResponse::from_json(&contents)?;
            let neuron = match index.get(&skid) {
                Some(info) => Neuron::from_response(skid, &info.name, response)?
                    .with_annotations(info.annotations.iter().cloned()),
                None => Neuron::from_response(skid, &skid.to_string(), response)?,
            };
            debug!(skid, nodes = neuron.arbor.len(), "loaded skeleton");
            source.insert(neuron);
        }

        info!(n_neurons = source.len(), ?dir, "loaded neurons");
        Ok(source)
    }

    fn partners(
        &self,
        skid: u64,
        own: ConnectorRelation,
        other: ConnectorRelation,
    ) -> FastMap<u64, usize> {
        let mut out: FastMap<u64, usize> = FastMap::default();
        let neuron = match self.neurons.get(&skid) {
            Some(n) => n,
            None => return out,
        };
        for connector in neuron.connectors.iter().filter(|c| c.relation == own) {
            if let Some(links) = self.links.get(&connector.connector_id) {
                for link in links.iter().filter(|l| l.relation == other) {
                    *out.entry(link.skid).or_insert(0) += 1;
                }
            }
        }
        out
    }
}

impl NeuronSource for InMemorySource {
    fn neuron(&self, skid: u64) -> Result<Neuron> {
        self.neurons
            .get(&skid)
            .cloned()
            .ok_or(HomologyError::UnknownSkeleton(skid))
    }

    fn skids_with_annotation(&self, annotation: &str) -> Vec<u64> {
        let mut skids: Vec<u64> = self
            .neurons
            .values()
            .filter(|n| n.has_annotation(annotation))
            .map(|n| n.id)
            .collect();
        skids.sort_unstable();
        skids
    }

    fn connected_skeletons(&self, skids: &[u64]) -> ConnectedSkeletons {
        let mut out = ConnectedSkeletons::default();
        for skid in skids {
            out.presynaptic.insert(
                *skid,
                self.partners(*skid, ConnectorRelation::Postsynaptic, ConnectorRelation::Presynaptic),
            );
            out.postsynaptic.insert(
                *skid,
                self.partners(*skid, ConnectorRelation::Presynaptic, ConnectorRelation::Postsynaptic),
            );
        }
        out
    }

    fn total_inputs(&self, skids: &[u64]) -> FastMap<u64, usize> {
        skids
            .iter()
            .map(|s| (*s, self.neurons.get(s).map_or(0, Neuron::inputs)))
            .collect()
    }
}

/// Partners of a neuron in one direction with at least `min_synapses` synapses,
/// strongest first. With `normalized`, weights are fractions of the neuron's
/// total synapses in that direction.
pub fn synaptic_partners<S: NeuronSource + ?Sized>(
    source: &S,
    neuron: &Neuron,
    connection_type: ConnectionType,
    min_synapses: usize,
    normalized: bool,
) -> Vec<(u64, f64)> {
    let connected = source.connected_skeletons(&[neuron.id]);
    let counts = match connection_type {
        ConnectionType::Presynaptic => connected.presynaptic,
        ConnectionType::Postsynaptic => connected.postsynaptic,
    }
    .remove(&neuron.id)
    .unwrap_or_default();

    let total: usize = counts.values().sum();
    let mut partners: Vec<(u64, f64)> = counts
        .into_iter()
        .filter(|(_, n)| *n >= min_synapses)
        .map(|(skid, n)| {
            let weight = if normalized && total > 0 {
                n as f64 / total as f64
            } else {
                n as f64
            };
            (skid, weight)
        })
        .collect();

    partners.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    partners
}

/// Distinct skeleton IDs, in first-seen order.
pub fn unique_skids<I: IntoIterator<Item = u64>>(skids: I) -> Vec<u64> {
    let mut seen = FastSet::default();
    skids.into_iter().filter(|s| seen.insert(*s)).collect()
}
