use crate::arbor::Arbor;
use crate::error::{HomologyError, Result};
use crate::skeleton::{Connector, ConnectorRelation, SkeletonResponse};
use crate::source::NeuronSource;
use crate::utils::{FastMap, Location};

pub const SOMA_TAG: &str = "soma";

/// A reconstructed skeleton with its name, annotations and synaptic connectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub id: u64,
    pub name: String,
    pub annotations: Vec<String>,
    pub arbor: Arbor<u64>,
    pub locations: FastMap<u64, Location<f64>>,
    pub tags: FastMap<String, Vec<u64>>,
    pub connectors: Vec<Connector>,
}

impl Neuron {
    pub fn from_response(id: u64, name: &str, response: SkeletonResponse) -> Result<Neuron> {
        let parsed = response.parse()?;
        Ok(Neuron {
            id,
            name: name.to_owned(),
            annotations: Vec::new(),
            arbor: parsed.arbor,
            locations: parsed.locations,
            tags: parsed.tags,
            connectors: parsed.connectors,
        })
    }

    pub fn with_annotations<I, S>(mut self, annotations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.annotations = annotations.into_iter().map(Into::into).collect();
        self
    }

    /// `"name (id)"`, the label used in every score table.
    pub fn name_number(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }

    /// Location of the node tagged as soma, falling back to the root.
    pub fn soma_location(&self) -> Option<Location<f64>> {
        let soma_node = self
            .tags
            .get(SOMA_TAG)
            .and_then(|nodes| nodes.first().cloned())
            .or(self.arbor.root)?;
        self.locations.get(&soma_node).cloned()
    }

    pub fn cable_length(&self) -> f64 {
        self.arbor.cable_length(&self.locations)
    }

    pub fn strahler_number(&self) -> FastMap<u64, usize> {
        self.arbor.strahler_number()
    }

    pub fn minimal_paths(&self) -> Vec<Vec<u64>> {
        self.arbor.partition().collect()
    }

    fn count_relation(&self, relation: ConnectorRelation) -> usize {
        self.connectors
            .iter()
            .filter(|c| c.relation == relation)
            .count()
    }

    /// Number of postsynaptic sites on this neuron.
    pub fn inputs(&self) -> usize {
        self.count_relation(ConnectorRelation::Postsynaptic)
    }

    /// Number of presynaptic sites on this neuron.
    pub fn outputs(&self) -> usize {
        self.count_relation(ConnectorRelation::Presynaptic)
    }

    /// Apply a function to every node and connector location.
    pub fn map_locations<F: Fn(Location<f64>) -> Location<f64>>(&self, f: F) -> Neuron {
        let mut out = self.clone();
        for loc in out.locations.values_mut() {
            *loc = f(*loc);
        }
        for connector in out.connectors.iter_mut() {
            let moved = f(connector.location());
            connector.x = moved.x;
            connector.y = moved.y;
            connector.z = moved.z;
        }
        out
    }
}

/// Recover the skeleton ID from a `"name (id)"` label.
pub fn name_number_to_id(name_num: &str) -> Result<u64> {
    let err = || HomologyError::NameNumber(name_num.to_owned());
    let trimmed = name_num.strip_suffix(')').ok_or_else(err)?;
    let open = trimmed.rfind('(').ok_or_else(err)?;
    trimmed[open + 1..].parse().map_err(|_| err())
}

/// Ordered collection of neurons, indexable by skeleton ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeuronList {
    neurons: Vec<Neuron>,
}

impl NeuronList {
    pub fn new(neurons: Vec<Neuron>) -> Self {
        NeuronList { neurons }
    }

    pub fn from_id_list<S: NeuronSource + ?Sized>(ids: &[u64], source: &S) -> Result<Self> {
        let neurons = ids
            .iter()
            .map(|id| source.neuron(*id))
            .collect::<Result<Vec<_>>>()?;
        Ok(NeuronList { neurons })
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Neuron> {
        self.neurons.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.neurons.iter().map(|n| n.id).collect()
    }

    pub fn get(&self, id: u64) -> Option<&Neuron> {
        self.neurons.iter().find(|n| n.id == id)
    }

    pub fn push(&mut self, neuron: Neuron) {
        self.neurons.push(neuron);
    }

    /// Neurons with the given IDs, in the order given; unknown IDs are skipped.
    pub fn slice_by_id(&self, ids: &[u64]) -> NeuronList {
        NeuronList {
            neurons: ids.iter().filter_map(|id| self.get(*id).cloned()).collect(),
        }
    }

    pub fn filter_by_annotation(&self, annotation: &str) -> NeuronList {
        self.filter(|n| n.has_annotation(annotation))
    }

    pub fn filter_by_length(&self, min_length: f64) -> NeuronList {
        self.filter(|n| n.cable_length() >= min_length)
    }

    pub fn filter<P: Fn(&Neuron) -> bool>(&self, predicate: P) -> NeuronList {
        NeuronList {
            neurons: self.neurons.iter().filter(|n| predicate(n)).cloned().collect(),
        }
    }
}

impl IntoIterator for NeuronList {
    type Item = Neuron;
    type IntoIter = std::vec::IntoIter<Neuron>;

    fn into_iter(self) -> Self::IntoIter {
        self.neurons.into_iter()
    }
}

impl<'a> IntoIterator for &'a NeuronList {
    type Item = &'a Neuron;
    type IntoIter = std::slice::Iter<'a, Neuron>;

    fn into_iter(self) -> Self::IntoIter {
        self.neurons.iter()
    }
}

impl std::iter::FromIterator<Neuron> for NeuronList {
    fn from_iter<I: IntoIterator<Item = Neuron>>(iter: I) -> Self {
        NeuronList {
            neurons: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_neuron(id: u64, name: &str, n: u64) -> Neuron {
        let mut arbor = Arbor::new();
        let path: Vec<u64> = (1..=n).collect();
        arbor.add_path(&path).unwrap();
        let locations = (1..=n)
            .map(|i| (i, Location::new(i as f64, 0.0, 0.0)))
            .collect();
        Neuron {
            id,
            name: name.to_owned(),
            annotations: vec!["left".to_owned()],
            arbor,
            locations,
            tags: FastMap::default(),
            connectors: Vec::new(),
        }
    }

    #[test]
    fn name_number_roundtrip() {
        let nrn = line_neuron(1234, "PN (left)", 3);
        assert_eq!(nrn.name_number(), "PN (left) (1234)");
        assert_eq!(name_number_to_id(&nrn.name_number()).unwrap(), 1234);
    }

    #[test]
    fn name_number_errors() {
        assert!(name_number_to_id("no id here").is_err());
        assert!(name_number_to_id("bad (12a)").is_err());
    }

    #[test]
    fn soma_falls_back_to_root() {
        let mut nrn = line_neuron(1, "a", 4);
        assert_eq!(nrn.soma_location(), Some(Location::new(1.0, 0.0, 0.0)));
        nrn.tags.insert(SOMA_TAG.to_owned(), vec![3]);
        assert_eq!(nrn.soma_location(), Some(Location::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn filters() {
        let list: NeuronList = vec![line_neuron(1, "a", 3), line_neuron(2, "b", 10)]
            .into_iter()
            .collect();
        assert_eq!(list.filter_by_length(5.0).ids(), vec![2]);
        assert_eq!(list.filter_by_annotation("left").len(), 2);
        assert!(list.filter_by_annotation("right").is_empty());
        assert_eq!(list.slice_by_id(&[2, 99, 1]).ids(), vec![2, 1]);
        assert_eq!(list.get(2).map(|n| n.name.as_str()), Some("b"));
        assert!(list.get(99).is_none());
    }
}
