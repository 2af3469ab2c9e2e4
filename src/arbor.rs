use num::traits::float::Float;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::mem;

use crate::error::{HomologyError, Result};
use crate::utils::{FastMap, FastSet, Location};

/// Rooted tree of treenodes, stored as a map of child to parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arbor<NodeType: Hash + Eq> {
    pub(crate) edges: FastMap<NodeType, NodeType>,
    pub root: Option<NodeType>,
}

#[derive(Debug, PartialEq)]
pub struct BranchAndEndNodes<NodeType: Hash + Eq> {
    pub branches: FastMap<NodeType, usize>,
    pub ends: FastSet<NodeType>,
}

impl<NodeType: Hash + Debug + Eq + Copy + Ord> Default for Arbor<NodeType> {
    fn default() -> Self {
        Arbor {
            edges: FastMap::default(),
            root: None,
        }
    }
}

impl<NodeType: Hash + Debug + Eq + Copy + Ord> Arbor<NodeType> {
    /// Creates an empty arbor
    pub fn new() -> Arbor<NodeType> {
        Arbor::default()
    }

    /// Creates a populated arbor and checks that it is valid
    pub fn from(edges: FastMap<NodeType, NodeType>, root: Option<NodeType>) -> Result<Self> {
        let a = Arbor { edges, root };
        a.check_valid()?;
        Ok(a)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.root.is_none()
    }

    pub fn len(&self) -> usize {
        self.edges.len() + if self.root.is_some() { 1 } else { 0 }
    }

    pub fn has_node(&self, node: NodeType) -> bool {
        self.edges.contains_key(&node) || self.root == Some(node)
    }

    pub fn has_parent(&self, node: NodeType) -> bool {
        self.edges.contains_key(&node)
    }

    pub fn get_parent(&self, node: NodeType) -> Option<&NodeType> {
        self.edges.get(&node)
    }

    pub fn edges(&self) -> impl Iterator<Item = (&NodeType, &NodeType)> {
        self.edges.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeType> + '_ {
        self.root.into_iter().chain(self.edges.keys().cloned())
    }

    pub fn path_to_root(&self, start: NodeType) -> Result<RootwardPath<NodeType>> {
        RootwardPath::new(self, start)
    }

    fn find_root(&self) -> Result<NodeType> {
        let distals: FastSet<NodeType> = self.edges.keys().cloned().collect();
        let proximals: FastSet<NodeType> = self.edges.values().cloned().collect();
        let diff: Vec<NodeType> = proximals.difference(&distals).cloned().collect();

        match diff.len() {
            1 => Ok(diff[0]),
            0 => {
                if distals.is_empty() {
                    self.root
                        .ok_or(HomologyError::InvalidArbor("no edges or nodes"))
                } else {
                    Err(HomologyError::InvalidArbor("no implicit root"))
                }
            }
            _ => Err(HomologyError::InvalidArbor("more than one implicit root")),
        }
    }

    pub fn check_valid(&self) -> Result<&Self> {
        let root = match self.root {
            Some(root) => root,
            None => return Err(HomologyError::InvalidArbor("no explicit root")),
        };
        if self.find_root()? != root {
            return Err(HomologyError::InvalidArbor(
                "explicit root does not match implicit root",
            ));
        }

        let mut reaches_root: FastSet<NodeType> = FastSet::default();
        reaches_root.insert(root);

        for start in self.edges.keys() {
            let mut local: Vec<NodeType> = Vec::new();
            let mut connected = false;

            for node in self.path_to_root(*start)? {
                if reaches_root.contains(&node) {
                    connected = true;
                    break;
                }
                if local.contains(&node) {
                    return Err(HomologyError::InvalidArbor("arbor has cycles"));
                }
                local.push(node);
            }

            if !connected {
                return Err(HomologyError::InvalidArbor(
                    "not fully connected (some nodes do not lead to root)",
                ));
            }
            reaches_root.extend(local);
        }

        Ok(self)
    }

    /// Add a proximal-to-distal path. The first node must already be in the arbor,
    /// unless the arbor is empty, in which case it becomes the root.
    pub fn add_path(&mut self, path: &[NodeType]) -> Result<&mut Self> {
        let first = match path.first() {
            Some(n) => *n,
            None => return Err(HomologyError::InvalidArbor("given empty path")),
        };

        if self.is_empty() {
            self.root = Some(first);
        } else if !self.has_node(first) {
            return Err(HomologyError::InvalidArbor(
                "path does not intersect with existing arbor",
            ));
        }

        for proximal_distal in path.windows(2) {
            self.edges.insert(proximal_distal[1], proximal_distal[0]);
        }
        Ok(self)
    }

    pub fn all_successors(&self) -> FastMap<NodeType, Vec<NodeType>> {
        let mut out: FastMap<NodeType, Vec<NodeType>> = FastMap::default();
        for (distal, proximal) in self.edges.iter() {
            out.entry(*proximal).or_insert_with(Vec::new).push(*distal);
        }
        out
    }

    pub fn find_branch_and_end_nodes(&self) -> BranchAndEndNodes<NodeType> {
        let mut out_degrees: FastMap<NodeType, usize> = FastMap::default();
        for (distal, proximal) in self.edges.iter() {
            out_degrees.entry(*distal).or_insert(0);
            *out_degrees.entry(*proximal).or_insert(0) += 1;
        }

        let mut branches = FastMap::default();
        let mut ends = FastSet::default();
        for (node, degree) in out_degrees {
            match degree {
                0 => {
                    ends.insert(node);
                }
                1 => (),
                _ => {
                    branches.insert(node, degree);
                }
            }
        }

        BranchAndEndNodes { branches, ends }
    }

    /// Nodes ordered so that every parent comes before its children.
    pub fn breadth_first(&self) -> Vec<NodeType> {
        let successors = self.all_successors();
        let mut out = Vec::with_capacity(self.len());
        let mut queue: VecDeque<NodeType> = self.root.into_iter().collect();

        while let Some(node) = queue.pop_front() {
            out.push(node);
            if let Some(children) = successors.get(&node) {
                let mut children = children.clone();
                children.sort_unstable();
                queue.extend(children);
            }
        }
        out
    }

    /// Split the arbor into minimal paths: each runs from a leaf towards the root,
    /// stopping at (and including) the first branch node already covered.
    pub fn partition(&self) -> Partitions<NodeType> {
        Partitions::new(self)
    }

    pub fn strahler_number(&self) -> FastMap<NodeType, usize> {
        let successors = self.all_successors();
        let mut strahler: FastMap<NodeType, usize> = FastMap::default();

        for node in self.breadth_first().into_iter().rev() {
            let number = match successors.get(&node) {
                None => 1,
                Some(children) => {
                    let mut max = 0;
                    let mut n_max = 0;
                    for child in children {
                        let s = strahler[child];
                        if s > max {
                            max = s;
                            n_max = 1;
                        } else if s == max {
                            n_max += 1;
                        }
                    }
                    if n_max > 1 {
                        max + 1
                    } else {
                        max
                    }
                }
            };
            strahler.insert(node, number);
        }
        strahler
    }

    /// Total length of all edges; nodes without a location contribute nothing.
    pub fn cable_length<F: Float>(&self, locations: &FastMap<NodeType, Location<F>>) -> F {
        let mut total = F::zero();
        for (distal, proximal) in self.edges.iter() {
            if let (Some(d), Some(p)) = (locations.get(distal), locations.get(proximal)) {
                total = total + d.distance_to(p);
            }
        }
        total
    }
}

pub struct RootwardPath<'a, NodeType: Hash + Eq> {
    arbor: &'a Arbor<NodeType>,
    next: Option<NodeType>,
}

impl<'a, NodeType: Hash + Debug + Eq + Copy + Ord> RootwardPath<'a, NodeType> {
    pub fn new(arbor: &'a Arbor<NodeType>, start: NodeType) -> Result<Self> {
        if arbor.has_node(start) {
            Ok(RootwardPath {
                arbor,
                next: Some(start),
            })
        } else {
            Err(HomologyError::InvalidArbor(
                "no path to root: arbor does not contain starting node",
            ))
        }
    }
}

impl<'a, NodeType: Hash + Debug + Eq + Copy + Ord> Iterator for RootwardPath<'a, NodeType> {
    type Item = NodeType;

    fn next(&mut self) -> Option<NodeType> {
        let parent = self
            .next
            .and_then(|node| self.arbor.get_parent(node).cloned());
        mem::replace(&mut self.next, parent)
    }
}

/// Leaves are visited highest-ID first, so the first partition ends at the root.
pub struct Partitions<'a, NodeType: Hash + Eq> {
    arbor: &'a Arbor<NodeType>,
    visited_branches: FastMap<NodeType, bool>,
    ends: Vec<NodeType>,
}

impl<'a, NodeType: Hash + Debug + Eq + Copy + Ord> Partitions<'a, NodeType> {
    fn new(arbor: &'a Arbor<NodeType>) -> Self {
        let branch_ends = arbor.find_branch_and_end_nodes();
        let mut ends: Vec<NodeType> = branch_ends.ends.into_iter().collect();
        if ends.is_empty() {
            // singleton arbor
            ends.extend(arbor.root);
        }
        ends.sort_unstable();

        Partitions {
            arbor,
            visited_branches: branch_ends
                .branches
                .keys()
                .map(|k| (*k, false))
                .collect(),
            ends,
        }
    }
}

impl<'a, NodeType: Hash + Debug + Eq + Copy + Ord> Iterator for Partitions<'a, NodeType> {
    type Item = Vec<NodeType>;

    fn next(&mut self) -> Option<Vec<NodeType>> {
        let start = self.ends.pop()?;
        let mut path = Vec::new();
        let mut next = Some(start);

        while let Some(node) = next {
            path.push(node);
            if let Some(visited) = self.visited_branches.get_mut(&node) {
                if *visited {
                    break;
                }
                *visited = true;
            }
            next = self.arbor.get_parent(node).cloned();
        }
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    //    1
    //    |
    //    2
    //    |
    //    3
    //    | \
    //    4  6
    //    |   \
    //    5    7

    fn make_arbor() -> Arbor<u64> {
        let mut arbor = Arbor::new();
        arbor.add_path(&[1, 2, 3, 4, 5]).unwrap();
        arbor.add_path(&[3, 6, 7]).unwrap();
        arbor
    }

    #[test]
    fn add_path() {
        let arbor = make_arbor();
        assert_eq!(arbor.root, Some(1));
        assert_eq!(arbor.edges.len(), 6);
        assert_eq!(arbor.len(), 7);
    }

    #[test]
    fn add_disjoint_path_fails() {
        let mut arbor = make_arbor();
        assert!(arbor.add_path(&[10, 11]).is_err());
    }

    #[test]
    fn from_checks_validity() {
        let edges: FastMap<u64, u64> = vec![(2, 1), (3, 2)].into_iter().collect();
        assert!(Arbor::from(edges.clone(), Some(1)).is_ok());
        assert!(Arbor::from(edges.clone(), Some(2)).is_err());
        assert!(Arbor::from(edges, None).is_err());

        let cyclic: FastMap<u64, u64> = vec![(2, 1), (3, 4), (4, 3)].into_iter().collect();
        assert!(Arbor::from(cyclic, Some(1)).is_err());
    }

    #[test]
    fn get_parent() {
        let arbor = make_arbor();
        assert_eq!(arbor.get_parent(4), Some(&3));
        assert_eq!(arbor.get_parent(1), None);
    }

    #[test]
    fn path_to_root() {
        let arbor = make_arbor();
        let path: Vec<u64> = arbor.path_to_root(7).unwrap().collect();
        assert_eq!(path, vec![7, 6, 3, 2, 1]);
        assert!(arbor.path_to_root(99).is_err());
    }

    #[test]
    fn find_branch_and_end_nodes() {
        let branch_ends = make_arbor().find_branch_and_end_nodes();

        let expected_branches: FastMap<u64, usize> = vec![(3, 2)].into_iter().collect();
        assert_eq!(branch_ends.branches, expected_branches);

        let expected_ends: FastSet<u64> = vec![5, 7].into_iter().collect();
        assert_eq!(branch_ends.ends, expected_ends);
    }

    #[test]
    fn partitions() {
        let partitions: Vec<Vec<u64>> = make_arbor().partition().collect();
        assert_eq!(partitions, vec![vec![7, 6, 3, 2, 1], vec![5, 4, 3]]);
    }

    #[test]
    fn singleton_partition() {
        let mut arbor = Arbor::new();
        arbor.add_path(&[42u64]).unwrap();
        let partitions: Vec<Vec<u64>> = arbor.partition().collect();
        assert_eq!(partitions, vec![vec![42]]);
    }

    #[test]
    fn strahler_number() {
        let strahler = make_arbor().strahler_number();
        assert_eq!(strahler[&5], 1);
        assert_eq!(strahler[&7], 1);
        assert_eq!(strahler[&3], 2);
        assert_eq!(strahler[&1], 2);
    }

    #[test]
    fn cable_length() {
        let arbor = make_arbor();
        let locations: FastMap<u64, Location<f64>> = (1..8)
            .map(|idx| (idx, Location::new(idx as f64, 0.0, 0.0)))
            .collect();
        // 1-2-3-4-5 is 4, 3-6 is 3, 6-7 is 1
        assert_eq!(arbor.cable_length(&locations), 8.0);
    }

    #[test]
    fn breadth_first_parents_first() {
        let order = make_arbor().breadth_first();
        assert_eq!(order, vec![1, 2, 3, 4, 6, 5, 7]);
    }
}
