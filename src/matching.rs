use std::cmp::Ordering;

use petgraph::graph::{NodeIndex, UnGraph};
use tracing::debug;

use crate::error::{HomologyError, Result};
use crate::neuron::{name_number_to_id, NeuronList};
use crate::utils::FastMap;

/// Dense matrix of scores with labelled rows (queries) and columns (targets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    rows: Vec<String>,
    cols: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl SimilarityMatrix {
    pub fn new(rows: Vec<String>, cols: Vec<String>, fill: f64) -> Self {
        let values = vec![vec![fill; cols.len()]; rows.len()];
        SimilarityMatrix { rows, cols, values }
    }

    /// Reshape long-form (row, column, value) entries. Labels keep their
    /// first-seen order and missing cells are NaN.
    pub fn pivot<I: IntoIterator<Item = (String, String, f64)>>(entries: I) -> Self {
        let entries: Vec<(String, String, f64)> = entries.into_iter().collect();
        let mut rows: Vec<String> = Vec::new();
        let mut cols: Vec<String> = Vec::new();
        let mut row_idx: FastMap<String, usize> = FastMap::default();
        let mut col_idx: FastMap<String, usize> = FastMap::default();

        for (r, c, _) in entries.iter() {
            if !row_idx.contains_key(r) {
                row_idx.insert(r.clone(), rows.len());
                rows.push(r.clone());
            }
            if !col_idx.contains_key(c) {
                col_idx.insert(c.clone(), cols.len());
                cols.push(c.clone());
            }
        }

        let mut out = SimilarityMatrix::new(rows, cols, std::f64::NAN);
        for (r, c, v) in entries {
            out.values[row_idx[&r]][col_idx[&c]] = v;
        }
        out
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    fn row_index(&self, row: &str) -> Option<usize> {
        self.rows.iter().position(|r| r == row)
    }

    fn col_index(&self, col: &str) -> Option<usize> {
        self.cols.iter().position(|c| c == col)
    }

    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        Some(self.values[self.row_index(row)?][self.col_index(col)?])
    }

    /// Returns false if either label is unknown.
    pub fn set(&mut self, row: &str, col: &str, value: f64) -> bool {
        match (self.row_index(row), self.col_index(col)) {
            (Some(i), Some(j)) => {
                self.values[i][j] = value;
                true
            }
            _ => false,
        }
    }

    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    pub fn row_values(&self, row: &str) -> Option<&[f64]> {
        self.row_index(row).map(|i| self.values[i].as_slice())
    }

    pub fn transpose(&self) -> SimilarityMatrix {
        let values = (0..self.cols.len())
            .map(|j| self.values.iter().map(|row| row[j]).collect())
            .collect();
        SimilarityMatrix {
            rows: self.cols.clone(),
            cols: self.rows.clone(),
            values,
        }
    }

    /// Cellwise combination with another matrix, matched by label. Cells
    /// missing from `other` are combined with NaN.
    pub fn combine<F: Fn(f64, f64) -> f64>(&self, other: &SimilarityMatrix, f: F) -> SimilarityMatrix {
        let mut out = self.clone();
        for (i, row) in self.rows.iter().enumerate() {
            for (j, col) in self.cols.iter().enumerate() {
                let b = other.get(row, col).unwrap_or(std::f64::NAN);
                out.values[i][j] = f(self.values[i][j], b);
            }
        }
        out
    }

    /// Long-form (row, column, value) entries in row-major order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(i, r)| {
            self.cols
                .iter()
                .enumerate()
                .map(move |(j, c)| (r.as_str(), c.as_str(), self.values[i][j]))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchReport {
    /// Targets above the threshold, best first
    Matches(Vec<(String, f64)>),
    NoMatch(String),
}

/// Best target(s) for every query with similarity above `min_similarity`.
pub fn match_report(
    nrns_q: &NeuronList,
    sb: &SimilarityMatrix,
    min_similarity: f64,
) -> FastMap<u64, MatchReport> {
    let mut out = FastMap::default();
    for nrn in nrns_q {
        let key = nrn.name_number();
        let mut best: Vec<(String, f64)> = match sb.row_values(&key) {
            Some(values) => sb
                .cols()
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .filter(|(_, s)| *s > min_similarity)
                .collect(),
            None => Vec::new(),
        };
        best.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let report = if best.is_empty() {
            MatchReport::NoMatch(format!("No sufficiently good matches for {}", key))
        } else {
            MatchReport::Matches(best)
        };
        out.insert(nrn.id, report);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Query,
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BipartiteNode {
    pub label: String,
    pub side: Side,
}

/// Bipartite graph of queries and targets joined wherever similarity exceeds
/// `min_similarity`. Nodes without any such edge are left out.
pub fn similarity_matrix_to_adjacency(
    sb: &SimilarityMatrix,
    min_similarity: f64,
) -> UnGraph<BipartiteNode, f64> {
    let mut graph = UnGraph::new_undirected();
    let mut query_nodes: FastMap<usize, NodeIndex> = FastMap::default();
    let mut target_nodes: FastMap<usize, NodeIndex> = FastMap::default();

    for (i, row) in sb.rows.iter().enumerate() {
        for (j, col) in sb.cols.iter().enumerate() {
            let s = sb.values[i][j];
            if !(s > min_similarity) {
                continue;
            }
            let q = *query_nodes.entry(i).or_insert_with(|| {
                graph.add_node(BipartiteNode {
                    label: row.clone(),
                    side: Side::Query,
                })
            });
            let t = *target_nodes.entry(j).or_insert_with(|| {
                graph.add_node(BipartiteNode {
                    label: col.clone(),
                    side: Side::Target,
                })
            });
            graph.add_edge(q, t, s);
        }
    }
    graph
}

/// Minimum-cost assignment of rows to columns for a square cost matrix
/// (Kuhn-Munkres with potentials). Returns the column assigned to each row.
fn hungarian(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    let inf = std::f64::INFINITY;
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![inf; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0; n];
    for j in 1..=n {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Maximum-weight matching of a bipartite graph, as (query, target) node pairs.
/// Only edges of positive weight can be matched. Infinite weights outrank any
/// combination of finite ones; NaN weights are an error.
pub fn max_weight_matching(graph: &UnGraph<BipartiteNode, f64>) -> Result<Vec<(NodeIndex, NodeIndex)>> {
    let queries: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|n| graph[*n].side == Side::Query)
        .collect();
    let targets: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|n| graph[*n].side == Side::Target)
        .collect();
    let size = queries.len().max(targets.len());
    if size == 0 {
        return Ok(Vec::new());
    }

    let mut weights = vec![vec![0.0; size]; size];
    let mut max_finite: f64 = 0.0;
    let mut any_infinite = false;
    for (i, q) in queries.iter().enumerate() {
        for (j, t) in targets.iter().enumerate() {
            if let Some(e) = graph.find_edge(*q, *t) {
                let w = graph[e];
                if w.is_nan() {
                    return Err(HomologyError::Fit(format!(
                        "NaN weight between {} and {}",
                        graph[*q].label, graph[*t].label
                    )));
                }
                let w = w.max(0.0);
                if w.is_infinite() {
                    any_infinite = true;
                } else {
                    max_finite = max_finite.max(w);
                }
                weights[i][j] = w;
            }
        }
    }

    let mut max_weight = max_finite;
    if any_infinite {
        // heavier than every finite edge in the graph put together
        let big = max_finite.max(1.0) * (size as f64 + 1.0);
        if !big.is_finite() {
            return Err(HomologyError::Fit("edge weights too large to match".into()));
        }
        for w in weights.iter_mut().flat_map(|row| row.iter_mut()) {
            if w.is_infinite() {
                *w = big;
            }
        }
        max_weight = big;
    }

    let cost: Vec<Vec<f64>> = weights
        .iter()
        .map(|row| row.iter().map(|w| max_weight - w).collect())
        .collect();

    Ok(hungarian(&cost)
        .into_iter()
        .enumerate()
        .filter(|(i, j)| *i < queries.len() && *j < targets.len() && weights[*i][*j] > 0.0)
        .filter(|(i, j)| graph.find_edge(queries[*i], targets[*j]).is_some())
        .map(|(i, j)| (queries[i], targets[j]))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    #[serde(rename = "S")]
    pub s: f64,
    #[serde(rename = "Query_name")]
    pub query_name: String,
    #[serde(rename = "Query_id")]
    pub query_id: u64,
    #[serde(rename = "Target_name")]
    pub target_name: String,
    #[serde(rename = "Target_id")]
    pub target_id: u64,
}

/// One-to-one assignment of queries to targets maximising total similarity.
///
/// `enforce_match` lists (query, target) labels whose similarity is replaced by
/// `enforce_match_val` before matching; reported scores are always the
/// original ones. Rows are sorted by score, best first.
pub fn max_match_similarity(
    sb: &SimilarityMatrix,
    min_similarity: f64,
    enforce_match: &[(String, String)],
    enforce_match_val: f64,
) -> Result<Vec<MatchRow>> {
    let mut forced = sb.clone();
    for (q, t) in enforce_match {
        if !forced.set(q, t, enforce_match_val) {
            debug!(query = %q, target = %t, "forced match not in similarity matrix");
        }
    }

    let graph = similarity_matrix_to_adjacency(&forced, min_similarity);
    let mut rows = Vec::new();
    for (q, t) in max_weight_matching(&graph)? {
        let query_name = graph[q].label.clone();
        let target_name = graph[t].label.clone();
        rows.push(MatchRow {
            s: sb.get(&query_name, &target_name).unwrap_or(std::f64::NAN),
            query_id: name_number_to_id(&query_name)?,
            target_id: name_number_to_id(&target_name)?,
            query_name,
            target_name,
        });
    }

    rows.sort_by(|a, b| b.s.partial_cmp(&a.s).unwrap_or(Ordering::Equal));
    Ok(rows)
}
