//! Depth-limited least-squares regression trees.
//!
//! Split search is exhaustive over the distinct values of every allowed
//! column. Candidates are evaluated per column in parallel and reduced in
//! column order, keeping the first best gain, so the lowest column index and
//! then the lowest threshold win ties. Training is fully deterministic.
//!
//! Node values are stored already multiplied by the booster's learning rate,
//! so a tree's prediction can be summed directly into the ensemble output.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use lendscore_core::constants::MIN_SPLIT_GAIN;
use lendscore_core::types::FEATURE_COUNT;

/// Dense training row.
pub type Row = [f64; FEATURE_COUNT];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        value: f64,
    },
    Leaf {
        value: f64,
    },
}

impl Node {
    /// Shrunken mean residual of the rows that reached this node.
    pub fn value(&self) -> f64 {
        match self {
            Node::Split { value, .. } | Node::Leaf { value } => *value,
        }
    }
}

/// Tree-growing limits.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
}

/// Column index paired with every training row index sorted by that column.
pub type SortedColumn = (usize, Vec<usize>);

/// Sort row indices by each allowed column, ties by row index.
pub fn presort(x: &[Row], columns: &[usize]) -> Vec<SortedColumn> {
    columns
        .par_iter()
        .map(|&col| {
            let mut order: Vec<usize> = (0..x.len()).collect();
            order.sort_by(|&a, &b| x[a][col].total_cmp(&x[b][col]).then(a.cmp(&b)));
            (col, order)
        })
        .collect()
}

/// A fitted tree; node 0 is the root.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit one tree to `residuals` over all training rows.
    ///
    /// `sorted` holds one presorted index list per column the tree may split
    /// on; an empty `sorted` yields a single leaf.
    pub fn fit(x: &[Row], residuals: &[f64], sorted: &[SortedColumn], params: TreeParams) -> Self {
        let mut builder = Builder {
            x,
            residuals,
            params,
            nodes: Vec::new(),
        };
        let samples: Vec<usize> = (0..x.len()).collect();
        builder.grow(&samples, sorted.to_vec(), 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.nodes.first(), Some(Node::Leaf { .. }) | None)
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match nodes.get(id) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    /// Columns this tree splits on.
    pub fn split_features(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().filter_map(|n| match n {
            Node::Split { feature, .. } => Some(*feature),
            Node::Leaf { .. } => None,
        })
    }

    pub fn predict(&self, x: &Row) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                }) => id = if x[*feature] <= *threshold { *left } else { *right },
                Some(Node::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
    }

    /// Path decomposition of [`predict`](Self::predict): adds each split's
    /// change in node value to that split's column in `per_feature` and
    /// returns the root value. Root value plus the added deltas equals the
    /// prediction.
    pub fn contributions(&self, x: &Row, per_feature: &mut [f64; FEATURE_COUNT]) -> f64 {
        let root = self.nodes.first().map(Node::value).unwrap_or(0.0);
        let mut id = 0;
        while let Some(Node::Split {
            feature,
            threshold,
            left,
            right,
            value,
        }) = self.nodes.get(id)
        {
            let next = if x[*feature] <= *threshold { *left } else { *right };
            let child = self.nodes.get(next).map(Node::value).unwrap_or(*value);
            per_feature[*feature] += child - value;
            id = next;
        }
        root
    }

    /// Structural sanity check for trees loaded from storage.
    pub fn is_well_formed(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(id, n)| match n {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    value,
                } => {
                    *feature < FEATURE_COUNT
                        && threshold.is_finite()
                        && value.is_finite()
                        && *left > id
                        && *right > id
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
                Node::Leaf { value } => value.is_finite(),
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'a> {
    x: &'a [Row],
    residuals: &'a [f64],
    params: TreeParams,
    nodes: Vec<Node>,
}

impl Builder<'_> {
    fn grow(&mut self, samples: &[usize], columns: Vec<SortedColumn>, depth: usize) -> usize {
        let n = samples.len();
        let sum: f64 = samples.iter().map(|&i| self.residuals[i]).sum();
        let value = if n == 0 {
            0.0
        } else {
            self.params.learning_rate * sum / n as f64
        };
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        if depth >= self.params.max_depth || n < 2 * self.params.min_samples_leaf {
            return id;
        }
        let Some(best) = self.best_split(&columns, sum, n) else {
            return id;
        };

        let mut goes_left = vec![false; self.x.len()];
        for &i in samples {
            goes_left[i] = self.x[i][best.feature] <= best.threshold;
        }
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) =
            samples.iter().copied().partition(|&i| goes_left[i]);
        let mut left_columns = Vec::with_capacity(columns.len());
        let mut right_columns = Vec::with_capacity(columns.len());
        for (col, order) in columns {
            let (l, r): (Vec<usize>, Vec<usize>) = order.into_iter().partition(|&i| goes_left[i]);
            left_columns.push((col, l));
            right_columns.push((col, r));
        }

        let left = self.grow(&left_samples, left_columns, depth + 1);
        let right = self.grow(&right_samples, right_columns, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            value,
        };
        id
    }

    fn best_split(&self, columns: &[SortedColumn], sum: f64, n: usize) -> Option<Candidate> {
        let per_column: Vec<Option<Candidate>> = columns
            .par_iter()
            .map(|(col, order)| self.scan_column(*col, order, sum, n))
            .collect();
        per_column.into_iter().flatten().fold(None, |best, c| match best {
            Some(b) if b.gain >= c.gain => Some(b),
            _ => Some(c),
        })
    }

    fn scan_column(&self, col: usize, order: &[usize], sum: f64, n: usize) -> Option<Candidate> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent = sum * sum / n as f64;
        let mut left_sum = 0.0;
        let mut best: Option<Candidate> = None;
        for k in 0..n.saturating_sub(1) {
            left_sum += self.residuals[order[k]];
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_right < min_leaf {
                break;
            }
            if n_left < min_leaf {
                continue;
            }
            let a = self.x[order[k]][col];
            let b = self.x[order[k + 1]][col];
            if a >= b {
                continue;
            }
            let right_sum = sum - left_sum;
            let gain = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64
                - parent;
            if gain > MIN_SPLIT_GAIN && best.is_none_or(|b| gain > b.gain) {
                best = Some(Candidate {
                    feature: col,
                    threshold: midpoint(a, b),
                    gain,
                });
            }
        }
        best
    }
}

/// A threshold strictly separating `a < b`.
fn midpoint(a: f64, b: f64) -> f64 {
    let mid = a / 2.0 + b / 2.0;
    if mid < b { mid } else { a }
}
