//! CART regression trees with cost-complexity pruning.

use super::traits::{check_schema, require_rows, FittedModel, ModelFamily};
use crate::dataset::Dataset;
use crate::error::{ModelSelectionError, Result};
use crate::grid::{Grid, Hyperparameters, Levels, ParamSpec, Simpler};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index;
use rand_chacha::ChaCha8Rng;

pub const COST_COMPLEXITY: ParamSpec = ParamSpec::non_negative("cost_complexity", Simpler::Larger);
pub const TREE_DEPTH: ParamSpec = ParamSpec::count("tree_depth", 1, Simpler::Smaller);

/// Regression tree node. Every node keeps its mean and sum of squared errors
/// so a split can later be collapsed back into a leaf.
#[derive(Debug, Clone)]
pub(crate) enum TreeNode {
    Leaf {
        value: f64,
        sse: f64,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        value: f64,
        sse: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub(crate) fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        match self {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split {
                feature_idx,
                threshold,
                left,
                right,
                ..
            } => {
                if row[*feature_idx] <= *threshold {
                    left.predict_row(row)
                } else {
                    right.predict_row(row)
                }
            }
        }
    }

    pub(crate) fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub(crate) fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }

    fn sse(&self) -> f64 {
        match self {
            TreeNode::Leaf { sse, .. } | TreeNode::Split { sse, .. } => *sse,
        }
    }
}

/// Growth limits shared by single trees and forest members.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowthParams {
    pub max_depth: Option<usize>,
    pub min_split: usize,
    pub min_leaf: usize,
    /// Features sampled per node; `None` scans every feature.
    pub mtry: Option<usize>,
}

/// Grows a tree on the rows in `indices` (duplicates allowed, as in a
/// bootstrap sample). `rng` is only consulted when `mtry` is set.
pub(crate) fn grow(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    params: &GrowthParams,
    mut rng: Option<&mut ChaCha8Rng>,
) -> TreeNode {
    grow_node(x, y, indices, params, 0, &mut rng)
}

fn grow_node(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    params: &GrowthParams,
    depth: usize,
    rng: &mut Option<&mut ChaCha8Rng>,
) -> TreeNode {
    let n_samples = indices.len();
    let (sum, sq_sum) = indices
        .iter()
        .fold((0.0, 0.0), |(s, q), &i| (s + y[i], q + y[i] * y[i]));
    let value = if n_samples > 0 { sum / n_samples as f64 } else { 0.0 };
    let sse = node_sse(n_samples, sum, sq_sum);

    let should_stop = n_samples < params.min_split
        || n_samples < 2 * params.min_leaf
        || params.max_depth.map_or(false, |d| depth >= d)
        || sse <= 0.0;
    if should_stop {
        return TreeNode::Leaf { value, sse };
    }

    let candidates: Vec<usize> = match (params.mtry, rng.as_deref_mut()) {
        (Some(mtry), Some(rng)) if mtry < x.ncols() => {
            let mut sampled = index::sample(rng, x.ncols(), mtry).into_vec();
            sampled.sort_unstable();
            sampled
        }
        _ => (0..x.ncols()).collect(),
    };

    let Some((feature_idx, threshold)) = best_split(x, y, indices, &candidates, params.min_leaf, sse) else {
        return TreeNode::Leaf { value, sse };
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[[i, feature_idx]] <= threshold);

    let left = grow_node(x, y, &left_idx, params, depth + 1, rng);
    let right = grow_node(x, y, &right_idx, params, depth + 1, rng);
    TreeNode::Split {
        feature_idx,
        threshold,
        value,
        sse,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn node_sse(n: usize, sum: f64, sq_sum: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (sq_sum - sum * sum / n as f64).max(0.0)
}

/// Best squared-error split over `candidates`. Ties keep the first feature
/// and the lowest threshold encountered.
fn best_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    candidates: &[usize],
    min_leaf: usize,
    parent_sse: f64,
) -> Option<(usize, f64)> {
    let n = indices.len();
    let mut best: Option<(usize, f64, f64)> = None;

    for &feature_idx in candidates {
        let mut pairs: Vec<(f64, f64)> = indices.iter().map(|&i| (x[[i, feature_idx]], y[i])).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();

        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        for split_at in 1..n {
            let (xv, yv) = pairs[split_at - 1];
            left_sum += yv;
            left_sq += yv * yv;
            if split_at < min_leaf || n - split_at < min_leaf || xv == pairs[split_at].0 {
                continue;
            }
            let children = node_sse(split_at, left_sum, left_sq)
                + node_sse(n - split_at, total_sum - left_sum, total_sq - left_sq);
            let gain = parent_sse - children;
            if gain <= parent_sse * 1e-12 {
                continue;
            }
            if best.map_or(true, |(_, _, best_gain)| gain > best_gain) {
                best = Some((feature_idx, (xv + pairs[split_at].0) / 2.0, gain));
            }
        }
    }

    best.map(|(feature_idx, threshold, _)| (feature_idx, threshold))
}

/// Bottom-up cost-complexity pruning. A split survives only if it lowers the
/// subtree's SSE by more than `alpha` per additional leaf.
fn prune(node: TreeNode, alpha: f64) -> TreeNode {
    match node {
        leaf @ TreeNode::Leaf { .. } => leaf,
        TreeNode::Split {
            feature_idx,
            threshold,
            value,
            sse,
            left,
            right,
        } => {
            let left = prune(*left, alpha);
            let right = prune(*right, alpha);
            let subtree_sse = leaf_sse(&left) + leaf_sse(&right);
            let extra_leaves = (left.n_leaves() + right.n_leaves() - 1) as f64;
            if sse - subtree_sse <= alpha * extra_leaves {
                TreeNode::Leaf { value, sse }
            } else {
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    value,
                    sse,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        }
    }
}

/// SSE summed over the leaves below `node`.
fn leaf_sse(node: &TreeNode) -> f64 {
    match node {
        TreeNode::Leaf { sse, .. } => *sse,
        TreeNode::Split { left, right, .. } => leaf_sse(left) + leaf_sse(right),
    }
}

/// Single regression tree tuned over `cost_complexity` and `tree_depth`.
#[derive(Debug, Clone)]
pub struct TreeFamily {
    cost_complexity: Levels,
    tree_depth: Levels,
    min_split: usize,
    min_leaf: usize,
}

impl Default for TreeFamily {
    fn default() -> Self {
        Self::new(Levels::log10(-10.0, -1.0, 5), Levels::regular(1.0, 15.0, 5))
    }
}

impl TreeFamily {
    pub fn new(cost_complexity: Levels, tree_depth: Levels) -> Self {
        Self {
            cost_complexity,
            tree_depth,
            min_split: 20,
            min_leaf: 7,
        }
    }

    pub fn cost_complexity(&self) -> &Levels {
        &self.cost_complexity
    }

    pub fn tree_depth(&self) -> &Levels {
        &self.tree_depth
    }

    /// Minimum node size for a split to be attempted.
    pub fn with_min_split(mut self, min_split: usize) -> Self {
        self.min_split = min_split;
        self
    }

    /// Minimum number of rows in any leaf.
    pub fn with_min_leaf(mut self, min_leaf: usize) -> Self {
        self.min_leaf = min_leaf;
        self
    }
}

pub struct TreeModel {
    feature_names: Vec<String>,
    root: TreeNode,
}

impl TreeModel {
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn n_leaves(&self) -> usize {
        self.root.n_leaves()
    }
}

impl FittedModel for TreeModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, data: &Dataset) -> Result<Array1<f64>> {
        check_schema(&self.feature_names, data)?;
        Ok(data
            .features()
            .rows()
            .into_iter()
            .map(|row| self.root.predict_row(row))
            .collect())
    }
}

impl ModelFamily for TreeFamily {
    fn name(&self) -> &'static str {
        "tree"
    }

    fn hyperparameter_space(&self) -> Result<Grid> {
        Grid::regular(vec![
            (COST_COMPLEXITY, self.cost_complexity.clone()),
            (TREE_DEPTH, self.tree_depth.clone()),
        ])
    }

    fn fit(&self, train: &Dataset, params: &Hyperparameters, _seed: u64) -> Result<Box<dyn FittedModel>> {
        let cost_complexity = params.value(&COST_COMPLEXITY)?;
        let tree_depth = params.count(&TREE_DEPTH)?;
        if self.min_leaf == 0 {
            return Err(ModelSelectionError::invalid_hyperparameter("min_leaf", "must be at least 1"));
        }
        require_rows(self.name(), train)?;

        let growth = GrowthParams {
            max_depth: Some(tree_depth),
            min_split: self.min_split.max(2),
            min_leaf: self.min_leaf,
            mtry: None,
        };
        let indices: Vec<usize> = (0..train.n_rows()).collect();
        let full = grow(train.features(), train.target(), &indices, &growth, None);
        let alpha = cost_complexity * full.sse();
        let root = prune(full, alpha);

        Ok(Box::new(TreeModel {
            feature_names: train.feature_names().to_vec(),
            root,
        }))
    }
}
