//! Stratified train/test partitioning and repeated stratified k-fold assignment.

use crate::dataset::Dataset;
use crate::error::{ModelSelectionError, Result};
use ndarray::ArrayView1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::debug;

/// Row groups that preserve the distribution of one column.
///
/// A column with at most `bins` distinct values is treated as discrete and
/// every distinct value forms a group. Otherwise rows are grouped by quantile
/// bins. Groups are ordered by ascending key so iteration is deterministic.
#[derive(Debug, Clone)]
pub struct Strata {
    groups: Vec<Vec<usize>>,
}

impl Strata {
    pub fn compute(values: ArrayView1<'_, f64>, bins: usize) -> Result<Self> {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(ModelSelectionError::InvalidInput(format!(
                "cannot stratify on non-finite value {bad}"
            )));
        }
        if values.is_empty() {
            return Ok(Self { groups: Vec::new() });
        }
        if bins < 2 {
            return Ok(Self {
                groups: vec![(0..values.len()).collect()],
            });
        }

        let mut sorted: Vec<f64> = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut distinct = sorted.clone();
        distinct.dedup();

        let keys: Vec<usize> = if distinct.len() <= bins {
            values
                .iter()
                .map(|v| distinct.partition_point(|d| d < v))
                .collect()
        } else {
            let mut cuts: Vec<f64> = (1..bins)
                .map(|i| quantile(&sorted, i as f64 / bins as f64))
                .collect();
            cuts.dedup();
            values
                .iter()
                .map(|v| cuts.partition_point(|c| c < v))
                .collect()
        };

        let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, key) in keys.into_iter().enumerate() {
            grouped.entry(key).or_default().push(row);
        }
        Ok(Self {
            groups: grouped.into_values().collect(),
        })
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn smallest(&self) -> usize {
        self.groups.iter().map(Vec::len).min().unwrap_or(0)
    }
}

/// Type-7 sample quantile of already sorted values.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Disjoint, covering train/test row indices (each sorted ascending).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Stratified random split of `dataset` into train and test rows.
pub fn split(
    dataset: &Dataset,
    train_fraction: f64,
    stratify_column: &str,
    bins: usize,
    seed: u64,
) -> Result<Split> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(ModelSelectionError::InvalidInput(format!(
            "train_fraction must lie strictly between 0 and 1, got {train_fraction}"
        )));
    }
    let n = dataset.n_rows();
    if n < 2 {
        return Err(ModelSelectionError::InsufficientData(format!(
            "cannot split {n} rows into train and test"
        )));
    }

    let strata = Strata::compute(dataset.require_column(stratify_column)?, bins)?;
    if strata.smallest() < 2 {
        return Err(ModelSelectionError::InsufficientData(format!(
            "a stratification group of `{stratify_column}` has {} row(s); at least 2 are required",
            strata.smallest()
        )));
    }

    let n_train = ((n as f64 * train_fraction).round() as usize).clamp(1, n - 1);
    let allocation = apportion(strata.groups(), n_train, n);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n - n_train);
    for (group, &take) in strata.groups().iter().zip(&allocation) {
        let mut rows = group.clone();
        rows.shuffle(&mut rng);
        train.extend_from_slice(&rows[..take]);
        test.extend_from_slice(&rows[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    debug!(
        n_rows = n,
        n_train = train.len(),
        n_test = test.len(),
        n_strata = strata.len(),
        "Split dataset"
    );
    Ok(Split { train, test })
}

/// Largest-remainder allocation of `total` train rows across groups, so the
/// overall train size stays exact while each group keeps its share.
fn apportion(groups: &[Vec<usize>], total: usize, n: usize) -> Vec<usize> {
    let quotas: Vec<f64> = groups
        .iter()
        .map(|group| group.len() as f64 * total as f64 / n as f64)
        .collect();
    let mut allocation: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let assigned: usize = allocation.iter().sum();

    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by(|&a, &b| {
        let frac_a = quotas[a] - quotas[a].floor();
        let frac_b = quotas[b] - quotas[b].floor();
        frac_b.total_cmp(&frac_a).then(a.cmp(&b))
    });
    for &g in order.iter().take(total.saturating_sub(assigned)) {
        allocation[g] = (allocation[g] + 1).min(groups[g].len());
    }
    allocation
}

/// Fold labels for every training row, once per repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldAssignment {
    k: usize,
    labels: Vec<Vec<usize>>,
}

impl FoldAssignment {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn repeats(&self) -> usize {
        self.labels.len()
    }

    pub fn n_rows(&self) -> usize {
        self.labels.first().map_or(0, Vec::len)
    }

    pub fn fold_of(&self, repeat: usize, row: usize) -> usize {
        self.labels[repeat][row]
    }

    /// Held-out rows of `fold` in `repeat`.
    pub fn assessment(&self, repeat: usize, fold: usize) -> Vec<usize> {
        self.rows_where(repeat, |label| label == fold)
    }

    /// Rows used to fit the model when `fold` is held out.
    pub fn analysis(&self, repeat: usize, fold: usize) -> Vec<usize> {
        self.rows_where(repeat, |label| label != fold)
    }

    pub fn fold_sizes(&self, repeat: usize) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &label in &self.labels[repeat] {
            sizes[label] += 1;
        }
        sizes
    }

    fn rows_where(&self, repeat: usize, keep: impl Fn(usize) -> bool) -> Vec<usize> {
        self.labels[repeat]
            .iter()
            .enumerate()
            .filter(|(_, &label)| keep(label))
            .map(|(row, _)| row)
            .collect()
    }
}

/// Repeated stratified k-fold assignment over the rows of `train_set`.
pub fn make_folds(
    train_set: &Dataset,
    k: usize,
    repeats: usize,
    stratify_column: &str,
    bins: usize,
    seed: u64,
) -> Result<FoldAssignment> {
    if k < 2 {
        return Err(ModelSelectionError::InvalidFoldCount(format!(
            "k must be at least 2, got {k}"
        )));
    }
    if repeats == 0 {
        return Err(ModelSelectionError::InvalidInput(
            "repeats must be at least 1".to_string(),
        ));
    }

    let strata = Strata::compute(train_set.require_column(stratify_column)?, bins)?;
    if strata.is_empty() || k > strata.smallest() {
        return Err(ModelSelectionError::InvalidFoldCount(format!(
            "k = {k} exceeds the smallest stratification group of `{stratify_column}` ({} rows)",
            strata.smallest()
        )));
    }

    let n = train_set.n_rows();
    let labels = (0..repeats)
        .map(|repeat| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(repeat as u64));
            let mut labels = vec![0; n];
            let mut offset = 0;
            for group in strata.groups() {
                let mut rows = group.clone();
                rows.shuffle(&mut rng);
                for (i, &row) in rows.iter().enumerate() {
                    labels[row] = (offset + i) % k;
                }
                offset = (offset + rows.len()) % k;
            }
            labels
        })
        .collect();

    debug!(k, repeats, n_rows = n, n_strata = strata.len(), "Assigned folds");
    Ok(FoldAssignment { k, labels })
}
