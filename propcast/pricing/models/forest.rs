use ndarray::{Array2, ArrayView1};
use rand::{rngs::SmallRng, seq::index, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::PricingError;

/// Hyper-parameters of the forest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    /// Number of trees.
    pub trees: usize,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Minimum samples on each side of a split.
    pub min_samples_leaf: usize,
    /// Fraction of columns considered at each split.
    pub feature_fraction: f64,
    /// Base seed; tree `i` uses `seed + i`.
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                // unreachable for validated trees
                None => return 0.0,
            }
        }
    }

    fn is_well_formed(&self, n_features: usize) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(idx, node)| match node {
                TreeNode::Leaf { value } => value.is_finite(),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    *feature < n_features
                        && threshold.is_finite()
                        && *left > idx
                        && *right > idx
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
            })
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct TreeGrower<'a> {
    features: &'a Array2<f64>,
    labels: &'a [f64],
    params: &'a ForestParams,
    columns_per_split: usize,
    nodes: Vec<TreeNode>,
}

impl TreeGrower<'_> {
    fn grow(&mut self, indices: &mut [usize], depth: usize, rng: &mut SmallRng) -> usize {
        let node_id = self.nodes.len();
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let y = self.labels[i];
            (s + y, sq + y * y)
        });
        let count = indices.len() as f64;
        let mean = sum / count;
        self.nodes.push(TreeNode::Leaf { value: mean });

        let min_leaf = self.params.min_samples_leaf.max(1);
        if depth >= self.params.max_depth || indices.len() < 2 * min_leaf {
            return node_id;
        }
        let parent_sse = sum_sq - sum * sum / count;
        if parent_sse <= 1e-12 {
            return node_id;
        }
        let Some(split) = self.best_split(indices, min_leaf, rng) else {
            return node_id;
        };
        if split.score >= parent_sse - 1e-12 {
            return node_id;
        }

        let mut mid = 0;
        for k in 0..indices.len() {
            if self.features[[indices[k], split.feature]] <= split.threshold {
                indices.swap(k, mid);
                mid += 1;
            }
        }
        if mid == 0 || mid == indices.len() {
            return node_id;
        }
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = self.grow(left_idx, depth + 1, rng);
        let right = self.grow(right_idx, depth + 1, rng);
        self.nodes[node_id] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    fn best_split(&self, indices: &[usize], min_leaf: usize, rng: &mut SmallRng) -> Option<Split> {
        let width = self.features.ncols();
        let candidates = index::sample(rng, width, self.columns_per_split).into_vec();
        let mut best: Option<Split> = None;
        let mut order = indices.to_vec();

        for feature in candidates {
            let column = self.features.column(feature);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));
            let total: f64 = order.iter().map(|&i| self.labels[i]).sum();
            let total_sq: f64 = order.iter().map(|&i| self.labels[i].powi(2)).sum();
            let n = order.len();

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let y = self.labels[order[pos]];
                left_sum += y;
                left_sq += y * y;
                let left_n = pos + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let here = column[order[pos]];
                let next = column[order[pos + 1]];
                if here >= next {
                    continue;
                }
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let score = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);
                if best.as_ref().map_or(true, |b| score < b.score) {
                    best = Some(Split {
                        feature,
                        threshold: midpoint(here, next),
                        score,
                    });
                }
            }
        }
        best
    }
}

fn midpoint(low: f64, high: f64) -> f64 {
    let mid = low + (high - low) / 2.0;
    if mid >= high {
        low
    } else {
        mid
    }
}

/// Bagged ensemble of CART regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForestRegressor {
    /// Fits the forest. Deterministic for a given seed.
    pub fn fit(
        features: &Array2<f64>,
        labels: &[f64],
        params: &ForestParams,
    ) -> Result<Self, PricingError> {
        let rows = features.nrows();
        if rows == 0 || rows != labels.len() {
            return Err(PricingError::Training(format!(
                "forest needs matching non-empty inputs, got {rows} rows and {} labels",
                labels.len()
            )));
        }
        if labels.iter().any(|y| !y.is_finite()) {
            return Err(PricingError::Training("labels must be finite".into()));
        }
        if params.trees == 0 {
            return Err(PricingError::Training("forest needs at least one tree".into()));
        }

        let width = features.ncols();
        let columns_per_split = if width == 0 {
            0
        } else {
            ((params.feature_fraction * width as f64).round() as usize).clamp(1, width)
        };

        let mut trees = Vec::with_capacity(params.trees);
        for tree_idx in 0..params.trees {
            let mut rng = SmallRng::seed_from_u64(params.seed.wrapping_add(tree_idx as u64));
            let mut sample: Vec<usize> = (0..rows).map(|_| rng.gen_range(0..rows)).collect();
            let mut grower = TreeGrower {
                features,
                labels,
                params,
                columns_per_split,
                nodes: Vec::new(),
            };
            if columns_per_split == 0 {
                grower.nodes.push(TreeNode::Leaf {
                    value: sample.iter().map(|&i| labels[i]).sum::<f64>() / rows as f64,
                });
            } else {
                grower.grow(&mut sample, 0, &mut rng);
            }
            trees.push(RegressionTree {
                nodes: grower.nodes,
            });
        }

        Ok(Self {
            trees,
            n_features: width,
        })
    }

    /// Mean prediction over all trees. Caller guarantees the row width.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let owned;
        let slice = if let Some(slice) = row.as_slice() {
            slice
        } else {
            owned = row.to_vec();
            &owned
        };
        self.predict_slice(slice)
    }

    pub(crate) fn predict_slice(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.predict(row)).sum();
        total / self.trees.len() as f64
    }

    /// Width the forest was fitted with.
    #[must_use]
    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of trees.
    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Structural check used after deserialization.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.trees.is_empty()
            && self
                .trees
                .iter()
                .all(|tree| tree.is_well_formed(self.n_features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(trees: usize) -> ForestParams {
        ForestParams {
            trees,
            max_depth: 8,
            min_samples_leaf: 1,
            feature_fraction: 1.0,
            seed: 42,
        }
    }

    fn step_data() -> (Array2<f64>, Vec<f64>) {
        let features = array![
            [0.0, 1.0],
            [1.0, 1.0],
            [2.0, 0.0],
            [3.0, 0.0],
            [4.0, 1.0],
            [5.0, 0.0],
            [6.0, 1.0],
            [7.0, 0.0]
        ];
        let labels = vec![10.0, 10.0, 10.0, 10.0, 50.0, 50.0, 50.0, 50.0];
        (features, labels)
    }

    #[test]
    fn learns_a_step_function() {
        let (features, labels) = step_data();
        let forest = RandomForestRegressor::fit(&features, &labels, &params(25)).unwrap();
        assert!(forest.is_well_formed());
        assert_eq!(forest.tree_count(), 25);
        let low = forest.predict_slice(&[0.5, 1.0]);
        let high = forest.predict_slice(&[6.5, 1.0]);
        assert!(low < 30.0, "low={low}");
        assert!(high > 30.0, "high={high}");
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let (features, labels) = step_data();
        let a = RandomForestRegressor::fit(&features, &labels, &params(10)).unwrap();
        let b = RandomForestRegressor::fit(&features, &labels, &params(10)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn predictions_stay_within_label_range() {
        let (features, labels) = step_data();
        let forest = RandomForestRegressor::fit(&features, &labels, &params(10)).unwrap();
        for x in [-100.0, 3.5, 100.0] {
            let y = forest.predict_row(array![x, 0.5].view());
            assert!((10.0..=50.0).contains(&y));
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        let (features, _) = step_data();
        assert!(RandomForestRegressor::fit(&features, &[1.0], &params(3)).is_err());
        let labels = vec![f64::NAN; 8];
        assert!(RandomForestRegressor::fit(&features, &labels, &params(3)).is_err());
        let (features, labels) = step_data();
        assert!(RandomForestRegressor::fit(&features, &labels, &params(0)).is_err());
    }
}
