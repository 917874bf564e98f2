//! A small CART random forest for binary boundary classification.
//!
//! Trees are grown on bootstrap samples with Gini splits over a random
//! subset of candidate features. Training is fully determined by the seed.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{BoundaryError, Result};

/// Anything that turns a feature vector into a class-1 probability.
pub trait ProbabilityModel {
    /// Number of features a row must have.
    fn n_features(&self) -> usize;

    /// Probability in [0, 1] that the row belongs to the positive class.
    fn predict_proba(&self, features: &[f64]) -> Result<f64>;
}

/// Random forest hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Unlimited when `None`
    pub max_depth: Option<usize>,
    /// A node needs at least this many samples to be split
    pub min_samples_split: usize,
    /// Candidate features per split, `sqrt(n_features)` when `None`
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(BoundaryError::Config("forest.n_trees must be >= 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(BoundaryError::Config(
                "forest.min_samples_split must be >= 2".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(BoundaryError::Config("forest.max_depth must be >= 1".to_string()));
        }
        if self.max_features == Some(0) {
            return Err(BoundaryError::Config(
                "forest.max_features must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    fn candidate_features(&self, n_features: usize) -> usize {
        let k = self
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt() as usize);
        k.clamp(1, n_features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        /// Fraction of positive training samples in the leaf
        positive: f64,
    },
    Split {
        feature: usize,
        /// Samples with `value <= threshold` go left
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A binary decision tree stored as a node arena, root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Structural check for trees that come from outside `fit`: a non-empty
    /// arena whose splits point forward to existing nodes and read existing
    /// features, and whose leaves hold fractions.
    pub fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(BoundaryError::Classifier("tree has no nodes".to_string()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { positive } => {
                    if !(0.0..=1.0).contains(positive) {
                        return Err(BoundaryError::Classifier(format!(
                            "leaf {} has positive fraction {}",
                            index, positive
                        )));
                    }
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(BoundaryError::Classifier(format!(
                            "node {} splits on feature {} of {}",
                            index, feature, n_features
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(BoundaryError::Classifier(format!(
                                "node {} points to node {} of {}",
                                index,
                                child,
                                self.nodes.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Positive fraction of the leaf `row` lands in.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { positive } => return *positive,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn gini(positive: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positive as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

struct TreeGrower<'a> {
    rows: &'a [Vec<f64>],
    labels: &'a [bool],
    params: &'a ForestParams,
    n_candidates: usize,
    nodes: Vec<Node>,
}

impl<'a> TreeGrower<'a> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let total = samples.len();
        let positive = samples.iter().filter(|&&i| self.labels[i]).count();
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            positive: positive as f64 / total as f64,
        });

        let pure = positive == 0 || positive == total;
        let too_small = total < self.params.min_samples_split;
        let too_deep = self.params.max_depth.is_some_and(|max| depth >= max);
        if pure || too_small || too_deep {
            return index;
        }

        let Some((feature, threshold)) = self.best_split(&samples, rng) else {
            return index;
        };
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.rows[i][feature] <= threshold);
        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);
        self.nodes[index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    /// Lowest weighted Gini split over a random subset of features. When none
    /// of the candidates can split the node, the remaining features are
    /// tried in random order until one can.
    fn best_split(&self, samples: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n_features = self.rows[0].len();
        let total = samples.len();
        let total_positive = samples.iter().filter(|&&i| self.labels[i]).count();
        let mut best: Option<(f64, usize, f64)> = None;

        for (visited, feature) in sample(rng, n_features, n_features).into_iter().enumerate() {
            if visited >= self.n_candidates && best.is_some() {
                break;
            }
            let mut column: Vec<(f64, bool)> = samples
                .iter()
                .map(|&i| (self.rows[i][feature], self.labels[i]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_positive = 0;
            for split in 1..total {
                if column[split - 1].1 {
                    left_positive += 1;
                }
                let (lower, upper) = (column[split - 1].0, column[split].0);
                if lower >= upper {
                    continue;
                }
                let right_positive = total_positive - left_positive;
                let impurity = (split as f64 * gini(left_positive, split)
                    + (total - split) as f64 * gini(right_positive, total - split))
                    / total as f64;
                if best.map_or(true, |(b, _, _)| impurity < b) {
                    let mut threshold = lower + (upper - lower) / 2.0;
                    if threshold >= upper {
                        threshold = lower;
                    }
                    best = Some((impurity, feature, threshold));
                }
            }
        }
        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

/// Bagged ensemble of decision trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest on `rows` (one feature vector per sample) and boolean
    /// labels. All values must be finite.
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &ForestParams) -> Result<Self> {
        params.validate()?;
        if rows.is_empty() {
            return Err(BoundaryError::Classifier("no training samples".to_string()));
        }
        if rows.len() != labels.len() {
            return Err(BoundaryError::Classifier(format!(
                "{} samples but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let n_features = rows[0].len();
        if n_features == 0 {
            return Err(BoundaryError::Classifier("samples have no features".to_string()));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_features {
                return Err(BoundaryError::Classifier(format!(
                    "sample {} has {} features, expected {}",
                    i,
                    row.len(),
                    n_features
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(BoundaryError::Classifier(format!(
                    "sample {} contains a non-finite value",
                    i
                )));
            }
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = rows.len();
        let mut trees = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut grower = TreeGrower {
                rows,
                labels,
                params,
                n_candidates: params.candidate_features(n_features),
                nodes: Vec::new(),
            };
            grower.grow(bootstrap, 0, &mut rng);
            trees.push(DecisionTree {
                nodes: grower.nodes,
            });
        }
        Ok(RandomForest {
            params: params.clone(),
            n_features,
            trees,
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Check a deserialized forest before it is used for prediction.
    pub fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            return Err(BoundaryError::Classifier("forest has no features".to_string()));
        }
        if self.trees.is_empty() {
            return Err(BoundaryError::Classifier("forest has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| BoundaryError::Classifier(format!("tree {}: {}", i, e)))?;
        }
        Ok(())
    }
}

impl ProbabilityModel for RandomForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.n_features {
            return Err(BoundaryError::Data(format!(
                "expected {} features, got {}",
                self.n_features,
                features.len()
            )));
        }
        if self.trees.is_empty() {
            return Err(BoundaryError::Classifier("forest has no trees".to_string()));
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict_proba(features)).sum();
        Ok(sum / self.trees.len() as f64)
    }
}
