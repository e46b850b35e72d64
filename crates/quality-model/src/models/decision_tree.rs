//! CART regression tree grown on index lists into a shared training matrix.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Node of a flattened regression tree. Children are indices into the node list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TreeNode {
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

/// Growth limits of a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per split; `None` considers all of them.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

struct BestSplit {
    feature: usize,
    position: usize,
    threshold: f64,
    score: f64,
}

/// Node still to be grown: a range of the index buffer and its depth.
struct Pending {
    start: usize,
    end: usize,
    depth: usize,
    /// Split node whose right child this becomes; left children always
    /// directly follow their parent.
    right_of: Option<usize>,
}

impl RegressionTree {
    /// Grow a tree on the rows of `x` listed in `indices` (duplicates allowed).
    ///
    /// Nodes are laid out in depth-first pre-order, left subtree first.
    pub fn fit<R: Rng>(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        indices: &mut [usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut tree = RegressionTree { nodes: Vec::new() };
        if indices.is_empty() {
            return tree;
        }

        let mut stack = vec![Pending {
            start: 0,
            end: indices.len(),
            depth: 0,
            right_of: None,
        }];
        while let Some(task) = stack.pop() {
            let id = tree.nodes.len();
            if let Some(parent) = task.right_of {
                if let TreeNode::Split { right, .. } = &mut tree.nodes[parent] {
                    *right = id;
                }
            }

            let rows = &mut indices[task.start..task.end];
            let n = rows.len();
            let sum: f64 = rows.iter().map(|&i| y[i]).sum();
            tree.nodes.push(TreeNode::Leaf { value: sum / n as f64 });

            let first = y[rows[0]];
            let pure = rows.iter().all(|&i| y[i] == first);
            let depth_reached = params.max_depth.map_or(false, |d| task.depth >= d);
            if pure || depth_reached || n < params.min_samples_split || n < 2 * params.min_samples_leaf {
                continue;
            }

            let Some(best) = best_split(x, y, rows, params, sum, rng) else {
                continue;
            };

            sort_by_feature(x, rows, best.feature);
            tree.nodes[id] = TreeNode::Split {
                feature: best.feature,
                threshold: best.threshold,
                left: id + 1,
                // patched once the right child is placed
                right: id,
            };
            let mid = task.start + best.position;
            stack.push(Pending {
                start: mid,
                end: task.end,
                depth: task.depth + 1,
                right_of: Some(id),
            });
            stack.push(Pending {
                start: task.start,
                end: mid,
                depth: task.depth + 1,
                right_of: None,
            });
        }
        tree
    }

    /// Check a deserialized tree: non-empty, split features below
    /// `n_features`, children after their parent and inside the node list.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature, left, right, ..
            } = node
            {
                if *feature >= n_features {
                    return Err(format!(
                        "node {} splits on feature {} of {}",
                        id, feature, n_features
                    ));
                }
                for child in [*left, *right] {
                    if child <= id || child >= self.nodes.len() {
                        return Err(format!(
                            "node {} has child {} outside {}..{}",
                            id,
                            child,
                            id + 1,
                            self.nodes.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return f64::NAN,
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }
}

fn sort_by_feature(x: ArrayView2<f64>, indices: &mut [usize], feature: usize) {
    indices.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
}

/// Split maximizing `sum_l^2 / n_l + sum_r^2 / n_r`, which is equivalent to
/// minimizing the summed squared error of both children.
fn best_split<R: Rng>(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    indices: &[usize],
    params: &TreeParams,
    sum: f64,
    rng: &mut R,
) -> Option<BestSplit> {
    let n = indices.len();
    let n_features = x.ncols();
    let features: Vec<usize> = match params.max_features {
        Some(k) if k < n_features => {
            let mut drawn = sample(rng, n_features, k).into_vec();
            drawn.sort_unstable();
            drawn
        }
        _ => (0..n_features).collect(),
    };

    let parent_score = sum * sum / n as f64;
    let mut best: Option<BestSplit> = None;
    let mut sorted = indices.to_vec();
    let min_leaf = params.min_samples_leaf;

    for feature in features {
        sorted.copy_from_slice(indices);
        sort_by_feature(x, &mut sorted, feature);

        let mut left_sum = 0.0;
        for pos in 1..n {
            left_sum += y[sorted[pos - 1]];
            if pos < min_leaf || n - pos < min_leaf {
                continue;
            }
            let a = x[[sorted[pos - 1], feature]];
            let b = x[[sorted[pos], feature]];
            if !(a < b) {
                continue;
            }
            let right_sum = sum - left_sum;
            let score = left_sum * left_sum / pos as f64 + right_sum * right_sum / (n - pos) as f64;
            let better = match &best {
                Some(current) => score > current.score,
                None => score > parent_score,
            };
            if better {
                let mid = a + (b - a) / 2.0;
                let threshold = if mid < b { mid } else { a };
                best = Some(BestSplit {
                    feature,
                    position: pos,
                    threshold,
                    score,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn step_function_is_learned_exactly() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![0.0, 0.0, 0.0, 5.0, 5.0, 5.0];
        let mut idx: Vec<usize> = (0..6).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(x.view(), y.view(), &mut idx, &params(), &mut rng);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.predict_row(array![6.5].view()), 0.0);
        assert_eq!(tree.predict_row(array![6.6].view()), 5.0);
    }

    #[test]
    fn max_depth_zero_is_a_single_leaf() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| (i + j) as f64);
        let y = Array1::from_shape_fn(10, |i| i as f64);
        let mut idx: Vec<usize> = (0..10).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = TreeParams {
            max_depth: Some(0),
            ..params()
        };
        let tree = RegressionTree::fit(x.view(), y.view(), &mut idx, &p, &mut rng);
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict_row(x.row(0)), 4.5);
    }

    #[test]
    fn min_samples_leaf_is_respected() {
        let x = Array2::from_shape_fn((8, 1), |(i, _)| i as f64);
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0];
        let mut idx: Vec<usize> = (0..8).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = TreeParams {
            min_samples_leaf: 3,
            ..params()
        };
        let tree = RegressionTree::fit(x.view(), y.view(), &mut idx, &p, &mut rng);
        // the outlier cannot be isolated
        assert!(tree.predict_row(x.row(7)) < 100.0);
    }

    #[test]
    fn constant_features_give_a_leaf() {
        let x = Array2::from_elem((5, 2), 1.0);
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let mut idx: Vec<usize> = (0..5).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(x.view(), y.view(), &mut idx, &params(), &mut rng);
        assert_eq!(tree.n_nodes(), 1);
    }

    #[test]
    fn exponential_targets_grow_a_deep_tree() {
        // distinct increasing targets are split down to one row per leaf
        let n = 400;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(n, |i| 2f64.powi(i as i32));
        let mut idx: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(x.view(), y.view(), &mut idx, &params(), &mut rng);
        assert_eq!(tree.n_leaves(), n);
        assert_eq!(tree.n_nodes(), 2 * n - 1);
        tree.validate(1).unwrap();
        for i in [0, 1, n / 2, n - 1] {
            assert_eq!(tree.predict_row(x.row(i)), y[i]);
        }
    }

    #[test]
    fn children_follow_their_parent() {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| ((i * (j + 3)) % 11) as f64);
        let y = Array1::from_shape_fn(30, |i| (i % 7) as f64);
        let mut idx: Vec<usize> = (0..30).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let tree = RegressionTree::fit(x.view(), y.view(), &mut idx, &params(), &mut rng);
        assert!(tree.n_nodes() > 1);
        tree.validate(2).unwrap();
        assert!(matches!(tree.nodes[0], TreeNode::Split { left: 1, .. }));
    }

    #[test]
    fn validate_rejects_bad_features_and_cycles() {
        let split = |feature, left, right| TreeNode::Split {
            feature,
            threshold: 0.5,
            left,
            right,
        };
        let leaf = TreeNode::Leaf { value: 1.0 };

        let ok = RegressionTree {
            nodes: vec![split(0, 1, 2), leaf.clone(), leaf.clone()],
        };
        assert!(ok.validate(1).is_ok());
        assert!(ok.validate(0).is_err());

        let cycle = RegressionTree {
            nodes: vec![split(0, 0, 2), leaf.clone(), leaf.clone()],
        };
        assert!(cycle.validate(1).is_err());

        let dangling = RegressionTree {
            nodes: vec![split(0, 1, 3), leaf.clone(), leaf],
        };
        assert!(dangling.validate(1).is_err());

        assert!(RegressionTree { nodes: Vec::new() }.validate(1).is_err());
    }
}
