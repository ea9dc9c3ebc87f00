use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

use crate::error::ModelError;

pub const RANDOM_SEED: u64 = 42;

/// A regressor fitted on a dense, fully imputed feature matrix.
pub trait Regressor {
    fn name(&self) -> &'static str;
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), ModelError>;
    fn predict(&self, x: &Array2<f64>) -> Array1<f64>;
}

fn check_shapes(x: &Array2<f64>, y: &Array1<f64>) -> Result<(), ModelError> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return Err(ModelError::Empty);
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree; rows with `value <= threshold` go left.
#[derive(Debug, Clone, Default)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(Node::Leaf(v)) => return *v,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Pre-binned feature codes for histogram split search.
struct Bins {
    codes: Array2<u8>,
    /// Per feature, sorted bin upper edges; bin `b` holds values `<= edges[b]`.
    edges: Vec<Vec<f64>>,
}

impl Bins {
    fn build(x: &Array2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 256);
        let mut edges = Vec::with_capacity(x.ncols());
        for column in x.axis_iter(Axis(1)) {
            let mut distinct: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            distinct.sort_by(f64::total_cmp);
            distinct.dedup();
            let e: Vec<f64> = if distinct.len() <= max_bins {
                distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
            } else {
                let mut e: Vec<f64> = (1..max_bins)
                    .map(|i| {
                        let pos = i * (distinct.len() - 1) / max_bins;
                        (distinct[pos] + distinct[pos + 1]) / 2.0
                    })
                    .collect();
                e.dedup();
                e
            };
            edges.push(e);
        }
        let mut codes = Array2::<u8>::zeros(x.dim());
        for ((i, j), v) in x.indexed_iter() {
            codes[[i, j]] = edges[j].partition_point(|e| *e < *v) as u8;
        }
        Self { codes, edges }
    }
}

enum SplitSearch<'a> {
    Exact,
    Histogram(&'a Bins),
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    residual: &'a [f64],
    features: &'a [usize],
    search: SplitSearch<'a>,
    max_depth: usize,
    min_leaf: usize,
    l2: f64,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>) -> Tree {
        let mut tree = Tree::default();
        self.grow(&mut tree, rows, 0);
        tree
    }

    fn leaf_value(&self, rows: &[usize]) -> f64 {
        let sum: f64 = rows.iter().map(|&r| self.residual[r]).sum();
        sum / (rows.len() as f64 + self.l2)
    }

    fn score(&self, sum: f64, n: usize) -> f64 {
        sum * sum / (n as f64 + self.l2)
    }

    fn grow(&self, tree: &mut Tree, rows: Vec<usize>, depth: usize) -> usize {
        let id = tree.nodes.len();
        tree.nodes.push(Node::Leaf(self.leaf_value(&rows)));
        if depth >= self.max_depth || rows.len() < 2 * self.min_leaf.max(1) {
            return id;
        }
        let best = match self.search {
            SplitSearch::Exact => self.best_exact_split(&rows),
            SplitSearch::Histogram(bins) => self.best_histogram_split(bins, &rows),
        };
        let Some(split) = best else {
            return id;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[[r, split.feature]] <= split.threshold);
        let left = self.grow(tree, left_rows, depth + 1);
        let right = self.grow(tree, right_rows, depth + 1);
        tree.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_exact_split(&self, rows: &[usize]) -> Option<Split> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&r| self.residual[r]).sum();
        let parent = self.score(total, n);
        let mut best: Option<Split> = None;
        let mut order = rows.to_vec();
        for &f in self.features {
            order.sort_by(|&a, &b| self.x[[a, f]].total_cmp(&self.x[[b, f]]));
            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                left_sum += self.residual[order[i]];
                let nl = i + 1;
                if nl < self.min_leaf || n - nl < self.min_leaf {
                    continue;
                }
                let v = self.x[[order[i], f]];
                let next = self.x[[order[i + 1], f]];
                if v == next {
                    continue;
                }
                let gain = self.score(left_sum, nl) + self.score(total - left_sum, n - nl) - parent;
                if gain > 1e-12 && best.is_none_or(|b| gain > b.gain) {
                    best = Some(Split {
                        feature: f,
                        threshold: (v + next) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }

    fn best_histogram_split(&self, bins: &Bins, rows: &[usize]) -> Option<Split> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&r| self.residual[r]).sum();
        let parent = self.score(total, n);
        let mut best: Option<Split> = None;
        for &f in self.features {
            let edges = &bins.edges[f];
            if edges.is_empty() {
                continue;
            }
            let mut sums = vec![0.0; edges.len() + 1];
            let mut counts = vec![0usize; edges.len() + 1];
            for &r in rows {
                let b = bins.codes[[r, f]] as usize;
                sums[b] += self.residual[r];
                counts[b] += 1;
            }
            let (mut left_sum, mut nl) = (0.0, 0usize);
            for b in 0..edges.len() {
                left_sum += sums[b];
                nl += counts[b];
                if counts[b] == 0 || nl < self.min_leaf || n - nl < self.min_leaf {
                    continue;
                }
                let gain = self.score(left_sum, nl) + self.score(total - left_sum, n - nl) - parent;
                if gain > 1e-12 && best.is_none_or(|s| gain > s.gain) {
                    best = Some(Split {
                        feature: f,
                        threshold: edges[b],
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub colsample: f64,
    pub l2: f64,
    pub seed: u64,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_estimators: 400,
            learning_rate: 0.05,
            max_depth: 5,
            min_samples_leaf: 5,
            subsample: 0.9,
            colsample: 0.9,
            l2: 1.0,
            seed: RANDOM_SEED,
        }
    }
}

/// Least-squares gradient boosting over exact-split trees, with row and
/// column subsampling per tree.
#[derive(Debug, Clone, Default)]
pub struct GradientBoostedTrees {
    params: GbtParams,
    base: f64,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    pub fn new(params: GbtParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }
}

impl Regressor for GradientBoostedTrees {
    fn name(&self) -> &'static str {
        "gbt"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let p = self.params;
        let (n, k) = x.dim();
        let mut rng = StdRng::seed_from_u64(p.seed);
        self.base = y.mean().unwrap_or(0.0);
        self.trees.clear();
        let mut pred = vec![self.base; n];
        let row_take = ((n as f64 * p.subsample).round() as usize).clamp(1, n);
        let col_take = ((k as f64 * p.colsample).round() as usize).clamp(k.min(1), k);
        for _ in 0..p.n_estimators {
            let residual: Vec<f64> = y.iter().zip(&pred).map(|(t, f)| t - f).collect();
            let mut rows = sample(&mut rng, n, row_take).into_vec();
            rows.sort_unstable();
            let mut features = sample(&mut rng, k, col_take).into_vec();
            features.sort_unstable();
            let tree = TreeBuilder {
                x,
                residual: &residual,
                features: &features,
                search: SplitSearch::Exact,
                max_depth: p.max_depth,
                min_leaf: p.min_samples_leaf,
                l2: p.l2,
            }
            .build(rows);
            for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                pred[i] += p.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| {
                self.base
                    + self
                        .trees
                        .iter()
                        .map(|t| self.params.learning_rate * t.predict_row(row))
                        .sum::<f64>()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistParams {
    pub max_iter: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub l2: f64,
}

impl Default for HistParams {
    fn default() -> Self {
        Self {
            max_iter: 300,
            learning_rate: 0.05,
            max_depth: 8,
            min_samples_leaf: 10,
            max_bins: 255,
            l2: 0.0,
        }
    }
}

/// Gradient boosting with splits searched over quantile-binned features.
#[derive(Debug, Clone, Default)]
pub struct HistGradientBoosting {
    params: HistParams,
    base: f64,
    trees: Vec<Tree>,
}

impl HistGradientBoosting {
    pub fn new(params: HistParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }
}

impl Regressor for HistGradientBoosting {
    fn name(&self) -> &'static str {
        "hist_gbt"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let p = self.params;
        let bins = Bins::build(x, p.max_bins);
        let features: Vec<usize> = (0..x.ncols()).collect();
        let rows: Vec<usize> = (0..x.nrows()).collect();
        self.base = y.mean().unwrap_or(0.0);
        self.trees.clear();
        let mut pred = vec![self.base; x.nrows()];
        for _ in 0..p.max_iter {
            let residual: Vec<f64> = y.iter().zip(&pred).map(|(t, f)| t - f).collect();
            let tree = TreeBuilder {
                x,
                residual: &residual,
                features: &features,
                search: SplitSearch::Histogram(&bins),
                max_depth: p.max_depth,
                min_leaf: p.min_samples_leaf,
                l2: p.l2,
            }
            .build(rows.clone());
            for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                pred[i] += p.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| {
                self.base
                    + self
                        .trees
                        .iter()
                        .map(|t| self.params.learning_rate * t.predict_row(row))
                        .sum::<f64>()
            })
            .collect()
    }
}

/// L2-penalised least squares with an unpenalised intercept.
#[derive(Debug, Clone)]
pub struct Ridge {
    alpha: f64,
    intercept: f64,
    coef: Array1<f64>,
}

impl Default for Ridge {
    fn default() -> Self {
        Self::new(3.0)
    }
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            intercept: 0.0,
            coef: Array1::zeros(0),
        }
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coef
    }
}

impl Regressor for Ridge {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let x_mean = x.mean_axis(Axis(0)).ok_or(ModelError::Empty)?;
        let y_mean = y.mean().unwrap_or(0.0);
        let xc = x - &x_mean;
        let yc = y - y_mean;
        let mut gram = xc.t().dot(&xc);
        for i in 0..gram.nrows() {
            gram[[i, i]] += self.alpha;
        }
        let rhs = xc.t().dot(&yc);
        self.coef = cholesky_solve(gram, rhs).ok_or(ModelError::Empty)?;
        self.intercept = y_mean - x_mean.dot(&self.coef);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.coef) + self.intercept
    }
}

/// Solves `a·w = b` for symmetric positive-definite `a`.
fn cholesky_solve(a: Array2<f64>, b: Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }
    let mut w = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * w[k];
        }
        w[i] = sum / l[[i, i]];
    }
    Some(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 7) as f64 });
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        (x, y)
    }

    #[test]
    fn ridge_recovers_slope() {
        let (x, y) = linear_data();
        let mut model = Ridge::new(1e-6);
        model.fit(&x, &y).unwrap();
        assert!((model.coefficients()[0] - 2.0).abs() < 1e-3);
        let pred = model.predict(&array![[10.0, 3.0]]);
        assert!((pred[0] - 21.0).abs() < 1e-2);
    }

    #[test]
    fn boosting_fits_step_function() {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| if v < 30.0 { 1.0 } else { 5.0 });
        let mut gbt = GradientBoostedTrees::default();
        gbt.fit(&x, &y).unwrap();
        let mut hist = HistGradientBoosting::default();
        hist.fit(&x, &y).unwrap();
        let probe = array![[5.0], [50.0]];
        for pred in [gbt.predict(&probe), hist.predict(&probe)] {
            assert!((pred[0] - 1.0).abs() < 0.3, "{pred:?}");
            assert!((pred[1] - 5.0).abs() < 0.3, "{pred:?}");
        }
    }

    #[test]
    fn mismatched_shapes_rejected() {
        let x = Array2::<f64>::zeros((3, 1));
        let y = Array1::<f64>::zeros(2);
        assert_eq!(Ridge::default().fit(&x, &y), Err(ModelError::Empty));
    }
}
