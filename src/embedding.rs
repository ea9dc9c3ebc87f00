use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::error::ModelError;
use crate::schema::PositionSchema;
use crate::table::{Cell, Table};

pub const DEFAULT_COMPONENTS: usize = 3;

const JACOBI_SWEEPS: usize = 100;
const JACOBI_EPS: f64 = 1e-22;

/// Median of the finite values, `None` when there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    })
}

/// Replaces NaN entries with their column median (0 for all-NaN columns).
pub fn median_impute(matrix: &mut Array2<f64>) {
    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let values: Vec<f64> = column.iter().copied().collect();
        let fill = median(&values).unwrap_or(0.0);
        column.mapv_inplace(|v| if v.is_finite() { v } else { fill });
    }
}

/// Rows x columns matrix of the named table columns, NaN for missing cells.
pub fn column_matrix(table: &Table, columns: &[String]) -> Array2<f64> {
    let mut m = Array2::from_elem((table.len(), columns.len()), f64::NAN);
    for (j, col) in columns.iter().enumerate() {
        if let Some(values) = table.numeric_column(col) {
            for (i, v) in values.into_iter().enumerate() {
                if let Some(v) = v {
                    m[[i, j]] = v;
                }
            }
        }
    }
    m
}

/// Principal components of a dense matrix, by eigen-decomposition of the
/// sample covariance.
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Array1<f64>,
    /// One component per row.
    components: Array2<f64>,
    explained_variance: Vec<f64>,
}

impl Pca {
    pub fn fit(x: &Array2<f64>, n_components: usize) -> Result<Self, ModelError> {
        let (n, p) = x.dim();
        if n == 0 || p == 0 {
            return Err(ModelError::Empty);
        }
        let k = n_components.min(p).min(n).max(1);
        let mean = x.mean_axis(Axis(0)).ok_or(ModelError::Empty)?;
        let centered = x - &mean;
        let denom = (n.saturating_sub(1)).max(1) as f64;
        let cov = centered.t().dot(&centered) / denom;

        let (values, vectors) = jacobi_eigen(cov);
        let mut order: Vec<usize> = (0..p).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

        let mut components = Array2::zeros((k, p));
        let mut explained_variance = Vec::with_capacity(k);
        for (row, &idx) in order.iter().take(k).enumerate() {
            let mut v = vectors.column(idx).to_owned();
            // Deterministic sign: largest-magnitude loading is positive.
            let pivot = v.iter().copied().fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                v.mapv_inplace(|x| -x);
            }
            components.row_mut(row).assign(&v);
            explained_variance.push(values[idx].max(0.0));
        }
        Ok(Self {
            mean,
            components,
            explained_variance,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean).dot(&self.components.t())
    }
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix. Returns the
/// eigenvalues and the eigenvectors as columns.
fn jacobi_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    for _ in 0..JACOBI_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off < JACOBI_EPS {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[[k, p]], a[[k, q]]);
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[[p, k]], a[[q, k]]);
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    let values = (0..n).map(|i| a[[i, i]]).collect();
    (values, v)
}

/// Embedding column name for one bundle component (1-based).
pub fn embedding_column(bundle: &str, component: usize) -> String {
    format!("{bundle}_emb_{component}")
}

/// Fits one PCA per feature bundle of `schema` on `table` and appends the
/// `<bundle>_emb_<i>` columns. Bundles with fewer than two usable columns
/// (present and not entirely missing) are skipped. Returns the new columns.
pub fn compute_group_embeddings(table: &mut Table, schema: &PositionSchema, n_components: usize) -> Vec<String> {
    let mut written = Vec::new();
    if table.is_empty() {
        return written;
    }
    for bundle in &schema.bundles {
        let usable: Vec<String> = bundle
            .columns
            .iter()
            .filter(|c| {
                table
                    .numeric_column(c)
                    .is_some_and(|vals| vals.iter().any(|v| v.is_some_and(f64::is_finite)))
            })
            .cloned()
            .collect();
        if usable.len() < 2 {
            debug!(group = %schema.group, bundle = %bundle.name, usable = usable.len(), "bundle skipped");
            continue;
        }
        let mut x = column_matrix(table, &usable);
        median_impute(&mut x);
        let pca = match Pca::fit(&x, n_components) {
            Ok(pca) => pca,
            Err(err) => {
                debug!(bundle = %bundle.name, "pca skipped: {err}");
                continue;
            }
        };
        let scores = pca.transform(&x);
        for c in 0..pca.n_components() {
            let name = embedding_column(&bundle.name, c + 1);
            table.set_column(&name, scores.column(c).iter().map(|v| Cell::Num(*v)).collect());
            written.push(name);
        }
    }
    debug!(group = %schema.group, columns = written.len(), "embeddings computed");
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn median_handles_even_and_nan() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, f64::NAN, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[f64::NAN]), None);
    }

    #[test]
    fn jacobi_recovers_diagonal() {
        let (mut vals, _) = jacobi_eigen(array![[2.0, 1.0], [1.0, 2.0]]);
        vals.sort_by(f64::total_cmp);
        assert!((vals[0] - 1.0).abs() < 1e-9);
        assert!((vals[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn pca_first_component_follows_correlated_axis() {
        let x = array![[1.0, 1.1], [2.0, 1.9], [3.0, 3.2], [4.0, 3.9]];
        let pca = Pca::fit(&x, 3).unwrap();
        assert_eq!(pca.n_components(), 2);
        let first = pca.components.row(0);
        assert!(first[0] > 0.6 && first[1] > 0.6);
        assert!(pca.explained_variance()[0] > pca.explained_variance()[1]);
    }
}
