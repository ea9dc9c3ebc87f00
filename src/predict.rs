use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embedding::{DEFAULT_COMPONENTS, column_matrix, compute_group_embeddings, median_impute};
use crate::error::ModelError;
use crate::market_value::format_market_value;
use crate::regressors::{GbtParams, GradientBoostedTrees, HistGradientBoosting, HistParams, Regressor, Ridge};
use crate::schema::PositionSchema;
use crate::table::{Cell, Table};

pub const TARGET_COLUMN: &str = "Market_Value_EUR";
pub const PREDICTED_COLUMN: &str = "Predicted_Value";
pub const PREDICTED_TEXT_COLUMN: &str = "Predicted_Value_Text";
pub const PERCENTILE_COLUMN: &str = "Value_Percentile";

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Blend of the four ensemble members; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub raw_tree: f64,
    pub embedding_tree: f64,
    pub histogram: f64,
    pub ridge: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            raw_tree: 0.35,
            embedding_tree: 0.35,
            histogram: 0.20,
            ridge: 0.10,
        }
    }
}

impl EnsembleWeights {
    pub fn new(raw_tree: f64, embedding_tree: f64, histogram: f64, ridge: f64) -> Result<Self, ModelError> {
        let w = Self {
            raw_tree,
            embedding_tree,
            histogram,
            ridge,
        };
        w.validate()?;
        Ok(w)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let parts = [self.raw_tree, self.embedding_tree, self.histogram, self.ridge];
        let sum: f64 = parts.iter().sum();
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) || (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ModelError::InvalidWeights { sum });
        }
        Ok(())
    }

    /// Parses `"0.35,0.35,0.20,0.10"` (raw tree, embedding tree, histogram, ridge).
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("invalid ensemble weights '{raw}'"))?;
        let [a, b, c, d] = parts[..] else {
            bail!("expected 4 ensemble weights, got {}", parts.len());
        };
        Ok(Self::new(a, b, c, d)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    pub weights: EnsembleWeights,
    pub n_components: usize,
    /// Fewest rows with a known target needed to fit the ensemble.
    pub min_train_rows: usize,
    pub gbt: GbtParams,
    pub hist: HistParams,
    pub ridge_alpha: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            weights: EnsembleWeights::default(),
            n_components: DEFAULT_COMPONENTS,
            min_train_rows: 2,
            gbt: GbtParams::default(),
            hist: HistParams::default(),
            ridge_alpha: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupScore {
    pub group: String,
    pub rows: usize,
    pub trained_rows: usize,
    pub raw_features: Vec<String>,
    pub embedding_features: Vec<String>,
}

/// Dense matrix over `columns`, dropping columns that are entirely missing or
/// constant, then median-imputing the rest. Returns the kept column names.
pub fn feature_matrix(table: &Table, columns: &[String]) -> (Array2<f64>, Vec<String>) {
    let kept: Vec<String> = columns
        .iter()
        .filter(|c| {
            let Some(values) = table.numeric_column(c) else {
                return false;
            };
            let mut finite = values.into_iter().flatten().filter(|v| v.is_finite());
            match finite.next() {
                Some(first) => finite.any(|v| v != first),
                None => false,
            }
        })
        .cloned()
        .collect();
    let mut x = column_matrix(table, &kept);
    median_impute(&mut x);
    (x, kept)
}

/// Percentile of each value among all values: `(average rank - 1) / (n - 1)`,
/// ties sharing the average rank of their span. A single value sits at 0.5;
/// non-finite values get NaN and are not ranked.
pub fn percentile_rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let n = order.len();
    let mut out = vec![f64::NAN; values.len()];
    if n == 1 {
        out[order[0]] = 0.5;
        return out;
    }
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1 ..= end+1.
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        let pct = (avg_rank - 1.0) / (n - 1) as f64;
        for &i in &order[start..=end] {
            out[i] = pct;
        }
        start = end + 1;
    }
    out
}

fn fit_predict(
    model: &mut dyn Regressor,
    x: &Array2<f64>,
    train: &[usize],
    y: &Array1<f64>,
) -> Result<Array1<f64>, ModelError> {
    let x_train = x.select(Axis(0), train);
    model.fit(&x_train, y)?;
    let pred = model.predict(x);
    debug!(model = model.name(), rows = x.nrows(), features = x.ncols(), "model fitted");
    Ok(pred)
}

/// Scores one position group in place.
///
/// Appends bundle embeddings, fits the four-member ensemble on log1p market
/// value over rows with a known target, and writes the predicted value, its
/// text form and the in-group percentile.
pub fn predict_position_group(
    table: &mut Table,
    schema: &PositionSchema,
    standardized: &[String],
    config: &PredictorConfig,
) -> Result<GroupScore, ModelError> {
    config.weights.validate()?;
    if table.is_empty() {
        return Err(ModelError::Empty);
    }
    let embeddings = compute_group_embeddings(table, schema, config.n_components);
    let (x_raw, raw_features) = feature_matrix(table, standardized);
    let (x_emb, embedding_features) = feature_matrix(table, &embeddings);

    let target = table.numeric_column(TARGET_COLUMN).unwrap_or_default();
    let train: Vec<usize> = target
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_some_and(|v| v.is_finite() && v >= 0.0))
        .map(|(i, _)| i)
        .collect();
    if train.len() < config.min_train_rows.max(1) {
        return Err(ModelError::InsufficientRows {
            needed: config.min_train_rows.max(1),
            got: train.len(),
        });
    }
    let y: Array1<f64> = train.iter().filter_map(|&i| target[i]).map(f64::ln_1p).collect();

    let n = table.len();
    let raw_tree = fit_predict(&mut GradientBoostedTrees::new(config.gbt), &x_raw, &train, &y)?;
    let emb_tree = if embedding_features.is_empty() {
        Array1::zeros(n)
    } else {
        fit_predict(&mut GradientBoostedTrees::new(config.gbt), &x_emb, &train, &y)?
    };
    let hist = fit_predict(&mut HistGradientBoosting::new(config.hist), &x_raw, &train, &y)?;
    let ridge = fit_predict(&mut Ridge::new(config.ridge_alpha), &x_raw, &train, &y)?;

    let w = config.weights;
    let blended = raw_tree * w.raw_tree + emb_tree * w.embedding_tree + hist * w.histogram + ridge * w.ridge;
    let values: Vec<u64> = blended
        .iter()
        .map(|v| {
            let eur = v.exp_m1();
            if eur.is_finite() { eur.max(0.0).round() as u64 } else { 0 }
        })
        .collect();
    let as_f64: Vec<f64> = values.iter().map(|v| *v as f64).collect();
    let percentiles = percentile_rank(&as_f64);

    table.set_column(PREDICTED_COLUMN, as_f64.iter().map(|v| Cell::Num(*v)).collect());
    table.set_column(
        PREDICTED_TEXT_COLUMN,
        values.iter().map(|v| Cell::Text(format_market_value(*v))).collect(),
    );
    table.set_column(PERCENTILE_COLUMN, percentiles.into_iter().map(Cell::Num).collect());

    info!(
        group = %schema.group,
        rows = n,
        trained = train.len(),
        raw_features = raw_features.len(),
        embedding_features = embedding_features.len(),
        "position group scored"
    );
    Ok(GroupScore {
        group: schema.group.clone(),
        rows: n,
        trained_rows: train.len(),
        raw_features,
        embedding_features,
    })
}
