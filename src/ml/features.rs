use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::indicators::{
    defined, diff, expanding_mean, rolling_mean, rolling_std, shift, stl, StlError, StlParams,
};
use crate::types::Observation;

/// Which derived columns to build and with which offsets/windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Offsets for raw lag columns.
    pub lags: Vec<usize>,
    /// Window sizes for the rolling mean/std of the one-row-shifted series.
    pub windows: Vec<usize>,
    /// Periods for the lagged difference columns.
    pub diff_lags: Vec<usize>,
    /// Seasonal period of the STL decomposition, in samples.
    pub period: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2],
            windows: vec![2, 3],
            diff_lags: vec![1, 2],
            period: 10,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.lags.iter().any(|&k| k == 0) {
            errors.push("features.lags must be > 0 (lag 0 is the label itself)".to_string());
        }
        if self.windows.iter().any(|&w| w < 2) {
            errors.push("features.windows must be >= 2".to_string());
        }
        if self.diff_lags.iter().any(|&k| k == 0) {
            errors.push("features.diff_lags must be > 0".to_string());
        }
        if self.period < 2 {
            errors.push("features.period must be >= 2".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Column layout of every table derived with this config.
    pub fn columns(&self) -> Vec<FeatureColumn> {
        let mut columns = Vec::new();
        columns.extend(self.lags.iter().map(|&k| FeatureColumn::Lag(k)));
        columns.extend(self.windows.iter().map(|&w| FeatureColumn::RollingMean(w)));
        columns.extend(self.windows.iter().map(|&w| FeatureColumn::RollingStd(w)));
        columns.extend(self.diff_lags.iter().map(|&k| FeatureColumn::Diff(k)));
        columns.extend([
            FeatureColumn::Trend,
            FeatureColumn::Seasonal,
            FeatureColumn::Residual,
            FeatureColumn::ExpandingMean,
        ]);
        columns
    }

    pub fn stl_params(&self) -> StlParams {
        StlParams::for_period(self.period)
    }

    /// Observations needed before the last row of a table is fully defined.
    pub fn min_history(&self) -> usize {
        let lag = self.lags.iter().max().map_or(0, |k| k + 1);
        let window = self.windows.iter().max().map_or(0, |w| w + 1);
        let diff = self.diff_lags.iter().max().map_or(0, |k| k + 1);
        [lag, window, diff, self.stl_params().min_observations(), 2]
            .into_iter()
            .max()
            .unwrap_or(2)
    }
}

/// A named derived column. Names match the persisted model metadata and the
/// JSON feature dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FeatureColumn {
    Lag(usize),
    RollingMean(usize),
    RollingStd(usize),
    Diff(usize),
    Trend,
    Seasonal,
    Residual,
    ExpandingMean,
}

impl FeatureColumn {
    pub fn name(&self) -> String {
        match self {
            FeatureColumn::Lag(k) => format!("lag_{}", k),
            FeatureColumn::RollingMean(w) => format!("rolling_{}_mean", w),
            FeatureColumn::RollingStd(w) => format!("rolling_{}_std", w),
            FeatureColumn::Diff(k) => format!("value_lag_{}", k),
            FeatureColumn::Trend => "trend".to_string(),
            FeatureColumn::Seasonal => "seasonal".to_string(),
            FeatureColumn::Residual => "resid".to_string(),
            FeatureColumn::ExpandingMean => "expanding_mean_1".to_string(),
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for FeatureColumn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let parse = |n: &str| -> anyhow::Result<usize> {
            n.parse()
                .map_err(|_| anyhow::anyhow!("Unknown feature column: {}", s))
        };

        match s {
            "trend" => return Ok(FeatureColumn::Trend),
            "seasonal" => return Ok(FeatureColumn::Seasonal),
            "resid" => return Ok(FeatureColumn::Residual),
            "expanding_mean_1" => return Ok(FeatureColumn::ExpandingMean),
            _ => {}
        }

        if let Some(k) = s.strip_prefix("value_lag_") {
            return Ok(FeatureColumn::Diff(parse(k)?));
        }
        if let Some(k) = s.strip_prefix("lag_") {
            return Ok(FeatureColumn::Lag(parse(k)?));
        }
        if let Some(rest) = s.strip_prefix("rolling_") {
            if let Some(w) = rest.strip_suffix("_mean") {
                return Ok(FeatureColumn::RollingMean(parse(w)?));
            }
            if let Some(w) = rest.strip_suffix("_std") {
                return Ok(FeatureColumn::RollingStd(parse(w)?));
            }
        }
        Err(anyhow::anyhow!("Unknown feature column: {}", s))
    }
}

impl TryFrom<String> for FeatureColumn {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<FeatureColumn> for String {
    fn from(column: FeatureColumn) -> Self {
        column.name()
    }
}

/// One row per observation. `value` and `date` are the supervision columns
/// and never part of the model input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub value: f64,
    pub features: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn is_complete(&self) -> bool {
        self.features.iter().all(Option::is_some)
    }

    /// Model input, or `None` if any cell is undefined.
    pub fn feature_vector(&self) -> Option<Vec<f64>> {
        self.features.iter().copied().collect()
    }

    pub fn undefined_count(&self) -> usize {
        self.features.iter().filter(|c| c.is_none()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    columns: Vec<FeatureColumn>,
    rows: Vec<FeatureRow>,
}

/// Complete rows of a feature table, ready for a batch fit.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub columns: Vec<FeatureColumn>,
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
    /// Rows left out because at least one feature was undefined.
    pub skipped_rows: usize,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(FeatureColumn::name).collect()
    }
}

impl FeatureTable {
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index_of(&self, column: FeatureColumn) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    pub fn column(&self, column: FeatureColumn) -> Option<Vec<Option<f64>>> {
        let idx = self.index_of(column)?;
        Some(self.rows.iter().map(|r| r.features[idx]).collect())
    }

    /// Last row of the table, whatever its completeness.
    pub fn latest(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }

    pub fn complete_rows(&self) -> impl Iterator<Item = &FeatureRow> {
        self.rows.iter().filter(|r| r.is_complete())
    }

    /// Feature matrix and label vector (the raw `value` column) over every
    /// complete row.
    pub fn training_set(&self) -> TrainingSet {
        let complete: Vec<&FeatureRow> = self.complete_rows().collect();
        let n = complete.len();
        let num_features = self.columns.len();

        let mut features = Array2::<f64>::zeros((n, num_features));
        let mut labels = Array1::<f64>::zeros(n);
        for (i, row) in complete.iter().enumerate() {
            for (j, cell) in row.features.iter().enumerate() {
                features[[i, j]] = cell.unwrap_or_default();
            }
            labels[i] = row.value;
        }

        TrainingSet {
            columns: self.columns.clone(),
            features,
            labels,
            skipped_rows: self.rows.len() - n,
        }
    }
}

/// Derives the feature table of a date-ascending history.
///
/// Lags, rolling statistics and the expanding mean only see rows before t.
/// The lagged differences and the STL components are computed on the raw
/// series and therefore include the value at t. When the history is shorter
/// than two seasonal periods the STL columns are left undefined.
pub fn derive_features(history: &[Observation], config: &FeatureConfig) -> FeatureTable {
    let columns = config.columns();
    if history.is_empty() {
        return FeatureTable {
            columns,
            rows: Vec::new(),
        };
    }

    let values: Vec<f64> = history.iter().map(|o| o.value).collect();
    let series = defined(&values);
    let prior = shift(&series, 1);
    let n = values.len();

    let decomposition = match stl(&values, &config.stl_params()) {
        Ok(d) => Some(d),
        Err(StlError::TooShort { .. }) => None,
        Err(e) => {
            tracing::warn!("STL decomposition skipped: {}", e);
            None
        }
    };
    let (trend, seasonal, resid) = match decomposition {
        Some(d) => (defined(&d.trend), defined(&d.seasonal), defined(&d.resid)),
        None => (vec![None; n], vec![None; n], vec![None; n]),
    };

    let mut built: Vec<Vec<Option<f64>>> = Vec::with_capacity(columns.len());
    for column in &columns {
        let cells = match *column {
            FeatureColumn::Lag(k) => shift(&series, k),
            FeatureColumn::RollingMean(w) => rolling_mean(&prior, w),
            FeatureColumn::RollingStd(w) => rolling_std(&prior, w),
            FeatureColumn::Diff(k) => diff(&values, k),
            FeatureColumn::Trend => trend.clone(),
            FeatureColumn::Seasonal => seasonal.clone(),
            FeatureColumn::Residual => resid.clone(),
            FeatureColumn::ExpandingMean => expanding_mean(&prior),
        };
        built.push(cells);
    }

    let rows = history
        .iter()
        .enumerate()
        .map(|(i, obs)| FeatureRow {
            date: obs.date,
            value: obs.value,
            features: built.iter().map(|col| col[i]).collect(),
        })
        .collect();

    FeatureTable { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::daily_series;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn ramp(n: usize) -> Vec<Observation> {
        let values: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        daily_series(start(), &values)
    }

    fn wiggly(n: usize) -> Vec<Observation> {
        let values: Vec<f64> = (0..n)
            .map(|i| 4.2 + 0.003 * i as f64 + 0.02 * ((i * 7 % 11) as f64 - 5.0) / 5.0)
            .collect();
        daily_series(start(), &values)
    }

    fn cell(table: &FeatureTable, column: FeatureColumn, row: usize) -> Option<f64> {
        table.column(column).unwrap()[row]
    }

    #[test]
    fn test_default_column_layout() {
        let names: Vec<String> = FeatureConfig::default()
            .columns()
            .iter()
            .map(FeatureColumn::name)
            .collect();
        assert_eq!(
            names,
            vec![
                "lag_1",
                "lag_2",
                "rolling_2_mean",
                "rolling_3_mean",
                "rolling_2_std",
                "rolling_3_std",
                "value_lag_1",
                "value_lag_2",
                "trend",
                "seasonal",
                "resid",
                "expanding_mean_1",
            ]
        );
    }

    #[test]
    fn test_column_names_parse_back() {
        for column in FeatureConfig::default().columns() {
            assert_eq!(column.name().parse::<FeatureColumn>().unwrap(), column);
        }
        assert!("lag_x".parse::<FeatureColumn>().is_err());
        assert!("volume".parse::<FeatureColumn>().is_err());
    }

    #[test]
    fn test_ramp_of_twenty_days() {
        let table = derive_features(&ramp(20), &FeatureConfig::default());
        assert_eq!(table.len(), 20);
        assert_eq!(cell(&table, FeatureColumn::Lag(1), 19), Some(118.0));
        assert_eq!(cell(&table, FeatureColumn::Lag(2), 19), Some(117.0));
        assert_eq!(cell(&table, FeatureColumn::Diff(1), 19), Some(1.0));
        assert_eq!(cell(&table, FeatureColumn::Diff(2), 19), Some(2.0));
        assert_eq!(cell(&table, FeatureColumn::RollingMean(2), 19), Some(117.5));
        assert_eq!(cell(&table, FeatureColumn::RollingMean(3), 19), Some(117.0));
        assert_eq!(cell(&table, FeatureColumn::ExpandingMean, 19), Some(109.0));
        assert!(table.latest().unwrap().is_complete());
    }

    #[test]
    fn test_head_rows_are_undefined() {
        let table = derive_features(&ramp(25), &FeatureConfig::default());
        assert_eq!(cell(&table, FeatureColumn::Lag(1), 0), None);
        assert_eq!(cell(&table, FeatureColumn::Lag(2), 1), None);
        assert_eq!(cell(&table, FeatureColumn::RollingMean(2), 1), None);
        assert_eq!(cell(&table, FeatureColumn::RollingMean(2), 2), Some(100.5));
        assert_eq!(cell(&table, FeatureColumn::RollingStd(3), 2), None);
        assert!(cell(&table, FeatureColumn::RollingStd(3), 3).is_some());
        assert_eq!(cell(&table, FeatureColumn::ExpandingMean, 0), None);
        assert_eq!(cell(&table, FeatureColumn::ExpandingMean, 1), Some(100.0));
        // First complete row needs a 3-row window of prior values.
        let first_complete = table.rows().iter().position(FeatureRow::is_complete);
        assert_eq!(first_complete, Some(3));
    }

    #[test]
    fn test_lags_match_prior_values_exactly() {
        let history = wiggly(45);
        let config = FeatureConfig {
            lags: vec![1, 2, 5],
            ..FeatureConfig::default()
        };
        let table = derive_features(&history, &config);
        for &k in &config.lags {
            let column = table.column(FeatureColumn::Lag(k)).unwrap();
            for t in k..history.len() {
                assert_eq!(column[t], Some(history[t - k].value));
            }
        }
    }

    #[test]
    fn test_prior_only_columns_ignore_current_value() {
        let history = wiggly(40);
        let config = FeatureConfig::default();
        let base = derive_features(&history, &config);
        let prior_only = [
            FeatureColumn::RollingMean(2),
            FeatureColumn::RollingMean(3),
            FeatureColumn::RollingStd(2),
            FeatureColumn::RollingStd(3),
            FeatureColumn::ExpandingMean,
            FeatureColumn::Lag(1),
            FeatureColumn::Lag(2),
        ];

        for t in [5, 21, 39] {
            let mut mutated = history.clone();
            mutated[t].value += 3.0;
            let table = derive_features(&mutated, &config);
            for column in prior_only {
                assert_eq!(
                    cell(&table, column, t),
                    cell(&base, column, t),
                    "{} leaked value at row {}",
                    column,
                    t
                );
            }
        }
    }

    #[test]
    fn test_decomposition_reconstructs_value() {
        let history = wiggly(31);
        let table = derive_features(&history, &FeatureConfig::default());
        let trend = table.column(FeatureColumn::Trend).unwrap();
        let seasonal = table.column(FeatureColumn::Seasonal).unwrap();
        let resid = table.column(FeatureColumn::Residual).unwrap();
        for (i, row) in table.rows().iter().enumerate() {
            if let (Some(t), Some(s), Some(r)) = (trend[i], seasonal[i], resid[i]) {
                assert!((t + s + r - row.value).abs() < 1e-9);
            }
        }
        assert!(trend.iter().all(Option::is_some));
    }

    #[test]
    fn test_short_history_leaves_decomposition_undefined() {
        let history = ramp(12);
        let table = derive_features(&history, &FeatureConfig::default());
        assert_eq!(table.len(), 12);
        assert!(table.column(FeatureColumn::Trend).unwrap().iter().all(Option::is_none));
        assert_eq!(cell(&table, FeatureColumn::Lag(1), 11), Some(110.0));
        assert_eq!(table.complete_rows().count(), 0);
        assert_eq!(table.latest().unwrap().undefined_count(), 3);
    }

    #[test]
    fn test_empty_history() {
        let table = derive_features(&[], &FeatureConfig::default());
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 12);
        assert!(table.training_set().is_empty());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let history = wiggly(50);
        let config = FeatureConfig::default();
        let a = derive_features(&history, &config);
        let b = derive_features(&history, &config);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_duplicate_dates_propagate() {
        let mut history = ramp(22);
        let dup = history[5];
        history.insert(5, dup);
        let table = derive_features(&history, &FeatureConfig::default());
        assert_eq!(table.len(), 23);
        assert_eq!(table.rows()[5].date, table.rows()[6].date);
    }

    #[test]
    fn test_training_set_uses_complete_rows_and_raw_labels() {
        let history = ramp(30);
        let table = derive_features(&history, &FeatureConfig::default());
        let set = table.training_set();
        assert_eq!(set.len(), 27);
        assert_eq!(set.skipped_rows, 3);
        assert_eq!(set.features.ncols(), 12);
        assert_eq!(set.labels[0], 103.0);
        assert_eq!(set.labels[26], 129.0);
    }

    #[test]
    fn test_min_history_and_validation() {
        let config = FeatureConfig::default();
        assert_eq!(config.min_history(), 20);
        assert!(config.validate().is_ok());

        let bad = FeatureConfig {
            lags: vec![0],
            windows: vec![1],
            diff_lags: vec![],
            period: 1,
        };
        assert_eq!(bad.validate().unwrap_err().len(), 3);
    }
}
