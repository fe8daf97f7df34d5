//! Column operations over series with undefined cells.
//!
//! Semantics follow the usual dataframe conventions: a window containing an
//! undefined cell is undefined, and the expanding mean skips undefined cells.

use super::{mean, sample_std};

/// Moves every value `periods` rows down; the first `periods` cells become
/// undefined.
pub fn shift(series: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    (0..series.len())
        .map(|i| if i >= periods { series[i - periods] } else { None })
        .collect()
}

/// Lifts a fully defined series into cells.
pub fn defined(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

fn rolling_apply<F>(series: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut buf = Vec::with_capacity(window);
    (0..series.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            buf.clear();
            for cell in &series[i + 1 - window..=i] {
                buf.push((*cell)?);
            }
            f(buf.as_slice())
        })
        .collect()
}

/// Mean over the trailing `window` cells, ending at and including row t.
pub fn rolling_mean(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling_apply(series, window, mean)
}

/// Sample standard deviation over the trailing `window` cells.
pub fn rolling_std(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling_apply(series, window, sample_std)
}

/// `value[t] - value[t - periods]`.
pub fn diff(values: &[f64], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i >= periods {
                Some(values[i] - values[i - periods])
            } else {
                None
            }
        })
        .collect()
}

/// Running mean of all defined cells up to and including row t.
pub fn expanding_mean(series: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut sum = 0.0;
    let mut count = 0usize;
    series
        .iter()
        .map(|cell| {
            if let Some(v) = cell {
                sum += v;
                count += 1;
            }
            if count == 0 {
                None
            } else {
                Some(sum / count as f64)
            }
        })
        .collect()
}
