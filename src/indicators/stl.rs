//! Seasonal-trend decomposition based on LOESS (STL).
//!
//! Additive model: `value = trend + seasonal + resid`. Runs the inner loop
//! only (no robustness iterations) with local-linear smoothers and a jump of
//! one, which is the configuration used for daily rate series.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::moving_average;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StlError {
    #[error("period must be at least 2, got {0}")]
    InvalidPeriod(usize),

    #[error("series must span two complete cycles: need {required} observations, have {available}")]
    TooShort { required: usize, available: usize },

    #[error("smoother spans must be odd and at least 3: {0}")]
    InvalidSpan(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StlParams {
    pub period: usize,
    /// Span of the cycle-subseries smoother.
    pub seasonal: usize,
    pub trend: usize,
    pub low_pass: usize,
    pub inner_iter: usize,
}

impl StlParams {
    pub const DEFAULT_SEASONAL: usize = 7;

    /// Standard spans for a given period: seasonal 7, trend the next odd
    /// integer >= 1.5 * period / (1 - 1.5 / seasonal), low-pass the smallest
    /// odd integer > period. Five inner passes, as for a non-robust fit.
    pub fn for_period(period: usize) -> Self {
        let seasonal = Self::DEFAULT_SEASONAL;
        let trend = (1.5 * period as f64 / (1.0 - 1.5 / seasonal as f64)).ceil() as usize;
        Self {
            period,
            seasonal,
            trend: next_odd(trend),
            low_pass: next_odd(period + 1),
            inner_iter: 5,
        }
    }

    pub fn min_observations(&self) -> usize {
        2 * self.period
    }

    fn validate(&self) -> Result<(), StlError> {
        if self.period < 2 {
            return Err(StlError::InvalidPeriod(self.period));
        }
        if self.seasonal < 3 || self.seasonal % 2 == 0 {
            return Err(StlError::InvalidSpan("seasonal"));
        }
        if self.trend < 3 || self.trend % 2 == 0 {
            return Err(StlError::InvalidSpan("trend"));
        }
        if self.low_pass < 3 || self.low_pass % 2 == 0 {
            return Err(StlError::InvalidSpan("low_pass"));
        }
        Ok(())
    }
}

fn next_odd(x: usize) -> usize {
    if x % 2 == 0 {
        x + 1
    } else {
        x
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StlDecomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub resid: Vec<f64>,
}

/// Decomposes `values` into trend, seasonal and residual components of the
/// same length.
pub fn stl(values: &[f64], params: &StlParams) -> Result<StlDecomposition, StlError> {
    params.validate()?;
    let n = values.len();
    if n < params.min_observations() {
        return Err(StlError::TooShort {
            required: params.min_observations(),
            available: n,
        });
    }

    let np = params.period;
    let mut trend = vec![0.0; n];
    let mut seasonal = vec![0.0; n];
    let mut work = vec![0.0; n];

    for _ in 0..params.inner_iter.max(1) {
        for i in 0..n {
            work[i] = values[i] - trend[i];
        }

        let cycle = cycle_subseries(&work, np, params.seasonal);

        // Low-pass filter of the extended cycle series: MA(np), MA(np), MA(3),
        // then LOESS; brings length n + 2np back to n.
        let ma = moving_average(&cycle, np);
        let ma = moving_average(&ma, np);
        let ma = moving_average(&ma, 3);
        let low_pass = loess_smooth(&ma, params.low_pass, 1);

        for i in 0..n {
            seasonal[i] = cycle[np + i] - low_pass[i];
            work[i] = values[i] - seasonal[i];
        }

        trend = loess_smooth(&work, params.trend, 1);
    }

    let resid = values
        .iter()
        .zip(trend.iter().zip(seasonal.iter()))
        .map(|(y, (t, s))| y - t - s)
        .collect();

    Ok(StlDecomposition {
        trend,
        seasonal,
        resid,
    })
}

/// Smooths each cycle-subseries and extends it by one position on both ends.
/// Output has `n + 2 * period` points; index `m * period + j` holds position
/// `m` (0 = before the first observation) of subseries `j`.
fn cycle_subseries(values: &[f64], period: usize, span: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![0.0; n + 2 * period];
    let mut weights = Vec::new();

    for j in 0..period.min(n) {
        let sub: Vec<f64> = values.iter().skip(j).step_by(period).copied().collect();
        let k = sub.len();
        let smoothed = loess_smooth(&sub, span, 1);
        weights.resize(k, 0.0);

        let right = span.min(k);
        let before = loess_estimate(&sub, span, 1, 0.0, 1, right, &mut weights)
            .unwrap_or(smoothed[0]);
        let left = if k >= span { k - span + 1 } else { 1 };
        let after = loess_estimate(&sub, span, 1, (k + 1) as f64, left, k, &mut weights)
            .unwrap_or(smoothed[k - 1]);

        out[j] = before;
        for (m, v) in smoothed.iter().enumerate() {
            out[(m + 1) * period + j] = *v;
        }
        out[(k + 1) * period + j] = after;
    }

    out
}

/// LOESS smoother evaluated at every point of `y`.
fn loess_smooth(y: &[f64], span: usize, degree: usize) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return y.to_vec();
    }

    let mut out = vec![0.0; n];
    let mut weights = vec![0.0; n];

    if span >= n {
        for i in 1..=n {
            out[i - 1] = loess_estimate(y, span, degree, i as f64, 1, n, &mut weights)
                .unwrap_or(y[i - 1]);
        }
    } else {
        let half = (span + 1) / 2;
        let (mut left, mut right) = (1usize, span);
        for i in 1..=n {
            if i > half && right != n {
                left += 1;
                right += 1;
            }
            out[i - 1] = loess_estimate(y, span, degree, i as f64, left, right, &mut weights)
                .unwrap_or(y[i - 1]);
        }
    }

    out
}

/// Tricube-weighted local fit at position `xs` using the 1-based points
/// `left..=right`. Returns `None` when every weight vanishes.
fn loess_estimate(
    y: &[f64],
    span: usize,
    degree: usize,
    xs: f64,
    left: usize,
    right: usize,
    weights: &mut [f64],
) -> Option<f64> {
    let n = y.len();
    let range = n as f64 - 1.0;
    let mut h = (xs - left as f64).max(right as f64 - xs);
    if span > n {
        h += ((span - n) / 2) as f64;
    }
    let h9 = 0.999 * h;
    let h1 = 0.001 * h;

    let mut total = 0.0;
    for j in left..=right {
        let r = (j as f64 - xs).abs();
        let w = if r <= h9 {
            if r <= h1 {
                1.0
            } else {
                (1.0 - (r / h).powi(3)).powi(3)
            }
        } else {
            0.0
        };
        weights[j - 1] = w;
        total += w;
    }
    if total <= 0.0 {
        return None;
    }
    for j in left..=right {
        weights[j - 1] /= total;
    }

    if h > 0.0 && degree > 0 {
        let center: f64 = (left..=right).map(|j| weights[j - 1] * j as f64).sum();
        let spread: f64 = (left..=right)
            .map(|j| weights[j - 1] * (j as f64 - center).powi(2))
            .sum();
        if spread.sqrt() > 0.001 * range {
            let slope = (xs - center) / spread;
            for j in left..=right {
                weights[j - 1] *= slope * (j as f64 - center) + 1.0;
            }
        }
    }

    Some((left..=right).map(|j| weights[j - 1] * y[j - 1]).sum())
}
