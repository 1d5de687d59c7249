//! Shared statistics helpers
//!
//! Small pure functions used by the aggregation, baseline and trend
//! computations. Two percentile flavors exist on purpose: daily aggregates
//! use the nearest-rank definition, baselines use linear-interpolated rank.

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around the given mean; 0 for fewer than
/// two values.
pub fn population_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Median of a pre-sorted slice.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Nearest-rank percentile over a pre-sorted slice: the value at index
/// `floor(n * p/100)`, clamped to the last element.
pub fn percentile_nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let index = ((n as f64) * p / 100.0).floor() as usize;
    sorted[index.min(n - 1)]
}

/// Linear-interpolated percentile over a pre-sorted slice.
pub fn percentile_interpolated(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if upper >= n {
        return sorted[n - 1];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Simple moving average of the trailing `period` values (the last SMA
/// point of the series). Falls back to the mean when the series is shorter
/// than the period.
pub fn sma(values: &[f64], period: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let period = period.min(values.len()).max(1);
    let tail = &values[values.len() - period..];
    mean(tail)
}

/// Exponential moving average over the whole series, seeded with the first
/// value, multiplier `2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let period = period.max(1);
    let multiplier = 2.0 / (period as f64 + 1.0);
    values
        .iter()
        .skip(1)
        .fold(first, |acc, v| v * multiplier + acc * (1.0 - multiplier))
}

/// Ordinary least-squares fit of y over x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination in [0, 1]. A constant series fits its
    /// own mean perfectly and reports 1.
    pub r_squared: f64,
}

/// Fit `y = slope * x + intercept`. Returns None for fewer than two points
/// or a degenerate x spread.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let n_f = n as f64;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for i in 0..n {
        sum_x += xs[i];
        sum_y += ys[i];
        sum_xy += xs[i] * ys[i];
        sum_x2 += xs[i] * xs[i];
    }

    let denom = n_f * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }

    let slope = (n_f * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n_f;

    let y_mean = sum_y / n_f;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for i in 0..n {
        let predicted = slope * xs[i] + intercept;
        ss_res += (ys[i] - predicted).powi(2);
        ss_tot += (ys[i] - y_mean).powi(2);
    }

    let r_squared = if ss_tot.abs() < f64::EPSILON {
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

pub fn clamp_to(value: f64, range: (f64, f64)) -> f64 {
    value.clamp(range.0, range.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EPS: f64 = 1e-9;

    #[test]
    fn mean_and_std_of_known_series() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert!((m - 5.0).abs() < EPS);
        assert!((population_std(&values, m) - 2.0).abs() < EPS);
    }

    #[test]
    fn std_of_constant_series_is_zero() {
        let values = [3.0; 10];
        assert_eq!(population_std(&values, mean(&values)), 0.0);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn nearest_rank_p95_matches_reference() {
        // 100 sorted values 1..=100: floor(100 * 0.95) = index 95 -> 96.0
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile_nearest_rank(&sorted, 95.0), 96.0);
        assert_eq!(percentile_nearest_rank(&sorted, 100.0), 100.0);
    }

    #[test]
    fn interpolated_percentiles_blend_neighbors() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        // p50 over n-1=3 -> rank 1.5 -> halfway between 20 and 30
        assert!((percentile_interpolated(&sorted, 50.0) - 25.0).abs() < EPS);
        assert_eq!(percentile_interpolated(&sorted, 0.0), 10.0);
        assert_eq!(percentile_interpolated(&sorted, 100.0), 40.0);
    }

    #[test]
    fn sma_uses_trailing_window() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!((sma(&values, 4) - 4.5).abs() < EPS);
        // Shorter series than period: plain mean
        assert!((sma(&[10.0, 20.0], 4) - 15.0).abs() < EPS);
    }

    #[test]
    fn ema_converges_toward_recent_values() {
        let values = [0.0, 0.0, 0.0, 100.0, 100.0, 100.0, 100.0, 100.0];
        let e = ema(&values, 4);
        assert!(e > 80.0 && e < 100.0);
    }

    #[test]
    fn linear_fit_recovers_exact_line() {
        let xs: Vec<f64> = (0..24).map(|h| h as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.5 * x + 10.0).collect();

        let fit = linear_fit(&xs, &ys).unwrap();
        assert!((fit.slope - 2.5).abs() < EPS);
        assert!((fit.intercept - 10.0).abs() < EPS);
        assert!((fit.r_squared - 1.0).abs() < EPS);
    }

    #[test]
    fn linear_fit_of_constant_series_is_flat_and_confident() {
        let xs: Vec<f64> = (0..10).map(|h| h as f64).collect();
        let ys = vec![42.0; 10];

        let fit = linear_fit(&xs, &ys).unwrap();
        assert!(fit.slope.abs() < EPS);
        assert_eq!(fit.r_squared, 1.0);
    }

    #[test]
    fn linear_fit_rejects_degenerate_input() {
        assert!(linear_fit(&[1.0], &[2.0]).is_none());
        assert!(linear_fit(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]).is_none());
    }
}
