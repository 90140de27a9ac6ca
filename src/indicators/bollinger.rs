/// Bollinger Band width and realized volatility
///
/// Both series are rolling over `window` closes and use the sample standard
/// deviation (n - 1 denominator). They feed the regime classifier.
use super::moving_average::calculate_sma;

/// Sample standard deviation, None for fewer than two values
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

    Some(variance.sqrt())
}

/// Relative band width `(upper - lower) / middle` for every full window
///
/// upper/lower = SMA ± num_std * std. A zero middle band yields width 0.
pub fn band_width_series(closes: &[f64], window: usize, num_std: f64) -> Vec<f64> {
    if window < 2 || closes.len() < window {
        return Vec::new();
    }

    (window..=closes.len())
        .filter_map(|end| {
            let slice = &closes[end - window..end];
            let middle = calculate_sma(slice, window)?;
            let std = sample_std_dev(slice)?;
            if middle == 0.0 {
                return Some(0.0);
            }
            let upper = middle + num_std * std;
            let lower = middle - num_std * std;
            Some((upper - lower) / middle)
        })
        .collect()
}

/// Rolling standard deviation of percent returns
pub fn return_volatility_series(closes: &[f64], window: usize) -> Vec<f64> {
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| {
            if w[0] == 0.0 {
                0.0
            } else {
                (w[1] - w[0]) / w[0] * 100.0
            }
        })
        .collect();

    if window < 2 || returns.len() < window {
        return Vec::new();
    }

    returns
        .windows(window)
        .filter_map(sample_std_dev)
        .collect()
}
