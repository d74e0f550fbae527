/// Concordance correlation coefficient of two equally long series.
///
/// Uses population variances and the biased covariance. Returns 0.0 for empty
/// input or when both series are constant and equal (zero denominator).
pub fn concordance_correlation(actual: &[f32], predicted: &[f32]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let (actual, predicted) = (&actual[..n], &predicted[..n]);
    let mean = |xs: &[f32]| xs.iter().map(|&x| x as f64).sum::<f64>() / n as f64;
    let true_mean = mean(actual);
    let pred_mean = mean(predicted);

    let mut true_var = 0.0;
    let mut pred_var = 0.0;
    let mut covar = 0.0;
    for (&t, &p) in actual.iter().zip(predicted) {
        let dt = t as f64 - true_mean;
        let dp = p as f64 - pred_mean;
        true_var += dt * dt;
        pred_var += dp * dp;
        covar += dt * dp;
    }
    true_var /= n as f64;
    pred_var /= n as f64;
    covar /= n as f64;

    let denom = true_var + pred_var + (pred_mean - true_mean).powi(2);
    if denom == 0.0 {
        return 0.0;
    }
    2.0 * covar / denom
}

/// Mean and population standard deviation of a metric over sequences.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_series_have_unit_ccc() {
        let xs = [0.1f32, 0.5, 0.3, 0.9];
        assert!((concordance_correlation(&xs, &xs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn offset_series_are_penalized() {
        let actual = [1.0f32, 2.0, 3.0];
        let predicted = [2.0f32, 3.0, 4.0];
        // covar = 2/3, vars = 2/3 each, mean diff = 1 -> 2*(2/3) / (4/3 + 1)
        let expected = (4.0 / 3.0) / (7.0 / 3.0);
        assert!((concordance_correlation(&actual, &predicted) - expected).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_give_zero() {
        assert_eq!(concordance_correlation(&[], &[]), 0.0);
        assert_eq!(concordance_correlation(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn mean_and_std_population() {
        let (mean, std) = mean_and_std(&[1.0, 3.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
        assert_eq!(mean_and_std(&[]), (0.0, 0.0));
    }
}
