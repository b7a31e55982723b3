//! Shared statistical helpers

use statrs::distribution::{ContinuousCDF, Normal};

/// Weighted quantile with step interpolation. Entries with non-positive or
/// non-finite weight, or non-finite value, are ignored.
pub fn weighted_quantile(values: &[f64], weights: &[f64], prob: f64) -> f64 {
    debug_assert_eq!(values.len(), weights.len());
    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights.iter())
        .filter(|(&v, &w)| v.is_finite() && w.is_finite() && w > 0.0)
        .map(|(&v, &w)| (v, w))
        .collect();
    if pairs.is_empty() {
        return f64::NAN;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = pairs.iter().map(|&(_, w)| w).sum();
    let target = prob.clamp(0.0, 1.0) * total;
    let mut cum = 0.0;
    for &(v, w) in &pairs {
        cum += w;
        if cum >= target {
            return v;
        }
    }
    pairs[pairs.len() - 1].0
}

/// Variance of a zero-mean normal whose `1 - upper` quantile of absolute
/// values matches the observed weighted quantile. Used to calibrate
/// zero-centered priors from the spread of maximum-likelihood estimates.
pub fn matched_prior_variance(values: &[f64], weights: &[f64], upper: f64) -> f64 {
    let abs_values: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_values, weights, 1.0 - upper);
    if !q.is_finite() || q <= 0.0 {
        return 1e-6;
    }
    // Normal(0, 1) construction only fails for invalid parameters.
    let normal = Normal::new(0.0, 1.0).unwrap();
    let z = normal.inverse_cdf(1.0 - upper);
    (q / z).powi(2).max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unweighted_median() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let w = [1.0; 5];
        assert_eq!(weighted_quantile(&v, &w, 0.5), 3.0);
    }

    #[test]
    fn heavy_weight_dominates() {
        let v = [1.0, 10.0];
        let w = [100.0, 1.0];
        assert_eq!(weighted_quantile(&v, &w, 0.5), 1.0);
    }

    #[test]
    fn ignores_nan_entries() {
        let v = [f64::NAN, 2.0, 3.0];
        let w = [1.0, 1.0, 1.0];
        let q = weighted_quantile(&v, &w, 1.0);
        assert_eq!(q, 3.0);
    }

    #[test]
    fn matched_variance_recovers_scale() {
        // Absolute 95% quantile of N(0, sigma^2) is sigma * 1.6449
        let sigma = 2.0;
        let normal = Normal::new(0.0, 1.0).unwrap();
        let q95 = sigma * normal.inverse_cdf(0.95);
        // A point mass at that quantile should match sigma^2
        let values = vec![q95; 100];
        let weights = vec![1.0; 100];
        let var = matched_prior_variance(&values, &weights, 0.05);
        assert!((var - sigma * sigma).abs() < 1e-6);
    }
}
