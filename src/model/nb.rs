//! Negative binomial building blocks shared by fitting code

use statrs::function::gamma::ln_gamma;

/// Lower bound on fitted means during IRLS. Keeps weights and working
/// responses finite for zero counts.
pub const MIN_MU: f64 = 0.5;

/// Coefficients beyond this magnitude (natural log scale) mark a divergent
/// fit; iteration stops and the gene is flagged unconverged.
pub const MAX_BETA: f64 = 30.0;

/// Clamp for the linear predictor so exp() cannot overflow.
pub const MAX_ETA: f64 = 700.0;

/// Log-density of the negative binomial with mean `mu` and dispersion
/// `alpha` (variance mu + alpha*mu^2) at count `y`.
pub fn log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let p = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * p.ln() + y * (1.0 - p).ln()
}

/// IRLS working weight for the log link: mu / (1 + alpha * mu).
pub fn irls_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Model variance at a fitted mean.
pub fn variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn likelihood_is_finite_and_negative() {
        let ll = log_likelihood(7.0, 5.0, 0.1);
        assert!(ll.is_finite());
        assert!(ll < 0.0);
    }

    #[test]
    fn likelihood_peaks_near_observed_count() {
        let at_count = log_likelihood(50.0, 50.0, 0.05);
        let away = log_likelihood(50.0, 10.0, 0.05);
        assert!(at_count > away);
    }

    #[test]
    fn small_alpha_approaches_poisson() {
        // Poisson log-density at y=5, mu=5: 5*ln(5) - 5 - ln(5!)
        let pois = 5.0 * 5.0_f64.ln() - 5.0 - ln_gamma(6.0);
        let nb = log_likelihood(5.0, 5.0, 1e-8);
        assert!((nb - pois).abs() < 1e-4);
    }

    #[test]
    fn weight_and_variance() {
        assert!((irls_weight(10.0, 0.1) - 5.0).abs() < 1e-12);
        assert!((variance(10.0, 0.1) - 20.0).abs() < 1e-12);
    }
}
