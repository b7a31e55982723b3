//! Sequencing depth normalization via size factors
//!
//! Samples sequenced deeper show proportionally higher counts everywhere;
//! size factors estimate that per-sample scale so expression becomes
//! comparable across samples. The estimator is the median of per-sample
//! ratios to a per-gene geometric mean reference, which is robust to the
//! minority of genes that are genuinely differentially expressed.

use ndarray::{Array1, ArrayView2, Axis};

use crate::dataset::Experiment;
use crate::error::{DiffexError, Result};

/// Size factor estimator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthNormalization {
    /// Median of ratios over genes observed in every sample (default).
    MedianRatios,
    /// Geometric means over positive counts only; usable when few genes
    /// are observed in all samples.
    PositiveCounts,
}

/// Estimate size factors and cache them (and the normalized counts) on the
/// experiment.
pub fn estimate_size_factors(exp: &mut Experiment, method: DepthNormalization) -> Result<()> {
    let factors = match method {
        DepthNormalization::MedianRatios => median_ratio_factors(exp.counts().counts())?,
        DepthNormalization::PositiveCounts => positive_count_factors(exp.counts().counts())?,
    };
    log::debug!("size factors: {:?}", factors.to_vec());
    exp.set_size_factors(factors)
}

fn median(sorted: &mut Vec<f64>) -> f64 {
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn median_ratio_factors(counts: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DiffexError::EmptyData {
            reason: "count table is empty".to_string(),
        });
    }

    // Reference per gene: geometric mean across samples, defined only for
    // genes observed everywhere.
    let mut reference: Vec<(usize, f64)> = Vec::new();
    for (i, row) in counts.axis_iter(Axis(0)).enumerate() {
        if row.iter().all(|&x| x > 0.0) {
            let log_mean = row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples as f64;
            reference.push((i, log_mean.exp()));
        }
    }
    if reference.is_empty() {
        return Err(DiffexError::SizeFactorFailed {
            reason: "no gene is observed in every sample; try the positive-counts method"
                .to_string(),
        });
    }

    let mut factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let mut ratios: Vec<f64> = reference
            .iter()
            .map(|&(i, geo)| counts[[i, j]] / geo)
            .collect();
        factors[j] = median(&mut ratios);
    }

    if factors.iter().any(|&f| !f.is_finite() || f <= 0.0) {
        return Err(DiffexError::SizeFactorFailed {
            reason: "estimated size factors are not positive finite values".to_string(),
        });
    }
    Ok(factors)
}

fn positive_count_factors(counts: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DiffexError::EmptyData {
            reason: "count table is empty".to_string(),
        });
    }

    // Geometric mean over the positive entries, divided by the total
    // sample count so zero-heavy genes get a smaller reference.
    let mut reference: Vec<(usize, f64)> = Vec::new();
    for (i, row) in counts.axis_iter(Axis(0)).enumerate() {
        let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
        if row.iter().any(|&x| x > 0.0) {
            reference.push((i, (log_sum / n_samples as f64).exp()));
        }
    }
    if reference.is_empty() {
        return Err(DiffexError::SizeFactorFailed {
            reason: "count table has no positive entries".to_string(),
        });
    }

    let mut factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let mut ratios: Vec<f64> = reference
            .iter()
            .filter(|&&(i, geo)| counts[[i, j]] > 0.0 && geo > 0.0)
            .map(|&(i, geo)| counts[[i, j]] / geo)
            .collect();
        factors[j] = if ratios.is_empty() { 1.0 } else { median(&mut ratios) };
    }

    // Center so the geometric mean of the factors is one.
    let log_center =
        factors.iter().map(|&f| f.ln()).sum::<f64>() / n_samples as f64;
    let center = log_center.exp();
    factors.mapv_inplace(|f| f / center);

    Ok(factors)
}
