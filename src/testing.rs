//! Wald testing and multiple-testing correction

use statrs::distribution::{ContinuousCDF, Normal};

use crate::dataset::Experiment;
use crate::error::{DiffexError, Result};
use crate::io::{Contrast, DeTable};
use crate::model::DesignLayout;

const LN_2: f64 = std::f64::consts::LN_2;

/// Two-sided p-value for a Wald z-statistic.
fn wald_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    // Normal(0, 1) construction only fails for invalid parameters.
    let normal = Normal::new(0.0, 1.0).unwrap();
    2.0 * normal.cdf(-z.abs())
}

/// Test one contrast on a fitted experiment.
///
/// All-zero genes get zero fold change and NA p-values; everything else is
/// tested against the null of no fold change.
pub fn wald_test(
    exp: &Experiment,
    layout: &DesignLayout,
    contrast: Contrast,
) -> Result<DeTable> {
    let coefficients = exp.coefficients().ok_or_else(|| DiffexError::InvalidContrast {
        reason: "model must be fitted before testing".to_string(),
    })?;
    let standard_errors = exp
        .standard_errors()
        .ok_or_else(|| DiffexError::InvalidContrast {
            reason: "standard errors missing from the model fit".to_string(),
        })?;

    let (column, sign) =
        layout.contrast_column(&contrast.factor, &contrast.numerator, &contrast.denominator)?;

    let n_genes = exp.n_genes();
    let base_means = exp.base_means();
    let mut table = DeTable::new(contrast, exp.counts().gene_ids().to_vec());
    table.base_mean = base_means.clone();

    for i in 0..n_genes {
        if base_means[i] == 0.0 {
            table.log2_fold_change[i] = 0.0;
            table.lfc_se[i] = 0.0;
            continue;
        }
        // Coefficients are on the natural-log scale; report log2.
        let lfc = sign * coefficients[[i, column]] / LN_2;
        let se = standard_errors[[i, column]] / LN_2;
        table.log2_fold_change[i] = lfc;
        table.lfc_se[i] = se;
        if se > 0.0 && se.is_finite() {
            let z = lfc / se;
            table.stat[i] = z;
            table.pvalue[i] = wald_pvalue(z);
        }
    }

    table.padj = benjamini_hochberg(&table.pvalue);
    Ok(table)
}

/// Benjamini-Hochberg false discovery rate adjustment. NaN entries are
/// passed through; adjusted values are monotone in the input order
/// statistics and capped at one.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let finite: Vec<usize> = (0..pvalues.len())
        .filter(|&i| pvalues[i].is_finite())
        .collect();
    let m = finite.len();
    let mut adjusted = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return adjusted;
    }

    let mut order = finite;
    order.sort_by(|&a, &b| {
        pvalues[a]
            .partial_cmp(&pvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Walk from the largest p-value down, keeping the running minimum so
    // adjusted values stay monotone.
    let mut running = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        let raw = pvalues[i] * m as f64 / (rank + 1) as f64;
        running = running.min(raw).min(1.0);
        adjusted[i] = running;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bh_matches_hand_computed_example() {
        // Classic example: p = (0.01, 0.02, 0.03, 0.04), m = 4
        // adjusted = (0.04, 0.04, 0.04, 0.04)
        let adj = benjamini_hochberg(&[0.01, 0.02, 0.03, 0.04]);
        for a in adj {
            assert!((a - 0.04).abs() < 1e-12);
        }
    }

    #[test]
    fn bh_is_monotone_and_bounded() {
        let p = [0.001, 0.2, 0.04, 0.9, 0.5];
        let adj = benjamini_hochberg(&p);
        let mut pairs: Vec<(f64, f64)> = p.iter().copied().zip(adj.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        for w in pairs.windows(2) {
            assert!(w[0].1 <= w[1].1 + 1e-12);
        }
        for (&raw, &a) in p.iter().zip(adj.iter()) {
            assert!(a >= raw);
            assert!(a <= 1.0);
        }
    }

    #[test]
    fn bh_skips_nan() {
        let adj = benjamini_hochberg(&[0.01, f64::NAN, 0.02]);
        assert!(adj[1].is_nan());
        assert!(adj[0].is_finite());
        // m counts only finite p-values
        assert!((adj[0] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn pvalue_symmetry_and_range() {
        assert!((wald_pvalue(2.0) - wald_pvalue(-2.0)).abs() < 1e-12);
        assert!((wald_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!(wald_pvalue(f64::NAN).is_nan());
        let p = wald_pvalue(1.96);
        assert!(p > 0.049 && p < 0.051);
    }
}
