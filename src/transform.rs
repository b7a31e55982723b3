//! Variance-stabilizing transformations for exploratory analysis
//!
//! Raw counts have a variance that grows with the mean, which lets the
//! most abundant genes dominate distances, clustering, and PCA. Two
//! transforms put samples on a comparable log2 scale:
//!
//! - `rlog` fits a per-sample ridge-penalized NB GLM per gene, so
//!   low-count genes are pulled toward their mean instead of exploding in
//!   log space;
//! - `vst` applies the closed-form variance-stabilizing map derived from
//!   the parametric dispersion trend.
//!
//! Blind mode re-estimates dispersions under an intercept-only design, so
//! the transform cannot be informed by the experimental groups.

use ndarray::Array2;
use rayon::prelude::*;

use crate::dataset::Experiment;
use crate::dispersion::{estimate_dispersions, DispersionOptions};
use crate::error::{DiffexError, Result};
use crate::model::{fit_gene, FitOptions};
use crate::stats::matched_prior_variance;

const LN_2: f64 = std::f64::consts::LN_2;
const LOG2_E: f64 = std::f64::consts::LOG2_E;

/// Which transform to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Rlog,
    Vst,
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformKind::Rlog => write!(f, "rlog"),
            TransformKind::Vst => write!(f, "vst"),
        }
    }
}

/// A genes-by-samples matrix on the transformed (log2-like) scale.
#[derive(Debug, Clone)]
pub struct TransformedMatrix {
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub kind: TransformKind,
}

/// Transform the counts of an experiment.
///
/// Size factors must already be estimated. With `blind` the dispersions
/// are re-estimated under an intercept-only design; otherwise the
/// experiment must carry dispersions from a prior estimation run.
pub fn transform_counts(
    exp: &Experiment,
    kind: TransformKind,
    blind: bool,
) -> Result<TransformedMatrix> {
    if !exp.has_size_factors() {
        return Err(DiffexError::TransformFailed {
            reason: "size factors must be estimated before transforming".to_string(),
        });
    }

    let owned;
    let working: &Experiment = if blind {
        let mut w = exp.redesigned(&[])?;
        estimate_dispersions(&mut w, &DispersionOptions::default())?;
        owned = w;
        &owned
    } else {
        if !exp.has_dispersions() {
            return Err(DiffexError::TransformFailed {
                reason: "estimate dispersions first, or transform with blind = true"
                    .to_string(),
            });
        }
        exp
    };

    match kind {
        TransformKind::Rlog => rlog(working),
        TransformKind::Vst => vst(working),
    }
}

fn trend_dispersions(exp: &Experiment) -> Result<Vec<f64>> {
    exp.trend_dispersions()
        .or_else(|| exp.dispersions())
        .map(|d| d.to_vec())
        .ok_or_else(|| DiffexError::TransformFailed {
            reason: "dispersions missing".to_string(),
        })
}

/// Regularized log transform.
fn rlog(exp: &Experiment) -> Result<TransformedMatrix> {
    let n_genes = exp.n_genes();
    let n_samples = exp.n_samples();
    let counts = exp.counts().counts();
    let size_factors: Vec<f64> = exp
        .size_factors()
        .map(|sf| sf.to_vec())
        .unwrap_or_default();
    let normalized = exp
        .normalized_counts()
        .ok_or_else(|| DiffexError::TransformFailed {
            reason: "normalized counts missing".to_string(),
        })?;
    let base_means = exp.base_means();
    let trend = trend_dispersions(exp)?;

    // Intercept plus one indicator per sample.
    let n_coefs = n_samples + 1;
    let mut design = Array2::<f64>::zeros((n_samples, n_coefs));
    for s in 0..n_samples {
        design[[s, 0]] = 1.0;
        design[[s, s + 1]] = 1.0;
    }

    // Ridge width matched to the spread of per-sample log2 deviations from
    // the gene mean, precision-weighted.
    let mut deviations = Vec::with_capacity(n_genes * n_samples);
    let mut weights = Vec::with_capacity(n_genes * n_samples);
    for i in 0..n_genes {
        let bm = base_means[i];
        if bm <= 0.0 {
            continue;
        }
        let w = 1.0 / (1.0 / bm + trend[i]);
        let log_bm = (bm + 0.5).log2();
        for j in 0..n_samples {
            deviations.push((normalized[[i, j]] + 0.5).log2() - log_bm);
            weights.push(w);
        }
    }
    if deviations.is_empty() {
        return Err(DiffexError::TransformFailed {
            reason: "no expressed genes to transform".to_string(),
        });
    }
    let prior_var = matched_prior_variance(&deviations, &weights, 0.05);
    log::debug!("rlog prior variance: {:.4}", prior_var);

    // Penalties are matched on the log2 scale; the fitter works on the
    // natural-log scale.
    let mut ridge = vec![(1.0 / prior_var) / (LN_2 * LN_2); n_coefs];
    ridge[0] = 1e-6 / (LN_2 * LN_2);
    let opts = FitOptions {
        max_iter: 100,
        tol: 1e-4,
        ridge: Some(ridge),
    };

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            if base_means[i] <= 0.0 {
                return vec![0.0; n_samples];
            }
            let fit = fit_gene(counts.row(i), design.view(), &size_factors, trend[i], &opts);
            (0..n_samples)
                .map(|s| {
                    let mut v = 0.0;
                    for k in 0..n_coefs {
                        v += design[[s, k]] * fit.beta[k];
                    }
                    v * LOG2_E
                })
                .collect()
        })
        .collect();

    let mut data = Array2::zeros((n_genes, n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            data[[i, j]] = v;
        }
    }

    Ok(TransformedMatrix {
        data,
        gene_ids: exp.counts().gene_ids().to_vec(),
        sample_ids: exp.counts().sample_ids().to_vec(),
        kind: TransformKind::Rlog,
    })
}

/// Closed-form variance-stabilizing transform.
fn vst(exp: &Experiment) -> Result<TransformedMatrix> {
    let normalized = exp
        .normalized_counts()
        .ok_or_else(|| DiffexError::TransformFailed {
            reason: "normalized counts missing".to_string(),
        })?;

    let data = match exp.trend_coefficients() {
        Some((a0, a1)) if a0 > 0.0 => {
            // From the parametric trend alpha(mu) = a0 + a1/mu.
            normalized.mapv(|q| {
                let q = q.max(0.0);
                ((1.0 + a1 + 2.0 * a0 * q + 2.0 * (a0 * q * (1.0 + a1 + a0 * q)).sqrt())
                    / (4.0 * a0))
                    .log2()
            })
        }
        _ => {
            // Constant-dispersion fallback.
            let trend = trend_dispersions(exp)?;
            let mut finite: Vec<f64> = trend.iter().copied().filter(|d| d.is_finite()).collect();
            if finite.is_empty() {
                return Err(DiffexError::TransformFailed {
                    reason: "no finite dispersion for the vst fallback".to_string(),
                });
            }
            finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let alpha = finite[finite.len() / 2].max(1e-8);
            normalized.mapv(|q| {
                let q = q.max(0.0);
                (2.0 * (alpha * q).sqrt().asinh() - alpha.ln() - 4.0_f64.ln()) / LN_2
            })
        }
    };

    Ok(TransformedMatrix {
        data,
        gene_ids: exp.counts().gene_ids().to_vec(),
        sample_ids: exp.counts().sample_ids().to_vec(),
        kind: TransformKind::Vst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CountTable, SampleSheet};
    use crate::normalize::{estimate_size_factors, DepthNormalization};
    use ndarray::Array2;

    fn experiment() -> Experiment {
        let n_genes = 25;
        let n_samples = 6;
        let mut counts = Array2::zeros((n_genes, n_samples));
        for i in 0..n_genes {
            let base = 10.0 + 40.0 * i as f64;
            for j in 0..n_samples {
                let wiggle = 1.0 + 0.1 * ((i * 3 + j * 7) % 5) as f64 - 0.2;
                counts[[i, j]] = (base * wiggle).round().max(0.0);
            }
        }
        // one silent gene
        for j in 0..n_samples {
            counts[[0, j]] = 0.0;
        }
        let gene_ids = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let sample_ids: Vec<String> = (0..n_samples).map(|j| format!("s{}", j)).collect();
        let table = CountTable::new(counts, gene_ids, sample_ids.clone()).unwrap();
        let mut sheet = SampleSheet::new(sample_ids);
        sheet
            .add_factor(
                "group",
                vec!["a".into(), "a".into(), "a".into(), "b".into(), "b".into(), "b".into()],
            )
            .unwrap();
        let mut exp = Experiment::new(table, sheet, "group").unwrap();
        estimate_size_factors(&mut exp, DepthNormalization::PositiveCounts).unwrap();
        exp
    }

    #[test]
    fn requires_size_factors() {
        let exp = experiment();
        let bare = Experiment::new(
            exp.counts().clone(),
            exp.samples().clone(),
            "group",
        )
        .unwrap();
        assert!(transform_counts(&bare, TransformKind::Vst, true).is_err());
    }

    #[test]
    fn blind_rlog_produces_finite_log2_values() {
        let exp = experiment();
        let t = transform_counts(&exp, TransformKind::Rlog, true).unwrap();
        assert_eq!(t.data.dim(), (25, 6));
        assert!(t.data.iter().all(|v| v.is_finite()));
        // the silent gene maps to zero
        assert!(t.data.row(0).iter().all(|&v| v == 0.0));
        // an expressed gene lands near its log2 normalized mean
        let bm = exp.base_means()[10];
        let row = t.data.row(10);
        let mean_t = row.sum() / 6.0;
        assert!((mean_t - bm.log2()).abs() < 1.0);
    }

    #[test]
    fn rlog_compresses_low_count_spread() {
        let exp = experiment();
        let t = transform_counts(&exp, TransformKind::Rlog, true).unwrap();
        let norm = exp.normalized_counts().unwrap();
        // For a low-count gene the rlog spread is below the raw log2 spread.
        let i = 1; // lowest expressed gene
        let raw: Vec<f64> = (0..6).map(|j| (norm[[i, j]] + 0.5).log2()).collect();
        let raw_spread = raw.iter().cloned().fold(f64::MIN, f64::max)
            - raw.iter().cloned().fold(f64::MAX, f64::min);
        let row = t.data.row(i);
        let t_spread = row.iter().cloned().fold(f64::MIN, f64::max)
            - row.iter().cloned().fold(f64::MAX, f64::min);
        assert!(t_spread <= raw_spread + 1e-9);
    }

    #[test]
    fn vst_is_monotone_in_counts() {
        let exp = experiment();
        let t = transform_counts(&exp, TransformKind::Vst, true).unwrap();
        let norm = exp.normalized_counts().unwrap();
        // pick one sample; sort genes by normalized count and check order
        let mut idx: Vec<usize> = (0..25).collect();
        idx.sort_by(|&a, &b| norm[[a, 0]].partial_cmp(&norm[[b, 0]]).unwrap());
        for w in idx.windows(2) {
            assert!(t.data[[w[0], 0]] <= t.data[[w[1], 0]] + 1e-9);
        }
    }
}
