//! Principal component analysis of samples
//!
//! PCA runs on the transformed matrix, restricted to the most variable
//! genes, and projects samples rather than genes. With a handful of
//! samples against thousands of genes the eigendecomposition is done on
//! the small sample-by-sample Gram matrix; its eigenvalues carry the
//! per-component variance and its eigenvectors scale into the sample
//! scores.

use ndarray::{Array2, ArrayView2};

use crate::error::{DiffexError, Result};

/// Sample coordinates on the leading principal components.
#[derive(Debug, Clone)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    /// samples x components.
    pub scores: Array2<f64>,
    /// Fraction of total variance per component.
    pub variance_fraction: Vec<f64>,
    /// How many genes entered the decomposition.
    pub genes_used: usize,
}

/// Compute principal components over the `top_genes` most variable rows.
pub fn principal_components(
    data: ArrayView2<'_, f64>,
    sample_ids: &[String],
    top_genes: usize,
    n_components: usize,
) -> Result<PcaResult> {
    let (n_genes, n_samples) = data.dim();
    if n_samples != sample_ids.len() {
        return Err(DiffexError::DimensionMismatch {
            expected: format!("{} sample ids", n_samples),
            got: format!("{}", sample_ids.len()),
        });
    }
    if n_genes == 0 || n_samples < 2 {
        return Err(DiffexError::EmptyData {
            reason: "need at least two samples and one gene for PCA".to_string(),
        });
    }

    // Rank genes by variance across samples.
    let mut variances: Vec<(usize, f64)> = (0..n_genes)
        .map(|i| {
            let row = data.row(i);
            let mean = row.sum() / n_samples as f64;
            let var = row.iter().map(|&x| (x - mean).powi(2)).sum::<f64>()
                / (n_samples as f64 - 1.0);
            (i, var)
        })
        .collect();
    variances.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let keep: Vec<usize> = variances
        .iter()
        .take(top_genes.min(n_genes))
        .filter(|(_, v)| *v > 0.0)
        .map(|&(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(DiffexError::EmptyData {
            reason: "no gene varies across samples".to_string(),
        });
    }

    // Samples-by-genes submatrix, each gene centered.
    let mut x = Array2::zeros((n_samples, keep.len()));
    for (c, &gi) in keep.iter().enumerate() {
        let row = data.row(gi);
        let mean = row.sum() / n_samples as f64;
        for s in 0..n_samples {
            x[[s, c]] = row[s] - mean;
        }
    }

    // Gram matrix and its spectrum.
    let mut gram = Array2::zeros((n_samples, n_samples));
    for a in 0..n_samples {
        for b in a..n_samples {
            let dot: f64 = (0..keep.len()).map(|c| x[[a, c]] * x[[b, c]]).sum();
            gram[[a, b]] = dot;
            gram[[b, a]] = dot;
        }
    }
    let (eigenvalues, eigenvectors) = jacobi_eigen(&gram);

    let total: f64 = eigenvalues.iter().filter(|&&e| e > 0.0).sum();
    if total <= 0.0 {
        return Err(DiffexError::EmptyData {
            reason: "samples are identical on the selected genes".to_string(),
        });
    }

    let k = n_components.min(n_samples);
    let mut scores = Array2::zeros((n_samples, k));
    let mut variance_fraction = Vec::with_capacity(k);
    for c in 0..k {
        let lambda = eigenvalues[c].max(0.0);
        let scale = lambda.sqrt();
        for s in 0..n_samples {
            scores[[s, c]] = eigenvectors[[s, c]] * scale;
        }
        variance_fraction.push(lambda / total);
    }

    Ok(PcaResult {
        sample_ids: sample_ids.to_vec(),
        scores,
        variance_fraction,
        genes_used: keep.len(),
    })
}

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns eigenvalues in decreasing order with matching eigenvector
/// columns.
fn jacobi_eigen(matrix: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut v = Array2::eye(n);

    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]] * a[[i, j]])
            .sum();
        if off < 1e-22 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-30 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[[j, j]]
            .partial_cmp(&a[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let eigenvalues: Vec<f64> = order.iter().map(|&i| a[[i, i]]).collect();
    let mut eigenvectors = Array2::zeros((n, n));
    for (c, &i) in order.iter().enumerate() {
        for r in 0..n {
            eigenvectors[[r, c]] = v[[r, i]];
        }
    }
    (eigenvalues, eigenvectors)
}
