//! Sample-to-sample distances

use ndarray::{Array2, ArrayView2};

/// Euclidean distance between every pair of samples (columns), computed
/// over all genes of a transformed matrix.
pub fn sample_distances(data: ArrayView2<'_, f64>) -> Array2<f64> {
    let n_samples = data.ncols();
    let n_genes = data.nrows();
    let mut dist = Array2::zeros((n_samples, n_samples));
    for a in 0..n_samples {
        for b in (a + 1)..n_samples {
            let mut acc = 0.0;
            for i in 0..n_genes {
                let d = data[[i, a]] - data[[i, b]];
                acc += d * d;
            }
            let d = acc.sqrt();
            dist[[a, b]] = d;
            dist[[b, a]] = d;
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn matches_hand_computed_distances() {
        // two genes, three samples
        let data = array![[0.0, 3.0, 0.0], [0.0, 4.0, 1.0]];
        let d = sample_distances(data.view());
        assert_eq!(d[[0, 0]], 0.0);
        assert!((d[[0, 1]] - 5.0).abs() < 1e-12);
        assert!((d[[0, 2]] - 1.0).abs() < 1e-12);
        assert!((d[[1, 2]] - (9.0_f64 + 9.0).sqrt()).abs() < 1e-12);
        // symmetry
        assert_eq!(d[[1, 0]], d[[0, 1]]);
    }
}
