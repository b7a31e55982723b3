//! Dense least-squares helpers for small per-gene systems
//!
//! Design matrices here have at most a few dozen columns, so everything is
//! kept as flat row-major buffers and factored with Householder
//! reflections. The factorization is retained because model fitting needs
//! both the solution and the inverse Gram matrix (for standard errors).

/// Householder QR factorization of an m x n matrix (m >= n), with the
/// right-hand side reduced alongside.
pub struct QrLeastSquares {
    /// Upper-triangular factor R, packed row-major into the first n rows.
    r: Vec<f64>,
    /// Q' * b for the supplied right-hand side.
    qtb: Vec<f64>,
    n_cols: usize,
}

impl QrLeastSquares {
    /// Factor `a` (m x n, row-major, consumed) against right-hand side `b`.
    pub fn factor(mut a: Vec<f64>, mut b: Vec<f64>, m: usize, n: usize) -> Self {
        debug_assert_eq!(a.len(), m * n);
        debug_assert_eq!(b.len(), m);

        for j in 0..n {
            let mut norm_sq = 0.0_f64;
            for i in j..m {
                let v = a[i * n + j];
                norm_sq += v * v;
            }
            if norm_sq < 1e-30 {
                continue;
            }

            let head = a[j * n + j];
            let norm = norm_sq.sqrt();
            let pivot = if head >= 0.0 { head + norm } else { head - norm };

            let rows = m - j;
            let mut v = vec![0.0_f64; rows];
            v[0] = 1.0;
            for i in 1..rows {
                v[i] = a[(j + i) * n + j] / pivot;
            }
            let tau = 2.0 / v.iter().map(|&x| x * x).sum::<f64>();

            for k in j..n {
                let dot: f64 = (0..rows).map(|i| v[i] * a[(j + i) * n + k]).sum();
                for i in 0..rows {
                    a[(j + i) * n + k] -= tau * v[i] * dot;
                }
            }
            let dot_b: f64 = (0..rows).map(|i| v[i] * b[j + i]).sum();
            for i in 0..rows {
                b[j + i] -= tau * v[i] * dot_b;
            }
        }

        a.truncate(n * n);
        b.truncate(n);
        Self {
            r: a,
            qtb: b,
            n_cols: n,
        }
    }

    /// Least-squares solution via back-substitution. Degenerate columns
    /// resolve to zero rather than poisoning the whole solution.
    pub fn solve(&self) -> Vec<f64> {
        let n = self.n_cols;
        let mut x = vec![0.0_f64; n];
        for i in (0..n).rev() {
            let mut acc = self.qtb[i];
            for j in (i + 1)..n {
                acc -= self.r[i * n + j] * x[j];
            }
            let diag = self.r[i * n + i];
            x[i] = if diag.abs() < 1e-30 { 0.0 } else { acc / diag };
        }
        x
    }

    /// (A'A)^-1 = R^-1 R^-T, packed row-major n x n.
    pub fn inverse_gram(&self) -> Vec<f64> {
        let n = self.n_cols;
        let rinv = self.invert_r();
        let mut out = vec![0.0_f64; n * n];
        for i in 0..n {
            for j in 0..n {
                // (R^-1 R^-T)[i,j] = sum_k R^-1[i,k] * R^-1[j,k]
                let mut acc = 0.0;
                for k in i.max(j)..n {
                    acc += rinv[i * n + k] * rinv[j * n + k];
                }
                out[i * n + j] = acc;
            }
        }
        out
    }

    /// Log-determinant of A'A (twice the log-determinant magnitude of R).
    pub fn ln_det_gram(&self) -> f64 {
        let n = self.n_cols;
        let mut acc = 0.0_f64;
        for i in 0..n {
            let d = self.r[i * n + i].abs().max(1e-30);
            acc += d.ln();
        }
        2.0 * acc
    }

    fn invert_r(&self) -> Vec<f64> {
        let n = self.n_cols;
        let mut inv = vec![0.0_f64; n * n];
        for col in (0..n).rev() {
            let diag = self.r[col * n + col];
            if diag.abs() < 1e-30 {
                continue;
            }
            inv[col * n + col] = 1.0 / diag;
            for row in (0..col).rev() {
                let mut acc = 0.0;
                for k in (row + 1)..=col {
                    acc += self.r[row * n + k] * inv[k * n + col];
                }
                let d = self.r[row * n + row];
                if d.abs() >= 1e-30 {
                    inv[row * n + col] = -acc / d;
                }
            }
        }
        inv
    }
}

/// Multiply two packed row-major n x n matrices.
pub fn mat_mul(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0_f64; n * n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            if aik == 0.0 {
                continue;
            }
            for j in 0..n {
                out[i * n + j] += aik * b[k * n + j];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_exact_square_system() {
        // [[2, 1], [1, 3]] x = [5, 10] -> x = [1, 3]
        let qr = QrLeastSquares::factor(vec![2.0, 1.0, 1.0, 3.0], vec![5.0, 10.0], 2, 2);
        let x = qr.solve();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn solves_overdetermined_system() {
        // [[1,0],[0,1],[1,1]] x = [1,2,3] has exact solution [1,2]
        let a = vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let qr = QrLeastSquares::factor(a, vec![1.0, 2.0, 3.0], 3, 2);
        let x = qr.solve();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn inverse_gram_matches_direct_inverse() {
        // A = [[1,0],[0,2],[1,1]], A'A = [[2,1],[1,5]], det = 9
        let a = vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0];
        let qr = QrLeastSquares::factor(a, vec![0.0, 0.0, 0.0], 3, 2);
        let inv = qr.inverse_gram();
        // (A'A)^-1 = 1/9 * [[5,-1],[-1,2]]
        assert!((inv[0] - 5.0 / 9.0).abs() < 1e-10);
        assert!((inv[1] + 1.0 / 9.0).abs() < 1e-10);
        assert!((inv[2] + 1.0 / 9.0).abs() < 1e-10);
        assert!((inv[3] - 2.0 / 9.0).abs() < 1e-10);
    }

    #[test]
    fn ln_det_gram_matches_known_determinant() {
        let a = vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0];
        let qr = QrLeastSquares::factor(a, vec![0.0; 3], 3, 2);
        assert!((qr.ln_det_gram() - 9.0_f64.ln()).abs() < 1e-8);
    }

    #[test]
    fn degenerate_column_resolves_to_zero() {
        // Second column is all zeros.
        let a = vec![1.0, 0.0, 1.0, 0.0];
        let qr = QrLeastSquares::factor(a, vec![2.0, 2.0], 2, 2);
        let x = qr.solve();
        assert!((x[0] - 2.0).abs() < 1e-10);
        assert_eq!(x[1], 0.0);
    }
}
