//! Hierarchical clustering of samples
//!
//! Average-linkage (UPGMA) agglomeration over a precomputed distance
//! matrix. The merge history doubles as a text report, and the tree is
//! rendered as a Newick string with ultrametric branch lengths.

use ndarray::ArrayView2;

use crate::error::{DiffexError, Result};

/// One agglomeration step.
#[derive(Debug, Clone)]
pub struct MergeStep {
    pub left: String,
    pub right: String,
    /// Average distance between the merged clusters.
    pub height: f64,
    /// Number of samples in the merged cluster.
    pub size: usize,
}

/// Result of clustering: the merge history plus a Newick rendering.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    pub merges: Vec<MergeStep>,
    pub newick: String,
}

struct Cluster {
    label: String,
    newick: String,
    size: usize,
    height: f64,
}

/// Cluster samples by average linkage.
pub fn average_linkage(distances: ArrayView2<'_, f64>, labels: &[String]) -> Result<Dendrogram> {
    let n = labels.len();
    if distances.nrows() != n || distances.ncols() != n {
        return Err(DiffexError::DimensionMismatch {
            expected: format!("{}x{} distance matrix", n, n),
            got: format!("{}x{}", distances.nrows(), distances.ncols()),
        });
    }
    if n < 2 {
        return Err(DiffexError::EmptyData {
            reason: "need at least two samples to cluster".to_string(),
        });
    }

    let mut clusters: Vec<Cluster> = labels
        .iter()
        .map(|l| Cluster {
            label: l.clone(),
            newick: l.clone(),
            size: 1,
            height: 0.0,
        })
        .collect();
    let mut dist: Vec<Vec<f64>> = (0..n)
        .map(|a| (0..n).map(|b| distances[[a, b]]).collect())
        .collect();
    let mut merges = Vec::with_capacity(n - 1);

    while clusters.len() > 1 {
        // closest pair
        let m = clusters.len();
        let (mut bi, mut bj, mut best) = (0, 1, f64::INFINITY);
        for i in 0..m {
            for j in (i + 1)..m {
                if dist[i][j] < best {
                    best = dist[i][j];
                    bi = i;
                    bj = j;
                }
            }
        }

        let right = clusters.remove(bj);
        let left = clusters.remove(bi);
        let height = best;
        // Ultrametric branch lengths: each leaf sits at depth height/2.
        let bl_left = (height - left.height) / 2.0;
        let bl_right = (height - right.height) / 2.0;
        let merged = Cluster {
            label: format!("{}+{}", left.label, right.label),
            newick: format!(
                "({}:{:.4},{}:{:.4})",
                left.newick, bl_left, right.newick, bl_right
            ),
            size: left.size + right.size,
            height,
        };
        merges.push(MergeStep {
            left: left.label.clone(),
            right: right.label.clone(),
            height,
            size: merged.size,
        });

        // update distances by size-weighted averages
        let mut new_row = Vec::with_capacity(m - 2);
        for (k, _c) in clusters.iter().enumerate() {
            // indices in the old matrix: account for the two removals
            let old_k = if k < bi {
                k
            } else if k + 1 < bj {
                k + 1
            } else {
                k + 2
            };
            let d = (left.size as f64 * dist[bi][old_k] + right.size as f64 * dist[bj][old_k])
                / (left.size + right.size) as f64;
            new_row.push(d);
        }

        // rebuild the working matrix without rows/cols bi, bj
        let keep: Vec<usize> = (0..m).filter(|&k| k != bi && k != bj).collect();
        let mut next: Vec<Vec<f64>> = keep
            .iter()
            .map(|&a| keep.iter().map(|&b| dist[a][b]).collect())
            .collect();
        for (k, row) in next.iter_mut().enumerate() {
            row.push(new_row[k]);
        }
        let mut last: Vec<f64> = new_row;
        last.push(0.0);
        next.push(last);
        dist = next;
        clusters.push(merged);
    }

    let newick = format!("{};", clusters[0].newick);
    Ok(Dendrogram { merges, newick })
}
