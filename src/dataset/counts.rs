//! Count table for RNA-seq read counts

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DiffexError, Result};

/// Append numeric suffixes to repeated gene ids so that every row keeps a
/// distinct label. Repeats occur in real annotation exports and would
/// otherwise make result rows ambiguous.
fn make_unique(ids: Vec<String>) -> Vec<String> {
    let mut total: HashMap<&str, usize> = HashMap::new();
    for id in &ids {
        *total.entry(id.as_str()).or_insert(0) += 1;
    }
    if total.values().all(|&c| c == 1) {
        return ids;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    ids.into_iter()
        .map(|id| {
            let n = seen.entry(id.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                id
            } else {
                let renamed = format!("{}.{}", id, *n - 1);
                log::warn!("duplicate gene id '{}' renamed to '{}'", id, renamed);
                renamed
            }
        })
        .collect()
}

/// Raw read counts, genes in rows and samples in columns.
#[derive(Debug, Clone)]
pub struct CountTable {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountTable {
    /// Build a count table, validating shape and value ranges.
    pub fn new(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} gene ids", n_genes),
                got: format!("{}", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} sample ids", n_samples),
                got: format!("{}", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DiffexError::InvalidCounts {
                reason: "counts must be non-negative finite values".to_string(),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(DiffexError::InvalidCounts {
                reason: "every sample has zero counts for every gene".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "count table contains non-integer values; the negative binomial \
                 model expects raw read counts"
            );
        }

        let gene_ids = make_unique(gene_ids);

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts for one gene across samples.
    pub fn gene_row(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Total assigned reads per sample.
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// Mean raw count per gene.
    pub fn gene_means(&self) -> Vec<f64> {
        let n = self.n_samples() as f64;
        self.counts
            .axis_iter(Axis(0))
            .map(|row| row.sum() / n)
            .collect()
    }

    /// Drop genes that do not reach `min_count` in at least `min_samples`
    /// samples. Pre-filtering weakly expressed genes speeds up model fitting
    /// without changing the tested set in practice.
    pub fn filter_low_counts(&self, min_count: f64, min_samples: usize) -> Result<Self> {
        let keep: Vec<usize> = (0..self.n_genes())
            .filter(|&i| {
                self.counts
                    .row(i)
                    .iter()
                    .filter(|&&x| x >= min_count)
                    .count()
                    >= min_samples
            })
            .collect();

        if keep.is_empty() {
            return Err(DiffexError::EmptyData {
                reason: "no genes passed the count filter".to_string(),
            });
        }

        let counts = self.counts.select(Axis(0), &keep);
        let gene_ids = keep.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(counts, gene_ids, self.sample_ids.clone())
    }

    /// Restrict the table to the given samples, in the given order.
    pub fn select_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(1), sample_indices);
        let sample_ids = sample_indices
            .iter()
            .map(|&j| self.sample_ids[j].clone())
            .collect();
        Self::new(counts, self.gene_ids.clone(), sample_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i + 1)).collect()
    }

    #[test]
    fn builds_and_reports_shape() {
        let t = CountTable::new(
            array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]],
            ids("g", 2),
            ids("s", 3),
        )
        .unwrap();
        assert_eq!(t.n_genes(), 2);
        assert_eq!(t.n_samples(), 3);
        assert_eq!(t.library_sizes(), vec![15.0, 35.0, 55.0]);
    }

    #[test]
    fn rejects_negative_counts() {
        let r = CountTable::new(array![[1.0, -2.0]], ids("g", 1), ids("s", 2));
        assert!(r.is_err());
    }

    #[test]
    fn rejects_all_zero() {
        let r = CountTable::new(array![[0.0, 0.0], [0.0, 0.0]], ids("g", 2), ids("s", 2));
        assert!(r.is_err());
    }

    #[test]
    fn renames_duplicate_gene_ids() {
        let t = CountTable::new(
            array![[1.0, 2.0], [3.0, 4.0]],
            vec!["dup".to_string(), "dup".to_string()],
            ids("s", 2),
        )
        .unwrap();
        assert_eq!(t.gene_ids(), &["dup".to_string(), "dup.1".to_string()]);
    }

    #[test]
    fn low_count_filter_keeps_expressed_genes() {
        let t = CountTable::new(
            array![[100.0, 90.0, 110.0], [0.0, 1.0, 0.0], [5.0, 6.0, 7.0]],
            ids("g", 3),
            ids("s", 3),
        )
        .unwrap();
        let kept = t.filter_low_counts(5.0, 3).unwrap();
        assert_eq!(kept.n_genes(), 2);
        assert_eq!(kept.gene_ids()[1], "g3");
    }
}
