//! Differential expression results table

use serde::{Deserialize, Serialize};

/// A two-level comparison on one design factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contrast {
    pub factor: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(factor: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            factor: factor.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} vs {}",
            self.factor, self.numerator, self.denominator
        )
    }
}

/// Per-gene differential expression statistics for one contrast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeTable {
    pub contrast: Contrast,
    pub gene_ids: Vec<String>,
    /// Mean of depth-normalized counts across all samples.
    pub base_mean: Vec<f64>,
    pub log2_fold_change: Vec<f64>,
    pub lfc_se: Vec<f64>,
    /// Wald statistic.
    pub stat: Vec<f64>,
    pub pvalue: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-value.
    pub padj: Vec<f64>,
    /// Gene symbols, present once annotated.
    pub symbol: Option<Vec<String>>,
    /// Gene descriptions, present once annotated.
    pub description: Option<Vec<String>>,
}

impl DeTable {
    pub fn new(contrast: Contrast, gene_ids: Vec<String>) -> Self {
        let n = gene_ids.len();
        Self {
            contrast,
            gene_ids,
            base_mean: vec![f64::NAN; n],
            log2_fold_change: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalue: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            symbol: None,
            description: None,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Row indices ordered by increasing p-value, NaN last.
    pub fn order_by_pvalue(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.n_genes()).collect();
        idx.sort_by(|&a, &b| {
            let pa = self.pvalue[a];
            let pb = self.pvalue[b];
            match (pa.is_nan(), pb.is_nan()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal),
            }
        });
        idx
    }

    /// Indices of the `n` strongest genes by p-value.
    pub fn top(&self, n: usize) -> Vec<usize> {
        let mut idx = self.order_by_pvalue();
        idx.truncate(n);
        idx
    }

    /// Genes with adjusted p-value below `alpha`.
    pub fn significant(&self, alpha: f64) -> Vec<usize> {
        (0..self.n_genes())
            .filter(|&i| self.padj[i].is_finite() && self.padj[i] < alpha)
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> DeSummary {
        let significant = self.significant(alpha);
        let up = significant
            .iter()
            .filter(|&&i| self.log2_fold_change[i] > 0.0)
            .count();
        DeSummary {
            contrast: self.contrast.clone(),
            total_genes: self.n_genes(),
            tested: self.pvalue.iter().filter(|p| p.is_finite()).count(),
            significant: significant.len(),
            up_regulated: up,
            down_regulated: significant.len() - up,
            alpha,
        }
    }
}

/// Printable summary of one contrast's results.
#[derive(Debug, Clone)]
pub struct DeSummary {
    pub contrast: Contrast,
    pub total_genes: usize,
    pub tested: usize,
    pub significant: usize,
    pub up_regulated: usize,
    pub down_regulated: usize,
    pub alpha: f64,
}

impl std::fmt::Display for DeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Contrast {}", self.contrast)?;
        writeln!(f, "  genes:                {}", self.total_genes)?;
        writeln!(f, "  tested:               {}", self.tested)?;
        writeln!(
            f,
            "  significant (padj < {}): {}",
            self.alpha, self.significant
        )?;
        writeln!(f, "    up-regulated:       {}", self.up_regulated)?;
        writeln!(f, "    down-regulated:     {}", self.down_regulated)?;
        Ok(())
    }
}
