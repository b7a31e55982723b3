//! diffex: differential expression analysis for RNA-seq count data
//!
//! The crate covers an RNA-seq analysis from raw counts to annotated
//! results: depth normalization with size factors, negative binomial
//! dispersion estimation with trend shrinkage, per-gene GLM fitting, Wald
//! testing with Benjamini-Hochberg correction, optional fold change
//! shrinkage, rlog/VST transforms, PCA and clustering for exploration,
//! and annotation joins for readable output.
//!
//! # Example
//!
//! ```ignore
//! use diffex::prelude::*;
//!
//! let counts = read_counts("counts.tsv.gz")?;
//! let samples = read_samples("samples.tsv")?;
//! let mut exp = Experiment::new(counts, samples, "treatment")?;
//!
//! let contrast = Contrast::new("treatment", "DPN", "Control");
//! let results = run_differential_expression(&mut exp, contrast)?;
//! println!("{}", results.summary(0.05));
//! ```

pub mod annotate;
pub mod cli;
pub mod dataset;
pub mod dispersion;
pub mod error;
pub mod explore;
pub mod fetch;
pub mod io;
pub mod model;
pub mod normalize;
pub mod shrink;
pub mod stats;
pub mod testing;
pub mod transform;

/// Convenient imports for the common pipeline
pub mod prelude {
    pub use crate::annotate::AnnotationTable;
    pub use crate::dataset::{CountTable, Experiment, SampleSheet};
    pub use crate::dispersion::{estimate_dispersions, DispersionOptions};
    pub use crate::error::{DiffexError, Result};
    pub use crate::explore::{average_linkage, principal_components, sample_distances};
    pub use crate::fetch::{fetch_dataset, FetchPlan};
    pub use crate::io::{read_counts, read_samples, write_de_table, write_matrix, Contrast, DeTable};
    pub use crate::model::{fit_all_genes, FitOptions};
    pub use crate::normalize::{estimate_size_factors, DepthNormalization};
    pub use crate::shrink::shrink_log_fold_changes;
    pub use crate::testing::{benjamini_hochberg, wald_test};
    pub use crate::transform::{transform_counts, TransformKind};
    pub use crate::run_differential_expression;
}

use dataset::Experiment;
use error::Result;
use io::{Contrast, DeTable};

/// Run the standard pipeline on an experiment: size factors (if not yet
/// estimated), dispersions, model fit, and the Wald test for the given
/// contrast.
pub fn run_differential_expression(
    exp: &mut Experiment,
    contrast: Contrast,
) -> Result<DeTable> {
    if !exp.has_size_factors() {
        normalize::estimate_size_factors(exp, normalize::DepthNormalization::MedianRatios)?;
    }
    if !exp.has_dispersions() {
        dispersion::estimate_dispersions(exp, &dispersion::DispersionOptions::default())?;
    }
    let layout = model::fit_all_genes(exp, &model::FitOptions::default())?;
    testing::wald_test(exp, &layout, contrast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset::{CountTable, SampleSheet};
    use ndarray::array;

    #[test]
    fn full_pipeline_finds_known_changes() {
        let counts = CountTable::new(
            array![
                [100.0, 110.0, 90.0, 400.0, 420.0, 380.0],  // up
                [500.0, 520.0, 480.0, 500.0, 510.0, 490.0], // flat
                [300.0, 310.0, 290.0, 75.0, 80.0, 70.0],    // down
                [50.0, 55.0, 45.0, 50.0, 52.0, 48.0],       // flat, low
                [200.0, 220.0, 180.0, 200.0, 210.0, 190.0], // flat
                [150.0, 160.0, 140.0, 300.0, 320.0, 280.0], // up
                [400.0, 420.0, 380.0, 100.0, 110.0, 90.0],  // down
                [80.0, 85.0, 75.0, 80.0, 82.0, 78.0],       // flat
                [600.0, 620.0, 580.0, 600.0, 610.0, 590.0], // flat
                [250.0, 260.0, 240.0, 500.0, 520.0, 480.0], // up
            ],
            (1..=10).map(|i| format!("gene{}", i)).collect(),
            (1..=6).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap();

        let mut samples = SampleSheet::new((1..=6).map(|i| format!("s{}", i)).collect());
        samples
            .add_factor(
                "treatment",
                vec![
                    "control".into(),
                    "control".into(),
                    "control".into(),
                    "treated".into(),
                    "treated".into(),
                    "treated".into(),
                ],
            )
            .unwrap();

        let mut exp = Experiment::new(counts, samples, "treatment").unwrap();
        let contrast = Contrast::new("treatment", "treated", "control");
        let results = run_differential_expression(&mut exp, contrast).unwrap();

        assert_eq!(results.n_genes(), 10);
        assert!(results.log2_fold_change[0] > 1.0, "gene1 should be up");
        assert!(results.log2_fold_change[2] < -1.0, "gene3 should be down");
        assert!(results.log2_fold_change[1].abs() < 0.3, "gene2 should be flat");

        // The changed genes rank ahead of the flat ones.
        let top4 = results.top(4);
        for &i in &top4 {
            assert!([0_usize, 2, 5, 6, 9].contains(&i), "top gene {} unexpected", i);
        }

        // Adjusted p-values are defined for every tested gene.
        assert!(results.padj.iter().all(|p| p.is_finite()));
        let summary = results.summary(0.05);
        assert!(summary.significant >= 4);
        assert!(summary.up_regulated >= 2);
        assert!(summary.down_regulated >= 2);
    }
}
