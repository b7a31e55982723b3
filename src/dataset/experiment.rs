//! Experiment container pairing counts with sample covariates

use ndarray::{Array1, Array2};

use super::{CountTable, SampleSheet};
use crate::error::{DiffexError, Result};

/// Count data plus sample covariates plus the additive design, with slots
/// for everything the pipeline estimates along the way (size factors,
/// dispersions, model coefficients).
#[derive(Debug, Clone)]
pub struct Experiment {
    counts: CountTable,
    samples: SampleSheet,
    /// Design factors in model order; the last one is the factor of
    /// interest. Empty means an intercept-only model.
    design: Vec<String>,

    // depth normalization
    size_factors: Option<Array1<f64>>,
    normalized: Option<Array2<f64>>,

    // dispersion estimation
    genewise_dispersions: Option<Array1<f64>>,
    trend_dispersions: Option<Array1<f64>>,
    final_dispersions: Option<Array1<f64>>,
    /// Parametric trend alpha(mu) = a0 + a1/mu, when the parametric fit held.
    trend_coefficients: Option<(f64, f64)>,
    /// Variance of log residuals around the trend, kept for outlier calls.
    log_residual_variance: Option<f64>,

    // model fit
    design_matrix: Option<Array2<f64>>,
    coefficient_names: Option<Vec<String>>,
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
}

impl Experiment {
    /// Create an experiment with a single design factor.
    pub fn new(counts: CountTable, samples: SampleSheet, factor: &str) -> Result<Self> {
        Self::with_design(counts, samples, &[factor.to_string()])
    }

    /// Create an experiment with an additive multi-factor design. An empty
    /// factor list gives an intercept-only model, used by blind transforms.
    pub fn with_design(
        counts: CountTable,
        samples: SampleSheet,
        design: &[String],
    ) -> Result<Self> {
        if counts.sample_ids() != samples.sample_ids() {
            return Err(DiffexError::InvalidSamples {
                reason: "sample ids of counts and sample sheet do not match".to_string(),
            });
        }
        for factor in design {
            let levels = samples.levels(factor)?;
            if levels.len() < 2 {
                log::warn!(
                    "design factor '{}' has a single level ('{}'); it cannot be tested",
                    factor,
                    levels.first().map(|s| s.as_str()).unwrap_or("")
                );
            }
        }

        Ok(Self {
            counts,
            samples,
            design: design.to_vec(),
            size_factors: None,
            normalized: None,
            genewise_dispersions: None,
            trend_dispersions: None,
            final_dispersions: None,
            trend_coefficients: None,
            log_residual_variance: None,
            design_matrix: None,
            coefficient_names: None,
            coefficients: None,
            standard_errors: None,
            converged: None,
        })
    }

    /// Same data, different design, with all fitted state except size
    /// factors discarded. Used for blind transforms.
    pub fn redesigned(&self, design: &[String]) -> Result<Self> {
        let mut exp = Self::with_design(self.counts.clone(), self.samples.clone(), design)?;
        if let Some(sf) = &self.size_factors {
            exp.set_size_factors(sf.clone())?;
        }
        Ok(exp)
    }

    pub fn counts(&self) -> &CountTable {
        &self.counts
    }

    pub fn samples(&self) -> &SampleSheet {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut SampleSheet {
        &mut self.samples
    }

    pub fn design(&self) -> &[String] {
        &self.design
    }

    /// The factor of interest (last design term).
    pub fn primary_factor(&self) -> Option<&str> {
        self.design.last().map(|s| s.as_str())
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    // --- depth normalization -------------------------------------------

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn has_size_factors(&self) -> bool {
        self.size_factors.is_some()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized.as_ref()
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&s| !s.is_finite() || s <= 0.0) {
            return Err(DiffexError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }

        let raw = self.counts.counts();
        let mut normalized = raw.to_owned();
        for (j, &s) in size_factors.iter().enumerate() {
            for i in 0..self.n_genes() {
                normalized[[i, j]] /= s;
            }
        }

        self.size_factors = Some(size_factors);
        self.normalized = Some(normalized);
        Ok(())
    }

    /// Mean normalized count per gene. NaN until size factors are set.
    pub fn base_means(&self) -> Vec<f64> {
        match &self.normalized {
            Some(norm) => {
                let n = self.n_samples() as f64;
                norm.rows().into_iter().map(|r| r.sum() / n).collect()
            }
            None => vec![f64::NAN; self.n_genes()],
        }
    }

    // --- dispersions ----------------------------------------------------

    pub fn genewise_dispersions(&self) -> Option<&Array1<f64>> {
        self.genewise_dispersions.as_ref()
    }

    pub fn trend_dispersions(&self) -> Option<&Array1<f64>> {
        self.trend_dispersions.as_ref()
    }

    pub fn final_dispersions(&self) -> Option<&Array1<f64>> {
        self.final_dispersions.as_ref()
    }

    /// Dispersions to use for model fitting: the shrunken estimates when
    /// available, otherwise the gene-wise ones.
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.final_dispersions
            .as_ref()
            .or(self.genewise_dispersions.as_ref())
    }

    pub fn has_dispersions(&self) -> bool {
        self.dispersions().is_some()
    }

    pub fn trend_coefficients(&self) -> Option<(f64, f64)> {
        self.trend_coefficients
    }

    pub fn log_residual_variance(&self) -> Option<f64> {
        self.log_residual_variance
    }

    pub fn set_genewise_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len(d.len(), "gene-wise dispersions")?;
        self.genewise_dispersions = Some(d);
        Ok(())
    }

    pub fn set_trend_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len(d.len(), "trend dispersions")?;
        self.trend_dispersions = Some(d);
        Ok(())
    }

    pub fn set_final_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len(d.len(), "final dispersions")?;
        self.final_dispersions = Some(d);
        Ok(())
    }

    pub fn set_trend_coefficients(&mut self, a0: f64, a1: f64) {
        self.trend_coefficients = Some((a0, a1));
    }

    pub fn set_log_residual_variance(&mut self, var: f64) {
        self.log_residual_variance = Some(var);
    }

    // --- model fit ------------------------------------------------------

    pub fn design_matrix(&self) -> Option<&Array2<f64>> {
        self.design_matrix.as_ref()
    }

    pub fn coefficient_names(&self) -> Option<&[String]> {
        self.coefficient_names.as_deref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn converged(&self) -> Option<&[bool]> {
        self.converged.as_deref()
    }

    pub fn has_model_fit(&self) -> bool {
        self.coefficients.is_some()
    }

    pub fn set_design_matrix(&mut self, matrix: Array2<f64>, names: Vec<String>) -> Result<()> {
        if matrix.nrows() != self.n_samples() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} design rows", self.n_samples()),
                got: format!("{}", matrix.nrows()),
            });
        }
        if names.len() != matrix.ncols() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} coefficient names", matrix.ncols()),
                got: format!("{}", names.len()),
            });
        }
        self.design_matrix = Some(matrix);
        self.coefficient_names = Some(names);
        Ok(())
    }

    pub fn set_model_fit(
        &mut self,
        coefficients: Array2<f64>,
        standard_errors: Array2<f64>,
        converged: Vec<bool>,
    ) -> Result<()> {
        self.check_gene_len(coefficients.nrows(), "coefficient rows")?;
        self.check_gene_len(standard_errors.nrows(), "standard error rows")?;
        self.check_gene_len(converged.len(), "convergence flags")?;
        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        self.converged = Some(converged);
        Ok(())
    }

    fn check_gene_len(&self, got: usize, what: &str) -> Result<()> {
        if got != self.n_genes() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", got),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn experiment() -> Experiment {
        let counts = CountTable::new(
            array![
                [100.0, 200.0, 50.0, 150.0],
                [500.0, 600.0, 400.0, 550.0],
                [10.0, 20.0, 15.0, 25.0]
            ],
            vec!["g1".into(), "g2".into(), "g3".into()],
            vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
        )
        .unwrap();

        let mut samples = SampleSheet::new(
            vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
        );
        samples
            .add_factor(
                "treatment",
                vec!["Control".into(), "Control".into(), "DPN".into(), "DPN".into()],
            )
            .unwrap();

        Experiment::new(counts, samples, "treatment").unwrap()
    }

    #[test]
    fn builds_with_matching_samples() {
        let exp = experiment();
        assert_eq!(exp.n_genes(), 3);
        assert_eq!(exp.n_samples(), 4);
        assert_eq!(exp.primary_factor(), Some("treatment"));
    }

    #[test]
    fn rejects_unknown_design_factor() {
        let exp = experiment();
        let r = Experiment::with_design(
            exp.counts().clone(),
            exp.samples().clone(),
            &["patient".to_string()],
        );
        assert!(r.is_err());
    }

    #[test]
    fn size_factors_produce_normalized_counts() {
        let mut exp = experiment();
        exp.set_size_factors(Array1::from_vec(vec![1.0, 2.0, 0.5, 1.0]))
            .unwrap();
        let norm = exp.normalized_counts().unwrap();
        assert!((norm[[0, 1]] - 100.0).abs() < 1e-12);
        assert!((norm[[0, 2]] - 100.0).abs() < 1e-12);
        let bm = exp.base_means();
        assert!((bm[0] - (100.0 + 100.0 + 100.0 + 150.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_nonpositive_size_factors() {
        let mut exp = experiment();
        assert!(exp
            .set_size_factors(Array1::from_vec(vec![1.0, 0.0, 1.0, 1.0]))
            .is_err());
    }

    #[test]
    fn redesigned_keeps_size_factors_only() {
        let mut exp = experiment();
        exp.set_size_factors(Array1::from_vec(vec![1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        exp.set_genewise_dispersions(Array1::from_vec(vec![0.1, 0.1, 0.1]))
            .unwrap();
        let blind = exp.redesigned(&[]).unwrap();
        assert!(blind.has_size_factors());
        assert!(!blind.has_dispersions());
        assert!(blind.design().is_empty());
    }
}
