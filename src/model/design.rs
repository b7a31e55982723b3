//! Design matrix construction for additive multi-factor models

use ndarray::Array2;

use crate::dataset::SampleSheet;
use crate::error::{DiffexError, Result};

/// Where each model coefficient came from: which factor, which level, and
/// which column of the design matrix encodes it.
#[derive(Debug, Clone)]
pub struct DesignLayout {
    pub coef_names: Vec<String>,
    terms: Vec<FactorTerm>,
}

#[derive(Debug, Clone)]
struct FactorTerm {
    factor: String,
    reference: String,
    /// (level, design column) for every non-reference level.
    level_columns: Vec<(String, usize)>,
}

impl DesignLayout {
    pub fn n_coefficients(&self) -> usize {
        self.coef_names.len()
    }

    /// Resolve a contrast to a coefficient column and a sign. Treatment
    /// coding means one side of the contrast must be the factor's
    /// reference level; the sign flips when the numerator is the
    /// reference.
    pub fn contrast_column(
        &self,
        factor: &str,
        numerator: &str,
        denominator: &str,
    ) -> Result<(usize, f64)> {
        let term = self
            .terms
            .iter()
            .find(|t| t.factor == factor)
            .ok_or_else(|| DiffexError::InvalidContrast {
                reason: format!("factor '{}' is not part of the design", factor),
            })?;

        let column_of = |level: &str| {
            term.level_columns
                .iter()
                .find(|(l, _)| l == level)
                .map(|&(_, c)| c)
        };

        if denominator == term.reference {
            if let Some(col) = column_of(numerator) {
                return Ok((col, 1.0));
            }
        }
        if numerator == term.reference {
            if let Some(col) = column_of(denominator) {
                return Ok((col, -1.0));
            }
        }

        Err(DiffexError::InvalidContrast {
            reason: format!(
                "contrast {} vs {} on factor '{}' does not involve the reference \
                 level '{}'; relevel the factor first",
                numerator, denominator, factor, term.reference
            ),
        })
    }
}

/// Build a treatment-coded design matrix: an intercept column plus one
/// indicator column per non-reference level of each factor, factors taken
/// in the given order. An empty factor list yields the intercept-only
/// model.
pub fn build_design(samples: &SampleSheet, factors: &[String]) -> Result<(Array2<f64>, DesignLayout)> {
    let n_samples = samples.n_samples();

    let mut coef_names = vec!["Intercept".to_string()];
    let mut terms = Vec::with_capacity(factors.len());

    for factor in factors {
        let levels = samples.levels(factor)?;
        if levels.len() < 2 {
            return Err(DiffexError::InvalidDesign {
                reason: format!("factor '{}' needs at least two levels", factor),
            });
        }
        let reference = levels[0].clone();
        let mut level_columns = Vec::with_capacity(levels.len() - 1);
        for level in &levels[1..] {
            level_columns.push((level.clone(), coef_names.len()));
            coef_names.push(format!("{}_{}_vs_{}", factor, level, reference));
        }
        terms.push(FactorTerm {
            factor: factor.clone(),
            reference,
            level_columns,
        });
    }

    let n_coefs = coef_names.len();
    if n_coefs > n_samples {
        return Err(DiffexError::InvalidDesign {
            reason: format!(
                "model has {} coefficients but only {} samples",
                n_coefs, n_samples
            ),
        });
    }
    if n_coefs == n_samples {
        log::warn!(
            "model is saturated ({} coefficients for {} samples); \
             dispersion estimates will be unreliable",
            n_coefs,
            n_samples
        );
    }

    let mut design = Array2::zeros((n_samples, n_coefs));
    for i in 0..n_samples {
        design[[i, 0]] = 1.0;
    }
    for (term, factor) in terms.iter().zip(factors.iter()) {
        let values = samples.factor(factor)?;
        for (level, col) in &term.level_columns {
            for (i, v) in values.iter().enumerate() {
                if v == level {
                    design[[i, *col]] = 1.0;
                }
            }
        }
    }

    // Confounded factors produce duplicated columns; catch the exact case.
    for a in 1..n_coefs {
        for b in (a + 1)..n_coefs {
            if (0..n_samples).all(|i| design[[i, a]] == design[[i, b]]) {
                return Err(DiffexError::InvalidDesign {
                    reason: format!(
                        "coefficients '{}' and '{}' are confounded",
                        coef_names[a], coef_names[b]
                    ),
                });
            }
        }
    }

    Ok((design, DesignLayout { coef_names, terms }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> SampleSheet {
        let ids: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let mut s = SampleSheet::new(ids);
        s.add_factor(
            "treatment",
            ["Control", "Control", "DPN", "DPN", "OHT", "OHT"]
                .iter()
                .map(|x| x.to_string())
                .collect(),
        )
        .unwrap();
        s.add_factor(
            "time",
            ["24h", "48h", "24h", "48h", "24h", "48h"]
                .iter()
                .map(|x| x.to_string())
                .collect(),
        )
        .unwrap();
        s
    }

    #[test]
    fn single_factor_layout() {
        let s = sheet();
        let (design, layout) = build_design(&s, &["treatment".to_string()]).unwrap();
        assert_eq!(design.dim(), (6, 3));
        assert_eq!(
            layout.coef_names,
            vec![
                "Intercept",
                "treatment_DPN_vs_Control",
                "treatment_OHT_vs_Control"
            ]
        );
        // DPN samples get a 1 in the DPN column only
        assert_eq!(design[[2, 1]], 1.0);
        assert_eq!(design[[2, 2]], 0.0);
    }

    #[test]
    fn additive_two_factor_layout() {
        let s = sheet();
        let (design, layout) =
            build_design(&s, &["time".to_string(), "treatment".to_string()]).unwrap();
        assert_eq!(design.ncols(), 4);
        assert_eq!(layout.coef_names[1], "time_48h_vs_24h");
        // sample s4: 48h + DPN
        assert_eq!(design[[3, 1]], 1.0);
        assert_eq!(design[[3, 2]], 1.0);
    }

    #[test]
    fn contrast_resolution_and_sign() {
        let s = sheet();
        let (_, layout) = build_design(&s, &["treatment".to_string()]).unwrap();
        let (col, sign) = layout
            .contrast_column("treatment", "DPN", "Control")
            .unwrap();
        assert_eq!((col, sign), (1, 1.0));
        let (col, sign) = layout
            .contrast_column("treatment", "Control", "OHT")
            .unwrap();
        assert_eq!((col, sign), (2, -1.0));
        assert!(layout.contrast_column("treatment", "DPN", "OHT").is_err());
    }

    #[test]
    fn intercept_only_design() {
        let s = sheet();
        let (design, layout) = build_design(&s, &[]).unwrap();
        assert_eq!(design.dim(), (6, 1));
        assert_eq!(layout.coef_names, vec!["Intercept"]);
    }

    #[test]
    fn confounded_factors_rejected() {
        let ids: Vec<String> = (1..=4).map(|i| format!("s{}", i)).collect();
        let mut s = SampleSheet::new(ids);
        s.add_factor(
            "treatment",
            ["A", "A", "B", "B"].iter().map(|x| x.to_string()).collect(),
        )
        .unwrap();
        s.add_factor(
            "batch",
            ["x", "x", "y", "y"].iter().map(|x| x.to_string()).collect(),
        )
        .unwrap();
        let r = build_design(&s, &["batch".to_string(), "treatment".to_string()]);
        assert!(r.is_err());
    }
}
