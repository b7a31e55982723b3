//! Per-sample experimental covariates

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DiffexError, Result};

/// Categorical covariates describing each sample (time point, treatment,
/// patient, ...). Factor levels are ordered; the first level acts as the
/// reference in design matrices unless releveled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSheet {
    sample_ids: Vec<String>,
    factors: HashMap<String, Vec<String>>,
    /// Explicit reference level per factor, set via [`SampleSheet::relevel`].
    references: HashMap<String, String>,
}

impl SampleSheet {
    pub fn new(sample_ids: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                log::warn!("duplicate sample id '{}'", id);
            }
        }
        Self {
            sample_ids,
            factors: HashMap::new(),
            references: HashMap::new(),
        }
    }

    /// Add a categorical factor column.
    pub fn add_factor(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DiffexError::DimensionMismatch {
                expected: format!("{} values for factor '{}'", self.sample_ids.len(), name),
                got: format!("{}", values.len()),
            });
        }
        self.factors.insert(name.to_string(), values);
        Ok(())
    }

    /// Choose the reference level for a factor.
    pub fn relevel(&mut self, factor: &str, reference: &str) -> Result<()> {
        let levels = self.levels(factor)?;
        if !levels.iter().any(|l| l == reference) {
            return Err(DiffexError::InvalidSamples {
                reason: format!("'{}' is not a level of factor '{}'", reference, factor),
            });
        }
        self.references
            .insert(factor.to_string(), reference.to_string());
        Ok(())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn has_factor(&self, name: &str) -> bool {
        self.factors.contains_key(name)
    }

    pub fn factor_names(&self) -> Vec<&str> {
        self.factors.keys().map(|s| s.as_str()).collect()
    }

    /// Values of a factor, one per sample.
    pub fn factor(&self, name: &str) -> Result<&[String]> {
        self.factors
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| DiffexError::InvalidSamples {
                reason: format!("factor '{}' not found in sample sheet", name),
            })
    }

    /// Distinct levels of a factor with the reference first, remaining
    /// levels in sorted order.
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let values = self.factor(name)?;
        let mut levels: Vec<String> = values.to_vec();
        levels.sort();
        levels.dedup();
        if let Some(reference) = self.references.get(name) {
            if let Some(pos) = levels.iter().position(|l| l == reference) {
                let r = levels.remove(pos);
                levels.insert(0, r);
            }
        }
        Ok(levels)
    }

    /// Reference level of a factor (first level after ordering).
    pub fn reference_level(&self, name: &str) -> Result<String> {
        self.levels(name).map(|levels| levels[0].clone())
    }

    /// Indices of samples carrying a given level.
    pub fn samples_with_level(&self, factor: &str, level: &str) -> Result<Vec<usize>> {
        Ok(self
            .factor(factor)?
            .iter()
            .enumerate()
            .filter(|(_, v)| v.as_str() == level)
            .map(|(i, _)| i)
            .collect())
    }

    /// Restrict the sheet to the given samples, in the given order.
    pub fn select_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let ids = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();
        let mut sheet = SampleSheet::new(ids);
        for (name, values) in &self.factors {
            let selected = sample_indices.iter().map(|&i| values[i].clone()).collect();
            sheet.add_factor(name, selected)?;
        }
        sheet.references = self.references.clone();
        Ok(sheet)
    }
}
