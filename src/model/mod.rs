//! Negative binomial generalized linear models

mod design;
mod glm;
pub mod linalg;
pub mod nb;

pub use design::{build_design, DesignLayout};
pub use glm::{fit_all_genes, fit_gene, FitOptions, GeneFit};
