//! Reading and writing tables

mod results;
mod tables;

pub use results::{Contrast, DeSummary, DeTable};
pub use tables::{read_counts, read_samples, write_de_table, write_matrix};
