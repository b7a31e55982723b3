//! Data containers for the analysis pipeline

mod counts;
mod experiment;
mod samples;

pub use counts::CountTable;
pub use experiment::Experiment;
pub use samples::SampleSheet;
