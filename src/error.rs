//! Error types for diffex

use thiserror::Error;

/// Main error type for analysis operations
#[derive(Error, Debug)]
pub enum DiffexError {
    #[error("Invalid count table: {reason}")]
    InvalidCounts { reason: String },

    #[error("Invalid sample sheet: {reason}")]
    InvalidSamples { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Invalid contrast: {reason}")]
    InvalidContrast { reason: String },

    #[error("Model fit failed for gene {gene_id}: {reason}")]
    FitFailed { gene_id: String, reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionFailed { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Transform failed: {reason}")]
    TransformFailed { reason: String },

    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Invalid annotation table: {reason}")]
    InvalidAnnotation { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, DiffexError>;
