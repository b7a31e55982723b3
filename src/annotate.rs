//! Gene annotation lookups
//!
//! Results carry stable gene identifiers (e.g. Ensembl accessions) that
//! are useless to read. The annotation table maps each identifier to a
//! symbol and a description; joining it onto a results table fills the
//! optional annotation columns. Identifiers without an entry stay blank.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{DiffexError, Result};
use crate::io::DeTable;

/// Symbol and description for one gene.
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotation {
    pub symbol: String,
    pub description: String,
}

/// Gene id to annotation map.
#[derive(Debug, Clone, Default)]
pub struct AnnotationTable {
    entries: HashMap<String, GeneAnnotation>,
}

impl AnnotationTable {
    /// Read a delimited table with columns gene id, symbol, description.
    /// The delimiter is sniffed from the header; later duplicates of a
    /// gene id are ignored with a warning.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let delimiter = if contents.lines().next().map_or(false, |l| l.contains('\t')) {
            b'\t'
        } else {
            b','
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(contents.as_bytes());

        let mut entries = HashMap::new();
        let mut duplicates = 0_usize;
        for record in reader.records() {
            let record = record?;
            let gene_id = record
                .get(0)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| DiffexError::InvalidAnnotation {
                    reason: "row with empty gene id".to_string(),
                })?
                .to_string();
            let annotation = GeneAnnotation {
                symbol: record.get(1).map(str::trim).unwrap_or("").to_string(),
                description: record.get(2).map(str::trim).unwrap_or("").to_string(),
            };
            if entries.insert(gene_id, annotation).is_some() {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            log::warn!(
                "annotation table has {} duplicated gene ids; last entry wins",
                duplicates
            );
        }
        if entries.is_empty() {
            return Err(DiffexError::InvalidAnnotation {
                reason: "annotation table has no rows".to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&GeneAnnotation> {
        self.entries.get(gene_id)
    }

    /// Fill the annotation columns of a results table in place.
    pub fn annotate(&self, table: &mut DeTable) {
        let mut symbols = Vec::with_capacity(table.n_genes());
        let mut descriptions = Vec::with_capacity(table.n_genes());
        let mut missing = 0_usize;
        for id in &table.gene_ids {
            match self.entries.get(id) {
                Some(a) => {
                    symbols.push(a.symbol.clone());
                    descriptions.push(a.description.clone());
                }
                None => {
                    missing += 1;
                    symbols.push(String::new());
                    descriptions.push(String::new());
                }
            }
        }
        if missing > 0 {
            log::info!("{} of {} genes had no annotation entry", missing, table.n_genes());
        }
        table.symbol = Some(symbols);
        table.description = Some(descriptions);
    }
}
