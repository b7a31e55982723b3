//! Tabular readers and writers
//!
//! Count matrices and sample sheets arrive as delimited text, sometimes
//! gzip-compressed. The delimiter (tab or comma) is sniffed from the
//! header line. Count tables put gene ids in the first column and sample
//! ids in the header; sample sheets put sample ids in the first column
//! and one covariate per remaining column.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use ndarray::Array2;

use super::results::DeTable;
use crate::dataset::{CountTable, SampleSheet};
use crate::error::{DiffexError, Result};

/// Read a whole file into memory, transparently gunzipping `.gz` paths.
fn slurp(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut contents = String::new();
    if path.extension().map_or(false, |e| e == "gz") {
        MultiGzDecoder::new(file).read_to_string(&mut contents)?;
    } else {
        let mut file = file;
        file.read_to_string(&mut contents)?;
    }
    Ok(contents)
}

fn sniff_delimiter(contents: &str) -> u8 {
    match contents.lines().next() {
        Some(line) if line.contains('\t') => b'\t',
        _ => b',',
    }
}

fn records(contents: &str) -> Result<Vec<csv::StringRecord>> {
    let delimiter = sniff_delimiter(contents);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(false)
        .from_reader(contents.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?);
    }
    Ok(rows)
}

/// Read a count table. Header: gene id column then sample ids; each row a
/// gene with one count per sample.
pub fn read_counts<P: AsRef<Path>>(path: P) -> Result<CountTable> {
    let rows = records(&slurp(path.as_ref())?)?;
    let mut iter = rows.into_iter();
    let header = iter.next().ok_or_else(|| DiffexError::EmptyData {
        reason: "count table has no header".to_string(),
    })?;
    if header.len() < 2 {
        return Err(DiffexError::InvalidCounts {
            reason: "count table header needs a gene id column and at least one sample"
                .to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(|s| s.trim().to_string()).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for row in iter {
        gene_ids.push(row.get(0).unwrap_or("").trim().to_string());
        for j in 0..n_samples {
            let field = row.get(j + 1).ok_or_else(|| DiffexError::InvalidCounts {
                reason: format!("row '{}' is missing sample columns", gene_ids.last().map(|s| s.as_str()).unwrap_or("")),
            })?;
            let value: f64 = field.trim().parse().map_err(|_| DiffexError::InvalidCounts {
                reason: format!("count value '{}' is not numeric", field),
            })?;
            values.push(value);
        }
    }
    if gene_ids.is_empty() {
        return Err(DiffexError::EmptyData {
            reason: "count table has no gene rows".to_string(),
        });
    }

    let n_genes = gene_ids.len();
    let counts = Array2::from_shape_vec((n_genes, n_samples), values).map_err(|e| {
        DiffexError::InvalidCounts {
            reason: format!("count table is not rectangular: {}", e),
        }
    })?;
    CountTable::new(counts, gene_ids, sample_ids)
}

/// Read a sample sheet. Header: sample id column then factor names; each
/// row a sample.
pub fn read_samples<P: AsRef<Path>>(path: P) -> Result<SampleSheet> {
    let rows = records(&slurp(path.as_ref())?)?;
    let mut iter = rows.into_iter();
    let header = iter.next().ok_or_else(|| DiffexError::EmptyData {
        reason: "sample sheet has no header".to_string(),
    })?;
    let factor_names: Vec<String> = header.iter().skip(1).map(|s| s.trim().to_string()).collect();

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); factor_names.len()];
    for row in iter {
        if row.len() != factor_names.len() + 1 {
            return Err(DiffexError::InvalidSamples {
                reason: format!(
                    "row has {} columns, expected {}",
                    row.len(),
                    factor_names.len() + 1
                ),
            });
        }
        sample_ids.push(row.get(0).unwrap_or("").trim().to_string());
        for (j, column) in columns.iter_mut().enumerate() {
            column.push(row.get(j + 1).unwrap_or("").trim().to_string());
        }
    }
    if sample_ids.is_empty() {
        return Err(DiffexError::EmptyData {
            reason: "sample sheet has no rows".to_string(),
        });
    }

    let mut sheet = SampleSheet::new(sample_ids);
    for (name, values) in factor_names.iter().zip(columns.into_iter()) {
        sheet.add_factor(name, values)?;
    }
    Ok(sheet)
}

fn fmt_value(x: f64) -> String {
    if x.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6}", x)
    }
}

fn fmt_pvalue(x: f64) -> String {
    if x.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6e}", x)
    }
}

/// Write a results table, tab-delimited, NA for untested genes.
pub fn write_de_table<P: AsRef<Path>>(path: P, table: &DeTable) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;

    let annotated = table.symbol.is_some();
    let mut header = vec![
        "gene_id",
        "baseMean",
        "log2FoldChange",
        "lfcSE",
        "stat",
        "pvalue",
        "padj",
    ];
    if annotated {
        header.push("symbol");
        header.push("description");
    }
    writer.write_record(&header)?;

    for i in 0..table.n_genes() {
        let mut row = vec![
            table.gene_ids[i].clone(),
            fmt_value(table.base_mean[i]),
            fmt_value(table.log2_fold_change[i]),
            fmt_value(table.lfc_se[i]),
            fmt_value(table.stat[i]),
            fmt_pvalue(table.pvalue[i]),
            fmt_pvalue(table.padj[i]),
        ];
        if annotated {
            row.push(
                table
                    .symbol
                    .as_ref()
                    .and_then(|s| s.get(i).cloned())
                    .unwrap_or_default(),
            );
            row.push(
                table
                    .description
                    .as_ref()
                    .and_then(|d| d.get(i).cloned())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a genes-by-samples matrix with a gene id column.
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    gene_ids: &[String],
    sample_ids: &[String],
    values: ndarray::ArrayView2<'_, f64>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;

    let mut header = vec!["gene_id".to_string()];
    header.extend(sample_ids.iter().cloned());
    writer.write_record(&header)?;

    for (i, gene_id) in gene_ids.iter().enumerate() {
        let mut row = vec![gene_id.clone()];
        for j in 0..values.ncols() {
            row.push(fmt_value(values[[i, j]]));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_tab_delimited_counts() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id\ts1\ts2\ts3").unwrap();
        writeln!(f, "g1\t100\t200\t150").unwrap();
        writeln!(f, "g2\t50\t75\t60").unwrap();
        let t = read_counts(f.path()).unwrap();
        assert_eq!(t.n_genes(), 2);
        assert_eq!(t.n_samples(), 3);
        assert_eq!(t.counts()[[1, 2]], 60.0);
    }

    #[test]
    fn reads_comma_delimited_counts() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id,s1,s2").unwrap();
        writeln!(f, "g1,1,2").unwrap();
        let t = read_counts(f.path()).unwrap();
        assert_eq!(t.sample_ids(), &["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn reads_gzipped_counts() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.tsv.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"gene_id\ts1\ts2\ng1\t3\t4\n").unwrap();
        enc.finish().unwrap();

        let t = read_counts(&path).unwrap();
        assert_eq!(t.counts()[[0, 1]], 4.0);
    }

    #[test]
    fn rejects_non_numeric_counts() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "gene_id\ts1").unwrap();
        writeln!(f, "g1\tmany").unwrap();
        assert!(read_counts(f.path()).is_err());
    }

    #[test]
    fn reads_sample_sheet() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "sample_id\ttreatment\ttime").unwrap();
        writeln!(f, "s1\tControl\t24h").unwrap();
        writeln!(f, "s2\tDPN\t48h").unwrap();
        let sheet = read_samples(f.path()).unwrap();
        assert_eq!(sheet.n_samples(), 2);
        assert_eq!(sheet.factor("time").unwrap()[1], "48h");
    }

    #[test]
    fn writes_results_with_na() {
        use crate::io::results::{Contrast, DeTable};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.tsv");
        let mut table = DeTable::new(
            Contrast::new("treatment", "DPN", "Control"),
            vec!["g1".into(), "g2".into()],
        );
        table.base_mean = vec![10.0, 0.0];
        table.log2_fold_change = vec![1.5, 0.0];
        table.lfc_se = vec![0.3, 0.0];
        table.stat = vec![5.0, f64::NAN];
        table.pvalue = vec![1e-6, f64::NAN];
        table.padj = vec![2e-6, f64::NAN];
        write_de_table(&path, &table).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("gene_id\tbaseMean"));
        assert!(text.contains("NA"));
        assert!(text.contains("g1"));
    }
}
