//! diffex command-line entry point

use std::fs::File;
use std::io::Write;
use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use diffex::cli::{Cli, Commands};
use diffex::dataset::CountTable;
use diffex::prelude::*;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Fetch {
            out_dir,
            counts_url,
            samples_url,
            annotation_url,
            force,
        } => run_fetch(&out_dir, counts_url, samples_url, annotation_url, force),
        Commands::Run {
            counts,
            samples,
            factor,
            covariate,
            reference,
            numerator,
            denominator,
            output,
            alpha,
            shrink,
            annotation,
            top,
            threads,
        } => run_analysis(
            &counts,
            &samples,
            &factor,
            &covariate,
            &reference,
            &numerator,
            &denominator,
            &output,
            alpha,
            shrink,
            annotation.as_deref(),
            top,
            threads,
        ),
        Commands::Normalize {
            counts,
            output,
            method,
        } => run_normalize(&counts, &output, &method),
        Commands::Transform {
            counts,
            samples,
            method,
            factor,
            blind,
            output,
        } => run_transform(&counts, &samples, &method, factor.as_deref(), blind, &output),
        Commands::Explore {
            counts,
            samples,
            method,
            top_genes,
            components,
            out_dir,
        } => run_explore(&counts, &samples, &method, top_genes, components, &out_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------

/// Reorder the sample sheet to the count table's column order, erroring
/// when the two disagree on the sample set.
fn align_samples(counts: &CountTable, sheet: SampleSheet) -> Result<SampleSheet> {
    if counts.sample_ids() == sheet.sample_ids() {
        return Ok(sheet);
    }
    let order: Option<Vec<usize>> = counts
        .sample_ids()
        .iter()
        .map(|id| sheet.sample_ids().iter().position(|s| s == id))
        .collect();
    match order {
        Some(order) if order.len() == sheet.sample_ids().len() => {
            info!("reordering sample sheet to match the count table");
            sheet.select_samples(&order)
        }
        _ => Err(DiffexError::InvalidSamples {
            reason: "sample ids of counts and sample sheet do not match".to_string(),
        }),
    }
}

fn parse_transform(method: &str) -> Result<TransformKind> {
    match method {
        "rlog" => Ok(TransformKind::Rlog),
        "vst" => Ok(TransformKind::Vst),
        other => Err(DiffexError::InvalidInput {
            reason: format!("unknown transform '{}'; use rlog or vst", other),
        }),
    }
}

fn load_experiment(
    counts_path: &str,
    samples_path: &str,
    design: &[String],
) -> Result<Experiment> {
    info!("loading count table from {}", counts_path);
    let counts = read_counts(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    info!("loading sample sheet from {}", samples_path);
    let sheet = align_samples(&counts, read_samples(samples_path)?)?;

    Experiment::with_design(counts, sheet, design)
}

// ---------------------------------------------------------------------
// fetch
// ---------------------------------------------------------------------

fn run_fetch(
    out_dir: &str,
    counts_url: Option<String>,
    samples_url: Option<String>,
    annotation_url: Option<String>,
    force: bool,
) -> Result<()> {
    let mut plan = FetchPlan::new(out_dir);
    if let Some(url) = counts_url {
        plan.counts_url = url;
    }
    if let Some(url) = samples_url {
        plan.samples_url = url;
    }
    if let Some(url) = annotation_url {
        plan.annotation_url = url;
    }
    plan.force = force;

    let dataset = fetch_dataset(&plan)?;
    println!("counts:     {}", dataset.counts.display());
    println!("samples:    {}", dataset.samples.display());
    println!("annotation: {}", dataset.annotation.display());
    Ok(())
}

// ---------------------------------------------------------------------
// run
// ---------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn run_analysis(
    counts_path: &str,
    samples_path: &str,
    factor: &str,
    covariates: &[String],
    references: &[String],
    numerator: &str,
    denominator: &str,
    output: &str,
    alpha: f64,
    shrink: bool,
    annotation_path: Option<&str>,
    top: usize,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let mut design: Vec<String> = covariates.to_vec();
    design.push(factor.to_string());

    info!("loading count table from {}", counts_path);
    let counts = read_counts(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    info!("loading sample sheet from {}", samples_path);
    let mut sheet = align_samples(&counts, read_samples(samples_path)?)?;
    for entry in references {
        let (ref_factor, level) = entry.split_once('=').ok_or_else(|| DiffexError::InvalidInput {
            reason: format!("invalid reference '{}'; use factor=level", entry),
        })?;
        sheet.relevel(ref_factor, level)?;
    }

    let mut exp = Experiment::with_design(counts, sheet, &design)?;
    info!("design: ~ {}", design.join(" + "));

    info!("estimating size factors");
    estimate_size_factors(&mut exp, DepthNormalization::MedianRatios)?;

    info!("estimating dispersions");
    estimate_dispersions(&mut exp, &DispersionOptions::default())?;

    info!("fitting gene models");
    let layout = fit_all_genes(&mut exp, &FitOptions::default())?;

    info!("testing {} vs {}", numerator, denominator);
    let contrast = Contrast::new(factor, numerator, denominator);
    let mut results = wald_test(&exp, &layout, contrast)?;

    if shrink {
        info!("shrinking log2 fold changes");
        shrink_log_fold_changes(&exp, &layout, &mut results)?;
    }

    if let Some(path) = annotation_path {
        info!("joining annotations from {}", path);
        let annotations = AnnotationTable::from_path(path)?;
        annotations.annotate(&mut results);
    }

    info!("writing results to {}", output);
    write_de_table(output, &results)?;

    println!("\n{}", results.summary(alpha));
    print_top_genes(&results, top);
    Ok(())
}

fn print_top_genes(results: &DeTable, n: usize) {
    if n == 0 {
        return;
    }
    println!("Top genes by p-value:");
    println!(
        "{:<20} {:>12} {:>10} {:>12} {:>12}  {}",
        "gene", "baseMean", "log2FC", "pvalue", "padj", "symbol"
    );
    for i in results.top(n) {
        let symbol = results
            .symbol
            .as_ref()
            .and_then(|s| s.get(i).map(|x| x.as_str()))
            .unwrap_or("");
        println!(
            "{:<20} {:>12.2} {:>10.3} {:>12.3e} {:>12.3e}  {}",
            results.gene_ids[i],
            results.base_mean[i],
            results.log2_fold_change[i],
            results.pvalue[i],
            results.padj[i],
            symbol
        );
    }
}

// ---------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------

fn run_normalize(counts_path: &str, output: &str, method: &str) -> Result<()> {
    info!("loading count table from {}", counts_path);
    let counts = read_counts(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    let method = match method {
        "ratio" => DepthNormalization::MedianRatios,
        "poscounts" => DepthNormalization::PositiveCounts,
        other => {
            return Err(DiffexError::InvalidInput {
                reason: format!("unknown normalization method '{}'", other),
            })
        }
    };

    let sheet = SampleSheet::new(counts.sample_ids().to_vec());
    let mut exp = Experiment::with_design(counts, sheet, &[])?;
    estimate_size_factors(&mut exp, method)?;

    let sf = exp.size_factors().ok_or_else(|| DiffexError::EmptyData {
        reason: "size factors missing after estimation".to_string(),
    })?;
    for (id, factor) in exp.counts().sample_ids().iter().zip(sf.iter()) {
        println!("{}\t{:.4}", id, factor);
    }

    let normalized = exp.normalized_counts().ok_or_else(|| DiffexError::EmptyData {
        reason: "normalized counts missing after estimation".to_string(),
    })?;
    info!("writing normalized counts to {}", output);
    write_matrix(
        output,
        exp.counts().gene_ids(),
        exp.counts().sample_ids(),
        normalized.view(),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------
// transform
// ---------------------------------------------------------------------

fn run_transform(
    counts_path: &str,
    samples_path: &str,
    method: &str,
    factor: Option<&str>,
    blind: bool,
    output: &str,
) -> Result<()> {
    let kind = parse_transform(method)?;
    let blind = blind || factor.is_none();
    let design: Vec<String> = factor.map(|f| vec![f.to_string()]).unwrap_or_default();

    let mut exp = load_experiment(counts_path, samples_path, &design)?;
    estimate_size_factors(&mut exp, DepthNormalization::MedianRatios)?;
    if !blind {
        estimate_dispersions(&mut exp, &DispersionOptions::default())?;
    }

    info!("applying {} transform (blind: {})", kind, blind);
    let transformed = transform_counts(&exp, kind, blind)?;

    info!("writing transformed matrix to {}", output);
    write_matrix(
        output,
        &transformed.gene_ids,
        &transformed.sample_ids,
        transformed.data.view(),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------
// explore
// ---------------------------------------------------------------------

fn run_explore(
    counts_path: &str,
    samples_path: &str,
    method: &str,
    top_genes: usize,
    components: usize,
    out_dir: &str,
) -> Result<()> {
    let kind = parse_transform(method)?;
    let mut exp = load_experiment(counts_path, samples_path, &[])?;
    estimate_size_factors(&mut exp, DepthNormalization::MedianRatios)?;

    info!("applying blind {} transform", kind);
    let transformed = transform_counts(&exp, kind, true)?;

    std::fs::create_dir_all(out_dir)?;
    let out = Path::new(out_dir);

    // PCA over the most variable genes
    let pca = principal_components(
        transformed.data.view(),
        &transformed.sample_ids,
        top_genes,
        components,
    )?;
    println!(
        "PCA over the {} most variable genes:",
        pca.genes_used
    );
    for (c, fraction) in pca.variance_fraction.iter().enumerate() {
        println!("  PC{}: {:.1}% of variance", c + 1, 100.0 * fraction);
    }
    let pca_path = out.join("pca.tsv");
    write_pca(&pca_path, &pca)?;
    info!("wrote {}", pca_path.display());

    // Sample distance matrix
    let distances = sample_distances(transformed.data.view());
    let dist_path = out.join("sample_distances.tsv");
    write_distances(&dist_path, &transformed.sample_ids, &distances)?;
    info!("wrote {}", dist_path.display());

    // Hierarchical clustering
    let tree = average_linkage(distances.view(), &transformed.sample_ids)?;
    println!("\nSample clustering (average linkage):");
    for step in &tree.merges {
        println!(
            "  {} + {} at distance {:.3}",
            step.left, step.right, step.height
        );
    }
    let tree_path = out.join("clustering.newick");
    std::fs::write(&tree_path, format!("{}\n", tree.newick))?;
    info!("wrote {}", tree_path.display());

    Ok(())
}

fn write_pca(path: &Path, pca: &diffex::explore::PcaResult) -> Result<()> {
    let mut file = File::create(path)?;
    let header: Vec<String> = (0..pca.scores.ncols())
        .map(|c| format!("PC{}", c + 1))
        .collect();
    writeln!(file, "sample_id\t{}", header.join("\t"))?;
    for (s, id) in pca.sample_ids.iter().enumerate() {
        let row: Vec<String> = (0..pca.scores.ncols())
            .map(|c| format!("{:.6}", pca.scores[[s, c]]))
            .collect();
        writeln!(file, "{}\t{}", id, row.join("\t"))?;
    }
    Ok(())
}

fn write_distances(
    path: &Path,
    sample_ids: &[String],
    distances: &ndarray::Array2<f64>,
) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "sample_id\t{}", sample_ids.join("\t"))?;
    for (a, id) in sample_ids.iter().enumerate() {
        let row: Vec<String> = (0..distances.ncols())
            .map(|b| format!("{:.6}", distances[[a, b]]))
            .collect();
        writeln!(file, "{}\t{}", id, row.join("\t"))?;
    }
    Ok(())
}
