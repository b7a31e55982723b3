//! Command-line interface for diffex

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "diffex")]
#[command(version)]
#[command(about = "Differential expression analysis for RNA-seq count data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the example dataset into a local cache
    #[command(
        about = "Download the example dataset into a local cache",
        long_about = "Download the example dataset into a local cache\n\n\
            Fetches the count matrix, sample sheet, and gene annotation table.\n\
            Files already present in the cache directory are not downloaded again."
    )]
    Fetch {
        /// Cache directory for the downloaded files
        #[arg(short, long, default_value = "data")]
        out_dir: String,

        /// Override the count matrix URL
        #[arg(long)]
        counts_url: Option<String>,

        /// Override the sample sheet URL
        #[arg(long)]
        samples_url: Option<String>,

        /// Override the annotation table URL
        #[arg(long)]
        annotation_url: Option<String>,

        /// Re-download files even when cached
        #[arg(long)]
        force: bool,
    },

    /// Run the full differential expression analysis
    #[command(
        about = "Run the full differential expression analysis",
        long_about = "Run the full differential expression analysis\n\n\
            Estimates size factors and dispersions, fits the negative binomial\n\
            model, performs the Wald test with Benjamini-Hochberg correction,\n\
            optionally shrinks fold changes and joins gene annotations.",
        after_long_help = "\
Examples:
  diffex run -c counts.tsv.gz -m samples.tsv -d treatment \\
    --numerator DPN --denominator Control -o results.tsv

  diffex run -c counts.tsv.gz -m samples.tsv -d treatment --covariate patient \\
    --numerator DPN --denominator Control --shrink --annotation annotation.tsv"
    )]
    Run {
        /// Count matrix (gene ids in the first column, sample ids in the header)
        #[arg(short, long)]
        counts: String,

        /// Sample sheet (sample ids in the first column, one factor per column)
        #[arg(short = 'm', long)]
        samples: String,

        /// Factor of interest
        #[arg(short = 'd', long)]
        factor: String,

        /// Additional adjustment factor, may repeat (e.g. --covariate patient)
        #[arg(long, value_name = "FACTOR")]
        covariate: Vec<String>,

        /// Reference level override, format factor=level, may repeat
        #[arg(long, value_name = "FACTOR=LEVEL")]
        reference: Vec<String>,

        /// Numerator level of the contrast
        #[arg(long)]
        numerator: String,

        /// Denominator (baseline) level of the contrast
        #[arg(long)]
        denominator: String,

        /// Output results table
        #[arg(short, long, default_value = "diffex_results.tsv")]
        output: String,

        /// Significance threshold for the summary
        #[arg(long, default_value_t = 0.05)]
        alpha: f64,

        /// Shrink log2 fold changes with a normal prior
        #[arg(long)]
        shrink: bool,

        /// Annotation table to join onto the results (gene id, symbol, description)
        #[arg(long)]
        annotation: Option<String>,

        /// How many top genes to print
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Worker threads (0 = all cores)
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },

    /// Estimate size factors and write depth-normalized counts
    Normalize {
        /// Count matrix
        #[arg(short, long)]
        counts: String,

        /// Output matrix
        #[arg(short, long, default_value = "normalized_counts.tsv")]
        output: String,

        /// Estimator: ratio (median of ratios) or poscounts
        #[arg(long, default_value = "ratio")]
        method: String,
    },

    /// Apply a variance-stabilizing transformation
    Transform {
        /// Count matrix
        #[arg(short, long)]
        counts: String,

        /// Sample sheet
        #[arg(short = 'm', long)]
        samples: String,

        /// Transform: rlog or vst
        #[arg(long, default_value = "rlog")]
        method: String,

        /// Design factor informing the dispersions (omit for blind)
        #[arg(short = 'd', long)]
        factor: Option<String>,

        /// Ignore the design when estimating dispersions
        #[arg(long)]
        blind: bool,

        /// Output matrix
        #[arg(short, long, default_value = "transformed.tsv")]
        output: String,
    },

    /// Transform, then report PCA, sample distances, and clustering
    Explore {
        /// Count matrix
        #[arg(short, long)]
        counts: String,

        /// Sample sheet
        #[arg(short = 'm', long)]
        samples: String,

        /// Transform backing the exploration: rlog or vst
        #[arg(long, default_value = "rlog")]
        method: String,

        /// Number of most-variable genes entering the PCA
        #[arg(long, default_value_t = 500)]
        top_genes: usize,

        /// Number of principal components to report
        #[arg(long, default_value_t = 2)]
        components: usize,

        /// Directory for the coordinate and distance tables
        #[arg(short, long, default_value = "explore")]
        out_dir: String,
    },
}
