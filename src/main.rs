use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use indicatif_log_bridge::LogWrapper;
use loopagg::apa::{run_apa, ApaConfig};
use loopagg::core::contacts::NormalizationType;
use loopagg::core::utils::multi_progress;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Aggregate peak analysis of chromatin contact maps
#[derive(Parser, Debug)]
#[command(author, version, about = "Aggregate peak analysis of chromatin contact maps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Aggregate contacts around the loops of one or more loop lists
    Apa(ApaArgs),
    /// Aggregate contacts around every distinct loop anchor on the diagonal
    AnchorApa(ApaArgs),
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[derive(Args, Debug, Clone)]
pub struct SharedOptions {
    /// Number of threads to use for parallel processing
    #[arg(short = 't', long = "threads", default_value_t = default_threads())]
    pub threads: usize,

    /// Comma separated list of chromosomes to exclude
    #[arg(short = 'x', long = "exclude", value_delimiter = ',', num_args = 1.., conflicts_with = "exclude_file")]
    pub exclude: Option<Vec<String>>,

    /// Path to file with chromosomes to exclude, one per line
    #[arg(long = "exclude-file")]
    pub exclude_file: Option<PathBuf>,

    /// Comma separated list of chromosomes to include (restrict analysis to)
    #[arg(short = 'i', long = "include", value_delimiter = ',', num_args = 1.., conflicts_with = "include_file")]
    pub include: Option<Vec<String>>,

    /// Path to file with chromosomes to include, one per line
    #[arg(long = "include-file")]
    pub include_file: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

fn read_name_file(path: &Path) -> Result<HashSet<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chromosome list: {}", path.display()))?;
    Ok(content
        .lines()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl SharedOptions {
    /// Initialize thread pool
    pub fn initialize_threading(&self) -> Result<()> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build_global()?;
        Ok(())
    }

    /// Get excluded chromosomes as a HashSet
    pub fn get_excluded_chromosomes(&self) -> Result<Option<HashSet<String>>> {
        if let Some(ref exclude_list) = self.exclude {
            return Ok(Some(exclude_list.iter().cloned().collect()));
        }
        self.exclude_file.as_deref().map(read_name_file).transpose()
    }

    /// Get included chromosomes as a HashSet
    pub fn get_included_chromosomes(&self) -> Result<Option<HashSet<String>>> {
        if let Some(ref include_list) = self.include {
            return Ok(Some(include_list.iter().cloned().collect()));
        }
        self.include_file.as_deref().map(read_name_file).transpose()
    }
}

#[derive(Args, Debug)]
pub struct ApaArgs {
    /// Contact list, tab separated: chrom1 pos1 chrom2 pos2 [count]
    #[arg(required = true)]
    pub contacts: PathBuf,

    /// Loop lists in BEDPE format, aggregated together in one pass
    #[arg(required = true, num_args = 1..)]
    pub loops: Vec<PathBuf>,

    /// Chromosome sizes, tab separated: name length
    #[arg(short = 'g', long = "chrom-sizes", required = true)]
    pub chrom_sizes: PathBuf,

    /// Output directory
    #[arg(short = 'o', long = "outdir", required = true)]
    pub outdir: Utf8PathBuf,

    /// Comma separated resolutions in base pairs
    #[arg(short = 'r', long = "resolutions", value_delimiter = ',', default_value = "25000,10000,5000")]
    pub resolutions: Vec<u32>,

    /// Half-width of the aggregate window in bins
    #[arg(short = 'w', long = "window", default_value_t = 10)]
    pub window: u32,

    /// Normalization applied to contacts: NONE, VC, VC_SQRT, KR or SCALE
    #[arg(short = 'k', long = "norm", default_value = "NONE")]
    pub norm: NormalizationType,

    /// Correct the aggregate by the summed normalization vectors instead of normalizing each contact
    #[arg(long = "aggregate-norm")]
    pub aggregate_norm: bool,

    /// Include inter-chromosomal loops
    #[arg(long = "inter")]
    pub inter: bool,

    /// Minimum distance of a loop from the diagonal, in bins
    #[arg(short = 'n', long = "min-dist", default_value_t = 30)]
    pub min_distance: u64,

    /// Maximum distance of a loop from the diagonal, in bins
    #[arg(short = 'm', long = "max-dist")]
    pub max_distance: Option<u64>,

    /// Width of the corner squares used for the enrichment measures
    #[arg(short = 'c', long = "corner-width", default_value_t = 6)]
    pub corner_width: usize,

    /// Shared options
    #[command(flatten)]
    pub shared: SharedOptions,
}

impl ApaArgs {
    pub fn run(self, anchors: bool) -> Result<()> {
        self.shared.initialize_threading()?;
        let include = self.shared.get_included_chromosomes()?;
        let exclude = self.shared.get_excluded_chromosomes()?;

        let config = ApaConfig {
            contacts: self.contacts,
            chrom_sizes: self.chrom_sizes,
            loop_lists: self.loops,
            outdir: self.outdir,
            resolutions: self.resolutions,
            window: self.window,
            normalization: self.norm,
            aggregate_normalization: self.aggregate_norm,
            include_inter: self.inter,
            min_peak_distance: self.min_distance,
            max_peak_distance: self.max_distance,
            corner_width: self.corner_width,
            anchors,
            include,
            exclude,
            threads: self.shared.threads,
            show_progress: !self.shared.quiet,
        };

        let results = run_apa(config)?;
        log::info!("Wrote results for {} resolution(s)", results.len());
        Ok(())
    }
}

fn init_logging() -> Result<()> {
    use env_logger::Env;

    let logger = env_logger::Builder::from_env(Env::default().default_filter_or("info")).build();
    let level = logger.filter();
    LogWrapper::new(multi_progress().clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

// Main entry point
pub fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Apa(args) => args.run(false),
        Commands::AnchorApa(args) => args.run(true),
    }
}
