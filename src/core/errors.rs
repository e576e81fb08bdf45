use thiserror::Error;

/// Problems with the run as a whole. Checked once before any work is scheduled.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Resolution must be a positive number of base pairs")]
    ZeroResolution,

    #[error("Thread count must be at least 1")]
    ZeroThreads,

    #[error("Window half-width {0} is too large, the aggregate matrix would not fit in memory")]
    WindowTooLarge(u32),

    #[error("No loop lists were supplied")]
    NoLoopLists,

    #[error("No loops to aggregate across {0} loop list(s)")]
    NoLoops(usize),

    #[error("Aggregate normalization requires a normalization type other than NONE")]
    AggregateNormalizationWithoutVector,

    #[error("No chromosomes to process")]
    NoChromosomes,
}

/// Failure while indexing or accumulating a single chromosome pair.
/// The pair's contribution is dropped and the run continues.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Malformed loop {chrom1}:{start1}-{end1} {chrom2}:{start2}-{end2}: {reason}")]
    MalformedLoop {
        chrom1: String,
        start1: u64,
        end1: u64,
        chrom2: String,
        start2: u64,
        end2: u64,
        reason: &'static str,
    },

    #[error("Failed to read contacts for {pair}: {cause:#}")]
    Source { pair: String, cause: anyhow::Error },
}

/// Why a chromosome pair contributed nothing. Expected for sparse data, never a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingData {
    /// The source has no matrix (or no view at the requested resolution) for this pair
    NoMatrix,
    /// The normalization vector for a chromosome is unavailable
    NoNormalizationVector(String),
}

impl std::fmt::Display for MissingData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatrix => write!(f, "no contact matrix"),
            Self::NoNormalizationVector(chrom) => {
                write!(f, "no normalization vector for {}", chrom)
            }
        }
    }
}
