pub mod accumulator;
pub mod engine;
pub mod normalize;
pub mod output;
pub mod region_index;
pub mod scheduler;
pub mod stats;

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use fnv::FnvHashSet;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::core::chromosome::read_chrom_sizes;
use crate::core::contacts::NormalizationType;
use crate::core::loops::{read_bedpe, LoopFilter, LoopList};
use crate::core::source::{read_contacts, ContactSource, MirroredSource};
use crate::core::utils::create_spinner;

pub use engine::{AggregateEngine, AggregateResult, EngineConfig, RunSummary};

#[derive(Debug, Clone)]
pub struct ApaConfig {
    pub contacts: PathBuf,
    pub chrom_sizes: PathBuf,
    pub loop_lists: Vec<PathBuf>,
    pub outdir: Utf8PathBuf,
    pub resolutions: Vec<u32>,
    pub window: u32,
    pub normalization: NormalizationType,
    pub aggregate_normalization: bool,
    pub include_inter: bool,
    pub min_peak_distance: u64,
    pub max_peak_distance: Option<u64>,
    pub corner_width: usize,
    /// Aggregate around each distinct anchor instead of each loop
    pub anchors: bool,
    pub include: Option<HashSet<String>>,
    pub exclude: Option<HashSet<String>>,
    pub threads: usize,
    pub show_progress: bool,
}

impl ApaConfig {
    fn engine_config(&self, resolution: u32) -> EngineConfig {
        EngineConfig {
            resolution,
            window: self.window,
            include_inter: self.include_inter,
            normalization: self.normalization,
            aggregate_normalization: self.aggregate_normalization,
            threads: self.threads,
            show_progress: self.show_progress,
        }
    }

    fn loop_filter(&self) -> LoopFilter {
        LoopFilter {
            min_peak_distance: self.min_peak_distance,
            max_peak_distance: self.max_peak_distance,
            include_inter: self.include_inter,
        }
    }
}

/// Name each list after its file stem, suffixed when two files share a stem
fn list_names(paths: &[PathBuf]) -> Vec<String> {
    let mut seen = FnvHashSet::default();
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("list{}", i));
            let mut name = stem.clone();
            let mut suffix = i;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", stem, suffix);
                suffix += 1;
            }
            name
        })
        .collect()
}

/// Load everything, aggregate every list at every resolution and write the results
pub fn run_apa(config: ApaConfig) -> Result<Vec<AggregateResult>> {
    if config.loop_lists.is_empty() {
        bail!("At least one loop list is required");
    }
    if config.resolutions.is_empty() {
        bail!("At least one resolution is required");
    }
    // fail on bad parameters before loading any data
    for &resolution in &config.resolutions {
        config.engine_config(resolution).validate()?;
    }

    let chromosomes = read_chrom_sizes(&config.chrom_sizes)?
        .filter(config.include.as_ref(), config.exclude.as_ref())?;
    info!("Using {} chromosomes", chromosomes.len());

    let spinner = if config.show_progress {
        create_spinner("Loading contacts")
    } else {
        ProgressBar::hidden()
    };
    let mut source = read_contacts(&config.contacts, &chromosomes, &config.resolutions)?;
    if matches!(
        config.normalization,
        NormalizationType::Vc | NormalizationType::VcSqrt
    ) {
        spinner.set_message("Computing coverage normalization");
        for &resolution in &config.resolutions {
            source = source.with_coverage_normalization(&chromosomes, resolution);
        }
    } else if !config.normalization.is_none() {
        warn!(
            "{} vectors cannot be derived from a contact list, every pair will be skipped as missing data",
            config.normalization
        );
    }
    spinner.finish_and_clear();

    let names = list_names(&config.loop_lists);
    let mut lists = Vec::with_capacity(config.loop_lists.len());
    for (path, name) in config.loop_lists.iter().zip(names) {
        let loops = read_bedpe(path)
            .with_context(|| format!("Failed to load loop list {}", path.display()))?;
        lists.push(LoopList::new(name, loops, &chromosomes));
    }

    // anchor windows sit on the diagonal and need both triangles
    let mirrored = MirroredSource::new(&source);
    let source: &dyn ContactSource = if config.anchors { &mirrored } else { &source };

    let filter = config.loop_filter();
    let mut results = Vec::with_capacity(config.resolutions.len());
    for &resolution in &config.resolutions {
        let lists: Vec<LoopList> = lists
            .iter()
            .map(|list| {
                let filtered = list.filtered(&filter, resolution);
                if config.anchors {
                    filtered.anchor_windows()
                } else {
                    filtered
                }
            })
            .collect();
        for list in &lists {
            info!("{} at {} bp: {} loops", list.name(), resolution, list.len());
        }

        let engine = AggregateEngine::new(
            config.engine_config(resolution),
            source,
            &chromosomes,
            &lists,
        )
        .with_context(|| format!("Cannot aggregate at {} bp", resolution))?;
        let result = engine.run();
        output::write_result(&config.outdir, &result, config.corner_width)?;
        results.push(result);
    }

    output::write_summary(&config.outdir, &results)?;
    Ok(results)
}
