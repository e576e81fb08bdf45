use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use indicatif::ProgressBar;
use log::{debug, error, info, trace};

use super::accumulator::{AggregateAccumulator, ListResult};
use super::region_index::{RegionIndex, Window};
use super::scheduler::ChromosomePairScheduler;
use crate::core::chromosome::{ChromosomePair, ChromosomeSet};
use crate::core::contacts::{NormalizationType, NormalizationVector, Zoom};
use crate::core::errors::{ConfigError, MissingData, ProcessingError};
use crate::core::loops::LoopList;
use crate::core::source::ContactSource;
use crate::core::utils::create_progress_bar;

/// Largest accepted half-width. A 4001×4001 matrix per list is already 128 MB.
pub const MAX_WINDOW: u32 = 2000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bin size in base pairs
    pub resolution: u32,
    /// Half-width of each loop window in bins
    pub window: u32,
    pub include_inter: bool,
    pub normalization: NormalizationType,
    /// Stream raw counts and correct the aggregate by the marginals of `normalization`
    pub aggregate_normalization: bool,
    pub threads: usize,
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolution: 10_000,
            window: 10,
            include_inter: false,
            normalization: NormalizationType::Kr,
            aggregate_normalization: false,
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            show_progress: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution == 0 {
            return Err(ConfigError::ZeroResolution);
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.window > MAX_WINDOW {
            return Err(ConfigError::WindowTooLarge(self.window));
        }
        if self.aggregate_normalization && self.normalization.is_none() {
            return Err(ConfigError::AggregateNormalizationWithoutVector);
        }
        Ok(())
    }

    /// `2 * window + 1`
    pub fn width(&self) -> usize {
        2 * self.window as usize + 1
    }

    pub fn zoom(&self) -> Zoom {
        Zoom::bp(self.resolution)
    }
}

/// What happened to one chromosome pair
#[derive(Debug)]
pub enum PairOutcome {
    Accumulated(AggregateAccumulator),
    Missing(MissingData),
    /// No list has a loop on the pair
    NoLoops,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pairs_total: usize,
    pub pairs_accumulated: usize,
    pub pairs_missing: usize,
    pub pairs_failed: usize,
    pub pairs_without_loops: usize,
    pub loops_processed: usize,
    pub loops_total: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pairs: {} accumulated, {} missing data, {} failed, {} without loops; {}/{} loops",
            self.pairs_total,
            self.pairs_accumulated,
            self.pairs_missing,
            self.pairs_failed,
            self.pairs_without_loops,
            self.loops_processed,
            self.loops_total
        )
    }
}

/// Genome-wide aggregate of every loop list at one resolution
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub resolution: u32,
    pub window: u32,
    pub lists: Vec<ListResult>,
    pub summary: RunSummary,
}

/// Everything guarded by the merge lock
struct GenomeWide {
    accumulator: AggregateAccumulator,
    summary: RunSummary,
}

/// Runs all loop lists over every scheduled chromosome pair of `source` in one pass
pub struct AggregateEngine<'a, S: ContactSource + ?Sized> {
    config: EngineConfig,
    source: &'a S,
    chromosomes: &'a ChromosomeSet,
    lists: &'a [LoopList],
    loops_processed: AtomicUsize,
}

impl<'a, S: ContactSource + ?Sized> AggregateEngine<'a, S> {
    /// Checks the configuration and that at least one loop can be aggregated
    pub fn new(
        config: EngineConfig,
        source: &'a S,
        chromosomes: &'a ChromosomeSet,
        lists: &'a [LoopList],
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if chromosomes.is_empty() {
            return Err(ConfigError::NoChromosomes);
        }
        if lists.is_empty() {
            return Err(ConfigError::NoLoopLists);
        }
        let engine = Self {
            config,
            source,
            chromosomes,
            lists,
            loops_processed: AtomicUsize::new(0),
        };
        let scheduler = engine.scheduler();
        if engine.total_loops(&scheduler) == 0 {
            return Err(ConfigError::NoLoops(lists.len()));
        }
        Ok(engine)
    }

    /// Loops already visited by workers, across all lists
    pub fn loops_processed(&self) -> usize {
        self.loops_processed.load(Ordering::Relaxed)
    }

    fn scheduler(&self) -> ChromosomePairScheduler {
        ChromosomePairScheduler::new(self.chromosomes, self.config.include_inter)
    }

    /// Loops of every list on `pair`
    pub fn loops_on(&self, pair: &ChromosomePair) -> usize {
        let key = pair.key();
        self.lists.iter().map(|l| l.loops_for(key).len()).sum()
    }

    fn total_loops(&self, scheduler: &ChromosomePairScheduler) -> usize {
        (0..scheduler.len())
            .filter_map(|idx| scheduler.pair(idx))
            .map(|pair| self.loops_on(pair))
            .sum()
    }

    /// Index, stream and accumulate one pair into a fresh local accumulator.
    /// `num_loops` is the number of loops all lists have on the pair.
    pub fn process_pair(
        &self,
        pair: &ChromosomePair,
        num_loops: usize,
    ) -> Result<PairOutcome, ProcessingError> {
        let key = pair.key();
        let config = &self.config;
        let zoom = config.zoom();

        if num_loops == 0 {
            return Ok(PairOutcome::NoLoops);
        }

        let source_error = |cause| ProcessingError::Source {
            pair: pair.to_string(),
            cause,
        };

        let vectors = if config.aggregate_normalization {
            match self.pair_vectors(pair, zoom).map_err(source_error)? {
                Ok(vectors) => Some(vectors),
                Err(missing) => return Ok(PairOutcome::Missing(missing)),
            }
        } else {
            None
        };

        let mut index = RegionIndex::new();
        let mut local =
            AggregateAccumulator::new(self.lists.len(), config.width(), config.aggregate_normalization);
        for (list_id, list) in self.lists.iter().enumerate() {
            for lp in list.loops_for(key) {
                let window = Window::for_loop(lp, pair, config.resolution, config.window)?;
                index.insert(window, list_id);
                local.add_window(
                    list_id,
                    &window,
                    vectors.as_ref().map(|(row, col)| (row.as_ref(), col.as_ref())),
                );
            }
        }

        // aggregate normalization corrects after the fact, so it needs raw counts
        let stream_norm = if config.aggregate_normalization {
            NormalizationType::None
        } else {
            config.normalization
        };
        let Some(records) = self
            .source
            .contact_records(pair, zoom, stream_norm)
            .map_err(source_error)?
        else {
            return Ok(PairOutcome::Missing(MissingData::NoMatrix));
        };

        let stats = local.accumulate(&index, records);
        trace!(
            "{}: {} windows, {} records, {} candidates, {} hits",
            pair,
            index.num_windows(),
            stats.records,
            stats.candidates,
            stats.hits
        );
        Ok(PairOutcome::Accumulated(local))
    }

    /// Row-side and column-side vectors of the pair, or which one is missing
    #[allow(clippy::type_complexity)]
    fn pair_vectors(
        &self,
        pair: &ChromosomePair,
        zoom: Zoom,
    ) -> anyhow::Result<Result<(Arc<NormalizationVector>, Arc<NormalizationVector>), MissingData>> {
        let norm = self.config.normalization;
        let Some(row) = self.source.normalization_vector(&pair.first, zoom, norm)? else {
            return Ok(Err(MissingData::NoNormalizationVector(pair.first.name.clone())));
        };
        if pair.is_intra() {
            return Ok(Ok((Arc::clone(&row), row)));
        }
        let Some(col) = self.source.normalization_vector(&pair.second, zoom, norm)? else {
            return Ok(Err(MissingData::NoNormalizationVector(pair.second.name.clone())));
        };
        Ok(Ok((row, col)))
    }

    /// Process every pair with the configured worker count, then finalize
    pub fn run(&self) -> AggregateResult {
        let scheduler = self.scheduler();
        let loops_total = self.total_loops(&scheduler);
        let config = &self.config;
        let workers = config.threads.min(scheduler.len()).max(1);

        info!(
            "Aggregating {} loops from {} list(s) over {} chromosome pairs at {} with window {} ({} threads)",
            loops_total,
            self.lists.len(),
            scheduler.len(),
            config.zoom(),
            config.window,
            workers
        );

        let progress_bar = if config.show_progress {
            create_progress_bar(loops_total)
        } else {
            ProgressBar::hidden()
        };

        let genome_wide = Arc::new(Mutex::new(GenomeWide {
            accumulator: AggregateAccumulator::new(
                self.lists.len(),
                config.width(),
                config.aggregate_normalization,
            ),
            summary: RunSummary {
                pairs_total: scheduler.len(),
                loops_total,
                ..RunSummary::default()
            },
        }));

        thread::scope(|scope| {
            for _ in 0..workers {
                let scheduler = &scheduler;
                let genome_wide = Arc::clone(&genome_wide);
                let bar = progress_bar.clone();
                scope.spawn(move || loop {
                    let idx = scheduler.next_index();
                    let Some(pair) = scheduler.pair(idx) else {
                        break;
                    };
                    let num_loops = self.loops_on(pair);
                    let outcome = self.process_pair(pair, num_loops);
                    self.source.release(pair, config.zoom());

                    {
                        let mut genome_wide =
                            genome_wide.lock().unwrap_or_else(PoisonError::into_inner);
                        let summary = &mut genome_wide.summary;
                        match &outcome {
                            Ok(PairOutcome::Accumulated(_)) => {
                                summary.pairs_accumulated += 1;
                                summary.loops_processed += num_loops;
                            }
                            Ok(PairOutcome::Missing(_)) => summary.pairs_missing += 1,
                            Ok(PairOutcome::NoLoops) => summary.pairs_without_loops += 1,
                            Err(_) => summary.pairs_failed += 1,
                        }
                        if let Ok(PairOutcome::Accumulated(local)) = &outcome {
                            genome_wide.accumulator.merge(local);
                        }
                    }

                    match outcome {
                        Ok(PairOutcome::Missing(missing)) => {
                            debug!("Skipping {}: {}", pair, missing)
                        }
                        Err(e) => error!("Dropping contribution of {}: {}", pair, e),
                        Ok(_) => {}
                    }

                    self.loops_processed.fetch_add(num_loops, Ordering::Relaxed);
                    bar.inc(num_loops as u64);
                });
            }
        });
        progress_bar.finish_and_clear();

        // workers have joined and dropped their clones, so unwrapping only fails on a leak
        let GenomeWide {
            accumulator,
            summary,
        } = match Arc::try_unwrap(genome_wide) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => {
                let guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                GenomeWide {
                    accumulator: guard.accumulator.clone(),
                    summary: guard.summary.clone(),
                }
            }
        };

        info!("Finished {}: {}", config.zoom(), summary);

        let names: Vec<String> = self.lists.iter().map(|l| l.name().to_string()).collect();
        AggregateResult {
            resolution: config.resolution,
            window: config.window,
            lists: accumulator.finalize(&names),
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contacts::ContactRecord;
    use crate::core::loops::Loop;
    use crate::core::source::InMemoryContactSource;
    use crate::core::chromosome::PairKey;
    use rstest::rstest;

    fn chroms() -> ChromosomeSet {
        ChromosomeSet::new([("chr1", 10_000), ("chr2", 10_000)])
    }

    fn config(threads: usize) -> EngineConfig {
        EngineConfig {
            resolution: 1000,
            window: 1,
            include_inter: false,
            normalization: NormalizationType::None,
            aggregate_normalization: false,
            threads,
            show_progress: false,
        }
    }

    #[rstest]
    #[case(EngineConfig { resolution: 0, ..config(1) }, ConfigError::ZeroResolution)]
    #[case(config(0), ConfigError::ZeroThreads)]
    #[case(EngineConfig { window: MAX_WINDOW + 1, ..config(1) }, ConfigError::WindowTooLarge(MAX_WINDOW + 1))]
    #[case(
        EngineConfig { aggregate_normalization: true, ..config(1) },
        ConfigError::AggregateNormalizationWithoutVector
    )]
    fn test_invalid_config(#[case] config: EngineConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn test_empty_lists_rejected() {
        let source = InMemoryContactSource::new();
        let chroms = chroms();
        let empty = vec![LoopList::new("empty", vec![], &chroms)];
        assert!(matches!(
            AggregateEngine::new(config(1), &source, &chroms, &empty),
            Err(ConfigError::NoLoops(1))
        ));
        assert!(matches!(
            AggregateEngine::new(config(1), &source, &chroms, &[]),
            Err(ConfigError::NoLoopLists)
        ));
    }

    #[test]
    fn test_inter_only_loops_rejected_without_inter() {
        let source = InMemoryContactSource::new();
        let chroms = chroms();
        let lists = vec![LoopList::new(
            "inter",
            vec![Loop::new("chr1", 1000, 2000, "chr2", 1000, 2000)],
            &chroms,
        )];
        assert!(AggregateEngine::new(config(1), &source, &chroms, &lists).is_err());
        let inter = EngineConfig {
            include_inter: true,
            ..config(1)
        };
        assert!(AggregateEngine::new(inter, &source, &chroms, &lists).is_ok());
    }

    #[test]
    fn test_process_pair_outcomes() {
        let chroms = chroms();
        let mut source = InMemoryContactSource::new();
        source.insert_matrix(PairKey(0, 0), 1000, vec![ContactRecord::new(3, 7, 5.0)]);
        let lists = vec![LoopList::new(
            "loops",
            vec![
                Loop::new("chr1", 3000, 4000, "chr1", 7000, 8000),
                Loop::new("chr2", 3000, 4000, "chr2", 7000, 8000),
            ],
            &chroms,
        )];
        let engine = AggregateEngine::new(config(1), &source, &chroms, &lists).unwrap();

        let chr1 = chroms.get("chr1").unwrap();
        let chr2 = chroms.get("chr2").unwrap();
        let intra = ChromosomePair::new(chr1.clone(), chr1.clone());
        match engine.process_pair(&intra, engine.loops_on(&intra)) {
            Ok(PairOutcome::Accumulated(local)) => {
                assert_eq!(local.matrix(0)[[1, 1]], 5.0);
                assert_eq!(local.loop_count(0), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let chr2_intra = ChromosomePair::new(chr2.clone(), chr2.clone());
        assert!(matches!(
            engine.process_pair(&chr2_intra, engine.loops_on(&chr2_intra)),
            Ok(PairOutcome::Missing(MissingData::NoMatrix))
        ));
        let inter = ChromosomePair::new(chr1, chr2);
        assert_eq!(engine.loops_on(&inter), 0);
        assert!(matches!(
            engine.process_pair(&inter, 0),
            Ok(PairOutcome::NoLoops)
        ));
    }

    #[test]
    fn test_missing_vector_skips_pair() {
        let chroms = chroms();
        let mut source = InMemoryContactSource::new();
        source.insert_matrix(PairKey(0, 0), 1000, vec![ContactRecord::new(3, 7, 5.0)]);
        let lists = vec![LoopList::new(
            "loops",
            vec![Loop::new("chr1", 3000, 4000, "chr1", 7000, 8000)],
            &chroms,
        )];
        let config = EngineConfig {
            normalization: NormalizationType::Kr,
            aggregate_normalization: true,
            ..config(1)
        };
        let engine = AggregateEngine::new(config, &source, &chroms, &lists).unwrap();
        let chr1 = chroms.get("chr1").unwrap();
        assert!(matches!(
            engine.process_pair(&ChromosomePair::new(chr1.clone(), chr1), 1),
            Ok(PairOutcome::Missing(MissingData::NoNormalizationVector(name))) if name == "chr1"
        ));
    }

    #[test]
    fn test_run_summary() {
        let chroms = chroms();
        let mut source = InMemoryContactSource::new();
        source.insert_matrix(PairKey(0, 0), 1000, vec![ContactRecord::new(3, 7, 5.0)]);
        let lists = vec![LoopList::new(
            "loops",
            vec![
                Loop::new("chr1", 3000, 4000, "chr1", 7000, 8000),
                Loop::new("chr2", 3000, 4000, "chr2", 7000, 8000),
                // midpoint past the end of chr2
                Loop::new("chr2", 3000, 4000, "chr2", 70_000, 80_000),
            ],
            &chroms,
        )];
        let engine = AggregateEngine::new(config(2), &source, &chroms, &lists).unwrap();
        let result = engine.run();

        assert_eq!(
            result.summary,
            RunSummary {
                pairs_total: 2,
                pairs_accumulated: 1,
                pairs_missing: 0,
                pairs_failed: 1,
                pairs_without_loops: 0,
                loops_processed: 1,
                loops_total: 3,
            }
        );
        assert_eq!(engine.loops_processed(), 3);
        assert_eq!(result.lists[0].matrix[[1, 1]], 5.0);
        assert_eq!(result.lists[0].loops, 1);
    }
}
