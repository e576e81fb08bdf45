use std::sync::{Arc, Mutex};

use anyhow::bail;
use loopagg::apa::region_index::Window;
use loopagg::apa::{AggregateEngine, AggregateResult, EngineConfig};
use loopagg::core::chromosome::{Chromosome, ChromosomePair, ChromosomeSet, PairKey};
use loopagg::core::contacts::{ContactRecord, NormalizationType, NormalizationVector, Zoom};
use loopagg::core::loops::{Loop, LoopList};
use loopagg::core::source::{ContactSource, InMemoryContactSource, MirroredSource, RecordStream};
use ndarray::{array, Array2};
use rstest::rstest;

const RES: u32 = 1000;
const CHROM_LEN: u64 = 200_000;

/// Deterministic generator so every run sees the same data
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn chroms(n: usize) -> ChromosomeSet {
    ChromosomeSet::new((0..n).map(|i| (format!("chr{}", i + 1), CHROM_LEN)))
}

fn synthetic_source(chroms: &ChromosomeSet, seed: u64) -> InMemoryContactSource {
    let mut rng = Lcg(seed);
    let bins = CHROM_LEN / RES as u64;
    let mut source = InMemoryContactSource::new();
    for i in 0..chroms.len() {
        for j in i..chroms.len() {
            let records = (0..3000)
                .map(|_| {
                    let (mut x, mut y) = (rng.below(bins) as u32, rng.below(bins) as u32);
                    if i == j && x > y {
                        std::mem::swap(&mut x, &mut y);
                    }
                    ContactRecord::new(x, y, (1 + rng.below(9)) as f32)
                })
                .collect();
            source.insert_matrix(PairKey(i, j), RES, records);
        }
    }
    source
}

fn random_loops(chroms: &ChromosomeSet, seed: u64, n: usize, inter: bool) -> Vec<Loop> {
    let mut rng = Lcg(seed);
    let names = chroms.names();
    (0..n)
        .map(|_| {
            let c1 = names[rng.below(names.len() as u64) as usize];
            let c2 = if inter {
                names[rng.below(names.len() as u64) as usize]
            } else {
                c1
            };
            let s1 = rng.below(CHROM_LEN - 5000);
            let s2 = rng.below(CHROM_LEN - 5000);
            Loop::new(c1, s1, s1 + 5000, c2, s2, s2 + 5000)
        })
        .collect()
}

fn config(threads: usize, include_inter: bool) -> EngineConfig {
    EngineConfig {
        resolution: RES,
        window: 3,
        include_inter,
        normalization: NormalizationType::None,
        aggregate_normalization: false,
        threads,
        show_progress: false,
    }
}

fn run<S: ContactSource + ?Sized>(
    source: &S,
    chroms: &ChromosomeSet,
    lists: &[LoopList],
    config: EngineConfig,
) -> AggregateResult {
    AggregateEngine::new(config, source, chroms, lists)
        .unwrap()
        .run()
}

fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0), "{} != {}", x, y);
    }
}

#[rstest]
fn test_thread_count_does_not_change_result(#[values(false, true)] inter: bool) {
    let chroms = chroms(5);
    let source = synthetic_source(&chroms, 7);
    let lists = vec![
        LoopList::new("a", random_loops(&chroms, 11, 200, inter), &chroms),
        LoopList::new("b", random_loops(&chroms, 13, 150, inter), &chroms),
    ];

    let reference = run(&source, &chroms, &lists, config(1, inter));
    assert!(reference.lists[0].matrix.sum() > 0.0);
    for threads in [2, 8] {
        let result = run(&source, &chroms, &lists, config(threads, inter));
        for (expected, actual) in reference.lists.iter().zip(&result.lists) {
            assert_close(&expected.matrix, &actual.matrix);
            assert_eq!(expected.loops, actual.loops);
        }
        assert_eq!(reference.summary, result.summary);
    }
}

#[test]
fn test_window_covers_exactly_its_bins() {
    let chroms = chroms(1);
    // one record per cell, each with a distinct count
    let records = (0..80u32)
        .flat_map(|x| (x..80u32).map(move |y| ContactRecord::new(x, y, (x * 100 + y + 1) as f32)))
        .collect();
    let mut source = InMemoryContactSource::new();
    source.insert_matrix(PairKey(0, 0), RES, records);

    let lp = Loop::new("chr1", 40_000, 41_000, "chr1", 70_000, 71_999);
    let lists = vec![LoopList::new("one", vec![lp], &chroms)];
    let config = EngineConfig {
        window: 2,
        ..config(2, false)
    };
    let result = run(&source, &chroms, &lists, config);

    // mid1 = 40500 -> bin 40, mid2 = 70999 -> bin 70
    let matrix = &result.lists[0].matrix;
    assert_eq!(matrix.dim(), (5, 5));
    for r in 0..5 {
        for c in 0..5 {
            let (x, y) = (38 + r as u32, 68 + c as u32);
            assert_eq!(matrix[[r, c]], (x * 100 + y + 1) as f64);
        }
    }
    let expected_sum: f64 = (38..43u32)
        .flat_map(|x| (68..73u32).map(move |y| (x * 100 + y + 1) as f64))
        .sum();
    assert_eq!(matrix.sum(), expected_sum);
}

#[test]
fn test_disjoint_loops_add_up() {
    let chroms = chroms(3);
    let source = synthetic_source(&chroms, 3);
    let first = random_loops(&chroms, 21, 60, false);
    let second = random_loops(&chroms, 22, 60, false);
    let both: Vec<Loop> = first.iter().chain(&second).cloned().collect();

    let separate = |loops: Vec<Loop>| {
        run(
            &source,
            &chroms,
            &[LoopList::new("l", loops, &chroms)],
            config(4, false),
        )
        .lists
        .remove(0)
        .matrix
    };
    let sum = separate(first) + separate(second);
    assert_close(&separate(both), &sum);
}

#[test]
fn test_record_in_two_windows_counts_twice() {
    let chroms = chroms(1);
    let mut source = InMemoryContactSource::new();
    source.insert_matrix(PairKey(0, 0), RES, vec![ContactRecord::new(11, 21, 2.0)]);
    let lists = vec![LoopList::new(
        "overlap",
        vec![
            Loop::new("chr1", 10_000, 11_000, "chr1", 20_000, 21_000),
            Loop::new("chr1", 11_000, 12_000, "chr1", 21_000, 22_000),
        ],
        &chroms,
    )];
    let config = EngineConfig {
        window: 2,
        ..config(1, false)
    };
    let result = run(&source, &chroms, &lists, config);
    let matrix = &result.lists[0].matrix;
    assert_eq!(matrix[[3, 3]], 2.0);
    assert_eq!(matrix[[2, 2]], 2.0);
    assert_eq!(matrix.sum(), 4.0);
}

#[test]
fn test_lists_in_one_pass_match_separate_runs() {
    let chroms = chroms(4);
    let source = synthetic_source(&chroms, 5);
    let a = LoopList::new("a", random_loops(&chroms, 31, 100, true), &chroms);
    let b = LoopList::new("b", random_loops(&chroms, 32, 100, true), &chroms);

    let joint = run(&source, &chroms, &[a.clone(), b.clone()], config(3, true));
    let only_a = run(&source, &chroms, &[a], config(3, true));
    let only_b = run(&source, &chroms, &[b], config(3, true));

    assert_eq!(joint.lists[0].name, "a");
    assert_eq!(joint.lists[1].name, "b");
    assert_close(&joint.lists[0].matrix, &only_a.lists[0].matrix);
    assert_close(&joint.lists[1].matrix, &only_b.lists[0].matrix);
}

#[test]
fn test_pair_without_matrix_contributes_nothing() {
    init();
    let chroms = chroms(2);
    let mut source = InMemoryContactSource::new();
    source.insert_matrix(PairKey(0, 0), RES, vec![ContactRecord::new(3, 7, 5.0)]);
    let chr1_loop = Loop::new("chr1", 3000, 4000, "chr1", 7000, 8000);
    let chr2_loop = Loop::new("chr2", 3000, 4000, "chr2", 7000, 8000);

    let with_missing = run(
        &source,
        &chroms,
        &[LoopList::new("l", vec![chr1_loop.clone(), chr2_loop], &chroms)],
        config(2, false),
    );
    let without = run(
        &source,
        &chroms,
        &[LoopList::new("l", vec![chr1_loop], &chroms)],
        config(2, false),
    );

    assert_eq!(with_missing.lists[0].matrix, without.lists[0].matrix);
    assert_eq!(with_missing.summary.pairs_missing, 1);
    assert_eq!(with_missing.summary.pairs_failed, 0);
}

#[test]
fn test_single_loop_scenario() {
    let chroms = ChromosomeSet::new([("chr1", 10_000u64)]);
    let mut source = InMemoryContactSource::new();
    source.insert_matrix(
        PairKey(0, 0),
        RES,
        vec![ContactRecord::new(3, 7, 5.0), ContactRecord::new(0, 0, 9.0)],
    );
    let lp = Loop::new("chr1", 3000, 4000, "chr1", 7000, 8000);
    let pair = ChromosomePair::new(chroms.get("chr1").unwrap(), chroms.get("chr1").unwrap());
    let window = Window::for_loop(&lp, &pair, RES, 1).unwrap();
    assert_eq!((window.row_start, window.col_start), (2, 6));
    assert!(window.contains(3, 7));
    assert!(!window.contains(0, 0));

    let lists = vec![LoopList::new("l", vec![lp], &chroms)];
    let config = EngineConfig {
        window: 1,
        ..config(1, false)
    };
    let result = run(&source, &chroms, &lists, config);
    let mut expected = Array2::zeros((3, 3));
    expected[[1, 1]] = 5.0;
    assert_eq!(result.lists[0].matrix, expected);
}

/// Fails for one pair and records every release
struct FlakySource {
    inner: InMemoryContactSource,
    failing: PairKey,
    released: Mutex<Vec<PairKey>>,
}

impl ContactSource for FlakySource {
    fn contact_records(
        &self,
        pair: &ChromosomePair,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> anyhow::Result<Option<RecordStream<'_>>> {
        if pair.key() == self.failing {
            bail!("corrupt block");
        }
        self.inner.contact_records(pair, zoom, norm)
    }

    fn normalization_vector(
        &self,
        chrom: &Chromosome,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> anyhow::Result<Option<Arc<NormalizationVector>>> {
        self.inner.normalization_vector(chrom, zoom, norm)
    }

    fn release(&self, pair: &ChromosomePair, _zoom: Zoom) {
        self.released.lock().unwrap().push(pair.key());
    }
}

#[test]
fn test_failing_pair_is_dropped_and_run_continues() {
    init();
    let chroms = chroms(3);
    let inner = synthetic_source(&chroms, 9);
    let loops = random_loops(&chroms, 41, 120, false);
    let lists = vec![LoopList::new("l", loops.clone(), &chroms)];
    let flaky = FlakySource {
        inner: inner.clone(),
        failing: PairKey(1, 1),
        released: Mutex::new(Vec::new()),
    };

    let result = run(&flaky, &chroms, &lists, config(4, false));
    assert_eq!(result.summary.pairs_failed, 1);
    assert_eq!(result.summary.pairs_total, 3);

    let mut released = flaky.released.into_inner().unwrap();
    released.sort();
    assert_eq!(released, vec![PairKey(0, 0), PairKey(1, 1), PairKey(2, 2)]);

    // same as never having had loops on chr2
    let others: Vec<Loop> = loops.into_iter().filter(|lp| lp.chrom1 != "chr2").collect();
    let reference = run(
        &inner,
        &chroms,
        &[LoopList::new("l", others, &chroms)],
        config(1, false),
    );
    assert_close(&result.lists[0].matrix, &reference.lists[0].matrix);
}

#[test]
fn test_aggregate_normalization() {
    let chroms = chroms(3);
    let source = synthetic_source(&chroms, 17).with_coverage_normalization(&chroms, RES);
    let lists = vec![LoopList::new(
        "l",
        random_loops(&chroms, 51, 80, false),
        &chroms,
    )];
    let normalized = EngineConfig {
        normalization: NormalizationType::Vc,
        aggregate_normalization: true,
        ..config(4, false)
    };
    let result = run(&source, &chroms, &lists, normalized);
    let list = &result.lists[0];
    let norm = list.normalization.as_ref().unwrap();

    assert!((norm.rows.mean().unwrap() - 1.0).abs() < 1e-9);
    assert!((norm.cols.mean().unwrap() - 1.0).abs() < 1e-9);
    for ((r, c), &value) in list.matrix.indexed_iter() {
        let denom = norm.rows[r] * norm.cols[c];
        let expected = if denom > 0.0 { value / denom } else { 0.0 };
        assert!((norm.corrected[[r, c]] - expected).abs() < 1e-9);
    }

    // raw counts are streamed, so the aggregate matches an unnormalized run
    let raw = run(&source, &chroms, &lists, config(2, false));
    assert_close(&list.matrix, &raw.lists[0].matrix);
}

#[test]
fn test_marginals_sum_window_slices_of_both_chromosomes() {
    let chroms = chroms(2);
    let mut source = InMemoryContactSource::new();
    source.insert_matrix(PairKey(0, 0), RES, vec![ContactRecord::new(10, 50, 2.0)]);
    source.insert_matrix(PairKey(0, 1), RES, vec![ContactRecord::new(20, 30, 4.0)]);
    let bins = (CHROM_LEN / RES as u64) as usize;
    source.insert_vector(NormalizationVector::new(
        NormalizationType::Kr,
        0,
        RES,
        (0..bins).map(|i| (i + 1) as f64).collect(),
    ));
    source.insert_vector(NormalizationVector::new(
        NormalizationType::Kr,
        1,
        RES,
        (0..bins).map(|i| (1000 + i) as f64).collect(),
    ));

    let lists = vec![LoopList::new(
        "l",
        vec![
            Loop::new("chr1", 10_000, 11_000, "chr1", 50_000, 51_000),
            Loop::new("chr1", 20_000, 21_000, "chr2", 30_000, 31_000),
        ],
        &chroms,
    )];
    let normalized = EngineConfig {
        window: 1,
        normalization: NormalizationType::Kr,
        aggregate_normalization: true,
        ..config(2, true)
    };
    let result = run(&source, &chroms, &lists, normalized);
    let list = &result.lists[0];
    assert_eq!(list.loops, 2);
    assert_eq!(list.matrix[[1, 1]], 6.0);

    // intra rows 9..12 and cols 49..52 of chr1, inter rows 19..22 of chr1 and cols 29..32 of chr2
    let marginals = list.marginals.as_ref().unwrap();
    assert_eq!(marginals.rows, array![10.0 + 20.0, 11.0 + 21.0, 12.0 + 22.0]);
    assert_eq!(marginals.cols, array![50.0 + 1029.0, 51.0 + 1030.0, 52.0 + 1031.0]);
}

#[test]
fn test_anchor_windows_are_symmetric() {
    init();
    let chroms = chroms(1);
    let mut source = InMemoryContactSource::new();
    // upper triangle only, as sources store intra matrices
    source.insert_matrix(PairKey(0, 0), RES, vec![ContactRecord::new(49, 51, 3.0)]);
    let loops = LoopList::new(
        "l",
        vec![Loop::new("chr1", 50_000, 51_000, "chr1", 90_000, 91_000)],
        &chroms,
    );
    let anchors = vec![loops.anchor_windows()];
    let config = EngineConfig {
        window: 1,
        ..config(1, false)
    };

    let result = run(&MirroredSource::new(&source), &chroms, &anchors, config);
    assert_eq!(
        result.lists[0].matrix,
        array![[0.0, 0.0, 3.0], [0.0, 0.0, 0.0], [3.0, 0.0, 0.0]]
    );
}

#[test]
fn test_mirrored_anchor_aggregate_equals_its_transpose() {
    let chroms = chroms(3);
    let source = synthetic_source(&chroms, 23);
    let loops = LoopList::new("l", random_loops(&chroms, 61, 80, false), &chroms);
    let anchors = vec![loops.anchor_windows()];

    let result = run(&MirroredSource::new(&source), &chroms, &anchors, config(4, false));
    let matrix = &result.lists[0].matrix;
    assert!(matrix.sum() > 0.0);
    assert_close(matrix, &matrix.t().to_owned());
}
