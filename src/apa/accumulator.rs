use ndarray::{Array1, Array2, Zip};
use rayon::prelude::*;

use super::normalize::AggregateNormalization;
use super::region_index::{RegionIndex, Window, WindowHit};
use crate::core::contacts::{ContactRecord, NormalizationVector};

/// Row and column sums of the normalization vector slices under every window of a list
#[derive(Debug, Clone, PartialEq)]
pub struct Marginals {
    pub rows: Array1<f64>,
    pub cols: Array1<f64>,
}

impl Marginals {
    fn new(width: usize) -> Self {
        Self {
            rows: Array1::zeros(width),
            cols: Array1::zeros(width),
        }
    }
}

/// What one streaming pass saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub records: u64,
    pub candidates: u64,
    pub hits: u64,
}

/// Per-list aggregate matrices (and marginals when aggregate normalization is on).
///
/// Workers fill one per chromosome pair; the engine merges those into a single genome-wide
/// instance under its lock.
#[derive(Debug, Clone)]
pub struct AggregateAccumulator {
    width: usize,
    matrices: Vec<Array2<f64>>,
    marginals: Option<Vec<Marginals>>,
    loops: Vec<usize>,
}

impl AggregateAccumulator {
    pub fn new(num_lists: usize, width: usize, track_marginals: bool) -> Self {
        Self {
            width,
            matrices: vec![Array2::zeros((width, width)); num_lists],
            marginals: track_marginals.then(|| vec![Marginals::new(width); num_lists]),
            loops: vec![0; num_lists],
        }
    }

    fn num_lists(&self) -> usize {
        self.matrices.len()
    }

    pub fn matrix(&self, list_id: usize) -> &Array2<f64> {
        &self.matrices[list_id]
    }

    pub fn marginals(&self, list_id: usize) -> Option<&Marginals> {
        self.marginals.as_ref().map(|m| &m[list_id])
    }

    /// Loops of `list_id` whose windows were accumulated
    pub fn loop_count(&self, list_id: usize) -> usize {
        self.loops[list_id]
    }

    /// Register one loop window of `list_id`, adding its bias slices to the marginals
    /// when they are tracked. `vectors` holds the row-side and column-side vectors.
    pub fn add_window(
        &mut self,
        list_id: usize,
        window: &Window,
        vectors: Option<(&NormalizationVector, &NormalizationVector)>,
    ) {
        self.loops[list_id] += 1;
        let (Some(marginals), Some((row_vector, col_vector))) = (self.marginals.as_mut(), vectors)
        else {
            return;
        };
        let marginal = &mut marginals[list_id];
        for (acc, bias) in marginal
            .rows
            .iter_mut()
            .zip(row_vector.window_slice(window.row_start, window.width))
        {
            *acc += bias;
        }
        for (acc, bias) in marginal
            .cols
            .iter_mut()
            .zip(col_vector.window_slice(window.col_start, window.width))
        {
            *acc += bias;
        }
    }

    #[inline]
    pub fn add_hit(&mut self, hit: WindowHit, count: f64) {
        self.matrices[hit.list_id][[hit.rel_row, hit.rel_col]] += count;
    }

    /// One pass over `records`: every positive count is added to each window covering it
    pub fn accumulate<I>(&mut self, index: &RegionIndex, records: I) -> StreamStats
    where
        I: IntoIterator<Item = ContactRecord>,
    {
        let mut stats = StreamStats::default();
        for record in records {
            stats.records += 1;
            if !(record.count > 0.0) {
                continue;
            }
            let (x, y) = (record.bin_x as i64, record.bin_y as i64);
            if !index.probably_contains(x, y) {
                continue;
            }
            stats.candidates += 1;
            let count = record.count as f64;
            for hit in index.matches(x, y) {
                self.add_hit(hit, count);
                stats.hits += 1;
            }
        }
        stats
    }

    /// Elementwise add `other` into `self`, skipping empty cells
    pub fn merge(&mut self, other: &AggregateAccumulator) {
        debug_assert_eq!(self.width, other.width);
        debug_assert_eq!(self.num_lists(), other.num_lists());

        for (acc, local) in self.matrices.iter_mut().zip(&other.matrices) {
            Zip::from(acc).and(local).for_each(|a, &b| {
                if b != 0.0 {
                    *a += b;
                }
            });
        }
        if let (Some(acc), Some(local)) = (self.marginals.as_mut(), other.marginals.as_ref()) {
            for (a, b) in acc.iter_mut().zip(local) {
                Zip::from(&mut a.rows).and(&b.rows).for_each(add_nonzero);
                Zip::from(&mut a.cols).and(&b.cols).for_each(add_nonzero);
            }
        }
        for (a, b) in self.loops.iter_mut().zip(&other.loops) {
            *a += b;
        }
    }

    /// Consume the genome-wide accumulator, one result per list in list order
    pub fn finalize(self, names: &[String]) -> Vec<ListResult> {
        let marginals: Vec<Option<Marginals>> = self
            .marginals
            .map(|m| m.into_iter().map(Some).collect())
            .unwrap_or_else(|| vec![None; self.matrices.len()]);

        self.matrices
            .into_par_iter()
            .zip(marginals)
            .zip(self.loops)
            .enumerate()
            .map(|(list_id, ((matrix, marginals), loops))| {
                let normalization = marginals
                    .as_ref()
                    .map(|m| AggregateNormalization::compute(&matrix, m));
                ListResult {
                    name: names.get(list_id).cloned().unwrap_or_else(|| format!("list{}", list_id)),
                    loops,
                    matrix,
                    marginals,
                    normalization,
                }
            })
            .collect()
    }
}

fn add_nonzero(a: &mut f64, &b: &f64) {
    if b != 0.0 {
        *a += b;
    }
}

/// Genome-wide outcome for one loop list
#[derive(Debug, Clone)]
pub struct ListResult {
    pub name: String,
    /// Loops whose windows were accumulated
    pub loops: usize,
    pub matrix: Array2<f64>,
    /// Raw marginal sums, before mean normalization
    pub marginals: Option<Marginals>,
    pub normalization: Option<AggregateNormalization>,
}
