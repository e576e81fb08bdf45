use std::sync::Arc;

use anyhow::Result;
use fnv::FnvHashMap;
use log::debug;
use rayon::prelude::*;

use super::{ContactSource, RecordStream};
use crate::core::chromosome::{Chromosome, ChromosomePair, ChromosomeSet, PairKey};
use crate::core::contacts::{ContactRecord, NormalizationType, NormalizationVector, Unit, Zoom};

/// Contact matrices and bias vectors held in memory, keyed by resolution
#[derive(Debug, Clone, Default)]
pub struct InMemoryContactSource {
    matrices: FnvHashMap<(PairKey, u32), Vec<ContactRecord>>,
    vectors: FnvHashMap<(usize, NormalizationType, u32), Arc<NormalizationVector>>,
}

impl InMemoryContactSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records for a pair at `resolution`. Records are appended to any already present.
    pub fn insert_matrix(&mut self, key: PairKey, resolution: u32, records: Vec<ContactRecord>) {
        self.matrices
            .entry((key, resolution))
            .or_default()
            .extend(records);
    }

    pub fn insert_vector(&mut self, vector: NormalizationVector) {
        self.vectors.insert(
            (vector.chrom_index, vector.norm, vector.resolution),
            Arc::new(vector),
        );
    }

    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    pub fn records(&self, key: PairKey, resolution: u32) -> Option<&[ContactRecord]> {
        self.matrices.get(&(key, resolution)).map(|r| r.as_slice())
    }

    fn vector(
        &self,
        chrom_index: usize,
        norm: NormalizationType,
        resolution: u32,
    ) -> Option<Arc<NormalizationVector>> {
        self.vectors.get(&(chrom_index, norm, resolution)).cloned()
    }

    /// Derive VC and VC_SQRT vectors at `resolution` from the stored matrices.
    ///
    /// Coverage of a bin is the sum of every contact touching it, genome wide.
    /// VC is coverage over the mean of the covered bins, VC_SQRT is the square root
    /// of coverage over the mean of the covered bins' square roots. Bins without
    /// coverage get NaN so normalized records there are dropped.
    pub fn with_coverage_normalization(mut self, chromosomes: &ChromosomeSet, resolution: u32) -> Self {
        let num_chroms = chromosomes.len();
        let initial: Vec<Vec<f64>> = chromosomes
            .iter()
            .map(|chrom| vec![0.0; (chrom.length / resolution as u64) as usize + 1])
            .collect();

        let coverage = self
            .matrices
            .par_iter()
            .filter(|((key, res), _)| *res == resolution && key.1 < num_chroms)
            .fold(
                || initial.clone(),
                |mut acc, ((key, _), records)| {
                    for record in records {
                        let count = record.count as f64;
                        add_coverage(&mut acc[key.0], record.bin_x, count);
                        if key.0 != key.1 || record.bin_x != record.bin_y {
                            add_coverage(&mut acc[key.1], record.bin_y, count);
                        }
                    }
                    acc
                },
            )
            .reduce(
                || initial.clone(),
                |mut left, right| {
                    for (l, r) in left.iter_mut().zip(right) {
                        if l.len() < r.len() {
                            l.resize(r.len(), 0.0);
                        }
                        for (a, b) in l.iter_mut().zip(r) {
                            *a += b;
                        }
                    }
                    left
                },
            );

        for (chrom_index, bins) in coverage.into_iter().enumerate() {
            let sqrt_bins: Vec<f64> = bins.iter().map(|v| v.sqrt()).collect();
            self.insert_vector(NormalizationVector::new(
                NormalizationType::Vc,
                chrom_index,
                resolution,
                scale_by_covered_mean(&bins),
            ));
            self.insert_vector(NormalizationVector::new(
                NormalizationType::VcSqrt,
                chrom_index,
                resolution,
                scale_by_covered_mean(&sqrt_bins),
            ));
        }
        debug!(
            "Derived coverage normalization for {} chromosomes at {} bp",
            num_chroms, resolution
        );
        self
    }
}

fn add_coverage(bins: &mut Vec<f64>, bin: u32, count: f64) {
    let bin = bin as usize;
    if bin >= bins.len() {
        bins.resize(bin + 1, 0.0);
    }
    bins[bin] += count;
}

fn scale_by_covered_mean(bins: &[f64]) -> Vec<f64> {
    let (sum, covered) = bins
        .iter()
        .filter(|v| **v > 0.0)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    let mean = if covered > 0 { sum / covered as f64 } else { 0.0 };
    bins.iter()
        .map(|&v| if v > 0.0 && mean > 0.0 { v / mean } else { f64::NAN })
        .collect()
}

impl ContactSource for InMemoryContactSource {
    fn contact_records(
        &self,
        pair: &ChromosomePair,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> Result<Option<RecordStream<'_>>> {
        if zoom.unit != Unit::BasePair {
            return Ok(None);
        }
        let Some(records) = self.matrices.get(&(pair.key(), zoom.resolution)) else {
            return Ok(None);
        };
        if norm.is_none() {
            return Ok(Some(Box::new(records.iter().copied())));
        }

        let row_vector = self.vector(pair.first.index, norm, zoom.resolution);
        let col_vector = self.vector(pair.second.index, norm, zoom.resolution);
        let (Some(row_vector), Some(col_vector)) = (row_vector, col_vector) else {
            return Ok(None);
        };

        let normalized = records.iter().filter_map(move |record| {
            let row_bias = row_vector.get(record.bin_x as i64)?;
            let col_bias = col_vector.get(record.bin_y as i64)?;
            let denominator = row_bias * col_bias;
            (denominator > 0.0).then(|| {
                ContactRecord::new(
                    record.bin_x,
                    record.bin_y,
                    (record.count as f64 / denominator) as f32,
                )
            })
        });
        Ok(Some(Box::new(normalized)))
    }

    fn normalization_vector(
        &self,
        chrom: &Chromosome,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> Result<Option<Arc<NormalizationVector>>> {
        if zoom.unit != Unit::BasePair {
            return Ok(None);
        }
        Ok(self.vector(chrom.index, norm, zoom.resolution))
    }
}
