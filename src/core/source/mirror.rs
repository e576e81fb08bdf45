use std::iter;
use std::sync::Arc;

use anyhow::Result;

use super::{ContactSource, RecordStream};
use crate::core::chromosome::{Chromosome, ChromosomePair};
use crate::core::contacts::{ContactRecord, NormalizationType, NormalizationVector, Zoom};

/// Fills in the lower triangle of intra-chromosomal matrices.
///
/// Sources store intra matrices as their upper triangle only. Windows centred on the
/// diagonal need both halves, so every off-diagonal intra record is followed by its
/// `(y, x)` mirror. Inter-chromosomal streams pass through unchanged.
pub struct MirroredSource<'a, S: ContactSource + ?Sized> {
    inner: &'a S,
}

impl<'a, S: ContactSource + ?Sized> MirroredSource<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self { inner }
    }
}

impl<S: ContactSource + ?Sized> ContactSource for MirroredSource<'_, S> {
    fn contact_records(
        &self,
        pair: &ChromosomePair,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> Result<Option<RecordStream<'_>>> {
        let Some(records) = self.inner.contact_records(pair, zoom, norm)? else {
            return Ok(None);
        };
        if !pair.is_intra() {
            return Ok(Some(records));
        }
        let mirrored = records.flat_map(|record| {
            let mirror = (record.bin_x != record.bin_y)
                .then(|| ContactRecord::new(record.bin_y, record.bin_x, record.count));
            iter::once(record).chain(mirror)
        });
        Ok(Some(Box::new(mirrored)))
    }

    fn normalization_vector(
        &self,
        chrom: &Chromosome,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> Result<Option<Arc<NormalizationVector>>> {
        self.inner.normalization_vector(chrom, zoom, norm)
    }

    fn release(&self, pair: &ChromosomePair, zoom: Zoom) {
        self.inner.release(pair, zoom)
    }
}
