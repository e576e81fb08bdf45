use std::sync::Arc;

use anyhow::Result;

use crate::core::chromosome::{Chromosome, ChromosomePair};
use crate::core::contacts::{ContactRecord, NormalizationType, NormalizationVector, Zoom};

pub mod memory;
pub mod mirror;
pub mod text;

pub use memory::InMemoryContactSource;
pub use mirror::MirroredSource;
pub use text::read_contacts;

/// Forward-only stream of the non-zero cells of one chromosome pair's matrix
pub type RecordStream<'a> = Box<dyn Iterator<Item = ContactRecord> + 'a>;

/// Trait for reading sparse contact matrices. Shared by every engine worker.
pub trait ContactSource: Sync {
    /// Records of `pair` at `zoom`, normalized per `norm`.
    /// `Ok(None)` when the matrix or the zoom view does not exist.
    fn contact_records(
        &self,
        pair: &ChromosomePair,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> Result<Option<RecordStream<'_>>>;

    /// Bias vector for `chrom` at `zoom`. `Ok(None)` when unavailable.
    fn normalization_vector(
        &self,
        chrom: &Chromosome,
        zoom: Zoom,
        norm: NormalizationType,
    ) -> Result<Option<Arc<NormalizationVector>>>;

    /// Drop anything cached for `pair`. Called once the engine is done with the pair.
    fn release(&self, _pair: &ChromosomePair, _zoom: Zoom) {}
}
