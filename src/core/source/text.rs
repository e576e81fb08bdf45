use std::path::Path;

use anyhow::{bail, Context, Result};
use fnv::FnvHashMap;
use log::{info, warn};
use rayon::prelude::*;

use super::InMemoryContactSource;
use crate::core::chromosome::{ChromosomeSet, PairKey};
use crate::core::contacts::ContactRecord;

/// A contact between two base-pair positions, oriented so `chrom1 <= chrom2`
#[derive(Debug, Clone, Copy)]
struct RawContact {
    chrom1: usize,
    pos1: u64,
    chrom2: usize,
    pos2: u64,
    count: f32,
}

impl RawContact {
    /// Cell of the contact at `resolution`, None when a bin does not fit in `u32`
    fn bin(&self, resolution: u32) -> Option<(PairKey, u32, u32)> {
        let x = u32::try_from(self.pos1 / resolution as u64).ok()?;
        let y = u32::try_from(self.pos2 / resolution as u64).ok()?;
        // intra matrices only hold the upper triangle
        if self.chrom1 == self.chrom2 && x > y {
            Some((PairKey(self.chrom1, self.chrom2), y, x))
        } else {
            Some((PairKey(self.chrom1, self.chrom2), x, y))
        }
    }
}

fn parse_field<T: std::str::FromStr>(record: &csv::StringRecord, idx: usize, line: u64) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let field = record
        .get(idx)
        .with_context(|| format!("Line {}: missing column {}", line, idx + 1))?;
    field
        .trim()
        .parse::<T>()
        .with_context(|| format!("Line {}: could not parse column {}: '{}'", line, idx + 1, field))
}

/// Read a tab separated contact file (`chrom1 pos1 chrom2 pos2 [count]`) and bin it
/// at every requested resolution.
pub fn read_contacts<P: AsRef<Path>>(
    path: P,
    chromosomes: &ChromosomeSet,
    resolutions: &[u32],
) -> Result<InMemoryContactSource> {
    let path = path.as_ref();
    if resolutions.iter().any(|&r| r == 0) {
        bail!("Resolutions must be positive");
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open contact file: {}", path.display()))?;

    let lengths: Vec<u64> = chromosomes.iter().map(|c| c.length).collect();
    let mut contacts = Vec::new();
    let mut unknown: FnvHashMap<String, usize> = FnvHashMap::default();
    let mut past_end = 0usize;
    let mut record = csv::StringRecord::new();

    while reader
        .read_record(&mut record)
        .with_context(|| format!("Failed to read contact file: {}", path.display()))?
    {
        let line = record.position().map_or(0, |p| p.line());
        if record.len() < 4 {
            bail!(
                "Line {}: expected at least 4 columns (chrom1 pos1 chrom2 pos2 [count]), found {}",
                line,
                record.len()
            );
        }
        let chrom1 = &record[0];
        let chrom2 = &record[2];
        let (Some(idx1), Some(idx2)) = (chromosomes.index_of(chrom1), chromosomes.index_of(chrom2))
        else {
            for name in [chrom1, chrom2] {
                if !chromosomes.contains(name) {
                    *unknown.entry(name.to_string()).or_default() += 1;
                }
            }
            continue;
        };
        let pos1: u64 = parse_field(&record, 1, line)?;
        let pos2: u64 = parse_field(&record, 3, line)?;
        let count: f32 = if record.len() > 4 {
            parse_field(&record, 4, line)?
        } else {
            1.0
        };
        if !(count > 0.0) {
            continue;
        }
        if pos1 > lengths[idx1] || pos2 > lengths[idx2] {
            past_end += 1;
            continue;
        }

        let contact = if idx1 <= idx2 {
            RawContact {
                chrom1: idx1,
                pos1,
                chrom2: idx2,
                pos2,
                count,
            }
        } else {
            RawContact {
                chrom1: idx2,
                pos1: pos2,
                chrom2: idx1,
                pos2: pos1,
                count,
            }
        };
        contacts.push(contact);
    }

    for (name, n) in &unknown {
        warn!(
            "Skipped {} contacts on chromosome '{}' which is not in the chromosome set",
            n, name
        );
    }
    if past_end > 0 {
        warn!(
            "Skipped {} contacts positioned past the end of their chromosome",
            past_end
        );
    }

    let binned: Vec<(u32, FnvHashMap<PairKey, Vec<ContactRecord>>)> = resolutions
        .par_iter()
        .map(|&resolution| (resolution, bin_contacts(&contacts, resolution)))
        .collect();

    let mut source = InMemoryContactSource::new();
    for (resolution, matrices) in binned {
        for (key, records) in matrices {
            source.insert_matrix(key, resolution, records);
        }
    }

    info!(
        "Loaded {} contacts from {} into {} matrices",
        contacts.len(),
        path.display(),
        source.num_matrices()
    );
    Ok(source)
}

fn bin_contacts(contacts: &[RawContact], resolution: u32) -> FnvHashMap<PairKey, Vec<ContactRecord>> {
    let mut cells: FnvHashMap<(PairKey, u32, u32), f32> = FnvHashMap::default();
    let mut overflow = 0usize;
    for contact in contacts {
        match contact.bin(resolution) {
            Some(cell) => *cells.entry(cell).or_default() += contact.count,
            None => overflow += 1,
        }
    }
    if overflow > 0 {
        warn!(
            "Skipped {} contacts whose bin at {} bp exceeds the supported range",
            overflow, resolution
        );
    }

    let mut matrices: FnvHashMap<PairKey, Vec<ContactRecord>> = FnvHashMap::default();
    for ((key, x, y), count) in cells {
        matrices
            .entry(key)
            .or_default()
            .push(ContactRecord::new(x, y, count));
    }
    for records in matrices.values_mut() {
        records.sort_unstable_by_key(|r| (r.bin_x, r.bin_y));
    }
    matrices
}
