use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

use super::chromosome::{ChromosomeSet, PairKey};

/// A candidate interaction between two genomic intervals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub chrom1: String,
    pub start1: u64,
    pub end1: u64,
    pub chrom2: String,
    pub start2: u64,
    pub end2: u64,
    pub attributes: IndexMap<String, String>,
}

impl Loop {
    pub fn new(
        chrom1: impl Into<String>,
        start1: u64,
        end1: u64,
        chrom2: impl Into<String>,
        start2: u64,
        end2: u64,
    ) -> Self {
        Self {
            chrom1: chrom1.into(),
            start1,
            end1,
            chrom2: chrom2.into(),
            start2,
            end2,
            attributes: IndexMap::new(),
        }
    }

    #[inline]
    pub fn mid1(&self) -> u64 {
        midpoint(self.start1, self.end1)
    }

    #[inline]
    pub fn mid2(&self) -> u64 {
        midpoint(self.start2, self.end2)
    }

    pub fn is_intra(&self) -> bool {
        self.chrom1 == self.chrom2
    }

    fn swap_anchors(self) -> Self {
        Self {
            chrom1: self.chrom2,
            start1: self.start2,
            end1: self.end2,
            chrom2: self.chrom1,
            start2: self.start1,
            end2: self.end1,
            attributes: self.attributes,
        }
    }
}

/// `(start + end) / 2` without overflowing
#[inline]
fn midpoint(start: u64, end: u64) -> u64 {
    start / 2 + end / 2 + (start % 2 + end % 2) / 2
}

/// Loops of one list grouped by chromosome pair
#[derive(Debug, Clone, Default)]
pub struct LoopList {
    name: String,
    by_pair: IndexMap<PairKey, Vec<Loop>>,
}

impl LoopList {
    /// Group `loops` by chromosome pair. Each loop is oriented so its first anchor sits on
    /// the lower chromosome index, and for intra loops at the lower midpoint, which keeps
    /// every window on the primary triangle of the matrix.
    pub fn new(name: impl Into<String>, loops: Vec<Loop>, chromosomes: &ChromosomeSet) -> Self {
        let name = name.into();
        let mut by_pair: IndexMap<PairKey, Vec<Loop>> = IndexMap::new();
        let mut dropped = 0usize;

        for lp in loops {
            let (Some(idx1), Some(idx2)) =
                (chromosomes.index_of(&lp.chrom1), chromosomes.index_of(&lp.chrom2))
            else {
                dropped += 1;
                continue;
            };
            let (key, lp) = if idx1 > idx2 || (idx1 == idx2 && lp.mid1() > lp.mid2()) {
                (PairKey(idx2, idx1), lp.swap_anchors())
            } else {
                (PairKey(idx1, idx2), lp)
            };
            by_pair.entry(key).or_default().push(lp);
        }

        if dropped > 0 {
            warn!(
                "Loop list '{}': dropped {} loops on chromosomes not in the chromosome set",
                name, dropped
            );
        }
        by_pair.sort_keys();

        Self { name, by_pair }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loops_for(&self, key: PairKey) -> &[Loop] {
        self.by_pair.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pairs(&self) -> impl Iterator<Item = (PairKey, &[Loop])> {
        self.by_pair.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.by_pair.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One diagonal window per distinct anchor, for aggregating the neighbourhood of
    /// loop anchors rather than of the loops themselves
    pub fn anchor_windows(&self) -> LoopList {
        let mut anchors: IndexSet<(PairKey, String, u64, u64)> = IndexSet::new();
        for (key, loops) in &self.by_pair {
            for lp in loops {
                anchors.insert((PairKey(key.0, key.0), lp.chrom1.clone(), lp.start1, lp.end1));
                anchors.insert((PairKey(key.1, key.1), lp.chrom2.clone(), lp.start2, lp.end2));
            }
        }

        let mut by_pair: IndexMap<PairKey, Vec<Loop>> = IndexMap::new();
        for (key, chrom, start, end) in anchors {
            by_pair
                .entry(key)
                .or_default()
                .push(Loop::new(chrom.clone(), start, end, chrom, start, end));
        }
        by_pair.sort_keys();

        LoopList {
            name: self.name.clone(),
            by_pair,
        }
    }

    /// Keep the loops `filter` accepts at `resolution`
    pub fn filtered(&self, filter: &LoopFilter, resolution: u32) -> LoopList {
        let by_pair: IndexMap<PairKey, Vec<Loop>> = self
            .by_pair
            .iter()
            .filter_map(|(key, loops)| {
                let kept: Vec<Loop> = loops
                    .iter()
                    .filter(|lp| filter.accepts(lp, resolution))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then_some((*key, kept))
            })
            .collect();

        let filtered = LoopList {
            name: self.name.clone(),
            by_pair,
        };
        debug!(
            "Loop list '{}' at {} bp: kept {} of {} loops",
            self.name,
            resolution,
            filtered.len(),
            self.len()
        );
        filtered
    }
}

/// Upstream loop selection: distance from the diagonal in bins and inter-chromosomal loops
#[derive(Debug, Clone, Copy)]
pub struct LoopFilter {
    pub min_peak_distance: u64,
    pub max_peak_distance: Option<u64>,
    pub include_inter: bool,
}

impl Default for LoopFilter {
    fn default() -> Self {
        Self {
            min_peak_distance: 30,
            max_peak_distance: None,
            include_inter: false,
        }
    }
}

impl LoopFilter {
    pub fn accepts(&self, lp: &Loop, resolution: u32) -> bool {
        if !lp.is_intra() {
            return self.include_inter;
        }
        let res = resolution as u64;
        let distance = (lp.mid1() / res).abs_diff(lp.mid2() / res);
        distance >= self.min_peak_distance
            && self.max_peak_distance.map_or(true, |max| distance <= max)
    }
}

fn parse_coord(record: &csv::StringRecord, idx: usize, line: u64) -> Result<u64> {
    let field = record
        .get(idx)
        .with_context(|| format!("Line {}: missing column {}", line, idx + 1))?;
    let value = field.trim();
    if let Ok(coord) = value.parse::<u64>() {
        return Ok(coord);
    }
    // some callers write coordinates as floats
    let coord = value
        .parse::<f64>()
        .with_context(|| format!("Line {}: bad coordinate in column {}: '{}'", line, idx + 1, field))?;
    if !coord.is_finite() || coord < 0.0 || coord >= u64::MAX as f64 {
        bail!(
            "Line {}: coordinate in column {} out of range: '{}'",
            line,
            idx + 1,
            field
        );
    }
    Ok(coord as u64)
}

/// Read loops from a BEDPE file (`chr1 x1 x2 chr2 y1 y2 [attributes...]`).
/// A leading header row names the attribute columns.
pub fn read_bedpe<P: AsRef<Path>>(path: P) -> Result<Vec<Loop>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open loop list: {}", path.display()))?;

    let mut loops = Vec::new();
    let mut attribute_names: Option<Vec<String>> = None;
    let mut record = csv::StringRecord::new();
    let mut first = true;

    while reader
        .read_record(&mut record)
        .with_context(|| format!("Failed to read loop list: {}", path.display()))?
    {
        let line = record.position().map_or(0, |p| p.line());
        if record.len() < 6 {
            bail!(
                "{} line {}: expected at least 6 columns, found {}",
                path.display(),
                line,
                record.len()
            );
        }
        if first {
            first = false;
            if record[1].trim().parse::<f64>().is_err() {
                attribute_names = Some(record.iter().skip(6).map(str::to_string).collect());
                continue;
            }
        }

        let mut lp = Loop::new(
            &record[0],
            parse_coord(&record, 1, line)?,
            parse_coord(&record, 2, line)?,
            &record[3],
            parse_coord(&record, 4, line)?,
            parse_coord(&record, 5, line)?,
        );
        for (i, value) in record.iter().enumerate().skip(6) {
            let key = attribute_names
                .as_ref()
                .and_then(|names| names.get(i - 6).cloned())
                .unwrap_or_else(|| format!("col{}", i + 1));
            lp.attributes.insert(key, value.to_string());
        }
        loops.push(lp);
    }

    debug!("Read {} loops from {}", loops.len(), path.display());
    Ok(loops)
}
