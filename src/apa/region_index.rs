use fnv::{FnvHashMap, FnvHashSet};

use crate::core::chromosome::ChromosomePair;
use crate::core::errors::ProcessingError;
use crate::core::loops::Loop;

/// The `width`×`width` block of absolute bins around a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row_start: i64,
    pub col_start: i64,
    pub width: usize,
}

impl Window {
    /// Window centered on the bins holding `mid1`/`mid2`. Bin conversion truncates.
    pub fn around(mid1: u64, mid2: u64, resolution: u32, half_width: u32) -> Self {
        let res = resolution as u64;
        let half = half_width as i64;
        Self {
            row_start: (mid1 / res) as i64 - half,
            col_start: (mid2 / res) as i64 - half,
            width: 2 * half_width as usize + 1,
        }
    }

    /// Window for a loop on `pair`, rejecting coordinates that cannot belong to the pair
    pub fn for_loop(
        lp: &Loop,
        pair: &ChromosomePair,
        resolution: u32,
        half_width: u32,
    ) -> Result<Self, ProcessingError> {
        let malformed = |reason| ProcessingError::MalformedLoop {
            chrom1: lp.chrom1.clone(),
            start1: lp.start1,
            end1: lp.end1,
            chrom2: lp.chrom2.clone(),
            start2: lp.start2,
            end2: lp.end2,
            reason,
        };
        if lp.start1 > lp.end1 || lp.start2 > lp.end2 {
            return Err(malformed("interval start is after its end"));
        }
        if lp.chrom1 != pair.first.name || lp.chrom2 != pair.second.name {
            return Err(malformed("loop does not belong to this chromosome pair"));
        }
        if lp.mid1() > pair.first.length || lp.mid2() > pair.second.length {
            return Err(malformed("midpoint lies past the chromosome end"));
        }
        Ok(Self::around(lp.mid1(), lp.mid2(), resolution, half_width))
    }

    #[inline]
    pub fn row_end(&self) -> i64 {
        self.row_start + self.width as i64
    }

    #[inline]
    pub fn col_end(&self) -> i64 {
        self.col_start + self.width as i64
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.row_start..self.row_end()).contains(&x) && (self.col_start..self.col_end()).contains(&y)
    }
}

/// Column span of one window on one row
#[derive(Debug, Clone, Copy)]
struct WindowSpan {
    col_start: i64,
    col_end: i64,
    row_offset: i64,
    list_id: usize,
}

/// A record's cell relative to one window, and the list that window belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHit {
    pub rel_row: usize,
    pub rel_col: usize,
    pub list_id: usize,
}

/// Maps absolute bin coordinates of one chromosome pair to every loop window covering them.
///
/// Each covered row holds the spans of all windows crossing it, so overlapping windows
/// (of the same or different lists) each get their own hit. The row keys and the column set
/// give a cheap reject for the common case of a record outside every window.
#[derive(Debug, Default)]
pub struct RegionIndex {
    rows: FnvHashMap<i64, Vec<WindowSpan>>,
    cols: FnvHashSet<i64>,
    num_windows: usize,
}

impl RegionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, window: Window, list_id: usize) {
        let span = WindowSpan {
            col_start: window.col_start,
            col_end: window.col_end(),
            row_offset: window.row_start,
            list_id,
        };
        for row in window.row_start..window.row_end() {
            self.rows.entry(row).or_default().push(span);
        }
        self.cols.extend(window.col_start..window.col_end());
        self.num_windows += 1;
    }

    /// False means no window covers `(x, y)`. True may still yield no matches.
    #[inline]
    pub fn probably_contains(&self, x: i64, y: i64) -> bool {
        self.rows.contains_key(&x) && self.cols.contains(&y)
    }

    /// One hit per window covering `(x, y)`
    pub fn matches(&self, x: i64, y: i64) -> impl Iterator<Item = WindowHit> + '_ {
        self.rows
            .get(&x)
            .into_iter()
            .flatten()
            .filter(move |span| span.col_start <= y && y < span.col_end)
            .map(move |span| WindowHit {
                rel_row: (x - span.row_offset) as usize,
                rel_col: (y - span.col_start) as usize,
                list_id: span.list_id,
            })
    }

    pub fn num_windows(&self) -> usize {
        self.num_windows
    }
}
