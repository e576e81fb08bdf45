use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::chromosome::{ChromosomePair, ChromosomeSet};

/// Hands out chromosome pairs to workers through one shared counter.
///
/// Workers loop on [`next_index`](Self::next_index) and stop once it returns an index at or
/// past [`len`](Self::len). Each pair is claimed exactly once, in no particular order.
#[derive(Debug)]
pub struct ChromosomePairScheduler {
    pairs: Vec<ChromosomePair>,
    next: AtomicUsize,
}

impl ChromosomePairScheduler {
    /// All `(i, j)` with `i <= j` when `include_inter`, otherwise only `i == j`
    pub fn new(chromosomes: &ChromosomeSet, include_inter: bool) -> Self {
        let chroms: Vec<_> = chromosomes.iter().collect();
        let mut pairs = Vec::new();
        for (i, first) in chroms.iter().enumerate() {
            if include_inter {
                for second in &chroms[i..] {
                    pairs.push(ChromosomePair::new(first.clone(), second.clone()));
                }
            } else {
                pairs.push(ChromosomePair::new(first.clone(), first.clone()));
            }
        }

        Self {
            pairs,
            next: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim the next pair, None once every pair has been handed out
    pub fn next_pair(&self) -> Option<&ChromosomePair> {
        self.pairs.get(self.next_index())
    }

    pub fn pair(&self, index: usize) -> Option<&ChromosomePair> {
        self.pairs.get(index)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
