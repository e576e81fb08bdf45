use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::warn;
use serde::Deserialize;

/// Name of the whole-genome pseudo chromosome some matrix files carry at index 0.
const WHOLE_GENOME: &str = "All";

/// A reference chromosome with its position in the ordered set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chromosome {
    pub index: usize,
    pub name: String,
    pub length: u64,
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Ordered pair of chromosomes, the unit of parallel work.
/// `first.index <= second.index` for every pair handed out by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomePair {
    pub first: Chromosome,
    pub second: Chromosome,
}

impl ChromosomePair {
    pub fn new(first: Chromosome, second: Chromosome) -> Self {
        Self { first, second }
    }

    pub fn is_intra(&self) -> bool {
        self.first.index == self.second.index
    }

    pub fn key(&self) -> PairKey {
        PairKey(self.first.index, self.second.index)
    }
}

impl fmt::Display for ChromosomePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first.name, self.second.name)
    }
}

/// Chromosome indices of a pair, used to key per-pair data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(pub usize, pub usize);

#[derive(Debug, Clone, Default)]
pub struct ChromosomeSet {
    chromosomes: IndexMap<String, u64>, // name -> length, ordered
}

impl ChromosomeSet {
    /// Create from (name, length) entries, indices follow input order
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let chromosomes = entries
            .into_iter()
            .map(|(name, length)| (name.into(), length))
            .filter(|(name, _): &(String, u64)| !name.eq_ignore_ascii_case(WHOLE_GENOME))
            .collect();
        Self { chromosomes }
    }

    pub fn get(&self, name: &str) -> Option<Chromosome> {
        self.chromosomes
            .get_full(name)
            .map(|(index, name, &length)| Chromosome {
                index,
                name: name.clone(),
                length,
            })
    }

    pub fn get_index(&self, index: usize) -> Option<Chromosome> {
        self.chromosomes
            .get_index(index)
            .map(|(name, &length)| Chromosome {
                index,
                name: name.clone(),
                length,
            })
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.chromosomes.get_index_of(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.chromosomes.contains_key(name)
    }

    /// Iterate over chromosomes in order
    pub fn iter(&self) -> impl Iterator<Item = Chromosome> + '_ {
        self.chromosomes
            .iter()
            .enumerate()
            .map(|(index, (name, &length))| Chromosome {
                index,
                name: name.clone(),
                length,
            })
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.chromosomes.keys().map(|s| s.as_str()).collect()
    }

    /// Filter chromosomes based on include/exclude lists. Indices are reassigned.
    pub fn filter(
        self,
        include: Option<&HashSet<String>>,
        exclude: Option<&HashSet<String>>,
    ) -> Result<Self> {
        if let Some(include_set) = include {
            for name in include_set {
                if !self.chromosomes.contains_key(name) {
                    bail!("Included chromosome '{}' not found in chromosome sizes", name);
                }
            }
        }

        let filtered: IndexMap<String, u64> = self
            .chromosomes
            .into_iter()
            .filter(|(name, _)| {
                let is_included = include.map_or(true, |set| set.contains(name));
                let is_not_excluded = exclude.map_or(true, |set| !set.contains(name));
                is_included && is_not_excluded
            })
            .collect();

        if filtered.is_empty() {
            bail!("No chromosomes remaining after applying include/exclude filters");
        }

        Ok(Self {
            chromosomes: filtered,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChromSizeRecord {
    name: String,
    length: u64,
}

/// Read a two column, tab separated chromosome sizes file
pub fn read_chrom_sizes<P: AsRef<Path>>(path: P) -> Result<ChromosomeSet> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open chromosome sizes: {}", path.display()))?;

    let mut entries: IndexMap<String, u64> = IndexMap::new();
    for result in reader.deserialize() {
        let record: ChromSizeRecord = result
            .with_context(|| format!("Bad chromosome sizes record in {}", path.display()))?;
        if entries.insert(record.name.clone(), record.length).is_some() {
            warn!(
                "Duplicate chromosome '{}' in {}, keeping the last length",
                record.name,
                path.display()
            );
        }
    }

    if entries.is_empty() {
        bail!("No chromosomes found in {}", path.display());
    }

    Ok(ChromosomeSet::new(entries))
}
