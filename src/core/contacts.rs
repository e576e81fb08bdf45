use std::fmt;
use std::str::FromStr;

use anyhow::bail;

/// One non-zero cell of a chromosome pair's sparse matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactRecord {
    pub bin_x: u32,
    pub bin_y: u32,
    pub count: f32,
}

impl ContactRecord {
    pub fn new(bin_x: u32, bin_y: u32, count: f32) -> Self {
        Self {
            bin_x,
            bin_y,
            count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    BasePair,
    Fragment,
}

/// Selects one sparse matrix view per chromosome pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Zoom {
    pub unit: Unit,
    pub resolution: u32,
}

impl Zoom {
    pub fn bp(resolution: u32) -> Self {
        Self {
            unit: Unit::BasePair,
            resolution,
        }
    }
}

impl fmt::Display for Zoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::BasePair => write!(f, "BP_{}", self.resolution),
            Unit::Fragment => write!(f, "FRAG_{}", self.resolution),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizationType {
    None,
    Vc,
    VcSqrt,
    Kr,
    Scale,
}

impl NormalizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Vc => "VC",
            Self::VcSqrt => "VC_SQRT",
            Self::Kr => "KR",
            Self::Scale => "SCALE",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for NormalizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = match s.to_ascii_uppercase().as_str() {
            "NONE" => Self::None,
            "VC" => Self::Vc,
            "VC_SQRT" => Self::VcSqrt,
            "KR" => Self::Kr,
            "SCALE" => Self::Scale,
            other => bail!(
                "Unknown normalization type: {}. Expected one of NONE, VC, VC_SQRT, KR, SCALE",
                other
            ),
        };
        Ok(norm)
    }
}

/// Per-bin bias values for one chromosome at one resolution
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationVector {
    pub norm: NormalizationType,
    pub chrom_index: usize,
    pub resolution: u32,
    pub values: Vec<f64>,
}

impl NormalizationVector {
    pub fn new(
        norm: NormalizationType,
        chrom_index: usize,
        resolution: u32,
        values: Vec<f64>,
    ) -> Self {
        Self {
            norm,
            chrom_index,
            resolution,
            values,
        }
    }

    /// Bias at `bin`, None when out of range or not a usable value
    #[inline]
    pub fn get(&self, bin: i64) -> Option<f64> {
        let idx = usize::try_from(bin).ok()?;
        self.values.get(idx).copied().filter(|v| v.is_finite())
    }

    /// `len` values starting at `start`; bins outside the vector or without a finite bias read as 0
    pub fn window_slice(&self, start: i64, len: usize) -> impl Iterator<Item = f64> + '_ {
        (0..len as i64).map(move |offset| self.get(start + offset).unwrap_or(0.0))
    }
}
