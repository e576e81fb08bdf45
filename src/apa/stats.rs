use ndarray::{s, Array2, ArrayView2};

/// Enrichment of the center cell of an aggregate matrix over its background.
///
/// Corners are `q`×`q` blocks: upper-left and upper-right share the first rows, lower-left
/// and lower-right the last rows. Ratios with an empty or zero background are NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApaMeasures {
    pub peak2mean: f64,
    pub peak2ul: f64,
    pub peak2ur: f64,
    pub peak2ll: f64,
    pub peak2lr: f64,
    pub zscore_ll: f64,
}

impl ApaMeasures {
    pub const NAMES: [&'static str; 6] = [
        "peak2mean",
        "peak2UL",
        "peak2UR",
        "peak2LL",
        "peak2LR",
        "ZscoreLL",
    ];

    /// Measures of a square matrix with odd width. `corner_width` is clamped to `1..=width/2`.
    pub fn compute(matrix: &Array2<f64>, corner_width: usize) -> Self {
        let width = matrix.nrows();
        if width == 0 || matrix.ncols() != width {
            return Self::undefined();
        }
        let half = width / 2;
        let center = matrix[[half, half]];

        let others = (width * width - 1) as f64;
        let peak2mean = ratio(center, (matrix.sum() - center) / others);
        if half == 0 {
            return Self {
                peak2mean,
                ..Self::undefined()
            };
        }

        let q = corner_width.clamp(1, half);
        let far = width - q;
        let ul = matrix.slice(s![..q, ..q]);
        let ur = matrix.slice(s![..q, far..]);
        let ll = matrix.slice(s![far.., ..q]);
        let lr = matrix.slice(s![far.., far..]);

        Self {
            peak2mean,
            peak2ul: ratio(center, mean(&ul)),
            peak2ur: ratio(center, mean(&ur)),
            peak2ll: ratio(center, mean(&ll)),
            peak2lr: ratio(center, mean(&lr)),
            zscore_ll: zscore(center, &ll),
        }
    }

    fn undefined() -> Self {
        Self {
            peak2mean: f64::NAN,
            peak2ul: f64::NAN,
            peak2ur: f64::NAN,
            peak2ll: f64::NAN,
            peak2lr: f64::NAN,
            zscore_ll: f64::NAN,
        }
    }

    pub fn values(&self) -> [f64; 6] {
        [
            self.peak2mean,
            self.peak2ul,
            self.peak2ur,
            self.peak2ll,
            self.peak2lr,
            self.zscore_ll,
        ]
    }
}

fn ratio(value: f64, background: f64) -> f64 {
    if background > 0.0 {
        value / background
    } else {
        f64::NAN
    }
}

fn mean(view: &ArrayView2<f64>) -> f64 {
    view.mean().unwrap_or(f64::NAN)
}

/// Sample standard deviation (n - 1)
fn zscore(value: f64, view: &ArrayView2<f64>) -> f64 {
    let n = view.len();
    if n < 2 {
        return f64::NAN;
    }
    let std = view.std(1.0);
    if std > 0.0 {
        (value - mean(view)) / std
    } else {
        f64::NAN
    }
}
