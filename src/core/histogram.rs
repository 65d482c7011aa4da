//! Classification of validation outputs into fixed or equal-width classes.

use crate::types::Parameter;

/// Half-width used when all values of an equal-width histogram coincide
pub const DEGENERATE_HALF_WIDTH: f64 = 0.5;

/// One class `[lower, upper)`, or `[lower, upper]` when `upper_inclusive`
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    pub upper_inclusive: bool,
    pub count: usize,
}

impl Bin {
    fn new(label: impl Into<String>, lower: f64, upper: f64, upper_inclusive: bool) -> Self {
        Self {
            label: label.into(),
            lower,
            upper,
            upper_inclusive,
            count: 0,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && (value < self.upper || (self.upper_inclusive && value == self.upper))
    }
}

/// Ordered, non-overlapping classes with their counts
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub title: String,
    pub bins: Vec<Bin>,
}

impl Histogram {
    fn fill(title: &str, mut bins: Vec<Bin>, values: &[f64]) -> Self {
        for &v in values.iter().filter(|v| !v.is_nan()) {
            if let Some(bin) = bins.iter_mut().find(|b| b.contains(v)) {
                bin.count += 1;
            }
        }
        Self {
            title: title.to_string(),
            bins,
        }
    }

    pub fn total(&self) -> usize {
        self.bins.iter().map(|b| b.count).sum()
    }

    /// Share of each class in percent (zeros for an empty histogram)
    pub fn percentages(&self) -> Vec<f64> {
        let total = self.total();
        self.bins
            .iter()
            .map(|b| {
                if total == 0 {
                    0.0
                } else {
                    b.count as f64 / total as f64 * 100.0
                }
            })
            .collect()
    }

    pub fn counts(&self) -> Vec<usize> {
        self.bins.iter().map(|b| b.count).collect()
    }
}

/// Relative differences (percent) in the bands `<10, 10~30, 30~50, 50~100, >100`
pub fn relative_difference_classes(diffs: &[f64]) -> Histogram {
    let bins = vec![
        Bin::new("<10%", f64::NEG_INFINITY, 10.0, false),
        Bin::new("10~30%", 10.0, 30.0, false),
        Bin::new("30~50%", 30.0, 50.0, false),
        Bin::new("50~100%", 50.0, 100.0, false),
        Bin::new(">100%", 100.0, f64::INFINITY, false),
    ];
    Histogram::fill("difference", bins, diffs)
}

/// `count` equal-width bins spanning `[min, max]` of the finite values.
///
/// When every value is the same the range is widened to
/// `[v - 0.5, v + 0.5]`; with no finite values the histogram has no bins.
pub fn equal_width_classes(values: &[f64], count: usize) -> Histogram {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || count == 0 {
        return Histogram {
            title: "difference".to_string(),
            bins: Vec::new(),
        };
    }

    let mut lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo == hi {
        lo -= DEGENERATE_HALF_WIDTH;
        hi += DEGENERATE_HALF_WIDTH;
    }

    let width = (hi - lo) / count as f64;
    let bins = (0..count)
        .map(|i| {
            let lower = lo + width * i as f64;
            let last = i + 1 == count;
            let upper = if last { hi } else { lo + width * (i + 1) as f64 };
            Bin::new(format!("{:.2}~{:.2}", lower, upper), lower, upper, last)
        })
        .collect();
    Histogram::fill("difference", bins, &finite)
}

/// Difference classes appropriate for the product's metric
pub fn difference_classes(parameter: Parameter, diffs: &[f64]) -> Histogram {
    if parameter.is_temperature_like() {
        equal_width_classes(diffs, 5)
    } else {
        relative_difference_classes(diffs)
    }
}

/// Time deltas (hours): `<0.5h, 0.5~1h, 1~1.5h, 1.5~3h, >3h`
pub fn time_delta_classes(hours: &[f64]) -> Histogram {
    let bins = vec![
        Bin::new("<0.5h", f64::NEG_INFINITY, 0.5, false),
        Bin::new("0.5~1h", 0.5, 1.0, false),
        Bin::new("1~1.5h", 1.0, 1.5, false),
        Bin::new("1.5~3h", 1.5, 3.0, false),
        Bin::new(">3h", 3.0, f64::INFINITY, false),
    ];
    Histogram::fill("time difference", bins, hours)
}

/// Window valid ratios: `=1, 0.9~1, 0.8~0.9, 0.6~0.8, <0.6`
pub fn valid_ratio_classes(ratios: &[f64]) -> Histogram {
    let bins = vec![
        Bin::new("=1", 1.0, 1.0, true),
        Bin::new("0.9~1", 0.9, 1.0, false),
        Bin::new("0.8~0.9", 0.8, 0.9, false),
        Bin::new("0.6~0.8", 0.6, 0.8, false),
        Bin::new("<0.6", f64::NEG_INFINITY, 0.6, false),
    ];
    Histogram::fill("valid ratio", bins, ratios)
}

/// Window coefficients of variation: `<0.05, 0.05~0.1, >0.1`
pub fn cv_classes(cvs: &[f64]) -> Histogram {
    let bins = vec![
        Bin::new("<0.05", f64::NEG_INFINITY, 0.05, false),
        Bin::new("0.05~0.1", 0.05, 0.1, false),
        Bin::new(">0.1", 0.1, f64::INFINITY, false),
    ];
    Histogram::fill("cv", bins, cvs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_bands() {
        let h = relative_difference_classes(&[5.0, 10.0, 29.9, 45.0, 99.0, 100.0, 250.0, f64::NAN]);
        assert_eq!(h.counts(), vec![1, 2, 1, 1, 2]);
        assert_eq!(h.total(), 7);
    }

    #[test]
    fn test_degenerate_equal_width() {
        let h = equal_width_classes(&[1.5, 1.5, 1.5], 5);
        assert_eq!(h.bins.len(), 5);
        assert_eq!(h.bins[0].lower, 1.0);
        assert_eq!(h.bins[4].upper, 2.0);
        for pair in h.bins.windows(2) {
            assert!(pair[0].upper > pair[0].lower);
            assert_eq!(pair[0].upper, pair[1].lower);
        }
        assert_eq!(h.counts(), vec![0, 0, 3, 0, 0]);
    }

    #[test]
    fn test_equal_width_includes_maximum() {
        let h = equal_width_classes(&[0.0, 1.0, 2.5, 5.0], 5);
        assert_eq!(h.counts(), vec![1, 1, 1, 0, 1]);
        assert!(equal_width_classes(&[], 5).bins.is_empty());
    }

    #[test]
    fn test_window_classes() {
        // upper edges are exclusive: 3 h and CV 0.1 fall in the open-ended classes
        assert_eq!(
            time_delta_classes(&[0.2, 0.5, 1.2, 2.9, 3.0, 3.5]).counts(),
            vec![1, 1, 1, 1, 2]
        );
        assert_eq!(valid_ratio_classes(&[1.0, 0.95, 7.0 / 9.0, 0.3]).counts(), vec![1, 1, 0, 1, 1]);
        assert_eq!(cv_classes(&[0.01, 0.05, 0.1, 0.2]).counts(), vec![1, 1, 2]);
        assert_eq!(difference_classes(Parameter::Sst, &[0.1, 0.2]).bins.len(), 5);
    }
}
