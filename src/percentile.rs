//! Peak-relative percentile scoring

use crate::scoring::AllelePercentiles;
use crate::{VarscoreError, VarscoreResult};

/// Predicted counts at reference peaks, sorted for rank lookups
#[derive(Debug, Clone)]
pub struct PeakPercentiles {
    sorted: Vec<f64>,
    /// NaN counts still count toward the denominator
    nan_count: usize,
}

impl PeakPercentiles {
    pub fn new(counts: Vec<f64>) -> VarscoreResult<Self> {
        if counts.is_empty() {
            return Err(VarscoreError::InvalidPeak(
                "no valid peaks left to build a percentile background".to_string(),
            ));
        }
        let (mut sorted, nans): (Vec<f64>, Vec<f64>) = counts.into_iter().partition(|c| !c.is_nan());
        sorted.sort_by(f64::total_cmp);
        Ok(PeakPercentiles {
            sorted,
            nan_count: nans.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.sorted.len() + self.nan_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of peaks strictly below `count`, floored at `1 / n`
    pub fn percentile(&self, count: f64) -> f64 {
        let n = self.len() as f64;
        let below = self.sorted.partition_point(|&v| v < count) as f64;
        (below / n).max(1.0 / n)
    }

    pub fn score(&self, allele1_count: f64, allele2_count: f64) -> AllelePercentiles {
        AllelePercentiles {
            allele1: self.percentile(allele1_count),
            allele2: self.percentile(allele2_count),
        }
    }
}
