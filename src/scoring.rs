//! Effect statistics computed from paired allele predictions

use crate::background::Tail;
use crate::predict::Prediction;
use crate::Variant;

/// `log2(allele2 / allele1)`, NaN when either count is not a positive finite number
pub fn log_fold_change(allele1_count: f64, allele2_count: f64) -> f64 {
    let valid = |c: f64| c.is_finite() && c > 0.0;
    if !valid(allele1_count) || !valid(allele2_count) {
        return f64::NAN;
    }
    (allele2_count / allele1_count).log2()
}

fn rel_entr(x: f64, y: f64) -> f64 {
    if x > 0.0 && y > 0.0 {
        x * (x / y).ln()
    } else if x == 0.0 && y >= 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Jensen-Shannon distance with natural-log divergence.
///
/// Both inputs are normalized to sum to one first. Returns NaN for vectors of
/// different lengths or with a non-positive sum.
pub fn jensen_shannon_distance<T: Copy + Into<f64>>(p: &[T], q: &[T]) -> f64 {
    if p.len() != q.len() {
        return f64::NAN;
    }
    let p_sum: f64 = p.iter().map(|&v| v.into()).sum();
    let q_sum: f64 = q.iter().map(|&v| v.into()).sum();
    if !(p_sum > 0.0 && q_sum > 0.0) {
        return f64::NAN;
    }

    let divergence: f64 = p
        .iter()
        .zip(q)
        .map(|(&a, &b)| {
            let a = a.into() / p_sum;
            let b = b.into() / q_sum;
            let m = (a + b) / 2.0;
            rel_entr(a, m) + rel_entr(b, m)
        })
        .sum::<f64>()
        / 2.0;

    divergence.max(0.0).sqrt()
}

fn span<T>(values: &[T], start: usize, end: usize) -> &[T] {
    let start = start.min(values.len());
    let end = end.min(values.len()).max(start);
    &values[start..end]
}

fn renormalize(values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.into_iter().map(|v| v / total).collect()
    } else {
        values
    }
}

/// Realign allele profiles of an indel so the replaced segments line up.
///
/// Each profile keeps its left half. On the right, the longer allele's extra
/// positions are cut out of its profile, while the shorter allele's profile
/// is truncated by the length difference. Both results have length
/// `n - |len1 - len2|` and are renormalized to sum to one. `None` when the
/// profiles differ in length.
pub fn adjust_indel_profiles(
    profile1: &[f32],
    profile2: &[f32],
    allele1_len: usize,
    allele2_len: usize,
) -> Option<(Vec<f64>, Vec<f64>)> {
    if profile1.len() != profile2.len() {
        return None;
    }
    let n = profile1.len();
    let flank = n / 2;
    let diff = allele1_len.abs_diff(allele2_len);
    let tail_end = n.saturating_sub(diff);

    let (right1, right2): (Vec<f32>, Vec<f32>) = if allele1_len > allele2_len {
        let mut right1 = span(profile1, flank, flank + allele2_len).to_vec();
        right1.extend_from_slice(span(profile1, flank + allele1_len, n));
        (right1, span(profile2, flank, tail_end).to_vec())
    } else {
        let mut right2 = span(profile2, flank, flank + allele1_len).to_vec();
        right2.extend_from_slice(span(profile2, flank + allele2_len, n));
        (span(profile1, flank, tail_end).to_vec(), right2)
    };

    let splice = |profile: &[f32], right: Vec<f32>| {
        let values = profile[..flank]
            .iter()
            .chain(right.iter())
            .map(|&v| f64::from(v))
            .collect();
        renormalize(values)
    };
    let adjusted1 = splice(profile1, right1);
    let adjusted2 = splice(profile2, right2);

    if adjusted1.len() != adjusted2.len() {
        return None;
    }
    Some((adjusted1, adjusted2))
}

/// Distance used for the `jsd` column: realigned for indels, raw otherwise
pub fn variant_distance(variant: &Variant, profile1: &[f32], profile2: &[f32]) -> f64 {
    if !variant.is_indel() {
        return jensen_shannon_distance(profile1, profile2);
    }
    match adjust_indel_profiles(
        profile1,
        profile2,
        variant.allele1_bases().len(),
        variant.allele2_bases().len(),
    ) {
        Some((adjusted1, adjusted2)) => jensen_shannon_distance(&adjusted1, &adjusted2),
        None => f64::NAN,
    }
}

/// Peak-relative percentile of each allele's predicted count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllelePercentiles {
    pub allele1: f64,
    pub allele2: f64,
}

impl AllelePercentiles {
    pub fn max(&self) -> f64 {
        self.allele1.max(self.allele2)
    }

    pub fn change(&self) -> f64 {
        self.allele2 - self.allele1
    }
}

/// Per-variant effect statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EffectScores {
    pub allele1_count: f64,
    pub allele2_count: f64,
    pub logfc: f64,
    /// Indel-adjusted distance
    pub jsd: f64,
    /// Distance between the unadjusted profiles
    pub original_jsd: f64,
    pub percentiles: Option<AllelePercentiles>,
}

impl EffectScores {
    pub fn from_predictions(variant: &Variant, allele1: &Prediction, allele2: &Prediction) -> Self {
        EffectScores {
            allele1_count: allele1.count,
            allele2_count: allele2.count,
            logfc: log_fold_change(allele1.count, allele2.count),
            jsd: variant_distance(variant, &allele1.profile, &allele2.profile),
            original_jsd: jensen_shannon_distance(&allele1.profile, &allele2.profile),
            percentiles: None,
        }
    }

    pub fn with_percentiles(mut self, percentiles: AllelePercentiles) -> Self {
        self.percentiles = Some(percentiles);
        self
    }

    /// Value of `stat`, or `None` when it needs percentiles that were not computed
    pub fn statistic(&self, stat: Statistic) -> Option<f64> {
        let abs_logfc = self.logfc.abs();
        let max = || self.percentiles.map(|p| p.max());
        let value = match stat {
            Statistic::Logfc => self.logfc,
            Statistic::AbsLogfc => abs_logfc,
            Statistic::Jsd => self.jsd,
            Statistic::LogfcXJsd => self.logfc * self.jsd,
            Statistic::AbsLogfcXJsd => abs_logfc * self.jsd,
            Statistic::MaxPercentile => max()?,
            Statistic::PercentileChange => self.percentiles?.change(),
            Statistic::AbsPercentileChange => self.percentiles?.change().abs(),
            Statistic::LogfcXMaxPercentile => self.logfc * max()?,
            Statistic::AbsLogfcXMaxPercentile => abs_logfc * max()?,
            Statistic::JsdXMaxPercentile => self.jsd * max()?,
            Statistic::LogfcXJsdXMaxPercentile => self.logfc * self.jsd * max()?,
            Statistic::AbsLogfcXJsdXMaxPercentile => abs_logfc * self.jsd * max()?,
        };
        Some(value)
    }
}

/// Statistics that receive an empirical p-value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Logfc,
    AbsLogfc,
    Jsd,
    LogfcXJsd,
    AbsLogfcXJsd,
    MaxPercentile,
    PercentileChange,
    AbsPercentileChange,
    LogfcXMaxPercentile,
    AbsLogfcXMaxPercentile,
    JsdXMaxPercentile,
    LogfcXJsdXMaxPercentile,
    AbsLogfcXJsdXMaxPercentile,
}

impl Statistic {
    pub const ALL: [Statistic; 13] = [
        Statistic::Logfc,
        Statistic::AbsLogfc,
        Statistic::Jsd,
        Statistic::LogfcXJsd,
        Statistic::AbsLogfcXJsd,
        Statistic::MaxPercentile,
        Statistic::PercentileChange,
        Statistic::AbsPercentileChange,
        Statistic::LogfcXMaxPercentile,
        Statistic::AbsLogfcXMaxPercentile,
        Statistic::JsdXMaxPercentile,
        Statistic::LogfcXJsdXMaxPercentile,
        Statistic::AbsLogfcXJsdXMaxPercentile,
    ];

    /// Statistics available for a run with or without peak percentiles
    pub fn active(with_peaks: bool) -> impl Iterator<Item = Statistic> {
        Self::ALL
            .into_iter()
            .filter(move |s| with_peaks || !s.requires_peaks())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Statistic::Logfc => "logfc",
            Statistic::AbsLogfc => "abs_logfc",
            Statistic::Jsd => "jsd",
            Statistic::LogfcXJsd => "logfc_x_jsd",
            Statistic::AbsLogfcXJsd => "abs_logfc_x_jsd",
            Statistic::MaxPercentile => "max_percentile",
            Statistic::PercentileChange => "percentile_change",
            Statistic::AbsPercentileChange => "abs_percentile_change",
            Statistic::LogfcXMaxPercentile => "logfc_x_max_percentile",
            Statistic::AbsLogfcXMaxPercentile => "abs_logfc_x_max_percentile",
            Statistic::JsdXMaxPercentile => "jsd_x_max_percentile",
            Statistic::LogfcXJsdXMaxPercentile => "logfc_x_jsd_x_max_percentile",
            Statistic::AbsLogfcXJsdXMaxPercentile => "abs_logfc_x_jsd_x_max_percentile",
        }
    }

    /// Signed statistics are tested on both tails
    pub fn tail(&self) -> Tail {
        match self {
            Statistic::Logfc
            | Statistic::LogfcXJsd
            | Statistic::PercentileChange
            | Statistic::LogfcXMaxPercentile
            | Statistic::LogfcXJsdXMaxPercentile => Tail::Both,
            _ => Tail::Right,
        }
    }

    pub fn requires_peaks(&self) -> bool {
        !matches!(
            self,
            Statistic::Logfc
                | Statistic::AbsLogfc
                | Statistic::Jsd
                | Statistic::LogfcXJsd
                | Statistic::AbsLogfcXJsd
        )
    }
}
