//! Shuffled-variant background and empirical p-values

use crate::scoring::{EffectScores, Statistic};
use crate::Variant;
use rand::seq::SliceRandom;
use rand::Rng;

/// Which tail of the background counts as extreme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    Left,
    Right,
    Both,
}

/// A background draw: a resampled variant plus the seed that shuffles its context
#[derive(Debug, Clone, PartialEq)]
pub struct ShuffledVariant {
    pub variant: Variant,
    pub seed: u64,
}

/// Number of background draws. `total_shuf` wins over `num_shuf` per variant.
pub fn shuffle_draw_count(
    n_variants: usize,
    total_shuf: Option<usize>,
    num_shuf: Option<usize>,
) -> usize {
    match (total_shuf, num_shuf) {
        (Some(total), _) => total,
        (None, Some(per_variant)) => n_variants * per_variant,
        (None, None) => 0,
    }
}

/// Resample the variant table with replacement and attach a distinct seed to each draw.
///
/// Seeds are a random permutation of `0..draws`.
pub fn create_shuffle_table<R: Rng + ?Sized>(
    variants: &[Variant],
    total_shuf: Option<usize>,
    num_shuf: Option<usize>,
    rng: &mut R,
) -> Vec<ShuffledVariant> {
    if variants.is_empty() {
        return Vec::new();
    }
    let draws = shuffle_draw_count(variants.len(), total_shuf, num_shuf);

    let sampled: Vec<&Variant> = (0..draws)
        .map(|_| &variants[rng.gen_range(0..variants.len())])
        .collect();
    let mut seeds: Vec<u64> = (0..draws as u64).collect();
    seeds.shuffle(rng);

    sampled
        .into_iter()
        .zip(seeds)
        .map(|(variant, seed)| ShuffledVariant {
            variant: variant.clone(),
            seed,
        })
        .collect()
}

/// Sorted background sample for rank-based p-values
#[derive(Debug, Clone, Default)]
pub struct EmpiricalDistribution {
    sorted: Vec<f64>,
    /// NaN values rank above every observation
    nan_count: usize,
}

impl EmpiricalDistribution {
    pub fn new(values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        sorted.sort_by(f64::total_cmp);
        let nan_count = values.len() - sorted.len();
        EmpiricalDistribution { sorted, nan_count }
    }

    pub fn len(&self) -> usize {
        self.sorted.len() + self.nan_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add-one smoothed empirical p-value of `observed`.
    ///
    /// Right tail ranks background values `>= observed`, left tail values
    /// `<= observed`; the two-tailed value doubles the smaller one, capped at 1.
    /// NaN for a NaN observation or an empty background.
    pub fn pvalue(&self, observed: f64, tail: Tail) -> f64 {
        if observed.is_nan() || self.is_empty() {
            return f64::NAN;
        }
        let denom = (self.len() + 1) as f64;
        let right = || {
            let rank = self.sorted.len() - self.sorted.partition_point(|&v| v < observed)
                + self.nan_count;
            (rank + 1) as f64 / denom
        };
        let left = || {
            let rank = self.sorted.partition_point(|&v| v <= observed);
            (rank + 1) as f64 / denom
        };
        match tail {
            Tail::Right => right(),
            Tail::Left => left(),
            Tail::Both => (2.0 * left().min(right())).min(1.0),
        }
    }
}

/// P-value of every observation against one background sample
pub fn empirical_pvalues(observed: &[f64], background: &[f64], tail: Tail) -> Vec<f64> {
    let distribution = EmpiricalDistribution::new(background);
    observed
        .iter()
        .map(|&x| distribution.pvalue(x, tail))
        .collect()
}

/// Background values of one statistic
#[derive(Debug, Clone)]
pub struct StatisticBackground {
    pub statistic: Statistic,
    pub values: Vec<f64>,
    distribution: EmpiricalDistribution,
}

/// Null distributions built from the scored shuffled variants
#[derive(Debug, Clone)]
pub struct NullBackground {
    pub allele1_counts: Vec<f64>,
    pub allele2_counts: Vec<f64>,
    statistics: Vec<StatisticBackground>,
}

impl NullBackground {
    /// Build one background per statistic available in `scores`
    pub fn from_scores(scores: &[EffectScores], with_peaks: bool) -> Self {
        let statistics = Statistic::active(with_peaks)
            .map(|statistic| {
                let values: Vec<f64> = scores
                    .iter()
                    .map(|s| s.statistic(statistic).unwrap_or(f64::NAN))
                    .collect();
                let distribution = EmpiricalDistribution::new(&values);
                StatisticBackground {
                    statistic,
                    values,
                    distribution,
                }
            })
            .collect();

        NullBackground {
            allele1_counts: scores.iter().map(|s| s.allele1_count).collect(),
            allele2_counts: scores.iter().map(|s| s.allele2_count).collect(),
            statistics,
        }
    }

    /// Number of shuffled draws
    pub fn len(&self) -> usize {
        self.allele1_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allele1_counts.is_empty()
    }

    pub fn statistics(&self) -> &[StatisticBackground] {
        &self.statistics
    }

    pub fn values(&self, statistic: Statistic) -> Option<&[f64]> {
        self.statistics
            .iter()
            .find(|s| s.statistic == statistic)
            .map(|s| s.values.as_slice())
    }

    /// P-values of every background statistic for one observed variant
    pub fn pvalues(&self, scores: &EffectScores) -> Vec<(Statistic, f64)> {
        self.statistics
            .iter()
            .map(|bg| {
                let observed = scores.statistic(bg.statistic).unwrap_or(f64::NAN);
                (
                    bg.statistic,
                    bg.distribution.pvalue(observed, bg.statistic.tail()),
                )
            })
            .collect()
    }
}
