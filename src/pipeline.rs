//! End-to-end scoring: windows, predictions, statistics and significance

use crate::background::{create_shuffle_table, NullBackground, ShuffledVariant};
use crate::genome::SequenceSource;
use crate::percentile::PeakPercentiles;
use crate::predict::{Prediction, PredictionAggregator, Predictor};
use crate::scoring::{EffectScores, Statistic};
use crate::table::dedup_peaks;
use crate::utils::Timer;
use crate::window::{filter_valid_peaks, filter_valid_variants, OneHotWindow, WindowEncoder};
use crate::{ChromSizes, Peak, ScoringConfig, Variant, VarscoreError, VarscoreResult};
use rand::seq::SliceRandom;
use rand::Rng;

/// Reject configurations that cannot produce a run
pub fn validate_config(config: &ScoringConfig) -> VarscoreResult<()> {
    if config.batch_size == 0 {
        return Err(VarscoreError::InvalidConfig(
            "batch size must be greater than 0".to_string(),
        ));
    }
    if config.threads == 0 {
        return Err(VarscoreError::InvalidConfig(
            "thread count must be greater than 0".to_string(),
        ));
    }
    if config.total_shuf == Some(0) {
        return Err(VarscoreError::InvalidConfig(
            "total shuffle count must be greater than 0 when given".to_string(),
        ));
    }
    if config.max_peaks == Some(0) {
        return Err(VarscoreError::InvalidConfig(
            "max peaks must be greater than 0 when given".to_string(),
        ));
    }
    Ok(())
}

/// Reference peaks and the genome they are read from
pub struct PeakInputs<'a> {
    pub peaks: Vec<Peak>,
    pub chrom_sizes: &'a ChromSizes,
    pub genome: &'a dyn SequenceSource,
}

pub struct ScoringInputs<'a> {
    pub variants: Vec<Variant>,
    pub chrom_sizes: &'a ChromSizes,
    pub genome: &'a dyn SequenceSource,
    pub peaks: Option<PeakInputs<'a>>,
}

/// Observed predictions for both alleles of one variant
#[derive(Debug, Clone)]
pub struct AllelePrediction {
    pub variant_id: String,
    pub allele1: Prediction,
    pub allele2: Prediction,
}

/// One output row
#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub variant: Variant,
    pub scores: EffectScores,
    /// Empty when no background was drawn
    pub pvalues: Vec<(Statistic, f64)>,
}

impl ScoreRecord {
    pub fn pvalue(&self, statistic: Statistic) -> Option<f64> {
        self.pvalues
            .iter()
            .find(|(s, _)| *s == statistic)
            .map(|(_, p)| *p)
    }
}

#[derive(Debug)]
pub struct ScoringRun {
    pub records: Vec<ScoreRecord>,
    /// Same order as `records`
    pub observed: Vec<AllelePrediction>,
    pub background: Option<NullBackground>,
    pub has_peaks: bool,
}

struct PairBatch<'v> {
    variants: Vec<&'v Variant>,
    allele1: Vec<OneHotWindow>,
    allele2: Vec<OneHotWindow>,
}

/// Fail unless predictions line up one-to-one with the variant table
pub fn check_identity(variants: &[Variant], observed: &[AllelePrediction]) -> VarscoreResult<()> {
    if variants.len() != observed.len() {
        return Err(VarscoreError::Consistency(format!(
            "{} variants but {} predictions",
            variants.len(),
            observed.len()
        )));
    }
    for (i, (variant, prediction)) in variants.iter().zip(observed).enumerate() {
        if variant.variant_id != prediction.variant_id {
            return Err(VarscoreError::Consistency(format!(
                "row {}: expected variant '{}' but prediction is for '{}'",
                i, variant.variant_id, prediction.variant_id
            )));
        }
    }
    Ok(())
}

/// Drop duplicate and out-of-bounds peaks, then subsample down to `max_peaks`
pub fn prepare_peaks<R: Rng + ?Sized>(
    peaks: Vec<Peak>,
    chrom_sizes: &ChromSizes,
    input_len: usize,
    max_peaks: Option<usize>,
    rng: &mut R,
) -> Vec<Peak> {
    let peaks = filter_valid_peaks(dedup_peaks(peaks), input_len, chrom_sizes);
    log::info!("De-duplicated peak table: {} peaks", peaks.len());

    match max_peaks {
        Some(max) if peaks.len() > max => {
            let sampled: Vec<Peak> = peaks.choose_multiple(rng, max).cloned().collect();
            log::info!("Subsampled peak table: {} peaks", sampled.len());
            sampled
        }
        _ => peaks,
    }
}

/// Runs the scoring stages against one predictor
pub struct VariantScorer<'a> {
    predictor: &'a dyn Predictor,
    aggregator: PredictionAggregator,
    encoder: WindowEncoder,
    config: ScoringConfig,
}

impl<'a> VariantScorer<'a> {
    pub fn new(predictor: &'a dyn Predictor, config: ScoringConfig) -> VarscoreResult<Self> {
        validate_config(&config)?;
        Ok(VariantScorer {
            predictor,
            aggregator: PredictionAggregator::from_config(&config),
            encoder: WindowEncoder::new(predictor.input_len()),
            config,
        })
    }

    pub fn input_len(&self) -> usize {
        self.encoder.input_len()
    }

    fn predict_pairs<T, R>(
        &self,
        genome: &dyn SequenceSource,
        items: &[(&Variant, Option<u64>)],
        label: &str,
        reduce: R,
    ) -> VarscoreResult<Vec<T>>
    where
        T: Send,
        R: Fn(&Variant, Prediction, Prediction) -> T + Sync,
    {
        let encoder = self.encoder;
        let aggregator = &self.aggregator;
        let predictor = self.predictor;

        aggregator.run_batches(
            items.len(),
            label,
            |range| {
                let mut batch = PairBatch {
                    variants: Vec::with_capacity(range.len()),
                    allele1: Vec::with_capacity(range.len()),
                    allele2: Vec::with_capacity(range.len()),
                };
                for &(variant, seed) in &items[range] {
                    let (allele1, allele2) = encoder.allele_windows(genome, variant, seed)?;
                    batch.variants.push(variant);
                    batch.allele1.push(allele1);
                    batch.allele2.push(allele2);
                }
                Ok(batch)
            },
            |batch: &PairBatch| {
                let allele1 = aggregator.predict_windows(predictor, &batch.allele1)?;
                let allele2 = aggregator.predict_windows(predictor, &batch.allele2)?;
                Ok(batch
                    .variants
                    .iter()
                    .zip(allele1)
                    .zip(allele2)
                    .map(|((variant, a1), a2)| reduce(variant, a1, a2))
                    .collect())
            },
        )
    }

    /// Observed allele predictions, in input order
    pub fn predict_variants(
        &self,
        genome: &dyn SequenceSource,
        variants: &[Variant],
    ) -> VarscoreResult<Vec<AllelePrediction>> {
        let items: Vec<(&Variant, Option<u64>)> = variants.iter().map(|v| (v, None)).collect();
        self.predict_pairs(genome, &items, "Variant predictions", |variant, allele1, allele2| {
            AllelePrediction {
                variant_id: variant.variant_id.clone(),
                allele1,
                allele2,
            }
        })
    }

    /// Effect scores of the shuffled draws; profiles are dropped per batch
    pub fn score_shuffled(
        &self,
        genome: &dyn SequenceSource,
        shuffled: &[ShuffledVariant],
    ) -> VarscoreResult<Vec<EffectScores>> {
        let items: Vec<(&Variant, Option<u64>)> = shuffled
            .iter()
            .map(|s| (&s.variant, Some(s.seed)))
            .collect();
        self.predict_pairs(genome, &items, "Shuffled predictions", |variant, allele1, allele2| {
            EffectScores::from_predictions(variant, &allele1, &allele2)
        })
    }

    /// Predicted counts at each peak summit
    pub fn predict_peaks(
        &self,
        genome: &dyn SequenceSource,
        peaks: &[Peak],
    ) -> VarscoreResult<Vec<f64>> {
        let encoder = self.encoder;
        let aggregator = &self.aggregator;
        let predictor = self.predictor;

        aggregator.run_batches(
            peaks.len(),
            "Peak predictions",
            |range| {
                peaks[range]
                    .iter()
                    .map(|peak| encoder.peak_window(genome, peak))
                    .collect::<VarscoreResult<Vec<_>>>()
            },
            |windows: &Vec<OneHotWindow>| {
                Ok(aggregator
                    .predict_windows(predictor, windows)?
                    .into_iter()
                    .map(|p| p.count)
                    .collect())
            },
        )
    }

    /// Run every stage and assemble the scored records
    pub fn run<R: Rng + ?Sized>(
        &self,
        inputs: ScoringInputs<'_>,
        rng: &mut R,
    ) -> VarscoreResult<ScoringRun> {
        let input_len = self.input_len();
        let total = inputs.variants.len();
        let variants = filter_valid_variants(inputs.variants, input_len, inputs.chrom_sizes);
        log::info!("Final variants table: {} of {} variants valid", variants.len(), total);
        if variants.is_empty() {
            log::warn!("No variants fall inside their chromosome bounds");
        }

        let shuffled = create_shuffle_table(
            &variants,
            self.config.total_shuf,
            self.config.num_shuf,
            rng,
        );
        log::info!("Shuffled variants table: {} draws", shuffled.len());

        let mut shuffled_scores = if shuffled.is_empty() {
            Vec::new()
        } else {
            let _timer = Timer::new("Shuffled variant scoring");
            self.score_shuffled(inputs.genome, &shuffled)?
        };

        let percentiles = match inputs.peaks {
            Some(peak_inputs) => {
                let _timer = Timer::new("Peak scoring");
                let peaks = prepare_peaks(
                    peak_inputs.peaks,
                    peak_inputs.chrom_sizes,
                    input_len,
                    self.config.max_peaks,
                    rng,
                );
                let counts = self.predict_peaks(peak_inputs.genome, &peaks)?;
                let percentiles = PeakPercentiles::new(counts)?;
                for scores in shuffled_scores.iter_mut() {
                    scores.percentiles =
                        Some(percentiles.score(scores.allele1_count, scores.allele2_count));
                }
                Some(percentiles)
            }
            None => None,
        };

        let observed = {
            let _timer = Timer::new("Variant scoring");
            self.predict_variants(inputs.genome, &variants)?
        };
        check_identity(&variants, &observed)?;

        let has_peaks = percentiles.is_some();
        let background = if shuffled_scores.is_empty() {
            None
        } else {
            Some(NullBackground::from_scores(&shuffled_scores, has_peaks))
        };

        let records = variants
            .into_iter()
            .zip(observed.iter())
            .map(|(variant, prediction)| {
                let mut scores =
                    EffectScores::from_predictions(&variant, &prediction.allele1, &prediction.allele2);
                if let Some(peaks) = &percentiles {
                    scores.percentiles =
                        Some(peaks.score(scores.allele1_count, scores.allele2_count));
                }
                let pvalues = background
                    .as_ref()
                    .map(|bg| bg.pvalues(&scores))
                    .unwrap_or_default();
                ScoreRecord {
                    variant,
                    scores,
                    pvalues,
                }
            })
            .collect();

        Ok(ScoringRun {
            records,
            observed,
            background,
            has_peaks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::MemoryGenome;
    use crate::predict::RawBatch;
    use crate::CountTransform;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Counts track GC content; the profile peaks wherever there is a G
    struct GcPredictor {
        input_len: usize,
    }

    impl Predictor for GcPredictor {
        fn input_len(&self) -> usize {
            self.input_len
        }

        fn output_len(&self) -> usize {
            self.input_len
        }

        fn predict(&self, windows: &[OneHotWindow]) -> VarscoreResult<RawBatch> {
            let mut batch = RawBatch::default();
            for window in windows {
                batch
                    .profile_logits
                    .push(window.rows().iter().map(|r| 2.0 * r[2]).collect());
                let gc: f32 = window.rows().iter().map(|r| r[1] + r[2]).sum();
                batch.count_logits.push(gc / 4.0);
            }
            Ok(batch)
        }
    }

    fn genome() -> MemoryGenome {
        let mut genome = MemoryGenome::new();
        genome.insert("chr1", b"ACGTTAGCATGCAATTGGCCATGACGTAGCTAGTCAGTACGATCGTAGCATG");
        genome.insert("chr2", b"TTTTAAAATTTTAAAATTTTAAAATTTTAAAA");
        genome
    }

    fn variant(chrom: &str, pos: u64, a1: &str, a2: &str, id: &str) -> Variant {
        Variant::new(chrom.into(), pos, a1.into(), a2.into(), id.into())
    }

    fn variants() -> Vec<Variant> {
        vec![
            variant("chr1", 12, "A", "G", "snv1"),
            variant("chr1", 2, "C", "T", "edge"),
            variant("chr1", 25, "C", "GGG", "ins1"),
            variant("chr2", 15, "A", "C", "snv2"),
            variant("chr9", 15, "A", "C", "unknown"),
            variant("chr1", 30, "TAG", "-", "del1"),
        ]
    }

    fn config() -> ScoringConfig {
        ScoringConfig {
            batch_size: 2,
            num_shuf: Some(3),
            threads: 2,
            ..ScoringConfig::default()
        }
    }

    fn peaks() -> Vec<Peak> {
        let peak = |chrom: &str, start: u64, summit: u64, rank: f64| Peak {
            chrom: chrom.into(),
            start,
            end: start + 20,
            summit,
            rank,
        };
        vec![
            peak("chr1", 5, 10, 3.0),
            peak("chr1", 5, 10, 9.0),
            peak("chr1", 20, 5, 1.0),
            peak("chr2", 10, 4, 2.0),
            peak("chr1", 0, 1, 4.0),
        ]
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&ScoringConfig::default()).is_ok());
        // zero draws per variant turns the background off
        assert!(validate_config(&ScoringConfig { num_shuf: Some(0), ..ScoringConfig::default() }).is_ok());
        for bad in [
            ScoringConfig { batch_size: 0, ..ScoringConfig::default() },
            ScoringConfig { threads: 0, ..ScoringConfig::default() },
            ScoringConfig { total_shuf: Some(0), ..ScoringConfig::default() },
            ScoringConfig { max_peaks: Some(0), ..ScoringConfig::default() },
        ] {
            assert!(matches!(validate_config(&bad), Err(VarscoreError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_check_identity() {
        let vars = vec![variant("chr1", 12, "A", "G", "a"), variant("chr1", 13, "A", "G", "b")];
        let prediction = |id: &str| AllelePrediction {
            variant_id: id.into(),
            allele1: Prediction { count: 1.0, profile: vec![1.0] },
            allele2: Prediction { count: 1.0, profile: vec![1.0] },
        };
        assert!(check_identity(&vars, &[prediction("a"), prediction("b")]).is_ok());
        assert!(matches!(
            check_identity(&vars, &[prediction("b"), prediction("a")]),
            Err(VarscoreError::Consistency(_))
        ));
        assert!(matches!(
            check_identity(&vars, &[prediction("a")]),
            Err(VarscoreError::Consistency(_))
        ));
    }

    #[test]
    fn test_prepare_peaks() {
        let sizes = genome().chrom_sizes();
        let prepared = prepare_peaks(peaks(), &sizes, 10, None, &mut StdRng::seed_from_u64(1));
        // duplicate collapsed to the higher rank, edge peak dropped
        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[0].rank, 9.0);
        assert!(prepared.iter().all(|p| p.anchor() > 5));

        let sampled = prepare_peaks(peaks(), &sizes, 10, Some(2), &mut StdRng::seed_from_u64(1));
        assert_eq!(sampled.len(), 2);
    }

    #[test]
    fn test_predictions_follow_input_order() {
        let predictor = GcPredictor { input_len: 10 };
        let scorer = VariantScorer::new(&predictor, config()).unwrap();
        let genome = genome();
        let vars: Vec<Variant> = (12..20)
            .map(|pos| variant("chr1", pos, "A", "G", &format!("v{}", pos)))
            .collect();
        let observed = scorer.predict_variants(&genome, &vars).unwrap();
        assert!(check_identity(&vars, &observed).is_ok());
        // G adds GC content
        assert!(observed.iter().all(|o| o.allele2.count > o.allele1.count));
    }

    #[test]
    fn test_run_without_peaks() {
        let predictor = GcPredictor { input_len: 10 };
        let scorer = VariantScorer::new(&predictor, config()).unwrap();
        let genome = genome();
        let sizes = genome.chrom_sizes();
        let inputs = ScoringInputs {
            variants: variants(),
            chrom_sizes: &sizes,
            genome: &genome,
            peaks: None,
        };
        let run = scorer.run(inputs, &mut StdRng::seed_from_u64(1234)).unwrap();

        let ids: Vec<&str> = run.records.iter().map(|r| r.variant.variant_id.as_str()).collect();
        assert_eq!(ids, vec!["snv1", "ins1", "snv2", "del1"]);
        assert!(!run.has_peaks);

        let background = run.background.as_ref().unwrap();
        assert_eq!(background.len(), 12);
        assert_eq!(background.statistics().len(), 5);

        for record in &run.records {
            assert_eq!(record.pvalues.len(), 5);
            for (_, p) in &record.pvalues {
                assert!(p.is_nan() || (*p > 0.0 && *p <= 1.0));
            }
            assert!(record.scores.percentiles.is_none());
        }

        let snv = &run.records[0];
        assert!(snv.scores.logfc > 0.0);
        assert_eq!(snv.scores.jsd, snv.scores.original_jsd);
    }

    #[test]
    fn test_run_is_reproducible() {
        let predictor = GcPredictor { input_len: 10 };
        let scorer = VariantScorer::new(&predictor, config()).unwrap();
        let genome = genome();
        let sizes = genome.chrom_sizes();
        let run = |seed: u64| {
            let inputs = ScoringInputs {
                variants: variants(),
                chrom_sizes: &sizes,
                genome: &genome,
                peaks: None,
            };
            scorer.run(inputs, &mut StdRng::seed_from_u64(seed)).unwrap()
        };
        let a = run(7);
        let b = run(7);
        let bg_a = a.background.unwrap();
        let bg_b = b.background.unwrap();
        assert_eq!(bg_a.allele1_counts, bg_b.allele1_counts);
        assert_eq!(bg_a.allele2_counts, bg_b.allele2_counts);
    }

    #[test]
    fn test_run_with_peaks_and_no_background() {
        let predictor = GcPredictor { input_len: 10 };
        let config = ScoringConfig {
            num_shuf: None,
            forward_only: true,
            count_transform: CountTransform::ExpM1,
            ..config()
        };
        let scorer = VariantScorer::new(&predictor, config).unwrap();
        let genome = genome();
        let sizes = genome.chrom_sizes();
        let inputs = ScoringInputs {
            variants: variants(),
            chrom_sizes: &sizes,
            genome: &genome,
            peaks: Some(PeakInputs {
                peaks: peaks(),
                chrom_sizes: &sizes,
                genome: &genome,
            }),
        };
        let run = scorer.run(inputs, &mut StdRng::seed_from_u64(1)).unwrap();

        assert!(run.background.is_none());
        assert!(run.has_peaks);
        for record in &run.records {
            assert!(record.pvalues.is_empty());
            let pct = record.scores.percentiles.unwrap();
            assert!(pct.allele1 >= 1.0 / 3.0 && pct.allele1 <= 1.0);
            assert!(record.scores.statistic(Statistic::AbsLogfcXJsdXMaxPercentile).is_some());
        }
    }

    #[test]
    fn test_run_with_peaks_and_background() {
        let predictor = GcPredictor { input_len: 10 };
        let scorer = VariantScorer::new(&predictor, config()).unwrap();
        let genome = genome();
        let sizes = genome.chrom_sizes();
        let inputs = ScoringInputs {
            variants: variants(),
            chrom_sizes: &sizes,
            genome: &genome,
            peaks: Some(PeakInputs {
                peaks: peaks(),
                chrom_sizes: &sizes,
                genome: &genome,
            }),
        };
        let run = scorer.run(inputs, &mut StdRng::seed_from_u64(1)).unwrap();
        let background = run.background.as_ref().unwrap();
        assert_eq!(background.statistics().len(), 13);
        assert!(run.records.iter().all(|r| r.pvalues.len() == 13));
        assert!(run.records[0].pvalue(Statistic::MaxPercentile).is_some());
    }

    #[test]
    fn test_empty_peak_set_is_an_error() {
        let predictor = GcPredictor { input_len: 10 };
        let scorer = VariantScorer::new(&predictor, config()).unwrap();
        let genome = genome();
        let sizes = genome.chrom_sizes();
        let inputs = ScoringInputs {
            variants: variants(),
            chrom_sizes: &sizes,
            genome: &genome,
            peaks: Some(PeakInputs {
                peaks: Vec::new(),
                chrom_sizes: &sizes,
                genome: &genome,
            }),
        };
        assert!(matches!(
            scorer.run(inputs, &mut StdRng::seed_from_u64(1)),
            Err(VarscoreError::InvalidPeak(_))
        ));
    }
}
