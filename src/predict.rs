//! Model invocation: batching, calling conventions and strand averaging

use crate::utils::log_progress;
use crate::window::OneHotWindow;
use crate::{CountTransform, ScoringConfig, VarscoreError, VarscoreResult};
use rayon::prelude::*;
use std::ops::Range;

/// Raw model output for one batch
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    /// One row of `output_len` logits per window
    pub profile_logits: Vec<Vec<f32>>,
    /// One count logit per window
    pub count_logits: Vec<f32>,
}

/// Inputs accepted by a model
pub enum ModelInputs<'a> {
    Plain(&'a [OneHotWindow]),
    /// Windows plus auxiliary bias-model outputs
    BiasConditioned {
        windows: &'a [OneHotWindow],
        bias_profiles: &'a [Vec<f32>],
        bias_counts: &'a [f32],
    },
}

impl ModelInputs<'_> {
    pub fn windows(&self) -> &[OneHotWindow] {
        match self {
            ModelInputs::Plain(windows) => *windows,
            ModelInputs::BiasConditioned { windows, .. } => *windows,
        }
    }
}

/// A sequence-to-signal model
pub trait Model: Sync {
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;
    fn forward(&self, inputs: ModelInputs<'_>) -> VarscoreResult<RawBatch>;
}

/// The model as seen by the scoring pipeline: windows in, logits out
pub trait Predictor: Sync {
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;
    fn predict(&self, windows: &[OneHotWindow]) -> VarscoreResult<RawBatch>;
}

/// Passes windows straight to the model
pub struct PlainPredictor<M> {
    model: M,
}

impl<M: Model> PlainPredictor<M> {
    pub fn new(model: M) -> Self {
        PlainPredictor { model }
    }
}

impl<M: Model> Predictor for PlainPredictor<M> {
    fn input_len(&self) -> usize {
        self.model.input_len()
    }

    fn output_len(&self) -> usize {
        self.model.output_len()
    }

    fn predict(&self, windows: &[OneHotWindow]) -> VarscoreResult<RawBatch> {
        self.model.forward(ModelInputs::Plain(windows))
    }
}

/// Feeds all-zero bias vectors alongside the windows
pub struct BiasConditionedPredictor<M> {
    model: M,
}

impl<M: Model> BiasConditionedPredictor<M> {
    pub fn new(model: M) -> Self {
        BiasConditionedPredictor { model }
    }
}

impl<M: Model> Predictor for BiasConditionedPredictor<M> {
    fn input_len(&self) -> usize {
        self.model.input_len()
    }

    fn output_len(&self) -> usize {
        self.model.output_len()
    }

    fn predict(&self, windows: &[OneHotWindow]) -> VarscoreResult<RawBatch> {
        let bias_profiles = vec![vec![0.0f32; self.model.output_len()]; windows.len()];
        let bias_counts = vec![0.0f32; windows.len()];
        self.model.forward(ModelInputs::BiasConditioned {
            windows,
            bias_profiles: &bias_profiles,
            bias_counts: &bias_counts,
        })
    }
}

/// Which input convention the loaded model expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    #[default]
    Plain,
    BiasConditioned,
}

impl CallingConvention {
    pub fn predictor<M: Model + 'static>(self, model: M) -> Box<dyn Predictor> {
        match self {
            CallingConvention::Plain => Box::new(PlainPredictor::new(model)),
            CallingConvention::BiasConditioned => Box::new(BiasConditionedPredictor::new(model)),
        }
    }
}

/// Predicted count and normalized profile for one window
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub count: f64,
    /// Softmax-normalized, sums to 1
    pub profile: Vec<f32>,
}

impl Prediction {
    /// Average with a reverse-complement prediction, flipping its profile
    /// so position `i` refers to the same coordinate in both
    pub fn strand_average(&self, reverse: &Prediction) -> Prediction {
        let profile = self
            .profile
            .iter()
            .zip(reverse.profile.iter().rev())
            .map(|(f, r)| (f + r) / 2.0)
            .collect();
        Prediction {
            count: (self.count + reverse.count) / 2.0,
            profile,
        }
    }
}

/// Numerically stable softmax over one row of logits
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .map(f64::from)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&x| (f64::from(x) - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| (e / total) as f32).collect()
}

/// Contiguous `[i * batch_size, (i + 1) * batch_size)` ranges covering `total`
pub fn batch_ranges(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

/// Drives a predictor over batches of windows
#[derive(Debug, Clone)]
pub struct PredictionAggregator {
    pub batch_size: usize,
    /// Average forward and reverse-complement predictions
    pub strand_ensemble: bool,
    pub count_transform: CountTransform,
    /// Batches handed to the predictor at once
    pub threads: usize,
}

impl PredictionAggregator {
    pub fn from_config(config: &ScoringConfig) -> Self {
        PredictionAggregator {
            batch_size: config.batch_size,
            strand_ensemble: !config.forward_only,
            count_transform: config.count_transform,
            threads: config.threads,
        }
    }

    /// Predict one batch, including the reverse-complement pass when enabled
    pub fn predict_windows(
        &self,
        predictor: &dyn Predictor,
        windows: &[OneHotWindow],
    ) -> VarscoreResult<Vec<Prediction>> {
        if let Some(bad) = windows.iter().find(|w| w.len() != predictor.input_len()) {
            return Err(VarscoreError::ShapeMismatch(format!(
                "window length {} does not match model input length {}",
                bad.len(),
                predictor.input_len()
            )));
        }

        let forward = self.run_predictor(predictor, windows)?;
        if !self.strand_ensemble {
            return Ok(forward);
        }

        let revcomp: Vec<OneHotWindow> = windows.iter().map(|w| w.reverse_complement()).collect();
        let reverse = self.run_predictor(predictor, &revcomp)?;
        Ok(forward
            .iter()
            .zip(reverse.iter())
            .map(|(f, r)| f.strand_average(r))
            .collect())
    }

    fn run_predictor(
        &self,
        predictor: &dyn Predictor,
        windows: &[OneHotWindow],
    ) -> VarscoreResult<Vec<Prediction>> {
        let raw = predictor.predict(windows)?;

        if raw.count_logits.len() != windows.len() || raw.profile_logits.len() != windows.len() {
            return Err(VarscoreError::ShapeMismatch(format!(
                "batch of {} windows produced {} profiles and {} counts",
                windows.len(),
                raw.profile_logits.len(),
                raw.count_logits.len()
            )));
        }

        let output_len = predictor.output_len();
        raw.profile_logits
            .iter()
            .zip(raw.count_logits.iter())
            .map(|(logits, &count)| {
                if logits.len() != output_len {
                    return Err(VarscoreError::ShapeMismatch(format!(
                        "profile of length {} does not match model output length {}",
                        logits.len(),
                        output_len
                    )));
                }
                Ok(Prediction {
                    count: self.count_transform.apply(f64::from(count)),
                    profile: softmax(logits),
                })
            })
            .collect()
    }

    /// Build and predict `total` items batch by batch, preserving input order.
    ///
    /// `build` runs on the calling thread, one wave of `threads` batches at a
    /// time; `predict` runs for each batch of a wave on the rayon pool. Each
    /// batch must yield exactly one result per item.
    pub fn run_batches<B, T, F, G>(
        &self,
        total: usize,
        label: &str,
        mut build: F,
        predict: G,
    ) -> VarscoreResult<Vec<T>>
    where
        B: Sync,
        T: Send,
        F: FnMut(Range<usize>) -> VarscoreResult<B>,
        G: Fn(&B) -> VarscoreResult<Vec<T>> + Sync,
    {
        let ranges = batch_ranges(total, self.batch_size);
        let mut results = Vec::with_capacity(total);

        for wave in ranges.chunks(self.threads.max(1)) {
            let batches = wave
                .iter()
                .cloned()
                .map(&mut build)
                .collect::<VarscoreResult<Vec<B>>>()?;

            let predicted = batches
                .par_iter()
                .map(&predict)
                .collect::<VarscoreResult<Vec<Vec<T>>>>()?;

            for (range, batch_results) in wave.iter().zip(predicted) {
                if batch_results.len() != range.len() {
                    return Err(VarscoreError::ShapeMismatch(format!(
                        "batch {:?} returned {} results",
                        range,
                        batch_results.len()
                    )));
                }
                results.extend(batch_results);
            }
            log_progress(results.len(), total, label);
        }

        Ok(results)
    }
}
