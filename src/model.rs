//! Motif-scanning reference model loaded from JSON

use crate::predict::{Model, ModelInputs, RawBatch};
use crate::utils::open_reader;
use crate::window::OneHotWindow;
use crate::{VarscoreError, VarscoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Position weight matrix with A, C, G, T weights per position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Motif {
    pub name: String,
    pub weights: Vec<[f32; 4]>,
    /// Contribution of this motif's mean positive score to the count logit
    #[serde(default = "Motif::default_count_weight")]
    pub count_weight: f32,
}

impl Motif {
    fn default_count_weight() -> f32 {
        1.0
    }

    fn width(&self) -> usize {
        self.weights.len()
    }

    fn reverse_complement_weights(&self) -> Vec<[f32; 4]> {
        self.weights
            .iter()
            .rev()
            .map(|&[a, c, g, t]| [t, g, c, a])
            .collect()
    }
}

/// Sum of PWM scores over a window.
///
/// The profile logit at output position `j` is the sum over motifs of the
/// better-strand PWM score of the motif centered on input position
/// `offset + j`, where `offset` trims the input to the output length. The
/// count logit is `count_bias` plus each motif's `count_weight` times its mean
/// positive score over the output positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotifModel {
    pub input_len: usize,
    pub output_len: usize,
    #[serde(default)]
    pub count_bias: f32,
    pub motifs: Vec<Motif>,
}

impl MotifModel {
    pub fn from_path<P: AsRef<Path>>(path: P) -> VarscoreResult<Self> {
        let reader = open_reader(path.as_ref())?;
        let model: MotifModel = serde_json::from_reader(reader)?;
        model.validate()?;
        log::info!(
            "Loaded model with {} motifs (input length {}, output length {})",
            model.motifs.len(),
            model.input_len,
            model.output_len
        );
        Ok(model)
    }

    pub fn validate(&self) -> VarscoreResult<()> {
        if self.input_len == 0 || self.output_len == 0 {
            return Err(VarscoreError::InvalidConfig(
                "model input and output lengths must be positive".to_string(),
            ));
        }
        if self.output_len > self.input_len {
            return Err(VarscoreError::InvalidConfig(format!(
                "model output length {} exceeds input length {}",
                self.output_len, self.input_len
            )));
        }
        for motif in &self.motifs {
            if motif.width() == 0 || motif.width() > self.input_len {
                return Err(VarscoreError::InvalidConfig(format!(
                    "motif '{}' has width {} for input length {}",
                    motif.name,
                    motif.width(),
                    self.input_len
                )));
            }
        }
        Ok(())
    }

    fn scan(rows: &[[f32; 4]], weights: &[[f32; 4]], center: usize) -> f32 {
        let start = center as isize - (weights.len() / 2) as isize;
        weights
            .iter()
            .enumerate()
            .filter_map(|(k, w)| {
                let idx = start + k as isize;
                if idx < 0 {
                    return None;
                }
                rows.get(idx as usize)
                    .map(|row| row.iter().zip(w).map(|(x, y)| x * y).sum::<f32>())
            })
            .sum()
    }

    /// Profile and count logits for a single window
    fn score_window(&self, window: &OneHotWindow) -> (Vec<f32>, f32) {
        let rows = window.rows();
        let offset = (self.input_len - self.output_len) / 2;
        let mut profile = vec![0.0f32; self.output_len];
        let mut count = self.count_bias;

        for motif in &self.motifs {
            let reverse = motif.reverse_complement_weights();
            let mut positive = 0.0f32;
            for (j, slot) in profile.iter_mut().enumerate() {
                let center = offset + j;
                let score = Self::scan(rows, &motif.weights, center)
                    .max(Self::scan(rows, &reverse, center));
                *slot += score;
                positive += score.max(0.0);
            }
            count += motif.count_weight * positive / self.output_len as f32;
        }

        (profile, count)
    }
}

fn log_add_exp(a: f32, b: f32) -> f32 {
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

impl Model for MotifModel {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn forward(&self, inputs: ModelInputs<'_>) -> VarscoreResult<RawBatch> {
        let mut batch = RawBatch::default();
        for window in inputs.windows() {
            let (profile, count) = self.score_window(window);
            batch.profile_logits.push(profile);
            batch.count_logits.push(count);
        }

        if let ModelInputs::BiasConditioned {
            windows,
            bias_profiles,
            bias_counts,
        } = inputs
        {
            if bias_profiles.len() != windows.len() || bias_counts.len() != windows.len() {
                return Err(VarscoreError::ShapeMismatch(format!(
                    "{} windows with {} bias profiles and {} bias counts",
                    windows.len(),
                    bias_profiles.len(),
                    bias_counts.len()
                )));
            }
            for ((profile, count), (bias_profile, &bias_count)) in batch
                .profile_logits
                .iter_mut()
                .zip(batch.count_logits.iter_mut())
                .zip(bias_profiles.iter().zip(bias_counts))
            {
                for (p, b) in profile.iter_mut().zip(bias_profile) {
                    *p += b;
                }
                *count = log_add_exp(*count, bias_count);
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODEL_JSON: &str = r#"{
        "input_len": 12,
        "output_len": 6,
        "count_bias": 0.5,
        "motifs": [
            {"name": "GATA", "weights": [[0,0,1,0],[1,0,0,0],[0,0,0,1],[1,0,0,0]]}
        ]
    }"#;

    fn model() -> MotifModel {
        serde_json::from_str(MODEL_JSON).unwrap()
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MODEL_JSON.as_bytes()).unwrap();
        let model = MotifModel::from_path(file.path()).unwrap();
        assert_eq!(model.input_len, 12);
        assert_eq!(model.motifs[0].count_weight, 1.0);
    }

    #[test]
    fn test_invalid_models_rejected() {
        let mut bad = model();
        bad.output_len = 20;
        assert!(matches!(bad.validate(), Err(VarscoreError::InvalidConfig(_))));

        let mut bad = model();
        bad.motifs[0].weights.clear();
        assert!(bad.validate().is_err());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"input_len\": 4").unwrap();
        assert!(matches!(
            MotifModel::from_path(file.path()),
            Err(VarscoreError::Json(_))
        ));
    }

    #[test]
    fn test_motif_hit_raises_signal() {
        let model = model();
        let hit = OneHotWindow::encode(b"CCCCGATACCCC");
        let miss = OneHotWindow::encode(b"NNNNNNNNNNNN");
        let batch = model.forward(ModelInputs::Plain(&[hit, miss])).unwrap();

        assert_eq!(batch.profile_logits.len(), 2);
        assert_eq!(batch.profile_logits[0].len(), 6);
        let peak = batch.profile_logits[0].iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(peak, 4.0);
        assert!(batch.profile_logits[1].iter().all(|&v| v == 0.0));
        assert!(batch.count_logits[0] > batch.count_logits[1]);
        assert_eq!(batch.count_logits[1], 0.5);
    }

    #[test]
    fn test_reverse_strand_hit() {
        let model = model();
        // TATC is the reverse complement of GATA
        let forward = OneHotWindow::encode(b"CCCCGATACCCC");
        let reverse = forward.reverse_complement();
        let batch = model.forward(ModelInputs::Plain(&[forward, reverse])).unwrap();
        let peak = |profile: &[f32]| profile.iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(peak(&batch.profile_logits[0]), 4.0);
        assert_eq!(peak(&batch.profile_logits[1]), 4.0);
    }

    #[test]
    fn test_bias_conditioned_forward() {
        let model = model();
        let windows = [OneHotWindow::encode(b"NNNNNNNNNNNN")];
        let bias_profiles = vec![vec![1.0f32; 6]];
        let batch = model
            .forward(ModelInputs::BiasConditioned {
                windows: &windows,
                bias_profiles: &bias_profiles,
                bias_counts: &[0.5],
            })
            .unwrap();
        assert!(batch.profile_logits[0].iter().all(|&v| v == 1.0));
        assert!((batch.count_logits[0] - (0.5 + 2f32.ln())).abs() < 1e-6);

        let short = model.forward(ModelInputs::BiasConditioned {
            windows: &windows,
            bias_profiles: &[],
            bias_counts: &[0.5],
        });
        assert!(matches!(short, Err(VarscoreError::ShapeMismatch(_))));
    }
}
