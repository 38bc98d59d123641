//! HDF5 store of raw allele predictions
//!
//! Layout:
//!
//! ```text
//! /observed/allele1_pred_counts      [n]
//! /observed/allele2_pred_counts      [n]
//! /observed/allele1_pred_profiles    [n, output_len]
//! /observed/allele2_pred_profiles    [n, output_len]
//! /shuffled/shuf_allele1_pred_counts [draws]   (only with a background)
//! /shuffled/shuf_allele2_pred_counts [draws]
//! /shuffled/shuf_<statistic>         [draws]
//! ```
//!
//! Every non-empty dataset is gzip compressed at level 9. Requires the
//! `hdf5` feature and a system HDF5 library.

use crate::pipeline::ScoringRun;
use crate::{VarscoreError, VarscoreResult};
use hdf5::File;
use ndarray::{ArrayView, IxDyn};
use std::path::Path;

const DEFLATE_LEVEL: u8 = 9;

pub const OBSERVED_GROUP: &str = "observed";
pub const SHUFFLED_GROUP: &str = "shuffled";

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub group: String,
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionArtifact {
    datasets: Vec<Dataset>,
}

impl PredictionArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        group: &str,
        name: &str,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> VarscoreResult<()> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                VarscoreError::ShapeMismatch(format!(
                    "dataset {}/{} has an overflowing shape {:?}",
                    group, name, shape
                ))
            })?;
        if expected != data.len() {
            return Err(VarscoreError::ShapeMismatch(format!(
                "dataset {}/{} has shape {:?} but {} values",
                group,
                name,
                shape,
                data.len()
            )));
        }
        self.datasets.push(Dataset {
            group: group.to_string(),
            name: name.to_string(),
            shape,
            data,
        });
        Ok(())
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn get(&self, group: &str, name: &str) -> Option<&Dataset> {
        self.datasets
            .iter()
            .find(|d| d.group == group && d.name == name)
    }

    /// Observed counts and profiles, plus shuffled counts and statistics when a background exists
    pub fn from_run(run: &ScoringRun) -> VarscoreResult<Self> {
        let mut artifact = PredictionArtifact::new();
        let n = run.observed.len();
        let profile_len = run
            .observed
            .first()
            .map(|o| o.allele1.profile.len())
            .unwrap_or(0);

        let counts = |f: &dyn Fn(usize) -> f64| (0..n).map(|i| f(i) as f32).collect::<Vec<f32>>();
        artifact.push(
            OBSERVED_GROUP,
            "allele1_pred_counts",
            vec![n],
            counts(&|i| run.observed[i].allele1.count),
        )?;
        artifact.push(
            OBSERVED_GROUP,
            "allele2_pred_counts",
            vec![n],
            counts(&|i| run.observed[i].allele2.count),
        )?;
        artifact.push(
            OBSERVED_GROUP,
            "allele1_pred_profiles",
            vec![n, profile_len],
            run.observed
                .iter()
                .flat_map(|o| o.allele1.profile.iter().copied())
                .collect(),
        )?;
        artifact.push(
            OBSERVED_GROUP,
            "allele2_pred_profiles",
            vec![n, profile_len],
            run.observed
                .iter()
                .flat_map(|o| o.allele2.profile.iter().copied())
                .collect(),
        )?;

        if let Some(background) = &run.background {
            let to_f32 = |values: &[f64]| values.iter().map(|&v| v as f32).collect::<Vec<f32>>();
            let shuffled = background.len();
            artifact.push(
                SHUFFLED_GROUP,
                "shuf_allele1_pred_counts",
                vec![shuffled],
                to_f32(&background.allele1_counts),
            )?;
            artifact.push(
                SHUFFLED_GROUP,
                "shuf_allele2_pred_counts",
                vec![shuffled],
                to_f32(&background.allele2_counts),
            )?;
            for stat in background.statistics() {
                artifact.push(
                    SHUFFLED_GROUP,
                    &format!("shuf_{}", stat.statistic.name()),
                    vec![stat.values.len()],
                    to_f32(&stat.values),
                )?;
            }
        }

        Ok(artifact)
    }

    /// Write every dataset into a new HDF5 file, one HDF5 group per artifact group
    pub fn write<P: AsRef<Path>>(&self, path: P) -> VarscoreResult<()> {
        let file = File::create(path.as_ref())?;
        for dataset in &self.datasets {
            let group = if file.link_exists(&dataset.group) {
                file.group(&dataset.group)?
            } else {
                file.create_group(&dataset.group)?
            };
            let view = ArrayView::from_shape(IxDyn(&dataset.shape), &dataset.data).map_err(|e| {
                VarscoreError::ShapeMismatch(format!("dataset {}: {}", dataset.name, e))
            })?;
            let builder = group.new_dataset_builder().with_data(view);
            // filters need a chunked layout, which cannot hold zero-sized chunks
            let builder = if dataset.data.is_empty() {
                builder
            } else {
                builder.deflate(DEFLATE_LEVEL)
            };
            builder.create(dataset.name.as_str())?;
        }
        log::info!(
            "Wrote {} prediction datasets to {:?}",
            self.datasets.len(),
            path.as_ref()
        );
        Ok(())
    }

    /// Load the `observed` and `shuffled` groups of an artifact file
    pub fn read<P: AsRef<Path>>(path: P) -> VarscoreResult<Self> {
        if !path.as_ref().exists() {
            return Err(VarscoreError::FileNotFound(
                path.as_ref().to_string_lossy().to_string(),
            ));
        }
        let file = File::open(path.as_ref())?;
        let mut artifact = PredictionArtifact::new();
        for group_name in [OBSERVED_GROUP, SHUFFLED_GROUP] {
            if !file.link_exists(group_name) {
                continue;
            }
            let group = file.group(group_name)?;
            for name in group.member_names()? {
                let dataset = group.dataset(&name)?;
                let shape = dataset.shape();
                let data = dataset.read_raw::<f32>()?;
                artifact.push(group_name, &name, shape, data)?;
            }
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::NullBackground;
    use crate::pipeline::AllelePrediction;
    use crate::predict::Prediction;
    use crate::scoring::EffectScores;

    fn run(with_background: bool) -> ScoringRun {
        let prediction = |count: f64, profile: Vec<f32>| Prediction { count, profile };
        let observed = vec![
            AllelePrediction {
                variant_id: "a".into(),
                allele1: prediction(1.0, vec![0.25, 0.75]),
                allele2: prediction(2.0, vec![0.5, 0.5]),
            },
            AllelePrediction {
                variant_id: "b".into(),
                allele1: prediction(3.0, vec![1.0, 0.0]),
                allele2: prediction(4.0, vec![0.0, 1.0]),
            },
        ];
        let background = with_background.then(|| {
            let scores = EffectScores {
                allele1_count: 1.0,
                allele2_count: 4.0,
                logfc: 2.0,
                jsd: 0.1,
                original_jsd: 0.1,
                percentiles: None,
            };
            NullBackground::from_scores(&[scores.clone(), scores], false)
        });
        ScoringRun {
            records: Vec::new(),
            observed,
            background,
            has_peaks: false,
        }
    }

    #[test]
    fn test_from_run_groups() {
        let artifact = PredictionArtifact::from_run(&run(true)).unwrap();
        let profiles = artifact.get(OBSERVED_GROUP, "allele2_pred_profiles").unwrap();
        assert_eq!(profiles.shape, vec![2, 2]);
        assert_eq!(profiles.data, vec![0.5, 0.5, 0.0, 1.0]);
        assert_eq!(
            artifact.get(OBSERVED_GROUP, "allele1_pred_counts").unwrap().data,
            vec![1.0, 3.0]
        );
        assert_eq!(
            artifact.get(SHUFFLED_GROUP, "shuf_abs_logfc").unwrap().data,
            vec![2.0, 2.0]
        );
        assert_eq!(artifact.datasets().len(), 4 + 2 + 5);

        let observed_only = PredictionArtifact::from_run(&run(false)).unwrap();
        assert_eq!(observed_only.datasets().len(), 4);
        assert!(observed_only.get(SHUFFLED_GROUP, "shuf_allele1_pred_counts").is_none());
    }

    #[test]
    fn test_file_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.variant_predictions.h5");
        let artifact = PredictionArtifact::from_run(&run(true)).unwrap();
        artifact.write(&path).unwrap();

        let loaded = PredictionArtifact::read(&path).unwrap();
        assert_eq!(loaded.datasets().len(), artifact.datasets().len());
        for dataset in artifact.datasets() {
            assert_eq!(loaded.get(&dataset.group, &dataset.name), Some(dataset));
        }

        let file = File::open(&path).unwrap();
        let profiles = file.dataset("observed/allele1_pred_profiles").unwrap();
        assert_eq!(profiles.shape(), vec![2, 2]);
        assert!(file.link_exists(SHUFFLED_GROUP));
    }

    #[test]
    fn test_observed_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observed.h5");
        PredictionArtifact::from_run(&run(false)).unwrap().write(&path).unwrap();

        let loaded = PredictionArtifact::read(&path).unwrap();
        assert_eq!(loaded.datasets().len(), 4);
        assert!(loaded.get(SHUFFLED_GROUP, "shuf_allele1_pred_counts").is_none());
    }

    #[test]
    fn test_shape_must_match_data() {
        let mut artifact = PredictionArtifact::new();
        assert!(matches!(
            artifact.push(OBSERVED_GROUP, "bad", vec![2, 3], vec![0.0; 5]),
            Err(VarscoreError::ShapeMismatch(_))
        ));
        assert!(matches!(
            artifact.push(OBSERVED_GROUP, "huge", vec![1 << 62, 8], vec![0.0; 8]),
            Err(VarscoreError::ShapeMismatch(_))
        ));
        assert!(artifact.datasets().is_empty());
    }

    #[test]
    fn test_rejects_missing_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PredictionArtifact::read(dir.path().join("absent.h5")),
            Err(VarscoreError::FileNotFound(_))
        ));

        let foreign = dir.path().join("foreign.h5");
        std::fs::write(&foreign, b"not an hdf5 file").unwrap();
        assert!(matches!(
            PredictionArtifact::read(&foreign),
            Err(VarscoreError::Hdf5(_))
        ));
    }
}
