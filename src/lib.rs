//! # varscore - Variant effect scoring
//!
//! Scores the predicted regulatory effect of genetic variants with a
//! sequence-to-signal model. Reference and alternate windows are built around
//! each variant, both alleles are run through the predictor, and the paired
//! predictions are turned into fold-change and profile divergence statistics.
//! Significance comes from an empirical background of shuffled variants, and
//! effects can be expressed relative to predicted signal at known peaks.

#[cfg(feature = "hdf5")]
pub mod artifact;
pub mod background;
pub mod dinuc;
pub mod genome;
pub mod model;
pub mod output;
pub mod percentile;
pub mod pipeline;
pub mod predict;
pub mod scoring;
pub mod table;
pub mod utils;
pub mod window;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Chromosome name to chromosome length in bases
pub type ChromSizes = HashMap<String, u64>;

/// Represents a genetic variant with its position and alleles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub chrom: String,
    /// 1-based position of the first allele base
    pub pos: u64,
    pub allele1: String,
    pub allele2: String,
    pub variant_id: String,
    /// End coordinate carried through from BED inputs
    pub end: Option<u64>,
}

impl Variant {
    pub fn new(
        chrom: String,
        pos: u64,
        allele1: String,
        allele2: String,
        variant_id: String,
    ) -> Self {
        Self {
            chrom,
            pos,
            allele1,
            allele2,
            variant_id,
            end: None,
        }
    }

    /// Bases of allele1, with the `-` placeholder read as an empty allele
    pub fn allele1_bases(&self) -> &str {
        allele_bases(&self.allele1)
    }

    /// Bases of allele2, with the `-` placeholder read as an empty allele
    pub fn allele2_bases(&self) -> &str {
        allele_bases(&self.allele2)
    }

    /// An indel is any variant whose alleles differ in length
    pub fn is_indel(&self) -> bool {
        self.allele1_bases().len() != self.allele2_bases().len()
    }
}

fn allele_bases(allele: &str) -> &str {
    if allele == "-" {
        ""
    } else {
        allele
    }
}

/// A peak from a narrowPeak-style table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub chrom: String,
    /// 0-based start
    pub start: u64,
    pub end: u64,
    /// Summit offset relative to `start`
    pub summit: u64,
    pub rank: f64,
}

impl Peak {
    /// Genomic coordinate the peak window is centered on
    pub fn anchor(&self) -> u64 {
        self.start + self.summit
    }
}

/// How raw count logits are mapped back to predicted counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountTransform {
    /// `exp(x)`
    #[default]
    Exp,
    /// `exp(x) - 1`, for models trained on `log(1 + count)`
    ExpM1,
}

impl CountTransform {
    pub fn apply(&self, logit: f64) -> f64 {
        match self {
            CountTransform::Exp => logit.exp(),
            CountTransform::ExpM1 => logit.exp_m1(),
        }
    }
}

impl FromStr for CountTransform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exp" => Ok(CountTransform::Exp),
            "expm1" => Ok(CountTransform::ExpM1),
            other => Err(format!(
                "unknown count transform '{}' (expected 'exp' or 'expm1')",
                other
            )),
        }
    }
}

/// Configuration parameters for a scoring run
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Windows per predictor call
    pub batch_size: usize,
    /// Skip reverse-complement predictions and strand averaging
    pub forward_only: bool,
    pub count_transform: CountTransform,
    /// Shuffled draws per variant
    pub num_shuf: Option<usize>,
    /// Total shuffled draws; takes precedence over `num_shuf`
    pub total_shuf: Option<usize>,
    /// Upper bound on peaks used for percentile scoring
    pub max_peaks: Option<usize>,
    pub random_seed: u64,
    /// Batches dispatched to the predictor concurrently
    pub threads: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            forward_only: false,
            count_transform: CountTransform::Exp,
            num_shuf: Some(10),
            total_shuf: None,
            max_peaks: None,
            random_seed: 1234,
            threads: 1,
        }
    }
}

/// Error types for the varscore library
#[derive(Debug, thiserror::Error)]
pub enum VarscoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Invalid variant format: {0}")]
    InvalidVariant(String),

    #[error("Invalid peak format: {0}")]
    InvalidPeak(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Prediction shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Prediction consistency error: {0}")]
    Consistency(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),
}

pub type VarscoreResult<T> = Result<T, VarscoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indel_detection() {
        let snv = Variant::new("chr1".into(), 10, "A".into(), "G".into(), "rs1".into());
        assert!(!snv.is_indel());

        let insertion = Variant::new("chr1".into(), 10, "-".into(), "GT".into(), "rs2".into());
        assert!(insertion.is_indel());
        assert_eq!(insertion.allele1_bases(), "");

        let deletion = Variant::new("chr1".into(), 10, "ACG".into(), "A".into(), "rs3".into());
        assert!(deletion.is_indel());
    }

    #[test]
    fn test_count_transform() {
        assert_eq!(CountTransform::Exp.apply(0.0), 1.0);
        assert_eq!(CountTransform::ExpM1.apply(0.0), 0.0);
        assert_eq!("expm1".parse::<CountTransform>().unwrap(), CountTransform::ExpM1);
        assert!("log".parse::<CountTransform>().is_err());
    }

    #[test]
    fn test_peak_anchor() {
        let peak = Peak {
            chrom: "chr1".into(),
            start: 100,
            end: 300,
            summit: 40,
            rank: 5.0,
        };
        assert_eq!(peak.anchor(), 140);
    }
}
