//! Reference sequence retrieval

use crate::utils::validate_file_readable;
use crate::{ChromSizes, VarscoreError, VarscoreResult};
use rust_htslib::faidx;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Source of raw reference bases
pub trait SequenceSource {
    /// Fetch bases in the 0-based half-open interval `[start, end)`.
    ///
    /// Intervals running past the chromosome end are clipped, so the result
    /// may be shorter than requested.
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> VarscoreResult<Vec<u8>>;
}

/// Indexed FASTA reader backed by htslib's faidx
pub struct FastaSource {
    reader: faidx::Reader,
    path: PathBuf,
}

impl FastaSource {
    pub fn open<P: AsRef<Path>>(path: P) -> VarscoreResult<Self> {
        let path = path.as_ref();
        validate_file_readable(path)?;

        let fai_path = PathBuf::from(format!("{}.fai", path.display()));
        if !fai_path.exists() {
            log::debug!("No index at {}, htslib will try to build one", fai_path.display());
        }

        let reader = faidx::Reader::from_path(path)?;
        Ok(FastaSource {
            reader,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SequenceSource for FastaSource {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> VarscoreResult<Vec<u8>> {
        if end <= start {
            return Ok(Vec::new());
        }
        // faidx takes an inclusive end and clips it to the sequence length
        let seq = self
            .reader
            .fetch_seq(chrom, start as usize, (end - 1) as usize)?;
        Ok(seq.to_vec())
    }
}

/// In-memory genome, mostly useful for tests and small references
#[derive(Debug, Clone, Default)]
pub struct MemoryGenome {
    sequences: HashMap<String, Vec<u8>>,
}

impl MemoryGenome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chrom: &str, sequence: &[u8]) {
        self.sequences.insert(chrom.to_string(), sequence.to_vec());
    }

    pub fn chrom_sizes(&self) -> ChromSizes {
        self.sequences
            .iter()
            .map(|(chrom, seq)| (chrom.clone(), seq.len() as u64))
            .collect()
    }
}

impl SequenceSource for MemoryGenome {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> VarscoreResult<Vec<u8>> {
        let seq = self.sequences.get(chrom).ok_or_else(|| {
            VarscoreError::InvalidVariant(format!("Unknown chromosome: {}", chrom))
        })?;
        let len = seq.len();
        let start = (start as usize).min(len);
        let end = (end as usize).min(len).max(start);
        Ok(seq[start..end].to_vec())
    }
}
