//! Window construction around variants and peak summits

use crate::dinuc::dinuc_shuffle;
use crate::genome::SequenceSource;
use crate::{ChromSizes, Peak, Variant, VarscoreResult};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// One-hot channel order
pub const ALPHABET: [u8; 4] = *b"ACGT";

/// A fixed-length one-hot encoded sequence (A, C, G, T channels)
#[derive(Debug, Clone, PartialEq)]
pub struct OneHotWindow {
    rows: Vec<[f32; 4]>,
}

impl OneHotWindow {
    /// Encode bases; anything outside ACGT becomes an all-zero row
    pub fn encode(seq: &[u8]) -> Self {
        let rows = seq
            .iter()
            .map(|base| {
                let mut row = [0.0f32; 4];
                let upper = base.to_ascii_uppercase();
                if let Some(idx) = ALPHABET.iter().position(|&s| s == upper) {
                    row[idx] = 1.0;
                }
                row
            })
            .collect();
        OneHotWindow { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[[f32; 4]] {
        &self.rows
    }

    /// Mirror both the positional and the channel axis
    pub fn reverse_complement(&self) -> Self {
        let rows = self
            .rows
            .iter()
            .rev()
            .map(|&[a, c, g, t]| [t, g, c, a])
            .collect();
        OneHotWindow { rows }
    }

    /// Back to bases, with all-zero rows as `N`
    pub fn decode(&self) -> Vec<u8> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .position(|&v| v > 0.5)
                    .map(|idx| ALPHABET[idx])
                    .unwrap_or(b'N')
            })
            .collect()
    }
}

/// Bases on either side of the window anchor
pub fn flank(input_len: usize) -> u64 {
    (input_len / 2) as u64
}

fn in_bounds(chrom: &str, anchor: u64, input_len: usize, chrom_sizes: &ChromSizes) -> bool {
    match chrom_sizes.get(chrom) {
        Some(&size) => {
            let flank = flank(input_len);
            anchor > flank && anchor + flank <= size
        }
        None => false,
    }
}

/// A variant is scoreable when its window lies inside a known chromosome
pub fn is_valid_variant(variant: &Variant, input_len: usize, chrom_sizes: &ChromSizes) -> bool {
    in_bounds(&variant.chrom, variant.pos, input_len, chrom_sizes)
}

/// Peaks are checked around `start + summit`
pub fn is_valid_peak(peak: &Peak, input_len: usize, chrom_sizes: &ChromSizes) -> bool {
    in_bounds(&peak.chrom, peak.anchor(), input_len, chrom_sizes)
}

pub fn filter_valid_variants(
    variants: Vec<Variant>,
    input_len: usize,
    chrom_sizes: &ChromSizes,
) -> Vec<Variant> {
    variants
        .into_iter()
        .filter(|v| is_valid_variant(v, input_len, chrom_sizes))
        .collect()
}

pub fn filter_valid_peaks(peaks: Vec<Peak>, input_len: usize, chrom_sizes: &ChromSizes) -> Vec<Peak> {
    peaks
        .into_iter()
        .filter(|p| is_valid_peak(p, input_len, chrom_sizes))
        .collect()
}

/// Builds allele and peak windows of exactly `input_len` bases
#[derive(Debug, Clone, Copy)]
pub struct WindowEncoder {
    input_len: usize,
}

impl WindowEncoder {
    pub fn new(input_len: usize) -> Self {
        WindowEncoder { input_len }
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Truncate or `N`-pad to the window length
    fn fit(&self, mut seq: Vec<u8>) -> Vec<u8> {
        seq.resize(self.input_len, b'N');
        seq
    }

    fn fetch_upper(
        &self,
        source: &dyn SequenceSource,
        chrom: &str,
        start: u64,
        end: u64,
    ) -> VarscoreResult<Vec<u8>> {
        let mut seq = source.fetch(chrom, start, end)?;
        seq.make_ascii_uppercase();
        Ok(seq)
    }

    /// Allele1 and allele2 sequences centered on the variant.
    ///
    /// With a `shuffle_seed` the flanking context is dinucleotide-shuffled
    /// before the alleles are inserted.
    pub fn allele_sequences(
        &self,
        source: &dyn SequenceSource,
        variant: &Variant,
        shuffle_seed: Option<u64>,
    ) -> VarscoreResult<(Vec<u8>, Vec<u8>)> {
        let flank = flank(self.input_len);
        let anchor = variant.pos.saturating_sub(1);
        let window_start = anchor.saturating_sub(flank);
        let allele1 = variant.allele1_bases().to_ascii_uppercase().into_bytes();
        let allele2 = variant.allele2_bases().to_ascii_uppercase().into_bytes();
        let split = flank as usize;

        if !variant.is_indel() {
            let mut base = self.fetch_upper(
                source,
                &variant.chrom,
                window_start,
                window_start + self.input_len as u64,
            )?;
            if let Some(seed) = shuffle_seed {
                base = dinuc_shuffle(&base, &mut StdRng::seed_from_u64(seed));
            }
            let substitute = |allele: &[u8]| {
                let mut seq = base[..split.min(base.len())].to_vec();
                seq.extend_from_slice(allele);
                seq.extend_from_slice(base.get(split + allele.len()..).unwrap_or(&[]));
                self.fit(seq)
            };
            return Ok((substitute(&allele1), substitute(&allele2)));
        }

        // Indels: allele1 is the reference allele; the right tail starts after it
        let right_start = anchor + allele1.len() as u64;
        let right_len = self.input_len as u64 - flank;
        let mut left = self.fetch_upper(source, &variant.chrom, window_start, anchor)?;
        let mut right =
            self.fetch_upper(source, &variant.chrom, right_start, right_start + right_len)?;
        if let Some(seed) = shuffle_seed {
            left = dinuc_shuffle(&left, &mut StdRng::seed_from_u64(seed));
            right = dinuc_shuffle(&right, &mut StdRng::seed_from_u64(seed));
        }

        let splice = |allele: &[u8]| {
            let mut seq = Vec::with_capacity(left.len() + allele.len() + right.len());
            seq.extend_from_slice(&left);
            seq.extend_from_slice(allele);
            seq.extend_from_slice(&right);
            self.fit(seq)
        };
        Ok((splice(&allele1), splice(&allele2)))
    }

    pub fn allele_windows(
        &self,
        source: &dyn SequenceSource,
        variant: &Variant,
        shuffle_seed: Option<u64>,
    ) -> VarscoreResult<(OneHotWindow, OneHotWindow)> {
        let (allele1, allele2) = self.allele_sequences(source, variant, shuffle_seed)?;
        Ok((OneHotWindow::encode(&allele1), OneHotWindow::encode(&allele2)))
    }

    /// Sequence centered on the peak summit
    pub fn peak_sequence(&self, source: &dyn SequenceSource, peak: &Peak) -> VarscoreResult<Vec<u8>> {
        let start = peak.anchor().saturating_sub(flank(self.input_len));
        let seq = self.fetch_upper(source, &peak.chrom, start, start + self.input_len as u64)?;
        Ok(self.fit(seq))
    }

    pub fn peak_window(&self, source: &dyn SequenceSource, peak: &Peak) -> VarscoreResult<OneHotWindow> {
        Ok(OneHotWindow::encode(&self.peak_sequence(source, peak)?))
    }
}
