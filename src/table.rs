//! Input table parsing: variant lists, chromosome sizes and peaks

use crate::utils::open_reader;
use crate::{ChromSizes, Peak, Variant, VarscoreError, VarscoreResult};
use std::path::Path;
use std::str::FromStr;

/// Column roles in a variant list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantColumn {
    Chrom,
    Pos,
    End,
    Allele1,
    Allele2,
    VariantId,
    Ignore,
}

impl VariantColumn {
    /// Column name used in the scored output table
    pub fn name(&self) -> &'static str {
        match self {
            VariantColumn::Chrom => "chr",
            VariantColumn::Pos => "pos",
            VariantColumn::End => "end",
            VariantColumn::Allele1 => "allele1",
            VariantColumn::Allele2 => "allele2",
            VariantColumn::VariantId => "variant_id",
            VariantColumn::Ignore => "ignore",
        }
    }
}

/// Supported column layouts for the variant list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantSchema {
    Original,
    Plink,
    Plink2,
    Bed,
    #[default]
    Chrombpnet,
}

impl VariantSchema {
    pub fn columns(&self) -> &'static [VariantColumn] {
        use VariantColumn::*;
        match self {
            VariantSchema::Original => &[Chrom, Pos, VariantId, Allele1, Allele2],
            VariantSchema::Plink => &[Chrom, VariantId, Ignore, Pos, Allele1, Allele2],
            VariantSchema::Plink2 => &[Chrom, VariantId, Pos, Allele1, Allele2],
            VariantSchema::Bed => &[Chrom, Pos, End, Allele1, Allele2, VariantId],
            VariantSchema::Chrombpnet => &[Chrom, Pos, Allele1, Allele2, VariantId],
        }
    }

    /// Columns echoed into the output table, in input order
    pub fn output_columns(&self) -> impl Iterator<Item = VariantColumn> {
        self.columns()
            .iter()
            .copied()
            .filter(|c| *c != VariantColumn::Ignore)
    }

    /// BED positions are 0-based on disk
    pub fn is_zero_based(&self) -> bool {
        matches!(self, VariantSchema::Bed)
    }
}

impl FromStr for VariantSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(VariantSchema::Original),
            "plink" => Ok(VariantSchema::Plink),
            "plink2" => Ok(VariantSchema::Plink2),
            "bed" => Ok(VariantSchema::Bed),
            "chrombpnet" => Ok(VariantSchema::Chrombpnet),
            other => Err(format!(
                "unknown variant schema '{}' (expected original, plink, plink2, bed or chrombpnet)",
                other
            )),
        }
    }
}

fn tsv_reader<P: AsRef<Path>>(path: P) -> VarscoreResult<csv::Reader<Box<dyn std::io::BufRead>>> {
    let reader = open_reader(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader))
}

/// Parse one variant row laid out according to `schema`
pub fn parse_variant_record(
    record: &csv::StringRecord,
    schema: VariantSchema,
) -> VarscoreResult<Variant> {
    let mut variant = Variant::new(
        String::new(),
        0,
        "-".to_string(),
        "-".to_string(),
        "-".to_string(),
    );
    let mut has_pos = false;

    for (idx, column) in schema.columns().iter().enumerate() {
        let field = record.get(idx).map(str::trim).filter(|f| !f.is_empty());
        match column {
            VariantColumn::Chrom => {
                variant.chrom = field
                    .ok_or_else(|| VarscoreError::InvalidVariant("missing chromosome".to_string()))?
                    .to_string();
            }
            VariantColumn::Pos => {
                if let Some(value) = field {
                    variant.pos = value.parse::<u64>().map_err(|_| {
                        VarscoreError::InvalidVariant(format!("Invalid position: {}", value))
                    })?;
                    has_pos = true;
                }
            }
            VariantColumn::End => {
                variant.end = match field {
                    Some(value) => Some(value.parse::<u64>().map_err(|_| {
                        VarscoreError::InvalidVariant(format!("Invalid end: {}", value))
                    })?),
                    None => None,
                };
            }
            VariantColumn::Allele1 => {
                if let Some(value) = field {
                    variant.allele1 = value.to_string();
                }
            }
            VariantColumn::Allele2 => {
                if let Some(value) = field {
                    variant.allele2 = value.to_string();
                }
            }
            VariantColumn::VariantId => {
                if let Some(value) = field {
                    variant.variant_id = value.to_string();
                }
            }
            VariantColumn::Ignore => {}
        }
    }

    if !has_pos {
        return Err(VarscoreError::InvalidVariant(format!(
            "missing position in record: {:?}",
            record
        )));
    }

    Ok(variant)
}

/// Read a variant list, normalizing chromosome names and coordinates
///
/// Positions come back 1-based regardless of schema. When no chromosome name
/// contains `chr`, every name gets a `chr` prefix.
pub fn load_variant_table<P: AsRef<Path>>(
    path: P,
    schema: VariantSchema,
) -> VarscoreResult<Vec<Variant>> {
    let mut reader = tsv_reader(&path)?;
    let mut variants = Vec::new();

    for result in reader.records() {
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let variant = parse_variant_record(&record, schema).map_err(|e| {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            VarscoreError::InvalidVariant(format!("line {}: {}", line, e))
        })?;
        variants.push(variant);
    }

    let has_chr_prefix = variants
        .iter()
        .any(|v| v.chrom.to_ascii_lowercase().contains("chr"));
    if !has_chr_prefix {
        for variant in variants.iter_mut() {
            variant.chrom = format!("chr{}", variant.chrom);
        }
    }

    if schema.is_zero_based() {
        for variant in variants.iter_mut() {
            variant.pos += 1;
        }
    }

    log::info!(
        "Loaded {} variants from {:?}",
        variants.len(),
        path.as_ref()
    );
    Ok(variants)
}

/// Keep only the variants on one chromosome
pub fn filter_chrom(variants: Vec<Variant>, chrom: &str) -> Vec<Variant> {
    variants.into_iter().filter(|v| v.chrom == chrom).collect()
}

/// Read a two-column chromosome size table
pub fn load_chrom_sizes<P: AsRef<Path>>(path: P) -> VarscoreResult<ChromSizes> {
    let mut reader = tsv_reader(&path)?;
    let mut sizes = ChromSizes::new();

    for result in reader.records() {
        let record = result?;
        if record.len() < 2 {
            continue;
        }
        let chrom = record[0].trim().to_string();
        let size = record[1].trim().parse::<u64>().map_err(|_| {
            VarscoreError::InvalidConfig(format!(
                "Invalid size for chromosome {}: {}",
                chrom, &record[1]
            ))
        })?;
        sizes.insert(chrom, size);
    }

    log::info!("Loaded {} chromosome sizes from {:?}", sizes.len(), path.as_ref());
    Ok(sizes)
}

/// Parse one narrowPeak row
pub fn parse_peak_record(record: &csv::StringRecord) -> VarscoreResult<Peak> {
    if record.len() < 10 {
        return Err(VarscoreError::InvalidPeak(format!(
            "expected 10 narrowPeak columns, found {}",
            record.len()
        )));
    }

    let field = |idx: usize| record[idx].trim();
    let parse_u64 = |idx: usize, name: &str| {
        field(idx).parse::<u64>().map_err(|_| {
            VarscoreError::InvalidPeak(format!("Invalid {}: {}", name, field(idx)))
        })
    };

    let rank = field(8)
        .parse::<f64>()
        .map_err(|_| VarscoreError::InvalidPeak(format!("Invalid rank: {}", field(8))))?;

    Ok(Peak {
        chrom: field(0).to_string(),
        start: parse_u64(1, "start")?,
        end: parse_u64(2, "end")?,
        summit: parse_u64(9, "summit")?,
        rank,
    })
}

/// Read a narrowPeak table
pub fn load_peaks<P: AsRef<Path>>(path: P) -> VarscoreResult<Vec<Peak>> {
    let mut reader = tsv_reader(&path)?;
    let mut peaks = Vec::new();

    for result in reader.records() {
        let record = result?;
        match parse_peak_record(&record) {
            Ok(peak) => peaks.push(peak),
            Err(e) => log::warn!("Skipping invalid peak record: {}", e),
        }
    }

    log::info!("Loaded {} peaks from {:?}", peaks.len(), path.as_ref());
    Ok(peaks)
}

/// Collapse peaks sharing (chrom, start, end, summit), keeping the highest rank
///
/// The result is sorted by chrom, start, end and summit.
pub fn dedup_peaks(mut peaks: Vec<Peak>) -> Vec<Peak> {
    peaks.sort_by(|a, b| {
        (&a.chrom, a.start, a.end, a.summit)
            .cmp(&(&b.chrom, b.start, b.end, b.summit))
            .then_with(|| b.rank.total_cmp(&a.rank))
    });

    let before = peaks.len();
    peaks.dedup_by(|later, kept| {
        later.chrom == kept.chrom
            && later.start == kept.start
            && later.end == kept.end
            && later.summit == kept.summit
    });
    log::debug!("Removed {} duplicate peaks", before - peaks.len());

    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_load_chrombpnet_schema() {
        let file = table(&["chr1\t100\tA\tG\trs1", "chr2\t200\tAT\t-\trs2"]);
        let variants = load_variant_table(file.path(), VariantSchema::Chrombpnet).unwrap();

        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].chrom, "chr1");
        assert_eq!(variants[0].pos, 100);
        assert_eq!(variants[0].allele2, "G");
        assert_eq!(variants[1].variant_id, "rs2");
        assert!(variants[1].is_indel());
    }

    #[test]
    fn test_chr_prefix_added() {
        let file = table(&["1\t100\tA\tG\trs1", "X\t50\tC\tT\trs2"]);
        let variants = load_variant_table(file.path(), VariantSchema::Chrombpnet).unwrap();
        assert_eq!(variants[0].chrom, "chr1");
        assert_eq!(variants[1].chrom, "chrX");
    }

    #[test]
    fn test_bed_schema_is_converted_to_one_based() {
        let file = table(&["chr1\t99\t100\tA\tG\trs1"]);
        let variants = load_variant_table(file.path(), VariantSchema::Bed).unwrap();
        assert_eq!(variants[0].pos, 100);
        assert_eq!(variants[0].end, Some(100));
    }

    #[test]
    fn test_plink_schema_skips_ignored_column() {
        let file = table(&["chr3\trs9\t0\t500\tC\tT"]);
        let variants = load_variant_table(file.path(), VariantSchema::Plink).unwrap();
        assert_eq!(variants[0].variant_id, "rs9");
        assert_eq!(variants[0].pos, 500);
        assert_eq!(variants[0].allele1, "C");

        let names: Vec<&str> = VariantSchema::Plink.output_columns().map(|c| c.name()).collect();
        assert_eq!(names, vec!["chr", "variant_id", "pos", "allele1", "allele2"]);
    }

    #[test]
    fn test_missing_alleles_become_placeholder() {
        let file = table(&["chr1\t100\t\tG\trs1"]);
        let variants = load_variant_table(file.path(), VariantSchema::Chrombpnet).unwrap();
        assert_eq!(variants[0].allele1, "-");
        assert!(variants[0].is_indel());
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let file = table(&["chr1\t10\tA\tG\trs1", "chr1\tabc\tA\tG\trs2"]);
        let err = load_variant_table(file.path(), VariantSchema::Chrombpnet).unwrap_err();
        match err {
            VarscoreError::InvalidVariant(msg) => assert!(msg.starts_with("line 2")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_alleles_kept_as_given() {
        let file = table(&["chr1\t10\tac\tG\trs1"]);
        let variants = load_variant_table(file.path(), VariantSchema::Chrombpnet).unwrap();
        assert_eq!(variants[0].allele1, "ac");
        assert_eq!(variants[0].allele2, "G");
    }

    #[test]
    fn test_filter_chrom() {
        let file = table(&["chr1\t100\tA\tG\trs1", "chr2\t200\tA\tG\trs2"]);
        let variants = load_variant_table(file.path(), VariantSchema::Chrombpnet).unwrap();
        let kept = filter_chrom(variants, "chr2");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].variant_id, "rs2");
    }

    #[test]
    fn test_schema_from_str() {
        assert_eq!("BED".parse::<VariantSchema>().unwrap(), VariantSchema::Bed);
        assert!("vcf".parse::<VariantSchema>().is_err());
    }

    #[test]
    fn test_load_chrom_sizes() {
        let file = table(&["chr1\t1000", "chr2\t500"]);
        let sizes = load_chrom_sizes(file.path()).unwrap();
        assert_eq!(sizes.get("chr1"), Some(&1000));
        assert_eq!(sizes.len(), 2);

        let bad = table(&["chr1\tlarge"]);
        assert!(load_chrom_sizes(bad.path()).is_err());
    }

    #[test]
    fn test_load_and_dedup_peaks() {
        let file = table(&[
            "chr1\t100\t300\t.\t0\t.\t5.0\t3.0\t2.0\t50",
            "chr1\t100\t300\t.\t0\t.\t5.0\t3.0\t9.0\t50",
            "chr1\t10\t80\t.\t0\t.\t5.0\t3.0\t1.0\t20",
            "chr1\t10\t80\tbroken",
        ]);
        let peaks = load_peaks(file.path()).unwrap();
        assert_eq!(peaks.len(), 3);

        let peaks = dedup_peaks(peaks);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].start, 10);
        assert_eq!(peaks[1].start, 100);
        assert_eq!(peaks[1].rank, 9.0);
    }
}
