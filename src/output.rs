//! Scored variant table writer

use crate::pipeline::{ScoreRecord, ScoringRun};
use crate::scoring::Statistic;
use crate::table::{VariantColumn, VariantSchema};
use crate::utils::create_writer;
use crate::VarscoreResult;
use std::path::Path;

/// Suffix appended to a statistic name for its p-value column
pub const PVALUE_SUFFIX: &str = ".pval";

/// Output file names derived from `--out-prefix`
pub fn score_table_path(prefix: &str) -> String {
    format!("{}.variant_scores.tsv", prefix)
}

pub fn artifact_path(prefix: &str) -> String {
    format!("{}.variant_predictions.h5", prefix)
}

fn base_statistics() -> impl Iterator<Item = Statistic> {
    Statistic::ALL.into_iter().filter(|s| !s.requires_peaks())
}

fn peak_statistics() -> impl Iterator<Item = Statistic> {
    Statistic::ALL.into_iter().filter(|s| s.requires_peaks())
}

/// Column names of the scored table, in write order
pub fn score_table_header(schema: VariantSchema, has_background: bool, has_peaks: bool) -> Vec<String> {
    let mut header: Vec<String> = schema
        .output_columns()
        .map(|c| c.name().to_string())
        .collect();

    header.extend(
        ["allele1_pred_counts", "allele2_pred_counts", "logfc", "abs_logfc", "jsd", "original_jsd", "logfc_x_jsd", "abs_logfc_x_jsd"]
            .iter()
            .map(|s| s.to_string()),
    );
    if has_background {
        header.extend(base_statistics().map(|s| format!("{}{}", s.name(), PVALUE_SUFFIX)));
    }

    if has_peaks {
        header.push("allele1_percentile".to_string());
        header.push("allele2_percentile".to_string());
        header.extend(peak_statistics().map(|s| s.name().to_string()));
        if has_background {
            header.extend(peak_statistics().map(|s| format!("{}{}", s.name(), PVALUE_SUFFIX)));
        }
    }

    header
}

/// NaN becomes an empty field
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn variant_field(record: &ScoreRecord, column: VariantColumn, schema: VariantSchema) -> String {
    let variant = &record.variant;
    match column {
        VariantColumn::Chrom => variant.chrom.clone(),
        VariantColumn::Pos if schema.is_zero_based() => variant.pos.saturating_sub(1).to_string(),
        VariantColumn::Pos => variant.pos.to_string(),
        VariantColumn::End => variant.end.map(|e| e.to_string()).unwrap_or_default(),
        VariantColumn::Allele1 => variant.allele1.clone(),
        VariantColumn::Allele2 => variant.allele2.clone(),
        VariantColumn::VariantId => variant.variant_id.clone(),
        VariantColumn::Ignore => String::new(),
    }
}

/// Fields of one row, aligned with [`score_table_header`]
pub fn score_table_row(
    record: &ScoreRecord,
    schema: VariantSchema,
    has_background: bool,
    has_peaks: bool,
) -> Vec<String> {
    let scores = &record.scores;
    let stat = |s: Statistic| format_value(scores.statistic(s).unwrap_or(f64::NAN));
    let pval = |s: Statistic| format_value(record.pvalue(s).unwrap_or(f64::NAN));

    let mut row: Vec<String> = schema
        .output_columns()
        .map(|c| variant_field(record, c, schema))
        .collect();

    row.push(format_value(scores.allele1_count));
    row.push(format_value(scores.allele2_count));
    row.push(stat(Statistic::Logfc));
    row.push(stat(Statistic::AbsLogfc));
    row.push(stat(Statistic::Jsd));
    row.push(format_value(scores.original_jsd));
    row.push(stat(Statistic::LogfcXJsd));
    row.push(stat(Statistic::AbsLogfcXJsd));
    if has_background {
        row.extend(base_statistics().map(pval));
    }

    if has_peaks {
        let (allele1, allele2) = scores
            .percentiles
            .map(|p| (p.allele1, p.allele2))
            .unwrap_or((f64::NAN, f64::NAN));
        row.push(format_value(allele1));
        row.push(format_value(allele2));
        row.extend(peak_statistics().map(stat));
        if has_background {
            row.extend(peak_statistics().map(pval));
        }
    }

    row
}

/// Write the scored table as TSV; a `.gz` path is compressed
pub fn write_score_table<P: AsRef<Path>>(
    path: P,
    schema: VariantSchema,
    run: &ScoringRun,
) -> VarscoreResult<()> {
    let has_background = run.background.is_some();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(create_writer(&path)?);

    writer.write_record(score_table_header(schema, has_background, run.has_peaks))?;
    for record in &run.records {
        writer.write_record(score_table_row(record, schema, has_background, run.has_peaks))?;
    }
    writer.flush()?;

    log::info!(
        "Wrote {} scored variants to {:?}",
        run.records.len(),
        path.as_ref()
    );
    Ok(())
}
