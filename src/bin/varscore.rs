//! CLI binary for varscore - scores variant effects with a sequence model

use clap::Parser;
use env_logger::Env;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
#[cfg(feature = "hdf5")]
use varscore_rs::artifact::PredictionArtifact;
use varscore_rs::{
    genome::{FastaSource, SequenceSource},
    model::MotifModel,
    output::{artifact_path, score_table_path, write_score_table},
    pipeline::{validate_config, PeakInputs, ScoringInputs, ScoringRun, VariantScorer},
    predict::CallingConvention,
    table::{filter_chrom, load_chrom_sizes, load_peaks, load_variant_table, VariantSchema},
    utils::{
        format_file_size, get_num_cpus, log_memory_usage, validate_file_readable,
        validate_output_prefix, Timer,
    },
    CountTransform, ScoringConfig, VarscoreError, VarscoreResult,
};

#[derive(Parser, Debug)]
#[command(name = "varscore")]
#[command(about = "varscore - predicted regulatory effect scoring for genetic variants")]
#[command(long_about = "
varscore scores genetic variants with a sequence-to-signal model.

For every variant inside its chromosome bounds the tool:
1. Builds allele1 and allele2 windows centered on the variant
2. Predicts counts and profiles for both alleles (and their reverse complements)
3. Computes log fold-change and Jensen-Shannon distance between the alleles
4. Estimates empirical p-values against shuffled-context variants

With --peaks, predicted counts are also ranked against predictions at known
peak summits, adding percentile statistics and their p-values.

Outputs:
- <out-prefix>.variant_scores.tsv: one row per scored variant
- <out-prefix>.variant_predictions.h5: raw predictions in HDF5 (skip with --no-artifact)

The reference FASTA must have a .fai index next to it.
")]
struct Args {
    /// Variant list
    #[arg(short = 'l', long, value_name = "FILE")]
    list: PathBuf,

    /// Indexed reference FASTA
    #[arg(short = 'g', long, value_name = "FILE")]
    genome: PathBuf,

    /// Reference FASTA for peak windows (defaults to --genome)
    #[arg(long, value_name = "FILE")]
    peak_genome: Option<PathBuf>,

    /// Model file (JSON)
    #[arg(short = 'm', long, value_name = "FILE")]
    model: PathBuf,

    /// Prefix for output files; its directory must exist
    #[arg(short = 'o', long, value_name = "PREFIX")]
    out_prefix: String,

    /// Chromosome sizes (chrom, size)
    #[arg(short = 's', long, value_name = "FILE")]
    chrom_sizes: PathBuf,

    /// Chromosome sizes for the peak genome (defaults to --chrom-sizes)
    #[arg(long, value_name = "FILE")]
    peak_chrom_sizes: Option<PathBuf>,

    /// Feed the model auxiliary bias inputs
    #[arg(long, alias = "bias-conditioned")]
    lite: bool,

    /// Windows per predictor call
    #[arg(long, default_value_t = 512)]
    batch_size: usize,

    /// Variant list layout: original, plink, plink2, bed or chrombpnet
    #[arg(long, default_value = "chrombpnet")]
    schema: VariantSchema,

    /// narrowPeak file of reference peaks
    #[arg(short = 'p', long, value_name = "FILE")]
    peaks: Option<PathBuf>,

    /// Shuffled draws per variant; 0 skips the background and its p-values
    #[arg(short = 'n', long, default_value_t = 10)]
    num_shuf: usize,

    /// Total shuffled draws (overrides --num-shuf)
    #[arg(short = 't', long)]
    total_shuf: Option<usize>,

    /// Maximum number of peaks used for percentiles
    #[arg(long)]
    max_peaks: Option<usize>,

    /// Only score variants on this chromosome
    #[arg(short = 'c', long)]
    chrom: Option<String>,

    /// Seed for shuffling and peak subsampling
    #[arg(short = 'r', long, default_value_t = 1234)]
    random_seed: u64,

    /// Do not write the prediction artifact
    #[arg(long, alias = "no-hdf5")]
    no_artifact: bool,

    /// Skip reverse-complement predictions
    #[arg(long)]
    forward_only: bool,

    /// Map count logits with exp or expm1
    #[arg(long, default_value = "exp")]
    count_transform: CountTransform,

    /// Number of threads for predictor calls
    #[arg(long, default_value_t = get_num_cpus())]
    threads: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            batch_size: self.batch_size,
            forward_only: self.forward_only,
            count_transform: self.count_transform,
            num_shuf: (self.num_shuf > 0).then_some(self.num_shuf),
            total_shuf: self.total_shuf,
            max_peaks: self.max_peaks,
            random_seed: self.random_seed,
            threads: self.threads,
        }
    }

    fn calling_convention(&self) -> CallingConvention {
        if self.lite {
            CallingConvention::BiasConditioned
        } else {
            CallingConvention::Plain
        }
    }

    fn input_files(&self) -> Vec<&PathBuf> {
        let mut files = vec![&self.list, &self.genome, &self.model, &self.chrom_sizes];
        files.extend(self.peaks.iter());
        files.extend(self.peak_genome.iter());
        files.extend(self.peak_chrom_sizes.iter());
        files
    }
}

fn init_logging(args: &Args) {
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();
}

fn log_summary(run: &ScoringRun) {
    log::info!("Scored {} variants", run.records.len());
    if let Some(background) = &run.background {
        log::info!("Background: {} shuffled draws", background.len());
    }
    let undefined = run
        .records
        .iter()
        .filter(|r| r.scores.logfc.is_nan())
        .count();
    if undefined > 0 {
        log::warn!("{} variants have an undefined log fold-change", undefined);
    }
}

fn run(args: Args) -> VarscoreResult<()> {
    log::info!("Starting varscore");
    log::info!("Variant list: {:?}", args.list);
    log::info!("Genome: {:?}", args.genome);
    log::info!("Model: {:?}", args.model);
    log::info!("Output prefix: {}", args.out_prefix);

    validate_output_prefix(&args.out_prefix)?;
    for path in args.input_files() {
        validate_file_readable(path)?;
    }

    let config = args.scoring_config();
    validate_config(&config)?;
    log::info!(
        "Configuration: batch_size={}, threads={}, forward_only={}, seed={}",
        config.batch_size,
        config.threads,
        config.forward_only,
        config.random_seed
    );

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
    {
        log::warn!("Could not configure thread pool: {}", e);
    }

    let loading = Timer::new("Loading inputs");
    let mut variants = load_variant_table(&args.list, args.schema)?;
    if let Some(chrom) = &args.chrom {
        variants = filter_chrom(variants, chrom);
        log::info!("Chromosome-specific variants table: {} variants", variants.len());
    }
    let chrom_sizes = load_chrom_sizes(&args.chrom_sizes)?;
    let genome = FastaSource::open(&args.genome)?;
    let model = MotifModel::from_path(&args.model)?;
    let predictor = args.calling_convention().predictor(model);

    let peak_genome = args.peak_genome.as_ref().map(FastaSource::open).transpose()?;
    let peak_chrom_sizes = args
        .peak_chrom_sizes
        .as_ref()
        .map(load_chrom_sizes)
        .transpose()?;
    let peaks = args.peaks.as_ref().map(load_peaks).transpose()?;
    drop(loading);

    let peak_source: &dyn SequenceSource = match &peak_genome {
        Some(source) => source,
        None => &genome,
    };
    let peak_inputs = peaks.map(|peaks| PeakInputs {
        peaks,
        chrom_sizes: peak_chrom_sizes.as_ref().unwrap_or(&chrom_sizes),
        genome: peak_source,
    });

    let scorer = VariantScorer::new(predictor.as_ref(), config)?;
    let mut rng = StdRng::seed_from_u64(args.random_seed);
    let inputs = ScoringInputs {
        variants,
        chrom_sizes: &chrom_sizes,
        genome: &genome,
        peaks: peak_inputs,
    };

    let scoring = Timer::new("Scoring variants");
    let result = scorer.run(inputs, &mut rng)?;
    drop(scoring);
    log_memory_usage("after scoring");
    log_summary(&result);

    let table_path = score_table_path(&args.out_prefix);
    write_score_table(&table_path, args.schema, &result)?;

    let mut written = vec![table_path];
    if !args.no_artifact {
        written.extend(write_artifact(&args.out_prefix, &result)?);
    }

    for path in &written {
        if let Ok(size) = std::fs::metadata(path).map(|m| m.len()) {
            log::info!("Wrote {} ({})", path, format_file_size(size));
        }
    }
    Ok(())
}

#[cfg(feature = "hdf5")]
fn write_artifact(out_prefix: &str, result: &ScoringRun) -> VarscoreResult<Option<String>> {
    let _timer = Timer::new("Writing prediction artifact");
    let path = artifact_path(out_prefix);
    PredictionArtifact::from_run(result)?.write(&path)?;
    Ok(Some(path))
}

#[cfg(not(feature = "hdf5"))]
fn write_artifact(out_prefix: &str, _result: &ScoringRun) -> VarscoreResult<Option<String>> {
    log::warn!(
        "Built without HDF5 support, not writing {}",
        artifact_path(out_prefix)
    );
    Ok(None)
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: VarscoreError) -> ! {
    match error {
        VarscoreError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
            eprintln!("For FASTA files, ensure the index file (.fai) is present.");
        }
        VarscoreError::InvalidVariant(msg) => {
            eprintln!("Error: Invalid variant data: {}", msg);
            eprintln!("Please check that the variant list matches the selected --schema.");
        }
        VarscoreError::InvalidPeak(msg) => {
            eprintln!("Error: Invalid peak data: {}", msg);
            eprintln!("Please check that the peak file is in narrowPeak format.");
        }
        VarscoreError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check the command line options and the model file.");
        }
        VarscoreError::Htslib(ref e) => {
            eprintln!("Error: FASTA processing error: {}", e);
            eprintln!("Please check that the reference FASTA is valid and indexed.");
        }
        VarscoreError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        VarscoreError::Csv(ref e) => {
            eprintln!("Error: Table parsing error: {}", e);
            eprintln!("Input tables must be tab-separated.");
        }
        VarscoreError::Json(ref e) => {
            eprintln!("Error: Model parsing error: {}", e);
        }
        #[cfg(feature = "hdf5")]
        VarscoreError::Hdf5(ref e) => {
            eprintln!("Error: HDF5 error: {}", e);
            eprintln!("Please check that the output directory is writable.");
        }
        VarscoreError::ShapeMismatch(msg) => {
            eprintln!("Error: Prediction shape mismatch: {}", msg);
            eprintln!("The model output does not match its declared lengths.");
        }
        VarscoreError::Consistency(msg) => {
            eprintln!("Error: Prediction order mismatch: {}", msg);
            eprintln!("This is unexpected. Please report this issue.");
        }
        VarscoreError::Prediction(msg) => {
            eprintln!("Error: Prediction failed: {}", msg);
        }
    }
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();
    init_logging(&args);
    if let Err(e) = run(args) {
        handle_error(e);
    }
}
