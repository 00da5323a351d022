use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Instant;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mzpeaks::Tolerance;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzsling::{
    annotate_envelopes, process_sample, AdductCache, AdductTable, LcMsRun, NoiseFloor,
    SampleFeatures, SampleParams, SlingError,
};
use mzsling_align::{
    annotate_groups, AlignedGroup, AlignmentError, AlignmentStrategy, DensityAligner,
    FragmentClusterer, IncrementalAligner,
};

use crate::adducts::load_adducts;
use crate::args::{non_negative_float, AlignmentMethod};
use crate::progress::ProgressRecord;
use crate::reader::read_run;
use crate::time_range::TimeRange;
use crate::write::{write_json, write_report, SampleLabel};

#[derive(Debug, Error)]
pub enum MZSlingerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read or write CSV: {0}")]
    CsvError(
        #[source]
        #[from]
        csv::Error,
    ),
    #[error("Failed to write JSON: {0}")]
    JsonError(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Invalid configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("Failed to configure logging: {0}")]
    LoggingError(String),
    #[error(transparent)]
    SampleError(#[from] SlingError),
    #[error(transparent)]
    AlignmentError(#[from] AlignmentError),
    #[error("No input file could be processed")]
    NoSamples,
}

/// Set up the global subscriber, writing to STDERR and optionally to `log_file`.
///
/// The returned guard must be held until the program exits so the file writer is flushed.
pub fn configure_log(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, MZSlingerError> {
    let stderr_layer = fmt::layer()
        .compact()
        .with_timer(fmt::time::ChronoLocal::rfc_3339())
        .with_writer(io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        );

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(fs::File::create(path)?);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(tracing::Level::DEBUG.into())
                        .from_env_lossy(),
                );
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| MZSlingerError::LoggingError(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| MZSlingerError::LoggingError(e.to_string()))?;
    Ok(guard)
}

/// A display name for each input, its file stem, suffixed with the sample number
/// when two inputs share a stem
fn sample_labels(inputs: &[PathBuf]) -> Vec<SampleLabel> {
    let stems: Vec<String> = inputs
        .iter()
        .map(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "sample".to_string())
        })
        .collect();
    stems
        .iter()
        .enumerate()
        .map(|(sample, stem)| {
            let shared = stems.iter().filter(|s| *s == stem).count() > 1;
            SampleLabel {
                sample,
                name: if shared {
                    format!("{stem}_{sample}")
                } else {
                    stem.clone()
                },
            }
        })
        .collect()
}

/// Trace, group and align LC-MS features across mass spectrometry runs.
///
/// Read each input file, trace chromatograms, group them into isotope envelopes and
/// align the envelopes of all the files, writing one CSV row per aligned group.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct MZSlinger {
    /// The paths to read spectra from, one sample per file
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// The path to write the CSV report to, or if '-' is passed, write to STDOUT
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write every aligned group to as JSON
    #[arg(short = 'j', long = "json-file")]
    pub json_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzslinger.toml` in the working directory.
    /// Environment variables prefixed with `MZSLINGER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// The time range to process, denoted (start?)-(stop?)
    #[arg(
        short='r',
        long="time-range",
        value_parser=TimeRange::from_str,
        value_name="BEGIN-END",
        long_help=r#"The time range to process, denoted (start?)-(stop?)

If a start is not specified, processing begins from the start of the run.
If a stop is not specified, processing stops at the end of the run.
"#
    )]
    pub time_range: Option<TimeRange>,

    /// The m/z tolerance in parts-per-million for tracing and isotope matching
    #[arg(short = 'p', long = "ppm", default_value_t = 20.0, value_parser = non_negative_float)]
    pub ppm: f64,

    /// The noise floor is this many standard deviations above the mean MS1 intensity
    #[arg(short = 'k', long = "noise-deviations", default_value_t = 2.0)]
    pub noise_deviations: f64,

    /// A fixed noise floor, overriding `--noise-deviations`
    #[arg(short = 'n', long = "noise-floor", value_parser = non_negative_float)]
    pub noise_floor: Option<f64>,

    /// The largest charge state to consider when building isotope envelopes
    #[arg(
        short = 'z',
        long = "max-charge",
        default_value_t = 3,
        value_parser = clap::value_parser!(i32).range(1..),
    )]
    pub max_charge: i32,

    /// The tolerance in parts-per-million for matching an MS2 precursor to an MS1 point
    #[arg(long = "precursor-ppm", default_value_t = 20.0, value_parser = non_negative_float)]
    pub precursor_ppm: f64,

    /// How to align isotope envelopes across samples
    #[arg(short = 'a', long = "alignment", default_value = "density")]
    pub alignment: AlignmentMethod,

    /// The density clustering radius on the normalized (m/z, time) plane
    #[arg(short = 'e', long = "align-epsilon", default_value_t = 0.005, value_parser = non_negative_float)]
    pub align_epsilon: f64,

    /// The retention time window for incremental alignment
    #[arg(long = "time-window", default_value_t = 0.5, value_parser = non_negative_float)]
    pub time_window: f64,

    /// The number of other samples an aligned group must be supported by,
    /// two fewer than the number of samples if not given
    #[arg(short = 'm', long = "min-support")]
    pub min_support: Option<usize>,

    /// The m/z radius for clustering fragments within an aligned group
    #[arg(short = 'f', long = "fragment-epsilon", default_value_t = 0.01, value_parser = non_negative_float)]
    pub fragment_epsilon: f64,

    /// A CSV of adducts with columns `result_mz,ion_name,formula,compound_name,charge`
    #[arg(long = "adducts")]
    pub adducts: Option<PathBuf>,
}

impl Default for MZSlinger {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_file: PathBuf::from("-"),
            json_file: None,
            log_file: None,
            config_file: None,
            threads: -1,
            time_range: None,
            ppm: 20.0,
            noise_deviations: 2.0,
            noise_floor: None,
            max_charge: 3,
            precursor_ppm: 20.0,
            alignment: AlignmentMethod::Density,
            align_epsilon: 0.005,
            time_window: 0.5,
            min_support: None,
            fragment_epsilon: 0.01,
            adducts: None,
        }
    }
}

impl MZSlinger {
    /// Layer `mzslinger.toml`, the `--config-file` and `MZSLINGER_` environment variables
    /// over these arguments
    pub fn configure(self) -> Result<Self, MZSlingerError> {
        let mut config = Figment::from(Serialized::defaults(&self))
            .merge(Toml::file("mzslinger.toml"));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed("MZSLINGER_"));
        Ok(config.extract()?)
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZSlingerError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    pub fn sample_params(&self) -> SampleParams {
        let mut params = SampleParams::default();
        params.noise = match self.noise_floor {
            Some(floor) => NoiseFloor::Fixed(floor),
            None => NoiseFloor::MeanPlusDeviations(self.noise_deviations),
        };
        params.trace.ppm = self.ppm;
        params.envelope.ppm = self.ppm;
        params.envelope.max_charge = self.max_charge;
        params
    }

    fn aligner(&self) -> Box<dyn AlignmentStrategy + Send + Sync> {
        let fragments = FragmentClusterer::new(self.fragment_epsilon, 1);
        match self.alignment {
            AlignmentMethod::Density => Box::new(
                DensityAligner::new(self.align_epsilon, self.min_support).with_fragments(fragments),
            ),
            AlignmentMethod::Incremental => Box::new(
                IncrementalAligner::new(self.ppm, self.time_window, self.min_support)
                    .with_fragments(fragments),
            ),
        }
    }

    pub fn main(&self) -> Result<(), MZSlingerError> {
        info!(
            "mzslinger v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        for path in self.inputs.iter() {
            info!("Input: {}", path.display());
        }
        info!("Output: {}", self.output_file.display());
        self.create_threadpool()?.install(|| self.run())
    }

    fn read_inputs(&self, progress: &mut ProgressRecord) -> Vec<(usize, LcMsRun)> {
        let tolerance = Tolerance::PPM(self.precursor_ppm);
        let reads: Vec<_> = self
            .inputs
            .par_iter()
            .map(|path| read_run(path, self.time_range, tolerance))
            .collect();
        let mut runs = Vec::with_capacity(reads.len());
        for (sample, (path, result)) in self.inputs.iter().zip(reads).enumerate() {
            match result {
                Ok((run, read_progress)) => {
                    *progress += read_progress;
                    runs.push((sample, run));
                }
                Err(e) => {
                    error!("Failed to read {}: {e}", path.display());
                    progress.samples_failed += 1;
                }
            }
        }
        runs
    }

    /// Build the isotope envelopes of every run, match them to adducts, and align them
    pub fn process_runs(
        &self,
        runs: &[(usize, LcMsRun)],
        adducts: Option<&AdductCache<AdductTable>>,
        progress: &mut ProgressRecord,
    ) -> Result<Vec<AlignedGroup>, MZSlingerError> {
        let params = self.sample_params();
        let results: Vec<Result<SampleFeatures, SlingError>> = runs
            .par_iter()
            .map(|(sample, run)| {
                let mut features = process_sample(*sample, run, &params)?;
                if let Some(cache) = adducts {
                    annotate_envelopes(&mut features.envelopes, cache)?;
                }
                Ok(features)
            })
            .collect();

        let mut samples = Vec::with_capacity(results.len());
        for ((sample, _), result) in runs.iter().zip(results) {
            match result {
                Ok(features) => {
                    progress.record_sample(&features.summary);
                    samples.push(features);
                }
                Err(e) => {
                    warn!("Sample {sample} failed and was skipped: {e}");
                    progress.samples_failed += 1;
                }
            }
        }
        if samples.is_empty() {
            return Err(MZSlingerError::NoSamples);
        }

        let mut groups = self.aligner().align(samples)?;
        if let Some(cache) = adducts {
            annotate_groups(&mut groups, cache)?;
        }
        Ok(groups)
    }

    fn run(&self) -> Result<(), MZSlingerError> {
        let start = Instant::now();
        let adducts = self
            .adducts
            .as_deref()
            .map(load_adducts)
            .transpose()?
            .map(AdductCache::new);

        let mut progress = ProgressRecord::default();
        let runs = self.read_inputs(&mut progress);
        let groups = self.process_runs(&runs, adducts.as_ref(), &mut progress)?;
        let labels = sample_labels(&self.inputs);

        if self.output_file == Path::new("-") {
            write_report(io::stdout().lock(), &groups, &labels)?;
        } else {
            write_report(
                io::BufWriter::new(fs::File::create(&self.output_file)?),
                &groups,
                &labels,
            )?;
        }
        if let Some(path) = self.json_file.as_ref() {
            write_json(io::BufWriter::new(fs::File::create(path)?), &groups, &labels)?;
        }

        info!(
            "MS1 Spectra: {} | MSn Spectra: {} | Envelopes: {} | Aligned Groups: {}",
            progress.ms1_spectra,
            progress.msn_spectra,
            progress.envelopes,
            groups.len()
        );
        if progress.samples_failed > 0 {
            warn!("{} of {} samples failed", progress.samples_failed, self.inputs.len());
        }
        info!("Finished in {:0.3} seconds", start.elapsed().as_secs_f64());
        Ok(())
    }
}
