/// Module for decoding and transforming audio in memory
pub mod audio;
/// Module for error handling
pub mod error;
/// Module for selecting files in batch mode
pub mod filter;
/// Module for loudness normalization through ffmpeg
pub mod loudnorm;
/// Module for saving audio files
pub mod save;

use crate::audio::{PEAK_HEADROOM_DB, decode_file};
use crate::error::Error;
use crate::filter::{ExtensionFilter, NORMALIZED_SUFFIX, find_audio_files, resolve};
use crate::loudnorm::{Loudnorm, LoudnormParams, ToolRunner};
use crate::save::{DEFAULT_BITRATE, save_as_mp3};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::Display;

/// Represents audio file formats with a known container
#[derive(Debug, PartialEq, Display)]
#[strum(serialize_all = "camelCase")]
pub enum AudioFormats {
    Wav,
    Mp3,
    Flac,
    Ogg,
    M4a,
    Aac,
    Opus,
}

impl AudioFormats {
    /// Creates an AudioFormats enum from a file path based on its extension
    #[inline]
    pub fn from_path(value: impl AsRef<Path>) -> Option<Self> {
        Some(
            match value
                .as_ref()
                .extension()
                .unwrap_or_default()
                .to_string_lossy()
                .to_lowercase()
                .as_ref()
            {
                "wav" => Self::Wav,
                "mp3" => Self::Mp3,
                "flac" => Self::Flac,
                "ogg" => Self::Ogg,
                "m4a" => Self::M4a,
                "aac" => Self::Aac,
                "opus" => Self::Opus,
                _ => return None,
            },
        )
    }
}

/// How the in-process normalizer changes the volume
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GainMode {
    /// Scale so the peak sits just below full scale
    #[default]
    Peak,
    /// Add a fixed offset in dB, may be negative
    Fixed(f64),
}

/// Which normalizer handles each file
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// Decode, transform and encode in-process
    InProcess(GainMode),
    /// EBU R128 through the external tool
    Loudness(LoudnormParams),
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::InProcess(GainMode::Peak)
    }
}

/// Configuration options for a directory run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory walked recursively for input files
    pub input_dir: PathBuf,
    /// Where outputs land, flat. Defaults to the input directory.
    pub output_dir: Option<PathBuf>,
    /// File-name extensions to process
    pub extensions: ExtensionFilter,
    pub normalization: Normalization,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            input_dir: PathBuf::from("."),
            output_dir: None,
            extensions: ExtensionFilter::default(),
            normalization: Normalization::default(),
        }
    }
}

impl BatchOptions {
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(self.input_dir.as_path())
    }
}

/// Outcome of a directory run
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Files written successfully
    pub processed: usize,
    /// Inputs that failed, with the error message
    pub failures: Vec<(PathBuf, String)>,
    /// Output path, earlier input and later input for outputs written twice in one run
    pub collisions: Vec<(PathBuf, PathBuf, PathBuf)>,
}

/// `<stem>_normalized.mp3`, relative to the working directory
pub fn default_output_path(input: impl AsRef<Path>) -> PathBuf {
    let stem = input.as_ref().file_stem().unwrap_or_default().to_string_lossy();
    PathBuf::from(format!("{stem}{NORMALIZED_SUFFIX}"))
}

/// Where a batch run writes the normalized copy of `input`
pub fn batch_output_path(output_dir: impl AsRef<Path>, input: impl AsRef<Path>) -> PathBuf {
    output_dir.as_ref().join(default_output_path(input))
}

/// Decodes `input`, applies `mode` and writes an mp3.
///
/// Without `output` the file is written to `<stem>_normalized.mp3` in the working
/// directory. Returns the path written.
pub fn normalize_file(
    input: impl AsRef<Path>,
    output: Option<&Path>,
    mode: GainMode,
) -> Result<PathBuf, Error> {
    let input = input.as_ref();
    if !input.is_file() {
        return Err(Error::NotFound(input.to_path_buf()));
    }

    let mut audio = decode_file(input).map_err(|source| Error::Decode {
        path: input.to_path_buf(),
        source,
    })?;

    match mode {
        GainMode::Peak => {
            let gain = audio.normalize_peak(PEAK_HEADROOM_DB);
            debug!("  -> Peak normalization gain: {:.2} dB", gain);
        }
        GainMode::Fixed(gain_db) => {
            audio.apply_gain(gain_db);
            debug!("  -> Fixed gain: {:.2} dB", gain_db);
        }
    }

    let output_path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
    save_as_mp3(&output_path, &audio, DEFAULT_BITRATE).map_err(|source| Error::Writing {
        path: output_path.clone(),
        source,
    })?;

    debug!("Successfully wrote normalized file to {:?}", output_path);
    Ok(output_path)
}

/// Single-file entry point, dispatching on `normalization`
pub fn normalize_single_file<R: ToolRunner>(
    input: impl AsRef<Path>,
    output: Option<&Path>,
    normalization: &Normalization,
    loudnorm: &Loudnorm<R>,
) -> Result<PathBuf, Error> {
    let input = input.as_ref();
    match normalization {
        Normalization::InProcess(mode) => normalize_file(input, output, *mode),
        Normalization::Loudness(params) => {
            let output_path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
            loudnorm.normalize(input, output_path, params)
        }
    }
}

/// Normalize every matching file under `options.input_dir`, one at a time.
///
/// A file that fails is reported and skipped; only problems with the directories
/// themselves abort the run.
pub fn normalize_folder<R: ToolRunner>(
    options: &BatchOptions,
    loudnorm: &Loudnorm<R>,
) -> Result<BatchReport, Error> {
    // 1. Validate options
    validate_options(options)?;
    let output_dir = options.output_dir();

    // 2. Discover audio files
    info!("Discovering audio files in {:?}...", options.input_dir);
    let audio_files = find_audio_files(&options.input_dir, output_dir, &options.extensions);
    info!("Found {} audio files.", audio_files.len());

    // 3. Process them in order
    let pb = ProgressBar::new(audio_files.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}").expect("Internal Error: Failed to set progress bar style")
        .progress_chars("#>-"));
    pb.set_message("Processing files");

    let mut report = BatchReport::default();
    let mut written: HashMap<PathBuf, PathBuf> = HashMap::new();

    for input in &audio_files {
        let output = batch_output_path(output_dir, input);
        let result = match &options.normalization {
            Normalization::InProcess(mode) => normalize_file(input, Some(output.as_path()), *mode),
            Normalization::Loudness(params) => loudnorm.normalize(input, &output, params),
        };
        match result {
            Ok(out) => {
                pb.suspend(|| println!("Processado: {} -> {}", input.display(), out.display()));
                report.processed += 1;
                if let Some(previous) = written.insert(out.clone(), input.clone()) {
                    warn!(
                        "{:?} overwrote the output of {:?} at {:?}",
                        input, previous, out
                    );
                    report.collisions.push((out, previous, input.clone()));
                }
            }
            Err(e) => {
                pb.suspend(|| eprintln!("Erro ao processar {}: {}", input.display(), e));
                report.failures.push((input.clone(), e.to_string()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("Processing done");

    info!(
        "Processing complete. {} files succeeded, {} files failed.",
        report.processed,
        report.failures.len()
    );
    Ok(report)
}

/// Validates batch options and creates the output directory
///
/// # Arguments
/// * `options` - Reference to BatchOptions struct
fn validate_options(options: &BatchOptions) -> Result<(), Error> {
    if !options.input_dir.is_dir() {
        return Err(Error::DirectoryNotFound(options.input_dir.clone()));
    }
    let output_dir = options.output_dir();
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| Error::Io {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        info!("Created output directory: {:?}", output_dir);
    } else if !output_dir.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Output path exists but is not a directory: {:?}",
            output_dir
        )));
    }

    if options.extensions.is_empty() {
        warn!("No extensions given, nothing will be processed.");
    }
    let (input_abs, output_abs) = (resolve(&options.input_dir), resolve(output_dir));
    if input_abs == output_abs {
        warn!(
            "Output directory is the input directory {:?}; only its top-level files will be processed.",
            options.input_dir
        );
    } else if input_abs.starts_with(&output_abs) {
        warn!(
            "Input directory {:?} lies inside the output directory; its subdirectories will be skipped.",
            options.input_dir
        );
    }
    if let Normalization::Loudness(params) = &options.normalization {
        if !params.target_lufs.is_finite() {
            return Err(Error::InvalidOptions(format!(
                "Target loudness must be a finite number: {}",
                params.target_lufs
            )));
        }
        if params.true_peak > 0.0 {
            warn!(
                "Target true peak {:.1} dBTP is above 0 dBFS. This will likely cause clipping in standard formats.",
                params.true_peak
            );
        }
    }
    Ok(())
}
