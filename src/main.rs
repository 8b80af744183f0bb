use anyhow::{Result, bail};
use audio_volume_normalize::filter::ExtensionFilter;
use audio_volume_normalize::error::Error;
use audio_volume_normalize::loudnorm::{Loudnorm, LoudnormParams, ToolRunner};
use audio_volume_normalize::{
    BatchOptions, GainMode, Normalization, normalize_folder, normalize_single_file,
};
use clap::Parser;
use log::{debug, error};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about = "Normaliza ou aumenta volume de um arquivo de áudio", long_about = None)]
struct Cli {
    /// Caminho do arquivo de entrada
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Caminho de uma pasta contendo arquivos de áudio para processar em lote
    #[arg(short = 'd', long)]
    input_dir: Option<PathBuf>,

    /// Arquivo de saída (padrão: <input>_normalized.mp3) ou diretório quando usar --input-dir
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Extensões a processar (separadas por vírgula), ex: mp3,wav
    #[arg(short, long, default_value = "mp3")]
    exts: String,

    /// Aumentar volume em dB (ex.: 10)
    #[arg(long, conflicts_with = "normalize", allow_hyphen_values = true)]
    gain: Option<i32>,

    /// Normalizar o áudio (padrão)
    #[arg(long)]
    normalize: bool,

    /// Aplicar normalização EBU R128 via ffmpeg loudnorm (valor LUFS, ex: -14)
    #[arg(long, allow_hyphen_values = true)]
    loudness: Option<f64>,

    /// Pico verdadeiro máximo em dBTP para --loudness
    #[arg(long, default_value_t = -1.5, allow_hyphen_values = true)]
    true_peak: f64,

    /// Faixa de loudness alvo em LU para --loudness
    #[arg(long, default_value_t = 11.0)]
    lra: f64,

    /// Executável do ffmpeg
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl Cli {
    /// Loudness wins over gain, gain over the default peak normalization
    fn normalization(&self) -> Normalization {
        if let Some(target_lufs) = self.loudness {
            return Normalization::Loudness(LoudnormParams {
                target_lufs,
                true_peak: self.true_peak,
                lra: self.lra,
            });
        }
        match self.gain {
            Some(gain) if !self.normalize => Normalization::InProcess(GainMode::Fixed(gain as f64)),
            _ => Normalization::InProcess(GainMode::Peak),
        }
    }
}

fn main() -> ExitCode {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Warn)
        .format_timestamp_secs()
        .parse_filters("symphonia=error")
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    let loudnorm = Loudnorm::new(&cli.ffmpeg);
    ExitCode::from(execute(&cli, &loudnorm))
}

/// Runs the command and prints its outcome. Returns the process exit status.
fn execute<R: ToolRunner>(cli: &Cli, loudnorm: &Loudnorm<R>) -> u8 {
    match run(cli, loudnorm) {
        Ok(line) => {
            println!("{line}");
            0
        }
        Err(e) => {
            eprintln!("{}", error_line(&e));
            1
        }
    }
}

/// Usage and missing-directory messages are printed as they are, everything else
/// carries the `Erro:` prefix
fn error_line(e: &anyhow::Error) -> String {
    match e.downcast_ref::<Error>() {
        None | Some(Error::DirectoryNotFound(_)) => e.to_string(),
        Some(_) => format!("Erro: {e}"),
    }
}

/// Processes the request and returns the closing line for stdout
fn run<R: ToolRunner>(cli: &Cli, loudnorm: &Loudnorm<R>) -> Result<String> {
    let normalization = cli.normalization();
    debug!("Normalization: {:?}", normalization);

    // Batch directory processing
    if let Some(input_dir) = &cli.input_dir {
        let options = BatchOptions {
            input_dir: input_dir.clone(),
            output_dir: cli.output.clone(),
            extensions: ExtensionFilter::parse(&cli.exts),
            normalization,
        };
        debug!("  Input Directory: {:?}", options.input_dir);
        debug!("  Output Directory: {:?}", options.output_dir());
        debug!("  Extensions: {:?}", options.extensions);

        let report = normalize_folder(&options, loudnorm)?;
        if !report.failures.is_empty() {
            error!("{} files failed", report.failures.len());
        }
        return Ok(format!("Concluído. Arquivos processados: {}", report.processed));
    }

    // Single file processing
    let Some(input) = &cli.input else {
        bail!("Informe --input para um arquivo ou --input-dir para processar uma pasta.");
    };
    let out = normalize_single_file(input, cli.output.as_deref(), &normalization, loudnorm)?;
    Ok(format!("Áudio salvo como: {}", out.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_volume_normalize::loudnorm::ToolOutput;
    use clap::CommandFactory;
    use std::ffi::OsString;
    use std::fs;
    use std::path::Path;

    /// Answers every invocation with a fixed exit code
    struct ExitWith(i32);

    impl ToolRunner for ExitWith {
        fn run(&self, _: &Path, _: &[OsString]) -> std::io::Result<ToolOutput> {
            Ok(ToolOutput {
                code: Some(self.0),
                stderr: String::new(),
            })
        }
    }

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("normalize-audio").chain(args.iter().copied()))
    }

    fn ffmpeg(code: i32) -> Loudnorm<ExitWith> {
        Loudnorm::with_runner("ffmpeg", ExitWith(code))
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn peak_is_the_default() {
        let cli = parse(&["-i", "a.mp3"]).unwrap();
        assert_eq!(cli.normalization(), Normalization::InProcess(GainMode::Peak));
        assert_eq!(cli.exts, "mp3");
    }

    #[test]
    fn gain_selects_fixed_mode() {
        let cli = parse(&["-i", "a.mp3", "--gain", "-3"]).unwrap();
        assert_eq!(
            cli.normalization(),
            Normalization::InProcess(GainMode::Fixed(-3.0))
        );
    }

    #[test]
    fn gain_and_normalize_conflict() {
        let err = parse(&["-i", "a.mp3", "--gain", "6", "--normalize"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn loudness_overrides_gain() {
        let cli = parse(&["-d", "music", "--gain", "6", "--loudness", "-14"]).unwrap();
        assert_eq!(
            cli.normalization(),
            Normalization::Loudness(LoudnormParams::with_target(-14.0))
        );
    }

    #[test]
    fn batch_summary_counts_processed_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        fs::write(dir.path().join("b.wav"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let input_dir = dir.path().to_string_lossy().into_owned();

        let cli = parse(&["-d", &input_dir, "--exts", "mp3,wav", "--loudness", "-14"]).unwrap();
        let line = run(&cli, &ffmpeg(0)).unwrap();
        assert_eq!(line, "Concluído. Arquivos processados: 2");
        assert_eq!(execute(&cli, &ffmpeg(0)), 0);
    }

    #[test]
    fn batch_exits_zero_when_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        let input_dir = dir.path().to_string_lossy().into_owned();

        let cli = parse(&["-d", &input_dir, "--loudness", "-14"]).unwrap();
        assert_eq!(run(&cli, &ffmpeg(1)).unwrap(), "Concluído. Arquivos processados: 0");
        assert_eq!(execute(&cli, &ffmpeg(1)), 0);
    }

    #[test]
    fn single_file_tool_failure_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.mp3");
        fs::write(&input, b"x").unwrap();
        let output = dir.path().join("out.mp3");

        let cli = parse(&[
            "-i",
            &input.to_string_lossy(),
            "-o",
            &output.to_string_lossy(),
            "--loudness",
            "-14",
        ])
        .unwrap();
        let err = run(&cli, &ffmpeg(1)).unwrap_err();
        assert_eq!(error_line(&err), "Erro: ffmpeg exited with status 1");
        assert_eq!(execute(&cli, &ffmpeg(1)), 1);
        assert_eq!(execute(&cli, &ffmpeg(0)), 0);
    }

    #[test]
    fn missing_input_is_an_error() {
        let cli = parse(&[]).unwrap();
        let err = run(&cli, &ffmpeg(0)).unwrap_err();
        assert_eq!(
            error_line(&err),
            "Informe --input para um arquivo ou --input-dir para processar uma pasta."
        );
        assert_eq!(execute(&cli, &ffmpeg(0)), 1);
    }

    #[test]
    fn missing_file_is_reported() {
        let cli = parse(&["--input", "missing.mp3"]).unwrap();
        let err = run(&cli, &ffmpeg(0)).unwrap_err();
        assert_eq!(error_line(&err), "Erro: Arquivo não encontrado: missing.mp3");
        assert_eq!(execute(&cli, &ffmpeg(0)), 1);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let cli = parse(&["--input-dir", "definitely/not/here"]).unwrap();
        let err = run(&cli, &ffmpeg(0)).unwrap_err();
        assert_eq!(
            error_line(&err),
            "Diretório não encontrado: definitely/not/here"
        );
        assert_eq!(execute(&cli, &ffmpeg(0)), 1);
    }
}
