//! EBU R128 normalization delegated to an external ffmpeg binary.

use crate::error::Error;
use log::debug;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Bitrate passed to the external encoder
pub const LOUDNORM_BITRATE: &str = "192k";

/// Parameters of the `loudnorm` filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnormParams {
    /// Integrated loudness target in LUFS
    pub target_lufs: f64,
    /// Maximum true peak in dBTP
    pub true_peak: f64,
    /// Loudness range target in LU
    pub lra: f64,
}

impl Default for LoudnormParams {
    fn default() -> Self {
        LoudnormParams {
            target_lufs: -14.0,
            true_peak: -1.5,
            lra: 11.0,
        }
    }
}

impl LoudnormParams {
    pub fn with_target(target_lufs: f64) -> Self {
        LoudnormParams {
            target_lufs,
            ..Default::default()
        }
    }

    /// Filter graph string, e.g. `loudnorm=I=-14.0:TP=-1.5:LRA=11`
    pub fn filter_graph(&self) -> String {
        // `{:?}` keeps the decimal point on whole numbers, `{}` drops it
        format!(
            "loudnorm=I={:?}:TP={:?}:LRA={}",
            self.target_lufs, self.true_peak, self.lra
        )
    }
}

/// What is left of a finished external process
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion
pub trait ToolRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<ToolOutput>;
}

/// Spawns real processes and blocks until they exit
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<ToolOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        Ok(ToolOutput {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Loudness normalizer bound to one ffmpeg executable and runner
#[derive(Debug, Clone)]
pub struct Loudnorm<R = ProcessRunner> {
    ffmpeg: PathBuf,
    runner: R,
}

impl Loudnorm<ProcessRunner> {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self::with_runner(ffmpeg, ProcessRunner)
    }
}

impl Default for Loudnorm<ProcessRunner> {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl<R: ToolRunner> Loudnorm<R> {
    pub fn with_runner(ffmpeg: impl Into<PathBuf>, runner: R) -> Self {
        Loudnorm {
            ffmpeg: ffmpeg.into(),
            runner,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Full argument list for one conversion
    pub fn command_args(input: &Path, output: &Path, params: &LoudnormParams) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.push("-af".into());
        args.push(params.filter_graph().into());
        args.push("-b:a".into());
        args.push(LOUDNORM_BITRATE.into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Normalizes `input` into `output`, overwriting it. Returns the output path.
    pub fn normalize(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        params: &LoudnormParams,
    ) -> Result<PathBuf, Error> {
        let input = input.as_ref();
        let output = output.as_ref();
        if !input.is_file() {
            return Err(Error::NotFound(input.to_path_buf()));
        }

        let args = Self::command_args(input, output, params);
        debug!("Running {:?} {:?}", self.ffmpeg, args);
        let program = program_name(&self.ffmpeg);
        let result = self
            .runner
            .run(&self.ffmpeg, &args)
            .map_err(|source| Error::ToolSpawn {
                program: program.clone(),
                source,
            })?;

        if !result.success() {
            return Err(Error::ToolFailed {
                program,
                code: result.code,
                stderr: result.stderr,
            });
        }
        Ok(output.to_path_buf())
    }
}

fn program_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(OsStr::new("ffmpeg"))
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    /// Records every invocation and answers with a fixed exit code
    #[derive(Debug, Default)]
    pub(crate) struct FakeRunner {
        pub code: Option<i32>,
        pub calls: RefCell<Vec<(PathBuf, Vec<OsString>)>>,
    }

    impl FakeRunner {
        pub fn exiting(code: i32) -> Self {
            FakeRunner {
                code: Some(code),
                calls: RefCell::default(),
            }
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<ToolOutput> {
            self.calls
                .borrow_mut()
                .push((program.to_path_buf(), args.to_vec()));
            Ok(ToolOutput {
                code: self.code,
                stderr: if self.code == Some(0) {
                    String::new()
                } else {
                    "Invalid data found when processing input".to_string()
                },
            })
        }
    }

    struct MissingRunner;

    impl ToolRunner for MissingRunner {
        fn run(&self, _: &Path, _: &[OsString]) -> std::io::Result<ToolOutput> {
            Err(std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    fn input_file(dir: &Path) -> PathBuf {
        let path = dir.join("in.wav");
        fs::write(&path, b"RIFF").unwrap();
        path
    }

    #[test]
    fn default_filter_graph() {
        assert_eq!(
            LoudnormParams::default().filter_graph(),
            "loudnorm=I=-14.0:TP=-1.5:LRA=11"
        );
        assert_eq!(
            LoudnormParams {
                target_lufs: -23.0,
                true_peak: -2.0,
                lra: 7.5
            }
            .filter_graph(),
            "loudnorm=I=-23.0:TP=-2.0:LRA=7.5"
        );
    }

    #[test]
    fn invokes_tool_with_expected_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let input = input_file(dir.path());
        let output = dir.path().join("out.mp3");
        let loudnorm = Loudnorm::with_runner("/opt/ffmpeg", FakeRunner::exiting(0));

        let result = loudnorm
            .normalize(&input, &output, &LoudnormParams::with_target(-14.0))
            .unwrap();
        assert_eq!(result, output);

        let calls = loudnorm.runner().calls.borrow();
        assert_eq!(calls.len(), 1);
        let (program, args) = &calls[0];
        assert_eq!(program, Path::new("/opt/ffmpeg"));
        let expected: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.clone().into_os_string(),
            "-af".into(),
            "loudnorm=I=-14.0:TP=-1.5:LRA=11".into(),
            "-b:a".into(),
            "192k".into(),
            output.clone().into_os_string(),
        ];
        assert_eq!(args, &expected);
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = input_file(dir.path());
        let loudnorm = Loudnorm::with_runner("ffmpeg", FakeRunner::exiting(1));

        let err = loudnorm
            .normalize(&input, dir.path().join("out.mp3"), &LoudnormParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::ToolFailed { code: Some(1), .. }));
        assert!(err.to_string().contains("exited with status 1"));
        assert_eq!(loudnorm.runner().calls.borrow().len(), 1);
    }

    #[test]
    fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = input_file(dir.path());
        let loudnorm = Loudnorm::with_runner("/nowhere/ffmpeg", MissingRunner);

        let err = loudnorm
            .normalize(&input, dir.path().join("out.mp3"), &LoudnormParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::ToolSpawn { ref program, .. } if program == "ffmpeg"));
    }

    #[test]
    fn missing_input_never_reaches_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let loudnorm = Loudnorm::with_runner("ffmpeg", FakeRunner::exiting(0));

        let err = loudnorm
            .normalize(
                dir.path().join("missing.mp3"),
                dir.path().join("out.mp3"),
                &LoudnormParams::default(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("não encontrado"));
        assert!(loudnorm.runner().calls.borrow().is_empty());
    }
}
