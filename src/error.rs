use std::path::PathBuf;

use symphonia::core::errors::Error as SymphoniaError;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No compatible audio track found")]
    NoTrack,
    #[error("Unsupported sample format")]
    UnsupportedFormat,
    #[error("Missing sample rate in track parameters")]
    MissingSampleRate,
    #[error("Missing channel layout in track parameters")]
    MissingChannelSpec,
}

#[derive(thiserror::Error, Debug)]
pub enum WritingError {
    #[error("Configuring mp3 encoder: {0}")]
    Mp3Build(String),
    #[error("Encoding mp3: {0}")]
    Mp3Encode(String),
    #[error("Unsupported channel count for mp3: {0}")]
    UnsupportedChannels(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mp3lame_encoder::BuildError> for WritingError {
    fn from(err: mp3lame_encoder::BuildError) -> Self {
        Self::Mp3Build(format!("{:?}", err))
    }
}

impl From<mp3lame_encoder::EncodeError> for WritingError {
    fn from(err: mp3lame_encoder::EncodeError) -> Self {
        Self::Mp3Encode(format!("{:?}", err))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Arquivo não encontrado: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Diretório não encontrado: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("Audio decoding failed for {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("Audio writing failed for {}: {source}", path.display())]
    Writing {
        path: PathBuf,
        #[source]
        source: WritingError,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to run {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} {}{}", exit_description(.code), stderr_suffix(.stderr))]
    ToolFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
