use crate::AudioFormats;
use crate::error::DecodeError;
use log::{debug, warn};
use std::fs;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Headroom left below full scale by peak normalization, in dB
pub const PEAK_HEADROOM_DB: f64 = 0.1;

/// Decoded samples of one audio file, one plane per channel
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub planes: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.planes
            .iter()
            .flatten()
            .fold(0.0_f32, |peak, &s| peak.max(s.abs()))
    }

    /// Peak level in dBFS, negative infinity for silence
    pub fn peak_db(&self) -> f64 {
        let peak = self.peak();
        if peak > 0.0 {
            20.0 * (peak as f64).log10()
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Multiplies every sample by the linear equivalent of `gain_db`.
    ///
    /// No clipping is applied here; samples leaving [-1, 1] saturate when encoded.
    pub fn apply_gain(&mut self, gain_db: f64) {
        let linear = 10.0_f64.powf(gain_db / 20.0) as f32;
        for sample in self.planes.iter_mut().flatten() {
            *sample *= linear;
        }
    }

    /// Rescales the buffer so its peak sits `headroom_db` below full scale.
    ///
    /// Silent buffers are left untouched. Returns the gain applied in dB.
    pub fn normalize_peak(&mut self, headroom_db: f64) -> f64 {
        let peak_db = self.peak_db();
        if !peak_db.is_finite() {
            debug!("Silent buffer, skipping peak normalization");
            return 0.0;
        }
        let gain_db = -headroom_db - peak_db;
        self.apply_gain(gain_db);
        gain_db
    }
}

/// Decodes a whole file into memory. The container is probed from content,
/// with the file extension as a hint.
pub fn decode_file(path: impl AsRef<Path>) -> Result<AudioBuffer, DecodeError> {
    let path = path.as_ref();
    let file = fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(format) = AudioFormats::from_path(path) {
        hint.with_extension(&format.to_string());
    }
    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;

    let spec = SignalSpec::new(
        track
            .codec_params
            .sample_rate
            .ok_or(DecodeError::MissingSampleRate)?,
        track
            .codec_params
            .channels
            .ok_or(DecodeError::MissingChannelSpec)?,
    );

    let dec_opts: DecoderOptions = Default::default();
    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &dec_opts)?;

    let mut planes: Vec<Vec<f32>> = vec![Vec::new(); spec.channels.count()];

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(decoded) => {
                        let current = convert_buffer_to_planar_f32(&decoded)?;
                        for (plane, chunk) in planes.iter_mut().zip(current) {
                            plane.extend(chunk);
                        }
                    }
                    Err(SymphoniaError::DecodeError(e)) => {
                        warn!(
                            "Decode error in {:?}: {}. Skipping packet.",
                            path.file_name().unwrap_or_default(),
                            e
                        );
                    }
                    Err(SymphoniaError::IoError(ref e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        break;
                    }
                    Err(e) => return Err(DecodeError::Symphonia(e)),
                }
            }
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(DecodeError::Symphonia(e)),
        }
    }

    let buffer = AudioBuffer {
        sample_rate: spec.rate,
        planes,
    };
    debug!(
        "Decoded {:?}: {} channels, {} frames at {} Hz",
        path.file_name().unwrap_or_default(),
        buffer.channels(),
        buffer.frames(),
        buffer.sample_rate
    );
    Ok(buffer)
}

/// Converts any Symphonia audio buffer to planar f32 in [-1.0, 1.0]
fn convert_buffer_to_planar_f32(decoded: &AudioBufferRef<'_>) -> Result<Vec<Vec<f32>>, DecodeError> {
    let planar: Vec<Vec<f32>> = match decoded {
        AudioBufferRef::F32(buf) => buf.planes().planes().iter().map(|p| p.to_vec()).collect(),
        AudioBufferRef::F64(buf) => buf
            .planes()
            .planes()
            .iter()
            .map(|p| p.iter().map(|&s| s as f32).collect())
            .collect(),
        AudioBufferRef::S32(buf) => buf
            .planes()
            .planes()
            .iter()
            .map(|p| p.iter().map(|&s| s as f32 / i32::MAX as f32).collect())
            .collect(),
        AudioBufferRef::S24(buf) => buf
            .planes()
            .planes()
            .iter()
            // 2^23 - 1
            .map(|p| p.iter().map(|&s| s.inner() as f32 / 8388607.0).collect())
            .collect(),
        AudioBufferRef::S16(buf) => buf
            .planes()
            .planes()
            .iter()
            .map(|p| p.iter().map(|&s| s as f32 / i16::MAX as f32).collect())
            .collect(),
        AudioBufferRef::U8(buf) => buf
            .planes()
            .planes()
            .iter()
            .map(|p| p.iter().map(|&s| (s as i16 - 128) as f32 / 128.0).collect())
            .collect(),
        _ => return Err(DecodeError::UnsupportedFormat),
    };
    Ok(planar)
}
