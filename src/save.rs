use log::warn;
use mp3lame_encoder::{Bitrate, Builder, DualPcm, Encoder, FlushNoGap, MonoPcm, Quality};

use crate::audio::AudioBuffer;
use crate::error::WritingError;
use std::{fs, path::Path};

/// Bitrate used when encoding in-process
pub const DEFAULT_BITRATE: Bitrate = Bitrate::Kbps128;

/// LAME needs at least this much room to flush its internal buffers
const FLUSH_BUFFER_SIZE: usize = 7200;

/// Saves audio data as an mp3 file
///
/// # Arguments
/// * `path` - Output file path
/// * `audio` - Decoded audio; samples outside [-1.0, 1.0] saturate
/// * `bitrate` - Constant bitrate for the encoder
///
/// # Returns
/// Result indicating success or a WritingError
///
/// Buffers with more than two channels are reduced to their first two.
pub fn save_as_mp3(path: &Path, audio: &AudioBuffer, bitrate: Bitrate) -> Result<(), WritingError> {
    let channels = audio.channels();
    if channels == 0 {
        return Err(WritingError::UnsupportedChannels(channels));
    }
    if channels > 2 {
        warn!(
            "{} channels in {:?}, keeping only the first two for mp3",
            channels,
            path.file_name().unwrap_or_default()
        );
    }
    let out_channels = channels.min(2);

    let mut encoder = build_encoder(audio.sample_rate, out_channels as u8, bitrate)?;

    // mp3 takes 16-bit PCM; convert with saturation
    let pcm: Vec<Vec<i16>> = audio.planes[..out_channels]
        .iter()
        .map(|plane| plane.iter().map(|&s| to_i16(s)).collect())
        .collect();

    // Encode one second at a time to bound the output scratch space
    let block = (audio.sample_rate as usize).max(1);
    let mut mp3_data = Vec::new();
    let mut start = 0;
    while start < audio.frames() {
        let end = (start + block).min(audio.frames());
        mp3_data.reserve(mp3lame_encoder::max_required_buffer_size(end - start));
        if out_channels == 1 {
            encoder.encode_to_vec(MonoPcm(&pcm[0][start..end]), &mut mp3_data)?;
        } else {
            encoder.encode_to_vec(
                DualPcm {
                    left: &pcm[0][start..end],
                    right: &pcm[1][start..end],
                },
                &mut mp3_data,
            )?;
        }
        start = end;
    }
    mp3_data.reserve(FLUSH_BUFFER_SIZE);
    encoder.flush_to_vec::<FlushNoGap>(&mut mp3_data)?;

    fs::write(path, mp3_data)?;
    Ok(())
}

fn build_encoder(sample_rate: u32, channels: u8, bitrate: Bitrate) -> Result<Encoder, WritingError> {
    let mut builder = Builder::new()
        .ok_or_else(|| WritingError::Mp3Build("could not allocate LAME encoder".to_string()))?;
    builder.set_num_channels(channels)?;
    builder.set_sample_rate(sample_rate)?;
    builder.set_brate(bitrate)?;
    builder.set_quality(Quality::Good)?;
    Ok(builder.build()?)
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
