//! WAV input for audio pipelines
//!
//! Audio pipelines take mono `float32` samples at the model's sampling
//! rate. [`read_audio`] decodes a WAV file with `hound` and converts the
//! rate with `rubato` when the file was recorded at a different one.

use hound::{SampleFormat, WavReader};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;
use std::path::Path;

use super::ndarray::NdArray;
use crate::error::ConversionError;

/// Decoded WAV contents, one sample vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

fn audio_err(err: impl std::fmt::Display) -> ConversionError {
    ConversionError::Audio(err.to_string())
}

/// Decode a RIFF/WAVE byte stream
///
/// Integer samples of any width are scaled into [-1, 1).
pub fn decode_wav(bytes: &[u8]) -> Result<WavData, ConversionError> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(audio_err)?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;
    if channel_count == 0 {
        return Err(audio_err("WAV file declares no channels"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(audio_err)?,
        SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(audio_err)?
        }
    };

    let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    Ok(WavData {
        sample_rate: spec.sample_rate,
        channels,
    })
}

/// Resample every channel from `from` Hz to `to` Hz
///
/// The output holds `frames * to / from` frames per channel, with the
/// resampler's delay trimmed off the front.
fn resample(channels: &[Vec<f32>], from: u32, to: u32) -> Result<Vec<Vec<f32>>, ConversionError> {
    let frames = channels.first().map_or(0, Vec::len);
    if frames == 0 || from == 0 {
        return Ok(channels.to_vec());
    }
    let target = (frames as u64 * to as u64 / from as u64) as usize;

    let mut resampler = FastFixedIn::<f32>::new(
        to as f64 / from as f64,
        1.1,
        PolynomialDegree::Cubic,
        frames,
        channels.len(),
    )
    .map_err(audio_err)?;

    let mut output = resampler.process(channels, None).map_err(audio_err)?;
    let tail = resampler
        .process_partial::<Vec<f32>>(None, None)
        .map_err(audio_err)?;
    for (channel, rest) in output.iter_mut().zip(tail) {
        channel.extend(rest);
    }

    let delay = resampler.output_delay();
    Ok(output
        .into_iter()
        .map(|channel| {
            let mut trimmed: Vec<f32> = channel.into_iter().skip(delay).take(target).collect();
            trimmed.resize(target, 0.0);
            trimmed
        })
        .collect())
}

/// Read a WAV file as mono `float32` samples at `sampling_rate`
///
/// Stereo input is merged as `sqrt(2) * (left + right) / 2`; channels
/// past the second are ignored.
pub fn read_audio(path: impl AsRef<Path>, sampling_rate: u32) -> Result<NdArray, ConversionError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| ConversionError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let wav = decode_wav(&bytes)?;

    let channels = if wav.sample_rate == sampling_rate {
        wav.channels
    } else {
        resample(&wav.channels, wav.sample_rate, sampling_rate)?
    };

    let samples = match channels.as_slice() {
        [mono] => mono.clone(),
        [left, right, ..] => left
            .iter()
            .zip(right)
            .map(|(l, r)| std::f32::consts::SQRT_2 * (l + r) / 2.0)
            .collect(),
        [] => Vec::new(),
    };
    Ok(NdArray::vector(samples))
}
