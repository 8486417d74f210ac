use anyhow::{Context, Result};
use std::io::Cursor;

/// Map a normalized float sample onto i16
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / frame.len() as i32) as i16)
        .collect()
}

/// Linear interpolation resampler for mono signals
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|idx| {
            let pos = idx as f64 / ratio;
            let left = (pos.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let frac = pos - left as f64;
            let value = samples[left] as f64 * (1.0 - frac) + samples[right] as f64 * frac;
            value.round() as i16
        })
        .collect()
}

/// Bring interleaved audio to the target rate and channel count
pub fn conform(samples: &[i16], sample_rate: u32, channels: u16, target_rate: u32, target_channels: u16) -> Vec<i16> {
    if sample_rate == target_rate && channels == target_channels {
        return samples.to_vec();
    }

    let mono = resample_linear(&downmix_to_mono(samples, channels), sample_rate, target_rate);
    if target_channels <= 1 {
        return mono;
    }

    mono.iter()
        .flat_map(|&s| std::iter::repeat(s).take(target_channels as usize))
        .collect()
}

/// Raw little-endian PCM16 bytes
pub fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Self-contained in-memory WAV file
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("Failed to start WAV segment")?;
        for &sample in samples {
            writer.write_sample(sample).context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV segment")?;
    }

    Ok(cursor.into_inner())
}
