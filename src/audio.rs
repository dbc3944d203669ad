//! Audio post-processing: peak normalisation, crossfade, 16-bit quantisation
//! and WAV encoding.
//!
//! All buffers are mono `f32` at [`SAMPLE_RATE`] Hz.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;

/// Sample rate of every buffer produced by the synthesis backends.
pub const SAMPLE_RATE: u32 = 24_000;

/// Peaks below this are treated as silence and left untouched.
pub const PEAK_EPSILON: f32 = 1e-6;

/// Default crossfade overlap between adjacent chunks, in seconds.
pub const DEFAULT_CROSSFADE_SECS: f32 = 0.1;

// ─────────────────────────────────────────────────────────────────────────────
// Normalisation
// ─────────────────────────────────────────────────────────────────────────────

/// Scale `samples` in place so the largest absolute value becomes 1.0.
pub fn normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak < PEAK_EPSILON {
        return;
    }
    let gain = 1.0 / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Crossfade
// ─────────────────────────────────────────────────────────────────────────────

/// Overlap length in samples for a crossfade of `secs` seconds.
pub fn overlap_len(secs: f32) -> usize {
    (secs.max(0.0) * SAMPLE_RATE as f32) as usize
}

/// Join `a` and `b`, blending the last `overlap` samples of `a` into the
/// first `overlap` samples of `b` with complementary Hann half-windows.
///
/// The output is `a.len() + b.len() - overlap` samples long and the blended
/// region is clipped to `[-1, 1]`.  When either buffer is shorter than the
/// overlap the two are simply concatenated.
pub fn crossfade(a: &[f32], b: &[f32], overlap: usize) -> Vec<f32> {
    if overlap == 0 || a.len() < overlap || b.len() < overlap {
        let mut out = Vec::with_capacity(a.len() + b.len());
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        return out;
    }

    let head = a.len() - overlap;
    let mut out = Vec::with_capacity(a.len() + b.len() - overlap);
    out.extend_from_slice(&a[..head]);

    let denom = (overlap.max(2) - 1) as f32;
    for i in 0..overlap {
        // sin² rises 0 → 1 while cos² falls 1 → 0; they always sum to one.
        let phase = std::f32::consts::FRAC_PI_2 * (i as f32 / denom);
        let fade_in = phase.sin().powi(2);
        let fade_out = phase.cos().powi(2);
        let mixed = a[head + i] * fade_out + b[i] * fade_in;
        out.push(mixed.clamp(-1.0, 1.0));
    }

    out.extend_from_slice(&b[overlap..]);
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Quantisation
// ─────────────────────────────────────────────────────────────────────────────

/// Convert normalised samples to 16-bit PCM by scaling with `i16::MAX` and
/// truncating toward zero.
///
/// With `dither`, a uniform offset in `[-0.5, 0.5)` LSB is added before
/// truncation.
pub fn quantize(samples: &[f32], dither: Option<&mut dyn rand::RngCore>) -> Vec<i16> {
    let scale = i16::MAX as f32;
    match dither {
        None => samples.iter().map(|&s| to_i16(s * scale)).collect(),
        Some(rng) => samples
            .iter()
            .map(|&s| to_i16(s * scale + rng.gen_range(-0.5f32..0.5)))
            .collect(),
    }
}

fn to_i16(v: f32) -> i16 {
    // `as` saturates at the i16 bounds and maps NaN to 0.
    v.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

// ─────────────────────────────────────────────────────────────────────────────
// WAV
// ─────────────────────────────────────────────────────────────────────────────

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode 16-bit PCM samples as an in-memory WAV file.
pub fn encode_wav(pcm: &[i16]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, wav_spec()).context("Cannot start WAV stream")?;
        for &s in pcm {
            writer.write_sample(s).context("WAV write error")?;
        }
        writer.finalize().context("WAV finalise error")?;
    }
    Ok(cursor.into_inner())
}

/// Write 16-bit PCM samples to a WAV file at `path`.
pub fn write_wav(pcm: &[i16], path: &Path) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec())
        .with_context(|| format!("Cannot create WAV: {}", path.display()))?;
    for &s in pcm {
        writer.write_sample(s).context("WAV write error")?;
    }
    writer.finalize().context("WAV finalise error")?;
    tracing::info!(
        samples = pcm.len(),
        seconds = pcm.len() as f32 / SAMPLE_RATE as f32,
        path = %path.display(),
        "wrote WAV file"
    );
    Ok(())
}

/// Normalise, quantise and encode a finished track.
pub fn finish_track(mut samples: Vec<f32>, dither: bool) -> Result<Vec<u8>> {
    normalize(&mut samples);
    let pcm = if dither {
        let mut rng = rand::thread_rng();
        quantize(&samples, Some(&mut rng as &mut dyn rand::RngCore))
    } else {
        quantize(&samples, None)
    };
    encode_wav(&pcm)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
