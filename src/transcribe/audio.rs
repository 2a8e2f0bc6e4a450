//! Track decoding for the local recognizer: any supported container to
//! mono f32 at 16 kHz.

use crate::transcribe::TranscribeError;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode a track file into mono 16 kHz f32 samples.
pub fn decode_to_mono_16khz(path: &Path) -> Result<Vec<f32>, TranscribeError> {
    // WAV fast path; the generic decoder handles everything else.
    if path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
    {
        return decode_wav(path);
    }

    decode_with_symphonia(path)
}

fn decode_wav(path: &Path) -> Result<Vec<f32>, TranscribeError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| TranscribeError::Audio(format!("failed to read WAV {}: {}", path.display(), e)))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_val)
                .collect()
        }
    };

    let mono = downmix_to_mono(&samples, channels);
    Ok(resample_to_16khz(&mono, spec.sample_rate))
}

fn decode_with_symphonia(path: &Path) -> Result<Vec<f32>, TranscribeError> {
    let file = std::fs::File::open(path)
        .map_err(|e| TranscribeError::Audio(format!("failed to open {}: {}", path.display(), e)))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TranscribeError::Audio(format!("unrecognized container {}: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TranscribeError::Audio("no decodable audio track".to_string()))?;
    let track_id = track.id;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);
    let sample_rate = track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| TranscribeError::Audio(format!("decoder init failed: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(TranscribeError::Audio(format!("packet read failed: {}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    sample_buf = Some(SampleBuffer::new(
                        decoded.capacity() as u64,
                        *decoded.spec(),
                    ));
                }
                let buf = sample_buf.as_mut().expect("sample buffer initialized above");
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            // A corrupt packet is recoverable; the decoder resynchronizes.
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Decode: skipping corrupt packet in {}: {}", path.display(), e);
            }
            Err(e) => {
                return Err(TranscribeError::Audio(format!("decode failed: {}", e)));
            }
        }
    }

    let mono = downmix_to_mono(&interleaved, channels);
    Ok(resample_to_16khz(&mono, sample_rate))
}

fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio to 16 kHz.
fn resample_to_16khz(samples: &[f32], source_sample_rate: u32) -> Vec<f32> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    if source_sample_rate == TARGET_SAMPLE_RATE {
        return samples.to_vec();
    }

    if samples.is_empty() {
        return Vec::new();
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let resample_ratio = TARGET_SAMPLE_RATE as f64 / source_sample_rate as f64;

    let chunk_size = samples.len().max(1024);
    let mut resampler = match SincFixedIn::<f32>::new(
        resample_ratio,
        2.0,
        params,
        chunk_size,
        1, // mono
    ) {
        Ok(r) => r,
        Err(e) => {
            log::error!("Failed to create resampler: {}", e);
            return samples.to_vec();
        }
    };

    let waves_in = vec![samples.to_vec()];
    match resampler.process(&waves_in, None) {
        Ok(waves_out) => waves_out.into_iter().next().unwrap_or_default(),
        Err(e) => {
            log::error!("Resampling failed: {}", e);
            samples.to_vec()
        }
    }
}
