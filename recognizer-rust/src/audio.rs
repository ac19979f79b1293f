use crate::error::{RecognizerError, Result};
use crate::models::AudioSignal;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Handles loading and preprocessing of audio files
///
/// Every loader returns mono samples in [-1.0, 1.0]: WAV files go through
/// hound, everything else (mp3 in practice) through symphonia.
pub struct AudioLoader;

impl AudioLoader {
    /// Loads an audio file as a mono signal at its native rate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<AudioSignal> {
        let path = path.as_ref();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        let signal = if is_wav {
            Self::load_from_wav(path)?
        } else {
            Self::load_with_symphonia(path)?
        };

        if signal.is_empty() {
            return Err(RecognizerError::Decode(format!(
                "{}: no samples decoded",
                path.display()
            )));
        }

        debug!(
            "Loaded {} samples ({:.2} seconds) from {}",
            signal.len(),
            signal.duration(),
            path.display()
        );
        Ok(signal)
    }

    /// Loads at most `max_secs` of audio, resampled to `target_rate` when given
    pub fn load_for_analysis<P: AsRef<Path>>(
        path: P,
        max_secs: f32,
        target_rate: Option<u32>,
    ) -> Result<AudioSignal> {
        let signal = Self::truncate(Self::load(path)?, max_secs);
        match target_rate {
            Some(rate) => Self::resample(&signal, rate),
            None => Ok(signal),
        }
    }

    /// Loads audio data from a WAV file
    ///
    /// Integer samples are scaled by their bit depth, float samples are
    /// taken as is, and multi-channel audio is averaged down to mono.
    pub fn load_from_wav(path: &Path) -> Result<AudioSignal> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| RecognizerError::Decode(format!("{}: {}", path.display(), e)))?;

        let spec = reader.spec();
        debug!(
            "WAV specs - Sample rate: {}Hz, Channels: {}, Bits: {}",
            spec.sample_rate, spec.channels, spec.bits_per_sample
        );

        let samples: std::result::Result<Vec<f32>, _> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect(),
            hound::SampleFormat::Int => match spec.bits_per_sample {
                8 => reader
                    .samples::<i8>()
                    .map(|s| s.map(|s| s as f32 / 128.0))
                    .collect(),
                16 => reader
                    .samples::<i16>()
                    .map(|s| s.map(|s| s as f32 / 32768.0))
                    .collect(),
                24 => reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / ((1 << 23) as f32)))
                    .collect(),
                32 => reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / 2147483648.0))
                    .collect(),
                bits => {
                    return Err(RecognizerError::Decode(format!(
                        "{}: unsupported bit depth {}",
                        path.display(),
                        bits
                    )));
                }
            },
        };

        let samples =
            samples.map_err(|e| RecognizerError::Decode(format!("{}: {}", path.display(), e)))?;

        Ok(AudioSignal::new(
            Self::downmix(samples, spec.channels as usize),
            spec.sample_rate,
        ))
    }

    /// Decodes any container/codec symphonia can probe
    pub fn load_with_symphonia(path: &Path) -> Result<AudioSignal> {
        let decode_err = |e: &dyn std::fmt::Display| {
            RecognizerError::Decode(format!("{}: {}", path.display(), e))
        };

        let file = std::fs::File::open(path).map_err(|e| decode_err(&e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| decode_err(&e))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| decode_err(&"no audio track"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| decode_err(&"unknown sample rate"))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| decode_err(&e))?;

        let mut interleaved = Vec::new();
        let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(e) => return Err(decode_err(&e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(buf) => buf,
                // Corrupt frames are skipped, the rest of the stream is still usable
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping undecodable packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(decode_err(&e)),
            };

            let spec = *decoded.spec();
            channels = spec.channels.count();
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(buf.samples());
        }

        Ok(AudioSignal::new(
            Self::downmix(interleaved, channels.max(1)),
            sample_rate,
        ))
    }

    /// Averages interleaved channels into one
    pub fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return samples;
        }
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Keeps at most the first `max_secs` of the signal
    pub fn truncate(mut signal: AudioSignal, max_secs: f32) -> AudioSignal {
        let max_len = (max_secs as f64 * signal.sample_rate as f64) as usize;
        signal.samples.truncate(max_len);
        signal
    }

    /// Resamples to `target_rate`
    ///
    /// The output always holds `floor(len * target / source)` samples.
    pub fn resample(signal: &AudioSignal, target_rate: u32) -> Result<AudioSignal> {
        if signal.sample_rate == target_rate || signal.is_empty() {
            return Ok(AudioSignal::new(signal.samples.clone(), target_rate));
        }
        if signal.sample_rate == 0 || target_rate == 0 {
            return Err(RecognizerError::Resample(format!(
                "cannot resample {}Hz to {}Hz",
                signal.sample_rate, target_rate
            )));
        }

        let ratio = target_rate as f64 / signal.sample_rate as f64;
        let expected = (signal.len() as f64 * ratio) as usize;
        debug!(
            "Resampling {} samples from {}Hz to {}Hz",
            signal.len(),
            signal.sample_rate,
            target_rate
        );

        let mut resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            signal.len(),
            1,
        )
        .map_err(|e| RecognizerError::Resample(e.to_string()))?;

        let input = vec![signal.samples.clone()];
        let mut output = resampler
            .process(&input, None)
            .map_err(|e| RecognizerError::Resample(e.to_string()))?;

        let mut samples = output.pop().unwrap_or_default();
        samples.resize(expected, 0.0);

        Ok(AudioSignal::new(samples, target_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};

    fn write_stereo_wav(path: &Path, frames: &[(i16, i16)], rate: u32) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &(l, r) in frames {
            writer.write_sample(l).unwrap();
            writer.write_sample(r).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_downmix() {
        let mono = AudioLoader::downmix(vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(AudioLoader::downmix(vec![0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_truncate() {
        let signal = AudioSignal::new(vec![0.0; 100], 10);
        assert_eq!(AudioLoader::truncate(signal.clone(), 3.0).len(), 30);
        assert_eq!(AudioLoader::truncate(signal, 30.0).len(), 100);
    }

    #[test]
    fn test_load_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_stereo_wav(&path, &[(16384, -16384), (16384, 16384)], 8000);

        let signal = AudioLoader::load(&path).unwrap();
        assert_eq!(signal.sample_rate, 8000);
        assert_eq!(signal.samples, vec![0.0, 0.5]);
    }

    #[test]
    fn test_load_missing_file_is_decode_error() {
        let err = AudioLoader::load("does/not/exist.wav").unwrap_err();
        assert!(matches!(err, RecognizerError::Decode(_)));
    }

    #[test]
    fn test_load_garbage_mp3_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not an mp3 stream").unwrap();
        assert!(matches!(
            AudioLoader::load(&path),
            Err(RecognizerError::Decode(_))
        ));
    }

    #[test]
    fn test_resample_length() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        let signal = AudioSignal::new(samples, 44100);

        let down = AudioLoader::resample(&signal, 22050).unwrap();
        assert_eq!(down.sample_rate, 22050);
        assert_eq!(down.len(), 22050);

        let same = AudioLoader::resample(&signal, 44100).unwrap();
        assert_eq!(same, signal);
    }
}
