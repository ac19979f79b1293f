//! Weighted blending of two recordings

use crate::audio::AudioLoader;
use crate::error::{RecognizerError, Result};
use crate::models::AudioSignal;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Two tracks brought to a common rate, peak and length, ready to blend
#[derive(Debug, Clone)]
pub struct SongMixer {
    first: Vec<f32>,
    second: Vec<f32>,
    sample_rate: u32,
}

impl SongMixer {
    /// Loads both files and harmonises them
    ///
    /// # Process
    /// 1. Resample both to the lower of the two rates
    /// 2. Scale each so its peak magnitude is 1.0
    /// 3. Trim both to the shorter length, keeping the start
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(first: P, second: Q) -> Result<Self> {
        let first = AudioLoader::load(first)?;
        let second = AudioLoader::load(second)?;
        Self::from_signals(first, second)
    }

    pub fn from_signals(first: AudioSignal, second: AudioSignal) -> Result<Self> {
        let sample_rate = first.sample_rate.min(second.sample_rate);
        debug!(
            "Harmonising tracks at {}Hz and {}Hz to {}Hz",
            first.sample_rate, second.sample_rate, sample_rate
        );

        let mut first = AudioLoader::resample(&first, sample_rate)?.samples;
        let mut second = AudioLoader::resample(&second, sample_rate)?.samples;
        normalize_peak(&mut first);
        normalize_peak(&mut second);

        let len = first.len().min(second.len());
        first.truncate(len);
        second.truncate(len);

        Ok(Self {
            first,
            second,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// The harmonised first and second tracks
    pub fn tracks(&self) -> (&[f32], &[f32]) {
        (&self.first, &self.second)
    }

    /// Blends the tracks, `weight` percent of the first against the rest
    ///
    /// The two shares are rescaled so the larger one is 100%, then the sum
    /// is clipped to [-1.0, 1.0]. Weights outside [0, 100] are rejected.
    /// At weight 50 both tracks therefore play at full gain, not at half.
    pub fn mix(&self, weight: f64) -> Result<AudioSignal> {
        if !(0.0..=100.0).contains(&weight) {
            return Err(RecognizerError::InvalidWeight(weight));
        }

        let share_first = weight;
        let share_second = 100.0 - weight;
        let dominant = share_first.max(share_second);
        let gain_first = (share_first / dominant) as f32;
        let gain_second = (share_second / dominant) as f32;

        let samples = self
            .first
            .iter()
            .zip(&self.second)
            .map(|(a, b)| (gain_first * a + gain_second * b).clamp(-1.0, 1.0))
            .collect();

        Ok(AudioSignal::new(samples, self.sample_rate))
    }

    /// Writes the blend as a mono 32-bit float WAV and returns its path
    pub fn save_mixed_audio<P: AsRef<Path>>(&self, weight: f64, output_path: P) -> Result<PathBuf> {
        let mixed = self.mix(weight)?;
        let output_path = output_path.as_ref();
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate: mixed.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(output_path, spec).map_err(wav_error)?;
        for &sample in &mixed.samples {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;

        info!(
            "Wrote {:.2}s mix at weight {} to {}",
            mixed.duration(),
            weight,
            output_path.display()
        );
        Ok(output_path.to_path_buf())
    }
}

/// Scales to a peak magnitude of 1.0; silence stays silent
fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        samples.iter_mut().for_each(|s| *s /= peak);
    }
}

fn wav_error(e: hound::Error) -> RecognizerError {
    match e {
        hound::Error::IoError(io) => RecognizerError::Io(io),
        other => RecognizerError::Decode(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(len: usize, scale: f32, rate: u32) -> AudioSignal {
        let samples = (0..len).map(|i| scale * (i as f32 / len as f32 - 0.5)).collect();
        AudioSignal::new(samples, rate)
    }

    #[test]
    fn test_normalize_peak() {
        let mut loud = vec![0.1, -0.4, 0.2];
        normalize_peak(&mut loud);
        assert_relative_eq!(loud[1], -1.0);
        assert_relative_eq!(loud[0], 0.25);

        let mut silent = vec![0.0; 4];
        normalize_peak(&mut silent);
        assert!(silent.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_weight_bounds() {
        let mixer = SongMixer::from_signals(ramp(100, 0.5, 8000), ramp(100, 0.5, 8000)).unwrap();
        assert!(matches!(mixer.mix(-1.0), Err(RecognizerError::InvalidWeight(w)) if w == -1.0));
        assert!(matches!(mixer.mix(101.0), Err(RecognizerError::InvalidWeight(_))));
        assert!(mixer.mix(f64::NAN).is_err());
        assert!(mixer.mix(0.0).is_ok());
        assert!(mixer.mix(100.0).is_ok());
    }

    #[test]
    fn test_full_weight_is_first_track() {
        let first = ramp(200, 0.3, 8000);
        let second = AudioSignal::new(vec![0.9; 300], 8000);
        let mixer = SongMixer::from_signals(first, second).unwrap();
        assert_eq!(mixer.len(), 200);

        let mixed = mixer.mix(100.0).unwrap();
        assert_eq!(mixed.samples, mixer.tracks().0);

        let other = mixer.mix(0.0).unwrap();
        assert_eq!(other.samples, mixer.tracks().1);
    }

    #[test]
    fn test_even_weight_sums_and_clips() {
        let up = AudioSignal::new(vec![0.5, -0.25, 0.1], 8000);
        let down = AudioSignal::new(vec![-0.5, 0.25, -0.1], 8000);
        let cancelled = SongMixer::from_signals(up.clone(), down).unwrap().mix(50.0).unwrap();
        assert!(cancelled.samples.iter().all(|s| s.abs() < 1e-6));

        let doubled = SongMixer::from_signals(up.clone(), up).unwrap().mix(50.0).unwrap();
        assert_relative_eq!(doubled.samples[0], 1.0);
        assert_relative_eq!(doubled.samples[1], -1.0);
        assert_relative_eq!(doubled.samples[2], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_rates_are_harmonised_downward() {
        let mixer =
            SongMixer::from_signals(ramp(4410, 0.5, 44100), ramp(1600, 0.5, 16000)).unwrap();
        assert_eq!(mixer.sample_rate(), 16000);
        assert_eq!(mixer.len(), 1600);
        let (a, b) = mixer.tracks();
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_output_is_clipped() {
        let mixer = SongMixer::from_signals(ramp(500, 1.0, 8000), ramp(500, 2.0, 8000)).unwrap();
        for weight in [0.0, 25.0, 50.0, 75.0, 100.0] {
            let mixed = mixer.mix(weight).unwrap();
            assert!(mixed.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }

    #[test]
    fn test_save_mixed_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated mixed song").join("mixed song.wav");
        let mixer = SongMixer::from_signals(ramp(800, 0.5, 8000), ramp(900, 0.7, 8000)).unwrap();

        let written = mixer.save_mixed_audio(70.0, &path).unwrap();
        assert_eq!(written, path);

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        assert_eq!(reader.len(), 800);
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SongMixer::new(dir.path().join("a.wav"), dir.path().join("b.wav")).is_err());
    }
}
