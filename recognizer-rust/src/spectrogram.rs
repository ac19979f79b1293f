//! Log-power mel spectrograms
//!
//! Audio is cut into centred, Hann-windowed frames, transformed with
//! rustfft, folded through a Slaney-normalised mel filterbank and converted
//! to dB relative to the loudest cell.

use crate::audio::AudioLoader;
use crate::config::AnalysisConfig;
use crate::error::{RecognizerError, Result};
use crate::models::AudioSignal;
use rustfft::{num_complex::Complex, FftPlanner};
use std::path::Path;
use tracing::debug;

const AMIN: f32 = 1e-10;

/// Log-power values indexed by (mel bin, frame)
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    data: Vec<f32>,
    n_mels: usize,
    n_frames: usize,
    sample_rate: u32,
}

impl Spectrogram {
    /// Builds a spectrogram from row-major (mel bin major) values
    pub fn from_rows(rows: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let n_mels = rows.len();
        let n_frames = rows.first().map(|r| r.len()).unwrap_or(0);
        if n_mels == 0 || n_frames == 0 || rows.iter().any(|r| r.len() != n_frames) {
            return Err(RecognizerError::EmptySpectrogram(
                "rows are empty or ragged".into(),
            ));
        }
        Ok(Self {
            data: rows.into_iter().flatten().collect(),
            n_mels,
            n_frames,
            sample_rate,
        })
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn get(&self, mel: usize, frame: usize) -> f32 {
        self.data[mel * self.n_frames + frame]
    }

    /// All frames of one mel bin
    pub fn row(&self, mel: usize) -> &[f32] {
        let start = mel * self.n_frames;
        &self.data[start..start + self.n_frames]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.n_frames)
    }

    /// (min, max) over every cell
    pub fn range(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Linear amplitude matrix (`10^(dB/20)`), rows are mel bins
    pub fn to_amplitude(&self) -> Vec<Vec<f64>> {
        self.rows()
            .map(|row| row.iter().map(|&db| 10f64.powf(db as f64 / 20.0)).collect())
            .collect()
    }
}

/// Loads `path` and computes its log-mel spectrogram
pub fn generate_spectrogram<P: AsRef<Path>>(
    path: P,
    config: &AnalysisConfig,
) -> Result<Spectrogram> {
    let path = path.as_ref();
    let signal = AudioLoader::load_for_analysis(path, config.duration_secs, config.sample_rate)?;
    compute_spectrogram(&signal, config).map_err(|e| match e {
        RecognizerError::EmptySpectrogram(_) => {
            RecognizerError::EmptySpectrogram(path.display().to_string())
        }
        other => other,
    })
}

/// Computes the log-mel spectrogram of an in-memory signal
pub fn compute_spectrogram(signal: &AudioSignal, config: &AnalysisConfig) -> Result<Spectrogram> {
    config.validate()?;
    if signal.is_empty() || signal.sample_rate == 0 {
        return Err(RecognizerError::EmptySpectrogram("signal has no samples".into()));
    }
    if signal.samples.iter().any(|s| !s.is_finite()) {
        return Err(RecognizerError::Decode("signal contains non-finite samples".into()));
    }

    let power = power_spectrogram(&signal.samples, config.n_fft, config.hop_length);
    let filters = MelFilterbank::new(signal.sample_rate, config.n_fft, config.n_mels);

    let n_frames = power.len();
    let mut mel = vec![0.0f32; config.n_mels * n_frames];
    for (frame_idx, frame) in power.iter().enumerate() {
        for (mel_idx, energy) in filters.apply(frame).into_iter().enumerate() {
            mel[mel_idx * n_frames + frame_idx] = energy;
        }
    }

    let data = power_to_db(mel, config.top_db);
    debug!(
        "Computed {}x{} mel spectrogram at {}Hz",
        config.n_mels, n_frames, signal.sample_rate
    );

    Ok(Spectrogram {
        data,
        n_mels: config.n_mels,
        n_frames,
        sample_rate: signal.sample_rate,
    })
}

/// Periodic Hann window
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        .collect()
}

/// Power spectrum `|X|^2` of each centred frame, `n_fft / 2 + 1` bins per frame
fn power_spectrogram(samples: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<f32>> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; pad];
    padded.extend_from_slice(samples);
    padded.resize(padded.len() + pad, 0.0);

    let n_frames = 1 + (padded.len() - n_fft) / hop;
    let window = hann_window(n_fft);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

    (0..n_frames)
        .map(|frame| {
            let start = frame * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * window[i], 0.0);
            }
            fft.process(&mut buffer);
            buffer[..=n_fft / 2].iter().map(|c| c.norm_sqr()).collect()
        })
        .collect()
}

fn power_to_db(power: Vec<f32>, top_db: f32) -> Vec<f32> {
    let peak = power.iter().cloned().fold(0.0f32, f32::max);
    let reference = 10.0 * peak.max(AMIN).log10();
    let mut db: Vec<f32> = power
        .into_iter()
        .map(|p| 10.0 * p.max(AMIN).log10() - reference)
        .collect();

    let floor = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max) - top_db;
    for v in db.iter_mut() {
        *v = v.max(floor);
    }
    db
}

fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;

    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;

    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * F_SP
    }
}

/// Triangular Slaney-style filters between 0 Hz and Nyquist
struct MelFilterbank {
    /// Per mel band: first non-zero FFT bin and the weights from there on
    bands: Vec<(usize, Vec<f32>)>,
}

impl MelFilterbank {
    fn new(sample_rate: u32, n_fft: usize, n_mels: usize) -> Self {
        let n_bins = n_fft / 2 + 1;
        let fft_freqs: Vec<f64> = (0..n_bins)
            .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
            .collect();

        let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
        let mel_freqs: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
            .collect();

        let bands = (0..n_mels)
            .map(|m| {
                let (left, center, right) = (mel_freqs[m], mel_freqs[m + 1], mel_freqs[m + 2]);
                let enorm = 2.0 / (right - left);
                let weights: Vec<f64> = fft_freqs
                    .iter()
                    .map(|&f| {
                        let lower = (f - left) / (center - left);
                        let upper = (right - f) / (right - center);
                        lower.min(upper).max(0.0) * enorm
                    })
                    .collect();

                let start = weights.iter().position(|&w| w > 0.0).unwrap_or(0);
                let end = weights
                    .iter()
                    .rposition(|&w| w > 0.0)
                    .map(|i| i + 1)
                    .unwrap_or(start);
                let band = weights[start..end].iter().map(|&w| w as f32).collect();
                (start, band)
            })
            .collect();

        Self { bands }
    }

    fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.bands
            .iter()
            .map(|(start, weights)| {
                weights
                    .iter()
                    .zip(&power[*start..])
                    .map(|(w, p)| w * p)
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, rate: u32, secs: f32) -> AudioSignal {
        let n = (rate as f32 * secs) as usize;
        let samples = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect();
        AudioSignal::new(samples, rate)
    }

    #[test]
    fn test_mel_scale_round_trip() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 11025.0] {
            assert_relative_eq!(mel_to_hz(hz_to_mel(hz)), hz, epsilon = 1e-6);
        }
        assert_relative_eq!(hz_to_mel(1000.0), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_count_and_shape() {
        let config = AnalysisConfig::default();
        let signal = sine(440.0, 22050, 1.0);
        let spec = compute_spectrogram(&signal, &config).unwrap();

        assert_eq!(spec.n_mels(), 128);
        assert_eq!(spec.n_frames(), 1 + 22050 / 512);
        assert_eq!(spec.sample_rate(), 22050);
    }

    #[test]
    fn test_db_range_is_referenced_to_peak() {
        let config = AnalysisConfig::default();
        let spec = compute_spectrogram(&sine(440.0, 22050, 1.0), &config).unwrap();
        let (lo, hi) = spec.range();
        assert_relative_eq!(hi, 0.0, epsilon = 1e-4);
        assert!(lo >= -80.0 - 1e-3);
    }

    #[test]
    fn test_peak_follows_tone() {
        let config = AnalysisConfig::default();
        let low = compute_spectrogram(&sine(220.0, 22050, 1.0), &config).unwrap();
        let high = compute_spectrogram(&sine(3520.0, 22050, 1.0), &config).unwrap();

        let loudest_bin = |s: &Spectrogram| {
            let frame = s.n_frames() / 2;
            (0..s.n_mels())
                .max_by(|&a, &b| s.get(a, frame).partial_cmp(&s.get(b, frame)).unwrap())
                .unwrap()
        };
        assert!(loudest_bin(&low) < loudest_bin(&high));
    }

    #[test]
    fn test_volume_invariance() {
        let config = AnalysisConfig::default();
        let loud = sine(440.0, 22050, 0.5);
        let quiet = AudioSignal::new(
            loud.samples.iter().map(|s| s * 0.1).collect(),
            loud.sample_rate,
        );

        let a = compute_spectrogram(&loud, &config).unwrap();
        let b = compute_spectrogram(&quiet, &config).unwrap();
        for mel in 0..a.n_mels() {
            for (x, y) in a.row(mel).iter().zip(b.row(mel)) {
                assert!((x - y).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn test_empty_signal_is_rejected() {
        let config = AnalysisConfig::default();
        let err = compute_spectrogram(&AudioSignal::new(vec![], 22050), &config).unwrap_err();
        assert!(matches!(err, RecognizerError::EmptySpectrogram(_)));
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        assert!(Spectrogram::from_rows(vec![vec![0.0, 1.0], vec![0.0]], 8000).is_err());
        let spec = Spectrogram::from_rows(vec![vec![0.0, -1.0], vec![-2.0, -3.0]], 8000).unwrap();
        assert_eq!(spec.row(1), &[-2.0, -3.0]);
        assert_eq!(spec.range(), (-3.0, 0.0));
    }
}
