//! Spectral descriptors summarising a spectrogram
//!
//! The shape descriptors (centroid, bandwidth, contrast, rolloff) and the
//! chroma filterbank read the mel rows as if they were the bins of a linear
//! spectrum of `2 * (n_mels - 1)` points. The cepstral coefficients are taken
//! straight from the dB matrix.

use crate::error::{RecognizerError, Result};
use crate::models::FeatureVector;
use crate::spectrogram::Spectrogram;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::debug;

/// Number of cepstral coefficients in every feature vector
pub const N_MFCC: usize = 13;

const ROLL_PERCENT: f64 = 0.85;
const CONTRAST_BANDS: usize = 6;
const CONTRAST_FMIN: f64 = 200.0;
const CONTRAST_QUANTILE: f64 = 0.02;
const N_CHROMA: usize = 12;
const AMIN: f64 = 1e-10;
const ZERO_THRESHOLD: f64 = 1e-10;

/// Extracts the normalised feature vector of a spectrogram
///
/// Fails as a whole if any descriptor cannot be computed; partial vectors
/// are never returned.
pub fn extract_features(spectrogram: &Spectrogram) -> Result<FeatureVector> {
    if spectrogram.n_mels() < N_MFCC || spectrogram.n_frames() == 0 {
        return Err(RecognizerError::EmptyFeatureSet(format!(
            "{}x{} spectrogram is too small",
            spectrogram.n_mels(),
            spectrogram.n_frames()
        )));
    }

    let amplitude = spectrogram.to_amplitude();
    let freqs = bin_frequencies(spectrogram.n_mels(), spectrogram.sample_rate());

    let mut raw = BTreeMap::new();
    raw.insert(
        "spectral_centroid_mean".to_string(),
        mean(&spectral_centroid(&amplitude, &freqs)),
    );
    raw.insert(
        "spectral_bandwidth_mean".to_string(),
        mean(&spectral_bandwidth(&amplitude, &freqs)),
    );
    raw.insert(
        "spectral_contrast_mean".to_string(),
        spectral_contrast_mean(&amplitude, &freqs, spectrogram.sample_rate())?,
    );
    raw.insert(
        "spectral_rolloff_mean".to_string(),
        mean(&spectral_rolloff(&amplitude, &freqs)),
    );

    let chroma = chroma(&amplitude, spectrogram.sample_rate());
    raw.insert("tonnetz_mean".to_string(), tonnetz_mean(&chroma));
    raw.insert(
        "zero_crossing_rate_mean".to_string(),
        zero_crossing_rate_mean(&amplitude),
    );

    for (i, coefficient) in mfcc_means(spectrogram).into_iter().enumerate() {
        raw.insert(format!("mfcc_{}_mean", i), coefficient);
    }

    if let Some((key, value)) = raw.iter().find(|(_, v)| !v.is_finite()) {
        return Err(RecognizerError::EmptyFeatureSet(format!(
            "{} evaluated to {}",
            key, value
        )));
    }

    debug!("Extracted {} raw descriptors", raw.len());
    Ok(FeatureVector::from_map(normalize(raw)))
}

/// Min-max normalisation over the vector's own values
///
/// When every value is identical the spread is zero and all keys map to 0.5.
pub fn normalize(values: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let min = values.values().cloned().fold(f64::INFINITY, f64::min);
    let max = values.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;

    values
        .into_iter()
        .map(|(k, v)| {
            let scaled = if spread > 0.0 { (v - min) / spread } else { 0.5 };
            (k, scaled)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn bin_frequencies(n_bins: usize, sample_rate: u32) -> Vec<f64> {
    let n_fft = 2 * (n_bins - 1);
    (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect()
}

fn column(matrix: &[Vec<f64>], frame: usize) -> Vec<f64> {
    matrix.iter().map(|row| row[frame]).collect()
}

fn n_frames(matrix: &[Vec<f64>]) -> usize {
    matrix.first().map(|r| r.len()).unwrap_or(0)
}

fn weighted_centroid(col: &[f64], freqs: &[f64]) -> f64 {
    let total: f64 = col.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    col.iter().zip(freqs).map(|(s, f)| s * f).sum::<f64>() / total
}

fn spectral_centroid(amplitude: &[Vec<f64>], freqs: &[f64]) -> Vec<f64> {
    (0..n_frames(amplitude))
        .map(|t| weighted_centroid(&column(amplitude, t), freqs))
        .collect()
}

fn spectral_bandwidth(amplitude: &[Vec<f64>], freqs: &[f64]) -> Vec<f64> {
    (0..n_frames(amplitude))
        .map(|t| {
            let col = column(amplitude, t);
            let total: f64 = col.iter().sum();
            if total <= 0.0 {
                return 0.0;
            }
            let centroid = weighted_centroid(&col, freqs);
            col.iter()
                .zip(freqs)
                .map(|(s, f)| s / total * (f - centroid).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .collect()
}

fn spectral_rolloff(amplitude: &[Vec<f64>], freqs: &[f64]) -> Vec<f64> {
    (0..n_frames(amplitude))
        .map(|t| {
            let col = column(amplitude, t);
            let threshold = ROLL_PERCENT * col.iter().sum::<f64>();
            let mut cumulative = 0.0;
            for (s, f) in col.iter().zip(freqs) {
                cumulative += s;
                if cumulative >= threshold {
                    return *f;
                }
            }
            freqs.last().copied().unwrap_or(0.0)
        })
        .collect()
}

/// Mean peak/valley difference in dB over octave bands starting at 200 Hz
///
/// Bands whose lower edge reaches Nyquist are dropped, so low analysis rates
/// simply yield fewer bands.
fn spectral_contrast_mean(amplitude: &[Vec<f64>], freqs: &[f64], sample_rate: u32) -> Result<f64> {
    let nyquist = sample_rate as f64 / 2.0;
    let mut edges = vec![0.0];
    edges.extend((0..=CONTRAST_BANDS).map(|i| CONTRAST_FMIN * 2f64.powi(i as i32)));

    let mut band_masks = Vec::new();
    let last_band = edges.len() - 2;
    for k in 0..=last_band {
        let (low, high) = (edges[k], edges[k + 1]);
        if low >= nyquist {
            break;
        }
        let members: Vec<usize> = (0..freqs.len())
            .filter(|&i| freqs[i] >= low && freqs[i] <= high)
            .collect();
        let (first, last) = match (members.first(), members.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => continue,
        };

        let start = if k > 0 { first.saturating_sub(1) } else { first };
        // The top band takes every bin above it; lower bands drop their last bin
        let is_top = k == last_band || high >= nyquist;
        let (end, width) = if is_top {
            (freqs.len(), freqs.len() - start)
        } else {
            (last, last + 1 - start)
        };
        if end > start {
            band_masks.push((start, end, width));
        }
        if high >= nyquist {
            break;
        }
    }

    if band_masks.is_empty() {
        return Err(RecognizerError::EmptyFeatureSet(
            "no spectral contrast band fits below Nyquist".into(),
        ));
    }

    let frames = n_frames(amplitude);
    let mut total = 0.0;
    for t in 0..frames {
        let col = column(amplitude, t);
        for &(start, end, width) in &band_masks {
            let mut sub: Vec<f64> = col[start..end].to_vec();
            sub.sort_by(|a, b| a.total_cmp(b));
            let n_q = ((CONTRAST_QUANTILE * width as f64).round() as usize)
                .max(1)
                .min(sub.len());
            let valley = mean(&sub[..n_q]);
            let peak = mean(&sub[sub.len() - n_q..]);
            total += 10.0 * peak.max(AMIN).log10() - 10.0 * valley.max(AMIN).log10();
        }
    }

    Ok(total / (frames * band_masks.len()) as f64)
}

/// Chroma filterbank over the pseudo-linear bins, rows start at C
fn chroma_filterbank(n_bins: usize, sample_rate: u32) -> Vec<Vec<f64>> {
    const CENTER_OCTAVE: f64 = 5.0;
    const OCTAVE_WIDTH: f64 = 2.0;
    let n_fft = 2 * (n_bins - 1);
    let n_chroma = N_CHROMA as f64;

    // Fractional pitch-class position of every bin but DC; DC is placed
    // 1.5 octaves below the first bin
    let mut positions: Vec<f64> = (1..n_fft)
        .map(|k| {
            let freq = k as f64 * sample_rate as f64 / n_fft as f64;
            n_chroma * (freq / (440.0 / 16.0)).log2()
        })
        .collect();
    positions.insert(0, positions[0] - 1.5 * n_chroma);

    let widths: Vec<f64> = (0..n_fft)
        .map(|k| {
            if k + 1 < n_fft {
                (positions[k + 1] - positions[k]).max(1.0)
            } else {
                1.0
            }
        })
        .collect();

    let half = (n_chroma / 2.0).round();
    let mut weights = vec![vec![0.0; n_fft]; N_CHROMA];
    for k in 0..n_fft {
        for (c, row) in weights.iter_mut().enumerate() {
            let d = (positions[k] - c as f64 + half + 10.0 * n_chroma).rem_euclid(n_chroma) - half;
            row[k] = (-0.5 * (2.0 * d / widths[k]).powi(2)).exp();
        }
        let norm = weights.iter().map(|row| row[k] * row[k]).sum::<f64>().sqrt();
        let octave_weight =
            (-0.5 * ((positions[k] / n_chroma - CENTER_OCTAVE) / OCTAVE_WIDTH).powi(2)).exp();
        for row in weights.iter_mut() {
            if norm > 0.0 {
                row[k] /= norm;
            }
            row[k] *= octave_weight;
        }
    }

    // Row 0 is A; rotate so the first row is C
    weights.rotate_left(3);
    weights
        .into_iter()
        .map(|row| row[..n_bins].to_vec())
        .collect()
}

/// 12 x frames chroma, each frame scaled so its largest class is 1
fn chroma(amplitude: &[Vec<f64>], sample_rate: u32) -> Vec<Vec<f64>> {
    let filters = chroma_filterbank(amplitude.len(), sample_rate);
    let frames = n_frames(amplitude);
    let mut chroma = vec![vec![0.0; frames]; N_CHROMA];

    for t in 0..frames {
        let col = column(amplitude, t);
        let raw: Vec<f64> = filters
            .iter()
            .map(|f| f.iter().zip(&col).map(|(w, s)| w * s).sum())
            .collect();
        let peak = raw.iter().cloned().fold(0.0, f64::max);
        for (c, value) in raw.into_iter().enumerate() {
            chroma[c][t] = if peak > 0.0 { value / peak } else { value };
        }
    }
    chroma
}

/// Mean of the tonal centroid projection (fifths, minor and major thirds)
fn tonnetz_mean(chroma: &[Vec<f64>]) -> f64 {
    let scale = [7.0 / 6.0, 7.0 / 6.0, 1.5, 1.5, 2.0 / 3.0, 2.0 / 3.0];
    let radius = [1.0, 1.0, 1.0, 1.0, 0.5, 0.5];
    let phi: Vec<Vec<f64>> = (0..6)
        .map(|d| {
            (0..N_CHROMA)
                .map(|n| {
                    let shift = if d % 2 == 0 { 0.5 } else { 0.0 };
                    radius[d] * (PI * (scale[d] * n as f64 - shift)).cos()
                })
                .collect()
        })
        .collect();

    let frames = n_frames(chroma);
    let mut total = 0.0;
    for t in 0..frames {
        let col = column(chroma, t);
        let l1: f64 = col.iter().map(|v| v.abs()).sum();
        if l1 <= 0.0 {
            continue;
        }
        for row in &phi {
            total += row.iter().zip(&col).map(|(p, c)| p * c / l1).sum::<f64>();
        }
    }
    total / (6 * frames) as f64
}

/// Fraction of sign changes along each mel row, averaged over rows
fn zero_crossing_rate_mean(amplitude: &[Vec<f64>]) -> f64 {
    let sign = |v: f64| if v.abs() <= ZERO_THRESHOLD { false } else { v < 0.0 };
    let rates: Vec<f64> = amplitude
        .iter()
        .map(|row| {
            let crossings = row
                .windows(2)
                .filter(|w| sign(w[0]) != sign(w[1]))
                .count();
            crossings as f64 / row.len() as f64
        })
        .collect();
    mean(&rates)
}

/// Per-coefficient means of the orthonormal DCT-II taken along the mel axis
fn mfcc_means(spectrogram: &Spectrogram) -> Vec<f64> {
    let n = spectrogram.n_mels();
    let frames = spectrogram.n_frames();

    // Averaging commutes with the DCT, so transform the mean frame
    let mean_frame: Vec<f64> = spectrogram
        .rows()
        .map(|row| row.iter().map(|&v| v as f64).sum::<f64>() / frames as f64)
        .collect();

    (0..N_MFCC)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / n as f64).sqrt()
            } else {
                (2.0 / n as f64).sqrt()
            };
            scale
                * mean_frame
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                    .sum::<f64>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::models::AudioSignal;
    use crate::spectrogram::compute_spectrogram;
    use approx::assert_relative_eq;

    fn chord_spectrogram() -> Spectrogram {
        let rate = 22050;
        let samples = (0..rate)
            .map(|i| {
                let t = i as f32 / rate as f32;
                [261.6f32, 329.6, 392.0]
                    .iter()
                    .map(|f| (2.0 * std::f32::consts::PI * f * t).sin() / 3.0)
                    .sum()
            })
            .collect();
        compute_spectrogram(&AudioSignal::new(samples, rate), &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn test_feature_keys() {
        let features = extract_features(&chord_spectrogram()).unwrap();
        assert_eq!(features.len(), 6 + N_MFCC);
        for key in [
            "spectral_centroid_mean",
            "spectral_bandwidth_mean",
            "spectral_contrast_mean",
            "spectral_rolloff_mean",
            "tonnetz_mean",
            "zero_crossing_rate_mean",
            "mfcc_0_mean",
            "mfcc_12_mean",
        ] {
            assert!(features.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_values_span_unit_interval() {
        let features = extract_features(&chord_spectrogram()).unwrap();
        let values: Vec<f64> = features.iter().map(|(_, v)| v).collect();

        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(values.iter().any(|&v| v == 0.0));
        assert!(values.iter().any(|&v| v == 1.0));
    }

    #[test]
    fn test_normalize_degenerate() {
        let mut raw = BTreeMap::new();
        raw.insert("a".to_string(), 3.0);
        raw.insert("b".to_string(), 3.0);
        let normalized = normalize(raw);
        assert!(normalized.values().all(|&v| v == 0.5));
    }

    #[test]
    fn test_normalize_spread() {
        let mut raw = BTreeMap::new();
        raw.insert("a".to_string(), -2.0);
        raw.insert("b".to_string(), 0.0);
        raw.insert("c".to_string(), 2.0);
        let normalized = normalize(raw);
        assert_eq!(normalized["a"], 0.0);
        assert_eq!(normalized["b"], 0.5);
        assert_eq!(normalized["c"], 1.0);
    }

    #[test]
    fn test_centroid_of_single_bin() {
        let freqs = bin_frequencies(4, 600);
        assert_eq!(freqs, vec![0.0, 100.0, 200.0, 300.0]);
        let amplitude = vec![vec![0.0], vec![0.0], vec![1.0], vec![0.0]];
        assert_relative_eq!(spectral_centroid(&amplitude, &freqs)[0], 200.0);
        assert_relative_eq!(spectral_bandwidth(&amplitude, &freqs)[0], 0.0);
        assert_relative_eq!(spectral_rolloff(&amplitude, &freqs)[0], 200.0);
    }

    #[test]
    fn test_positive_rows_never_cross_zero() {
        let amplitude = vec![vec![0.5, 0.2, 0.9], vec![1e-4, 1e-4, 1e-4]];
        assert_eq!(zero_crossing_rate_mean(&amplitude), 0.0);
        let alternating = vec![vec![1.0, -1.0, 1.0, -1.0]];
        assert_relative_eq!(zero_crossing_rate_mean(&alternating), 0.75);
    }

    #[test]
    fn test_chroma_frames_peak_at_one() {
        let spec = chord_spectrogram();
        let chroma = chroma(&spec.to_amplitude(), spec.sample_rate());
        assert_eq!(chroma.len(), N_CHROMA);
        for t in 0..n_frames(&chroma) {
            let peak = column(&chroma, t).into_iter().fold(0.0, f64::max);
            assert_relative_eq!(peak, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_contrast_survives_low_sample_rate() {
        let spec = Spectrogram::from_rows(vec![vec![-10.0, -20.0]; 16], 8000).unwrap();
        let amplitude = spec.to_amplitude();
        let freqs = bin_frequencies(16, 8000);
        assert!(spectral_contrast_mean(&amplitude, &freqs, 8000).unwrap().is_finite());
    }

    #[test]
    fn test_tiny_spectrogram_is_rejected() {
        let spec = Spectrogram::from_rows(vec![vec![0.0]; 4], 22050).unwrap();
        assert!(matches!(
            extract_features(&spec),
            Err(RecognizerError::EmptyFeatureSet(_))
        ));
    }
}
