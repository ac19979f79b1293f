//! Colour-mapped spectrogram images

use crate::error::Result;
use crate::spectrogram::Spectrogram;
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;
use tracing::debug;

/// Viridis sampled at nine evenly spaced stops
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [72, 40, 120],
    [62, 73, 137],
    [49, 104, 142],
    [38, 130, 142],
    [31, 158, 137],
    [53, 183, 121],
    [110, 206, 88],
    [253, 231, 37],
];

/// Viridis colour for a value already scaled into [0, 1]
pub fn viridis(t: f32) -> Rgb<u8> {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (VIRIDIS.len() - 1) as f32;
    let lower = (pos.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = pos - lower as f32;

    let (a, b) = (VIRIDIS[lower], VIRIDIS[lower + 1]);
    let mix = |i: usize| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * frac).round() as u8;
    Rgb([mix(0), mix(1), mix(2)])
}

/// Renders one pixel per (frame, mel bin), low frequencies at the bottom
///
/// Colours are scaled between the spectrogram's own minimum and maximum.
pub fn colorize(spectrogram: &Spectrogram) -> RgbImage {
    let (lo, hi) = spectrogram.range();
    let span = hi - lo;
    let width = spectrogram.n_frames() as u32;
    let height = spectrogram.n_mels() as u32;

    RgbImage::from_fn(width, height, |x, y| {
        let mel = (height - 1 - y) as usize;
        let value = spectrogram.get(mel, x as usize);
        let t = if span > 0.0 { (value - lo) / span } else { 0.0 };
        viridis(t)
    })
}

/// Writes the rendered spectrogram to `path` as PNG
pub fn save_spectrogram_png<P: AsRef<Path>>(spectrogram: &Spectrogram, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    colorize(spectrogram).save_with_format(path, ImageFormat::Png)?;
    debug!("Saved spectrogram image {}", path.display());
    Ok(())
}
