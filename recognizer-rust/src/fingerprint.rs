use crate::error::{RecognizerError, Result};
use crate::models::Fingerprint;
use crate::render::colorize;
use crate::spectrogram::Spectrogram;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::f64::consts::PI;

/// Side of the greyscale thumbnail the DCT runs on
const THUMBNAIL_SIZE: u32 = 32;

/// Side of the low-frequency DCT block that becomes the hash
const HASH_SIZE: usize = 8;

/// Generates the perceptual fingerprint of a spectrogram
///
/// # Process
/// 1. Render the spectrogram through the viridis colour map
/// 2. Convert to greyscale and shrink to a 32x32 thumbnail (Lanczos3)
/// 3. Take the 2D DCT and keep the 8x8 lowest frequencies
/// 4. Set one bit per coefficient above the block's median
///
/// Only the coarse time-frequency shape survives steps 2 and 3, which is
/// what makes the hash tolerant to volume changes, resampling and mild noise.
/// The 64 bits are rendered MSB first as 16 lowercase hex characters.
pub fn generate_fingerprint(spectrogram: &Spectrogram) -> Result<Fingerprint> {
    let rendered = colorize(spectrogram);
    if rendered.width() == 0 || rendered.height() == 0 {
        return Err(RecognizerError::Fingerprint("rendered image is empty".into()));
    }
    perceptual_hash(&imageops::grayscale(&rendered))
}

/// DCT-based perceptual hash of a greyscale image
pub fn perceptual_hash(image: &GrayImage) -> Result<Fingerprint> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RecognizerError::Fingerprint("image is empty".into()));
    }

    let thumb = imageops::resize(image, THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Lanczos3);
    let n = THUMBNAIL_SIZE as usize;
    let pixels: Vec<Vec<f64>> = (0..n)
        .map(|y| {
            (0..n)
                .map(|x| thumb.get_pixel(x as u32, y as u32)[0] as f64)
                .collect()
        })
        .collect();

    let coefficients = dct_2d(&pixels);
    let low: Vec<f64> = coefficients[..HASH_SIZE]
        .iter()
        .flat_map(|row| row[..HASH_SIZE].iter().copied())
        .collect();

    let median = median(&low);
    let bits = low
        .iter()
        .fold(0u64, |acc, &c| (acc << 1) | u64::from(c > median));

    Ok(Fingerprint::new(format!("{:016x}", bits)))
}

/// Unnormalised DCT-II of a sequence
fn dct(input: &[f64]) -> Vec<f64> {
    let n = input.len();
    (0..n)
        .map(|k| {
            2.0 * input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .sum::<f64>()
        })
        .collect()
}

/// DCT over columns, then over rows
fn dct_2d(pixels: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let rows = pixels.len();
    let cols = pixels.first().map(|r| r.len()).unwrap_or(0);

    let mut by_column = vec![vec![0.0; cols]; rows];
    for c in 0..cols {
        let column: Vec<f64> = pixels.iter().map(|row| row[c]).collect();
        for (r, value) in dct(&column).into_iter().enumerate() {
            by_column[r][c] = value;
        }
    }
    by_column.iter().map(|row| dct(row)).collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
