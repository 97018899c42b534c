//! Grayscale filters behind the occupancy heuristic.
//!
//! - `to_gray`: BT.601 luma (0.299 / 0.587 / 0.114) in 14-bit fixed point.
//! - `gaussian_blur`: separable Gaussian; sizes 3/5/7 with `sigma <= 0` use the
//!   binomial kernels (5 taps ≈ [1,4,6,4,1]/16), other sizes derive sigma from
//!   the kernel size.
//! - `adaptive_threshold_inv`: Gaussian-weighted local mean over a square
//!   block; a pixel is foreground (255) when it sits at least `offset` below
//!   its local mean, so dark edges and texture light up.
//!
//! Storage stays in `image::GrayImage`; intermediate sums are `f64` and are
//! rounded back to u8 after each full 2D pass.

use image::{GrayImage, Luma, RgbImage};

const LUMA_SHIFT: u32 = 14;
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;

/// Border extrapolation for neighbourhood filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Border {
    /// `gfedcb|abcdefgh|gfedcba`
    Reflect101,
    /// `aaaaaa|abcdefgh|hhhhhhh`
    Replicate,
}

impl Border {
    fn index(self, i: i64, n: i64) -> usize {
        if n <= 1 {
            return 0;
        }
        match self {
            Border::Replicate => i.clamp(0, n - 1) as usize,
            Border::Reflect101 => {
                let mut i = i;
                loop {
                    if i < 0 {
                        i = -i;
                    } else if i >= n {
                        i = 2 * n - 2 - i;
                    } else {
                        return i as usize;
                    }
                }
            }
        }
    }
}

pub fn luma(rgb: [u8; 3]) -> u8 {
    let v = rgb[0] as u32 * LUMA_R + rgb[1] as u32 * LUMA_G + rgb[2] as u32 * LUMA_B;
    ((v + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
}

pub fn to_gray(region: &RgbImage) -> GrayImage {
    let (w, h) = region.dimensions();
    GrayImage::from_fn(w, h, |x, y| Luma([luma(region.get_pixel(x, y).0)]))
}

/// Normalised 1D Gaussian kernel of odd length `size`.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        match size {
            1 => return vec![1.0],
            3 => return vec![0.25, 0.5, 0.25],
            5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
            7 => {
                return vec![
                    0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
                ]
            }
            _ => {}
        }
    }
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size as f64 - 1.0) / 2.0;
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

pub fn gaussian_blur(src: &GrayImage, size: usize, sigma: f64, border: Border) -> GrayImage {
    let kernel = gaussian_kernel(size, sigma);
    separable_filter(src, &kernel, border)
}

fn separable_filter(src: &GrayImage, kernel: &[f64], border: Border) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let radius = (kernel.len() / 2) as i64;
    let (wi, hi) = (w as i64, h as i64);
    let stride = w as usize;

    // horizontal
    let mut tmp = vec![0f64; stride * h as usize];
    for y in 0..h {
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = border.index(x + k as i64 - radius, wi);
                acc += weight * src.get_pixel(sx as u32, y).0[0] as f64;
            }
            tmp[y as usize * stride + x as usize] = acc;
        }
    }

    // vertical
    let mut out = GrayImage::new(w, h);
    for y in 0..hi {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = border.index(y + k as i64 - radius, hi);
                acc += weight * tmp[sy * stride + x as usize];
            }
            out.put_pixel(x, y as u32, Luma([round_to_u8(acc)]));
        }
    }
    out
}

/// Inverted adaptive threshold against a Gaussian-weighted local mean.
pub fn adaptive_threshold_inv(src: &GrayImage, block_size: usize, offset: i32) -> GrayImage {
    let mean = gaussian_blur(src, block_size, 0.0, Border::Replicate);
    let (w, h) = src.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let p = src.get_pixel(x, y).0[0] as i32;
        let m = mean.get_pixel(x, y).0[0] as i32;
        if p <= m - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

pub fn count_foreground(img: &GrayImage) -> usize {
    img.pixels().filter(|p| p.0[0] > 0).count()
}

fn round_to_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
