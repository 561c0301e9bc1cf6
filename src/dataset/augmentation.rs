//! Minimal training-time augmentation
//!
//! Random horizontal flip and brightness jitter. Every decision is drawn from
//! a per-item RNG, so an `(epoch seed, index)` pair always yields the same
//! augmented image.

use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Augmentation parameters
#[derive(Debug, Clone)]
pub struct Augmenter {
    /// Probability of a horizontal flip
    pub flip_probability: f64,
    /// Maximum relative brightness change, e.g. 0.1 for +/-10%
    pub brightness_jitter: f32,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            flip_probability: 0.5,
            brightness_jitter: 0.1,
        }
    }
}

impl Augmenter {
    /// Augment `img` deterministically from `seed`
    pub fn apply(&self, img: DynamicImage, seed: u64) -> RgbImage {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let img = if rng.gen_bool(self.flip_probability) {
            img.fliph()
        } else {
            img
        };

        let mut rgb = img.to_rgb8();
        if self.brightness_jitter > 0.0 {
            let factor = 1.0 + rng.gen_range(-self.brightness_jitter..=self.brightness_jitter);
            for pixel in rgb.pixels_mut() {
                let Rgb([r, g, b]) = *pixel;
                *pixel = Rgb([scale(r, factor), scale(g, factor), scale(b, factor)]);
            }
        }
        rgb
    }
}

fn scale(channel: u8, factor: f32) -> u8 {
    (channel as f32 * factor).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(4, 2, |x, _| Rgb([(x * 60) as u8, 0, 0])))
    }

    #[test]
    fn test_same_seed_same_output() {
        let augmenter = Augmenter::default();
        assert_eq!(augmenter.apply(gradient(), 9), augmenter.apply(gradient(), 9));
    }

    #[test]
    fn test_always_flip() {
        let augmenter = Augmenter {
            flip_probability: 1.0,
            brightness_jitter: 0.0,
        };
        let out = augmenter.apply(gradient(), 0);
        assert_eq!(out.get_pixel(0, 0)[0], 180);
        assert_eq!(out.get_pixel(3, 0)[0], 0);
    }

    #[test]
    fn test_brightness_stays_in_range() {
        let augmenter = Augmenter {
            flip_probability: 0.0,
            brightness_jitter: 0.5,
        };
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([255, 255, 255])));
        for seed in 0..20 {
            let out = augmenter.apply(white.clone(), seed);
            assert!(out.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
        }
    }
}
