//! Synthetic scene generation for tests and benchmarks.
//!
//! Scenes are rendered from a seeded block-mosaic reference so detection
//! quality is reproducible. The mosaic is aperiodic, which keeps binary
//! descriptors distinctive; a strict checkerboard would alias heavily under
//! Hamming matching.

use crate::config::TrackerConfig;
use crate::geometry::Quad;
use crate::image::GrayImage;
use crate::Pipeline;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Generate a high-texture reference image: a block mosaic of seeded random
/// gray levels.
#[must_use]
pub fn mosaic_pattern(width: usize, height: usize, seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let block = 12;
    let bw = width / block + 2;
    let bh = height / block + 2;
    let values: Vec<u8> = (0..bw * bh).map(|_| rng.gen_range(16..240)).collect();

    let mut img = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            img.data[y * width + x] = values[(y / block) * bw + (x / block)];
        }
    }
    img
}

/// A frame of uniform gray noise with no embedded pattern.
#[must_use]
pub fn noise_frame(width: usize, height: usize, seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut img = GrayImage::new(width, height);
    for p in &mut img.data {
        *p = rng.gen_range(90..160);
    }
    img
}

/// Placement of the reference pattern in a rendered frame: a similarity
/// transform about the pattern center.
#[derive(Clone, Copy, Debug)]
pub struct PatternPlacement {
    /// Pattern center in frame pixels.
    pub center_x: f64,
    /// Pattern center in frame pixels.
    pub center_y: f64,
    /// Uniform scale factor.
    pub scale: f64,
    /// Rotation in radians, counter-clockwise in image coordinates.
    pub rotation_rad: f64,
}

impl PatternPlacement {
    /// Centered, unrotated, unscaled placement.
    #[must_use]
    pub fn centered(frame_w: usize, frame_h: usize) -> Self {
        Self {
            center_x: frame_w as f64 / 2.0,
            center_y: frame_h as f64 / 2.0,
            scale: 1.0,
            rotation_rad: 0.0,
        }
    }

    /// The placement shifted by (dx, dy).
    #[must_use]
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self { center_x: self.center_x + dx, center_y: self.center_y + dy, ..*self }
    }

    /// Ground-truth corner quad (TL, TR, BR, BL) of a `pw` x `ph` pattern
    /// under this placement.
    #[must_use]
    pub fn ground_truth_quad(&self, pw: usize, ph: usize) -> Quad {
        let hw = pw as f64 / 2.0;
        let hh = ph as f64 / 2.0;
        let (sin, cos) = self.rotation_rad.sin_cos();
        let corners = [[-hw, -hh], [hw, -hh], [hw, hh], [-hw, hh]];
        let mut quad = [[0.0; 2]; 4];
        for (out, c) in quad.iter_mut().zip(corners.iter()) {
            let x = c[0] * self.scale;
            let y = c[1] * self.scale;
            out[0] = self.center_x + x * cos - y * sin;
            out[1] = self.center_y + x * sin + y * cos;
        }
        quad
    }
}

/// Render the pattern into a frame under the placement, over a flat
/// background. Sampling is bilinear through the inverse transform.
#[must_use]
pub fn render_scene(
    pattern: &GrayImage,
    placement: &PatternPlacement,
    frame_w: usize,
    frame_h: usize,
    background: u8,
) -> GrayImage {
    let mut frame = GrayImage::new(frame_w, frame_h);
    frame.data.fill(background);

    let (sin, cos) = placement.rotation_rad.sin_cos();
    let inv_scale = 1.0 / placement.scale;
    let hw = pattern.width as f64 / 2.0;
    let hh = pattern.height as f64 / 2.0;
    let view = pattern.as_view();

    for y in 0..frame_h {
        for x in 0..frame_w {
            let dx = x as f64 - placement.center_x;
            let dy = y as f64 - placement.center_y;
            // Inverse rotation, then inverse scale, into pattern coords.
            let u = (dx * cos + dy * sin) * inv_scale + hw;
            let v = (-dx * sin + dy * cos) * inv_scale + hh;
            if u >= 0.0 && v >= 0.0 && u < pattern.width as f64 && v < pattern.height as f64 {
                frame.data[y * frame_w + x] = view.sample_bilinear(u as f32, v as f32) as u8;
            }
        }
    }
    frame
}

/// Expand a grayscale plane into an RGBA buffer (opaque, R = G = B = Y).
#[must_use]
pub fn gray_to_rgba(img: &GrayImage) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(img.data.len() * 4);
    for &p in &img.data {
        rgba.extend_from_slice(&[p, p, p, 255]);
    }
    rgba
}

/// Mean per-corner Euclidean error between an ordered detected quad and the
/// ground truth.
#[must_use]
pub fn corner_error(detected: &Quad, ground_truth: &Quad) -> f64 {
    let mut acc = 0.0;
    for i in 0..4 {
        let dx = detected[i][0] - ground_truth[i][0];
        let dy = detected[i][1] - ground_truth[i][1];
        acc += (dx * dx + dy * dy).sqrt();
    }
    acc / 4.0
}

/// Centroid of a quad.
#[must_use]
pub fn quad_centroid(quad: &Quad) -> [f64; 2] {
    let mut cx = 0.0;
    let mut cy = 0.0;
    for c in quad {
        cx += c[0];
        cy += c[1];
    }
    [cx / 4.0, cy / 4.0]
}

/// A pipeline trained on a seeded mosaic pattern of the given size.
#[must_use]
pub fn mosaic_pipeline(pattern_w: usize, pattern_h: usize, config: TrackerConfig) -> Pipeline {
    let pattern = mosaic_pattern(pattern_w, pattern_h, 7);
    let rgba = gray_to_rgba(&pattern);
    Pipeline::new(&rgba, pattern_w, pattern_h, config, crate::VariantTransform::default())
        .expect("mosaic pattern must train")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mosaic_is_deterministic() {
        let a = mosaic_pattern(64, 64, 3);
        let b = mosaic_pattern(64, 64, 3);
        assert_eq!(a.data, b.data);
        let c = mosaic_pattern(64, 64, 4);
        assert_ne!(a.data, c.data);
    }

    #[test]
    fn test_render_identity_placement_copies_pattern() {
        let pattern = mosaic_pattern(64, 64, 1);
        let placement = PatternPlacement::centered(128, 128);
        let frame = render_scene(&pattern, &placement, 128, 128, 0);
        // Pattern occupies [32, 96) in both axes.
        assert_eq!(frame.pixel(32, 32), pattern.pixel(0, 0));
        assert_eq!(frame.pixel(95, 95), pattern.pixel(63, 63));
        assert_eq!(frame.pixel(5, 5), 0);
    }

    #[test]
    fn test_ground_truth_quad_identity() {
        let placement = PatternPlacement::centered(128, 128);
        let quad = placement.ground_truth_quad(64, 64);
        assert_eq!(quad[0], [32.0, 32.0]);
        assert_eq!(quad[2], [96.0, 96.0]);
    }

    #[test]
    fn test_ground_truth_quad_translation() {
        let placement = PatternPlacement::centered(128, 128).translated(10.0, -5.0);
        let quad = placement.ground_truth_quad(64, 64);
        assert_eq!(quad[0], [42.0, 27.0]);
    }

    #[test]
    fn test_corner_error_zero_for_identical() {
        let quad: Quad = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        assert_eq!(corner_error(&quad, &quad), 0.0);
    }
}
