//! Offline pattern training: a scale-space pyramid of oriented keypoints
//! with binary descriptors, plus a half-size preview plane.

use crate::config::TrackerConfig;
use crate::descriptor::{DescriptorBank, DescriptorExtractor};
use crate::detector::{level_border, CornerDetector, Keypoint};
use crate::error::{TrackError, TrackResult};
use crate::image::{gaussian_blur, pyrdown, resample, rgba_to_gray, GrayImage, ImageView};
use tracing::warn;

/// Minimum grayscale dynamic range for a trainable reference.
const MIN_CONTRAST: u8 = 5;

/// Keypoints and descriptors of one pyramid level, with coordinates stored
/// in base-level pixels.
#[derive(Clone, Debug, Default)]
pub struct PatternLevel {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: DescriptorBank,
}

/// The trained reference pattern. Immutable after construction and shared by
/// reference across pipeline stages.
#[derive(Clone, Debug)]
pub struct PatternModel {
    /// One entry per pyramid level.
    pub levels: Vec<PatternLevel>,
    /// Half-resolution copy of the base level.
    pub preview: GrayImage,
    /// True when low contrast or an empty level forced synthetic features.
    /// Matching quality against synthetic features is markedly worse; callers
    /// presenting pattern-quality feedback should surface this.
    pub synthetic_fallback: bool,
}

impl PatternModel {
    /// Train from a decoded grayscale reference.
    pub fn train(
        gray: &ImageView<'_>,
        config: &TrackerConfig,
        extractor: &DescriptorExtractor,
    ) -> TrackResult<Self> {
        if gray.width == 0 || gray.height == 0 {
            return Err(TrackError::InvalidPatternSize { width: gray.width, height: gray.height });
        }

        // Base level: fit the longer side into the size budget, never
        // upscaling (resampling is area-average downscale only).
        let longer = gray.width.max(gray.height) as f64;
        let scale0 = (config.max_pattern_size as f64 / longer).min(1.0);
        let base_w = ((gray.width as f64 * scale0).round() as usize).max(1);
        let base_h = ((gray.height as f64 * scale0).round() as usize).max(1);

        let mut lev0 = GrayImage::default();
        resample(gray, &mut lev0, base_w, base_h);

        let mut preview = GrayImage::default();
        pyrdown(&lev0.as_view(), &mut preview);

        let (lo, hi) = intensity_range(&lev0);
        let low_contrast = hi - lo < MIN_CONTRAST;
        let mut used_fallback = low_contrast;

        let mut detector = CornerDetector::new(config.lap_threshold, config.eigen_threshold);
        let mut level_img = GrayImage::default();
        let mut level_blur = GrayImage::default();
        let mut levels = Vec::with_capacity(config.num_train_levels);

        for k in 0..config.num_train_levels {
            let sk = config.scale_inc.powi(-(k as i32));
            let lw = ((base_w as f64 * sk).round() as usize).max(1);
            let lh = ((base_h as f64 * sk).round() as usize).max(1);

            resample(&lev0.as_view(), &mut level_img, lw.min(base_w), lh.min(base_h));
            gaussian_blur(&level_img.as_view(), &mut level_blur, config.blur_size);

            let mut level = PatternLevel::default();
            let border = level_border(level_blur.width, level_blur.height);

            // Corners come from the blurred plane, like the per-frame path.
            if low_contrast {
                synthesize_keypoints(&level_blur, border, config, k, &mut level.keypoints);
            } else {
                detector.detect(
                    &level_blur.as_view(),
                    border,
                    config.max_per_level,
                    k,
                    &mut level.keypoints,
                );
                if level.keypoints.is_empty() {
                    used_fallback = true;
                    synthesize_keypoints(&level_blur, border, config, k, &mut level.keypoints);
                }
            }

            extractor.describe(&level_blur.as_view(), &mut level.keypoints, &mut level.descriptors);

            // Back to base-level units for matching and homography fitting.
            let inv = 1.0 / sk;
            for kp in &mut level.keypoints {
                kp.x = (kp.x as f64 * inv) as f32;
                kp.y = (kp.y as f64 * inv) as f32;
            }
            levels.push(level);
        }

        if used_fallback {
            warn!(
                low_contrast,
                "pattern reference is feature-poor; synthetic fallback features in use"
            );
        }

        Ok(Self { levels, preview, synthetic_fallback: used_fallback })
    }

    /// Train from an RGBA reference buffer.
    pub fn train_rgba(
        rgba: &[u8],
        width: usize,
        height: usize,
        config: &TrackerConfig,
        extractor: &DescriptorExtractor,
    ) -> TrackResult<Self> {
        if width == 0 || height == 0 {
            return Err(TrackError::InvalidPatternSize { width, height });
        }
        let mut gray = GrayImage::default();
        rgba_to_gray(rgba, width, height, &mut gray)?;
        Self::train(&gray.as_view(), config, extractor)
    }

    /// Reference rectangle dimensions in base-level pixels, reconstructed
    /// from the half-size preview.
    #[must_use]
    pub fn reference_size(&self) -> (f64, f64) {
        (self.preview.width as f64 * 2.0, self.preview.height as f64 * 2.0)
    }
}

fn intensity_range(img: &GrayImage) -> (u8, u8) {
    let mut lo = u8::MAX;
    let mut hi = u8::MIN;
    for &p in &img.data {
        lo = lo.min(p);
        hi = hi.max(p);
    }
    (lo, hi)
}

/// Fallback features for a level the detector cannot populate: a regular
/// grid over the interior plus five canonical anchors at the quarter and
/// center positions.
fn synthesize_keypoints(
    img: &GrayImage,
    border: usize,
    config: &TrackerConfig,
    level: usize,
    out: &mut Vec<Keypoint>,
) {
    out.clear();
    let w = img.width;
    let h = img.height;
    if w <= 2 * border || h <= 2 * border {
        return;
    }

    let step = config.grid_distance.max(1);
    let mut y = border;
    while y < h - border {
        let mut x = border;
        while x < w - border {
            out.push(Keypoint { x: x as f32, y: y as f32, score: 0.0, level, angle: 0.0 });
            x += step;
        }
        y += step;
    }

    let anchors = [
        (w / 4, h / 4),
        (3 * w / 4, h / 4),
        (w / 2, h / 2),
        (w / 4, 3 * h / 4),
        (3 * w / 4, 3 * h / 4),
    ];
    for (ax, ay) in anchors {
        let ax = ax.clamp(border, w - border - 1);
        let ay = ay.clamp(border, h - border - 1);
        out.push(Keypoint { x: ax as f32, y: ay as f32, score: 0.0, level, angle: 0.0 });
    }

    out.truncate(config.max_per_level);
}
