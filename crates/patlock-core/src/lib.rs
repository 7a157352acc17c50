//! Markerless planar image tracking for AR overlays.
//!
//! Given a trained reference pattern and a stream of RGBA frames, the
//! [`Pipeline`] locates the pattern in each frame and emits its projected
//! quadrilateral in frame coordinates, damped for overlay stability. It
//! alternates between descriptor-based detection and pyramidal
//! Lucas-Kanade tracking, degrading to the last known quad across brief
//! dropouts.

pub mod config;
pub mod descriptor;
pub mod detector;
pub mod error;
pub mod flow;
pub mod geometry;
pub mod homography;
pub mod image;
pub mod matcher;
pub mod pattern;
pub mod test_utils;

pub use config::{TrackerConfig, VariantTransform};
pub use error::{TrackError, TrackResult};
pub use flow::TrackOutcome;
pub use geometry::Quad;
pub use pattern::PatternModel;

use crate::descriptor::{DescriptorBank, DescriptorExtractor};
use crate::detector::{CornerDetector, Keypoint};
use crate::flow::FlowTracker;
use crate::homography::{HomographyEstimator, RansacParams};
use crate::image::{gaussian_blur, rgba_to_gray, GrayImage};
use crate::matcher::{match_against_pattern, Match};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use tracing::{debug, trace};

/// Detection border of full-size frames.
const FRAME_BORDER: usize = 17;

/// Pipeline state machine mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Searching for the pattern with descriptor matching.
    #[default]
    Detecting,
    /// Following detection inliers with optical flow.
    Tracking,
}

/// Per-tick diagnostics for the embedder.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    /// Corners found in the frame (detection ticks).
    pub keypoints: usize,
    /// Descriptor matches under the distance threshold (detection ticks).
    pub matches: usize,
    /// RANSAC inliers supporting the accepted homography.
    pub inliers: usize,
    /// Points the optical-flow tracker is carrying.
    pub tracked_points: usize,
}

/// Result of one pipeline tick.
#[derive(Clone, Copy, Debug)]
pub struct FrameOutput {
    /// Quad to overlay, TL/TR/BR/BL in frame pixels; `None` hides the
    /// overlay.
    pub quad: Option<Quad>,
    /// Mode after this tick.
    pub mode: Mode,
    /// True when this tick fell back from Tracking to Detecting; the
    /// overlay consumer should pause playback.
    pub redetecting: bool,
    pub stats: FrameStats,
}

/// The detect/track pipeline. One instance per pattern; one tick per frame.
///
/// All scratch buffers are owned here and reused across ticks; the arena is
/// reset at the top of every tick for tick-lived allocations.
pub struct Pipeline {
    config: TrackerConfig,
    variant: VariantTransform,
    pattern: PatternModel,

    extractor: DescriptorExtractor,
    corner_detector: CornerDetector,
    estimator: HomographyEstimator,
    tracker: FlowTracker,
    arena: Bump,

    // Per-tick scratch, provisioned up front.
    gray: GrayImage,
    blurred: GrayImage,
    screen_keypoints: Vec<Keypoint>,
    screen_descriptors: DescriptorBank,
    matches: Vec<Match>,
    ransac_mask: Vec<bool>,

    // State machine.
    mode: Mode,
    last_quad: Option<Quad>,
    optical_persist: u32,
    /// Reserved for sub-frame smoothing; written each tick, not yet read.
    interpolation_constant: f64,
}

impl Pipeline {
    /// Train a pattern from an RGBA reference and build the pipeline.
    pub fn new(
        pattern_rgba: &[u8],
        pattern_width: usize,
        pattern_height: usize,
        config: TrackerConfig,
        variant: VariantTransform,
    ) -> TrackResult<Self> {
        let extractor = DescriptorExtractor::new();
        let pattern = PatternModel::train_rgba(
            pattern_rgba,
            pattern_width,
            pattern_height,
            &config,
            &extractor,
        )?;
        Ok(Self::with_model(pattern, config, variant))
    }

    /// Build the pipeline around an already-trained pattern model.
    #[must_use]
    pub fn with_model(
        pattern: PatternModel,
        config: TrackerConfig,
        variant: VariantTransform,
    ) -> Self {
        Self {
            extractor: DescriptorExtractor::new(),
            corner_detector: CornerDetector::new(config.lap_threshold, config.eigen_threshold),
            estimator: HomographyEstimator::new(RansacParams::default()),
            tracker: FlowTracker::new(&config),
            arena: Bump::new(),
            gray: GrayImage::default(),
            blurred: GrayImage::default(),
            screen_keypoints: Vec::with_capacity(config.max_corners),
            screen_descriptors: DescriptorBank::with_capacity(config.max_corners),
            matches: Vec::with_capacity(config.max_corners),
            ransac_mask: Vec::with_capacity(config.max_corners),
            mode: Mode::Detecting,
            last_quad: None,
            optical_persist: 0,
            interpolation_constant: 0.0,
            config,
            variant,
            pattern,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn pattern(&self) -> &PatternModel {
        &self.pattern
    }

    /// Progress of the damping ramp, 0.0 to 1.0. Reserved for sub-frame
    /// overlay smoothing; the core updates it but does not consume it.
    #[must_use]
    pub fn interpolation_constant(&self) -> f64 {
        self.interpolation_constant
    }

    /// Process one frame. Exactly one tick runs to completion per call.
    ///
    /// Invalid frames fail fast without touching the state machine; the
    /// overlay stays in whatever state the previous tick left it.
    pub fn process_frame(
        &mut self,
        rgba: &[u8],
        width: usize,
        height: usize,
    ) -> TrackResult<FrameOutput> {
        self.arena.reset();
        rgba_to_gray(rgba, width, height, &mut self.gray)?;

        let output = match self.mode {
            Mode::Detecting => self.detect_tick(),
            Mode::Tracking => self.track_tick(),
        };
        Ok(output)
    }

    /// One detection tick: corners, descriptors, matching, RANSAC.
    fn detect_tick(&mut self) -> FrameOutput {
        let mut stats = FrameStats::default();

        gaussian_blur(&self.gray.as_view(), &mut self.blurred, self.config.blur_size);
        self.corner_detector.detect(
            &self.blurred.as_view(),
            FRAME_BORDER,
            self.config.max_corners,
            0,
            &mut self.screen_keypoints,
        );
        stats.keypoints = self.screen_keypoints.len();

        self.extractor.describe(
            &self.blurred.as_view(),
            &mut self.screen_keypoints,
            &mut self.screen_descriptors,
        );

        let match_stats = match_against_pattern(
            &self.screen_descriptors,
            &self.pattern.levels,
            self.config.match_threshold,
            &mut self.matches,
        );
        stats.matches = self.matches.len();
        trace!(
            queries = match_stats.queries,
            matched = match_stats.matched,
            ambiguous = match_stats.ambiguous,
            "descriptor matching"
        );

        if self.matches.len() >= 4 {
            let mut src = BumpVec::with_capacity_in(self.matches.len(), &self.arena);
            let mut dst = BumpVec::with_capacity_in(self.matches.len(), &self.arena);
            for m in &self.matches {
                let pkp = &self.pattern.levels[m.pattern_level].keypoints[m.pattern_idx];
                let skp = &self.screen_keypoints[m.screen_idx];
                src.push([pkp.x as f64, pkp.y as f64]);
                dst.push([skp.x as f64, skp.y as f64]);
            }

            let (h, good) = self.estimator.estimate(&src, &dst, &mut self.ransac_mask);
            stats.inliers = good;

            if good >= self.config.good_match_threshold {
                let (ref_w, ref_h) = self.pattern.reference_size();
                if let Some(quad) = geometry::transform_corners(&h, ref_w, ref_h, &self.variant) {
                    if geometry::quad_is_valid(&quad) {
                        // Inliers seed the optical-flow tracker.
                        let mut inlier_pts = BumpVec::with_capacity_in(good, &self.arena);
                        for (i, &keep) in self.ransac_mask.iter().enumerate() {
                            if keep {
                                inlier_pts.push(dst[i]);
                            }
                        }
                        self.tracker.init_with_homography(
                            h,
                            &inlier_pts,
                            ref_w,
                            ref_h,
                            &self.gray.as_view(),
                        );
                        stats.tracked_points = inlier_pts.len();

                        debug!(inliers = good, "pattern detected; entering tracking");
                        self.mode = Mode::Tracking;
                        self.last_quad = Some(quad);
                        self.optical_persist = 0;
                        self.interpolation_constant = 0.0;
                        return FrameOutput {
                            quad: Some(quad),
                            mode: self.mode,
                            redetecting: false,
                            stats,
                        };
                    }
                }
            }
        }

        // Detection failed: hold the stale quad through the persistence
        // window, then hide the overlay.
        let quad = if self.last_quad.is_some()
            && self.optical_persist < self.config.max_persist_optical_frames
        {
            self.optical_persist += 1;
            self.last_quad
        } else {
            self.last_quad = None;
            None
        };
        FrameOutput { quad, mode: self.mode, redetecting: false, stats }
    }

    /// One tracking tick: optical flow, composition, damping.
    fn track_tick(&mut self) -> FrameOutput {
        let mut stats = FrameStats::default();
        let damped_flag = self.optical_persist <= self.config.max_persist_optical_frames;

        match self.tracker.track(&self.gray.as_view(), &self.variant) {
            TrackOutcome::Lost => {
                debug!("tracking lost; re-entering detection");
                self.mode = Mode::Detecting;
                let stale = self.last_quad;
                self.optical_persist = 0;
                FrameOutput { quad: stale, mode: self.mode, redetecting: true, stats }
            }
            TrackOutcome::Tracked(raw) => {
                stats.tracked_points = self.tracker.point_count();

                let quad = match (damped_flag, self.last_quad) {
                    (true, Some(prev)) => {
                        damp_quad(&raw, &prev, self.optical_persist, self.config.max_persist_optical_frames)
                    }
                    _ => raw,
                };
                self.last_quad = Some(quad);
                self.optical_persist =
                    (self.optical_persist + 1).min(self.config.max_persist_optical_frames);
                self.interpolation_constant =
                    self.optical_persist as f64 / self.config.max_persist_optical_frames as f64;

                let emitted = geometry::quad_is_valid(&quad).then_some(quad);
                FrameOutput { quad: emitted, mode: self.mode, redetecting: false, stats }
            }
        }
    }
}

/// Linear blend of the raw tracker quad with the previous quad: at `f == 0`
/// the previous corners pass through, at `f == max` the raw corners do.
fn damp_quad(raw: &Quad, prev: &Quad, f: u32, max: u32) -> Quad {
    if max == 0 {
        return *raw;
    }
    let f = f.min(max) as f64;
    let max = max as f64;
    let mut out = [[0.0; 2]; 4];
    for i in 0..4 {
        out[i][0] = (raw[i][0] * f + prev[i][0] * (max - f)) / max;
        out[i][1] = (raw[i][1] * f + prev[i][1] * (max - f)) / max;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn assert_send<T: Send>() {}
    const _: () = assert_send::<Pipeline>();

    #[test]
    fn test_damp_quad_endpoints() {
        let raw: Quad = [[10.0, 0.0], [20.0, 0.0], [20.0, 10.0], [10.0, 10.0]];
        let prev: Quad = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];

        // f == 0: previous corners pass through.
        assert_eq!(damp_quad(&raw, &prev, 0, 6), prev);
        // f == max: raw corners pass through.
        assert_eq!(damp_quad(&raw, &prev, 6, 6), raw);
    }

    #[test]
    fn test_damp_quad_midpoint() {
        let raw: Quad = [[12.0, 6.0]; 4];
        let prev: Quad = [[0.0, 0.0]; 4];
        let mid = damp_quad(&raw, &prev, 3, 6);
        for c in mid {
            assert!((c[0] - 6.0).abs() < 1e-12);
            assert!((c[1] - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pipeline_rejects_invalid_frames() {
        let mut pipeline = test_utils::mosaic_pipeline(128, 128, TrackerConfig::default());
        assert!(pipeline.process_frame(&[], 0, 0).is_err());
        // A short buffer for the claimed dimensions also fails fast.
        assert!(pipeline.process_frame(&[0u8; 16], 64, 64).is_err());
        assert_eq!(pipeline.mode(), Mode::Detecting);
    }

    #[test]
    fn test_pipeline_starts_detecting() {
        let pipeline = test_utils::mosaic_pipeline(128, 128, TrackerConfig::default());
        assert_eq!(pipeline.mode(), Mode::Detecting);
    }
}
