//! Configuration types for the tracking pipeline.
//!
//! [`TrackerConfig`] is pipeline-level configuration, immutable after the
//! [`Pipeline`](crate::Pipeline) is constructed. All per-tick code reads
//! from this value; nothing consults process-wide mutable state.

/// Pipeline-level configuration for the tracker.
///
/// Use the builder for ergonomic construction:
///
/// ```
/// use patlock_core::config::TrackerConfig;
///
/// let config = TrackerConfig::builder()
///     .match_threshold(40)
///     .max_pattern_size(256)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
    // Feature budget
    /// Maximum corners per frame and per tracked point set (default: 300).
    pub max_corners: usize,
    /// Maximum keypoints retained per pattern pyramid level (default: 300).
    pub max_per_level: usize,

    // Pattern training
    /// Number of pattern pyramid levels (default: 8).
    pub num_train_levels: usize,
    /// Longer side of the pattern base level in pixels (default: 512).
    /// References already within this budget are not rescaled.
    pub max_pattern_size: usize,
    /// Scale increment between pattern levels (default: sqrt(2)).
    pub scale_inc: f64,
    /// Spacing of the synthetic fallback feature grid in pixels (default: 30).
    pub grid_distance: usize,

    // Detection
    /// Gaussian blur kernel size applied before corner detection, odd,
    /// clamped to 3..=9 (default: 5).
    pub blur_size: usize,
    /// Laplacian response threshold of the corner detector (default: 30).
    pub lap_threshold: i32,
    /// Minimum-eigenvalue threshold of the corner detector (default: 25).
    pub eigen_threshold: i32,
    /// Maximum Hamming distance for a descriptor match (default: 48).
    pub match_threshold: u32,
    /// Minimum RANSAC inliers to accept a detection (default: 20).
    pub good_match_threshold: usize,

    // Optical flow
    /// Number of Lucas-Kanade pyramid levels (default: 5).
    pub pyramid_levels: usize,
    /// Full LK window size in pixels (default: 50).
    pub win_size: usize,
    /// Maximum LK iterations per level (default: 50).
    pub max_iterations: usize,
    /// LK convergence epsilon in pixels (default: 0.01).
    pub epsilon: f32,
    /// Minimum eigenvalue for a trackable LK window (default: 0.001).
    pub min_eigen_threshold: f32,
    /// Minimum surviving points before tracking is declared lost (default: 20).
    pub point_threshold: usize,
    /// Minimum RANSAC inliers for the incremental homography (default: 20).
    pub good_match_threshold_tracking: usize,
    /// Minimum average pairwise point distance in pixels; below this the
    /// point cloud is considered collapsed (default: 25).
    pub density_threshold: f64,
    /// Maximum average corner displacement between consecutive quads in
    /// pixels (default: 20).
    pub prune_threshold: f64,
    /// Maximum interior angle of the tracked quad in degrees (default: 120).
    pub max_quad_angle_allowed: f64,

    // Output
    /// Frames the last quad persists across detection dropouts, and the
    /// length of the damping ramp (default: 6).
    pub max_persist_optical_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_corners: 300,
            max_per_level: 300,
            num_train_levels: 8,
            max_pattern_size: 512,
            scale_inc: std::f64::consts::SQRT_2,
            grid_distance: 30,
            blur_size: 5,
            lap_threshold: 30,
            eigen_threshold: 25,
            match_threshold: 48,
            good_match_threshold: 20,
            pyramid_levels: 5,
            win_size: 50,
            max_iterations: 50,
            epsilon: 0.01,
            min_eigen_threshold: 0.001,
            point_threshold: 20,
            good_match_threshold_tracking: 20,
            density_threshold: 25.0,
            prune_threshold: 20.0,
            max_quad_angle_allowed: 120.0,
            max_persist_optical_frames: 6,
        }
    }
}

impl TrackerConfig {
    /// Create a new builder for `TrackerConfig`.
    #[must_use]
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }
}

/// Builder for [`TrackerConfig`].
#[derive(Default)]
pub struct TrackerConfigBuilder {
    max_corners: Option<usize>,
    max_per_level: Option<usize>,
    num_train_levels: Option<usize>,
    max_pattern_size: Option<usize>,
    scale_inc: Option<f64>,
    grid_distance: Option<usize>,
    blur_size: Option<usize>,
    lap_threshold: Option<i32>,
    eigen_threshold: Option<i32>,
    match_threshold: Option<u32>,
    good_match_threshold: Option<usize>,
    pyramid_levels: Option<usize>,
    win_size: Option<usize>,
    max_iterations: Option<usize>,
    epsilon: Option<f32>,
    min_eigen_threshold: Option<f32>,
    point_threshold: Option<usize>,
    good_match_threshold_tracking: Option<usize>,
    density_threshold: Option<f64>,
    prune_threshold: Option<f64>,
    max_quad_angle_allowed: Option<f64>,
    max_persist_optical_frames: Option<u32>,
}

impl TrackerConfigBuilder {
    /// Set the per-frame corner budget.
    #[must_use]
    pub fn max_corners(mut self, n: usize) -> Self {
        self.max_corners = Some(n);
        self
    }

    /// Set the per-level pattern keypoint budget.
    #[must_use]
    pub fn max_per_level(mut self, n: usize) -> Self {
        self.max_per_level = Some(n);
        self
    }

    /// Set the number of pattern pyramid levels.
    #[must_use]
    pub fn num_train_levels(mut self, n: usize) -> Self {
        self.num_train_levels = Some(n);
        self
    }

    /// Set the pattern base-level size budget.
    #[must_use]
    pub fn max_pattern_size(mut self, size: usize) -> Self {
        self.max_pattern_size = Some(size);
        self
    }

    /// Set the scale increment between pattern pyramid levels.
    #[must_use]
    pub fn scale_inc(mut self, inc: f64) -> Self {
        self.scale_inc = Some(inc);
        self
    }

    /// Set the fallback feature grid spacing.
    #[must_use]
    pub fn grid_distance(mut self, dist: usize) -> Self {
        self.grid_distance = Some(dist);
        self
    }

    /// Set the pre-detection blur kernel size.
    #[must_use]
    pub fn blur_size(mut self, size: usize) -> Self {
        self.blur_size = Some(size);
        self
    }

    /// Set the detector Laplacian threshold.
    #[must_use]
    pub fn lap_threshold(mut self, t: i32) -> Self {
        self.lap_threshold = Some(t);
        self
    }

    /// Set the detector minimum-eigenvalue threshold.
    #[must_use]
    pub fn eigen_threshold(mut self, t: i32) -> Self {
        self.eigen_threshold = Some(t);
        self
    }

    /// Set the descriptor match distance threshold.
    #[must_use]
    pub fn match_threshold(mut self, t: u32) -> Self {
        self.match_threshold = Some(t);
        self
    }

    /// Set the detection inlier acceptance threshold.
    #[must_use]
    pub fn good_match_threshold(mut self, n: usize) -> Self {
        self.good_match_threshold = Some(n);
        self
    }

    /// Set the number of LK pyramid levels.
    #[must_use]
    pub fn pyramid_levels(mut self, n: usize) -> Self {
        self.pyramid_levels = Some(n);
        self
    }

    /// Set the full LK window size.
    #[must_use]
    pub fn win_size(mut self, size: usize) -> Self {
        self.win_size = Some(size);
        self
    }

    /// Set the maximum LK iterations per level.
    #[must_use]
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Set the LK convergence epsilon.
    #[must_use]
    pub fn epsilon(mut self, eps: f32) -> Self {
        self.epsilon = Some(eps);
        self
    }

    /// Set the LK minimum eigenvalue threshold.
    #[must_use]
    pub fn min_eigen_threshold(mut self, t: f32) -> Self {
        self.min_eigen_threshold = Some(t);
        self
    }

    /// Set the surviving-point threshold for tracking.
    #[must_use]
    pub fn point_threshold(mut self, n: usize) -> Self {
        self.point_threshold = Some(n);
        self
    }

    /// Set the incremental-homography inlier threshold.
    #[must_use]
    pub fn good_match_threshold_tracking(mut self, n: usize) -> Self {
        self.good_match_threshold_tracking = Some(n);
        self
    }

    /// Set the point-density lost threshold.
    #[must_use]
    pub fn density_threshold(mut self, d: f64) -> Self {
        self.density_threshold = Some(d);
        self
    }

    /// Set the corner-displacement prune threshold.
    #[must_use]
    pub fn prune_threshold(mut self, d: f64) -> Self {
        self.prune_threshold = Some(d);
        self
    }

    /// Set the maximum tracked-quad interior angle in degrees.
    #[must_use]
    pub fn max_quad_angle_allowed(mut self, deg: f64) -> Self {
        self.max_quad_angle_allowed = Some(deg);
        self
    }

    /// Set the quad persistence / damping window in frames.
    #[must_use]
    pub fn max_persist_optical_frames(mut self, n: u32) -> Self {
        self.max_persist_optical_frames = Some(n);
        self
    }

    /// Build the configuration, using defaults for unset fields.
    #[must_use]
    pub fn build(self) -> TrackerConfig {
        let d = TrackerConfig::default();
        TrackerConfig {
            max_corners: self.max_corners.unwrap_or(d.max_corners),
            max_per_level: self.max_per_level.unwrap_or(d.max_per_level),
            num_train_levels: self.num_train_levels.unwrap_or(d.num_train_levels),
            max_pattern_size: self.max_pattern_size.unwrap_or(d.max_pattern_size),
            scale_inc: self.scale_inc.unwrap_or(d.scale_inc),
            grid_distance: self.grid_distance.unwrap_or(d.grid_distance),
            blur_size: self.blur_size.unwrap_or(d.blur_size),
            lap_threshold: self.lap_threshold.unwrap_or(d.lap_threshold),
            eigen_threshold: self.eigen_threshold.unwrap_or(d.eigen_threshold),
            match_threshold: self.match_threshold.unwrap_or(d.match_threshold),
            good_match_threshold: self.good_match_threshold.unwrap_or(d.good_match_threshold),
            pyramid_levels: self.pyramid_levels.unwrap_or(d.pyramid_levels),
            win_size: self.win_size.unwrap_or(d.win_size),
            max_iterations: self.max_iterations.unwrap_or(d.max_iterations),
            epsilon: self.epsilon.unwrap_or(d.epsilon),
            min_eigen_threshold: self.min_eigen_threshold.unwrap_or(d.min_eigen_threshold),
            point_threshold: self.point_threshold.unwrap_or(d.point_threshold),
            good_match_threshold_tracking: self
                .good_match_threshold_tracking
                .unwrap_or(d.good_match_threshold_tracking),
            density_threshold: self.density_threshold.unwrap_or(d.density_threshold),
            prune_threshold: self.prune_threshold.unwrap_or(d.prune_threshold),
            max_quad_angle_allowed: self
                .max_quad_angle_allowed
                .unwrap_or(d.max_quad_angle_allowed),
            max_persist_optical_frames: self
                .max_persist_optical_frames
                .unwrap_or(d.max_persist_optical_frames),
        }
    }
}

/// Normalized offset/scale applied to the reference rectangle before corner
/// projection. The z components are carried for the overlay consumer and are
/// not read by the core.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VariantTransform {
    /// Normalized offset (x, y, z).
    pub offset: [f64; 3],
    /// Normalized scale (x, y, z).
    pub scale: [f64; 3],
}

impl Default for VariantTransform {
    fn default() -> Self {
        Self {
            offset: [0.0, 0.0, 0.0],
            scale: [1.0, 1.0, 1.0],
        }
    }
}
