//! Pyramidal Lucas-Kanade tracking of detection inliers, with incremental
//! homography composition and geometric sanity checks.
//!
//! The tracker owns two image pyramids and two point buffers that are
//! swapped every tick; nothing on the per-frame path allocates once the
//! buffers reach frame size.

use crate::config::{TrackerConfig, VariantTransform};
use crate::geometry::{
    average_corner_distance, max_interior_angle_deg, quad_is_valid, transform_corners, Quad,
};
use crate::homography::{Homography, HomographyEstimator, RansacParams};
use crate::image::{pyrdown, GrayImage, ImageView};
use tracing::debug;

/// Result of one tracked frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackOutcome {
    /// The pattern is still locked; the projected quad is attached.
    Tracked(Quad),
    /// Tracking diverged; the caller must re-enter detection.
    Lost,
}

/// Iteration parameters of the LK solver.
#[derive(Clone, Copy)]
struct LkParams {
    win_half: isize,
    max_iterations: usize,
    epsilon: f32,
    min_eigen_threshold: f32,
}

/// Lucas-Kanade state across frames.
pub struct FlowTracker {
    lk: LkParams,
    point_threshold: usize,
    good_match_threshold: usize,
    density_threshold: f64,
    prune_threshold: f64,
    max_quad_angle: f64,

    h_base: Homography,
    prev_pyr: Vec<GrayImage>,
    curr_pyr: Vec<GrayImage>,
    prev_xy: Vec<[f32; 2]>,
    curr_xy: Vec<[f32; 2]>,
    status: Vec<u8>,
    prev_quad: Option<Quad>,
    ref_w: f64,
    ref_h: f64,
    active: bool,

    estimator: HomographyEstimator,
    inlier_mask: Vec<bool>,
    src_pts: Vec<[f64; 2]>,
    dst_pts: Vec<[f64; 2]>,
    grad_x: Vec<f32>,
    grad_y: Vec<f32>,
}

impl FlowTracker {
    #[must_use]
    pub fn new(config: &TrackerConfig) -> Self {
        let win_half = ((config.win_size / 2) as isize).max(2);
        let win_area = ((2 * win_half + 1) * (2 * win_half + 1)) as usize;
        let levels = config.pyramid_levels.max(1);
        Self {
            lk: LkParams {
                win_half,
                max_iterations: config.max_iterations.max(1),
                epsilon: config.epsilon,
                min_eigen_threshold: config.min_eigen_threshold,
            },
            point_threshold: config.point_threshold,
            good_match_threshold: config.good_match_threshold_tracking,
            density_threshold: config.density_threshold,
            prune_threshold: config.prune_threshold,
            max_quad_angle: config.max_quad_angle_allowed,
            h_base: Homography::identity(),
            prev_pyr: (0..levels).map(|_| GrayImage::default()).collect(),
            curr_pyr: (0..levels).map(|_| GrayImage::default()).collect(),
            prev_xy: Vec::with_capacity(config.max_corners),
            curr_xy: Vec::with_capacity(config.max_corners),
            status: Vec::with_capacity(config.max_corners),
            prev_quad: None,
            ref_w: 0.0,
            ref_h: 0.0,
            active: false,
            estimator: HomographyEstimator::new(RansacParams::default()),
            inlier_mask: Vec::new(),
            src_pts: Vec::with_capacity(config.max_corners),
            dst_pts: Vec::with_capacity(config.max_corners),
            grad_x: vec![0.0; win_area],
            grad_y: vec![0.0; win_area],
        }
    }

    /// Seed the tracker from a successful detection.
    ///
    /// `points` are the detection inliers in frame coordinates; at most the
    /// point-buffer capacity is copied. `frame` becomes the previous frame
    /// of the next [`track`](FlowTracker::track) call.
    pub fn init_with_homography(
        &mut self,
        h: Homography,
        points: &[[f64; 2]],
        ref_w: f64,
        ref_h: f64,
        frame: &ImageView<'_>,
    ) {
        self.h_base = h;
        self.ref_w = ref_w;
        self.ref_h = ref_h;
        self.curr_xy.clear();
        let cap = self.curr_xy.capacity();
        for p in points.iter().take(cap) {
            self.curr_xy.push([p[0] as f32, p[1] as f32]);
        }
        build_pyramid(frame, &mut self.curr_pyr);
        self.prev_quad = None;
        self.active = true;
    }

    /// True between a successful init and the next loss.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Base homography currently mapping the pattern plane to the frame.
    #[must_use]
    pub fn base_homography(&self) -> &Homography {
        &self.h_base
    }

    /// Number of points currently carried across frames.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.curr_xy.len()
    }

    /// Reset to the idle state: no points, identity base homography.
    pub fn reset(&mut self) {
        self.active = false;
        self.h_base = Homography::identity();
        self.prev_quad = None;
        self.prev_xy.clear();
        self.curr_xy.clear();
    }

    /// Track one frame. Any divergence resets the tracker and returns
    /// [`TrackOutcome::Lost`].
    pub fn track(&mut self, frame: &ImageView<'_>, variant: &VariantTransform) -> TrackOutcome {
        std::mem::swap(&mut self.prev_xy, &mut self.curr_xy);
        std::mem::swap(&mut self.prev_pyr, &mut self.curr_pyr);

        if point_density(&self.prev_xy) < self.density_threshold {
            debug!(points = self.prev_xy.len(), "track lost: point cloud collapsed");
            self.reset();
            return TrackOutcome::Lost;
        }

        build_pyramid(frame, &mut self.curr_pyr);

        // Pyramidal LK for every surviving point.
        let n = self.prev_xy.len();
        self.curr_xy.clear();
        self.curr_xy.resize(n, [0.0, 0.0]);
        self.status.clear();
        self.status.resize(n, 0);
        for i in 0..n {
            let p = self.prev_xy[i];
            match track_point(
                &self.prev_pyr,
                &self.curr_pyr,
                p,
                &self.lk,
                &mut self.grad_x,
                &mut self.grad_y,
            ) {
                Some(q) => {
                    self.curr_xy[i] = q;
                    self.status[i] = 1;
                }
                None => {
                    self.curr_xy[i] = p;
                }
            }
        }

        // Drop points that failed, keeping prev/curr rows paired.
        let mut kept = 0;
        for i in 0..n {
            if self.status[i] == 1 {
                self.prev_xy[kept] = self.prev_xy[i];
                self.curr_xy[kept] = self.curr_xy[i];
                kept += 1;
            }
        }
        self.prev_xy.truncate(kept);
        self.curr_xy.truncate(kept);

        if kept < self.point_threshold {
            debug!(kept, "track lost: too few surviving points");
            self.reset();
            return TrackOutcome::Lost;
        }

        self.src_pts.clear();
        self.src_pts.extend(self.prev_xy.iter().map(|p| [p[0] as f64, p[1] as f64]));
        self.dst_pts.clear();
        self.dst_pts.extend(self.curr_xy.iter().map(|p| [p[0] as f64, p[1] as f64]));
        let (h_inc, good) =
            self.estimator.estimate(&self.src_pts, &self.dst_pts, &mut self.inlier_mask);
        if good < self.good_match_threshold {
            debug!(good, "track lost: incremental homography under-supported");
            self.reset();
            return TrackOutcome::Lost;
        }

        // The increment maps the previous frame onto the current one, so it
        // is applied after the base pattern-to-frame transform.
        let candidate = self.h_base.then(&h_inc);
        let Some(quad) = transform_corners(&candidate, self.ref_w, self.ref_h, variant) else {
            debug!("track lost: degenerate projection");
            self.reset();
            return TrackOutcome::Lost;
        };

        if !quad_is_valid(&quad) || max_interior_angle_deg(&quad) > self.max_quad_angle {
            debug!("track lost: implausible quad shape");
            self.reset();
            return TrackOutcome::Lost;
        }

        if let Some(prev) = self.prev_quad {
            let motion = average_corner_distance(&prev, &quad);
            if motion > self.prune_threshold {
                debug!(motion, "track lost: corner motion over prune threshold");
                self.reset();
                return TrackOutcome::Lost;
            }
        }

        self.h_base = candidate;
        self.prev_quad = Some(quad);
        TrackOutcome::Tracked(quad)
    }
}

/// Average pairwise distance of the point set; collapsed clouds cannot
/// constrain a homography.
fn point_density(pts: &[[f32; 2]]) -> f64 {
    let n = pts.len();
    if n < 2 {
        return 0.0;
    }
    let mut acc = 0.0f64;
    let mut pairs = 0u64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = (pts[i][0] - pts[j][0]) as f64;
            let dy = (pts[i][1] - pts[j][1]) as f64;
            acc += (dx * dx + dy * dy).sqrt();
            pairs += 1;
        }
    }
    acc / pairs as f64
}

/// Pyramidal LK for one point; `None` when the flow cannot be solved or the
/// result leaves the frame.
fn track_point(
    prev_pyr: &[GrayImage],
    curr_pyr: &[GrayImage],
    p: [f32; 2],
    params: &LkParams,
    grad_x: &mut [f32],
    grad_y: &mut [f32],
) -> Option<[f32; 2]> {
    let levels = prev_pyr.len();
    let mut flow = [0.0f32; 2];

    for level in (0..levels).rev() {
        let scale = (1 << level) as f32;
        let pl = [p[0] / scale, p[1] / scale];
        let d = iterate_level(&prev_pyr[level], &curr_pyr[level], pl, flow, params, grad_x, grad_y)?;
        if level > 0 {
            flow = [(flow[0] + d[0]) * 2.0, (flow[1] + d[1]) * 2.0];
        } else {
            flow = [flow[0] + d[0], flow[1] + d[1]];
        }
    }

    let q = [p[0] + flow[0], p[1] + flow[1]];
    let base = &curr_pyr[0];
    if q[0] < 0.0 || q[1] < 0.0 || q[0] >= base.width as f32 || q[1] >= base.height as f32 {
        return None;
    }
    Some(q)
}

/// Iterative LK refinement at one level. `guess` is the flow carried from
/// coarser levels, in this level's pixels. Returns the residual flow found
/// at this level.
fn iterate_level(
    prev: &GrayImage,
    curr: &GrayImage,
    pl: [f32; 2],
    guess: [f32; 2],
    params: &LkParams,
    grad_x: &mut [f32],
    grad_y: &mut [f32],
) -> Option<[f32; 2]> {
    let prev = prev.as_view();
    let curr = curr.as_view();
    let half = params.win_half;
    let side = (2 * half + 1) as usize;
    let win_area = (side * side) as f32;

    // Fixed spatial gradients and structure tensor from the previous frame's
    // window.
    let mut gxx = 0.0f32;
    let mut gyy = 0.0f32;
    let mut gxy = 0.0f32;
    let mut idx = 0usize;
    for dy in -half..=half {
        for dx in -half..=half {
            let x = pl[0] + dx as f32;
            let y = pl[1] + dy as f32;
            let ix = (prev.sample_bilinear(x + 1.0, y) - prev.sample_bilinear(x - 1.0, y)) * 0.5;
            let iy = (prev.sample_bilinear(x, y + 1.0) - prev.sample_bilinear(x, y - 1.0)) * 0.5;
            grad_x[idx] = ix;
            grad_y[idx] = iy;
            gxx += ix * ix;
            gyy += iy * iy;
            gxy += ix * iy;
            idx += 1;
        }
    }

    let trace = gxx + gyy;
    let det = gxx * gyy - gxy * gxy;
    let disc = (trace * trace - 4.0 * det).max(0.0).sqrt();
    let min_eig = (trace - disc) * 0.5 / win_area;
    if min_eig < params.min_eigen_threshold || det.abs() < f32::EPSILON {
        return None;
    }

    let mut d = [0.0f32; 2];
    for _ in 0..params.max_iterations {
        let cx = pl[0] + guess[0] + d[0];
        let cy = pl[1] + guess[1] + d[1];

        let mut bx = 0.0f32;
        let mut by = 0.0f32;
        let mut idx = 0usize;
        for dy in -half..=half {
            for dx in -half..=half {
                let dt = prev.sample_bilinear(pl[0] + dx as f32, pl[1] + dy as f32)
                    - curr.sample_bilinear(cx + dx as f32, cy + dy as f32);
                bx += grad_x[idx] * dt;
                by += grad_y[idx] * dt;
                idx += 1;
            }
        }

        let step_x = (gyy * bx - gxy * by) / det;
        let step_y = (gxx * by - gxy * bx) / det;
        d[0] += step_x;
        d[1] += step_y;

        if step_x * step_x + step_y * step_y < params.epsilon * params.epsilon {
            break;
        }
    }

    if !d[0].is_finite() || !d[1].is_finite() {
        return None;
    }
    Some(d)
}

/// Fill `pyr` from the frame: level 0 is a copy, each further level a 2x
/// half-sample of the one above.
fn build_pyramid(frame: &ImageView<'_>, pyr: &mut [GrayImage]) {
    if pyr.is_empty() {
        return;
    }
    pyr[0].resize(frame.width, frame.height);
    for y in 0..frame.height {
        pyr[0].data[y * frame.width..(y + 1) * frame.width].copy_from_slice(frame.row(y));
    }

    for i in 1..pyr.len() {
        let (head, tail) = pyr.split_at_mut(i);
        pyrdown(&head[i - 1].as_view(), &mut tail[0]);
    }
}
