//! Planar homography estimation.
//!
//! A [`Homography`] maps pattern-plane coordinates (base-level pixels) to
//! frame coordinates. The 4-point kernel solves the DLT system exactly; the
//! over-determined refit takes the null space of the stacked constraint
//! matrix. [`HomographyEstimator`] wraps both in a RANSAC loop with an
//! inlier mask and a final refit.

use nalgebra::{DMatrix, Matrix3, SMatrix, SVector};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Denominator clamp for the homogeneous divide.
const W_EPS: f64 = 1e-12;

/// A 3x3 projective transform between two planes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub m: Matrix3<f64>,
}

impl Homography {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self { m: Matrix3::identity() }
    }

    #[must_use]
    pub fn from_matrix(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    /// Exact 4-point DLT. Returns `None` for degenerate configurations.
    #[must_use]
    pub fn from_four_points(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for i in 0..4 {
            let (x, y) = (src[i][0], src[i][1]);
            let (xp, yp) = (dst[i][0], dst[i][1]);
            let r0 = i * 2;
            let r1 = r0 + 1;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -x * xp;
            a[(r0, 7)] = -y * xp;
            b[r0] = xp;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -x * yp;
            a[(r1, 7)] = -y * yp;
            b[r1] = yp;
        }

        let h = a.lu().solve(&b)?;
        if h.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self {
            m: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        })
    }

    /// Least-squares DLT over N >= 4 correspondences via the null space of
    /// the stacked constraint matrix.
    #[must_use]
    pub fn from_pairs(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Self> {
        let n = src.len();
        if n < 4 || n != dst.len() {
            return None;
        }
        if n == 4 {
            let s: &[[f64; 2]; 4] = src.try_into().ok()?;
            let d: &[[f64; 2]; 4] = dst.try_into().ok()?;
            return Self::from_four_points(s, d);
        }

        let mut a = DMatrix::<f64>::zeros(2 * n, 9);
        for i in 0..n {
            let (x, y) = (src[i][0], src[i][1]);
            let (xp, yp) = (dst[i][0], dst[i][1]);
            let r0 = 2 * i;
            let r1 = r0 + 1;
            a[(r0, 0)] = -x;
            a[(r0, 1)] = -y;
            a[(r0, 2)] = -1.0;
            a[(r0, 6)] = x * xp;
            a[(r0, 7)] = y * xp;
            a[(r0, 8)] = xp;
            a[(r1, 3)] = -x;
            a[(r1, 4)] = -y;
            a[(r1, 5)] = -1.0;
            a[(r1, 6)] = x * yp;
            a[(r1, 7)] = y * yp;
            a[(r1, 8)] = yp;
        }

        let svd = a.svd(false, true);
        let v_t = svd.v_t?;
        let h = v_t.row(v_t.nrows() - 1);
        if h.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let mut m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
        if m[(2, 2)].abs() > W_EPS {
            m /= m[(2, 2)];
        }
        Some(Self { m })
    }

    /// Apply the transform to a point, dividing by the homogeneous
    /// component. The denominator is clamped away from zero; near-singular
    /// transforms are the caller's divergence signal via [`is_sane`].
    ///
    /// [`is_sane`]: Homography::is_sane
    #[inline]
    #[must_use]
    pub fn project(&self, p: [f64; 2]) -> [f64; 2] {
        let m = &self.m;
        let mut w = m[(2, 0)] * p[0] + m[(2, 1)] * p[1] + m[(2, 2)];
        if w.abs() < W_EPS {
            w = if w < 0.0 { -W_EPS } else { W_EPS };
        }
        [
            (m[(0, 0)] * p[0] + m[(0, 1)] * p[1] + m[(0, 2)]) / w,
            (m[(1, 0)] * p[0] + m[(1, 1)] * p[1] + m[(1, 2)]) / w,
        ]
    }

    /// True when the homogeneous denominator stays well away from zero for
    /// the given points.
    #[must_use]
    pub fn is_sane(&self, points: &[[f64; 2]]) -> bool {
        let m = &self.m;
        points.iter().all(|p| {
            let w = m[(2, 0)] * p[0] + m[(2, 1)] * p[1] + m[(2, 2)];
            w.abs() > 1e-8 && w.is_finite()
        })
    }

    #[must_use]
    pub fn try_inverse(&self) -> Option<Self> {
        self.m.try_inverse().map(|m| Self { m })
    }

    /// Compose two transforms: `(a.then(b)).project(p) == b.project(a.project(p))`
    /// up to the homogeneous scale.
    #[must_use]
    pub fn then(&self, outer: &Homography) -> Self {
        Self { m: outer.m * self.m }
    }
}

/// RANSAC parameters for homography fitting.
#[derive(Clone, Copy, Debug)]
pub struct RansacParams {
    /// Maximum reprojection distance for an inlier, in pixels.
    pub reproj_threshold: f64,
    /// Assumed initial outlier ratio.
    pub outlier_ratio: f64,
    /// Required confidence of finding an all-inlier sample.
    pub confidence: f64,
    /// Hard iteration cap.
    pub max_iterations: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            reproj_threshold: 3.0,
            outlier_ratio: 0.5,
            confidence: 0.99,
            max_iterations: 1000,
        }
    }
}

/// RANSAC homography estimator with a reusable seeded sampling stream.
pub struct HomographyEstimator {
    params: RansacParams,
    rng: ChaCha8Rng,
}

impl HomographyEstimator {
    #[must_use]
    pub fn new(params: RansacParams) -> Self {
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(0x7060_3433),
        }
    }

    /// Fit a homography from `src` to `dst` with outlier rejection.
    ///
    /// `mask` is resized to the input length; `mask[i]` marks inliers of the
    /// returned model. On success the model is refit on all inliers and the
    /// inlier count is returned. On failure the identity transform and a
    /// zero count are returned, with the mask cleared.
    pub fn estimate(
        &mut self,
        src: &[[f64; 2]],
        dst: &[[f64; 2]],
        mask: &mut Vec<bool>,
    ) -> (Homography, usize) {
        let n = src.len();
        mask.clear();
        mask.resize(n, false);
        if n < 4 || n != dst.len() {
            return (Homography::identity(), 0);
        }

        let t2 = self.params.reproj_threshold * self.params.reproj_threshold;
        let mut best_count = 0usize;
        let mut best_h: Option<Homography> = None;
        let mut niters = update_num_iters(
            self.params.confidence,
            self.params.outlier_ratio,
            self.params.max_iterations,
        );

        let mut iter = 0;
        while iter < niters {
            iter += 1;

            let Some(idx) = self.sample_four(n) else { break };
            let s = [src[idx[0]], src[idx[1]], src[idx[2]], src[idx[3]]];
            let d = [dst[idx[0]], dst[idx[1]], dst[idx[2]], dst[idx[3]]];
            if sample_degenerate(&s) || sample_degenerate(&d) {
                continue;
            }

            let Some(h) = Homography::from_four_points(&s, &d) else { continue };

            let count = count_inliers(&h, src, dst, t2);
            if count > best_count {
                best_count = count;
                best_h = Some(h);
                let outlier_ratio = 1.0 - count as f64 / n as f64;
                niters = update_num_iters(
                    self.params.confidence,
                    outlier_ratio,
                    self.params.max_iterations,
                )
                .max(iter);
            }
        }

        let Some(h) = best_h else {
            return (Homography::identity(), 0);
        };
        if best_count < 4 {
            return (Homography::identity(), 0);
        }

        // Mark inliers and refit on all of them.
        for i in 0..n {
            let p = h.project(src[i]);
            let dx = p[0] - dst[i][0];
            let dy = p[1] - dst[i][1];
            mask[i] = dx * dx + dy * dy <= t2;
        }

        let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| mask[i]).map(|i| src[i]).collect();
        let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| mask[i]).map(|i| dst[i]).collect();
        let refined = Homography::from_pairs(&inlier_src, &inlier_dst).unwrap_or(h);

        (refined, best_count)
    }

    fn sample_four(&mut self, n: usize) -> Option<[usize; 4]> {
        if n < 4 {
            return None;
        }
        let mut idx = [0usize; 4];
        for i in 0..4 {
            loop {
                let candidate = self.rng.gen_range(0..n);
                if !idx[..i].contains(&candidate) {
                    idx[i] = candidate;
                    break;
                }
            }
        }
        Some(idx)
    }
}

fn count_inliers(h: &Homography, src: &[[f64; 2]], dst: &[[f64; 2]], t2: f64) -> usize {
    let mut count = 0;
    for i in 0..src.len() {
        let p = h.project(src[i]);
        let dx = p[0] - dst[i][0];
        let dy = p[1] - dst[i][1];
        if dx * dx + dy * dy <= t2 {
            count += 1;
        }
    }
    count
}

/// True if any three of the four sample points are (near-)collinear.
fn sample_degenerate(pts: &[[f64; 2]; 4]) -> bool {
    const AREA_EPS: f64 = 1e-6;
    for i in 0..2 {
        for j in (i + 1)..3 {
            for k in (j + 1)..4 {
                let ux = pts[j][0] - pts[i][0];
                let uy = pts[j][1] - pts[i][1];
                let vx = pts[k][0] - pts[i][0];
                let vy = pts[k][1] - pts[i][1];
                if (ux * vy - uy * vx).abs() < AREA_EPS {
                    return true;
                }
            }
        }
    }
    false
}

fn update_num_iters(confidence: f64, outlier_ratio: f64, max_iters: usize) -> usize {
    let w = (1.0 - outlier_ratio).clamp(0.0, 1.0);
    let denom = (1.0 - w.powi(4)).max(f64::MIN_POSITIVE).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let num = (1.0 - confidence).ln();
    ((num / denom).ceil() as usize).clamp(1, max_iters)
}
