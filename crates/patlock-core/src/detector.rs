//! Corner detection: a Laplacian band response filtered by the minimum
//! eigenvalue of the local Hessian, with 3x3 non-maximum suppression.

use crate::image::ImageView;

/// A salient image location in the plane of its pyramid level.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    /// Column, in level pixels.
    pub x: f32,
    /// Row, in level pixels.
    pub y: f32,
    /// Detector response.
    pub score: f32,
    /// Pyramid level index the keypoint was found at.
    pub level: usize,
    /// Intensity-centroid orientation, radians.
    pub angle: f32,
}

/// Second-derivative sampling offset of the response kernel.
const DERIV_OFF: usize = 2;
/// Minimum usable detection border given the response kernel and NMS.
const MIN_BORDER: usize = 3;

/// Corner detector over a bordered grid.
///
/// Owns its response plane so repeated detection on same-sized images does
/// not allocate.
pub struct CornerDetector {
    lap_threshold: i32,
    eigen_threshold: i32,
    response: Vec<i32>,
    response_w: usize,
    response_h: usize,
}

impl CornerDetector {
    #[must_use]
    pub fn new(lap_threshold: i32, eigen_threshold: i32) -> Self {
        Self {
            lap_threshold,
            eigen_threshold,
            response: Vec::new(),
            response_w: 0,
            response_h: 0,
        }
    }

    /// Detect up to `max_points` corners, excluding a `border`-pixel frame.
    ///
    /// Results are appended to `out` in non-increasing score order (ties
    /// broken by detection order) after truncation to `max_points`.
    pub fn detect(
        &mut self,
        img: &ImageView<'_>,
        border: usize,
        max_points: usize,
        level: usize,
        out: &mut Vec<Keypoint>,
    ) {
        out.clear();
        let w = img.width;
        let h = img.height;
        let b = border.max(MIN_BORDER);
        if w <= 2 * b || h <= 2 * b || max_points == 0 {
            return;
        }

        self.fill_response(img, b);

        // Non-maximum suppression over the response magnitude, then the
        // eigenvalue gate.
        for y in (b + 1)..(h - b - 1) {
            let row = y * w;
            for x in (b + 1)..(w - b - 1) {
                let r = self.response[row + x];
                if r.abs() < self.lap_threshold {
                    continue;
                }
                if !self.is_local_max(x, y, w) {
                    continue;
                }
                let min_eig = hessian_min_eigen(img, x, y);
                if min_eig < self.eigen_threshold as f32 {
                    continue;
                }
                out.push(Keypoint {
                    x: x as f32,
                    y: y as f32,
                    score: min_eig,
                    level,
                    angle: 0.0,
                });
            }
        }

        // Stable sort keeps detection order on equal scores, making the
        // truncation deterministic.
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(max_points);
    }

    fn fill_response(&mut self, img: &ImageView<'_>, border: usize) {
        let w = img.width;
        let h = img.height;
        if self.response_w != w || self.response_h != h {
            self.response.clear();
            self.response.resize(w * h, 0);
            self.response_w = w;
            self.response_h = h;
        } else {
            self.response.iter_mut().for_each(|v| *v = 0);
        }

        let d = DERIV_OFF;
        for y in border..(h - border) {
            let row = img.row(y);
            let above = img.row(y - d);
            let below = img.row(y + d);
            let dst = &mut self.response[y * w..(y + 1) * w];
            for x in border..(w - border) {
                let c = row[x] as i32;
                let ixx = row[x - d] as i32 + row[x + d] as i32 - 2 * c;
                let iyy = above[x] as i32 + below[x] as i32 - 2 * c;
                dst[x] = ixx + iyy;
            }
        }
    }

    #[inline]
    fn is_local_max(&self, x: usize, y: usize, w: usize) -> bool {
        let v = self.response[y * w + x].abs();
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let idx = ((y as isize + dy) as usize) * w + (x as isize + dx) as usize;
                let n = self.response[idx].abs();
                // Strictly greater than preceding neighbors, greater-or-equal
                // over the rest, so plateaus yield exactly one maximum.
                if n > v || (n == v && (dy < 0 || (dy == 0 && dx < 0))) {
                    return false;
                }
            }
        }
        true
    }
}

/// Minimum eigenvalue of the local Hessian at (x, y).
#[inline]
fn hessian_min_eigen(img: &ImageView<'_>, x: usize, y: usize) -> f32 {
    let d = DERIV_OFF;
    let c = img.pixel(x, y) as f32;
    let ixx = img.pixel(x - d, y) as f32 + img.pixel(x + d, y) as f32 - 2.0 * c;
    let iyy = img.pixel(x, y - d) as f32 + img.pixel(x, y + d) as f32 - 2.0 * c;
    let ixy = (img.pixel(x + 1, y + 1) as f32 + img.pixel(x - 1, y - 1) as f32
        - img.pixel(x + 1, y - 1) as f32
        - img.pixel(x - 1, y + 1) as f32)
        * 0.25;
    let tr = ixx + iyy;
    let disc = ((ixx - iyy) * (ixx - iyy) + 4.0 * ixy * ixy).max(0.0).sqrt();
    (tr.abs() - disc) * 0.5
}

/// Border for a pattern pyramid level: full-size levels use the nominal
/// 17-pixel frame, small levels shrink it to a tenth of the short side.
#[must_use]
pub fn level_border(cols: usize, rows: usize) -> usize {
    17.min(cols.min(rows) / 10).max(MIN_BORDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{gaussian_blur, GrayImage, ImageView};

    fn blob_image(w: usize, h: usize, spots: &[(usize, usize)]) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for &(cx, cy) in spots {
            for dy in 0..6 {
                for dx in 0..6 {
                    img.data[(cy + dy) * w + (cx + dx)] = 255;
                }
            }
        }
        let mut blurred = GrayImage::default();
        gaussian_blur(&img.as_view(), &mut blurred, 5);
        blurred
    }

    #[test]
    fn test_detects_isolated_blobs() {
        let img = blob_image(128, 128, &[(40, 40), (80, 70)]);
        let mut det = CornerDetector::new(10, 5);
        let mut kps = Vec::new();
        det.detect(&img.as_view(), 17, 300, 0, &mut kps);
        assert!(!kps.is_empty(), "expected corners near high-contrast blobs");
        for kp in &kps {
            let near_a = (kp.x - 43.0).abs() < 8.0 && (kp.y - 43.0).abs() < 8.0;
            let near_b = (kp.x - 83.0).abs() < 8.0 && (kp.y - 73.0).abs() < 8.0;
            assert!(near_a || near_b, "stray keypoint at ({}, {})", kp.x, kp.y);
        }
    }

    #[test]
    fn test_border_is_respected() {
        let mut img = GrayImage::new(64, 64);
        // Paint strong corners everywhere, including the border band.
        for y in (0..64).step_by(4) {
            for x in (0..64).step_by(4) {
                img.data[y * 64 + x] = 255;
            }
        }
        let mut det = CornerDetector::new(5, 1);
        let mut kps = Vec::new();
        let border = 17;
        det.detect(&img.as_view(), border, 1000, 0, &mut kps);
        for kp in &kps {
            let (x, y) = (kp.x as usize, kp.y as usize);
            assert!(x >= border && x < 64 - border, "x {} violates border", x);
            assert!(y >= border && y < 64 - border, "y {} violates border", y);
        }
    }

    #[test]
    fn test_sorted_and_truncated() {
        let img = blob_image(
            256,
            256,
            &[(40, 40), (90, 40), (140, 40), (40, 90), (90, 90), (140, 90)],
        );
        let mut det = CornerDetector::new(5, 1);
        let mut kps = Vec::new();
        det.detect(&img.as_view(), 17, 4, 0, &mut kps);
        assert!(kps.len() <= 4);
        for pair in kps.windows(2) {
            assert!(pair[0].score >= pair[1].score, "scores not non-increasing");
        }
    }

    #[test]
    fn test_uniform_image_yields_nothing() {
        let img = GrayImage::new(64, 64);
        let mut det = CornerDetector::new(30, 25);
        let mut kps = Vec::new();
        det.detect(&img.as_view(), 17, 300, 0, &mut kps);
        assert!(kps.is_empty());
    }

    #[test]
    fn test_tiny_image_yields_nothing() {
        let img = GrayImage::new(8, 8);
        let mut det = CornerDetector::new(30, 25);
        let mut kps = Vec::new();
        det.detect(&img.as_view(), 17, 300, 0, &mut kps);
        assert!(kps.is_empty());
    }

    #[test]
    fn test_level_border_shrinks_on_small_levels() {
        assert_eq!(level_border(512, 384), 17);
        assert_eq!(level_border(90, 120), 9);
        assert_eq!(level_border(20, 20), MIN_BORDER);
    }
}
