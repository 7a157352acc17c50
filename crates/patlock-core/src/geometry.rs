//! Geometry utilities: polygon tests, quad projection and shape validation.

use crate::config::VariantTransform;
use crate::homography::Homography;

/// An ordered quadrilateral (TL, TR, BR, BL) in image pixels.
pub type Quad = [[f64; 2]; 4];

/// Absolute area of a simple polygon (shoelace formula).
#[must_use]
pub fn polygon_area(points: &[[f64; 2]]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        acc += points[i][0] * points[j][1] - points[j][0] * points[i][1];
    }
    acc.abs() * 0.5
}

/// Closed-interior containment test for a convex quad.
///
/// A point on an edge or vertex counts as inside. The winding of `quad` may
/// be either direction.
#[must_use]
pub fn point_in_quad(p: [f64; 2], quad: &Quad) -> bool {
    let mut pos = 0;
    let mut neg = 0;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        if cross > 1e-9 {
            pos += 1;
        } else if cross < -1e-9 {
            neg += 1;
        }
    }
    pos == 0 || neg == 0
}

/// Interior angle at vertex `i` of a quad, in degrees.
fn interior_angle_deg(quad: &Quad, i: usize) -> f64 {
    let prev = quad[(i + 3) % 4];
    let curr = quad[i];
    let next = quad[(i + 1) % 4];
    let ux = prev[0] - curr[0];
    let uy = prev[1] - curr[1];
    let vx = next[0] - curr[0];
    let vy = next[1] - curr[1];
    let nu = (ux * ux + uy * uy).sqrt();
    let nv = (vx * vx + vy * vy).sqrt();
    if nu < 1e-12 || nv < 1e-12 {
        return 0.0;
    }
    let cos = ((ux * vx + uy * vy) / (nu * nv)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Shape validity of an emitted quad: interior angles sum to 360 degrees
/// within a 5 degree tolerance, and every angle lies strictly inside
/// (15, 165) degrees.
#[must_use]
pub fn quad_is_valid(quad: &Quad) -> bool {
    let mut sum = 0.0;
    for i in 0..4 {
        let a = interior_angle_deg(quad, i);
        if a <= 15.0 || a >= 165.0 {
            return false;
        }
        sum += a;
    }
    (sum - 360.0).abs() <= 5.0
}

/// Maximum interior angle of a quad, in degrees.
#[must_use]
pub fn max_interior_angle_deg(quad: &Quad) -> f64 {
    (0..4)
        .map(|i| interior_angle_deg(quad, i))
        .fold(0.0, f64::max)
}

/// Average per-corner displacement between two quads, in pixels.
#[must_use]
pub fn average_corner_distance(a: &Quad, b: &Quad) -> f64 {
    let mut acc = 0.0;
    for i in 0..4 {
        let dx = a[i][0] - b[i][0];
        let dy = a[i][1] - b[i][1];
        acc += (dx * dx + dy * dy).sqrt();
    }
    acc * 0.25
}

/// Project the reference rectangle `(0,0)..(w,h)` through `h`, after the
/// normalized offset/scale of the variant transform.
///
/// Returns `None` when the homogeneous denominator degenerates at any
/// corner; callers treat that as divergence.
#[must_use]
pub fn transform_corners(
    h: &Homography,
    w: f64,
    height: f64,
    variant: &VariantTransform,
) -> Option<Quad> {
    let (sx, sy) = (variant.scale[0], variant.scale[1]);
    let (ox, oy) = (variant.offset[0], variant.offset[1]);

    let scaled_w = w * sx;
    let scaled_h = height * sy;
    let offset_x = ox * w + (1.0 - sx) * w * 0.5;
    let offset_y = oy * height - (1.0 - sy) * height * 0.5;

    let rect = [
        [offset_x, offset_y],
        [offset_x + scaled_w, offset_y],
        [offset_x + scaled_w, offset_y + scaled_h],
        [offset_x, offset_y + scaled_h],
    ];

    if !h.is_sane(&rect) {
        return None;
    }

    let mut quad = [[0.0; 2]; 4];
    for (corner, src) in quad.iter_mut().zip(rect.iter()) {
        *corner = h.project(*src);
        if !corner[0].is_finite() || !corner[1].is_finite() {
            return None;
        }
    }
    Some(quad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use proptest::prelude::*;

    const UNIT_SQUARE: Quad = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];

    #[test]
    fn test_polygon_area_square() {
        assert!((polygon_area(&UNIT_SQUARE) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_area_winding_invariant() {
        let reversed: Vec<[f64; 2]> = UNIT_SQUARE.iter().rev().copied().collect();
        assert!((polygon_area(&reversed) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_in_quad_interior_and_vertices() {
        assert!(point_in_quad([50.0, 50.0], &UNIT_SQUARE));
        for &v in &UNIT_SQUARE {
            assert!(point_in_quad(v, &UNIT_SQUARE), "vertex {:?} must be inside", v);
        }
        assert!(!point_in_quad([150.0, 50.0], &UNIT_SQUARE));
        assert!(!point_in_quad([-1.0, -1.0], &UNIT_SQUARE));
    }

    #[test]
    fn test_quad_is_valid_square() {
        assert!(quad_is_valid(&UNIT_SQUARE));
    }

    #[test]
    fn test_quad_is_valid_rejects_sliver() {
        let sliver = [[0.0, 0.0], [100.0, 1.0], [200.0, 2.0], [0.0, 3.0]];
        assert!(!quad_is_valid(&sliver));
    }

    #[test]
    fn test_max_interior_angle() {
        assert!((max_interior_angle_deg(&UNIT_SQUARE) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_corner_distance_translation() {
        let mut moved = UNIT_SQUARE;
        for c in &mut moved {
            c[0] += 3.0;
            c[1] += 4.0;
        }
        assert!((average_corner_distance(&UNIT_SQUARE, &moved) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_transform_corners_identity() {
        let h = Homography::identity();
        let quad = transform_corners(&h, 100.0, 80.0, &VariantTransform::default()).unwrap();
        assert_eq!(quad[0], [0.0, 0.0]);
        assert_eq!(quad[1], [100.0, 0.0]);
        assert_eq!(quad[2], [100.0, 80.0]);
        assert_eq!(quad[3], [0.0, 80.0]);
    }

    #[test]
    fn test_transform_corners_scale_is_centered() {
        let h = Homography::identity();
        let variant = VariantTransform {
            offset: [0.0, 0.0, 0.0],
            scale: [0.5, 1.0, 1.0],
        };
        let quad = transform_corners(&h, 100.0, 80.0, &variant).unwrap();
        // Half-width rectangle centered horizontally: x in [25, 75].
        assert!((quad[0][0] - 25.0).abs() < 1e-9);
        assert!((quad[1][0] - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_transform_corners_roundtrip_through_inverse() {
        let src = [[0.0, 0.0], [256.0, 0.0], [256.0, 256.0], [0.0, 256.0]];
        let dst = [[30.0, 40.0], [270.0, 55.0], [260.0, 300.0], [25.0, 280.0]];
        let h = Homography::from_four_points(&src, &dst).unwrap();
        let inv = h.try_inverse().unwrap();
        let quad = transform_corners(&h, 256.0, 256.0, &VariantTransform::default()).unwrap();
        for (corner, orig) in quad.iter().zip(src.iter()) {
            let back = inv.project(*corner);
            assert!((back[0] - orig[0]).abs() < 1e-4);
            assert!((back[1] - orig[1]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_transform_corners_degenerate_is_none() {
        let h = Homography::from_matrix(Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, -0.02, 0.0,
        ));
        // Denominator vanishes along y = 0 (the TL/TR corners).
        assert!(transform_corners(&h, 100.0, 100.0, &VariantTransform::default()).is_none());
    }

    proptest! {
        #[test]
        fn prop_area_invariant_under_rotation_of_list(shift in 0usize..4) {
            let rotated: Vec<[f64; 2]> = (0..4).map(|i| UNIT_SQUARE[(i + shift) % 4]).collect();
            prop_assert!((polygon_area(&rotated) - 10_000.0).abs() < 1e-9);
        }

        #[test]
        fn prop_convex_quad_contains_centroid(
            jitter in proptest::collection::vec(-10.0..10.0f64, 8)
        ) {
            let quad: Quad = [
                [0.0 + jitter[0], 0.0 + jitter[1]],
                [100.0 + jitter[2], 0.0 + jitter[3]],
                [100.0 + jitter[4], 100.0 + jitter[5]],
                [0.0 + jitter[6], 100.0 + jitter[7]],
            ];
            let cx = quad.iter().map(|p| p[0]).sum::<f64>() / 4.0;
            let cy = quad.iter().map(|p| p[1]).sum::<f64>() / 4.0;
            prop_assert!(point_in_quad([cx, cy], &quad));
        }
    }
}
