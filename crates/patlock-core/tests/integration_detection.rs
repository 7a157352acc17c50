#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use patlock_core::test_utils::{
    corner_error, gray_to_rgba, mosaic_pattern, noise_frame, quad_centroid, render_scene,
    PatternPlacement,
};
use patlock_core::{Mode, Pipeline, TrackerConfig, VariantTransform};

const FRAME_W: usize = 640;
const FRAME_H: usize = 480;
const PATTERN: usize = 256;

fn trained_pipeline() -> Pipeline {
    let pattern = mosaic_pattern(PATTERN, PATTERN, 7);
    let rgba = gray_to_rgba(&pattern);
    Pipeline::new(
        &rgba,
        PATTERN,
        PATTERN,
        TrackerConfig::default(),
        VariantTransform::default(),
    )
    .unwrap()
}

fn frame_rgba(placement: &PatternPlacement) -> Vec<u8> {
    let pattern = mosaic_pattern(PATTERN, PATTERN, 7);
    let frame = render_scene(&pattern, placement, FRAME_W, FRAME_H, 0);
    gray_to_rgba(&frame)
}

#[test]
fn test_identity_pattern_detected() {
    let mut pipeline = trained_pipeline();
    let placement = PatternPlacement::centered(FRAME_W, FRAME_H);
    let rgba = frame_rgba(&placement);

    let out = pipeline.process_frame(&rgba, FRAME_W, FRAME_H).unwrap();

    let quad = out.quad.expect("pattern centered in the frame must be found");
    assert_eq!(out.mode, Mode::Tracking);
    let gt = placement.ground_truth_quad(PATTERN, PATTERN);
    let err = corner_error(&quad, &gt);
    assert!(err < 2.0, "corner error {} px over budget (quad {:?})", err, quad);
    assert!(out.stats.inliers >= 20);
}

#[test]
fn test_pure_translation_shifts_centroid() {
    let mut pipeline = trained_pipeline();
    let base = PatternPlacement::centered(FRAME_W, FRAME_H);
    let moved = base.translated(40.0, 20.0);

    let out = pipeline
        .process_frame(&frame_rgba(&moved), FRAME_W, FRAME_H)
        .unwrap();

    let quad = out.quad.expect("translated pattern must be found");
    let centroid = quad_centroid(&quad);
    let gt_centroid = quad_centroid(&moved.ground_truth_quad(PATTERN, PATTERN));
    assert!(
        (centroid[0] - gt_centroid[0]).abs() <= 1.0,
        "centroid x {} vs {}",
        centroid[0],
        gt_centroid[0]
    );
    assert!(
        (centroid[1] - gt_centroid[1]).abs() <= 1.0,
        "centroid y {} vs {}",
        centroid[1],
        gt_centroid[1]
    );
}

#[test]
fn test_similarity_with_rotation_and_scale() {
    let mut pipeline = trained_pipeline();
    let placement = PatternPlacement {
        center_x: FRAME_W as f64 / 2.0,
        center_y: FRAME_H as f64 / 2.0,
        scale: 0.8,
        rotation_rad: 30.0_f64.to_radians(),
    };

    let out = pipeline
        .process_frame(&frame_rgba(&placement), FRAME_W, FRAME_H)
        .unwrap();

    let quad = out.quad.expect("rotated and scaled pattern must be found");
    let gt = placement.ground_truth_quad(PATTERN, PATTERN);

    // Diagonal lengths within 3% of the ground truth.
    for (a, b) in [(0usize, 2usize), (1, 3)] {
        let d = ((quad[a][0] - quad[b][0]).powi(2) + (quad[a][1] - quad[b][1]).powi(2)).sqrt();
        let gt_d = ((gt[a][0] - gt[b][0]).powi(2) + (gt[a][1] - gt[b][1]).powi(2)).sqrt();
        let rel = (d - gt_d).abs() / gt_d;
        assert!(rel < 0.03, "diagonal {}-{} off by {:.1}%", a, b, rel * 100.0);
    }
}

#[test]
fn test_no_pattern_in_noise() {
    let mut pipeline = trained_pipeline();

    for i in 0..30 {
        let frame = noise_frame(FRAME_W, FRAME_H, 100 + i);
        let out = pipeline.process_frame(&gray_to_rgba(&frame), FRAME_W, FRAME_H).unwrap();
        assert_eq!(out.mode, Mode::Detecting, "noise frame {} must not detect", i);
        assert!(out.quad.is_none(), "no quad may be emitted without a prior detection");
    }
}

#[test]
fn test_overlay_hides_after_persistence_window() {
    let mut pipeline = trained_pipeline();
    let placement = PatternPlacement::centered(FRAME_W, FRAME_H);

    // Lock onto the pattern first.
    let out = pipeline
        .process_frame(&frame_rgba(&placement), FRAME_W, FRAME_H)
        .unwrap();
    assert!(out.quad.is_some());
    assert_eq!(out.mode, Mode::Tracking);

    // Feed noise: the lost tick and the persistence window keep the stale
    // quad alive, then the overlay hides.
    let mut stale_frames = 0;
    let mut hidden = false;
    for i in 0..12 {
        let frame = noise_frame(FRAME_W, FRAME_H, 500 + i);
        let out = pipeline.process_frame(&gray_to_rgba(&frame), FRAME_W, FRAME_H).unwrap();
        if out.quad.is_some() {
            assert!(!hidden, "stale quad may not reappear after hiding");
            stale_frames += 1;
        } else {
            hidden = true;
        }
    }
    assert!(hidden, "overlay must hide once persistence expires");
    // One lost-tick emission plus six persistence frames.
    assert_eq!(stale_frames, 7);
}

#[test]
fn test_pipeline_survives_frame_size_change() {
    let mut pipeline = trained_pipeline();
    let small = noise_frame(320, 240, 1);
    let large = noise_frame(FRAME_W, FRAME_H, 2);

    assert!(pipeline.process_frame(&gray_to_rgba(&small), 320, 240).is_ok());
    assert!(pipeline.process_frame(&gray_to_rgba(&large), FRAME_W, FRAME_H).is_ok());
    assert!(pipeline.process_frame(&gray_to_rgba(&small), 320, 240).is_ok());
}
