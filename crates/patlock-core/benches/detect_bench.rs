use divan::bench;
use patlock_core::test_utils::{gray_to_rgba, mosaic_pattern, noise_frame};
use patlock_core::{Pipeline, TrackerConfig, VariantTransform};

fn main() {
    divan::main();
}

#[bench]
fn bench_train_pattern(bencher: divan::Bencher) {
    let pattern = mosaic_pattern(512, 384, 7);
    let rgba = gray_to_rgba(&pattern);

    bencher.bench_local(move || {
        Pipeline::new(&rgba, 512, 384, TrackerConfig::default(), VariantTransform::default())
    });
}

#[bench]
fn bench_detect_sweep_640x480(bencher: divan::Bencher) {
    let pattern = mosaic_pattern(256, 256, 7);
    let pattern_rgba = gray_to_rgba(&pattern);
    let mut pipeline = Pipeline::new(
        &pattern_rgba,
        256,
        256,
        TrackerConfig::default(),
        VariantTransform::default(),
    )
    .unwrap();

    // A pattern-free frame keeps the pipeline in the detection path on
    // every iteration: corners, descriptors, matching, rejected RANSAC.
    let frame = gray_to_rgba(&noise_frame(640, 480, 42));

    bencher.bench_local(move || pipeline.process_frame(&frame, 640, 480));
}
