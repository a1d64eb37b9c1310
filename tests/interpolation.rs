use flowtween::{
    DeviceRegistry, FlowField, FlowParams, FrameSynthesizer, InterpolationPipeline, MotionError, OpticalFlowEstimator,
    PipelineError, PipelineState, PixelBuffer,
};

const SIZE: usize = 64;
const SHIFT: usize = 2;

fn texture(x: f32, y: f32) -> f32 {
    128.0 + 60.0 * (x * 0.3).sin() * (y * 0.25).cos() + 30.0 * ((x + y) * 0.17).sin()
}

/// Smooth RGB texture moved `shift` pixels to the right.
fn textured_frame(shift: usize) -> PixelBuffer {
    let mut data = Vec::with_capacity(SIZE * SIZE * 3);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let v = texture(x as f32 - shift as f32, y as f32).round().clamp(0.0, 255.0) as u8;
            data.extend_from_slice(&[v, v, v]);
        }
    }
    PixelBuffer::new(SIZE, SIZE, 3, data).unwrap()
}

fn translation_params() -> FlowParams {
    FlowParams {
        levels: 2,
        window_size: 15,
        ..FlowParams::default()
    }
}

fn bound_host() -> DeviceRegistry {
    let mut registry = DeviceRegistry::host();
    registry.bind(0).unwrap();
    registry
}

#[test]
fn translation_is_recovered_in_both_directions() {
    let registry = bound_host();
    let estimator = OpticalFlowEstimator::new(translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));

    let flows = estimator.estimate(&registry, &a, &b).unwrap();
    let (fx, fy) = flows.forward.region_mean(16, 16, 48, 48);
    let (bx, by) = flows.backward.region_mean(16, 16, 48, 48);

    assert!((fx - SHIFT as f32).abs() < 0.5, "forward dx = {fx}");
    assert!(fy.abs() < 0.5, "forward dy = {fy}");
    assert!((bx + SHIFT as f32).abs() < 0.5, "backward dx = {bx}");
    assert!(by.abs() < 0.5, "backward dy = {by}");
    assert!((fx + bx).abs() < 0.5);
}

#[test]
fn swapping_the_pair_swaps_the_flows() {
    let registry = bound_host();
    let estimator = OpticalFlowEstimator::new(translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));

    let ab = estimator.estimate(&registry, &a, &b).unwrap();
    let ba = estimator.estimate(&registry, &b, &a).unwrap();
    assert_eq!(ab.forward, ba.backward);
    assert_eq!(ab.backward, ba.forward);
}

#[test]
fn identical_frames_interpolate_to_themselves() {
    let mut pipeline = InterpolationPipeline::new(bound_host(), translation_params()).unwrap();
    let a = textured_frame(0);
    let frames = pipeline.interpolate(&a, &a, 1).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0], a);
}

#[test]
fn midpoint_sits_halfway_along_the_motion() {
    let mut pipeline = InterpolationPipeline::new(bound_host(), translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));
    let expected = textured_frame(SHIFT / 2);

    let mid = pipeline.interpolate(&a, &b, 1).unwrap().remove(0);
    let mut total = 0.0;
    let mut count = 0;
    for y in 8..SIZE - 8 {
        for x in 8..SIZE - 8 {
            total += (mid.sample(x, y, 0) - expected.sample(x, y, 0)).abs();
            count += 1;
        }
    }
    let mean_error = total / count as f32;
    assert!(mean_error < 3.0, "mean abs error {mean_error}");
}

#[test]
fn every_frame_keeps_the_source_dimensions() {
    let mut pipeline = InterpolationPipeline::new(DeviceRegistry::host(), translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));
    for n in [1, 2, 5] {
        let frames = pipeline.interpolate(&a, &b, n).unwrap();
        assert_eq!(frames.len(), n);
        for frame in &frames {
            assert_eq!((frame.width(), frame.height(), frame.channels()), (SIZE, SIZE, 3));
        }
    }
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn zero_frames_is_an_empty_success() {
    let mut pipeline = InterpolationPipeline::new(DeviceRegistry::host(), translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));
    assert!(pipeline.interpolate(&a, &b, 0).unwrap().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn mismatched_frames_fail_the_whole_run() {
    let mut pipeline = InterpolationPipeline::new(DeviceRegistry::host(), translation_params()).unwrap();
    let a = textured_frame(0);
    let b = PixelBuffer::filled(SIZE, SIZE / 2, 3, 0).unwrap();
    let err = pipeline.interpolate(&a, &b, 3).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(MotionError::DimensionMismatch { .. })));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    // Layout differences are rejected the same way
    let gray = PixelBuffer::filled(SIZE, SIZE, 1, 0).unwrap();
    let err = pipeline.interpolate(&a, &gray, 1).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(MotionError::LayoutMismatch(_))));
}

#[test]
fn frames_are_produced_lazily_in_time_order() {
    let mut pipeline = InterpolationPipeline::new(DeviceRegistry::host(), translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));
    let mut run = pipeline.begin(&a, &b, 3).unwrap();
    assert!(run.flows().is_none());
    assert_eq!(run.steps(), &[0.25, 0.5, 0.75]);

    let first = run.next().unwrap().unwrap();
    assert!(run.flows().is_some());
    assert_eq!(first.width(), SIZE);
    assert_eq!(run.remaining(), 2);
    // Stopping here is fine; the remaining frames are simply never made
    drop(run);
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn synthesizer_matches_the_pipeline() {
    let registry = bound_host();
    let estimator = OpticalFlowEstimator::new(translation_params()).unwrap();
    let (a, b) = (textured_frame(0), textured_frame(SHIFT));
    let flows = estimator.estimate(&registry, &a, &b).unwrap();

    let direct = FrameSynthesizer::new()
        .synthesize(&registry, &a, &b, &flows.forward, &flows.backward, 0.5)
        .unwrap();
    let mut pipeline = InterpolationPipeline::new(bound_host(), translation_params()).unwrap();
    let via_pipeline = pipeline.interpolate(&a, &b, 1).unwrap().remove(0);
    // Splat sums may associate differently between runs; allow one level
    for y in 0..SIZE {
        for x in 0..SIZE {
            let diff = (direct.sample(x, y, 1) - via_pipeline.sample(x, y, 1)).abs();
            assert!(diff <= 1.0, "({x}, {y}) differs by {diff}");
        }
    }

    // A still field reduces synthesis to a cross-fade
    let still = FlowField::zeros(SIZE, SIZE);
    let fade = FrameSynthesizer::new()
        .synthesize(&registry, &a, &b, &still, &still, 0.5)
        .unwrap();
    let expected = (a.sample(10, 10, 0) + b.sample(10, 10, 0)) / 2.0;
    assert!((fade.sample(10, 10, 0) - expected).abs() <= 1.0);
}
