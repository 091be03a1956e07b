/// Integration tests that exercise the full hider pipeline:
/// surfaces -> regions -> micropolygons -> samples -> filtered image.
use std::time::Instant;

use glam::Vec3;
use reyes_hider::rendering::channel_buffer::CHANNEL_R;
use reyes_hider::rendering::{
    Color, FilterKind, FrameRegions, Imager, RegionOutcome, RegionProcessor, StopFlag,
};
use reyes_hider::*;

fn box_options(width: u32, height: u32) -> RenderOptions {
    let mut opts = RenderOptions::new(width, height);
    opts.pixel_samples = (2, 2);
    opts.filter = FilterKind::Box;
    opts.filter_width = (2.0, 2.0);
    opts
}

fn render(opts: &RenderOptions, surfaces: Vec<Box<dyn Surface>>) -> (ImageAccumulator, FrameReport) {
    let renderer = Renderer::new(opts.clone()).expect("valid options");
    let mut image = ImageAccumulator::new(opts);
    let start = Instant::now();
    let report = renderer.render(surfaces, &mut image).expect("render");
    println!(
        "[PIPELINE] {}x{}: {:?}, {} samples tested",
        opts.width,
        opts.height,
        start.elapsed(),
        report.stats.samples_tested
    );
    (image, report)
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn full_coverage_opaque_patch_resolves_exactly() {
    let opts = box_options(16, 16);
    let patch = BilinearPatch::rect(-4.0, -4.0, 20.0, 20.0, 5.0, Color::ONE);
    let (image, report) = render(&opts, vec![Box::new(patch)]);
    assert_eq!(report.regions_written, 1);

    let buffer = image.image();
    for y in 0..16 {
        for x in 0..16 {
            for channel in ["r", "g", "b", "a", "coverage"] {
                let v = buffer.value(x, y, channel).expect("channel");
                assert!(approx(v, 1.0), "{} at ({}, {}) = {}", channel, x, y, v);
            }
            let z = buffer.value(x, y, "z").expect("z");
            assert!(approx(z, 5.0), "z at ({}, {}) = {}", x, y, z);
        }
    }
}

#[test]
fn empty_scene_is_black_and_infinitely_deep() {
    let opts = box_options(32, 16);
    let (image, report) = render(&opts, Vec::new());
    assert_eq!(report.regions_written, 2);
    assert_eq!(report.stats.hits_stored, 0);
    let buffer = image.image();
    for y in 0..16 {
        for x in 0..32 {
            assert_eq!(buffer.value(x, y, "r"), Some(0.0));
            assert_eq!(buffer.value(x, y, "coverage"), Some(0.0));
            assert_eq!(buffer.value(x, y, "z"), Some(f32::INFINITY));
        }
    }
}

#[test]
fn nearer_patch_wins() {
    let opts = box_options(16, 16);
    let far = BilinearPatch::rect(-4.0, -4.0, 20.0, 20.0, 9.0, Vec3::new(0.0, 0.0, 1.0));
    let near = BilinearPatch::rect(-4.0, -4.0, 20.0, 20.0, 3.0, Vec3::new(1.0, 0.0, 0.0));
    let (image, report) = render(&opts, vec![Box::new(far), Box::new(near)]);
    let buffer = image.image();
    assert!(approx(buffer.value(8, 8, "r").expect("r"), 1.0));
    assert!(approx(buffer.value(8, 8, "b").expect("b"), 0.0));
    assert!(approx(buffer.value(8, 8, "z").expect("z"), 3.0));
    assert!(report.stats.surfaces_culled > 0 || report.stats.hits_occluded > 0);
}

#[test]
fn filtering_twice_gives_the_same_buffer() {
    let opts = box_options(16, 16);
    let mut frame = FrameRegions::new(&opts);
    frame.post_surface(Box::new(
        BilinearPatch::rect(2.3, 3.1, 11.7, 9.4, 4.0, Vec3::new(0.2, 0.5, 0.8))
            .with_opacity(Vec3::splat(0.5)),
    ));
    let mut processor = RegionProcessor::new(&opts);
    let outcome = processor
        .render_region(&mut frame, 0, None, None, &StopFlag::new())
        .expect("render");
    assert_eq!(outcome, RegionOutcome::Rendered);

    let first = processor.channel_buffer().clone();
    processor.filter(None);
    assert_eq!(&first, processor.channel_buffer());
}

#[test]
fn stop_flag_stops_the_frame() {
    let opts = box_options(64, 64);
    let renderer = Renderer::new(opts.clone()).expect("renderer");
    let stop = renderer.stop_flag();
    stop.stop();
    let mut image = ImageAccumulator::new(&opts);
    let report = renderer
        .render(
            vec![Box::new(BilinearPatch::rect(0.0, 0.0, 64.0, 64.0, 1.0, Color::ONE))],
            &mut image,
        )
        .expect("render");
    assert!(report.stopped);
    assert_eq!(image.regions_written(), 0);
}

#[test]
fn exposure_scales_covered_pixels() {
    let mut opts = box_options(16, 16);
    opts.exposure_gain = 2.0;
    opts.exposure_gamma = 1.0;
    let patch = BilinearPatch::rect(-4.0, -4.0, 20.0, 20.0, 5.0, Vec3::splat(0.25));
    let (image, _) = render(&opts, vec![Box::new(patch)]);
    let r = image.image().value(7, 7, "r").expect("r");
    assert!(approx(r, 0.5), "r = {}", r);
    // Exposure leaves opacity alone.
    assert!(approx(image.image().value(7, 7, "a").expect("a"), 1.0));
}

struct Gradient;

impl Imager for Gradient {
    fn shade(&self, x: i32, _y: i32, color: &mut Color, opacity: &mut Color) {
        color.x = x as f32 / 16.0;
        *opacity = Color::splat(0.25);
    }
}

#[test]
fn imager_overrides_color_and_alpha() {
    let opts = box_options(16, 16);
    let renderer = Renderer::new(opts.clone())
        .expect("renderer")
        .with_imager(Box::new(Gradient));
    let mut image = ImageAccumulator::new(&opts);
    renderer
        .render(
            vec![Box::new(BilinearPatch::rect(-4.0, -4.0, 20.0, 20.0, 5.0, Color::ONE))],
            &mut image,
        )
        .expect("render");
    let buffer = image.image();
    for x in 0..16 {
        assert!(approx(buffer.pixel(x, 4)[CHANNEL_R], x as f32 / 16.0));
        assert!(approx(buffer.value(x, 4, "a").expect("a"), 0.25));
    }
}

#[test]
fn crop_window_limits_written_regions() {
    let mut opts = box_options(64, 32);
    opts.crop_window = [0.0, 0.25, 0.0, 0.5];
    let (image, report) = render(
        &opts,
        vec![Box::new(BilinearPatch::rect(0.0, 0.0, 64.0, 32.0, 2.0, Color::ONE))],
    );
    assert_eq!(report.regions_written, 1);
    assert_eq!(report.stats.regions_skipped, 7);
    assert!(approx(image.image().value(8, 8, "r").expect("r"), 1.0));
    assert_eq!(image.image().value(40, 8, "r"), Some(0.0));
}
