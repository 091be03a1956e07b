/// Demo entry point
/// Renders a small scene of bilinear patches and writes it as a binary PPM
use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

use glam::{Vec2, Vec3};
use mimalloc::MiMalloc;
use reyes_hider::rendering::{DepthOfField, FilterKind};
use reyes_hider::*;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn scene() -> Vec<Box<dyn Surface>> {
    let w = WIDTH as f32;
    let h = HEIGHT as f32;
    let mut surfaces: Vec<Box<dyn Surface>> = Vec::new();

    // Backdrop
    surfaces.push(Box::new(
        BilinearPatch::rect(0.0, 0.0, w, h, 20.0, Vec3::ONE).with_colors([
            Vec3::new(0.15, 0.2, 0.35),
            Vec3::new(0.15, 0.2, 0.35),
            Vec3::new(0.05, 0.05, 0.1),
            Vec3::new(0.05, 0.05, 0.1),
        ]),
    ));

    // Tilted opaque card, in focus
    surfaces.push(Box::new(
        BilinearPatch::new(
            [
                Vec3::new(40.0, 40.0, 7.0),
                Vec3::new(150.0, 30.0, 8.0),
                Vec3::new(50.0, 170.0, 8.0),
                Vec3::new(160.0, 180.0, 9.0),
            ],
            Vec3::ONE,
        )
        .with_colors([
            Vec3::new(0.9, 0.2, 0.1),
            Vec3::new(0.9, 0.8, 0.1),
            Vec3::new(0.2, 0.7, 0.2),
            Vec3::new(0.1, 0.3, 0.9),
        ]),
    ));

    // Half-transparent sheet in front of it
    surfaces.push(Box::new(
        BilinearPatch::rect(110.0, 90.0, 230.0, 200.0, 5.0, Vec3::new(0.2, 0.9, 0.9))
            .with_opacity(Vec3::splat(0.5)),
    ));

    // Moving square, smeared across the shutter
    let moving = BilinearPatch::rect(200.0, 30.0, 240.0, 70.0, 6.0, Vec3::new(1.0, 0.6, 0.1)).with_motion(
        [
            Vec3::new(260.0, 40.0, 6.0),
            Vec3::new(300.0, 40.0, 6.0),
            Vec3::new(260.0, 80.0, 6.0),
            Vec3::new(300.0, 80.0, 6.0),
        ],
        (0.0, 1.0),
    );
    surfaces.push(Box::new(moving));

    // Far strip, defocused
    surfaces.push(Box::new(BilinearPatch::rect(
        20.0,
        200.0,
        300.0,
        230.0,
        16.0,
        Vec3::new(0.8, 0.8, 0.8),
    )));
    surfaces
}

fn main() -> HiderResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "reyes_hider.ppm".to_string());

    let mut options = RenderOptions::new(WIDTH, HEIGHT);
    options.pixel_samples = (4, 4);
    options.filter = FilterKind::Gaussian;
    options.filter_width = (2.0, 2.0);
    options.shutter = (0.0, 1.0);
    options.depth_of_field = Some(DepthOfField {
        coc_scale: Vec2::splat(40.0),
        focal_distance: 8.0,
    });

    let renderer = Renderer::new(options.clone())?;
    let mut image = ImageAccumulator::new(&options);
    let start = Instant::now();
    let report = renderer.render(scene(), &mut image)?;
    log::info!(
        "frame done in {:.2}ms, {} regions written",
        start.elapsed().as_secs_f64() * 1000.0,
        report.regions_written
    );

    image.write_ppm(BufWriter::new(File::create(&path)?))?;
    log::info!("wrote {}", path);
    Ok(())
}
