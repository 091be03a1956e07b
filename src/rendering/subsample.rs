/// Per-pixel stochastic subsamples.
///
/// Key design principles:
/// 1. Jitter is a pure function of (frame seed, absolute pixel x, absolute pixel y).
///    Two neighbouring regions sharing a border strip therefore produce the
///    same subsamples no matter which one is processed first.
/// 2. Subsample `i` always lies in sub-cell `(i % samples_x, i / samples_x)`, so
///    the rasterizer can restrict a pixel to an index range from fractional bounds.
/// 3. Time and lens strata are shuffled against the position strata and indexed
///    back through `time_order` and `dof_lookup` for the motion/DOF paths.
use glam::Vec2;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::error::{HiderError, HiderResult};
use super::geometry::Rect;
use super::sample_store::SampleHits;

/// Jitter parameters shared by every pixel of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleLayout {
    pub samples_x: usize,
    pub samples_y: usize,
    pub shutter_open: f32,
    pub shutter_close: f32,
    pub depth_of_field: bool,
    pub seed: u64,
}

impl SampleLayout {
    #[inline]
    pub fn samples_per_pixel(&self) -> usize {
        self.samples_x * self.samples_y
    }

    #[inline]
    pub fn has_motion_blur(&self) -> bool {
        self.shutter_close > self.shutter_open
    }

    /// Length of one time stratum.
    #[inline]
    pub fn time_stratum(&self) -> f32 {
        (self.shutter_close - self.shutter_open) / self.samples_per_pixel() as f32
    }
}

/// One stochastic sample point and the hits recorded against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Subsample {
    /// Absolute raster position.
    pub position: Vec2,
    pub time: f32,
    /// Lens position on the unit disk.
    pub dof_offset: Vec2,
    pub dof_stratum: u16,
    /// Uniform value in `[0, 1)` tested against a grid's level-of-detail range.
    pub detail: f32,
    pub hits: SampleHits,
}

/// All subsamples of one pixel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelSamples {
    samples: Vec<Subsample>,
    /// Subsample indices sorted by time stratum.
    time_order: Vec<u16>,
    /// Subsample index for each lens stratum.
    dof_lookup: Vec<u16>,
}

#[inline]
fn pixel_rng(seed: u64, x: i32, y: i32) -> ChaCha8Rng {
    let key = ((x as u32 as u64) << 32) | (y as u32 as u64);
    let mut z = seed ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    ChaCha8Rng::seed_from_u64(z ^ (z >> 31))
}

/// Largest `f32` strictly below the integer pixel edge `edge`.
#[inline]
fn below(edge: i32) -> f32 {
    let e = edge as f32;
    if edge > 0 {
        f32::from_bits(e.to_bits() - 1)
    } else if edge == 0 {
        -f32::from_bits(1)
    } else {
        f32::from_bits(e.to_bits() + 1)
    }
}

impl PixelSamples {
    /// Generate the subsamples of absolute pixel `(x, y)`.
    pub fn jittered(x: i32, y: i32, layout: &SampleLayout) -> Self {
        let sx = layout.samples_x;
        let sy = layout.samples_y;
        let spp = layout.samples_per_pixel();
        let mut rng = pixel_rng(layout.seed, x, y);

        let mut time_strata: Vec<u16> = (0..spp as u16).collect();
        let mut lens_strata: Vec<u16> = (0..spp as u16).collect();
        if layout.has_motion_blur() {
            time_strata.shuffle(&mut rng);
        }
        if layout.depth_of_field {
            lens_strata.shuffle(&mut rng);
        }

        let dt = layout.time_stratum();
        let mut samples = Vec::with_capacity(spp);
        for i in 0..spp {
            let m = i % sx;
            let n = i / sx;
            let position = Vec2::new(
                (x as f32 + (m as f32 + rng.gen::<f32>()) / sx as f32).min(below(x + 1)),
                (y as f32 + (n as f32 + rng.gen::<f32>()) / sy as f32).min(below(y + 1)),
            );
            let time = if layout.has_motion_blur() {
                let t = layout.shutter_open + (time_strata[i] as f32 + rng.gen::<f32>()) * dt;
                t.min(layout.shutter_close)
            } else {
                layout.shutter_open
            };
            let (dof_offset, dof_stratum) = if layout.depth_of_field {
                let k = lens_strata[i] as usize;
                let cell = Vec2::new((k % sx) as f32, (k / sx) as f32);
                let jitter = Vec2::new(rng.gen::<f32>(), rng.gen::<f32>());
                let square = Vec2::new(
                    -1.0 + 2.0 * (cell.x + jitter.x) / sx as f32,
                    -1.0 + 2.0 * (cell.y + jitter.y) / sy as f32,
                );
                (project_to_circle(square), k as u16)
            } else {
                (Vec2::ZERO, i as u16)
            };
            samples.push(Subsample {
                position,
                time,
                dof_offset,
                dof_stratum,
                detail: rng.gen::<f32>(),
                hits: SampleHits::Empty,
            });
        }

        let mut time_order = vec![0u16; spp];
        for (i, &stratum) in time_strata.iter().enumerate() {
            time_order[stratum as usize] = i as u16;
        }
        let mut dof_lookup = vec![0u16; spp];
        for (i, s) in samples.iter().enumerate() {
            dof_lookup[s.dof_stratum as usize] = i as u16;
        }

        Self {
            samples,
            time_order,
            dof_lookup,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[Subsample] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Subsample] {
        &mut self.samples
    }

    #[inline]
    pub fn time_order(&self) -> &[u16] {
        &self.time_order
    }

    #[inline]
    pub fn dof_lookup(&self) -> &[u16] {
        &self.dof_lookup
    }

    pub fn has_hits(&self) -> bool {
        self.samples.iter().any(|s| !s.hits.is_empty())
    }
}

/// Subsamples for every pixel of a rectangle, row-major in absolute coordinates.
#[derive(Debug, Clone, Default)]
pub struct SamplePool {
    area: Rect,
    pixels: Vec<PixelSamples>,
}

impl SamplePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-target to `area` and jitter every pixel. Reuses the allocation.
    pub fn jitter(&mut self, area: Rect, layout: &SampleLayout) -> HiderResult<()> {
        let count = area.area();
        let width = area.width() as usize;
        self.pixels.clear();
        self.pixels
            .try_reserve(count)
            .map_err(|e| HiderError::allocation("pixels", count, e))?;
        (0..count)
            .into_par_iter()
            .map(|i| {
                PixelSamples::jittered(
                    area.xmin + (i % width) as i32,
                    area.ymin + (i / width) as i32,
                    layout,
                )
            })
            .collect_into_vec(&mut self.pixels);
        self.area = area;
        Ok(())
    }

    #[inline]
    pub fn area(&self) -> Rect {
        self.area
    }

    #[inline]
    pub fn pixels(&self) -> &[PixelSamples] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [PixelSamples] {
        &mut self.pixels
    }

    /// Pool index of absolute pixel `(x, y)`.
    #[inline]
    pub fn index(&self, x: i32, y: i32) -> usize {
        debug_assert!(self.area.contains(x, y), "({}, {}) outside pool {:?}", x, y, self.area);
        (y - self.area.ymin) as usize * self.area.width() as usize + (x - self.area.xmin) as usize
    }

    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> &PixelSamples {
        &self.pixels[self.index(x, y)]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: i32, y: i32) -> &mut PixelSamples {
        let i = self.index(x, y);
        &mut self.pixels[i]
    }

    /// Copy out the pixels of `rect` clipped to the pool. Returns the clipped
    /// rectangle and its pixels, row-major.
    pub fn copy_rect(&self, rect: Rect) -> (Rect, Vec<PixelSamples>) {
        let rect = rect.intersect(&self.area);
        let mut out = Vec::with_capacity(rect.area());
        for y in rect.ymin..rect.ymax {
            let start = self.index(rect.xmin, y);
            out.extend_from_slice(&self.pixels[start..start + rect.width() as usize]);
        }
        (rect, out)
    }

    /// Overwrite the pool pixels covered by `rect` with `pixels` (row-major over `rect`).
    pub fn put_rect(&mut self, rect: Rect, pixels: &[PixelSamples]) {
        debug_assert_eq!(pixels.len(), rect.area());
        let overlap = rect.intersect(&self.area);
        let stride = rect.width() as usize;
        for y in overlap.ymin..overlap.ymax {
            for x in overlap.xmin..overlap.xmax {
                let src = (y - rect.ymin) as usize * stride + (x - rect.xmin) as usize;
                let dst = self.index(x, y);
                self.pixels[dst].clone_from(&pixels[src]);
            }
        }
    }

    pub fn has_hits(&self) -> bool {
        self.pixels.iter().any(|p| p.has_hits())
    }
}

/// Map a point of `[-1, 1]^2` onto the unit disk, keeping its direction and
/// using its max-norm as the new radius.
#[inline]
pub fn project_to_circle(p: Vec2) -> Vec2 {
    let r = p.length();
    if r == 0.0 {
        return p;
    }
    p * (p.x.abs().max(p.y.abs()) / r)
}

/// Bounds of every lens stratum after projection onto the unit disk,
/// indexed like `Subsample::dof_stratum`.
pub fn dof_bounds(samples_x: usize, samples_y: usize) -> Vec<(Vec2, Vec2)> {
    let mut bounds = Vec::with_capacity(samples_x * samples_y);
    let step = Vec2::new(2.0 / samples_x as f32, 2.0 / samples_y as f32);
    for j in 0..samples_y {
        for i in 0..samples_x {
            let lo = Vec2::new(-1.0 + i as f32 * step.x, -1.0 + j as f32 * step.y);
            let hi = lo + step;
            let mut points = vec![
                lo,
                Vec2::new(hi.x, lo.y),
                Vec2::new(lo.x, hi.y),
                hi,
            ];
            // The projection bulges edges outward where they cross an axis.
            if lo.y < 0.0 && hi.y > 0.0 {
                points.push(Vec2::new(lo.x, 0.0));
                points.push(Vec2::new(hi.x, 0.0));
            }
            if lo.x < 0.0 && hi.x > 0.0 {
                points.push(Vec2::new(0.0, lo.y));
                points.push(Vec2::new(0.0, hi.y));
            }
            let mut bmin = Vec2::splat(f32::MAX);
            let mut bmax = Vec2::splat(-f32::MAX);
            for p in points {
                let q = project_to_circle(p);
                bmin = bmin.min(q);
                bmax = bmax.max(q);
            }
            bounds.push((bmin, bmax));
        }
    }
    bounds
}
