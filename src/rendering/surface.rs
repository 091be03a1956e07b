/// Tessellation seam: surfaces that can be diced into shaded grids or split.
///
/// The hider never looks inside a surface. It asks for a raster-space bound
/// (for bucketing and occlusion culling), whether the surface is small enough
/// to dice, and otherwise splits it and re-posts the pieces.
///
/// `BilinearPatch` is a raster-space patch with per-corner colors and
/// optional linear motion. It is enough to drive the whole pipeline for
/// demos and tests.
use glam::Vec3;

use super::geometry::Bound;
use super::micropolygon::{GridInfo, MicropolygonGrid};
use super::sample_store::Color;

pub trait Surface: Send {
    /// Raster-space bound over the whole shutter interval.
    fn raster_bound(&self) -> Bound;

    fn name(&self) -> &str {
        "<unnamed>"
    }

    /// Member of a CSG solid: never occlusion culled.
    fn is_csg(&self) -> bool {
        false
    }

    /// The surface spans the eye plane and cannot be projected as a whole.
    fn crosses_eye_plane(&self) -> bool {
        false
    }

    /// Splits this surface has already gone through while crossing the eye plane.
    fn eye_splits(&self) -> u32 {
        0
    }

    fn diceable(&self) -> bool;

    /// Dice and shade into a micropolygon grid. `None` discards the surface.
    fn dice(self: Box<Self>) -> Option<MicropolygonGrid>;

    fn split(self: Box<Self>) -> Vec<Box<dyn Surface>>;
}

/// Most micropolygons allowed in one grid.
pub const MAX_GRID_CELLS: usize = 256;

/// Bilinear patch given directly in raster space.
///
/// Corners are ordered `p00, p10, p01, p11` (u across, v down).
#[derive(Debug, Clone)]
pub struct BilinearPatch {
    corners: [Vec3; 4],
    /// Corners at `shutter.1` for a moving patch.
    motion: Option<([Vec3; 4], (f32, f32))>,
    colors: [Color; 4],
    opacity: Color,
    aov: Vec<f32>,
    info: GridInfo,
    /// Target micropolygon area in pixels.
    shading_rate: f32,
    eye_splits: u32,
}

#[inline]
fn bilerp<T>(c: &[T; 4], u: f32, v: f32) -> T
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    c[0] * ((1.0 - u) * (1.0 - v)) + c[1] * (u * (1.0 - v)) + c[2] * ((1.0 - u) * v) + c[3] * (u * v)
}

impl BilinearPatch {
    pub fn new(corners: [Vec3; 4], color: Color) -> Self {
        Self {
            corners,
            motion: None,
            colors: [color; 4],
            opacity: Color::ONE,
            aov: Vec::new(),
            info: GridInfo::named("patch"),
            shading_rate: 1.0,
            eye_splits: 0,
        }
    }

    /// Axis-aligned screen rectangle at constant depth.
    pub fn rect(x0: f32, y0: f32, x1: f32, y1: f32, depth: f32, color: Color) -> Self {
        Self::new(
            [
                Vec3::new(x0, y0, depth),
                Vec3::new(x1, y0, depth),
                Vec3::new(x0, y1, depth),
                Vec3::new(x1, y1, depth),
            ],
            color,
        )
    }

    pub fn with_colors(mut self, colors: [Color; 4]) -> Self {
        self.colors = colors;
        self
    }

    /// Straight (not premultiplied) opacity. Colors are premultiplied at dice time.
    pub fn with_opacity(mut self, opacity: Color) -> Self {
        self.opacity = opacity;
        self
    }

    /// Move linearly to `end` over `[t0, t1]`.
    pub fn with_motion(mut self, end: [Vec3; 4], times: (f32, f32)) -> Self {
        self.motion = Some((end, times));
        self
    }

    pub fn with_info(mut self, info: GridInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_aov(mut self, values: Vec<f32>) -> Self {
        self.aov = values;
        self
    }

    pub fn with_shading_rate(mut self, rate: f32) -> Self {
        self.shading_rate = rate.max(f32::EPSILON);
        self
    }

    /// Cells along u and v needed to reach the shading rate.
    fn dice_counts(&self) -> (usize, usize) {
        let edge = |a: usize, b: usize| -> f32 {
            let mut len = (self.corners[b] - self.corners[a]).truncate().length();
            if let Some((end, _)) = &self.motion {
                len = len.max((end[b] - end[a]).truncate().length());
            }
            len
        };
        let step = self.shading_rate.sqrt();
        let lu = edge(0, 1).max(edge(2, 3));
        let lv = edge(0, 2).max(edge(1, 3));
        (
            ((lu / step).ceil() as usize).max(1),
            ((lv / step).ceil() as usize).max(1),
        )
    }

    fn sub_patch(&self, u0: f32, u1: f32, v0: f32, v1: f32) -> BilinearPatch {
        let pick = |c: &[Vec3; 4]| {
            [
                bilerp(c, u0, v0),
                bilerp(c, u1, v0),
                bilerp(c, u0, v1),
                bilerp(c, u1, v1),
            ]
        };
        let colors = [
            bilerp(&self.colors, u0, v0),
            bilerp(&self.colors, u1, v0),
            bilerp(&self.colors, u0, v1),
            bilerp(&self.colors, u1, v1),
        ];
        BilinearPatch {
            corners: pick(&self.corners),
            motion: self.motion.as_ref().map(|(end, t)| (pick(end), *t)),
            colors,
            opacity: self.opacity,
            aov: self.aov.clone(),
            info: self.info.clone(),
            shading_rate: self.shading_rate,
            eye_splits: self.eye_splits + u32::from(self.crosses_eye_plane()),
        }
    }
}

impl Surface for BilinearPatch {
    fn raster_bound(&self) -> Bound {
        let mut bound = Bound::from_points(self.corners);
        if let Some((end, _)) = &self.motion {
            for &p in end {
                bound.encapsulate(p);
            }
        }
        bound
    }

    fn name(&self) -> &str {
        &self.info.name
    }

    fn is_csg(&self) -> bool {
        self.info.csg.is_some()
    }

    fn crosses_eye_plane(&self) -> bool {
        let b = self.raster_bound();
        b.min.z <= 0.0 && b.max.z > 0.0
    }

    fn eye_splits(&self) -> u32 {
        self.eye_splits
    }

    fn diceable(&self) -> bool {
        if self.crosses_eye_plane() {
            return false;
        }
        let (nu, nv) = self.dice_counts();
        nu * nv <= MAX_GRID_CELLS
    }

    fn dice(self: Box<Self>) -> Option<MicropolygonGrid> {
        let (nu, nv) = self.dice_counts();
        let (uv, vv) = (nu + 1, nv + 1);
        let count = uv * vv;
        let mut positions = Vec::with_capacity(count);
        let mut end_positions = Vec::with_capacity(if self.motion.is_some() { count } else { 0 });
        let mut colors = Vec::with_capacity(count);
        for j in 0..vv {
            let v = j as f32 / nv as f32;
            for i in 0..uv {
                let u = i as f32 / nu as f32;
                positions.push(bilerp(&self.corners, u, v));
                if let Some((end, _)) = &self.motion {
                    end_positions.push(bilerp(end, u, v));
                }
                colors.push(bilerp(&self.colors, u, v) * self.opacity);
            }
        }

        let aov_width = self.aov.len();
        let aovs: Vec<f32> = self.aov.iter().copied().cycle().take(aov_width * count).collect();
        let mut grid = MicropolygonGrid::new(
            uv,
            vv,
            positions.clone(),
            colors,
            vec![self.opacity; count],
            self.info.clone(),
        );
        if aov_width > 0 {
            grid = grid.with_aovs(aov_width, aovs);
        }
        if let Some((_, (t0, t1))) = self.motion {
            grid = grid.with_motion(vec![(t0, positions), (t1, end_positions)]);
        }
        Some(grid)
    }

    fn split(self: Box<Self>) -> Vec<Box<dyn Surface>> {
        let (nu, nv) = self.dice_counts();
        let halves: [BilinearPatch; 2] = if nu >= nv {
            [self.sub_patch(0.0, 0.5, 0.0, 1.0), self.sub_patch(0.5, 1.0, 0.0, 1.0)]
        } else {
            [self.sub_patch(0.0, 1.0, 0.0, 0.5), self.sub_patch(0.0, 1.0, 0.5, 1.0)]
        };
        halves
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn Surface>)
            .collect()
    }
}
