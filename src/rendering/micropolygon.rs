/// Shaded micropolygon grids and the per-micropolygon sampling caches.
///
/// A grid arrives from dicing/shading as a `u_vertices x v_vertices` lattice
/// of raster-space points (x, y in pixels, z as depth), one lattice per
/// motion key, with per-vertex color, opacity and AOV values. Splitting a
/// grid yields one `Micropolygon` per lattice cell, all sharing the grid.
use std::sync::Arc;

use glam::{Vec2, Vec3};

use super::geometry::Bound;
use super::sample_store::{Color, CsgTag, HitFlags, HitRecord};

/// Attributes shared by every micropolygon of a grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridInfo {
    pub name: String,
    /// Detail range `[lo, hi)` this grid is visible in, if level of detail is in use.
    pub lod_bounds: Option<(f32, f32)>,
    pub matte: bool,
    pub csg: Option<CsgTag>,
    /// Interpolate color/opacity across each micropolygon instead of flat shading.
    pub smooth_shading: bool,
}

impl GridInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether nearer opaque hits may reject this grid's samples.
    #[inline]
    pub fn is_cullable(&self) -> bool {
        self.csg.is_none()
    }

    #[inline]
    pub fn lod_accepts(&self, detail: f32) -> bool {
        match self.lod_bounds {
            Some((lo, hi)) => !(lo > detail || detail >= hi),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MicropolygonGrid {
    u_vertices: usize,
    v_vertices: usize,
    time_keys: Vec<f32>,
    /// One lattice of positions per time key.
    positions: Vec<Vec<Vec3>>,
    colors: Vec<Color>,
    opacities: Vec<Color>,
    /// Per-vertex AOV values, `aov_width` floats each.
    aovs: Vec<f32>,
    aov_width: usize,
    info: GridInfo,
}

impl MicropolygonGrid {
    /// Stationary grid. `positions`, `colors` and `opacities` are row-major
    /// over `u_vertices x v_vertices`.
    pub fn new(
        u_vertices: usize,
        v_vertices: usize,
        positions: Vec<Vec3>,
        colors: Vec<Color>,
        opacities: Vec<Color>,
        info: GridInfo,
    ) -> Self {
        let count = u_vertices * v_vertices;
        debug_assert!(u_vertices >= 2 && v_vertices >= 2, "grid needs at least one cell");
        debug_assert_eq!(positions.len(), count);
        debug_assert_eq!(colors.len(), count);
        debug_assert_eq!(opacities.len(), count);
        Self {
            u_vertices,
            v_vertices,
            time_keys: vec![0.0],
            positions: vec![positions],
            colors,
            opacities,
            aovs: Vec::new(),
            aov_width: 0,
            info,
        }
    }

    /// Replace positions with motion keys. `keys` must be sorted by time.
    pub fn with_motion(mut self, keys: Vec<(f32, Vec<Vec3>)>) -> Self {
        debug_assert!(!keys.is_empty());
        debug_assert!(keys.windows(2).all(|w| w[0].0 <= w[1].0), "motion keys out of order");
        let (times, lattices): (Vec<f32>, Vec<Vec<Vec3>>) = keys.into_iter().unzip();
        self.time_keys = times;
        self.positions = lattices;
        self
    }

    pub fn with_aovs(mut self, width: usize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), width * self.u_vertices * self.v_vertices);
        self.aov_width = width;
        self.aovs = values;
        self
    }

    #[inline]
    pub fn info(&self) -> &GridInfo {
        &self.info
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.time_keys.len() > 1
    }

    #[inline]
    pub fn aov_width(&self) -> usize {
        self.aov_width
    }

    #[inline]
    pub fn micropolygon_count(&self) -> usize {
        (self.u_vertices - 1) * (self.v_vertices - 1)
    }

    /// Split into one micropolygon per cell, in row-major cell order.
    pub fn into_micropolygons(self) -> Vec<Micropolygon> {
        let grid = Arc::new(self);
        let mut out = Vec::with_capacity(grid.micropolygon_count());
        let uv = grid.u_vertices;
        for v in 0..grid.v_vertices - 1 {
            for u in 0..uv - 1 {
                let a = v * uv + u;
                let vertices = [a as u32, (a + 1) as u32, (a + uv + 1) as u32, (a + uv) as u32];
                let mut bound = Bound::empty();
                for lattice in &grid.positions {
                    for &i in &vertices {
                        bound.encapsulate(lattice[i as usize]);
                    }
                }
                out.push(Micropolygon {
                    grid: Arc::clone(&grid),
                    vertices,
                    bound,
                });
            }
        }
        out
    }

    fn positions_at(&self, vertices: &[u32; 4], time: f32) -> [Vec3; 4] {
        let keys = &self.time_keys;
        let pick = |lattice: &Vec<Vec3>| vertices.map(|i| lattice[i as usize]);
        if keys.len() == 1 || time <= keys[0] {
            return pick(&self.positions[0]);
        }
        let last = keys.len() - 1;
        if time >= keys[last] {
            return pick(&self.positions[last]);
        }
        let seg = keys.partition_point(|&k| k <= time).saturating_sub(1).min(last - 1);
        let span = keys[seg + 1] - keys[seg];
        let s = if span > 0.0 { (time - keys[seg]) / span } else { 0.0 };
        let a = pick(&self.positions[seg]);
        let b = pick(&self.positions[seg + 1]);
        [
            a[0].lerp(b[0], s),
            a[1].lerp(b[1], s),
            a[2].lerp(b[2], s),
            a[3].lerp(b[3], s),
        ]
    }
}

/// A time slice of a moving micropolygon's swept bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSubBound {
    pub bound: Bound,
    pub t0: f32,
    pub t1: f32,
}

/// One cell of a shaded grid.
#[derive(Debug, Clone)]
pub struct Micropolygon {
    grid: Arc<MicropolygonGrid>,
    /// Lattice indices in winding order: (u,v), (u+1,v), (u+1,v+1), (u,v+1).
    vertices: [u32; 4],
    /// Bound over every motion key.
    bound: Bound,
}

impl Micropolygon {
    #[inline]
    pub fn bound(&self) -> &Bound {
        &self.bound
    }

    #[inline]
    pub fn info(&self) -> &GridInfo {
        &self.grid.info
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.grid.is_moving()
    }

    #[inline]
    pub fn vertices_at(&self, time: f32) -> [Vec3; 4] {
        self.grid.positions_at(&self.vertices, time)
    }

    /// Split `[open, close]` into `count` equal slices and bound the
    /// micropolygon over each. Linear motion between keys keeps each slice
    /// inside the hull of its end points and any keys it spans.
    pub fn time_sub_bounds(&self, open: f32, close: f32, count: usize) -> Vec<TimeSubBound> {
        if !self.is_moving() || count <= 1 || close <= open {
            return vec![TimeSubBound {
                bound: self.bound,
                t0: open,
                t1: close,
            }];
        }
        let step = (close - open) / count as f32;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let t0 = open + i as f32 * step;
            let t1 = if i + 1 == count { close } else { t0 + step };
            let mut bound = Bound::from_points(self.vertices_at(t0));
            for p in self.vertices_at(t1) {
                bound.encapsulate(p);
            }
            for (k, &key) in self.grid.time_keys.iter().enumerate() {
                if key > t0 && key < t1 {
                    for &v in &self.vertices {
                        bound.encapsulate(self.grid.positions[k][v as usize]);
                    }
                }
            }
            out.push(TimeSubBound { bound, t0, t1 });
        }
        out
    }

    /// Shading values cached once before this micropolygon is sampled.
    pub fn sample_info(&self, allow_smooth: bool) -> SampleInfo {
        let g = &*self.grid;
        let [a, b, _, d] = self.vertices.map(|i| i as usize);
        let occludes = self
            .vertices
            .iter()
            .all(|&i| g.opacities[i as usize].cmpge(Vec3::ONE).all());
        let aov = if g.aov_width > 0 {
            g.aovs[a * g.aov_width..(a + 1) * g.aov_width].to_vec()
        } else {
            Vec::new()
        };

        let origin = g.positions[0][a].truncate();
        let mut info = SampleInfo {
            origin,
            color: g.colors[a],
            color_dx: Color::ZERO,
            color_dy: Color::ZERO,
            opacity: g.opacities[a],
            opacity_dx: Color::ZERO,
            opacity_dy: Color::ZERO,
            aov,
            flags: HitFlags {
                occludes,
                matte: g.info.matte,
            },
            csg: g.info.csg,
        };

        if allow_smooth && g.info.smooth_shading {
            let e1 = g.positions[0][b].truncate() - origin;
            let e2 = g.positions[0][d].truncate() - origin;
            let det = e1.x * e2.y - e1.y * e2.x;
            if det.abs() > f32::EPSILON {
                let gradient = |fa: Color, fb: Color, fd: Color| {
                    let d1 = fb - fa;
                    let d2 = fd - fa;
                    ((d1 * e2.y - d2 * e1.y) / det, (d2 * e1.x - d1 * e2.x) / det)
                };
                (info.color_dx, info.color_dy) = gradient(g.colors[a], g.colors[b], g.colors[d]);
                (info.opacity_dx, info.opacity_dy) =
                    gradient(g.opacities[a], g.opacities[b], g.opacities[d]);
            }
        }
        info
    }
}

/// Color/opacity of a micropolygon as a function of raster position.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
    origin: Vec2,
    color: Color,
    color_dx: Color,
    color_dy: Color,
    opacity: Color,
    opacity_dx: Color,
    opacity_dy: Color,
    aov: Vec<f32>,
    pub flags: HitFlags,
    pub csg: Option<CsgTag>,
}

impl SampleInfo {
    /// First vertex at the first motion key; gradients are relative to it.
    #[inline]
    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    #[inline]
    pub fn color_at(&self, p: Vec2) -> Color {
        let d = p - self.origin;
        self.color + self.color_dx * d.x + self.color_dy * d.y
    }

    #[inline]
    pub fn opacity_at(&self, p: Vec2) -> Color {
        let d = p - self.origin;
        (self.opacity + self.opacity_dx * d.x + self.opacity_dy * d.y).clamp(Color::ZERO, Color::ONE)
    }

    pub fn hit_record(&self, depth: f32, p: Vec2) -> HitRecord {
        HitRecord {
            depth,
            color: self.color_at(p),
            opacity: self.opacity_at(p),
            aov: self.aov.clone(),
            csg: self.csg,
            flags: self.flags,
        }
    }
}

/// Edge equations and depth plane of a convex quad.
#[derive(Debug, Clone, Copy)]
pub struct HitTestCache {
    /// `a * x + b * y + c >= 0` inside, one per edge.
    edges: [Vec3; 4],
    plane_normal: Vec3,
    plane_point: Vec3,
    valid: bool,
}

impl HitTestCache {
    pub fn new(v: &[Vec3; 4]) -> Self {
        let mut area2 = 0.0;
        for i in 0..4 {
            let p = v[i];
            let q = v[(i + 1) % 4];
            area2 += p.x * q.y - q.x * p.y;
        }
        // The edge function is negative inside for positive (shoelace) winding.
        let orient = if area2 > 0.0 { -1.0 } else { 1.0 };
        let mut edges = [Vec3::ZERO; 4];
        for (i, edge) in edges.iter_mut().enumerate() {
            let a = v[i];
            let b = v[(i + 1) % 4];
            let ea = b.y - a.y;
            let eb = a.x - b.x;
            let ec = -a.x * ea - a.y * eb;
            *edge = Vec3::new(ea, eb, ec) * orient;
        }
        let plane_normal = (v[2] - v[0]).cross(v[3] - v[1]);
        let plane_point = (v[0] + v[1] + v[2] + v[3]) * 0.25;
        Self {
            edges,
            plane_normal,
            plane_point,
            valid: area2.abs() > 1e-12 && plane_normal.z.abs() > 1e-12,
        }
    }

    /// Depth at `p` when `p` lies inside the quad.
    #[inline]
    pub fn hit(&self, p: Vec2) -> Option<f32> {
        if !self.valid {
            return None;
        }
        for e in &self.edges {
            if e.x * p.x + e.y * p.y + e.z < 0.0 {
                return None;
            }
        }
        let n = self.plane_normal;
        let q = self.plane_point;
        Some(q.z - (n.x * (p.x - q.x) + n.y * (p.y - q.y)) / n.z)
    }
}
