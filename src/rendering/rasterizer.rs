/// Micropolygon sampling into the region's subsample pool
/// Stationary micropolygons walk their pixel footprint once with a cached
/// hit test; moving or defocused ones are cut into time slices and lens
/// strata so only subsamples that can possibly see them are tested
use glam::Vec2;

use super::geometry::{Bound, Rect};
use super::micropolygon::{HitTestCache, Micropolygon, SampleInfo, TimeSubBound};
use super::occlusion::OcclusionTree;
use super::options::DepthOfField;
use super::region_processor::RegionProcessor;
use super::sample_store::{StoreOutcome, StorePolicy};
use super::subsample::Subsample;
use crate::perf::RenderStats;

/// Sub-cell index range `[lo, hi)` along one axis of pixel `p` whose cells
/// can hold a position inside `[bmin, bmax]`.
#[inline]
fn sub_range(p: i32, bmin: f32, bmax: f32, n: usize) -> (usize, usize) {
    let n_f = n as f32;
    let lo = ((bmin - p as f32) * n_f).floor().clamp(0.0, n_f) as usize;
    let hi = (((bmax - p as f32) * n_f).floor() + 1.0).clamp(0.0, n_f) as usize;
    (lo, hi)
}

/// Pixels of `area` the closed footprint of `bound` can touch.
#[inline]
fn pixel_span(bound: &Bound, area: Rect) -> Rect {
    Rect::new(
        (bound.min.x.floor() as i32).max(area.xmin),
        (bound.min.y.floor() as i32).max(area.ymin),
        (bound.max.x.floor() as i32).saturating_add(1).min(area.xmax),
        (bound.max.y.floor() as i32).saturating_add(1).min(area.ymax),
    )
}

/// Shutter slice a subsample time must fall in. Slices are half-open except
/// the last, which keeps the closing time.
#[derive(Debug, Clone, Copy)]
struct TimeWindow {
    t0: f32,
    t1: f32,
    closed: bool,
}

impl TimeWindow {
    #[inline]
    fn contains(&self, t: f32) -> bool {
        t >= self.t0 && (t < self.t1 || (self.closed && t <= self.t1))
    }
}

/// Which subsamples of a pixel to try.
#[derive(Debug, Clone, Copy)]
enum Pick {
    /// The one subsample in lens stratum `k`.
    Lens(usize),
    /// Time strata `[lo, hi)`.
    Strata(usize, usize),
}

/// Store side of sampling, borrowed apart from the pool.
struct HitSink<'a> {
    tree: &'a mut OcclusionTree,
    stats: &'a mut RenderStats,
    policy: StorePolicy,
    clipping: (f32, f32),
}

impl HitSink<'_> {
    /// Cheap rejection before the exact hit test.
    #[inline]
    fn hidden(&mut self, s: &Subsample, nearest: f32) -> bool {
        if s.hits.is_occluded(nearest, self.policy) {
            self.stats.hits_occluded += 1;
            return true;
        }
        self.stats.samples_tested += 1;
        false
    }

    #[inline]
    /// Store a hit at `depth`, shaded at `at` in the shutter-open frame.
    fn record(&mut self, s: &mut Subsample, id: u32, depth: f32, info: &SampleInfo, at: Vec2) {
        let (near, far) = self.clipping;
        if depth < near || depth > far {
            return;
        }
        match s.hits.store(info.hit_record(depth, at), self.policy) {
            StoreOutcome::Occluded => self.stats.hits_occluded += 1,
            StoreOutcome::Duplicate => self.stats.hits_duplicate += 1,
            StoreOutcome::Stored { occluder_depth } => {
                self.stats.hits_stored += 1;
                if let Some(z) = occluder_depth {
                    self.tree.set_sample_depth(id, z);
                    self.stats.occluder_updates += 1;
                }
            }
        }
    }
}

impl RegionProcessor {
    /// Sample one micropolygon against the active sampling area.
    pub fn render_micropolygon(&mut self, mp: &Micropolygon) {
        let bound = *mp.bound();
        let (near, far) = self.options.clipping;
        if bound.max.z < near || bound.min.z > far {
            self.stats.micropolygons_clipped += 1;
            return;
        }
        let policy = StorePolicy {
            depth_only: self.options.depth_only,
            cullable: mp.info().is_cullable(),
        };
        let defocus = self.options.depth_of_field;
        let moving = mp.is_moving() && self.layout.has_motion_blur();

        if policy.cullable && !policy.depth_only {
            let reach = match &defocus {
                Some(dof) => bound.expanded_2d(dof.coc_range(bound.min.z, bound.max.z).1),
                None => bound,
            };
            if self.tree.can_cull(&reach) {
                self.stats.micropolygons_culled += 1;
                return;
            }
        }
        self.stats.micropolygons_sampled += 1;

        if !moving && defocus.is_none() {
            self.sample_static(mp, &bound, policy);
        } else {
            self.sample_blurred(mp, moving, defocus, policy);
        }
    }

    fn sample_static(&mut self, mp: &Micropolygon, bound: &Bound, policy: StorePolicy) {
        let span = pixel_span(bound, self.active_area);
        if span.is_empty() {
            return;
        }
        let info = mp.sample_info(true);
        let vertices = mp.vertices_at(self.layout.shutter_open);
        let cache = HitTestCache::new(&vertices);
        let shade_shift = vertices[0].truncate() - info.origin();
        let grid = mp.info();
        let (xs, ys) = (self.layout.samples_x, self.layout.samples_y);
        let spp = xs * ys;
        let mut sink = HitSink {
            tree: &mut self.tree,
            stats: &mut self.stats,
            policy,
            clipping: self.options.clipping,
        };

        for py in span.ymin..span.ymax {
            let (n0, n1) = sub_range(py, bound.min.y, bound.max.y, ys);
            for px in span.xmin..span.xmax {
                let (m0, m1) = sub_range(px, bound.min.x, bound.max.x, xs);
                let p = self.pool.index(px, py);
                let samples = self.pool.pixels_mut()[p].samples_mut();
                for n in n0..n1 {
                    for m in m0..m1 {
                        let i = n * xs + m;
                        let s = &mut samples[i];
                        if !bound.contains_2d(s.position) {
                            continue;
                        }
                        sink.stats.bound_hits += 1;
                        if !grid.lod_accepts(s.detail) || sink.hidden(s, bound.min.z) {
                            continue;
                        }
                        if let Some(z) = cache.hit(s.position) {
                            let at = s.position - shade_shift;
                            sink.record(s, (p * spp + i) as u32, z, &info, at);
                        }
                    }
                }
            }
        }
    }

    fn sample_blurred(
        &mut self,
        mp: &Micropolygon,
        moving: bool,
        defocus: Option<DepthOfField>,
        policy: StorePolicy,
    ) {
        let open = self.layout.shutter_open;
        let close = self.layout.shutter_close;
        let slices = if moving {
            mp.time_sub_bounds(open, close, self.options.time_ranges())
        } else {
            vec![TimeSubBound {
                bound: *mp.bound(),
                t0: open,
                t1: close,
            }]
        };
        let info = mp.sample_info(true);
        let (near, far) = self.options.clipping;
        let spp = self.layout.samples_per_pixel();
        let dt = self.layout.time_stratum();
        let last = slices.len() - 1;

        for (j, slice) in slices.iter().enumerate() {
            if slice.bound.max.z < near || slice.bound.min.z > far {
                continue;
            }
            let window = TimeWindow {
                t0: slice.t0,
                t1: slice.t1,
                closed: j == last,
            };
            match &defocus {
                Some(dof) => {
                    let (coc_lo, coc_hi) = dof.coc_range(slice.bound.min.z, slice.bound.max.z);
                    for k in 0..self.dof_bounds.len() {
                        let (lens_lo, lens_hi) = self.dof_bounds[k];
                        // Vertices move by -coc * lens; bound it over both ranges.
                        let corners = [
                            -coc_lo * lens_lo,
                            -coc_lo * lens_hi,
                            -coc_hi * lens_lo,
                            -coc_hi * lens_hi,
                        ];
                        let lo = corners.iter().fold(Vec2::splat(f32::MAX), |a, c| a.min(*c));
                        let hi = corners.iter().fold(Vec2::splat(-f32::MAX), |a, c| a.max(*c));
                        let lens_bound = slice.bound.offset_2d(lo, hi);
                        self.sample_candidates(mp, &info, policy, &lens_bound, window, Pick::Lens(k), Some(dof));
                    }
                }
                None => {
                    let (s0, s1) = if dt > 0.0 {
                        (
                            (((slice.t0 - open) / dt).floor().max(0.0) as usize).min(spp),
                            (((slice.t1 - open) / dt).ceil().max(0.0) as usize).min(spp),
                        )
                    } else {
                        (0, spp)
                    };
                    self.sample_candidates(mp, &info, policy, &slice.bound, window, Pick::Strata(s0, s1), None);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sample_candidates(
        &mut self,
        mp: &Micropolygon,
        info: &SampleInfo,
        policy: StorePolicy,
        bound: &Bound,
        window: TimeWindow,
        pick: Pick,
        defocus: Option<&DepthOfField>,
    ) {
        let span = pixel_span(bound, self.active_area);
        if span.is_empty() {
            return;
        }
        let moving = mp.is_moving() && self.layout.has_motion_blur();
        let fixed = (!moving).then(|| mp.vertices_at(self.layout.shutter_open));
        let grid = mp.info();
        let spp = self.layout.samples_per_pixel();
        let (c0, c1) = match pick {
            Pick::Lens(k) => (k, k + 1),
            Pick::Strata(lo, hi) => (lo, hi),
        };
        let mut sink = HitSink {
            tree: &mut self.tree,
            stats: &mut self.stats,
            policy,
            clipping: self.options.clipping,
        };

        for py in span.ymin..span.ymax {
            for px in span.xmin..span.xmax {
                let p = self.pool.index(px, py);
                let pixel = &mut self.pool.pixels_mut()[p];
                for c in c0..c1 {
                    let i = match pick {
                        Pick::Lens(_) => pixel.dof_lookup()[c] as usize,
                        Pick::Strata(..) => pixel.time_order()[c] as usize,
                    };
                    let s = &mut pixel.samples_mut()[i];
                    if !window.contains(s.time) || !bound.contains_2d(s.position) {
                        continue;
                    }
                    sink.stats.bound_hits += 1;
                    if !grid.lod_accepts(s.detail) || sink.hidden(s, bound.min.z) {
                        continue;
                    }
                    let mut vertices = fixed.unwrap_or_else(|| mp.vertices_at(s.time));
                    if let Some(dof) = defocus {
                        for v in &mut vertices {
                            let shift = dof.circle_of_confusion(v.z) * s.dof_offset;
                            v.x -= shift.x;
                            v.y -= shift.y;
                        }
                    }
                    if let Some(z) = HitTestCache::new(&vertices).hit(s.position) {
                        // Shade where the hit lands on the undisplaced micropolygon.
                        let at = s.position - (vertices[0].truncate() - info.origin());
                        sink.record(s, (p * spp + i) as u32, z, info, at);
                    }
                }
            }
        }
    }
}
