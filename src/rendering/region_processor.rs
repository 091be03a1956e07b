/// Per-region processing context.
///
/// One processor is reused for every region of a frame. For the region it
/// is working on it owns:
/// - the subsample pool over the data area (display area plus filter shift)
/// - the occlusion tree over the active sampling area
/// - the output channel buffer over the display area
/// - the work counters, drained by the renderer after each region
///
/// Stages per region: prepare, process (surfaces and micropolygons until both
/// queues are dry), combine, filter, export border caches, finish.
use std::sync::Arc;

use glam::Vec2;
use rayon::prelude::*;

use super::channel_buffer::ChannelBuffer;
use super::error::HiderResult;
use super::geometry::Rect;
use super::occlusion::OcclusionTree;
use super::options::RenderOptions;
use super::reconstruction::{Imager, Reconstruction};
use super::region::{CacheSegment, CacheSide, RegionState};
use super::region_grid::FrameRegions;
use super::renderer::StopFlag;
use super::sample_store::{CombineSettings, CsgEvaluator};
use super::subsample::{dof_bounds, PixelSamples, SampleLayout, SamplePool};
use super::surface::Surface;
use crate::perf::RenderStats;
use crate::perf_scope;

/// What happened to a region handed to `render_region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    /// Filtered; the channel buffer holds its display area.
    Rendered,
    /// Nothing to output (display area outside the crop window).
    Skipped,
    /// The stop flag was raised before the region finished.
    Stopped,
}

/// For each axial neighbour: `(dc, dr)` and the segments it receives as
/// `(ours, theirs)`. The axial strip comes first, then its two corners.
const HANDOFFS: [((i32, i32), [(CacheSide, CacheSide); 3]); 4] = [
    (
        (-1, 0),
        [
            (CacheSide::Left, CacheSide::Right),
            (CacheSide::TopLeft, CacheSide::TopRight),
            (CacheSide::BottomLeft, CacheSide::BottomRight),
        ],
    ),
    (
        (1, 0),
        [
            (CacheSide::Right, CacheSide::Left),
            (CacheSide::TopRight, CacheSide::TopLeft),
            (CacheSide::BottomRight, CacheSide::BottomLeft),
        ],
    ),
    (
        (0, -1),
        [
            (CacheSide::Top, CacheSide::Bottom),
            (CacheSide::TopLeft, CacheSide::BottomLeft),
            (CacheSide::TopRight, CacheSide::BottomRight),
        ],
    ),
    (
        (0, 1),
        [
            (CacheSide::Bottom, CacheSide::Top),
            (CacheSide::BottomLeft, CacheSide::TopLeft),
            (CacheSide::BottomRight, CacheSide::TopRight),
        ],
    ),
];

pub struct RegionProcessor {
    pub(super) options: RenderOptions,
    pub(super) layout: SampleLayout,
    pub(super) dof_bounds: Vec<(Vec2, Vec2)>,
    reconstruction: Reconstruction,
    combine_settings: CombineSettings,
    pub(super) pool: SamplePool,
    pub(super) tree: OcclusionTree,
    display: Rect,
    sample_area: Rect,
    pub(super) active_area: Rect,
    buffer: ChannelBuffer,
    pub(super) stats: RenderStats,
    tree_samples: Vec<(u32, Vec2)>,
}

impl RegionProcessor {
    /// `options` must already be validated.
    pub fn new(options: &RenderOptions) -> Self {
        let (sx, sy) = options.pixel_samples;
        Self {
            layout: SampleLayout {
                samples_x: sx as usize,
                samples_y: sy as usize,
                shutter_open: options.shutter.0,
                shutter_close: options.shutter.1,
                depth_of_field: options.depth_of_field.is_some(),
                seed: options.seed,
            },
            dof_bounds: dof_bounds(sx as usize, sy as usize),
            reconstruction: Reconstruction::new(options),
            combine_settings: CombineSettings {
                depth_filter: options.depth_filter,
                z_threshold: options.z_threshold,
            },
            pool: SamplePool::new(),
            tree: OcclusionTree::new(),
            display: Rect::default(),
            sample_area: Rect::default(),
            active_area: Rect::default(),
            buffer: ChannelBuffer::new(Rect::default(), &options.aovs),
            stats: RenderStats::new(),
            tree_samples: Vec::new(),
            options: options.clone(),
        }
    }

    #[inline]
    pub fn channel_buffer(&self) -> &ChannelBuffer {
        &self.buffer
    }

    #[inline]
    pub fn pool(&self) -> &SamplePool {
        &self.pool
    }

    #[inline]
    pub fn tree(&self) -> &OcclusionTree {
        &self.tree
    }

    #[inline]
    pub fn display_area(&self) -> Rect {
        self.display
    }

    #[inline]
    pub fn sample_area(&self) -> Rect {
        self.sample_area
    }

    /// Sample area minus the border strips received from finished neighbours.
    #[inline]
    pub fn active_area(&self) -> Rect {
        self.active_area
    }

    #[inline]
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn take_stats(&mut self) -> RenderStats {
        std::mem::take(&mut self.stats)
    }

    /// Jitter the data area, splice in received border caches and build the
    /// occlusion tree over what is left to sample.
    pub fn prepare(&mut self, frame: &mut FrameRegions, index: usize) -> HiderResult<()> {
        perf_scope!("region.prepare");
        let region = frame.region(index);
        self.display = region.display();
        self.sample_area = region.sample_area();
        let (shift_x, shift_y) = frame.filter_shift();
        let data = self.display.expanded(shift_x, shift_y);
        self.pool.jitter(data, &self.layout)?;

        let mut active = self.sample_area;
        for side in CacheSide::ALL {
            let Some(segment) = region.cache_segment(side) else {
                continue;
            };
            self.pool.put_rect(segment.rect, &segment.pixels);
            match side {
                CacheSide::Left => active.xmin = self.sample_area.xmin + 2 * shift_x,
                CacheSide::Right => active.xmax = self.sample_area.xmax - 2 * shift_x,
                CacheSide::Top => active.ymin = self.sample_area.ymin + 2 * shift_y,
                CacheSide::Bottom => active.ymax = self.sample_area.ymax - 2 * shift_y,
                _ => {}
            }
        }
        self.active_area = active;

        let spp = self.layout.samples_per_pixel();
        self.tree_samples.clear();
        for y in active.ymin..active.ymax {
            for x in active.xmin..active.xmax {
                let p = self.pool.index(x, y);
                for (i, s) in self.pool.pixels()[p].samples().iter().enumerate() {
                    self.tree_samples.push(((p * spp + i) as u32, s.position));
                }
            }
        }
        self.tree.build(&self.tree_samples, data.area() * spp);
        self.buffer.resize(self.display);

        frame.region_mut(index).advance(RegionState::Rasterizing);
        Ok(())
    }

    /// Drain the region's queues. Micropolygons are sampled as soon as they
    /// arrive so later surfaces test against the freshest occlusion depths.
    /// Returns false when stopped early.
    pub fn process(&mut self, frame: &mut FrameRegions, index: usize, stop: &StopFlag) -> bool {
        perf_scope!("region.process");
        loop {
            if stop.is_stopped() {
                return false;
            }
            if let Some(mp) = frame.region_mut(index).pop_micropolygon() {
                self.render_micropolygon(&mp);
                continue;
            }
            let Some(surface) = frame.region_mut(index).pop_surface() else {
                return true;
            };
            self.process_surface(frame, index, surface);
        }
    }

    fn process_surface(&mut self, frame: &mut FrameRegions, index: usize, surface: Box<dyn Surface>) {
        let bound = frame.surface_bound(&*surface);
        if !self.options.depth_only && !surface.is_csg() && self.tree.can_cull(&bound) {
            self.stats.surfaces_culled += 1;
            match frame.spill_culled_surface(index, surface) {
                Ok(_) => self.stats.surfaces_spilled += 1,
                Err(surface) => log::info!("surface '{}' is hidden everywhere it can still be sampled", surface.name()),
            }
            return;
        }

        if surface.diceable() {
            self.stats.surfaces_diced += 1;
            let Some(grid) = surface.dice() else {
                return;
            };
            for mp in grid.into_micropolygons() {
                if frame.post_micropolygon(mp) > 0 {
                    self.stats.micropolygons_posted += 1;
                }
            }
        } else if surface.crosses_eye_plane() && surface.eye_splits() >= self.options.eye_split_limit {
            log::warn!(
                "surface '{}' still crosses the eye plane after {} splits, discarding",
                surface.name(),
                surface.eye_splits()
            );
            self.stats.surfaces_discarded += 1;
        } else {
            self.stats.surfaces_split += 1;
            for part in surface.split() {
                if frame.post_surface(part).is_some() {
                    self.stats.surfaces_posted += 1;
                }
            }
        }
    }

    /// Resolve every hit list in the pool.
    pub fn combine(&mut self, csg: Option<&dyn CsgEvaluator>) {
        perf_scope!("region.combine");
        let settings = self.combine_settings;
        self.pool.pixels_mut().par_iter_mut().for_each(|px| {
            for s in px.samples_mut() {
                s.hits.combine(&settings, csg);
            }
        });
    }

    /// Filter the pool into the channel buffer. Reads the pool only.
    pub fn filter(&mut self, imager: Option<&dyn Imager>) {
        perf_scope!("region.filter");
        self.reconstruction
            .filter(&self.pool, self.sample_area, imager, &mut self.buffer);
    }

    /// Hand border strips to every unprocessed axial neighbour.
    pub fn export_caches(&mut self, frame: &mut FrameRegions, index: usize) {
        let (shift_x, shift_y) = frame.filter_shift();
        if shift_x == 0 && shift_y == 0 {
            return;
        }
        let data = self.pool.area();
        let (ox, oy) = (2 * shift_x, 2 * shift_y);
        let mut built: [Option<Arc<CacheSegment>>; 8] = Default::default();

        for ((dc, dr), pairs) in HANDOFFS {
            let Some(neighbour) = frame.neighbour(index, dc, dr) else {
                continue;
            };
            if frame.region(neighbour).is_processed() {
                continue;
            }
            for (i, (ours, theirs)) in pairs.into_iter().enumerate() {
                if i > 0 && frame.region(neighbour).cache_segment(theirs).is_some() {
                    continue;
                }
                let segment = built[ours.index()]
                    .get_or_insert_with(|| {
                        let local = ours.local_rect(data.width(), data.height(), ox, oy);
                        let rect = Rect::new(
                            data.xmin + local.xmin,
                            data.ymin + local.ymin,
                            data.xmin + local.xmax,
                            data.ymin + local.ymax,
                        );
                        let (rect, pixels) = self.pool.copy_rect(rect);
                        Arc::new(CacheSegment { rect, pixels })
                    })
                    .clone();
                frame.region_mut(neighbour).set_cache_segment(theirs, segment);
            }
        }
    }

    /// Run one region start to finish. On `Rendered` the channel buffer holds
    /// the region's output.
    pub fn render_region(
        &mut self,
        frame: &mut FrameRegions,
        index: usize,
        imager: Option<&dyn Imager>,
        csg: Option<&dyn CsgEvaluator>,
        stop: &StopFlag,
    ) -> HiderResult<RegionOutcome> {
        let region = frame.region(index);
        let (col, row) = (region.col(), region.row());
        if region.display().is_empty() {
            log::debug!("region ({}, {}) is outside the crop window", col, row);
            frame.region_mut(index).finish();
            self.stats.regions_skipped += 1;
            return Ok(RegionOutcome::Skipped);
        }

        perf_scope!("region");
        log::debug!(
            "region ({}, {}) start: {} surfaces, {} micropolygons queued",
            col,
            row,
            region.pending_surfaces(),
            region.pending_micropolygons()
        );
        self.prepare(frame, index)?;
        if !self.process(frame, index, stop) {
            log::debug!("region ({}, {}) stopped", col, row);
            return Ok(RegionOutcome::Stopped);
        }
        self.combine(csg);
        frame.region_mut(index).advance(RegionState::Combined);
        self.filter(imager);
        frame.region_mut(index).advance(RegionState::Filtered);
        self.export_caches(frame, index);
        frame.region_mut(index).finish();
        self.stats.regions_rendered += 1;
        log::debug!("region ({}, {}) done", col, row);
        Ok(RegionOutcome::Rendered)
    }

    /// Pixels of the pool, row-major over `pool().area()`.
    pub fn pixels(&self) -> &[PixelSamples] {
        self.pool.pixels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::filter::FilterKind;
    use crate::rendering::region_grid::ScanOrder;
    use crate::rendering::sample_store::Color;
    use crate::rendering::surface::BilinearPatch;

    fn options() -> RenderOptions {
        let mut opts = RenderOptions::new(32, 16);
        opts.filter = FilterKind::Box;
        opts.filter_width = (2.0, 2.0);
        opts
    }

    #[test]
    fn test_prepare_areas_and_tree() {
        let opts = options();
        let mut frame = FrameRegions::new(&opts);
        let mut processor = RegionProcessor::new(&opts);
        processor.prepare(&mut frame, 0).expect("prepare");
        assert_eq!(processor.display_area(), Rect::new(0, 0, 16, 16));
        assert_eq!(processor.pool().area(), Rect::new(-1, -1, 17, 17));
        assert_eq!(processor.sample_area(), Rect::new(-1, -1, 17, 17));
        assert_eq!(processor.active_area(), processor.sample_area());
        // 18 x 18 pixels, 4 samples each, one leaf per sample.
        let leaves = processor.tree().nodes().iter().filter(|n| n.is_leaf()).count();
        assert_eq!(leaves, 18 * 18 * 4);
        assert_eq!(frame.region(0).state(), RegionState::Rasterizing);
    }

    #[test]
    fn test_every_sample_lies_in_the_sample_area() {
        let opts = options();
        let mut frame = FrameRegions::new(&opts);
        let mut processor = RegionProcessor::new(&opts);
        processor.prepare(&mut frame, 1).expect("prepare");
        let area = processor.sample_area();
        let pool = processor.pool();
        for y in area.ymin..area.ymax {
            for x in area.xmin..area.xmax {
                for s in pool.pixel(x, y).samples() {
                    assert!(s.position.x >= area.xmin as f32 && s.position.x < area.xmax as f32);
                    assert!(s.position.y >= area.ymin as f32 && s.position.y < area.ymax as f32);
                }
            }
        }
    }

    #[test]
    fn test_cache_handoff_shrinks_active_area() {
        let opts = options();
        let mut frame = FrameRegions::new(&opts);
        let mut processor = RegionProcessor::new(&opts);
        let stop = StopFlag::new();
        let outcome = processor.render_region(&mut frame, 0, None, None, &stop).expect("render");
        assert_eq!(outcome, RegionOutcome::Rendered);
        assert!(frame.region(0).is_processed());

        let right = frame.region(1);
        let left = right.cache_segment(CacheSide::Left).expect("left strip handed over");
        assert_eq!(left.rect, Rect::new(15, 1, 17, 15));
        assert!(right.cache_segment(CacheSide::TopLeft).is_some());
        assert!(right.cache_segment(CacheSide::BottomLeft).is_some());
        assert!(right.cache_segment(CacheSide::Right).is_none());

        processor.prepare(&mut frame, 1).expect("prepare");
        assert_eq!(processor.sample_area(), Rect::new(15, -1, 33, 17));
        assert_eq!(processor.active_area(), Rect::new(17, -1, 33, 17));
    }

    #[test]
    fn test_culled_surface_spills_or_drops() {
        let mut opts = options();
        opts.scan_order = ScanOrder::Horizontal;
        let mut frame = FrameRegions::new(&opts);
        frame.post_surface(Box::new(BilinearPatch::rect(-2.0, -2.0, 40.0, 20.0, 1.0, Color::ONE)));
        frame.post_surface(Box::new(BilinearPatch::rect(2.0, 2.0, 20.0, 6.0, 5.0, Color::ONE)));
        frame.post_surface(Box::new(BilinearPatch::rect(2.0, 8.0, 6.0, 12.0, 5.0, Color::ONE)));

        let mut processor = RegionProcessor::new(&opts);
        processor
            .render_region(&mut frame, 0, None, None, &StopFlag::new())
            .expect("render");
        let stats = processor.take_stats();
        assert_eq!(stats.surfaces_culled, 2);
        assert_eq!(stats.surfaces_spilled, 1, "only the wide patch reaches another region");
        assert!(stats.hits_stored > 0);
        assert!(frame.region(1).pending_surfaces() >= 1);
    }

    #[test]
    fn test_stop_flag_leaves_region_unfinished() {
        let opts = options();
        let mut frame = FrameRegions::new(&opts);
        frame.post_surface(Box::new(BilinearPatch::rect(0.0, 0.0, 8.0, 8.0, 1.0, Color::ONE)));
        let stop = StopFlag::new();
        stop.stop();
        let mut processor = RegionProcessor::new(&opts);
        let outcome = processor.render_region(&mut frame, 0, None, None, &stop).expect("render");
        assert_eq!(outcome, RegionOutcome::Stopped);
        assert!(!frame.region(0).is_processed());
    }

    #[test]
    fn test_eye_plane_discard() {
        let mut opts = options();
        opts.eye_split_limit = 2;
        let mut frame = FrameRegions::new(&opts);
        let patch = BilinearPatch::new(
            [
                glam::Vec3::new(2.0, 2.0, -1.0),
                glam::Vec3::new(6.0, 2.0, 1.0),
                glam::Vec3::new(2.0, 6.0, -1.0),
                glam::Vec3::new(6.0, 6.0, 1.0),
            ],
            Color::ONE,
        );
        frame.post_surface(Box::new(patch));
        let mut processor = RegionProcessor::new(&opts);
        processor
            .render_region(&mut frame, 0, None, None, &StopFlag::new())
            .expect("render");
        let stats = processor.take_stats();
        assert!(stats.surfaces_discarded > 0);
        assert!(stats.surfaces_split > 0);
    }
}
