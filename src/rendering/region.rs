/// A region ("bucket") of the image and its pending work.
///
/// A region owns:
/// - its display rectangle and filter-expanded sample area
/// - surfaces waiting to be diced or split, nearest first
/// - micropolygons already diced into it, in arrival order
/// - border-cache segments received from finished neighbours
///
/// Only `FrameRegions` pushes geometry, and it never targets a processed region.
use std::collections::VecDeque;
use std::sync::Arc;

use super::geometry::Rect;
use super::micropolygon::Micropolygon;
use super::subsample::PixelSamples;
use super::surface::Surface;

/// Lifecycle of a region. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionState {
    Empty,
    Populated,
    Rasterizing,
    Combined,
    Filtered,
    Processed,
}

/// One of the eight border strips of a region's data area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSide {
    TopLeft,
    Top,
    TopRight,
    Left,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl CacheSide {
    pub const ALL: [CacheSide; 8] = [
        CacheSide::TopLeft,
        CacheSide::Top,
        CacheSide::TopRight,
        CacheSide::Left,
        CacheSide::Right,
        CacheSide::BottomLeft,
        CacheSide::Bottom,
        CacheSide::BottomRight,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Strip of a `width x height` data area, in data-local pixels, for a
    /// border overlap of `ox` by `oy` pixels.
    pub fn local_rect(self, width: i32, height: i32, ox: i32, oy: i32) -> Rect {
        let (w, h) = (width, height);
        match self {
            CacheSide::TopLeft => Rect::new(0, 0, ox, oy),
            CacheSide::Top => Rect::new(ox, 0, w - ox, oy),
            CacheSide::TopRight => Rect::new(w - ox, 0, w, oy),
            CacheSide::Left => Rect::new(0, oy, ox, h - oy),
            CacheSide::Right => Rect::new(w - ox, oy, w, h - oy),
            CacheSide::BottomLeft => Rect::new(0, h - oy, ox, h),
            CacheSide::Bottom => Rect::new(ox, h - oy, w - ox, h),
            CacheSide::BottomRight => Rect::new(w - ox, h - oy, w, h),
        }
    }
}

/// Pixels of one border strip, copied out of a finished region.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSegment {
    /// Absolute raster rectangle the pixels cover.
    pub rect: Rect,
    /// Row-major over `rect`.
    pub pixels: Vec<PixelSamples>,
}

impl CacheSegment {
    pub fn has_hits(&self) -> bool {
        self.pixels.iter().any(|p| p.has_hits())
    }
}

pub struct Region {
    col: u32,
    row: u32,
    display: Rect,
    sample_area: Rect,
    state: RegionState,
    /// Sorted by nearest depth, farthest first, so `pop` yields the nearest.
    surfaces: Vec<(f32, Box<dyn Surface>)>,
    micropolygons: VecDeque<Arc<Micropolygon>>,
    cache: [Option<Arc<CacheSegment>>; 8],
}

impl Region {
    pub fn new(col: u32, row: u32, display: Rect, sample_area: Rect) -> Self {
        Self {
            col,
            row,
            display,
            sample_area,
            state: RegionState::Empty,
            surfaces: Vec::new(),
            micropolygons: VecDeque::new(),
            cache: Default::default(),
        }
    }

    #[inline]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[inline]
    pub fn row(&self) -> u32 {
        self.row
    }

    /// Exact pixels this region outputs.
    #[inline]
    pub fn display(&self) -> Rect {
        self.display
    }

    /// Display area grown by the filter overlap, clamped to the crop window.
    #[inline]
    pub fn sample_area(&self) -> Rect {
        self.sample_area
    }

    #[inline]
    pub fn state(&self) -> RegionState {
        self.state
    }

    #[inline]
    pub fn is_processed(&self) -> bool {
        self.state == RegionState::Processed
    }

    pub fn pending_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn pending_micropolygons(&self) -> usize {
        self.micropolygons.len()
    }

    pub fn cache_segment(&self, side: CacheSide) -> Option<&Arc<CacheSegment>> {
        self.cache[side.index()].as_ref()
    }

    pub(crate) fn advance(&mut self, next: RegionState) {
        debug_assert!(next > self.state, "region {:?} cannot go from {:?} to {:?}", (self.col, self.row), self.state, next);
        self.state = next;
    }

    fn mark_populated(&mut self) {
        debug_assert!(!self.is_processed(), "geometry pushed into processed region {:?}", (self.col, self.row));
        if self.state == RegionState::Empty {
            self.state = RegionState::Populated;
        }
    }

    pub(crate) fn push_surface(&mut self, surface: Box<dyn Surface>) {
        self.mark_populated();
        let key = surface.raster_bound().min.z;
        let at = self.surfaces.partition_point(|(k, _)| *k >= key);
        self.surfaces.insert(at, (key, surface));
    }

    pub(crate) fn push_micropolygon(&mut self, mp: Arc<Micropolygon>) {
        self.mark_populated();
        self.micropolygons.push_back(mp);
    }

    pub(crate) fn pop_surface(&mut self) -> Option<Box<dyn Surface>> {
        self.surfaces.pop().map(|(_, s)| s)
    }

    pub(crate) fn pop_micropolygon(&mut self) -> Option<Arc<Micropolygon>> {
        self.micropolygons.pop_front()
    }

    pub(crate) fn has_cache_segment(&self, side: CacheSide) -> bool {
        self.cache[side.index()].is_some()
    }

    pub(crate) fn set_cache_segment(&mut self, side: CacheSide, segment: Arc<CacheSegment>) {
        debug_assert!(!self.is_processed(), "cache pushed into processed region");
        self.cache[side.index()] = Some(segment);
    }

    /// Mark processed and release everything still queued.
    pub(crate) fn finish(&mut self) {
        self.state = RegionState::Processed;
        self.surfaces.clear();
        self.micropolygons.clear();
        self.cache = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::sample_store::Color;
    use crate::rendering::surface::BilinearPatch;

    #[test]
    fn test_cache_rects_tile_the_border() {
        let (w, h, o) = (20, 18, 2);
        let mut covered = 0;
        for side in CacheSide::ALL {
            covered += side.local_rect(w, h, o, o).area();
        }
        let interior = ((w - 2 * o) * (h - 2 * o)) as usize;
        assert_eq!(covered + interior, (w * h) as usize);
        assert_eq!(CacheSide::Right.local_rect(w, h, o, o), Rect::new(18, 2, 20, 16));
    }

    #[test]
    fn test_surfaces_pop_nearest_first() {
        let mut region = Region::new(0, 0, Rect::new(0, 0, 16, 16), Rect::new(-1, -1, 17, 17));
        assert_eq!(region.state(), RegionState::Empty);
        for depth in [5.0, 1.0, 3.0] {
            region.push_surface(Box::new(BilinearPatch::rect(0.0, 0.0, 4.0, 4.0, depth, Color::ONE)));
        }
        assert_eq!(region.state(), RegionState::Populated);
        let order: Vec<f32> = std::iter::from_fn(|| region.pop_surface())
            .map(|s| s.raster_bound().min.z)
            .collect();
        assert_eq!(order, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_finish_releases_work() {
        let mut region = Region::new(1, 2, Rect::new(16, 32, 32, 48), Rect::new(15, 31, 33, 49));
        region.push_surface(Box::new(BilinearPatch::rect(16.0, 32.0, 20.0, 36.0, 1.0, Color::ONE)));
        region.advance(RegionState::Rasterizing);
        region.finish();
        assert!(region.is_processed());
        assert_eq!(region.pending_surfaces(), 0);
    }
}
