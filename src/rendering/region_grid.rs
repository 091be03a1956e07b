/// Frame layout: the grid of regions, their scan order and geometry routing.
///
/// Routing rules:
/// 1. A surface goes to the first unprocessed region in scan order whose
///    sample area it overlaps. It is diced or split there.
/// 2. A micropolygon goes to every unprocessed region whose sample area
///    its (motion and defocus widened) bound overlaps.
/// 3. A surface found hidden in one region spills to its right neighbour,
///    then to the row below. Processed regions are never targets.
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::error::ConfigError;
use super::geometry::{Bound, Rect};
use super::micropolygon::Micropolygon;
use super::options::{DepthOfField, RenderOptions};
use super::region::Region;
use super::surface::Surface;

/// Order in which regions are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Row by row, left to right.
    #[default]
    Horizontal,
    /// Column by column, top to bottom.
    Vertical,
    /// Row by row, alternating direction.
    ZigZag,
    /// Outward spiral from the centre region.
    Circle,
    /// Seeded shuffle.
    Random,
}

impl ScanOrder {
    pub fn name(&self) -> &'static str {
        match self {
            ScanOrder::Horizontal => "horizontal",
            ScanOrder::Vertical => "vertical",
            ScanOrder::ZigZag => "zigzag",
            ScanOrder::Circle => "circle",
            ScanOrder::Random => "random",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "horizontal" => Ok(ScanOrder::Horizontal),
            "vertical" => Ok(ScanOrder::Vertical),
            "zigzag" => Ok(ScanOrder::ZigZag),
            "circle" | "spiral" => Ok(ScanOrder::Circle),
            "random" => Ok(ScanOrder::Random),
            _ => Err(ConfigError::UnknownScanOrder(name.to_string())),
        }
    }

    /// Region indices (row-major) in visiting order. Every region appears once.
    pub fn sequence(&self, cols: usize, rows: usize, seed: u64) -> Vec<usize> {
        let total = cols * rows;
        match self {
            ScanOrder::Horizontal => (0..total).collect(),
            ScanOrder::Vertical => (0..cols)
                .flat_map(|c| (0..rows).map(move |r| r * cols + c))
                .collect(),
            ScanOrder::ZigZag => (0..rows)
                .flat_map(|r| {
                    let row: Vec<usize> = if r % 2 == 0 {
                        (0..cols).collect()
                    } else {
                        (0..cols).rev().collect()
                    };
                    row.into_iter().map(move |c| r * cols + c)
                })
                .collect(),
            ScanOrder::Circle => spiral(cols, rows),
            ScanOrder::Random => {
                let mut order: Vec<usize> = (0..total).collect();
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                order.shuffle(&mut rng);
                order
            }
        }
    }
}

fn spiral(cols: usize, rows: usize) -> Vec<usize> {
    let total = cols * rows;
    let mut order = Vec::with_capacity(total);
    if total == 0 {
        return order;
    }
    let (mut c, mut r) = ((cols / 2) as i64, (rows / 2) as i64);
    let directions = [(1i64, 0i64), (0, 1), (-1, 0), (0, -1)];
    let mut visit = |c: i64, r: i64, order: &mut Vec<usize>| {
        if c >= 0 && r >= 0 && (c as usize) < cols && (r as usize) < rows {
            order.push(r as usize * cols + c as usize);
        }
    };
    visit(c, r, &mut order);
    let mut leg = 1;
    let mut dir = 0;
    while order.len() < total {
        for _ in 0..2 {
            let (dc, dr) = directions[dir % 4];
            for _ in 0..leg {
                c += dc;
                r += dr;
                visit(c, r, &mut order);
            }
            dir += 1;
        }
        leg += 1;
    }
    order
}

pub struct FrameRegions {
    cols: usize,
    rows: usize,
    region_size: (i32, i32),
    shift: (i32, i32),
    crop: Rect,
    regions: Vec<Region>,
    sequence: Vec<usize>,
    /// Scan position per region index.
    position: Vec<usize>,
    clipping: (f32, f32),
    depth_of_field: Option<DepthOfField>,
}

impl FrameRegions {
    /// Lay out the frame. `options` must already be validated.
    pub fn new(options: &RenderOptions) -> Self {
        let rw = options.region_width as i32;
        let rh = options.region_height as i32;
        let cols = options.width.div_ceil(options.region_width) as usize;
        let rows = options.height.div_ceil(options.region_height) as usize;
        let shift = options.filter_shift();
        let crop = options.crop_rect();
        let sample_limit = crop.expanded(shift.0, shift.1);

        let mut regions = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let x0 = col as i32 * rw;
                let y0 = row as i32 * rh;
                let tile = Rect::new(
                    x0,
                    y0,
                    (x0 + rw).min(options.width as i32),
                    (y0 + rh).min(options.height as i32),
                );
                let display = tile.intersect(&crop);
                let sample_area = if display.is_empty() {
                    Rect::default()
                } else {
                    display.expanded(shift.0, shift.1).intersect(&sample_limit)
                };
                regions.push(Region::new(col as u32, row as u32, display, sample_area));
            }
        }

        let sequence = options.scan_order.sequence(cols, rows, options.seed);
        let mut position = vec![0; sequence.len()];
        for (pos, &idx) in sequence.iter().enumerate() {
            position[idx] = pos;
        }

        Self {
            cols,
            rows,
            region_size: (rw, rh),
            shift,
            crop,
            regions,
            sequence,
            position,
            clipping: options.clipping,
            depth_of_field: options.depth_of_field,
        }
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[inline]
    pub fn crop(&self) -> Rect {
        self.crop
    }

    #[inline]
    pub fn filter_shift(&self) -> (i32, i32) {
        self.shift
    }

    #[inline]
    pub fn index_of(&self, col: usize, row: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    #[inline]
    pub(crate) fn region_mut(&mut self, index: usize) -> &mut Region {
        &mut self.regions[index]
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn scan_sequence(&self) -> &[usize] {
        &self.sequence
    }

    /// Region offset by `(dc, dr)` columns and rows, if inside the frame.
    pub fn neighbour(&self, index: usize, dc: i32, dr: i32) -> Option<usize> {
        let col = (index % self.cols) as i64 + dc as i64;
        let row = (index / self.cols) as i64 + dr as i64;
        if col < 0 || row < 0 || col >= self.cols as i64 || row >= self.rows as i64 {
            return None;
        }
        Some(self.index_of(col as usize, row as usize))
    }

    /// Unprocessed regions whose sample area overlaps `bound`, in index order.
    fn overlapping(&self, bound: &Bound) -> impl Iterator<Item = usize> + '_ {
        let (rw, rh) = self.region_size;
        let (sx, sy) = self.shift;
        let span = |lo: f32, hi: f32, size: i32, shift: i32, count: usize| {
            let first = ((lo - shift as f32) / size as f32).floor() as i64 - 1;
            let last = ((hi + shift as f32) / size as f32).floor() as i64 + 1;
            let first = first.clamp(0, count as i64) as usize;
            let last = (last + 1).clamp(0, count as i64) as usize;
            first..last
        };
        let cols = span(bound.min.x, bound.max.x, rw, sx, self.cols);
        let rows = span(bound.min.y, bound.max.y, rh, sy, self.rows);
        let bound = *bound;
        rows.flat_map(move |r| cols.clone().map(move |c| (c, r)))
            .map(move |(c, r)| self.index_of(c, r))
            .filter(move |&i| {
                let region = &self.regions[i];
                !region.is_processed() && region.sample_area().overlaps_bound(&bound)
            })
    }

    /// Queue a surface in the first region (in scan order) that can still
    /// sample it. Returns the chosen region, or `None` if it is off-screen.
    pub fn post_surface(&mut self, surface: Box<dyn Surface>) -> Option<usize> {
        let bound = self.surface_bound(&*surface);
        let target = self.overlapping(&bound).min_by_key(|&i| self.position[i])?;
        self.regions[target].push_surface(surface);
        Some(target)
    }

    /// Footprint a surface can reach once defocus is applied.
    pub fn surface_bound(&self, surface: &dyn Surface) -> Bound {
        self.defocused(surface.raster_bound())
    }

    /// Footprint a micropolygon can reach once defocus is applied.
    pub fn sampling_bound(&self, mp: &Micropolygon) -> Bound {
        self.defocused(*mp.bound())
    }

    fn defocused(&self, bound: Bound) -> Bound {
        match &self.depth_of_field {
            Some(dof) => {
                let (_, coc_max) = dof.coc_range(bound.min.z, bound.max.z);
                bound.expanded_2d(coc_max)
            }
            None => bound,
        }
    }

    /// Queue a micropolygon in every region that can still sample it.
    /// Returns how many regions took it.
    pub fn post_micropolygon(&mut self, mp: Micropolygon) -> usize {
        let bound = self.sampling_bound(&mp);
        let (near, far) = self.clipping;
        if bound.max.z < near || bound.min.z > far {
            return 0;
        }
        let targets: Vec<usize> = self.overlapping(&bound).collect();
        if targets.is_empty() {
            return 0;
        }
        let mp = Arc::new(mp);
        for &i in &targets {
            self.regions[i].push_micropolygon(Arc::clone(&mp));
        }
        targets.len()
    }

    /// Hand a surface that is hidden in region `from` to a region that may
    /// still see it: the right neighbour, then the row below, then any other
    /// unprocessed region it overlaps. Returns `Err(surface)` when nothing can.
    pub fn spill_culled_surface(
        &mut self,
        from: usize,
        surface: Box<dyn Surface>,
    ) -> Result<usize, Box<dyn Surface>> {
        let bound = self.surface_bound(&*surface);
        let display = self.regions[from].display();
        let accepts = |frame: &FrameRegions, i: usize| {
            let region = &frame.regions[i];
            !region.is_processed() && region.sample_area().overlaps_bound(&bound)
        };

        if bound.max.x >= display.xmax as f32 {
            if let Some(right) = self.neighbour(from, 1, 0) {
                if accepts(self, right) {
                    self.regions[right].push_surface(surface);
                    return Ok(right);
                }
            }
        }
        if bound.max.y >= display.ymax as f32 {
            let row = from / self.cols + 1;
            if row < self.rows {
                let col = (bound.min.x / self.region_size.0 as f32).floor().clamp(0.0, (self.cols - 1) as f32) as usize;
                let below = self.index_of(col, row);
                if accepts(self, below) {
                    self.regions[below].push_surface(surface);
                    return Ok(below);
                }
            }
        }
        let fallback = self
            .overlapping(&bound)
            .filter(|&i| i != from)
            .min_by_key(|&i| self.position[i]);
        match fallback {
            Some(i) => {
                self.regions[i].push_surface(surface);
                Ok(i)
            }
            None => Err(surface),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::region::RegionState;
    use crate::rendering::sample_store::Color;
    use crate::rendering::surface::BilinearPatch;

    fn is_permutation(seq: &[usize], total: usize) -> bool {
        let mut seen = vec![false; total];
        for &i in seq {
            if i >= total || seen[i] {
                return false;
            }
            seen[i] = true;
        }
        seq.len() == total
    }

    #[test]
    fn test_every_scan_order_visits_each_region_once() {
        for order in [
            ScanOrder::Horizontal,
            ScanOrder::Vertical,
            ScanOrder::ZigZag,
            ScanOrder::Circle,
            ScanOrder::Random,
        ] {
            for (cols, rows) in [(1, 1), (5, 3), (2, 7), (4, 4)] {
                let seq = order.sequence(cols, rows, 11);
                assert!(is_permutation(&seq, cols * rows), "{} {}x{}", order.name(), cols, rows);
            }
        }
    }

    #[test]
    fn test_scan_order_shapes() {
        assert_eq!(ScanOrder::Vertical.sequence(2, 2, 0), vec![0, 2, 1, 3]);
        assert_eq!(ScanOrder::ZigZag.sequence(3, 2, 0), vec![0, 1, 2, 5, 4, 3]);
        assert_eq!(ScanOrder::Circle.sequence(3, 3, 0)[0], 4);
        assert_eq!(ScanOrder::from_name("spiral"), Ok(ScanOrder::Circle));
        assert!(ScanOrder::from_name("diagonal").is_err());
    }

    #[test]
    fn test_layout_areas() {
        let mut opts = RenderOptions::new(40, 20);
        opts.filter_width = (3.0, 3.0);
        let frame = FrameRegions::new(&opts);
        assert_eq!((frame.cols(), frame.rows()), (3, 2));
        let first = frame.region(0);
        assert_eq!(first.display(), Rect::new(0, 0, 16, 16));
        assert_eq!(first.sample_area(), Rect::new(-1, -1, 17, 17));
        let last = frame.region(5);
        assert_eq!(last.display(), Rect::new(32, 16, 40, 20));
        assert_eq!(last.sample_area(), Rect::new(31, 15, 41, 21));
    }

    #[test]
    fn test_crop_clamps_sample_area() {
        let mut opts = RenderOptions::new(32, 32);
        opts.crop_window = [0.25, 1.0, 0.0, 1.0];
        let frame = FrameRegions::new(&opts);
        assert_eq!(frame.region(0).display(), Rect::new(8, 0, 16, 16));
        assert_eq!(frame.region(0).sample_area(), Rect::new(7, -1, 17, 17));
    }

    #[test]
    fn test_post_surface_picks_first_in_scan_order() {
        let mut opts = RenderOptions::new(32, 32);
        opts.scan_order = ScanOrder::Vertical;
        let mut frame = FrameRegions::new(&opts);
        let patch = BilinearPatch::rect(14.0, 20.0, 20.0, 24.0, 1.0, Color::ONE);
        // Touches regions 2 and 3; vertical order visits 2 (col 0, row 1) first.
        assert_eq!(frame.post_surface(Box::new(patch)), Some(2));
        assert_eq!(frame.region(2).state(), RegionState::Populated);
        let offscreen = BilinearPatch::rect(100.0, 100.0, 110.0, 110.0, 1.0, Color::ONE);
        assert_eq!(frame.post_surface(Box::new(offscreen)), None);
    }

    #[test]
    fn test_defocused_surface_posts_where_its_blur_lands() {
        use crate::rendering::options::DepthOfField;
        use glam::Vec2;
        let mut opts = RenderOptions::new(32, 16);
        opts.filter_width = (2.0, 2.0);
        let patch = || Box::new(BilinearPatch::rect(18.0, 0.0, 30.0, 16.0, 4.0, Color::ONE));

        let mut sharp = FrameRegions::new(&opts);
        assert_eq!(sharp.post_surface(patch()), Some(1));

        opts.depth_of_field = Some(DepthOfField {
            coc_scale: Vec2::splat(40.0),
            focal_distance: 8.0,
        });
        let mut blurred = FrameRegions::new(&opts);
        let bound = blurred.surface_bound(&*patch());
        assert!(bound.min.x < 17.0, "blur reaches into region 0: {:?}", bound.min);
        assert_eq!(blurred.post_surface(patch()), Some(0));

        // Hidden in region 0, the blurred bound still spills right.
        assert_eq!(blurred.spill_culled_surface(0, patch()).ok(), Some(1));
    }

    #[test]
    fn test_spill_prefers_right_then_below() {
        let opts = RenderOptions::new(48, 32);
        let mut frame = FrameRegions::new(&opts);
        let wide = BilinearPatch::rect(4.0, 4.0, 20.0, 8.0, 1.0, Color::ONE);
        assert_eq!(frame.spill_culled_surface(0, Box::new(wide)).ok(), Some(1));

        let tall = BilinearPatch::rect(4.0, 4.0, 8.0, 20.0, 1.0, Color::ONE);
        assert_eq!(frame.spill_culled_surface(0, Box::new(tall)).ok(), Some(3));

        frame.region_mut(1).finish();
        let both = BilinearPatch::rect(4.0, 4.0, 20.0, 20.0, 1.0, Color::ONE);
        assert_eq!(
            frame.spill_culled_surface(0, Box::new(both)).ok(),
            Some(3),
            "processed right neighbour is skipped"
        );

        let inside = BilinearPatch::rect(4.0, 4.0, 8.0, 8.0, 1.0, Color::ONE);
        assert!(frame.spill_culled_surface(0, Box::new(inside)).is_err());
    }

    #[test]
    fn test_post_micropolygon_reaches_every_overlapping_region() {
        use crate::rendering::micropolygon::{GridInfo, MicropolygonGrid};
        use glam::Vec3;
        let opts = RenderOptions::new(32, 32);
        let mut frame = FrameRegions::new(&opts);
        let grid = MicropolygonGrid::new(
            2,
            2,
            vec![
                Vec3::new(15.5, 15.5, 1.0),
                Vec3::new(16.5, 15.5, 1.0),
                Vec3::new(15.5, 16.5, 1.0),
                Vec3::new(16.5, 16.5, 1.0),
            ],
            vec![Color::ONE; 4],
            vec![Color::ONE; 4],
            GridInfo::default(),
        );
        let mp = grid.into_micropolygons().remove(0);
        assert_eq!(frame.post_micropolygon(mp), 4);
        frame.region_mut(0).finish();
        let grid = MicropolygonGrid::new(
            2,
            2,
            vec![
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(2.0, 1.0, 1.0),
                Vec3::new(1.0, 2.0, 1.0),
                Vec3::new(2.0, 2.0, 1.0),
            ],
            vec![Color::ONE; 4],
            vec![Color::ONE; 4],
            GridInfo::default(),
        );
        assert_eq!(frame.post_micropolygon(grid.into_micropolygons().remove(0)), 0);
    }
}
