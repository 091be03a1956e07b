/// Raster-space rectangles and bounds shared by the hider stages.
///
/// `Rect` is an integer pixel rectangle, half-open on its max edges.
/// `Bound` is a floating-point 3D box in raster space: x/y in pixels and
/// z as camera depth.
use glam::{Vec2, Vec3};

/// Half-open pixel rectangle `[xmin, xmax) x [ymin, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl Rect {
    #[inline]
    pub const fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    #[inline]
    pub fn width(&self) -> i32 {
        (self.xmax - self.xmin).max(0)
    }

    #[inline]
    pub fn height(&self) -> i32 {
        (self.ymax - self.ymin).max(0)
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.xmin && x < self.xmax && y >= self.ymin && y < self.ymax
    }

    /// Grow by `dx`/`dy` on every side (negative values shrink).
    #[inline]
    pub fn expanded(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.xmin - dx, self.ymin - dy, self.xmax + dx, self.ymax + dy)
    }

    #[inline]
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect::new(
            self.xmin.max(other.xmin),
            self.ymin.max(other.ymin),
            self.xmax.min(other.xmax),
            self.ymax.min(other.ymax),
        )
    }

    /// True when the closed raster bound `[bmin, bmax]` touches any sample
    /// position inside this rectangle.
    #[inline]
    pub fn overlaps_bound(&self, bound: &Bound) -> bool {
        !self.is_empty()
            && bound.max.x >= self.xmin as f32
            && bound.min.x < self.xmax as f32
            && bound.max.y >= self.ymin as f32
            && bound.min.y < self.ymax as f32
    }
}

/// Axis-aligned raster-space box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bound {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bound {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that any `encapsulate` call replaces.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(-f32::MAX),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bound = Self::empty();
        for p in points {
            bound.encapsulate(p);
        }
        bound
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn encapsulate(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn union(&self, other: &Bound) -> Bound {
        Bound::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Point-in-footprint test on x/y, inclusive on every edge.
    #[inline]
    pub fn contains_2d(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Translate the footprint, leaving depth untouched.
    #[inline]
    pub fn offset_2d(&self, lo: Vec2, hi: Vec2) -> Bound {
        Bound::new(
            Vec3::new(self.min.x + lo.x, self.min.y + lo.y, self.min.z),
            Vec3::new(self.max.x + hi.x, self.max.y + hi.y, self.max.z),
        )
    }

    /// Grow the footprint by `amount` on every side.
    #[inline]
    pub fn expanded_2d(&self, amount: Vec2) -> Bound {
        self.offset_2d(-amount, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection_and_area() {
        let a = Rect::new(0, 0, 16, 16);
        let b = Rect::new(8, -4, 32, 8);
        let c = a.intersect(&b);
        assert_eq!(c, Rect::new(8, 0, 16, 8));
        assert_eq!(c.area(), 64);
        assert!(a.intersect(&Rect::new(20, 20, 30, 30)).is_empty());
    }

    #[test]
    fn test_rect_overlaps_bound_is_half_open() {
        let r = Rect::new(0, 0, 4, 4);
        let touching_right = Bound::new(Vec3::new(4.0, 1.0, 1.0), Vec3::new(5.0, 2.0, 1.0));
        let touching_left = Bound::new(Vec3::new(-2.0, 1.0, 1.0), Vec3::new(0.0, 2.0, 1.0));
        assert!(!r.overlaps_bound(&touching_right), "max edge is exclusive");
        assert!(r.overlaps_bound(&touching_left), "min edge is inclusive");
    }

    #[test]
    fn test_bound_from_points() {
        let b = Bound::from_points([
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-1.0, 5.0, 0.5),
            Vec3::new(0.0, 0.0, 9.0),
        ]);
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, 0.5));
        assert_eq!(b.max, Vec3::new(1.0, 5.0, 9.0));
        assert!(b.contains_2d(Vec2::new(1.0, 5.0)));
        assert!(!b.contains_2d(Vec2::new(1.01, 5.0)));
        assert!(Bound::empty().is_empty());
    }
}
