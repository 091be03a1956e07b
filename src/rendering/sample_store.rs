/// Hit storage for a single subsample and the combine step.
///
/// Each subsample is in exactly one of three states:
/// - `Empty`: nothing has hit it yet
/// - `Occluder`: a single opaque, non-CSG, non-matte hit (the fast path)
/// - `List`: depth-ordered hits, needed for transparency, CSG, mattes and
///   depth-only output
///
/// The state is chosen once per store from the candidate's flags. Combine
/// reduces each list to a single effective hit; an occluder is already its
/// own effective hit.
use glam::Vec3;

use super::error::ConfigError;

pub type Color = Vec3;

/// Depth reported for a pixel or subsample that recorded nothing.
pub const NO_SAMPLE_DEPTH: f32 = f32::INFINITY;

/// Solid membership of a CSG primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CsgTag {
    pub solid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitFlags {
    /// Fully opaque in every channel.
    pub occludes: bool,
    /// Holdout: contributes no color or alpha but still hides what is behind.
    pub matte: bool,
}

/// One micropolygon/subsample intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    pub depth: f32,
    /// Premultiplied color.
    pub color: Color,
    pub opacity: Color,
    pub aov: Vec<f32>,
    pub csg: Option<CsgTag>,
    pub flags: HitFlags,
}

impl HitRecord {
    pub fn new(depth: f32, color: Color, opacity: Color) -> Self {
        Self {
            depth,
            color,
            opacity,
            aov: Vec::new(),
            csg: None,
            flags: HitFlags {
                occludes: opacity.cmpge(Vec3::ONE).all(),
                matte: false,
            },
        }
    }

    #[inline]
    pub fn is_csg(&self) -> bool {
        self.csg.is_some()
    }

    /// Hides everything behind it: opaque and not subject to CSG removal.
    #[inline]
    pub fn blocks(&self) -> bool {
        self.flags.occludes && self.csg.is_none()
    }

    #[inline]
    fn fast_slot_eligible(&self, depth_only: bool) -> bool {
        self.blocks() && !self.flags.matte && !depth_only
    }
}

/// How the region stores hits for the grid currently being sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorePolicy {
    /// Keep every hit for depth filtering; no occlusion collapsing.
    pub depth_only: bool,
    /// The candidate's grid may be rejected by nearer occluders.
    pub cullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreOutcome {
    /// Behind a nearer opaque hit.
    Occluded,
    /// Same depth as an existing list entry (shared grid edge).
    Duplicate,
    /// Recorded. `occluder_depth` is set when the hit became the subsample's
    /// nearest opaque depth and the occlusion tree must be told.
    Stored { occluder_depth: Option<f32> },
}

/// Depth-ordered hit list plus the value resolved by combine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HitList {
    entries: Vec<HitRecord>,
    resolved: Option<HitRecord>,
}

impl HitList {
    #[inline]
    pub fn entries(&self) -> &[HitRecord] {
        &self.entries
    }

    #[inline]
    pub fn resolved(&self) -> Option<&HitRecord> {
        self.resolved.as_ref()
    }

    fn nearest_blocker(&self) -> Option<f32> {
        self.entries.iter().find(|e| e.blocks()).map(|e| e.depth)
    }

    fn insert(&mut self, hit: HitRecord, policy: StorePolicy) -> StoreOutcome {
        let cull = policy.cullable && !policy.depth_only;
        let mut pos = self.entries.len();
        for (i, e) in self.entries.iter().enumerate() {
            if e.depth > hit.depth {
                pos = i;
                break;
            }
            if e.depth == hit.depth {
                if !e.is_csg() && !hit.is_csg() {
                    return StoreOutcome::Duplicate;
                }
            } else if cull && e.blocks() {
                return StoreOutcome::Occluded;
            }
        }

        let blocker = !policy.depth_only && hit.blocks();
        let depth = hit.depth;
        self.entries.insert(pos, hit);
        if blocker {
            // CSG hits behind a blocker stay for the evaluator.
            let mut i = 0;
            self.entries.retain(|e| {
                let keep = i <= pos || e.is_csg();
                i += 1;
                keep
            });
        }
        self.resolved = None;
        StoreOutcome::Stored {
            occluder_depth: blocker.then_some(depth),
        }
    }

    fn resolve(&mut self, settings: &CombineSettings, csg: Option<&dyn CsgEvaluator>) {
        if let Some(evaluator) = csg {
            if self.entries.iter().any(|e| e.is_csg()) {
                evaluator.evaluate(&mut self.entries);
            }
        }
        let Some(nearest) = self.entries.first() else {
            self.resolved = None;
            return;
        };

        let mut color = Color::ZERO;
        let mut alpha = Color::ZERO;
        let mut transmit = Color::ONE;
        for hit in &self.entries {
            if !hit.flags.matte {
                color += transmit * hit.color;
                alpha += transmit * hit.opacity;
            }
            transmit *= Color::ONE - hit.opacity.min(Color::ONE);
            if transmit.max_element() <= 0.0 {
                break;
            }
        }

        self.resolved = Some(HitRecord {
            depth: settings.depth_filter.reduce(&self.entries, settings.z_threshold),
            color,
            opacity: alpha,
            aov: nearest.aov.clone(),
            csg: None,
            flags: HitFlags {
                occludes: transmit.max_element() <= 0.0,
                matte: false,
            },
        });
    }
}

/// Hit storage of one subsample.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SampleHits {
    #[default]
    Empty,
    Occluder(HitRecord),
    List(HitList),
}

impl SampleHits {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, SampleHits::Empty)
    }

    /// O(1) rejection against the fast occluder, or the nearest blocking
    /// list entry, for a cullable candidate at `depth`.
    #[inline]
    pub fn is_occluded(&self, depth: f32, policy: StorePolicy) -> bool {
        if !policy.cullable || policy.depth_only {
            return false;
        }
        match self {
            SampleHits::Empty => false,
            SampleHits::Occluder(o) => o.depth <= depth,
            SampleHits::List(list) => list.nearest_blocker().is_some_and(|d| d < depth),
        }
    }

    pub fn store(&mut self, hit: HitRecord, policy: StorePolicy) -> StoreOutcome {
        if self.is_occluded(hit.depth, policy) {
            return StoreOutcome::Occluded;
        }
        let fast = hit.fast_slot_eligible(policy.depth_only);
        match self {
            SampleHits::Empty => {
                let depth = hit.depth;
                if fast {
                    *self = SampleHits::Occluder(hit);
                    StoreOutcome::Stored {
                        occluder_depth: Some(depth),
                    }
                } else {
                    let mut list = HitList::default();
                    let outcome = list.insert(hit, policy);
                    *self = SampleHits::List(list);
                    outcome
                }
            }
            SampleHits::Occluder(occluder) => {
                if policy.cullable && hit.depth >= occluder.depth {
                    return StoreOutcome::Occluded;
                }
                if fast {
                    let depth = hit.depth;
                    *occluder = hit;
                    return StoreOutcome::Stored {
                        occluder_depth: Some(depth),
                    };
                }
                let previous = std::mem::replace(occluder, HitRecord::new(0.0, Color::ZERO, Color::ZERO));
                let mut list = HitList {
                    entries: vec![previous],
                    resolved: None,
                };
                let outcome = list.insert(hit, policy);
                *self = SampleHits::List(list);
                outcome
            }
            SampleHits::List(list) => list.insert(hit, policy),
        }
    }

    /// Reduce a hit list to its effective value. Occluders and empty
    /// subsamples are left untouched.
    pub fn combine(&mut self, settings: &CombineSettings, csg: Option<&dyn CsgEvaluator>) {
        if let SampleHits::List(list) = self {
            list.resolve(settings, csg);
        }
    }

    /// The hit the reconstruction filter sees, if any.
    #[inline]
    pub fn visible(&self) -> Option<&HitRecord> {
        match self {
            SampleHits::Empty => None,
            SampleHits::Occluder(hit) => Some(hit),
            SampleHits::List(list) => list.resolved(),
        }
    }
}

/// How a hit list reduces to a single depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthFilter {
    /// Nearest surface that passes the opacity threshold.
    #[default]
    Min,
    /// Farthest surface.
    Max,
    /// Mean of every surface.
    Average,
    /// Halfway between the two nearest threshold-passing surfaces.
    Midpoint,
}

impl DepthFilter {
    pub fn name(&self) -> &'static str {
        match self {
            DepthFilter::Min => "min",
            DepthFilter::Max => "max",
            DepthFilter::Average => "average",
            DepthFilter::Midpoint => "midpoint",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "min" => Ok(DepthFilter::Min),
            "max" => Ok(DepthFilter::Max),
            "average" => Ok(DepthFilter::Average),
            "midpoint" => Ok(DepthFilter::Midpoint),
            _ => Err(ConfigError::UnknownDepthFilter(name.to_string())),
        }
    }

    /// Depth of a depth-sorted hit list.
    pub fn reduce(&self, hits: &[HitRecord], z_threshold: Vec3) -> f32 {
        let passes = |h: &&HitRecord| h.opacity.cmpge(z_threshold).all();
        match self {
            DepthFilter::Min => hits.iter().find(passes).map_or(NO_SAMPLE_DEPTH, |h| h.depth),
            DepthFilter::Max => hits
                .iter()
                .map(|h| h.depth)
                .reduce(f32::max)
                .unwrap_or(NO_SAMPLE_DEPTH),
            DepthFilter::Average => {
                if hits.is_empty() {
                    NO_SAMPLE_DEPTH
                } else {
                    hits.iter().map(|h| h.depth).sum::<f32>() / hits.len() as f32
                }
            }
            DepthFilter::Midpoint => {
                let mut opaque = hits.iter().filter(passes);
                match (opaque.next(), opaque.next()) {
                    (Some(a), Some(b)) => 0.5 * (a.depth + b.depth),
                    (Some(a), None) => a.depth,
                    _ => NO_SAMPLE_DEPTH,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombineSettings {
    pub depth_filter: DepthFilter,
    pub z_threshold: Vec3,
}

impl Default for CombineSettings {
    fn default() -> Self {
        Self {
            depth_filter: DepthFilter::Min,
            z_threshold: Vec3::ONE,
        }
    }
}

/// Resolves CSG operations on a depth-sorted hit list by removing the hits
/// the solid operations make invisible. Solid trees live with the scene
/// description, so the hider only calls through this seam.
pub trait CsgEvaluator: Send + Sync {
    fn evaluate(&self, hits: &mut Vec<HitRecord>);
}

#[cfg(test)]
mod tests {
    use super::*;

    const NORMAL: StorePolicy = StorePolicy {
        depth_only: false,
        cullable: true,
    };
    const DEPTH_ONLY: StorePolicy = StorePolicy {
        depth_only: true,
        cullable: true,
    };

    fn opaque(depth: f32, c: f32) -> HitRecord {
        HitRecord::new(depth, Color::splat(c), Color::ONE)
    }

    fn glass(depth: f32) -> HitRecord {
        HitRecord::new(depth, Color::new(0.25, 0.0, 0.0), Color::splat(0.5))
    }

    #[test]
    fn test_opaque_uses_fast_slot() {
        let mut hits = SampleHits::Empty;
        assert_eq!(
            hits.store(opaque(5.0, 1.0), NORMAL),
            StoreOutcome::Stored { occluder_depth: Some(5.0) }
        );
        assert!(matches!(hits, SampleHits::Occluder(_)));
        assert_eq!(hits.store(opaque(6.0, 0.5), NORMAL), StoreOutcome::Occluded);
        assert_eq!(hits.store(opaque(5.0, 0.5), NORMAL), StoreOutcome::Occluded);
        assert_eq!(
            hits.store(opaque(2.0, 0.5), NORMAL),
            StoreOutcome::Stored { occluder_depth: Some(2.0) }
        );
        assert_eq!(hits.visible().map(|h| h.depth), Some(2.0));
    }

    #[test]
    fn test_transparent_in_front_of_occluder_becomes_list() {
        let mut hits = SampleHits::Empty;
        hits.store(opaque(5.0, 1.0), NORMAL);
        assert_eq!(
            hits.store(glass(3.0), NORMAL),
            StoreOutcome::Stored { occluder_depth: None }
        );
        let SampleHits::List(list) = &hits else {
            panic!("expected a hit list");
        };
        let depths: Vec<f32> = list.entries().iter().map(|h| h.depth).collect();
        assert_eq!(depths, vec![3.0, 5.0]);
        assert_eq!(hits.store(glass(7.0), NORMAL), StoreOutcome::Occluded);
    }

    #[test]
    fn test_list_drops_exact_duplicates_unless_csg() {
        let mut hits = SampleHits::Empty;
        hits.store(glass(2.0), NORMAL);
        assert_eq!(hits.store(glass(2.0), NORMAL), StoreOutcome::Duplicate);

        let mut tagged = glass(2.0);
        tagged.csg = Some(CsgTag { solid: 1 });
        let policy = StorePolicy {
            depth_only: false,
            cullable: false,
        };
        assert!(matches!(hits.store(tagged, policy), StoreOutcome::Stored { .. }));
        let SampleHits::List(list) = &hits else {
            panic!("expected a hit list");
        };
        assert_eq!(list.entries().len(), 2);
    }

    #[test]
    fn test_opaque_into_list_truncates_hidden_entries() {
        let mut hits = SampleHits::Empty;
        hits.store(glass(1.0), NORMAL);
        hits.store(glass(4.0), NORMAL);
        hits.store(glass(6.0), NORMAL);
        assert_eq!(
            hits.store(opaque(3.0, 1.0), NORMAL),
            StoreOutcome::Stored { occluder_depth: Some(3.0) }
        );
        let SampleHits::List(list) = &hits else {
            panic!("expected a hit list");
        };
        let depths: Vec<f32> = list.entries().iter().map(|h| h.depth).collect();
        assert_eq!(depths, vec![1.0, 3.0]);
    }

    #[test]
    fn test_matte_blocks_but_contributes_nothing() {
        let mut hits = SampleHits::Empty;
        let mut matte = opaque(2.0, 1.0);
        matte.flags.matte = true;
        assert!(matches!(
            hits.store(matte, NORMAL),
            StoreOutcome::Stored { occluder_depth: Some(_) }
        ));
        assert_eq!(hits.store(opaque(4.0, 1.0), NORMAL), StoreOutcome::Occluded);
        hits.combine(&CombineSettings::default(), None);
        let v = hits.visible().expect("matte resolves to a hit");
        assert_eq!(v.color, Color::ZERO);
        assert_eq!(v.opacity, Color::ZERO);
        assert_eq!(v.depth, 2.0);
    }

    #[test]
    fn test_combine_composites_front_to_back() {
        let mut hits = SampleHits::Empty;
        hits.store(glass(1.0), NORMAL);
        hits.store(opaque(2.0, 1.0), NORMAL);
        hits.combine(&CombineSettings::default(), None);
        let v = hits.visible().expect("resolved");
        // 0.25 from the glass, then half of the white surface.
        assert!((v.color.x - 0.75).abs() < 1e-6);
        assert!((v.color.y - 0.5).abs() < 1e-6);
        assert_eq!(v.opacity, Color::ONE);
        assert!(v.flags.occludes);
        // The glass does not pass the default threshold, so depth comes from the opaque surface.
        assert_eq!(v.depth, 2.0);
    }

    #[test]
    fn test_depth_filter_reduction() {
        let mut hits = SampleHits::Empty;
        for d in [1.0, 5.0, 3.0] {
            assert!(matches!(
                hits.store(opaque(d, 1.0), DEPTH_ONLY),
                StoreOutcome::Stored { occluder_depth: None }
            ));
        }
        let expect = [
            (DepthFilter::Min, 1.0),
            (DepthFilter::Max, 5.0),
            (DepthFilter::Average, 3.0),
            (DepthFilter::Midpoint, 2.0),
        ];
        for (filter, depth) in expect {
            let mut h = hits.clone();
            h.combine(
                &CombineSettings {
                    depth_filter: filter,
                    z_threshold: Vec3::ONE,
                },
                None,
            );
            assert_eq!(h.visible().map(|v| v.depth), Some(depth), "{}", filter.name());
        }
    }

    #[test]
    fn test_depth_filter_threshold_skips_transparent() {
        let hits = vec![glass(1.0), opaque(4.0, 1.0)];
        assert_eq!(DepthFilter::Min.reduce(&hits, Vec3::ONE), 4.0);
        assert_eq!(DepthFilter::Min.reduce(&hits, Vec3::splat(0.5)), 1.0);
        assert_eq!(DepthFilter::Midpoint.reduce(&hits[..1], Vec3::ONE), NO_SAMPLE_DEPTH);
        assert_eq!(DepthFilter::from_name("Average"), Ok(DepthFilter::Average));
        assert!(DepthFilter::from_name("median").is_err());
    }

    #[test]
    fn test_csg_hit_behind_occluder_is_kept() {
        let csg = StorePolicy {
            depth_only: false,
            cullable: false,
        };
        let mut tagged = glass(6.0);
        tagged.csg = Some(CsgTag { solid: 2 });

        let mut hits = SampleHits::Empty;
        hits.store(opaque(4.0, 1.0), NORMAL);
        assert_eq!(
            hits.store(tagged, csg),
            StoreOutcome::Stored { occluder_depth: None }
        );
        let SampleHits::List(list) = &hits else {
            panic!("expected a hit list");
        };
        let depths: Vec<f32> = list.entries().iter().map(|h| h.depth).collect();
        assert_eq!(depths, vec![4.0, 6.0]);

        // A cullable hit at the same depth is still rejected.
        assert_eq!(hits.store(glass(6.0), NORMAL), StoreOutcome::Occluded);

        // A nearer blocker keeps the CSG hit for evaluation.
        hits.store(opaque(2.0, 0.5), NORMAL);
        let SampleHits::List(list) = &hits else {
            panic!("expected a hit list");
        };
        let depths: Vec<f32> = list.entries().iter().map(|h| h.depth).collect();
        assert_eq!(depths, vec![2.0, 6.0]);

        hits.combine(&CombineSettings::default(), None);
        assert_eq!(hits.visible().map(|v| v.depth), Some(2.0));
    }

    struct DropTagged;

    impl CsgEvaluator for DropTagged {
        fn evaluate(&self, hits: &mut Vec<HitRecord>) {
            hits.retain(|h| h.csg.is_none());
        }
    }

    #[test]
    fn test_csg_evaluator_runs_before_compositing() {
        let mut hits = SampleHits::Empty;
        let policy = StorePolicy {
            depth_only: false,
            cullable: false,
        };
        let mut front = opaque(1.0, 0.2);
        front.csg = Some(CsgTag { solid: 3 });
        hits.store(front, policy);
        hits.store(opaque(2.0, 0.9), NORMAL);
        hits.combine(&CombineSettings::default(), Some(&DropTagged));
        let v = hits.visible().expect("resolved");
        assert_eq!(v.depth, 2.0);
        assert!((v.color.x - 0.9).abs() < 1e-6);
    }
}
