/// Per-region work counters
/// Each region processor owns one `RenderStats`; the renderer merges them
/// into a frame total once the region is done
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    // Region counters
    pub regions_rendered: u64,
    pub regions_skipped: u64,

    // Surface counters
    pub surfaces_posted: u64,
    pub surfaces_culled: u64,
    pub surfaces_spilled: u64,
    pub surfaces_diced: u64,
    pub surfaces_split: u64,
    pub surfaces_discarded: u64,

    // Micropolygon counters
    pub micropolygons_posted: u64,
    pub micropolygons_sampled: u64,
    pub micropolygons_culled: u64,
    pub micropolygons_clipped: u64,

    // Sample counters
    pub bound_hits: u64,
    pub samples_tested: u64,
    pub hits_stored: u64,
    pub hits_occluded: u64,
    pub hits_duplicate: u64,
    pub occluder_updates: u64,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &RenderStats) {
        self.regions_rendered += other.regions_rendered;
        self.regions_skipped += other.regions_skipped;
        self.surfaces_posted += other.surfaces_posted;
        self.surfaces_culled += other.surfaces_culled;
        self.surfaces_spilled += other.surfaces_spilled;
        self.surfaces_diced += other.surfaces_diced;
        self.surfaces_split += other.surfaces_split;
        self.surfaces_discarded += other.surfaces_discarded;
        self.micropolygons_posted += other.micropolygons_posted;
        self.micropolygons_sampled += other.micropolygons_sampled;
        self.micropolygons_culled += other.micropolygons_culled;
        self.micropolygons_clipped += other.micropolygons_clipped;
        self.bound_hits += other.bound_hits;
        self.samples_tested += other.samples_tested;
        self.hits_stored += other.hits_stored;
        self.hits_occluded += other.hits_occluded;
        self.hits_duplicate += other.hits_duplicate;
        self.occluder_updates += other.occluder_updates;
    }

    /// Fraction of hit-tested samples that ended up stored.
    pub fn hit_rate(&self) -> f64 {
        if self.samples_tested == 0 {
            0.0
        } else {
            self.hits_stored as f64 / self.samples_tested as f64
        }
    }

    pub fn log_summary(&self) {
        log::info!(
            "regions: {} rendered, {} skipped",
            self.regions_rendered,
            self.regions_skipped
        );
        log::info!(
            "surfaces: {} posted, {} diced, {} split, {} culled ({} spilled), {} discarded",
            self.surfaces_posted,
            self.surfaces_diced,
            self.surfaces_split,
            self.surfaces_culled,
            self.surfaces_spilled,
            self.surfaces_discarded
        );
        log::info!(
            "micropolygons: {} posted, {} sampled, {} culled, {} clipped",
            self.micropolygons_posted,
            self.micropolygons_sampled,
            self.micropolygons_culled,
            self.micropolygons_clipped
        );
        log::info!(
            "samples: {} bound hits, {} tested, {} stored ({:.1}%), {} occluded, {} duplicate",
            self.bound_hits,
            self.samples_tested,
            self.hits_stored,
            self.hit_rate() * 100.0,
            self.hits_occluded,
            self.hits_duplicate
        );
    }
}

impl AddAssign<&RenderStats> for RenderStats {
    fn add_assign(&mut self, rhs: &RenderStats) {
        self.merge(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_every_counter() {
        let mut a = RenderStats {
            hits_stored: 3,
            samples_tested: 4,
            ..Default::default()
        };
        let b = RenderStats {
            hits_stored: 1,
            samples_tested: 4,
            surfaces_discarded: 2,
            ..Default::default()
        };
        a += &b;
        assert_eq!(a.hits_stored, 4);
        assert_eq!(a.surfaces_discarded, 2);
        assert!((a.hit_rate() - 0.5).abs() < 1e-12);
        assert_eq!(RenderStats::new().hit_rate(), 0.0);
    }
}
