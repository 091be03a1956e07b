//! Randomized checks of the occlusion tree against a brute-force oracle
//! that keeps one depth per subsample and scans all of them.
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reyes_hider::rendering::{Bound, OcclusionTree};

const REGION: f32 = 16.0;

struct Oracle {
    positions: Vec<Vec2>,
    depths: Vec<f32>,
}

impl Oracle {
    fn set(&mut self, id: usize, depth: f32) {
        self.depths[id] = self.depths[id].min(depth);
    }

    /// Bound is hidden if every subsample inside its footprint is nearer.
    fn hides(&self, bound: &Bound) -> bool {
        self.positions
            .iter()
            .zip(&self.depths)
            .filter(|(p, _)| bound.contains_2d(**p))
            .all(|(_, &d)| d < bound.min.z)
    }

    fn farthest(&self) -> f32 {
        self.depths.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

fn random_setup(rng: &mut ChaCha8Rng, count: usize) -> (OcclusionTree, Oracle) {
    let positions: Vec<Vec2> = (0..count)
        .map(|_| Vec2::new(rng.gen_range(0.0..REGION), rng.gen_range(0.0..REGION)))
        .collect();
    let samples: Vec<(u32, Vec2)> = positions.iter().enumerate().map(|(i, &p)| (i as u32, p)).collect();
    let mut tree = OcclusionTree::new();
    tree.build(&samples, count);
    let oracle = Oracle {
        depths: vec![f32::INFINITY; count],
        positions,
    };
    (tree, oracle)
}

fn random_bound(rng: &mut ChaCha8Rng) -> Bound {
    let x0 = rng.gen_range(-2.0..REGION + 2.0);
    let y0 = rng.gen_range(-2.0..REGION + 2.0);
    let w = rng.gen_range(0.0..8.0);
    let h = rng.gen_range(0.0..8.0);
    let z0 = rng.gen_range(0.0..12.0);
    Bound::new(Vec3::new(x0, y0, z0), Vec3::new(x0 + w, y0 + h, z0 + 1.0))
}

#[test]
fn culling_is_never_wrong() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for round in 0..20 {
        let count = rng.gen_range(1..600);
        let (mut tree, mut oracle) = random_setup(&mut rng, count);
        for _ in 0..count * 2 {
            let id = rng.gen_range(0..count);
            let depth = rng.gen_range(1.0..10.0);
            tree.set_sample_depth(id as u32, depth);
            oracle.set(id, depth);
        }
        for _ in 0..200 {
            let bound = random_bound(&mut rng);
            if tree.can_cull(&bound) {
                assert!(
                    oracle.hides(&bound),
                    "round {}: tree culled {:?} but a subsample inside is farther",
                    round,
                    bound
                );
            }
        }
    }
}

#[test]
fn root_depth_matches_farthest_sample() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let count = 256;
    let (mut tree, mut oracle) = random_setup(&mut rng, count);
    assert_eq!(tree.max_opaque_depth(), f32::INFINITY);

    // Cover everything, then keep lowering random samples.
    for id in 0..count {
        tree.set_sample_depth(id as u32, 10.0);
        oracle.set(id, 10.0);
    }
    assert_eq!(tree.max_opaque_depth(), 10.0);
    for _ in 0..1000 {
        let id = rng.gen_range(0..count);
        let depth = rng.gen_range(1.0..10.0);
        tree.set_sample_depth(id as u32, depth);
        oracle.set(id, depth);
        assert_eq!(tree.max_opaque_depth(), oracle.farthest());
    }
}

#[test]
fn anything_behind_everything_is_culled() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let count = 400;
    let (mut tree, mut oracle) = random_setup(&mut rng, count);
    for id in 0..count {
        let depth = rng.gen_range(1.0..5.0);
        tree.set_sample_depth(id as u32, depth);
        oracle.set(id, depth);
    }
    let far = oracle.farthest();
    for _ in 0..100 {
        let mut bound = random_bound(&mut rng);
        bound.min.z = far + 0.01;
        bound.max.z = far + 1.0;
        assert!(tree.can_cull(&bound));
    }
}

#[test]
fn depths_never_increase() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let (mut tree, _) = random_setup(&mut rng, 64);
    for id in 0..64 {
        tree.set_sample_depth(id, 2.0);
    }
    for id in 0..64 {
        tree.set_sample_depth(id, 8.0);
    }
    assert_eq!(tree.max_opaque_depth(), 2.0);
    let bound = Bound::new(Vec3::new(0.0, 0.0, 3.0), Vec3::new(REGION, REGION, 4.0));
    assert!(tree.can_cull(&bound));
}

#[test]
fn tree_is_shallow() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let (tree, _) = random_setup(&mut rng, 4096);
    // log4(4096) = 6, plus the root level.
    assert!(tree.depth() <= 8, "depth {}", tree.depth());
    let leaves = tree.nodes().iter().filter(|n| n.is_leaf()).count();
    assert_eq!(leaves, 4096);
}
