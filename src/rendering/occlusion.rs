/// Hierarchical occlusion culling over a region's subsample positions
///
/// Key Design Principles:
/// 1. Flat arena: nodes live in one Vec and refer to children and parent by index
/// 2. Shallow tree: each node is split by repeated median cuts on alternating axes
///    until it has 4 children, so depth is log4(N) instead of log2(N)
/// 3. Conservative depth: every node caches the farthest opaque depth among its
///    subsamples. Geometry nearer than that bound may still be visible.
/// 4. Monotonic updates: depths only decrease. An update walks upward only
///    while it lowers an ancestor.
///
/// Bounds are built from jittered subsample positions, not pixel edges, so
/// a node is tight around exactly the samples it covers.
use std::collections::VecDeque;

use glam::Vec2;

use super::geometry::Bound;

/// Children per interior node.
pub const FAN_OUT: usize = 4;

const NO_NODE: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub struct OcclusionNode {
    pub min: Vec2,
    pub max: Vec2,
    /// Farthest opaque depth recorded among this node's subsamples.
    pub max_opaque_z: f32,
    parent: u32,
    children: [u32; FAN_OUT],
    child_count: u8,
    /// Subsample id for leaves, `NO_NODE` otherwise.
    sample: u32,
}

impl OcclusionNode {
    fn new(samples: &[(u32, Vec2)], parent: u32) -> Self {
        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(-f32::MAX);
        for &(_, p) in samples {
            min = min.min(p);
            max = max.max(p);
        }
        Self {
            min,
            max,
            max_opaque_z: f32::INFINITY,
            parent,
            children: [NO_NODE; FAN_OUT],
            child_count: 0,
            sample: NO_NODE,
        }
    }

    #[inline]
    pub fn children(&self) -> &[u32] {
        &self.children[..self.child_count as usize]
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.child_count == 0
    }

    /// Subsample id stored at a leaf.
    #[inline]
    pub fn sample(&self) -> Option<u32> {
        (self.sample != NO_NODE).then_some(self.sample)
    }

    /// True when the footprint of `bound` lies entirely inside this node.
    #[inline]
    fn contains(&self, bound: &Bound) -> bool {
        self.min.x <= bound.min.x
            && self.max.x >= bound.max.x
            && self.min.y <= bound.min.y
            && self.max.y >= bound.max.y
    }
}

#[derive(Debug, Clone, Default)]
pub struct OcclusionTree {
    nodes: Vec<OcclusionNode>,
    /// Leaf node per subsample id, `NO_NODE` for subsamples outside the tree.
    leaf_of: Vec<u32>,
}

type Partition = (Vec<(u32, Vec2)>, usize);

impl OcclusionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.leaf_of.clear();
    }

    /// Rebuild over `samples`, given as `(subsample id, position)`. Ids must
    /// be below `id_space`.
    pub fn build(&mut self, samples: &[(u32, Vec2)], id_space: usize) {
        self.nodes.clear();
        self.leaf_of.clear();
        self.leaf_of.resize(id_space, NO_NODE);
        if samples.is_empty() {
            return;
        }
        self.nodes.reserve(samples.len() * 4 / 3 + 1);

        self.nodes.push(OcclusionNode::new(samples, NO_NODE));
        let mut work: Vec<(u32, Vec<(u32, Vec2)>, usize)> = vec![(0, samples.to_vec(), 0)];

        while let Some((node, set, axis)) = work.pop() {
            if set.len() == 1 {
                let sample = set[0].0;
                self.nodes[node as usize].sample = sample;
                debug_assert_eq!(self.leaf_of[sample as usize], NO_NODE, "subsample {} inserted twice", sample);
                self.leaf_of[sample as usize] = node;
                continue;
            }

            let mut queue: VecDeque<Partition> = VecDeque::with_capacity(FAN_OUT);
            queue.push_back((set, axis));
            while queue.len() < FAN_OUT && queue.iter().any(|(s, _)| s.len() > 1) {
                let Some((mut part, axis)) = queue.pop_front() else {
                    break;
                };
                if part.len() <= 1 {
                    queue.push_back((part, axis));
                    continue;
                }
                let mid = part.len() / 2;
                part.select_nth_unstable_by(mid, |a, b| a.1[axis].total_cmp(&b.1[axis]));
                let upper = part.split_off(mid);
                let next = 1 - axis;
                queue.push_back((part, next));
                queue.push_back((upper, next));
            }

            for (part, axis) in queue {
                if part.is_empty() {
                    continue;
                }
                let child = self.nodes.len() as u32;
                self.nodes.push(OcclusionNode::new(&part, node));
                let parent = &mut self.nodes[node as usize];
                parent.children[parent.child_count as usize] = child;
                parent.child_count += 1;
                work.push((child, part, axis));
            }
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes(&self) -> &[OcclusionNode] {
        &self.nodes
    }

    /// Farthest opaque depth over the whole region, infinite until every
    /// subsample has an opaque hit.
    #[inline]
    pub fn max_opaque_depth(&self) -> f32 {
        self.nodes.first().map_or(f32::INFINITY, |n| n.max_opaque_z)
    }

    /// Levels from root to deepest leaf (1 for a single-sample tree).
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push((0u32, 1usize));
        }
        while let Some((i, level)) = stack.pop() {
            deepest = deepest.max(level);
            for &c in self.nodes[i as usize].children() {
                stack.push((c, level + 1));
            }
        }
        deepest
    }

    /// True when everything in `bound` lies behind recorded opaque hits.
    ///
    /// The root is always tested, even when `bound` extends past the
    /// region: the part inside is hidden, and the caller hands the surface
    /// on to a neighbour for the part outside.
    pub fn can_cull(&self, bound: &Bound) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let mut stack: Vec<u32> = Vec::with_capacity(32);
        stack.push(0);
        let mut is_root = true;
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i as usize];
            if is_root || node.contains(bound) {
                if bound.min.z > node.max_opaque_z {
                    return true;
                }
                stack.extend_from_slice(node.children());
            }
            is_root = false;
        }
        false
    }

    /// Record a new nearest opaque depth for a subsample.
    pub fn set_sample_depth(&mut self, sample: u32, depth: f32) {
        let Some(&leaf) = self.leaf_of.get(sample as usize) else {
            return;
        };
        if leaf == NO_NODE {
            return;
        }
        let node = &mut self.nodes[leaf as usize];
        if depth >= node.max_opaque_z {
            return;
        }
        node.max_opaque_z = depth;

        let mut current = node.parent;
        while current != NO_NODE {
            let parent = &self.nodes[current as usize];
            let farthest = parent
                .children()
                .iter()
                .map(|&c| self.nodes[c as usize].max_opaque_z)
                .fold(f32::NEG_INFINITY, f32::max);
            if farthest >= parent.max_opaque_z {
                break;
            }
            let next = parent.parent;
            self.nodes[current as usize].max_opaque_z = farthest;
            current = next;
        }
    }
}
