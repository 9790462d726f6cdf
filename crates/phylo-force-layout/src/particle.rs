//! Particle system driving the force layout.
//!
//! Every visible tree node becomes a particle; every visible parent/child
//! link becomes a logarithmic spring whose rest length is the mean initial
//! edge length. Particles also repel each other when closer than the
//! repulsion distance. Integration is position Verlet with damping and an
//! adaptive step that throttles the simulation when velocities explode.
//!
//! The system reads tree topology once, in [`ParticleSystem::new`], and only
//! writes back to a tree in [`ParticleSystem::update_and_synch`].

use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use phylo_force_core::{NodeId, PhyloTree, Traverse, Vec2, Visit};
use tracing::{debug, warn};

use crate::grid::SpatialGrid;
use crate::params::PhysicsParams;

const EPSILON: f32 = 1e-6;
const THROTTLE_VELOCITY: f32 = 20.0;
const MAX_DONE_THRESHOLD: f32 = 10.0;

/// Parameters shared between a controller and a running simulation.
///
/// Writers may change them at any time; the simulation adopts them at its
/// next [`ParticleSystem::update_and_synch`].
pub type SharedParams = Arc<Mutex<PhysicsParams>>;

#[derive(Debug, Clone, Copy)]
struct Spring {
    from: u32,
    to: u32,
}

#[derive(Debug)]
pub struct ParticleSystem {
    node_ids: Vec<NodeId>,
    parents: Vec<Option<u32>>,
    pos: Vec<Vec2>,
    prev: Vec<Vec2>,
    accel: Vec<Vec2>,
    springs: Vec<Spring>,
    rest_len_inv: f32,
    grid: SpatialGrid,
    params: PhysicsParams,
    volatile: SharedParams,
    adaptive_step: f32,
    max_velocity: f32,
    prev_max_velocity: f32,
    done: bool,
}

impl ParticleSystem {
    /// Builds particles from the current positions of all visible nodes.
    ///
    /// Trees with fewer than two visible nodes produce a system that is
    /// already done and never moves.
    pub fn new(tree: &PhyloTree, params: PhysicsParams) -> Self {
        Self::with_shared_params(tree, Arc::new(Mutex::new(params)))
    }

    pub fn with_shared_params(tree: &PhyloTree, volatile: SharedParams) -> Self {
        let params = *volatile.lock().unwrap_or_else(|e| e.into_inner());
        let mut system = Self {
            node_ids: Vec::new(),
            parents: Vec::new(),
            pos: Vec::new(),
            prev: Vec::new(),
            accel: Vec::new(),
            springs: Vec::new(),
            rest_len_inv: 1.0,
            grid: SpatialGrid::new(params.repulsion_distance),
            params,
            volatile,
            adaptive_step: 1.0,
            max_velocity: 1.0,
            prev_max_velocity: 1.0,
            done: false,
        };
        system.init(tree);
        system
    }

    /// Re-reads topology and positions from `tree` and resets the dynamics.
    pub fn init(&mut self, tree: &PhyloTree) {
        self.params = *self.volatile.lock().unwrap_or_else(|e| e.into_inner());
        self.node_ids.clear();
        self.parents.clear();
        self.pos.clear();
        self.springs.clear();

        let mut open: Vec<u32> = Vec::new();
        let mut total_len = 0.0f32;
        tree.depth_first(|tree, id, visit| {
            if visit == Visit::Leave {
                open.pop();
                return Traverse::Continue;
            }
            let index = self.node_ids.len() as u32;
            let position = tree[id].position;
            let parent = open.last().copied();
            if let Some(p) = parent {
                total_len += (position - self.pos[p as usize]).length();
                self.springs.push(Spring { from: p, to: index });
            }
            self.node_ids.push(id);
            self.parents.push(parent);
            self.pos.push(position);
            if visit == Visit::Enter {
                open.push(index);
            }
            Traverse::Continue
        });

        self.prev.clear();
        self.prev.extend_from_slice(&self.pos);
        self.accel.clear();
        self.accel.resize(self.pos.len(), Vec2::ZERO);

        let mean_len = if self.springs.is_empty() {
            0.0
        } else {
            total_len / self.springs.len() as f32
        };
        self.rest_len_inv = if mean_len > EPSILON { 1.0 / mean_len } else { 1.0 };

        self.adaptive_step = 1.0;
        self.max_velocity = 1.0;
        self.prev_max_velocity = 1.0;
        self.done = self.pos.len() < 2;
        self.grid.set_cell_size(self.params.repulsion_distance);
        self.grid.rebuild(&self.pos);

        debug!(
            particles = self.pos.len(),
            springs = self.springs.len(),
            rest_length = mean_len,
            "particle system initialized"
        );
    }

    pub fn len(&self) -> usize {
        self.pos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    /// Parameters currently used by the integration.
    pub fn params(&self) -> PhysicsParams {
        self.params
    }

    /// Queues new parameters for the next synchronization.
    pub fn set_params(&self, params: PhysicsParams) {
        *self.volatile.lock().unwrap_or_else(|e| e.into_inner()) = params;
    }

    pub fn shared_params(&self) -> SharedParams {
        Arc::clone(&self.volatile)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn max_velocity(&self) -> f32 {
        self.max_velocity
    }

    pub fn adaptive_step(&self) -> f32 {
        self.adaptive_step
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.pos
    }

    /// One simulation step without touching any tree.
    pub fn update(&mut self) {
        if self.done {
            return;
        }
        if self.max_velocity > THROTTLE_VELOCITY
            && self.max_velocity > self.prev_max_velocity
            && self.adaptive_step > 0.01
        {
            self.adaptive_step *= 0.95;
        } else if self.adaptive_step < 1.0
            && self.max_velocity < THROTTLE_VELOCITY
            && self.max_velocity < self.prev_max_velocity
        {
            self.adaptive_step += (1.0 - self.adaptive_step) * 0.01;
        }

        self.calc_forces();
        self.integrate();
    }

    /// One simulation step, then copies positions and label angles into
    /// `tree`. Pending parameters are adopted first.
    ///
    /// `tree` must be the tree this system was initialized from; callers
    /// sharing it across threads hold its lock for the whole call.
    pub fn update_and_synch(&mut self, tree: &mut PhyloTree) {
        self.params = *self.volatile.lock().unwrap_or_else(|e| e.into_inner());
        self.grid.set_cell_size(self.params.repulsion_distance);
        self.grid.rebuild(&self.pos);

        if !self.done {
            self.calc_forces();
            let max_disp_sq = self.integrate();
            self.prev_max_velocity = self.max_velocity;
            self.max_velocity = max_disp_sq.sqrt() / self.params.step;
            if !self.max_velocity.is_finite() {
                warn!(max_velocity = self.max_velocity, "non-finite particle velocity");
            }

            let threshold = (self.params.velocity_threshold_k * (self.len() as f32 + 100.0) / 5.0)
                .min(MAX_DONE_THRESHOLD);
            if self.adaptive_step > 0.9 && self.max_velocity < threshold {
                self.done = true;
                debug!(
                    max_velocity = self.max_velocity,
                    threshold, "particle system converged"
                );
            }
        }

        self.write_back(tree);
    }

    fn write_back(&self, tree: &mut PhyloTree) {
        for (i, &id) in self.node_ids.iter().enumerate() {
            let Some(node) = tree.node_mut(id) else {
                continue;
            };
            node.position = self.pos[i];
            if let Some(parent) = self.parents[i] {
                node.angle = if self.pos[i].x - self.pos[parent as usize].x >= 0.0 {
                    0.0
                } else {
                    PI
                };
            }
        }
    }

    fn calc_forces(&mut self) {
        let Self {
            pos,
            accel,
            springs,
            grid,
            params,
            rest_len_inv,
            ..
        } = self;

        for spring in springs.iter() {
            let (a, b) = (spring.from as usize, spring.to as usize);
            let offset = pos[a] - pos[b];
            let dist = offset.length();
            if dist > EPSILON {
                let force = offset * ((dist * *rest_len_inv).ln() / dist * params.edge_k);
                accel[a] -= force;
                accel[b] += force;
            }
        }

        let rep = params.electrical_repulsion;
        if rep == 0.0 {
            return;
        }
        let rep_dist = params.repulsion_distance;
        let rep_dist_sq = rep_dist * rep_dist;
        grid.for_each_pair(|i, j| {
            let offset = pos[i] - pos[j];
            let dist_sq = offset.length_sq();
            if dist_sq < rep_dist_sq && dist_sq > EPSILON {
                let dist = dist_sq.sqrt();
                let force = offset * ((rep - (rep / rep_dist) * dist) / dist_sq);
                accel[i] += force;
                accel[j] -= force;
            }
        });
    }

    /// Verlet step; clears accelerations, rebuilds the grid and returns the
    /// largest squared displacement.
    fn integrate(&mut self) -> f32 {
        let step = self.params.step * self.adaptive_step;
        let damping = self.params.damping;
        let mut max_disp_sq = 0.0f32;
        for i in 0..self.pos.len() {
            let disp = (self.pos[i] - self.prev[i]) * damping + self.accel[i] * step;
            self.prev[i] = self.pos[i];
            self.pos[i] += disp;
            self.accel[i] = Vec2::ZERO;
            max_disp_sq = max_disp_sq.max(disp.length_sq());
        }
        self.grid.rebuild(&self.pos);
        max_disp_sq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylo_force_core::{radial_layout, RadialParams};

    fn seeded_tree() -> PhyloTree {
        let mut tree = PhyloTree::new();
        let root = tree.add_root("root").unwrap();
        for i in 0..3 {
            let inner = tree.add_child(root, format!("i{i}")).unwrap();
            for j in 0..=i {
                tree.add_child(inner, format!("l{i}{j}")).unwrap();
            }
        }
        radial_layout(&mut tree, &RadialParams::default());
        tree
    }

    #[test]
    fn test_update_is_deterministic() {
        let tree = seeded_tree();
        let mut a = ParticleSystem::new(&tree, PhysicsParams::default());
        let mut b = ParticleSystem::new(&tree, PhysicsParams::default());
        for _ in 0..200 {
            a.update();
            b.update();
        }
        assert_eq!(a.positions(), b.positions());
    }

    #[test]
    fn test_synch_copies_positions_exactly() {
        let mut tree = seeded_tree();
        let mut system = ParticleSystem::new(&tree, PhysicsParams::default());
        for _ in 0..10 {
            system.update();
        }
        system.update_and_synch(&mut tree);
        for (&id, &p) in system.node_ids().iter().zip(system.positions()) {
            assert_eq!(tree[id].position, p);
        }
    }

    #[test]
    fn test_synch_sets_label_angle() {
        let mut tree = seeded_tree();
        let mut system = ParticleSystem::new(&tree, PhysicsParams::default());
        system.update_and_synch(&mut tree);
        for node in tree.nodes() {
            let Some(parent) = node.parent() else {
                continue;
            };
            let expected = if node.position.x >= tree[parent].position.x { 0.0 } else { PI };
            assert_eq!(node.angle, expected);
        }
    }

    #[test]
    fn test_single_node_is_done() {
        let mut tree = PhyloTree::new();
        tree.add_root("only").unwrap();
        let mut system = ParticleSystem::new(&tree, PhysicsParams::default());
        assert!(system.is_done());
        system.update();
        assert_eq!(system.positions(), &[Vec2::ZERO]);
    }

    #[test]
    fn test_stretched_edge_contracts() {
        let mut tree = PhyloTree::new();
        let root = tree.add_root("").unwrap();
        let a = tree.add_child(root, "").unwrap();
        let b = tree.add_child(root, "").unwrap();
        tree[a].position = Vec2::new(10.0, 0.0);
        tree[b].position = Vec2::new(-30.0, 0.0);
        let params = PhysicsParams {
            electrical_repulsion: 0.0,
            ..PhysicsParams::default()
        };
        let mut system = ParticleSystem::new(&tree, params);
        system.update();
        // Rest length is 20: `a` is pushed out, `b` pulled in.
        assert!(system.positions()[1].x > 10.0);
        assert!(system.positions()[2].x > -30.0);
    }

    #[test]
    fn test_is_done_is_monotonic() {
        let mut tree = seeded_tree();
        let params = PhysicsParams {
            electrical_repulsion: 0.0,
            edge_k: 5.0,
            damping: 0.5,
            velocity_threshold_k: 0.05,
            ..PhysicsParams::default()
        };
        let mut system = ParticleSystem::new(&tree, params);
        let mut batches = 0;
        while !system.is_done() && batches < 5_000 {
            for _ in 0..10 {
                system.update();
            }
            system.update_and_synch(&mut tree);
            batches += 1;
        }
        assert!(system.is_done(), "did not converge in {batches} batches");

        let frozen = system.positions().to_vec();
        for _ in 0..100 {
            system.update();
            system.update_and_synch(&mut tree);
            assert!(system.is_done());
        }
        assert_eq!(system.positions(), frozen.as_slice());
    }

    #[test]
    fn test_params_apply_at_synch() {
        let mut tree = seeded_tree();
        let mut system = ParticleSystem::new(&tree, PhysicsParams::default());
        let tuned = PhysicsParams {
            damping: 0.5,
            ..PhysicsParams::default()
        };
        system.set_params(tuned);
        assert_eq!(system.params().damping, 0.89);
        system.update_and_synch(&mut tree);
        assert_eq!(system.params(), tuned);
    }
}
