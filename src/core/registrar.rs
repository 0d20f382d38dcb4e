//! Parallel registration pipeline
//!
//! The registrar is the sole writer to cell buckets. Every phase is run via
//! `rayon`, batched by [`threads_and_batch_size`], mirroring the source's
//! `CalculateThreadsCountAndBatchSize` + `OperateConcurrently` pattern.

use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, trace};

use super::cell::{Avoiding, ObstacleBucket};
use super::filter::{canonical, Filter, Handle, TraitMask};
use super::grid::Grid;
use super::obstacle::{BoxObstacleArena, SphereObstacleDesc};

/// An agent snapshot handed in by the host each tick.
#[derive(Debug, Clone, Copy)]
pub struct AgentInput {
    pub handle: Handle,
    pub location: Vec3,
    pub radius: f32,
    pub traits: TraitMask,
}

/// Computes `(threadCount, batchSize)` from entity count, a minimum batch
/// size, and a maximum thread cap
pub fn threads_and_batch_size(count: usize, max_threads: usize, min_batch: usize) -> (usize, usize) {
    if count == 0 {
        return (0, min_batch.max(1));
    }
    let max_threads = max_threads.max(1);
    let min_batch = min_batch.max(1);
    let by_min_batch = count.div_ceil(min_batch).max(1);
    let threads = by_min_batch.min(max_threads);
    let batch_size = count.div_ceil(threads).max(min_batch.min(count));
    (threads, batch_size)
}

pub struct Registrar<'g> {
    grid: &'g Grid,
}

impl<'g> Registrar<'g> {
    pub fn new(grid: &'g Grid) -> Self {
        Self { grid }
    }

    fn batch_size(&self, count: usize) -> usize {
        let cfg = self.grid.config();
        threads_and_batch_size(count, cfg.max_threads_allowed, cfg.min_batch_size_allowed).1
    }

    /// RegisterTrace: binds each matching entity to this grid. Since the
    /// core holds no entity storage, "binding" means returning the set of
    /// handles the host should now consider trace-linked.
    pub fn register_trace_links(&self, agents: &[AgentInput]) -> Vec<Handle> {
        self.link_phase(agents, canonical::trace_link())
    }

    pub fn register_sphere_obstacle_links(&self, obstacles: &[SphereObstacleDesc]) -> Vec<Handle> {
        let filter = canonical::sphere_obstacle_link();
        obstacles
            .iter()
            .filter(|o| filter.matches(TraitMask::LOCATED | TraitMask::SPHERE_OBSTACLE) && self.grid.is_inside(self.grid.world_to_cage(o.location)))
            .map(|o| o.handle)
            .collect()
    }

    fn link_phase(&self, agents: &[AgentInput], filter: Filter) -> Vec<Handle> {
        agents
            .iter()
            .filter(|a| filter.matches(a.traits) && self.grid.is_inside(self.grid.world_to_cage(a.location)))
            .map(|a| a.handle)
            .collect()
    }

    /// RegisterAgentSingle: single-cell registration for agents without
    /// `RegisterMultiple`
    pub fn register_agent_single(&self, agents: &[AgentInput]) -> usize {
        let filter = canonical::agent_single();
        let matching: Vec<&AgentInput> = agents.iter().filter(|a| filter.matches(a.traits)).collect();
        let batch = self.batch_size(matching.len());
        let registered = std::sync::atomic::AtomicUsize::new(0);
        matching.par_chunks(batch.max(1)).for_each(|chunk| {
            for agent in chunk {
                let cage = self.grid.world_to_cage(agent.location);
                let Some(index) = self.grid.get_index_at(cage) else { continue };
                let Some(cell) = self.grid.at_index(index) else { continue };
                let guard = cell.lock();
                guard.agents_mut().push(Avoiding {
                    handle: agent.handle,
                    location: agent.location,
                    radius: agent.radius,
                    traits: agent.traits,
                });
                if guard.mark_registered() {
                    self.grid.enqueue_occupied(index);
                }
                registered.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });
        registered.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// RegisterAgentMultiple: AABB registration across every overlapping
    /// cell
    pub fn register_agent_multiple(&self, agents: &[AgentInput]) -> usize {
        let filter = canonical::agent_multiple();
        let matching: Vec<&AgentInput> = agents.iter().filter(|a| filter.matches(a.traits)).collect();
        let batch = self.batch_size(matching.len());
        let registered = std::sync::atomic::AtomicUsize::new(0);
        matching.par_chunks(batch.max(1)).for_each(|chunk| {
            for agent in chunk {
                let range = Vec3::splat(agent.radius);
                for cage in self.grid.get_neighbor_cells(agent.location, range) {
                    let Some(index) = self.grid.get_index_at(cage) else { continue };
                    let Some(cell) = self.grid.at_index(index) else { continue };
                    let guard = cell.lock();
                    guard.agents_mut().push(Avoiding {
                        handle: agent.handle,
                        location: agent.location,
                        radius: agent.radius,
                        traits: agent.traits,
                    });
                    if guard.mark_registered() {
                        self.grid.enqueue_occupied(index);
                    }
                }
                registered.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        });
        registered.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// RegisterSphereObstacles: chooses the static or dynamic bucket by the
    /// `static` flag; static obstacles skip re-registration once already
    /// registered for the grid's lifetime, since their cell never changes.
    pub fn register_sphere_obstacles(&self, obstacles: &mut [SphereObstacleDesc]) -> usize {
        let filter = canonical::sphere_obstacle_register();
        let mut registered = 0usize;
        for obstacle in obstacles.iter_mut() {
            let traits = TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::SPHERE_OBSTACLE;
            if !filter.matches(traits) {
                continue;
            }
            if obstacle.is_static && obstacle.registered {
                continue;
            }
            let bucket_kind = if obstacle.is_static { ObstacleBucket::SphereStatic } else { ObstacleBucket::SphereDynamic };
            let range = Vec3::splat(obstacle.radius);
            for cage in self.grid.get_neighbor_cells(obstacle.location, range) {
                let Some(index) = self.grid.get_index_at(cage) else { continue };
                let Some(cell) = self.grid.at_index(index) else { continue };
                let guard = cell.lock();
                guard.bucket_mut(bucket_kind).push(Avoiding {
                    handle: obstacle.handle,
                    location: obstacle.location,
                    radius: obstacle.radius,
                    traits,
                });
                if guard.mark_registered() {
                    self.grid.enqueue_occupied(index);
                }
            }
            // Set unconditionally after a successful pass, matching the
            // original's structure even though the static short-circuit
            // above already reads it.
            obstacle.registered = true;
            registered += 1;
        }
        registered
    }

    /// RegisterBoxObstacles: layers each segment by Z and sweeps cells per
    /// layer
    pub fn register_box_obstacles(&self, arena: &mut BoxObstacleArena) -> usize {
        let filter = canonical::box_obstacle_register();
        let sz = self.grid.cell_size().z;
        let max_cell = self.grid.cell_size().max_element();
        let mut registered = 0usize;
        let indices: Vec<usize> = (0..arena.len()).collect();
        for index in indices {
            let (start, end, height, is_static, already_registered, handle) = {
                let Some((start, end)) = arena.segment(index) else {
                    trace!(index, "dropping box obstacle with dangling link");
                    continue;
                };
                let node = arena.get(index).unwrap();
                let traits = TraitMask::BOX_OBSTACLE | TraitMask::LOCATED | TraitMask::AVOIDING;
                if !filter.matches(traits) {
                    continue;
                }
                (start.point3d, end.point3d, node.height, node.is_static, node.registered, node.handle)
            };
            if is_static && already_registered {
                continue;
            }

            let mut touched = rustc_hash::FxHashSet::default();
            let mut z = start.z;
            let z_top = start.z + height;
            while z <= z_top + f32::EPSILON {
                let layer_start = Vec3::new(start.x, start.y, z);
                let layer_end = Vec3::new(end.x, end.y, z);
                for cage in self.grid.sphere_sweep_for_cells(layer_start, layer_end, 2.0 * max_cell) {
                    if let Some(i) = self.grid.get_index_at(cage) {
                        touched.insert(i);
                    }
                }
                z += sz.max(f32::EPSILON);
            }

            let bucket_kind = if is_static { ObstacleBucket::BoxStatic } else { ObstacleBucket::BoxDynamic };
            let record = Avoiding {
                handle,
                location: start,
                radius: 0.0,
                traits: TraitMask::BOX_OBSTACLE,
            };
            touched.into_iter().collect::<Vec<_>>().into_par_iter().for_each(|cell_index| {
                if let Some(cell) = self.grid.at_index(cell_index) {
                    let guard = cell.lock();
                    guard.bucket_mut(bucket_kind).push(record);
                    if guard.mark_registered() {
                        self.grid.enqueue_occupied(cell_index);
                    }
                }
            });

            if let Some(node) = arena.get_mut(index) {
                node.registered = true;
            }
            registered += 1;
        }
        debug!(registered, "box obstacles registered");
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridConfig;

    fn grid() -> Grid {
        Grid::new(GridConfig {
            origin: Vec3::ZERO,
            dims: (10, 10, 1),
            cell_size: Vec3::new(100.0, 100.0, 100.0),
            max_threads_allowed: 4,
            min_batch_size_allowed: 2,
        })
        .unwrap()
    }

    fn agent_traits() -> TraitMask {
        TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::ACTIVATED
    }

    #[test]
    fn threads_and_batch_size_never_zero_batch() {
        let (threads, batch) = threads_and_batch_size(100, 8, 16);
        assert!(threads >= 1 && threads <= 8);
        assert!(batch >= 1);
        let (threads0, _) = threads_and_batch_size(0, 8, 16);
        assert_eq!(threads0, 0);
    }

    #[test]
    fn single_registration_lands_in_home_cell_only() {
        let grid = grid();
        let registrar = Registrar::new(&grid);
        let agents = vec![AgentInput {
            handle: Handle::new(0, 1),
            location: Vec3::new(150.0, 150.0, 0.0),
            radius: 5.0,
            traits: agent_traits(),
        }];
        let n = registrar.register_agent_single(&agents);
        assert_eq!(n, 1);
        let home = grid.at(grid.world_to_cage(agents[0].location)).unwrap();
        assert_eq!(home.agents.len(), 1);
        let total: usize = (0..grid.cell_count()).filter(|&i| grid.at_index(i).unwrap().agents.len() > 0).count();
        assert_eq!(total, 1);
    }

    #[test]
    fn multi_registration_covers_every_overlapping_cell() {
        let grid = grid();
        let registrar = Registrar::new(&grid);
        let agents = vec![AgentInput {
            handle: Handle::new(0, 1),
            location: Vec3::new(100.0, 100.0, 0.0),
            radius: 60.0,
            traits: agent_traits() | TraitMask::REGISTER_MULTIPLE,
        }];
        registrar.register_agent_multiple(&agents);
        let covered: usize = (0..grid.cell_count()).filter(|&i| grid.at_index(i).unwrap().agents.len() > 0).count();
        assert!(covered > 1, "expected multiple cells covered, got {covered}");
    }

    #[test]
    fn static_sphere_obstacle_registers_once() {
        let grid = grid();
        let registrar = Registrar::new(&grid);
        let mut obstacles = vec![SphereObstacleDesc {
            handle: Handle::new(0, 1),
            location: Vec3::new(150.0, 150.0, 0.0),
            radius: 10.0,
            is_static: true,
            registered: false,
        }];
        let first = registrar.register_sphere_obstacles(&mut obstacles);
        assert_eq!(first, 1);
        assert!(obstacles[0].registered);
        let second = registrar.register_sphere_obstacles(&mut obstacles);
        assert_eq!(second, 0, "already-registered static obstacle should be skipped");
    }
}
