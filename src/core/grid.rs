//! Uniform 3D spatial hash grid

use crossbeam_channel::{Receiver, Sender};
use glam::{IVec3, Vec3};
use thiserror::Error;
use tracing::trace;

use super::cell::Cell;

/// Immutable grid configuration
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct GridConfig {
    pub origin: Vec3,
    pub dims: (u32, u32, u32),
    pub cell_size: Vec3,
    pub max_threads_allowed: usize,
    pub min_batch_size_allowed: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            dims: (32, 32, 4),
            cell_size: Vec3::splat(100.0),
            max_threads_allowed: 8,
            min_batch_size_allowed: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum GridError {
    #[error("grid cell_size must be positive on every axis, got {0:?}")]
    ZeroCellSize(Vec3),
    #[error("grid dims must be nonzero on every axis, got {0:?}")]
    ZeroDims((u32, u32, u32)),
    #[error("grid dims {0:?} overflow total cell count")]
    TooManyCells((u32, u32, u32)),
}

/// Integer cell coordinate, clipped to `[0, dims)` by `IsInside`.
pub type CellPos = IVec3;

pub struct Grid {
    config: GridConfig,
    cells: Vec<Cell>,
    /// Sharded MPSC queues of touched cell indices, one per shard, drained
    /// in parallel by `Reset`
    occupied_senders: Vec<Sender<usize>>,
    occupied_receivers: Vec<Receiver<usize>>,
}

impl Grid {
    pub fn new(config: GridConfig) -> Result<Self, GridError> {
        let (nx, ny, nz) = config.dims;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(GridError::ZeroDims(config.dims));
        }
        if config.cell_size.x <= 0.0 || config.cell_size.y <= 0.0 || config.cell_size.z <= 0.0 {
            return Err(GridError::ZeroCellSize(config.cell_size));
        }
        let total = (nx as u64) * (ny as u64) * (nz as u64);
        if total == 0 || total > usize::MAX as u64 {
            return Err(GridError::TooManyCells(config.dims));
        }
        let total = total as usize;

        let shards = config.max_threads_allowed.max(1);
        let mut occupied_senders = Vec::with_capacity(shards);
        let mut occupied_receivers = Vec::with_capacity(shards);
        for _ in 0..shards {
            let (tx, rx) = crossbeam_channel::unbounded();
            occupied_senders.push(tx);
            occupied_receivers.push(rx);
        }

        let mut cells = Vec::with_capacity(total);
        cells.resize_with(total, Cell::default);

        Ok(Self { config, cells, occupied_senders, occupied_receivers })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn dims(&self) -> (u32, u32, u32) {
        self.config.dims
    }

    pub fn cell_size(&self) -> Vec3 {
        self.config.cell_size
    }

    pub fn max_cell_radius(&self) -> f32 {
        // half-diagonal of a single cell, used by query range expansion
        (self.config.cell_size * 0.5).length()
    }

    pub fn is_inside(&self, c: CellPos) -> bool {
        let (nx, ny, nz) = self.config.dims;
        c.x >= 0 && c.y >= 0 && c.z >= 0 && (c.x as u32) < nx && (c.y as u32) < ny && (c.z as u32) < nz
    }

    pub fn get_index_at(&self, c: CellPos) -> Option<usize> {
        if !self.is_inside(c) {
            return None;
        }
        let (nx, ny, _nz) = self.config.dims;
        Some((c.x as usize) + (nx as usize) * ((c.y as usize) + (ny as usize) * (c.z as usize)))
    }

    pub fn world_to_cage(&self, p: Vec3) -> CellPos {
        let rel = (p - self.config.origin) / self.config.cell_size;
        IVec3::new(rel.x.floor() as i32, rel.y.floor() as i32, rel.z.floor() as i32)
    }

    pub fn cage_to_world(&self, c: CellPos) -> Vec3 {
        self.config.origin
            + Vec3::new(c.x as f32 + 0.5, c.y as f32 + 0.5, c.z as f32 + 0.5) * self.config.cell_size
    }

    pub fn at(&self, c: CellPos) -> Option<&Cell> {
        self.get_index_at(c).map(|i| &self.cells[i])
    }

    pub fn at_index(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Enumerates the integer AABB `[WorldToCage(center-range), WorldToCage(center+range)]`
    /// clipped to bounds
    pub fn get_neighbor_cells(&self, center: Vec3, range: Vec3) -> Vec<CellPos> {
        let min = self.world_to_cage(center - range);
        let max = self.world_to_cage(center + range);
        let mut out = Vec::new();
        for z in min.z.max(0)..=max.z.min(self.config.dims.2 as i32 - 1) {
            for y in min.y.max(0)..=max.y.min(self.config.dims.1 as i32 - 1) {
                for x in min.x.max(0)..=max.x.min(self.config.dims.0 as i32 - 1) {
                    out.push(IVec3::new(x, y, z));
                }
            }
        }
        out
    }

    /// Returns every cell whose AABB intersects the capsule `start..end` with
    /// the given radius, via a conservative AABB of the swept capsule
    /// expanded by `ceil(radius / cellSize)`
    pub fn sphere_sweep_for_cells(&self, start: Vec3, end: Vec3, radius: f32) -> Vec<CellPos> {
        let lo = start.min(end) - Vec3::splat(radius);
        let hi = start.max(end) + Vec3::splat(radius);
        let center = (lo + hi) * 0.5;
        let half_range = (hi - lo) * 0.5;
        self.get_neighbor_cells(center, half_range)
    }

    /// Enqueues a cell index onto its shard's occupied-cells queue, sharded
    /// by `cellIndex % maxThreadsAllowed`
    pub fn enqueue_occupied(&self, cell_index: usize) {
        let shard = cell_index % self.occupied_senders.len();
        // An unbounded channel never blocks; a send error only happens if
        // every receiver has been dropped, which cannot happen while `self`
        // is alive (the grid owns both ends).
        let _ = self.occupied_senders[shard].send(cell_index);
    }

    /// Drains every shard's occupied queue in parallel, locking, clearing,
    /// and unlocking each dequeued cell exactly once
    pub fn reset(&self) {
        use rayon::prelude::*;
        self.occupied_receivers.par_iter().for_each(|rx| {
            while let Ok(index) = rx.try_recv() {
                if let Some(cell) = self.cells.get(index) {
                    let guard = cell.lock();
                    guard.reset();
                }
            }
        });
        trace!("grid reset complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> Grid {
        Grid::new(GridConfig {
            origin: Vec3::ZERO,
            dims: (10, 10, 1),
            cell_size: Vec3::new(100.0, 100.0, 100.0),
            max_threads_allowed: 4,
            min_batch_size_allowed: 16,
        })
        .unwrap()
    }

    #[test]
    fn world_to_cage_and_back_roundtrip_to_cell_center() {
        let grid = small_grid();
        let c = grid.world_to_cage(Vec3::new(150.0, 250.0, 0.0));
        assert_eq!(c, IVec3::new(1, 2, 0));
        let center = grid.cage_to_world(c);
        assert_eq!(center, Vec3::new(150.0, 250.0, 50.0));
    }

    #[test]
    fn index_is_row_major_xyz() {
        let grid = small_grid();
        assert_eq!(grid.get_index_at(IVec3::new(0, 0, 0)), Some(0));
        assert_eq!(grid.get_index_at(IVec3::new(1, 0, 0)), Some(1));
        assert_eq!(grid.get_index_at(IVec3::new(0, 1, 0)), Some(10));
        assert_eq!(grid.get_index_at(IVec3::new(9, 9, 0)), Some(99));
        assert_eq!(grid.get_index_at(IVec3::new(10, 0, 0)), None);
    }

    #[test]
    fn neighbor_cells_clip_to_bounds() {
        let grid = small_grid();
        let cells = grid.get_neighbor_cells(Vec3::ZERO, Vec3::splat(50.0));
        // origin cell only overlaps cell (0,0,0) once clipped at the lower bound
        assert!(cells.contains(&IVec3::new(0, 0, 0)));
        assert!(cells.iter().all(|c| c.x >= 0 && c.y >= 0));
    }

    #[test]
    fn reset_is_idempotent_with_no_registrations() {
        let grid = small_grid();
        grid.reset();
        grid.reset();
        assert!(grid.at(IVec3::ZERO).unwrap().is_empty());
    }

    #[test]
    fn construction_rejects_zero_cell_size() {
        let err = Grid::new(GridConfig { cell_size: Vec3::ZERO, ..GridConfig::default() }).unwrap_err();
        assert!(matches!(err, GridError::ZeroCellSize(_)));
    }
}
