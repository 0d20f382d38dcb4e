//! Per-cell storage: five small-vector buckets behind a busy-wait
//! spinlock, plus the `Registered` flag used to dedup the occupied-cells
//! queue.

use std::sync::atomic::{AtomicBool, Ordering};

use glam::Vec3;
use smallvec::SmallVec;

use super::filter::{Handle, TraitMask};

/// Capacity hint for each bucket's inline storage, mirroring the source's
/// `TInlineAllocator<8>`
pub const INLINE_CAPACITY: usize = 8;

/// Denormalized snapshot written at registration time so queries never
/// touch the entity store
#[derive(Debug, Clone, Copy)]
pub struct Avoiding {
    pub handle: Handle,
    pub location: Vec3,
    pub radius: f32,
    pub traits: TraitMask,
}

pub type Bucket = SmallVec<[Avoiding; INLINE_CAPACITY]>;

/// A single grid cell. Never moved once the grid is constructed (cells are
/// flat-allocated).
pub struct Cell {
    locked: AtomicBool,
    pub agents: Bucket,
    pub sphere_obstacles_dynamic: Bucket,
    pub sphere_obstacles_static: Bucket,
    pub box_obstacles_dynamic: Bucket,
    pub box_obstacles_static: Bucket,
    pub registered: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            locked: AtomicBool::new(false),
            agents: Bucket::new(),
            sphere_obstacles_dynamic: Bucket::new(),
            sphere_obstacles_static: Bucket::new(),
            box_obstacles_dynamic: Bucket::new(),
            box_obstacles_static: Bucket::new(),
            registered: false,
        }
    }
}

/// RAII guard returned by [`Cell::lock`]; releases the spinlock on drop even
/// if the critical section panics
pub struct CellGuard<'a> {
    cell: &'a Cell,
}

impl<'a> std::ops::Deref for CellGuard<'a> {
    type Target = Cell;
    fn deref(&self) -> &Cell {
        self.cell
    }
}

// SAFETY: the guard is only constructed after successfully acquiring
// `locked`, and the interior mutability below is only exposed through
// `&mut` accessors gated by holding the guard.
impl<'a> CellGuard<'a> {
    #[allow(clippy::mut_from_ref)]
    fn cell_mut(&self) -> &mut Cell {
        unsafe { &mut *(self.cell as *const Cell as *mut Cell) }
    }

    pub fn agents_mut(&self) -> &mut Bucket {
        &mut self.cell_mut().agents
    }

    pub fn bucket_mut(&self, kind: ObstacleBucket) -> &mut Bucket {
        let cell = self.cell_mut();
        match kind {
            ObstacleBucket::SphereDynamic => &mut cell.sphere_obstacles_dynamic,
            ObstacleBucket::SphereStatic => &mut cell.sphere_obstacles_static,
            ObstacleBucket::BoxDynamic => &mut cell.box_obstacles_dynamic,
            ObstacleBucket::BoxStatic => &mut cell.box_obstacles_static,
        }
    }

    /// Sets `registered = true`; returns whether this call was the one that
    /// flipped it (i.e. "first writer wins").
    pub fn mark_registered(&self) -> bool {
        let cell = self.cell_mut();
        if cell.registered {
            false
        } else {
            cell.registered = true;
            true
        }
    }

    pub fn reset(&self) {
        let cell = self.cell_mut();
        cell.agents.clear();
        cell.sphere_obstacles_dynamic.clear();
        cell.sphere_obstacles_static.clear();
        cell.box_obstacles_dynamic.clear();
        cell.box_obstacles_static.clear();
        cell.registered = false;
    }
}

impl<'a> Drop for CellGuard<'a> {
    fn drop(&mut self) {
        self.cell.locked.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleBucket {
    SphereDynamic,
    SphereStatic,
    BoxDynamic,
    BoxStatic,
}

impl Cell {
    /// Busy-wait spinlock acquire with exponential backoff.
    pub fn lock(&self) -> CellGuard<'_> {
        let mut spins: u32 = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            for _ in 0..(1u32 << spins.min(6)) {
                std::hint::spin_loop();
            }
            spins += 1;
        }
        CellGuard { cell: self }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn all_buckets(&self) -> [&Bucket; 5] {
        [
            &self.agents,
            &self.sphere_obstacles_dynamic,
            &self.sphere_obstacles_static,
            &self.box_obstacles_dynamic,
            &self.box_obstacles_static,
        ]
    }

    pub fn len(&self) -> usize {
        self.all_buckets().iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_reset_clears_buckets_and_flag() {
        let cell = Cell::default();
        {
            let guard = cell.lock();
            guard.agents_mut().push(Avoiding {
                handle: Handle::new(0, 1),
                location: Vec3::ZERO,
                radius: 1.0,
                traits: TraitMask::empty(),
            });
            guard.mark_registered();
        }
        assert_eq!(cell.len(), 1);
        assert!(cell.is_registered());
        {
            let guard = cell.lock();
            guard.reset();
        }
        assert_eq!(cell.len(), 0);
        assert!(!cell.is_registered());
    }

    #[test]
    fn mark_registered_is_first_writer_wins() {
        let cell = Cell::default();
        let guard = cell.lock();
        assert!(guard.mark_registered());
        assert!(!guard.mark_registered());
    }
}
