//! Obstacle descriptors handed to the registrar each tick
//!
//! Box obstacles form cyclic polylines via `prev`/`next` links, represented
//! as indices into an arena rather than shared-ownership pointers.

use glam::{Vec2, Vec3};

use super::filter::Handle;

#[derive(Debug, Clone, Copy)]
pub struct SphereObstacleDesc {
    pub handle: Handle,
    pub location: Vec3,
    pub radius: f32,
    pub is_static: bool,
    pub registered: bool,
}

/// One vertex of a box-obstacle polyline. The ORCA segment for this node
/// spans `point2d -> next.point2d` with vertical extent `[point3d.z, point3d.z + height]`.
#[derive(Debug, Clone, Copy)]
pub struct BoxObstacleNode {
    pub handle: Handle,
    pub point2d: Vec2,
    pub point3d: Vec3,
    pub height: f32,
    pub unit_dir: Vec2,
    pub is_convex: bool,
    pub is_static: bool,
    pub registered: bool,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Owns every box-obstacle node for the tick; `prev`/`next` are arena
/// indices, never raw pointers or `Rc`s
#[derive(Default)]
pub struct BoxObstacleArena {
    nodes: Vec<BoxObstacleNode>,
}

impl BoxObstacleArena {
    pub fn push(&mut self, node: BoxObstacleNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&BoxObstacleNode> {
        self.nodes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoxObstacleNode> {
        self.nodes.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BoxObstacleNode)> {
        self.nodes.iter().enumerate()
    }

    /// The segment `v -> v.next` for a node with a valid `next` link, or
    /// `None` for a dangling link
    pub fn segment(&self, index: usize) -> Option<(&BoxObstacleNode, &BoxObstacleNode)> {
        let node = self.nodes.get(index)?;
        let next = self.nodes.get(node.next?)?;
        Some((node, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(i: u32) -> Handle {
        Handle::new(i, i as u64)
    }

    #[test]
    fn dangling_next_link_yields_no_segment() {
        let mut arena = BoxObstacleArena::default();
        let idx = arena.push(BoxObstacleNode {
            handle: h(0),
            point2d: Vec2::ZERO,
            point3d: Vec3::ZERO,
            height: 10.0,
            unit_dir: Vec2::X,
            is_convex: true,
            is_static: true,
            registered: false,
            prev: None,
            next: None,
        });
        assert!(arena.segment(idx).is_none());
    }

    #[test]
    fn valid_chain_yields_segment() {
        let mut arena = BoxObstacleArena::default();
        let a = arena.push(BoxObstacleNode {
            handle: h(0),
            point2d: Vec2::ZERO,
            point3d: Vec3::ZERO,
            height: 10.0,
            unit_dir: Vec2::X,
            is_convex: true,
            is_static: true,
            registered: false,
            prev: None,
            next: None,
        });
        let b = arena.push(BoxObstacleNode {
            handle: h(1),
            point2d: Vec2::new(10.0, 0.0),
            point3d: Vec3::new(10.0, 0.0, 0.0),
            height: 10.0,
            unit_dir: Vec2::X,
            is_convex: true,
            is_static: true,
            registered: false,
            prev: Some(a),
            next: None,
        });
        arena.get_mut(a).unwrap().next = Some(b);
        let (start, end) = arena.segment(a).unwrap();
        assert_eq!(start.point2d, Vec2::ZERO);
        assert_eq!(end.point2d, Vec2::new(10.0, 0.0));
    }
}
