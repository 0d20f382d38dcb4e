//! Trait tags and filters for the entity/trait contract hosts use to describe
//! what a registered handle currently is.
//!
//! The core never owns entity storage. Hosts hand the registrar and query
//! engine a [`Handle`] plus a [`TraitMask`] describing which traits that
//! handle currently carries; a [`Filter`] is a conjunction of "must include"
//! and "must exclude" trait bits, evaluated with a single AND/compare.

use std::fmt;

// A tiny hand-rolled bitflags macro: the full `bitflags` crate would be one
// more dependency for eleven bits.
macro_rules! bitflags_like {
    (pub struct $name:ident: $ty:ty { $(const $flag:ident = $val:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $flag: $name = $name($val);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn intersects(&self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }

            pub const fn union(self, other: Self) -> Self {
                $name(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

/// A stable identifier for an externally-owned entity.
///
/// `hash` is a fingerprint independent of `index` (e.g. a generation-aware
/// hash) used by neighbor dedup so the same subject reached through
/// two different cells collapses to one neighbor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub index: u32,
    pub hash: u64,
}

impl Handle {
    pub const fn new(index: u32, hash: u64) -> Self {
        Self { index, hash }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}#{:x})", self.index, self.hash)
    }
}

bitflags_like! {
    pub struct TraitMask: u32 {
        const LOCATED           = 1 << 0;
        const COLLIDER          = 1 << 1;
        const AVOIDING          = 1 << 2;
        const AVOIDANCE         = 1 << 3;
        const ACTIVATED         = 1 << 4;
        const TRACE             = 1 << 5;
        const REGISTER_MULTIPLE = 1 << 6;
        const SPHERE_OBSTACLE   = 1 << 7;
        const BOX_OBSTACLE      = 1 << 8;
        const CORPSE            = 1 << 9;
        const DYING             = 1 << 10;
    }
}

/// A conjunction of required and forbidden trait bits.
///
/// Equivalent to the source engine's `FFilter::Make<...>().Exclude<...>()`
/// builder; here it is just two masks compared against a candidate's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Filter {
    include: TraitMask,
    exclude: TraitMask,
}

impl Filter {
    pub const fn new() -> Self {
        Self { include: TraitMask::empty(), exclude: TraitMask::empty() }
    }

    #[must_use]
    pub const fn include(mut self, mask: TraitMask) -> Self {
        self.include = TraitMask(self.include.0 | mask.0);
        self
    }

    #[must_use]
    pub const fn exclude(mut self, mask: TraitMask) -> Self {
        self.exclude = TraitMask(self.exclude.0 | mask.0);
        self
    }

    pub fn matches(&self, candidate: TraitMask) -> bool {
        candidate.contains(self.include) && !candidate.intersects(self.exclude)
    }
}

/// Canonical filter sets, one constructor per registration /
/// neighbor-gather phase. Kept as functions (not constants) since `Dying`
/// amends the neighbor-base filter per-agent, not per-grid.
pub mod canonical {
    use super::{Filter, TraitMask as T};

    pub fn trace_link() -> Filter {
        Filter::new().include(TraitMask(T::LOCATED.0 | T::TRACE.0 | T::ACTIVATED.0))
    }

    pub fn sphere_obstacle_link() -> Filter {
        Filter::new().include(TraitMask(T::LOCATED.0 | T::SPHERE_OBSTACLE.0))
    }

    pub fn agent_single() -> Filter {
        Filter::new()
            .include(TraitMask(T::LOCATED.0 | T::COLLIDER.0 | T::AVOIDING.0 | T::ACTIVATED.0))
            .exclude(T::REGISTER_MULTIPLE)
    }

    pub fn agent_multiple() -> Filter {
        Filter::new()
            .include(TraitMask(
                T::LOCATED.0 | T::COLLIDER.0 | T::AVOIDING.0 | T::REGISTER_MULTIPLE.0 | T::ACTIVATED.0,
            ))
            .exclude(T::SPHERE_OBSTACLE)
    }

    pub fn sphere_obstacle_register() -> Filter {
        Filter::new().include(TraitMask(
            T::LOCATED.0 | T::COLLIDER.0 | T::AVOIDING.0 | T::SPHERE_OBSTACLE.0,
        ))
    }

    pub fn box_obstacle_register() -> Filter {
        Filter::new().include(TraitMask(T::BOX_OBSTACLE.0 | T::LOCATED.0 | T::AVOIDING.0))
    }

    /// Base neighbor filter for Decouple; callers must further amend with
    /// [`amend_dying`] when the querying agent carries the `Dying` trait.
    pub fn agent_neighbor_base() -> Filter {
        Filter::new()
            .include(TraitMask(T::LOCATED.0 | T::COLLIDER.0 | T::AVOIDANCE.0 | T::AVOIDING.0 | T::ACTIVATED.0))
            .exclude(TraitMask(T::SPHERE_OBSTACLE.0 | T::BOX_OBSTACLE.0 | T::CORPSE.0))
    }

    /// Dying agents only avoid other dying agents
    pub fn amend_dying(base: Filter) -> Filter {
        base.include(T::DYING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_excludes_register_multiple() {
        let f = canonical::agent_single();
        let single = TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDING | TraitMask::ACTIVATED;
        let multi = single | TraitMask::REGISTER_MULTIPLE;
        assert!(f.matches(single));
        assert!(!f.matches(multi));
    }

    #[test]
    fn dying_amendment_requires_dying_on_both_sides() {
        let base = canonical::agent_neighbor_base();
        let amended = canonical::amend_dying(base);
        let plain = TraitMask::LOCATED | TraitMask::COLLIDER | TraitMask::AVOIDANCE | TraitMask::AVOIDING | TraitMask::ACTIVATED;
        let dying = plain | TraitMask::DYING;
        assert!(!amended.matches(plain));
        assert!(amended.matches(dying));
        assert!(base.matches(plain));
    }
}
