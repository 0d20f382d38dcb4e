//! Plain-library core: spatial hash grid, registrar, query engine, and ORCA
//! planner. No `bevy` dependency here so any host can embed it;
//! `crate::game` is the bevy-side thin wrapper that drives it.

pub mod cell;
pub mod filter;
pub mod grid;
pub mod obstacle;
pub mod orca;
pub mod query;
pub mod registrar;
pub mod stats;
pub mod tick;

pub use cell::{Avoiding, Cell};
pub use filter::{canonical, Filter, Handle, TraitMask};
pub use grid::{CellPos, Grid, GridConfig, GridError};
pub use obstacle::{BoxObstacleArena, BoxObstacleNode, SphereObstacleDesc};
pub use query::{KeepCount, ObstacleHit, QueryOutcome, QueryParams, SortMode, TraceResult};
pub use registrar::{AgentInput, Registrar};
pub use stats::{GridStats, GridStatsSnapshot};
pub use tick::{run_tick, SimAgent, TickConfig};
