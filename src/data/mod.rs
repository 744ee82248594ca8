//! Data module - region, table loading, merging and spatial joins

mod frame;
mod geometry;
mod loader;
mod merger;
mod spatial;

pub use frame::{bounds_of, FrameError, GeoFrame, GEOMETRY_COLUMN};
pub use geometry::{RegionLoader, RegionOptions};
pub use loader::{is_numeric, DataLoader, TableOptions};
pub use merger::{JoinKind, JoinSpec, Merger};
pub use spatial::{Aggregation, PointSpec, SpatialJoiner, POINT_COUNT_COLUMN};
