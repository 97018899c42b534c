mod adaptive;
mod backend;
pub mod filters;

pub use adaptive::{
    classify_region, AdaptiveThresholdBackend, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET,
    DEFAULT_OCCUPANCY_THRESHOLD,
};
pub use backend::OccupancyBackend;
