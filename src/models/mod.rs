pub mod constants;
pub mod group;
pub mod infra;
pub mod stats;

pub use group::{Group, LogDoc};
pub use infra::GlobalInfra;
pub use stats::{EngineStats, GroupStats, StatsTree};
