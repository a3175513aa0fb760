pub mod config;
pub mod core;
pub mod marks;
pub mod registry;
pub mod reports;
pub mod results;
pub mod schemes;
pub mod snapshots;
