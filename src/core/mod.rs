pub mod assistant;
pub mod memory;
pub mod services;
pub mod traits;
pub mod usage;
