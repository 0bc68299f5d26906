pub mod clock;
pub mod config;
pub mod error;
pub mod network;
pub mod traffic;
pub mod vehicle;

pub use error::{Result, TrafficError};
pub use traffic::TrafficCoordinator;
