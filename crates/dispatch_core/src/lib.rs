pub mod broadcast;
pub mod clock;
pub mod config;
pub mod context;
pub mod distributions;
pub mod engine;
pub mod error;
pub mod location;
pub mod matching;
pub mod model;
pub mod route_tracker;
pub mod routing;
pub mod runner;
pub mod scenario;
pub mod spatial;
pub mod store;
pub mod systems;
pub mod telemetry;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;
