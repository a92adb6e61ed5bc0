// Segmentry library crate
//
// The binary is a thin CLI over these modules; tests drive the engine
// through the same public surface.

pub mod config;
pub mod demo;
pub mod engine;
pub mod model;
pub mod store;
pub mod thresholds;
