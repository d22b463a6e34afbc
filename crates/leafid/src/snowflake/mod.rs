//! Time-ordered 64-bit ids for a single coordinated worker.

mod generator;
mod id;

pub use generator::*;
pub use id::*;
