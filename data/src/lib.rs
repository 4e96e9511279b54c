//! Data format used by the pixel reaction-diffusion simulation
//!
//! This crate describes what is being simulated: compartment and membrane
//! geometry, per-species concentration fields, reactions and simulation
//! options. Simulation backends only read from it.

pub mod field;
pub mod geometry;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod model;
pub mod parameters;
