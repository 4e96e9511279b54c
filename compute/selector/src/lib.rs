//! Pick the simulator requested by a model's options, and expose it through
//! the [`Simulation`] facade.

pub mod simulation;

pub use simulation::{AvgMinMax, Simulation};

use compute::{Simulate, StopHandle};
use compute_pixel::PixelSim;
use data::{
    geometry::GeometryError,
    model::{CompartmentSpecies, Model},
    parameters::{IntegratorError, IntegratorOrder, SimulatorType},
};
use ndarray::ArrayView2;
use thiserror::Error;

/// Available simulators
#[derive(Debug)]
pub enum Simulator {
    /// Finite differences on the geometry image's pixels
    Pixel(PixelSim),
}
//
impl Simulator {
    /// Set up the simulator selected by the model's options
    pub fn new(model: &Model, simulated: &[CompartmentSpecies]) -> Result<Self, Error> {
        match model.options.simulator {
            SimulatorType::Pixel => Ok(Self::Pixel(PixelSim::new(model, simulated)?)),
        }
    }

    /// Time derivative of a compartment's concentrations, if the simulator
    /// keeps track of it
    pub fn dcdt(&self, compartment_index: usize) -> Option<ArrayView2<'_, f64>> {
        match self {
            Self::Pixel(sim) => Some(sim.dcdt(compartment_index)),
        }
    }
}
//
impl Simulate for Simulator {
    type Error = Error;

    fn set_integration_order(&mut self, order: IntegratorOrder) {
        match self {
            Self::Pixel(sim) => sim.set_integration_order(order),
        }
    }

    fn integration_order(&self) -> IntegratorOrder {
        match self {
            Self::Pixel(sim) => sim.integration_order(),
        }
    }

    fn set_integrator_error(&mut self, max_err: IntegratorError) {
        match self {
            Self::Pixel(sim) => sim.set_integrator_error(max_err),
        }
    }

    fn set_max_dt(&mut self, max_dt: f64) {
        match self {
            Self::Pixel(sim) => sim.set_max_dt(max_dt),
        }
    }

    fn run(&mut self, time: f64) -> Result<usize, Error> {
        match self {
            Self::Pixel(sim) => Ok(sim.run(time)?),
        }
    }

    fn num_compartments(&self) -> usize {
        match self {
            Self::Pixel(sim) => sim.num_compartments(),
        }
    }

    fn concentrations(&self, compartment_index: usize) -> ArrayView2<'_, f64> {
        match self {
            Self::Pixel(sim) => sim.concentrations(compartment_index),
        }
    }

    fn lower_order_concentration(
        &self,
        compartment_index: usize,
        species_index: usize,
        pixel_index: usize,
    ) -> f64 {
        match self {
            Self::Pixel(sim) => {
                sim.lower_order_concentration(compartment_index, species_index, pixel_index)
            }
        }
    }

    fn stop_handle(&self) -> StopHandle {
        match self {
            Self::Pixel(sim) => sim.stop_handle(),
        }
    }
}

/// Things that can go wrong when simulating a model
#[derive(Debug, Error)]
pub enum Error {
    /// Error from the pixel simulator
    #[error("pixel simulation failed")]
    Pixel(#[from] compute_pixel::Error),

    /// Reference to a species that the model does not have
    #[error("no species with identifier '{0}'")]
    UnknownSpecies(String),

    /// Simulation results do not fit the model
    #[error("failed to write simulation results to the model")]
    Model(#[from] GeometryError),
}
