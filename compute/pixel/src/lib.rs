//! Pixel-based reaction-diffusion simulation
//!
//! This crate integrates the reaction-diffusion equations of a model on the
//! pixels of its geometry image. Diffusion is discretized with the 5-point
//! Laplacian stencil, reactions are evaluated pixel by pixel, and membrane
//! reactions couple the boundary pixels of adjacent compartments.
//!
//! Time integration uses forward Euler at a fixed timestep, or one of several
//! embedded Runge-Kutta schemes whose lower-order solution drives an adaptive
//! timestep.

pub mod compartment;
pub mod membrane;
pub mod reaction;
pub mod tableau;

use crate::{
    compartment::{RkError, SimCompartment},
    membrane::SimMembrane,
    reaction::ExtraVariables,
    tableau::{Embedded, Stage},
};
use compute::{Simulate, StopHandle};
use data::{
    model::{CompartmentSpecies, Model},
    parameters::{IntegratorError, IntegratorOrder},
};
use log::{debug, info, trace, warn};
use ndarray::ArrayView2;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::Arc;
use thiserror::Error;

/// Timestep of the first adaptive step
const INITIAL_TIMESTEP: f64 = 1e-7;

/// Safety factor applied to the optimal timestep predicted by the error
const SAFETY_FACTOR: f64 = 0.95;

/// Largest timestep increase after an accepted step
const MAX_GROWTH_FACTOR: f64 = 5.0;

/// Largest timestep decrease after a rejected step
const MIN_SHRINK_FACTOR: f64 = 0.1;

/// Smallest timestep, relative to the largest allowed one, below which the
/// error tolerances are considered impossible to meet
const MIN_RELATIVE_TIMESTEP: f64 = 1e-20;

/// Relative tolerance on reaching the end of a run
const RELATIVE_TIME_TOLERANCE: f64 = 1e-12;

/// Pixel-based reaction-diffusion simulator
#[derive(Debug)]
pub struct PixelSim {
    /// Simulated compartments
    compartments: Vec<SimCompartment>,

    /// Membranes with reactions affecting simulated species
    membranes: Vec<SimMembrane>,

    /// Integration scheme
    integrator: IntegratorOrder,

    /// Error tolerances of adaptive schemes
    max_err: IntegratorError,

    /// Upper bound on the timestep
    max_timestep: f64,

    /// Timestep proposed for the next adaptive step
    next_timestep: f64,

    /// Largest forward Euler timestep that keeps diffusion stable
    max_stable_timestep: f64,

    /// Number of rejected steps during the last run
    discarded_steps: usize,

    /// Cooperative cancellation flag
    stop: StopHandle,

    /// Dedicated thread pool, if multithreading is enabled
    thread_pool: Option<Arc<ThreadPool>>,
}
//
impl PixelSim {
    /// Set up the simulation of all non-constant species of a model
    pub fn from_model(model: &Model) -> Result<Self, Error> {
        Self::new(model, &model.simulated_species())
    }

    /// Set up the simulation of some species of some compartments
    ///
    /// Initial concentrations and simulation options are taken from the
    /// model. Membrane reactions are set up for every membrane that touches a
    /// simulated compartment. Reactions may depend on the simulation time and
    /// on the physical coordinates of pixels.
    pub fn new(model: &Model, simulated: &[CompartmentSpecies]) -> Result<Self, Error> {
        let options = model.options.pixel;
        let extra_variables = ExtraVariables::from_model(model);
        let compartments = simulated
            .iter()
            .map(|CompartmentSpecies { compartment_id, species_ids }| {
                let compartment = model
                    .compartment(compartment_id)
                    .ok_or_else(|| Error::UnknownCompartment(compartment_id.clone()))?;
                SimCompartment::new(model, compartment, species_ids.clone(), &extra_variables)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut membranes = Vec::new();
        for membrane in model.membranes() {
            let find = |id: &str| {
                compartments
                    .iter()
                    .enumerate()
                    .find(|(_, c)| c.id() == id)
            };
            let compartment_a = find(membrane.compartment_a());
            let compartment_b = find(membrane.compartment_b());
            if compartment_a.is_none() && compartment_b.is_none() {
                debug!("Membrane '{}' has no simulated neighbour", membrane.id());
                continue;
            }
            let membrane = SimMembrane::new(
                model,
                membrane,
                compartment_a,
                compartment_b,
                &extra_variables,
            )?;
            if membrane.has_reactions() {
                membranes.push(membrane);
            } else {
                debug!("Membrane '{}' has no reactions", membrane.id());
            }
        }

        let thread_pool = if options.enable_multithreading {
            let pool = ThreadPoolBuilder::new()
                .num_threads(options.max_threads)
                .build()?;
            info!("Using {} threads", pool.current_num_threads());
            Some(Arc::new(pool))
        } else {
            None
        };
        let mut sim = Self {
            compartments,
            membranes,
            integrator: options.integrator,
            max_err: options.max_err,
            max_timestep: options.max_timestep,
            next_timestep: INITIAL_TIMESTEP,
            max_stable_timestep: f64::INFINITY,
            discarded_steps: 0,
            stop: StopHandle::new(),
            thread_pool,
        };
        for compartment in &mut sim.compartments {
            compartment.set_multithreaded(options.enable_multithreading);
        }
        sim.max_stable_timestep = sim
            .compartments
            .iter()
            .map(SimCompartment::max_stable_timestep)
            .fold(f64::INFINITY, f64::min);
        info!(
            "Pixel simulation of {} compartments and {} membranes, integrator {:?}",
            sim.compartments.len(),
            sim.membranes.len(),
            sim.integrator
        );
        Ok(sim)
    }

    /// Simulated compartments
    pub fn compartments(&self) -> &[SimCompartment] {
        &self.compartments
    }

    /// Index of a simulated compartment
    pub fn compartment_index(&self, id: &str) -> Option<usize> {
        self.compartments.iter().position(|c| c.id() == id)
    }

    /// Time derivative of a compartment's concentrations, as computed during
    /// the last derivative evaluation
    pub fn dcdt(&self, compartment_index: usize) -> ArrayView2<'_, f64> {
        self.compartments[compartment_index].dcdt()
    }

    /// Replace the concentrations of a compartment
    pub fn set_concentrations(
        &mut self,
        compartment_index: usize,
        conc: ArrayView2<'_, f64>,
    ) -> Result<(), Error> {
        self.compartments[compartment_index].set_concentrations(conc)
    }

    /// Number of rejected steps during the last run
    pub fn discarded_steps(&self) -> usize {
        self.discarded_steps
    }

    /// Largest forward Euler timestep that keeps diffusion stable
    pub fn max_stable_timestep(&self) -> f64 {
        self.max_stable_timestep
    }

    /// Compute dcdt everywhere
    ///
    /// Each compartment first computes diffusion, then adds its reactions.
    /// Membranes then add their contributions on both sides.
    pub fn calculate_dcdt(&mut self) {
        for compartment in &mut self.compartments {
            compartment.evaluate_diffusion_operator();
            compartment.evaluate_reactions();
        }
        for membrane in &self.membranes {
            membrane.evaluate_reactions(&mut self.compartments);
        }
    }

    /// Forward Euler step
    fn do_euler_step(&mut self, dt: f64) {
        self.calculate_dcdt();
        for compartment in &mut self.compartments {
            compartment.do_forwards_euler_timestep(dt);
        }
    }

    /// RK2(1)2 step
    fn do_rk212_step(&mut self, dt: f64) {
        self.calculate_dcdt();
        for compartment in &mut self.compartments {
            compartment.do_rk212_substep1(dt);
        }
        self.calculate_dcdt();
        for compartment in &mut self.compartments {
            compartment.do_rk212_substep2(dt);
        }
    }

    /// Low-storage Runge-Kutta step
    fn do_low_storage_step(&mut self, dt: f64, stages: &[Stage], embedded: Embedded) {
        for compartment in &mut self.compartments {
            compartment.do_rk_init();
        }
        for &stage in stages {
            self.calculate_dcdt();
            for compartment in &mut self.compartments {
                compartment.do_rk_substep(dt, stage);
            }
        }
        for compartment in &mut self.compartments {
            compartment.do_rk_finalise(embedded.c_factor, embedded.s2_factor, embedded.s3_factor);
        }
    }

    /// Step with the current adaptive scheme
    fn do_rk_step(&mut self, dt: f64) {
        match self.integrator {
            IntegratorOrder::Rk101 => self.do_euler_step(dt),
            IntegratorOrder::Rk212 => self.do_rk212_step(dt),
            IntegratorOrder::Rk323 => {
                self.do_low_storage_step(dt, &tableau::RK323_STAGES, tableau::RK323_EMBEDDED)
            }
            IntegratorOrder::Rk435 => {
                self.do_low_storage_step(dt, &tableau::RK435_STAGES, tableau::rk435_embedded())
            }
        }
    }

    /// Largest normalized error of the last step, along with the index of the
    /// compartment where it occurs
    fn calculate_rk_error(&self) -> (usize, RkError) {
        let mut worst = (0, RkError::default());
        for (idx, compartment) in self.compartments.iter().enumerate() {
            let error = compartment.calculate_rk_error(self.max_err);
            if error.error.is_nan() {
                return (idx, error);
            }
            if error.error > worst.1.error {
                worst = (idx, error);
            }
        }
        worst
    }

    /// Perform one accepted adaptive step of at most `max_dt`
    ///
    /// Rejected attempts are undone and retried with a smaller timestep.
    /// Returns the timestep of the accepted step.
    fn do_adaptive_step(&mut self, max_dt: f64, time: f64, steps: usize) -> Result<f64, Error> {
        loop {
            self.check_stop(time, steps)?;
            let dt = self.next_timestep.min(max_dt);
            self.do_rk_step(dt);
            let (compartment, RkError { error, species, .. }) = self.calculate_rk_error();
            let next_dt = match StepOutcome::new(dt, error, self.integrator, self.max_timestep) {
                StepOutcome::Accepted { next_dt } => {
                    self.next_timestep = next_dt;
                    trace!("Accepted dt = {dt} with error {error}");
                    return Ok(dt);
                }
                StepOutcome::Rejected { next_dt } => next_dt,
            };

            self.discarded_steps += 1;
            for compartment in &mut self.compartments {
                compartment.undo_rk_step();
            }
            self.next_timestep = next_dt;
            trace!(
                "Rejected dt = {dt} with error {error}, retrying with dt = {}",
                self.next_timestep
            );
            if self.next_timestep < max_dt * MIN_RELATIVE_TIMESTEP {
                let compartment = &self.compartments[compartment];
                let species = compartment.species_ids()[species].clone();
                let compartment = compartment.id().to_owned();
                return Err(if error.is_nan() {
                    Error::NonFinite {
                        compartment,
                        species,
                        time,
                    }
                } else {
                    Error::ToleranceNotMet {
                        compartment,
                        species,
                        timestep: self.next_timestep,
                    }
                });
            }
        }
    }

    /// Fail if a stop was requested, clearing the request
    fn check_stop(&self, time: f64, steps: usize) -> Result<(), Error> {
        if self.stop.is_stop_requested() {
            self.stop.reset();
            info!("Simulation stopped at t = {time} after {steps} steps");
            Err(Error::Stopped { steps, time })
        } else {
            Ok(())
        }
    }

    /// Fail if any concentration is not finite
    fn check_finite(&self, time: f64) -> Result<(), Error> {
        for compartment in &self.compartments {
            if let Some((species, pixel)) = compartment.find_non_finite() {
                let species = compartment.species_ids()[species].clone();
                warn!(
                    "Species '{species}' of compartment '{}' is not finite at pixel {pixel}",
                    compartment.id()
                );
                return Err(Error::NonFinite {
                    compartment: compartment.id().to_owned(),
                    species,
                    time,
                });
            }
        }
        Ok(())
    }

    /// Advance the simulation by `time`, on the current thread pool
    fn run_impl(&mut self, time: f64) -> Result<usize, Error> {
        debug!(
            "Running for t = {time} with {:?}, next dt = {}",
            self.integrator, self.next_timestep
        );
        self.discarded_steps = 0;
        let mut now = 0.0;
        let mut steps = 0;
        while now + time * RELATIVE_TIME_TOLERANCE < time {
            let max_dt = self.max_timestep.min(time - now);
            let dt = if self.integrator.is_adaptive() {
                self.do_adaptive_step(max_dt, now, steps)?
            } else {
                self.check_stop(now, steps)?;
                let dt = max_dt.min(self.max_stable_timestep);
                self.do_euler_step(dt);
                dt
            };
            if let Err(e) = self.check_finite(now + dt) {
                for compartment in &mut self.compartments {
                    compartment.undo_rk_step();
                }
                return Err(e);
            }
            now += dt;
            steps += 1;
        }
        debug!(
            "Reached t = {now} in {steps} steps, {} discarded",
            self.discarded_steps
        );
        Ok(steps + self.discarded_steps)
    }
}
//
impl Simulate for PixelSim {
    type Error = Error;

    fn set_integration_order(&mut self, order: IntegratorOrder) {
        if order != self.integrator {
            for compartment in &mut self.compartments {
                compartment.clear_rk_registers();
            }
        }
        self.integrator = order;
    }

    fn integration_order(&self) -> IntegratorOrder {
        self.integrator
    }

    fn set_integrator_error(&mut self, max_err: IntegratorError) {
        self.max_err = max_err;
    }

    fn set_max_dt(&mut self, max_dt: f64) {
        self.max_timestep = max_dt;
    }

    fn run(&mut self, time: f64) -> Result<usize, Error> {
        match self.thread_pool.clone() {
            Some(pool) => pool.install(|| self.run_impl(time)),
            None => self.run_impl(time),
        }
    }

    fn num_compartments(&self) -> usize {
        self.compartments.len()
    }

    fn concentrations(&self, compartment_index: usize) -> ArrayView2<'_, f64> {
        self.compartments[compartment_index].concentrations()
    }

    fn lower_order_concentration(
        &self,
        compartment_index: usize,
        species_index: usize,
        pixel_index: usize,
    ) -> f64 {
        self.compartments[compartment_index].lower_order_concentration(species_index, pixel_index)
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

/// Decision taken after attempting an adaptive step
#[derive(Copy, Clone, Debug, PartialEq)]
enum StepOutcome {
    /// Keep the step, and attempt `next_dt` next
    Accepted { next_dt: f64 },

    /// Undo the step, and retry with `next_dt`
    Rejected { next_dt: f64 },
}
//
impl StepOutcome {
    /// Judge a step of `dt` whose normalized error is `error`
    ///
    /// A step is kept if its error is at most 1. The next timestep follows
    /// `dt * 0.95 * error^(-1/order)`, allowed to grow at most fivefold up
    /// to `max_timestep` after a success, and to shrink at most tenfold after
    /// a failure. A NaN error is a failure with maximal shrinking.
    fn new(dt: f64, error: f64, integrator: IntegratorOrder, max_timestep: f64) -> Self {
        let exponent = -1.0 / f64::from(integrator.order());
        if error <= 1.0 {
            let factor = if error == 0.0 {
                MAX_GROWTH_FACTOR
            } else {
                (SAFETY_FACTOR * error.powf(exponent)).clamp(MIN_SHRINK_FACTOR, MAX_GROWTH_FACTOR)
            };
            Self::Accepted {
                next_dt: (dt * factor).min(max_timestep),
            }
        } else {
            let factor = if error.is_nan() {
                MIN_SHRINK_FACTOR
            } else {
                (SAFETY_FACTOR * error.powf(exponent)).max(MIN_SHRINK_FACTOR)
            };
            Self::Rejected {
                next_dt: dt * factor,
            }
        }
    }
}

/// Things that can go wrong when setting up or running a pixel simulation
#[derive(Debug, Error)]
pub enum Error {
    /// Reaction rates could not be compiled
    #[error("failed to compile the reaction rates of species [{species}]")]
    Compile {
        species: String,
        #[source]
        source: symbolic::Error,
    },

    /// Reference to an unknown compartment
    #[error("no compartment with identifier '{0}'")]
    UnknownCompartment(String),

    /// Reference to an unknown species
    #[error("no species with identifier '{0}'")]
    UnknownSpecies(String),

    /// Reference to an unknown reaction
    #[error("no reaction with identifier '{0}'")]
    UnknownReaction(String),

    /// A species was attributed to the wrong compartment
    #[error("species '{species}' lives in compartment '{actual}', not '{expected}'")]
    SpeciesCompartmentMismatch {
        species: String,
        expected: String,
        actual: String,
    },

    /// Diffusion constant is negative or not finite
    #[error("species '{species}' has invalid diffusion constant {value}")]
    InvalidDiffusionConstant { species: String, value: f64 },

    /// Concentration array does not match the compartment
    #[error("compartment '{compartment}' expects {expected} concentration values, got {actual}")]
    ConcentrationSize {
        compartment: String,
        expected: usize,
        actual: usize,
    },

    /// Reaction scale factors do not match reactions
    #[error("expected {expected} reaction scale factors, got {actual}")]
    ScaleFactorCount { expected: usize, actual: usize },

    /// Membrane reactions were set up with the wrong compartments
    #[error("membrane '{membrane}' expects compartment '{expected}', got '{actual}'")]
    MembraneCompartmentMismatch {
        membrane: String,
        expected: String,
        actual: String,
    },

    /// Failed to configure thread pool
    #[error("failed to configure thread pool")]
    ThreadPool(#[from] ThreadPoolBuildError),

    /// Some concentrations became NaN or infinite
    #[error("species '{species}' of compartment '{compartment}' is not finite at t = {time}")]
    NonFinite {
        compartment: String,
        species: String,
        time: f64,
    },

    /// The error tolerances cannot be met by any reasonable timestep
    #[error("cannot meet error tolerances on species '{species}' of compartment '{compartment}', timestep fell to {timestep}")]
    ToleranceNotMet {
        compartment: String,
        species: String,
        timestep: f64,
    },

    /// A stop was requested
    #[error("simulation stopped after {steps} steps, at t = {time} within the run")]
    Stopped { steps: usize, time: f64 },
}
