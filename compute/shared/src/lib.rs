//! Common facilities shared by all simulators

use data::parameters::{IntegratorError, IntegratorOrder};
use ndarray::ArrayView2;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Simulator interface expected by the simulation facade
pub trait Simulate {
    /// Error type used by this simulator
    type Error: std::error::Error + Send + Sync + 'static;

    /// Select the integration scheme used by subsequent runs
    fn set_integration_order(&mut self, order: IntegratorOrder);

    /// Current integration scheme
    fn integration_order(&self) -> IntegratorOrder;

    /// Set the error tolerances of adaptive integration schemes
    fn set_integrator_error(&mut self, max_err: IntegratorError);

    /// Set the upper bound on the timestep
    fn set_max_dt(&mut self, max_dt: f64);

    /// Advance the simulation by `time`
    ///
    /// Returns the number of integration steps that were attempted, including
    /// rejected ones.
    fn run(&mut self, time: f64) -> Result<usize, Self::Error>;

    /// Number of simulated compartments
    fn num_compartments(&self) -> usize;

    /// Concentrations of a compartment's species, as a `[pixels, species]`
    /// array
    fn concentrations(&self, compartment_index: usize) -> ArrayView2<'_, f64>;

    /// Lower-order solution of the last adaptive step, where available
    ///
    /// Returns 0 if the last step did not produce one.
    fn lower_order_concentration(
        &self,
        compartment_index: usize,
        species_index: usize,
        pixel_index: usize,
    ) -> f64;

    /// Handle that can be used to stop an ongoing `run()` from another thread
    ///
    /// A request is cleared by the run that stops because of it. A request
    /// that no run has observed yet stops the next one.
    fn stop_handle(&self) -> StopHandle;
}

/// Cooperative cancellation flag
///
/// Clones share the same flag, so a clone can be moved to another thread and
/// used to interrupt a simulation which polls the original.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);
//
impl StopHandle {
    /// Set up a flag that is not raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the simulation to stop at the next opportunity
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Truth that a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Lower the flag
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stop_requested());
        std::thread::spawn(move || clone.request_stop())
            .join()
            .unwrap();
        assert!(handle.is_stop_requested());
        handle.reset();
        assert!(!handle.is_stop_requested());
    }
}
