//! Simulation options

/// Available simulators
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum SimulatorType {
    /// Finite-difference simulation on the geometry image's pixels
    #[default]
    Pixel,
}

/// Embedded Runge-Kutta scheme used by the pixel simulator
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum IntegratorOrder {
    /// RK1(0)1: forward Euler, fixed timestep, no error estimate
    Rk101 = 1,

    /// RK2(1)2: Heun with embedded forward Euler
    #[default]
    Rk212 = 2,

    /// RK3(2)3: Shu-Osher with embedded Heun
    Rk323 = 3,

    /// RK4(3)5: 3S* low-storage scheme with embedded third-order solution
    Rk435 = 4,
}
//
impl IntegratorOrder {
    /// Order of accuracy of the higher-order solution
    pub fn order(self) -> u8 {
        self as u8
    }

    /// Scheme of a given order of accuracy, if supported
    pub fn from_order(order: u8) -> Option<Self> {
        match order {
            1 => Some(Self::Rk101),
            2 => Some(Self::Rk212),
            3 => Some(Self::Rk323),
            4 => Some(Self::Rk435),
            _ => None,
        }
    }

    /// Truth that the scheme provides an error estimate and adapts its
    /// timestep accordingly
    pub fn is_adaptive(self) -> bool {
        self != Self::Rk101
    }
}

/// Maximal local error allowed on each accepted step
///
/// An entry of the state vector passes if the difference between the higher-
/// and lower-order solutions is below `abs + rel * concentration`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegratorError {
    /// Absolute tolerance
    pub abs: f64,

    /// Relative tolerance
    pub rel: f64,
}
//
impl Default for IntegratorError {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 0.005,
        }
    }
}

/// Pixel simulator options
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelOptions {
    /// Integration scheme
    pub integrator: IntegratorOrder,

    /// Error tolerances of adaptive schemes
    pub max_err: IntegratorError,

    /// Upper bound on the timestep
    pub max_timestep: f64,

    /// Spread per-pixel work over multiple threads
    pub enable_multithreading: bool,

    /// Maximal number of threads, 0 lets the thread pool decide
    pub max_threads: usize,
}
//
impl Default for PixelOptions {
    fn default() -> Self {
        Self {
            integrator: IntegratorOrder::default(),
            max_err: IntegratorError::default(),
            max_timestep: f64::MAX,
            enable_multithreading: false,
            max_threads: 0,
        }
    }
}

/// Simulation options
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Options {
    /// Simulator to be used
    pub simulator: SimulatorType,

    /// Pixel simulator options
    pub pixel: PixelOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrator_orders() {
        for order in 1..=4 {
            let integrator = IntegratorOrder::from_order(order).unwrap();
            assert_eq!(integrator.order(), order);
        }
        assert_eq!(IntegratorOrder::from_order(0), None);
        assert_eq!(IntegratorOrder::from_order(5), None);
        assert!(!IntegratorOrder::Rk101.is_adaptive());
        assert!(IntegratorOrder::default().is_adaptive());
    }
}
