//! This crate collects elements that are shared between command-line
//! programs driving pixel simulations.

#[cfg(feature = "simulation")]
use clap::Args;
#[cfg(feature = "simulation")]
use data::parameters::{IntegratorError, IntegratorOrder, PixelOptions};
#[cfg(feature = "tui")]
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
#[cfg(feature = "tui")]
use log::LevelFilter;
use std::path::PathBuf;
#[cfg(feature = "tui")]
use std::time::Duration;
#[cfg(feature = "tui")]
use syslog::Facility;

/// CLI arguments controlling the time integration
#[cfg(feature = "simulation")]
#[derive(Args, Debug)]
pub struct SharedArgs {
    /// Order of the Runge-Kutta integrator, 1 selects fixed-step forward Euler
    #[arg(long, default_value_t = IntegratorOrder::default().order(), value_parser = clap::value_parser!(u8).range(1..=4))]
    pub order: u8,

    /// Absolute error tolerance of adaptive integrators
    #[arg(long, default_value_t = IntegratorError::default().abs)]
    pub abs_err: f64,

    /// Relative error tolerance of adaptive integrators
    #[arg(long, default_value_t = IntegratorError::default().rel)]
    pub rel_err: f64,

    /// Upper bound on the integration timestep
    #[arg(long)]
    pub max_dt: Option<f64>,

    /// Spread the computation over this many threads (0 = one per CPU)
    ///
    /// By default, the simulation runs on the main thread.
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}
//
#[cfg(feature = "simulation")]
impl SharedArgs {
    /// Pixel simulator options matching these arguments
    pub fn pixel_options(&self) -> PixelOptions {
        let defaults = PixelOptions::default();
        PixelOptions {
            integrator: IntegratorOrder::from_order(self.order).unwrap_or(defaults.integrator),
            max_err: IntegratorError {
                abs: self.abs_err,
                rel: self.rel_err,
            },
            max_timestep: self.max_dt.unwrap_or(defaults.max_timestep),
            enable_multithreading: self.threads.is_some(),
            max_threads: self.threads.unwrap_or(defaults.max_threads),
        }
    }
}

/// Enable logging to syslog, or to stderr if syslog is not available
#[cfg(feature = "tui")]
pub fn init_syslog() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = syslog::init(Facility::default(), level, None) {
        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
        log::warn!("Failed to initialize syslog ({e}), logging to stderr instead");
    }
}

/// Path of the simulation output file
pub fn simulation_output_path(output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| "output.h5".into())
}

/// Set up a progress bar with a standard style
#[cfg(feature = "tui")]
pub fn init_progress_reporting(message: impl Into<String>, len: usize) -> ProgressBar {
    let progress = ProgressBar::new(len as u64)
        .with_message(message.into())
        .with_style(
            ProgressStyle::with_template("{msg} {pos}/{len} {wide_bar} {elapsed}/~{duration}")
                .expect("Failed to parse style"),
        )
        .with_finish(ProgressFinish::AndClear);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}
