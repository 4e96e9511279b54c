mod models;

use crate::models::ModelKind;
use clap::Parser;
use compute::Simulate;
use compute_selector::Simulation;
use data::hdf5::{self, Writer};
use eyre::{eyre, Result, WrapErr};
use log::{debug, info};
use ndarray::Array2;
use std::{num::NonZeroUsize, path::PathBuf, sync::mpsc};
use ui::SharedArgs;

/// Perform pixel-based reaction-diffusion simulation
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Integration settings
    #[command(flatten)]
    shared: SharedArgs,

    /// Model to be simulated
    #[arg(short, long, value_enum, default_value_t)]
    model: ModelKind,

    /// Species whose concentration is recorded (default: first species)
    #[arg(short, long)]
    species: Option<String>,

    /// Number of rows of the geometry image
    #[arg(short = 'r', long, default_value_t = 100)]
    nbrow: usize,

    /// Number of columns of the geometry image
    #[arg(short = 'c', long, default_value_t = 200)]
    nbcol: usize,

    /// Number of images to be created
    #[arg(short, long, default_value_t = 100)]
    nbimage: usize,

    /// Simulated time between two images
    #[arg(short = 't', long, default_value_t = 10.0)]
    interval: f64,

    /// Width of a pixel, in model length units
    #[arg(long, default_value_t = 1.0)]
    pixel_width: f64,

    /// Path to the results output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Size of the image buffer between the compute and I/O thread
    ///
    /// A larger buffer enables better performance, at the cost of higher RAM
    /// utilization. 2 is the minimum to fully decouple compute and I/O.
    #[arg(long, default_value_t = NonZeroUsize::new(2).unwrap())]
    output_buffer: NonZeroUsize,
}

fn main() -> Result<()> {
    // Enable logging to syslog
    ui::init_syslog();

    // Parse CLI arguments
    let args = Args::parse();
    let shape = [args.nbrow, args.nbcol];
    let file_name = ui::simulation_output_path(args.output);

    // Set up the model and the simulation
    let mut model = args
        .model
        .build(shape)
        .wrap_err("Failed to build the model")?;
    model.set_pixel_width(args.pixel_width);
    model.options.pixel = args.shared.pixel_options();
    let mut simulation = Simulation::new(&model).wrap_err("Failed to set up the simulation")?;
    info!(
        "Simulating {:?} model with {:?}",
        args.model,
        simulation.simulator().integration_order()
    );

    // Locate the recorded species
    if simulation.simulator().num_compartments() == 0 {
        return Err(eyre!("This model has nothing to simulate"));
    }
    let (compartment_index, species_index) = match &args.species {
        Some(name) => (0..simulation.simulator().num_compartments())
            .find_map(|c| {
                simulation
                    .species_ids(c)
                    .iter()
                    .position(|s| s == name)
                    .map(|s| (c, s))
            })
            .ok_or_else(|| eyre!("No simulated species called '{name}'"))?,
        None => (0, 0),
    };

    // Set up the output file
    let mut writer = Writer::create(
        hdf5::Config {
            file_name,
            dataset_name: Some(&simulation.species_ids(compartment_index)[species_index][..]),
        },
        shape,
        args.nbimage,
    )?;

    // Set up progress reporting
    let progress = ui::init_progress_reporting("Running simulation step", args.nbimage);

    // Set up the HDF5 writer thread
    std::thread::scope(|s| {
        // Start the writer thread
        let (sender, receiver) =
            mpsc::sync_channel::<(f64, Array2<f64>)>(args.output_buffer.into());
        let writer = &mut writer;
        let progress = &progress;
        let writer_thread = s.spawn(move || {
            for (time, image) in receiver {
                writer.write(time, image.view())?;
                progress.inc(1);
            }
            Ok::<_, eyre::Report>(())
        });

        // Run the simulation on the main thread
        for _ in 0..args.nbimage {
            let steps = simulation.do_timesteps(args.interval, 1)?;
            let time_index = simulation.time_points().len() - 1;
            let time = simulation.time_points()[time_index];
            debug!("Reached t = {time} after {steps} steps");
            let image = Array2::from_shape_vec(
                shape,
                simulation.conc_array(time_index, compartment_index, species_index),
            )?;
            sender.send((time, image))?;
        }
        drop(sender);
        writer_thread
            .join()
            .map_err(|_| eyre!("The writer thread panicked"))??;
        Ok::<_, eyre::Report>(())
    })?;

    // Make sure output data is written correctly
    progress.finish();
    writer.close()?;
    Ok(())
}
