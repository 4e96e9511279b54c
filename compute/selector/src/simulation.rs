//! Simulation facade
//!
//! Drives a [`Simulator`] over a series of output intervals and records the
//! concentrations of every simulated species at the end of each of them,
//! along with summary statistics that are convenient for display.

use crate::{Error, Simulator};
use compute::{Simulate, StopHandle};
use data::{geometry::Compartment, model::Model};
use image::{Rgb, RgbImage};
use log::{debug, info};
use ndarray::{Array2, ArrayView1};

/// Smallest concentration used for normalization, avoids dividing by zero
const MIN_NONZERO_CONCENTRATION: f64 = 100.0 * f64::MIN_POSITIVE;

/// Average, minimum and maximum concentration of a species over its
/// compartment
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AvgMinMax {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}
//
impl AvgMinMax {
    /// Statistics of a set of concentrations
    fn new(conc: ArrayView1<'_, f64>) -> Self {
        let (sum, min, max) = conc.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), &c| (sum + c, min.min(c), max.max(c)),
        );
        Self {
            avg: if conc.is_empty() {
                0.0
            } else {
                sum / conc.len() as f64
            },
            min,
            max,
        }
    }
}

/// Simulation of a model, with the history of its results
#[derive(Debug)]
pub struct Simulation {
    /// Underlying simulator
    simulator: Simulator,

    /// Geometry of simulated compartments
    compartments: Vec<Compartment>,

    /// Simulated species of each compartment
    species_ids: Vec<Vec<String>>,

    /// Display color of each simulated species
    species_colors: Vec<Vec<Rgb<u8>>>,

    /// Time of each recorded result
    time_points: Vec<f64>,

    /// Concentrations at each time point, by compartment
    concentrations: Vec<Vec<Array2<f64>>>,

    /// Statistics at each time point, by compartment and species
    avg_min_max: Vec<Vec<Vec<AvgMinMax>>>,

    /// Largest concentration seen up to each time point, by compartment and
    /// species
    concentration_max: Vec<Vec<Vec<f64>>>,
}
//
impl Simulation {
    /// Set up the simulation of all non-constant species of a model
    ///
    /// The initial concentrations are recorded as the first time point.
    pub fn new(model: &Model) -> Result<Self, Error> {
        let simulated = model.simulated_species();
        let simulator = Simulator::new(model, &simulated)?;
        let mut compartments = Vec::with_capacity(simulated.len());
        let mut species_ids = Vec::with_capacity(simulated.len());
        let mut species_colors = Vec::with_capacity(simulated.len());
        for entry in simulated {
            let compartment = model.compartment(&entry.compartment_id).ok_or_else(|| {
                compute_pixel::Error::UnknownCompartment(entry.compartment_id.clone())
            })?;
            compartments.push(compartment.clone());
            species_colors.push(
                entry
                    .species_ids
                    .iter()
                    .map(|id| {
                        model
                            .species_by_id(id)
                            .map(|s| s.field.color())
                            .ok_or_else(|| Error::UnknownSpecies(id.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            );
            species_ids.push(entry.species_ids);
        }
        let mut simulation = Self {
            simulator,
            compartments,
            species_ids,
            species_colors,
            time_points: Vec::new(),
            concentrations: Vec::new(),
            avg_min_max: Vec::new(),
            concentration_max: Vec::new(),
        };
        simulation.record(0.0);
        Ok(simulation)
    }

    /// Underlying simulator
    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Underlying simulator, e.g. to adjust integration settings
    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.simulator
    }

    /// Handle that interrupts the current or next run
    pub fn stop_handle(&self) -> StopHandle {
        self.simulator.stop_handle()
    }

    /// Ask the simulation to stop as soon as possible
    pub fn request_stop(&self) {
        self.simulator.stop_handle().request_stop();
    }

    /// Identifiers of the simulated compartments
    pub fn compartment_ids(&self) -> impl Iterator<Item = &str> {
        self.compartments.iter().map(Compartment::id)
    }

    /// Simulated species of a compartment
    pub fn species_ids(&self, compartment_index: usize) -> &[String] {
        &self.species_ids[compartment_index]
    }

    /// Display colors of a compartment's simulated species
    pub fn species_colors(&self, compartment_index: usize) -> &[Rgb<u8>] {
        &self.species_colors[compartment_index]
    }

    /// Time of each recorded result, starting at 0
    pub fn time_points(&self) -> &[f64] {
        &self.time_points
    }

    /// Statistics of a species at a time point
    pub fn avg_min_max(
        &self,
        time_index: usize,
        compartment_index: usize,
        species_index: usize,
    ) -> AvgMinMax {
        self.avg_min_max[time_index][compartment_index][species_index]
    }

    /// Largest concentration of a species up to a time point
    pub fn max_concentration(
        &self,
        time_index: usize,
        compartment_index: usize,
        species_index: usize,
    ) -> f64 {
        self.concentration_max[time_index][compartment_index][species_index]
    }

    /// Concentration of a species at a time point, in compartment pixel
    /// order
    pub fn conc(
        &self,
        time_index: usize,
        compartment_index: usize,
        species_index: usize,
    ) -> Vec<f64> {
        self.concentrations[time_index][compartment_index]
            .column(species_index)
            .to_vec()
    }

    /// Concentration of a species at a time point, as an image-shaped array
    ///
    /// The array is row-major with its origin at the bottom-left corner of
    /// the image. Pixels outside of the compartment are zero.
    pub fn conc_array(
        &self,
        time_index: usize,
        compartment_index: usize,
        species_index: usize,
    ) -> Vec<f64> {
        image_array(
            &self.compartments[compartment_index],
            self.concentrations[time_index][compartment_index].column(species_index),
        )
    }

    /// Current time derivative of a species, in compartment pixel order
    ///
    /// Empty if the simulator does not provide it.
    pub fn dcdt(&self, compartment_index: usize, species_index: usize) -> Vec<f64> {
        self.simulator
            .dcdt(compartment_index)
            .map(|dcdt| dcdt.column(species_index).to_vec())
            .unwrap_or_default()
    }

    /// Current time derivative of a species, as an image-shaped array
    pub fn dcdt_array(&self, compartment_index: usize, species_index: usize) -> Vec<f64> {
        let compartment = &self.compartments[compartment_index];
        match self.simulator.dcdt(compartment_index) {
            Some(dcdt) => image_array(compartment, dcdt.column(species_index)),
            None => {
                let [rows, cols] = compartment.shape();
                vec![0.0; rows * cols]
            }
        }
    }

    /// Lower-order solution of the last adaptive step
    pub fn lower_order_conc(
        &self,
        compartment_index: usize,
        species_index: usize,
        pixel_index: usize,
    ) -> f64 {
        self.simulator
            .lower_order_concentration(compartment_index, species_index, pixel_index)
    }

    /// Write the concentrations of a time point into a model's species
    /// fields
    pub fn apply_concs_to_model(&self, model: &mut Model, time_index: usize) -> Result<(), Error> {
        for (compartment_index, species_ids) in self.species_ids.iter().enumerate() {
            for (species_index, species_id) in species_ids.iter().enumerate() {
                let species = model
                    .species_by_id_mut(species_id)
                    .ok_or_else(|| Error::UnknownSpecies(species_id.clone()))?;
                species
                    .field
                    .set_concentration(self.conc(time_index, compartment_index, species_index))?;
            }
        }
        debug!(
            "Applied concentrations at t = {} to the model",
            self.time_points[time_index]
        );
        Ok(())
    }

    /// Composite color image of the concentrations at a time point
    ///
    /// Each pixel mixes the colors of the drawn species, weighted by their
    /// normalized concentration. `species_to_draw` lists the species indices
    /// to draw for each compartment, all species are drawn if it is `None`.
    /// Concentrations are normalized by their maximum at this time point, or
    /// over all time points, and either per species or over all drawn
    /// species.
    pub fn conc_image(
        &self,
        time_index: usize,
        species_to_draw: Option<&[Vec<usize>]>,
        normalise_over_all_timepoints: bool,
        normalise_over_all_species: bool,
    ) -> RgbImage {
        let Some(first) = self.compartments.first() else {
            return RgbImage::new(0, 0);
        };
        let all_species = self
            .species_ids
            .iter()
            .map(|ids| (0..ids.len()).collect())
            .collect::<Vec<Vec<usize>>>();
        let species_to_draw = species_to_draw.unwrap_or(&all_species);

        let mut max_concs = if normalise_over_all_timepoints {
            self.concentration_max.last().cloned().unwrap_or_default()
        } else {
            self.avg_min_max[time_index]
                .iter()
                .map(|species| species.iter().map(|s| s.max).collect())
                .collect()
        };
        if normalise_over_all_species {
            let max = species_to_draw
                .iter()
                .enumerate()
                .flat_map(|(c, species)| species.iter().map(move |&s| (c, s)))
                .map(|(c, s)| max_concs[c][s])
                .fold(MIN_NONZERO_CONCENTRATION, f64::max);
            for species in &mut max_concs {
                species.fill(max);
            }
        }
        for max in max_concs.iter_mut().flatten() {
            *max = max.max(MIN_NONZERO_CONCENTRATION);
        }

        let [rows, cols] = first.shape();
        let mut image = RgbImage::new(cols as u32, rows as u32);
        for (compartment_index, compartment) in self.compartments.iter().enumerate() {
            let conc = &self.concentrations[time_index][compartment_index];
            for (pixel, point) in compartment.pixels().iter().enumerate() {
                let mut rgb = [0u32; 3];
                for &species in &species_to_draw[compartment_index] {
                    let weight = conc[[pixel, species]] / max_concs[compartment_index][species];
                    let color = self.species_colors[compartment_index][species];
                    for (channel, &value) in rgb.iter_mut().zip(&color.0) {
                        *channel += (f64::from(value) * weight) as u32;
                    }
                }
                let rgb = rgb.map(|channel| channel.min(255) as u8);
                image.put_pixel(point.x as u32, point.y as u32, Rgb(rgb));
            }
        }
        image
    }

    /// Simulate `num_intervals` intervals of duration `interval`, recording
    /// results at the end of each of them
    ///
    /// Returns the number of integration steps, including rejected ones.
    pub fn do_timesteps(&mut self, interval: f64, num_intervals: usize) -> Result<usize, Error> {
        self.do_multiple_timesteps(&[(num_intervals, interval)])
    }

    /// Simulate successive series of `(num_intervals, interval)`
    ///
    /// If the simulation fails or is stopped, results up to the last
    /// completed interval are kept and the error is returned.
    pub fn do_multiple_timesteps(&mut self, timesteps: &[(usize, f64)]) -> Result<usize, Error> {
        let mut steps = 0;
        for &(num_intervals, interval) in timesteps {
            info!("Simulating {num_intervals} intervals of duration {interval}");
            for _ in 0..num_intervals {
                steps += self.simulator.run(interval)?;
                let now = self.time_points.last().copied().unwrap_or(0.0) + interval;
                self.record(now);
            }
        }
        Ok(steps)
    }

    /// Record the current concentrations
    fn record(&mut self, time: f64) {
        debug!("Recording concentrations at t = {time}");
        let concentrations = (0..self.simulator.num_compartments())
            .map(|c| self.simulator.concentrations(c).to_owned())
            .collect::<Vec<_>>();
        let avg_min_max = concentrations
            .iter()
            .map(|conc| conc.columns().into_iter().map(AvgMinMax::new).collect())
            .collect::<Vec<Vec<_>>>();
        let mut concentration_max = self.concentration_max.last().cloned().unwrap_or_else(|| {
            self.species_ids
                .iter()
                .map(|ids| vec![0.0; ids.len()])
                .collect()
        });
        for (max, stats) in concentration_max.iter_mut().zip(&avg_min_max) {
            for (max, stats) in max.iter_mut().zip(stats) {
                *max = max.max(stats.max);
            }
        }
        self.time_points.push(time);
        self.concentrations.push(concentrations);
        self.avg_min_max.push(avg_min_max);
        self.concentration_max.push(concentration_max);
    }
}

/// Scatter per-pixel values into an image-shaped array with its origin at
/// the bottom-left corner
fn image_array(compartment: &Compartment, values: ArrayView1<'_, f64>) -> Vec<f64> {
    let [rows, cols] = compartment.shape();
    let mut array = vec![0.0; rows * cols];
    for (point, &value) in compartment.pixels().iter().zip(values.iter()) {
        array[point.x + cols * (rows - 1 - point.y)] = value;
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::{
        geometry::Point,
        model::Reaction,
        parameters::IntegratorOrder,
    };
    use std::sync::Once;

    fn init_logger() {
        static INIT_LOGGER: Once = Once::new();
        INIT_LOGGER.call_once(|| env_logger::init());
    }

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// 2x2 image with a left compartment "a" holding a decaying species X
    /// and a right compartment "b" holding a constant species Y and a
    /// species Z that stays at 0
    fn model() -> Result<Model, Box<dyn std::error::Error>> {
        let mut model = Model::default();
        model.add_compartment(Compartment::from_pixels(
            "a",
            [2, 2],
            vec![Point::new(0, 0), Point::new(0, 1)],
        )?)?;
        model.add_compartment(Compartment::from_pixels(
            "b",
            [2, 2],
            vec![Point::new(1, 0), Point::new(1, 1)],
        )?)?;
        let x = model.add_species("X", "a", 0.0)?;
        x.field.set_concentration(vec![1.0, 2.0])?;
        x.field.set_color(Rgb([200, 100, 0]));
        let y = model.add_species("Y", "b", 0.0)?;
        y.is_constant = true;
        y.field.set_uniform_concentration(5.0);
        model.add_species("Z", "b", 0.0)?;
        model.add_reaction(
            Reaction::new("decay", "a", "X*Y/10").with_stoichiometry("X", -1.0),
        )?;
        model.options.pixel.integrator = IntegratorOrder::Rk101;
        model.options.pixel.max_timestep = 0.01;
        Ok(model)
    }

    #[test]
    fn history() -> TestResult {
        init_logger();
        let model = model()?;
        let mut sim = Simulation::new(&model)?;
        assert_eq!(sim.compartment_ids().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(sim.species_ids(0), ["X"]);
        assert_eq!(sim.species_ids(1), ["Z"]);
        assert_eq!(sim.time_points(), [0.0]);

        let steps = sim.do_multiple_timesteps(&[(2, 0.1), (1, 0.3)])?;
        assert_eq!(steps, 60);
        let times = sim.time_points();
        assert_eq!(times.len(), 4);
        for (time, expected) in times.iter().zip([0.0, 0.1, 0.2, 0.5]) {
            assert!((time - expected).abs() < 1e-12);
        }

        let decay = (1.0f64 - 0.5 * 0.01).powi(50);
        let conc = sim.conc(3, 0, 0);
        assert!((conc[0] - decay).abs() < 1e-12);
        assert!((conc[1] - 2.0 * decay).abs() < 1e-12);
        let stats = sim.avg_min_max(3, 0, 0);
        assert!((stats.avg - 1.5 * decay).abs() < 1e-12);
        assert_eq!(stats.min, conc[0]);
        assert_eq!(stats.max, conc[1]);
        // The running maximum keeps the initial peak
        assert_eq!(sim.max_concentration(3, 0, 0), 2.0);
        assert_eq!(sim.avg_min_max(0, 0, 0).max, 2.0);

        let dcdt = sim.dcdt(0, 0);
        assert_eq!(dcdt.len(), 2);
        assert!(dcdt[0] < 0.0);
        assert_eq!(sim.lower_order_conc(0, 0, 0), 0.0);
        Ok(())
    }

    #[test]
    fn image_arrays() -> TestResult {
        init_logger();
        let model = model()?;
        let sim = Simulation::new(&model)?;
        // Pixel (0, 0) is the top-left corner, i.e. the start of the last
        // row of a bottom-up array
        assert_eq!(sim.conc_array(0, 0, 0), [2.0, 0.0, 1.0, 0.0]);
        assert_eq!(sim.conc_array(0, 1, 0), [0.0; 4]);
        assert_eq!(sim.dcdt_array(0, 0), [0.0; 4]);
        Ok(())
    }

    #[test]
    fn apply_results_to_model() -> TestResult {
        init_logger();
        let mut model = model()?;
        let mut sim = Simulation::new(&model)?;
        sim.do_timesteps(0.1, 1)?;
        sim.apply_concs_to_model(&mut model, 1)?;
        let field = &model.species_by_id("X").unwrap().field;
        assert_eq!(field.concentration(), sim.conc(1, 0, 0).as_slice());
        assert!(field.concentration()[0] < 1.0);

        let restarted = Simulation::new(&model)?;
        assert_eq!(restarted.conc(0, 0, 0), sim.conc(1, 0, 0));
        Ok(())
    }

    #[test]
    fn composite_image() -> TestResult {
        init_logger();
        let model = model()?;
        let sim = Simulation::new(&model)?;
        let image = sim.conc_image(0, None, false, false);
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(*image.get_pixel(0, 1), Rgb([200, 100, 0]));
        assert_eq!(*image.get_pixel(0, 0), Rgb([100, 50, 0]));
        // Z is zero everywhere, and the normalization does not blow up
        assert_eq!(*image.get_pixel(1, 0), Rgb([0, 0, 0]));

        let nothing = sim.conc_image(0, Some(&[vec![], vec![0]][..]), false, true);
        assert_eq!(*nothing.get_pixel(0, 1), Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn stop_request() -> TestResult {
        init_logger();
        let model = model()?;
        let mut sim = Simulation::new(&model)?;
        sim.request_stop();
        assert!(matches!(
            sim.do_timesteps(0.1, 3),
            Err(Error::Pixel(compute_pixel::Error::Stopped { .. }))
        ));
        assert_eq!(sim.time_points(), [0.0]);
        assert_eq!(sim.do_timesteps(0.1, 1)?, 10);
        Ok(())
    }
}
