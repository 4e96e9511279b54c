//! Reaction-diffusion integrator of one compartment

use crate::{
    reaction::{ExtraVariables, ReactionEvaluator},
    tableau::Stage,
    Error,
};
use data::{
    geometry::Compartment,
    model::Model,
    parameters::IntegratorError,
};
use log::{debug, info};
use ndarray::{
    parallel::prelude::*, s, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip,
};

/// Concentrations and derivatives of the simulated species of one compartment
///
/// All arrays have shape `[pixels, species + extra variables]`, so that the
/// state of one pixel is contiguous in memory. The extra variables (time,
/// pixel coordinates) are integrated along with the species but are not
/// exposed as concentrations.
#[derive(Debug)]
pub struct SimCompartment {
    /// Compartment identifier
    id: String,

    /// Identifiers of the simulated species
    species_ids: Vec<String>,

    /// +x, -x, +y, -y neighbour index of each pixel
    neighbours: Vec<[usize; 4]>,

    /// Dimensionless diffusion constant of each species
    diffusion_constants: Vec<f64>,

    /// Time derivative of each extra variable
    extra_rates: Vec<f64>,

    /// Indices of the well-mixed species
    non_spatial_species: Vec<usize>,

    /// Reaction rates
    reactions: ReactionEvaluator,

    /// Concentrations
    conc: Array2<f64>,

    /// Time derivative of concentrations
    dcdt: Array2<f64>,

    /// Lower-order solution accumulator of Runge-Kutta steps
    s2: Array2<f64>,

    /// Concentrations at the start of the current step
    s3: Array2<f64>,

    /// Largest forward Euler timestep that keeps diffusion stable
    max_stable_timestep: f64,

    /// Spread per-pixel work over the current rayon thread pool
    multithreaded: bool,
}
//
impl SimCompartment {
    /// Set up the simulation of `species_ids` in `compartment`
    ///
    /// All species must live in this compartment. The initial concentrations
    /// are taken from the species' fields, those of `extra_variables` from the
    /// start time and the pixel coordinates.
    pub fn new(
        model: &Model,
        compartment: &Compartment,
        species_ids: Vec<String>,
        extra_variables: &ExtraVariables,
    ) -> Result<Self, Error> {
        let id = compartment.id().to_owned();
        let num_pixels = compartment.num_pixels();
        let num_species = species_ids.len();
        let pixel_width = compartment.pixel_width();
        let mut conc = Array2::zeros([num_pixels, num_species + extra_variables.len()]);
        let mut diffusion_constants = Vec::with_capacity(species_ids.len());
        let mut non_spatial_species = Vec::new();
        for (idx, species_id) in species_ids.iter().enumerate() {
            let species = model
                .species_by_id(species_id)
                .ok_or_else(|| Error::UnknownSpecies(species_id.clone()))?;
            if species.compartment_id() != id {
                return Err(Error::SpeciesCompartmentMismatch {
                    species: species_id.clone(),
                    expected: id,
                    actual: species.compartment_id().to_owned(),
                });
            }
            let field = &species.field;
            let diffusion_constant = field.diffusion_constant();
            if !(diffusion_constant.is_finite() && diffusion_constant >= 0.0) {
                return Err(Error::InvalidDiffusionConstant {
                    species: species_id.clone(),
                    value: diffusion_constant,
                });
            }
            diffusion_constants.push(diffusion_constant / (pixel_width * pixel_width));
            if !field.is_spatial() {
                non_spatial_species.push(idx);
            }
            let initial = field.concentration();
            if initial.len() != num_pixels {
                return Err(Error::ConcentrationSize {
                    compartment: id,
                    expected: num_pixels,
                    actual: initial.len(),
                });
            }
            conc.column_mut(idx).assign(&ArrayView1::from(initial));
        }
        if !extra_variables.is_empty() {
            for (pixel, &point) in compartment.pixels().iter().enumerate() {
                let values = extra_variables.initial_values(&model.coordinates, compartment, point);
                conc.slice_mut(s![pixel, num_species..])
                    .assign(&ArrayView1::from(&values));
            }
        }
        let max_diffusion_constant = diffusion_constants.iter().copied().fold(0.0, f64::max);
        let max_stable_timestep = 1.0 / (4.0 * max_diffusion_constant);
        info!(
            "Compartment '{id}': {} species over {num_pixels} pixels, Euler stability bound {max_stable_timestep}",
            species_ids.len()
        );

        let reaction_ids = model
            .reactions_in(&id)
            .map(|r| r.id().to_owned())
            .collect::<Vec<_>>();
        debug!("Compartment '{id}' reactions: {reaction_ids:?}");
        let reactions = ReactionEvaluator::new(
            model,
            &species_ids,
            extra_variables.ids(),
            &reaction_ids,
            None,
        )?;

        Ok(Self {
            dcdt: Array2::zeros(conc.raw_dim()),
            s2: Array2::zeros([0, 0]),
            s3: Array2::zeros([0, 0]),
            id,
            species_ids,
            neighbours: compartment.neighbours().to_vec(),
            diffusion_constants,
            extra_rates: extra_variables.rates().to_vec(),
            non_spatial_species,
            reactions,
            conc,
            max_stable_timestep,
            multithreaded: false,
        })
    }

    /// Toggle use of the current rayon thread pool for per-pixel work
    pub fn set_multithreaded(&mut self, multithreaded: bool) {
        self.multithreaded = multithreaded;
    }

    /// Compartment identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifiers of the simulated species
    pub fn species_ids(&self) -> &[String] {
        &self.species_ids
    }

    /// Number of simulated species
    pub fn num_species(&self) -> usize {
        self.species_ids.len()
    }

    /// Number of pixels
    pub fn num_pixels(&self) -> usize {
        self.neighbours.len()
    }

    /// Concentrations, as a `[pixels, species]` array
    pub fn concentrations(&self) -> ArrayView2<'_, f64> {
        self.conc.slice(s![.., ..self.num_species()])
    }

    /// Replace the concentrations
    pub fn set_concentrations(&mut self, conc: ArrayView2<'_, f64>) -> Result<(), Error> {
        let num_species = self.num_species();
        if conc.dim() != (self.num_pixels(), num_species) {
            return Err(Error::ConcentrationSize {
                compartment: self.id.clone(),
                expected: self.num_pixels() * num_species,
                actual: conc.len(),
            });
        }
        self.conc.slice_mut(s![.., ..num_species]).assign(&conc);
        Ok(())
    }

    /// Time derivative of concentrations, as a `[pixels, species]` array
    pub fn dcdt(&self) -> ArrayView2<'_, f64> {
        self.dcdt.slice(s![.., ..self.num_species()])
    }

    /// Lower-order solution of the last Runge-Kutta step
    ///
    /// Returns 0 if no such step was performed.
    pub fn lower_order_concentration(&self, species_index: usize, pixel_index: usize) -> f64 {
        self.s2
            .get([pixel_index, species_index])
            .copied()
            .unwrap_or(0.0)
    }

    /// Largest forward Euler timestep that keeps diffusion stable
    pub fn max_stable_timestep(&self) -> f64 {
        self.max_stable_timestep
    }

    /// Concentrations at one pixel, followed by the extra variables
    pub(crate) fn pixel_concentrations(&self, pixel_index: usize) -> ArrayView1<'_, f64> {
        self.conc.row(pixel_index)
    }

    /// Add `rates` to the time derivative at one pixel
    pub(crate) fn add_to_dcdt(&mut self, pixel_index: usize, rates: &[f64]) {
        self.dcdt
            .row_mut(pixel_index)
            .iter_mut()
            .zip(rates)
            .for_each(|(dcdt, &rate)| *dcdt += rate);
    }

    /// Overwrite dcdt with the discrete Laplacian of concentrations
    ///
    /// Uses the 5-point stencil over the neighbour table, a pixel whose
    /// neighbour lies outside the compartment sees no flux on that side.
    /// Extra variables get their fixed rates.
    pub fn evaluate_diffusion_operator(&mut self) {
        let neighbours = &self.neighbours;
        let diffusion_constants = &self.diffusion_constants;
        let extra_rates = &self.extra_rates;
        let num_species = diffusion_constants.len();
        let conc = &self.conc;
        let laplacian = |pixel: usize, mut dcdt: ArrayViewMut1<'_, f64>| {
            let [up_x, dn_x, up_y, dn_y] = neighbours[pixel];
            for (species, (dcdt, &d)) in dcdt.iter_mut().zip(diffusion_constants).enumerate() {
                *dcdt = d
                    * (conc[[up_x, species]]
                        + conc[[dn_x, species]]
                        + conc[[up_y, species]]
                        + conc[[dn_y, species]]
                        - 4.0 * conc[[pixel, species]]);
            }
            for (dcdt, &rate) in dcdt.iter_mut().skip(num_species).zip(extra_rates) {
                *dcdt = rate;
            }
        };
        let dcdt = &mut self.dcdt;
        if self.multithreaded {
            dcdt.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(pixel, dcdt)| laplacian(pixel, dcdt));
        } else {
            for (pixel, dcdt) in dcdt.axis_iter_mut(Axis(0)).enumerate() {
                laplacian(pixel, dcdt);
            }
        }
    }

    /// Add reaction rates to dcdt
    pub fn evaluate_reactions(&mut self) {
        if !self.reactions.has_reactions() {
            return;
        }
        let num_species = self.num_species();
        let num_inputs = self.conc.ncols();
        let reactions = &self.reactions;
        let conc = &self.conc;
        let dcdt = &mut self.dcdt;
        let new_buffers = || (vec![0.0; num_inputs], vec![0.0; num_species]);
        let react = |(input, output): &mut (Vec<f64>, Vec<f64>),
                     conc: ArrayView1<'_, f64>,
                     mut dcdt: ArrayViewMut1<'_, f64>| {
            input
                .iter_mut()
                .zip(conc.iter())
                .for_each(|(dst, &src)| *dst = src);
            reactions.evaluate(output, input);
            dcdt.iter_mut()
                .zip(output.iter())
                .for_each(|(dcdt, &rate)| *dcdt += rate);
        };
        if self.multithreaded {
            conc.axis_iter(Axis(0))
                .into_par_iter()
                .zip(dcdt.axis_iter_mut(Axis(0)))
                .for_each_init(new_buffers, |buffers, (conc, dcdt)| {
                    react(buffers, conc, dcdt)
                });
        } else {
            let mut buffers = new_buffers();
            for (conc, dcdt) in conc.axis_iter(Axis(0)).zip(dcdt.axis_iter_mut(Axis(0))) {
                react(&mut buffers, conc, dcdt);
            }
        }
    }

    /// Replace the dcdt of well-mixed species with its spatial average
    pub fn spatially_average_dcdt(&mut self) {
        for &species in &self.non_spatial_species {
            let mut dcdt = self.dcdt.column_mut(species);
            let average = dcdt.mean().unwrap_or(0.0);
            dcdt.fill(average);
        }
    }

    /// Forward Euler step: `conc += dt * dcdt`
    ///
    /// The previous state is kept in `s3`, so that the step can be undone.
    pub fn do_forwards_euler_timestep(&mut self, dt: f64) {
        self.spatially_average_dcdt();
        if self.s3.dim() != self.conc.dim() {
            self.s3 = Array2::zeros(self.conc.raw_dim());
        }
        let zip = Zip::from(&mut self.conc).and(&mut self.s3).and(&self.dcdt);
        let euler = move |c: &mut f64, s3: &mut f64, &dcdt: &f64| {
            *s3 = *c;
            *c += dt * dcdt;
        };
        if self.multithreaded {
            zip.par_for_each(euler);
        } else {
            zip.for_each(euler);
        }
    }

    /// Make sure that the Runge-Kutta registers have the right shape
    fn ensure_rk_registers(&mut self) {
        if self.s2.dim() != self.conc.dim() {
            self.s2 = Array2::zeros(self.conc.raw_dim());
        }
        if self.s3.dim() != self.conc.dim() {
            self.s3 = Array2::zeros(self.conc.raw_dim());
        }
    }

    /// Forget about the lower-order solution of previous steps
    pub fn clear_rk_registers(&mut self) {
        self.s2 = Array2::zeros([0, 0]);
        self.s3 = Array2::zeros([0, 0]);
    }

    /// Start a low-storage Runge-Kutta step: `s2 = 0`, `s3 = conc`
    pub fn do_rk_init(&mut self) {
        self.ensure_rk_registers();
        self.s2.fill(0.0);
        self.s3.assign(&self.conc);
    }

    /// First stage of RK2(1)2: backup, then forward Euler
    ///
    /// Afterwards `s3` holds the initial state.
    pub fn do_rk212_substep1(&mut self, dt: f64) {
        self.ensure_rk_registers();
        self.spatially_average_dcdt();
        let zip = Zip::from(&mut self.conc).and(&mut self.s3).and(&self.dcdt);
        let stage = move |c: &mut f64, s3: &mut f64, &dcdt: &f64| {
            *s3 = *c;
            *c += dt * dcdt;
        };
        if self.multithreaded {
            zip.par_for_each(stage);
        } else {
            zip.for_each(stage);
        }
    }

    /// Second stage of RK2(1)2: Heun solution in conc, Euler solution in s2
    pub fn do_rk212_substep2(&mut self, dt: f64) {
        self.spatially_average_dcdt();
        let zip = Zip::from(&mut self.conc)
            .and(&mut self.s2)
            .and(&self.s3)
            .and(&self.dcdt);
        let stage = move |c: &mut f64, s2: &mut f64, &s3: &f64, &dcdt: &f64| {
            *s2 = *c;
            *c = 0.5 * s3 + 0.5 * *c + 0.5 * dt * dcdt;
        };
        if self.multithreaded {
            zip.par_for_each(stage);
        } else {
            zip.for_each(stage);
        }
    }

    /// Generic low-storage Runge-Kutta stage
    ///
    /// `s2 += delta * conc`, then
    /// `conc = g1 * conc + g2 * s2 + g3 * s3 + beta * dt * dcdt`
    pub fn do_rk_substep(&mut self, dt: f64, stage: Stage) {
        self.spatially_average_dcdt();
        let Stage {
            g1,
            g2,
            g3,
            beta,
            delta,
        } = stage;
        let zip = Zip::from(&mut self.conc)
            .and(&mut self.s2)
            .and(&self.s3)
            .and(&self.dcdt);
        let update = move |c: &mut f64, s2: &mut f64, &s3: &f64, &dcdt: &f64| {
            *s2 += delta * *c;
            *c = g1 * *c + g2 * *s2 + g3 * s3 + beta * dt * dcdt;
        };
        if self.multithreaded {
            zip.par_for_each(update);
        } else {
            zip.for_each(update);
        }
    }

    /// Compute the lower-order solution:
    /// `s2 = c_factor * conc + s2_factor * s2 + s3_factor * s3`
    pub fn do_rk_finalise(&mut self, c_factor: f64, s2_factor: f64, s3_factor: f64) {
        let zip = Zip::from(&mut self.s2).and(&self.conc).and(&self.s3);
        let finalise = move |s2: &mut f64, &c: &f64, &s3: &f64| {
            *s2 = c_factor * c + s2_factor * *s2 + s3_factor * s3;
        };
        if self.multithreaded {
            zip.par_for_each(finalise);
        } else {
            zip.for_each(finalise);
        }
    }

    /// Go back to the state at the start of the current step
    pub fn undo_rk_step(&mut self) {
        self.conc.assign(&self.s3);
    }

    /// Normalized error of the last Runge-Kutta step
    ///
    /// Returns the largest value of
    /// `|conc - s2| / (abs + rel * max(|s3|, |conc|))` over all species,
    /// along with the species and pixel where it occurs. A NaN anywhere makes
    /// the error NaN.
    pub fn calculate_rk_error(&self, max_err: IntegratorError) -> RkError {
        let mut worst = RkError::default();
        let n = self.num_species();
        Zip::indexed(self.conc.slice(s![.., ..n]))
            .and(self.s2.slice(s![.., ..n]))
            .and(self.s3.slice(s![.., ..n]))
            .for_each(|(pixel, species), &high, &low, &previous| {
                if worst.error.is_nan() {
                    return;
                }
                let difference = (high - low).abs();
                let error = if difference == 0.0 {
                    0.0
                } else {
                    difference / (max_err.abs + max_err.rel * previous.abs().max(high.abs()))
                };
                if error.is_nan() || error > worst.error {
                    worst = RkError {
                        error,
                        species,
                        pixel,
                    };
                }
            });
        worst
    }

    /// Locate a non-finite concentration, if any, as `(species, pixel)`
    ///
    /// Every step adds a multiple of the last computed dcdt to the
    /// concentrations, so a non-finite derivative shows up here as well.
    pub fn find_non_finite(&self) -> Option<(usize, usize)> {
        self.concentrations()
            .indexed_iter()
            .find(|(_, value)| !value.is_finite())
            .map(|((pixel, species), _)| (species, pixel))
    }
}

/// Largest normalized error of a Runge-Kutta step, and where it occurs
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RkError {
    /// Normalized error, at most 1 for an acceptable step
    pub error: f64,

    /// Species index
    pub species: usize,

    /// Pixel index
    pub pixel: usize,
}
