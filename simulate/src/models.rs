//! Built-in models

use clap::ValueEnum;
use data::{
    geometry::Compartment,
    model::{Model, ModelError, Reaction},
};
use image::{Rgb, RgbImage};

/// Models that can be simulated
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ModelKind {
    /// Gray-Scott pattern formation in a single compartment
    #[default]
    GrayScott,

    /// Transport of a substrate through three stacked compartments, where it
    /// is turned into a product that travels back
    TransportChain,
}
//
impl ModelKind {
    /// Build the model for a geometry image of shape `[rows, cols]`
    pub fn build(self, shape: [usize; 2]) -> Result<Model, ModelError> {
        match self {
            Self::GrayScott => gray_scott(shape),
            Self::TransportChain => transport_chain(shape),
        }
    }
}

const CELL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const OUTSIDE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const MEMBRANE_COLOR: Rgb<u8> = Rgb([0, 160, 0]);
const NUCLEUS_COLOR: Rgb<u8> = Rgb([160, 0, 0]);

/// Gray-Scott reaction-diffusion, seeded with a square of V in the middle of
/// a uniform sea of U
pub fn gray_scott([rows, cols]: [usize; 2]) -> Result<Model, ModelError> {
    let mut model = Model::default();
    let image = RgbImage::from_pixel(cols as u32, rows as u32, CELL_COLOR);
    let cell = Compartment::new("cell", &image, CELL_COLOR);
    let seed = cell
        .pixels()
        .iter()
        .map(|p| {
            p.x.abs_diff(cols / 2) <= cols / 10 && p.y.abs_diff(rows / 2) <= rows / 10
        })
        .collect::<Vec<_>>();
    model.add_compartment(cell)?;

    model.add_parameter("feed", 0.04)?;
    model.add_parameter("kill", 0.06)?;
    let u = model.add_species("U", "cell", 0.2)?;
    u.field
        .set_concentration(seed.iter().map(|&s| if s { 0.5 } else { 1.0 }).collect())?;
    let v = model.add_species("V", "cell", 0.1)?;
    v.field
        .set_concentration(seed.iter().map(|&s| if s { 0.25 } else { 0.0 }).collect())?;

    model.add_reaction(
        Reaction::new("conversion", "cell", "U*V^2")
            .with_stoichiometry("U", -1.0)
            .with_stoichiometry("V", 1.0),
    )?;
    model.add_reaction(Reaction::new("feed", "cell", "feed*(1 - U)").with_stoichiometry("U", 1.0))?;
    model.add_reaction(
        Reaction::new("drain", "cell", "(feed + kill)*V").with_stoichiometry("V", -1.0),
    )?;
    Ok(model)
}

/// Three horizontal bands: the outside on top, where substrate A is held at a
/// constant concentration, a cell in the middle and its nucleus at the
/// bottom, where A is converted into B
pub fn transport_chain([rows, cols]: [usize; 2]) -> Result<Model, ModelError> {
    let mut model = Model::default();
    let image = RgbImage::from_fn(cols as u32, rows as u32, |_, y| {
        let band = 3 * y as usize / rows.max(1);
        match band {
            0 => OUTSIDE_COLOR,
            1 => MEMBRANE_COLOR,
            _ => NUCLEUS_COLOR,
        }
    });
    model.add_compartment(Compartment::new("outside", &image, OUTSIDE_COLOR))?;
    model.add_compartment(Compartment::new("cell", &image, MEMBRANE_COLOR))?;
    model.add_compartment(Compartment::new("nucleus", &image, NUCLEUS_COLOR))?;
    model.add_membrane_between("outer_membrane", "outside", "cell")?;
    model.add_membrane_between("nuclear_membrane", "cell", "nucleus")?;

    model.add_parameter("k1", 0.1)?;
    let a_outside = model.add_species("A_outside", "outside", 1.0)?;
    a_outside.is_constant = true;
    a_outside.field.set_uniform_concentration(1.0);
    model.add_species("A_cell", "cell", 1.0)?;
    model.add_species("A_nucleus", "nucleus", 1.0)?;
    model.add_species("B_outside", "outside", 1.0)?;
    model.add_species("B_cell", "cell", 1.0)?;
    model.add_species("B_nucleus", "nucleus", 1.0)?;

    model.add_reaction(
        Reaction::new("A_uptake", "outer_membrane", "k1*A_outside")
            .with_stoichiometry("A_outside", -1.0)
            .with_stoichiometry("A_cell", 1.0),
    )?;
    model.add_reaction(
        Reaction::new("A_import", "nuclear_membrane", "k1*A_cell")
            .with_stoichiometry("A_cell", -1.0)
            .with_stoichiometry("A_nucleus", 1.0),
    )?;
    model.add_reaction(
        Reaction::new("A_to_B", "nucleus", "k1*A_nucleus")
            .with_stoichiometry("A_nucleus", -1.0)
            .with_stoichiometry("B_nucleus", 1.0),
    )?;
    model.add_reaction(
        Reaction::new("B_export", "nuclear_membrane", "k1*B_nucleus")
            .with_stoichiometry("B_nucleus", -1.0)
            .with_stoichiometry("B_cell", 1.0),
    )?;
    model.add_reaction(
        Reaction::new("B_excretion", "outer_membrane", "k1*B_cell")
            .with_stoichiometry("B_cell", -1.0)
            .with_stoichiometry("B_outside", 1.0),
    )?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute_selector::Simulation;
    use std::sync::Once;

    fn init_logger() {
        static INIT_LOGGER: Once = Once::new();
        INIT_LOGGER.call_once(|| env_logger::init());
    }

    #[test]
    fn transport_chain_geometry() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = transport_chain([9, 4])?;
        for compartment in model.compartments() {
            assert_eq!(compartment.num_pixels(), 12);
        }
        for membrane in model.membranes() {
            assert_eq!(membrane.index_pairs().len(), 4);
        }
        let simulated = model.simulated_species();
        assert_eq!(simulated.len(), 3);
        assert_eq!(simulated[0].species_ids, ["B_outside"]);
        Ok(())
    }

    #[test]
    fn transport_chain_fills_up() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = transport_chain([6, 2])?;
        let mut sim = Simulation::new(&model)?;
        sim.do_timesteps(5.0, 2)?;
        // Substrate reaches the nucleus, product comes back out
        let nucleus = sim.avg_min_max(2, 2, 0);
        assert!(nucleus.avg > 0.0);
        let excreted = sim.avg_min_max(2, 0, 0);
        assert!(excreted.avg > 0.0);
        Ok(())
    }

    #[test]
    fn gray_scott_stays_bounded() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = gray_scott([20, 30])?;
        let mut sim = Simulation::new(&model)?;
        sim.do_timesteps(10.0, 3)?;
        for time_index in 0..sim.time_points().len() {
            for species in 0..2 {
                let stats = sim.avg_min_max(time_index, 0, species);
                assert!(stats.min > -0.01 && stats.max < 1.01, "{stats:?}");
            }
        }
        Ok(())
    }
}
