//! In-memory description of a reaction-diffusion model
//!
//! This is the view of a biochemical model that simulators consume: geometry,
//! species with their initial concentration fields, reactions located in
//! compartments or on membranes, global parameters, units and options.

use crate::{
    field::Field,
    geometry::{Compartment, GeometryError, Membrane, Point},
    parameters::Options,
};
use image::Rgb;
use log::{debug, warn};
use std::collections::BTreeMap;
use thiserror::Error;

/// Chemical species living in one compartment
#[derive(Clone, Debug, PartialEq)]
pub struct Species {
    /// Human-readable name
    pub name: String,

    /// Constant species keep their initial concentration and are not
    /// simulated
    pub is_constant: bool,

    /// Concentration field, diffusion constant and display properties
    pub field: Field,
}
//
impl Species {
    /// Species identifier
    pub fn id(&self) -> &str {
        self.field.species_id()
    }

    /// Identifier of the compartment this species lives in
    pub fn compartment_id(&self) -> &str {
        self.field.compartment_id()
    }
}

/// Chemical reaction
#[derive(Clone, Debug, PartialEq)]
pub struct Reaction {
    /// Reaction identifier
    id: String,

    /// Identifier of the compartment or membrane where it happens
    location: String,

    /// Rate expression
    expression: String,

    /// Stoichiometric coefficients, by species identifier
    stoichiometry: Vec<(String, f64)>,

    /// Reaction-local constants
    constants: Vec<(String, f64)>,
}
//
impl Reaction {
    /// Start describing a reaction
    ///
    /// The rate expression may refer to species, global parameters and
    /// local constants by identifier.
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            expression: expression.into(),
            stoichiometry: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Add a reactant (negative coefficient) or product (positive coefficient)
    pub fn with_stoichiometry(mut self, species_id: impl Into<String>, coefficient: f64) -> Self {
        self.stoichiometry.push((species_id.into(), coefficient));
        self
    }

    /// Add a reaction-local constant
    pub fn with_constant(mut self, name: impl Into<String>, value: f64) -> Self {
        self.constants.push((name.into(), value));
        self
    }

    /// Reaction identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the compartment or membrane where it happens
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Rate expression
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Stoichiometric coefficients, by species identifier
    pub fn stoichiometry(&self) -> &[(String, f64)] {
        &self.stoichiometry
    }

    /// Net stoichiometric coefficient of a species
    pub fn stoichiometry_of(&self, species_id: &str) -> f64 {
        self.stoichiometry
            .iter()
            .filter(|(id, _)| id == species_id)
            .map(|(_, coefficient)| coefficient)
            .sum()
    }

    /// Reaction-local constants
    pub fn constants(&self) -> &[(String, f64)] {
        &self.constants
    }
}

/// Global model parameter
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    /// Parameter identifier
    pub id: String,

    /// Parameter value
    pub value: f64,
}

/// Unit conversion factors
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Units {
    /// Model volume unit divided by the cube of the model length unit
    ///
    /// Membrane reaction rates are fluxes per unit area. Multiplying them by
    /// the pixel width and dividing by this factor yields a concentration
    /// rate in the adjacent pixels.
    pub volume_over_length_cubed: f64,
}
//
impl Default for Units {
    fn default() -> Self {
        Self {
            volume_over_length_cubed: 1.0,
        }
    }
}

/// Physical coordinates of pixels, as reaction rates see them
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialCoordinates {
    /// Identifier of the x coordinate in rate expressions
    pub x_id: String,

    /// Identifier of the y coordinate in rate expressions
    pub y_id: String,

    /// Physical position of the bottom-left pixel of the geometry image
    pub origin: [f64; 2],
}
//
impl SpatialCoordinates {
    /// Physical `[x, y]` coordinates of a pixel of a compartment
    ///
    /// Image rows are counted from the top, whereas y grows upwards.
    pub fn of(&self, compartment: &Compartment, point: Point) -> [f64; 2] {
        let [rows, _] = compartment.shape();
        let width = compartment.pixel_width();
        [
            self.origin[0] + point.x as f64 * width,
            self.origin[1] + (rows - 1 - point.y) as f64 * width,
        ]
    }
}
//
impl Default for SpatialCoordinates {
    fn default() -> Self {
        Self {
            x_id: "x".to_owned(),
            y_id: "y".to_owned(),
            origin: [0.0, 0.0],
        }
    }
}

/// Non-constant species of one compartment, in simulation order
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompartmentSpecies {
    /// Compartment identifier
    pub compartment_id: String,

    /// Identifiers of the simulated species
    pub species_ids: Vec<String>,
}

/// Complete reaction-diffusion model
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    /// Compartments, in simulation order
    compartments: Vec<Compartment>,

    /// Membranes, in simulation order
    membranes: Vec<Membrane>,

    /// Species of all compartments
    species: Vec<Species>,

    /// Compartment and membrane reactions
    reactions: Vec<Reaction>,

    /// Global parameters
    parameters: Vec<Parameter>,

    /// Unit conversion factors
    pub units: Units,

    /// Physical coordinates of pixels
    pub coordinates: SpatialCoordinates,

    /// Simulation options
    pub options: Options,
}
//
impl Model {
    /// Add a compartment
    pub fn add_compartment(&mut self, compartment: Compartment) -> Result<(), ModelError> {
        if self.location_exists(compartment.id()) {
            return Err(ModelError::DuplicateId(compartment.id().to_owned()));
        }
        self.compartments.push(compartment);
        Ok(())
    }

    /// Add a membrane between two known compartments
    pub fn add_membrane(&mut self, membrane: Membrane) -> Result<(), ModelError> {
        if self.location_exists(membrane.id()) {
            return Err(ModelError::DuplicateId(membrane.id().to_owned()));
        }
        for compartment_id in [membrane.compartment_a(), membrane.compartment_b()] {
            if self.compartment(compartment_id).is_none() {
                return Err(ModelError::UnknownCompartment(compartment_id.to_owned()));
            }
        }
        self.membranes.push(membrane);
        Ok(())
    }

    /// Add a membrane made of all adjacent pixels of two known compartments
    pub fn add_membrane_between(
        &mut self,
        id: &str,
        compartment_a: &str,
        compartment_b: &str,
    ) -> Result<&Membrane, ModelError> {
        let a = self
            .compartment(compartment_a)
            .ok_or_else(|| ModelError::UnknownCompartment(compartment_a.to_owned()))?;
        let b = self
            .compartment(compartment_b)
            .ok_or_else(|| ModelError::UnknownCompartment(compartment_b.to_owned()))?;
        let membrane = Membrane::from_compartments(id, a, b)?;
        self.add_membrane(membrane)?;
        Ok(&self.membranes[self.membranes.len() - 1])
    }

    /// Add a species of zero concentration to a known compartment
    ///
    /// The species gets a default display color, its initial concentration
    /// and other properties can be adjusted through the returned reference.
    pub fn add_species(
        &mut self,
        id: &str,
        compartment_id: &str,
        diffusion_constant: f64,
    ) -> Result<&mut Species, ModelError> {
        if self.symbol_exists(id) {
            return Err(ModelError::DuplicateId(id.to_owned()));
        }
        let compartment = self
            .compartment(compartment_id)
            .ok_or_else(|| ModelError::UnknownCompartment(compartment_id.to_owned()))?;
        let palette = colorous::CATEGORY10;
        let color = palette[self.species.len() % palette.len()];
        let field = Field::new(
            compartment,
            id,
            diffusion_constant,
            Rgb([color.r, color.g, color.b]),
        );
        self.species.push(Species {
            name: id.to_owned(),
            is_constant: false,
            field,
        });
        let last = self.species.len() - 1;
        Ok(&mut self.species[last])
    }

    /// Add a global parameter
    pub fn add_parameter(&mut self, id: &str, value: f64) -> Result<(), ModelError> {
        if self.symbol_exists(id) {
            return Err(ModelError::DuplicateId(id.to_owned()));
        }
        self.parameters.push(Parameter {
            id: id.to_owned(),
            value,
        });
        Ok(())
    }

    /// Add a reaction to a known compartment or membrane
    pub fn add_reaction(&mut self, reaction: Reaction) -> Result<(), ModelError> {
        if self.reaction(reaction.id()).is_some() {
            return Err(ModelError::DuplicateId(reaction.id().to_owned()));
        }
        if !self.location_exists(reaction.location()) {
            return Err(ModelError::UnknownLocation {
                reaction: reaction.id().to_owned(),
                location: reaction.location().to_owned(),
            });
        }
        if let Some((species_id, _)) = reaction
            .stoichiometry()
            .iter()
            .find(|(species_id, _)| self.species_by_id(species_id).is_none())
        {
            return Err(ModelError::UnknownSpecies(species_id.clone()));
        }
        self.reactions.push(reaction);
        Ok(())
    }

    /// Truth that a compartment or membrane uses this identifier
    fn location_exists(&self, id: &str) -> bool {
        self.compartment(id).is_some() || self.membrane(id).is_some()
    }

    /// Truth that a species or parameter uses this identifier
    fn symbol_exists(&self, id: &str) -> bool {
        self.species_by_id(id).is_some() || self.parameters.iter().any(|p| p.id == id)
    }

    /// Compartments, in simulation order
    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    /// Compartment with a given identifier
    pub fn compartment(&self, id: &str) -> Option<&Compartment> {
        self.compartments.iter().find(|c| c.id() == id)
    }

    /// Membranes, in simulation order
    pub fn membranes(&self) -> &[Membrane] {
        &self.membranes
    }

    /// Membrane with a given identifier
    pub fn membrane(&self, id: &str) -> Option<&Membrane> {
        self.membranes.iter().find(|m| m.id() == id)
    }

    /// All species
    pub fn species(&self) -> &[Species] {
        &self.species
    }

    /// Species with a given identifier
    pub fn species_by_id(&self, id: &str) -> Option<&Species> {
        self.species.iter().find(|s| s.id() == id)
    }

    /// Species with a given identifier, for modification
    pub fn species_by_id_mut(&mut self, id: &str) -> Option<&mut Species> {
        self.species.iter_mut().find(|s| s.id() == id)
    }

    /// All reactions
    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    /// Reaction with a given identifier
    pub fn reaction(&self, id: &str) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.id() == id)
    }

    /// Reactions happening in a compartment or on a membrane
    pub fn reactions_in<'self_>(
        &'self_ self,
        location: &'self_ str,
    ) -> impl Iterator<Item = &'self_ Reaction> + 'self_ {
        self.reactions
            .iter()
            .filter(move |r| r.location() == location)
    }

    /// Global parameters
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Rescale every compartment of the geometry
    pub fn set_pixel_width(&mut self, pixel_width: f64) {
        for compartment in &mut self.compartments {
            compartment.set_pixel_width(pixel_width);
        }
    }

    /// Non-constant species of each compartment, in simulation order
    ///
    /// Compartments without any non-constant species are left out, as there
    /// is nothing to simulate in them.
    pub fn simulated_species(&self) -> Vec<CompartmentSpecies> {
        self.compartments
            .iter()
            .filter_map(|compartment| {
                let species_ids = self
                    .species
                    .iter()
                    .filter(|s| !s.is_constant && s.compartment_id() == compartment.id())
                    .map(|s| s.id().to_owned())
                    .collect::<Vec<_>>();
                debug!(
                    "Compartment '{}' has {} simulated species",
                    compartment.id(),
                    species_ids.len()
                );
                (!species_ids.is_empty()).then(|| CompartmentSpecies {
                    compartment_id: compartment.id().to_owned(),
                    species_ids,
                })
            })
            .collect()
    }

    /// Values of the symbols that a reaction's rate expression may use
    /// besides simulated species
    ///
    /// These are the global parameters, the concentrations of constant
    /// species and the reaction-local constants, with later entries of this
    /// list shadowing earlier ones. A constant species whose concentration is
    /// not uniform is replaced by its mean concentration.
    pub fn reaction_constants(&self, reaction: &Reaction) -> BTreeMap<String, f64> {
        let mut constants = self
            .parameters
            .iter()
            .map(|p| (p.id.clone(), p.value))
            .collect::<BTreeMap<_, _>>();
        for species in self.species.iter().filter(|s| s.is_constant) {
            if !species.field.is_uniform_concentration() {
                warn!(
                    "Constant species '{}' has a non-uniform concentration, using its mean value",
                    species.id()
                );
            }
            constants.insert(species.id().to_owned(), species.field.mean_concentration());
        }
        constants.extend(reaction.constants().iter().cloned());
        constants
    }
}

/// Things that can go wrong when building a model
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ModelError {
    /// Identifier already in use
    #[error("identifier '{0}' is already in use")]
    DuplicateId(String),

    /// Reference to an unknown compartment
    #[error("no compartment with identifier '{0}'")]
    UnknownCompartment(String),

    /// Reference to an unknown species
    #[error("no species with identifier '{0}'")]
    UnknownSpecies(String),

    /// Reaction located in an unknown compartment or membrane
    #[error("reaction '{reaction}' is located in unknown compartment or membrane '{location}'")]
    UnknownLocation { reaction: String, location: String },

    /// Invalid geometry
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    fn init_logger() {
        static INIT_LOGGER: Once = Once::new();
        INIT_LOGGER.call_once(|| {
            let _ = env_logger::try_init();
        });
    }

    /// Two single-pixel compartments side by side
    fn two_compartments() -> Result<Model, ModelError> {
        let mut model = Model::default();
        model.add_compartment(Compartment::from_pixels("a", [1, 2], vec![Point::new(0, 0)])?)?;
        model.add_compartment(Compartment::from_pixels("b", [1, 2], vec![Point::new(1, 0)])?)?;
        model.add_membrane_between("a_b", "a", "b")?;
        Ok(model)
    }

    #[test]
    fn duplicate_identifiers() -> Result<(), ModelError> {
        init_logger();
        let mut model = two_compartments()?;
        model.add_species("x", "a", 1.0)?;
        assert_eq!(
            model.add_parameter("x", 1.0),
            Err(ModelError::DuplicateId("x".to_owned()))
        );
        assert!(model.add_species("y", "c", 1.0).is_err());
        assert!(model.add_membrane_between("a_b", "a", "b").is_err());
        Ok(())
    }

    #[test]
    fn reaction_validation() -> Result<(), ModelError> {
        init_logger();
        let mut model = two_compartments()?;
        model.add_species("x", "a", 1.0)?;
        model.add_reaction(Reaction::new("r1", "a_b", "x").with_stoichiometry("x", -1.0))?;
        assert!(matches!(
            model.add_reaction(Reaction::new("r2", "nowhere", "1")),
            Err(ModelError::UnknownLocation { .. })
        ));
        assert_eq!(
            model.add_reaction(Reaction::new("r3", "a", "1").with_stoichiometry("z", 1.0)),
            Err(ModelError::UnknownSpecies("z".to_owned()))
        );
        assert_eq!(model.reactions_in("a_b").count(), 1);
        assert_eq!(model.reactions_in("a").count(), 0);
        Ok(())
    }

    #[test]
    fn simulated_species_skip_constants() -> Result<(), ModelError> {
        init_logger();
        let mut model = two_compartments()?;
        model.add_species("x", "a", 1.0)?.is_constant = true;
        model.add_species("y", "b", 1.0)?;
        model.add_species("z", "b", 0.0)?;
        assert_eq!(
            model.simulated_species(),
            vec![CompartmentSpecies {
                compartment_id: "b".to_owned(),
                species_ids: vec!["y".to_owned(), "z".to_owned()],
            }]
        );
        Ok(())
    }

    #[test]
    fn constants_shadowing() -> Result<(), ModelError> {
        init_logger();
        let mut model = two_compartments()?;
        model.add_parameter("k", 1.0)?;
        model.add_parameter("j", 2.0)?;
        let x = model.add_species("x", "a", 1.0)?;
        x.is_constant = true;
        x.field.set_uniform_concentration(3.0);
        let reaction = Reaction::new("r", "a", "k*j*x").with_constant("k", 4.0);
        let constants = model.reaction_constants(&reaction);
        assert_eq!(constants["k"], 4.0);
        assert_eq!(constants["j"], 2.0);
        assert_eq!(constants["x"], 3.0);
        assert_eq!(constants.len(), 3);
        Ok(())
    }

    #[test]
    fn physical_coordinates() -> Result<(), ModelError> {
        init_logger();
        let mut model = two_compartments()?;
        model.set_pixel_width(0.5);
        model.coordinates.origin = [1.0, -2.0];
        let b = model.compartment("b").ok_or(ModelError::UnknownCompartment("b".to_owned()))?;
        assert_eq!(model.coordinates.of(b, b.pixels()[0]), [1.5, -2.0]);

        let tall = Compartment::from_pixels("tall", [3, 1], vec![Point::new(0, 0)])?;
        assert_eq!(SpatialCoordinates::default().of(&tall, Point::new(0, 0)), [0.0, 2.0]);
        Ok(())
    }
}
