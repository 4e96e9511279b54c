//! Net reaction rates of a set of species

use crate::Error;
use data::{
    geometry::{Compartment, Point},
    model::{Model, SpatialCoordinates},
};
use log::debug;
use symbolic::Evaluator;

/// Identifier of the simulation time in rate expressions
pub const TIME: &str = "time";

/// Variables other than species concentrations that reaction rates use
///
/// Each pixel carries them after its species concentrations: the time if
/// some rate depends on it, then the x and y coordinates of the pixel if some
/// rate depends on either. The time grows at rate 1 and the coordinates stay
/// put, so every integration scheme sees the right values at each stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtraVariables {
    /// Identifiers, in storage order
    ids: Vec<String>,

    /// Time derivatives, in storage order
    rates: Vec<f64>,

    /// Truth that the time is stored
    time: bool,

    /// Truth that pixel coordinates are stored
    space: bool,
}
//
impl ExtraVariables {
    /// Find out which extra variables the reactions of a model depend on
    ///
    /// A symbol only counts when no species, global parameter or local
    /// constant of the reaction goes by the same name.
    pub fn from_model(model: &Model) -> Self {
        let is_used = |id: &str| {
            model.species_by_id(id).is_none()
                && model.parameters().iter().all(|p| p.id != id)
                && model.reactions().iter().any(|r| {
                    r.constants().iter().all(|(name, _)| name != id)
                        && symbolic::uses_symbol(r.expression(), id)
                })
        };
        let SpatialCoordinates { x_id, y_id, .. } = &model.coordinates;
        let time = is_used(TIME);
        let space = is_used(x_id) || is_used(y_id);
        let mut result = Self {
            time,
            space,
            ..Self::default()
        };
        if time {
            result.ids.push(TIME.to_owned());
            result.rates.push(1.0);
        }
        if space {
            result.ids.extend([x_id.clone(), y_id.clone()]);
            result.rates.extend([0.0, 0.0]);
        }
        if !result.ids.is_empty() {
            debug!("Reaction rates depend on {:?}", result.ids);
        }
        result
    }

    /// Identifiers, in storage order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of extra variables
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Truth that reactions only depend on species
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Time derivatives, in storage order
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Values at the start of a simulation, at one pixel of a compartment
    pub fn initial_values(
        &self,
        coordinates: &SpatialCoordinates,
        compartment: &Compartment,
        point: Point,
    ) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.len());
        if self.time {
            values.push(0.0);
        }
        if self.space {
            values.extend(coordinates.of(compartment, point));
        }
        values
    }
}

/// Compiled net reaction rates of an ordered list of species
///
/// The rate of species `i` is the sum over all reactions of the species'
/// stoichiometric coefficient times the reaction rate, divided by the
/// reaction's scale factor. Evaluation maps the concentrations of all
/// species at one point, followed by the values of the extra variables, to
/// the rates of all species at that point, in the same order.
#[derive(Clone, Debug)]
pub struct ReactionEvaluator {
    /// Compiled rate expressions
    evaluator: Evaluator,

    /// Truth that there is at least one reaction term
    has_reactions: bool,
}
//
impl ReactionEvaluator {
    /// Compile the rates of `species_ids` due to `reaction_ids`
    ///
    /// Constant species, global parameters and reaction-local constants are
    /// folded into the compiled code, rates may also use `extra_variables`.
    /// If `scale_factors` is specified, it must contain one entry per
    /// reaction.
    pub fn new(
        model: &Model,
        species_ids: &[String],
        extra_variables: &[String],
        reaction_ids: &[String],
        scale_factors: Option<&[f64]>,
    ) -> Result<Self, Error> {
        if let Some(scale_factors) = scale_factors {
            if scale_factors.len() != reaction_ids.len() {
                return Err(Error::ScaleFactorCount {
                    expected: reaction_ids.len(),
                    actual: scale_factors.len(),
                });
            }
        }
        let mut terms = vec![Vec::new(); species_ids.len()];
        for (idx, reaction_id) in reaction_ids.iter().enumerate() {
            let reaction = model
                .reaction(reaction_id)
                .ok_or_else(|| Error::UnknownReaction(reaction_id.clone()))?;
            let scale = scale_factors.map_or(1.0, |factors| factors[idx]);
            let constants = model.reaction_constants(reaction);
            let rate = symbolic::substitute_constants(reaction.expression(), &constants, species_ids);
            for (species_id, species_terms) in species_ids.iter().zip(&mut terms) {
                let stoichiometry = reaction.stoichiometry_of(species_id);
                if stoichiometry != 0.0 {
                    species_terms.push(format!("({stoichiometry})*({rate})/({scale})"));
                }
            }
        }
        let has_reactions = terms.iter().any(|t| !t.is_empty());
        let expressions = terms
            .into_iter()
            .map(|t| {
                if t.is_empty() {
                    "0".to_owned()
                } else {
                    t.join(" + ")
                }
            })
            .collect::<Vec<_>>();
        for (species_id, expression) in species_ids.iter().zip(&expressions) {
            debug!("d[{species_id}]/dt = {expression}");
        }
        let variables = [species_ids, extra_variables].concat();
        let evaluator = if has_reactions {
            symbolic::compile(&expressions, &variables, &Default::default())
        } else {
            symbolic::compile(&[], &[], &Default::default())
        }
        .map_err(|source| Error::Compile {
            species: species_ids.join(", "),
            source,
        })?;
        Ok(Self {
            evaluator,
            has_reactions,
        })
    }

    /// Truth that some species have a nonzero reaction rate
    pub fn has_reactions(&self) -> bool {
        self.has_reactions
    }

    /// Evaluate the rates at one point
    ///
    /// `input` holds the species concentrations, then the extra variables.
    /// Without any reaction term, the rates are all zero and `output` is
    /// filled accordingly.
    #[inline]
    pub fn evaluate(&self, output: &mut [f64], input: &[f64]) {
        if self.has_reactions {
            self.evaluator.eval(output, input);
        } else {
            output.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{init_logger, single_pixel_model};
    use data::model::Reaction;

    fn model() -> Result<Model, Box<dyn std::error::Error>> {
        let mut model = single_pixel_model(&["A", "B", "C"])?;
        model.add_parameter("k", 2.0)?;
        model.add_reaction(
            Reaction::new("r1", "c", "k*A*B")
                .with_stoichiometry("A", -1.0)
                .with_stoichiometry("B", -1.0)
                .with_stoichiometry("C", 1.0),
        )?;
        model.add_reaction(
            Reaction::new("r2", "c", "k2*C")
                .with_constant("k2", 0.5)
                .with_stoichiometry("C", -2.0)
                .with_stoichiometry("A", 1.0),
        )?;
        Ok(model)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn net_rates() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = model()?;
        let reactions = ReactionEvaluator::new(
            &model,
            &ids(&["A", "B", "C"]),
            &[],
            &ids(&["r1", "r2"]),
            Some(&[1.0, 4.0][..]),
        )?;
        let mut output = [0.0; 3];
        reactions.evaluate(&mut output, &[1.0, 3.0, 8.0]);
        // r1 = 6, r2 = 4 with scale 4
        assert_eq!(output, [-6.0 + 1.0, -6.0, 6.0 - 2.0]);
        Ok(())
    }

    #[test]
    fn relabelling_species() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = model()?;
        let reaction_ids = ids(&["r1", "r2"]);
        let forward = ReactionEvaluator::new(&model, &ids(&["A", "B", "C"]), &[], &reaction_ids, None)?;
        let backward = ReactionEvaluator::new(&model, &ids(&["C", "B", "A"]), &[], &reaction_ids, None)?;
        let input = [0.3, 1.7, 2.9];
        let mut output_forward = [0.0; 3];
        forward.evaluate(&mut output_forward, &input);
        let reversed_input = [input[2], input[1], input[0]];
        let mut output_backward = [0.0; 3];
        backward.evaluate(&mut output_backward, &reversed_input);
        for i in 0..3 {
            assert_eq!(output_forward[i], output_backward[2 - i]);
        }
        Ok(())
    }

    #[test]
    fn no_reactions() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = model()?;
        let reactions = ReactionEvaluator::new(&model, &ids(&["A", "B"]), &[], &[], None)?;
        assert!(!reactions.has_reactions());
        let mut output = [1.0; 2];
        reactions.evaluate(&mut output, &[1.0, 2.0]);
        assert_eq!(output, [0.0; 2]);
        Ok(())
    }

    #[test]
    fn configuration_errors() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let model = model()?;
        assert!(matches!(
            ReactionEvaluator::new(&model, &ids(&["A"]), &[], &ids(&["r1"]), Some(&[][..])),
            Err(Error::ScaleFactorCount { .. })
        ));
        assert!(matches!(
            ReactionEvaluator::new(&model, &ids(&["A"]), &[], &ids(&["r3"]), None),
            Err(Error::UnknownReaction(_))
        ));
        // B is referenced by r1 but is not an input
        assert!(matches!(
            ReactionEvaluator::new(&model, &ids(&["A"]), &[], &ids(&["r1"]), None),
            Err(Error::Compile { .. })
        ));
        Ok(())
    }

    #[test]
    fn time_and_space_variables() -> Result<(), Box<dyn std::error::Error>> {
        init_logger();
        let mut model = model()?;
        assert!(ExtraVariables::from_model(&model).is_empty());

        model.add_reaction(
            Reaction::new("pulse", "c", "time*A + y")
                .with_constant("x", 3.0)
                .with_stoichiometry("A", 1.0),
        )?;
        let extra = ExtraVariables::from_model(&model);
        assert_eq!(extra.ids(), ["time", "x", "y"]);
        assert_eq!(extra.rates(), [1.0, 0.0, 0.0]);
        let compartment = model.compartment("c").ok_or("no compartment")?;
        assert_eq!(
            extra.initial_values(&model.coordinates, compartment, compartment.pixels()[0]),
            [0.0, 0.0, 0.0]
        );

        let reactions = ReactionEvaluator::new(
            &model,
            &ids(&["A", "B", "C"]),
            extra.ids(),
            &ids(&["pulse"]),
            None,
        )?;
        let mut output = [0.0; 3];
        reactions.evaluate(&mut output, &[2.0, 0.0, 0.0, 5.0, 7.0, 11.0]);
        assert_eq!(output, [5.0 * 2.0 + 11.0, 0.0, 0.0]);

        // A global parameter takes precedence over the time variable
        model.add_parameter("time", 1.0)?;
        assert_eq!(ExtraVariables::from_model(&model).ids(), ["x", "y"]);
        Ok(())
    }
}
