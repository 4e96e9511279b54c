//! Reactions on the boundary between two compartments

use crate::{
    compartment::SimCompartment,
    reaction::{ExtraVariables, ReactionEvaluator},
    Error,
};
use data::{geometry::Membrane, model::Model};
use log::{debug, info};

/// Membrane reactions coupling the boundary pixels of two compartments
///
/// Reaction inputs are the concentrations of compartment A's species followed
/// by those of compartment B's species, then the extra variables of the pixel
/// in B (or in A, if B is not simulated). Either compartment may be absent
/// from the simulation if it has no simulated species, in which case it
/// contributes nothing to the inputs and receives nothing from the outputs.
#[derive(Debug)]
pub struct SimMembrane {
    /// Membrane identifier
    id: String,

    /// Index of compartment A among the simulated compartments
    compartment_a: Option<usize>,

    /// Index of compartment B among the simulated compartments
    compartment_b: Option<usize>,

    /// Number of species of compartment A
    num_species_a: usize,

    /// Number of species of compartment B
    num_species_b: usize,

    /// Number of extra variables
    num_extra_variables: usize,

    /// Pairs of adjacent pixel indices `(in A, in B)`
    index_pairs: Vec<(usize, usize)>,

    /// Reaction rates
    reactions: ReactionEvaluator,
}
//
impl SimMembrane {
    /// Set up the reactions of `membrane`
    ///
    /// `compartment_a` and `compartment_b` are the simulated compartments on
    /// either side, along with their index in the simulator's compartment
    /// list. They must match the membrane's compartments, and carry
    /// `extra_variables`.
    pub fn new(
        model: &Model,
        membrane: &Membrane,
        compartment_a: Option<(usize, &SimCompartment)>,
        compartment_b: Option<(usize, &SimCompartment)>,
        extra_variables: &ExtraVariables,
    ) -> Result<Self, Error> {
        for (side, expected) in [
            (compartment_a, membrane.compartment_a()),
            (compartment_b, membrane.compartment_b()),
        ] {
            if let Some((_, compartment)) = side {
                if compartment.id() != expected {
                    return Err(Error::MembraneCompartmentMismatch {
                        membrane: membrane.id().to_owned(),
                        expected: expected.to_owned(),
                        actual: compartment.id().to_owned(),
                    });
                }
            }
        }
        if let (Some((a, _)), Some((b, _))) = (compartment_a, compartment_b) {
            if a == b {
                return Err(Error::MembraneCompartmentMismatch {
                    membrane: membrane.id().to_owned(),
                    expected: membrane.compartment_b().to_owned(),
                    actual: membrane.compartment_a().to_owned(),
                });
            }
        }

        let species_of = |side: Option<(usize, &SimCompartment)>| {
            side.map(|(_, c)| c.species_ids().to_vec()).unwrap_or_default()
        };
        let species_a = species_of(compartment_a);
        let species_b = species_of(compartment_b);
        let (num_species_a, num_species_b) = (species_a.len(), species_b.len());
        let species_ids = [species_a, species_b].concat();

        let reaction_ids = model
            .reactions_in(membrane.id())
            .map(|r| r.id().to_owned())
            .collect::<Vec<_>>();
        // Membrane rates are fluxes per unit area, to be spread over a pixel
        let pixel_width = model
            .compartment(membrane.compartment_a())
            .ok_or_else(|| Error::UnknownCompartment(membrane.compartment_a().to_owned()))?
            .pixel_width();
        let scale = pixel_width / model.units.volume_over_length_cubed;
        let scale_factors = vec![scale; reaction_ids.len()];
        debug!(
            "Membrane '{}' reactions: {reaction_ids:?}, scale factor {scale}",
            membrane.id()
        );
        let reactions = ReactionEvaluator::new(
            model,
            &species_ids,
            extra_variables.ids(),
            &reaction_ids,
            Some(scale_factors.as_slice()),
        )?;
        info!(
            "Membrane '{}': {} pixel pairs, {} species",
            membrane.id(),
            membrane.index_pairs().len(),
            species_ids.len()
        );

        Ok(Self {
            id: membrane.id().to_owned(),
            compartment_a: compartment_a.map(|(idx, _)| idx),
            compartment_b: compartment_b.map(|(idx, _)| idx),
            num_species_a,
            num_species_b,
            num_extra_variables: extra_variables.len(),
            index_pairs: membrane.index_pairs().to_vec(),
            reactions,
        })
    }

    /// Membrane identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Truth that the membrane affects any simulated species
    pub fn has_reactions(&self) -> bool {
        self.reactions.has_reactions()
    }

    /// Add the membrane reaction rates to the dcdt of boundary pixels
    ///
    /// `compartments` is the simulator's compartment list that the indices
    /// given at construction time refer to.
    pub fn evaluate_reactions(&self, compartments: &mut [SimCompartment]) {
        if !self.reactions.has_reactions() {
            return;
        }
        let (mut compartment_a, mut compartment_b) =
            match (self.compartment_a, self.compartment_b) {
                (Some(a), Some(b)) => {
                    let (a, b) = pair_mut(compartments, a, b);
                    (Some(a), Some(b))
                }
                (Some(a), None) => (Some(&mut compartments[a]), None),
                (None, Some(b)) => (None, Some(&mut compartments[b])),
                (None, None) => return,
            };
        let num_species_a = self.num_species_a;
        let num_species = num_species_a + self.num_species_b;
        let mut input = vec![0.0; num_species + self.num_extra_variables];
        let mut output = vec![0.0; num_species];
        for &(ia, ib) in &self.index_pairs {
            let (input_a, input_b) = input.split_at_mut(num_species_a);
            if let Some(compartment) = &compartment_a {
                let conc = compartment.pixel_concentrations(ia);
                for (dst, &src) in input_a.iter_mut().zip(&conc) {
                    *dst = src;
                }
                if compartment_b.is_none() {
                    for (dst, &src) in input_b.iter_mut().zip(conc.iter().skip(num_species_a)) {
                        *dst = src;
                    }
                }
            }
            // B's species are followed by its extra variables
            if let Some(compartment) = &compartment_b {
                for (dst, &src) in input_b.iter_mut().zip(&compartment.pixel_concentrations(ib)) {
                    *dst = src;
                }
            }
            self.reactions.evaluate(&mut output, &input);
            let (output_a, output_b) = output.split_at(num_species_a);
            if let Some(compartment) = compartment_a.as_deref_mut() {
                compartment.add_to_dcdt(ia, output_a);
            }
            if let Some(compartment) = compartment_b.as_deref_mut() {
                compartment.add_to_dcdt(ib, output_b);
            }
        }
    }
}

/// Mutable access to two distinct elements of a slice
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b, "a membrane cannot link a compartment to itself");
    if a < b {
        let (head, tail) = items.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_pairs() {
        let mut items = [0, 1, 2, 3];
        let (a, b) = pair_mut(&mut items, 3, 1);
        std::mem::swap(a, b);
        assert_eq!(items, [0, 3, 2, 1]);
    }
}
