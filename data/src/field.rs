//! Species concentration fields

use crate::geometry::{Compartment, GeometryError};
use image::Rgb;

/// Concentration of one species over the pixels of its compartment
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    /// Species identifier
    species_id: String,

    /// Identifier of the compartment this species lives in
    compartment_id: String,

    /// Concentration at each pixel, in compartment pixel order
    conc: Vec<f64>,

    /// Diffusion constant, in physical units
    diffusion_constant: f64,

    /// If false, the species is treated as well-mixed
    is_spatial: bool,

    /// True if every pixel has the same concentration
    is_uniform_concentration: bool,

    /// Display color
    color: Rgb<u8>,
}
//
impl Field {
    /// Set up a field of zero concentration
    pub fn new(
        compartment: &Compartment,
        species_id: impl Into<String>,
        diffusion_constant: f64,
        color: Rgb<u8>,
    ) -> Self {
        Self {
            species_id: species_id.into(),
            compartment_id: compartment.id().to_owned(),
            conc: vec![0.0; compartment.num_pixels()],
            diffusion_constant,
            is_spatial: true,
            is_uniform_concentration: true,
            color,
        }
    }

    /// Species identifier
    pub fn species_id(&self) -> &str {
        &self.species_id
    }

    /// Identifier of the compartment this species lives in
    pub fn compartment_id(&self) -> &str {
        &self.compartment_id
    }

    /// Concentration at each pixel, in compartment pixel order
    pub fn concentration(&self) -> &[f64] {
        &self.conc
    }

    /// Mean concentration over the compartment
    pub fn mean_concentration(&self) -> f64 {
        if self.conc.is_empty() {
            return 0.0;
        }
        self.conc.iter().sum::<f64>() / self.conc.len() as f64
    }

    /// Set the same concentration at every pixel
    pub fn set_uniform_concentration(&mut self, concentration: f64) {
        self.conc.fill(concentration);
        self.is_uniform_concentration = true;
    }

    /// Set the concentration of every pixel, in compartment pixel order
    pub fn set_concentration(&mut self, concentration: Vec<f64>) -> Result<(), GeometryError> {
        if concentration.len() != self.conc.len() {
            return Err(GeometryError::ArraySize {
                expected: self.conc.len(),
                actual: concentration.len(),
            });
        }
        self.conc = concentration;
        self.is_uniform_concentration = false;
        Ok(())
    }

    /// Import concentrations from an image-shaped array
    ///
    /// The array is row-major with its origin at the bottom-left corner of
    /// the geometry image, which is how sampled concentration fields are
    /// stored. Values outside of the compartment are ignored.
    pub fn import_concentration(
        &mut self,
        compartment: &Compartment,
        array: &[f64],
    ) -> Result<(), GeometryError> {
        let [rows, cols] = compartment.shape();
        if array.len() != rows * cols {
            return Err(GeometryError::ArraySize {
                expected: rows * cols,
                actual: array.len(),
            });
        }
        debug_assert_eq!(compartment.num_pixels(), self.conc.len());
        for (conc, point) in self.conc.iter_mut().zip(compartment.pixels()) {
            *conc = array[point.x + cols * (rows - 1 - point.y)];
        }
        self.is_uniform_concentration = false;
        Ok(())
    }

    /// Export concentrations as an image-shaped array
    ///
    /// Inverse of [`import_concentration()`](Self::import_concentration),
    /// pixels outside of the compartment are set to zero.
    pub fn concentration_image_array(&self, compartment: &Compartment) -> Vec<f64> {
        let [rows, cols] = compartment.shape();
        let mut array = vec![0.0; rows * cols];
        for (&conc, point) in self.conc.iter().zip(compartment.pixels()) {
            array[point.x + cols * (rows - 1 - point.y)] = conc;
        }
        array
    }

    /// Diffusion constant, in physical units
    pub fn diffusion_constant(&self) -> f64 {
        self.diffusion_constant
    }

    /// Change the diffusion constant
    pub fn set_diffusion_constant(&mut self, diffusion_constant: f64) {
        self.diffusion_constant = diffusion_constant;
    }

    /// If false, the species is treated as well-mixed
    pub fn is_spatial(&self) -> bool {
        self.is_spatial
    }

    /// Toggle well-mixed treatment
    pub fn set_is_spatial(&mut self, is_spatial: bool) {
        self.is_spatial = is_spatial;
    }

    /// True if every pixel has the same concentration
    pub fn is_uniform_concentration(&self) -> bool {
        self.is_uniform_concentration
    }

    /// Display color
    pub fn color(&self) -> Rgb<u8> {
        self.color
    }

    /// Change the display color
    pub fn set_color(&mut self, color: Rgb<u8>) {
        self.color = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn compartment() -> Compartment {
        // Two pixels on the top row, one on the bottom row of a 2x3 image
        Compartment::from_pixels(
            "c",
            [2, 3],
            vec![Point::new(0, 0), Point::new(2, 0), Point::new(1, 1)],
        )
        .unwrap()
    }

    #[test]
    fn uniform_concentration() {
        let c = compartment();
        let mut field = Field::new(&c, "s", 1.0, Rgb([0, 0, 0]));
        assert_eq!(field.concentration(), &[0.0; 3]);
        field.set_uniform_concentration(2.5);
        assert!(field.is_uniform_concentration());
        assert_eq!(field.concentration(), &[2.5; 3]);
        assert_eq!(field.mean_concentration(), 2.5);
    }

    #[test]
    fn import_flips_rows() -> Result<(), GeometryError> {
        let c = compartment();
        let mut field = Field::new(&c, "s", 1.0, Rgb([0, 0, 0]));
        // Bottom image row first
        let array = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        field.import_concentration(&c, &array)?;
        assert!(!field.is_uniform_concentration());
        assert_eq!(field.concentration(), &[4.0, 6.0, 2.0]);
        assert_eq!(
            field.concentration_image_array(&c),
            vec![0.0, 2.0, 0.0, 4.0, 0.0, 6.0]
        );
        Ok(())
    }

    #[test]
    fn size_mismatch() {
        let c = compartment();
        let mut field = Field::new(&c, "s", 1.0, Rgb([0, 0, 0]));
        assert_eq!(
            field.import_concentration(&c, &[0.0; 5]),
            Err(GeometryError::ArraySize {
                expected: 6,
                actual: 5
            })
        );
        assert!(field.set_concentration(vec![1.0; 2]).is_err());
        field.set_concentration(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(field.mean_concentration(), 2.0);
    }
}
