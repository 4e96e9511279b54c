//! Compartment and membrane geometry
//!
//! A compartment is the set of pixels of a segmented geometry image that share
//! one color. Each pixel knows the index of its four axial neighbours within
//! the same compartment, which is all the diffusion operator needs. Where a
//! neighbour would fall outside of the compartment, the pixel refers to itself
//! instead, which yields a zero-flux boundary.

use image::{Rgb, RgbImage};
use log::{debug, info};
use ndarray::Array2;
use thiserror::Error;

/// Pixel coordinates within a geometry image (origin at the top-left corner)
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Point {
    /// Column index
    pub x: usize,

    /// Row index
    pub y: usize,
}
//
impl Point {
    /// Build a point from its coordinates
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Neighbour directions, in neighbour table order
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    /// Towards increasing x
    UpX = 0,

    /// Towards decreasing x
    DnX,

    /// Towards increasing y
    UpY,

    /// Towards decreasing y
    DnY,
}
//
impl Direction {
    /// All directions, in neighbour table order
    pub const ALL: [Direction; 4] = [Self::UpX, Self::DnX, Self::UpY, Self::DnY];

    /// Neighbour of `point` in this direction, if it lies within an image of
    /// shape `[rows, cols]`
    pub fn step(self, point: Point, [rows, cols]: [usize; 2]) -> Option<Point> {
        let Point { x, y } = point;
        match self {
            Self::UpX => (x + 1 < cols).then(|| Point::new(x + 1, y)),
            Self::DnX => x.checked_sub(1).map(|x| Point::new(x, y)),
            Self::UpY => (y + 1 < rows).then(|| Point::new(x, y + 1)),
            Self::DnY => y.checked_sub(1).map(|y| Point::new(x, y)),
        }
    }
}

/// Set of pixels making up a compartment
#[derive(Clone, Debug, PartialEq)]
pub struct Compartment {
    /// Compartment identifier
    id: String,

    /// Shape of the geometry image, as `[rows, cols]`
    shape: [usize; 2],

    /// Pixels of this compartment, in the order used by concentration arrays
    pixels: Vec<Point>,

    /// For each pixel, the index of its +x, -x, +y, -y neighbours
    neighbours: Vec<[usize; 4]>,

    /// Image-shaped lookup table from coordinates to pixel index
    index: Array2<Option<usize>>,

    /// Physical length of one pixel side
    pixel_width: f64,
}
//
impl Compartment {
    /// Collect the pixels of `image` that have color `color`
    ///
    /// Pixels are visited in row-major order, which sets the pixel order of
    /// every concentration array defined over this compartment. An image that
    /// does not contain the requested color yields an empty compartment.
    pub fn new(id: impl Into<String>, image: &RgbImage, color: Rgb<u8>) -> Self {
        let shape = [image.height() as usize, image.width() as usize];
        let pixels = image
            .enumerate_pixels()
            .filter(|(_, _, pixel)| **pixel == color)
            .map(|(x, y, _)| Point::new(x as usize, y as usize))
            .collect();
        let compartment = Self::with_pixels(id.into(), shape, pixels);
        info!(
            "Compartment '{}' of color {color:?} has {} pixels",
            compartment.id,
            compartment.num_pixels()
        );
        compartment
    }

    /// Build a compartment from an explicit, ordered pixel list
    pub fn from_pixels(
        id: impl Into<String>,
        shape: [usize; 2],
        pixels: Vec<Point>,
    ) -> Result<Self, GeometryError> {
        let id = id.into();
        let mut seen = Array2::from_elem(shape, false);
        for &point in &pixels {
            let Some(slot) = seen.get_mut([point.y, point.x]) else {
                return Err(GeometryError::PixelOutOfBounds {
                    compartment: id,
                    point,
                    shape,
                });
            };
            if std::mem::replace(slot, true) {
                return Err(GeometryError::DuplicatePixel {
                    compartment: id,
                    point,
                });
            }
        }
        Ok(Self::with_pixels(id, shape, pixels))
    }

    /// Shared construction logic, pixels must be valid and unique
    fn with_pixels(id: String, shape: [usize; 2], pixels: Vec<Point>) -> Self {
        let mut index = Array2::from_elem(shape, None);
        for (idx, point) in pixels.iter().enumerate() {
            index[[point.y, point.x]] = Some(idx);
        }
        let neighbours = pixels
            .iter()
            .enumerate()
            .map(|(idx, &point)| {
                Direction::ALL.map(|direction| {
                    direction
                        .step(point, shape)
                        .and_then(|neighbour| index[[neighbour.y, neighbour.x]])
                        .unwrap_or(idx)
                })
            })
            .collect();
        debug!("Built neighbour table of compartment '{id}'");
        Self {
            id,
            shape,
            pixels,
            neighbours,
            index,
            pixel_width: 1.0,
        }
    }

    /// Compartment identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shape of the geometry image, as `[rows, cols]`
    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    /// Number of pixels
    pub fn num_pixels(&self) -> usize {
        self.pixels.len()
    }

    /// Pixels of this compartment
    pub fn pixels(&self) -> &[Point] {
        &self.pixels
    }

    /// Neighbour table: +x, -x, +y, -y neighbour index of each pixel
    pub fn neighbours(&self) -> &[[usize; 4]] {
        &self.neighbours
    }

    /// Index of the pixel at coordinates `point`, if it is part of this
    /// compartment
    pub fn index_of(&self, point: Point) -> Option<usize> {
        self.index.get([point.y, point.x]).copied().flatten()
    }

    /// Physical length of one pixel side
    pub fn pixel_width(&self) -> f64 {
        self.pixel_width
    }

    /// Rescale the geometry
    pub fn set_pixel_width(&mut self, pixel_width: f64) {
        self.pixel_width = pixel_width;
    }
}

/// Boundary between two compartments
#[derive(Clone, Debug, PartialEq)]
pub struct Membrane {
    /// Membrane identifier
    id: String,

    /// Identifier of the first compartment
    compartment_a: String,

    /// Identifier of the second compartment
    compartment_b: String,

    /// Pairs of adjacent pixel indices `(in A, in B)`
    index_pairs: Vec<(usize, usize)>,
}
//
impl Membrane {
    /// Build a membrane from an explicit list of adjacent pixel pairs
    pub fn new(
        id: impl Into<String>,
        compartment_a: &Compartment,
        compartment_b: &Compartment,
        index_pairs: Vec<(usize, usize)>,
    ) -> Result<Self, GeometryError> {
        let id = id.into();
        Self::check_compartments(&id, compartment_a, compartment_b)?;
        for &pair @ (ia, ib) in &index_pairs {
            let (Some(&pa), Some(&pb)) =
                (compartment_a.pixels.get(ia), compartment_b.pixels.get(ib))
            else {
                return Err(GeometryError::PairOutOfRange { membrane: id, pair });
            };
            if pa.x.abs_diff(pb.x) + pa.y.abs_diff(pb.y) != 1 {
                return Err(GeometryError::NotAdjacent { membrane: id, pair });
            }
        }
        Ok(Self {
            id,
            compartment_a: compartment_a.id.clone(),
            compartment_b: compartment_b.id.clone(),
            index_pairs,
        })
    }

    /// Find every pair of axially adjacent pixels between two compartments
    ///
    /// Pairs are ordered by pixel of `compartment_a`, then by neighbour
    /// direction. A pixel may thus appear in several pairs.
    pub fn from_compartments(
        id: impl Into<String>,
        compartment_a: &Compartment,
        compartment_b: &Compartment,
    ) -> Result<Self, GeometryError> {
        let id = id.into();
        Self::check_compartments(&id, compartment_a, compartment_b)?;
        let index_pairs = compartment_a
            .pixels
            .iter()
            .enumerate()
            .flat_map(|(ia, &point)| {
                Direction::ALL.into_iter().filter_map(move |direction| {
                    let neighbour = direction.step(point, compartment_a.shape)?;
                    compartment_b.index_of(neighbour).map(|ib| (ia, ib))
                })
            })
            .collect::<Vec<_>>();
        info!(
            "Membrane '{id}' between '{}' and '{}' has {} pixel pairs",
            compartment_a.id,
            compartment_b.id,
            index_pairs.len()
        );
        Ok(Self {
            id,
            compartment_a: compartment_a.id.clone(),
            compartment_b: compartment_b.id.clone(),
            index_pairs,
        })
    }

    /// Checks common to all constructors
    fn check_compartments(
        id: &str,
        compartment_a: &Compartment,
        compartment_b: &Compartment,
    ) -> Result<(), GeometryError> {
        if compartment_a.id == compartment_b.id {
            return Err(GeometryError::SameCompartment(id.to_owned()));
        }
        if compartment_a.shape != compartment_b.shape {
            return Err(GeometryError::ShapeMismatch {
                membrane: id.to_owned(),
                shape_a: compartment_a.shape,
                shape_b: compartment_b.shape,
            });
        }
        Ok(())
    }

    /// Membrane identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the first compartment
    pub fn compartment_a(&self) -> &str {
        &self.compartment_a
    }

    /// Identifier of the second compartment
    pub fn compartment_b(&self) -> &str {
        &self.compartment_b
    }

    /// Pairs of adjacent pixel indices `(in A, in B)`
    pub fn index_pairs(&self) -> &[(usize, usize)] {
        &self.index_pairs
    }
}

/// Things that can go wrong when building geometry
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GeometryError {
    /// A pixel lies outside of the geometry image
    #[error("pixel {point:?} of compartment '{compartment}' is outside of the {shape:?} image")]
    PixelOutOfBounds {
        compartment: String,
        point: Point,
        shape: [usize; 2],
    },

    /// A pixel was listed twice
    #[error("pixel {point:?} appears twice in compartment '{compartment}'")]
    DuplicatePixel { compartment: String, point: Point },

    /// A membrane was defined between a compartment and itself
    #[error("membrane '{0}' links a compartment to itself")]
    SameCompartment(String),

    /// A membrane links compartments from different geometry images
    #[error("membrane '{membrane}' links compartments of shape {shape_a:?} and {shape_b:?}")]
    ShapeMismatch {
        membrane: String,
        shape_a: [usize; 2],
        shape_b: [usize; 2],
    },

    /// A membrane pixel pair refers to a nonexistent pixel
    #[error("pixel pair {pair:?} of membrane '{membrane}' is out of range")]
    PairOutOfRange {
        membrane: String,
        pair: (usize, usize),
    },

    /// A membrane pixel pair is made of non-adjacent pixels
    #[error("pixel pair {pair:?} of membrane '{membrane}' is not made of adjacent pixels")]
    NotAdjacent {
        membrane: String,
        pair: (usize, usize),
    },

    /// An image-shaped array does not match the geometry image
    #[error("expected {expected} values, got {actual}")]
    ArraySize { expected: usize, actual: usize },
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

    /// 4x3 image with a 2x2 red square at the top left, the rest blue
    fn test_image() -> RgbImage {
        RgbImage::from_fn(4, 3, |x, y| {
            if x < 2 && y < 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    #[test]
    fn pixels_in_row_major_order() {
        init_logger();
        let red = Compartment::new("red", &test_image(), Rgb([255, 0, 0]));
        assert_eq!(red.shape(), [3, 4]);
        assert_eq!(
            red.pixels(),
            &[
                Point::new(0, 0),
                Point::new(1, 0),
                Point::new(0, 1),
                Point::new(1, 1)
            ]
        );
        assert_eq!(red.index_of(Point::new(1, 1)), Some(3));
        assert_eq!(red.index_of(Point::new(2, 1)), None);
        assert_eq!(red.index_of(Point::new(10, 10)), None);
    }

    #[test]
    fn boundary_neighbours_refer_to_self() {
        init_logger();
        let red = Compartment::new("red", &test_image(), Rgb([255, 0, 0]));
        // +x, -x, +y, -y
        assert_eq!(red.neighbours()[0], [1, 0, 2, 0]);
        assert_eq!(red.neighbours()[3], [3, 2, 3, 1]);
    }

    #[test]
    fn missing_color_gives_empty_compartment() {
        init_logger();
        let green = Compartment::new("green", &test_image(), Rgb([0, 255, 0]));
        assert_eq!(green.num_pixels(), 0);
        assert!(green.neighbours().is_empty());
    }

    #[test]
    fn single_pixel_is_its_own_neighbour() -> Result<(), GeometryError> {
        init_logger();
        let c = Compartment::from_pixels("c", [3, 3], vec![Point::new(1, 1)])?;
        assert_eq!(c.neighbours(), &[[0; 4]]);
        Ok(())
    }

    #[test]
    fn invalid_pixel_lists() {
        init_logger();
        assert!(matches!(
            Compartment::from_pixels("c", [2, 2], vec![Point::new(2, 0)]),
            Err(GeometryError::PixelOutOfBounds { .. })
        ));
        assert!(matches!(
            Compartment::from_pixels("c", [2, 2], vec![Point::new(1, 0), Point::new(1, 0)]),
            Err(GeometryError::DuplicatePixel { .. })
        ));
    }

    #[test]
    fn membrane_from_adjacency() -> Result<(), GeometryError> {
        init_logger();
        let image = test_image();
        let red = Compartment::new("red", &image, Rgb([255, 0, 0]));
        let blue = Compartment::new("blue", &image, Rgb([0, 0, 255]));
        let membrane = Membrane::from_compartments("red_blue", &red, &blue)?;
        assert_eq!(membrane.compartment_a(), "red");
        assert_eq!(membrane.compartment_b(), "blue");
        // Red pixels (1, 0), (0, 1) and (1, 1) touch blue pixels
        let pairs = membrane
            .index_pairs()
            .iter()
            .map(|&(ia, ib)| (red.pixels()[ia], blue.pixels()[ib]))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                (Point::new(1, 0), Point::new(2, 0)),
                (Point::new(0, 1), Point::new(0, 2)),
                (Point::new(1, 1), Point::new(2, 1)),
                (Point::new(1, 1), Point::new(1, 2)),
            ]
        );
        Ok(())
    }

    #[test]
    fn membrane_validation() -> Result<(), GeometryError> {
        init_logger();
        let a = Compartment::from_pixels("a", [1, 3], vec![Point::new(0, 0)])?;
        let b = Compartment::from_pixels("b", [1, 3], vec![Point::new(1, 0), Point::new(2, 0)])?;
        Membrane::new("ok", &a, &b, vec![(0, 0)])?;
        assert!(matches!(
            Membrane::new("far", &a, &b, vec![(0, 1)]),
            Err(GeometryError::NotAdjacent { .. })
        ));
        assert!(matches!(
            Membrane::new("oob", &a, &b, vec![(1, 0)]),
            Err(GeometryError::PairOutOfRange { .. })
        ));
        assert!(matches!(
            Membrane::from_compartments("self", &a, &a),
            Err(GeometryError::SameCompartment(_))
        ));
        Ok(())
    }
}
