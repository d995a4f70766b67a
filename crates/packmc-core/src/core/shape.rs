use nalgebra::{Point3, Rotation3};

/// A rigid particle: a fractional position inside the box and an orientation.
///
/// The geometry itself (radii, lengths, interaction sites) lives in the shape
/// traits shared by all particles of a species; a `Shape` is pure state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shape {
    position: Point3<f64>,
    orientation: Rotation3<f64>,
}

impl Shape {
    pub fn new(position: Point3<f64>, orientation: Rotation3<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// An identity-oriented shape at the given fractional position.
    pub fn at(position: Point3<f64>) -> Self {
        Self::new(position, Rotation3::identity())
    }

    pub fn position(&self) -> &Point3<f64> {
        &self.position
    }

    pub fn orientation(&self) -> &Rotation3<f64> {
        &self.orientation
    }
}

/// Folds a fractional position into [0, 1)³.
///
/// Guards against the `x - floor(x)` rounding artefact that can produce
/// exactly 1.0 for inputs just below zero.
pub fn fold_fractional(position: &Point3<f64>) -> Point3<f64> {
    position.map(|x| {
        let folded = x - x.floor();
        if folded >= 1.0 {
            0.0
        } else {
            folded
        }
    })
}
