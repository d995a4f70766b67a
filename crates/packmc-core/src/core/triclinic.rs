use nalgebra::{Matrix3, Point3, Vector3};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BoxError {
    #[error("box matrix is singular or encloses a non-positive volume")]
    Degenerate,
}

/// A triclinic simulation cell.
///
/// The cell is represented by a 3×3 matrix whose columns are the box edge
/// vectors, together with its cached inverse. Positions inside the engine are
/// expressed in fractional coordinates (components in [0, 1) within the
/// fundamental cell); this type converts between fractional and absolute
/// representations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriclinicBox {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl TriclinicBox {
    /// Creates a box from its edge-vector matrix.
    ///
    /// The matrix must be non-singular with a positive determinant;
    /// degenerate matrices are refused with [`BoxError::Degenerate`].
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self, BoxError> {
        if !matrix.iter().all(|x| x.is_finite()) || matrix.determinant() <= 0.0 {
            return Err(BoxError::Degenerate);
        }
        let inverse = matrix.try_inverse().ok_or(BoxError::Degenerate)?;
        Ok(Self { matrix, inverse })
    }

    /// Creates a cubic box with the given side length.
    pub fn cubic(side: f64) -> Result<Self, BoxError> {
        Self::from_matrix(Matrix3::from_diagonal_element(side))
    }

    /// Creates an orthorhombic box with the given side lengths.
    pub fn cuboid(sides: [f64; 3]) -> Result<Self, BoxError> {
        Self::from_matrix(Matrix3::from_diagonal(&Vector3::from(sides)))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Converts a fractional position to an absolute one.
    pub fn to_absolute(&self, fractional: &Point3<f64>) -> Point3<f64> {
        self.matrix * fractional
    }

    /// Converts an absolute position to a fractional one.
    pub fn to_fractional(&self, absolute: &Point3<f64>) -> Point3<f64> {
        self.inverse * absolute
    }

    pub fn absolute_vector(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * fractional
    }

    pub fn fractional_vector(&self, absolute: &Vector3<f64>) -> Vector3<f64> {
        self.inverse * absolute
    }

    /// Volume of the cell; positive by construction.
    pub fn volume(&self) -> f64 {
        self.matrix.determinant()
    }

    /// Lengths of the three edge vectors.
    pub fn side_lengths(&self) -> [f64; 3] {
        [
            self.matrix.column(0).norm(),
            self.matrix.column(1).norm(),
            self.matrix.column(2).norm(),
        ]
    }

    /// Distances between opposite faces of the cell.
    ///
    /// For an orthorhombic box these equal the side lengths; for a sheared
    /// cell they are strictly smaller. The neighbour grid is sized from the
    /// heights, which is what bounds the reach of an interaction across the
    /// cell along each axis.
    pub fn heights(&self) -> [f64; 3] {
        let volume = self.volume();
        let a = self.matrix.column(0).into_owned();
        let b = self.matrix.column(1).into_owned();
        let c = self.matrix.column(2).into_owned();
        [
            volume / b.cross(&c).norm(),
            volume / c.cross(&a).norm(),
            volume / a.cross(&b).norm(),
        ]
    }

    /// Applies a multiplicative update, returning the rescaled box.
    pub fn transformed(&self, multiplier: &Matrix3<f64>) -> Result<Self, BoxError> {
        Self::from_matrix(multiplier * self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn cubic_box_conversions_round_trip() {
        let bx = TriclinicBox::cubic(5.0).unwrap();
        let frac = Point3::new(0.1, 0.5, 0.9);
        let abs = bx.to_absolute(&frac);
        assert_eq!(abs, Point3::new(0.5, 2.5, 4.5));
        let back = bx.to_fractional(&abs);
        assert!((back - frac).norm() < 1e-14);
    }

    #[test]
    fn volume_and_heights_of_cuboid() {
        let bx = TriclinicBox::cuboid([2.0, 3.0, 4.0]).unwrap();
        assert!(close(bx.volume(), 24.0));
        let heights = bx.heights();
        assert!(close(heights[0], 2.0));
        assert!(close(heights[1], 3.0));
        assert!(close(heights[2], 4.0));
    }

    #[test]
    fn sheared_box_heights_are_below_side_lengths() {
        let mut matrix = Matrix3::from_diagonal_element(4.0);
        matrix[(0, 1)] = 2.0;
        let bx = TriclinicBox::from_matrix(matrix).unwrap();
        assert!(close(bx.volume(), 64.0));
        assert!(bx.heights()[1] < bx.side_lengths()[1]);
    }

    #[test]
    fn degenerate_matrices_are_refused() {
        assert_eq!(
            TriclinicBox::from_matrix(Matrix3::zeros()),
            Err(BoxError::Degenerate)
        );
        assert_eq!(TriclinicBox::cubic(-1.0), Err(BoxError::Degenerate));
        // negative determinant (left-handed basis)
        let mirrored = Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, 1.0));
        assert_eq!(TriclinicBox::from_matrix(mirrored), Err(BoxError::Degenerate));
    }

    #[test]
    fn transformed_rescales_volume_by_determinant() {
        let bx = TriclinicBox::cubic(2.0).unwrap();
        let scaled = bx
            .transformed(&Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 0.5)))
            .unwrap();
        assert!(close(scaled.volume(), 8.0));
        assert_eq!(scaled.side_lengths()[0], 4.0);
    }
}
