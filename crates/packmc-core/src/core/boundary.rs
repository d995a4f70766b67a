use nalgebra::{Point3, Vector3};

use crate::core::triclinic::TriclinicBox;

/// Boundary-condition service consumed by the overlap oracle and the packing.
///
/// Implementations own a copy of the current box (refreshed by the packing on
/// every scaling move via [`set_box`](BoundaryConditions::set_box)), so that
/// oracle calls carry no box argument.
pub trait BoundaryConditions: Send + Sync {
    /// Updates the internally held box after the cell has changed.
    fn set_box(&mut self, bx: &TriclinicBox);

    /// Returns the lattice vector `t` such that `p2 + t` is the
    /// minimum-image partner of `p1`.
    fn translation(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> Vector3<f64>;

    /// Returns the vector that, added to `p`, folds it back into the
    /// fundamental cell.
    fn correction(&self, p: &Point3<f64>) -> Vector3<f64>;

    /// Squared minimum-image distance between two absolute positions.
    fn distance2(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> f64 {
        let t = self.translation(p1, p2);
        (p2 + t - p1).norm_squared()
    }
}

/// Periodic boundary conditions on a triclinic cell.
///
/// Minimum images are found by round-to-nearest in fractional coordinates,
/// which is exact for any cell whose shortest height exceeds twice the
/// interaction range.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicBoundaryConditions {
    bx: TriclinicBox,
}

impl PeriodicBoundaryConditions {
    pub fn new(bx: &TriclinicBox) -> Self {
        Self { bx: *bx }
    }
}

impl BoundaryConditions for PeriodicBoundaryConditions {
    fn set_box(&mut self, bx: &TriclinicBox) {
        self.bx = *bx;
    }

    fn translation(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> Vector3<f64> {
        let separation = self.bx.fractional_vector(&(p1 - p2));
        self.bx.absolute_vector(&separation.map(f64::round))
    }

    fn correction(&self, p: &Point3<f64>) -> Vector3<f64> {
        let fractional = self.bx.to_fractional(p);
        self.bx
            .absolute_vector(&-fractional.coords.map(f64::floor))
    }
}

/// No boundaries: both the translation and the correction vanish.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeBoundaryConditions;

impl BoundaryConditions for FreeBoundaryConditions {
    fn set_box(&mut self, _bx: &TriclinicBox) {}

    fn translation(&self, _p1: &Point3<f64>, _p2: &Point3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn correction(&self, _p: &Point3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_image_across_the_boundary() {
        let bx = TriclinicBox::cubic(10.0).unwrap();
        let pbc = PeriodicBoundaryConditions::new(&bx);
        let p1 = Point3::new(0.5, 5.0, 5.0);
        let p2 = Point3::new(9.5, 5.0, 5.0);
        let t = pbc.translation(&p1, &p2);
        assert!(((p2 + t - p1).norm() - 1.0).abs() < 1e-12);
        assert!((t - Vector3::new(-10.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((pbc.distance2(&p1, &p2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn translation_is_zero_within_half_a_box() {
        let bx = TriclinicBox::cubic(10.0).unwrap();
        let pbc = PeriodicBoundaryConditions::new(&bx);
        let p1 = Point3::new(2.0, 2.0, 2.0);
        let p2 = Point3::new(6.0, 2.0, 2.0);
        assert_eq!(pbc.translation(&p1, &p2), Vector3::zeros());
    }

    #[test]
    fn correction_folds_into_the_fundamental_cell() {
        let bx = TriclinicBox::cubic(10.0).unwrap();
        let pbc = PeriodicBoundaryConditions::new(&bx);
        let p = Point3::new(12.5, -0.5, 3.0);
        let folded = p + pbc.correction(&p);
        assert!((folded - Point3::new(2.5, 9.5, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn free_boundaries_do_nothing() {
        let free = FreeBoundaryConditions;
        let p1 = Point3::new(0.0, 0.0, 0.0);
        let p2 = Point3::new(100.0, 0.0, 0.0);
        assert_eq!(free.translation(&p1, &p2), Vector3::zeros());
        assert_eq!(free.correction(&p2), Vector3::zeros());
        assert_eq!(free.distance2(&p1, &p2), 10000.0);
    }

    #[test]
    fn minimum_image_in_a_sheared_cell() {
        let mut matrix = nalgebra::Matrix3::from_diagonal_element(10.0);
        matrix[(0, 1)] = 3.0;
        let bx = TriclinicBox::from_matrix(matrix).unwrap();
        let pbc = PeriodicBoundaryConditions::new(&bx);
        // p2 is one full lattice vector along the sheared axis away from p1
        let p1 = Point3::new(1.0, 1.0, 1.0);
        let p2 = p1 + Vector3::new(3.0, 10.0, 0.0);
        let t = pbc.translation(&p1, &p2);
        assert!((p2 + t - p1).norm() < 1e-12);
    }
}
