use nalgebra::{Point3, Rotation3};

use crate::core::boundary::BoundaryConditions;
use crate::core::interaction::Interaction;
use crate::shapes::central::CentralInteraction;

/// Sphere shape traits: hard spheres, or soft spheres when a central
/// interaction replaces the hard core.
pub struct SphereTraits {
    radius: f64,
    soft: Option<Box<dyn CentralInteraction>>,
}

impl SphereTraits {
    /// Hard spheres of the given radius.
    pub fn hard(radius: f64) -> Self {
        assert!(radius > 0.0);
        Self { radius, soft: None }
    }

    /// Soft spheres: the central interaction fully replaces the hard core.
    pub fn soft(radius: f64, interaction: Box<dyn CentralInteraction>) -> Self {
        assert!(radius > 0.0);
        Self {
            radius,
            soft: Some(interaction),
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Interaction for SphereTraits {
    fn has_hard_part(&self) -> bool {
        self.soft.is_none()
    }

    fn has_soft_part(&self) -> bool {
        self.soft.is_some()
    }

    fn overlap_between(
        &self,
        pos1: &Point3<f64>,
        _orientation1: &Rotation3<f64>,
        _idx1: usize,
        pos2: &Point3<f64>,
        _orientation2: &Rotation3<f64>,
        _idx2: usize,
        bc: &dyn BoundaryConditions,
    ) -> bool {
        if self.soft.is_some() {
            return false;
        }
        let diameter = 2.0 * self.radius;
        bc.distance2(pos1, pos2) < diameter * diameter
    }

    fn energy_between(
        &self,
        pos1: &Point3<f64>,
        _orientation1: &Rotation3<f64>,
        _idx1: usize,
        pos2: &Point3<f64>,
        _orientation2: &Rotation3<f64>,
        _idx2: usize,
        bc: &dyn BoundaryConditions,
    ) -> f64 {
        match &self.soft {
            Some(soft) => soft.energy_for_distance2(bc.distance2(pos1, pos2)),
            None => 0.0,
        }
    }

    fn range_radius(&self) -> f64 {
        match &self.soft {
            Some(soft) => soft.range_radius(),
            None => 2.0 * self.radius,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::{FreeBoundaryConditions, PeriodicBoundaryConditions};
    use crate::core::triclinic::TriclinicBox;
    use crate::shapes::central::LennardJonesInteraction;
    use nalgebra::Rotation3;

    #[test]
    fn hard_spheres_overlap_below_one_diameter() {
        let traits = SphereTraits::hard(0.5);
        let identity = Rotation3::identity();
        let bc = FreeBoundaryConditions;
        let origin = Point3::origin();
        let near = Point3::new(0.99, 0.0, 0.0);
        let far = Point3::new(1.01, 0.0, 0.0);
        assert!(traits.overlap_between(&origin, &identity, 0, &near, &identity, 0, &bc));
        assert!(!traits.overlap_between(&origin, &identity, 0, &far, &identity, 0, &bc));
        assert_eq!(traits.range_radius(), 1.0);
        assert_eq!(traits.total_range_radius(), 1.0);
    }

    #[test]
    fn hard_spheres_overlap_through_the_periodic_boundary() {
        let bx = TriclinicBox::cubic(10.0).unwrap();
        let bc = PeriodicBoundaryConditions::new(&bx);
        let traits = SphereTraits::hard(0.5);
        let identity = Rotation3::identity();
        let p1 = Point3::new(0.2, 5.0, 5.0);
        let p2 = Point3::new(9.5, 5.0, 5.0);
        assert!(traits.overlap_between(&p1, &identity, 0, &p2, &identity, 0, &bc));
    }

    #[test]
    fn soft_spheres_have_no_hard_part() {
        let traits = SphereTraits::soft(0.5, Box::new(LennardJonesInteraction::new(1.0, 0.5)));
        assert!(!traits.has_hard_part());
        assert!(traits.has_soft_part());
        let identity = Rotation3::identity();
        let bc = FreeBoundaryConditions;
        let origin = Point3::origin();
        let touching = Point3::new(0.1, 0.0, 0.0);
        assert!(!traits.overlap_between(&origin, &identity, 0, &touching, &identity, 0, &bc));
        assert!(traits.energy_between(&origin, &identity, 0, &touching, &identity, 0, &bc) > 0.0);
        assert_eq!(traits.range_radius(), 1.5);
    }
}
