use nalgebra::{Point3, Rotation3, Vector3};

use crate::core::boundary::BoundaryConditions;

/// The overlap oracle: everything the engine knows about particle geometry.
///
/// A shape-traits object supplies a hard part (a boolean intersection test),
/// a soft part (a pair energy), or both, together with a conservative range
/// radius that sizes the neighbour grid and the domain halos. Multi-centre
/// particles expose their interaction centres; the engine then queries the
/// oracle once per centre pair, with absolute centre positions and the centre
/// indices.
///
/// Positions are absolute; periodic separation is the oracle's job via the
/// boundary-condition service. Oracles may reject trivially when the
/// centre-to-centre distance exceeds the sum of the circumsphere radii.
pub trait Interaction: Send + Sync {
    fn has_hard_part(&self) -> bool;

    fn has_soft_part(&self) -> bool;

    /// Hard-core intersection test under minimum image.
    #[allow(unused_variables)]
    fn overlap_between(
        &self,
        pos1: &Point3<f64>,
        orientation1: &Rotation3<f64>,
        idx1: usize,
        pos2: &Point3<f64>,
        orientation2: &Rotation3<f64>,
        idx2: usize,
        bc: &dyn BoundaryConditions,
    ) -> bool {
        false
    }

    /// Soft pair energy under minimum image.
    #[allow(unused_variables)]
    fn energy_between(
        &self,
        pos1: &Point3<f64>,
        orientation1: &Rotation3<f64>,
        idx1: usize,
        pos2: &Point3<f64>,
        orientation2: &Rotation3<f64>,
        idx2: usize,
        bc: &dyn BoundaryConditions,
    ) -> f64 {
        0.0
    }

    /// Upper bound on the distance at which two interaction centres interact.
    fn range_radius(&self) -> f64;

    /// Body-frame offsets of the interaction centres; empty means a single
    /// centre at the particle position.
    fn interaction_centres(&self) -> Vec<Vector3<f64>> {
        Vec::new()
    }

    /// Upper bound on the distance at which two *particles* interact,
    /// whatever their orientations. Sizes the neighbour grid cells.
    fn total_range_radius(&self) -> f64 {
        let max_centre_distance = self
            .interaction_centres()
            .iter()
            .map(|c| c.norm())
            .fold(0.0, f64::max);
        self.range_radius() + 2.0 * max_centre_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TwoCentres;

    impl Interaction for TwoCentres {
        fn has_hard_part(&self) -> bool {
            true
        }

        fn has_soft_part(&self) -> bool {
            false
        }

        fn range_radius(&self) -> f64 {
            1.0
        }

        fn interaction_centres(&self) -> Vec<Vector3<f64>> {
            vec![Vector3::new(0.0, 0.0, -0.5), Vector3::new(0.0, 0.0, 0.5)]
        }
    }

    struct SingleCentre;

    impl Interaction for SingleCentre {
        fn has_hard_part(&self) -> bool {
            true
        }

        fn has_soft_part(&self) -> bool {
            false
        }

        fn range_radius(&self) -> f64 {
            2.0
        }
    }

    #[test]
    fn total_range_accounts_for_interaction_centres() {
        assert_eq!(TwoCentres.total_range_radius(), 2.0);
        assert_eq!(SingleCentre.total_range_radius(), 2.0);
    }
}
