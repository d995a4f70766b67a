use nalgebra::{Point3, Rotation3, Vector3};

use crate::core::boundary::BoundaryConditions;
use crate::core::interaction::Interaction;
use crate::shapes::central::CentralInteraction;

/// K-mer shape traits: k collinear spheres along the body z axis, spaced by
/// a fixed bead distance. The beads are the interaction centres; the engine
/// queries the oracle once per centre pair.
///
/// Hard by default; an optional central interaction replaces the hard bead
/// cores with a soft bead-bead potential (the WCA dumbbell).
pub struct KMerTraits {
    k: usize,
    sphere_radius: f64,
    distance: f64,
    soft: Option<Box<dyn CentralInteraction>>,
}

impl KMerTraits {
    /// Hard k-mer of `k` spheres of `sphere_radius`, neighbouring bead
    /// centres `distance` apart.
    pub fn hard(k: usize, sphere_radius: f64, distance: f64) -> Self {
        assert!(k >= 2 && sphere_radius > 0.0 && distance > 0.0);
        Self {
            k,
            sphere_radius,
            distance,
            soft: None,
        }
    }

    /// Soft k-mer: the central interaction fully replaces the hard bead
    /// cores.
    pub fn soft(
        k: usize,
        sphere_radius: f64,
        distance: f64,
        interaction: Box<dyn CentralInteraction>,
    ) -> Self {
        assert!(k >= 2 && sphere_radius > 0.0 && distance > 0.0);
        Self {
            k,
            sphere_radius,
            distance,
            soft: Some(interaction),
        }
    }
}

impl Interaction for KMerTraits {
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
        let diameter = 2.0 * self.sphere_radius;
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
            None => 2.0 * self.sphere_radius,
        }
    }

    fn interaction_centres(&self) -> Vec<Vector3<f64>> {
        let half_span = (self.k - 1) as f64 / 2.0;
        (0..self.k)
            .map(|i| Vector3::new(0.0, 0.0, (i as f64 - half_span) * self.distance))
            .collect()
    }
}
