use crate::core::potentials::{lennard_jones, wca};

/// A sphere-symmetric soft pair potential between interaction centres.
///
/// Central interactions depend only on the centre-to-centre distance, so
/// shape traits can bolt them onto any arrangement of centres (a single
/// sphere, the beads of a polysphere chain).
pub trait CentralInteraction: Send + Sync {
    /// Pair energy at the given squared centre distance.
    fn energy_for_distance2(&self, dist2: f64) -> f64;

    /// Cutoff distance beyond which the energy is treated as zero.
    fn range_radius(&self) -> f64;
}

/// Truncated Lennard-Jones 12-6 interaction with a 3σ cutoff.
#[derive(Debug, Clone, Copy)]
pub struct LennardJonesInteraction {
    epsilon: f64,
    sigma: f64,
}

impl LennardJonesInteraction {
    pub fn new(epsilon: f64, sigma: f64) -> Self {
        assert!(epsilon > 0.0 && sigma > 0.0);
        Self { epsilon, sigma }
    }
}

impl CentralInteraction for LennardJonesInteraction {
    fn energy_for_distance2(&self, dist2: f64) -> f64 {
        let cutoff = self.range_radius();
        if dist2 >= cutoff * cutoff {
            return 0.0;
        }
        lennard_jones(dist2, self.epsilon, self.sigma)
    }

    fn range_radius(&self) -> f64 {
        3.0 * self.sigma
    }
}

/// The repulsive (Weeks-Chandler-Andersen) part of the Lennard-Jones
/// interaction: truncated at its minimum and shifted to zero there.
#[derive(Debug, Clone, Copy)]
pub struct RepulsiveLennardJonesInteraction {
    epsilon: f64,
    sigma: f64,
}

impl RepulsiveLennardJonesInteraction {
    pub fn new(epsilon: f64, sigma: f64) -> Self {
        assert!(epsilon > 0.0 && sigma > 0.0);
        Self { epsilon, sigma }
    }
}

impl CentralInteraction for RepulsiveLennardJonesInteraction {
    fn energy_for_distance2(&self, dist2: f64) -> f64 {
        wca(dist2, self.epsilon, self.sigma)
    }

    fn range_radius(&self) -> f64 {
        2.0_f64.powf(1.0 / 6.0) * self.sigma
    }
}
