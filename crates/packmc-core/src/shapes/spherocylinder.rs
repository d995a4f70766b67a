use nalgebra::{Point3, Rotation3, Vector3};

use crate::core::boundary::BoundaryConditions;
use crate::core::interaction::Interaction;

/// Hard spherocylinder: a cylinder of the given length capped with
/// hemispheres of the given radius, aligned with the body z axis.
///
/// Two spherocylinders overlap iff their axis segments come closer than one
/// diameter.
#[derive(Debug, Clone, Copy)]
pub struct SpherocylinderTraits {
    length: f64,
    radius: f64,
}

impl SpherocylinderTraits {
    pub fn new(length: f64, radius: f64) -> Self {
        assert!(length >= 0.0 && radius > 0.0);
        Self { length, radius }
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl Interaction for SpherocylinderTraits {
    fn has_hard_part(&self) -> bool {
        true
    }

    fn has_soft_part(&self) -> bool {
        false
    }

    fn overlap_between(
        &self,
        pos1: &Point3<f64>,
        orientation1: &Rotation3<f64>,
        _idx1: usize,
        pos2: &Point3<f64>,
        orientation2: &Rotation3<f64>,
        _idx2: usize,
        bc: &dyn BoundaryConditions,
    ) -> bool {
        let pos2 = pos2 + bc.translation(pos1, pos2);
        let diameter = 2.0 * self.radius;
        if (pos2 - pos1).norm_squared() > self.range_radius() * self.range_radius() {
            return false;
        }
        let half1 = orientation1 * Vector3::new(0.0, 0.0, self.length / 2.0);
        let half2 = orientation2 * Vector3::new(0.0, 0.0, self.length / 2.0);
        segment_distance2(&(pos1 - half1), &(pos1 + half1), &(pos2 - half2), &(pos2 + half2))
            < diameter * diameter
    }

    fn range_radius(&self) -> f64 {
        self.length + 2.0 * self.radius
    }
}

/// Squared distance between the segments [p1, q1] and [p2, q2]
/// (closest-point parametrisation with clamping).
fn segment_distance2(
    p1: &Point3<f64>,
    q1: &Point3<f64>,
    p2: &Point3<f64>,
    q2: &Point3<f64>,
) -> f64 {
    const EPSILON: f64 = 1e-12;
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.norm_squared();
    let e = d2.norm_squared();
    let f = d2.dot(&r);

    let (s, t);
    if a <= EPSILON && e <= EPSILON {
        return r.norm_squared();
    }
    if a <= EPSILON {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(&r);
        if e <= EPSILON {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(&d2);
            let denominator = a * e - b * b;
            let mut s_candidate = if denominator > EPSILON {
                ((b * f - c * e) / denominator).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t_candidate = (b * s_candidate + f) / e;
            let t_clamped = t_candidate.clamp(0.0, 1.0);
            if t_candidate != t_clamped {
                s_candidate = ((t_clamped * b - c) / a).clamp(0.0, 1.0);
            }
            s = s_candidate;
            t = t_clamped;
        }
    }

    let closest1 = p1 + d1 * s;
    let closest2 = p2 + d2 * t;
    (closest2 - closest1).norm_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::FreeBoundaryConditions;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn segment_distance_of_parallel_segments() {
        let d2 = segment_distance2(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, 2.0, 0.0),
            &Point3::new(1.0, 2.0, 0.0),
        );
        assert!(close(d2, 4.0));
    }

    #[test]
    fn segment_distance_of_crossed_segments() {
        let d2 = segment_distance2(
            &Point3::new(-1.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(0.0, -1.0, 0.5),
            &Point3::new(0.0, 1.0, 0.5),
        );
        assert!(close(d2, 0.25));
    }

    #[test]
    fn segment_distance_clamps_to_the_end_points() {
        let d2 = segment_distance2(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(1.0, 0.0, 0.0),
            &Point3::new(3.0, 0.0, 0.0),
            &Point3::new(4.0, 0.0, 0.0),
        );
        assert!(close(d2, 4.0));
        let degenerate = segment_distance2(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(0.0, 3.0, 0.0),
            &Point3::new(0.0, 3.0, 0.0),
        );
        assert!(close(degenerate, 9.0));
    }

    #[test]
    fn collinear_spherocylinders_overlap_tip_to_tip() {
        let traits = SpherocylinderTraits::new(1.0, 0.25);
        let identity = Rotation3::identity();
        let bc = FreeBoundaryConditions;
        let origin = Point3::origin();
        // axis along z; tip-to-tip contact at distance length + 2 radius
        let touching = Point3::new(0.0, 0.0, 1.49);
        let apart = Point3::new(0.0, 0.0, 1.51);
        assert!(traits.overlap_between(&origin, &identity, 0, &touching, &identity, 0, &bc));
        assert!(!traits.overlap_between(&origin, &identity, 0, &apart, &identity, 0, &bc));
    }

    #[test]
    fn crossed_spherocylinders_overlap_side_to_side() {
        let traits = SpherocylinderTraits::new(1.0, 0.25);
        let identity = Rotation3::identity();
        let crossed = Rotation3::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2);
        let bc = FreeBoundaryConditions;
        let origin = Point3::origin();
        let near = Point3::new(0.0, 0.49, 0.0);
        let far = Point3::new(0.0, 0.51, 0.0);
        assert!(traits.overlap_between(&origin, &identity, 0, &near, &crossed, 0, &bc));
        assert!(!traits.overlap_between(&origin, &identity, 0, &far, &crossed, 0, &bc));
    }

    #[test]
    fn range_radius_covers_any_mutual_orientation() {
        let traits = SpherocylinderTraits::new(0.5, 0.2);
        assert!(close(traits.range_radius(), 0.9));
        assert!(close(traits.total_range_radius(), 0.9));
    }
}
