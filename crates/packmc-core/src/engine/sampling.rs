use nalgebra::{Rotation3, Unit, Vector3};
use rand::Rng;

/// Samples a trial displacement uniform in [−step, step]³ (absolute units).
pub fn random_translation(rng: &mut impl Rng, step: f64) -> Vector3<f64> {
    Vector3::new(
        (2.0 * rng.gen::<f64>() - 1.0) * step,
        (2.0 * rng.gen::<f64>() - 1.0) * step,
        (2.0 * rng.gen::<f64>() - 1.0) * step,
    )
}

/// Samples a trial rotation: an axis uniform inside the unit ball (rejection
/// sampling) and an angle uniform in [−max_angle, max_angle], with the angle
/// clipped to ±π.
pub fn random_rotation(rng: &mut impl Rng, max_angle: f64) -> Rotation3<f64> {
    let axis = loop {
        let candidate = Vector3::new(
            2.0 * rng.gen::<f64>() - 1.0,
            2.0 * rng.gen::<f64>() - 1.0,
            2.0 * rng.gen::<f64>() - 1.0,
        );
        let norm2 = candidate.norm_squared();
        if norm2 > 0.0 && norm2 <= 1.0 {
            break candidate;
        }
    };
    let angle = (2.0 * rng.gen::<f64>() - 1.0) * max_angle.min(std::f64::consts::PI);
    Rotation3::from_axis_angle(&Unit::new_normalize(axis), angle)
}
