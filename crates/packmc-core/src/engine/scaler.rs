use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::Rng;

use crate::core::triclinic::TriclinicBox;

/// Samples multiplicative box updates for volume moves.
///
/// The returned matrix multiplies the current box from the left; its
/// determinant is the overall volume ratio and must be strictly positive.
pub trait BoxScaler: Send + Sync {
    fn sample_scaling(&self, bx: &TriclinicBox, scaling_step: f64, rng: &mut StdRng)
        -> Matrix3<f64>;
}

/// Scales all three axes by the same factor; the volume ratio is
/// exp(u) with u uniform in [−step, step], so proposals are symmetric in
/// ln V and the factors are strictly positive by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsotropicScaler;

impl BoxScaler for IsotropicScaler {
    fn sample_scaling(
        &self,
        _bx: &TriclinicBox,
        scaling_step: f64,
        rng: &mut StdRng,
    ) -> Matrix3<f64> {
        let exponent = (2.0 * rng.gen::<f64>() - 1.0) * scaling_step;
        Matrix3::from_diagonal_element((exponent / 3.0).exp())
    }
}

/// Scales each axis independently by exp(u_i), u_i uniform in [−step, step].
#[derive(Debug, Clone, Copy, Default)]
pub struct AnisotropicScaler;

impl BoxScaler for AnisotropicScaler {
    fn sample_scaling(
        &self,
        _bx: &TriclinicBox,
        scaling_step: f64,
        rng: &mut StdRng,
    ) -> Matrix3<f64> {
        let mut factors = Matrix3::identity();
        for axis in 0..3 {
            let exponent = (2.0 * rng.gen::<f64>() - 1.0) * scaling_step;
            factors[(axis, axis)] = exponent.exp();
        }
        factors
    }
}

/// Perturbs one random element of the box matrix per move: diagonal picks
/// multiply that axis by exp(u), off-diagonal picks shear by u. Either way
/// the determinant of the multiplier stays positive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaTriclinicScaler;

impl BoxScaler for DeltaTriclinicScaler {
    fn sample_scaling(
        &self,
        _bx: &TriclinicBox,
        scaling_step: f64,
        rng: &mut StdRng,
    ) -> Matrix3<f64> {
        let mut multiplier = Matrix3::identity();
        let row = rng.gen_range(0..3);
        let column = rng.gen_range(0..3);
        let exponent = (2.0 * rng.gen::<f64>() - 1.0) * scaling_step;
        if row == column {
            multiplier[(row, column)] = exponent.exp();
        } else {
            multiplier[(row, column)] = exponent;
        }
        multiplier
    }
}
