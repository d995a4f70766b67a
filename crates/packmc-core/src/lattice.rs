use nalgebra::Point3;

use crate::core::shape::Shape;

/// Arranges `n` identity-oriented shapes on a cubic lattice in fractional
/// coordinates: the smallest `s × s × s` lattice with at least `n` sites,
/// filled in row-major order with sites centred in their lattice cells.
pub fn arrange_on_cubic_lattice(n: usize) -> Vec<Shape> {
    let mut side = 1usize;
    while side * side * side < n {
        side += 1;
    }
    let spacing = 1.0 / side as f64;
    let mut shapes = Vec::with_capacity(n);
    'outer: for ix in 0..side {
        for iy in 0..side {
            for iz in 0..side {
                if shapes.len() == n {
                    break 'outer;
                }
                shapes.push(Shape::at(Point3::new(
                    (ix as f64 + 0.5) * spacing,
                    (iy as f64 + 0.5) * spacing,
                    (iz as f64 + 0.5) * spacing,
                )));
            }
        }
    }
    shapes
}
