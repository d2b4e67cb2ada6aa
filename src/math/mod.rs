//! Surface frames of the height field.
//!
//! Normals and tangents are derived from finite differences of a tile's height cache.
//! Interior vertices use central differences. Vertices on the outer border would pick up
//! the discontinuity towards the neighbouring (coarser or finer) tile, which is why tiles
//! are shaded in *skip border* mode: the two outermost rows and columns on each side use
//! one-sided differences that reach one sample further into the tile.

use bevy::math::{DVec2, DVec3, Vec3, Vec4};
use ndarray::Array2;

/// The normal and tangent of the surface at a grid vertex.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceFrame {
    pub normal: Vec3,
    /// The `w` component is always zero.
    pub tangent: Vec4,
}

/// Computes the height difference and the covered distance along one grid axis.
///
/// `i` is the vertex index along the axis, `max` the number of cells along it and
/// `h` looks up the height at another index of the same grid line.
fn axis_difference(
    i: usize,
    max: usize,
    step: f64,
    skip_border: bool,
    h: impl Fn(usize) -> f64,
) -> (f64, f64) {
    if skip_border {
        debug_assert!(max >= 3, "Skipping borders requires at least three cells.");

        if i > 1 && i + 2 < max {
            (h(i + 1) - h(i - 1), 2.0 * step)
        } else if i == 0 || i == 1 {
            (h(2) - h(1), step)
        } else if i + 1 == max {
            (h(i - 1) - h(i - 2), step)
        } else {
            (h(i) - h(i - 1), step)
        }
    } else if i == 0 {
        (h(1) - h(0), step)
    } else if i == max {
        (h(max) - h(max - 1), step)
    } else {
        (h(i + 1) - h(i - 1), 2.0 * step)
    }
}

/// Computes the surface frame at the vertex `(x, y)` of a height cache indexed `[row, column]`.
pub fn surface_frame(
    heights: &Array2<f64>,
    x: usize,
    y: usize,
    step: DVec2,
    skip_border: bool,
) -> SurfaceFrame {
    let (rows, cols) = heights.dim();

    let (dz_x, dx) = axis_difference(x, cols - 1, step.x, skip_border, |i| heights[[y, i]]);
    let (dz_y, dy) = axis_difference(y, rows - 1, step.y, skip_border, |i| heights[[i, x]]);

    let normal = DVec3::new(dx, 0.0, dz_x)
        .cross(DVec3::new(0.0, dy, dz_y))
        .normalize();
    let tangent = DVec3::new(dx, dy, dz_x + dz_y).normalize();

    SurfaceFrame {
        normal: normal.as_vec3(),
        tangent: tangent.as_vec3().extend(0.0),
    }
}
