use bevy::math::DVec2;

/// The four corners of a grid cell, ordered `[top_left, bottom_left, top_right, bottom_right]`,
/// where "bottom" is the row with the larger index.
pub(crate) type CellCorners = [f64; 4];

/// Bilinearly interpolates the corners of a cell at the fractional offset `d`.
#[inline]
pub(crate) fn bilinear(corners: CellCorners, d: DVec2) -> f64 {
    corners[0] * (1.0 - d.x) * (1.0 - d.y)
        + corners[1] * (1.0 - d.x) * d.y
        + corners[2] * d.x * (1.0 - d.y)
        + corners[3] * d.x * d.y
}

/// Splits a continuous grid coordinate into the cell it lies in, the neighbouring cell
/// and the fractional offset, clamped to `0..=max` on both axes.
///
/// Non-finite coordinates are clamped as well, so the result always indexes the grid.
#[inline]
pub(crate) fn grid_cell(position: DVec2, max: [usize; 2]) -> ([usize; 2], [usize; 2], DVec2) {
    let axis = |value: f64, max: usize| {
        // `f64::max` discards NaN
        let value = value.max(0.0).min(max as f64);
        let cell = value.floor() as usize;
        let next = if cell + 1 > max { cell } else { cell + 1 };
        (cell, next, value - cell as f64)
    };

    let (x, x2, dx) = axis(position.x, max[0]);
    let (y, y2, dy) = axis(position.y, max[1]);

    ([x, y], [x2, y2], DVec2::new(dx, dy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_non_finite() {
        let (cell, next, d) = grid_cell(DVec2::new(f64::NAN, f64::INFINITY), [4, 4]);

        assert_eq!(cell, [0, 4]);
        assert_eq!(next, [1, 4]);
        assert_eq!(d, DVec2::ZERO);
    }

    #[test]
    fn interpolates_corners() {
        let corners = [0.0, 1.0, 2.0, 3.0];

        assert_eq!(bilinear(corners, DVec2::ZERO), 0.0);
        assert_eq!(bilinear(corners, DVec2::new(1.0, 1.0)), 3.0);
        assert_eq!(bilinear(corners, DVec2::new(0.5, 0.5)), 1.5);
    }
}
