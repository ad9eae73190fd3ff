//! Cubic-convolution coefficient cache for the PSF lookup table.
//!
//! The cache holds three coefficient tables derived from finite differences of the
//! lookup table along its x axis (FITS `NAXIS1`, the ndarray column axis):
//!
//! ```text
//! c1 = 0.5 * (p[+1] - p[-1])
//! c2 = 2*p[+1] + p[-1] - 0.5*(5*p[0] + p[+2])
//! c3 = 0.5 * (3*(p[0] - p[+1]) + p[+2] - p[-1])
//! ```
//!
//! so that `p0 + f*(c1 + f*(c2 + f*c3))` interpolates between column `i` and
//! `i + 1` at fraction `f`.
//!
//! With [`EdgeMode::Wrap`] the shifted copies wrap circularly at the table edge,
//! which mixes the opposite edge of the table into the outermost columns. This is
//! the reference behaviour. [`EdgeMode::Clamp`] repeats the edge column instead and
//! exists so the two can be compared.

use ndarray::Array2;

/// Boundary handling for the shifted table copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeMode {
    /// Circular shift; column `-1` is column `n - 1`
    #[default]
    Wrap,
    /// Indices clamped to `[0, n - 1]`
    Clamp,
}

impl EdgeMode {
    fn column(self, col: usize, shift: isize, n: usize) -> usize {
        let target = col as isize + shift;
        match self {
            EdgeMode::Wrap => target.rem_euclid(n as isize) as usize,
            EdgeMode::Clamp => target.clamp(0, n as isize - 1) as usize,
        }
    }
}

/// Precomputed interpolation coefficients, same shape as the table they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationCache {
    c1: Array2<f64>,
    c2: Array2<f64>,
    c3: Array2<f64>,
    edge_mode: EdgeMode,
}

impl InterpolationCache {
    /// Compute the coefficient tables for `table`.
    pub fn compute(table: &Array2<f64>, edge_mode: EdgeMode) -> Self {
        let (rows, cols) = table.dim();
        let mut c1 = Array2::zeros((rows, cols));
        let mut c2 = Array2::zeros((rows, cols));
        let mut c3 = Array2::zeros((rows, cols));

        for row in 0..rows {
            for col in 0..cols {
                let p0 = table[[row, col]];
                let pm1 = table[[row, edge_mode.column(col, -1, cols)]];
                let pp1 = table[[row, edge_mode.column(col, 1, cols)]];
                let pp2 = table[[row, edge_mode.column(col, 2, cols)]];

                c1[[row, col]] = 0.5 * (pp1 - pm1);
                c2[[row, col]] = 2.0 * pp1 + pm1 - 0.5 * (5.0 * p0 + pp2);
                c3[[row, col]] = 0.5 * (3.0 * (p0 - pp1) + pp2 - pm1);
            }
        }

        log::debug!("Computed {rows}x{cols} PSF interpolation cache ({edge_mode:?} edges)");

        Self {
            c1,
            c2,
            c3,
            edge_mode,
        }
    }

    pub fn c1(&self) -> &Array2<f64> {
        &self.c1
    }

    pub fn c2(&self) -> &Array2<f64> {
        &self.c2
    }

    pub fn c3(&self) -> &Array2<f64> {
        &self.c3
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }

    pub fn shape(&self) -> (usize, usize) {
        self.c1.dim()
    }

    /// True when the cache has the same shape as `table`.
    pub fn matches(&self, table: &Array2<f64>) -> bool {
        self.shape() == table.dim()
    }

    /// Cubic interpolation along x of table row `row` between column `col` and
    /// `col + 1` at fraction `frac`.
    pub fn interpolate_row(&self, table: &Array2<f64>, row: usize, col: usize, frac: f64) -> f64 {
        let p0 = table[[row, col]];
        p0 + frac * (self.c1[[row, col]] + frac * (self.c2[[row, col]] + frac * self.c3[[row, col]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_table(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, n), |(r, c)| (c * c) as f64 + 0.5 * r as f64)
    }

    #[test]
    fn test_constant_table_has_zero_coefficients() {
        let table = Array2::from_elem((7, 7), 2.5);
        let cache = InterpolationCache::compute(&table, EdgeMode::Wrap);
        assert!(cache.c1().iter().all(|&v| v == 0.0));
        assert!(cache.c2().iter().all(|&v| v == 0.0));
        assert!(cache.c3().iter().all(|&v| v == 0.0));
        assert!(cache.matches(&table));
    }

    #[test]
    fn test_interior_coefficients() {
        let table = ramp_table(8);
        let cache = InterpolationCache::compute(&table, EdgeMode::Wrap);

        // Row 2, column 3: p-1 = 4+1, p0 = 9+1, p+1 = 16+1, p+2 = 25+1
        let (pm1, p0, pp1, pp2) = (5.0, 10.0, 17.0, 26.0);
        assert_relative_eq!(cache.c1()[[2, 3]], 0.5 * (pp1 - pm1));
        assert_relative_eq!(
            cache.c2()[[2, 3]],
            2.0 * pp1 + pm1 - 0.5 * (5.0 * p0 + pp2)
        );
        assert_relative_eq!(cache.c3()[[2, 3]], 0.5 * (3.0 * (p0 - pp1) + pp2 - pm1));
    }

    #[test]
    fn test_interpolation_hits_grid_points() {
        let table = ramp_table(8);
        let cache = InterpolationCache::compute(&table, EdgeMode::Wrap);
        for col in 1..6 {
            assert_relative_eq!(cache.interpolate_row(&table, 4, col, 0.0), table[[4, col]]);
            assert_relative_eq!(
                cache.interpolate_row(&table, 4, col, 1.0),
                table[[4, col + 1]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_quadratic_reproduced_in_interior() {
        // Catmull-Rom reproduces quadratics exactly away from the edges
        let table = ramp_table(10);
        let cache = InterpolationCache::compute(&table, EdgeMode::Wrap);
        let value = cache.interpolate_row(&table, 0, 4, 0.25);
        assert_relative_eq!(value, 4.25 * 4.25, epsilon = 1e-12);
    }

    #[test]
    fn test_wrap_versus_clamp_at_edges() {
        // The wrap-around stencil is only wrong where it reaches across the table.
        let n = 12;
        let table = ramp_table(n);
        let wrap = InterpolationCache::compute(&table, EdgeMode::Wrap);
        let clamp = InterpolationCache::compute(&table, EdgeMode::Clamp);

        for row in 0..n {
            for col in 1..n - 2 {
                assert_eq!(wrap.c1()[[row, col]], clamp.c1()[[row, col]]);
                assert_eq!(wrap.c2()[[row, col]], clamp.c2()[[row, col]]);
                assert_eq!(wrap.c3()[[row, col]], clamp.c3()[[row, col]]);
            }
        }

        // Column 0 pulls p[-1] from column n-1 when wrapping: 121 vs 0 in this ramp
        let c1_wrap = wrap.c1()[[0, 0]];
        let c1_clamp = clamp.c1()[[0, 0]];
        assert_relative_eq!(c1_wrap, 0.5 * (1.0 - 121.0));
        assert_relative_eq!(c1_clamp, 0.5 * (1.0 - 0.0));

        // Interpolated values on the last interval differ by a large fraction of the signal
        let mid_wrap = wrap.interpolate_row(&table, 0, n - 2, 0.5);
        let mid_clamp = clamp.interpolate_row(&table, 0, n - 2, 0.5);
        let truth = (n as f64 - 1.5).powi(2);
        assert!((mid_clamp - truth).abs() < (mid_wrap - truth).abs());
    }

    #[test]
    fn test_periodic_table_is_edge_mode_neutral_under_wrap() {
        // A table that really is periodic is interpolated correctly at the seam
        let n = 16;
        let table = Array2::from_shape_fn((n, n), |(_, c)| {
            (2.0 * std::f64::consts::PI * c as f64 / n as f64).cos()
        });
        let cache = InterpolationCache::compute(&table, EdgeMode::Wrap);
        let interior = cache.interpolate_row(&table, 3, 4, 0.5);
        let seam = cache.interpolate_row(&table, 3, 0, 0.5);
        let expected_interior = (2.0 * std::f64::consts::PI * 4.5 / n as f64).cos();
        let expected_seam = (2.0 * std::f64::consts::PI * 0.5 / n as f64).cos();
        assert_relative_eq!(interior, expected_interior, epsilon = 1e-3);
        assert_relative_eq!(seam, expected_seam, epsilon = 1e-3);
    }
}
