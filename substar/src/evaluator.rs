//! PSF model evaluation at offsets from a star centre.
//!
//! [`PsfEvaluator`] is the seam between the subtraction loop and the PSF
//! functional form. The bundled [`DaoEvaluator`] evaluates a DAOPHOT-style model:
//! an analytic Gaussian core plus a residual lookup table sampled at half-pixel
//! spacing and interpolated with cubic convolution.

use crate::interp::InterpolationCache;
use crate::model::PsfModel;

/// Maps offsets from a star centre to model intensity.
///
/// Implementations must be pure and deterministic; the subtraction loop may call
/// them from several threads at once.
pub trait PsfEvaluator: Send + Sync {
    /// Model intensity at offset `(dx, dy)` pixels from the star centre.
    fn value(&self, dx: f64, dy: f64, model: &PsfModel, cache: &InterpolationCache) -> f64;

    /// Model intensity for each `(dx[i], dy[i])` pair.
    ///
    /// # Panics
    /// Panics if `dx` and `dy` differ in length.
    fn evaluate(
        &self,
        dx: &[f64],
        dy: &[f64],
        model: &PsfModel,
        cache: &InterpolationCache,
    ) -> Vec<f64> {
        assert_eq!(dx.len(), dy.len(), "offset arrays must have equal length");
        dx.iter()
            .zip(dy)
            .map(|(&x, &y)| self.value(x, y, model, cache))
            .collect()
    }
}

/// Gaussian core plus half-pixel sampled residual table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaoEvaluator;

impl DaoEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Residual table contribution, zero outside the table.
    fn residual(dx: f64, dy: f64, model: &PsfModel, cache: &InterpolationCache) -> f64 {
        let table = model.table();
        let n = model.npsf();
        let last = (n - 1) as f64;
        let half = last / 2.0;

        // Table is sampled every half pixel around its centre
        let tx = 2.0 * dx + half;
        let ty = 2.0 * dy + half;
        if !(0.0..=last).contains(&tx) || !(0.0..=last).contains(&ty) {
            return 0.0;
        }

        let ix = tx.floor();
        let iy = ty.floor();
        let fx = tx - ix;
        let fy = ty - iy;
        let col = ix as usize;
        let iy = iy as isize;

        let row_at = |k: isize| -> f64 {
            let row = (iy + k).clamp(0, n as isize - 1) as usize;
            cache.interpolate_row(table, row, col, fx)
        };

        cubic_convolution(row_at(-1), row_at(0), row_at(1), row_at(2), fy)
    }
}

impl PsfEvaluator for DaoEvaluator {
    fn value(&self, dx: f64, dy: f64, model: &PsfModel, cache: &InterpolationCache) -> f64 {
        debug_assert!(cache.matches(model.table()));
        model.gaussian().value(dx, dy) + Self::residual(dx, dy, model, cache)
    }
}

/// Cubic convolution between `p0` and `pp1` at fraction `frac`, using the same
/// coefficients the interpolation cache stores along x.
pub fn cubic_convolution(pm1: f64, p0: f64, pp1: f64, pp2: f64, frac: f64) -> f64 {
    let c1 = 0.5 * (pp1 - pm1);
    let c2 = 2.0 * pp1 + pm1 - 0.5 * (5.0 * p0 + pp2);
    let c3 = 0.5 * (3.0 * (p0 - pp1) + pp2 - pm1);
    p0 + frac * (c1 + frac * (c2 + frac * c3))
}
