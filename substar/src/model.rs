//! Empirical PSF model record.
//!
//! A PSF model is the DAOPHOT-style combination of an analytic Gaussian core and a
//! square residual lookup table sampled at half-pixel spacing. The model is loaded
//! once per subtraction session and never mutated afterwards.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or loading a PSF model
#[derive(Error, Debug)]
pub enum PsfModelError {
    #[error("PSF table must be square and non-empty, got {rows}x{cols}")]
    NonSquareTable { rows: usize, cols: usize },

    #[error("expected {expected} Gaussian parameters, got {actual}")]
    GaussianLength { expected: usize, actual: usize },

    #[error("invalid PSF parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("PSF model I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PSF model JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Analytic Gaussian core of the PSF.
///
/// Built from the `GAUSS1..GAUSS5` header values: peak height, centre offsets
/// along x and y, and the two axis sigmas (all in pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianCore {
    pub height: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
}

impl GaussianCore {
    /// Number of scalar parameters stored in a PSF file
    pub const N_PARAMS: usize = 5;

    /// Build the core from the raw parameter vector `[height, x0, y0, sx, sy]`.
    pub fn from_slice(params: &[f64]) -> Result<Self, PsfModelError> {
        if params.len() != Self::N_PARAMS {
            return Err(PsfModelError::GaussianLength {
                expected: Self::N_PARAMS,
                actual: params.len(),
            });
        }
        Ok(Self {
            height: params[0],
            x_offset: params[1],
            y_offset: params[2],
            sigma_x: params[3],
            sigma_y: params[4],
        })
    }

    /// Raw parameter vector in file order.
    pub fn to_array(&self) -> [f64; 5] {
        [
            self.height,
            self.x_offset,
            self.y_offset,
            self.sigma_x,
            self.sigma_y,
        ]
    }

    /// A core that contributes nothing; the model is then the table alone.
    pub fn flat() -> Self {
        Self {
            height: 0.0,
            x_offset: 0.0,
            y_offset: 0.0,
            sigma_x: 1.0,
            sigma_y: 1.0,
        }
    }

    /// Evaluate the core at an offset from the star centre.
    pub fn value(&self, dx: f64, dy: f64) -> f64 {
        if self.height == 0.0 {
            return 0.0;
        }
        let u = (dx - self.x_offset) / self.sigma_x;
        let v = (dy - self.y_offset) / self.sigma_y;
        self.height * (-0.5 * (u * u + v * v)).exp()
    }
}

/// Square pixel region in which a star's footprint is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxGeometry {
    /// Box side length in pixels (always odd)
    pub nbox: i64,
    /// Offset from the box corner to its central pixel
    pub nhalf: i64,
}

/// Immutable PSF model: residual table plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsfModel {
    /// Residual lookup table, `npsf x npsf`, half-pixel sampled, indexed `[[y, x]]`
    table: Array2<f64>,
    gaussian: GaussianCore,
    /// Magnitude at which the raw model intensity corresponds to a flux ratio of 1
    psf_mag: f64,
    /// Footprint radius in pixels
    psf_radius: f64,
    /// Radius used when the PSF was fitted; carried for provenance only
    fit_radius: f64,
}

impl PsfModel {
    /// Largest accepted footprint radius in pixels
    pub const MAX_PSF_RADIUS: f64 = 1024.0;

    /// Build and validate a PSF model.
    pub fn new(
        table: Array2<f64>,
        gaussian: GaussianCore,
        psf_mag: f64,
        psf_radius: f64,
        fit_radius: f64,
    ) -> Result<Self, PsfModelError> {
        let model = Self {
            table,
            gaussian,
            psf_mag,
            psf_radius,
            fit_radius,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), PsfModelError> {
        let (rows, cols) = self.table.dim();
        if rows != cols || rows == 0 {
            return Err(PsfModelError::NonSquareTable { rows, cols });
        }

        let checks: [(&'static str, f64, bool); 5] = [
            ("psf_mag", self.psf_mag, self.psf_mag.is_finite()),
            (
                "psf_radius",
                self.psf_radius,
                self.psf_radius > 0.0 && self.psf_radius <= Self::MAX_PSF_RADIUS,
            ),
            ("fit_radius", self.fit_radius, self.fit_radius.is_finite()),
            (
                "sigma_x",
                self.gaussian.sigma_x,
                self.gaussian.sigma_x.is_finite() && self.gaussian.sigma_x > 0.0,
            ),
            (
                "sigma_y",
                self.gaussian.sigma_y,
                self.gaussian.sigma_y.is_finite() && self.gaussian.sigma_y > 0.0,
            ),
        ];
        for (name, value, ok) in checks {
            if !ok {
                return Err(PsfModelError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }

    pub fn table(&self) -> &Array2<f64> {
        &self.table
    }

    pub fn gaussian(&self) -> &GaussianCore {
        &self.gaussian
    }

    pub fn psf_mag(&self) -> f64 {
        self.psf_mag
    }

    pub fn psf_radius(&self) -> f64 {
        self.psf_radius
    }

    pub fn fit_radius(&self) -> f64 {
        self.fit_radius
    }

    /// Side length of the lookup table
    pub fn npsf(&self) -> usize {
        self.table.nrows()
    }

    /// Box geometry used to place every star evaluated with this model.
    ///
    /// `nbox = max(2*round(psf_radius) + 1, (npsf - 7) / 2)` with truncating
    /// integer division, `nhalf = (nbox - 1) / 2`.
    pub fn box_geometry(&self) -> BoxGeometry {
        let from_radius = (self.psf_radius.round() as i64)
            .saturating_mul(2)
            .saturating_add(1);
        let from_table = (self.npsf() as i64 - 7) / 2;
        let nbox = from_radius.max(from_table);
        BoxGeometry {
            nbox,
            nhalf: (nbox - 1) / 2,
        }
    }

    /// Linear flux ratio of a star of magnitude `mag` relative to the model zero point.
    pub fn magnitude_to_scale(&self, mag: f64) -> f64 {
        10f64.powf(-0.4 * (mag - self.psf_mag))
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), PsfModelError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file, re-validating the record
    pub fn load_from_file(path: &Path) -> Result<Self, PsfModelError> {
        let json = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&json)?;
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::NamedTempFile;

    fn flat_model(npsf: usize, radius: f64) -> PsfModel {
        PsfModel::new(
            Array2::from_elem((npsf, npsf), 1.0),
            GaussianCore::flat(),
            12.0,
            radius,
            2.0,
        )
        .unwrap()
    }

    #[test]
    fn test_box_geometry_from_radius() {
        let model = flat_model(21, 3.0);
        // (21 - 7) / 2 = 7 == 2*3 + 1
        assert_eq!(model.box_geometry(), BoxGeometry { nbox: 7, nhalf: 3 });

        let model = flat_model(11, 4.4);
        assert_eq!(model.box_geometry(), BoxGeometry { nbox: 9, nhalf: 4 });
    }

    #[test]
    fn test_box_geometry_from_table() {
        let model = flat_model(51, 3.0);
        // (51 - 7) / 2 = 22 beats 7; even box gives nhalf rounded down
        assert_eq!(
            model.box_geometry(),
            BoxGeometry {
                nbox: 22,
                nhalf: 10
            }
        );
    }

    #[test]
    fn test_box_geometry_tiny_table() {
        // (3 - 7) / 2 truncates towards zero to -2
        let model = flat_model(3, 0.4);
        assert_eq!(model.box_geometry(), BoxGeometry { nbox: 1, nhalf: 0 });
    }

    #[test]
    fn test_magnitude_to_scale() {
        let model = flat_model(21, 3.0);
        assert_eq!(model.magnitude_to_scale(12.0), 1.0);
        assert_relative_eq!(model.magnitude_to_scale(17.0), 0.01, epsilon = 1e-15);
        assert_relative_eq!(model.magnitude_to_scale(9.5), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_non_square_table() {
        let err = PsfModel::new(
            Array2::zeros((5, 7)),
            GaussianCore::flat(),
            12.0,
            3.0,
            2.0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PsfModelError::NonSquareTable { rows: 5, cols: 7 }
        ));
    }

    #[test]
    fn test_rejects_bad_radius_and_sigma() {
        let err = PsfModel::new(
            Array2::zeros((5, 5)),
            GaussianCore::flat(),
            12.0,
            0.0,
            2.0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("psf_radius"));

        let mut core = GaussianCore::flat();
        core.sigma_y = -1.0;
        let err = PsfModel::new(Array2::zeros((5, 5)), core, 12.0, 3.0, 2.0).unwrap_err();
        assert!(err.to_string().contains("sigma_y"));
    }

    #[test]
    fn test_rejects_oversized_radius() {
        for radius in [1e19, 1e6, PsfModel::MAX_PSF_RADIUS + 1.0, f64::INFINITY, f64::NAN] {
            let err = PsfModel::new(
                Array2::zeros((5, 5)),
                GaussianCore::flat(),
                12.0,
                radius,
                2.0,
            )
            .unwrap_err();
            assert!(matches!(
                err,
                PsfModelError::InvalidParameter {
                    name: "psf_radius",
                    ..
                }
            ));
        }

        let model = flat_model(21, PsfModel::MAX_PSF_RADIUS);
        assert_eq!(model.box_geometry().nbox, 2049);
    }

    #[test]
    fn test_oversized_radius_rejected_on_load() {
        let json = serde_json::to_string(&flat_model(21, 3.0))
            .unwrap()
            .replace("\"psf_radius\":3.0", "\"psf_radius\":1e19");
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), json).unwrap();

        assert!(matches!(
            PsfModel::load_from_file(file.path()),
            Err(PsfModelError::InvalidParameter {
                name: "psf_radius",
                ..
            })
        ));
    }

    #[test]
    fn test_gaussian_from_slice() {
        let core = GaussianCore::from_slice(&[2.0, 0.1, -0.1, 1.5, 1.7]).unwrap();
        assert_eq!(core.to_array(), [2.0, 0.1, -0.1, 1.5, 1.7]);
        assert_relative_eq!(core.value(0.1, -0.1), 2.0);

        let err = GaussianCore::from_slice(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            PsfModelError::GaussianLength {
                expected: 5,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut table = Array2::zeros((9, 9));
        table[[4, 4]] = 3.25;
        let core = GaussianCore::from_slice(&[100.0, 0.0, 0.0, 1.2, 1.4]).unwrap();
        let model = PsfModel::new(table, core, 14.5, 3.0, 2.5).unwrap();

        let file = NamedTempFile::new().unwrap();
        model.save_to_file(file.path()).unwrap();
        let loaded = PsfModel::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, model);
    }
}
