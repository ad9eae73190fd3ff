//! A subtraction session binds one PSF model to its interpolation cache.
//!
//! The cache is derived from the model's table exactly once, on first use, and is
//! read-only afterwards. Because the session owns both, a cache can never outlive
//! or drift from the model it was computed for; switching PSF models means
//! building a new session.

use std::path::Path;
use std::sync::OnceLock;

use crate::evaluator::{DaoEvaluator, PsfEvaluator};
use crate::interp::{EdgeMode, InterpolationCache};
use crate::model::{PsfModel, PsfModelError};

/// One PSF model, its evaluator and its lazily computed interpolation cache.
#[derive(Debug)]
pub struct SubtractionSession<E: PsfEvaluator = DaoEvaluator> {
    model: PsfModel,
    evaluator: E,
    edge_mode: EdgeMode,
    cache: OnceLock<InterpolationCache>,
}

impl SubtractionSession<DaoEvaluator> {
    /// Create a session with the default evaluator and wrap-around cache edges.
    pub fn new(model: PsfModel) -> Self {
        Self::with_evaluator(model, DaoEvaluator::new())
    }

    /// Load a PSF model from disk and open a session on it.
    ///
    /// `.fits`/`.fit` files need the `fits` feature; anything else is read as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let is_fits = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("fits") || ext.eq_ignore_ascii_case("fit"));

        let model = if is_fits {
            read_fits_model(path)?
        } else {
            PsfModel::load_from_file(path)?
        };
        log::debug!(
            "Loaded {}x{} PSF model from {} (psf_mag={}, psf_radius={})",
            model.npsf(),
            model.npsf(),
            path.display(),
            model.psf_mag(),
            model.psf_radius()
        );
        Ok(Self::new(model))
    }
}

#[cfg(feature = "fits")]
fn read_fits_model(path: &Path) -> Result<PsfModel, SessionError> {
    Ok(crate::io::fits::read_psf_model(path)?)
}

#[cfg(not(feature = "fits"))]
fn read_fits_model(path: &Path) -> Result<PsfModel, SessionError> {
    Err(SessionError::FitsUnsupported(path.display().to_string()))
}

/// Errors from opening a session on a PSF file
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Model(#[from] PsfModelError),

    #[cfg(feature = "fits")]
    #[error(transparent)]
    Fits(#[from] crate::io::fits::FitsError),

    #[error("FITS support not compiled in, cannot read {0}")]
    FitsUnsupported(String),
}

impl<E: PsfEvaluator> SubtractionSession<E> {
    /// Create a session with a custom evaluator.
    pub fn with_evaluator(model: PsfModel, evaluator: E) -> Self {
        Self {
            model,
            evaluator,
            edge_mode: EdgeMode::default(),
            cache: OnceLock::new(),
        }
    }

    /// Select the table edge handling used when the cache is built.
    ///
    /// Has no effect once the cache exists.
    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        if self.cache.get().is_some() {
            log::warn!("Interpolation cache already built, ignoring edge mode {edge_mode:?}");
        } else {
            self.edge_mode = edge_mode;
        }
        self
    }

    pub fn model(&self) -> &PsfModel {
        &self.model
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }

    pub fn is_cache_initialized(&self) -> bool {
        self.cache.get().is_some()
    }

    /// The interpolation cache, computed on the first call.
    pub fn cache(&self) -> &InterpolationCache {
        self.cache
            .get_or_init(|| InterpolationCache::compute(self.model.table(), self.edge_mode))
    }

    /// Build the cache now rather than on the first subtraction.
    pub fn prepare(&self) -> &Self {
        self.cache();
        self
    }

    /// Unscaled model intensity at each `(dx, dy)` pair.
    pub fn evaluate(&self, dx: &[f64], dy: &[f64]) -> Vec<f64> {
        self.evaluator.evaluate(dx, dy, &self.model, self.cache())
    }
}
