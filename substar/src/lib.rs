//! PSF-based star subtraction for astronomical images
//!
//! This crate removes (or injects) scaled, sub-pixel positioned copies of an
//! empirical point spread function at a list of star positions. The PSF model is
//! a Gaussian core plus a half-pixel sampled residual table whose cubic
//! interpolation coefficients are computed once per [`SubtractionSession`].

pub mod evaluator;
pub mod interp;
pub mod io;
pub mod model;
pub mod session;
pub mod stars;
pub mod subtract;

// Re-exports for easier access
pub use evaluator::{DaoEvaluator, PsfEvaluator};
pub use interp::{EdgeMode, InterpolationCache};
pub use model::{BoxGeometry, GaussianCore, PsfModel, PsfModelError};
pub use session::{SessionError, SubtractionSession};
pub use stars::{filter_stars, FilteredStars, PlacedStar, StarList, StarListError, StarSelection};
pub use subtract::{
    add_stars, apply_stars, subtract_stars, subtract_stars_dyn, subtract_stars_with_psf_file,
    Operation, SubtractError, SubtractOptions, SubtractProgress, SubtractionReport,
};
