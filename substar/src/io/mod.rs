//! File collaborators: star lists, and FITS images and PSF models.

#[cfg(feature = "fits")]
pub mod fits;
pub mod starlist;

#[cfg(feature = "fits")]
pub use fits::{read_image, read_psf_model, write_image, write_psf_model, FitsError};
pub use starlist::{read_star_list, write_star_list, StarListIoError};
