//! FITS reading and writing for science images and PSF model files.
//!
//! Arrays are kept in FITS pixel order: row `r` of the ndarray is FITS row `r`
//! (`NAXIS2` axis) and column `c` is `NAXIS1`, so star coordinates measured in
//! zero-based FITS pixels index the array directly. No vertical flip is applied.
//!
//! A PSF model file holds the residual table in its primary image with the
//! scalar metadata in header keywords `GAUSS1..GAUSS5`, `PSFMAG`, `PSFRAD` and
//! `FITRAD`.

use std::path::Path;

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::Array2;
use thiserror::Error;

use crate::model::{GaussianCore, PsfModel, PsfModelError};

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),
    #[error("Primary HDU is not an image")]
    NotAnImage,
    #[error("Expected a 2-dimensional image, got shape {0:?}")]
    UnsupportedDimensions(Vec<usize>),
    #[error("Invalid data in HDU: {0}")]
    InvalidDataType(String),
    #[error("Invalid PSF model: {0}")]
    Model(#[from] PsfModelError),
}

fn primary_image(fptr: &mut FitsFile) -> Result<(FitsHdu, usize, usize), FitsError> {
    let hdu = fptr.primary_hdu()?;
    let (height, width) = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => match shape.as_slice() {
            [height, width] => (*height, *width),
            _ => return Err(FitsError::UnsupportedDimensions(shape.clone())),
        },
        _ => return Err(FitsError::NotAnImage),
    };
    Ok((hdu, height, width))
}

fn read_primary_array(fptr: &mut FitsFile) -> Result<(FitsHdu, Array2<f64>), FitsError> {
    let (hdu, height, width) = primary_image(fptr)?;
    let data: Vec<f64> = hdu.read_image(fptr)?;
    let array = Array2::from_shape_vec((height, width), data).map_err(|_| {
        FitsError::InvalidDataType(format!("cannot reshape primary image to {height}x{width}"))
    })?;
    Ok((hdu, array))
}

/// Read the primary image of a FITS file as `f64`.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, FitsError> {
    let mut fptr = FitsFile::open(path.as_ref())?;
    let (_, array) = read_primary_array(&mut fptr)?;
    log::debug!(
        "Read {}x{} image from {}",
        array.ncols(),
        array.nrows(),
        path.as_ref().display()
    );
    Ok(array)
}

/// Write `image` as the double-precision primary image of a new FITS file,
/// replacing any existing file.
pub fn write_image<P: AsRef<Path>>(path: P, image: &Array2<f64>) -> Result<(), FitsError> {
    let mut fptr = create_with_primary(path.as_ref(), image.dim())?;
    let hdu = fptr.primary_hdu()?;
    let flat: Vec<f64> = image.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat)?;
    Ok(())
}

fn create_with_primary(path: &Path, (height, width): (usize, usize)) -> Result<FitsFile, FitsError> {
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[height, width],
    };
    Ok(FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?)
}

/// Read a PSF model file.
pub fn read_psf_model<P: AsRef<Path>>(path: P) -> Result<PsfModel, FitsError> {
    let mut fptr = FitsFile::open(path.as_ref())?;
    let (hdu, table) = read_primary_array(&mut fptr)?;

    let naxis1 = hdu.read_key::<i64>(&mut fptr, "NAXIS1")?;
    if naxis1 as usize != table.ncols() {
        return Err(FitsError::InvalidDataType(format!(
            "NAXIS1={naxis1} does not match table width {}",
            table.ncols()
        )));
    }

    let gauss = (1..=GaussianCore::N_PARAMS)
        .map(|i| hdu.read_key::<f64>(&mut fptr, &format!("GAUSS{i}")))
        .collect::<Result<Vec<f64>, _>>()?;
    let psf_mag = hdu.read_key::<f64>(&mut fptr, "PSFMAG")?;
    let psf_radius = hdu.read_key::<f64>(&mut fptr, "PSFRAD")?;
    let fit_radius = hdu.read_key::<f64>(&mut fptr, "FITRAD")?;

    let model = PsfModel::new(
        table,
        GaussianCore::from_slice(&gauss)?,
        psf_mag,
        psf_radius,
        fit_radius,
    )?;
    Ok(model)
}

/// Write a PSF model file readable by [`read_psf_model`].
pub fn write_psf_model<P: AsRef<Path>>(path: P, model: &PsfModel) -> Result<(), FitsError> {
    let table = model.table();
    let mut fptr = create_with_primary(path.as_ref(), table.dim())?;
    let hdu = fptr.primary_hdu()?;
    let flat: Vec<f64> = table.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat)?;

    for (i, value) in model.gaussian().to_array().into_iter().enumerate() {
        hdu.write_key(&mut fptr, &format!("GAUSS{}", i + 1), value)?;
    }
    hdu.write_key(&mut fptr, "PSFMAG", model.psf_mag())?;
    hdu.write_key(&mut fptr, "PSFRAD", model.psf_radius())?;
    hdu.write_key(&mut fptr, "FITRAD", model.fit_radius())?;
    Ok(())
}
