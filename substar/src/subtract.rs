//! Removal (or injection) of scaled PSF copies at star positions, in place.
//!
//! For each filtered star the box of `nbox x nbox` pixels anchored at `(lx, ly)` is
//! scanned. Cells closer to the star centre than the PSF radius form the star's
//! footprint; footprint cells that fall outside the image are dropped, so stars on
//! or beyond the edge are partially subtracted or skipped, and no pixel outside
//! `[0, W) x [0, H)` is ever read or written. The surviving cells are evaluated
//! with the session's PSF evaluator and `scale * model` is subtracted from the
//! image.
//!
//! The image is indexed `[[row, col]]`; a cell at box position `(col, row)` maps to
//! image pixel `[[row + ly, col + lx]]`.
//!
//! Stars are applied strictly in the order of the filtered index list. The
//! parallel mode renders every star's stamp on the rayon pool and then applies
//! the stamps in that same order, so its output is bit-identical to the serial
//! mode even where footprints overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array2, ArrayD, ArrayViewMut2, Ix2};
use rayon::prelude::*;
use thiserror::Error;

use crate::evaluator::PsfEvaluator;
use crate::model::BoxGeometry;
use crate::session::{SessionError, SubtractionSession};
use crate::stars::{filter_stars, FilteredStars, PlacedStar, StarList, StarListError, StarSelection};

/// Errors that abort a subtraction run
#[derive(Error, Debug)]
pub enum SubtractError {
    #[error("image must be 2-dimensional, got {ndim} dimensions")]
    NotTwoDimensional { ndim: usize },

    #[error("invalid star input: {0}")]
    Stars(#[from] StarListError),

    #[error("stars were placed with a {actual}-pixel box but the session PSF uses {expected}")]
    GeometryMismatch { expected: i64, actual: i64 },

    #[error("failed to open PSF session: {0}")]
    Session(#[from] SessionError),

    #[error("cancelled after {completed} of {total} stars")]
    Cancelled { completed: usize, total: usize },
}

/// Direction in which the scaled PSF is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    /// Remove stars from the image
    #[default]
    Subtract,
    /// Inject artificial stars into the image
    Add,
}

/// Receives a notification after every star.
pub trait SubtractProgress: Sync {
    fn star_done(&self, completed: usize, total: usize);

    fn finish(&self) {}
}

impl SubtractProgress for indicatif::ProgressBar {
    fn star_done(&self, completed: usize, total: usize) {
        if self.length() != Some(total as u64) {
            self.set_length(total as u64);
        }
        self.set_position(completed as u64);
    }

    fn finish(&self) {
        indicatif::ProgressBar::finish(self);
    }
}

/// Run-time options for a subtraction run
#[derive(Clone, Default)]
pub struct SubtractOptions<'a> {
    /// Log every star at `info` level
    pub verbose: bool,
    /// Render star stamps on the rayon pool before applying them
    pub parallel: bool,
    /// Per-star progress notifications
    pub progress: Option<&'a dyn SubtractProgress>,
    /// Checked before each star; when set the run stops with [`SubtractError::Cancelled`]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SubtractOptions<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Summary of a subtraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtractionReport {
    /// Stars named by the selection
    pub stars_requested: usize,
    /// Stars whose footprint touched the image
    pub stars_applied: usize,
    /// Stars dropped by the filter (missing or non-finite magnitude/position)
    pub stars_skipped: usize,
    /// Valid stars whose entire footprint lay outside the image
    pub stars_clipped_out: usize,
    /// Pixel updates performed, counting overlaps once per star
    pub pixels_modified: usize,
}

/// Footprint cells of one star that lie inside the image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Footprint {
    /// Image pixels as `(row, col)`
    pub pixels: Vec<(usize, usize)>,
    /// Offset of each pixel from the star centre along x
    pub dx: Vec<f64>,
    /// Offset of each pixel from the star centre along y
    pub dy: Vec<f64>,
    /// Cells within the PSF radius before clipping to the image
    pub cells_in_radius: usize,
}

impl Footprint {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Cells of `star`'s box within `psf_radius` of its centre, clipped to a
/// `width x height` image.
///
/// # Arguments
///
/// * `star` - Star placed in its box by [`filter_stars`]
/// * `geometry` - Box geometry of the model the star was placed with
/// * `psf_radius` - Footprint radius in pixels; cells at exactly this distance are excluded
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
///
/// # Returns
///
/// The in-image cells as `(row, col)` with their offsets from the star centre
pub fn footprint(
    star: &PlacedStar,
    geometry: BoxGeometry,
    psf_radius: f64,
    width: usize,
    height: usize,
) -> Footprint {
    let radius_sq = psf_radius * psf_radius;
    let (width, height) = (width as i64, height as i64);
    let mut footprint = Footprint::default();

    for row in 0..geometry.nbox {
        let dy = row as f64 - star.yy;
        let gy = star.ly.saturating_add(row);
        for col in 0..geometry.nbox {
            let dx = col as f64 - star.xx;
            if dx * dx + dy * dy >= radius_sq {
                continue;
            }
            footprint.cells_in_radius += 1;

            let gx = star.lx.saturating_add(col);
            if gx < 0 || gx >= width || gy < 0 || gy >= height {
                continue;
            }
            footprint.pixels.push((gy as usize, gx as usize));
            footprint.dx.push(dx);
            footprint.dy.push(dy);
        }
    }

    footprint
}

/// Model values of one star over its clipped footprint, not yet scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    pub star: PlacedStar,
    pub pixels: Vec<(usize, usize)>,
    pub values: Vec<f64>,
}

/// Evaluate the PSF over `star`'s footprint in a `width x height` image.
///
/// # Arguments
///
/// * `session` - Session providing the model, evaluator and interpolation cache
/// * `star` - Star placed in its box
/// * `geometry` - Box geometry of the session's model
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
///
/// # Returns
///
/// A [`Stamp`] with one unscaled model value per in-image footprint pixel
pub fn render_stamp<E: PsfEvaluator>(
    session: &SubtractionSession<E>,
    star: &PlacedStar,
    geometry: BoxGeometry,
    width: usize,
    height: usize,
) -> Stamp {
    let footprint = footprint(star, geometry, session.model().psf_radius(), width, height);
    let values = if footprint.is_empty() {
        Vec::new()
    } else {
        session.evaluate(&footprint.dx, &footprint.dy)
    };
    Stamp {
        star: *star,
        pixels: footprint.pixels,
        values,
    }
}

fn apply_stamp(image: &mut ArrayViewMut2<f64>, stamp: &Stamp, operation: Operation) {
    let scale = stamp.star.scale;
    for (&(row, col), &value) in stamp.pixels.iter().zip(&stamp.values) {
        match operation {
            Operation::Subtract => image[[row, col]] -= scale * value,
            Operation::Add => image[[row, col]] += scale * value,
        }
    }
}

/// Apply every filtered star to `image` in place.
///
/// `filtered` must have been placed with the session's PSF model. The
/// interpolation cache is built before the first star if it does not exist yet.
///
/// # Arguments
///
/// * `image` - Image to modify in place, indexed `[[row, col]]`
/// * `session` - Session for the PSF model the stars were placed with
/// * `filtered` - Output of [`filter_stars`]
/// * `operation` - Whether to subtract or add the scaled PSF
/// * `options` - Logging, parallelism, progress and cancellation
///
/// # Returns
///
/// A [`SubtractionReport`], or an error. `GeometryMismatch` is returned before
/// any pixel is touched; `Cancelled` leaves the stars already applied in place.
pub fn apply_stars<E: PsfEvaluator>(
    mut image: ArrayViewMut2<f64>,
    session: &SubtractionSession<E>,
    filtered: &FilteredStars,
    operation: Operation,
    options: &SubtractOptions,
) -> Result<SubtractionReport, SubtractError> {
    let geometry = session.model().box_geometry();
    if filtered.geometry() != geometry {
        return Err(SubtractError::GeometryMismatch {
            expected: geometry.nbox,
            actual: filtered.geometry().nbox,
        });
    }

    let (height, width) = image.dim();
    let total = filtered.len();
    session.cache();

    let mut report = SubtractionReport {
        stars_requested: filtered.requested(),
        stars_skipped: filtered.skipped(),
        ..Default::default()
    };

    let prerendered: Option<Vec<Stamp>> = options.parallel.then(|| {
        (0..total)
            .into_par_iter()
            .map(|i| render_stamp(session, &filtered.get(i), geometry, width, height))
            .collect()
    });

    for i in 0..total {
        if options.is_cancelled() {
            log::debug!("Subtraction cancelled after {i} of {total} stars");
            return Err(SubtractError::Cancelled {
                completed: i,
                total,
            });
        }

        let rendered;
        let stamp = match &prerendered {
            Some(stamps) => &stamps[i],
            None => {
                rendered = render_stamp(session, &filtered.get(i), geometry, width, height);
                &rendered
            }
        };

        if stamp.pixels.is_empty() {
            report.stars_clipped_out += 1;
        } else {
            apply_stamp(&mut image, stamp, operation);
            report.stars_applied += 1;
            report.pixels_modified += stamp.pixels.len();
        }

        if options.verbose {
            log::info!(
                "Star {} ({}/{}): box at ({}, {}), scale {:.4e}, {} pixels",
                stamp.star.index,
                i + 1,
                total,
                stamp.star.lx,
                stamp.star.ly,
                stamp.star.scale,
                stamp.pixels.len()
            );
        }
        if let Some(progress) = options.progress {
            progress.star_done(i + 1, total);
        }
    }

    if let Some(progress) = options.progress {
        progress.finish();
    }

    log::debug!(
        "{:?}: {} stars applied, {} outside image, {} skipped, {} pixels updated",
        operation,
        report.stars_applied,
        report.stars_clipped_out,
        report.stars_skipped,
        report.pixels_modified
    );

    Ok(report)
}

fn run<E: PsfEvaluator>(
    image: ArrayViewMut2<f64>,
    stars: &StarList,
    selection: &StarSelection,
    session: &SubtractionSession<E>,
    operation: Operation,
    options: &SubtractOptions,
) -> Result<SubtractionReport, SubtractError> {
    let filtered = filter_stars(stars, selection, session.model())?;
    apply_stars(image, session, &filtered, operation, options)
}

/// Subtract the scaled PSF at every selected star, in place.
///
/// # Arguments
///
/// * `image` - Image to modify, indexed `[[row, col]]`
/// * `stars` - Star positions and magnitudes
/// * `selection` - Which stars to process
/// * `session` - PSF session
/// * `options` - Run-time options
///
/// # Returns
///
/// A [`SubtractionReport`]. Invalid selections fail before the image is modified.
pub fn subtract_stars<E: PsfEvaluator>(
    image: &mut Array2<f64>,
    stars: &StarList,
    selection: &StarSelection,
    session: &SubtractionSession<E>,
    options: &SubtractOptions,
) -> Result<SubtractionReport, SubtractError> {
    run(
        image.view_mut(),
        stars,
        selection,
        session,
        Operation::Subtract,
        options,
    )
}

/// Add the scaled PSF at every selected star, in place.
pub fn add_stars<E: PsfEvaluator>(
    image: &mut Array2<f64>,
    stars: &StarList,
    selection: &StarSelection,
    session: &SubtractionSession<E>,
    options: &SubtractOptions,
) -> Result<SubtractionReport, SubtractError> {
    run(
        image.view_mut(),
        stars,
        selection,
        session,
        Operation::Add,
        options,
    )
}

/// Subtract stars from an image of unchecked rank.
///
/// Any rank other than 2 is rejected before the image is touched.
pub fn subtract_stars_dyn<E: PsfEvaluator>(
    image: &mut ArrayD<f64>,
    stars: &StarList,
    selection: &StarSelection,
    session: &SubtractionSession<E>,
    options: &SubtractOptions,
) -> Result<SubtractionReport, SubtractError> {
    let ndim = image.ndim();
    let view = image
        .view_mut()
        .into_dimensionality::<Ix2>()
        .map_err(|_| SubtractError::NotTwoDimensional { ndim })?;
    run(view, stars, selection, session, Operation::Subtract, options)
}

/// Load the PSF model at `psf_path` and subtract the selected stars with it.
pub fn subtract_stars_with_psf_file<P: AsRef<std::path::Path>>(
    image: &mut Array2<f64>,
    stars: &StarList,
    selection: &StarSelection,
    psf_path: P,
    options: &SubtractOptions,
) -> Result<SubtractionReport, SubtractError> {
    let session = SubtractionSession::from_file(psf_path)?;
    subtract_stars(image, stars, selection, &session, options)
}
