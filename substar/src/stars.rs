//! Star lists, star selection and the batch filter that places stars in boxes.
//!
//! Stars arrive as parallel coordinate and magnitude arrays. The filter resolves
//! which stars take part, drops the ones without a usable magnitude, and computes
//! each survivor's box placement and flux scale from a single retained index list.

use thiserror::Error;

use crate::model::{BoxGeometry, PsfModel};

/// Errors from building or filtering a star list
#[derive(Error, Debug, PartialEq)]
pub enum StarListError {
    #[error("star arrays differ in length: x={x}, y={y}, mag={mag}")]
    LengthMismatch { x: usize, y: usize, mag: usize },

    #[error("star index {index} out of range for {len} stars")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Parallel arrays of star positions and magnitudes.
///
/// A magnitude of `None` marks a star that must not be subtracted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarList {
    x: Vec<f64>,
    y: Vec<f64>,
    mag: Vec<Option<f64>>,
}

impl StarList {
    pub fn new(x: Vec<f64>, y: Vec<f64>, mag: Vec<Option<f64>>) -> Result<Self, StarListError> {
        if x.len() != y.len() || x.len() != mag.len() {
            return Err(StarListError::LengthMismatch {
                x: x.len(),
                y: y.len(),
                mag: mag.len(),
            });
        }
        Ok(Self { x, y, mag })
    }

    /// Build from photometry output where a magnitude of exactly `0.0` means missing.
    pub fn from_sentinel_magnitudes(
        x: Vec<f64>,
        y: Vec<f64>,
        mag: Vec<f64>,
    ) -> Result<Self, StarListError> {
        let mag = mag
            .into_iter()
            .map(|m| if m == 0.0 { None } else { Some(m) })
            .collect();
        Self::new(x, y, mag)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn mag(&self) -> &[Option<f64>] {
        &self.mag
    }

    pub fn push(&mut self, x: f64, y: f64, mag: Option<f64>) {
        self.x.push(x);
        self.y.push(y);
        self.mag.push(mag);
    }
}

/// Which stars of a [`StarList`] to process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StarSelection {
    #[default]
    All,
    Indices(Vec<usize>),
}

impl StarSelection {
    /// Interpret a raw id list: empty, or any negative entry, selects every star.
    pub fn from_ids(ids: &[i64]) -> Self {
        if ids.is_empty() || ids.iter().any(|&id| id < 0) {
            StarSelection::All
        } else {
            StarSelection::Indices(ids.iter().map(|&id| id as usize).collect())
        }
    }

    fn resolve(&self, len: usize) -> Result<Vec<usize>, StarListError> {
        match self {
            StarSelection::All => Ok((0..len).collect()),
            StarSelection::Indices(indices) => {
                if let Some(&index) = indices.iter().find(|&&i| i >= len) {
                    return Err(StarListError::IndexOutOfRange { index, len });
                }
                Ok(indices.clone())
            }
        }
    }
}

/// One star placed in its evaluation box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedStar {
    /// Index into the original star list
    pub index: usize,
    /// Image column of the box's first column
    pub lx: i64,
    /// Image row of the box's first row
    pub ly: i64,
    /// Star x position relative to the box corner
    pub xx: f64,
    /// Star y position relative to the box corner
    pub yy: f64,
    /// Flux ratio relative to the PSF zero point
    pub scale: f64,
}

/// Stars that survived filtering, as parallel arrays gathered from one index list.
///
/// Only [`filter_stars`] builds this, so the arrays always have equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredStars {
    indices: Vec<usize>,
    lx: Vec<i64>,
    ly: Vec<i64>,
    xx: Vec<f64>,
    yy: Vec<f64>,
    scale: Vec<f64>,
    geometry: BoxGeometry,
    /// Number of stars the selection resolved to, before filtering
    requested: usize,
}

impl FilteredStars {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Indices into the original star list, in processing order
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn lx(&self) -> &[i64] {
        &self.lx
    }

    pub fn ly(&self) -> &[i64] {
        &self.ly
    }

    pub fn xx(&self) -> &[f64] {
        &self.xx
    }

    pub fn yy(&self) -> &[f64] {
        &self.yy
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Box geometry of the model the stars were placed with
    pub fn geometry(&self) -> BoxGeometry {
        self.geometry
    }

    /// Stars named by the selection, including the ones filtered out
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Stars the filter dropped
    pub fn skipped(&self) -> usize {
        self.requested - self.len()
    }

    pub fn get(&self, i: usize) -> PlacedStar {
        PlacedStar {
            index: self.indices[i],
            lx: self.lx[i],
            ly: self.ly[i],
            xx: self.xx[i],
            yy: self.yy[i],
            scale: self.scale[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = PlacedStar> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// Resolve the selection, drop unusable stars, and place the rest in boxes.
///
/// A selection index past the end of the list is an error; nothing else is.
/// Stars with no magnitude are skipped, as are stars with non-finite position or
/// magnitude.
pub fn filter_stars(
    stars: &StarList,
    selection: &StarSelection,
    model: &PsfModel,
) -> Result<FilteredStars, StarListError> {
    let working = selection.resolve(stars.len())?;
    let requested = working.len();

    let retained: Vec<(usize, f64)> = working
        .into_iter()
        .filter_map(|i| match stars.mag[i] {
            None => {
                log::debug!("Skipping star {i}: no magnitude");
                None
            }
            Some(mag) if !(mag.is_finite() && stars.x[i].is_finite() && stars.y[i].is_finite()) => {
                log::warn!(
                    "Skipping star {i}: non-finite input (x={}, y={}, mag={mag})",
                    stars.x[i],
                    stars.y[i]
                );
                None
            }
            Some(mag) => Some((i, mag)),
        })
        .collect();

    let geometry = model.box_geometry();
    let n = retained.len();
    let mut filtered = FilteredStars {
        indices: Vec::with_capacity(n),
        lx: Vec::with_capacity(n),
        ly: Vec::with_capacity(n),
        xx: Vec::with_capacity(n),
        yy: Vec::with_capacity(n),
        scale: Vec::with_capacity(n),
        geometry,
        requested,
    };

    for (i, mag) in retained {
        let (x, y) = (stars.x[i], stars.y[i]);
        // Nearest-pixel rounding of the centre, then back off to the box corner
        let lx = ((x + 0.5).floor() as i64).saturating_sub(geometry.nhalf);
        let ly = ((y + 0.5).floor() as i64).saturating_sub(geometry.nhalf);

        filtered.indices.push(i);
        filtered.lx.push(lx);
        filtered.ly.push(ly);
        filtered.xx.push(x - lx as f64);
        filtered.yy.push(y - ly as f64);
        filtered.scale.push(model.magnitude_to_scale(mag));
    }

    log::debug!(
        "Star filter kept {} of {} selected stars (box {}x{})",
        filtered.len(),
        requested,
        geometry.nbox,
        geometry.nbox
    );

    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GaussianCore;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn model() -> PsfModel {
        PsfModel::new(
            Array2::zeros((21, 21)),
            GaussianCore::flat(),
            15.0,
            3.0,
            2.0,
        )
        .unwrap()
    }

    #[test]
    fn test_length_mismatch() {
        let err = StarList::new(vec![1.0, 2.0], vec![1.0], vec![Some(1.0), None]).unwrap_err();
        assert_eq!(err, StarListError::LengthMismatch { x: 2, y: 1, mag: 2 });
    }

    #[test]
    fn test_sentinel_magnitudes() {
        let stars =
            StarList::from_sentinel_magnitudes(vec![1.0, 2.0, 3.0], vec![1.0; 3], vec![14.0, 0.0, -0.5])
                .unwrap();
        assert_eq!(stars.mag(), &[Some(14.0), None, Some(-0.5)]);
    }

    #[test]
    fn test_selection_from_ids() {
        assert_eq!(StarSelection::from_ids(&[]), StarSelection::All);
        assert_eq!(StarSelection::from_ids(&[2, -1, 0]), StarSelection::All);
        assert_eq!(
            StarSelection::from_ids(&[3, 1]),
            StarSelection::Indices(vec![3, 1])
        );
    }

    #[test]
    fn test_placement() {
        let stars = StarList::new(vec![5.0, 10.4, 7.6], vec![5.0, 2.5, -1.2], vec![Some(15.0); 3])
            .unwrap();
        let filtered = filter_stars(&stars, &StarSelection::All, &model()).unwrap();

        assert_eq!(filtered.geometry, BoxGeometry { nbox: 7, nhalf: 3 });
        assert_eq!(filtered.lx, vec![2, 7, 5]);
        assert_eq!(filtered.ly, vec![2, 0, -4]);
        assert_relative_eq!(filtered.xx[0], 3.0);
        assert_relative_eq!(filtered.xx[1], 3.4, epsilon = 1e-12);
        assert_relative_eq!(filtered.yy[1], 2.5);
        assert_relative_eq!(filtered.xx[2], 2.6, epsilon = 1e-12);
        assert_relative_eq!(filtered.yy[2], 2.8, epsilon = 1e-12);
        assert!(filtered.scale.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_missing_magnitudes_removed_in_lockstep() {
        let stars = StarList::new(
            vec![1.0, 2.0, 3.0, 4.0],
            vec![10.0, 20.0, 30.0, 40.0],
            vec![Some(15.0), None, Some(20.0), None],
        )
        .unwrap();
        let filtered = filter_stars(&stars, &StarSelection::All, &model()).unwrap();

        assert_eq!(filtered.requested, 4);
        assert_eq!(filtered.indices, vec![0, 2]);
        assert_eq!(filtered.lx, vec![1 - 3, 3 - 3]);
        assert_eq!(filtered.ly, vec![10 - 3, 30 - 3]);
        assert_relative_eq!(filtered.scale[0], 1.0);
        assert_relative_eq!(filtered.scale[1], 0.01, epsilon = 1e-15);

        let placed: Vec<PlacedStar> = filtered.iter().collect();
        assert_eq!(placed[1].index, 2);
        assert_eq!(placed[1].ly, 27);
    }

    #[test]
    fn test_subset_order_and_bounds() {
        let stars = StarList::new(vec![1.0, 2.0, 3.0], vec![1.0; 3], vec![Some(15.0); 3]).unwrap();
        let filtered =
            filter_stars(&stars, &StarSelection::Indices(vec![2, 0]), &model()).unwrap();
        assert_eq!(filtered.indices, vec![2, 0]);

        let err = filter_stars(&stars, &StarSelection::Indices(vec![0, 3]), &model()).unwrap_err();
        assert_eq!(err, StarListError::IndexOutOfRange { index: 3, len: 3 });
    }

    #[test]
    fn test_non_finite_skipped() {
        let stars = StarList::new(
            vec![f64::NAN, 2.0, 3.0],
            vec![1.0, 1.0, 1.0],
            vec![Some(15.0), Some(f64::INFINITY), Some(15.0)],
        )
        .unwrap();
        let filtered = filter_stars(&stars, &StarSelection::All, &model()).unwrap();
        assert_eq!(filtered.indices, vec![2]);
    }

    #[test]
    fn test_accessors_stay_in_lockstep() {
        let stars = StarList::new(
            vec![1.0, f64::NAN, 3.0, 4.0, 5.0],
            vec![2.0; 5],
            vec![Some(15.0), Some(15.0), None, Some(16.0), Some(14.0)],
        )
        .unwrap();
        let filtered = filter_stars(&stars, &StarSelection::All, &model()).unwrap();

        let n = filtered.len();
        assert_eq!(n, 3);
        assert_eq!(filtered.indices(), &[0, 3, 4]);
        for len in [
            filtered.lx().len(),
            filtered.ly().len(),
            filtered.xx().len(),
            filtered.yy().len(),
            filtered.scale().len(),
        ] {
            assert_eq!(len, n);
        }
        assert_eq!(filtered.requested(), 5);
        assert_eq!(filtered.skipped(), 2);
        assert_eq!(filtered.iter().count(), n);
        assert_eq!(filtered.get(2).index, 4);
    }

    #[test]
    fn test_empty_list() {
        let filtered = filter_stars(&StarList::default(), &StarSelection::All, &model()).unwrap();
        assert!(filtered.is_empty());
        assert_eq!(filtered.requested, 0);
    }
}
