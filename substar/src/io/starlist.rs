//! CSV star lists.
//!
//! One star per row with an `x,y,mag` header. An empty `mag` cell, or a magnitude
//! of exactly `0.0` as written by older photometry runs, marks a missing magnitude.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stars::{StarList, StarListError};

#[derive(Error, Debug)]
pub enum StarListIoError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stars(#[from] StarListError),
}

#[derive(Debug, Serialize, Deserialize)]
struct StarRecord {
    x: f64,
    y: f64,
    #[serde(default)]
    mag: Option<f64>,
}

/// Read a star list from CSV.
pub fn read_star_list<P: AsRef<Path>>(path: P) -> Result<StarList, StarListIoError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path.as_ref())?;

    let mut stars = StarList::default();
    for record in reader.deserialize() {
        let record: StarRecord = record?;
        let mag = record.mag.filter(|&m| m != 0.0);
        stars.push(record.x, record.y, mag);
    }

    log::debug!(
        "Read {} stars from {}",
        stars.len(),
        path.as_ref().display()
    );
    Ok(stars)
}

/// Write a star list as CSV, leaving missing magnitudes empty.
pub fn write_star_list<P: AsRef<Path>>(stars: &StarList, path: P) -> Result<(), StarListIoError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for i in 0..stars.len() {
        writer.serialize(StarRecord {
            x: stars.x()[i],
            y: stars.y()[i],
            mag: stars.mag()[i],
        })?;
    }
    writer.flush()?;
    Ok(())
}
