//! Subtract (or add) PSF-modelled stars from a FITS image
//!
//! Reads a science image, a PSF model and a CSV star list, applies the scaled PSF
//! at every selected star and writes the result as a new FITS file.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use substar::io::{read_image, read_star_list, write_image};
use substar::{
    add_stars, subtract_stars, EdgeMode, StarSelection, SubtractOptions, SubtractionSession,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EdgeModeArg {
    /// Wrap around the table edges when computing coefficients
    Wrap,
    /// Repeat the edge samples instead
    Clamp,
}

impl From<EdgeModeArg> for EdgeMode {
    fn from(arg: EdgeModeArg) -> Self {
        match arg {
            EdgeModeArg::Wrap => EdgeMode::Wrap,
            EdgeModeArg::Clamp => EdgeMode::Clamp,
        }
    }
}

/// Command line arguments for star subtraction
#[derive(Parser, Debug)]
#[command(version, about = "Subtract PSF-modelled stars from a FITS image")]
struct Args {
    /// Input science image (FITS)
    #[arg(long)]
    image: PathBuf,

    /// PSF model, either FITS or JSON
    #[arg(long)]
    psf: PathBuf,

    /// Star list CSV with x, y, mag columns
    #[arg(long)]
    stars: PathBuf,

    /// Output image path, overwritten if it exists
    #[arg(long)]
    output: PathBuf,

    /// Comma-separated star indices to process; empty or any negative value means all
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    ids: Vec<i64>,

    /// Add the stars instead of subtracting them
    #[arg(long, default_value_t = false)]
    add: bool,

    /// Render star stamps in parallel
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Log every star as it is processed
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Edge handling for the interpolation coefficients
    #[arg(long, value_enum, default_value_t = EdgeModeArg::Wrap)]
    edge_mode: EdgeModeArg,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut image = read_image(&args.image)
        .with_context(|| format!("reading image {}", args.image.display()))?;
    let stars = read_star_list(&args.stars)
        .with_context(|| format!("reading star list {}", args.stars.display()))?;
    let session = SubtractionSession::from_file(&args.psf)
        .with_context(|| format!("loading PSF model {}", args.psf.display()))?
        .with_edge_mode(args.edge_mode.into());
    let selection = StarSelection::from_ids(&args.ids);

    log::info!(
        "Image {}x{}, {} stars in list, PSF table {}x{}",
        image.ncols(),
        image.nrows(),
        stars.len(),
        session.model().npsf(),
        session.model().npsf()
    );

    let progress = ProgressBar::new(stars.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .context("building progress bar style")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    progress.set_message(if args.add { "Adding" } else { "Subtracting" });

    let options = SubtractOptions {
        verbose: args.verbose,
        parallel: args.parallel,
        progress: Some(&progress),
        cancel: None,
    };

    let report = if args.add {
        add_stars(&mut image, &stars, &selection, &session, &options)?
    } else {
        subtract_stars(&mut image, &stars, &selection, &session, &options)?
    };

    write_image(&args.output, &image)
        .with_context(|| format!("writing output {}", args.output.display()))?;

    println!(
        "{} {} of {} stars ({} skipped, {} outside image), {} pixels updated",
        if args.add { "Added" } else { "Subtracted" },
        report.stars_applied,
        report.stars_requested,
        report.stars_skipped,
        report.stars_clipped_out,
        report.pixels_modified
    );
    println!("Output: {}", args.output.display());

    Ok(())
}
