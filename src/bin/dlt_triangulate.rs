use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dlt_reconstruction::{
    io::{
        output_prefix, read_coefficients, read_omnidirectional_profiles, read_pinhole_profiles,
        read_track_table, write_reconstruction,
    },
    reconstruct::{ReconstructOptions, Reconstructor},
};
use log::info;

#[derive(Parser)]
#[command(version, about, author)]
struct DltTriangulateCli {
    /// observation table, `{track}_cam_{c}_{x|y}` columns
    #[arg(short = 'x', long)]
    xypts: PathBuf,

    /// DLT coefficient table, one camera per column
    #[arg(short, long)]
    dlt: PathBuf,

    /// pinhole camera profile, 8 or 12 values per camera
    #[arg(short, long, conflicts_with = "omni")]
    profile: Option<PathBuf>,

    /// omnidirectional camera descriptor json
    #[arg(short, long)]
    omni: Option<PathBuf>,

    /// image height of each camera, switches between lower-left and upper-left origins
    #[arg(long, num_args = 1..)]
    flip_heights: Option<Vec<f64>>,

    /// triangulate tracks in parallel
    #[arg(long)]
    parallel: bool,

    /// prefix of the xyzpts/xyzres outputs, defaults to the observation path up to `xypts`
    #[arg(long)]
    output_prefix: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = DltTriangulateCli::parse();

    let observations = read_track_table(&cli.xypts)?;
    let dlt = read_coefficients(&cli.dlt)?;
    let profiles = match (&cli.profile, &cli.omni) {
        (Some(path), _) => Some(read_pinhole_profiles(path)?),
        (None, Some(path)) => Some(read_omnidirectional_profiles(path)?),
        (None, None) => None,
    };
    let options = ReconstructOptions {
        flip_heights: cli.flip_heights,
        parallel: cli.parallel,
    };

    let reconstructor = Reconstructor::new(dlt, profiles, options)?;
    let reconstruction = reconstructor.process(&observations)?;

    for (track, name) in reconstruction.track_names.iter().enumerate() {
        let mean = reconstruction
            .mean_error(track)
            .map_or("NaN".to_owned(), |e| format!("{:.3}", e));
        info!(
            "{}: {}/{} frames reconstructed, mean reprojection error {}",
            name,
            reconstruction.reconstructed_frames(track),
            reconstruction.frame_count(),
            mean
        );
    }
    if !reconstruction.anomalies.is_empty() {
        info!("{} anomalies", reconstruction.anomalies.len());
    }

    let prefix = cli
        .output_prefix
        .unwrap_or_else(|| output_prefix(&cli.xypts));
    let (xyz_path, res_path) = write_reconstruction(&prefix, &reconstruction)?;
    println!("{}", xyz_path.display());
    println!("{}", res_path.display());
    Ok(())
}
