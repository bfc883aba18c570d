use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dlt_reconstruction::{
    export::{default_output, write_calibration, CalibrationSet},
    io::{read_coefficients, read_profile_rows},
};

#[derive(Parser)]
#[command(version, about, author)]
struct DltCameraExportCli {
    /// DLT coefficient table, one camera per column
    #[arg(short, long)]
    dlt: PathBuf,

    /// camera profile with 12 values per camera
    #[arg(short, long)]
    profile: PathBuf,

    /// output toml, defaults to calibration.toml next to the coefficients
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = DltCameraExportCli::parse();
    let dlt = read_coefficients(&cli.dlt)?;
    let rows = read_profile_rows(&cli.profile)?;
    let set = CalibrationSet::new(&dlt, &rows)?;
    let output = cli.output.unwrap_or_else(|| default_output(&cli.dlt));
    write_calibration(&output, &set)?;
    println!("{}", output.display());
    Ok(())
}
