//! K-point UHF Command-Line Interface
//!
//! This is the main entry point for running k-point sampled UHF
//! calculations on a lattice model described in YAML.

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use pbc_kuhf::config::{Args, Config};
use pbc_kuhf::io::{print_band_structure, print_scf_summary, setup_output};
use pbc_kuhf::{LevelShift, KUHF};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::info;

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_output(args.output.as_ref(), args.verbose);

    info!("Reading configuration from: {}", args.config_file);
    let config_content = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("Unable to read configuration file: {}", args.config_file))?;

    let config: Config = serde_yml::from_str::<Config>(&config_content)
        .wrap_err("Failed to parse configuration file")?
        .with_defaults();
    config.validate().wrap_err("Invalid configuration")?;
    info!("Configuration loaded:\n{:?}", config);

    run_kuhf_calculation(config, args)
}

fn run_kuhf_calculation(config: Config, args: Args) -> Result<()> {
    let cell = config.cell.to_cell()?;
    let kpts = config.kpts.to_kpts(&cell);
    let bands = config.bands.as_ref().map(|b| b.to_kpts(&cell));

    let mut mf = KUHF::new(cell, kpts, config.model);
    config.scf_params.apply(&mut mf);

    // Override with command-line arguments if provided
    if let Some(mc) = args.max_cycle {
        info!("Overriding max_cycle with: {}", mc);
        mf.max_cycle = mc;
    }
    if let Some(tol) = args.conv_tol {
        info!("Overriding conv_tol with: {:e}", tol);
        mf.conv_tol = tol;
        mf.conv_tol_grad = Some(tol.sqrt());
    }
    if let Some(shift) = args.level_shift {
        info!("Overriding level_shift with: {}", shift);
        mf.level_shift = LevelShift::Uniform(shift);
    }
    if let Some(damp) = args.damp {
        info!("Overriding damp with: {}", damp);
        mf.damp = damp;
    }
    if let Some(guess) = &args.init_guess {
        info!("Overriding init_guess with: {}", guess);
        mf.init_guess = guess.clone();
    }
    if let Some(chk) = &args.chkfile {
        info!("Overriding chkfile with: {}", chk);
        mf.chkfile = Some(PathBuf::from(chk));
    }

    info!("\nStarting KUHF cycle...\n");
    mf.kernel(None).wrap_err("KUHF calculation failed")?;
    print_scf_summary(&mf);

    let (ss, multiplicity) = mf.spin_square(None, None)?;
    info!("<S^2> = {:.8}  2S+1 = {:.8}", ss, multiplicity);

    if let Some(kpts_band) = bands {
        let (energies, _) = mf.get_bands(&kpts_band, None)?;
        match &args.bands_output {
            Some(path) => {
                let mut file = File::create(path)
                    .wrap_err_with(|| format!("Unable to create band output file: {}", path))?;
                print_band_structure(&mut file, &kpts_band, &energies)?;
                info!("Band energies written to {}", path);
            }
            None => {
                let mut buffer = Vec::new();
                print_band_structure(&mut buffer, &kpts_band, &energies)?;
                info!("\nBand energies:\n{}", String::from_utf8_lossy(&buffer));
            }
        }
    }
    Ok(())
}
