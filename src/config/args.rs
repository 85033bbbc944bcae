//! Command-line argument parsing for k-point UHF calculations

use clap::Parser;

/// K-point sampled unrestricted Hartree-Fock with YAML configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config_file: String,

    /// Override output file: (default stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Log per-k-point orbital energies and DIIS details
    #[arg(short, long)]
    pub verbose: bool,

    /// Override maximum SCF cycles
    #[arg(long)]
    pub max_cycle: Option<usize>,

    /// Override energy convergence threshold
    #[arg(long)]
    pub conv_tol: Option<f64>,

    /// Override level shift (applied to both spins)
    #[arg(long)]
    pub level_shift: Option<f64>,

    /// Override damping factor
    #[arg(long)]
    pub damp: Option<f64>,

    /// Override initial guess (minao, atom, 1e, chk)
    #[arg(long)]
    pub init_guess: Option<String>,

    /// Override checkpoint file
    #[arg(long)]
    pub chkfile: Option<String>,

    /// Write band energies to this file instead of the log
    #[arg(long)]
    pub bands_output: Option<String>,
}
