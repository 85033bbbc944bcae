//! Output formatting and logging utilities

use crate::kscf_impl::{Spin, KUHF};
use crate::linalg::SpinKpts;
use crate::service::KptsService;
use nalgebra::{DVector, Vector3};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::SystemTime as StdSystemTime;
use tracing::info;
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::Writer, fmt::layer, fmt::time::FormatTime,
    layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry,
};

/// Wall-clock time formatter that shows only seconds
struct SecondPrecisionTimer;

impl FormatTime for SecondPrecisionTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = StdSystemTime::now();
        let duration = now
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        let total_seconds = duration.as_secs();
        let hours = (total_seconds / 3600) % 24;
        let minutes = (total_seconds / 60) % 60;
        let seconds = total_seconds % 60;

        write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Setup logging to `output_path` or stdout. `verbose` also shows the
/// per-k-point orbital energies and the DIIS details logged at debug level.
pub fn setup_output(output_path: Option<&String>, verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    match output_path {
        Some(path) => {
            if let Ok(log) = File::create(path) {
                let file_layer = layer()
                    .with_writer(log)
                    .with_timer(SecondPrecisionTimer)
                    .with_ansi(false)
                    .with_filter(level);
                Registry::default().with(file_layer).init();
                info!("Output will be written to: {}", path);
            } else {
                eprintln!("Could not create output file: {}", path);
            }
        }
        None => {
            let stdout_layer = layer()
                .with_writer(std::io::stdout)
                .with_timer(SecondPrecisionTimer)
                .with_ansi(true)
                .with_filter(level);
            Registry::default().with(stdout_layer).init();
            info!("Output will be printed to stdout");
        }
    }
}

/// Logs the converged energies and orbital energies per spin and k-point.
pub fn print_scf_summary<S: KptsService>(mf: &KUHF<S>) {
    info!("\nKUHF calculation finished.");
    let scaled = mf.cell.get_scaled_kpts(&mf.kpts);
    for spin in Spin::BOTH {
        let s = spin.index();
        info!("  {} orbital energies:", spin);
        for (k, (e, occ)) in mf.mo_energy[s].iter().zip(&mf.mo_occ[s]).enumerate() {
            let kpt = scaled.get(k).copied().unwrap_or_else(Vector3::zeros);
            let nocc = occ.iter().filter(|&&o| o > 0.0).count();
            info!(
                "    k {:>2} ({:6.3} {:6.3} {:6.3})  nocc = {}  {:?}",
                k,
                kpt.x,
                kpt.y,
                kpt.z,
                nocc,
                e.as_slice()
            );
        }
    }
    let status = if mf.converged { "converged" } else { "not converged" };
    info!("\nTotal energy per cell: {:.10} au ({})", mf.e_tot, status);
}

/// Writes band energies, one line per band k-point, alpha then beta.
pub fn print_band_structure<W: Write>(
    writer: &mut W,
    kpts_band: &[Vector3<f64>],
    bands: &SpinKpts<DVector<f64>>,
) -> std::io::Result<()> {
    for spin in Spin::BOTH {
        writeln!(writer, "# {} bands", spin)?;
        for (kpt, e) in kpts_band.iter().zip(&bands[spin.index()]) {
            write!(writer, "{:10.6} {:10.6} {:10.6}", kpt.x, kpt.y, kpt.z)?;
            for x in e.iter() {
                write!(writer, " {:14.8}", x)?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}
