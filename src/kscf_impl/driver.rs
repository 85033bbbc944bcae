//! SCF iteration

use super::density::make_rdm1;
use super::diis::{Extrapolator, KDiis};
use super::fock::build_fock;
use super::kuhf::KUHF;
use crate::diagnostics::Diagnostic;
use crate::error::Result;
use crate::linalg::{CMatrix, SpinKpts};
use crate::service::KptsService;
use tracing::{debug, info};

/// Frobenius norm over every spin and k-point block.
fn norm_diff(a: &SpinKpts<CMatrix>, b: &SpinKpts<CMatrix>) -> f64 {
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .map(|(x, y)| (x - y).norm_squared())
        .sum::<f64>()
        .sqrt()
}

/// Iterates `mf` to self-consistency starting from `dm0` (or the configured
/// initial guess).
///
/// Converges when the energy change drops below `conv_tol` and the orbital
/// gradient norm below `conv_tol_grad`. The final orbitals are
/// canonicalized, stored on `mf` and written to its checkpoint file.
pub fn kernel<S: KptsService>(
    mf: &mut KUHF<S>,
    dm0: Option<SpinKpts<CMatrix>>,
) -> Result<f64> {
    mf.dump_flags();
    let conv_tol_grad = mf.conv_tol_grad();

    let mut dm = match dm0 {
        Some(dm) => dm,
        None => mf.get_init_guess(None)?,
    };
    let h1e = mf.get_hcore()?;
    let s1e = mf.get_ovlp()?;
    let mut vhf = mf.get_veff(&dm, None)?;
    let mut e_tot = mf.energy_tot(&dm, &h1e, &vhf)?;
    info!("init E= {:.15}", e_tot);

    let mut diis = (mf.diis_space > 0).then(|| KDiis::new(mf.diis_space));
    let mut fock_last: Option<SpinKpts<CMatrix>> = None;
    let mut converged = false;
    let mut cycles = 0;

    while cycles < mf.max_cycle {
        let cycle = cycles;
        cycles += 1;
        let dm_last = std::mem::replace(&mut dm, [Vec::new(), Vec::new()]);
        let last_e = e_tot;

        let fock = mf.get_fock(
            &h1e,
            &s1e,
            &vhf,
            &dm_last,
            Some(cycle),
            diis.as_mut().map(|d| d as &mut dyn Extrapolator),
            fock_last.as_ref(),
        )?;
        let (mo_energy, mo_coeff) = mf.eig(&fock, &s1e)?;
        let mo_occ = mf.get_occ(&mo_energy)?;
        dm = make_rdm1(&mo_coeff, &mo_occ)?;
        vhf = mf.get_veff(&dm, None)?;
        e_tot = mf.energy_tot(&dm, &h1e, &vhf)?;

        let fock_new = build_fock(&h1e, &vhf)?;
        let norm_gorb = mf.get_grad(&mo_coeff, &mo_occ, Some(&fock_new))?.norm();
        let norm_ddm = norm_diff(&dm, &dm_last);
        let delta_e = e_tot - last_e;
        mf.sink().emit(&Diagnostic::CycleSummary {
            cycle: cycles,
            e_tot,
            delta_e,
            norm_gorb,
            norm_ddm,
        });
        if let Some(d) = &diis {
            debug!("DIIS subspace size {}", d.size());
        }

        mf.mo_energy = mo_energy;
        mf.mo_coeff = mo_coeff;
        mf.mo_occ = mo_occ;
        fock_last = Some(fock);

        if delta_e.abs() < mf.conv_tol && norm_gorb < conv_tol_grad {
            converged = true;
            break;
        }
    }

    if cycles > 0 {
        let fock = build_fock(&h1e, &vhf)?;
        let (mo_energy, mo_coeff) = mf.canonicalize(&mf.mo_coeff, &mf.mo_occ, Some(&fock))?;
        mf.mo_energy = mo_energy;
        mf.mo_coeff = mo_coeff;
    }
    mf.e_tot = e_tot;
    mf.converged = converged;

    if converged {
        mf.sink().emit(&Diagnostic::Converged { cycles, e_tot });
    } else {
        mf.sink().emit(&Diagnostic::NotConverged { cycles, e_tot });
    }
    mf.dump_chk()?;
    Ok(e_tot)
}
