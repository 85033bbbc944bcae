//! The k-point UHF object

use super::canonicalize::canonicalize;
use super::density::make_rdm1;
use super::diis::Extrapolator;
use super::energy::energy_elec;
use super::fock::{build_fock, get_fock, FockOptions, LevelShift};
use super::guess::{
    init_guess_by_1e, normalize_electron_count, project_chk_density, replicate_guess, InitGuess,
};
use super::occupation::get_occ;
use crate::cell::Cell;
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TracingSink};
use crate::error::{KscfError, Result};
use crate::io::checkpoint::{dump_scf, load_scf};
use crate::linalg::{check_square, trace_product, CMatrix, SpinKpts};
use crate::service::{ExxDiv, JkPair, KptsService};
use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Spin-unrestricted Hartree-Fock with k-point sampling.
///
/// Integrals come from the injected service `S`; diagnostics go to the sink
/// (a [`TracingSink`] unless replaced with [`KUHF::with_sink`]). After
/// [`KUHF::kernel`] the converged orbitals are kept in `mo_energy`,
/// `mo_coeff` and `mo_occ`, indexed `[spin][kpt]`.
pub struct KUHF<S: KptsService> {
    pub cell: Cell,
    pub kpts: Vec<Vector3<f64>>,
    /// Alpha and beta electrons per cell.
    pub nelec: (usize, usize),
    pub exxdiv: ExxDiv,
    pub service: S,
    sink: Arc<dyn DiagnosticsSink>,

    pub max_cycle: usize,
    pub conv_tol: f64,
    /// Defaults to `sqrt(conv_tol)`.
    pub conv_tol_grad: Option<f64>,
    /// DIIS subspace size; 0 disables DIIS.
    pub diis_space: usize,
    pub diis_start_cycle: usize,
    pub level_shift: LevelShift,
    pub damp: f64,
    pub init_guess: String,
    pub chkfile: Option<PathBuf>,

    pub mo_energy: SpinKpts<DVector<f64>>,
    pub mo_coeff: SpinKpts<CMatrix>,
    pub mo_occ: SpinKpts<DVector<f64>>,
    pub e_tot: f64,
    pub converged: bool,
}

impl<S: KptsService> KUHF<S> {
    pub fn new(cell: Cell, kpts: Vec<Vector3<f64>>, service: S) -> Self {
        let nelec = cell.nelec();
        KUHF {
            cell,
            kpts,
            nelec,
            exxdiv: ExxDiv::default(),
            service,
            sink: Arc::new(TracingSink),
            max_cycle: 50,
            conv_tol: 1e-9,
            conv_tol_grad: None,
            diis_space: 8,
            diis_start_cycle: 1,
            level_shift: LevelShift::default(),
            damp: 0.0,
            init_guess: "minao".to_string(),
            chkfile: None,
            mo_energy: [Vec::new(), Vec::new()],
            mo_coeff: [Vec::new(), Vec::new()],
            mo_occ: [Vec::new(), Vec::new()],
            e_tot: 0.0,
            converged: false,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_exxdiv(mut self, exxdiv: ExxDiv) -> Self {
        self.exxdiv = exxdiv;
        self
    }

    pub fn sink(&self) -> &dyn DiagnosticsSink {
        self.sink.as_ref()
    }

    pub fn enable_diis(&mut self, subspace_size: usize) {
        self.diis_space = subspace_size;
        info!("DIIS enabled with subspace size {}", subspace_size);
    }

    pub fn disable_diis(&mut self) {
        self.diis_space = 0;
        info!("DIIS disabled");
    }

    pub fn nkpts(&self) -> usize {
        self.kpts.len()
    }

    pub fn conv_tol_grad(&self) -> f64 {
        self.conv_tol_grad.unwrap_or_else(|| self.conv_tol.sqrt())
    }

    pub fn fock_options(&self) -> FockOptions {
        FockOptions {
            diis_start_cycle: self.diis_start_cycle,
            level_shift: self.level_shift,
            damp: self.damp,
        }
    }

    pub fn dump_flags(&self) {
        info!("******** KUHF flags ********");
        info!("N kpts = {}", self.nkpts());
        for (k, kpt) in self.kpts.iter().enumerate() {
            info!("  {:2}  ({:.8} {:.8} {:.8})", k, kpt.x, kpt.y, kpt.z);
        }
        info!("Exchange divergence treatment (exxdiv) = {}", self.exxdiv);
        info!("max_cycle = {}", self.max_cycle);
        info!("conv_tol = {:e}", self.conv_tol);
        info!("conv_tol_grad = {:e}", self.conv_tol_grad());
        match self.diis_space {
            0 => info!("DIIS = off"),
            n => info!("DIIS = on, diis_space = {}, diis_start_cycle = {}", n, self.diis_start_cycle),
        }
        info!("level_shift = {:?}", self.level_shift);
        info!("damping factor = {}", self.damp);
        if self.fock_options().damping_ignored() {
            self.sink.emit(&Diagnostic::DampingIgnored {
                damp: self.damp,
                diis_start_cycle: self.diis_start_cycle,
            });
        }
        info!("init_guess = {}", self.init_guess);
        if let Some(chk) = &self.chkfile {
            info!("chkfile to save SCF result = {}", chk.display());
        }
        info!("number of electrons per unit cell  alpha = {} beta = {}", self.nelec.0, self.nelec.1);
    }

    pub fn get_hcore(&self) -> Result<Vec<CMatrix>> {
        self.get_hcore_at(&self.kpts)
    }

    pub fn get_hcore_at(&self, kpts: &[Vector3<f64>]) -> Result<Vec<CMatrix>> {
        let h = self.service.get_hcore(&self.cell, kpts)?;
        check_square("get_hcore", &h, self.service.nao())?;
        Ok(h)
    }

    pub fn get_ovlp(&self) -> Result<Vec<CMatrix>> {
        self.get_ovlp_at(&self.kpts)
    }

    pub fn get_ovlp_at(&self, kpts: &[Vector3<f64>]) -> Result<Vec<CMatrix>> {
        let s = self.service.get_ovlp(&self.cell, kpts)?;
        check_square("get_ovlp", &s, self.service.nao())?;
        Ok(s)
    }

    /// Coulomb and exchange potentials of `dm`, at `kpts_band` if given.
    pub fn get_jk(
        &self,
        dm: &SpinKpts<CMatrix>,
        kpts_band: Option<&[Vector3<f64>]>,
    ) -> Result<JkPair> {
        self.service
            .get_jk(&self.cell, dm, &self.kpts, kpts_band, self.exxdiv)
    }

    pub fn get_j(&self, dm: &SpinKpts<CMatrix>) -> Result<SpinKpts<CMatrix>> {
        self.get_jk(dm, None).map(|(vj, _)| vj)
    }

    pub fn get_k(&self, dm: &SpinKpts<CMatrix>) -> Result<SpinKpts<CMatrix>> {
        self.get_jk(dm, None).map(|(_, vk)| vk)
    }

    /// `veff_s = J_alpha + J_beta - K_s` for every k-point.
    pub fn get_veff(
        &self,
        dm: &SpinKpts<CMatrix>,
        kpts_band: Option<&[Vector3<f64>]>,
    ) -> Result<SpinKpts<CMatrix>> {
        let (vj, vk) = self.get_jk(dm, kpts_band)?;
        let nk = vj[0].len();
        if vj[1].len() != nk || vk[0].len() != nk || vk[1].len() != nk {
            return Err(KscfError::shape(
                "get_veff: potential k-points",
                nk,
                format!("vj_b {} / vk_a {} / vk_b {}", vj[1].len(), vk[0].len(), vk[1].len()),
            ));
        }
        let mut veff: SpinKpts<CMatrix> = [Vec::with_capacity(nk), Vec::with_capacity(nk)];
        for s in 0..2 {
            for k in 0..nk {
                veff[s].push(&vj[0][k] + &vj[1][k] - &vk[s][k]);
            }
        }
        Ok(veff)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn get_fock(
        &self,
        h1e: &[CMatrix],
        s1e: &[CMatrix],
        vhf: &SpinKpts<CMatrix>,
        dm: &SpinKpts<CMatrix>,
        cycle: Option<usize>,
        diis: Option<&mut dyn Extrapolator>,
        fock_last: Option<&SpinKpts<CMatrix>>,
    ) -> Result<SpinKpts<CMatrix>> {
        get_fock(h1e, s1e, vhf, dm, cycle, diis, fock_last, &self.fock_options())
    }

    pub fn get_occ(&self, mo_energy: &SpinKpts<DVector<f64>>) -> Result<SpinKpts<DVector<f64>>> {
        let scaled = self.cell.get_scaled_kpts(&self.kpts);
        get_occ(self.nelec, mo_energy, &scaled, self.sink())
    }

    pub fn energy_elec(
        &self,
        dm: &SpinKpts<CMatrix>,
        h1e: &[CMatrix],
        vhf: &SpinKpts<CMatrix>,
    ) -> Result<(f64, f64)> {
        energy_elec(dm, h1e, vhf, self.sink())
    }

    /// Electronic plus nuclear repulsion energy per cell.
    pub fn energy_tot(
        &self,
        dm: &SpinKpts<CMatrix>,
        h1e: &[CMatrix],
        vhf: &SpinKpts<CMatrix>,
    ) -> Result<f64> {
        let (e_elec, _) = self.energy_elec(dm, h1e, vhf)?;
        Ok(e_elec + self.service.energy_nuc(&self.cell))
    }

    /// Density of the stored orbitals.
    pub fn make_rdm1(&self) -> Result<SpinKpts<CMatrix>> {
        make_rdm1(&self.mo_coeff, &self.mo_occ)
    }

    fn fock_of_orbitals(
        &self,
        mo_coeff: &SpinKpts<CMatrix>,
        mo_occ: &SpinKpts<DVector<f64>>,
    ) -> Result<SpinKpts<CMatrix>> {
        let dm = make_rdm1(mo_coeff, mo_occ)?;
        let vhf = self.get_veff(&dm, None)?;
        build_fock(&self.get_hcore()?, &vhf)
    }

    /// Canonical orbitals; without `fock` the Fock matrix is rebuilt from
    /// the density of the given orbitals.
    pub fn canonicalize(
        &self,
        mo_coeff: &SpinKpts<CMatrix>,
        mo_occ: &SpinKpts<DVector<f64>>,
        fock: Option<&SpinKpts<CMatrix>>,
    ) -> Result<(SpinKpts<DVector<f64>>, SpinKpts<CMatrix>)> {
        match fock {
            Some(fock) => canonicalize(mo_coeff, mo_occ, fock),
            None => canonicalize(mo_coeff, mo_occ, &self.fock_of_orbitals(mo_coeff, mo_occ)?),
        }
    }

    /// Orbital gradient: the virtual-occupied blocks `C_vir^H F C_occ`,
    /// flattened row by row, for every alpha k-point followed by every beta
    /// k-point.
    pub fn get_grad(
        &self,
        mo_coeff: &SpinKpts<CMatrix>,
        mo_occ: &SpinKpts<DVector<f64>>,
        fock: Option<&SpinKpts<CMatrix>>,
    ) -> Result<DVector<Complex64>> {
        let rebuilt;
        let fock = match fock {
            Some(fock) => fock,
            None => {
                rebuilt = self.fock_of_orbitals(mo_coeff, mo_occ)?;
                &rebuilt
            }
        };

        let mut grad = Vec::new();
        for s in 0..2 {
            let nk = mo_coeff[s].len();
            if mo_occ[s].len() != nk || fock[s].len() != nk {
                return Err(KscfError::shape(
                    "get_grad: k-points",
                    nk,
                    format!("occ {} / fock {}", mo_occ[s].len(), fock[s].len()),
                ));
            }
            for k in 0..nk {
                let (occidx, viridx): (Vec<usize>, Vec<usize>) =
                    (0..mo_occ[s][k].len()).partition(|&i| mo_occ[s][k][i] > 0.0);
                let c = &mo_coeff[s][k];
                let g = c.select_columns(&viridx).adjoint() * &fock[s][k] * c.select_columns(&occidx);
                for i in 0..g.nrows() {
                    grad.extend(g.row(i).iter().copied());
                }
            }
        }
        Ok(DVector::from_vec(grad))
    }

    /// Solves `F C = S C e` for both spins.
    pub fn eig(
        &self,
        fock: &SpinKpts<CMatrix>,
        s1e: &[CMatrix],
    ) -> Result<(SpinKpts<DVector<f64>>, SpinKpts<CMatrix>)> {
        let (e_a, c_a) = self.service.eig(&fock[0], s1e)?;
        let (e_b, c_b) = self.service.eig(&fock[1], s1e)?;
        Ok(([e_a, e_b], [c_a, c_b]))
    }

    /// Band energies and orbitals at arbitrary k-points from the mean field
    /// of `dm` (the stored density by default).
    pub fn get_bands(
        &self,
        kpts_band: &[Vector3<f64>],
        dm: Option<&SpinKpts<CMatrix>>,
    ) -> Result<(SpinKpts<DVector<f64>>, SpinKpts<CMatrix>)> {
        let stored;
        let dm = match dm {
            Some(dm) => dm,
            None => {
                stored = self.make_rdm1()?;
                &stored
            }
        };
        let h = self.get_hcore_at(kpts_band)?;
        let vhf = self.get_veff(dm, Some(kpts_band))?;
        let fock = build_fock(&h, &vhf)?;
        let s1e = self.get_ovlp_at(kpts_band)?;
        self.eig(&fock, &s1e)
    }

    /// `<S^2>` and the multiplicity `2S + 1` of the determinant built from
    /// the occupied orbitals of all k-points.
    ///
    /// `occupied` holds the occupied orbitals `[alpha, beta]` per k-point;
    /// by default they are taken from the stored solution.
    pub fn spin_square(
        &self,
        occupied: Option<&SpinKpts<CMatrix>>,
        s1e: Option<&[CMatrix]>,
    ) -> Result<(f64, f64)> {
        let stored;
        let mo = match occupied {
            Some(mo) => mo,
            None => {
                let pick = |s: usize| -> Vec<CMatrix> {
                    self.mo_coeff[s]
                        .iter()
                        .zip(&self.mo_occ[s])
                        .map(|(c, occ)| {
                            let idx: Vec<usize> = (0..occ.len()).filter(|&i| occ[i] > 0.0).collect();
                            c.select_columns(&idx)
                        })
                        .collect()
                };
                stored = [pick(0), pick(1)];
                &stored
            }
        };
        let ovlp;
        let s1e = match s1e {
            Some(s) => s,
            None => {
                ovlp = self.get_ovlp()?;
                &ovlp
            }
        };
        if mo[0].len() != s1e.len() || mo[1].len() != s1e.len() {
            return Err(KscfError::shape(
                "spin_square: k-points",
                s1e.len(),
                format!("{} / {}", mo[0].len(), mo[1].len()),
            ));
        }

        let nelec_a: usize = mo[0].iter().map(|c| c.ncols()).sum();
        let nelec_b: usize = mo[1].iter().map(|c| c.ncols()).sum();
        let mut ssxy = (nelec_a + nelec_b) as f64 * 0.5;
        for ((ca, cb), s) in mo[0].iter().zip(&mo[1]).zip(s1e) {
            let sij = ca.adjoint() * s * cb;
            ssxy -= sij.iter().map(|z| z.norm_sqr()).sum::<f64>();
        }
        let ssz = (nelec_b as f64 - nelec_a as f64).powi(2) * 0.25;
        let ss = ssxy + ssz;
        let spin = (ss + 0.25).sqrt() - 0.5;
        Ok((ss, spin * 2.0 + 1.0))
    }

    pub fn init_guess_by_1e(&self) -> Result<[DMatrix<f64>; 2]> {
        init_guess_by_1e(&self.service, &self.cell, self.sink())
    }

    pub fn init_guess_by_atom(&self) -> Result<[DMatrix<f64>; 2]> {
        self.service.init_guess_by_atom(&self.cell)
    }

    pub fn init_guess_by_minao(&self) -> Result<[DMatrix<f64>; 2]> {
        self.service.init_guess_by_minao(&self.cell)
    }

    /// Density at `kpts` (default: this object's k-points) from the
    /// checkpoint `chk` (default: `self.chkfile`).
    pub fn init_guess_by_chkfile(
        &self,
        chk: Option<&Path>,
        project: bool,
        kpts: Option<&[Vector3<f64>]>,
    ) -> Result<SpinKpts<CMatrix>> {
        let chk = chk
            .or(self.chkfile.as_deref())
            .ok_or(KscfError::ChkMissing("chkfile"))?;
        let (chk_cell, record) = load_scf(chk)?;
        let kpts = kpts.unwrap_or(self.kpts.as_slice());
        project_chk_density(&self.service, &chk_cell, record, &self.cell, kpts, project)
    }

    pub fn from_chk(&self) -> Result<SpinKpts<CMatrix>> {
        self.init_guess_by_chkfile(None, true, None)
    }

    /// Initial density for every spin and k-point. `key` overrides
    /// `self.init_guess`.
    pub fn get_init_guess(&self, key: Option<&str>) -> Result<SpinKpts<CMatrix>> {
        let key = key.unwrap_or(self.init_guess.as_str());
        let guess = InitGuess::from_key(key);
        let sink = self.sink();

        let single_cell = match guess {
            InitGuess::OneElectron => Some(self.init_guess_by_1e()?),
            _ if self.cell.natm == 0 => {
                sink.emit(&Diagnostic::NoAtomInCell);
                Some(self.init_guess_by_1e()?)
            }
            InitGuess::Atom => Some(self.init_guess_by_atom()?),
            InitGuess::Chk => None,
            InitGuess::Minao => Some(self.init_guess_by_minao()?),
        };

        let mut dm = match single_cell {
            Some(dm) => replicate_guess(&dm, self.nkpts()),
            None => match self.from_chk() {
                Ok(dm) => dm,
                Err(err) if err.is_checkpoint_error() => {
                    let chkfile = self
                        .chkfile
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    sink.emit(&Diagnostic::ChkFallback {
                        chkfile,
                        reason: err.to_string(),
                    });
                    replicate_guess(&self.init_guess_by_minao()?, self.nkpts())
                }
                Err(err) => return Err(err),
            },
        };

        if self.cell.dimension < 3 {
            let s1e = self.get_ovlp()?;
            normalize_electron_count(&mut dm, &s1e, self.nelec, sink)?;
        }
        Ok(dm)
    }

    /// Writes the current solution to `self.chkfile`, if set.
    pub fn dump_chk(&self) -> Result<()> {
        match &self.chkfile {
            Some(path) => dump_scf(
                path,
                &self.cell,
                self.e_tot,
                &self.kpts,
                &self.mo_energy,
                &self.mo_coeff,
                &self.mo_occ,
            ),
            None => Ok(()),
        }
    }

    /// Runs the SCF iteration from `dm0` or from the configured initial
    /// guess. Returns the total energy.
    pub fn kernel(&mut self, dm0: Option<SpinKpts<CMatrix>>) -> Result<f64> {
        super::driver::kernel(self, dm0)
    }

    /// `tr(D_s S)` averaged over k-points, per spin.
    pub fn electron_count(&self, dm: &SpinKpts<CMatrix>, s1e: &[CMatrix]) -> [f64; 2] {
        let nk = s1e.len().max(1) as f64;
        let count = |s: usize| -> f64 {
            dm[s]
                .iter()
                .zip(s1e)
                .map(|(d, s)| trace_product(d, s).re)
                .sum::<f64>()
                / nk
        };
        [count(0), count(1)]
    }
}
