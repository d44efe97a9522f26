use nalgebra::DVector;
use rayon::prelude::*;
use thiserror::Error;

use crate::numerics::timing::{record_dirichlet, record_sweep};
use crate::numerics::DiffusionSolver;
use crate::physics::microenvironment::Microenvironment;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("implicit LOD sweeps require constant voxel spacing per axis")]
    IrregularMesh,
}

/// Implicit diffusion-decay stepper using locally one-dimensional operator
/// splitting: one backward-Euler tridiagonal solve per axis and substrate,
/// with the decay term divided evenly across the swept axes. Unconditionally
/// stable, first-order in time.
///
/// Forward-elimination tables depend only on `dt`, the mesh, and the transport
/// parameters; they are rebuilt automatically whenever any of those change.
pub struct LodSolver {
    pub verbose: bool,
    constant1_x: DVector<f64>,
    constant1_y: DVector<f64>,
    constant1_z: DVector<f64>,
    denom_x: Vec<DVector<f64>>,
    denom_y: Vec<DVector<f64>>,
    denom_z: Vec<DVector<f64>>,
    elim_x: Vec<DVector<f64>>,
    elim_y: Vec<DVector<f64>>,
    elim_z: Vec<DVector<f64>>,
    setup: Option<SolverSetup>,
}

struct SolverSetup {
    dt: f64,
    nodes: [usize; 3],
    spacing: [f64; 3],
    diffusion: DVector<f64>,
    decay: DVector<f64>,
}

impl Default for LodSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LodSolver {
    pub fn new() -> Self {
        LodSolver {
            verbose: true,
            constant1_x: DVector::zeros(0),
            constant1_y: DVector::zeros(0),
            constant1_z: DVector::zeros(0),
            denom_x: Vec::new(),
            denom_y: Vec::new(),
            denom_z: Vec::new(),
            elim_x: Vec::new(),
            elim_y: Vec::new(),
            elim_z: Vec::new(),
            setup: None,
        }
    }

    /// Number of axes that get a tridiagonal sweep. Degenerate axes with a
    /// single node are skipped, which also removes their decay share.
    fn active_axes(m: &Microenvironment) -> usize {
        1 + usize::from(m.mesh.y_nodes() > 1) + usize::from(m.mesh.z_nodes() > 1)
    }

    /// Rebuild the forward-elimination tables for the given microenvironment
    /// and step size.
    pub fn prepare(&mut self, m: &Microenvironment, dt: f64) {
        let axes = Self::active_axes(m) as f64;
        let decay_share = &m.decay_rates * (dt / axes);
        let mesh = &m.mesh;

        self.constant1_x = &m.diffusion_coefficients * (dt / (mesh.dx * mesh.dx));
        let (denom, elim) = build_axis_tables(mesh.x_nodes(), &self.constant1_x, &decay_share);
        self.denom_x = denom;
        self.elim_x = elim;

        if mesh.y_nodes() > 1 {
            self.constant1_y = &m.diffusion_coefficients * (dt / (mesh.dy * mesh.dy));
            let (denom, elim) = build_axis_tables(mesh.y_nodes(), &self.constant1_y, &decay_share);
            self.denom_y = denom;
            self.elim_y = elim;
        } else {
            self.denom_y.clear();
            self.elim_y.clear();
        }

        if mesh.z_nodes() > 1 {
            self.constant1_z = &m.diffusion_coefficients * (dt / (mesh.dz * mesh.dz));
            let (denom, elim) = build_axis_tables(mesh.z_nodes(), &self.constant1_z, &decay_share);
            self.denom_z = denom;
            self.elim_z = elim;
        } else {
            self.denom_z.clear();
            self.elim_z.clear();
        }

        self.setup = Some(SolverSetup {
            dt,
            nodes: [mesh.x_nodes(), mesh.y_nodes(), mesh.z_nodes()],
            spacing: [mesh.dx, mesh.dy, mesh.dz],
            diffusion: m.diffusion_coefficients.clone(),
            decay: m.decay_rates.clone(),
        });

        if self.verbose {
            println!(
                "LOD diffusion solver prepared: {} sweep axes, {} substrates, dt = {:.4e} {}",
                axes as usize,
                m.n_substrates(),
                dt,
                m.time_units
            );
        }
    }

    pub fn invalidate(&mut self) {
        self.setup = None;
    }

    fn is_current(&self, m: &Microenvironment, dt: f64) -> bool {
        match &self.setup {
            Some(setup) => {
                setup.dt == dt
                    && setup.nodes == [m.mesh.x_nodes(), m.mesh.y_nodes(), m.mesh.z_nodes()]
                    && setup.spacing == [m.mesh.dx, m.mesh.dy, m.mesh.dz]
                    && setup.diffusion == m.diffusion_coefficients
                    && setup.decay == m.decay_rates
            }
            None => false,
        }
    }

    /// One operator-split step. Dirichlet values are enforced before every
    /// sweep and once more after the last, so held voxels feed boundary data
    /// into each directional solve and end the step exactly at their values.
    pub fn step(&mut self, m: &mut Microenvironment, dt: f64) -> Result<(), SolverError> {
        if !m.mesh.regular {
            return Err(SolverError::IrregularMesh);
        }
        if m.n_substrates() == 0 || m.n_voxels() == 0 {
            return Ok(());
        }
        if !self.is_current(m, dt) {
            self.prepare(m, dt);
        }

        record_dirichlet(|| m.apply_dirichlet_conditions());
        record_sweep(|| self.sweep_x(m));
        record_dirichlet(|| m.apply_dirichlet_conditions());
        if m.mesh.y_nodes() > 1 {
            record_sweep(|| self.sweep_y(m));
            record_dirichlet(|| m.apply_dirichlet_conditions());
        }
        if m.mesh.z_nodes() > 1 {
            record_sweep(|| self.sweep_z(m));
            record_dirichlet(|| m.apply_dirichlet_conditions());
        }
        m.invalidate_gradients();
        Ok(())
    }

    // x-lines are contiguous in the voxel-major layout, so this sweep runs in
    // place, one rayon task per line.
    fn sweep_x(&self, m: &mut Microenvironment) {
        let s = m.n_substrates();
        let nx = m.mesh.x_nodes();
        let constant1 = &self.constant1_x;
        let denom = &self.denom_x;
        let elim = &self.elim_x;
        m.densities
            .par_chunks_mut(nx * s)
            .for_each(|line| solve_tridiagonal_line(line, s, nx, constant1, denom, elim));
    }

    // y- and z-lines are strided, so each line is gathered into the scratch
    // buffer, solved contiguously, and scattered back. Both passes write
    // disjoint chunks and read the other buffer freely.
    fn sweep_y(&self, m: &mut Microenvironment) {
        let s = m.n_substrates();
        let (nx, ny) = (m.mesh.x_nodes(), m.mesh.y_nodes());
        let constant1 = &self.constant1_y;
        let denom = &self.denom_y;
        let elim = &self.elim_y;
        let Microenvironment {
            densities, scratch, ..
        } = m;

        {
            let densities: &[f64] = densities;
            scratch
                .par_chunks_mut(ny * s)
                .enumerate()
                .for_each(|(line_id, line)| {
                    let k = line_id / nx;
                    let i = line_id % nx;
                    for j in 0..ny {
                        let src = ((k * ny + j) * nx + i) * s;
                        line[j * s..(j + 1) * s].copy_from_slice(&densities[src..src + s]);
                    }
                    solve_tridiagonal_line(line, s, ny, constant1, denom, elim);
                });
        }
        {
            let scratch: &[f64] = scratch;
            densities
                .par_chunks_mut(nx * s)
                .enumerate()
                .for_each(|(row_id, row)| {
                    let k = row_id / ny;
                    let j = row_id % ny;
                    for i in 0..nx {
                        let src = ((k * nx + i) * ny + j) * s;
                        row[i * s..(i + 1) * s].copy_from_slice(&scratch[src..src + s]);
                    }
                });
        }
    }

    fn sweep_z(&self, m: &mut Microenvironment) {
        let s = m.n_substrates();
        let (nx, ny, nz) = (m.mesh.x_nodes(), m.mesh.y_nodes(), m.mesh.z_nodes());
        let constant1 = &self.constant1_z;
        let denom = &self.denom_z;
        let elim = &self.elim_z;
        let Microenvironment {
            densities, scratch, ..
        } = m;

        {
            let densities: &[f64] = densities;
            scratch
                .par_chunks_mut(nz * s)
                .enumerate()
                .for_each(|(line_id, line)| {
                    let j = line_id / nx;
                    let i = line_id % nx;
                    for k in 0..nz {
                        let src = ((k * ny + j) * nx + i) * s;
                        line[k * s..(k + 1) * s].copy_from_slice(&densities[src..src + s]);
                    }
                    solve_tridiagonal_line(line, s, nz, constant1, denom, elim);
                });
        }
        {
            let scratch: &[f64] = scratch;
            densities
                .par_chunks_mut(nx * s)
                .enumerate()
                .for_each(|(row_id, row)| {
                    let k = row_id / ny;
                    let j = row_id % ny;
                    for i in 0..nx {
                        let src = ((j * nx + i) * nz + k) * s;
                        row[i * s..(i + 1) * s].copy_from_slice(&scratch[src..src + s]);
                    }
                });
        }
    }
}

impl DiffusionSolver for LodSolver {
    fn step(&mut self, microenvironment: &mut Microenvironment, dt: f64) -> Result<(), SolverError> {
        LodSolver::step(self, microenvironment, dt)
    }

    fn invalidate(&mut self) {
        LodSolver::invalidate(self);
    }
}

/// Precompute the Thomas-algorithm denominators and elimination coefficients
/// for one axis. With no-flux faces the first and last diagonal entries drop
/// one off-diagonal coupling; a single-node axis degenerates to the bare
/// decay division.
fn build_axis_tables(
    nodes: usize,
    constant1: &DVector<f64>,
    decay_share: &DVector<f64>,
) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
    let s = constant1.len();
    let ones = DVector::from_element(s, 1.0);
    let interior = &ones + &(constant1 * 2.0) + decay_share;
    let face = &ones + constant1 + decay_share;

    let mut denominators = vec![interior; nodes];
    denominators[0] = face.clone();
    denominators[nodes - 1] = face;
    if nodes == 1 {
        denominators[0] = &ones + decay_share;
    }

    let mut eliminators = vec![constant1 * -1.0; nodes];
    let head = eliminators[0].component_div(&denominators[0]);
    eliminators[0] = head;
    for i in 1..nodes {
        let carry = constant1.component_mul(&eliminators[i - 1]);
        denominators[i] += carry;
        let scaled = eliminators[i].component_div(&denominators[i]);
        eliminators[i] = scaled;
    }
    (denominators, eliminators)
}

/// Forward-eliminate and back-substitute one line of `nodes` voxels with `s`
/// interleaved substrates.
fn solve_tridiagonal_line(
    line: &mut [f64],
    s: usize,
    nodes: usize,
    constant1: &DVector<f64>,
    denominators: &[DVector<f64>],
    eliminators: &[DVector<f64>],
) {
    for q in 0..s {
        line[q] /= denominators[0][q];
    }
    for i in 1..nodes {
        let base = i * s;
        for q in 0..s {
            let carried = constant1[q] * line[base - s + q];
            line[base + q] = (line[base + q] + carried) / denominators[i][q];
        }
    }
    for i in (0..nodes.saturating_sub(1)).rev() {
        let base = i * s;
        for q in 0..s {
            line[base + q] -= eliminators[i][q] * line[base + s + q];
        }
    }
}
