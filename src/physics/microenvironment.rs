use glam::DVec3;
use nalgebra::DVector;
use rayon::prelude::*;
use thiserror::Error;

use crate::discretization::mesh::CartesianMesh;

#[derive(Debug, Error)]
pub enum MicroenvironmentError {
    #[error("substrate '{0}' is already registered")]
    DuplicateSubstrate(String),
    #[error("no substrate with index {0}")]
    UnknownSubstrate(usize),
    #[error("no voxel with index {0}")]
    InvalidVoxel(usize),
    #[error("expected {expected} substrate values, got {got}")]
    SizeMismatch { expected: usize, got: usize },
}

/// The chemical state of the domain: a voxel mesh plus one density value per
/// voxel and substrate, stored voxel-major so each voxel's substrate vector is
/// one contiguous slice.
pub struct Microenvironment {
    pub name: String,
    pub spatial_units: String,
    pub time_units: String,
    pub mesh: CartesianMesh,

    pub substrate_names: Vec<String>,
    pub substrate_units: Vec<String>,
    /// Diffusion coefficient per substrate, units of length^2 / time.
    pub diffusion_coefficients: DVector<f64>,
    /// First-order decay rate per substrate, units of 1 / time.
    pub decay_rates: DVector<f64>,

    /// Densities, `n_voxels * n_substrates` entries, voxel-major.
    pub densities: Vec<f64>,
    /// Same shape as `densities`; working storage for the directional sweeps.
    pub(crate) scratch: Vec<f64>,

    /// Boundary value per voxel and substrate, applied where the voxel is
    /// flagged Dirichlet and the per-substrate activation is on.
    pub dirichlet_values: Vec<f64>,
    pub dirichlet_activation: Vec<bool>,
    /// Activation template copied into new Dirichlet nodes.
    pub default_dirichlet_activation: Vec<bool>,

    // Central-difference gradients, 3 components per voxel and substrate,
    // recomputed lazily after the computed flags are cleared.
    gradients: Vec<f64>,
    gradient_computed: Vec<bool>,
}

impl Default for Microenvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Microenvironment {
    /// An empty microenvironment over the default single-voxel mesh. Register
    /// substrates with [`add_substrate`] and size the domain with one of the
    /// `resize_space` methods.
    ///
    /// [`add_substrate`]: Microenvironment::add_substrate
    pub fn new() -> Self {
        let mut m = Microenvironment {
            name: "microenvironment".to_string(),
            spatial_units: "micron".to_string(),
            time_units: "min".to_string(),
            mesh: CartesianMesh::new(),
            substrate_names: Vec::new(),
            substrate_units: Vec::new(),
            diffusion_coefficients: DVector::zeros(0),
            decay_rates: DVector::zeros(0),
            densities: Vec::new(),
            scratch: Vec::new(),
            dirichlet_values: Vec::new(),
            dirichlet_activation: Vec::new(),
            default_dirichlet_activation: Vec::new(),
            gradients: Vec::new(),
            gradient_computed: Vec::new(),
        };
        m.reshape_storage();
        m
    }

    pub fn n_substrates(&self) -> usize {
        self.substrate_names.len()
    }

    pub fn n_voxels(&self) -> usize {
        self.mesh.n_voxels()
    }

    /// Register a new substrate and extend every per-voxel vector for it. New
    /// densities start at zero; the Dirichlet activation template defaults to
    /// active. Returns the substrate index.
    pub fn add_substrate(
        &mut self,
        name: &str,
        units: &str,
        diffusion_coefficient: f64,
        decay_rate: f64,
    ) -> Result<usize, MicroenvironmentError> {
        if self.substrate_names.iter().any(|n| n == name) {
            return Err(MicroenvironmentError::DuplicateSubstrate(name.to_string()));
        }
        let index = self.substrate_names.len();
        self.substrate_names.push(name.to_string());
        self.substrate_units.push(units.to_string());
        self.diffusion_coefficients = self
            .diffusion_coefficients
            .clone()
            .resize_vertically(index + 1, diffusion_coefficient);
        self.decay_rates = self
            .decay_rates
            .clone()
            .resize_vertically(index + 1, decay_rate);
        self.default_dirichlet_activation.push(true);

        let old = index;
        let n = self.n_voxels();
        grow_rows(&mut self.densities, old, n, 0.0);
        grow_rows(&mut self.scratch, old, n, 0.0);
        grow_rows(&mut self.dirichlet_values, old, n, 0.0);
        grow_rows(&mut self.dirichlet_activation, old, n, true);
        grow_gradient_rows(&mut self.gradients, old, n);
        self.gradient_computed.iter_mut().for_each(|c| *c = false);
        Ok(index)
    }

    pub fn rename_substrate(
        &mut self,
        index: usize,
        name: &str,
        units: &str,
    ) -> Result<(), MicroenvironmentError> {
        if index >= self.n_substrates() {
            return Err(MicroenvironmentError::UnknownSubstrate(index));
        }
        self.substrate_names[index] = name.to_string();
        self.substrate_units[index] = units.to_string();
        Ok(())
    }

    /// Index of the substrate registered under `name`, if any.
    pub fn find_substrate(&self, name: &str) -> Option<usize> {
        self.substrate_names.iter().position(|n| n == name)
    }

    /// Rebuild the mesh over `bounds` with explicit node counts. All per-voxel
    /// state is reset: densities and boundary data do not survive a resize.
    pub fn resize_space(&mut self, bounds: [DVec3; 2], nodes: [usize; 3]) {
        self.mesh.resize(bounds, nodes);
        self.reshape_storage();
    }

    /// Rebuild the mesh with a uniform target voxel spacing.
    pub fn resize_space_uniform(&mut self, bounds: [DVec3; 2], spacing: f64) {
        self.mesh.resize_uniform(bounds, spacing);
        self.reshape_storage();
    }

    /// Swap in an externally built mesh, resetting all per-voxel state.
    pub fn use_mesh(&mut self, mesh: CartesianMesh) {
        self.mesh = mesh;
        self.reshape_storage();
    }

    fn reshape_storage(&mut self) {
        let s = self.n_substrates();
        let n = self.n_voxels();
        self.densities = vec![0.0; n * s];
        self.scratch = vec![0.0; n * s];
        self.dirichlet_values = vec![0.0; n * s];
        self.dirichlet_activation = {
            let mut activation = Vec::with_capacity(n * s);
            for _ in 0..n {
                activation.extend_from_slice(&self.default_dirichlet_activation);
            }
            activation
        };
        self.gradients = vec![0.0; n * s * 3];
        self.gradient_computed = vec![false; n];
    }

    /// Substrate densities of voxel `n`.
    pub fn density(&self, n: usize) -> &[f64] {
        let s = self.n_substrates();
        &self.densities[n * s..(n + 1) * s]
    }

    pub fn density_mut(&mut self, n: usize) -> &mut [f64] {
        let s = self.n_substrates();
        &mut self.densities[n * s..(n + 1) * s]
    }

    /// Densities of the voxel at Cartesian indices `(i, j, k)`.
    pub fn density_at(&self, i: usize, j: usize, k: usize) -> &[f64] {
        self.density(self.mesh.voxel_index(i, j, k))
    }

    /// Densities of the voxel nearest to `position`.
    pub fn density_near(&self, position: DVec3) -> &[f64] {
        self.density(self.mesh.nearest_voxel_index(position))
    }

    /// Set one substrate to `value` in every voxel.
    pub fn set_uniform(&mut self, substrate: usize, value: f64) -> Result<(), MicroenvironmentError> {
        let s = self.n_substrates();
        if substrate >= s {
            return Err(MicroenvironmentError::UnknownSubstrate(substrate));
        }
        for n in 0..self.n_voxels() {
            self.densities[n * s + substrate] = value;
        }
        self.invalidate_gradients();
        Ok(())
    }

    /// Flag voxel `voxel` as a Dirichlet node holding `values`, one entry per
    /// substrate. The per-substrate activation is seeded from the default
    /// activation template.
    pub fn add_dirichlet_node(
        &mut self,
        voxel: usize,
        values: &[f64],
    ) -> Result<(), MicroenvironmentError> {
        let s = self.n_substrates();
        if voxel >= self.n_voxels() {
            return Err(MicroenvironmentError::InvalidVoxel(voxel));
        }
        if values.len() != s {
            return Err(MicroenvironmentError::SizeMismatch {
                expected: s,
                got: values.len(),
            });
        }
        self.mesh.voxels[voxel].is_dirichlet = true;
        self.dirichlet_values[voxel * s..(voxel + 1) * s].copy_from_slice(values);
        self.dirichlet_activation[voxel * s..(voxel + 1) * s]
            .copy_from_slice(&self.default_dirichlet_activation);
        Ok(())
    }

    /// Replace the held values of an existing Dirichlet node.
    pub fn update_dirichlet_node(
        &mut self,
        voxel: usize,
        values: &[f64],
    ) -> Result<(), MicroenvironmentError> {
        let s = self.n_substrates();
        if voxel >= self.n_voxels() {
            return Err(MicroenvironmentError::InvalidVoxel(voxel));
        }
        if values.len() != s {
            return Err(MicroenvironmentError::SizeMismatch {
                expected: s,
                got: values.len(),
            });
        }
        self.dirichlet_values[voxel * s..(voxel + 1) * s].copy_from_slice(values);
        Ok(())
    }

    /// Update the held value of a single substrate at a Dirichlet node.
    pub fn update_dirichlet_value(
        &mut self,
        voxel: usize,
        substrate: usize,
        value: f64,
    ) -> Result<(), MicroenvironmentError> {
        if voxel >= self.n_voxels() {
            return Err(MicroenvironmentError::InvalidVoxel(voxel));
        }
        if substrate >= self.n_substrates() {
            return Err(MicroenvironmentError::UnknownSubstrate(substrate));
        }
        let s = self.n_substrates();
        self.dirichlet_values[voxel * s + substrate] = value;
        Ok(())
    }

    /// Clear the Dirichlet flag of `voxel`. Held values and activation are
    /// kept so the node can be re-enabled later.
    pub fn remove_dirichlet_node(&mut self, voxel: usize) -> Result<(), MicroenvironmentError> {
        if voxel >= self.n_voxels() {
            return Err(MicroenvironmentError::InvalidVoxel(voxel));
        }
        self.mesh.voxels[voxel].is_dirichlet = false;
        Ok(())
    }

    /// Toggle Dirichlet enforcement of one substrate everywhere, updating both
    /// the default template and every existing per-voxel activation entry.
    pub fn set_substrate_dirichlet_activation(
        &mut self,
        substrate: usize,
        active: bool,
    ) -> Result<(), MicroenvironmentError> {
        let s = self.n_substrates();
        if substrate >= s {
            return Err(MicroenvironmentError::UnknownSubstrate(substrate));
        }
        self.default_dirichlet_activation[substrate] = active;
        for n in 0..self.n_voxels() {
            self.dirichlet_activation[n * s + substrate] = active;
        }
        Ok(())
    }

    /// Toggle Dirichlet enforcement of one substrate at one voxel.
    pub fn set_voxel_dirichlet_activation(
        &mut self,
        voxel: usize,
        substrate: usize,
        active: bool,
    ) -> Result<(), MicroenvironmentError> {
        if voxel >= self.n_voxels() {
            return Err(MicroenvironmentError::InvalidVoxel(voxel));
        }
        if substrate >= self.n_substrates() {
            return Err(MicroenvironmentError::UnknownSubstrate(substrate));
        }
        let s = self.n_substrates();
        self.dirichlet_activation[voxel * s + substrate] = active;
        Ok(())
    }

    /// Overwrite densities with the held boundary values at every Dirichlet
    /// node whose per-substrate activation is on.
    pub fn apply_dirichlet_conditions(&mut self) {
        let s = self.n_substrates();
        if s == 0 {
            return;
        }
        let voxels = &self.mesh.voxels;
        let values = &self.dirichlet_values;
        let activation = &self.dirichlet_activation;
        self.densities
            .par_chunks_mut(s)
            .enumerate()
            .filter(|(n, _)| voxels[*n].is_dirichlet)
            .for_each(|(n, density)| {
                let base = n * s;
                for q in 0..s {
                    if activation[base + q] {
                        density[q] = values[base + q];
                    }
                }
            });
    }

    /// Gradient of voxel `n`: `n_substrates` groups of three components. Zero
    /// (and flagged stale) until computed; boundary components stay zero.
    pub fn gradient(&self, n: usize) -> &[f64] {
        let stride = self.n_substrates() * 3;
        &self.gradients[n * stride..(n + 1) * stride]
    }

    /// Gradient of voxel `n`, computing it first if stale.
    pub fn gradient_vector(&mut self, n: usize) -> &[f64] {
        if !self.gradient_computed[n] {
            self.compute_gradient_vector(n);
        }
        self.gradient(n)
    }

    /// Second-order central differences on the interior; components on domain
    /// faces are left at zero.
    pub fn compute_gradient_vector(&mut self, n: usize) {
        let s = self.n_substrates();
        let stride = s * 3;
        let [i, j, k] = self.mesh.cartesian_indices(n);
        let (nx, ny, nz) = (self.mesh.x_nodes(), self.mesh.y_nodes(), self.mesh.z_nodes());
        let (jj, kk) = (self.mesh.j_jump(), self.mesh.k_jump());
        let spans = [
            (i, nx, 1, 2.0 * self.mesh.dx),
            (j, ny, jj, 2.0 * self.mesh.dy),
            (k, nz, kk, 2.0 * self.mesh.dz),
        ];
        for (axis, (idx, count, jump, span)) in spans.into_iter().enumerate() {
            for q in 0..s {
                let g = if idx > 0 && idx + 1 < count {
                    let ahead = self.densities[(n + jump) * s + q];
                    let behind = self.densities[(n - jump) * s + q];
                    (ahead - behind) / span
                } else {
                    0.0
                };
                self.gradients[n * stride + q * 3 + axis] = g;
            }
        }
        self.gradient_computed[n] = true;
    }

    /// Recompute the gradient of every voxel in parallel.
    pub fn compute_all_gradient_vectors(&mut self) {
        let s = self.n_substrates();
        if s == 0 || self.n_voxels() == 0 {
            return;
        }
        let stride = s * 3;
        let (nx, ny, nz) = (self.mesh.x_nodes(), self.mesh.y_nodes(), self.mesh.z_nodes());
        let (jj, kk) = (self.mesh.j_jump(), self.mesh.k_jump());
        let spans = [2.0 * self.mesh.dx, 2.0 * self.mesh.dy, 2.0 * self.mesh.dz];
        let densities: &[f64] = &self.densities;
        self.gradients
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(n, gradient)| {
                let i = n % nx;
                let j = (n / nx) % ny;
                let k = n / (nx * ny);
                let axes = [
                    (i, nx, 1usize, spans[0]),
                    (j, ny, jj, spans[1]),
                    (k, nz, kk, spans[2]),
                ];
                for (axis, (idx, count, jump, span)) in axes.into_iter().enumerate() {
                    for q in 0..s {
                        gradient[q * 3 + axis] = if idx > 0 && idx + 1 < count {
                            let ahead = densities[(n + jump) * s + q];
                            let behind = densities[(n - jump) * s + q];
                            (ahead - behind) / span
                        } else {
                            0.0
                        };
                    }
                }
            });
        self.gradient_computed.iter_mut().for_each(|c| *c = true);
    }

    /// Mark every stored gradient stale. Called after any bulk density update.
    pub fn invalidate_gradients(&mut self) {
        self.gradient_computed.iter_mut().for_each(|c| *c = false);
    }

    pub fn display_information(&self) {
        println!("Microenvironment summary: {}", self.name);
        self.mesh.display_information();
        println!("  substrates: {}", self.n_substrates());
        for q in 0..self.n_substrates() {
            println!(
                "    {}: D = {:.6e} {}^2/{}, lambda = {:.6e} 1/{}",
                self.substrate_names[q],
                self.diffusion_coefficients[q],
                self.spatial_units,
                self.time_units,
                self.decay_rates[q],
                self.time_units
            );
        }
        let dirichlet = self
            .mesh
            .voxels
            .iter()
            .filter(|v| v.is_dirichlet)
            .count();
        println!("  Dirichlet nodes: {}", dirichlet);
    }
}

fn grow_rows<T: Copy>(buffer: &mut Vec<T>, old_width: usize, rows: usize, fill: T) {
    let new_width = old_width + 1;
    let mut out = Vec::with_capacity(rows * new_width);
    for r in 0..rows {
        out.extend_from_slice(&buffer[r * old_width..(r + 1) * old_width]);
        out.push(fill);
    }
    *buffer = out;
}

fn grow_gradient_rows(buffer: &mut Vec<f64>, old_width: usize, rows: usize) {
    let old_stride = old_width * 3;
    let mut out = vec![0.0; rows * (old_stride + 3)];
    for r in 0..rows {
        out[r * (old_stride + 3)..r * (old_stride + 3) + old_stride]
            .copy_from_slice(&buffer[r * old_stride..(r + 1) * old_stride]);
    }
    *buffer = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_substrate_box() -> Microenvironment {
        let mut m = Microenvironment::new();
        m.resize_space([DVec3::ZERO, DVec3::splat(40.0)], [4, 4, 4]);
        m.add_substrate("oxygen", "mmHg", 1.0e5, 0.1).unwrap();
        m.add_substrate("glucose", "mM", 5.0e4, 0.005).unwrap();
        m
    }

    #[test]
    fn duplicate_substrate_names_are_rejected() {
        let mut m = Microenvironment::new();
        m.add_substrate("oxygen", "mmHg", 1.0e5, 0.1).unwrap();
        let err = m.add_substrate("oxygen", "mmHg", 1.0, 0.0).unwrap_err();
        assert!(matches!(err, MicroenvironmentError::DuplicateSubstrate(_)));
        assert_eq!(m.n_substrates(), 1);
    }

    #[test]
    fn adding_a_substrate_preserves_existing_densities() {
        let mut m = Microenvironment::new();
        m.resize_space([DVec3::ZERO, DVec3::splat(30.0)], [3, 1, 1]);
        m.add_substrate("oxygen", "mmHg", 1.0e5, 0.1).unwrap();
        m.density_mut(1)[0] = 38.0;
        m.add_substrate("glucose", "mM", 5.0e4, 0.005).unwrap();
        assert_eq!(m.density(1), &[38.0, 0.0]);
    }

    #[test]
    fn dirichlet_application_respects_per_substrate_activation() {
        let mut m = two_substrate_box();
        m.set_substrate_dirichlet_activation(1, false).unwrap();
        m.add_dirichlet_node(0, &[38.0, 1.0]).unwrap();
        m.density_mut(0).copy_from_slice(&[5.0, 5.0]);
        m.apply_dirichlet_conditions();
        assert_eq!(m.density(0), &[38.0, 5.0]);

        m.set_voxel_dirichlet_activation(0, 1, true).unwrap();
        m.apply_dirichlet_conditions();
        assert_eq!(m.density(0), &[38.0, 1.0]);
    }

    #[test]
    fn mismatched_dirichlet_vectors_are_rejected() {
        let mut m = two_substrate_box();
        let err = m.add_dirichlet_node(0, &[38.0]).unwrap_err();
        assert!(matches!(
            err,
            MicroenvironmentError::SizeMismatch { expected: 2, got: 1 }
        ));
        assert!(!m.mesh.voxels[0].is_dirichlet);
    }

    #[test]
    fn gradients_are_central_differences_on_the_interior() {
        let mut m = Microenvironment::new();
        m.resize_space([DVec3::ZERO, DVec3::new(50.0, 10.0, 10.0)], [5, 1, 1]);
        m.add_substrate("oxygen", "mmHg", 1.0e5, 0.0).unwrap();
        for i in 0..5 {
            m.density_mut(i)[0] = 3.0 * i as f64;
        }
        let g = m.gradient_vector(2).to_vec();
        // dx = 10, so d(rho)/dx = 3 / 10.
        assert!((g[0] - 0.3).abs() < 1e-12);
        assert_eq!(g[1], 0.0);
        assert_eq!(g[2], 0.0);
        // Face voxel keeps a zero x-component.
        let g0 = m.gradient_vector(0).to_vec();
        assert_eq!(g0[0], 0.0);
    }
}
