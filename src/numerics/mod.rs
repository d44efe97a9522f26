pub mod diffusion;
pub mod timing;

use crate::physics::microenvironment::Microenvironment;

pub use diffusion::SolverError;

/// Advances the bulk chemical field by one diffusion step. Swapping the
/// implementation (or disabling transport entirely) is a configuration choice,
/// not a rebuild of the simulation loop.
pub trait DiffusionSolver: Send + Sync {
    /// Advance densities by `dt`, leaving Dirichlet nodes at their held values.
    fn step(&mut self, microenvironment: &mut Microenvironment, dt: f64) -> Result<(), SolverError>;

    /// Discard any cached factorization. Call after out-of-band changes to
    /// transport parameters that the solver cannot observe.
    fn invalidate(&mut self) {}
}

/// Leaves the chemical field static. Dirichlet values are still enforced so a
/// pinned background stays pinned.
pub struct NoDiffusion;

impl DiffusionSolver for NoDiffusion {
    fn step(&mut self, microenvironment: &mut Microenvironment, _dt: f64) -> Result<(), SolverError> {
        microenvironment.apply_dirichlet_conditions();
        Ok(())
    }
}
