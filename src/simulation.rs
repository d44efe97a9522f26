use std::io;
use std::path::Path;

use glam::DVec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::agents::population::Population;
use crate::agents::AgentId;
use crate::container::grid::CellContainer;
use crate::container::models::SimulationModels;
use crate::container::scheduler::{remove_agent_now, Scheduler};
use crate::container::OutOfDomainPolicy;
use crate::numerics::diffusion::{LodSolver, SolverError};
use crate::numerics::DiffusionSolver;
use crate::physics::microenvironment::{Microenvironment, MicroenvironmentError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSettings {
    pub x: [f64; 2],
    pub y: [f64; 2],
    pub z: [f64; 2],
    /// Diffusion-mesh voxel spacing.
    pub voxel_size: f64,
}

impl Default for DomainSettings {
    fn default() -> Self {
        DomainSettings {
            x: [-500.0, 500.0],
            y: [-500.0, 500.0],
            z: [-500.0, 500.0],
            voxel_size: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub domain: DomainSettings,
    /// Diffusion step, also the base period of the scheduler.
    pub diffusion_dt: f64,
    pub mechanics_dt: f64,
    pub phenotype_dt: f64,
    /// Cell-container bucket spacing; keep at least one maximal interaction
    /// distance.
    pub mechanics_voxel_size: f64,
    pub out_of_domain_policy: OutOfDomainPolicy,
    pub track_internalized: bool,
    pub rng_seed: u64,
    pub output_directory: String,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            domain: DomainSettings::default(),
            diffusion_dt: 0.01,
            mechanics_dt: 0.1,
            phenotype_dt: 6.0,
            mechanics_voxel_size: 30.0,
            out_of_domain_policy: OutOfDomainPolicy::default(),
            track_internalized: false,
            rng_seed: 0,
            output_directory: "output".to_string(),
        }
    }
}

impl SimulationSettings {
    /// Load settings from a JSON file, falling back to defaults when the file
    /// is missing or malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    println!("Loaded simulation settings from {:?}", path.as_ref());
                    settings
                }
                Err(e) => {
                    eprintln!(
                        "Failed to parse {:?}: {}, using defaults",
                        path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                println!(
                    "Settings file {:?} not found, using defaults",
                    path.as_ref()
                );
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Owns the full simulation state and wires the pieces together: chemical
/// field, diffusion solver, agent population, spatial container, models, and
/// the multi-rate scheduler, plus the seeded generator that makes runs
/// reproducible.
pub struct Simulation {
    pub settings: SimulationSettings,
    pub microenvironment: Microenvironment,
    pub solver: Box<dyn DiffusionSolver>,
    pub population: Population,
    pub container: CellContainer,
    pub scheduler: Scheduler,
    pub models: SimulationModels,
    pub rng: ChaCha8Rng,
    pub time: f64,
}

impl Simulation {
    pub fn new(settings: SimulationSettings) -> Self {
        let mut microenvironment = Microenvironment::new();
        let bounds = [
            DVec3::new(
                settings.domain.x[0],
                settings.domain.y[0],
                settings.domain.z[0],
            ),
            DVec3::new(
                settings.domain.x[1],
                settings.domain.y[1],
                settings.domain.z[1],
            ),
        ];
        microenvironment.resize_space_uniform(bounds, settings.domain.voxel_size);

        let mut container =
            CellContainer::for_microenvironment(&microenvironment, settings.mechanics_voxel_size);
        container.policy = settings.out_of_domain_policy;

        let mut population = Population::new();
        population.track_internalized = settings.track_internalized;

        let scheduler = Scheduler::new(
            settings.diffusion_dt,
            settings.mechanics_dt,
            settings.phenotype_dt,
        );
        let rng = ChaCha8Rng::seed_from_u64(settings.rng_seed);

        Simulation {
            settings,
            microenvironment,
            solver: Box::new(LodSolver::new()),
            population,
            container,
            scheduler,
            models: SimulationModels::default(),
            rng,
            time: 0.0,
        }
    }

    /// Register a substrate, keeping the population's pooled rate buffers and
    /// the solver's cached tables in sync.
    pub fn add_substrate(
        &mut self,
        name: &str,
        units: &str,
        diffusion_coefficient: f64,
        decay_rate: f64,
    ) -> Result<usize, MicroenvironmentError> {
        let index = self.microenvironment.add_substrate(
            name,
            units,
            diffusion_coefficient,
            decay_rate,
        )?;
        self.population
            .sync_substrate_count(self.microenvironment.n_substrates());
        self.solver.invalidate();
        Ok(index)
    }

    /// Create an agent at `position`, bucket it in the container, and bind it
    /// to its diffusion voxel.
    pub fn create_agent(&mut self, position: DVec3) -> AgentId {
        let id = self.population.create(position);
        if let Some(agent) = self.population.get_mut(id) {
            let inside = self.container.register(agent);
            if inside {
                agent.voxel_index = Some(
                    self.microenvironment
                        .mesh
                        .nearest_voxel_index(agent.position),
                );
            }
        }
        id
    }

    /// Remove an agent immediately, bypassing the removal queue.
    pub fn remove_agent(&mut self, id: AgentId) -> bool {
        remove_agent_now(
            &mut self.population,
            &mut self.container,
            &mut self.microenvironment,
            id,
        )
    }

    /// One diffusion tick: advance the chemical field, then the agent side,
    /// then the clock.
    pub fn step(&mut self) -> Result<(), SolverError> {
        self.solver
            .step(&mut self.microenvironment, self.scheduler.diffusion_dt)?;
        self.scheduler.update(
            self.time,
            &mut self.population,
            &mut self.container,
            &mut self.microenvironment,
            &self.models,
            &mut self.rng,
        );
        self.time += self.scheduler.diffusion_dt;
        Ok(())
    }

    /// Step until the clock reaches `t_end` (to within half a tick, so float
    /// drift cannot add a spurious extra step), calling `on_step` after every
    /// completed step.
    pub fn run_until<F>(&mut self, t_end: f64, mut on_step: F) -> Result<(), SolverError>
    where
        F: FnMut(&Simulation),
    {
        while self.time < t_end - 0.5 * self.scheduler.diffusion_dt {
            self.step()?;
            on_step(self);
        }
        Ok(())
    }

    pub fn display_information(&self) {
        println!(
            "=== Simulation state at t = {:.4} {} ===",
            self.time, self.microenvironment.time_units
        );
        self.microenvironment.display_information();
        self.container.display_information();
        println!("  agents: {}", self.population.len());
        println!(
            "  dt: diffusion {}, mechanics {}, phenotype {} {}",
            self.scheduler.diffusion_dt,
            self.scheduler.mechanics_dt,
            self.scheduler.phenotype_dt,
            self.microenvironment.time_units
        );
    }
}
