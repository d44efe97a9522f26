use glam::DVec3;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::agents::population::Population;
use crate::agents::AgentId;
use crate::container::grid::CellContainer;
use crate::container::models::{ModelContext, SimulationModels};
use crate::physics::microenvironment::Microenvironment;

/// Multi-rate driver for the agent side of a step. Secretion and
/// intracellular updates run every diffusion tick; phenotype and mechanics
/// fire when their periods have elapsed, within half a diffusion tick of
/// tolerance so accumulated floating-point drift in the simulation clock
/// never skips a tick.
pub struct Scheduler {
    pub diffusion_dt: f64,
    pub mechanics_dt: f64,
    pub phenotype_dt: f64,
    last_mechanics_time: f64,
    last_phenotype_time: f64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(0.01, 0.1, 6.0)
    }
}

impl Scheduler {
    pub fn new(diffusion_dt: f64, mechanics_dt: f64, phenotype_dt: f64) -> Self {
        Scheduler {
            diffusion_dt,
            mechanics_dt,
            phenotype_dt,
            last_mechanics_time: 0.0,
            last_phenotype_time: 0.0,
        }
    }

    /// One agent-side update at simulation time `time`, in fixed order:
    /// secretion exchange, intracellular updates, then the phenotype tick
    /// (with its division/removal flushes) and the mechanics tick when due.
    /// Division and removal queues raised during a tick are always flushed
    /// before this returns.
    pub fn update(
        &mut self,
        time: f64,
        population: &mut Population,
        container: &mut CellContainer,
        m: &mut Microenvironment,
        models: &SimulationModels,
        rng: &mut ChaCha8Rng,
    ) {
        population.simulate_secretion_and_uptake(m, self.diffusion_dt);

        if let Some(intracellular) = &models.intracellular {
            let dt = self.diffusion_dt;
            let m_ref: &Microenvironment = m;
            population.par_for_each_mut(|agent, rates| {
                if agent.is_active
                    && !agent.is_out_of_domain
                    && intracellular.needs_update(agent, time)
                {
                    intracellular.advance(agent, rates, m_ref, dt);
                }
            });
        }

        let tolerance = 0.5 * self.diffusion_dt;

        if time - self.last_phenotype_time >= self.phenotype_dt - tolerance {
            if let Some(phenotype) = &models.phenotype {
                let dt = self.phenotype_dt;
                let m_ref: &Microenvironment = m;
                population.par_for_each_mut(|agent, rates| {
                    if agent.is_active && !agent.is_out_of_domain {
                        phenotype.advance(agent, rates, m_ref, dt);
                    }
                });
            }
            flush_division_queue(population, container, m, rng);
            flush_removal_queue(population, container, m);
            self.last_phenotype_time = time;
        }

        if time - self.last_mechanics_time >= self.mechanics_dt - tolerance {
            self.mechanics_tick(population, container, m, models);
            self.last_mechanics_time = time;
        }
    }

    // Sub-order within the tick: parallel velocity pass against frozen
    // positions, serial attachment window, serial interactions with an
    // immediate removal flush, parallel position integration, then serial
    // re-bucketing.
    fn mechanics_tick(
        &self,
        population: &mut Population,
        container: &mut CellContainer,
        m: &mut Microenvironment,
        models: &SimulationModels,
    ) {
        if let Some(mechanics) = &models.mechanics {
            if mechanics.needs_gradients() {
                m.compute_all_gradient_vectors();
            }
            let velocities: Vec<DVec3> = {
                let context = ModelContext {
                    population: &*population,
                    container: &*container,
                    microenvironment: &*m,
                };
                context
                    .population
                    .agents()
                    .par_iter()
                    .map(|agent| {
                        if agent.is_active && !agent.is_out_of_domain && agent.is_movable {
                            mechanics.compute_velocity(agent, &context)
                        } else {
                            agent.velocity
                        }
                    })
                    .collect()
            };
            for (agent, velocity) in population.agents_mut().iter_mut().zip(velocities) {
                agent.velocity = velocity;
            }
            mechanics.update_attachments(population, container, self.mechanics_dt);
        }

        if let Some(interactions) = &models.interactions {
            for id in population.ids() {
                let eligible = population
                    .get(id)
                    .is_some_and(|a| a.is_active && !a.is_out_of_domain);
                if eligible {
                    interactions.interact(id, population, container, m, self.mechanics_dt);
                }
            }
            flush_removal_queue(population, container, m);
        }

        let dt = self.mechanics_dt;
        population.agents_mut().par_iter_mut().for_each(|agent| {
            if agent.is_active && agent.is_movable && !agent.is_out_of_domain {
                let step_velocity = 1.5 * agent.velocity - 0.5 * agent.previous_velocity;
                agent.position += dt * step_velocity;
                agent.previous_velocity = agent.velocity;
            }
        });

        for slot in 0..population.len() {
            let agent = &mut population.agents_mut()[slot];
            let inside = container.update_membership(agent);
            if inside {
                agent.voxel_index = Some(m.mesh.nearest_voxel_index(agent.position));
            } else {
                agent.voxel_index = None;
            }
        }
    }
}

/// Split every division-flagged agent into two half-volume daughters offset
/// half a radius either way along a uniformly random axis. The parent keeps
/// its handle; the daughter inherits rates, flags, and half the internalized
/// pool. Agents also flagged for removal do not divide.
pub fn flush_division_queue(
    population: &mut Population,
    container: &mut CellContainer,
    m: &Microenvironment,
    rng: &mut ChaCha8Rng,
) {
    let parents: Vec<AgentId> = population
        .agents()
        .iter()
        .filter(|a| a.flagged_for_division && !a.flagged_for_removal)
        .map(|a| a.id)
        .collect();
    for parent_id in parents {
        let direction = random_unit_vector(rng);
        let Some(parent) = population.get_mut(parent_id) else {
            continue;
        };
        parent.flagged_for_division = false;
        let offset = 0.5 * parent.radius() * direction;
        let half_volume = 0.5 * parent.volume;
        let original_position = parent.position;
        let movable = parent.is_movable;
        let active = parent.is_active;
        parent.set_volume(half_volume);
        parent.position = original_position - offset;

        let child_id = population.create(original_position + offset);
        population.scale_internalized(parent_id, 0.5);
        population.clone_rates_from(parent_id, child_id);
        if let Some(child) = population.get_mut(child_id) {
            child.set_volume(half_volume);
            child.is_movable = movable;
            child.is_active = active;
        }

        for id in [parent_id, child_id] {
            if let Some(agent) = population.get_mut(id) {
                let inside = container.update_membership(agent);
                if inside {
                    agent.voxel_index = Some(m.mesh.nearest_voxel_index(agent.position));
                } else {
                    agent.voxel_index = None;
                }
            }
        }
    }
}

/// Remove every removal-flagged agent through [`remove_agent_now`].
pub fn flush_removal_queue(
    population: &mut Population,
    container: &mut CellContainer,
    m: &mut Microenvironment,
) {
    let doomed: Vec<AgentId> = population
        .agents()
        .iter()
        .filter(|a| a.flagged_for_removal)
        .map(|a| a.id)
        .collect();
    for id in doomed {
        remove_agent_now(population, container, m, id);
    }
}

/// Remove one agent immediately: release the configured fraction of its
/// internalized substrates into its voxel, detach it from every attachment
/// partner, and drop it from the container and the population. Returns false
/// for stale handles.
pub fn remove_agent_now(
    population: &mut Population,
    container: &mut CellContainer,
    m: &mut Microenvironment,
    id: AgentId,
) -> bool {
    if !population.contains(id) {
        return false;
    }
    population.release_internalized_substrates(id, m);
    let attachments = population
        .get(id)
        .map(|a| a.attachments.clone())
        .unwrap_or_default();
    for partner in attachments {
        if let Some(other) = population.get_mut(partner) {
            other.attachments.retain(|x| *x != id);
        }
    }
    if let Some(agent) = population.get(id) {
        container.remove(agent);
    }
    population.remove(id).is_some()
}

fn random_unit_vector(rng: &mut ChaCha8Rng) -> DVec3 {
    let z: f64 = rng.gen_range(-1.0..1.0);
    let theta: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    let radial = (1.0 - z * z).sqrt();
    DVec3::new(radial * theta.cos(), radial * theta.sin(), z)
}
