use std::sync::Arc;

use glam::DVec3;

use crate::agents::population::{AgentRates, Population};
use crate::agents::{Agent, AgentId};
use crate::container::grid::CellContainer;
use crate::physics::microenvironment::Microenvironment;

/// Read-only simulation state handed to parallel per-agent callbacks.
pub struct ModelContext<'a> {
    pub population: &'a Population,
    pub container: &'a CellContainer,
    pub microenvironment: &'a Microenvironment,
}

/// Slow per-agent state updates, run at the phenotype period. May flag the
/// agent for division or removal; the scheduler flushes those queues before
/// the tick returns.
pub trait PhenotypeModel: Send + Sync {
    fn advance(&self, agent: &mut Agent, rates: AgentRates<'_>, m: &Microenvironment, dt: f64);
}

/// Per-agent velocity from local interactions. `compute_velocity` runs in
/// parallel against a frozen snapshot of positions; attachment bookkeeping
/// gets a serial, mutable window afterwards.
pub trait MechanicsModel: Send + Sync {
    /// When true, the scheduler refreshes all substrate gradients before the
    /// velocity pass.
    fn needs_gradients(&self) -> bool {
        false
    }

    fn compute_velocity(&self, agent: &Agent, context: &ModelContext<'_>) -> DVec3;

    /// Serial attach/detach window of the mechanics tick.
    fn update_attachments(
        &self,
        _population: &mut Population,
        _container: &CellContainer,
        _dt: f64,
    ) {
    }
}

/// Fast internal state advanced every diffusion tick.
pub trait IntracellularModel: Send + Sync {
    fn needs_update(&self, _agent: &Agent, _time: f64) -> bool {
        true
    }

    fn advance(&self, agent: &mut Agent, rates: AgentRates<'_>, m: &Microenvironment, dt: f64);
}

/// Direct agent-to-agent effects (attack, fusion, tagging for removal), run
/// serially at the mechanics period with full mutable access. Removal flags
/// raised here are flushed immediately after the pass.
pub trait InteractionModel: Send + Sync {
    fn interact(
        &self,
        actor: AgentId,
        population: &mut Population,
        container: &CellContainer,
        m: &Microenvironment,
        dt: f64,
    );
}

/// The model set a simulation runs with. Empty slots skip the corresponding
/// pass; queue flushes still happen on schedule.
#[derive(Default)]
pub struct SimulationModels {
    pub phenotype: Option<Box<dyn PhenotypeModel>>,
    pub mechanics: Option<Box<dyn MechanicsModel>>,
    pub intracellular: Option<Box<dyn IntracellularModel>>,
    pub interactions: Option<Box<dyn InteractionModel>>,
}

/// Relaxation toward a target volume, flagging division at a threshold.
pub struct VolumeGrowth {
    /// Relaxation rate, 1/time.
    pub growth_rate: f64,
    pub target_volume: f64,
    pub division_volume: f64,
}

impl Default for VolumeGrowth {
    fn default() -> Self {
        VolumeGrowth {
            growth_rate: 0.005,
            target_volume: 4988.0,
            division_volume: 4700.0,
        }
    }
}

impl PhenotypeModel for VolumeGrowth {
    fn advance(&self, agent: &mut Agent, _rates: AgentRates<'_>, _m: &Microenvironment, dt: f64) {
        let volume = agent.volume + dt * self.growth_rate * (self.target_volume - agent.volume);
        agent.set_volume(volume);
        if volume >= self.division_volume {
            agent.flagged_for_division = true;
        }
    }
}

/// Pairwise repulsion inside the summed radii, adhesion out to a multiple of
/// them, both with quadratic falloff, plus an elastic term over explicit
/// attachments. Velocities are overdamped: interaction strength maps straight
/// to speed.
pub struct StandardAdhesionRepulsion {
    pub repulsion_strength: f64,
    pub adhesion_strength: f64,
    /// Adhesion reaches `relative_max_adhesion_distance * (r1 + r2)`.
    pub relative_max_adhesion_distance: f64,
    /// Spring constant for attached pairs; zero disables the term.
    pub spring_strength: f64,
}

impl Default for StandardAdhesionRepulsion {
    fn default() -> Self {
        StandardAdhesionRepulsion {
            repulsion_strength: 10.0,
            adhesion_strength: 0.4,
            relative_max_adhesion_distance: 1.25,
            spring_strength: 0.0,
        }
    }
}

impl MechanicsModel for StandardAdhesionRepulsion {
    fn compute_velocity(&self, agent: &Agent, context: &ModelContext<'_>) -> DVec3 {
        let mut velocity = DVec3::ZERO;
        let r1 = agent.radius();
        context.container.for_each_neighbor_id(agent, |id| {
            if id == agent.id {
                return;
            }
            let Some(other) = context.population.get(id) else {
                return;
            };
            let displacement = agent.position - other.position;
            let distance = displacement.length();
            if distance < 1e-12 {
                return;
            }
            let reach = r1 + other.radius();
            let max_distance = self.relative_max_adhesion_distance * reach;
            let mut strength = 0.0;
            if distance < reach {
                let overlap = 1.0 - distance / reach;
                strength += self.repulsion_strength * overlap * overlap;
            }
            if distance < max_distance {
                let proximity = 1.0 - distance / max_distance;
                strength -= self.adhesion_strength * proximity * proximity;
            }
            velocity += (strength / distance) * displacement;
        });
        if self.spring_strength > 0.0 {
            for &partner in &agent.attachments {
                if let Some(other) = context.population.get(partner) {
                    velocity += self.spring_strength * (other.position - agent.position);
                }
            }
        }
        velocity
    }
}

/// Drift up (or down) one substrate's gradient at constant speed.
pub struct Chemotaxis {
    pub substrate: usize,
    pub speed: f64,
    /// +1.0 climbs the gradient, -1.0 descends it.
    pub direction: f64,
}

impl MechanicsModel for Chemotaxis {
    fn needs_gradients(&self) -> bool {
        true
    }

    fn compute_velocity(&self, agent: &Agent, context: &ModelContext<'_>) -> DVec3 {
        let Some(voxel) = agent.voxel_index else {
            return DVec3::ZERO;
        };
        let gradient = context.microenvironment.gradient(voxel);
        let q = self.substrate * 3;
        let g = DVec3::new(gradient[q], gradient[q + 1], gradient[q + 2]);
        let magnitude = g.length();
        if magnitude < 1e-16 {
            return DVec3::ZERO;
        }
        (self.direction * self.speed / magnitude) * g
    }
}

pub type PhenotypeFn =
    Arc<dyn Fn(&mut Agent, AgentRates<'_>, &Microenvironment, f64) + Send + Sync>;
pub type VelocityFn = Arc<dyn Fn(&Agent, &ModelContext<'_>) -> DVec3 + Send + Sync>;
pub type IntracellularFn =
    Arc<dyn Fn(&mut Agent, AgentRates<'_>, &Microenvironment, f64) + Send + Sync>;
pub type InteractionFn =
    Arc<dyn Fn(AgentId, &mut Population, &CellContainer, &Microenvironment, f64) + Send + Sync>;

/// Phenotype model from a closure.
pub struct CustomPhenotype(pub PhenotypeFn);

impl PhenotypeModel for CustomPhenotype {
    fn advance(&self, agent: &mut Agent, rates: AgentRates<'_>, m: &Microenvironment, dt: f64) {
        (self.0)(agent, rates, m, dt)
    }
}

/// Mechanics model from a velocity closure.
pub struct CustomMechanics(pub VelocityFn);

impl MechanicsModel for CustomMechanics {
    fn compute_velocity(&self, agent: &Agent, context: &ModelContext<'_>) -> DVec3 {
        (self.0)(agent, context)
    }
}

/// Intracellular model from a closure, updated every diffusion tick.
pub struct CustomIntracellular(pub IntracellularFn);

impl IntracellularModel for CustomIntracellular {
    fn advance(&self, agent: &mut Agent, rates: AgentRates<'_>, m: &Microenvironment, dt: f64) {
        (self.0)(agent, rates, m, dt)
    }
}

/// Interaction model from a closure.
pub struct CustomInteraction(pub InteractionFn);

impl InteractionModel for CustomInteraction {
    fn interact(
        &self,
        actor: AgentId,
        population: &mut Population,
        container: &CellContainer,
        m: &Microenvironment,
        dt: f64,
    ) {
        (self.0)(actor, population, container, m, dt)
    }
}
