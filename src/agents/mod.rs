pub mod population;

use glam::DVec3;

/// Stable handle to one agent: a slot-table index plus a generation counter
/// that is bumped when the slot is reused, so handles to removed agents go
/// stale instead of silently aliasing a newcomer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AgentId {
    pub index: u32,
    pub generation: u32,
}

/// One simulated cell. Spatial and lifecycle state lives here; per-substrate
/// exchange rates live in pooled buffers on [`Population`] and are reached
/// through the handle.
///
/// [`Population`]: population::Population
#[derive(Clone, Debug)]
pub struct Agent {
    pub id: AgentId,
    pub position: DVec3,
    pub velocity: DVec3,
    /// Velocity of the previous mechanics tick, for the two-step
    /// Adams-Bashforth position update.
    pub previous_velocity: DVec3,
    pub volume: f64,
    /// Inactive agents are skipped by every scheduled pass.
    pub is_active: bool,
    /// Immovable agents keep their position but still exchange substrates.
    pub is_movable: bool,
    pub is_out_of_domain: bool,
    /// Diffusion-mesh voxel the agent currently sits in, `None` while outside
    /// the domain.
    pub voxel_index: Option<usize>,
    /// Coarse container-grid voxel, maintained by the cell container.
    pub container_voxel: Option<usize>,
    /// Partners this agent is elastically attached to. Bookkeeping is
    /// symmetric and runs in the serial window of the mechanics tick.
    pub attachments: Vec<AgentId>,
    pub flagged_for_division: bool,
    pub flagged_for_removal: bool,
    /// Set whenever volume or any exchange rate changes; the secretion pass
    /// refreshes its cached step constants before using them.
    pub constants_dirty: bool,
    pub(crate) cached_dt: f64,
    pub(crate) cached_voxel_volume: f64,
}

impl Agent {
    pub(crate) fn new(id: AgentId, position: DVec3) -> Self {
        Agent {
            id,
            position,
            velocity: DVec3::ZERO,
            previous_velocity: DVec3::ZERO,
            volume: 1.0,
            is_active: true,
            is_movable: true,
            is_out_of_domain: false,
            voxel_index: None,
            container_voxel: None,
            attachments: Vec::new(),
            flagged_for_division: false,
            flagged_for_removal: false,
            constants_dirty: true,
            cached_dt: 0.0,
            cached_voxel_volume: 0.0,
        }
    }

    /// Radius of the volume-equivalent sphere.
    pub fn radius(&self) -> f64 {
        (3.0 * self.volume / (4.0 * std::f64::consts::PI)).cbrt()
    }

    /// Update the volume and flag the secretion constants for recomputation.
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
        self.constants_dirty = true;
    }
}
