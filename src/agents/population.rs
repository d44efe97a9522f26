use glam::DVec3;
use rayon::prelude::*;

use crate::agents::{Agent, AgentId};
use crate::physics::microenvironment::Microenvironment;

/// Mutable view of one agent's slice of the pooled per-substrate buffers.
/// Changing secretion, uptake, saturation, or net export through a view does
/// not set the agent's dirty flag; bulk passes that edit rates are expected to
/// set `constants_dirty` themselves.
pub struct AgentRates<'a> {
    pub secretion: &'a mut [f64],
    pub uptake: &'a mut [f64],
    pub saturation: &'a mut [f64],
    pub net_export: &'a mut [f64],
    pub internalized: &'a mut [f64],
    pub release_fraction: &'a mut [f64],
}

impl AgentRates<'_> {
    fn detached() -> AgentRates<'static> {
        AgentRates {
            secretion: &mut [],
            uptake: &mut [],
            saturation: &mut [],
            net_export: &mut [],
            internalized: &mut [],
            release_fraction: &mut [],
        }
    }
}

struct SlotEntry {
    slot: u32,
    generation: u32,
    live: bool,
}

/// The agent arena. Records are kept dense (removal swaps the last record
/// into the hole), while handles stay stable through the slot table. All
/// per-substrate quantities are pooled, slot-major flat buffers so scheduled
/// passes stream them without per-agent indirection.
pub struct Population {
    agents: Vec<Agent>,
    slots: Vec<SlotEntry>,
    free_slots: Vec<u32>,
    n_substrates: usize,
    /// When set, the secretion pass also books the matching transfers on each
    /// agent's internalized totals.
    pub track_internalized: bool,

    secretion_rates: Vec<f64>,
    uptake_rates: Vec<f64>,
    saturation_densities: Vec<f64>,
    net_export_rates: Vec<f64>,
    internalized_substrates: Vec<f64>,
    release_fractions: Vec<f64>,

    // Cached per-step secretion constants, refreshed when an agent is dirty.
    constant1: Vec<f64>,
    constant2: Vec<f64>,
    export_total: Vec<f64>,
    export_density: Vec<f64>,
}

impl Default for Population {
    fn default() -> Self {
        Self::new()
    }
}

impl Population {
    pub fn new() -> Self {
        Population {
            agents: Vec::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            n_substrates: 0,
            track_internalized: false,
            secretion_rates: Vec::new(),
            uptake_rates: Vec::new(),
            saturation_densities: Vec::new(),
            net_export_rates: Vec::new(),
            internalized_substrates: Vec::new(),
            release_fractions: Vec::new(),
            constant1: Vec::new(),
            constant2: Vec::new(),
            export_total: Vec::new(),
            export_density: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn n_substrates(&self) -> usize {
        self.n_substrates
    }

    /// Allocate a new agent at `position` with zeroed rates. All exchange
    /// rates default to zero and the release-on-removal fraction to zero, so
    /// a fresh agent does not touch the chemical field.
    pub fn create(&mut self, position: DVec3) -> AgentId {
        let slot = self.agents.len() as u32;
        let index = match self.free_slots.pop() {
            Some(index) => {
                let entry = &mut self.slots[index as usize];
                entry.slot = slot;
                entry.live = true;
                index
            }
            None => {
                self.slots.push(SlotEntry {
                    slot,
                    generation: 0,
                    live: true,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = AgentId {
            index,
            generation: self.slots[index as usize].generation,
        };
        self.agents.push(Agent::new(id, position));
        let s = self.n_substrates;
        for buffer in self.all_rows_mut() {
            buffer.extend(std::iter::repeat(0.0).take(s));
        }
        id
    }

    /// Remove an agent, returning its final record. The last record fills the
    /// hole and the freed slot's generation is bumped, so the removed handle
    /// (and only that handle) dangles.
    pub fn remove(&mut self, id: AgentId) -> Option<Agent> {
        let slot = self.slot_of(id)?;
        let last = self.agents.len() - 1;
        let removed = self.agents.swap_remove(slot);
        if slot != last {
            let moved = self.agents[slot].id;
            self.slots[moved.index as usize].slot = slot as u32;
        }
        let s = self.n_substrates;
        for buffer in self.all_rows_mut() {
            remove_row(buffer, slot, s);
        }
        let entry = &mut self.slots[id.index as usize];
        entry.live = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        Some(removed)
    }

    /// Current storage slot of a live handle.
    pub fn slot_of(&self, id: AgentId) -> Option<usize> {
        let entry = self.slots.get(id.index as usize)?;
        (entry.live && entry.generation == id.generation).then(|| entry.slot as usize)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.slot_of(id).is_some()
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.slot_of(id).map(|slot| &self.agents[slot])
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.slot_of(id).map(|slot| &mut self.agents[slot])
    }

    /// Dense record storage, in slot order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    /// Snapshot of live handles in slot order. Taken before passes that may
    /// reshuffle storage mid-iteration.
    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| a.id).collect()
    }

    pub fn secretion_rates(&self, id: AgentId) -> Option<&[f64]> {
        self.row(id, &self.secretion_rates)
    }

    /// Mutable secretion rates; marks the agent's constants dirty.
    pub fn secretion_rates_mut(&mut self, id: AgentId) -> Option<&mut [f64]> {
        let slot = self.dirty_slot(id)?;
        Some(row_mut(&mut self.secretion_rates, slot, self.n_substrates))
    }

    pub fn uptake_rates(&self, id: AgentId) -> Option<&[f64]> {
        self.row(id, &self.uptake_rates)
    }

    pub fn uptake_rates_mut(&mut self, id: AgentId) -> Option<&mut [f64]> {
        let slot = self.dirty_slot(id)?;
        Some(row_mut(&mut self.uptake_rates, slot, self.n_substrates))
    }

    pub fn saturation_densities(&self, id: AgentId) -> Option<&[f64]> {
        self.row(id, &self.saturation_densities)
    }

    pub fn saturation_densities_mut(&mut self, id: AgentId) -> Option<&mut [f64]> {
        let slot = self.dirty_slot(id)?;
        Some(row_mut(&mut self.saturation_densities, slot, self.n_substrates))
    }

    pub fn net_export_rates(&self, id: AgentId) -> Option<&[f64]> {
        self.row(id, &self.net_export_rates)
    }

    pub fn net_export_rates_mut(&mut self, id: AgentId) -> Option<&mut [f64]> {
        let slot = self.dirty_slot(id)?;
        Some(row_mut(&mut self.net_export_rates, slot, self.n_substrates))
    }

    pub fn internalized_substrates(&self, id: AgentId) -> Option<&[f64]> {
        self.row(id, &self.internalized_substrates)
    }

    pub fn internalized_substrates_mut(&mut self, id: AgentId) -> Option<&mut [f64]> {
        let slot = self.slot_of(id)?;
        Some(row_mut(&mut self.internalized_substrates, slot, self.n_substrates))
    }

    pub fn release_fractions(&self, id: AgentId) -> Option<&[f64]> {
        self.row(id, &self.release_fractions)
    }

    pub fn release_fractions_mut(&mut self, id: AgentId) -> Option<&mut [f64]> {
        let slot = self.slot_of(id)?;
        Some(row_mut(&mut self.release_fractions, slot, self.n_substrates))
    }

    /// Copy the six exchange-rate rows of `source` onto `target`, as when a
    /// daughter inherits its parent's secretion profile.
    pub fn clone_rates_from(&mut self, source: AgentId, target: AgentId) -> bool {
        let (Some(src), Some(dst)) = (self.slot_of(source), self.slot_of(target)) else {
            return false;
        };
        let s = self.n_substrates;
        for buffer in [
            &mut self.secretion_rates,
            &mut self.uptake_rates,
            &mut self.saturation_densities,
            &mut self.net_export_rates,
            &mut self.internalized_substrates,
            &mut self.release_fractions,
        ] {
            buffer.copy_within(src * s..(src + 1) * s, dst * s);
        }
        self.agents[dst].constants_dirty = true;
        true
    }

    /// Scale an agent's internalized totals, as when division splits the
    /// internal pool between daughters.
    pub fn scale_internalized(&mut self, id: AgentId, factor: f64) -> bool {
        let Some(slot) = self.slot_of(id) else {
            return false;
        };
        let s = self.n_substrates;
        for value in &mut self.internalized_substrates[slot * s..(slot + 1) * s] {
            *value *= factor;
        }
        true
    }

    /// Resize every pooled buffer for a new substrate count, keeping the
    /// leading entries of each row and zero-filling the rest. Every agent is
    /// marked dirty.
    pub fn sync_substrate_count(&mut self, n_substrates: usize) {
        let old = self.n_substrates;
        if old == n_substrates {
            return;
        }
        let rows = self.agents.len();
        for buffer in self.all_rows_mut() {
            resize_rows(buffer, old, n_substrates, rows);
        }
        self.n_substrates = n_substrates;
        for agent in &mut self.agents {
            agent.constants_dirty = true;
        }
    }

    /// Run `f` over every agent in parallel, each with the mutable view of its
    /// own rate rows.
    pub fn par_for_each_mut<F>(&mut self, f: F)
    where
        F: Fn(&mut Agent, AgentRates<'_>) + Send + Sync,
    {
        if self.agents.is_empty() {
            return;
        }
        let s = self.n_substrates;
        if s == 0 {
            self.agents
                .par_iter_mut()
                .for_each(|agent| f(agent, AgentRates::detached()));
            return;
        }
        (
            &mut self.agents[..],
            self.secretion_rates.par_chunks_mut(s),
            self.uptake_rates.par_chunks_mut(s),
            self.saturation_densities.par_chunks_mut(s),
            self.net_export_rates.par_chunks_mut(s),
            self.internalized_substrates.par_chunks_mut(s),
            self.release_fractions.par_chunks_mut(s),
        )
            .into_par_iter()
            .for_each(
                |(agent, secretion, uptake, saturation, net_export, internalized, release_fraction)| {
                    f(
                        agent,
                        AgentRates {
                            secretion,
                            uptake,
                            saturation,
                            net_export,
                            internalized,
                            release_fraction,
                        },
                    );
                },
            );
    }

    /// Serial counterpart of [`par_for_each_mut`], in slot order.
    ///
    /// [`par_for_each_mut`]: Population::par_for_each_mut
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Agent, AgentRates<'_>),
    {
        let s = self.n_substrates;
        for slot in 0..self.agents.len() {
            let range = slot * s..(slot + 1) * s;
            let rates = AgentRates {
                secretion: &mut self.secretion_rates[range.clone()],
                uptake: &mut self.uptake_rates[range.clone()],
                saturation: &mut self.saturation_densities[range.clone()],
                net_export: &mut self.net_export_rates[range.clone()],
                internalized: &mut self.internalized_substrates[range.clone()],
                release_fraction: &mut self.release_fractions[range],
            };
            f(&mut self.agents[slot], rates);
        }
    }

    /// One implicit secretion/uptake/export exchange between every active
    /// agent and its voxel. Agents are processed serially in slot order, so
    /// several agents sharing a voxel resolve to one deterministic result
    /// regardless of thread count.
    ///
    /// Per substrate, with voxel volume `W` and agent volume `V`:
    ///
    /// ```text
    /// rho <- (rho + dt (V/W) S T) / (1 + dt (V/W) (S + U)) + dt E / W
    /// ```
    ///
    /// which is backward Euler in the secretion (toward saturation `T`) and
    /// uptake terms, plus the explicit net export `E`. When internalized
    /// tracking is on, the matching amounts move between the voxel and the
    /// agent's internal pool.
    pub fn simulate_secretion_and_uptake(&mut self, m: &mut Microenvironment, dt: f64) {
        let s = self.n_substrates;
        debug_assert_eq!(s, m.n_substrates());
        if s == 0 || s != m.n_substrates() {
            return;
        }
        let mut touched = false;
        for slot in 0..self.agents.len() {
            let agent = &mut self.agents[slot];
            if !agent.is_active {
                continue;
            }
            let Some(voxel) = agent.voxel_index else {
                continue;
            };
            let voxel_volume = m.mesh.voxels[voxel].volume;

            if agent.constants_dirty
                || agent.cached_dt != dt
                || agent.cached_voxel_volume != voxel_volume
            {
                let ratio = dt * agent.volume / voxel_volume;
                for q in 0..s {
                    let idx = slot * s + q;
                    self.constant1[idx] =
                        ratio * self.secretion_rates[idx] * self.saturation_densities[idx];
                    self.constant2[idx] =
                        1.0 + ratio * (self.secretion_rates[idx] + self.uptake_rates[idx]);
                    self.export_total[idx] = dt * self.net_export_rates[idx];
                    self.export_density[idx] = dt * self.net_export_rates[idx] / voxel_volume;
                }
                agent.constants_dirty = false;
                agent.cached_dt = dt;
                agent.cached_voxel_volume = voxel_volume;
            }

            for q in 0..s {
                let idx = slot * s + q;
                let flat = voxel * s + q;
                let rho = m.densities[flat];
                let updated = (rho + self.constant1[idx]) / self.constant2[idx];
                if self.track_internalized {
                    self.internalized_substrates[idx] -=
                        voxel_volume * (updated - rho) + self.export_total[idx];
                }
                m.densities[flat] = updated + self.export_density[idx];
            }
            touched = true;
        }
        if touched {
            m.invalidate_gradients();
        }
    }

    /// Dump the released fraction of an agent's internalized totals into its
    /// current voxel and zero the pool, as part of removing the agent. A no-op
    /// when tracking is off or the agent is outside the domain.
    pub fn release_internalized_substrates(&mut self, id: AgentId, m: &mut Microenvironment) {
        if !self.track_internalized {
            return;
        }
        let Some(slot) = self.slot_of(id) else {
            return;
        };
        let Some(voxel) = self.agents[slot].voxel_index else {
            return;
        };
        let s = self.n_substrates;
        if s == 0 || s != m.n_substrates() {
            return;
        }
        let voxel_volume = m.mesh.voxels[voxel].volume;
        for q in 0..s {
            let idx = slot * s + q;
            let released = self.internalized_substrates[idx] * self.release_fractions[idx];
            m.densities[voxel * s + q] += released / voxel_volume;
            self.internalized_substrates[idx] = 0.0;
        }
    }

    fn row<'a>(&self, id: AgentId, buffer: &'a [f64]) -> Option<&'a [f64]> {
        let slot = self.slot_of(id)?;
        Some(&buffer[slot * self.n_substrates..(slot + 1) * self.n_substrates])
    }

    fn dirty_slot(&mut self, id: AgentId) -> Option<usize> {
        let slot = self.slot_of(id)?;
        self.agents[slot].constants_dirty = true;
        Some(slot)
    }

    fn all_rows_mut(&mut self) -> [&mut Vec<f64>; 10] {
        [
            &mut self.secretion_rates,
            &mut self.uptake_rates,
            &mut self.saturation_densities,
            &mut self.net_export_rates,
            &mut self.internalized_substrates,
            &mut self.release_fractions,
            &mut self.constant1,
            &mut self.constant2,
            &mut self.export_total,
            &mut self.export_density,
        ]
    }
}

fn row_mut(buffer: &mut [f64], slot: usize, width: usize) -> &mut [f64] {
    &mut buffer[slot * width..(slot + 1) * width]
}

fn remove_row(buffer: &mut Vec<f64>, slot: usize, width: usize) {
    if width == 0 {
        return;
    }
    let last = buffer.len() / width - 1;
    if slot != last {
        buffer.copy_within(last * width..(last + 1) * width, slot * width);
    }
    buffer.truncate(last * width);
}

fn resize_rows(buffer: &mut Vec<f64>, old_width: usize, new_width: usize, rows: usize) {
    let keep = old_width.min(new_width);
    let mut out = vec![0.0; rows * new_width];
    for r in 0..rows {
        out[r * new_width..r * new_width + keep]
            .copy_from_slice(&buffer[r * old_width..r * old_width + keep]);
    }
    *buffer = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_keeps_rows_dense_and_handles_stable() {
        let mut population = Population::new();
        population.sync_substrate_count(2);
        let a = population.create(DVec3::ZERO);
        let b = population.create(DVec3::X);
        let c = population.create(DVec3::Y);
        population.secretion_rates_mut(a).unwrap().copy_from_slice(&[1.0, 2.0]);
        population.secretion_rates_mut(c).unwrap().copy_from_slice(&[5.0, 6.0]);

        population.remove(a);
        assert_eq!(population.len(), 2);
        assert!(population.get(a).is_none());
        // c moved into the freed slot and kept its row.
        assert_eq!(population.secretion_rates(c).unwrap(), &[5.0, 6.0]);
        assert_eq!(population.get(b).unwrap().position, DVec3::X);

        // Reusing the slot bumps the generation, so the old handle stays dead.
        let d = population.create(DVec3::Z);
        assert_eq!(d.index, a.index);
        assert_ne!(d.generation, a.generation);
        assert!(population.get(a).is_none());
        assert!(population.get(d).is_some());
    }
}
