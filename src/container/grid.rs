use crate::agents::{Agent, AgentId};
use crate::container::{EscapeFace, OutOfDomainPolicy};
use crate::discretization::mesh::CartesianMesh;
use crate::physics::microenvironment::Microenvironment;

/// Coarse spatial index over the agent population: one id bucket per grid
/// voxel, sized so that interaction partners are always in the same bucket or
/// one of its 26 neighbors, plus per-face lists of escaped agents.
pub struct CellContainer {
    pub mesh: CartesianMesh,
    pub policy: OutOfDomainPolicy,
    buckets: Vec<Vec<AgentId>>,
    escaped: [Vec<AgentId>; 6],
}

impl CellContainer {
    /// Build a container covering the microenvironment's bounding box with
    /// the given bucket spacing. The spacing should be at least one maximal
    /// interaction distance; neighbor queries only look one bucket out.
    pub fn for_microenvironment(m: &Microenvironment, voxel_size: f64) -> Self {
        let mut mesh = CartesianMesh::new();
        mesh.resize_uniform(m.mesh.bounding_box, voxel_size);
        mesh.build_moore_neighborhood();
        let buckets = vec![Vec::new(); mesh.n_voxels()];
        CellContainer {
            mesh,
            policy: OutOfDomainPolicy::default(),
            buckets,
            escaped: std::array::from_fn(|_| Vec::new()),
        }
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn agents_in_voxel(&self, bucket: usize) -> &[AgentId] {
        &self.buckets[bucket]
    }

    pub fn escaped(&self, face: EscapeFace) -> &[AgentId] {
        &self.escaped[face.index()]
    }

    pub fn n_escaped(&self) -> usize {
        self.escaped.iter().map(|list| list.len()).sum()
    }

    /// Insert a newly created agent. Out-of-domain starting positions go
    /// through the same policy handling as a position update.
    pub fn register(&mut self, agent: &mut Agent) -> bool {
        agent.container_voxel = None;
        self.update_membership(agent)
    }

    /// Drop an agent from its bucket (or escape list) as part of removal.
    pub fn remove(&mut self, agent: &Agent) {
        match agent.container_voxel {
            Some(bucket) => remove_id(&mut self.buckets[bucket], agent.id),
            None => self.unpark(agent.id),
        }
    }

    /// Re-bucket an agent after its position changed, applying the
    /// out-of-domain policy when it left the box. Returns true when the agent
    /// ends up inside the domain.
    pub fn update_membership(&mut self, agent: &mut Agent) -> bool {
        if self.mesh.is_position_valid(agent.position) {
            let bucket = self.mesh.nearest_voxel_index(agent.position);
            match agent.container_voxel {
                Some(old) if old == bucket => {}
                Some(old) => {
                    remove_id(&mut self.buckets[old], agent.id);
                    self.buckets[bucket].push(agent.id);
                    agent.container_voxel = Some(bucket);
                }
                None => {
                    self.unpark(agent.id);
                    self.buckets[bucket].push(agent.id);
                    agent.container_voxel = Some(bucket);
                    agent.is_out_of_domain = false;
                }
            }
            return true;
        }
        match self.policy {
            OutOfDomainPolicy::ClampToBoundary => {
                agent.position = agent
                    .position
                    .clamp(self.mesh.bounding_box[0], self.mesh.bounding_box[1]);
                self.update_membership(agent)
            }
            OutOfDomainPolicy::Exclude => {
                if let Some(old) = agent.container_voxel.take() {
                    remove_id(&mut self.buckets[old], agent.id);
                }
                if !agent.is_out_of_domain {
                    if let Some(face) =
                        EscapeFace::of_position(agent.position, &self.mesh.bounding_box)
                    {
                        self.escaped[face.index()].push(agent.id);
                    }
                    agent.is_out_of_domain = true;
                    agent.is_active = false;
                    agent.voxel_index = None;
                }
                false
            }
        }
    }

    /// Visit every id in the agent's bucket and the 26 surrounding buckets.
    /// The agent's own id is included; callers filter it out.
    pub fn for_each_neighbor_id(&self, agent: &Agent, mut f: impl FnMut(AgentId)) {
        let Some(bucket) = agent.container_voxel else {
            return;
        };
        for &id in &self.buckets[bucket] {
            f(id);
        }
        for &neighbor in &self.mesh.moore_neighbors[bucket] {
            for &id in &self.buckets[neighbor] {
                f(id);
            }
        }
    }

    pub fn display_information(&self) {
        let bucketed: usize = self.buckets.iter().map(|b| b.len()).sum();
        println!(
            "Cell container: {} buckets ({} x {} x {}), spacing {} {}",
            self.n_buckets(),
            self.mesh.x_nodes(),
            self.mesh.y_nodes(),
            self.mesh.z_nodes(),
            self.mesh.dx,
            self.mesh.units
        );
        println!(
            "  agents bucketed: {}, escaped: {}",
            bucketed,
            self.n_escaped()
        );
    }

    fn unpark(&mut self, id: AgentId) {
        for list in &mut self.escaped {
            remove_id(list, id);
        }
    }
}

fn remove_id(list: &mut Vec<AgentId>, id: AgentId) {
    if let Some(at) = list.iter().position(|x| *x == id) {
        list.swap_remove(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::population::Population;
    use glam::DVec3;

    fn test_container() -> CellContainer {
        let mut m = Microenvironment::new();
        m.resize_space([DVec3::ZERO, DVec3::splat(90.0)], [3, 3, 3]);
        m.add_substrate("oxygen", "mmHg", 1.0e5, 0.1).unwrap();
        CellContainer::for_microenvironment(&m, 30.0)
    }

    #[test]
    fn membership_follows_position_updates() {
        let mut container = test_container();
        let mut population = Population::new();
        let id = population.create(DVec3::splat(10.0));

        let agent = population.get_mut(id).unwrap();
        assert!(container.register(agent));
        let first = agent.container_voxel.unwrap();
        assert!(container.agents_in_voxel(first).contains(&id));

        agent.position = DVec3::new(80.0, 10.0, 10.0);
        assert!(container.update_membership(agent));
        let second = agent.container_voxel.unwrap();
        assert_ne!(first, second);
        assert!(container.agents_in_voxel(first).is_empty());
        assert!(container.agents_in_voxel(second).contains(&id));
    }

    #[test]
    fn excluded_agents_are_parked_by_face() {
        let mut container = test_container();
        let mut population = Population::new();
        let id = population.create(DVec3::splat(10.0));

        let agent = population.get_mut(id).unwrap();
        container.register(agent);
        agent.position = DVec3::new(-5.0, 10.0, 10.0);
        assert!(!container.update_membership(agent));
        assert!(agent.is_out_of_domain);
        assert!(!agent.is_active);
        assert_eq!(agent.container_voxel, None);
        assert_eq!(container.escaped(EscapeFace::XMin), &[id]);
        assert_eq!(container.n_escaped(), 1);
    }

    #[test]
    fn clamp_policy_pins_agents_to_the_boundary() {
        let mut container = test_container();
        container.policy = OutOfDomainPolicy::ClampToBoundary;
        let mut population = Population::new();
        let id = population.create(DVec3::splat(10.0));

        let agent = population.get_mut(id).unwrap();
        container.register(agent);
        agent.position = DVec3::new(95.0, 10.0, 10.0);
        assert!(container.update_membership(agent));
        assert_eq!(agent.position, DVec3::new(90.0, 10.0, 10.0));
        assert!(agent.is_active);
        assert_eq!(container.n_escaped(), 0);
    }
}
