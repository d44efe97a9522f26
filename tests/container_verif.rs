use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::DVec3;

use mcfvm_rs::container::models::{
    CustomInteraction, CustomIntracellular, CustomMechanics, CustomPhenotype, InteractionFn,
    IntracellularFn, PhenotypeFn, VelocityFn,
};
use mcfvm_rs::container::{EscapeFace, OutOfDomainPolicy};
use mcfvm_rs::numerics::NoDiffusion;
use mcfvm_rs::simulation::{DomainSettings, Simulation, SimulationSettings};

/// A 100^3-micron domain with the default 0.01 / 0.1 / 6.0 periods and no
/// chemical field, so the scheduler is all that moves.
fn tissue(policy: OutOfDomainPolicy) -> Simulation {
    let mut settings = SimulationSettings::default();
    settings.domain = DomainSettings {
        x: [0.0, 100.0],
        y: [0.0, 100.0],
        z: [0.0, 100.0],
        voxel_size: 50.0,
    };
    settings.mechanics_voxel_size = 50.0;
    settings.out_of_domain_policy = policy;
    let mut sim = Simulation::new(settings);
    sim.solver = Box::new(NoDiffusion);
    sim
}

#[test]
fn passes_fire_on_the_multirate_grid() {
    let mut sim = tissue(OutOfDomainPolicy::Exclude);
    sim.create_agent(DVec3::splat(50.0));

    let intracellular_count = Arc::new(AtomicUsize::new(0));
    let mechanics_count = Arc::new(AtomicUsize::new(0));
    let phenotype_count = Arc::new(AtomicUsize::new(0));

    let counter = intracellular_count.clone();
    let intracellular: IntracellularFn = Arc::new(move |_agent, _rates, _m, _dt| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    sim.models.intracellular = Some(Box::new(CustomIntracellular(intracellular)));

    let counter = mechanics_count.clone();
    let velocity: VelocityFn = Arc::new(move |_agent, _context| {
        counter.fetch_add(1, Ordering::Relaxed);
        DVec3::ZERO
    });
    sim.models.mechanics = Some(Box::new(CustomMechanics(velocity)));

    let counter = phenotype_count.clone();
    let phenotype: PhenotypeFn = Arc::new(move |_agent, _rates, _m, _dt| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    sim.models.phenotype = Some(Box::new(CustomPhenotype(phenotype)));

    // Updates run at t = 0.00 .. 0.10: one mechanics tick, no phenotype yet.
    for _ in 0..11 {
        sim.step().expect("step");
    }
    assert_eq!(intracellular_count.load(Ordering::Relaxed), 11);
    assert_eq!(mechanics_count.load(Ordering::Relaxed), 1);
    assert_eq!(phenotype_count.load(Ordering::Relaxed), 0);

    // Through t = 6.00: mechanics every 0.1, phenotype exactly once.
    for _ in 0..590 {
        sim.step().expect("step");
    }
    assert_eq!(intracellular_count.load(Ordering::Relaxed), 601);
    assert_eq!(mechanics_count.load(Ordering::Relaxed), 60);
    assert_eq!(phenotype_count.load(Ordering::Relaxed), 1);
    assert!((sim.time - 6.01).abs() < 1.0e-9);
}

#[test]
fn division_splits_volume_rates_and_internalized_pool() {
    let mut sim = tissue(OutOfDomainPolicy::Exclude);
    sim.population.track_internalized = true;
    let oxygen = sim
        .add_substrate("oxygen", "mmHg", 0.0, 0.0)
        .expect("substrate registration");

    let parent = sim.create_agent(DVec3::splat(50.0));
    if let Some(agent) = sim.population.get_mut(parent) {
        agent.set_volume(2494.0);
    }
    sim.population.secretion_rates_mut(parent).expect("live agent")[oxygen] = 7.0;
    sim.population.internalized_substrates_mut(parent).expect("live agent")[oxygen] = 10.0;

    let phenotype: PhenotypeFn = Arc::new(|agent, _rates, _m, _dt| {
        agent.flagged_for_division = true;
    });
    sim.models.phenotype = Some(Box::new(CustomPhenotype(phenotype)));

    for _ in 0..601 {
        sim.step().expect("step");
    }

    assert_eq!(sim.population.len(), 2);
    let child = sim
        .population
        .ids()
        .into_iter()
        .find(|id| *id != parent)
        .expect("daughter agent");

    // Half volume each, separated by the parent's pre-division radius.
    let parent_radius = (3.0 * 2494.0 / (4.0 * std::f64::consts::PI)).cbrt();
    let p = sim.population.get(parent).expect("parent").position;
    let c = sim.population.get(child).expect("child").position;
    assert!(((p - c).length() - parent_radius).abs() < 1.0e-9);
    assert!((sim.population.get(parent).expect("parent").volume - 1247.0).abs() < 1.0e-9);
    assert!((sim.population.get(child).expect("child").volume - 1247.0).abs() < 1.0e-9);

    // The daughter inherits rates and half the internalized pool.
    assert_eq!(sim.population.secretion_rates(child).expect("child")[oxygen], 7.0);
    assert_eq!(sim.population.internalized_substrates(parent).expect("parent")[oxygen], 5.0);
    assert_eq!(sim.population.internalized_substrates(child).expect("child")[oxygen], 5.0);

    // Both daughters are bucketed and mapped to diffusion voxels.
    assert_eq!(sim.container.n_escaped(), 0);
    for id in [parent, child] {
        let agent = sim.population.get(id).expect("live agent");
        assert!(agent.container_voxel.is_some());
        assert!(agent.voxel_index.is_some());
    }
}

#[test]
fn escaped_agents_are_parked_by_face_and_stay_addressable() {
    let mut sim = tissue(OutOfDomainPolicy::Exclude);
    let id = sim.create_agent(DVec3::new(95.0, 50.0, 50.0));
    if let Some(agent) = sim.population.get_mut(id) {
        agent.velocity = DVec3::new(100.0, 0.0, 0.0);
        agent.previous_velocity = DVec3::new(100.0, 0.0, 0.0);
    }

    // First mechanics tick pushes the agent 10 microns past the face.
    for _ in 0..11 {
        sim.step().expect("step");
    }

    assert_eq!(sim.container.n_escaped(), 1);
    assert_eq!(sim.container.escaped(EscapeFace::XMax), &[id]);
    let agent = sim.population.get(id).expect("parked agent");
    assert!(agent.is_out_of_domain);
    assert!(!agent.is_active);
    assert_eq!(agent.voxel_index, None);
    assert_eq!(agent.container_voxel, None);
    assert!(agent.position.x > 100.0);

    // Parked agents are frozen, not integrated further.
    let frozen = agent.position;
    for _ in 0..20 {
        sim.step().expect("step");
    }
    assert_eq!(sim.population.get(id).expect("parked agent").position, frozen);
}

#[test]
fn clamp_policy_pins_agents_to_the_face() {
    let mut sim = tissue(OutOfDomainPolicy::ClampToBoundary);
    let id = sim.create_agent(DVec3::new(95.0, 50.0, 50.0));
    if let Some(agent) = sim.population.get_mut(id) {
        agent.velocity = DVec3::new(100.0, 0.0, 0.0);
        agent.previous_velocity = DVec3::new(100.0, 0.0, 0.0);
    }

    for _ in 0..31 {
        sim.step().expect("step");
    }

    assert_eq!(sim.container.n_escaped(), 0);
    let agent = sim.population.get(id).expect("live agent");
    assert_eq!(agent.position.x, 100.0);
    assert!(agent.is_active);
    assert!(!agent.is_out_of_domain);
    assert!(agent.container_voxel.is_some());
    assert!(agent.voxel_index.is_some());
}

#[test]
fn interaction_removals_are_flushed_within_the_tick() {
    let mut sim = tissue(OutOfDomainPolicy::Exclude);
    let attacker = sim.create_agent(DVec3::new(50.0, 50.0, 50.0));
    let victim = sim.create_agent(DVec3::new(55.0, 50.0, 50.0));

    let interaction: InteractionFn = Arc::new(move |actor, population, _container, _m, _dt| {
        if actor == attacker {
            if let Some(other) = population.get_mut(victim) {
                other.flagged_for_removal = true;
            }
        }
    });
    sim.models.interactions = Some(Box::new(CustomInteraction(interaction)));

    for _ in 0..11 {
        sim.step().expect("step");
    }

    assert_eq!(sim.population.len(), 1);
    assert!(sim.population.contains(attacker));
    assert!(!sim.population.contains(victim));
    let bucketed: usize = (0..sim.container.n_buckets())
        .map(|b| sim.container.agents_in_voxel(b).len())
        .sum();
    assert_eq!(bucketed, 1);
}

#[test]
fn removal_detaches_both_sides_of_an_attachment() {
    let mut sim = tissue(OutOfDomainPolicy::Exclude);
    let a = sim.create_agent(DVec3::new(50.0, 50.0, 50.0));
    let b = sim.create_agent(DVec3::new(58.0, 50.0, 50.0));
    sim.population.get_mut(a).expect("live agent").attachments.push(b);
    sim.population.get_mut(b).expect("live agent").attachments.push(a);

    assert!(sim.remove_agent(b));
    assert_eq!(sim.population.len(), 1);
    assert!(sim.population.get_mut(a).expect("live agent").attachments.is_empty());
    assert!(!sim.remove_agent(b));
}
