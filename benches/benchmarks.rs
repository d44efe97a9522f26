use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;

use mcfvm_rs::agents::population::Population;
use mcfvm_rs::container::models::StandardAdhesionRepulsion;
use mcfvm_rs::numerics::diffusion::LodSolver;
use mcfvm_rs::numerics::NoDiffusion;
use mcfvm_rs::physics::microenvironment::Microenvironment;
use mcfvm_rs::simulation::{DomainSettings, Simulation, SimulationSettings};

fn mesh_sizes() -> Vec<usize> {
    vec![16, 32]
}

fn population_sizes() -> Vec<usize> {
    vec![256, 1024]
}

fn two_substrate_field(nodes: usize) -> Microenvironment {
    let mut m = Microenvironment::new();
    m.add_substrate("oxygen", "mmHg", 1.0e5, 0.0)
        .expect("substrate registration");
    m.add_substrate("waste", "dimensionless", 2.0e4, 0.0)
        .expect("substrate registration");
    let span = nodes as f64 * 20.0;
    m.resize_space([DVec3::ZERO, DVec3::splat(span)], [nodes, nodes, nodes]);
    m.set_uniform(0, 38.0).expect("known substrate");
    m
}

fn bench_diffusion_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("diffusion_step");
    for &nodes in &mesh_sizes() {
        let mut m = two_substrate_field(nodes);
        let mut solver = LodSolver::new();
        solver.verbose = false;
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |b, &_| {
            b.iter(|| {
                solver.step(&mut m, 0.01).expect("regular mesh");
            });
        });
    }
    group.finish();
}

fn bench_secretion_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("secretion_exchange");
    for &count in &population_sizes() {
        let mut m = two_substrate_field(8);
        let mut population = Population::new();
        population.sync_substrate_count(2);
        for i in 0..count {
            let position = DVec3::new(
                (i % 8) as f64 * 20.0 + 10.0,
                ((i / 8) % 8) as f64 * 20.0 + 10.0,
                ((i / 64) % 8) as f64 * 20.0 + 10.0,
            );
            let id = population.create(position);
            if let Some(agent) = population.get_mut(id) {
                agent.set_volume(2494.0);
                agent.voxel_index = Some(m.mesh.nearest_voxel_index(position));
            }
            population.uptake_rates_mut(id).expect("live agent")[0] = 10.0;
            population.secretion_rates_mut(id).expect("live agent")[1] = 1.0;
            population.saturation_densities_mut(id).expect("live agent")[1] = 1.0;
        }
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &_| {
            b.iter(|| {
                population.simulate_secretion_and_uptake(&mut m, 0.01);
            });
        });
    }
    group.finish();
}

fn bench_gradient_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("gradient_refresh");
    for &nodes in &mesh_sizes() {
        let mut m = two_substrate_field(nodes);
        let center = m.mesh.voxel_index(nodes / 2, nodes / 2, nodes / 2);
        m.density_mut(center)[1] = 100.0;
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |b, &_| {
            b.iter(|| {
                m.invalidate_gradients();
                m.compute_all_gradient_vectors();
                std::hint::black_box(m.gradient(center));
            });
        });
    }
    group.finish();
}

fn bench_mechanics_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("mechanics_step");
    for &count in &population_sizes() {
        let mut settings = SimulationSettings::default();
        settings.domain = DomainSettings {
            x: [-200.0, 200.0],
            y: [-200.0, 200.0],
            z: [-200.0, 200.0],
            voxel_size: 20.0,
        };
        // Fire the velocity pass on every step so each iteration is uniform.
        settings.mechanics_dt = 0.01;
        settings.phenotype_dt = 1.0e9;
        let mut sim = Simulation::new(settings);
        sim.solver = Box::new(NoDiffusion);
        sim.models.mechanics = Some(Box::new(StandardAdhesionRepulsion::default()));

        let side = (count as f64).cbrt().ceil() as usize;
        let mut placed = 0;
        'seed: for k in 0..side {
            for j in 0..side {
                for i in 0..side {
                    if placed == count {
                        break 'seed;
                    }
                    let position = DVec3::new(i as f64, j as f64, k as f64) * 15.0
                        - DVec3::splat(side as f64 * 7.5);
                    let id = sim.create_agent(position);
                    if let Some(agent) = sim.population.get_mut(id) {
                        agent.set_volume(2494.0);
                    }
                    placed += 1;
                }
            }
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &_| {
            b.iter(|| {
                sim.step().expect("step");
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_diffusion_step,
    bench_secretion_exchange,
    bench_gradient_refresh,
    bench_mechanics_step
);
criterion_main!(benches);
